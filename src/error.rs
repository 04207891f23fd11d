//! Error types for the formtab library

use thiserror::Error;

/// Result type alias for formtab operations
pub type Result<T> = std::result::Result<T, TabError>;

/// Main error type for all extraction operations
#[derive(Error, Debug)]
pub enum TabError {
    /// Malformed cell or range reference
    #[error("Invalid cell reference: {0}")]
    InvalidReference(String),

    /// Error occurred while reading from the underlying workbook
    #[error("Failed to read workbook: {0}")]
    ReadError(String),

    /// Error occurred while writing or saving a workbook
    #[error("Failed to write workbook: {0}")]
    WriteError(String),

    /// Invalid sheet name or sheet not found
    #[error("Sheet '{sheet}' not found. Available sheets: {available}")]
    SheetNotFound { sheet: String, available: String },

    /// Cell holds a spreadsheet error value (raised in strict mode only)
    #[error("Cell contains error value {code}")]
    CellError { code: String },

    /// Error raised while resolving a particular cell or range
    #[error("Failed to extract '{cell}': {source}")]
    AtCell {
        cell: String,
        #[source]
        source: Box<TabError>,
    },

    /// The spreadsheet application failed or could not be started
    #[error("Spreadsheet application error: {0}")]
    Application(String),

    /// Operation not offered by the selected engine
    #[error("Feature not supported: {0}")]
    NotSupported(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TabError {
    /// Attach the reference being resolved to an error
    pub(crate) fn at(self, cell: impl Into<String>) -> Self {
        TabError::AtCell {
            cell: cell.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping `AtCell` context layers
    pub fn root(&self) -> &TabError {
        match self {
            TabError::AtCell { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<calamine::Error> for TabError {
    fn from(err: calamine::Error) -> Self {
        TabError::ReadError(err.to_string())
    }
}

impl From<quick_xml::Error> for TabError {
    fn from(err: quick_xml::Error) -> Self {
        TabError::ReadError(format!("malformed XML: {}", err))
    }
}

impl From<quick_xml::events::attributes::AttrError> for TabError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        TabError::ReadError(format!("malformed XML attribute: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_context() {
        let err = TabError::CellError {
            code: "#DIV/0!".to_string(),
        }
        .at("E34");
        assert_eq!(err.to_string(), "Failed to extract 'E34': Cell contains error value #DIV/0!");
        assert!(matches!(err.root(), TabError::CellError { code } if code == "#DIV/0!"));
    }

    #[test]
    fn test_sheet_not_found_message() {
        let err = TabError::SheetNotFound {
            sheet: "Data".to_string(),
            available: "Sheet1, Sheet2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Sheet 'Data' not found. Available sheets: Sheet1, Sheet2"
        );
    }
}
