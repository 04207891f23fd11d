//! xlsx output
//!
//! Used by the read/write engine to save workbooks, and handy for building
//! form fixtures in tests.

pub mod shared_strings;
pub mod workbook;
pub mod xml_writer;

pub use shared_strings::SharedStrings;
pub use workbook::WorkbookWriter;
pub use xml_writer::XmlWriter;
