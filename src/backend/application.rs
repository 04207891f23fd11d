//! Engine that goes through an external spreadsheet application
//!
//! A resident LibreOffice-compatible `soffice` re-saves the source as xlsx
//! into a private temporary directory; the copy is then served by
//! [`XlsxBackend`].
//! This accepts legacy, damaged or otherwise odd files the built-in readers
//! refuse.

use super::{Backend, XlsxBackend};
use crate::error::{Result, TabError};
use crate::reference::{CellCoord, CellSpan};
use crate::types::{CellValue, DateSystem};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use tempfile::TempDir;

/// Environment variable overriding the application program
pub const PROGRAM_ENV: &str = "FORMTAB_SOFFICE";
const DEFAULT_PROGRAM: &str = "soffice";

/// How to start the spreadsheet application
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Executable name or path
    pub program: PathBuf,
    /// Passed to every conversion, before the source file
    pub extra_args: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            program: PathBuf::from(DEFAULT_PROGRAM),
            extra_args: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        AppConfig {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Program from `FORMTAB_SOFFICE`, or `soffice` on the `PATH`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        lookup(PROGRAM_ENV)
            .filter(|s| !s.trim().is_empty())
            .map(Self::new)
            .unwrap_or_default()
    }
}

/// A spreadsheet application shared by many workbooks
///
/// Launching starts one resident headless instance bound to a private user
/// profile. Conversions are run with the same profile, so the application
/// hands them to the resident instance instead of booting again for every
/// file. Workbooks opened with
/// [`Engine::Application`](super::Engine::Application) borrow the app, so it
/// cannot be quit while any of them is still open.
///
/// # Examples
///
/// ```no_run
/// use formtab::backend::{AppConfig, Engine, SpreadsheetApp};
/// use formtab::Workbook;
///
/// let app = SpreadsheetApp::launch(AppConfig::from_env())?;
/// for path in ["legacy_1997.xls", "legacy_1998.xls"] {
///     let mut workbook = Workbook::open(path, Engine::Application(&app))?;
///     println!("{:?}", workbook.tab_form("B3")?);
///     workbook.close()?;
/// }
/// app.quit()?;
/// # Ok::<(), formtab::TabError>(())
/// ```
#[derive(Debug)]
pub struct SpreadsheetApp {
    config: AppConfig,
    profile: Option<TempDir>,
    instance: Option<Child>,
    version: String,
}

impl SpreadsheetApp {
    /// Check the program, then start the resident instance
    pub fn launch(config: AppConfig) -> Result<Self> {
        let output = Command::new(&config.program)
            .arg("--version")
            .output()
            .map_err(|e| cannot_start(&config.program, e))?;
        check_status(&config.program, &output)?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let profile = tempfile::Builder::new()
            .prefix("formtab-profile-")
            .tempdir()?;
        let mut instance = Command::new(&config.program)
            .arg(profile_arg(profile.path()))
            .args(["--headless", "--invisible", "--nologo", "--nodefault", "--norestore"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| cannot_start(&config.program, e))?;
        if let Some(status) = instance.try_wait()? {
            if !status.success() {
                return Err(TabError::Application(format!(
                    "'{}' exited right after launch ({})",
                    config.program.display(),
                    status
                )));
            }
        }

        log::info!(
            "spreadsheet application ready: {} ({}, pid {})",
            config.program.display(),
            if version.is_empty() { "unknown version" } else { version.as_str() },
            instance.id()
        );

        Ok(SpreadsheetApp {
            config,
            profile: Some(profile),
            instance: Some(instance),
            version,
        })
    }

    /// Version banner printed by the program
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Re-save `source` as xlsx into `out_dir`, returning the new file
    pub fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf> {
        let profile = self
            .profile
            .as_ref()
            .ok_or_else(|| TabError::Application("application already quit".to_string()))?;
        let stem = source.file_stem().ok_or_else(|| {
            TabError::Application(format!("'{}' has no file name", source.display()))
        })?;
        let mut file_name = stem.to_os_string();
        file_name.push(".xlsx");
        let target = out_dir.join(file_name);

        let output = Command::new(&self.config.program)
            .arg(profile_arg(profile.path()))
            .args(["--headless", "--norestore", "--convert-to", "xlsx", "--outdir"])
            .arg(out_dir)
            .args(&self.config.extra_args)
            .arg(source)
            .output()
            .map_err(|e| cannot_start(&self.config.program, e))?;
        check_status(&self.config.program, &output)?;

        // soffice exits successfully even when it could not load the file
        if !target.exists() {
            return Err(TabError::Application(format!(
                "conversion of '{}' produced no output: {}",
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        log::info!("converted {} -> {}", source.display(), target.display());
        Ok(target)
    }

    /// Stop the resident instance and remove the private profile
    pub fn quit(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(mut instance) = self.instance.take() {
            // already gone if it exited on its own
            if instance.try_wait()?.is_none() {
                instance.kill()?;
            }
            instance.wait()?;
            log::info!(
                "spreadsheet application {} released",
                self.config.program.display()
            );
        }
        if let Some(profile) = self.profile.take() {
            profile.close()?;
        }
        Ok(())
    }
}

impl Drop for SpreadsheetApp {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("releasing {} failed: {}", self.config.program.display(), e);
        }
    }
}

fn cannot_start(program: &Path, err: std::io::Error) -> TabError {
    TabError::Application(format!("cannot start '{}': {}", program.display(), err))
}

/// Binds a process to the shared user profile
fn profile_arg(profile: &Path) -> String {
    format!("-env:UserInstallation={}", file_url(profile))
}

fn check_status(program: &Path, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(TabError::Application(format!(
        "'{}' failed ({}): {}",
        program.display(),
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}

/// `file://` URL for a local directory, as expected by `-env:UserInstallation`
fn file_url(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    if text.starts_with('/') {
        format!("file://{}", text)
    } else {
        format!("file:///{}", text)
    }
}

/// Workbook served from an application-converted xlsx copy
pub struct ApplicationBackend<'app> {
    app: &'app SpreadsheetApp,
    source: PathBuf,
    workdir: Option<TempDir>,
    inner: XlsxBackend,
}

impl<'app> ApplicationBackend<'app> {
    pub fn open(app: &'app SpreadsheetApp, path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(TabError::ReadError(format!(
                "{}: no such file",
                path.display()
            )));
        }
        let workdir = tempfile::Builder::new()
            .prefix("formtab-convert-")
            .tempdir()?;
        let converted = app.convert(path, workdir.path())?;
        let inner = XlsxBackend::open(&converted)?;

        Ok(ApplicationBackend {
            app,
            source: path.to_path_buf(),
            workdir: Some(workdir),
            inner,
        })
    }

    pub fn application(&self) -> &'app SpreadsheetApp {
        self.app
    }

    /// Where `save(None)` writes: the source path with an `.xlsx` extension
    pub fn default_save_path(&self) -> PathBuf {
        self.source.with_extension("xlsx")
    }
}

impl Backend for ApplicationBackend<'_> {
    fn name(&self) -> &'static str {
        "application"
    }

    fn sheet_names(&self) -> Vec<String> {
        self.inner.sheet_names()
    }

    fn set_sheet(&mut self, name: &str) -> Result<()> {
        self.inner.set_sheet(name)
    }

    fn current_sheet(&self) -> Option<&str> {
        self.inner.current_sheet()
    }

    fn date_system(&self) -> DateSystem {
        self.inner.date_system()
    }

    fn read_cell(&mut self, coord: CellCoord) -> Result<CellValue> {
        self.inner.read_cell(coord)
    }

    fn read_range(&mut self, span: CellSpan) -> Result<Vec<Vec<CellValue>>> {
        self.inner.read_range(span)
    }

    fn used_extent(&mut self) -> Result<Option<CellSpan>> {
        self.inner.used_extent()
    }

    fn write_cell(&mut self, coord: CellCoord, value: CellValue) -> Result<()> {
        self.inner.write_cell(coord, value)
    }

    fn save(&mut self, path: Option<&Path>) -> Result<()> {
        let target = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_save_path());
        self.inner.save(Some(&target))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()?;
        if let Some(workdir) = self.workdir.take() {
            workdir.close()?;
        }
        Ok(())
    }
}
