use crate::error::ReproError;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SYMBOLIZER_NAME: &str = "llvm-symbolizer";
pub const SYMBOLIZE_PROXY_NAME: &str = "asan_symbolize_proxy";
pub const SUPPRESSIONS_DIR: &str = "suppressions";

pub const EXECUTABLE_MODE: u32 = 0o755;
pub const DATA_MODE: u32 = 0o640;

/// Resolves files bundled with the tool.
///
/// Packaging tends to lose permission bits, so every lookup also resets the
/// mode of the file it returns.
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    root: PathBuf,
}

impl ResourceLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the absolute path of `root/parts...` after setting its mode.
    pub fn get(&self, mode: u32, parts: &[&str]) -> Result<PathBuf, ReproError> {
        let path = parts.iter().fold(self.root.clone(), |acc, part| acc.join(part));
        if !path.exists() {
            return Err(ReproError::NotInstalled(path.display().to_string()));
        }
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
        debug!(path = %path.display(), mode = format!("{mode:o}"), "Resolved resource");
        Ok(path)
    }

    pub fn symbolizer(&self) -> Result<PathBuf, ReproError> {
        self.get(EXECUTABLE_MODE, &[SYMBOLIZER_NAME])
    }

    pub fn symbolize_proxy(&self) -> Result<PathBuf, ReproError> {
        self.get(EXECUTABLE_MODE, &[SYMBOLIZE_PROXY_NAME])
    }

    pub fn suppressions(&self, name: &str) -> Result<PathBuf, ReproError> {
        let filename = suppressions_filename(name);
        self.get(DATA_MODE, &[SUPPRESSIONS_DIR, &filename])
    }

    pub fn suppressions_dir(&self) -> PathBuf {
        self.root.join(SUPPRESSIONS_DIR)
    }
}

pub fn suppressions_filename(name: &str) -> String {
    format!("{name}_suppressions.txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_fixes_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let symbolizer = dir.path().join(SYMBOLIZER_NAME);
        fs::write(&symbolizer, "bin").unwrap();
        fs::set_permissions(&symbolizer, fs::Permissions::from_mode(0o600)).unwrap();

        let locator = ResourceLocator::new(dir.path());
        let resolved = locator.symbolizer().unwrap();
        assert_eq!(resolved, symbolizer);
        let mode = fs::metadata(&resolved).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, EXECUTABLE_MODE);
    }

    #[test]
    fn suppressions_resolve_under_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(SUPPRESSIONS_DIR)).unwrap();
        let file = dir.path().join(SUPPRESSIONS_DIR).join("lsan_suppressions.txt");
        fs::write(&file, "leak:foo").unwrap();

        let locator = ResourceLocator::new(dir.path());
        assert_eq!(locator.suppressions("lsan").unwrap(), file);
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, DATA_MODE);
    }

    #[test]
    fn missing_resource_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let locator = ResourceLocator::new(dir.path());
        assert!(matches!(
            locator.symbolizer(),
            Err(ReproError::NotInstalled(_))
        ));
    }
}
