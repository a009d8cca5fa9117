use crate::error::ReproError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where the binary under test lives.
pub trait BinaryProvider {
    fn binary_path(&self) -> &Path;
    fn build_directory(&self) -> &Path;
    /// Checkout the binary was built from, when one is known.
    fn source_directory(&self) -> Option<&Path>;
}

/// A binary that already exists on disk, either built by the user or
/// unpacked from a downloaded build.
#[derive(Debug, Clone)]
pub struct PrebuiltBinary {
    binary_path: PathBuf,
    build_directory: PathBuf,
    source_directory: Option<PathBuf>,
}

impl PrebuiltBinary {
    /// `<build_directory>/<binary_name>`, which must exist.
    pub fn new(
        build_directory: impl Into<PathBuf>,
        binary_name: &str,
        source_directory: Option<PathBuf>,
    ) -> Result<Self, ReproError> {
        let build_directory = build_directory.into();
        let binary_path = build_directory.join(binary_name);
        Self::with_binary(binary_path, build_directory, source_directory)
    }

    /// An explicit binary path, possibly outside the build directory.
    pub fn with_binary(
        binary_path: impl Into<PathBuf>,
        build_directory: impl Into<PathBuf>,
        source_directory: Option<PathBuf>,
    ) -> Result<Self, ReproError> {
        let binary_path = binary_path.into();
        if !binary_path.is_file() {
            return Err(ReproError::NotInstalled(binary_path.display().to_string()));
        }
        let build_directory = build_directory.into();
        debug!(binary = %binary_path.display(), build_dir = %build_directory.display(), "Using prebuilt binary");
        Ok(Self {
            binary_path,
            build_directory,
            source_directory,
        })
    }
}

impl BinaryProvider for PrebuiltBinary {
    fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    fn build_directory(&self) -> &Path {
        &self.build_directory
    }

    fn source_directory(&self) -> Option<&Path> {
        self.source_directory.as_deref()
    }
}
