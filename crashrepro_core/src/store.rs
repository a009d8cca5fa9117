//! Per-testcase working directories under the testcases root.

use crate::error::ReproError;
use crate::executor::{ExecRequest, Executor};
use crate::testcase::Testcase;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const UNZIP: &str = "unzip";
/// Exit status of `sh` when the command is not found.
const COMMAND_NOT_FOUND: i32 = 127;
const TESTCASE_STEM: &str = "testcase";

/// Lays testcases out as `<root>/<id>_testcase/`.
#[derive(Debug, Clone)]
pub struct TestcaseStore {
    root: PathBuf,
}

impl TestcaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ReproError> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        } else if !root.is_dir() {
            return Err(ReproError::Config(format!(
                "testcases path {} exists but is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn testcase_dir(&self, testcase_id: u64) -> PathBuf {
        self.root.join(format!("{testcase_id}_{TESTCASE_STEM}"))
    }

    /// Deletes whatever a previous run left for this testcase and returns
    /// the empty directory.
    pub fn prepare_dir(&self, testcase_id: u64) -> Result<PathBuf, ReproError> {
        let dir = self.testcase_dir(testcase_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Prepared testcase directory");
        Ok(dir)
    }

    /// Places the downloaded file where the reproducer expects it.
    ///
    /// Zip archives are extracted in place and the recorded absolute path is
    /// resolved inside the directory. Anything else becomes
    /// `testcase<extension>`.
    pub fn install(
        &self,
        testcase: &Testcase,
        downloaded: &Path,
        executor: &mut dyn Executor,
    ) -> Result<PathBuf, ReproError> {
        let dir = downloaded
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.testcase_dir(testcase.id));

        let is_zip = downloaded
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_zip {
            unzip(executor, downloaded, &dir)?;
            let inner = testcase.absolute_path.trim_start_matches('/');
            let path = dir.join(inner);
            info!(path = %path.display(), "Extracted zipped testcase");
            return Ok(path);
        }

        let path = dir.join(format!("{TESTCASE_STEM}{}", testcase.file_extension));
        if path != downloaded {
            fs::rename(downloaded, &path)?;
        }
        Ok(path)
    }
}

fn unzip(executor: &mut dyn Executor, archive: &Path, dir: &Path) -> Result<(), ReproError> {
    let args = shell_words::join([
        "-o",
        archive.to_string_lossy().as_ref(),
        "-d",
        dir.to_string_lossy().as_ref(),
    ]);
    let request = ExecRequest::new(UNZIP, args).cwd(dir);
    match executor.execute(&request) {
        Err(ReproError::CommandFailed { returncode, .. }) if returncode == COMMAND_NOT_FOUND => {
            Err(ReproError::NotInstalled(UNZIP.into()))
        }
        result => result.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedExecutor, exited};

    fn testcase(absolute_path: &str) -> Testcase {
        let json = format!(
            r#"{{
                "id": 7,
                "crash_stacktrace": {{"lines": []}},
                "testcase": {{"job_type": "linux_asan_d8", "absolute_path": "{absolute_path}"}}
            }}"#
        );
        Testcase::from_json(&json).unwrap()
    }

    #[test]
    fn prepare_dir_starts_empty() {
        let root = tempfile::tempdir().unwrap();
        let store = TestcaseStore::new(root.path().join("testcases")).unwrap();
        let dir = store.prepare_dir(7).unwrap();
        assert_eq!(dir, root.path().join("testcases/7_testcase"));
        fs::write(dir.join("stale.js"), "old").unwrap();

        let dir = store.prepare_dir(7).unwrap();
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn file_root_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("file");
        fs::write(&file, "").unwrap();
        assert!(matches!(TestcaseStore::new(&file), Err(ReproError::Config(_))));
    }

    #[test]
    fn plain_testcase_is_renamed_with_extension() {
        let root = tempfile::tempdir().unwrap();
        let store = TestcaseStore::new(root.path()).unwrap();
        let dir = store.prepare_dir(7).unwrap();
        let downloaded = dir.join("fuzz-00042.js");
        fs::write(&downloaded, "crash()").unwrap();

        let mut executor = ScriptedExecutor::with_outputs(vec![]);
        let requests = executor.requests();
        let path = store
            .install(&testcase("/mnt/fuzz-00042.js"), &downloaded, &mut executor)
            .unwrap();
        assert!(requests.lock().unwrap().is_empty());
        assert_eq!(path, dir.join("testcase.js"));
        assert_eq!(fs::read_to_string(path).unwrap(), "crash()");
        assert!(!downloaded.exists());
    }

    #[test]
    fn zipped_testcase_is_extracted_and_resolved() {
        let root = tempfile::tempdir().unwrap();
        let store = TestcaseStore::new(root.path()).unwrap();
        let dir = store.prepare_dir(7).unwrap();
        let downloaded = dir.join("bundle.zip");
        fs::write(&downloaded, "PK").unwrap();

        let extracted = dir.clone();
        let mut executor = ScriptedExecutor::new(move |_| {
            fs::create_dir_all(extracted.join("mnt/scratch")).unwrap();
            fs::write(extracted.join("mnt/scratch/index.html"), "<html>").unwrap();
            Ok(exited(0, ""))
        });
        let requests = executor.requests();

        let path = store
            .install(&testcase("/mnt/scratch/index.html"), &downloaded, &mut executor)
            .unwrap();
        assert_eq!(path, dir.join("mnt/scratch/index.html"));
        assert!(path.is_file());

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].program, "unzip");
        assert_eq!(
            requests[0].args,
            shell_words::join([
                "-o",
                downloaded.to_string_lossy().as_ref(),
                "-d",
                dir.to_string_lossy().as_ref(),
            ])
        );
        assert!(requests[0].fail_on_error);
    }

    #[test]
    fn missing_unzip_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let store = TestcaseStore::new(root.path()).unwrap();
        let dir = store.prepare_dir(7).unwrap();
        let downloaded = dir.join("bundle.zip");
        fs::write(&downloaded, "PK").unwrap();

        let mut executor = ScriptedExecutor::new(|req| {
            Err(ReproError::command_failed(req.command_line(), 127, "unzip: not found"))
        });
        assert!(matches!(
            store.install(&testcase("/index.html"), &downloaded, &mut executor),
            Err(ReproError::NotInstalled(tool)) if tool == "unzip"
        ));
    }
}
