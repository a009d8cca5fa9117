use crate::error::ReproError;
use crate::executor::ProcessOutput;
use crate::oracle::Verdict;
use crate::signature::CrashSignature;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What one reproduction attempt produced.
///
/// `verdict` is `None` when the attempt timed out and was never compared
/// against the original crash.
#[derive(Debug, Clone, Copy)]
pub struct AttemptRecord<'a> {
    pub attempt: u32,
    pub output: &'a ProcessOutput,
    pub signature: &'a CrashSignature,
    pub verdict: Option<Verdict>,
}

impl AttemptRecord<'_> {
    pub fn matched(&self) -> bool {
        self.verdict.is_some_and(|v| v.is_match())
    }
}

/// An `AttemptObserver` is notified around every reproduction attempt.
///
/// Observers prepare per-attempt state in `pre_attempt` (for example a fresh
/// browser profile) and collect what they need in `post_attempt`. A failing
/// `pre_attempt` aborts the whole reproduction; a failing `post_attempt` is
/// logged and ignored.
pub trait AttemptObserver: Send {
    /// Identifies the observer in logs.
    fn name(&self) -> &'static str;

    fn pre_attempt(&mut self, attempt: u32) -> Result<(), ReproError>;

    fn post_attempt(&mut self, record: &AttemptRecord<'_>) -> Result<(), ReproError>;
}

#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpObserver;

impl AttemptObserver for NoOpObserver {
    fn name(&self) -> &'static str {
        "NoOpObserver"
    }

    fn pre_attempt(&mut self, _attempt: u32) -> Result<(), ReproError> {
        Ok(())
    }

    fn post_attempt(&mut self, _record: &AttemptRecord<'_>) -> Result<(), ReproError> {
        Ok(())
    }
}

/// Gives every attempt an empty browser profile directory, so state left
/// behind by one run cannot influence the next.
#[derive(Debug, Clone)]
pub struct FreshUserDataDirObserver {
    dir: PathBuf,
}

impl FreshUserDataDirObserver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AttemptObserver for FreshUserDataDirObserver {
    fn name(&self) -> &'static str {
        "FreshUserDataDirObserver"
    }

    fn pre_attempt(&mut self, attempt: u32) -> Result<(), ReproError> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        fs::create_dir_all(&self.dir)?;
        debug!(attempt, dir = %self.dir.display(), "Recreated user data dir");
        Ok(())
    }

    fn post_attempt(&mut self, _record: &AttemptRecord<'_>) -> Result<(), ReproError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionStatus;

    fn output() -> ProcessOutput {
        ProcessOutput {
            status: ExecutionStatus::Exited(1),
            output: "crash".into(),
        }
    }

    #[test]
    fn no_op_observer_behaves_as_expected() {
        let mut observer = NoOpObserver;
        assert_eq!(observer.name(), "NoOpObserver");
        assert!(observer.pre_attempt(1).is_ok());
        let out = output();
        let sig = CrashSignature::new("t", ["a"]);
        let record = AttemptRecord {
            attempt: 1,
            output: &out,
            signature: &sig,
            verdict: None,
        };
        assert!(observer.post_attempt(&record).is_ok());
        assert!(!record.matched());
    }

    #[test]
    fn record_matches_only_with_matching_verdict() {
        let out = output();
        let sig = CrashSignature::new("t", ["a"]);
        let record = AttemptRecord {
            attempt: 2,
            output: &out,
            signature: &sig,
            verdict: Some(Verdict { score: 2, threshold: 1 }),
        };
        assert!(record.matched());
    }

    #[test]
    fn user_data_dir_is_emptied_before_each_attempt() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("user-data-dir");
        let mut observer = FreshUserDataDirObserver::new(&dir);

        observer.pre_attempt(1).unwrap();
        assert!(dir.is_dir());
        fs::write(dir.join("Preferences"), "{}").unwrap();

        observer.pre_attempt(2).unwrap();
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }
}
