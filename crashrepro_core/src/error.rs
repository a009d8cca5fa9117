//! Typed failures surfaced by the reproduction pipeline.
//!
//! Every variant maps to a stable process exit code so the CLI can report the
//! failure class without inspecting the message text.

use crate::signature::{CrashSignature, MAX_OUTPUT_CHARS, truncate_chars};
use std::path::PathBuf;
use thiserror::Error;

/// How many crash signatures an [`ReproError::Unreproducible`] keeps for diagnostics.
pub const MAX_REPORTED_SIGNATURES: usize = 10;

#[derive(Error, Debug)]
pub enum ReproError {
    /// The stacktrace has no `Running command:` line, which only appears once
    /// the testcase has been minimized.
    #[error(
        "The testcase hasn't been minimized yet or cannot be minimized.\n\
         If the testcase is new, please wait for a few more hours.\n\
         If we can't minimize the testcase, it means the testcase is \
         unreproducible and, thus, not supported by this tool."
    )]
    MinimizationNotFinished,

    #[error("A sanitizer must be provided with each job definition.")]
    SanitizerNotProvided,

    #[error(
        "Error authenticating with ClusterFuzz. Can you access the testcase \
         on clusterfuzz.com using the same email?\n{response}"
    )]
    ClusterfuzzAuth { response: String },

    #[error(
        "File permissions too permissive to open {path:?}\n\
         Current permissions: {mode:o}\nExpected user access only\n\
         You can run \"chmod 600 {path:?}\" to fix this issue"
    )]
    PermissionsTooPermissive { path: PathBuf, mode: u32 },

    #[error("The job {0} is not yet supported by this tool.")]
    JobTypeNotSupported(String),

    #[error(
        "{0} is not found. Please install it or ensure the path is correct.\n\
         Most of the time you can install it with `apt-get install {0}`."
    )]
    NotInstalled(String),

    #[error(
        "The definition for the {0} job type is incorrectly formatted or \
         missing crucial information."
    )]
    BadJobTypeDefinition(String),

    #[error(
        "The testcase cannot be reproduced after trying {count} times.\n\
         Here are 2 things you can try:\n\
         - Run with the downloaded build by adding `--build download`.\n\
         - Run with more number of trials by adding `-i 10`, \
         which is especially good for gesture-related testcases."
    )]
    Unreproducible {
        count: u32,
        signatures: Vec<CrashSignature>,
    },

    #[error("`{command}` failed with the return code {returncode}.")]
    CommandFailed {
        command: String,
        returncode: i32,
        stderr: String,
    },

    #[error("`{command}` (pid={pid}) cannot be killed.")]
    KillProcessFailed { command: String, pid: u32 },

    #[error("Malformed sanitizer option segment {segment:?} in {options:?}")]
    SanitizerOptions { options: String, segment: String },

    #[error("Malformed gesture {0:?}, expected `<type>,<payload>`")]
    InvalidGesture(String),

    #[error("Crash service request failed: {0}")]
    Service(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid testcase record: {0}")]
    InvalidTestcase(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ReproError {
    fn from(err: reqwest::Error) -> Self {
        ReproError::Service(err.to_string())
    }
}

impl ReproError {
    /// Builds the exhaustion error, keeping only the last
    /// [`MAX_REPORTED_SIGNATURES`] signatures.
    pub fn unreproducible(count: u32, signatures: impl IntoIterator<Item = CrashSignature>) -> Self {
        let mut signatures: Vec<CrashSignature> = signatures.into_iter().collect();
        if signatures.len() > MAX_REPORTED_SIGNATURES {
            signatures.drain(..signatures.len() - MAX_REPORTED_SIGNATURES);
        }
        ReproError::Unreproducible { count, signatures }
    }

    pub fn command_failed(command: impl Into<String>, returncode: i32, stderr: &str) -> Self {
        ReproError::CommandFailed {
            command: command.into(),
            returncode,
            stderr: truncate_chars(stderr, MAX_OUTPUT_CHARS).to_string(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ReproError::MinimizationNotFinished => 42,
            ReproError::SanitizerNotProvided => 43,
            ReproError::ClusterfuzzAuth { .. } => 44,
            ReproError::PermissionsTooPermissive { .. } => 45,
            ReproError::JobTypeNotSupported(_) => 47,
            ReproError::NotInstalled(_) => 48,
            ReproError::BadJobTypeDefinition(_) => 50,
            ReproError::Unreproducible { .. } => 51,
            ReproError::CommandFailed { .. } => 53,
            ReproError::KillProcessFailed { .. } => 54,
            ReproError::SanitizerOptions { .. } => 56,
            ReproError::InvalidGesture(_) => 57,
            ReproError::Service(_) => 58,
            ReproError::Config(_) => 59,
            ReproError::Io(_) => 60,
            ReproError::InvalidTestcase(_) => 61,
        }
    }

    /// Structured diagnostics attached to the error, if any.
    pub fn extras(&self) -> Option<serde_json::Value> {
        match self {
            ReproError::Unreproducible { signatures, .. } => {
                Some(serde_json::json!({ "signatures": signatures }))
            }
            ReproError::CommandFailed { stderr, .. } => Some(serde_json::json!({ "stderr": stderr })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn unreproducible_keeps_last_ten_signatures() {
        let signatures = (0..15).map(|i| CrashSignature::new(format!("type{i}"), ["a"]));
        let err = ReproError::unreproducible(15, signatures);
        match &err {
            ReproError::Unreproducible { count, signatures } => {
                assert_eq!(*count, 15);
                assert_eq!(signatures.len(), MAX_REPORTED_SIGNATURES);
                assert_eq!(signatures[0].crash_type(), "type5");
                assert_eq!(signatures[9].crash_type(), "type14");
            }
            other => panic!("Expected Unreproducible, got {other:?}"),
        }
        assert!(err.to_string().contains("after trying 15 times"));
    }

    #[test]
    fn unreproducible_extras_serialize_signatures() {
        let sig = CrashSignature::new("Heap-buffer-overflow", ["frame1", "frame2"]).with_output("out");
        let err = ReproError::unreproducible(1, vec![sig]);
        let extras = err.extras().expect("extras");
        assert_eq!(extras["signatures"][0]["type"], "Heap-buffer-overflow");
        assert_eq!(extras["signatures"][0]["state"][1], "frame2");
        assert_eq!(extras["signatures"][0]["output"], "out");
    }

    #[test]
    fn command_failed_truncates_stderr() {
        let stderr = "x".repeat(MAX_OUTPUT_CHARS + 50);
        match ReproError::command_failed("ls", 2, &stderr) {
            ReproError::CommandFailed { stderr, returncode, .. } => {
                assert_eq!(stderr.len(), MAX_OUTPUT_CHARS);
                assert_eq!(returncode, 2);
            }
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn exit_codes_are_distinct() {
        let errors = vec![
            ReproError::MinimizationNotFinished,
            ReproError::SanitizerNotProvided,
            ReproError::ClusterfuzzAuth { response: String::new() },
            ReproError::PermissionsTooPermissive { path: PathBuf::from("/a"), mode: 0o644 },
            ReproError::JobTypeNotSupported("j".into()),
            ReproError::NotInstalled("gdb".into()),
            ReproError::BadJobTypeDefinition("j".into()),
            ReproError::unreproducible(1, Vec::new()),
            ReproError::command_failed("c", 1, ""),
            ReproError::KillProcessFailed { command: "c".into(), pid: 1 },
            ReproError::SanitizerOptions { options: "a".into(), segment: "a".into() },
            ReproError::InvalidGesture("g".into()),
            ReproError::Service("s".into()),
            ReproError::Config("c".into()),
            ReproError::Io(std::io::Error::other("io")),
            ReproError::InvalidTestcase("t".into()),
        ];
        let codes: HashSet<i32> = errors.iter().map(ReproError::exit_code).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0) && !codes.contains(&1));
    }
}
