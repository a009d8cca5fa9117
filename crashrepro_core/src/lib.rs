pub mod args;
pub mod binary;
pub mod commands;
pub mod config;
pub mod display;
pub mod editor;
pub mod environment;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod gestures;
pub mod jobs;
pub mod logging;
pub mod observer;
pub mod oracle;
pub mod reproducer;
pub mod resources;
pub mod sanitizer;
pub mod scheduler;
pub mod service;
pub mod signature;
pub mod stacktrace;
pub mod store;
pub mod symbolizer;
pub mod testcase;

#[cfg(test)]
pub(crate) mod testing;

pub use binary::{BinaryProvider, PrebuiltBinary};
pub use config::{ConfigError, ReproConfig};
pub use environment::{Environment, EnvironmentNormalizer};
pub use error::ReproError;
pub use executor::{CommandExecutor, ExecRequest, ExecutionStatus, Executor, ProcessOutput};
pub use feedback::SignatureLog;
pub use jobs::{BuildMode, JobDefinition, ReproducerKind};
pub use observer::{AttemptObserver, NoOpObserver};
pub use oracle::{Oracle, SimilarityOracle, Verdict, is_similar};
pub use reproducer::{Reproducer, ReproducerOptions};
pub use sanitizer::{Sanitizer, SanitizerOptions};
pub use scheduler::{FixedBackoff, RetryScheduler};
pub use signature::CrashSignature;
pub use stacktrace::StacktraceParser;
pub use testcase::Testcase;
