//! The testcase record fetched from the crash-report service.

use crate::environment::Environment;
use crate::error::ReproError;
use crate::stacktrace::unescape_html;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ENVIRONMENT_MARKER: &str = "[Environment] ";
const ENVIRONMENT_SEPARATOR: &str = " = ";
const COMMAND_MARKER: &str = "Running command: ";
const LAYOUT_TESTS_DIR: &str = "LayoutTests";

#[derive(Debug, Clone, Deserialize)]
pub struct StacktraceLine {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StacktraceRecord {
    #[serde(default)]
    pub lines: Vec<StacktraceLine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataRecord {
    #[serde(default)]
    pub build_url: String,
    #[serde(default)]
    pub gn_args: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestcaseDetailRecord {
    pub job_type: String,
    pub absolute_path: String,
    #[serde(default)]
    pub one_time_crasher_flag: bool,
    #[serde(default)]
    pub gestures: Option<Vec<String>>,
    #[serde(default)]
    pub window_argument: String,
    #[serde(default)]
    pub minimized_arguments: String,
}

/// Wire shape of `/v2/testcase-detail/refresh`.
#[derive(Debug, Clone, Deserialize)]
pub struct TestcaseRecord {
    pub id: u64,
    pub crash_stacktrace: StacktraceRecord,
    #[serde(default)]
    pub crash_revision: u64,
    #[serde(default)]
    pub metadata: MetadataRecord,
    pub testcase: TestcaseDetailRecord,
    #[serde(default)]
    pub crash_type: String,
    #[serde(default)]
    pub crash_state: String,
}

/// A loaded testcase. Nothing mutates it after construction.
#[derive(Debug, Clone)]
pub struct Testcase {
    pub id: u64,
    pub job_type: String,
    pub revision: u64,
    pub build_url: String,
    pub absolute_path: String,
    pub file_extension: String,
    pub reproducible: bool,
    pub crash_type: String,
    pub crash_state: String,
    pub gn_args: Option<String>,
    pub gestures: Option<Vec<String>>,
    pub environment: Environment,
    pub reproduction_args: String,
    pub stacktrace_lines: Vec<String>,
}

impl Testcase {
    pub fn from_json(json: &str) -> Result<Self, ReproError> {
        let record: TestcaseRecord =
            serde_json::from_str(json).map_err(|e| ReproError::InvalidTestcase(e.to_string()))?;
        Self::from_record(record)
    }

    pub fn from_record(record: TestcaseRecord) -> Result<Self, ReproError> {
        let stacktrace_lines: Vec<String> = record
            .crash_stacktrace
            .lines
            .into_iter()
            .map(|line| line.content)
            .collect();
        let (environment, recorded_args) = parse_environment_and_args(&stacktrace_lines)?;

        let reproduction_args = if recorded_args.is_empty() {
            format!(
                "{} {}",
                record.testcase.window_argument, record.testcase.minimized_arguments
            )
            .trim()
            .to_string()
        } else {
            recorded_args
        };

        let testcase = Self {
            id: record.id,
            job_type: record.testcase.job_type,
            revision: record.crash_revision,
            build_url: record.metadata.build_url,
            file_extension: file_extension(&record.testcase.absolute_path),
            absolute_path: record.testcase.absolute_path,
            reproducible: !record.testcase.one_time_crasher_flag,
            crash_type: record.crash_type,
            crash_state: record.crash_state,
            gn_args: record
                .metadata
                .gn_args
                .map(|args| args.trim_end_matches('\n').to_string()),
            gestures: record.testcase.gestures,
            environment,
            reproduction_args,
            stacktrace_lines,
        };
        debug!(
            id = testcase.id,
            job_type = %testcase.job_type,
            args = %testcase.reproduction_args,
            "Loaded testcase"
        );
        Ok(testcase)
    }

    /// Name of the binary from the recorded `Running command:` line.
    pub fn binary_name(&self) -> Result<String, ReproError> {
        self.stacktrace_lines
            .iter()
            .find_map(|line| line.split_once(COMMAND_MARKER))
            .and_then(|(_, command)| command.split(' ').next())
            .map(|binary| {
                Path::new(binary)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| binary.to_string())
            })
            .filter(|name| !name.is_empty())
            .ok_or(ReproError::MinimizationNotFinished)
    }

    pub fn uses_gestures(&self) -> bool {
        self.gestures.as_ref().is_some_and(|g| !g.is_empty())
    }
}

/// Extracts `[Environment]` variables and the recorded arguments.
///
/// Sanitizer option variables are forced to symbolize. The `Running command:`
/// line loses its first (binary) and last (testcase path) tokens.
pub fn parse_environment_and_args(
    raw_lines: &[String],
) -> Result<(Environment, String), ReproError> {
    let mut environment = Environment::new();
    let mut args = String::new();

    for line in raw_lines.iter().map(|line| unescape_html(line)) {
        if let Some((_, assignment)) = line.split_once(ENVIRONMENT_MARKER) {
            let Some((name, value)) = assignment.split_once(ENVIRONMENT_SEPARATOR) else {
                debug!(%line, "Skipping environment line without assignment");
                continue;
            };
            let mut value = value.to_string();
            if name.contains("_OPTIONS") {
                value = value.replace("symbolize=0", "symbolize=1");
                if !value.contains("symbolize=1") {
                    value.push_str(":symbolize=1");
                }
            }
            environment.insert(name.to_string(), value);
        } else if let Some((_, command)) = line.split_once(COMMAND_MARKER) {
            let tokens: Vec<&str> = command.split(' ').collect();
            args = if tokens.len() > 2 {
                tokens[1..tokens.len() - 1].join(" ")
            } else {
                String::new()
            };
        }
    }

    Ok((environment, args))
}

/// `".js"` for `/a/b/testcase.js`, empty when there is no extension.
pub fn file_extension(absolute_path: &str) -> String {
    Path::new(absolute_path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Moves a layout test into the local WebKit checkout so relative resources
/// resolve. Testcases outside `LayoutTests` are returned unchanged.
pub fn relocate_layout_test(
    testcase_path: &Path,
    original_path: &str,
    source_directory: &Path,
) -> Result<PathBuf, ReproError> {
    let marker = format!("/{LAYOUT_TESTS_DIR}/");
    let Some(index) = original_path.find(&marker) else {
        return Ok(testcase_path.to_path_buf());
    };

    let relative = &original_path[index + marker.len()..];
    let new_path = source_directory
        .join("third_party")
        .join("WebKit")
        .join(LAYOUT_TESTS_DIR)
        .join(relative);
    if let Some(parent) = new_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(testcase_path, &new_path)?;
    info!(from = %testcase_path.display(), to = %new_path.display(), "Moved layout test");
    Ok(new_path)
}
