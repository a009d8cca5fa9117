//! Argument resolution for the reproduced binary.
//!
//! The recorded argument string is turned into the final command line in a
//! fixed order: user-supplied target args are appended, GL drawing is
//! re-enabled when running without a virtual display, `%APP_DIR%` and
//! `%TESTCASE%` placeholders are substituted, the command is optionally
//! wrapped in gdb, and finally the user may edit the result.

use crate::editor::Editor;
use crate::error::ReproError;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

pub const DISABLE_GL_DRAW_ARG: &str = "--disable-gl-drawing-for-tests";
pub const USER_DATA_DIR_ARG: &str = "--user-data-dir";
pub const APP_DIR_PLACEHOLDER: &str = "%APP_DIR%";
pub const TESTCASE_PLACEHOLDER: &str = "%TESTCASE%";
pub const GDB_PROGRAM: &str = "gdb";

static USER_DATA_DIR_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("{USER_DATA_DIR_ARG}[^ ]+")).expect("user data dir pattern is valid")
});

/// Inputs of [`prepare_args`] that do not come from the testcase record.
#[derive(Debug, Clone, Default)]
pub struct ArgOptions {
    pub target_args: String,
    pub disable_xvfb: bool,
    pub enable_debug: bool,
    pub edit_mode: bool,
}

/// The program, argument string and timeout actually used to run the crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub program: String,
    pub args: String,
    pub timeout: Option<Duration>,
}

fn append(args: &str, extra: &str) -> String {
    if args.trim().is_empty() {
        extra.to_string()
    } else {
        format!("{} {extra}", args.trim_end())
    }
}

/// Applies the substitution steps that do not involve gdb or the editor.
pub fn resolve_args(
    raw_args: &str,
    options: &ArgOptions,
    build_directory: &Path,
    testcase_path: &Path,
) -> String {
    let mut args = raw_args.to_string();

    if !options.target_args.trim().is_empty() {
        args = append(&args, options.target_args.trim());
    }

    // Without xvfb the user watches the window, so GL content must be drawn.
    if options.disable_xvfb && args.contains(DISABLE_GL_DRAW_ARG) {
        args = args
            .replace(&format!(" {DISABLE_GL_DRAW_ARG}"), "")
            .replace(DISABLE_GL_DRAW_ARG, "");
    }

    args = args.replace(APP_DIR_PLACEHOLDER, &build_directory.to_string_lossy());

    let testcase = testcase_path.to_string_lossy();
    if args.contains(TESTCASE_PLACEHOLDER) {
        args = args.replace(TESTCASE_PLACEHOLDER, &testcase);
    } else {
        args = append(&args, &testcase);
    }
    args
}

/// Runs the binary under gdb, stopping where the sanitizer reports. The
/// timeout is lifted so an interactive session is never killed.
pub fn wrap_for_gdb(binary: &str, args: &str) -> PreparedCommand {
    PreparedCommand {
        program: GDB_PROGRAM.to_string(),
        args: format!(
            "-ex 'b __sanitizer::Die' -ex run --args {} {args}",
            shell_words::quote(binary)
        ),
        timeout: None,
    }
}

/// Builds the final command for `binary` from the recorded arguments.
pub fn prepare_args(
    binary: &str,
    raw_args: &str,
    options: &ArgOptions,
    build_directory: &Path,
    testcase_path: &Path,
    timeout: Duration,
    editor: &mut dyn Editor,
) -> Result<PreparedCommand, ReproError> {
    let args = resolve_args(raw_args, options, build_directory, testcase_path);
    let mut command = if options.enable_debug {
        wrap_for_gdb(binary, &args)
    } else {
        PreparedCommand {
            program: binary.to_string(),
            args,
            timeout: Some(timeout),
        }
    };

    if options.edit_mode {
        let comment = format!("Edit arguments before running {}", command.program);
        command.args = editor.edit(&command.args, "edit-args-", &comment)?;
    }
    debug!(program = %command.program, args = %command.args, "Prepared command");
    Ok(command)
}

/// Points `--user-data-dir` at a freshly deleted `dir` when the job needs a
/// profile directory or the args already name one.
pub fn ensure_user_data_dir_if_needed(
    args: &str,
    require_user_data_dir: bool,
    dir: &Path,
) -> Result<String, ReproError> {
    if !require_user_data_dir && !args.contains(USER_DATA_DIR_ARG) {
        return Ok(args.to_string());
    }

    let stripped = USER_DATA_DIR_FLAG.replace_all(args, "");
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    Ok(append(
        &stripped,
        &format!("{USER_DATA_DIR_ARG}={}", dir.display()),
    ))
}

/// libFuzzer flags (`-key=value`), keyed without the leading dashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibfuzzerArgs(BTreeMap<String, String>);

impl LibfuzzerArgs {
    pub fn parse(args: &str) -> Result<Self, ReproError> {
        let mut parsed = BTreeMap::new();
        for token in args.split(' ').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                ReproError::InvalidTestcase(format!("libFuzzer argument {token:?} has no value"))
            })?;
            parsed.insert(key.trim_start_matches('-').to_string(), value.to_string());
        }
        Ok(Self(parsed))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Relocates `dict` next to the locally built fuzzer.
    pub fn fix_dict(&mut self, binary_directory: &Path) {
        if let Some(dict) = self.0.get_mut("dict") {
            let name = Path::new(dict.as_str())
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dict.clone());
            *dict = binary_directory.join(name).to_string_lossy().into_owned();
        }
    }

    /// Sorted `-key=value` tokens joined by spaces.
    pub fn serialize(&self) -> String {
        let mut tokens: Vec<String> = self.0.iter().map(|(k, v)| format!("-{k}={v}")).collect();
        tokens.sort();
        tokens.join(" ")
    }
}
