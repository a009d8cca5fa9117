//! Post-run symbolization of browser crashes.
//!
//! `asan_symbolize.py` from the source checkout drives symbolization. It is
//! pointed at a proxy which pins the flags llvm-symbolizer is called with,
//! since the script's own choices produce frames the stacktrace parser does
//! not recognise.

use crate::environment::Environment;
use crate::error::ReproError;
use crate::executor::{ExecRequest, Executor};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use tracing::{debug, info};

const FUNCTIONS_FLAG: &str = "--functions";
const INLINING_FLAG: &str = "--inlining";

/// Rewrites the arguments `asan_symbolize.py` passes to llvm-symbolizer.
pub fn proxy_args<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if arg.contains(FUNCTIONS_FLAG) {
                format!("{FUNCTIONS_FLAG}=linkage")
            } else if arg.contains(INLINING_FLAG) {
                format!("{INLINING_FLAG}=false")
            } else {
                arg.to_string()
            }
        })
        .collect()
}

/// Runs `symbolizer` with rewritten arguments on this process's stdio.
pub fn run_proxy<S: AsRef<str>>(symbolizer: &Path, args: &[S]) -> Result<ExitStatus, ReproError> {
    let args = proxy_args(args);
    debug!(symbolizer = %symbolizer.display(), ?args, "Proxying symbolizer call");
    Ok(Command::new(symbolizer).args(&args).status()?)
}

pub fn asan_symbolize_script(source_directory: &Path) -> PathBuf {
    source_directory
        .join("tools")
        .join("valgrind")
        .join("asan")
        .join("asan_symbolize.py")
}

/// Feeds crash output through the checkout's `asan_symbolize.py`.
#[derive(Debug, Clone)]
pub struct AsanSymbolizer {
    source_directory: PathBuf,
    proxy_path: PathBuf,
    cwd: PathBuf,
}

impl AsanSymbolizer {
    pub fn new(source_directory: impl Into<PathBuf>, proxy_path: impl Into<PathBuf>) -> Self {
        Self {
            source_directory: source_directory.into(),
            proxy_path: proxy_path.into(),
            cwd: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Empty output is returned as is; the script would wait forever for
    /// input otherwise.
    pub fn symbolize(&self, executor: &mut dyn Executor, output: &str) -> Result<String, ReproError> {
        if output.trim().is_empty() {
            return Ok(String::new());
        }

        let mut env = Environment::new();
        env.insert(
            "LLVM_SYMBOLIZER_PATH".into(),
            self.proxy_path.to_string_lossy().into_owned(),
        );
        env.insert(
            "CHROMIUM_SRC".into(),
            self.source_directory.to_string_lossy().into_owned(),
        );

        let script = asan_symbolize_script(&self.source_directory);
        let request = ExecRequest::new(script.to_string_lossy(), "")
            .cwd(&self.cwd)
            .env(env)
            .stdin(format!("{output}\0"));
        let symbolized = executor.execute(&request)?.output;
        info!("{symbolized}");
        Ok(symbolized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedExecutor, exited};

    #[test]
    fn proxy_pins_function_and_inlining_flags() {
        assert_eq!(
            proxy_args(&["--inlining=true", "arg1", "--functions=short"]),
            vec!["--inlining=false", "arg1", "--functions=linkage"]
        );
    }

    #[test]
    fn proxy_runs_symbolizer_with_rewritten_args() {
        let status = run_proxy(Path::new("true"), &["--functions=short"]).unwrap();
        assert!(status.success());
    }

    #[test]
    fn empty_output_skips_script() {
        let mut executor = ScriptedExecutor::with_outputs(Vec::new());
        let requests = executor.requests();
        let symbolizer = AsanSymbolizer::new("/chrome/src", "/res/asan_symbolize_proxy");
        assert_eq!(symbolizer.symbolize(&mut executor, " \n").unwrap(), "");
        assert!(requests.lock().unwrap().is_empty());
    }

    #[test]
    fn output_is_piped_through_script() {
        let mut executor = ScriptedExecutor::with_outputs(vec![exited(0, "#0 0x1 in main a.cc:3")]);
        let requests = executor.requests();
        let symbolizer = AsanSymbolizer::new("/chrome/src", "/res/asan_symbolize_proxy")
            .with_cwd("/home/user");

        let symbolized = symbolizer.symbolize(&mut executor, "#0 0x1").unwrap();
        assert_eq!(symbolized, "#0 0x1 in main a.cc:3");

        let requests = requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.program, "/chrome/src/tools/valgrind/asan/asan_symbolize.py");
        assert_eq!(request.stdin.as_deref(), Some(&b"#0 0x1\0"[..]));
        assert_eq!(request.env["LLVM_SYMBOLIZER_PATH"], "/res/asan_symbolize_proxy");
        assert_eq!(request.env["CHROMIUM_SRC"], "/chrome/src");
        assert_eq!(request.cwd.as_deref(), Some(Path::new("/home/user")));
    }
}
