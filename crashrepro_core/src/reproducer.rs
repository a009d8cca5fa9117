//! The reproduction loop.
//!
//! A [`Reproducer`] is built once per testcase. Construction parses the
//! historical stacktrace into the original [`CrashSignature`]. `reproduce`
//! then runs the variant's pre-build steps once and drives up to N attempts of
//! run, parse and compare, stopping at the first attempt the oracle accepts.
//!
//! Variants differ only in `pre_build_steps` and `reproduce_crash`:
//! - `Base` runs the binary directly.
//! - `Libfuzzer` normalises libFuzzer flags first.
//! - `LinuxChrome` runs inside a virtual display with a fresh profile,
//!   replays gestures and symbolizes the output afterwards.

use crate::args::{
    ArgOptions, LibfuzzerArgs, PreparedCommand, USER_DATA_DIR_ARG, ensure_user_data_dir_if_needed,
    prepare_args,
};
use crate::binary::BinaryProvider;
use crate::display::{DisplayGuard, VirtualDisplay, XvfbDisplay};
use crate::editor::{Editor, PassThroughEditor};
use crate::environment::{DEFAULT_DISPLAY, Environment, EnvironmentNormalizer};
use crate::error::ReproError;
use crate::executor::{CommandExecutor, ExecRequest, ExecutionStatus, Executor, ProcessOutput};
use crate::feedback::SignatureLog;
use crate::gestures::{GesturePlayer, GestureScript, XdotoolGesturePlayer};
use crate::jobs::{JobDefinition, ReproducerKind};
use crate::observer::{AttemptObserver, AttemptRecord, FreshUserDataDirObserver};
use crate::oracle::{Oracle, SimilarityOracle};
use crate::sanitizer::Sanitizer;
use crate::scheduler::{FixedBackoff, RetryScheduler};
use crate::signature::CrashSignature;
use crate::stacktrace::{StacktraceParser, prepare_original_stacktrace};
use crate::symbolizer::AsanSymbolizer;
use crate::testcase::{Testcase, relocate_layout_test};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Crash type recorded for attempts that hit the timeout.
pub const TIMEOUT_CRASH_TYPE: &str = "Timeout";
/// Crash type recorded for attempts whose command failed outright.
pub const FAILED_CRASH_TYPE: &str = "Command failed";

/// Everything about a run that does not come from the testcase record.
#[derive(Debug, Clone)]
pub struct ReproducerOptions {
    pub args: ArgOptions,
    pub timeout: Duration,
    pub user_data_dir: PathBuf,
    pub normalizer: EnvironmentNormalizer,
    /// Proxy handed to `asan_symbolize.py` as its llvm-symbolizer.
    pub symbolize_proxy: Option<PathBuf>,
}

/// Environment and command line fixed by the pre-build steps.
#[derive(Debug, Clone)]
struct PreparedRun {
    environment: Environment,
    command: PreparedCommand,
    testcase_path: PathBuf,
}

pub struct Reproducer {
    definition: JobDefinition,
    job_type: String,
    original_testcase_path: String,
    testcase_path: PathBuf,
    binary_path: PathBuf,
    build_directory: PathBuf,
    source_directory: Option<PathBuf>,
    sanitizer: Sanitizer,
    options: ReproducerOptions,
    base_environment: Environment,
    raw_args: String,
    gestures: Option<GestureScript>,
    original_signature: CrashSignature,
    prepared: Option<PreparedRun>,

    executor: Box<dyn Executor>,
    parser: Box<dyn StacktraceParser>,
    editor: Box<dyn Editor>,
    display: Box<dyn VirtualDisplay>,
    gesture_player: Box<dyn GesturePlayer>,
    scheduler: Box<dyn RetryScheduler>,
    oracle: Box<dyn Oracle>,
    observers: Vec<Box<dyn AttemptObserver>>,
}

impl Reproducer {
    /// Parses the reported stacktrace through `parser` to obtain the
    /// signature every attempt is compared against.
    pub fn new(
        definition: &JobDefinition,
        binary: &dyn BinaryProvider,
        testcase: &Testcase,
        testcase_path: impl Into<PathBuf>,
        sanitizer: Sanitizer,
        options: ReproducerOptions,
        parser: Box<dyn StacktraceParser>,
    ) -> Result<Self, ReproError> {
        let gestures = match &testcase.gestures {
            Some(raw) if !raw.is_empty() => Some(GestureScript::parse(raw)?),
            _ => None,
        };

        let original_stacktrace = prepare_original_stacktrace(&testcase.stacktrace_lines);
        let original_signature = parser.parse(&testcase.job_type, &original_stacktrace)?;
        if original_signature.is_vacuous() {
            warn!("The reported crash has no crash state, any crash will be accepted");
        }

        let disable_xvfb = options.args.disable_xvfb;
        Ok(Self {
            definition: definition.clone(),
            job_type: testcase.job_type.clone(),
            original_testcase_path: testcase.absolute_path.clone(),
            testcase_path: testcase_path.into(),
            binary_path: binary.binary_path().to_path_buf(),
            build_directory: binary.build_directory().to_path_buf(),
            source_directory: binary.source_directory().map(Path::to_path_buf),
            sanitizer,
            options,
            base_environment: testcase.environment.clone(),
            raw_args: testcase.reproduction_args.clone(),
            gestures,
            original_signature,
            prepared: None,
            executor: Box::new(CommandExecutor::default()),
            parser,
            editor: Box::new(PassThroughEditor),
            display: Box::new(XvfbDisplay::new(CommandExecutor::default(), disable_xvfb)),
            gesture_player: Box::new(XdotoolGesturePlayer::new(CommandExecutor::default())),
            scheduler: Box::new(FixedBackoff::default()),
            oracle: Box::new(SimilarityOracle::new()),
            observers: Vec::new(),
        })
    }

    pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Box::new(executor);
        self
    }

    pub fn with_editor(mut self, editor: impl Editor + 'static) -> Self {
        self.editor = Box::new(editor);
        self
    }

    pub fn with_display(mut self, display: impl VirtualDisplay + 'static) -> Self {
        self.display = Box::new(display);
        self
    }

    pub fn with_gesture_player(mut self, player: impl GesturePlayer + 'static) -> Self {
        self.gesture_player = Box::new(player);
        self
    }

    pub fn with_scheduler(mut self, scheduler: impl RetryScheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    pub fn with_oracle(mut self, oracle: impl Oracle + 'static) -> Self {
        self.oracle = Box::new(oracle);
        self
    }

    pub fn with_observer(mut self, observer: impl AttemptObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn original_signature(&self) -> &CrashSignature {
        &self.original_signature
    }

    /// The command fixed by [`Self::pre_build_steps`], once they have run.
    pub fn prepared_command(&self) -> Option<&PreparedCommand> {
        self.prepared.as_ref().map(|run| &run.command)
    }

    pub fn prepared_environment(&self) -> Option<&Environment> {
        self.prepared.as_ref().map(|run| &run.environment)
    }

    pub fn prepared_testcase_path(&self) -> Option<&Path> {
        self.prepared.as_ref().map(|run| run.testcase_path.as_path())
    }

    /// Fixes the environment and command line. Runs at most once.
    pub fn pre_build_steps(&mut self) -> Result<(), ReproError> {
        if self.prepared.is_some() {
            return Ok(());
        }

        let mut args = self.raw_args.clone();
        let mut base = self.base_environment.clone();
        let mut testcase_path = self.testcase_path.clone();

        match self.definition.reproducer {
            ReproducerKind::Base => {}
            ReproducerKind::Libfuzzer => {
                let mut parsed = LibfuzzerArgs::parse(&args)?;
                parsed.fix_dict(self.binary_path.parent().unwrap_or(Path::new(".")));
                args = parsed.serialize();
            }
            ReproducerKind::LinuxChrome => {
                args = ensure_user_data_dir_if_needed(
                    &args,
                    self.definition.require_user_data_dir,
                    &self.options.user_data_dir,
                )?;
                if args.contains(USER_DATA_DIR_ARG) {
                    self.observers.push(Box::new(FreshUserDataDirObserver::new(
                        &self.options.user_data_dir,
                    )));
                }
                match &self.source_directory {
                    Some(source) => {
                        testcase_path = relocate_layout_test(
                            &testcase_path,
                            &self.original_testcase_path,
                            source,
                        )?;
                    }
                    None => warn!("No source checkout given, layout tests stay in place"),
                }
                base.remove("ASAN_SYMBOLIZER_PATH");
            }
        }

        let environment = self.options.normalizer.normalize(&base, self.sanitizer)?;
        let command = prepare_args(
            &self.binary_path.to_string_lossy(),
            &args,
            &self.options.args,
            &self.build_directory,
            &testcase_path,
            self.options.timeout,
            self.editor.as_mut(),
        )?;
        debug!(?environment, "Prepared environment");

        self.prepared = Some(PreparedRun {
            environment,
            command,
            testcase_path,
        });
        Ok(())
    }

    /// Runs the pre-build steps, then attempts the crash up to
    /// `max_iterations` times.
    ///
    /// Returns `Ok(true)` on the first matching attempt, and
    /// [`ReproError::Unreproducible`] once the budget is spent. In debug mode
    /// the binary runs once under gdb and the result is not checked.
    pub fn reproduce(&mut self, max_iterations: u32) -> Result<bool, ReproError> {
        info!("Reproducing...");
        self.pre_build_steps()?;

        if self.options.args.enable_debug {
            self.reproduce_crash()?;
            return Ok(true);
        }
        self.reproduce_normal(max_iterations)
    }

    fn reproduce_normal(&mut self, max_iterations: u32) -> Result<bool, ReproError> {
        let mut log = SignatureLog::new();

        for attempt in 1..=max_iterations {
            for observer in self.observers.iter_mut() {
                observer.pre_attempt(attempt)?;
            }

            let (output, signature, verdict) = match self.reproduce_crash() {
                Ok(output) if output.timed_out() => {
                    warn!(attempt, "Attempt timed out");
                    let signature = unparsed(TIMEOUT_CRASH_TYPE, &output.output);
                    (output, signature, None)
                }
                Ok(output) => {
                    let signature = self
                        .parser
                        .parse(&self.job_type, &output.output)?
                        .with_output(&output.output);
                    let verdict = self.oracle.examine(&signature, &self.original_signature);
                    (output, signature, Some(verdict))
                }
                Err(ReproError::CommandFailed {
                    command,
                    returncode,
                    stderr,
                }) => {
                    warn!(attempt, %command, returncode, "Attempt failed");
                    let signature = unparsed(FAILED_CRASH_TYPE, &stderr);
                    let output = ProcessOutput {
                        status: ExecutionStatus::Exited(returncode),
                        output: stderr,
                    };
                    (output, signature, None)
                }
                Err(e) => return Err(e),
            };

            log_comparison(&signature, &self.original_signature);
            let record = AttemptRecord {
                attempt,
                output: &output,
                signature: &signature,
                verdict,
            };
            log.post_attempt(&record)?;
            for observer in self.observers.iter_mut() {
                if let Err(e) = observer.post_attempt(&record) {
                    warn!(observer = observer.name(), error = %e, "Observer failed after attempt");
                }
            }

            if record.matched() {
                info!("The stacktrace seems similar to the original stacktrace.");
                return Ok(true);
            }
            info!(
                attempt,
                "The stacktrace doesn't match the original stacktrace. Press Ctrl+C to stop trying to reproduce."
            );
            if attempt < max_iterations {
                self.scheduler.before_retry(attempt + 1);
            }
        }

        Err(log.into_unreproducible(max_iterations))
    }

    /// Runs the binary once with the prepared command.
    pub fn reproduce_crash(&mut self) -> Result<ProcessOutput, ReproError> {
        self.pre_build_steps()?;
        let run = self
            .prepared
            .as_ref()
            .ok_or_else(|| ReproError::Config("pre-build steps did not run".into()))?;
        let request = ExecRequest::new(run.command.program.as_str(), run.command.args.as_str())
            .cwd(&self.build_directory)
            .env(run.environment.clone())
            .timeout(run.command.timeout)
            .fail_on_error(false);

        match self.definition.reproducer {
            ReproducerKind::Base | ReproducerKind::Libfuzzer => self.executor.execute(&request),
            ReproducerKind::LinuxChrome => self.reproduce_in_display(request),
        }
    }

    fn reproduce_in_display(&mut self, mut request: ExecRequest) -> Result<ProcessOutput, ReproError> {
        let guard = DisplayGuard::start(self.display.as_mut())?;
        let display = match guard.name() {
            Some(name) => {
                request.env.insert("DISPLAY".into(), name.to_string());
                name.to_string()
            }
            None => request
                .env
                .get("DISPLAY")
                .cloned()
                .unwrap_or_else(|| DEFAULT_DISPLAY.to_string()),
        };

        let process = self.executor.start(&request)?;
        if let Some(script) = &self.gestures {
            if let Err(e) = self.gesture_player.play(script, process.pid(), &display) {
                if let Err(kill) = process.terminate() {
                    warn!(%kill, "Failed to stop the binary after the gesture error");
                }
                return Err(e);
            }
        }
        let output = process.wait(request.timeout)?;
        drop(guard);

        if output.timed_out() {
            return Ok(output);
        }
        match (&self.source_directory, &self.options.symbolize_proxy) {
            (Some(source), Some(proxy)) => {
                let symbolized = AsanSymbolizer::new(source, proxy)
                    .symbolize(self.executor.as_mut(), &output.output)?;
                Ok(ProcessOutput {
                    status: output.status,
                    output: symbolized,
                })
            }
            _ => {
                debug!("Skipping symbolization, no source checkout or proxy");
                Ok(output)
            }
        }
    }
}

fn unparsed(crash_type: &str, output: &str) -> CrashSignature {
    CrashSignature::new(crash_type, Vec::<String>::new()).with_output(output)
}

fn log_comparison(new: &CrashSignature, original: &CrashSignature) {
    info!(
        "New crash type: {}\nNew crash state:\n  {}\n\nOriginal crash type: {}\nOriginal crash state:\n  {}\n",
        new.crash_type(),
        new.crash_state_lines().join("\n  "),
        original.crash_type(),
        original.crash_state_lines().join("\n  "),
    );
}
