use crate::environment::Environment;
use crate::error::ReproError;
use std::io::{self, Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long to wait after each signal before checking whether the process
/// group is gone.
pub const DEFAULT_KILL_WAIT: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_SEQUENCE: [libc::c_int; 4] = [libc::SIGTERM, libc::SIGTERM, libc::SIGKILL, libc::SIGKILL];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Exited(i32),
    Signaled(i32),
    Timeout,
}

impl ExecutionStatus {
    fn from_exit_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExecutionStatus::Exited(code),
            (None, Some(signal)) => ExecutionStatus::Signaled(signal),
            (None, None) => ExecutionStatus::Exited(-1),
        }
    }
}

/// Outcome of one process run. Stdout and stderr are interleaved into
/// `output` in the order the process wrote them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub status: ExecutionStatus,
    pub output: String,
}

impl ProcessOutput {
    /// Exit code, or the negated signal number. `None` after a timeout.
    pub fn returncode(&self) -> Option<i32> {
        match self.status {
            ExecutionStatus::Exited(code) => Some(code),
            ExecutionStatus::Signaled(signal) => Some(-signal),
            ExecutionStatus::Timeout => None,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.status == ExecutionStatus::Timeout
    }

    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Exited(0)
    }
}

/// A command to run through the shell.
///
/// `args` is a pre-joined argument string and is interpreted by the shell, so
/// quoting inside it is honoured. The environment is layered on top of the
/// current process environment.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub program: String,
    pub args: String,
    pub cwd: Option<PathBuf>,
    pub env: Environment,
    pub timeout: Option<Duration>,
    pub stdin: Option<Vec<u8>>,
    pub fail_on_error: bool,
}

impl ExecRequest {
    pub fn new(program: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: args.into(),
            cwd: None,
            env: Environment::new(),
            timeout: None,
            stdin: None,
            fail_on_error: true,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn fail_on_error(mut self, fail: bool) -> Self {
        self.fail_on_error = fail;
        self
    }

    /// The full command as it is logged and reported in errors.
    pub fn command_line(&self) -> String {
        let program = shell_words::quote(&self.program);
        if self.args.trim().is_empty() {
            program.into_owned()
        } else {
            format!("{program} {}", self.args)
        }
    }
}

/// A process started by an [`Executor`] that has not been waited on yet.
pub trait RunningProcess: Send {
    fn pid(&self) -> u32;

    /// Waits for the process to exit. On timeout the whole process group is
    /// killed and the status is [`ExecutionStatus::Timeout`].
    fn wait(self: Box<Self>, timeout: Option<Duration>) -> Result<ProcessOutput, ReproError>;

    /// Kills the process group immediately and collects what it printed.
    fn terminate(self: Box<Self>) -> Result<ProcessOutput, ReproError>;
}

pub trait Executor {
    fn start(&mut self, request: &ExecRequest) -> Result<Box<dyn RunningProcess>, ReproError>;

    /// Runs `request` to completion.
    ///
    /// With `fail_on_error`, a non-zero exit becomes
    /// [`ReproError::CommandFailed`]. A timeout is never a failure here; the
    /// caller inspects [`ProcessOutput::timed_out`].
    fn execute(&mut self, request: &ExecRequest) -> Result<ProcessOutput, ReproError> {
        let process = self.start(request)?;
        let output = process.wait(request.timeout)?;
        if request.fail_on_error {
            if let Some(code) = output.returncode().filter(|code| *code != 0) {
                return Err(ReproError::command_failed(
                    request.command_line(),
                    code,
                    &output.output,
                ));
            }
        }
        Ok(output)
    }
}

/// Runs commands as `sh -c "exec <command> 2>&1"` in a fresh process group.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    kill_wait: Duration,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_WAIT)
    }
}

impl CommandExecutor {
    pub fn new(kill_wait: Duration) -> Self {
        Self { kill_wait }
    }
}

impl Executor for CommandExecutor {
    fn start(&mut self, request: &ExecRequest) -> Result<Box<dyn RunningProcess>, ReproError> {
        let command_line = request.command_line();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("exec {command_line} 2>&1"))
            .envs(&request.env)
            .stdout(Stdio::piped())
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .process_group(0);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }

        debug!(command = %command_line, cwd = ?request.cwd, "Running command");
        let mut child = cmd.spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not piped"))?;
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        });

        if let (Some(data), Some(mut stdin)) = (&request.stdin, child.stdin.take()) {
            match stdin.write_all(data) {
                Ok(()) => {}
                // The process may exit without reading its input.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Box::new(CommandProcess {
            child,
            command: command_line,
            reader: Some(reader),
            kill_wait: self.kill_wait,
        }))
    }
}

struct CommandProcess {
    child: Child,
    command: String,
    reader: Option<JoinHandle<Vec<u8>>>,
    kill_wait: Duration,
}

impl CommandProcess {
    fn run_and_wait_with_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<ExecutionStatus, ReproError> {
        let start_time = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(ExecutionStatus::from_exit_status(status));
            }
            if timeout.is_some_and(|limit| start_time.elapsed() > limit) {
                warn!(command = %self.command, "Command timed out, killing it");
                self.kill_group()?;
                return Ok(ExecutionStatus::Timeout);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// SIGTERM twice, then SIGKILL twice, to the whole group.
    fn kill_group(&mut self) -> Result<(), ReproError> {
        let pid = self.child.id();
        let pgid = pid as libc::pid_t;
        for signal in KILL_SEQUENCE {
            // SAFETY: killpg has no memory-safety preconditions.
            let rc = unsafe { libc::killpg(pgid, signal) };
            if rc != 0 && io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
                break;
            }
            thread::sleep(self.kill_wait);
            self.child.try_wait()?;
        }

        if self.child.try_wait()?.is_none() {
            return Err(ReproError::KillProcessFailed {
                command: self.command.clone(),
                pid,
            });
        }
        debug!(pid, "Process group killed");
        Ok(())
    }

    fn collect(&mut self, status: ExecutionStatus) -> ProcessOutput {
        let bytes = self
            .reader
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        ProcessOutput {
            status,
            output: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

impl RunningProcess for CommandProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn wait(mut self: Box<Self>, timeout: Option<Duration>) -> Result<ProcessOutput, ReproError> {
        let status = self.run_and_wait_with_timeout(timeout)?;
        let output = self.collect(status);
        debug!(command = %self.command, status = ?output.status, "Command finished");
        Ok(output)
    }

    fn terminate(mut self: Box<Self>) -> Result<ProcessOutput, ReproError> {
        let status = match self.child.try_wait()? {
            Some(status) => ExecutionStatus::from_exit_status(status),
            None => {
                self.kill_group()?;
                self.child
                    .try_wait()?
                    .map(ExecutionStatus::from_exit_status)
                    .unwrap_or(ExecutionStatus::Signaled(libc::SIGKILL))
            }
        };
        Ok(self.collect(status))
    }
}
