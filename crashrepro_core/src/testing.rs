//! Scripted collaborators shared by unit tests.

use crate::error::ReproError;
use crate::executor::{ExecRequest, ExecutionStatus, Executor, ProcessOutput, RunningProcess};
use crate::signature::CrashSignature;
use crate::stacktrace::StacktraceParser;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn exited(code: i32, output: &str) -> ProcessOutput {
    ProcessOutput {
        status: ExecutionStatus::Exited(code),
        output: output.to_string(),
    }
}

type Responder = Box<dyn FnMut(&ExecRequest) -> Result<ProcessOutput, ReproError> + Send>;

/// Answers every request through a closure and records what was asked.
pub struct ScriptedExecutor {
    requests: Arc<Mutex<Vec<ExecRequest>>>,
    responder: Responder,
}

impl ScriptedExecutor {
    pub fn new(
        responder: impl FnMut(&ExecRequest) -> Result<ProcessOutput, ReproError> + Send + 'static,
    ) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            responder: Box::new(responder),
        }
    }

    /// Replays `outputs` in order; later requests get an empty exit 0.
    pub fn with_outputs(outputs: Vec<ProcessOutput>) -> Self {
        let mut queue = VecDeque::from(outputs);
        Self::new(move |_| Ok(queue.pop_front().unwrap_or_else(|| exited(0, ""))))
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<ExecRequest>>> {
        Arc::clone(&self.requests)
    }
}

impl Executor for ScriptedExecutor {
    fn start(&mut self, request: &ExecRequest) -> Result<Box<dyn RunningProcess>, ReproError> {
        self.requests.lock().unwrap().push(request.clone());
        let output = (self.responder)(request)?;
        Ok(Box::new(FinishedProcess { output }))
    }
}

struct FinishedProcess {
    output: ProcessOutput,
}

impl RunningProcess for FinishedProcess {
    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn wait(self: Box<Self>, _timeout: Option<Duration>) -> Result<ProcessOutput, ReproError> {
        Ok(self.output)
    }

    fn terminate(self: Box<Self>) -> Result<ProcessOutput, ReproError> {
        Ok(self.output)
    }
}

/// Maps output text to signatures through a closure and counts calls.
pub struct ScriptedParser {
    calls: Arc<Mutex<Vec<String>>>,
    parse: Box<dyn Fn(&str) -> CrashSignature + Send + Sync>,
}

impl ScriptedParser {
    pub fn new(parse: impl Fn(&str) -> CrashSignature + Send + Sync + 'static) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            parse: Box::new(parse),
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

impl StacktraceParser for ScriptedParser {
    fn parse(&self, _job_type: &str, stacktrace: &str) -> Result<CrashSignature, ReproError> {
        self.calls.lock().unwrap().push(stacktrace.to_string());
        Ok((self.parse)(stacktrace))
    }
}
