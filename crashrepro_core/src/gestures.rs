use crate::environment::Environment;
use crate::error::ReproError;
use crate::executor::{ExecRequest, Executor};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::thread;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_GESTURE_DELAY: Duration = Duration::from_secs(5);
/// Time given to the browser to open all its windows.
pub const WINDOW_WAIT: Duration = Duration::from_secs(30);

const TRIGGER_PREFIX: &str = "Trigger:";
const XDOTOOL: &str = "xdotool";

/// One `<type>,<payload>` entry, e.g. `key,ctrl+w`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gesture {
    pub kind: String,
    pub payload: String,
}

impl Gesture {
    pub fn parse(raw: &str) -> Result<Self, ReproError> {
        let (kind, payload) = raw
            .split_once(',')
            .ok_or_else(|| ReproError::InvalidGesture(raw.to_string()))?;
        Ok(Self {
            kind: kind.to_string(),
            payload: payload.to_string(),
        })
    }

    /// xdotool arguments replaying this gesture against `window`.
    pub fn xdotool_args(&self, window: &str) -> String {
        if self.kind == "windowsize" {
            format!("{} {window} {}", self.kind, self.payload)
        } else {
            format!("{} -- {}", self.kind, self.payload)
        }
    }
}

/// Gestures plus the delay before the first one is played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureScript {
    pub start_delay: Duration,
    pub gestures: Vec<Gesture>,
}

impl GestureScript {
    /// `Trigger:<seconds>` entries set the delay (the last one wins) and are
    /// not replayed.
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, ReproError> {
        let mut start_delay = DEFAULT_GESTURE_DELAY;
        let mut gestures = Vec::new();
        for entry in raw.iter().map(AsRef::as_ref) {
            if let Some(seconds) = entry.strip_prefix(TRIGGER_PREFIX) {
                let seconds: u64 = seconds
                    .trim()
                    .parse()
                    .map_err(|_| ReproError::InvalidGesture(entry.to_string()))?;
                start_delay = Duration::from_secs(seconds);
            } else {
                gestures.push(Gesture::parse(entry)?);
            }
        }
        Ok(Self {
            start_delay,
            gestures,
        })
    }
}

/// Replays gestures on the windows of a running process.
pub trait GesturePlayer {
    fn play(&mut self, script: &GestureScript, pid: u32, display: &str) -> Result<(), ReproError>;
}

/// Drives windows with `xdotool` on the given display.
pub struct XdotoolGesturePlayer<E: Executor> {
    executor: E,
    window_wait: Duration,
}

impl<E: Executor> XdotoolGesturePlayer<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            window_wait: WINDOW_WAIT,
        }
    }

    /// Like [`Self::new`], but fails early when xdotool is missing.
    pub fn locate(executor: E) -> Result<Self, ReproError> {
        which::which(XDOTOOL).map_err(|_| ReproError::NotInstalled(XDOTOOL.into()))?;
        Ok(Self::new(executor))
    }

    pub fn with_window_wait(mut self, wait: Duration) -> Self {
        self.window_wait = wait;
        self
    }

    fn xdotool(&mut self, args: &str, display: &str, fail: bool) -> Result<String, ReproError> {
        let mut env = Environment::new();
        env.insert("DISPLAY".into(), display.into());
        let request = ExecRequest::new(XDOTOOL, args).env(env).fail_on_error(fail);
        Ok(self.executor.execute(&request)?.output)
    }

    fn find_windows(&mut self, pid: u32, display: &str) -> Result<BTreeSet<String>, ReproError> {
        let pids = process_tree(pid);
        if pids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let display_name = display;
        info!(?pids, display = display_name, wait_secs = self.window_wait.as_secs(), "Waiting for windows to appear");
        thread::sleep(self.window_wait);

        let mut windows = BTreeSet::new();
        for pid in pids {
            let found = self.xdotool(
                &format!("search --all --pid {pid} --onlyvisible --name \".*\""),
                display,
                false,
            )?;
            windows.extend(
                found
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit()))
                    .map(str::to_string),
            );
        }
        info!(?windows, "Found windows");
        Ok(windows)
    }
}

impl<E: Executor> GesturePlayer for XdotoolGesturePlayer<E> {
    fn play(&mut self, script: &GestureScript, pid: u32, display: &str) -> Result<(), ReproError> {
        thread::sleep(script.start_delay);
        info!(count = script.gestures.len(), "Running gestures");
        for window in self.find_windows(pid, display)? {
            info!(%window, "Running gestures on window");
            self.xdotool(&format!("windowactivate --sync {window}"), display, true)?;
            for gesture in &script.gestures {
                self.xdotool(&gesture.xdotool_args(&window), display, true)?;
            }
        }
        Ok(())
    }
}

/// `pid` followed by all of its live descendants, read from `/proc`.
/// Empty if `pid` has already exited.
pub fn process_tree(pid: u32) -> Vec<u32> {
    if fs::metadata(format!("/proc/{pid}")).is_err() {
        return Vec::new();
    }

    let mut children: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    if let Ok(entries) = fs::read_dir("/proc") {
        for entry in entries.flatten() {
            let Some(child) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            if let Some(parent) = parent_pid(child) {
                children.entry(parent).or_default().push(child);
            }
        }
    }

    let mut tree = Vec::new();
    let mut queue = VecDeque::from([pid]);
    while let Some(current) = queue.pop_front() {
        tree.push(current);
        if let Some(kids) = children.get(&current) {
            queue.extend(kids.iter().copied());
        }
    }
    tree
}

fn parent_pid(pid: u32) -> Option<u32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The command name may contain spaces and parentheses; fields resume
    // after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}
