use crate::environment::Environment;
use crate::error::ReproError;
use crate::executor::{ExecRequest, Executor, RunningProcess};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const XVFB: &str = "Xvfb";
const WINDOW_MANAGER: &str = "blackbox";
const FIRST_DISPLAY: u32 = 99;
const LAST_DISPLAY: u32 = 1_000;
const SCREEN: &str = "1280x1024x24";
const SETTLE_TIME: Duration = Duration::from_secs(3);

/// A display the reproduced browser can draw on.
pub trait VirtualDisplay {
    /// Starts the display and returns its name (`:99`), or `None` when the
    /// user's own display should be used.
    fn start(&mut self) -> Result<Option<String>, ReproError>;

    fn stop(&mut self) -> Result<(), ReproError>;
}

/// Stops the display when dropped, whatever happens during the attempt.
pub struct DisplayGuard<'a> {
    display: &'a mut dyn VirtualDisplay,
    name: Option<String>,
}

impl<'a> DisplayGuard<'a> {
    pub fn start(display: &'a mut dyn VirtualDisplay) -> Result<Self, ReproError> {
        let name = display.start()?;
        Ok(Self { display, name })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Drop for DisplayGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.display.stop() {
            warn!(error = %e, "Failed to stop virtual display");
        }
    }
}

struct Session {
    xvfb: Box<dyn RunningProcess>,
    window_manager: Box<dyn RunningProcess>,
}

/// Xvfb with the blackbox window manager on the first free display number.
pub struct XvfbDisplay<E: Executor> {
    executor: E,
    disabled: bool,
    lock_dir: PathBuf,
    settle_time: Duration,
    session: Option<Session>,
}

impl<E: Executor> XvfbDisplay<E> {
    pub fn new(executor: E, disabled: bool) -> Self {
        Self {
            executor,
            disabled,
            lock_dir: PathBuf::from("/tmp"),
            settle_time: SETTLE_TIME,
            session: None,
        }
    }

    /// Like [`Self::new`], but checks that Xvfb and blackbox are installed
    /// unless the display is disabled.
    pub fn locate(executor: E, disabled: bool) -> Result<Self, ReproError> {
        if !disabled {
            for tool in [XVFB, WINDOW_MANAGER] {
                which::which(tool).map_err(|_| ReproError::NotInstalled(tool.into()))?;
            }
        }
        Ok(Self::new(executor, disabled))
    }

    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }
}

impl<E: Executor> VirtualDisplay for XvfbDisplay<E> {
    fn start(&mut self) -> Result<Option<String>, ReproError> {
        if self.disabled {
            return Ok(None);
        }
        self.stop()?;

        let number = free_display_number(&self.lock_dir)
            .ok_or_else(|| ReproError::Config("no free X display number".into()))?;
        let name = format!(":{number}");

        let xvfb = self.executor.start(
            &ExecRequest::new(XVFB, format!("{name} -screen 0 {SCREEN} -nolisten tcp"))
                .fail_on_error(false),
        )?;
        thread::sleep(self.settle_time);

        info!(display = %name, "Starting the blackbox window manager in a virtual display");
        let mut env = Environment::new();
        env.insert("DISPLAY".into(), name.clone());
        let window_manager = match self
            .executor
            .start(&ExecRequest::new(WINDOW_MANAGER, "").env(env).fail_on_error(false))
        {
            Ok(process) => process,
            Err(e) => {
                let _ = xvfb.terminate();
                return Err(e);
            }
        };
        thread::sleep(self.settle_time);

        self.session = Some(Session {
            xvfb,
            window_manager,
        });
        Ok(Some(name))
    }

    fn stop(&mut self) -> Result<(), ReproError> {
        if let Some(session) = self.session.take() {
            let wm = session.window_manager.terminate();
            session.xvfb.terminate()?;
            wm?;
        }
        Ok(())
    }
}

impl<E: Executor> Drop for XvfbDisplay<E> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// First display number from 99 without an X lock file in `lock_dir`.
pub fn free_display_number(lock_dir: &Path) -> Option<u32> {
    (FIRST_DISPLAY..LAST_DISPLAY).find(|n| !lock_dir.join(format!(".X{n}-lock")).exists())
}
