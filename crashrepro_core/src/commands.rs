//! Top-level commands behind the CLI subcommands.

use crate::args::ArgOptions;
use crate::binary::PrebuiltBinary;
use crate::config::ReproConfig;
use crate::display::XvfbDisplay;
use crate::editor::ExternalEditor;
use crate::environment::EnvironmentNormalizer;
use crate::executor::CommandExecutor;
use crate::gestures::XdotoolGesturePlayer;
use crate::jobs::{self, BuildMode, ReproducerKind};
use crate::reproducer::{Reproducer, ReproducerOptions};
use crate::resources::ResourceLocator;
use crate::scheduler::FixedBackoff;
use crate::service::{AuthHeaderStore, ServiceClient};
use crate::store::TestcaseStore;
use crate::testcase::Testcase;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Inputs of `reproduce` that are not part of the configuration file.
#[derive(Debug, Clone)]
pub struct ReproduceRequest {
    pub testcase_id: u64,
    pub build: BuildMode,
    pub build_dir: PathBuf,
    pub binary: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    /// Use a saved testcase record instead of asking the service.
    pub testcase_json: Option<PathBuf>,
    /// Use a local testcase file instead of downloading it.
    pub testcase_file: Option<PathBuf>,
}

/// Fetches the testcase, prepares it locally and runs the reproduction loop.
pub fn reproduce(config: &ReproConfig, request: &ReproduceRequest) -> Result<bool> {
    let settings = &config.reproduce;
    let client = ServiceClient::new(
        &config.service.base_url,
        AuthHeaderStore::new(&config.service.auth_header_file),
    )?;

    let testcase = match &request.testcase_json {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read testcase record {}", path.display()))?;
            Testcase::from_json(&json)?
        }
        None => client.testcase_info(&request.testcase_id.to_string())?,
    };
    warn_if_unreliable(&testcase);

    let definition = jobs::lookup(&testcase.job_type, request.build)?;
    let sanitizer = definition.sanitizer()?;
    let source_dir = resolve_source_directory(request.source_dir.clone(), definition.source_var, |var| {
        std::env::var(var).ok()
    });
    let binary = match &request.binary {
        Some(path) => PrebuiltBinary::with_binary(path, &request.build_dir, source_dir)?,
        None => {
            let name = match definition.binary_name {
                Some(name) => name.to_string(),
                None => testcase.binary_name()?,
            };
            PrebuiltBinary::new(&request.build_dir, &name, source_dir)?
        }
    };

    let store = TestcaseStore::new(&config.paths.testcases_dir)?;
    let dir = store.prepare_dir(testcase.id)?;
    let downloaded = match &request.testcase_file {
        Some(path) => stage_local_file(path, &dir)?,
        None => client.download_testcase(testcase.id, &dir)?,
    };
    let kill_wait = settings.kill_wait();
    let testcase_path =
        store.install(&testcase, &downloaded, &mut CommandExecutor::new(kill_wait))?;
    info!(path = %testcase_path.display(), "Testcase ready");

    let resources = ResourceLocator::new(&config.paths.resources_dir);
    let normalizer = EnvironmentNormalizer::from_resources(&resources)?;
    let symbolize_proxy = if definition.reproducer == ReproducerKind::LinuxChrome {
        match resources.symbolize_proxy() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Symbolizer proxy unavailable, output stays unsymbolized");
                None
            }
        }
    } else {
        None
    };

    let options = ReproducerOptions {
        args: ArgOptions {
            target_args: settings.target_args.clone(),
            disable_xvfb: settings.disable_xvfb,
            enable_debug: settings.enable_debug,
            edit_mode: settings.edit_mode,
        },
        timeout: settings.timeout(),
        user_data_dir: config.paths.user_data_dir.clone(),
        normalizer,
        symbolize_proxy,
    };

    let mut reproducer = Reproducer::new(
        definition,
        &binary,
        &testcase,
        testcase_path,
        sanitizer,
        options,
        Box::new(client),
    )?
    .with_executor(CommandExecutor::new(kill_wait))
    .with_scheduler(FixedBackoff::new(settings.retry_delay()));

    if settings.edit_mode {
        reproducer = reproducer.with_editor(ExternalEditor::from_env()?);
    }
    if definition.reproducer == ReproducerKind::LinuxChrome {
        reproducer = reproducer.with_display(XvfbDisplay::locate(
            CommandExecutor::new(kill_wait),
            settings.disable_xvfb,
        )?);
        if testcase.uses_gestures() {
            reproducer = reproducer
                .with_gesture_player(XdotoolGesturePlayer::locate(CommandExecutor::new(kill_wait))?);
        }
    }

    Ok(reproducer.reproduce(settings.iterations)?)
}

fn warn_if_unreliable(testcase: &Testcase) {
    if !testcase.reproducible {
        warn!(
            "The original testcase is not a reliable reproducer. It might take many \
             iterations to reproduce, or it might not reproduce at all."
        );
    }
    if testcase.uses_gestures() {
        warn!(
            "The testcase uses gestures, which often makes it flaky. Consider raising \
             the number of iterations with `-i`."
        );
    }
}

/// An explicit directory wins over the definition's environment variable.
pub fn resolve_source_directory(
    explicit: Option<PathBuf>,
    source_var: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    explicit.or_else(|| {
        lookup(source_var)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    })
}

/// Copies a user-supplied testcase into the testcase directory.
fn stage_local_file(path: &Path, dir: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .with_context(|| format!("Testcase path {} has no file name", path.display()))?;
    let staged = dir.join(name);
    fs::copy(path, &staged)
        .with_context(|| format!("Failed to copy testcase {}", path.display()))?;
    Ok(staged)
}

/// The job registry as pretty-printed JSON.
pub fn supported_job_types() -> Result<String> {
    Ok(serde_json::to_string_pretty(&jobs::supported_job_types())?)
}
