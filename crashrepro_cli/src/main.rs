use crashrepro_core::commands::{self, ReproduceRequest};
use crashrepro_core::config::ReproConfig;
use crashrepro_core::error::ReproError;
use crashrepro_core::jobs::BuildMode;
use crashrepro_core::logging::init_tracing;
use crashrepro_core::resources::ResourceLocator;
use crashrepro_core::symbolizer::run_proxy;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser, global = true)]
    config_file: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[clap(short, long, global = true)]
    verbose: bool,
    #[clap(long, global = true)]
    json_logs: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reproduce a crash testcase against a local build.
    Reproduce(ReproduceArgs),
    /// Print the supported job types as JSON.
    SupportedJobTypes,
    /// Stand in for llvm-symbolizer when called by asan_symbolize.py.
    SymbolizeProxy {
        #[clap(long)]
        symbolizer: Option<PathBuf>,
        #[clap(last = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
struct ReproduceArgs {
    testcase_id: u64,
    #[clap(long)]
    build_dir: PathBuf,
    #[clap(short, long, default_value = "chromium")]
    build: BuildMode,
    #[clap(long)]
    binary: Option<PathBuf>,
    #[clap(long)]
    source_dir: Option<PathBuf>,
    #[clap(long)]
    testcase_json: Option<PathBuf>,
    #[clap(long)]
    testcase_file: Option<PathBuf>,
    #[clap(short, long)]
    iterations: Option<u32>,
    #[clap(long)]
    disable_xvfb: bool,
    #[clap(long, allow_hyphen_values = true)]
    target_args: Option<String>,
    #[clap(long)]
    edit_mode: bool,
    #[clap(long)]
    enable_debug: bool,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ReproConfig> {
    let config = match path {
        Some(config_path) => {
            info!(path = ?config_path, "Loading configuration from specified path");
            ReproConfig::load_from_file(&config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                info!(path = ?default_config_path, "No config file specified, loading default");
                ReproConfig::load_from_file(&default_config_path)?
            } else {
                debug!("No config file found, using built-in defaults");
                ReproConfig::default()
            }
        }
    };
    Ok(config)
}

fn apply_overrides(config: &mut ReproConfig, args: &ReproduceArgs) {
    let settings = &mut config.reproduce;
    if let Some(iterations) = args.iterations {
        settings.iterations = iterations;
    }
    if let Some(target_args) = &args.target_args {
        settings.target_args = target_args.clone();
    }
    settings.disable_xvfb |= args.disable_xvfb;
    settings.edit_mode |= args.edit_mode;
    settings.enable_debug |= args.enable_debug;
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config_file)?;

    match cli.command {
        Command::Reproduce(args) => {
            apply_overrides(&mut config, &args);
            config.validate()?;
            debug!("Effective configuration: {config:#?}");

            let request = ReproduceRequest {
                testcase_id: args.testcase_id,
                build: args.build,
                build_dir: args.build_dir,
                binary: args.binary,
                source_dir: args.source_dir,
                testcase_json: args.testcase_json,
                testcase_file: args.testcase_file,
            };
            commands::reproduce(&config, &request)?;
        }
        Command::SupportedJobTypes => {
            println!("{}", commands::supported_job_types()?);
        }
        Command::SymbolizeProxy { symbolizer, args } => {
            let symbolizer = match symbolizer {
                Some(path) => path,
                None => ResourceLocator::new(&config.paths.resources_dir).symbolizer()?,
            };
            // asan_symbolize.py only reads our stdout; the status is not reported.
            let status = run_proxy(&symbolizer, &args)?;
            debug!(?status, "Symbolizer finished");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let typed = err.downcast_ref::<ReproError>();
            if let Some(extras) = typed.and_then(ReproError::extras) {
                debug!(%extras, "Error details");
            }
            error!("{err:#}");
            let code = typed.map_or(1, ReproError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reproduce_args(argv: &[&str]) -> ReproduceArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Command::Reproduce(args) => args,
            other => panic!("Expected reproduce, got {other:?}"),
        }
    }

    #[test]
    fn flags_override_config_values() {
        let args = reproduce_args(&[
            "crashrepro",
            "reproduce",
            "1234",
            "--build-dir",
            "/out",
            "-i",
            "3",
            "--disable-xvfb",
            "--target-args=--enable-logging",
        ]);
        assert_eq!(args.build, BuildMode::Chromium);

        let mut config = ReproConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.reproduce.iterations, 3);
        assert!(config.reproduce.disable_xvfb);
        assert_eq!(config.reproduce.target_args, "--enable-logging");
        assert!(!config.reproduce.enable_debug);
    }

    #[test]
    fn build_mode_is_validated() {
        let args = reproduce_args(&["crashrepro", "reproduce", "1", "--build-dir", "/o", "-b", "download"]);
        assert_eq!(args.build, BuildMode::Download);
        assert!(
            Cli::try_parse_from(["crashrepro", "reproduce", "1", "--build-dir", "/o", "-b", "ninja"])
                .is_err()
        );
    }

    #[test]
    fn proxy_collects_trailing_arguments() {
        let cli = Cli::try_parse_from([
            "crashrepro",
            "symbolize-proxy",
            "--",
            "--inlining=true",
            "--functions=short",
        ])
        .unwrap();
        match cli.command {
            Command::SymbolizeProxy { symbolizer, args } => {
                assert!(symbolizer.is_none());
                assert_eq!(args, vec!["--inlining=true", "--functions=short"]);
            }
            other => panic!("Expected symbolize-proxy, got {other:?}"),
        }
    }
}
