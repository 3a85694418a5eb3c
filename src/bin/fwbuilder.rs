//! fwbuilder - SDK Build Automaton CLI
//!
//! Builds embedded-firmware SDKs inside containers.
//!
//! ## Usage
//!
//! ```sh
//! fwbuilder --target <platform> [--cores N] [--clean]
//! fwbuilder --target <platform> --build-package <pkg>...
//! fwbuilder --target <platform> --build-firmware
//! fwbuilder --target <platform> --container [--ephemeral]
//! fwbuilder --validate
//! fwbuilder --list-targets
//! ```
//!
//! ## Modes
//!
//! Automated mode (default) builds everything into a container image.
//! Development mode (`-d`) bind-mounts the SDK sources and staging tree
//! from the host and honors the developer override document.
//!
//! The same binary is staged into the build context and re-entered inside
//! containers (the `INSIDE_CONTAINER` environment variable selects the
//! container side).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use fwbuilder::constants::{DEFAULT_BUILD_CORES, DEFAULT_ENGINE};
use fwbuilder::orchestrator::run_container_hook;
use fwbuilder::{
    engine, inside_container, schema, BuildMode, BuildOrchestrator, BuildRequest, BuildScope,
    BuilderPaths, ContainerPaths, DeveloperConfig, Error, TargetSpec,
};

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug, Default)]
struct Args {
    target: Option<String>,
    dev: bool,
    packages: Option<Vec<String>>,
    firmware: bool,
    container: bool,
    ephemeral: bool,
    validate: bool,
    list_targets: bool,
    cores: u32,
    clean: bool,
    devconfig: Option<PathBuf>,
    stage_only: bool,
    quiet: bool,
    verbose: bool,
    run_hook: Option<String>,
    help: bool,
    version: bool,
}

fn parse_args() -> Result<Args, String> {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        cores: DEFAULT_BUILD_CORES,
        ..Args::default()
    };

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--target" | "-t" => {
                args.target = Some(take_value(&argv, &mut i, "--target")?);
            }
            "--devbuild-with-host-mounts" | "-d" => {
                args.dev = true;
                i += 1;
            }
            "--build-package" => {
                let mut packages = Vec::new();
                i += 1;
                while i < argv.len() && !argv[i].starts_with('-') {
                    packages.push(argv[i].clone());
                    i += 1;
                }
                if packages.is_empty() {
                    return Err("--build-package requires at least one package".to_string());
                }
                args.packages = Some(packages);
            }
            "--build-firmware" => {
                args.firmware = true;
                i += 1;
            }
            "--container" => {
                args.container = true;
                i += 1;
            }
            "--ephemeral" => {
                args.ephemeral = true;
                i += 1;
            }
            "--validate" => {
                args.validate = true;
                i += 1;
            }
            "--list-targets" => {
                args.list_targets = true;
                i += 1;
            }
            "--cores" => {
                let value = take_value(&argv, &mut i, "--cores")?;
                args.cores = value
                    .parse()
                    .map_err(|_| format!("--cores expects a number, got '{value}'"))?;
            }
            "--clean" => {
                args.clean = true;
                i += 1;
            }
            "--devconfig" => {
                args.devconfig = Some(PathBuf::from(take_value(&argv, &mut i, "--devconfig")?));
            }
            "--stage" => {
                args.stage_only = true;
                i += 1;
            }
            "--quiet" | "-q" => {
                args.quiet = true;
                i += 1;
            }
            "--verbose" | "-v" => {
                args.verbose = true;
                i += 1;
            }
            "--run-hook" => {
                args.run_hook = Some(take_value(&argv, &mut i, "--run-hook")?);
            }
            "--help" | "-h" => {
                args.help = true;
                i += 1;
            }
            "--version" => {
                args.version = true;
                i += 1;
            }
            unknown => return Err(format!("unknown argument: {unknown}")),
        }
    }

    if args.verbose && args.quiet {
        return Err("nonsensical argument combination of '--verbose' and '--quiet'".to_string());
    }
    if args.packages.is_some() && args.firmware {
        return Err("'--build-package' and '--build-firmware' are mutually exclusive".to_string());
    }
    Ok(args)
}

fn take_value(argv: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    if *i + 1 >= argv.len() {
        return Err(format!("{flag} requires a value"));
    }
    let value = argv[*i + 1].clone();
    *i += 2;
    Ok(value)
}

fn print_help() {
    println!(
        r#"fwbuilder - SDK build automaton

USAGE:
    fwbuilder --target <platform> [options]

OPTIONS:
    -t, --target <platform>       Target platform to build for
    -d, --devbuild-with-host-mounts
                                  Development build with host-mounted sources
        --build-package <pkg>...  Build only the named packages (needs a prior full build)
        --build-firmware          Build only the firmware (needs a prior full build)
        --container               Create and attach to an interactive container
        --ephemeral               Remove the interactive container on exit
        --validate                Validate all config documents against their schemas
        --list-targets            List currently supported targets
        --cores <n>               Processor cores to use for the build (default: 1)
        --clean                   Start clean (no image cache)
        --devconfig <path>        Developer config to use instead of developer.json
        --stage                   Populate the staging directory and do nothing else
    -q, --quiet                   Silence diagnostic messages
    -v, --verbose                 Print diagnostic messages when silenced by default
    -h, --help                    Show this help

EXAMPLES:
    fwbuilder --target rpi4b --cores 8
    fwbuilder --target rpi4b --build-package ubus uci
    fwbuilder --target rpi4b -d --container --ephemeral
"#
    );
}

// =============================================================================
// Logging
// =============================================================================

/// Logs go to stdout (gated by verbosity) and, on the host, into the build
/// log that ends up in the artifact bundle.
fn init_logging(verbose: bool, log_file: Option<std::fs::File>) {
    use tracing_subscriber::filter::{EnvFilter, LevelFilter};
    use tracing_subscriber::prelude::*;

    let stdout_level = if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let stdout_layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(false)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(stdout_level.into())
                .from_env_lossy(),
        );

    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Arc::new(file))
            .with_filter(LevelFilter::INFO)
    });

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

// =============================================================================
// Command Implementations
// =============================================================================

fn cmd_list_targets(paths: &BuilderPaths) -> Result<(), Error> {
    let targets = paths.known_targets()?;
    if targets.is_empty() {
        println!("No support for any targets");
    } else {
        println!("Supported targets:");
        for target in targets {
            println!("\t ** {target}");
        }
    }
    Ok(())
}

fn cmd_validate(paths: &BuilderPaths, devconfig: Option<&PathBuf>) -> Result<bool, Error> {
    let devconfig = devconfig
        .cloned()
        .or_else(|| Some(paths.developer_config()).filter(|p| p.is_file()));
    let report = schema::validate_tree(paths, devconfig.as_deref())?;
    for (document, violations) in &report.documents {
        if violations.is_empty() {
            println!(" # {document} : valid.");
        } else {
            println!(" # {document} : INVALID");
            for violation in violations {
                println!("     - {violation}");
            }
        }
    }
    Ok(report.ok())
}

/// Recreates the scratch directories a build writes into.
fn clean_up_paths(paths: &[PathBuf]) -> std::io::Result<()> {
    for path in paths {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Exit code mirroring a failure's own status where it carries one.
fn exit_code_for(error: &Error) -> ExitCode {
    let code = match error {
        Error::StepFailed { code, .. }
        | Error::ImageBuildFailed { code, .. }
        | Error::ContainerExited { code, .. } => *code,
        _ => 1,
    };
    if (1..=255).contains(&code) {
        ExitCode::from(code as u8)
    } else {
        ExitCode::FAILURE
    }
}

// =============================================================================
// Main
// =============================================================================

async fn run(args: Args, verbose: bool) -> Result<ExitCode, Error> {
    let on_host = !inside_container();
    let root = if on_host {
        std::env::current_dir()?
    } else {
        ContainerPaths::base()
    };
    let paths = BuilderPaths::new(root);

    if args.list_targets {
        cmd_list_targets(&paths)?;
        return Ok(ExitCode::SUCCESS);
    }
    if args.validate {
        let ok = cmd_validate(&paths, args.devconfig.as_ref())?;
        return Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }
    if let Some(hook) = &args.run_hook {
        run_container_hook(hook, &ContainerPaths::base()).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(target) = args.target.clone() else {
        return Err(Error::InvalidCli(
            "mandatory argument not specified: '-t|--target'".to_string(),
        ));
    };
    let target = target.to_lowercase();

    if on_host {
        let known = paths.known_targets()?;
        if !known.iter().any(|t| t == &target) {
            return Err(Error::UnknownTarget { target, known });
        }
    }

    let mode = if args.dev {
        BuildMode::Development
    } else {
        BuildMode::Automated
    };
    let scope = if let Some(packages) = args.packages.clone() {
        BuildScope::Packages(packages)
    } else if args.firmware {
        BuildScope::Firmware
    } else {
        BuildScope::Full
    };

    let spec_path = if on_host {
        paths.target_spec(&target)
    } else {
        ContainerPaths::base().join(format!("{target}_spec.json"))
    };
    let spec = TargetSpec::load(&spec_path)?;

    // The developer override document is only consulted in development
    // mode; supplying one anywhere else is a configuration error.
    let devconfig_path = args
        .devconfig
        .clone()
        .or_else(|| Some(paths.developer_config()).filter(|p| p.is_file()));
    let developer = match devconfig_path {
        Some(path) if mode == BuildMode::Development => Some(DeveloperConfig::load(&path)?),
        Some(path) => return Err(Error::DeveloperConfigNotAllowed { path }),
        None => None,
    };

    let request = BuildRequest {
        target,
        mode,
        scope,
        num_build_cores: args.cores,
        verbose,
        clean: args.clean,
    };

    let engine = engine::engine_for(DEFAULT_ENGINE)?;
    let mut build = BuildOrchestrator::new(paths.clone(), request, spec, developer, engine)?;

    if args.stage_only {
        build.stage()?;
        return Ok(ExitCode::SUCCESS);
    }
    if args.container {
        let code = build.interactive_session(args.ephemeral).await?;
        return Ok(if code == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    build.run().await?;
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            print_help();
            return ExitCode::FAILURE;
        }
    };
    if args.help {
        print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        println!("fwbuilder version {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    // Excessive verbosity is inconvenient by default: builds log unless
    // silenced, auxiliary actions stay quiet unless asked.
    let build_action =
        !(args.stage_only || args.container || args.list_targets || args.validate);
    let verbose = !args.quiet && (build_action || args.verbose);

    let on_host = !inside_container();
    let log_file = if on_host && build_action {
        let paths = BuilderPaths::new(std::env::current_dir().unwrap_or_else(|_| ".".into()));
        let scratch = vec![paths.tmp_dir(), paths.out_dir()];
        if let Err(e) = clean_up_paths(&scratch) {
            eprintln!("error: could not prepare {scratch:?}: {e}");
            return ExitCode::FAILURE;
        }
        std::fs::File::create(paths.build_log()).ok()
    } else {
        None
    };
    init_logging(verbose, log_file);

    match run(args, verbose).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            exit_code_for(&e)
        }
    }
}
