//! `srcpack`: build programs from source on the host or inside a container.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use srcpack::container::ContainerBuild;
use srcpack::core::recipe::render_recipe;
use srcpack::core::session::{MAX_JOBS, SessionOptions};
use srcpack::core::version::Version;
use srcpack::exit_codes;
use srcpack::host::run_host_build;
use srcpack::io::config::{DEFAULT_CONFIG_FILE, SrcpackConfig, load_config};
use srcpack::io::engine::CliEngine;
use srcpack::io::execute::ExecContext;
use srcpack::io::os_release::{OS_RELEASE_PATH, base_image_from};
use srcpack::io::registry::ProgramRegistry;
use srcpack::io::runner::SystemRunner;
use srcpack::io::tags::GitRemote;
use srcpack::logging;
use srcpack::session::{list_releases, open_session};

#[derive(Parser)]
#[command(
    name = "srcpack",
    version,
    about = "Build programs from source and package them"
)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory of program definitions (overrides the config file).
    #[arg(long, global = true)]
    programs_dir: Option<PathBuf>,

    /// Debug logging and full error reports.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known programs.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// List every release version of a program, newest last.
    Versions {
        program: String,
    },
    /// Build a program on the host or in a container.
    Build(BuildArgs),
}

#[derive(Args)]
struct BuildArgs {
    program: String,

    /// Version to build (default: newest release).
    #[arg(long = "version", value_name = "VERSION")]
    release: Option<Version>,

    /// Parallel jobs (default: three quarters of the CPUs).
    #[arg(short = 'j', long, value_parser = parse_jobs)]
    jobs: Option<usize>,

    /// Base image (default: derived from /etc/os-release).
    #[arg(long)]
    base_image: Option<String>,

    /// Install prefix.
    #[arg(long)]
    prefix: Option<PathBuf>,

    /// Package name override.
    #[arg(long)]
    package_name: Option<String>,

    /// Package version override.
    #[arg(long)]
    package_version: Option<String>,

    /// Work root for host builds.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Print the container recipe and stop.
    #[arg(long)]
    dry_run: bool,

    /// Build the container image instead of building on the host.
    #[arg(long)]
    container: bool,

    /// Extract the package to this path.
    #[arg(long, requires = "container")]
    output: Option<PathBuf>,

    /// Install into the prefix after a host build.
    #[arg(long, conflicts_with_all = ["container", "dry_run"])]
    install: bool,
}

fn parse_jobs(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(jobs) if jobs > MAX_JOBS => Err(format!("must be at most {MAX_JOBS}")),
        Ok(jobs) => Ok(jobs),
        Err(err) => Err(err.to_string()),
    }
}

fn main() {
    let cli = Cli::parse();
    let debug = cli.debug;
    logging::init(debug);
    if let Err(err) = run(cli) {
        if debug {
            eprintln!("error: {err:?}");
        } else {
            eprintln!("error: {err:#}");
        }
        std::process::exit(exit_codes::for_error(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let programs_dir = cli
        .programs_dir
        .clone()
        .unwrap_or_else(|| config.programs_dir.clone());
    let registry = ProgramRegistry::discover(&programs_dir)?;
    match cli.command {
        Command::List { json } => cmd_list(&registry, json),
        Command::Versions { program } => cmd_versions(&registry, &config, &program),
        Command::Build(args) => cmd_build(&registry, &config, args),
    }
}

#[derive(Serialize)]
struct ProgramSummary<'a> {
    name: &'a str,
    build_system: &'a str,
    source_repository: &'a str,
}

fn cmd_list(registry: &ProgramRegistry, json: bool) -> Result<()> {
    if json {
        let summaries: Vec<_> = registry
            .programs()
            .map(|program| ProgramSummary {
                name: &program.name,
                build_system: program.build_system.as_str(),
                source_repository: &program.source_repository,
            })
            .collect();
        let payload = serde_json::to_string_pretty(&summaries).context("serialize json")?;
        println!("{payload}");
        return Ok(());
    }
    for program in registry.programs() {
        println!("{}\t{}", program.name, program.build_system);
    }
    Ok(())
}

fn cmd_versions(registry: &ProgramRegistry, config: &SrcpackConfig, name: &str) -> Result<()> {
    let program = registry.get(name)?;
    let tags = GitRemote::new(Duration::from_secs(config.remote_timeout_secs));
    for release in list_releases(program, &tags)? {
        println!("{}\t{}", release.version, release.tag);
    }
    Ok(())
}

fn cmd_build(registry: &ProgramRegistry, config: &SrcpackConfig, args: BuildArgs) -> Result<()> {
    let program = registry.get(&args.program)?;
    let base_image = match args.base_image {
        Some(image) => image,
        None => base_image_from(Path::new(OS_RELEASE_PATH))
            .context("detect base image (pass --base-image to override)")?,
    };
    let options = SessionOptions {
        jobs: args.jobs,
        base_image,
        install_prefix: args
            .prefix
            .unwrap_or_else(|| config.install_prefix.clone()),
        package_name: args.package_name,
        package_version: args.package_version,
    };
    let tags = GitRemote::new(Duration::from_secs(config.remote_timeout_secs));
    let mut session = open_session(program, &tags, args.release.as_ref(), options)?;

    if args.dry_run {
        print!("{}", render_recipe(program, &session, &config.locale)?);
        return Ok(());
    }

    if args.container {
        let engine = CliEngine::new(config.container_engine.clone());
        let build = ContainerBuild::new(&engine, &config.locale);
        match args.output {
            Some(output) => {
                let artifact = build.extract_artifact(program, &mut session, &output)?;
                println!("{}", artifact.display());
            }
            None => {
                build.build_image(program, &mut session)?;
                println!("{}", session.image_tag());
            }
        }
        return Ok(());
    }

    let root = args.work_dir.unwrap_or_else(|| config.work_dir.clone());
    let runner = SystemRunner;
    let ctx = ExecContext::new(&runner);
    let build_dir = run_host_build(program, &session, &root, args.install, &ctx)
        .with_context(|| format!("host build of {}", program.name))?;
    println!("{}", build_dir.display());
    Ok(())
}
