use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use hopper::colors;
use hopper::command::SystemRunner;
use hopper::installer::{BatchReport, InstallOptions, Installer, Outcome, UninstallOptions};
use hopper::quarantine::{self, AttributeStore, Quarantine, XattrCommand};
use hopper::resolver::{EdgeKind, Policy, ResolvedEdge};
use hopper::{Catalog, Config};
use indicatif::MultiProgress;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hop")]
#[command(author, version, about = "Resolve, fetch, verify and install dependents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Catalog file to load dependents from
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
}

#[derive(clap::Args, Clone, Copy)]
struct PolicyArgs {
    /// Include build-time dependencies
    #[arg(long)]
    include_build: bool,

    /// Include test dependencies
    #[arg(long)]
    include_test: bool,

    /// Include optional dependencies
    #[arg(long)]
    include_optional: bool,

    /// Skip recommended dependencies
    #[arg(long)]
    skip_recommended: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install dependents and their dependencies
    Install {
        /// Dependent names
        #[arg(required = true)]
        names: Vec<String>,

        /// Reinstall and refetch even if already present
        #[arg(short, long)]
        force: bool,

        /// Show what would be installed without doing it
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Do not link executables into the prefix
        #[arg(long)]
        no_binaries: bool,

        /// Concurrent downloads per level
        #[arg(short, long)]
        jobs: Option<usize>,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Remove installed dependents
    Uninstall {
        /// Dependent names
        #[arg(required = true)]
        names: Vec<String>,

        /// Proceed even when not installed
        #[arg(short, long)]
        force: bool,

        /// List the paths that would be removed
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Leave executable links in place
        #[arg(long)]
        no_binaries: bool,
    },

    /// Download and verify sources without installing
    Fetch {
        /// Dependent names
        #[arg(required = true)]
        names: Vec<String>,

        /// Discard cached downloads first
        #[arg(short, long)]
        force: bool,
    },

    /// Show the expanded dependencies of a dependent
    Deps {
        /// Dependent name
        name: String,

        /// Edge kind to expand (dependency or requirement)
        #[arg(long, default_value = "dependency")]
        kind: String,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Read or change the quarantine attribute of a file
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },

    /// Manage the download cache
    Cache {
        /// Remove every cached download
        #[arg(long)]
        clean: bool,
    },

    /// Show the effective configuration
    Config,

    /// Generate shell completion scripts
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum QuarantineAction {
    /// Print the decoded attribute
    Get { path: PathBuf },
    /// Mark a file as downloaded by hopper
    Set {
        path: PathBuf,
        /// Downloading agent to record
        #[arg(long, default_value = quarantine::AGENT_NAME)]
        agent: String,
    },
    /// Remove the attribute
    Remove { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
    colors::init_colors();

    let mut config = Config::from_env();
    if let Some(catalog) = &cli.catalog {
        config.catalog = catalog.clone();
    }

    let runner = Arc::new(SystemRunner::new(config.command_timeout));
    let attributes: Arc<dyn AttributeStore> = Arc::new(XattrCommand::new(runner.clone()));

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let ok = match command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            true
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "hop", &mut std::io::stdout());
            true
        }
        Commands::Quarantine { action } => {
            quarantine_command(Quarantine::new(attributes), action).await?;
            true
        }
        Commands::Cache { clean } => {
            let cache = hopper::cache::CacheStore::new(config.cache_root.clone());
            if clean {
                let swept = cache.sweep_incomplete()?;
                let removed = cache.clear_all()?;
                println!(
                    "{} Removed {} cached downloads ({} incomplete)",
                    colors::ok(),
                    removed,
                    swept
                );
            } else {
                println!("{}", config.cache_root.display());
                println!("{:.1} MB", cache.size() as f64 / 1_048_576.0);
            }
            true
        }
        command => {
            let catalog = Catalog::load(&config.catalog)
                .with_context(|| format!("loading catalog {}", config.catalog.display()))?;
            let installer = Installer::new(config, catalog, runner, attributes)
                .with_progress(MultiProgress::new());
            run(&installer, command, cli.verbose).await?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(installer: &Installer, command: Commands, verbose: bool) -> anyhow::Result<bool> {
    match command {
        Commands::Install {
            names,
            force,
            dry_run,
            no_binaries,
            jobs,
            policy,
        } => {
            let options = InstallOptions {
                binaries: !no_binaries,
                force,
                verbose,
                dry_run,
                include_build: policy.include_build,
                include_test: policy.include_test,
                include_optional: policy.include_optional,
                skip_recommended: policy.skip_recommended,
                jobs,
            };
            let report = installer.install(&names, &options).await?;
            Ok(print_report(&report, verbose))
        }
        Commands::Uninstall {
            names,
            force,
            dry_run,
            no_binaries,
        } => {
            let options = UninstallOptions {
                binaries: !no_binaries,
                force,
                verbose,
                dry_run,
            };
            let report = installer.uninstall(&names, &options)?;
            Ok(print_report(&report, verbose))
        }
        Commands::Fetch { names, force } => {
            let report = installer.fetch(&names, force, verbose).await?;
            Ok(print_report(&report, verbose))
        }
        Commands::Deps { name, kind, policy } => {
            let kind: EdgeKind = kind.parse()?;
            let policy = Policy::from_flags(
                policy.include_build,
                policy.include_test,
                policy.include_optional,
                policy.skip_recommended,
            );
            for edge in installer.deps(&name, kind, &policy)? {
                match edge {
                    ResolvedEdge::Dependency(dep) if dep.deferred => {
                        println!("{} {}", dep.name, "(deferred)".dimmed())
                    }
                    ResolvedEdge::Dependency(dep) if dep.tags.is_empty() => println!("{}", dep.name),
                    ResolvedEdge::Dependency(dep) => {
                        println!("{} {}", dep.name, format!("[{}]", dep.tags).dimmed())
                    }
                    ResolvedEdge::Requirement(req) => {
                        println!("{} {}", req.requirement, format!("({})", req.owner).dimmed())
                    }
                }
            }
            Ok(true)
        }
        _ => Ok(true),
    }
}

async fn quarantine_command(quarantine: Quarantine, action: QuarantineAction) -> anyhow::Result<()> {
    match action {
        QuarantineAction::Get { path } => match quarantine.get(&path).await? {
            Some(attr) => {
                println!("kind:      {:#06x}", attr.kind);
                println!("timestamp: {}", attr.timestamp.to_rfc3339());
                println!("agent:     {}", attr.agent_name);
                if !attr.event_identifier.is_empty() {
                    println!("event:     {}", attr.event_identifier);
                }
            }
            None => println!("{} {} is not quarantined", colors::skip(), path.display()),
        },
        QuarantineAction::Set { path, agent } => {
            quarantine
                .set(
                    &path,
                    quarantine::QUARANTINED_FILE,
                    chrono::Utc::now(),
                    Some(&agent),
                    None,
                )
                .await?;
            println!("{} Quarantined {}", colors::ok(), path.display());
        }
        QuarantineAction::Remove { path } => {
            quarantine.remove(&path).await?;
            println!("{} Removed quarantine from {}", colors::ok(), path.display());
        }
    }
    Ok(())
}

/// Print one line per entry; returns false when anything failed.
fn print_report(report: &BatchReport, verbose: bool) -> bool {
    for entry in &report.entries {
        let marker = match &entry.outcome {
            Outcome::Failed(_) => colors::fail(),
            Outcome::Skipped { .. } | Outcome::Deferred { .. } => colors::warn(),
            Outcome::AlreadyInstalled { .. } => colors::skip(),
            _ => colors::ok(),
        };
        println!("{} {}: {}", marker, entry.name.bold(), entry.outcome);

        match &entry.outcome {
            Outcome::Failed(err) => {
                if let Some(output) = err.process_output() {
                    for line in output.lines() {
                        eprintln!("    {}", line.dimmed());
                    }
                }
            }
            Outcome::WouldUninstall(plan) => {
                for path in plan.paths() {
                    println!("    {}", path.display());
                }
            }
            Outcome::Uninstalled(plan) if verbose => {
                for path in plan.paths() {
                    println!("    {}", path.display());
                }
            }
            _ => {}
        }
    }

    let failures = report.failures().count();
    if failures > 0 {
        eprintln!(
            "{} {} of {} failed",
            colors::fail(),
            failures,
            report.entries.len()
        );
    }
    failures == 0
}
