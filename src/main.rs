use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use compare_observer::baseline::read_text;
use compare_observer::config::LoggingConfig;
use compare_observer::copy::flattened_name;
use compare_observer::diff::align_text;
use compare_observer::{Config, Daemon, ExclusionMatcher, HealthCheck};

#[derive(Parser)]
#[command(name = "compare-observer")]
#[command(about = "Watch source trees, review changes against a baseline and fan them out")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch every configured system and accept operator commands (default)
    Watch,

    /// Side-by-side comparison of two files
    Diff {
        /// Old (left) file
        old: PathBuf,

        /// New (right) file
        new: PathBuf,

        /// Print the alignment as JSON
        #[arg(long)]
        json: bool,

        /// Column width for the text rendering
        #[arg(long, default_value_t = 60)]
        width: usize,
    },

    /// Show whether a path would be watched for a system
    Check {
        /// System name
        system: String,

        /// Path, absolute or relative to the system source
        path: PathBuf,
    },

    /// System health check and diagnostics
    Doctor,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Watch);

    // Commands that do not read the configuration
    match command {
        Commands::Init { force } => {
            init_logging(cli.verbose, &LoggingConfig::default())?;
            return cmd_init(cli.config, force);
        }
        Commands::Diff {
            old,
            new,
            json,
            width,
        } => {
            init_logging(cli.verbose, &LoggingConfig::default())?;
            return cmd_diff(&old, &new, json, width);
        }
        _ => {}
    }

    let config = load_config(cli.config).await?;
    init_logging(cli.verbose, &config.logging)?;
    info!("Starting compare-observer v{}", env!("CARGO_PKG_VERSION"));

    match command {
        Commands::Watch => cmd_watch(config).await,
        Commands::Check { system, path } => cmd_check(&config, &system, &path),
        Commands::Doctor => cmd_doctor(&config),
        Commands::Init { .. } | Commands::Diff { .. } => Ok(()),
    }
}

/// Initialize logging; RUST_LOG wins, then --verbose, then the configured level
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    // stdout carries command output
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(logging.color)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
async fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Write a default configuration file
fn cmd_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        println!("⚠️  Configuration already exists: {}", config_path.display());
        println!("   Use --force to overwrite it");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    Config::default().save(&config_path)?;

    info!("Configuration saved to: {:?}", config_path);
    println!("✅ Configuration written: {}", config_path.display());
    println!("   Next: add your systems, then run 'compare-observer doctor'");

    Ok(())
}

/// Compare two files side by side
fn cmd_diff(old: &Path, new: &Path, json: bool, width: usize) -> Result<()> {
    let old_text = read_text(old).with_context(|| format!("Failed to read {:?}", old))?;
    let new_text = read_text(new).with_context(|| format!("Failed to read {:?}", new))?;
    let diff = align_text(&old_text, &new_text);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&diff).context("Failed to serialize diff")?
        );
        return Ok(());
    }

    print!("{}", diff.render(width));
    let stats = diff.stats();
    println!(
        "{} unchanged, {} modified, {} added, {} removed",
        stats.unchanged, stats.modified, stats.added, stats.removed
    );

    Ok(())
}

/// Report exclusion and flattening for one path
fn cmd_check(config: &Config, system: &str, path: &Path) -> Result<()> {
    let Some(index) = config.system_index(system) else {
        bail!("Unknown system: {}", system);
    };
    let source = &config.systems[index].source_root;
    let matcher = ExclusionMatcher::new(
        config.rules.exclude_folders_for(index),
        config.rules.except_for(index),
    );

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        source.join(path)
    };

    if matcher.is_excluded_under(source, &absolute) {
        println!("❌ {} is excluded for {}", path.display(), system);
    } else {
        println!("✅ {} is watched for {}", path.display(), system);
    }

    if let Ok(relative) = absolute.strip_prefix(source) {
        let relative = relative.to_string_lossy().replace('\\', "/");
        let without = config.rules.without_for(index);
        if let Some(name) = flattened_name(&relative, &without) {
            println!("   Copied to the destination as: {}", name);
        }
    }

    Ok(())
}

/// System health check and diagnostics
fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config);
    print_health_report(&health);
    Ok(())
}

/// Run the interactive watch session
async fn cmd_watch(config: Config) -> Result<()> {
    // Preflight checks - ensure every system can be watched
    let health = HealthCheck::run(&config);

    if !health.all_passed() {
        print_health_report(&health);
        println!();
        bail!("Cannot start watching - fix the errors above first");
    }

    // Show warnings but continue
    let warnings = health.warnings();
    if !warnings.is_empty() {
        for warning in warnings {
            println!("⚠️  {}", warning.message);
            if let Some(details) = &warning.details {
                println!("   {}", details);
            }
        }
        println!();
    }

    let mut daemon = Daemon::new(config);
    daemon.run().await
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    use compare_observer::health::CheckResult;

    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 Compare Observer Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
