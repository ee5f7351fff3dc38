//! oxide-guard CLI
//!
//! Command-line tool for checking and compiling schema migrations.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_guard::config::DEFAULT_CONFIG_FILE;
use oxide_guard::prelude::*;
use oxide_guard::source;

/// Safety compiler for database schema migrations.
#[derive(Parser)]
#[command(name = "oxide-guard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "OXIDE_GUARD_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory compiled output is written to (overrides the config).
    #[arg(short, long, env = "OXIDE_GUARD_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Lockfile path (overrides the config).
    #[arg(short, long, env = "OXIDE_GUARD_LOCKFILE")]
    lockfile: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile migration sources, reusing unchanged output.
    Compile {
        /// Source files or directories.
        #[arg(default_value = "migrations")]
        paths: Vec<PathBuf>,

        /// Target database the compile is qualified by.
        #[arg(short, long, env = "OXIDE_GUARD_DATABASE")]
        database: Option<String>,
    },

    /// Validate migration sources without writing anything.
    Check {
        /// Source files or directories.
        #[arg(default_value = "migrations")]
        paths: Vec<PathBuf>,
    },

    /// Show which sources are up to date, stale, or tampered.
    Status {
        /// Source files or directories.
        #[arg(default_value = "migrations")]
        paths: Vec<PathBuf>,

        /// Target database the compile is qualified by.
        #[arg(short, long, env = "OXIDE_GUARD_DATABASE")]
        database: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = GuardConfig::load(&cli.config)?;
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(lockfile) = cli.lockfile {
        config.lockfile = lockfile;
    }
    let registry = config.registry()?;
    let mut lockfile = Lockfile::open(&config.lockfile);
    let compiler = Compiler::new(config, registry, PostgresRenderer::new());

    match cli.command {
        Commands::Compile { paths, database } => {
            let files = source::discover(&paths)?;
            let report = compiler.compile(&files, database.as_deref(), &lockfile)?;

            for file in report.files() {
                match file {
                    Ok(result) => println!(
                        " {:<10} {} -> {}",
                        result.outcome.to_string(),
                        result.file_name,
                        result.output_path.display()
                    ),
                    Err(failure) => {
                        println!(" {:<10} {}", "FAILED", failure.file);
                        println!("{}", failure.error);
                    }
                }
            }

            let written = compiler.commit(&report, &mut lockfile)?;
            info!("Wrote {} compiled file(s).", written);

            let failed = report.failures().count();
            if failed > 0 {
                anyhow::bail!("{} of {} migration(s) failed", failed, report.files().len());
            }
        }

        Commands::Check { paths } => {
            let files = source::discover(&paths)?;
            let mut failed = 0;
            for path in &files {
                match compiler.check(path) {
                    Ok(()) => println!(" ok         {}", path.display()),
                    Err(error) => {
                        failed += 1;
                        println!(" FAILED     {}", path.display());
                        println!("{}", error);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} migration(s) are unsafe", failed, files.len());
            }
            info!("All {} migration(s) passed.", files.len());
        }

        Commands::Status { paths, database } => {
            let files = source::discover(&paths)?;
            let entries = compiler.status(&files, database.as_deref(), &lockfile)?;

            if entries.is_empty() {
                info!("No migration sources found.");
            } else {
                println!("\nMigration status:");
                println!("{:-<60}", "");
                for entry in &entries {
                    let marker = match entry.status {
                        FileStatus::UpToDate => "[X]",
                        FileStatus::Tampered { .. } => "[!]",
                        _ => "[ ]",
                    };
                    println!(" {} {} ({})", marker, entry.key, entry.status);
                }
                println!();
            }
        }
    }

    Ok(())
}
