//! nestql-migrate CLI
//!
//! Prints the DDL for a directory of JSON schema definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nestql_core::TableOptions;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use nestql_migrate::{load_file, plan_create, plan_diff, to_script, SchemaSet};

/// Declarative schema files and DDL planning for nestql.
#[derive(Parser)]
#[command(name = "nestql-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the statements creating every table in a definition directory.
    Create {
        /// Definition directory.
        #[arg(short, long, env = "NESTQL_SCHEMA_DIR", default_value = "schemas")]
        dir: PathBuf,

        /// Storage engine.
        #[arg(long, default_value = "InnoDB")]
        engine: String,

        /// Default character set.
        #[arg(long, default_value = "utf8")]
        charset: String,

        /// Default collation.
        #[arg(long, default_value = "utf8_general_ci")]
        collation: String,
    },

    /// Print the statements turning one definition of a table into another.
    Diff {
        /// Current definition file.
        from: PathBuf,

        /// Target definition file.
        to: PathBuf,
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
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Create {
            dir,
            engine,
            charset,
            collation,
        } => {
            let set = SchemaSet::load_dir(&dir)?;
            if set.is_empty() {
                info!(dir = %dir.display(), "No schema definitions found");
                return Ok(());
            }
            info!(tables = set.len(), "Loaded schema definitions");

            let options = TableOptions {
                engine,
                charset,
                collation,
            };
            print!("{}", to_script(&plan_create(&set, &options)));
        }

        Commands::Diff { from, to } => {
            let current = load_file(&from)?;
            let target = load_file(&to)?;
            let statements = plan_diff(&current, &target)?;
            if statements.is_empty() {
                info!(table = %target.table, "No changes");
            } else {
                print!("{}", to_script(&statements));
            }
        }
    }

    Ok(())
}
