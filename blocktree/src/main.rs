#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use blocktree::config::StoreConfig;
use blocktree::storage::{InsertOutcome, RemoveOutcome, Store};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "blocktree",
    version,
    about = "Inspect and edit a blocktree key store"
)]
struct Cli {
    /// Store file; overrides BLOCKTREE_PATH.
    #[arg(long, global = true, value_name = "FILE")]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert keys
    #[command(allow_negative_numbers = true)]
    Insert {
        #[arg(required = true)]
        keys: Vec<i64>,
    },
    /// Remove keys
    #[command(allow_negative_numbers = true)]
    Remove {
        #[arg(required = true)]
        keys: Vec<i64>,
    },
    /// Look up a key and print the blocks visited
    #[command(allow_negative_numbers = true)]
    Search { key: i64 },
    /// Print every key in ascending order
    Keys,
    /// Print the tree level by level
    Dump,
    /// Check tree and allocation invariants
    Verify,
    /// Print size and shape statistics
    Stats,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blocktree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let mut config = StoreConfig::from_env()?;
    if let Some(path) = cli.path {
        config.path = path;
    }

    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut store = Store::open(&config.path, config.options())?;
    let mut code = ExitCode::SUCCESS;

    match cli.command {
        Command::Insert { keys } => {
            for key in keys {
                match store.insert(key)? {
                    InsertOutcome::Inserted => println!("{key}: inserted"),
                    InsertOutcome::Duplicate => println!("{key}: duplicate"),
                }
            }
        }
        Command::Remove { keys } => {
            for key in keys {
                match store.remove(key)? {
                    RemoveOutcome::Removed => println!("{key}: removed"),
                    RemoveOutcome::NotFound => println!("{key}: not found"),
                }
            }
        }
        Command::Search { key } => {
            let result = store.search(key)?;
            let path: Vec<String> = result.path.iter().map(ToString::to_string).collect();
            let verdict = if result.found { "found" } else { "not found" };
            println!("{key}: {verdict} (path: {})", path.join(" -> "));
        }
        Command::Keys => {
            for key in store.keys()? {
                println!("{key}");
            }
        }
        Command::Dump => print!("{}", store.render_levels()?),
        Command::Verify => {
            let violations = store.verify()?;
            if violations.is_empty() {
                println!("ok");
            } else {
                for violation in &violations {
                    println!("{violation}");
                }
                code = ExitCode::FAILURE;
            }
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("height:           {}", stats.height);
            println!("keys:             {}", stats.key_count);
            println!("nodes:            {}", stats.node_count);
            println!("total blocks:     {}", stats.total_blocks);
            println!("allocated blocks: {}", stats.allocated_blocks);
        }
    }

    store.close()?;
    Ok(code)
}
