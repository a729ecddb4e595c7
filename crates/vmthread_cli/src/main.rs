//! Command-line scenario runner for the vmthread runtime.

mod scenarios;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "vmthread")]
#[command(author, version, about = "Exercise the managed thread runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn a sleeping worker and join it
    Join {
        /// How long the worker sleeps, in milliseconds
        #[arg(long, default_value = "50")]
        sleep_ms: u64,
    },

    /// Race interrupts against interruptible-wait enter/leave
    InterruptStress {
        /// Number of interrupts to deliver
        #[arg(short, long, default_value = "1000")]
        iterations: usize,
    },

    /// Stop a sleeping worker with ThreadDeath
    Stop,

    /// Spawn non-daemon workers and wait for the last one
    Shutdown {
        /// Number of workers
        #[arg(short, long, default_value = "4")]
        workers: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("error: {}", err);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Join { sleep_ms } => scenarios::join(sleep_ms),
        Commands::InterruptStress { iterations } => scenarios::interrupt_stress(iterations),
        Commands::Stop => scenarios::stop(),
        Commands::Shutdown { workers } => scenarios::shutdown(workers),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
