//! framepipe CLI tools: frame queue soak testing.

#![forbid(unsafe_code)]

mod soak;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "framepipe")]
#[command(about = "framepipe CLI tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push frames through a frame queue from a producer thread to a ticking consumer
    Soak(soak::SoakArgs),

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    framepipe_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Soak(soak_args) => {
            let report = soak::run(&soak_args)?;
            if soak_args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.log();
            }
            if report.out_of_order > 0 {
                anyhow::bail!("{} frames arrived out of order", report.out_of_order);
            }
        }
        Command::Version => {
            println!("framepipe {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
