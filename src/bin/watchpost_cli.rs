//! CLI binary for inspecting and verifying Watchpost check configuration.
//!
//! Against an empty, freshly-constructed application this mostly
//! demonstrates the surface; real deployments embed this crate and
//! register their own checks before handing control to the CLI.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use watchpost::app::Watchpost;
use watchpost::cache::{Cache, InMemoryStorage};
use watchpost::cli::{list_checks, verify, Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let app = Watchpost::new("linux", Cache::new(Arc::new(InMemoryStorage::new())), "default");

    match cli.command {
        Command::ListChecks { environment } => {
            println!("{}", list_checks(&app, environment.as_deref()));
            ExitCode::SUCCESS
        }
        Command::Verify { environment } => match verify(&app, environment.as_deref()) {
            Ok(()) => {
                println!("all checks verified");
                ExitCode::SUCCESS
            }
            Err(offenders) => {
                for offender in offenders {
                    eprintln!("invalid scheduling configuration: {offender}");
                }
                ExitCode::FAILURE
            }
        },
    }
}
