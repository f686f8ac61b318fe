//! CLI surface: `list-checks` and `verify`, reimplemented without a TUI
//! table crate — plain formatted output, since none of the other ambient
//! dependencies pull one in.

use clap::{Parser, Subcommand};

use crate::app::Watchpost;
use crate::scheduling::SchedulingDecision;

#[derive(Parser, Debug)]
#[command(name = "watchpost-cli", about = "Inspect and verify Watchpost check configuration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every registered check, its target environments and the
    /// resolved scheduling decision and hostname per environment.
    ListChecks {
        #[arg(long)]
        environment: Option<String>,
    },
    /// Run scheduling verification for every registered check and exit
    /// non-zero if any check resolves to an impossible combination.
    Verify {
        #[arg(long)]
        environment: Option<String>,
    },
}

/// Runs `list-checks`, returning the rendered table as a string.
pub fn list_checks(app: &Watchpost, environment_filter: Option<&str>) -> String {
    let checks = app.checks.read();
    let mut lines = vec![format!("{:<24} {:<16} {:<14} {}", "CHECK", "ENVIRONMENT", "DECISION", "HOSTNAME")];
    for check in checks.iter() {
        for (environment_name, decision) in app.verify_check_scheduling(check) {
            if let Some(filter) = environment_filter {
                if filter != environment_name {
                    continue;
                }
            }
            let hostname = app
                .environments
                .read()
                .get(&environment_name)
                .map(|_| environment_name.clone())
                .unwrap_or_else(|| environment_name.clone());
            lines.push(format!(
                "{:<24} {:<16} {:<14} {}",
                check.name,
                environment_name,
                decision_label(decision),
                hostname
            ));
        }
    }
    lines.join("\n")
}

/// Runs `verify`, returning `Ok(())` if every check's scheduling
/// configuration is sound, or `Err` listing the offending checks.
pub fn verify(app: &Watchpost, environment_filter: Option<&str>) -> Result<(), Vec<String>> {
    let checks = app.checks.read();
    let mut offenders = Vec::new();
    for check in checks.iter() {
        for (environment_name, decision) in app.verify_check_scheduling(check) {
            if let Some(filter) = environment_filter {
                if filter != environment_name {
                    continue;
                }
            }
            if decision == SchedulingDecision::DontSchedule {
                offenders.push(format!("{} / {}", check.name, environment_name));
            }
        }
    }
    if offenders.is_empty() {
        Ok(())
    } else {
        Err(offenders)
    }
}

fn decision_label(decision: SchedulingDecision) -> &'static str {
    match decision {
        SchedulingDecision::Schedule => "SCHEDULE",
        SchedulingDecision::Skip => "SKIP",
        SchedulingDecision::DontSchedule => "DONT_SCHEDULE",
    }
}
