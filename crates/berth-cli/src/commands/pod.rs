//! `berth pod`: Manage pods.

use std::process::ExitCode;

use berth_runtime::engine::Engine;
use clap::Subcommand;

use crate::output;

/// Pod subcommands.
#[derive(Subcommand, Debug)]
pub enum PodCommand {
    /// Create a pod.
    Create {
        /// Pod name.
        name: String,
    },
    /// Remove a pod. Its containers are left untouched.
    Rm {
        /// Pod ID, prefix, or name.
        pod: String,
    },
    /// List pods.
    Ls,
}

/// Executes a pod subcommand.
///
/// # Errors
///
/// Returns an error if the pod cannot be created or does not resolve.
pub fn execute(engine: &Engine, command: PodCommand) -> anyhow::Result<ExitCode> {
    match command {
        PodCommand::Create { name } => println!("{}", engine.create_pod(&name)?),
        PodCommand::Rm { pod } => println!("{}", engine.remove_pod(&pod)?),
        PodCommand::Ls => {
            let rows: Vec<Vec<String>> = engine
                .pods()
                .into_iter()
                .map(|p| vec![p.id.to_string(), p.name, output::format_age(p.created_at)])
                .collect();
            print!("{}", output::table(&["POD ID", "NAME", "CREATED"], &rows));
        }
    }
    Ok(ExitCode::SUCCESS)
}
