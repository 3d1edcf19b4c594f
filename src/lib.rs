pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod test_support;

use application::commands::AppState;
use infrastructure::api_transport::ReqwestApiTransport;
use clap::Parser;
use cli::{execute, init_logging, workspace_root, CliArgs};
use std::process::ExitCode;

pub async fn run() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    let state = match workspace_root(&args).and_then(AppState::<ReqwestApiTransport>::new) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("failed to initialize workspace: {error}");
            return ExitCode::FAILURE;
        }
    };

    let command_name = args.command.name();
    match execute(&state, args.command).await {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("{}", state.command_error(command_name, &error));
            if let Some(location) = state.current_location() {
                eprintln!("Continue at {location}");
            }
            ExitCode::FAILURE
        }
    }
}
