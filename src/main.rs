// src/main.rs

use clap::{CommandFactory, Parser};
use log::{debug, error, info};
use std::process::ExitCode;

use fbsplash::cli::Cli;
use fbsplash::coordinator::{Coordinator, Environment};
use fbsplash::os::handoff::{self, TerminateOutcome};

fn main() -> ExitCode {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not failures.
            let code = if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            let _ = e.print();
            return code;
        }
    };
    debug!("startup: {:?}", cli);

    let handoff_name = cli.handoff_name();
    if cli.terminate {
        return terminate(&handoff_name);
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let images = config.resolve_images();
    if images.is_empty() && config.text.is_none() {
        error!("No text or images specified");
        eprintln!("{}", Cli::command().render_usage());
        return ExitCode::FAILURE;
    }

    let mut env = Environment::system(&config);
    env.handoff_name = handoff_name;
    match Coordinator::new(config, images, env) {
        Ok(mut coordinator) => coordinator.run(),
        Err(e) => error!("Main loop setup failed: {:#}", e),
    }
    info!("exit");
    // Once the command line is accepted, fatal errors are only logged; they
    // do not change the exit status.
    ExitCode::SUCCESS
}

fn terminate(handoff_name: &[u8]) -> ExitCode {
    match handoff::terminate_running_instance(handoff_name) {
        Ok(TerminateOutcome::NoInstance) => {
            debug!("no splash running");
            ExitCode::SUCCESS
        }
        Ok(TerminateOutcome::Terminated) => {
            debug!("terminated splashscreen");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to terminate splashscreen: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
