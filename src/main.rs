use std::{env, process::ExitCode};

use log::{error, info};

use orbsix::{
    config::Config,
    core::{error::ErrorContext, Orb},
    logging::Logger,
};

/// Loads an ORB configuration file, builds every configured interceptor and
/// prints the normalized configuration.
fn main() -> ExitCode {
    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: orbsix <config.yaml>");
        return ExitCode::from(2);
    };

    let config = match Config::load_from_yaml(path.as_str()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let logged = match &config.log {
        Some(log) => Logger::new(log.clone()).init_env_logger(),
        None => env_logger::try_init().with_context("Failed to install logger"),
    };
    if let Err(e) = logged {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let yaml = match config.to_yaml() {
        Ok(yaml) => yaml,
        Err(e) => {
            error!("Failed to serialize configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Loaded {} targets, {} client and {} server interceptors",
        config.targets.len(),
        config.interceptors.client.len(),
        config.interceptors.server.len()
    );

    // Interceptor configs are only checked when the interceptors are built
    if let Err(e) = Orb::builder(config) {
        error!("Invalid interceptor configuration: {e}");
        return ExitCode::FAILURE;
    }

    print!("{yaml}");
    ExitCode::SUCCESS
}
