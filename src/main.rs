use std::process::ExitCode;

use env_logger::Env;
use sunvoy_client::{ClientConfig, ClientError, SunvoyClient, VERSION};

fn load_config() -> Result<ClientConfig, ClientError> {
    let config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::default(),
    };
    Ok(config.apply_env()?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = load_config();

    let debug = config.as_ref().map(|c| c.debug).unwrap_or(false);
    env_logger::Builder::from_env(Env::default().default_filter_or(if debug {
        "debug"
    } else {
        "info"
    }))
    .init();

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    log::info!("sunvoy-client {VERSION} against {}", config.base_url);

    let client = match SunvoyClient::builder().with_config(config).build() {
        Ok(client) => client,
        Err(err) => {
            log::error!("failed to initialise client: {err}");
            return ExitCode::FAILURE;
        }
    };

    match client.run().await {
        Ok(report) => {
            log::info!(
                "done: {} users, current user {}, session {}",
                report.users,
                if report.current_user { "included" } else { "unavailable" },
                if report.session_reused { "reused" } else { "new" }
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("run failed: {err}");
            ExitCode::FAILURE
        }
    }
}
