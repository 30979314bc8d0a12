use kimp_engine::{
    config::EngineConfig,
    engine::Engine,
    logging::{init_logging, install_crypto_provider},
};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = EngineConfig::from_env();
    init_logging(config.log_json);
    install_crypto_provider();

    info!(
        data_dir = %config.premium.data_dir.display(),
        poll_interval_ms = config.premium.poll_interval.as_millis(),
        symbols_file = ?config.symbols_file,
        "starting kimp-engine"
    );

    let result = match Engine::new(config) {
        Ok(engine) => engine.run().await,
        Err(error) => Err(error),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "kimp-engine failed");
            ExitCode::FAILURE
        }
    }
}
