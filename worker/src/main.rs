mod config;

use std::process::ExitCode;
use std::sync::Arc;

use config::NarratorConfig;
use narrator_audio::CommandEngineLoader;
use narrator_core::{Dispatcher, ModelCache, Worker, WorkerExit};
use tracing::{error, info};

/// Exit status when the readiness check or bootstrap fails
const EXIT_NOT_READY: u8 = 1;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    // Logging / tracing. Stdout carries frames, so logs go to stderr only.
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "info,narrator_core=info,narrator_audio=info,narrator_worker=info".to_string()
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = NarratorConfig::load();
    info!(
        target: "narrator_worker",
        engine = ?cfg.engine.preference,
        default_voice = %cfg.dispatch.default_voice,
        max_frame_len = cfg.worker.max_frame_len,
        on_protocol_error = ?cfg.worker.on_protocol_error,
        "Starting narrator worker"
    );

    let loader = CommandEngineLoader::new(cfg.engine);
    let dispatcher = Dispatcher::new(ModelCache::new(Arc::new(loader)), cfg.dispatch);
    let mut worker = Worker::new(dispatcher, cfg.worker);

    match worker.run(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(WorkerExit::EndOfStream) => ExitCode::SUCCESS,
        Ok(exit) => {
            error!(target: "narrator_worker", reason = ?exit, "Worker stopped abnormally");
            ExitCode::from(exit.exit_code() as u8)
        }
        Err(e) => {
            error!(target: "narrator_worker", error = %e, "Worker failed to start");
            ExitCode::from(EXIT_NOT_READY)
        }
    }
}
