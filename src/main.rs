use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use timetable::command::{self, Command};
use timetable::compactor;
use timetable::config::Config;
use timetable::engine::Engine;
use timetable::observability::{self, COMMANDS_TOTAL, COMMAND_DURATION_SECONDS};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries replies; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path())?);
    let defaults = config.command_defaults();

    info!("timetable ready");
    info!("  wal: {}", config.wal_path().display());
    info!("  teacher_match: {:?}", config.teacher_match);
    info!("  working_days: {}", config.working_days);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        };
        let Some(line) = line else {
            info!("stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Command>(&line) {
            Ok(cmd) => {
                let label = observability::command_label(&cmd);
                let start = Instant::now();
                let result = command::execute(&engine, cmd, &defaults).await;
                let status = if result.is_ok() { "ok" } else { "error" };
                metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);
                metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label)
                    .record(start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    tracing::debug!("{label} failed: {e}");
                }
                command::reply_line(&result)
            }
            Err(e) => {
                tracing::debug!("unparseable command: {e}");
                command::parse_error_line(&e)
            }
        };
        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("timetable stopped");
    Ok(())
}
