//! Subcommand handlers. Each one opens a session, does its work and closes
//! the session again, also on error.

use std::path::Path;

use anyhow::{bail, Context, Result};
use edlink_client::proto::InterfaceSet;
use edlink_client::{Disconnect, LogRecord, Session};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use crate::config::CliConfig;

async fn open_session(config: &CliConfig) -> Result<Session> {
    let endpoint = config.endpoint()?;
    let session_config = config.session_config()?;
    Session::connect_with_config(&endpoint, session_config)
        .await
        .with_context(|| format!("Failed to connect to {endpoint}"))
}

/// Join the words of a command and reject blank input.
pub(crate) fn command_text(words: &[String]) -> Result<String> {
    let text = words.join(" ");
    let text = text.trim();
    if text.is_empty() {
        bail!("Command text is empty");
    }
    Ok(text.to_string())
}

pub(crate) fn format_record(record: &LogRecord) -> String {
    format!(
        "[{}] {:<8} {}",
        record.timestamp_ms, record.level, record.message
    )
}

pub async fn ping(config: &CliConfig) -> Result<()> {
    let session = open_session(config).await?;
    // Construction already did one verified heartbeat.
    let sample = *session.watch_heartbeat().borrow();
    session.close().await;

    match sample {
        Some(sample) => println!(
            "✅ {} is alive, heartbeat latency {} ms",
            session.endpoint(),
            sample.latency_ms
        ),
        None => println!("✅ {} is alive", session.endpoint()),
    }
    Ok(())
}

pub async fn exec(config: &CliConfig, words: &[String]) -> Result<()> {
    let command = command_text(words)?;
    let session = open_session(config).await?;
    let result = session.execute_command(&command).await;
    session.close().await;

    let response = result.with_context(|| format!("Command '{command}' failed"))?;
    if !response.success {
        bail!("Server rejected '{command}': {}", response.message);
    }
    if !response.message.is_empty() {
        println!("{}", response.message);
    }
    Ok(())
}

pub async fn interfaces_get(config: &CliConfig, output: Option<&Path>) -> Result<()> {
    let session = open_session(config).await?;
    let result = session.fetch_interface_set().await;
    session.close().await;

    let set = result.context("Failed to fetch interface set")?;
    let json = serde_json::to_string_pretty(&set)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, json + "\n")
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "✅ Wrote {} interfaces to {}",
                set.interfaces.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub async fn interfaces_apply(config: &CliConfig, file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let set: InterfaceSet = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid interface set", file.display()))?;

    let session = open_session(config).await?;
    let result = session.apply_interface_set(set).await;
    session.close().await;

    let response = result.context("Failed to apply interface set")?;
    if !response.success {
        bail!("Server rejected interface set: {}", response.message);
    }
    println!("✅ {}", response.message);
    Ok(())
}

/// Print log records, and heartbeat latency when `with_heartbeat` is set,
/// until Ctrl+C or connection loss. Connection loss is an error exit.
pub async fn logs(config: &CliConfig, with_heartbeat: bool) -> Result<()> {
    let session = open_session(config).await?;
    eprintln!("📡 Streaming from {} (Ctrl+C to stop)", session.endpoint());

    let outcome = stream_until_stopped(&session, with_heartbeat).await;
    session.close().await;

    match outcome? {
        Some(disconnect) => bail!("{disconnect}"),
        None => Ok(()),
    }
}

async fn stream_until_stopped(
    session: &Session,
    mut with_heartbeat: bool,
) -> Result<Option<Disconnect>> {
    let mut records = session.subscribe_logs();
    let mut heartbeats = session.watch_heartbeat();

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let disconnected = session.disconnected();
    tokio::pin!(disconnected);

    loop {
        tokio::select! {
            interrupted = &mut ctrl_c => {
                interrupted.context("Failed to listen for Ctrl+C")?;
                return Ok(None);
            }
            disconnect = &mut disconnected => return Ok(disconnect),
            record = records.recv() => match record {
                Ok(record) => println!("{}", format_record(&record)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Log output fell behind, records dropped");
                }
                Err(RecvError::Closed) => return Ok(session.disconnect_reason()),
            },
            changed = heartbeats.changed(), if with_heartbeat => {
                if changed.is_err() {
                    with_heartbeat = false;
                    continue;
                }
                let sample = *heartbeats.borrow_and_update();
                if let Some(sample) = sample {
                    println!("♥ heartbeat latency {} ms", sample.latency_ms);
                }
            }
        }
    }
}
