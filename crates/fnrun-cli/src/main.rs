//! fnrun entry point.
//!
//! Boots the function in `SOURCE`, then reads newline-delimited JSON events
//! from stdin and writes one JSON result line per event to stdout. Failed
//! invocations are written as `{"error": "..."}` and do not stop the loop.
//! The instance is closed on EOF or Ctrl-C.

mod config;

use anyhow::Context;
use clap::Parser;
use config::Cli;
use fnrun_core::{FunctionInstance, FunctionRunner};
use fnrun_process::TracingSink;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = cli.runner_config()?;
    tracing::debug!(?config, "Configuration loaded");

    let code = tokio::fs::read_to_string(&cli.source)
        .await
        .with_context(|| format!("read {}", cli.source.display()))?;
    let init = cli.init_data().context("parse --init")?;

    let runner = FunctionRunner::new(config)?;
    let label = cli
        .source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    // Ctrl-C during boot aborts the readiness wait; the runner rolls back.
    let cancel = CancellationToken::new();
    let boot_cancel = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt");
            boot_cancel.cancel();
        }
    });

    let instance = runner
        .start(Arc::new(TracingSink::new(label)), &init, &code, &cancel)
        .await
        .context("start function")?;
    tracing::info!(
        hash = %instance.hash(),
        endpoint = %instance.endpoint(),
        "Function ready, reading events from stdin"
    );

    let served = serve_stdin(&instance, &cancel).await;
    instance.close().await;
    ctrl_c.abort();

    let count = served?;
    tracing::info!(events = count, "Shutdown complete");
    Ok(())
}

/// Invoke the instance once per stdin line until EOF, cancellation, or the
/// function process dying.
async fn serve_stdin(instance: &FunctionInstance, cancel: &CancellationToken) -> anyhow::Result<u64> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut count = 0u64;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            status = instance.wait_exit() => {
                anyhow::bail!("function process exited: {status}");
            }
            line = lines.next_line() => line.context("read stdin")?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let output = match serde_json::from_str::<Value>(&line) {
            Ok(event) => match instance.invoke_with_cancel(&event, cancel).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, "Invocation failed");
                    json!({ "error": e.to_string() })
                }
            },
            Err(e) => json!({ "error": format!("invalid event JSON: {e}") }),
        };
        count += 1;

        let mut rendered = serde_json::to_vec(&output).context("serialize result")?;
        rendered.push(b'\n');
        stdout.write_all(&rendered).await.context("write stdout")?;
        stdout.flush().await.context("flush stdout")?;
    }

    Ok(count)
}
