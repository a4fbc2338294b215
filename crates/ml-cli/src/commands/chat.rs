use std::io::Write;
use std::sync::Arc;

use ml_core::config::Config;
use ml_harness::abort::AbortSignal;
use ml_harness::stream::{ChannelStream, StreamChannel, StreamEvent};
use tokio::task::JoinHandle;

use crate::route::{TurnRequest, TurnRunner};

pub async fn run(
    config: Config,
    session: &str,
    user: &str,
    message: &str,
    json_output: bool,
    offline: bool,
) -> anyhow::Result<()> {
    let runner = TurnRunner::new(super::build_pipeline(config, offline)?);
    let ok = run_turn(&runner, TurnRequest::new(session, user, message), json_output).await?;
    if !ok {
        anyhow::bail!("turn failed");
    }
    Ok(())
}

/// Run one turn with Ctrl-C wired to abort, printing events as they arrive.
/// Returns false when the turn ended in an error event.
pub(crate) async fn run_turn(
    runner: &TurnRunner,
    request: TurnRequest,
    json_output: bool,
) -> anyhow::Result<bool> {
    let (stream, rx) = ChannelStream::new();
    let stream = Arc::new(stream);
    let interrupt = abort_on_ctrl_c(stream.abort_signal());
    let printer = tokio::spawn(print_events(rx, json_output));

    runner.run_turn(request, stream).await;
    interrupt.abort();
    Ok(printer.await?)
}

fn abort_on_ctrl_c(signal: AbortSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, aborting turn");
            signal.abort();
        }
    })
}

async fn print_events(rx: flume::Receiver<StreamEvent>, json_output: bool) -> bool {
    let mut streamed = String::new();
    let mut ok = true;
    while let Ok(event) = rx.recv_async().await {
        if json_output {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "unprintable stream event"),
            }
            if matches!(event, StreamEvent::Error { .. }) {
                ok = false;
            }
            continue;
        }

        match &event {
            StreamEvent::Progress { message, .. } => eprintln!("· {message}"),
            StreamEvent::Event { .. } => {
                if let Some(text) = event.delta_text() {
                    streamed.push_str(text);
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
            }
            StreamEvent::Result { payload } => {
                // Footers are appended after streaming; print whatever the
                // deltas did not cover.
                let response = payload["response"].as_str().unwrap_or_default();
                let rest = response.strip_prefix(streamed.as_str()).unwrap_or(response);
                println!("{rest}");
            }
            StreamEvent::Error { message } => {
                ok = false;
                eprintln!("error: {message}");
            }
        }
    }
    ok
}
