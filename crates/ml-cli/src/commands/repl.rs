use ml_core::config::Config;
use ml_telemetry::tracing_setup::generate_span_id;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::chat::run_turn;
use crate::route::{TurnRequest, TurnRunner};

const HELP: &str = "commands: /costs  /breakers  /help  /quit";

pub async fn run(
    config: Config,
    session: Option<String>,
    user: &str,
    offline: bool,
) -> anyhow::Result<()> {
    let runner = TurnRunner::new(super::build_pipeline(config, offline)?);
    let session = session.unwrap_or_else(|| format!("repl-{}", generate_span_id()));
    eprintln!("session {session}. {HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => eprintln!("{HELP}"),
            "/costs" => print_costs(&runner),
            "/breakers" => {
                for (agent, state) in runner.pipeline().registry().states() {
                    eprintln!("{agent:<20} {state}");
                }
            }
            message => {
                run_turn(&runner, TurnRequest::new(&session, user, message), false).await?;
            }
        }
    }
    Ok(())
}

fn print_costs(runner: &TurnRunner) {
    let summaries = runner.costs().all();
    if summaries.is_empty() {
        eprintln!("no model calls recorded");
        return;
    }
    for summary in summaries {
        eprintln!(
            "{}  calls={} in={} out={} ${:.5}",
            summary.trace_id,
            summary.total_calls,
            summary.total_input_tokens,
            summary.total_output_tokens,
            summary.total_cost_usd,
        );
        for (agent, cost) in &summary.by_agent {
            eprintln!(
                "  {agent:<20} calls={} avg={:.0}ms ${:.5}",
                cost.calls, cost.avg_duration_ms, cost.cost_usd
            );
        }
    }
}
