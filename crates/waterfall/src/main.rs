mod client;
mod output;
mod protocol;
mod telemetry;

use std::io::IsTerminal;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::future::try_join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use waterfall_core::model::ChildStatus;
use waterfall_tree::{Snapshot, TraceBackend, TraceSession};

use crate::client::{list_window, load_config, open_session, trace_window};
use crate::output::{print_details_human, print_rows_human, print_traces_human};
use crate::protocol::{ExploreRequest, ExploreResponse, RowsView};
use crate::telemetry::{init_cli_tracing, init_session_tracing, shutdown_tracing};

#[derive(Parser, Debug)]
#[command(name = "waterfall")]
#[command(about = "Browse Tempo traces as an incrementally loaded waterfall")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "Tempo or Grafana base URL")]
    endpoint: Option<String>,

    #[arg(long, global = true, help = "Grafana datasource uid to proxy through")]
    datasource: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Render the waterfall of one trace")]
    Trace {
        trace_id: String,
        #[arg(long, help = "Trace start time (RFC3339 or relative, e.g. 5m)")]
        start: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long, default_value_t = 1, help = "Load children down to this level")]
        depth: u32,
        #[arg(long)]
        collapse: Vec<String>,
    },
    #[command(about = "List traces matching a TraceQL query")]
    Traces {
        query: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    #[command(about = "Show the attributes of one span")]
    Span {
        trace_id: String,
        span_id: String,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        since: Option<String>,
    },
    #[command(about = "Drive a trace interactively with JSON lines on stdin")]
    Explore {
        trace_id: String,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        since: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Trace {
            trace_id,
            start,
            since,
            depth,
            collapse,
        } => {
            init_cli_tracing();
            let cfg = load_config(cli.endpoint, cli.datasource)?;
            let window = trace_window(&cfg, start, since)?;
            let session = open_session(&cfg, &trace_id, window)?;
            session
                .load()
                .await
                .with_context(|| format!("load trace {trace_id}"))?;
            let mut snapshot = expand_to_depth(&session, depth).await?;
            for span_id in &collapse {
                snapshot = session
                    .collapse(span_id)
                    .with_context(|| format!("collapse span {span_id}"))?;
            }

            let view = RowsView::from_snapshot(&snapshot);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_rows_human(&session.key().trace_id, &view, std::io::stdout().is_terminal());
            }
            Ok(())
        }
        Commands::Traces {
            query,
            since,
            until,
            limit,
        } => {
            init_cli_tracing();
            let cfg = load_config(cli.endpoint, cli.datasource)?;
            let window = list_window(&cfg, since, until)?;
            let client = waterfall_tempo::TempoClient::new(&cfg).context("build tempo client")?;
            let traces = client
                .list_traces(query.as_deref().unwrap_or_default(), window, limit)
                .await
                .context("list traces")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&traces)?);
            } else {
                print_traces_human(&traces);
            }
            Ok(())
        }
        Commands::Span {
            trace_id,
            span_id,
            start,
            since,
        } => {
            init_cli_tracing();
            let cfg = load_config(cli.endpoint, cli.datasource)?;
            let window = trace_window(&cfg, start, since)?;
            let session = open_session(&cfg, &trace_id, window)?;
            let attributes = session
                .details(&span_id)
                .await
                .with_context(|| format!("fetch span {span_id}"))?;
            if cli.json {
                let response = ExploreResponse::Details {
                    span_id,
                    attributes,
                };
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_details_human(&span_id, &attributes);
            }
            Ok(())
        }
        Commands::Explore {
            trace_id,
            start,
            since,
        } => {
            init_session_tracing();
            let result = run_explore(cli.endpoint, cli.datasource, trace_id, start, since).await;
            shutdown_tracing();
            result
        }
    }
}

/// Loads every remote span above `depth`, one level per round.
async fn expand_to_depth<B: TraceBackend>(
    session: &TraceSession<B>,
    depth: u32,
) -> anyhow::Result<Snapshot> {
    loop {
        let snapshot = session.snapshot().context("trace is not loaded")?;
        let pending: Vec<String> = snapshot
            .spans
            .iter()
            .filter(|s| s.child_status == ChildStatus::RemoteChildren && s.level < depth)
            .map(|s| s.span_id.clone())
            .collect();
        if pending.is_empty() {
            return Ok(snapshot);
        }
        tracing::debug!(count = pending.len(), depth, "loading next level");
        try_join_all(pending.iter().map(|id| session.load_more(id)))
            .await
            .context("load children")?;
    }
}

async fn run_explore(
    endpoint: Option<String>,
    datasource: Option<String>,
    trace_id: String,
    start: Option<String>,
    since: Option<String>,
) -> anyhow::Result<()> {
    let cfg = load_config(endpoint, datasource)?;
    let window = trace_window(&cfg, start, since)?;
    let session = open_session(&cfg, &trace_id, window)?;

    let first = match session.load().await {
        Ok(snapshot) => ExploreResponse::Rows(RowsView::from_snapshot(&snapshot)),
        Err(err) => ExploreResponse::Error(err.to_string()),
    };
    println!("{}", serde_json::to_string(&first)?);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ExploreRequest>(&line) {
            Ok(request) => handle_explore(&session, request).await,
            Err(err) => ExploreResponse::Error(format!("bad request: {err}")),
        };
        println!("{}", serde_json::to_string(&response)?);
    }
    Ok(())
}

async fn handle_explore<B: TraceBackend>(
    session: &TraceSession<B>,
    request: ExploreRequest,
) -> ExploreResponse {
    let result = match request {
        ExploreRequest::Rows => session.load().await,
        ExploreRequest::LoadMore { span_id } => session.load_more(&span_id).await,
        ExploreRequest::Expand { span_id } => session.expand(&span_id).await,
        ExploreRequest::Collapse { span_id } => session.collapse(&span_id),
        ExploreRequest::Refresh => session.refresh().await,
        ExploreRequest::Details { span_id } => {
            return match session.details(&span_id).await {
                Ok(attributes) => ExploreResponse::Details {
                    span_id,
                    attributes,
                },
                Err(err) => ExploreResponse::Error(err.to_string()),
            };
        }
    };
    match result {
        Ok(snapshot) => ExploreResponse::Rows(RowsView::from_snapshot(&snapshot)),
        Err(err) => {
            tracing::warn!(error = %err, "explore request failed");
            ExploreResponse::Error(err.to_string())
        }
    }
}
