//! `weave` CLI binary: a thin REST+SSE client for the weave dispatcher,
//! plus a `serve` subcommand that runs the dispatcher in-process.
//!
//! Subcommands: `run`, `watch`, `kill`, `rerun`, `history`, `brains`, `serve`.

use std::collections::BTreeMap;

use clap::{Parser, Subcommand};
use serde_json::Value;
use weave_cli::serve::ServeOptions;
use weave_cli::{ClientError, DispatcherClient};

const DEFAULT_URL: &str = "http://127.0.0.1:8080";

#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(about = "weave — CLI client for the brain execution dispatcher")]
struct Args {
    /// Dispatcher base URL (default http://127.0.0.1:8080, or WEAVE_DISPATCHER_URL)
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Output compact JSON (default: pretty-printed)
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a brain run
    Run(RunArgs),
    /// Stream a run's event log (historical then live)
    Watch(RunIdArgs),
    /// Kill a run (idempotent)
    Kill(RunIdArgs),
    /// Start a new run from a prefix of a source run's event log
    Rerun(RerunArgs),
    /// Show a brain's recent runs
    History(HistoryArgs),
    /// List brains (optionally filtered), or show one brain's structure
    Brains(BrainsArgs),
    /// Run the dispatcher in-process (HTTP+SSE server)
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Brain identifier: filename, title, or a unique substring of either
    identifier: String,
    /// `key=value` option, repeatable; value is parsed as JSON if possible
    #[arg(long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,
    /// Don't stream the run's events after starting it
    #[arg(long)]
    no_watch: bool,
}

#[derive(clap::Args, Debug)]
struct RunIdArgs {
    run_id: String,
}

#[derive(clap::Args, Debug)]
struct RerunArgs {
    /// Brain identifier for the new run
    identifier: String,
    /// Source run to replay a prefix of
    #[arg(long = "run-id", value_name = "RUN_ID")]
    run_id: Option<String>,
    #[arg(long = "starts-at", value_name = "SEQ")]
    starts_at: Option<u64>,
    #[arg(long = "stops-after", value_name = "SEQ")]
    stops_after: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct HistoryArgs {
    identifier: String,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct BrainsArgs {
    /// Show this brain's structure and active runs instead of listing all brains
    identifier: Option<String>,
    /// Substring filter when listing (ignored when `identifier` is given)
    #[arg(short, long)]
    query: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Listen address (default 127.0.0.1:8080)
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
    /// Persist events to this sqlite file instead of in-memory storage
    #[arg(long, value_name = "PATH")]
    sqlite: Option<String>,
}

fn resolve_url(args: &Args) -> String {
    args.url.clone().or_else(|| std::env::var("WEAVE_DISPATCHER_URL").ok()).unwrap_or_else(|| DEFAULT_URL.to_string())
}

/// Parses a repeatable `--option key=value` into a typed options map,
/// treating the value as JSON when it parses as such and as a plain string
/// otherwise (so `--option count=3` and `--option name=ada` both work without
/// forcing callers to quote JSON on the command line).
fn parse_options(raw: &[String]) -> Result<BTreeMap<String, Value>, String> {
    let mut map = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry.split_once('=').ok_or_else(|| format!("expected key=value, got {entry:?}"))?;
        let parsed = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        map.insert(key.to_string(), parsed);
    }
    Ok(map)
}

fn print_value(value: &Value, compact: bool) {
    let s = if compact { serde_json::to_string(value) } else { serde_json::to_string_pretty(value) };
    println!("{}", s.unwrap_or_default());
}

fn run_id_from(value: &Value) -> Option<String> {
    value.get("brainRunId").and_then(Value::as_str).map(str::to_string)
}

async fn cmd_run(client: &DispatcherClient, args: RunArgs, compact: bool) -> Result<(), ClientError> {
    let options = match parse_options(&args.options) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("weave: {msg}");
            std::process::exit(1);
        }
    };
    let response = client.start_run(&args.identifier, options).await?;
    print_value(&response, compact);
    if args.no_watch {
        return Ok(());
    }
    let Some(run_id) = run_id_from(&response) else { return Ok(()) };
    watch_until_terminal(client, &run_id, compact).await?;
    print_value(&client.get_run(&run_id).await?, compact);
    Ok(())
}

async fn cmd_brains(client: &DispatcherClient, args: BrainsArgs, compact: bool) -> Result<(), ClientError> {
    match args.identifier {
        Some(identifier) => {
            let structure = client.get_brain(&identifier).await?;
            let active = client.active_runs(&identifier).await?;
            print_value(&serde_json::json!({"brain": structure, "activeRuns": active}), compact);
            Ok(())
        }
        None => client.list_brains(args.query.as_deref()).await.map(|v| print_value(&v, compact)),
    }
}

async fn watch_until_terminal(client: &DispatcherClient, run_id: &str, compact: bool) -> Result<(), ClientError> {
    let path = format!("/brains/runs/{run_id}/watch");
    client
        .watch(&path, |envelope| {
            print_value(&envelope, compact);
            !weave_cli::client::is_root_terminal(&envelope)
        })
        .await
}

#[tokio::main]
async fn main() {
    weave_config::load_and_apply("weave", None::<&std::path::Path>).ok();
    if let Err(e) = weave_cli::logging::init() {
        eprintln!("weave: failed to initialize logging: {e}");
    }

    let args = Args::parse();
    let compact = args.compact;

    if let Command::Serve(sa) = &args.cmd {
        let opts = ServeOptions { addr: sa.addr.clone(), sqlite_path: sa.sqlite.clone() };
        if let Err(e) = weave_cli::serve::run(opts).await {
            eprintln!("weave: serve error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let client = DispatcherClient::new(resolve_url(&args));
    let result = match args.cmd {
        Command::Run(run_args) => cmd_run(&client, run_args, compact).await,
        Command::Watch(a) => watch_until_terminal(&client, &a.run_id, compact).await,
        Command::Kill(a) => client.kill_run(&a.run_id).await,
        Command::Rerun(a) => client.rerun(&a.identifier, a.run_id.as_deref(), a.starts_at, a.stops_after).await.map(|v| print_value(&v, compact)),
        Command::History(a) => client.history(&a.identifier, a.limit).await.map(|v| print_value(&v, compact)),
        Command::Brains(a) => cmd_brains(&client, a, compact).await,
        Command::Serve(_) => unreachable!("handled above"),
    };

    if let Err(e) = result {
        eprintln!("weave: {e}");
        std::process::exit(1);
    }
}
