//! Purpose: `arialink` CLI entry point.
//! Role: Binary crate root; parses args, drives one engine session per `get`, emits JSON.
//! Invariants: Download events are JSON lines on stdout (or raw COMPLETE/ERROR markers on stderr with `--markers`).
//! Invariants: Errors are emitted as JSON on stderr; exit code is derived from `api::to_exit_code`.
//! Invariants: Every successful `init` is paired with `deinit`, after the session is finalized.
#![allow(clippy::result_large_err)]
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Args, CommandFactory, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use clap_complete::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use arialink::api::{
    DefaultEngine, DiagnosticHandler, DownloadEvent, Engine, Error, ErrorKind, EventContext,
    EventHandler, Gid, Library, Options, RunMode, SessionConfig, to_exit_code,
};
use arialink::notice::{Notice, notice_json};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `arialink --help` for usage."));
            }
        },
    };

    init_tracing();

    match cli.command {
        Command::Get(args) => {
            let engine = build_engine(&cli.engine)?;
            cmd_get(engine, args)
        }
        Command::Version => {
            let engine = build_engine(&cli.engine)?;
            cmd_version(&engine)
        }
        Command::Completion { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "arialink", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
    }
}

#[derive(Parser)]
#[command(
    name = "arialink",
    version,
    about = "Drive aria2 download sessions and stream their events",
    long_about = None,
    after_help = r#"EXAMPLES
  $ aria2c --enable-rpc --rpc-secret=s3cret &
  $ arialink --rpc-secret s3cret get https://example.com/file.iso --dir /tmp/dl
  {"event":{"code":1,"gid":"2089b05ecca3d829","kind":"start",...}}
  {"event":{"code":4,"gid":"2089b05ecca3d829","kind":"complete",...}}

  $ arialink get --markers https://example.com/a.bin   # prints COMPLETE / ERROR on stderr

ENVIRONMENT
  ARIALINK_RPC_URL      aria2 JSON-RPC endpoint (default http://127.0.0.1:6800/jsonrpc)
  ARIALINK_RPC_SECRET   aria2 --rpc-secret value
  ARIALINK_POLL_MS      event poll interval in milliseconds (default 250)
  RUST_LOG              log filter for stderr diagnostics (default warn)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct EngineArgs {
    #[arg(long, global = true, help = "aria2 JSON-RPC endpoint (overrides ARIALINK_RPC_URL)")]
    rpc_url: Option<String>,
    #[arg(long, global = true, help = "aria2 RPC secret (overrides ARIALINK_RPC_SECRET)")]
    rpc_secret: Option<String>,
    #[arg(long, global = true, help = "Event poll interval in ms (overrides ARIALINK_POLL_MS)")]
    poll_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Download URIs in one session and print their events")]
    Get(GetArgs),
    #[command(about = "Print binding and engine versions as JSON")]
    Version,
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct GetArgs {
    #[arg(required = true, help = "URIs to download (one download per URI)")]
    uris: Vec<String>,
    #[arg(long, help = "Keep the session alive after downloads finish (until SIGINT/SIGTERM)")]
    keep_running: bool,
    #[arg(long, help = "Do not install SIGINT/SIGTERM handling for the session")]
    no_signal_handler: bool,
    #[arg(
        short = 'o',
        long = "option",
        value_name = "KEY=VALUE",
        help = "Per-download aria2 option (repeatable)"
    )]
    options: Vec<String>,
    #[arg(long, help = "Download directory (aria2 `dir` option)")]
    dir: Option<PathBuf>,
    #[arg(long, help = "Print only COMPLETE/ERROR markers on stderr instead of JSON events")]
    markers: bool,
}

/// Counts failures and forwards each event to the selected output.
struct CliHandler {
    failures: Arc<AtomicUsize>,
    markers: Option<DiagnosticHandler>,
}

impl EventHandler for CliHandler {
    fn on_event(&self, ctx: &EventContext<'_>, event: DownloadEvent, gid: Gid) {
        if event == DownloadEvent::Error {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        match &self.markers {
            Some(markers) => markers.on_event(ctx, event, gid),
            None => {
                let line = notice_json(&Notice::new(event, gid, ctx.session()));
                let mut out = io::stdout().lock();
                let _ = writeln!(out, "{line}");
                let _ = out.flush();
            }
        }
    }
}

fn cmd_get<E: Engine>(engine: E, args: GetArgs) -> Result<RunOutcome, Error> {
    let mut options = Options::parse_pairs(args.options.iter().map(String::as_str))?;
    if let Some(dir) = &args.dir {
        options.push("dir", dir.display().to_string());
    }

    let library = Library::init(engine).map_err(|err| {
        err.with_hint("Start aria2c with --enable-rpc, or point --rpc-url at a running daemon.")
    })?;
    let failures = Arc::new(AtomicUsize::new(0));
    let handler = CliHandler {
        failures: Arc::clone(&failures),
        markers: args.markers.then(DiagnosticHandler::stderr),
    };
    let config = SessionConfig::new()
        .keep_running(args.keep_running)
        .use_signal_handler(!args.no_signal_handler);

    let mut session = library.download(config, handler)?;
    for uri in &args.uris {
        let gid = session.add_uri([uri.as_str()], &options)?;
        tracing::info!(%gid, uri = %uri, "queued");
    }
    session.run(RunMode::Default)?;

    let final_status = session.finish();
    if !final_status.is_ok() {
        tracing::warn!(status = %final_status, "session finalize reported failure");
    }
    let deinit_status = library.deinit();
    if !deinit_status.is_ok() {
        tracing::warn!(status = %deinit_status, "library deinit reported failure");
    }

    let failed = failures.load(Ordering::SeqCst);
    if failed > 0 {
        return Err(Error::new(ErrorKind::Engine)
            .with_message(format!("{failed} of {} downloads failed", args.uris.len())));
    }
    Ok(RunOutcome::ok())
}

fn cmd_version(engine: &DefaultEngine) -> Result<RunOutcome, Error> {
    let mut out = Map::new();
    out.insert("arialink".to_string(), json!(env!("CARGO_PKG_VERSION")));
    describe_engine(engine, &mut out)?;
    println!("{}", Value::Object(out));
    Ok(RunOutcome::ok())
}

#[cfg(not(feature = "libaria2"))]
fn build_engine(args: &EngineArgs) -> Result<DefaultEngine, Error> {
    let mut config = arialink::api::RpcConfig::from_env()?;
    if let Some(url) = &args.rpc_url {
        config.url = arialink::core::rpc::parse_url(url)?;
    }
    if let Some(secret) = &args.rpc_secret {
        config.secret = Some(secret.clone()).filter(|secret| !secret.is_empty());
    }
    if let Some(poll_ms) = args.poll_ms {
        config.poll_interval = std::time::Duration::from_millis(poll_ms.max(1));
    }
    Ok(arialink::api::RpcEngine::new(config))
}

#[cfg(feature = "libaria2")]
fn build_engine(_args: &EngineArgs) -> Result<DefaultEngine, Error> {
    Ok(arialink::api::NativeEngine::new())
}

#[cfg(not(feature = "libaria2"))]
fn describe_engine(engine: &DefaultEngine, out: &mut Map<String, Value>) -> Result<(), Error> {
    let version = engine.client().get_version()?;
    out.insert("backend".to_string(), json!("rpc"));
    out.insert("url".to_string(), json!(engine.client().url().as_str()));
    out.insert("aria2".to_string(), json!(version.version));
    out.insert("features".to_string(), json!(version.enabled_features));
    Ok(())
}

#[cfg(feature = "libaria2")]
fn describe_engine(_engine: &DefaultEngine, out: &mut Map<String, Value>) -> Result<(), Error> {
    out.insert("backend".to_string(), json!("libaria2"));
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error:").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn emit_error(err: &Error) {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert(
        "message".to_string(),
        json!(err.message().map(str::to_string).unwrap_or_else(|| err.to_string())),
    );
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    if let Some(gid) = err.gid() {
        inner.insert("gid".to_string(), json!(gid.to_hex()));
    }
    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    eprintln!("{}", Value::Object(outer));
}
