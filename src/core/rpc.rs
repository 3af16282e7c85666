//! Purpose: Engine backend that drives a running `aria2c --enable-rpc` daemon over JSON-RPC.
//! Exports: `RpcConfig`, `RpcClient`, `RpcEngine`, `RpcSession`, `EngineVersion`.
//! Role: Default backend; reaches the engine only through aria2's documented RPC methods.
//! Invariants: A session only tracks (and only reports events for) downloads it added itself.
//! Invariants: Events are derived from status transitions observed at poll granularity.
//! Invariants: Each tracked download reports at most one terminal event (Complete/Error/Stop).
//! Invariants: Signal registrations made for a session are removed when it finishes.
#![allow(clippy::result_large_err)]

use serde::Deserialize;
use serde_json::{Value, json};
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use url::Url;

use crate::core::engine::{
    Engine, EngineSession, NativeConfig, RunMode, RunState, ShutdownHandle, Status,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::event::{DownloadEvent, Gid};
use crate::core::handler::Dispatcher;
use crate::core::options::Options;

type RpcResult<T> = Result<T, Error>;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:6800/jsonrpc";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_RPC_URL: &str = "ARIALINK_RPC_URL";
pub const ENV_RPC_SECRET: &str = "ARIALINK_RPC_SECRET";
pub const ENV_POLL_MS: &str = "ARIALINK_POLL_MS";

const STATUS_KEYS: [&str; 5] = ["gid", "status", "errorCode", "errorMessage", "seeder"];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RpcConfig {
    pub url: Url,
    pub secret: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_RPC_URL).expect("default rpc url is valid"),
            secret: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RpcConfig {
    pub fn from_env() -> RpcResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> RpcResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_RPC_URL).filter(|value| !value.is_empty()) {
            config.url = parse_url(&raw)?;
        }
        config.secret = lookup(ENV_RPC_SECRET).filter(|value| !value.is_empty());
        if let Some(raw) = lookup(ENV_POLL_MS).filter(|value| !value.is_empty()) {
            let millis: u64 = raw.parse().map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("{ENV_POLL_MS} must be an integer, got `{raw}`"))
                    .with_source(err)
            })?;
            config.poll_interval = Duration::from_millis(millis.max(1));
        }
        Ok(config)
    }
}

pub fn parse_url(raw: &str) -> RpcResult<Url> {
    let url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid rpc url `{raw}`"))
            .with_hint("Expected something like http://127.0.0.1:6800/jsonrpc.")
            .with_source(err)
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("unsupported rpc url scheme `{other}`"))
            .with_hint("Use an http:// or https:// JSON-RPC endpoint.")),
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineVersion {
    pub version: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusReply {
    status: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    seeder: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Fault>,
}

#[derive(Deserialize)]
struct Fault {
    code: i64,
    message: String,
}

#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<RpcClientInner>,
}

struct RpcClientInner {
    url: Url,
    token: Option<String>,
    agent: ureq::Agent,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(config: &RpcConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self {
            inner: Arc::new(RpcClientInner {
                url: config.url.clone(),
                token: config.secret.as_ref().map(|secret| format!("token:{secret}")),
                agent,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn call(&self, method: &str, params: Vec<Value>) -> RpcResult<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut all = Vec::with_capacity(params.len() + 1);
        if let Some(token) = &self.inner.token {
            all.push(Value::String(token.clone()));
        }
        all.extend(params);
        let body = json!({
            "jsonrpc": "2.0",
            "id": format!("arialink-{id}"),
            "method": method,
            "params": all,
        });
        tracing::trace!(method, id, "rpc call");

        let response = self
            .inner
            .agent
            .post(self.inner.url.as_str())
            .set("Content-Type", "application/json")
            .send_string(&body.to_string());
        let text = match response {
            Ok(resp) => resp.into_string().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message(format!("failed to read {method} response"))
                    .with_source(err)
            })?,
            // aria2 answers faults with 4xx and a JSON-RPC error body.
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                if text.trim().is_empty() {
                    return Err(Error::new(ErrorKind::Rpc)
                        .with_message(format!("{method} failed with http {code}")));
                }
                text
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message(format!("rpc transport error calling {method}"))
                    .with_hint(format!(
                        "Is aria2c running with --enable-rpc at {}?",
                        self.inner.url
                    ))
                    .with_source(err));
            }
        };
        parse_envelope(method, &text)
    }

    pub fn get_version(&self) -> RpcResult<EngineVersion> {
        let value = self.call("aria2.getVersion", Vec::new())?;
        decode(value, "aria2.getVersion")
    }

    pub fn add_uri(&self, uris: &[String], options: &Options) -> RpcResult<Gid> {
        let value = self.call("aria2.addUri", vec![json!(uris), options.to_json()])?;
        let hex = value.as_str().ok_or_else(|| {
            Error::new(ErrorKind::Rpc).with_message("aria2.addUri did not return a gid")
        })?;
        Gid::from_hex(hex).map_err(|err| {
            Error::new(ErrorKind::Rpc)
                .with_message(format!("aria2.addUri returned malformed gid `{hex}`"))
                .with_source(err)
        })
    }

    fn tell_status(&self, gid: Gid) -> RpcResult<StatusReply> {
        let value = self
            .call("aria2.tellStatus", vec![json!(gid.to_hex()), json!(STATUS_KEYS)])
            .map_err(|err| err.with_gid(gid))?;
        decode(value, "aria2.tellStatus").map_err(|err| err.with_gid(gid))
    }

    pub fn remove(&self, gid: Gid, force: bool) -> RpcResult<()> {
        let method = if force {
            "aria2.forceRemove"
        } else {
            "aria2.remove"
        };
        self.call(method, vec![json!(gid.to_hex())])
            .map(|_| ())
            .map_err(|err| err.with_gid(gid))
    }
}

fn parse_envelope(method: &str, text: &str) -> RpcResult<Value> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Rpc)
            .with_message(format!("invalid {method} response"))
            .with_source(err)
    })?;
    if let Some(fault) = envelope.error {
        return Err(Error::new(ErrorKind::Rpc)
            .with_message(format!("{method}: {}", fault.message))
            .with_status(i32::try_from(fault.code).unwrap_or(i32::MIN)));
    }
    envelope.result.ok_or_else(|| {
        Error::new(ErrorKind::Rpc).with_message(format!("{method} response has no result"))
    })
}

/// aria2 answers fault code 1 with "GID … is not found" (tellStatus) or
/// "Active Download not found for GID#…" (remove) once a download is gone.
fn is_missing_download(err: &Error) -> bool {
    err.kind() == ErrorKind::Rpc
        && err.status() == Some(1)
        && err.message().is_some_and(|message| message.contains("not found"))
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, method: &str) -> RpcResult<T> {
    serde_json::from_value(value).map_err(|err| {
        Error::new(ErrorKind::Rpc)
            .with_message(format!("unexpected {method} result shape"))
            .with_source(err)
    })
}

pub struct RpcEngine {
    client: RpcClient,
    poll_interval: Duration,
}

impl RpcEngine {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            client: RpcClient::new(&config),
            poll_interval: config.poll_interval,
        }
    }

    pub fn from_env() -> RpcResult<Self> {
        RpcConfig::from_env().map(Self::new)
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }
}

impl Engine for RpcEngine {
    type Session = RpcSession;

    /// The daemon owns its global state; "init" means it answers.
    fn library_init(&self) -> Status {
        match self.client.get_version() {
            Ok(version) => {
                tracing::debug!(
                    version = %version.version,
                    url = %self.client.url(),
                    "aria2 rpc reachable"
                );
                Status::OK
            }
            Err(err) => {
                tracing::warn!(error = %err, url = %self.client.url(), "aria2 rpc unreachable");
                Status(-1)
            }
        }
    }

    fn library_deinit(&self) -> Status {
        Status::OK
    }

    fn session_new(&self, options: &Options, config: NativeConfig) -> RpcResult<RpcSession> {
        if !options.is_empty() {
            self.client
                .call("aria2.changeGlobalOption", vec![options.to_json()])?;
        }
        let signals = if config.use_signal_handler {
            register_signals(&config.shutdown)?
        } else {
            Vec::new()
        };
        Ok(RpcSession {
            client: self.client.clone(),
            dispatcher: config.dispatcher,
            stop: config.shutdown,
            keep_running: config.keep_running,
            poll_interval: self.poll_interval,
            tracked: Vec::new(),
            shutdown_sent: None,
            signals,
        })
    }
}

fn register_signals(shutdown: &ShutdownHandle) -> RpcResult<Vec<signal_hook::SigId>> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    let flag = shutdown.signal_flag();
    let mut ids = Vec::new();
    for signal in [SIGINT, SIGTERM] {
        // A second signal while shutdown is pending exits the process.
        let registered =
            signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(&flag))
                .and_then(|first| {
                    ids.push(first);
                    signal_hook::flag::register(signal, Arc::clone(&flag))
                });
        match registered {
            Ok(id) => ids.push(id),
            Err(err) => {
                for id in ids {
                    signal_hook::low_level::unregister(id);
                }
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to install signal handlers")
                    .with_source(err));
            }
        }
    }
    Ok(ids)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Waiting,
    Active,
    Seeding,
    Paused,
    Done,
}

#[derive(Debug)]
struct Tracked {
    gid: Gid,
    phase: Phase,
}

/// Maps an observed aria2 status onto the next phase and the event it implies.
fn transition(phase: Phase, reply: &StatusReply) -> (Phase, Option<DownloadEvent>) {
    match (phase, reply.status.as_str()) {
        (Phase::Done, _) => (Phase::Done, None),
        (_, "complete") => (Phase::Done, Some(DownloadEvent::Complete)),
        (_, "error") => (Phase::Done, Some(DownloadEvent::Error)),
        (_, "removed") => (Phase::Done, Some(DownloadEvent::Stop)),
        (Phase::Paused, "paused") => (Phase::Paused, None),
        (_, "paused") => (Phase::Paused, Some(DownloadEvent::Pause)),
        (Phase::Seeding, "active") => (Phase::Seeding, None),
        (_, "active") if reply.seeder.as_deref() == Some("true") => {
            (Phase::Seeding, Some(DownloadEvent::BtComplete))
        }
        (Phase::Active, "active") => (Phase::Active, None),
        (_, "active") => (Phase::Active, Some(DownloadEvent::Start)),
        (_, "waiting") => (Phase::Waiting, None),
        (phase, other) => {
            tracing::debug!(status = other, "unknown aria2 status");
            (phase, None)
        }
    }
}

pub struct RpcSession {
    client: RpcClient,
    dispatcher: Arc<Dispatcher>,
    stop: ShutdownHandle,
    keep_running: bool,
    poll_interval: Duration,
    tracked: Vec<Tracked>,
    shutdown_sent: Option<bool>,
    signals: Vec<signal_hook::SigId>,
}

impl RpcSession {
    fn unfinished(&self) -> impl Iterator<Item = &Tracked> {
        self.tracked.iter().filter(|entry| entry.phase != Phase::Done)
    }

    fn poll(&mut self) -> RpcResult<()> {
        for index in 0..self.tracked.len() {
            let (gid, phase) = {
                let entry = &self.tracked[index];
                (entry.gid, entry.phase)
            };
            if phase == Phase::Done {
                continue;
            }
            let (next, event) = match self.client.tell_status(gid) {
                Ok(reply) => {
                    if reply.status == "error" {
                        tracing::warn!(
                            %gid,
                            code = reply.error_code.as_deref().unwrap_or(""),
                            message = reply.error_message.as_deref().unwrap_or(""),
                            "download failed"
                        );
                    }
                    transition(phase, &reply)
                }
                // The daemon purged the result; it is gone either way.
                Err(err) if is_missing_download(&err) => {
                    tracing::warn!(%gid, error = %err, "download no longer known to aria2");
                    (Phase::Done, Some(DownloadEvent::Stop))
                }
                Err(err) => return Err(err),
            };
            self.tracked[index].phase = next;
            if let Some(event) = event {
                self.dispatcher.dispatch(event, gid);
            }
        }
        Ok(())
    }

    fn remove_unfinished(&self, force: bool) -> usize {
        let mut failures = 0;
        for entry in self.unfinished() {
            match self.client.remove(entry.gid, force) {
                Ok(()) => {}
                // Finished or purged since the last poll; nothing left to remove.
                Err(err) if is_missing_download(&err) => {
                    tracing::debug!(gid = %entry.gid, error = %err, "download already gone");
                }
                Err(err) => {
                    tracing::warn!(gid = %entry.gid, error = %err, "failed to remove download");
                    failures += 1;
                }
            }
        }
        failures
    }
}

impl EngineSession for RpcSession {
    fn add_uri(&mut self, uris: &[String], options: &Options) -> RpcResult<Gid> {
        let gid = self.client.add_uri(uris, options)?;
        self.tracked.push(Tracked {
            gid,
            phase: Phase::Waiting,
        });
        Ok(gid)
    }

    fn run(&mut self, mode: RunMode) -> RpcResult<RunState> {
        loop {
            if self.stop.is_requested() {
                let force = self.stop.is_forced();
                self.shutdown(force)?;
            }
            self.poll()?;

            let pending = self.unfinished().next().is_some();
            let idling = self.keep_running && self.shutdown_sent.is_none();
            let state = if pending || idling {
                RunState::Pending
            } else {
                RunState::Finished
            };
            if state == RunState::Finished || mode == RunMode::Once {
                return Ok(state);
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn shutdown(&mut self, force: bool) -> RpcResult<()> {
        match self.shutdown_sent {
            Some(true) => return Ok(()),
            Some(false) if !force => return Ok(()),
            _ => {}
        }
        self.shutdown_sent = Some(force);
        tracing::debug!(session = %self.dispatcher.session(), force, "shutting down session");
        self.remove_unfinished(force);
        Ok(())
    }

    fn finish(&mut self) -> Status {
        for id in self.signals.drain(..) {
            signal_hook::low_level::unregister(id);
        }
        // Deliver terminal events that landed after the last poll.
        if let Err(err) = self.poll() {
            tracing::warn!(
                session = %self.dispatcher.session(),
                error = %err,
                "final poll failed"
            );
        }
        if self.remove_unfinished(true) > 0 {
            return Status(-1);
        }
        Status::OK
    }
}
