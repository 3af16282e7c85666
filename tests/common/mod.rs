//! Purpose: Shared test doubles for the engine seam.
//! Exports: `ScriptedEngine` (in-process fake engine), `FakeAria2` (loopback JSON-RPC server).
//! Role: Let integration tests exercise lifecycle, sessions and the RPC backend without aria2.
//! Invariants: Fakes record every call so tests assert on what crossed the seam.
//! Invariants: Loopback only; every wait in these helpers is bounded.
#![allow(dead_code)]

use arialink::api::{
    DownloadEvent, Engine, EngineSession, Error, ErrorKind, Gid, NativeConfig, Options, RunMode,
    RunState, Status,
};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeenConfig {
    pub keep_running: bool,
    pub use_signal_handler: bool,
    pub options: Vec<(String, String)>,
}

#[derive(Default)]
pub struct Journal {
    pub calls: Vec<String>,
    pub configs: Vec<SeenConfig>,
}

/// Engine double: URIs containing "fail" error out, everything else completes.
#[derive(Clone)]
pub struct ScriptedEngine {
    pub init_status: i32,
    pub deinit_status: i32,
    pub final_status: i32,
    pub refuse_sessions: bool,
    pub journal: Arc<Mutex<Journal>>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            init_status: 0,
            deinit_status: 0,
            final_status: 0,
            refuse_sessions: false,
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }
}

impl ScriptedEngine {
    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().unwrap().calls.clone()
    }

    pub fn configs(&self) -> Vec<SeenConfig> {
        self.journal.lock().unwrap().configs.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.journal.lock().unwrap().calls.push(call.into());
    }
}

impl Engine for ScriptedEngine {
    type Session = ScriptedSession;

    fn library_init(&self) -> Status {
        self.record("init");
        Status(self.init_status)
    }

    fn library_deinit(&self) -> Status {
        self.record("deinit");
        Status(self.deinit_status)
    }

    fn session_new(
        &self,
        options: &Options,
        config: NativeConfig,
    ) -> Result<ScriptedSession, Error> {
        self.record("session_new");
        self.journal.lock().unwrap().configs.push(SeenConfig {
            keep_running: config.keep_running,
            use_signal_handler: config.use_signal_handler,
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        if self.refuse_sessions {
            return Err(Error::new(ErrorKind::Engine)
                .with_message("sessionNew failed")
                .with_status(-1));
        }
        Ok(ScriptedSession {
            engine: self.clone(),
            config,
            queue: Vec::new(),
            next_gid: 1,
            stopped: false,
        })
    }
}

pub struct ScriptedSession {
    engine: ScriptedEngine,
    config: NativeConfig,
    queue: Vec<(Gid, bool)>,
    next_gid: u64,
    stopped: bool,
}

impl ScriptedSession {
    fn step(&mut self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        let (gid, fails) = self.queue.remove(0);
        self.config.dispatcher.dispatch(DownloadEvent::Start, gid);
        let outcome = if fails {
            DownloadEvent::Error
        } else {
            DownloadEvent::Complete
        };
        self.config.dispatcher.dispatch(outcome, gid);
        true
    }

    fn wants_more(&self) -> bool {
        !self.queue.is_empty() || (self.config.keep_running && !self.stopped)
    }
}

impl EngineSession for ScriptedSession {
    fn add_uri(&mut self, uris: &[String], _options: &Options) -> Result<Gid, Error> {
        self.engine.record(format!("add_uri {}", uris.join(" ")));
        let gid = Gid::new(self.next_gid);
        self.next_gid += 1;
        let fails = uris.iter().any(|uri| uri.contains("fail"));
        self.queue.push((gid, fails));
        Ok(gid)
    }

    fn run(&mut self, mode: RunMode) -> Result<RunState, Error> {
        loop {
            if self.config.shutdown.is_requested() {
                let force = self.config.shutdown.is_forced();
                self.shutdown(force)?;
            }
            if !self.step() && self.wants_more() {
                thread::sleep(Duration::from_millis(5));
            }
            let state = if self.wants_more() {
                RunState::Pending
            } else {
                RunState::Finished
            };
            if state == RunState::Finished || mode == RunMode::Once {
                return Ok(state);
            }
        }
    }

    fn shutdown(&mut self, force: bool) -> Result<(), Error> {
        if !self.stopped {
            self.engine.record(format!("shutdown force={force}"));
            for (gid, _) in self.queue.drain(..) {
                self.config.dispatcher.dispatch(DownloadEvent::Stop, gid);
            }
        }
        self.stopped = true;
        Ok(())
    }

    fn finish(&mut self) -> Status {
        self.engine.record("finish");
        Status(self.engine.final_status)
    }
}

/// Scripted aria2 download as seen through `aria2.tellStatus`.
#[derive(Clone, Debug)]
struct FakeDownload {
    statuses: Vec<&'static str>,
    polls: usize,
    removed: bool,
}

impl FakeDownload {
    fn current(&self) -> &'static str {
        if self.removed {
            return "removed";
        }
        let index = self.polls.min(self.statuses.len() - 1);
        self.statuses[index]
    }
}

#[derive(Default)]
struct FakeState {
    downloads: HashMap<String, FakeDownload>,
    next_gid: u64,
    requests: Vec<Value>,
}

#[derive(Clone)]
struct FakeRpc {
    state: Arc<Mutex<FakeState>>,
    token: Option<String>,
}

/// Loopback stand-in for `aria2c --enable-rpc`.
///
/// URIs containing "fail" go waiting -> error, "hang" stays active until removed,
/// "purge" is forgotten by the daemon after one poll, "broken" makes `tellStatus`
/// answer HTTP 500, anything else goes waiting -> active -> complete.
pub struct FakeAria2 {
    url: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeAria2 {
    pub fn start() -> Self {
        Self::start_with_secret(None)
    }

    pub fn start_with_secret(secret: Option<&str>) -> Self {
        let state = Arc::new(Mutex::new(FakeState {
            next_gid: 0x2089b05ecca3d000,
            ..FakeState::default()
        }));
        let rpc = FakeRpc {
            state: Arc::clone(&state),
            token: secret.map(|secret| format!("token:{secret}")),
        };
        let app = Router::new()
            .route("/jsonrpc", post(handle_rpc))
            .with_state(rpc);

        let (addr_tx, addr_rx) = mpsc::channel();
        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind");
                addr_tx.send(listener.local_addr().expect("addr")).expect("send addr");
                axum::serve(listener, app).await.expect("serve");
            });
        });
        let addr = addr_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("fake aria2 listening");
        Self {
            url: format!("http://{addr}/jsonrpc"),
            state,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn requests(&self) -> Vec<Value> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|req| req["method"].as_str().map(str::to_string))
            .collect()
    }
}

/// A port with nothing listening on it.
pub fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/jsonrpc")
}

async fn handle_rpc(
    State(rpc): State<FakeRpc>,
    Json(request): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let (status, reply) = respond(&request, &rpc.state, rpc.token.as_deref());
    (status, Json(reply))
}

fn respond(request: &Value, state: &Mutex<FakeState>, token: Option<&str>) -> (StatusCode, Value) {
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or("").to_string();
    let mut params: Vec<Value> = request["params"].as_array().cloned().unwrap_or_default();
    let mut state = state.lock().unwrap();
    state.requests.push(request.clone());

    if let Some(token) = token {
        if params.first().and_then(Value::as_str) != Some(token) {
            return fault(id, 1, "Unauthorized");
        }
        params.remove(0);
    }

    let result = match method.as_str() {
        "aria2.getVersion" => {
            json!({"version": "1.37.0", "enabledFeatures": ["HTTPS", "BitTorrent"]})
        }
        "aria2.changeGlobalOption" => json!("OK"),
        "aria2.addUri" => {
            let uri = params
                .first()
                .and_then(|uris| uris.get(0))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            if uri.contains("reject") {
                return fault(id, 1, "No URI to download.");
            }
            let statuses = if uri.contains("fail") {
                vec!["waiting", "error"]
            } else if uri.contains("hang") {
                vec!["active"]
            } else if uri.contains("purge") {
                vec!["waiting", "purged"]
            } else if uri.contains("broken") {
                vec!["broken"]
            } else {
                vec!["waiting", "active", "complete"]
            };
            state.next_gid += 1;
            let gid = format!("{:016x}", state.next_gid);
            state.downloads.insert(
                gid.clone(),
                FakeDownload {
                    statuses,
                    polls: 0,
                    removed: false,
                },
            );
            json!(gid)
        }
        "aria2.tellStatus" => {
            let gid = params.first().and_then(Value::as_str).unwrap_or("").to_string();
            let not_found = format!("GID {gid} is not found");
            let Some(download) = state.downloads.get_mut(&gid) else {
                return fault(id, 1, &not_found);
            };
            let status = download.current();
            download.polls += 1;
            match status {
                "purged" => return fault(id, 1, &not_found),
                "broken" => {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        json!({"id": id, "jsonrpc": "2.0",
                               "error": {"code": 1, "message": "Internal error"}}),
                    );
                }
                _ => {}
            }
            let mut reply = json!({"gid": gid, "status": status});
            if status == "error" {
                reply["errorCode"] = json!("3");
                reply["errorMessage"] = json!("Resource not found");
            }
            reply
        }
        "aria2.remove" | "aria2.forceRemove" => {
            let gid = params.first().and_then(Value::as_str).unwrap_or("").to_string();
            match state.downloads.get_mut(&gid) {
                Some(download) if matches!(download.current(), "active" | "waiting" | "paused") => {
                    download.removed = true;
                    json!(gid)
                }
                _ => return fault(id, 1, &format!("Active Download not found for GID#{gid}")),
            }
        }
        _ => return fault(id, 1, "Method not found"),
    };
    (StatusCode::OK, json!({"id": id, "jsonrpc": "2.0", "result": result}))
}

fn fault(id: Value, code: i64, message: &str) -> (StatusCode, Value) {
    (
        StatusCode::BAD_REQUEST,
        json!({"id": id, "jsonrpc": "2.0", "error": {"code": code, "message": message}}),
    )
}
