//! Purpose: Backend seam between the binding and the external download engine.
//! Exports: `Engine`, `EngineSession`, `NativeConfig`, `RunMode`, `RunState`, `ShutdownHandle`, `Status`.
//! Role: Everything engine-specific (libaria2, aria2c RPC, test doubles) sits behind these traits.
//! Invariants: Status codes cross this seam unmodified; 0 is the engine's OK.
//! Invariants: Shutdown requests are flags observed by `run` between iterations, never interrupts.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::error::Error;
use crate::core::event::Gid;
use crate::core::handler::Dispatcher;
use crate::core::options::Options;

/// Raw engine status code, passed through untouched.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunMode {
    /// Block until the engine has nothing left to do (or shutdown, with keep-running).
    Default,
    /// Perform a single event-loop iteration.
    Once,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    Finished,
    Pending,
}

#[derive(Debug, Default)]
struct ShutdownFlags {
    requested: Arc<AtomicBool>,
    force: AtomicBool,
}

/// Cloneable, thread-safe shutdown request for one session.
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle {
    flags: Arc<ShutdownFlags>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, force: bool) {
        if force {
            self.flags.force.store(true, Ordering::SeqCst);
        }
        self.flags.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flags.requested.load(Ordering::SeqCst)
    }

    pub fn is_forced(&self) -> bool {
        self.flags.force.load(Ordering::SeqCst)
    }

    /// Flag shared with OS signal registrations (`signal_hook::flag`).
    pub(crate) fn signal_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flags.requested)
    }
}

/// The engine-facing half of `SessionConfig`, after launch bookkeeping.
pub struct NativeConfig {
    pub keep_running: bool,
    pub use_signal_handler: bool,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: ShutdownHandle,
}

pub trait Engine {
    type Session: EngineSession;

    fn library_init(&self) -> Status;
    fn library_deinit(&self) -> Status;
    fn session_new(&self, options: &Options, config: NativeConfig) -> Result<Self::Session, Error>;
}

pub trait EngineSession: Send {
    fn add_uri(&mut self, uris: &[String], options: &Options) -> Result<Gid, Error>;
    fn run(&mut self, mode: RunMode) -> Result<RunState, Error>;
    /// Ask the engine to wind down; `run` returns `Finished` once it has.
    fn shutdown(&mut self, force: bool) -> Result<(), Error>;
    fn finish(&mut self) -> Status;
}
