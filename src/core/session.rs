//! Purpose: Launch engine sessions from host configuration and own the resulting handle.
//! Exports: `SessionConfig`, `Session`, `download`.
//! Role: Session launcher + event bridge registration; the handle stays with the caller.
//! Invariants: Launch copies keep_running/use_signal_handler/user_data into the native config verbatim.
//! Invariants: `download` starts with empty initial options.
//! Invariants: A session is finalized exactly once (explicit `finish` or drop).
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::core::engine::{
    Engine, EngineSession, NativeConfig, RunMode, RunState, ShutdownHandle, Status,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::event::Gid;
use crate::core::handler::{Dispatcher, EventHandler, SessionId, UserData};
use crate::core::options::Options;

/// Host-supplied session configuration.
#[derive(Clone)]
pub struct SessionConfig {
    /// Keep the engine loop alive after all downloads finish (until shutdown).
    pub keep_running: bool,
    /// Let the engine install its own SIGINT/SIGTERM handling.
    pub use_signal_handler: bool,
    /// Forwarded uninterpreted to the event handler.
    pub user_data: UserData,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep_running(mut self, keep_running: bool) -> Self {
        self.keep_running = keep_running;
        self
    }

    pub fn use_signal_handler(mut self, use_signal_handler: bool) -> Self {
        self.use_signal_handler = use_signal_handler;
        self
    }

    pub fn user_data<T: Any + Send + Sync>(mut self, user_data: T) -> Self {
        self.user_data = Some(Arc::new(user_data));
        self
    }
}

// Mirrors aria2's own SessionConfig defaults.
impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_running: false,
            use_signal_handler: true,
            user_data: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("keep_running", &self.keep_running)
            .field("use_signal_handler", &self.use_signal_handler)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

pub struct Session<S: EngineSession> {
    id: SessionId,
    inner: S,
    shutdown: ShutdownHandle,
    keep_running: bool,
    finished: bool,
}

impl<S: EngineSession> Session<S> {
    pub fn launch<E>(
        engine: &E,
        options: &Options,
        config: SessionConfig,
        handler: impl EventHandler,
    ) -> Result<Self, Error>
    where
        E: Engine<Session = S>,
    {
        let id = SessionId::next();
        let shutdown = ShutdownHandle::new();
        let dispatcher = Arc::new(Dispatcher::new(
            id,
            config.user_data,
            shutdown.clone(),
            Box::new(handler),
        ));
        let native = NativeConfig {
            keep_running: config.keep_running,
            use_signal_handler: config.use_signal_handler,
            dispatcher,
            shutdown: shutdown.clone(),
        };
        let inner = engine.session_new(options, native)?;
        tracing::debug!(
            session = %id,
            keep_running = config.keep_running,
            use_signal_handler = config.use_signal_handler,
            options = options.len(),
            "session started"
        );
        Ok(Self {
            id,
            inner,
            shutdown,
            keep_running: config.keep_running,
            finished: false,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn keeps_running(&self) -> bool {
        self.keep_running
    }

    pub fn add_uri<I, U>(&mut self, uris: I, options: &Options) -> Result<Gid, Error>
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        self.ensure_live()?;
        let uris: Vec<String> = uris.into_iter().map(Into::into).collect();
        if uris.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("add_uri needs at least one uri"));
        }
        let gid = self.inner.add_uri(&uris, options)?;
        tracing::debug!(session = %self.id, %gid, uris = uris.len(), "download added");
        Ok(gid)
    }

    pub fn run(&mut self, mode: RunMode) -> Result<RunState, Error> {
        self.ensure_live()?;
        self.inner.run(mode)
    }

    pub fn shutdown(&mut self, force: bool) -> Result<(), Error> {
        self.ensure_live()?;
        self.shutdown.request(force);
        self.inner.shutdown(force)
    }

    /// Handle for stopping this session from another thread or a handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn finish(mut self) -> Status {
        self.finalize()
    }

    fn finalize(&mut self) -> Status {
        self.finished = true;
        let status = self.inner.finish();
        tracing::debug!(session = %self.id, %status, "session finalized");
        status
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.finished {
            return Err(Error::new(ErrorKind::Usage).with_message("session already finalized"));
        }
        Ok(())
    }
}

impl<S: EngineSession> Drop for Session<S> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finalize();
        }
    }
}

/// Starts a session with empty initial options.
pub fn download<E: Engine>(
    engine: &E,
    config: SessionConfig,
    handler: impl EventHandler,
) -> Result<Session<E::Session>, Error> {
    Session::launch(engine, &Options::new(), config, handler)
}
