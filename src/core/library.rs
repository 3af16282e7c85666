//! Purpose: Process-wide engine setup/teardown.
//! Exports: `init`, `deinit`, `Library`.
//! Role: Library lifecycle manager; `Library` pairs init/deinit for Rust callers.
//! Invariants: Status codes are returned exactly as the engine produced them.
//! Invariants: `init`/`deinit` add no ordering guard; calling `deinit` first is the engine's business.
//! Invariants: `Library` runs teardown at most once.
use crate::core::engine::{Engine, Status};
use crate::core::error::{Error, ErrorKind};
use crate::core::handler::EventHandler;
use crate::core::options::Options;
use crate::core::session::{Session, SessionConfig};

pub fn init<E: Engine>(engine: &E) -> Status {
    let status = engine.library_init();
    tracing::debug!(%status, "library init");
    status
}

pub fn deinit<E: Engine>(engine: &E) -> Status {
    let status = engine.library_deinit();
    tracing::debug!(%status, "library deinit");
    status
}

/// Initialized engine; tears down on `deinit` or drop.
///
/// Sessions must be finished before the library is deinitialized.
pub struct Library<E: Engine> {
    engine: E,
    live: bool,
}

impl<E: Engine> Library<E> {
    pub fn init(engine: E) -> Result<Self, Error> {
        let status = init(&engine);
        if !status.is_ok() {
            return Err(Error::new(ErrorKind::Engine)
                .with_message("engine initialization failed")
                .with_status(status.code()));
        }
        Ok(Self { engine, live: true })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn download(
        &self,
        config: SessionConfig,
        handler: impl EventHandler,
    ) -> Result<Session<E::Session>, Error> {
        crate::core::session::download(&self.engine, config, handler)
    }

    pub fn launch(
        &self,
        options: &Options,
        config: SessionConfig,
        handler: impl EventHandler,
    ) -> Result<Session<E::Session>, Error> {
        Session::launch(&self.engine, options, config, handler)
    }

    pub fn deinit(mut self) -> Status {
        self.live = false;
        deinit(&self.engine)
    }
}

impl<E: Engine> Drop for Library<E> {
    fn drop(&mut self) {
        if self.live {
            self.live = false;
            let status = deinit(&self.engine);
            if !status.is_ok() {
                tracing::warn!(%status, "library deinit on drop failed");
            }
        }
    }
}
