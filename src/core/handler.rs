//! Purpose: Per-session event handling capability and the diagnostic marker handler.
//! Exports: `EventHandler`, `handler_fn`, `EventContext`, `SessionId`, `UserData`, `DiagnosticHandler`, `Dispatcher`, `diagnostic_marker`.
//! Role: Bridges engine callbacks (any thread) to the handler registered at session launch.
//! Invariants: Handlers are `Send + Sync`; engines may call them from their own threads.
//! Invariants: `DiagnosticHandler` writes exactly one marker per Complete/Error and nothing otherwise.
//! Invariants: A panicking handler never unwinds into the engine; dispatch still reports "continue".
use std::any::Any;
use std::fmt;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::engine::ShutdownHandle;
use crate::core::event::{DownloadEvent, Gid};

/// Opaque caller context forwarded to handlers uninterpreted.
pub type UserData = Option<Arc<dyn Any + Send + Sync>>;

/// Process-unique id assigned to each launched session.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

pub struct EventContext<'a> {
    session: SessionId,
    user_data: &'a UserData,
    shutdown: &'a ShutdownHandle,
}

impl EventContext<'_> {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn user_data(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.user_data.as_deref()
    }

    /// Typed view of the user data, when it was set with a `T`.
    pub fn user_data_as<T: Any>(&self) -> Option<&T> {
        self.user_data()?.downcast_ref::<T>()
    }

    /// Lets a handler stop its own session (e.g. after the last completion).
    pub fn shutdown(&self) -> &ShutdownHandle {
        self.shutdown
    }
}

pub trait EventHandler: Send + Sync + 'static {
    fn on_event(&self, ctx: &EventContext<'_>, event: DownloadEvent, gid: Gid);
}

impl<F> EventHandler for F
where
    F: Fn(&EventContext<'_>, DownloadEvent, Gid) + Send + Sync + 'static,
{
    fn on_event(&self, ctx: &EventContext<'_>, event: DownloadEvent, gid: Gid) {
        self(ctx, event, gid)
    }
}

/// Pins a closure to the handler signature so its arguments need no annotations.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&EventContext<'_>, DownloadEvent, Gid) + Send + Sync + 'static,
{
    f
}

/// Owned by a session; the only thing engines hold to deliver events.
pub struct Dispatcher {
    session: SessionId,
    user_data: UserData,
    shutdown: ShutdownHandle,
    handler: Box<dyn EventHandler>,
}

impl Dispatcher {
    pub fn new(
        session: SessionId,
        user_data: UserData,
        shutdown: ShutdownHandle,
        handler: Box<dyn EventHandler>,
    ) -> Self {
        Self {
            session,
            user_data,
            shutdown,
            handler,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Delivers one event; the return value is the engine-facing "continue" code.
    pub fn dispatch(&self, event: DownloadEvent, gid: Gid) -> i32 {
        tracing::debug!(session = %self.session, %gid, %event, "download event");
        let ctx = EventContext {
            session: self.session,
            user_data: &self.user_data,
            shutdown: &self.shutdown,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.on_event(&ctx, event, gid);
        }));
        if outcome.is_err() {
            tracing::warn!(session = %self.session, %gid, %event, "event handler panicked");
        }
        0
    }

    /// Entry point for raw engine event numbers; unknown codes are ignored.
    pub fn dispatch_code(&self, code: i32, gid: u64) -> i32 {
        match DownloadEvent::from_code(code) {
            Some(event) => self.dispatch(event, Gid::new(gid)),
            None => {
                tracing::debug!(session = %self.session, code, "ignoring unknown event code");
                0
            }
        }
    }
}

/// The marker written for an event, if any.
pub fn diagnostic_marker(event: DownloadEvent) -> Option<&'static str> {
    match event {
        DownloadEvent::Complete => Some("COMPLETE"),
        DownloadEvent::Error => Some("ERROR"),
        _ => None,
    }
}

/// Writes `COMPLETE` / `ERROR` markers (no gid, no newline) and ignores other events.
pub struct DiagnosticHandler<W = io::Stderr> {
    out: Mutex<W>,
}

impl DiagnosticHandler<io::Stderr> {
    pub fn stderr() -> Self {
        Self::with_writer(io::stderr())
    }
}

impl Default for DiagnosticHandler<io::Stderr> {
    fn default() -> Self {
        Self::stderr()
    }
}

impl<W: Write + Send + 'static> DiagnosticHandler<W> {
    pub fn with_writer(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send + 'static> EventHandler for DiagnosticHandler<W> {
    fn on_event(&self, _ctx: &EventContext<'_>, event: DownloadEvent, _gid: Gid) {
        let Some(marker) = diagnostic_marker(event) else {
            return;
        };
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = out.write_all(marker.as_bytes());
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::{DiagnosticHandler, Dispatcher, SessionId, UserData, handler_fn};
    use crate::core::engine::ShutdownHandle;
    use crate::core::event::{DownloadEvent, Gid};
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn dispatcher(handler: impl super::EventHandler, user_data: UserData) -> Dispatcher {
        Dispatcher::new(
            SessionId::next(),
            user_data,
            ShutdownHandle::new(),
            Box::new(handler),
        )
    }

    #[test]
    fn markers_only_for_complete_and_error() {
        let buf = SharedBuf::default();
        let dispatcher = dispatcher(DiagnosticHandler::with_writer(buf.clone()), None);

        assert_eq!(dispatcher.dispatch(DownloadEvent::Start, Gid::new(1)), 0);
        assert_eq!(buf.text(), "");
        dispatcher.dispatch(DownloadEvent::Complete, Gid::new(1));
        assert_eq!(buf.text(), "COMPLETE");
        dispatcher.dispatch(DownloadEvent::Pause, Gid::new(2));
        dispatcher.dispatch(DownloadEvent::Stop, Gid::new(2));
        dispatcher.dispatch(DownloadEvent::BtComplete, Gid::new(2));
        assert_eq!(buf.text(), "COMPLETE");
        dispatcher.dispatch(DownloadEvent::Error, Gid::new(2));
        assert_eq!(buf.text(), "COMPLETEERROR");
    }

    #[test]
    fn unknown_codes_are_ignored() {
        let buf = SharedBuf::default();
        let dispatcher = dispatcher(DiagnosticHandler::with_writer(buf.clone()), None);
        assert_eq!(dispatcher.dispatch_code(42, 7), 0);
        assert_eq!(dispatcher.dispatch_code(4, 7), 0);
        assert_eq!(buf.text(), "COMPLETE");
    }

    #[test]
    fn context_exposes_session_and_user_data() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let user_data: UserData = Some(Arc::new(String::from("ctx")));
        let dispatcher = dispatcher(
            handler_fn(move |ctx, event, gid| {
                let label = ctx.user_data_as::<String>().cloned().unwrap_or_default();
                sink.lock().unwrap().push((ctx.session(), label, event, gid));
            }),
            user_data,
        );

        dispatcher.dispatch(DownloadEvent::Complete, Gid::new(9));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, dispatcher.session());
        assert_eq!(seen[0].1, "ctx");
        assert_eq!(seen[0].2, DownloadEvent::Complete);
        assert_eq!(seen[0].3, Gid::new(9));
    }

    #[test]
    fn panicking_handler_still_continues() {
        let dispatcher = dispatcher(handler_fn(|_, _, _| panic!("boom")), None);
        assert_eq!(dispatcher.dispatch(DownloadEvent::Error, Gid::new(3)), 0);
    }

    #[test]
    fn handler_can_request_shutdown() {
        let shutdown = ShutdownHandle::new();
        let dispatcher = Dispatcher::new(
            SessionId::next(),
            None,
            shutdown.clone(),
            Box::new(handler_fn(|ctx, _, _| ctx.shutdown().request(false))),
        );
        dispatcher.dispatch(DownloadEvent::Complete, Gid::new(1));
        assert!(shutdown.is_requested());
    }
}
