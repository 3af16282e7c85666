//! Purpose: Engine backend linking libaria2 in-process through the C++ shim.
//! Exports: `NativeEngine`, `NativeSession`.
//! Role: Closest mapping onto aria2's own session API (sessionNew/run/shutdown/sessionFinal).
//! Invariants: All FFI interaction is confined to this module + `sys`.
//! Invariants: The dispatcher handed to C outlives the native session (held here until final).
//! Invariants: `run` iterates with RUN_ONCE so shutdown flags are observed between iterations.
use libc::{c_char, c_int, c_void};
use std::ffi::CString;
use std::ptr;
use std::sync::Arc;

use crate::core::engine::{
    Engine, EngineSession, NativeConfig, RunMode, RunState, ShutdownHandle, Status,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::event::Gid;
use crate::core::handler::Dispatcher;
use crate::core::options::Options;

pub mod sys;

#[derive(Clone, Copy, Debug, Default)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for NativeEngine {
    type Session = NativeSession;

    fn library_init(&self) -> Status {
        Status(unsafe { sys::arialink_library_init() })
    }

    fn library_deinit(&self) -> Status {
        Status(unsafe { sys::arialink_library_deinit() })
    }

    fn session_new(&self, options: &Options, config: NativeConfig) -> Result<NativeSession, Error> {
        let pairs = CPairs::new(options)?;
        let user_data = Arc::as_ptr(&config.dispatcher) as *mut c_void;
        let raw = unsafe {
            sys::arialink_session_new(
                pairs.keys.as_ptr(),
                pairs.values.as_ptr(),
                pairs.len(),
                c_int::from(config.keep_running),
                c_int::from(config.use_signal_handler),
                Some(on_download_event),
                user_data,
            )
        };
        if raw.is_null() {
            return Err(Error::new(ErrorKind::Engine).with_message("aria2 sessionNew failed"));
        }
        Ok(NativeSession {
            raw,
            dispatcher: config.dispatcher,
            stop: config.shutdown,
            shutdown_sent: None,
        })
    }
}

unsafe extern "C" fn on_download_event(event: c_int, gid: u64, user_data: *mut c_void) -> c_int {
    if user_data.is_null() {
        return 0;
    }
    let dispatcher = unsafe { &*(user_data as *const Dispatcher) };
    dispatcher.dispatch_code(event, gid)
}

pub struct NativeSession {
    raw: *mut c_void,
    dispatcher: Arc<Dispatcher>,
    stop: ShutdownHandle,
    shutdown_sent: Option<bool>,
}

// aria2 sessions may move between threads; they must not be used from two at once,
// which `&mut self` on every operation guarantees.
unsafe impl Send for NativeSession {}

impl NativeSession {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.raw.is_null() {
            return Err(
                Error::new(ErrorKind::Usage).with_message("aria2 session already finalized")
            );
        }
        Ok(())
    }
}

impl EngineSession for NativeSession {
    fn add_uri(&mut self, uris: &[String], options: &Options) -> Result<Gid, Error> {
        self.ensure_open()?;
        let uri_list = CList::new(uris.iter().map(String::as_str))?;
        let pairs = CPairs::new(options)?;
        let mut gid: u64 = 0;
        let rv = unsafe {
            sys::arialink_add_uri(
                self.raw,
                uri_list.ptrs.as_ptr(),
                uri_list.ptrs.len(),
                pairs.keys.as_ptr(),
                pairs.values.as_ptr(),
                pairs.len(),
                &mut gid as *mut u64,
            )
        };
        if rv != 0 {
            return Err(Error::new(ErrorKind::Engine)
                .with_message("aria2 addUri failed")
                .with_status(rv));
        }
        Ok(Gid::new(gid))
    }

    fn run(&mut self, mode: RunMode) -> Result<RunState, Error> {
        self.ensure_open()?;
        loop {
            if self.stop.is_requested() {
                let force = self.stop.is_forced();
                self.shutdown(force)?;
            }
            let rv = unsafe { sys::arialink_run(self.raw, sys::RUN_ONCE) };
            if rv < 0 {
                return Err(Error::new(ErrorKind::Engine)
                    .with_message("aria2 run failed")
                    .with_status(rv));
            }
            if rv == 0 {
                return Ok(RunState::Finished);
            }
            if mode == RunMode::Once {
                return Ok(RunState::Pending);
            }
        }
    }

    fn shutdown(&mut self, force: bool) -> Result<(), Error> {
        self.ensure_open()?;
        match self.shutdown_sent {
            Some(true) => return Ok(()),
            Some(false) if !force => return Ok(()),
            _ => {}
        }
        let rv = unsafe { sys::arialink_shutdown(self.raw, c_int::from(force)) };
        if rv != 0 {
            return Err(Error::new(ErrorKind::Engine)
                .with_message("aria2 shutdown failed")
                .with_status(rv));
        }
        self.shutdown_sent = Some(force);
        tracing::debug!(session = %self.dispatcher.session(), force, "aria2 shutdown requested");
        Ok(())
    }

    fn finish(&mut self) -> Status {
        if self.raw.is_null() {
            return Status(-1);
        }
        let status = Status(unsafe { sys::arialink_session_final(self.raw) });
        self.raw = ptr::null_mut();
        status
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            let _ = self.finish();
        }
    }
}

struct CList {
    _owned: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CList {
    fn new<'a, I>(items: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let owned = items
            .into_iter()
            .map(|item| {
                CString::new(item).map_err(|err| {
                    Error::new(ErrorKind::Usage)
                        .with_message("argument contains NUL")
                        .with_source(err)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let ptrs = owned.iter().map(|item| item.as_ptr()).collect();
        Ok(Self {
            _owned: owned,
            ptrs,
        })
    }
}

struct CPairs {
    keys: Vec<*const c_char>,
    values: Vec<*const c_char>,
    _key_list: CList,
    _value_list: CList,
}

impl CPairs {
    fn new(options: &Options) -> Result<Self, Error> {
        let key_list = CList::new(options.iter().map(|(key, _)| key))?;
        let value_list = CList::new(options.iter().map(|(_, value)| value))?;
        Ok(Self {
            keys: key_list.ptrs.clone(),
            values: value_list.ptrs.clone(),
            _key_list: key_list,
            _value_list: value_list,
        })
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{CPairs, NativeEngine};
    use crate::core::engine::Engine;
    use crate::core::options::Options;

    #[test]
    fn pairs_are_parallel_arrays() {
        let options = Options::new().with("dir", "/tmp").with("split", "4");
        let pairs = CPairs::new(&options).expect("pairs");
        assert_eq!(pairs.len(), 2);
        let key = unsafe { std::ffi::CStr::from_ptr(pairs.keys[1]) };
        let value = unsafe { std::ffi::CStr::from_ptr(pairs.values[1]) };
        assert_eq!(key.to_str().unwrap(), "split");
        assert_eq!(value.to_str().unwrap(), "4");
    }

    #[test]
    fn nul_in_option_is_rejected() {
        let options = Options::new().with("dir", "/tmp\0x");
        assert!(CPairs::new(&options).is_err());
    }

    #[test]
    fn init_then_deinit_is_ok() {
        let engine = NativeEngine::new();
        assert!(engine.library_init().is_ok());
        assert!(engine.library_deinit().is_ok());
    }
}
