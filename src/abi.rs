//! Purpose: C ABI bridge for non-Rust hosts (libarialink).
//! Exports: C-callable lifecycle, download/session functions and error helpers.
//! Role: Stable ABI surface over `api` using the process default engine.
//! Invariants: `arl_init`/`arl_deinit` return engine status codes unmodified.
//! Invariants: Sessions are opaque handles owned by the caller until `arl_session_free`.
//! Invariants: A null callback selects the COMPLETE/ERROR stderr markers.
//! Invariants: `user_data` is forwarded uninterpreted and must outlive the session.
#![allow(non_camel_case_types, clippy::result_large_err)]

use libc::{c_char, c_void};
use std::ffi::{CStr, CString};
use std::ptr;

use crate::api::{
    DefaultEngine, DiagnosticHandler, DownloadEvent, Engine, Error, ErrorKind, EventContext,
    EventHandler, Gid, Options, RunMode, RunState, Session, SessionConfig, default_engine,
};

pub type arl_event_callback =
    Option<unsafe extern "C" fn(event: i32, gid: u64, user_data: *mut c_void) -> i32>;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct arl_config {
    pub keep_running: u8,
    pub use_signal_handler: u8,
    pub user_data: *mut c_void,
    pub callback: arl_event_callback,
}

pub struct arl_session {
    session: Session<<DefaultEngine as Engine>::Session>,
}

#[repr(C)]
pub struct arl_error {
    pub kind: i32,
    pub status: i32,
    pub has_status: u8,
    pub message: *mut c_char,
}

pub const ARL_RUN_DEFAULT: i32 = 0;
pub const ARL_RUN_ONCE: i32 = 1;

#[derive(Clone, Copy)]
struct HostPtr(*mut c_void);

// The host promises the pointer stays valid and usable from engine threads.
unsafe impl Send for HostPtr {}
unsafe impl Sync for HostPtr {}

/// Forwards events to the host callback; its return value is ignored.
struct CallbackHandler {
    callback: unsafe extern "C" fn(event: i32, gid: u64, user_data: *mut c_void) -> i32,
    user_data: HostPtr,
}

impl EventHandler for CallbackHandler {
    fn on_event(&self, _ctx: &EventContext<'_>, event: DownloadEvent, gid: Gid) {
        let _ = unsafe { (self.callback)(event.code(), gid.get(), self.user_data.0) };
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn arl_init() -> i32 {
    match default_engine() {
        Ok(engine) => crate::api::init(engine).code(),
        Err(err) => {
            tracing::warn!(error = %err, "no default engine");
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn arl_deinit() -> i32 {
    match default_engine() {
        Ok(engine) => crate::api::deinit(engine).code(),
        Err(err) => {
            tracing::warn!(error = %err, "no default engine");
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn arl_download(
    config: arl_config,
    out_session: *mut *mut arl_session,
    out_err: *mut *mut arl_error,
) -> i32 {
    if out_session.is_null() {
        return fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("out_session is null"),
        );
    }
    let engine = match default_engine() {
        Ok(engine) => engine,
        Err(err) => return fail(out_err, err),
    };
    let session_config = SessionConfig::new()
        .keep_running(config.keep_running != 0)
        .use_signal_handler(config.use_signal_handler != 0);
    let launched = match config.callback {
        Some(callback) => crate::api::download(
            engine,
            session_config,
            CallbackHandler {
                callback,
                user_data: HostPtr(config.user_data),
            },
        ),
        None => crate::api::download(engine, session_config, DiagnosticHandler::stderr()),
    };
    let session = match launched {
        Ok(session) => session,
        Err(err) => return fail(out_err, err),
    };
    let handle = Box::new(arl_session { session });
    unsafe {
        *out_session = Box::into_raw(handle);
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn arl_session_add_uri(
    session: *mut arl_session,
    uri: *const c_char,
    out_gid: *mut u64,
    out_err: *mut *mut arl_error,
) -> i32 {
    let session = match borrow_session(session, out_err) {
        Ok(session) => session,
        Err(code) => return code,
    };
    let uri = match parse_c_str(uri, "uri") {
        Ok(uri) => uri,
        Err(err) => return fail(out_err, err),
    };
    match session.session.add_uri([uri], &Options::new()) {
        Ok(gid) => {
            if !out_gid.is_null() {
                unsafe {
                    *out_gid = gid.get();
                }
            }
            0
        }
        Err(err) => fail(out_err, err),
    }
}

/// Returns 0 when the engine finished, 1 when work remains, -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn arl_session_run(
    session: *mut arl_session,
    mode: i32,
    out_err: *mut *mut arl_error,
) -> i32 {
    let session = match borrow_session(session, out_err) {
        Ok(session) => session,
        Err(code) => return code,
    };
    let mode = match mode {
        ARL_RUN_DEFAULT => RunMode::Default,
        ARL_RUN_ONCE => RunMode::Once,
        other => {
            return fail(
                out_err,
                Error::new(ErrorKind::Usage).with_message(format!("unknown run mode {other}")),
            );
        }
    };
    match session.session.run(mode) {
        Ok(RunState::Finished) => 0,
        Ok(RunState::Pending) => 1,
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn arl_session_shutdown(
    session: *mut arl_session,
    force: u8,
    out_err: *mut *mut arl_error,
) -> i32 {
    let session = match borrow_session(session, out_err) {
        Ok(session) => session,
        Err(code) => return code,
    };
    match session.session.shutdown(force != 0) {
        Ok(()) => 0,
        Err(err) => fail(out_err, err),
    }
}

/// Finalizes and frees the session; returns the engine's finalize status.
#[unsafe(no_mangle)]
pub extern "C" fn arl_session_free(session: *mut arl_session) -> i32 {
    if session.is_null() {
        return -1;
    }
    let handle = unsafe { Box::from_raw(session) };
    handle.session.finish().code()
}

#[unsafe(no_mangle)]
pub extern "C" fn arl_error_free(err: *mut arl_error) {
    if err.is_null() {
        return;
    }
    unsafe {
        let err = Box::from_raw(err);
        if !err.message.is_null() {
            drop(CString::from_raw(err.message));
        }
    }
}

fn borrow_session<'a>(
    session: *mut arl_session,
    out_err: *mut *mut arl_error,
) -> Result<&'a mut arl_session, i32> {
    if session.is_null() {
        return Err(fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("session is null"),
        ));
    }
    Ok(unsafe { &mut *session })
}

fn parse_c_str(raw: *const c_char, what: &str) -> Result<String, Error> {
    if raw.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message(format!("{what} is null")));
    }
    unsafe { CStr::from_ptr(raw) }
        .to_str()
        .map(str::to_string)
        .map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("{what} is not valid UTF-8"))
                .with_source(err)
        })
}

fn fail(out_err: *mut *mut arl_error, err: Error) -> i32 {
    if out_err.is_null() {
        return -1;
    }
    let error = Box::new(arl_error {
        kind: error_kind_code(err.kind()),
        status: err.status().unwrap_or(0),
        has_status: u8::from(err.status().is_some()),
        message: to_c_string(&err.to_string()),
    });
    unsafe {
        *out_err = Box::into_raw(error);
    }
    -1
}

fn to_c_string(input: &str) -> *mut c_char {
    CString::new(input.replace('\0', " "))
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn error_kind_code(kind: ErrorKind) -> i32 {
    crate::api::to_exit_code(kind)
}
