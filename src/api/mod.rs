//! Purpose: Define the stable public Rust API boundary for arialink.
//! Exports: Lifecycle, session, event and backend types needed by hosts, the C ABI and the CLI.
//! Role: Public, additive-only surface; hides internal module layout.
//! Invariants: This module is the only public path to the engine seam.
//! Invariants: `DefaultEngine` is the native backend when built with `libaria2`, else RPC.

mod default;

pub use crate::core::engine::{
    Engine, EngineSession, NativeConfig, RunMode, RunState, ShutdownHandle, Status,
};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::event::{DownloadEvent, Gid};
pub use crate::core::handler::{
    DiagnosticHandler, Dispatcher, EventContext, EventHandler, SessionId, UserData,
    diagnostic_marker, handler_fn,
};
pub use crate::core::library::{Library, deinit, init};
pub use crate::core::options::Options;
pub use crate::core::rpc::{EngineVersion, RpcClient, RpcConfig, RpcEngine, RpcSession};
pub use crate::core::session::{Session, SessionConfig, download};
pub use default::{DefaultEngine, default_engine};

#[cfg(feature = "libaria2")]
pub use crate::core::aria2::{NativeEngine, NativeSession};
