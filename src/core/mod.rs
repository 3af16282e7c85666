// Core modules: engine seam, lifecycle, sessions, events and the two backends.
#[cfg(feature = "libaria2")]
pub mod aria2;
pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod library;
pub mod options;
pub mod rpc;
pub mod session;
