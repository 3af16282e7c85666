//! Purpose: Binding layer over the aria2 download engine for Rust and C hosts.
//! Exports: `api` (stable Rust surface), `core` (engine seam + backends), `abi` (C ABI), `notice`.
//! Role: Library crate backing the `arialink` CLI and the `libarialink` cdylib/staticlib.
//! Invariants: The download engine is an external collaborator; nothing here schedules transfers.
//! Invariants: Hosts reach engine internals only through `api`.
pub mod abi;
pub mod api;
pub mod core;
pub mod notice;
