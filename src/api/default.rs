//! Purpose: Resolve the process-wide default engine used by the C ABI and the CLI.
//! Exports: `DefaultEngine`, `default_engine`.
//! Invariants: Built once per process; RPC settings come from the environment.
use std::sync::OnceLock;

use crate::core::error::Error;

#[cfg(feature = "libaria2")]
pub type DefaultEngine = crate::core::aria2::NativeEngine;
#[cfg(not(feature = "libaria2"))]
pub type DefaultEngine = crate::core::rpc::RpcEngine;

static DEFAULT_ENGINE: OnceLock<DefaultEngine> = OnceLock::new();

pub fn default_engine() -> Result<&'static DefaultEngine, Error> {
    if let Some(engine) = DEFAULT_ENGINE.get() {
        return Ok(engine);
    }
    let engine = build()?;
    Ok(DEFAULT_ENGINE.get_or_init(|| engine))
}

#[cfg(feature = "libaria2")]
fn build() -> Result<DefaultEngine, Error> {
    Ok(crate::core::aria2::NativeEngine::new())
}

#[cfg(not(feature = "libaria2"))]
fn build() -> Result<DefaultEngine, Error> {
    crate::core::rpc::RpcEngine::from_env()
}
