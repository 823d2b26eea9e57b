//! Hand-written SQL script handling: discovery and idempotency enhancement

pub mod discovery;
pub mod enhancer;

pub use discovery::{SqlScriptDiscovery, COMPILED_PREFIX};
pub use enhancer::SqlScriptEnhancer;
