//! Multi-scope cloud resource discovery
//!
//! A resource type is described by a single-scope function; [`resource::Dispatch`]
//! lifts it to run over every region of an account, sequentially or in
//! parallel, with per-scope failure isolation. The [`orchestrator`] resolves a
//! request into a session, an ordered scope list and a registered type. The
//! [`worker`] drives the orchestrator from a durable NATS JetStream queue.

pub mod config;
pub mod context;
pub mod error;
pub mod gcp;
pub mod orchestrator;
pub mod provider;
pub mod resource;
pub mod scope;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use error::{Error, Result};

/// Version injected at compile time via DESCRIBER_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("DESCRIBER_VERSION") {
    Some(v) => v,
    None => "dev",
};
