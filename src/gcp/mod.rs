//! GCP provider
//!
//! Everything that knows about Google Cloud: authentication, the REST client,
//! region discovery and the catalog of describable resource types.
//!
//! # Module Structure
//!
//! - [`auth`] - Credentials and bearer tokens
//! - [`client`] - Project-bound client, scoped per region
//! - [`http`] - HTTP utilities and Google error envelopes
//! - [`fetcher`] - Paginated list responses
//! - [`regions`] - Region discovery
//! - [`catalog`] - Declarative resource types and their describers
//! - [`provider`] - [`crate::provider::Provider`] implementation
//!
//! # Example
//!
//! ```ignore
//! let registry = describer::gcp::catalog::registry()?;
//! let provider = GcpProvider::new(GcpHttpClient::new("describer")?, Endpoints::default(), "us-central1");
//! let orchestrator = Orchestrator::new(provider, registry);
//! ```

pub mod auth;
pub mod catalog;
pub mod client;
pub mod fetcher;
pub mod http;
pub mod provider;
pub mod regions;

pub use client::{Endpoints, GcpClient};
pub use provider::GcpProvider;
