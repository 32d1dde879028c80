//! # EDV Access Remote
//!
//! Clients for the services an EDV deployment depends on: the capability
//! registry, the key-management service, the vault itself and the issuer
//! instance, registration and issuance routes.
//!
//! ## Overview
//!
//! Each collaborator is an async trait with an HTTP client and, where tests
//! and offline tooling need one, an in-process implementation enforcing the
//! same contract:
//!
//! | Concern | Trait | HTTP | In-process |
//! |---------|-------|------|------------|
//! | zcap registry | [`CapabilityRegistry`] | [`HttpRegistry`] | [`MemoryRegistry`] |
//! | key management | [`KeyManagement`] | [`HttpKms`] | [`LocalKms`] |
//! | vault | [`EdvStore`](edv_access_store::EdvStore) | [`HttpEdv`] | `MemoryEdv`, `SqliteEdv` |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use edv_access_remote::{CapabilityRegistry, HttpRegistry, ServiceConfig};
//!
//! async fn example() -> edv_access_remote::Result<()> {
//!     let registry = HttpRegistry::new(&ServiceConfig::new("https://issuer.example"))?;
//!     let zcaps = registry.get_all("urn:key:ed25519:00").await?;
//!     println!("{} capabilities", zcaps.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Notes
//!
//! - Invocations travel in the `capability-invocation` header as hex CBOR
//! - Error bodies `{type, message}` surface as `"type: message"`
//! - A 404 on lookups and deletes is a soft miss where the API says so

pub mod config;
pub mod edv;
pub mod error;
pub mod http;
pub mod instances;
pub mod issuer;
pub mod join;
pub mod kms;
pub mod registry;

pub use config::ServiceConfig;
pub use edv::HttpEdv;
pub use error::{error_for_status, RemoteError, Result};
pub use http::{decode_invocation, encode_invocation, INVOCATION_HEADER};
pub use instances::{Instance, InstanceService, Registration, RegistrationService};
pub use issuer::{IssueRequest, IssuerService};
pub use join::join_bounded;
pub use kms::{HttpKms, KeyDescription, KeyManagement, KeystoreConfig, LocalKms};
pub use registry::{CapabilityRegistry, HttpRegistry, MemoryRegistry};
