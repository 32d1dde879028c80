//! # EDV Access Testkit
//!
//! Testing utilities for EDV access.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an issuer instance provisioned over a local KMS, an
//!   in-memory registry and an in-memory (or SQLite) configuration vault
//! - **FlakyStore**: a store wrapper that injects write conflicts and counts
//!   the calls reaching the vault
//! - **CannedServer**: a local HTTP server replaying fixed responses, for
//!   exercising the HTTP clients' status handling
//! - **Generators**: proptest strategies for roles, actions, capabilities
//!   and collection items
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use edv_access_testkit::fixtures::InstanceFixture;
//!
//! async fn example() {
//!     let fx = InstanceFixture::new().await;
//!     let users = fx
//!         .access
//!         .collection("User", fx.store.clone(), &fx.admin, None)
//!         .await
//!         .unwrap();
//!
//!     // The next update is rejected once and retried.
//!     fx.store.conflict_next(1);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use edv_access_testkit::generators::role_set;
//!
//! proptest! {
//!     #[test]
//!     fn revocation_matches_plan(roles in role_set()) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod http;

pub use fixtures::{
    fast_retry, init_tracing, instance_grants, item, FlakyStore, InstanceFixture, EDV_URL,
    INSTANCE_ID, KMS_URL,
};
pub use http::{CannedResponse, CannedServer, RecordedRequest};
pub use generators::{action_set, content_type, fields, item_id, keypair, role_set};
