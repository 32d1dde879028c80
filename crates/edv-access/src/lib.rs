//! # EDV Access
//!
//! Capability-scoped access to encrypted documents held in an Encrypted
//! Data Vault service.
//!
//! ## Overview
//!
//! An application acts on behalf of accounts. Each account owns a seed from
//! which a controller key is derived; the controller holds a keystore in the
//! KMS with a key-agreement key (to seal documents) and an HMAC key (to
//! blind index terms). Every call to the vault, the KMS or the capability
//! registry carries a signed invocation of an authorization capability.
//!
//! - **Controller keys**: deterministic from `(seed, account id)`, keystore
//!   found or created on first use
//! - **Capability resolution**: lookup by `(referenceId, controller)`
//! - **Encrypted documents**: sealed content, blinded indexes, sequence
//!   versioning
//! - **Collections**: typed views keyed by `content.type`, with
//!   conflict-retrying updates
//! - **Delegation**: role-driven delegation and revocation of a user's
//!   capabilities, and sharing a vault together with its keys
//! - **Issuers**: registration and the encrypted configuration document of
//!   each registered issuer
//!
//! ## Key Types
//!
//! - [`VaultAccess`]: wires everything from one [`AccessConfig`]
//! - [`ControllerKeyProvider`] / [`ControllerIdentity`]
//! - [`CapabilityResolver`]
//! - [`EncryptedDocumentClient`]
//! - [`Collection`]
//! - [`CapabilityDelegationEngine`]
//! - [`IssuerConfigurations`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use edv_access::remote::{LocalKms, MemoryRegistry};
//! use edv_access::store::{MemoryEdv, VaultInfo};
//! use edv_access::{AccessConfig, Lookup, VaultAccess};
//! use serde_json::json;
//!
//! async fn example() -> edv_access::Result<()> {
//!     let access = VaultAccess::new(
//!         AccessConfig::default(),
//!         Arc::new(LocalKms::new("https://kms.example")),
//!         Arc::new(MemoryRegistry::new()),
//!     );
//!
//!     let account = access.create_account("acct-1", "seed").await?;
//!     let controller = access.controller(&account).await?;
//!     let vault = VaultInfo::new("z1", controller.id(), "https://edv.example");
//!     let store = Arc::new(MemoryEdv::new(vault));
//!
//!     let users = access.collection("User", store, &account, None).await?;
//!     users.create(json!({"id": "u-1", "type": "User"}), None).await?;
//!     let found = users.get(&Lookup::id("u-1")).await?;
//!     assert!(found.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `edv_access::core` - capabilities, invocations, documents, queries
//! - `edv_access::perms` - roles, delegation planning, sealing
//! - `edv_access::store` - the vault store trait and local stores
//! - `edv_access::remote` - HTTP services, KMS and registry

pub mod access;
pub mod authorization;
pub mod client;
pub mod collection;
pub mod config;
pub mod configuration;
pub mod controller;
pub mod delegation;
pub mod error;
pub mod resolver;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use edv_access_core as core;
pub use edv_access_perms as perms;
pub use edv_access_remote as remote;
pub use edv_access_store as store;

pub use access::{VaultAccess, VaultReferences};
pub use authorization::{
    instance_query, request_capabilities, AuthorizationQuery, AuthorizationRequester,
    CapabilityQuery, Presentation,
};
pub use client::{ClientParts, EncryptedDocumentClient, EDV_DOCUMENTS_TARGET_TYPE};
pub use collection::{Collection, Lookup, DEFAULT_INDEXES};
pub use config::{AccessConfig, RetryPolicy};
pub use configuration::{
    IssuerConfiguration, IssuerConfigurations, CONFIGURATION_REFERENCE_ID, CONFIGURATION_TYPE,
};
pub use controller::{Account, ControllerIdentity, ControllerKeyProvider, Hmac, KeyAgreementKey};
pub use delegation::{CapabilityDelegationEngine, RevocationFailure, RevocationReport};
pub use error::{AccessError, ErrorKind, Result};
pub use resolver::CapabilityResolver;
pub use retry::read_modify_write;

pub use edv_access_core::{Capability, Document, DocumentId, FindQuery, KeyKind, KeyRef, Keypair};
