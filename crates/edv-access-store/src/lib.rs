//! # EDV Access Store
//!
//! Storage abstraction for encrypted data vaults. Provides a trait-based
//! interface for document persistence with SQLite and in-memory
//! implementations.
//!
//! ## Overview
//!
//! A vault stores [`EncryptedDocument`](edv_access_core::EncryptedDocument)s:
//! sealed content plus blinded index terms. It never sees plaintext. Every
//! operation is authorized by a signed
//! [`Invocation`](edv_access_core::Invocation) rooted in the vault's
//! controller.
//!
//! ## Key Types
//!
//! - [`EdvStore`] - The async trait for all vault operations
//! - [`SqliteEdv`] - SQLite-based persistent vault
//! - [`MemoryEdv`] - In-memory vault for tests
//! - [`VaultInfo`] - Vault id, controller and documents target
//!
//! ## Usage
//!
//! ```rust,no_run
//! use edv_access_core::Keypair;
//! use edv_access_store::{SqliteEdv, VaultInfo};
//!
//! let controller = Keypair::generate();
//! let vault = VaultInfo::new("z19vault", controller.principal(), "https://edv.example");
//! let store = SqliteEdv::open("vault.db", vault).unwrap();
//! ```
//!
//! ## Design Notes
//!
//! - **Optimistic concurrency**: writes carry the next sequence number; a
//!   stale sequence is reported as `Conflict` for the caller to retry
//! - **Unique attributes**: enforced per blinded term across documents
//! - **Soft misses**: unknown ids read as `None` and delete as `false`

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryEdv;
pub use sqlite::SqliteEdv;
pub use traits::{authorize, document_target, EdvStore, VaultInfo};
