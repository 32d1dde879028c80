//! # EDV Access Permissions
//!
//! Sealing of document content and role-driven capability delegation.
//!
//! ## Encryption Model
//!
//! Sealed content uses a two-layer key model:
//!
//! 1. **Content Key**: A symmetric key (ChaCha20-Poly1305) that encrypts the content
//! 2. **Recipient entry**: The content key wrapped for a key-agreement key via X25519
//!
//! The recipient's secret never leaves its key-management service; opening
//! only needs the agreement output for the entry's ephemeral public key.
//!
//! ## Delegation Model
//!
//! Users hold role tags ([`Role`]). [`plan_delegations`] maps a role set to
//! the capabilities the user should receive, and [`delegate`] produces each
//! one as a signed, attenuated child of the instance's own capability.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use edv_access_perms::{plan_delegations, Role, RoleSet};
//!
//! let requests = plan_delegations(&RoleSet::of(&[Role::Issue, Role::Read]));
//! for request in &requests {
//!     println!("{} {:?}", request.reference_id, request.allowed_action);
//! }
//! ```

pub mod crypto;
pub mod delegation;
pub mod envelope;
pub mod error;
pub mod role;

pub use crypto::{ContentKey, EphemeralKeyPair, KeyAgreementSecret, SharedKey};
pub use delegation::{
    delegate, plan_delegations, reference, revocation_reference_ids, DelegationRequest,
    InstanceGrants, UserRecord,
};
pub use envelope::{decode_content, encode_content, open, seal};
pub use error::{PermsError, Result};
pub use role::{Role, RoleSet};
