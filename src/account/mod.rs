//! Account subsystem.
//!
//! # Data Flow
//! ```text
//! Registration ceremony (attestation object)
//!     → registration.rs (parse COSE key, reject duplicates)
//!     → address.rs (canonical key + chain id → salt → CREATE2 address)
//!     → directory.rs (store Account keyed by identity)
//!
//! Before every send:
//!     directory.rs (owner credential) → address.rs (init-code while undeployed)
//! ```
//!
//! # Design Decisions
//! - The address is a pure function of (owner key, chain id, factory, init-code hash)
//! - Accounts are only ever extended with credentials, never deleted

pub mod address;
pub mod directory;
pub mod registration;
pub mod types;

pub use address::{canonical_key, AddressDeriver, DeriveError};
pub use directory::{AccountDirectory, DirectoryError, InMemoryDirectory};
pub use registration::{AccountRegistrar, Registration, RegistrationError};
pub use types::{Account, AccountState, Credential};
