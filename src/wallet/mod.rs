//! Wallet credentials
//!
//! ```text
//! wallets.txt / private_key.txt → loader → keys (KeyResolver) → WalletKey
//! ```
//!
//! # Security
//!
//! Credentials never appear in logs or persisted files. Anything keyed on a
//! wallet uses its derived [`WalletIdentity`].

pub mod keys;
pub mod loader;

pub use keys::{KeyFormat, KeyResolver, SuiKeyResolver, WalletIdentity, WalletKey};
pub use loader::{combine_credentials, load_credentials, load_single_credential};
