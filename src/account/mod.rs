//! Account management for Cumulus.
//!
//! Registration, account removal and avatars. Credential hashing happens
//! before a request reaches this module.

mod service;

pub use service::{AccountService, NewAccount, AVATAR_EXTENSIONS};
