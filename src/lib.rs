//! Cumulus - personal cloud storage core
//!
//! Per-user file trees with quota accounting, physical storage mirroring
//! and streamed downloads, implemented in Rust.

pub mod account;
pub mod config;
pub mod db;
pub mod error;
pub mod file;
pub mod logging;
pub mod web;

pub use account::{AccountService, NewAccount};
pub use config::Config;
pub use db::{Database, NewUser, Role, User, UserRepository};
pub use error::{CumulusError, ErrorCode, Result};
pub use file::{
    DeleteResult, FileService, FileStorage, Node, NodeKind, SortKey, UploadRequest, UploadResult,
    UserLocks,
};
