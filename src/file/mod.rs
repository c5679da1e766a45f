//! File tree module for Cumulus.
//!
//! This module provides the per-user file tree including:
//! - Logical-to-physical path resolution
//! - Node records with ordered child lists
//! - Quota accounting and cached directory sizes
//! - Physical storage with streamed downloads and zip archives
//! - Tree operations that keep all of the above consistent

mod lock;
mod node;
mod path;
mod quota;
mod repository;
mod service;
mod storage;

pub use lock::UserLocks;
pub use node::{post_order, NewNode, Node, NodeKind, SortKey};
pub use path::{join_logical, validate_name, PathResolver};
pub use quota::QuotaLedger;
pub use repository::NodeRepository;
pub use service::{DeleteResult, FileService, UploadRequest, UploadResult};
pub use storage::{ByteStream, FileStorage};

/// Maximum length for a node name (in characters).
pub const MAX_NAME_LENGTH: usize = 255;

/// Extensions that may be served inline for preview.
pub const PREVIEWABLE_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "pdf", "txt", "mp4", "webm"];
