//! Node model for the file tree.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::PREVIEWABLE_EXTENSIONS;

/// Whether a node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    #[serde(rename = "dir")]
    Directory,
}

impl NodeKind {
    /// Convert kind to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Directory => "dir",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(NodeKind::File),
            "dir" => Ok(NodeKind::Directory),
            _ => Err(format!("unknown node kind: {s}")),
        }
    }
}

impl TryFrom<String> for NodeKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A file or directory in a user's tree.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Node {
    /// Unique node ID.
    pub id: i64,
    /// Owning user.
    pub owner_id: i64,
    /// Containing directory (None for the user's root).
    pub parent_id: Option<i64>,
    /// Display name.
    pub name: String,
    /// File or directory.
    #[sqlx(try_from = "String")]
    pub kind: NodeKind,
    /// Bytes; for a directory, the total of all descendant files.
    pub size: i64,
    /// Logical path relative to the user's root, fixed at creation.
    pub path: String,
    /// When the node was created.
    pub created_at: String,
}

impl Node {
    /// Check if this node is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Lowercased extension of the name, if it has one.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }

    /// Whether the file may be served inline for preview.
    pub fn is_previewable(&self) -> bool {
        !self.is_directory()
            && self
                .extension()
                .is_some_and(|ext| PREVIEWABLE_EXTENSIONS.contains(&ext.as_str()))
    }
}

/// Data for creating a new node.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub owner_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub kind: NodeKind,
    pub size: i64,
    pub path: String,
}

impl NewNode {
    /// A new, empty directory.
    pub fn directory(owner_id: i64, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            owner_id,
            parent_id: None,
            name: name.into(),
            kind: NodeKind::Directory,
            size: 0,
            path: path.into(),
        }
    }

    /// A new file of `size` bytes.
    pub fn file(
        owner_id: i64,
        name: impl Into<String>,
        path: impl Into<String>,
        size: i64,
    ) -> Self {
        Self {
            owner_id,
            parent_id: None,
            name: name.into(),
            kind: NodeKind::File,
            size,
            path: path.into(),
        }
    }

    /// Set the parent directory.
    pub fn with_parent(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// Ordering for directory listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Creation order.
    #[default]
    Insertion,
    Name,
    Kind,
    CreatedAt,
}

impl SortKey {
    /// SQL ORDER BY clause for this key.
    pub(crate) fn order_by(&self) -> &'static str {
        match self {
            SortKey::Insertion => "id",
            SortKey::Name => "name, id",
            SortKey::Kind => "kind, id",
            SortKey::CreatedAt => "created_at, id",
        }
    }
}

impl FromStr for SortKey {
    type Err = std::convert::Infallible;

    /// Unknown keys fall back to insertion order.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "name" => SortKey::Name,
            "type" | "kind" => SortKey::Kind,
            "date" | "created_at" => SortKey::CreatedAt,
            _ => SortKey::Insertion,
        })
    }
}

/// Ids of `root_id` and all its descendants, every child before its parent.
///
/// `arena` is any set of nodes containing the subtree; rows outside it are
/// ignored. Traversal is iterative, so depth is bounded by memory only.
pub fn post_order(root_id: i64, arena: &[Node]) -> Vec<i64> {
    let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
    for node in arena {
        if let Some(parent_id) = node.parent_id {
            children.entry(parent_id).or_default().push(node.id);
        }
    }
    for ids in children.values_mut() {
        ids.sort_unstable();
    }

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(root_id, false)];

    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        if !visited.insert(id) {
            continue;
        }
        stack.push((id, true));
        if let Some(kids) = children.get(&id) {
            for kid in kids.iter().rev() {
                stack.push((*kid, false));
            }
        }
    }

    order
}
