//! Database schema and migrations for Cumulus.

/// Database migrations, applied in order.
///
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: users with quota counters
    r#"
CREATE TABLE users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    email       TEXT NOT NULL UNIQUE,
    password    TEXT NOT NULL,           -- pre-hashed credential
    name        TEXT NOT NULL DEFAULT 'name',
    surname     TEXT NOT NULL DEFAULT 'surname',
    role        TEXT NOT NULL DEFAULT 'user',
    disk_space  INTEGER NOT NULL,        -- capacity in bytes
    used_space  INTEGER NOT NULL DEFAULT 0,
    avatar      TEXT,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_users_email ON users(email);
"#,
    // v2: file tree
    r#"
-- parent_id has no cascade: a directory row cannot be removed while it has children
CREATE TABLE nodes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id    INTEGER NOT NULL REFERENCES users(id),
    parent_id   INTEGER REFERENCES nodes(id),
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL CHECK (kind IN ('file', 'dir')),
    size        INTEGER NOT NULL DEFAULT 0,
    path        TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
);

CREATE INDEX idx_nodes_owner_parent ON nodes(owner_id, parent_id);

-- ordered child list of each directory
CREATE TABLE node_children (
    position    INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id   INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    child_id    INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE
);

CREATE INDEX idx_node_children_parent ON node_children(parent_id);
"#,
    // v3: bytes held by the avatar, reserved next to used_space
    r#"
ALTER TABLE users ADD COLUMN avatar_size INTEGER NOT NULL DEFAULT 0;
"#,
];
