/// Row store, FTS5 virtual table, and vector table. One schema batch,
/// executed with `Connection::execute_batch` as a single `SCHEMA` constant
/// applied at open time rather than a migration-per-version system.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS libraries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL COLLATE NOCASE UNIQUE
);

CREATE TABLE IF NOT EXISTS folders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    library_id INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    last_modified_at INTEGER NOT NULL,
    folder_type TEXT NOT NULL DEFAULT 'default',
    UNIQUE(library_id, path)
);

CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    library_id INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
    folder_id INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
    filepath TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    size INTEGER NOT NULL,
    file_type TEXT NOT NULL,
    file_type_group TEXT NOT NULL,
    file_created_at INTEGER NOT NULL,
    file_last_modified_at INTEGER NOT NULL,
    last_scan_at INTEGER,
    fts_indexed_at INTEGER,
    vec_indexed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_entities_folder ON entities(folder_id);
CREATE INDEX IF NOT EXISTS idx_entities_library ON entities(library_id);
CREATE INDEX IF NOT EXISTS idx_entities_file_created_at ON entities(file_created_at);
CREATE INDEX IF NOT EXISTS idx_entities_group ON entities(file_type_group);

CREATE TABLE IF NOT EXISTS entity_metadata (
    entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    source TEXT NOT NULL,
    source_type TEXT NOT NULL,
    data_type TEXT NOT NULL,
    PRIMARY KEY (entity_id, key)
);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL COLLATE NOCASE UNIQUE
);

CREATE TABLE IF NOT EXISTS entity_tags (
    entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    PRIMARY KEY (entity_id, tag_id)
);

CREATE TABLE IF NOT EXISTS plugins (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL COLLATE NOCASE UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    webhook_url TEXT
);

CREATE TABLE IF NOT EXISTS library_plugins (
    library_id INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
    plugin_id INTEGER NOT NULL REFERENCES plugins(id) ON DELETE CASCADE,
    PRIMARY KEY (library_id, plugin_id)
);

CREATE VIRTUAL TABLE IF NOT EXISTS entities_fts USING fts5(
    metadata_text,
    content='',
    contentless_delete=1
);

CREATE TABLE IF NOT EXISTS entity_vectors (
    entity_id INTEGER PRIMARY KEY REFERENCES entities(id) ON DELETE CASCADE,
    dim INTEGER NOT NULL,
    data BLOB NOT NULL
);
"#;
