//! Relational catalog store: libraries, folders, entities, tags, plugins,
//! and the FTS5/vector indexes that back hybrid search.
//!
//! One `SCHEMA` batch applied at open time, a single `Connection` wrapped
//! in a thin `Catalog`, row access via `rusqlite::params!`/`query_row`.
//! Every multi-statement operation that touches an entity's row plus its
//! index rows runs inside one transaction (`4.A`'s "all three indexes are
//! updated atomically with the entity row").

pub mod error;
pub mod models;
pub mod schema;
pub mod tokenize;
pub mod vector;

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument, warn};

pub use error::{CatalogError, Result};
pub use models::*;

/// Owns the single SQLite connection backing a library catalog. Not `Sync`
/// across threads by itself — callers share it behind a mutex since
/// `rusqlite::Connection` is blocking.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open or create the catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CatalogError::Validation(format!(
                    "failed to create catalog directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;\n             PRAGMA journal_mode = WAL;\n             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self { conn })
    }

    /// In-memory catalog, used by tests and by one-shot CLI invocations that
    /// don't need durability.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self { conn })
    }

    // ---------------------------------------------------------------
    // Libraries
    // ---------------------------------------------------------------

    pub fn create_library(&self, name: &str) -> Result<Library> {
        if name.trim().is_empty() {
            return Err(CatalogError::Validation("library name is empty".into()));
        }
        if self.get_library_by_name(name)?.is_some() {
            return Err(CatalogError::Conflict(format!(
                "library named '{name}' already exists"
            )));
        }
        self.conn
            .execute("INSERT INTO libraries (name) VALUES (?1)", params![name])?;
        let id = self.conn.last_insert_rowid();
        Ok(Library {
            id,
            name: name.to_string(),
        })
    }

    pub fn get_library(&self, id: i64) -> Result<Library> {
        self.conn
            .query_row(
                "SELECT id, name FROM libraries WHERE id = ?1",
                params![id],
                |r| Ok(Library { id: r.get(0)?, name: r.get(1)? }),
            )
            .optional()?
            .ok_or_else(|| CatalogError::NotFound(format!("library {id}")))
    }

    pub fn get_library_by_name(&self, name: &str) -> Result<Option<Library>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name FROM libraries WHERE name = ?1 COLLATE NOCASE",
                params![name],
                |r| Ok(Library { id: r.get(0)?, name: r.get(1)? }),
            )
            .optional()?)
    }

    pub fn list_libraries(&self) -> Result<Vec<Library>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM libraries ORDER BY id")?;
        let rows = stmt
            .query_map([], |r| Ok(Library { id: r.get(0)?, name: r.get(1)? }))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes a library and, via `ON DELETE CASCADE`, its folders and
    /// their entities (`3`: "created explicitly, never auto-deleted" —
    /// deletion is still always an explicit caller request).
    pub fn delete_library(&self, id: i64) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM libraries WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(CatalogError::NotFound(format!("library {id}")));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Folders
    // ---------------------------------------------------------------

    pub fn add_folder(&self, library_id: i64, path: &str, folder_type: FolderType) -> Result<Folder> {
        self.get_library(library_id)?;
        if !path.starts_with('/') {
            return Err(CatalogError::Validation(format!(
                "folder path must be absolute: {path}"
            )));
        }
        let now = Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO folders (library_id, path, last_modified_at, folder_type) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(library_id, path) DO UPDATE SET last_modified_at = excluded.last_modified_at",
            params![library_id, path, now, folder_type.as_str()],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM folders WHERE library_id = ?1 AND path = ?2",
            params![library_id, path],
            |r| r.get(0),
        )?;
        Ok(Folder {
            id,
            library_id,
            path: path.to_string(),
            last_modified_at: now,
            folder_type,
        })
    }

    pub fn get_folder(&self, id: i64) -> Result<Folder> {
        self.conn
            .query_row(
                "SELECT id, library_id, path, last_modified_at, folder_type FROM folders WHERE id = ?1",
                params![id],
                Self::row_to_folder,
            )
            .optional()?
            .ok_or_else(|| CatalogError::NotFound(format!("folder {id}")))
    }

    pub fn list_folders(&self, library_id: i64) -> Result<Vec<Folder>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, library_id, path, last_modified_at, folder_type FROM folders WHERE library_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![library_id], Self::row_to_folder)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Removing a folder removes its entities (`3`: "Lifecycle").
    pub fn delete_folder(&self, id: i64) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM folders WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(CatalogError::NotFound(format!("folder {id}")));
        }
        Ok(())
    }

    fn row_to_folder(r: &rusqlite::Row) -> rusqlite::Result<Folder> {
        let folder_type: String = r.get(4)?;
        Ok(Folder {
            id: r.get(0)?,
            library_id: r.get(1)?,
            path: r.get(2)?,
            last_modified_at: r.get(3)?,
            folder_type: FolderType::parse(&folder_type),
        })
    }

    // ---------------------------------------------------------------
    // Entities
    // ---------------------------------------------------------------

    /// Insert-or-update an entity by `filepath` (`4.A`: "insert or update by
    /// filepath"). Stat fields and merged metadata are written atomically
    /// with the entity row within one transaction; the entity's FTS/vector
    /// rows are left untouched here (those are written separately via
    /// `index_fts`/`index_vec`, so a failed artifact computation leaves the
    /// row present without a half-indexed state for those columns).
    #[instrument(skip(self, metadata), fields(filepath))]
    pub fn upsert_entity(
        &mut self,
        library_id: i64,
        folder_id: i64,
        filepath: &str,
        filename: &str,
        size: i64,
        file_type: &str,
        file_type_group: FileTypeGroup,
        file_created_at: i64,
        file_last_modified_at: i64,
        metadata: &[(String, String, String, SourceType, DataType)],
    ) -> Result<i64> {
        if !filepath.starts_with('/') {
            return Err(CatalogError::Validation(format!(
                "filepath must be absolute: {filepath}"
            )));
        }
        let tx = self.conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM entities WHERE filepath = ?1",
                params![filepath],
                |r| r.get(0),
            )
            .optional()?;

        let entity_id = if let Some(id) = existing {
            tx.execute(
                "UPDATE entities SET size = ?2, file_type = ?3, file_type_group = ?4,
                 file_created_at = ?5, file_last_modified_at = ?6, filename = ?7
                 WHERE id = ?1",
                params![
                    id,
                    size,
                    file_type,
                    file_type_group.as_str(),
                    file_created_at,
                    file_last_modified_at,
                    filename
                ],
            )?;
            id
        } else {
            tx.execute(
                "INSERT INTO entities (library_id, folder_id, filepath, filename, size, file_type,
                 file_type_group, file_created_at, file_last_modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    library_id,
                    folder_id,
                    filepath,
                    filename,
                    size,
                    file_type,
                    file_type_group.as_str(),
                    file_created_at,
                    file_last_modified_at
                ],
            )?;
            tx.last_insert_rowid()
        };

        // Merge metadata by key: new keys added, colliding keys overwritten,
        // orphaned keys kept (`4.D`: "Merge new metadata entries with
        // existing ones by key").
        for (key, value, source, source_type, data_type) in metadata {
            tx.execute(
                "INSERT INTO entity_metadata (entity_id, key, value, source, source_type, data_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(entity_id, key) DO UPDATE SET
                   value = excluded.value, source = excluded.source,
                   source_type = excluded.source_type, data_type = excluded.data_type",
                params![
                    entity_id,
                    key,
                    value,
                    source,
                    source_type.as_str(),
                    data_type.as_str()
                ],
            )?;
        }

        tx.commit()?;
        debug!(entity_id, filepath, "entity upserted");
        Ok(entity_id)
    }

    pub fn get_entity(&self, id: i64) -> Result<Entity> {
        self.conn
            .query_row(
                "SELECT id, library_id, folder_id, filepath, filename, size, file_type, file_type_group,
                 file_created_at, file_last_modified_at, last_scan_at, fts_indexed_at, vec_indexed_at
                 FROM entities WHERE id = ?1",
                params![id],
                Self::row_to_entity,
            )
            .optional()?
            .ok_or_else(|| CatalogError::NotFound(format!("entity {id}")))
    }

    pub fn get_entity_by_filepath(&self, filepath: &str) -> Result<Option<Entity>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, library_id, folder_id, filepath, filename, size, file_type, file_type_group,
                 file_created_at, file_last_modified_at, last_scan_at, fts_indexed_at, vec_indexed_at
                 FROM entities WHERE filepath = ?1",
                params![filepath],
                Self::row_to_entity,
            )
            .optional()?)
    }

    /// Batch lookup, used by the ingestion walker's chunked (200 paths at a
    /// time) reconciliation pass (`4.D`).
    pub fn get_entities_by_filepaths(&self, filepaths: &[String]) -> Result<Vec<Entity>> {
        if filepaths.is_empty() {
            return Ok(vec![]);
        }
        let placeholders = filepaths.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, library_id, folder_id, filepath, filename, size, file_type, file_type_group,
             file_created_at, file_last_modified_at, last_scan_at, fts_indexed_at, vec_indexed_at
             FROM entities WHERE filepath IN ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            filepaths.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(params.as_slice(), Self::row_to_entity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `list_entities(folder, limit, offset) -> (rows, total)` (`4.A`),
    /// ordered by insertion (`id asc`) with the total count exposed
    /// alongside the page.
    pub fn list_entities(
        &self,
        folder_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Entity>, i64)> {
        let (where_clause, folder_param) = match folder_id {
            Some(id) => ("WHERE folder_id = ?1", Some(id)),
            None => ("", None),
        };

        let total: i64 = match folder_param {
            Some(id) => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM entities {where_clause}"),
                params![id],
                |r| r.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?,
        };

        let sql = format!(
            "SELECT id, library_id, folder_id, filepath, filename, size, file_type, file_type_group,
             file_created_at, file_last_modified_at, last_scan_at, fts_indexed_at, vec_indexed_at
             FROM entities {where_clause} ORDER BY id ASC LIMIT ? OFFSET ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match folder_param {
            Some(id) => stmt
                .query_map(params![id, limit, offset], Self::row_to_entity)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![limit, offset], Self::row_to_entity)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok((rows, total))
    }

    /// Lists every filepath currently known under `folder_id`, used by the
    /// batch walker to compute the "files that disappeared from disk" set.
    pub fn list_filepaths_in_folder(&self, folder_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT filepath FROM entities WHERE folder_id = ?1")?;
        let rows = stmt
            .query_map(params![folder_id], |r| r.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn touch(&self, entity_id: i64) -> Result<()> {
        let now = Utc::now().timestamp();
        let rows = self.conn.execute(
            "UPDATE entities SET last_scan_at = ?2 WHERE id = ?1",
            params![entity_id, now],
        )?;
        if rows == 0 {
            return Err(CatalogError::NotFound(format!("entity {entity_id}")));
        }
        Ok(())
    }

    pub fn delete_entity(&self, id: i64) -> Result<()> {
        // Cascades to metadata, tag links, FTS row, and vector row (`3`).
        self.conn
            .execute("DELETE FROM entities_fts WHERE rowid = ?1", params![id])?;
        let rows = self.conn.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(CatalogError::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    /// Deletes every entity under `folder_id` whose filepath is not in
    /// `keep_set` (`4.A`: `delete_by_filepath_not_in`; `4.D`: "delete"
    /// entities that vanished from disk). Returns the number removed.
    pub fn delete_by_filepath_not_in(&self, folder_id: i64, keep_set: &[String]) -> Result<usize> {
        let existing = self.list_filepaths_in_folder(folder_id)?;
        let keep: std::collections::HashSet<&str> = keep_set.iter().map(|s| s.as_str()).collect();
        let mut removed = 0usize;
        for filepath in existing {
            if !keep.contains(filepath.as_str()) {
                let id: Option<i64> = self
                    .conn
                    .query_row(
                        "SELECT id FROM entities WHERE filepath = ?1",
                        params![filepath],
                        |r| r.get(0),
                    )
                    .optional()?;
                if let Some(id) = id {
                    self.delete_entity(id)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn row_to_entity(r: &rusqlite::Row) -> rusqlite::Result<Entity> {
        let group: String = r.get(7)?;
        Ok(Entity {
            id: r.get(0)?,
            library_id: r.get(1)?,
            folder_id: r.get(2)?,
            filepath: r.get(3)?,
            filename: r.get(4)?,
            size: r.get(5)?,
            file_type: r.get(6)?,
            file_type_group: FileTypeGroup::parse(&group),
            file_created_at: r.get(8)?,
            file_last_modified_at: r.get(9)?,
            last_scan_at: r.get(10)?,
            fts_indexed_at: r.get(11)?,
            vec_indexed_at: r.get(12)?,
        })
    }

    // ---------------------------------------------------------------
    // Entity metadata, tags
    // ---------------------------------------------------------------

    /// Upserts a single metadata entry (the shape a plugin patch takes:
    /// `4.D` — "issues a metadata patch against the catalog that upserts a
    /// single keyed entry").
    pub fn upsert_metadata(
        &self,
        entity_id: i64,
        key: &str,
        value: &str,
        source: &str,
        source_type: SourceType,
        data_type: DataType,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entity_metadata (entity_id, key, value, source, source_type, data_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(entity_id, key) DO UPDATE SET
               value = excluded.value, source = excluded.source,
               source_type = excluded.source_type, data_type = excluded.data_type",
            params![entity_id, key, value, source, source_type.as_str(), data_type.as_str()],
        )?;
        Ok(())
    }

    pub fn list_metadata(&self, entity_id: i64) -> Result<Vec<EntityMetadata>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, key, value, source, source_type, data_type
             FROM entity_metadata WHERE entity_id = ?1 ORDER BY key ASC",
        )?;
        let rows = stmt
            .query_map(params![entity_id], |r| {
                let source_type: String = r.get(4)?;
                let data_type: String = r.get(5)?;
                Ok(EntityMetadata {
                    entity_id: r.get(0)?,
                    key: r.get(1)?,
                    value: r.get(2)?,
                    source: r.get(3)?,
                    source_type: SourceType::parse(&source_type),
                    data_type: DataType::parse(&data_type),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Builds `metadata_text`: the concatenation of `key\nvalue` pairs,
    /// excluding `ocr_result` (`4.A`), in deterministic (`key ASC`) order
    /// so repeated runs over unchanged metadata yield a byte-identical
    /// projection (`8`: idempotence property).
    pub fn metadata_text(&self, entity_id: i64) -> Result<String> {
        let entries = self.list_metadata(entity_id)?;
        Ok(entries
            .iter()
            .filter(|e| e.key != "ocr_result")
            .map(|e| format!("{}\n{}", e.key, e.value))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    pub fn list_tags(&self, entity_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name FROM tags t
             JOIN entity_tags et ON et.tag_id = t.id
             WHERE et.entity_id = ?1 ORDER BY t.id",
        )?;
        let rows = stmt
            .query_map(params![entity_id], |r| Ok(Tag { id: r.get(0)?, name: r.get(1)? }))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn add_tag(&self, entity_id: i64, name: &str, source: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tags (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        let tag_id: i64 = self.conn.query_row(
            "SELECT id FROM tags WHERE name = ?1 COLLATE NOCASE",
            params![name],
            |r| r.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO entity_tags (entity_id, tag_id, source) VALUES (?1, ?2, ?3)
             ON CONFLICT(entity_id, tag_id) DO UPDATE SET source = excluded.source",
            params![entity_id, tag_id, source],
        )?;
        Ok(())
    }

    pub fn hydrate(&self, entity_id: i64) -> Result<HydratedEntity> {
        let entity = self.get_entity(entity_id)?;
        let metadata = self.list_metadata(entity_id)?;
        let tags = self.list_tags(entity_id)?;
        Ok(HydratedEntity { entity, metadata, tags })
    }

    // ---------------------------------------------------------------
    // FTS + vector indexes
    // ---------------------------------------------------------------

    /// Idempotent upsert of an entity's FTS row, plus stamping
    /// `fts_indexed_at` (`4.A`: `index_fts`). CJK text is pre-segmented
    /// (`tokenize::segment`) before being written to the FTS5 content
    /// column (`4.A`: "tokenization must support CJK by word-segmented
    /// input").
    #[instrument(skip(self, text))]
    pub fn index_fts(&mut self, entity_id: i64, text: &str) -> Result<()> {
        let segmented = tokenize::segment(text);
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM entities_fts WHERE rowid = ?1",
            params![entity_id],
        )?;
        tx.execute(
            "INSERT INTO entities_fts (rowid, metadata_text) VALUES (?1, ?2)",
            params![entity_id, segmented],
        )?;
        let now = Utc::now().timestamp();
        tx.execute(
            "UPDATE entities SET fts_indexed_at = ?2 WHERE id = ?1",
            params![entity_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Idempotent upsert of an entity's vector row (`4.A`: `index_vec`).
    /// Per spec.md §9's rounded-at-write resolution, callers pass the
    /// already-rounded embedding (`memoscope-gateway::embedding` performs
    /// the rounding).
    #[instrument(skip(self, vec))]
    pub fn index_vec(&mut self, entity_id: i64, vec: &[f32]) -> Result<()> {
        let encoded = vector::encode(vec);
        let dim = vec.len() as i64;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO entity_vectors (entity_id, dim, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(entity_id) DO UPDATE SET dim = excluded.dim, data = excluded.data",
            params![entity_id, dim, encoded],
        )?;
        let now = Utc::now().timestamp();
        tx.execute(
            "UPDATE entities SET vec_indexed_at = ?2 WHERE id = ?1",
            params![entity_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// `full_text_search(query, filters) -> [id]` (`4.A`). Queries are
    /// constructed by AND-joining whitespace-split, segmented tokens
    /// (`tokenize::and_join_query`); ordering is `(bm25 asc, file_created_at
    /// desc)`; `file_type_group = image` is always implicit.
    #[instrument(skip(self))]
    pub fn full_text_search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: i64,
    ) -> Result<Vec<i64>> {
        let Some(match_expr) = tokenize::and_join_query(query) else {
            return Ok(vec![]);
        };
        let (filter_sql, mut filter_params) = build_filter_sql(filters);
        let sql = format!(
            "SELECT e.id FROM entities_fts f
             JOIN entities e ON e.id = f.rowid
             WHERE f.metadata_text MATCH ?1 AND e.file_type_group = 'image' {filter_sql}
             ORDER BY bm25(entities_fts) ASC, e.file_created_at DESC
             LIMIT ?{}",
            filter_params.len() + 2
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_expr)];
        all_params.append(&mut filter_params);
        all_params.push(Box::new(limit));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|b| b.as_ref()).collect();
        let ids = stmt
            .query_map(param_refs.as_slice(), |r| r.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// `vector_search(qvec, filters, k) -> [id]` (`4.A`). Loads the
    /// candidate set matching `filters`, scores in parallel
    /// (`vector::top_k`), and returns up to `k` ids ordered by
    /// `(distance asc, file_created_at desc)`.
    #[instrument(skip(self, qvec))]
    pub fn vector_search(&self, qvec: &[f32], filters: &SearchFilters, k: usize) -> Result<Vec<i64>> {
        let (filter_sql, filter_params) = build_filter_sql(filters);
        let sql = format!(
            "SELECT e.id, v.data, e.file_created_at FROM entity_vectors v
             JOIN entities e ON e.id = v.entity_id
             WHERE e.file_type_group = 'image' {filter_sql}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            filter_params.iter().map(|b| b.as_ref()).collect();
        let candidates: Vec<(i64, Vec<f32>, i64)> = stmt
            .query_map(param_refs.as_slice(), |r| {
                let bytes: Vec<u8> = r.get(1)?;
                Ok((r.get::<_, i64>(0)?, vector::decode(&bytes), r.get::<_, i64>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if candidates.is_empty() {
            return Ok(vec![]);
        }
        Ok(vector::top_k(qvec, &candidates, k).into_iter().map(|(id, _)| id).collect())
    }

    /// Orphan cleanup for the indexer: index rows whose `entity_id` is no
    /// longer present are dropped (`4.D`: "Orphan cleanup").
    pub fn delete_orphan_index_rows(&self) -> Result<usize> {
        let fts_removed = self.conn.execute(
            "DELETE FROM entities_fts WHERE rowid NOT IN (SELECT id FROM entities)",
            [],
        )?;
        let vec_removed = self.conn.execute(
            "DELETE FROM entity_vectors WHERE entity_id NOT IN (SELECT id FROM entities)",
            [],
        )?;
        Ok(fts_removed + vec_removed)
    }

    /// Entities whose `(fts_indexed_at, vec_indexed_at)` predate
    /// `last_scan_at` (or have never been indexed), used by `search-index`
    /// to decide what needs re-embedding (`4.D`, spec.md §9 open question
    /// resolution: `last_scan_at` is the source of truth).
    pub fn entities_needing_reindex(&self, batch_size: i64, force: bool) -> Result<Vec<Entity>> {
        let sql = if force {
            "SELECT id, library_id, folder_id, filepath, filename, size, file_type, file_type_group,
             file_created_at, file_last_modified_at, last_scan_at, fts_indexed_at, vec_indexed_at
             FROM entities WHERE file_type_group = 'image' ORDER BY id LIMIT ?1"
        } else {
            "SELECT id, library_id, folder_id, filepath, filename, size, file_type, file_type_group,
             file_created_at, file_last_modified_at, last_scan_at, fts_indexed_at, vec_indexed_at
             FROM entities WHERE file_type_group = 'image' AND last_scan_at IS NOT NULL
             AND (fts_indexed_at IS NULL OR fts_indexed_at < last_scan_at
                  OR vec_indexed_at IS NULL OR vec_indexed_at < last_scan_at)
             ORDER BY id LIMIT ?1"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![batch_size], Self::row_to_entity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Bumps `last_scan_at` on every entity (`4.D`: `reindex`).
    pub fn reindex_all(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let rows = self
            .conn
            .execute("UPDATE entities SET last_scan_at = ?1", params![now])?;
        Ok(rows)
    }

    // ---------------------------------------------------------------
    // Plugins
    // ---------------------------------------------------------------

    pub fn create_plugin(&self, name: &str, description: &str, webhook_url: Option<&str>) -> Result<Plugin> {
        if self.get_plugin_by_name(name)?.is_some() {
            return Err(CatalogError::Conflict(format!("plugin named '{name}' already exists")));
        }
        self.conn.execute(
            "INSERT INTO plugins (name, description, webhook_url) VALUES (?1, ?2, ?3)",
            params![name, description, webhook_url],
        )?;
        Ok(Plugin {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.to_string(),
            webhook_url: webhook_url.map(String::from),
        })
    }

    pub fn get_plugin_by_name(&self, name: &str) -> Result<Option<Plugin>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, description, webhook_url FROM plugins WHERE name = ?1 COLLATE NOCASE",
                params![name],
                |r| {
                    Ok(Plugin {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        description: r.get(2)?,
                        webhook_url: r.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn list_plugins(&self) -> Result<Vec<Plugin>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description, webhook_url FROM plugins ORDER BY id")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Plugin {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    description: r.get(2)?,
                    webhook_url: r.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Set semantics: binding an already-bound plugin is a conflict (`3`:
    /// "LibraryPlugin ... set semantics (no duplicates)").
    pub fn activate_plugin(&self, library_id: i64, plugin_id: i64) -> Result<()> {
        self.get_library(library_id)?;
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM library_plugins WHERE library_id = ?1 AND plugin_id = ?2)",
            params![library_id, plugin_id],
            |r| r.get(0),
        )?;
        if exists {
            return Err(CatalogError::Conflict(format!(
                "plugin {plugin_id} already active on library {library_id}"
            )));
        }
        self.conn.execute(
            "INSERT INTO library_plugins (library_id, plugin_id) VALUES (?1, ?2)",
            params![library_id, plugin_id],
        )?;
        Ok(())
    }

    pub fn list_active_plugins(&self, library_id: i64) -> Result<Vec<Plugin>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.description, p.webhook_url FROM plugins p
             JOIN library_plugins lp ON lp.plugin_id = p.id
             WHERE lp.library_id = ?1 ORDER BY p.id",
        )?;
        let rows = stmt
            .query_map(params![library_id], |r| {
                Ok(Plugin {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    description: r.get(2)?,
                    webhook_url: r.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Shared `(library_ids, [start_unix, end_unix])` filter clause builder for
/// `full_text_search`/`vector_search` (`4.A`).
fn build_filter_sql(filters: &SearchFilters) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut clauses = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ids) = &filters.library_ids {
        if ids.is_empty() {
            // An explicit empty list matches nothing.
            clauses.push("0".to_string());
        } else {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            clauses.push(format!("e.library_id IN ({placeholders})"));
            for id in ids {
                params.push(Box::new(*id));
            }
        }
    }
    if let Some(start) = filters.start_unix {
        clauses.push("e.file_created_at >= ?".to_string());
        params.push(Box::new(start));
    }
    if let Some(end) = filters.end_unix {
        clauses.push("e.file_created_at <= ?".to_string());
        params.push(Box::new(end));
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("AND {}", clauses.join(" AND ")), params)
    }
}

/// Suppresses an `E` after logging it, used by call sites that must keep
/// the entity row even when an optional artifact write fails
/// (`7`: "A failed artifact computation must not leave a half-indexed
/// entity").
pub fn log_and_ignore<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) {
    if let Err(e) = result {
        warn!(context, error = %e, "non-fatal catalog operation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> Vec<(String, String, String, SourceType, DataType)> {
        vec![(
            "caption".to_string(),
            "cat on sofa".to_string(),
            "vlm".to_string(),
            SourceType::PluginGenerated,
            DataType::Text,
        )]
    }

    #[test]
    fn create_and_fetch_library() {
        let cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("Screenshots").unwrap();
        assert_eq!(cat.get_library(lib.id).unwrap().name, "Screenshots");
    }

    #[test]
    fn duplicate_library_name_is_conflict() {
        let cat = Catalog::in_memory().unwrap();
        cat.create_library("L").unwrap();
        let err = cat.create_library("l").unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn upsert_entity_creates_then_updates() {
        let mut cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("L").unwrap();
        let folder = cat.add_folder(lib.id, "/tmp/A", FolderType::Default).unwrap();
        let id1 = cat
            .upsert_entity(
                lib.id,
                folder.id,
                "/tmp/A/a.webp",
                "a.webp",
                100,
                "webp",
                FileTypeGroup::Image,
                1,
                1,
                &sample_metadata(),
            )
            .unwrap();
        let id2 = cat
            .upsert_entity(
                lib.id,
                folder.id,
                "/tmp/A/a.webp",
                "a.webp",
                200,
                "webp",
                FileTypeGroup::Image,
                1,
                2,
                &sample_metadata(),
            )
            .unwrap();
        assert_eq!(id1, id2);
        let e = cat.get_entity(id1).unwrap();
        assert_eq!(e.size, 200);
    }

    #[test]
    fn delete_by_filepath_not_in_removes_missing_files() {
        let mut cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("L").unwrap();
        let folder = cat.add_folder(lib.id, "/tmp/A", FolderType::Default).unwrap();
        cat.upsert_entity(
            lib.id, folder.id, "/tmp/A/a.webp", "a.webp", 1, "webp",
            FileTypeGroup::Image, 1, 1, &[],
        )
        .unwrap();
        assert_eq!(cat.list_entities(Some(folder.id), 100, 0).unwrap().1, 1);
        let removed = cat.delete_by_filepath_not_in(folder.id, &[]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cat.list_entities(Some(folder.id), 100, 0).unwrap().1, 0);
    }

    #[test]
    fn metadata_text_excludes_ocr_result_and_is_deterministic() {
        let mut cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("L").unwrap();
        let folder = cat.add_folder(lib.id, "/tmp/A", FolderType::Default).unwrap();
        let id = cat
            .upsert_entity(
                lib.id, folder.id, "/tmp/A/a.webp", "a.webp", 1, "webp",
                FileTypeGroup::Image, 1, 1, &[],
            )
            .unwrap();
        cat.upsert_metadata(id, "ocr_result", "huge blob", "ocr", SourceType::PluginGenerated, DataType::Json)
            .unwrap();
        cat.upsert_metadata(id, "caption", "a cat", "vlm", SourceType::PluginGenerated, DataType::Text)
            .unwrap();
        let text = cat.metadata_text(id).unwrap();
        assert!(!text.contains("huge blob"));
        assert!(text.contains("caption\na cat"));
        let text2 = cat.metadata_text(id).unwrap();
        assert_eq!(text, text2);
    }

    #[test]
    fn full_text_search_finds_by_caption() {
        let mut cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("L").unwrap();
        let folder = cat.add_folder(lib.id, "/tmp/A", FolderType::Default).unwrap();
        let id = cat
            .upsert_entity(
                lib.id, folder.id, "/tmp/A/a.webp", "a.webp", 1, "webp",
                FileTypeGroup::Image, 1, 1, &[],
            )
            .unwrap();
        cat.upsert_metadata(id, "caption", "cat on sofa", "vlm", SourceType::PluginGenerated, DataType::Text)
            .unwrap();
        let text = cat.metadata_text(id).unwrap();
        cat.index_fts(id, &text).unwrap();
        let ids = cat.full_text_search("cat", &SearchFilters::default(), 10).unwrap();
        assert_eq!(ids, vec![id]);
    }

    #[test]
    fn vector_search_orders_by_distance() {
        let mut cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("L").unwrap();
        let folder = cat.add_folder(lib.id, "/tmp/A", FolderType::Default).unwrap();
        let a = cat
            .upsert_entity(lib.id, folder.id, "/tmp/A/a.webp", "a.webp", 1, "webp", FileTypeGroup::Image, 1, 1, &[])
            .unwrap();
        let b = cat
            .upsert_entity(lib.id, folder.id, "/tmp/A/b.webp", "b.webp", 1, "webp", FileTypeGroup::Image, 2, 2, &[])
            .unwrap();
        cat.index_vec(a, &[1.0, 0.0]).unwrap();
        cat.index_vec(b, &[0.0, 1.0]).unwrap();
        let ids = cat.vector_search(&[1.0, 0.0], &SearchFilters::default(), 2).unwrap();
        assert_eq!(ids[0], a);
        assert_eq!(ids[1], b);
    }

    #[test]
    fn entities_needing_reindex_respects_last_scan_at() {
        let mut cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("L").unwrap();
        let folder = cat.add_folder(lib.id, "/tmp/A", FolderType::Default).unwrap();
        let id = cat
            .upsert_entity(lib.id, folder.id, "/tmp/A/a.webp", "a.webp", 1, "webp", FileTypeGroup::Image, 1, 1, &[])
            .unwrap();
        assert_eq!(cat.entities_needing_reindex(10, false).unwrap().len(), 0);
        cat.touch(id).unwrap();
        assert_eq!(cat.entities_needing_reindex(10, false).unwrap().len(), 1);
        cat.index_fts(id, "x").unwrap();
        cat.index_vec(id, &[1.0]).unwrap();
        assert_eq!(cat.entities_needing_reindex(10, false).unwrap().len(), 0);
    }

    #[test]
    fn activate_plugin_twice_is_conflict() {
        let cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("L").unwrap();
        let plugin = cat.create_plugin("builtin_ocr", "", None).unwrap();
        cat.activate_plugin(lib.id, plugin.id).unwrap();
        assert!(cat.activate_plugin(lib.id, plugin.id).is_err());
    }
}
