use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderType {
    Default,
    Archive,
}

impl FolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderType::Default => "default",
            FolderType::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "archive" => FolderType::Archive,
            _ => FolderType::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub library_id: i64,
    pub path: String,
    pub last_modified_at: i64,
    pub folder_type: FolderType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileTypeGroup {
    Image,
    Video,
    Other,
}

impl FileTypeGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileTypeGroup::Image => "image",
            FileTypeGroup::Video => "video",
            FileTypeGroup::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "image" => FileTypeGroup::Image,
            "video" => FileTypeGroup::Video,
            _ => FileTypeGroup::Other,
        }
    }
}

/// One indexed file. Only `file_type_group == Image` entities participate in
/// search (`4.A`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub library_id: i64,
    pub folder_id: i64,
    pub filepath: String,
    pub filename: String,
    pub size: i64,
    pub file_type: String,
    pub file_type_group: FileTypeGroup,
    pub file_created_at: i64,
    pub file_last_modified_at: i64,
    pub last_scan_at: Option<i64>,
    pub fts_indexed_at: Option<i64>,
    pub vec_indexed_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    UserGenerated,
    SystemGenerated,
    PluginGenerated,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::UserGenerated => "user_generated",
            SourceType::SystemGenerated => "system_generated",
            SourceType::PluginGenerated => "plugin_generated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "user_generated" => SourceType::UserGenerated,
            "plugin_generated" => SourceType::PluginGenerated,
            _ => SourceType::SystemGenerated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Json,
    Text,
    Number,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Json => "json",
            DataType::Text => "text",
            DataType::Number => "number",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "json" => DataType::Json,
            "number" => DataType::Number,
            _ => DataType::Text,
        }
    }
}

/// `(entity_id, key)` is unique within a single entity's metadata set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub entity_id: i64,
    pub key: String,
    pub value: String,
    pub source: String,
    pub source_type: SourceType,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTag {
    pub entity_id: i64,
    pub tag_id: i64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryPlugin {
    pub library_id: i64,
    pub plugin_id: i64,
}

/// The full materialized view of an entity used at hydration time by
/// hybrid search: row plus its metadata and tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedEntity {
    pub entity: Entity,
    pub metadata: Vec<EntityMetadata>,
    pub tags: Vec<Tag>,
}

/// Filters shared by `full_text_search` and `vector_search` (`4.A`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub library_ids: Option<Vec<i64>>,
    pub start_unix: Option<i64>,
    pub end_unix: Option<i64>,
}
