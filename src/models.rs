//! Core data types persisted by the storage engine.
//!
//! Every record type mirrors one table. Ids are UUID strings; the canonical
//! external form is `"<table>:<id>"` (see [`crate::db`]). Timestamps are UTC
//! epoch seconds in storage and ISO-8601 on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Embedding dimension every stored vector is normalized to.
pub const EMBEDDING_DIM: usize = 768;

/// A scoped key–value fact, unique per `(user_id, key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub user_id: String,
    pub key: String,
    /// Arbitrary JSON: string, number, bool, object, or array.
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A free-form memory with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMemory {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// One chunk of a knowledge-base document. Chunks of the same document share
/// `source_file` and carry contiguous `chunk_index` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbChunk {
    pub id: String,
    pub file_path: String,
    pub content: String,
    pub metadata: Value,
    pub source_file: String,
    pub chunk_index: i64,
    pub chunk_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A typed graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub properties: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    /// Edge kind, e.g. `wrote`, `mentioned_in`, `related_to`.
    pub kind: String,
    pub from_id: String,
    pub to_id: String,
    pub properties: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A time-ordered event under a colon-delimited subject (`error:db`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Indexing lifecycle of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl IndexingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexingStatus::Pending => "pending",
            IndexingStatus::Running => "running",
            IndexingStatus::Completed => "completed",
            IndexingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IndexingStatus::Pending),
            "running" => Some(IndexingStatus::Running),
            "completed" => Some(IndexingStatus::Completed),
            "failed" => Some(IndexingStatus::Failed),
            _ => None,
        }
    }
}

/// A registered source-code project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeProject {
    pub project_id: String,
    pub name: String,
    pub root_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_stats: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub indexing_status: IndexingStatus,
    pub watcher_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-file index bookkeeping. `file_hash` lets unchanged files skip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeFile {
    pub project_id: String,
    pub file_path: String,
    pub language: String,
    pub file_hash: String,
    pub symbols_count: i64,
    pub indexed_at: DateTime<Utc>,
}

/// Kind of an extracted symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolType {
    Package,
    Class,
    Interface,
    Function,
    Method,
    Property,
    Constant,
    Enum,
    Variable,
}

impl SymbolType {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolType::Package => "package",
            SymbolType::Class => "class",
            SymbolType::Interface => "interface",
            SymbolType::Function => "function",
            SymbolType::Method => "method",
            SymbolType::Property => "property",
            SymbolType::Constant => "constant",
            SymbolType::Enum => "enum",
            SymbolType::Variable => "variable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "package" => Some(SymbolType::Package),
            "class" => Some(SymbolType::Class),
            "interface" => Some(SymbolType::Interface),
            "function" => Some(SymbolType::Function),
            "method" => Some(SymbolType::Method),
            "property" => Some(SymbolType::Property),
            "constant" => Some(SymbolType::Constant),
            "enum" => Some(SymbolType::Enum),
            "variable" => Some(SymbolType::Variable),
            _ => None,
        }
    }
}

/// An extracted source symbol. `name_path` is slash-delimited from the file
/// or package root (`pkg/Struct/method`) and unique within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSymbol {
    pub id: String,
    pub project_id: String,
    pub file_path: String,
    pub language: String,
    pub symbol_type: SymbolType,
    pub name: String,
    pub name_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub source_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub metadata: Value,
}

/// One chunk of a symbol whose source exceeds the embedding budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub symbol_id: String,
    pub project_id: String,
    pub file_path: String,
    pub chunk_index: i64,
    pub chunk_count: i64,
    pub content: String,
    pub start_offset: i64,
    pub end_offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub symbol_name: String,
    pub symbol_type: SymbolType,
    pub language: String,
}

/// Lifecycle of an indexing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit a new job for the same project.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// A persistent record of one indexing run over one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingJob {
    pub id: String,
    pub project_id: String,
    pub project_path: String,
    pub status: JobStatus,
    /// Fraction of files processed, in `[0, 1]`.
    pub progress: f64,
    pub files_total: i64,
    pub files_indexed: i64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A scored hit returned by vector or hybrid search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord<T> {
    pub id: String,
    /// Normalized relevance in `[0.0, 1.0]`.
    pub score: f64,
    pub record: T,
}
