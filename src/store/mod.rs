//! Storage engine: typed operations over every record family.
//!
//! [`MemoryStore`] is the single owner of persisted records. It wraps the
//! datastore adapter, the embedding pipeline, and the optional
//! knowledge-base directory, and exposes the operation groups as `impl`
//! blocks split by family:
//!
//! | Module | Operations |
//! |--------|------------|
//! | [`facts`] | `save_fact`, `get_fact`, `delete_fact`, `list_facts` |
//! | [`vectors`] | `save_vector`, `search_vectors`, `delete_vector`, `list_vectors` |
//! | [`kb`] | `kb_add`, `kb_search`, `kb_get`, `kb_delete`, `kb_list`, `kb_sync` |
//! | [`graph`] | `entity_*`, `relation_create`, `traverse` |
//! | [`events`] | `save_event`, `search_events` |
//! | [`code`] | project/file/symbol/chunk/job operations |
//!
//! Failure semantics: not-found is an empty result, unique-key conflicts
//! surface as [`crate::error::Error::Conflict`], driver errors are wrapped
//! with their statement, and nothing is retried here.

pub mod code;
pub mod events;
pub mod facts;
pub mod graph;
pub mod kb;
pub mod vectors;

use std::path::PathBuf;

use crate::db::Datastore;
use crate::embedding::Embedder;

/// The storage engine every tool and the indexer write through.
#[derive(Clone)]
pub struct MemoryStore {
    ds: Datastore,
    embedder: Embedder,
    code_embedder: Embedder,
    kb_root: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(
        ds: Datastore,
        embedder: Embedder,
        code_embedder: Embedder,
        kb_root: Option<PathBuf>,
    ) -> Self {
        Self {
            ds,
            embedder,
            code_embedder,
            kb_root,
        }
    }

    pub fn datastore(&self) -> &Datastore {
        &self.ds
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn code_embedder(&self) -> &Embedder {
        &self.code_embedder
    }

    pub fn kb_root(&self) -> Option<&PathBuf> {
        self.kb_root.as_ref()
    }
}

/// Current wall clock as epoch seconds, the storage representation of
/// every timestamp column.
pub(crate) fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}
