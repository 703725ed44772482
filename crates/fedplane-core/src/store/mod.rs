//! Persistence seams.
//!
//! [`DocumentStore`] is the contract of the backing document database: keyed lookup, condition filter, sorted/paginated listing and atomic field-level upsert.
//! [`TaskStore`] builds the task table on top of it.

mod memory;
pub use memory::MemoryDocumentStore;

mod task;
pub use task::{TASK_TABLE, TaskStore};

use async_trait::async_trait;
use fedplane_model::{Condition, ListOptions};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub keys: Vec<String>,
    pub unique: bool,
}

impl Index {
    pub fn new(name: impl Into<String>, keys: &[&str], unique: bool) -> Self {
        Self {
            name: name.into(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            unique,
        }
    }
}

/// Backing document database.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn has_table(&self, table: &str) -> Result<bool, CoreError>;

    /// Create a table with its indexes. Creating an existing table is an error.
    async fn create_table(&self, table: &str, indexes: &[Index]) -> Result<(), CoreError>;

    /// Insert a new document; unique index violations are [`CoreError::Conflict`].
    async fn insert(&self, table: &str, doc: Value) -> Result<(), CoreError>;

    /// `$set` the given fields on every document matching `cond`.
    ///
    /// Keys may be dotted to reach nested objects. With `upsert` and no match, a new document is built from `fields`.
    /// Returns the number of matched documents.
    async fn set_fields(
        &self,
        table: &str,
        cond: &Condition,
        fields: Map<String, Value>,
        upsert: bool,
    ) -> Result<u64, CoreError>;

    /// Returns the number of deleted documents.
    async fn delete(&self, table: &str, cond: &Condition) -> Result<u64, CoreError>;

    /// Filter, sort, then apply `offset`/`limit` from `opts`.
    async fn find(
        &self,
        table: &str,
        cond: &Condition,
        opts: &ListOptions,
    ) -> Result<Vec<Value>, CoreError>;

    async fn count(&self, table: &str, cond: &Condition) -> Result<usize, CoreError>;
}
