use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use fedplane_model::{Condition, ListOptions};
use serde_json::{Map, Value};

use super::{DocumentStore, Index};
use crate::error::{CoreError, poisoned};

/// In-memory document store.
///
/// Documents keep insertion order, which is the listing order when no sort is requested.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<RwLock<HashMap<String, Table>>>,
    create_table_calls: Arc<AtomicUsize>,
}

struct Table {
    indexes: Vec<Index>,
    docs: Vec<Value>,
}

impl Table {
    fn violates_unique(&self, doc: &Value, skip: Option<usize>) -> Option<&str> {
        self.indexes.iter().filter(|i| i.unique).find_map(|index| {
            let key = index_key(doc, index);
            let clash = self
                .docs
                .iter()
                .enumerate()
                .filter(|(pos, _)| Some(*pos) != skip)
                .any(|(_, other)| index_key(other, index) == key);
            clash.then_some(index.name.as_str())
        })
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times [`DocumentStore::create_table`] has been called.
    pub fn create_table_calls(&self) -> usize {
        self.create_table_calls.load(Ordering::SeqCst)
    }
}

/// Writes never create tables; an unknown table would come up without its indexes.
fn missing_table(table: &str) -> CoreError {
    CoreError::Store(format!("table {table} does not exist"))
}

fn index_key<'a>(doc: &'a Value, index: &Index) -> Vec<Option<&'a Value>> {
    index.keys.iter().map(|k| doc.get(k)).collect()
}

/// Assign `value` at a dotted `path`, creating intermediate objects.
fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut node = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn has_table(&self, table: &str) -> Result<bool, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.contains_key(table))
    }

    async fn create_table(&self, table: &str, indexes: &[Index]) -> Result<(), CoreError> {
        self.create_table_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.contains_key(table) {
            return Err(CoreError::Store(format!("table {table} already exists")));
        }
        inner.insert(
            table.to_string(),
            Table {
                indexes: indexes.to_vec(),
                docs: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert(&self, table: &str, doc: Value) -> Result<(), CoreError> {
        if !doc.is_object() {
            return Err(CoreError::Store("document must be an object".into()));
        }
        let mut inner = self.inner.write().map_err(poisoned)?;
        let table_ref = inner.get_mut(table).ok_or_else(|| missing_table(table))?;
        if let Some(index) = table_ref.violates_unique(&doc, None) {
            return Err(CoreError::Conflict(format!(
                "duplicate key on {table}.{index}"
            )));
        }
        table_ref.docs.push(doc);
        Ok(())
    }

    async fn set_fields(
        &self,
        table: &str,
        cond: &Condition,
        fields: Map<String, Value>,
        upsert: bool,
    ) -> Result<u64, CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let table_ref = inner.get_mut(table).ok_or_else(|| missing_table(table))?;

        let mut matched = 0;
        for doc in table_ref.docs.iter_mut().filter(|d| cond.matches(d)) {
            for (path, value) in &fields {
                set_path(doc, path, value.clone());
            }
            matched += 1;
        }

        if matched == 0 && upsert {
            let mut doc = Value::Object(Map::new());
            for (path, value) in fields {
                set_path(&mut doc, &path, value);
            }
            if let Some(index) = table_ref.violates_unique(&doc, None) {
                return Err(CoreError::Conflict(format!(
                    "duplicate key on {table}.{index}"
                )));
            }
            table_ref.docs.push(doc);
        }
        Ok(matched)
    }

    async fn delete(&self, table: &str, cond: &Condition) -> Result<u64, CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let Some(table_ref) = inner.get_mut(table) else {
            return Ok(0);
        };
        let before = table_ref.docs.len();
        table_ref.docs.retain(|d| !cond.matches(d));
        Ok((before - table_ref.docs.len()) as u64)
    }

    async fn find(
        &self,
        table: &str,
        cond: &Condition,
        opts: &ListOptions,
    ) -> Result<Vec<Value>, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let Some(table_ref) = inner.get(table) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Value> = table_ref.docs.iter().filter(|d| cond.matches(d)).collect();
        if !opts.sort.is_empty() {
            matched.sort_by(|a, b| opts.compare(a, b));
        }

        Ok(matched
            .into_iter()
            .skip(opts.effective_offset())
            .take(opts.effective_limit())
            .cloned()
            .collect())
    }

    async fn count(&self, table: &str, cond: &Condition) -> Result<usize, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .get(table)
            .map(|t| t.docs.iter().filter(|d| cond.matches(d)).count())
            .unwrap_or(0))
    }
}
