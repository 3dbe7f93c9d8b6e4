//! Patch operations and their application to a keyed collection snapshot.
//!
//! The server streams JSON-Patch-shaped messages: an initial `replace` of the
//! whole collection object, then `add`/`replace`/`remove` operations addressed
//! at `/<collection>/<id>` (whole-record upsert or delete) or at a nested
//! field below the id (subpath replace).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::error::SyncError;

/// The operation kind of a patch message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Replace,
    Remove,
}

/// One incremental operation as received on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    /// Builds a whole-collection replace (the initial snapshot message).
    pub fn replace_root(collection: &str, value: Value) -> Self {
        Self {
            op: PatchKind::Replace,
            path: format!("/{}", collection),
            value: Some(value),
        }
    }

    /// Builds an entry upsert at `/<collection>/<id>`.
    pub fn upsert(collection: &str, id: &str, value: Value) -> Self {
        Self {
            op: PatchKind::Replace,
            path: format!("/{}/{}", collection, id),
            value: Some(value),
        }
    }

    /// Builds an entry removal at `/<collection>/<id>`.
    pub fn remove(collection: &str, id: &str) -> Self {
        Self {
            op: PatchKind::Remove,
            path: format!("/{}/{}", collection, id),
            value: None,
        }
    }
}

/// A parsed patch path: collection key, optional entry id, optional subpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPath<'a> {
    pub collection: &'a str,
    pub id: Option<&'a str>,
    pub field: Vec<&'a str>,
}

impl<'a> PatchPath<'a> {
    /// Parses `/<collection>`, `/<collection>/<id>` or
    /// `/<collection>/<id>/<field...>`. Returns None for paths that do not
    /// start with a collection key.
    pub fn parse(path: &'a str) -> Option<Self> {
        let rest = path.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let collection = parts.next().filter(|s| !s.is_empty())?;
        let id = parts.next().filter(|s| !s.is_empty());
        let field: Vec<&str> = parts.filter(|s| !s.is_empty()).collect();
        Some(Self {
            collection,
            id,
            field,
        })
    }
}

/// An entry in a collection snapshot.
///
/// `seq` is a monotone insertion sequence used as the tie-break when sorting
/// views by a non-unique key; it survives upserts so re-replacing a record
/// does not move it.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub record: T,
    pub seq: u64,
}

/// A keyed collection snapshot built by applying patch operations in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    entries: HashMap<String, Entry<T>>,
    next_seq: u64,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Collection<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id).map(|e| &e.record)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(id, e)| (id.as_str(), &e.record))
    }

    /// Upserts a record, preserving the insertion sequence of an existing id.
    pub fn insert(&mut self, id: String, record: T) {
        match self.entries.get_mut(&id) {
            Some(entry) => entry.record = record,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(id, Entry { record, seq });
            }
        }
    }

    /// Removes a record. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_seq = 0;
    }

    /// Returns records sorted by `key`, ties broken by insertion sequence.
    pub fn sorted_by<K: Ord>(&self, key: impl Fn(&T) -> K) -> Vec<&T> {
        let mut entries: Vec<&Entry<T>> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            key(&a.record)
                .cmp(&key(&b.record))
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|e| &e.record).collect()
    }
}

impl<T: Clone> Collection<T> {
    /// Clones the snapshot out as a plain id-to-record map.
    pub fn to_map(&self) -> HashMap<String, T> {
        self.entries
            .iter()
            .map(|(id, e)| (id.clone(), e.record.clone()))
            .collect()
    }
}

impl<T: Serialize + DeserializeOwned> Collection<T> {
    /// Replaces the whole collection with the given object value.
    ///
    /// Entries are inserted in the value's key order, so the insertion
    /// sequence of a fresh snapshot is deterministic.
    pub fn replace_all(&mut self, value: &Value) -> Result<(), SyncError> {
        let map: serde_json::Map<String, Value> = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::MalformedPatch(e.to_string()))?;
        self.clear();
        for (id, v) in map {
            let record: T =
                serde_json::from_value(v).map_err(|e| SyncError::MalformedPatch(e.to_string()))?;
            self.insert(id, record);
        }
        Ok(())
    }

    /// Upserts the record at `id` from a wire value (whole-record replace).
    pub fn upsert_value(&mut self, id: &str, value: &Value) -> Result<(), SyncError> {
        let record: T = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::MalformedPatch(e.to_string()))?;
        self.insert(id.to_string(), record);
        Ok(())
    }

    /// Replaces only the given subpath of the record at `id`.
    ///
    /// The record is round-tripped through its JSON representation so the
    /// subpath write cannot observe partially-updated typed state. A missing
    /// id is a no-op (the stream may race a field update past a removal).
    pub fn update_field(
        &mut self,
        id: &str,
        field: &[&str],
        value: &Value,
    ) -> Result<(), SyncError> {
        let Some(entry) = self.entries.get_mut(id) else {
            return Ok(());
        };
        let mut repr = serde_json::to_value(&entry.record)
            .map_err(|e| SyncError::MalformedPatch(e.to_string()))?;
        set_subpath(&mut repr, field, value.clone())?;
        entry.record =
            serde_json::from_value(repr).map_err(|e| SyncError::MalformedPatch(e.to_string()))?;
        Ok(())
    }

    /// Removes the given subpath from the record at `id`, if present.
    pub fn remove_field(&mut self, id: &str, field: &[&str]) -> Result<(), SyncError> {
        let Some(entry) = self.entries.get_mut(id) else {
            return Ok(());
        };
        let mut repr = serde_json::to_value(&entry.record)
            .map_err(|e| SyncError::MalformedPatch(e.to_string()))?;
        if remove_subpath(&mut repr, field) {
            entry.record = serde_json::from_value(repr)
                .map_err(|e| SyncError::MalformedPatch(e.to_string()))?;
        }
        Ok(())
    }
}

fn set_subpath(target: &mut Value, field: &[&str], value: Value) -> Result<(), SyncError> {
    let Some((last, parents)) = field.split_last() else {
        return Err(SyncError::MalformedPatch("empty field path".to_string()));
    };
    let mut current = target;
    for part in parents {
        let obj = current
            .as_object_mut()
            .ok_or_else(|| SyncError::MalformedPatch(format!("'{}' is not an object", part)))?;
        current = obj
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    let obj = current
        .as_object_mut()
        .ok_or_else(|| SyncError::MalformedPatch(format!("'{}' is not an object", last)))?;
    obj.insert(last.to_string(), value);
    Ok(())
}

fn remove_subpath(target: &mut Value, field: &[&str]) -> bool {
    let Some((last, parents)) = field.split_last() else {
        return false;
    };
    let mut current = target;
    for part in parents {
        match current.get_mut(*part) {
            Some(next) => current = next,
            None => return false,
        }
    }
    match current.as_object_mut() {
        Some(obj) => obj.remove(*last).is_some(),
        None => false,
    }
}
