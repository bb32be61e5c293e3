//! In-process store
//!
//! Same contract as Redis for the subset the service uses. Cursor scans walk the
//! keyspace in sorted order, so pagination is deterministic.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{KeyType, Store, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

/// Store kept in a process-local map
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a key of any type exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Glob match supporting `*` only, which is all the service's patterns use
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut data = self.lock();
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        match entry {
            Value::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
            }
            other => {
                let mut fields = HashMap::new();
                fields.insert(field.to_string(), value.to_string());
                *other = Value::Hash(fields);
            }
        }
        Ok(())
    }

    async fn get_all_hash_fields(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        match self.lock().get(key) {
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            _ => Ok(HashMap::new()),
        }
    }

    async fn delete_key(&self, key: &str) -> StoreResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn add_set_members(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut data = self.lock();
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(BTreeSet::new()));
        if let Value::Hash(_) = entry {
            *entry = Value::Set(BTreeSet::new());
        }
        if let Value::Set(set) = entry {
            set.extend(members.iter().cloned());
        }
        Ok(())
    }

    async fn remove_set_members(&self, key: &str, members: &[String]) -> StoreResult<()> {
        let mut data = self.lock();
        let now_empty = match data.get_mut(key) {
            Some(Value::Set(set)) => {
                for member in members {
                    set.remove(member);
                }
                set.is_empty()
            }
            _ => false,
        };
        if now_empty {
            data.remove(key);
        }
        Ok(())
    }

    async fn get_set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.lock().get(key) {
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        key_type: KeyType,
    ) -> StoreResult<(Vec<String>, u64)> {
        let data = self.lock();
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        let count = count.max(1);

        let keys: Vec<String> = data
            .iter()
            .skip(start)
            .take(count)
            .filter(|(key, value)| {
                let type_matches = matches!(
                    (key_type, value),
                    (KeyType::Hash, Value::Hash(_)) | (KeyType::Set, Value::Set(_))
                );
                type_matches && glob_match(pattern, key)
            })
            .map(|(key, _)| key.clone())
            .collect();

        let next = start.saturating_add(count);
        let next = if next >= data.len() { 0 } else { next as u64 };
        Ok((keys, next))
    }
}
