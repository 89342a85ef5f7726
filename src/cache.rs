use crate::store::{assign, descend, StorePath};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Last-known values per path, used to serve reads while the store is
/// unreachable. It is never consulted to detect conflicting writes and never
/// buffers writes.
///
/// Writes are applied coherently: the exact entry, every cached ancestor
/// (patched at the relative position) and every cached descendant (re-derived
/// from the new value) are kept in step, so a read-your-own-write holds for
/// any path that was cached before.
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: HashMap<StorePath, Value>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &StorePath) -> Option<&Value> {
        self.entries.get(path)
    }

    /// Records a value observed from the store.
    pub fn remember(&mut self, path: &StorePath, value: Option<&Value>) {
        match value {
            Some(v) => {
                self.entries.insert(path.clone(), v.clone());
            }
            None => {
                self.entries.remove(path);
            }
        }
    }

    /// Applies a successful write of `value` (null = removal) at `path`.
    pub fn apply_set(&mut self, path: &StorePath, value: &Value) {
        let mut dropped: Vec<StorePath> = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            if key == path {
                if value.is_null() {
                    dropped.push(key.clone());
                } else {
                    *entry = value.clone();
                }
            } else if let Some(rel) = path.strip_prefix(key) {
                assign(entry, rel, value.clone());
            } else if let Some(rel) = key.strip_prefix(path) {
                match descend(value, rel) {
                    Some(v) => *entry = v.clone(),
                    None => dropped.push(key.clone()),
                }
            }
        }
        for key in dropped {
            self.entries.remove(&key);
        }
        if !value.is_null() {
            self.entries
                .entry(path.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Applies a successful shallow merge at `path`.
    pub fn apply_update(&mut self, path: &StorePath, partial: &Map<String, Value>) {
        for (key, value) in partial {
            if let Ok(child) = path.join(key) {
                self.apply_set(&child, value);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> StorePath {
        StorePath::parse(raw).expect("path")
    }

    #[test]
    fn writes_patch_cached_ancestors_and_descendants() {
        let mut cache = LocalCache::new();
        cache.remember(
            &path("users"),
            Some(&json!({ "u1": { "rating": 1 }, "u2": { "rating": 2 } })),
        );
        cache.remember(&path("users/u1/rating"), Some(&json!(1)));

        cache.apply_set(&path("users/u1"), &json!({ "rating": 50, "name": "A" }));
        assert_eq!(cache.get(&path("users")).expect("users")["u1"]["rating"], 50);
        assert_eq!(cache.get(&path("users/u1/rating")), Some(&json!(50)));

        cache.apply_set(&path("users/u2"), &Value::Null);
        assert!(cache.get(&path("users")).expect("users").get("u2").is_none());
    }

    #[test]
    fn update_merges_into_existing_entry() {
        let mut cache = LocalCache::new();
        cache.remember(&path("tasks/t1"), Some(&json!({ "title": "x", "status": "active" })));
        let mut partial = Map::new();
        partial.insert("status".into(), json!("inactive"));
        cache.apply_update(&path("tasks/t1"), &partial);
        assert_eq!(
            cache.get(&path("tasks/t1")),
            Some(&json!({ "title": "x", "status": "inactive" }))
        );
        assert_eq!(cache.get(&path("tasks/t1/status")), Some(&json!("inactive")));
    }
}
