use crate::cache::LocalCache;
use crate::error::{LedgerError, LedgerResult};
use crate::model::Collection;
use crate::store::{Batch, DocumentStore, StoreError, StorePath, WriteOp};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Mediates every read and write against the document store.
///
/// Writes require the liveness flag and are never queued. Reads prefer the
/// store; when the store is unreachable (or the flag is down) they are served
/// from the last value seen for the same path.
pub struct Records {
    store: Box<dyn DocumentStore>,
    cache: LocalCache,
    online: bool,
}

impl Records {
    pub fn new(store: Box<dyn DocumentStore>) -> Self {
        Self {
            store,
            cache: LocalCache::new(),
            online: true,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        if self.online != online {
            tracing::info!(online, "connection status changed");
        }
        self.online = online;
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cached_paths(&self) -> usize {
        self.cache.len()
    }

    fn ensure_online(&self) -> LedgerResult<()> {
        if self.online {
            Ok(())
        } else {
            Err(LedgerError::Offline)
        }
    }

    pub fn get_data(&mut self, path: &StorePath) -> LedgerResult<Option<Value>> {
        if !self.online {
            return self.cache.get(path).cloned().map(Some).ok_or(LedgerError::Offline);
        }
        match self.store.get(path) {
            Ok(value) => {
                self.cache.remember(path, value.as_ref());
                Ok(value)
            }
            Err(e) => match self.cache.get(path) {
                Some(cached) => {
                    tracing::warn!(%path, error = %e, "store read failed, serving cached value");
                    Ok(Some(cached.clone()))
                }
                None => Err(e.into()),
            },
        }
    }

    pub fn save_data(&mut self, path: &StorePath, value: Value) -> LedgerResult<()> {
        self.ensure_online()?;
        tracing::debug!(%path, "save");
        self.store.set(path, value.clone())?;
        self.cache.apply_set(path, &value);
        Ok(())
    }

    /// Appends `value` under a fresh key, storing the key as the document's
    /// `id`, and returns it.
    pub fn push_data(&mut self, path: &StorePath, value: Value) -> LedgerResult<String> {
        let Value::Object(mut doc) = value else {
            return Err(LedgerError::validation("pushed value must be an object"));
        };
        let id = Uuid::new_v4().to_string();
        doc.insert("id".to_string(), Value::String(id.clone()));
        self.save_data(&path.child(&id), Value::Object(doc))?;
        Ok(id)
    }

    pub fn update_data(&mut self, path: &StorePath, partial: Map<String, Value>) -> LedgerResult<()> {
        self.ensure_online()?;
        tracing::debug!(%path, keys = partial.len(), "update");
        self.store.update(path, partial.clone())?;
        self.cache.apply_update(path, &partial);
        Ok(())
    }

    pub fn delete_data(&mut self, path: &StorePath) -> LedgerResult<()> {
        self.ensure_online()?;
        tracing::debug!(%path, "delete");
        self.store.remove(path)?;
        self.cache.apply_set(path, &Value::Null);
        Ok(())
    }

    /// Applies `batch` atomically; the cache only sees it once the store has
    /// accepted every write.
    pub fn commit(&mut self, batch: &Batch) -> LedgerResult<()> {
        self.ensure_online()?;
        if batch.is_empty() {
            return Ok(());
        }
        tracing::debug!(ops = batch.ops().len(), checks = batch.expectations().len(), "commit");
        self.store.commit(batch)?;
        for op in batch.ops() {
            match op {
                WriteOp::Set { path, value } => self.cache.apply_set(path, value),
                WriteOp::Update { path, partial } => self.cache.apply_update(path, partial),
                WriteOp::Remove { path } => self.cache.apply_set(path, &Value::Null),
            }
        }
        Ok(())
    }

    /// Projects the map at `path` to its values. No order is promised.
    pub fn get_array_data(&mut self, path: &StorePath) -> LedgerResult<Vec<Value>> {
        Ok(match self.get_data(path)? {
            Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
            Some(Value::Array(items)) => items.into_iter().filter(|v| !v.is_null()).collect(),
            _ => Vec::new(),
        })
    }

    pub fn add_to_array(&mut self, collection: Collection, value: Value) -> LedgerResult<String> {
        self.push_data(&collection.path(), value)
    }

    pub fn remove_from_array(&mut self, collection: Collection, id: &str) -> LedgerResult<()> {
        self.delete_data(&collection.doc(id))
    }

    pub fn update_in_array(
        &mut self,
        collection: Collection,
        id: &str,
        partial: Map<String, Value>,
    ) -> LedgerResult<()> {
        self.update_data(&collection.doc(id), partial)
    }

    /// Typed listing. Documents missing an `id` get their key injected.
    pub fn list<T: DeserializeOwned>(&mut self, collection: Collection) -> LedgerResult<Vec<T>> {
        let Some(Value::Object(map)) = self.get_data(&collection.path())? else {
            return Ok(Vec::new());
        };
        map.into_iter()
            .map(|(id, doc)| decode(collection, &id, doc))
            .collect()
    }

    pub fn find<T: DeserializeOwned>(
        &mut self,
        collection: Collection,
        id: &str,
    ) -> LedgerResult<Option<T>> {
        match self.get_data(&collection.doc(id))? {
            Some(doc) => decode(collection, id, doc).map(Some),
            None => Ok(None),
        }
    }

    pub fn require<T: DeserializeOwned>(&mut self, collection: Collection, id: &str) -> LedgerResult<T> {
        self.find(collection, id)?.ok_or_else(|| {
            LedgerError::not_found(format!("{} {}", singular(collection), id))
        })
    }
}

fn decode<T: DeserializeOwned>(collection: Collection, id: &str, mut doc: Value) -> LedgerResult<T> {
    if let Value::Object(map) = &mut doc {
        map.entry("id".to_string())
            .or_insert_with(|| Value::String(id.to_string()));
    }
    serde_json::from_value(doc).map_err(|source| LedgerError::Malformed {
        collection: collection.as_str().to_string(),
        id: id.to_string(),
        source,
    })
}

pub fn to_document<T: Serialize>(value: &T) -> LedgerResult<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::from(e).into())
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn singular(collection: Collection) -> &'static str {
    match collection {
        Collection::Users => "user",
        Collection::Tasks => "task",
        Collection::Tests => "test",
        Collection::Projects => "project",
        Collection::Submissions => "submission",
        Collection::TestResults => "test result",
        Collection::ProjectSubmissions => "project submission",
        Collection::WithdrawalRequests => "withdrawal request",
        Collection::PaymentTransactions => "transaction",
        Collection::MonthlyPayments => "payment",
        Collection::AttendanceRecords => "attendance record",
        Collection::AttendanceConfirmations => "attendance confirmation",
        Collection::ChatMessages => "chat message",
        Collection::Notifications => "notification",
        Collection::UserActivity => "activity entry",
        Collection::Referrals => "referral",
        Collection::Groups => "group",
        Collection::Operations => "operation",
        Collection::Settings => "setting",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Wraps a store and fails every call while `down` is set.
    pub(crate) struct FlakyStore {
        inner: SqliteStore,
        down: Rc<Cell<bool>>,
    }

    impl FlakyStore {
        pub(crate) fn new() -> (Self, Rc<Cell<bool>>) {
            let down = Rc::new(Cell::new(false));
            let store = Self {
                inner: SqliteStore::open_in_memory().expect("store"),
                down: down.clone(),
            };
            (store, down)
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.down.get() {
                Err(StoreError::Unavailable("network unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl DocumentStore for FlakyStore {
        fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
            self.check()?;
            self.inner.get(path)
        }

        fn commit(&self, batch: &Batch) -> Result<(), StoreError> {
            self.check()?;
            self.inner.commit(batch)
        }
    }

    fn records() -> Records {
        Records::new(Box::new(SqliteStore::open_in_memory().expect("store")))
    }

    fn partial(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn push_injects_generated_id() {
        let mut r = records();
        let id = r
            .add_to_array(Collection::Tasks, json!({ "title": "Essay" }))
            .expect("push");
        let doc = r.get_data(&Collection::Tasks.doc(&id)).expect("get").expect("doc");
        assert_eq!(doc["id"], id);
        assert_eq!(doc["title"], "Essay");
        assert!(r.add_to_array(Collection::Tasks, json!(5)).is_err());
    }

    #[test]
    fn collection_helpers_read_their_own_writes() {
        let mut r = records();
        let a = r.add_to_array(Collection::Groups, json!({ "name": "A" })).expect("a");
        let b = r.add_to_array(Collection::Groups, json!({ "name": "B" })).expect("b");
        assert_eq!(r.get_array_data(&Collection::Groups.path()).expect("list").len(), 2);

        r.update_in_array(Collection::Groups, &a, partial(json!({ "name": "A2" })))
            .expect("update");
        let names: Vec<Value> = r
            .get_array_data(&Collection::Groups.path())
            .expect("list")
            .into_iter()
            .map(|g| g["name"].clone())
            .collect();
        assert!(names.contains(&json!("A2")));

        r.remove_from_array(Collection::Groups, &b).expect("remove");
        let left = r.get_array_data(&Collection::Groups.path()).expect("list");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["id"], a);
    }

    #[test]
    fn offline_refuses_writes_and_serves_cached_reads() {
        let mut r = records();
        let path = Collection::Users.doc("u1");
        r.save_data(&path, json!({ "name": "Ali", "rating": 3 })).expect("save");
        r.get_data(&path).expect("warm cache");

        r.set_online(false);
        assert!(matches!(
            r.save_data(&path, json!({})),
            Err(LedgerError::Offline)
        ));
        assert!(matches!(r.commit(&Batch::new()), Err(LedgerError::Offline)));
        assert_eq!(r.get_data(&path).expect("cached").expect("doc")["rating"], 3);
        assert!(matches!(
            r.get_data(&Collection::Tasks.path()),
            Err(LedgerError::Offline)
        ));

        r.set_online(true);
        assert_eq!(r.get_data(&path).expect("get").expect("doc")["name"], "Ali");
    }

    #[test]
    fn store_failure_falls_back_to_cache_or_propagates() {
        let (store, down) = FlakyStore::new();
        let mut r = Records::new(Box::new(store));
        let path = Collection::Users.doc("u1");
        r.save_data(&path, json!({ "rating": 9 })).expect("save");

        down.set(true);
        assert_eq!(r.get_data(&path).expect("fallback").expect("doc")["rating"], 9);
        assert!(matches!(
            r.get_data(&Collection::Referrals.path()),
            Err(LedgerError::Store(StoreError::Unavailable(_)))
        ));
        assert!(r.save_data(&path, json!({ "rating": 10 })).is_err());

        down.set(false);
        assert_eq!(r.get_data(&path).expect("get").expect("doc")["rating"], 9);
    }

    #[test]
    fn typed_reads_report_malformed_documents() {
        let mut r = records();
        r.save_data(&Collection::Groups.doc("g1"), json!({ "name": 42 }))
            .expect("save");
        let res = r.find::<crate::model::Group>(Collection::Groups, "g1");
        assert!(matches!(res, Err(LedgerError::Malformed { ref id, .. }) if id == "g1"));
        let missing = r.require::<crate::model::Group>(Collection::Groups, "nope");
        assert!(matches!(missing, Err(LedgerError::NotFound(_))));
    }
}
