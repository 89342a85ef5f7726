use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

pub const DB_FILE: &str = "ledger.sqlite3";

// Row id holding a non-map value written directly at a collection root
// (e.g. `lockedAttendanceDates`). Path segments are never empty, so it cannot
// collide with a document id.
const ROOT_VALUE_ID: &str = "";

const FORBIDDEN_SEGMENT_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid path: {0}")]
    BadPath(String),
    #[error("precondition failed at {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A `/`-separated address into the document tree: `collection`,
/// `collection/id`, or `collection/id/field/...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let segments = split_segments(raw)?;
        if segments.is_empty() {
            return Err(StoreError::BadPath("path must not be empty".to_string()));
        }
        Ok(Self { segments })
    }

    pub fn root(collection: &str) -> Self {
        Self {
            segments: vec![collection.to_string()],
        }
    }

    /// Appends one segment verbatim. Callers pass ids and field names that
    /// never went through [`StorePath::parse`]; an id containing `/` simply
    /// addresses a document that does not exist.
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Appends a caller supplied relative path, validating each segment.
    pub fn join(&self, rel: &str) -> Result<Self, StoreError> {
        let extra = split_segments(rel)?;
        if extra.is_empty() {
            return Err(StoreError::BadPath(format!("empty key under {}", self)));
        }
        let mut segments = self.segments.clone();
        segments.extend(extra);
        Ok(Self { segments })
    }

    pub fn collection(&self) -> &str {
        &self.segments[0]
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.segments.get(1).map(String::as_str)
    }

    /// Segments below the document (empty for collection and document paths).
    pub fn field_path(&self) -> &[String] {
        if self.segments.len() > 2 {
            &self.segments[2..]
        } else {
            &[]
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Segments of `self` below `ancestor`, if `ancestor` is a strict prefix.
    pub fn strip_prefix(&self, ancestor: &StorePath) -> Option<&[String]> {
        if ancestor.segments.len() < self.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
        {
            Some(&self.segments[ancestor.segments.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn split_segments(raw: &str) -> Result<Vec<String>, StoreError> {
    let mut out = Vec::new();
    for seg in raw.split('/').map(str::trim).filter(|s| !s.is_empty()) {
        if seg.contains(FORBIDDEN_SEGMENT_CHARS) {
            return Err(StoreError::BadPath(format!(
                "segment {:?} contains one of . # $ [ ]",
                seg
            )));
        }
        out.push(seg.to_string());
    }
    Ok(out)
}

/// Follows `rel` into `value`; arrays are indexed by decimal segments.
pub fn descend<'a>(value: &'a Value, rel: &[String]) -> Option<&'a Value> {
    rel.iter().try_fold(value, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Writes `value` at `rel` inside `target`, creating intermediate objects.
/// A `null` value removes the key.
pub fn assign(target: &mut Value, rel: &[String], value: Value) {
    let Some((last, parents)) = rel.split_last() else {
        *target = value;
        return;
    };
    let mut cur = target;
    for seg in parents {
        let idx = cur
            .as_array()
            .and_then(|items| seg.parse::<usize>().ok().filter(|i| *i < items.len()));
        cur = match (idx, cur) {
            (Some(i), Value::Array(items)) => &mut items[i],
            (_, other) => ensure_object(other)
                .entry(seg.clone())
                .or_insert(Value::Null),
        };
    }
    if let Value::Array(items) = cur {
        if let Ok(idx) = last.parse::<usize>() {
            if idx < items.len() {
                items[idx] = value;
                return;
            }
        }
    }
    let map = ensure_object(cur);
    if value.is_null() {
        map.remove(last);
    } else {
        map.insert(last.clone(), value);
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Set { path: StorePath, value: Value },
    Update { path: StorePath, partial: Map<String, Value> },
    Remove { path: StorePath },
}

impl WriteOp {
    pub fn path(&self) -> &StorePath {
        match self {
            WriteOp::Set { path, .. } | WriteOp::Update { path, .. } | WriteOp::Remove { path } => {
                path
            }
        }
    }
}

/// An atomic multi-path write. Every expectation is checked against the
/// current tree before any operation is applied; a mismatch aborts the whole
/// batch with [`StoreError::Conflict`]. An expected `null` means "absent".
#[derive(Debug, Clone, Default)]
pub struct Batch {
    expectations: Vec<(StorePath, Value)>,
    ops: Vec<WriteOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&mut self, path: StorePath, value: Value) -> &mut Self {
        self.expectations.push((path, value));
        self
    }

    pub fn set(&mut self, path: StorePath, value: Value) -> &mut Self {
        self.ops.push(WriteOp::Set { path, value });
        self
    }

    pub fn update(&mut self, path: StorePath, partial: Map<String, Value>) -> &mut Self {
        self.ops.push(WriteOp::Update { path, partial });
        self
    }

    pub fn remove(&mut self, path: StorePath) -> &mut Self {
        self.ops.push(WriteOp::Remove { path });
        self
    }

    pub fn expectations(&self) -> &[(StorePath, Value)] {
        &self.expectations
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Path-addressed JSON document tree.
pub trait DocumentStore {
    fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    fn commit(&self, batch: &Batch) -> Result<(), StoreError>;

    fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let mut batch = Batch::new();
        batch.set(path.clone(), value);
        self.commit(&batch)
    }

    fn update(&self, path: &StorePath, partial: Map<String, Value>) -> Result<(), StoreError> {
        let mut batch = Batch::new();
        batch.update(path.clone(), partial);
        self.commit(&batch)
    }

    fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let mut batch = Batch::new();
        batch.remove(path.clone());
        self.commit(&batch)
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(workspace)?;
        let conn = Connection::open(workspace.join(DB_FILE))?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    // Documents are stored one row per `collection/id`; rowid order is the
    // insertion order that collection reads project to.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(collection, id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
        [],
    )?;
    Ok(())
}

impl DocumentStore for SqliteStore {
    fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        read(&self.conn, path)
    }

    fn commit(&self, batch: &Batch) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for (path, expected) in batch.expectations() {
            let current = read(&tx, path)?.unwrap_or(Value::Null);
            if &current != expected {
                // Dropping the transaction rolls it back.
                return Err(StoreError::Conflict(path.to_string()));
            }
        }
        for op in batch.ops() {
            match op {
                WriteOp::Set { path, value } => write_set(&tx, path, value)?,
                WriteOp::Update { path, partial } => {
                    for (key, value) in partial {
                        write_set(&tx, &path.join(key)?, value)?;
                    }
                }
                WriteOp::Remove { path } => write_set(&tx, path, &Value::Null)?,
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn read(conn: &Connection, path: &StorePath) -> Result<Option<Value>, StoreError> {
    let collection = path.collection();
    let Some(id) = path.doc_id() else {
        return read_collection(conn, collection);
    };
    let Some(doc) = read_doc(conn, collection, id)? else {
        return Ok(None);
    };
    Ok(descend(&doc, path.field_path()).cloned())
}

fn read_doc(conn: &Connection, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ? AND id = ?",
            (collection, id),
            |r| r.get(0),
        )
        .optional()?;
    match body {
        Some(b) => Ok(Some(serde_json::from_str(&b)?)),
        None => Ok(None),
    }
}

fn read_collection(conn: &Connection, collection: &str) -> Result<Option<Value>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, body FROM documents WHERE collection = ? ORDER BY rowid")?;
    let rows = stmt
        .query_map([collection], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Ok(None);
    }
    if let Some((_, body)) = rows.iter().find(|(id, _)| id == ROOT_VALUE_ID) {
        return Ok(Some(serde_json::from_str(body)?));
    }
    let mut map = Map::new();
    for (id, body) in rows {
        map.insert(id, serde_json::from_str(&body)?);
    }
    Ok(Some(Value::Object(map)))
}

fn write_set(conn: &Connection, path: &StorePath, value: &Value) -> Result<(), StoreError> {
    let collection = path.collection();
    let Some(id) = path.doc_id() else {
        conn.execute("DELETE FROM documents WHERE collection = ?", [collection])?;
        match value {
            Value::Null => {}
            Value::Object(children) => {
                for (child_id, child) in children {
                    split_segments(child_id)?;
                    if child_id.contains('/') {
                        return Err(StoreError::BadPath(format!(
                            "document id {:?} contains '/'",
                            child_id
                        )));
                    }
                    if !child.is_null() {
                        upsert_doc(conn, collection, child_id, child)?;
                    }
                }
            }
            other => upsert_doc(conn, collection, ROOT_VALUE_ID, other)?,
        }
        return Ok(());
    };

    // Writing below a root value turns the root back into a map.
    conn.execute(
        "DELETE FROM documents WHERE collection = ? AND id = ?",
        (collection, ROOT_VALUE_ID),
    )?;

    let rel = path.field_path();
    if rel.is_empty() {
        if value.is_null() {
            conn.execute(
                "DELETE FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
            )?;
        } else {
            upsert_doc(conn, collection, id, value)?;
        }
        return Ok(());
    }

    let existing = read_doc(conn, collection, id)?;
    if existing.is_none() && value.is_null() {
        return Ok(());
    }
    let mut doc = existing.unwrap_or_else(|| Value::Object(Map::new()));
    assign(&mut doc, rel, value.clone());
    upsert_doc(conn, collection, id, &doc)
}

fn upsert_doc(conn: &Connection, collection: &str, id: &str, body: &Value) -> Result<(), StoreError> {
    let text = serde_json::to_string(body)?;
    conn.execute(
        "INSERT INTO documents(collection, id, body, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(collection, id) DO UPDATE SET
           body = excluded.body,
           updated_at = excluded.updated_at",
        (collection, id, &text, chrono::Utc::now().to_rfc3339()),
    )?;
    Ok(())
}
