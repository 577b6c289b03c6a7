//! Local document store: named collections of JSON documents with ordered
//! queries and snapshot push feeds.
//!
//! With a snapshot path, every committed write rewrites a gzip-compressed
//! JSON image of all collections; the image is loaded back on open.

use async_trait::async_trait;
use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{debug, error};
use serde_json::{Map, Value};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use super::{
    Collection, Document, DocumentStore, Query, ServerStamps, Subscription, WriteResult,
};
use crate::error::StoreError;
use crate::model::Timestamp;

type Collections = HashMap<Collection, BTreeMap<String, Map<String, Value>>>;

struct Listener {
    collection: Collection,
    query: Query,
    tx: watch::Sender<Vec<Document>>,
}

#[derive(Default)]
struct StoreState {
    collections: Collections,
    listeners: Vec<Listener>,
}

pub struct LocalDocumentStore {
    state: Mutex<StoreState>,
    snapshot: Option<PathBuf>,
}

impl Default for LocalDocumentStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalDocumentStore {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            snapshot: None,
        }
    }

    /// Store persisted to a gzip snapshot at `path`, loaded if present
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let collections = if path.exists() {
            load_snapshot(&path)?
        } else {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            Collections::new()
        };

        Ok(Self {
            state: Mutex::new(StoreState {
                collections,
                listeners: Vec::new(),
            }),
            snapshot: Some(path),
        })
    }

    /// Number of live push subscriptions still being served
    pub fn listener_count(&self) -> usize {
        self.state
            .lock()
            .map(|mut state| {
                state.listeners.retain(|l| !l.tx.is_closed());
                state.listeners.len()
            })
            .unwrap_or(0)
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::unavailable("document store lock poisoned"))?;
        f(&mut state)
    }

    /// Persist and push snapshots after a write to `collection`
    fn commit(&self, state: &mut StoreState, collection: Collection) {
        if let Some(path) = &self.snapshot {
            if let Err(e) = save_snapshot(&state.collections, path) {
                error!("failed to write document snapshot {}: {}", path.display(), e);
            }
        }

        state.listeners.retain(|l| !l.tx.is_closed());
        for listener in state.listeners.iter().filter(|l| l.collection == collection) {
            let snapshot = listing(&state.collections, collection, &listener.query);
            listener.tx.send_replace(snapshot);
        }
    }
}

fn listing(collections: &Collections, collection: Collection, query: &Query) -> Vec<Document> {
    let docs: Vec<Document> = collections
        .get(&collection)
        .map(|docs| {
            docs.iter()
                .map(|(id, data)| Document {
                    id: id.clone(),
                    data: data.clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    query.apply(docs)
}

fn stamp(fields: &mut Map<String, Value>, stamps: ServerStamps<'_>, at: Timestamp) {
    for field in stamps {
        fields.insert((*field).to_string(), Value::String(at.to_rfc3339()));
    }
}

/// Sibling file the snapshot is written to before it replaces the real one
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write the image next to `path` and rename it into place, so a crash
/// mid-write never leaves a truncated snapshot behind.
fn save_snapshot(collections: &Collections, path: &Path) -> std::io::Result<()> {
    let staging = staging_path(path);
    let file = File::create(&staging)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    let image: BTreeMap<&str, &BTreeMap<String, Map<String, Value>>> = collections
        .iter()
        .map(|(collection, docs)| (collection.as_str(), docs))
        .collect();
    serde_json::to_writer(&mut writer, &image)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?.sync_all()?;
    std::fs::rename(&staging, path)
}

fn load_snapshot(path: &Path) -> std::io::Result<Collections> {
    let file = File::open(path)?;
    let reader = BufReader::new(GzDecoder::new(file));
    let image: HashMap<String, BTreeMap<String, Map<String, Value>>> =
        serde_json::from_reader(reader)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut collections = Collections::new();
    for (name, docs) in image {
        match Collection::parse(&name) {
            Some(collection) => {
                collections.insert(collection, docs);
            }
            None => error!("ignoring unknown collection '{}' in snapshot", name),
        }
    }
    Ok(collections)
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        self.with_state(|state| {
            Ok(state
                .collections
                .get(&collection)
                .and_then(|docs| docs.get(id))
                .map(|data| Document {
                    id: id.to_string(),
                    data: data.clone(),
                }))
        })
    }

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
        merge: bool,
    ) -> Result<WriteResult, StoreError> {
        let committed_at = Utc::now();
        self.with_state(|state| {
            let docs = state.collections.entry(collection).or_default();
            match docs.entry(id.to_string()) {
                Entry::Occupied(mut existing) if merge => existing.get_mut().extend(fields),
                Entry::Occupied(mut existing) => {
                    existing.insert(fields);
                }
                Entry::Vacant(slot) => {
                    slot.insert(fields);
                }
            }
            self.commit(state, collection);
            debug!("set {}/{}", collection.as_str(), id);
            Ok(WriteResult {
                id: id.to_string(),
                committed_at,
            })
        })
    }

    async fn add(
        &self,
        collection: Collection,
        mut fields: Map<String, Value>,
        stamps: ServerStamps<'_>,
    ) -> Result<WriteResult, StoreError> {
        let committed_at = Utc::now();
        stamp(&mut fields, stamps, Timestamp::new(committed_at));
        let id = Uuid::new_v4().simple().to_string();

        self.with_state(|state| {
            state
                .collections
                .entry(collection)
                .or_default()
                .insert(id.clone(), fields);
            self.commit(state, collection);
            debug!("added {}/{}", collection.as_str(), id);
            Ok(WriteResult { id, committed_at })
        })
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        mut fields: Map<String, Value>,
        stamps: ServerStamps<'_>,
    ) -> Result<WriteResult, StoreError> {
        let committed_at = Utc::now();
        stamp(&mut fields, stamps, Timestamp::new(committed_at));

        self.with_state(|state| {
            let existing = state
                .collections
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::not_found(collection.as_str(), id))?;
            existing.extend(fields);
            self.commit(state, collection);
            debug!("updated {}/{}", collection.as_str(), id);
            Ok(WriteResult {
                id: id.to_string(),
                committed_at,
            })
        })
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            let removed = state
                .collections
                .get_mut(&collection)
                .and_then(|docs| docs.remove(id))
                .is_some();
            if removed {
                self.commit(state, collection);
                debug!("deleted {}/{}", collection.as_str(), id);
            }
            Ok(())
        })
    }

    async fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.with_state(|state| Ok(listing(&state.collections, collection, query)))
    }

    async fn subscribe(&self, collection: Collection, query: Query) -> Result<Subscription, StoreError> {
        let (tx, rx) = watch::channel(Vec::new());
        self.with_state(|state| {
            // the first snapshot counts as unseen, like every later one
            tx.send_replace(listing(&state.collections, collection, &query));
            state.listeners.push(Listener {
                collection,
                query,
                tx,
            });
            Ok(())
        })?;
        Ok(Subscription::new(collection, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Direction;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn add_stamps_and_update_merges() {
        let store = LocalDocumentStore::in_memory();
        let written = store
            .add(
                Collection::Tests,
                fields(json!({"date": "2024-01-01", "network": "MTN"})),
                &["createdAt", "updatedAt"],
            )
            .await
            .unwrap();

        store
            .update(
                Collection::Tests,
                &written.id,
                fields(json!({"network": "Vodacom"})),
                &["updatedAt"],
            )
            .await
            .unwrap();

        let doc = store.get(Collection::Tests, &written.id).await.unwrap().unwrap();
        assert_eq!(doc.data["network"], json!("Vodacom"));
        assert_eq!(doc.data["date"], json!("2024-01-01"));
        assert!(doc.data.contains_key("createdAt"));
    }

    #[tokio::test]
    async fn update_of_missing_document_fails_but_delete_succeeds() {
        let store = LocalDocumentStore::in_memory();
        let err = store
            .update(Collection::Tests, "nope", Map::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.delete(Collection::Tests, "nope").await.is_ok());
    }

    #[tokio::test]
    async fn subscription_gets_initial_and_pushed_snapshots() {
        let store = LocalDocumentStore::in_memory();
        let mut sub = store
            .subscribe(
                Collection::Warnings,
                Query::new().owned_by("u1").order_by("date", Direction::Descending),
            )
            .await
            .unwrap();
        assert_eq!(sub.latest().map(|s| s.len()), Some(0));

        store
            .add(Collection::Warnings, fields(json!({"userId": "u2"})), &[])
            .await
            .unwrap();
        store
            .add(Collection::Warnings, fields(json!({"userId": "u1"})), &[])
            .await
            .unwrap();
        assert_eq!(sub.latest().map(|s| s.len()), Some(1));

        drop(sub);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn unread_snapshots_collapse_into_the_newest() {
        let store = LocalDocumentStore::in_memory();
        let mut sub = store
            .subscribe(Collection::Tests, Query::new())
            .await
            .unwrap();

        for n in 0..200 {
            store
                .add(Collection::Tests, fields(json!({"n": n})), &[])
                .await
                .unwrap();
        }

        assert_eq!(sub.latest().map(|s| s.len()), Some(200));
        assert!(sub.latest().is_none());
    }

    #[tokio::test]
    async fn snapshot_is_replaced_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.json.gz");
        let store = LocalDocumentStore::open(&path).unwrap();
        store
            .add(Collection::Tests, fields(json!({"date": "2024-05-05"})), &[])
            .await
            .unwrap();

        // a half-written image from an interrupted save must not matter
        std::fs::write(staging_path(&path), b"\x1f\x8b garbage").unwrap();
        let interrupted = LocalDocumentStore::open(&path).unwrap();
        let docs = interrupted.query(Collection::Tests, &Query::new()).await.unwrap();
        assert_eq!(docs.len(), 1);

        store
            .add(Collection::Tests, fields(json!({"date": "2024-05-06"})), &[])
            .await
            .unwrap();
        assert!(!staging_path(&path).exists());
        let reopened = LocalDocumentStore::open(&path).unwrap();
        let docs = reopened.query(Collection::Tests, &Query::new()).await.unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.json.gz");
        let id = {
            let store = LocalDocumentStore::open(&path).unwrap();
            store
                .add(Collection::Tests, fields(json!({"date": "2024-05-05"})), &[])
                .await
                .unwrap()
                .id
        };

        let reopened = LocalDocumentStore::open(&path).unwrap();
        let doc = reopened.get(Collection::Tests, &id).await.unwrap().unwrap();
        assert_eq!(doc.data["date"], json!("2024-05-05"));
    }
}
