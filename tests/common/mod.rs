#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use waspa::error::StoreError;
use waspa::notifier::{ToastKind, ToastQueue};
use waspa::remote::{
    AuthUser, Collection, CredentialStore, Document, DocumentStore, LocalAuth, LocalDocumentStore,
    Query, ServerStamps, Subscription, WriteResult,
};
use waspa::session::Session;
use waspa::store::RecordStore;
use waspa::view::{FixedClock, RootSlot, ViewController};

pub const PASSWORD: &str = "password1";

/// Document store that counts writes and can be told to reject them
pub struct FlakyStore {
    inner: LocalDocumentStore,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: LocalDocumentStore::in_memory(),
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }

    fn check(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("network down"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
        merge: bool,
    ) -> Result<WriteResult, StoreError> {
        self.check()?;
        self.inner.set(collection, id, fields, merge).await
    }

    async fn add(
        &self,
        collection: Collection,
        fields: Map<String, Value>,
        stamps: ServerStamps<'_>,
    ) -> Result<WriteResult, StoreError> {
        self.check()?;
        self.inner.add(collection, fields, stamps).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
        stamps: ServerStamps<'_>,
    ) -> Result<WriteResult, StoreError> {
        self.check()?;
        self.inner.update(collection, id, fields, stamps).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(collection, id).await
    }

    async fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.inner.query(collection, query).await
    }

    async fn subscribe(&self, collection: Collection, query: Query) -> Result<Subscription, StoreError> {
        self.inner.subscribe(collection, query).await
    }
}

/// Shared backend: one account database and one document store
pub struct Backend {
    pub credentials: Arc<CredentialStore>,
    pub documents: Arc<FlakyStore>,
}

impl Backend {
    pub fn new() -> Self {
        Self {
            credentials: Arc::new(CredentialStore::in_memory()),
            documents: Arc::new(FlakyStore::new()),
        }
    }

    /// Create an account with a profile document; `role` is written verbatim
    pub async fn seed_user(&self, email: &str, name: &str, role: &str) -> AuthUser {
        let user = self.credentials.register(email, PASSWORD).unwrap();
        let profile = json!({
            "uid": user.uid,
            "email": user.email,
            "name": name,
            "role": role,
            "isManager": role == "manager",
        });
        self.documents
            .set(Collection::Users, &user.uid, object(profile), false)
            .await
            .unwrap();
        user
    }

    /// Write a record straight into the store, bypassing any mirror
    pub async fn seed_record(&self, collection: Collection, fields: Value) -> String {
        self.documents
            .add(collection, object(fields), &["createdAt", "updatedAt"])
            .await
            .unwrap()
            .id
    }

    pub fn client(&self) -> Client {
        let toasts = Arc::new(ToastQueue::new());
        let auth = Arc::new(LocalAuth::new(self.credentials.clone()));
        let session = Session::new(auth.clone(), self.documents.clone(), toasts.clone());
        let records = RecordStore::new(self.documents.clone(), toasts.clone());
        Client {
            auth,
            toasts,
            session,
            records,
        }
    }

    pub fn controller(&self, today: NaiveDate) -> (ViewController, Arc<ToastQueue>, Arc<RootSlot>) {
        let Client {
            toasts,
            session,
            records,
            ..
        } = self.client();
        let root = Arc::new(RootSlot::new());
        let controller = ViewController::new(session, records, toasts.clone(), root.clone())
            .unwrap()
            .with_clock(Arc::new(FixedClock(today)));
        (controller, toasts, root)
    }
}

pub struct Client {
    pub auth: Arc<LocalAuth>,
    pub toasts: Arc<ToastQueue>,
    pub session: Session,
    pub records: RecordStore,
}

impl Client {
    pub async fn login(&mut self, email: &str) {
        self.session.login(email, PASSWORD).await.unwrap();
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.toasts
            .drain()
            .into_iter()
            .filter(|t| t.kind == ToastKind::Error)
            .map(|t| t.message)
            .collect()
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
