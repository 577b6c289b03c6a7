//! Contracts for the two external collaborators: the identity provider and
//! the document store.
//!
//! Everything above this module talks to these traits only. The `identity`
//! and `documents` submodules provide local bindings used by the web shell
//! and by the test suite.

pub mod documents;
pub mod identity;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tokio::sync::watch;

use crate::error::StoreError;

pub use documents::LocalDocumentStore;
pub use identity::{CredentialStore, LocalAuth};

/// Opaque handle returned by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
}

/// Error codes surfaced by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorCode {
    InvalidEmail,
    UserDisabled,
    UserNotFound,
    WrongPassword,
    EmailAlreadyInUse,
    WeakPassword,
    OperationNotAllowed,
    TooManyRequests,
    Internal,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidEmail => "auth/invalid-email",
            Self::UserDisabled => "auth/user-disabled",
            Self::UserNotFound => "auth/user-not-found",
            Self::WrongPassword => "auth/wrong-password",
            Self::EmailAlreadyInUse => "auth/email-already-in-use",
            Self::WeakPassword => "auth/weak-password",
            Self::OperationNotAllowed => "auth/operation-not-allowed",
            Self::TooManyRequests => "auth/too-many-requests",
            Self::Internal => "auth/internal-error",
        }
    }
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Email/password identity provider.
///
/// One instance represents one client's view of the provider: `current_user`
/// and `subscribe` report the identity signed in on *this* client.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthErrorCode>;

    async fn create_account(&self, email: &str, password: &str) -> Result<AuthUser, AuthErrorCode>;

    async fn sign_out(&self) -> Result<(), AuthErrorCode>;

    fn current_user(&self) -> Option<AuthUser>;

    /// Receiver of signed-in/signed-out transitions. The value present at
    /// subscription time counts as the first transition.
    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>>;
}

/// Named collections of the document store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Users,
    Tests,
    Warnings,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Users, Collection::Tests, Collection::Warnings];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Tests => "tests",
            Collection::Warnings => "warnings",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

/// A stored document: its id plus its field map
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

/// Acknowledgment of a write, carrying the server commit time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub id: String,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Collection query: optional owner equality filter, ordering and cap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub owner: Option<String>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

/// Field holding the owning user id on tests and warnings
pub const OWNER_FIELD: &str = "userId";

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owned_by(mut self, uid: impl Into<String>) -> Self {
        self.owner = Some(uid.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply the query to a full collection listing
    pub fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if let Some(owner) = &self.owner {
            docs.retain(|doc| doc.data.get(OWNER_FIELD).and_then(Value::as_str) == Some(owner));
        }

        if let Some((field, direction)) = &self.order_by {
            docs.sort_by(|a, b| {
                let ord = compare_values(a.data.get(field), b.data.get(field));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }

        docs
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Push feed of full query snapshots.
///
/// Only the newest snapshot is held; a write replaces whatever the reader has
/// not picked up yet. Dropping the subscription tears it down and the store
/// stops delivering once it notices the receiver is gone.
#[derive(Debug)]
pub struct Subscription {
    pub collection: Collection,
    rx: watch::Receiver<Vec<Document>>,
}

impl Subscription {
    pub fn new(collection: Collection, rx: watch::Receiver<Vec<Document>>) -> Self {
        Self { collection, rx }
    }

    /// Most recent snapshot delivered since the last call, if any
    pub fn latest(&mut self) -> Option<Vec<Document>> {
        match self.rx.has_changed() {
            Ok(true) => Some(self.rx.borrow_and_update().clone()),
            _ => None,
        }
    }
}

/// Which fields of a write receive the server commit time
pub type ServerStamps<'a> = &'a [&'a str];

/// Document database with per-document operations and ordered queries.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    /// Replace (or with `merge`, overlay) the document at `id`
    async fn set(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
        merge: bool,
    ) -> Result<WriteResult, StoreError>;

    /// Create a document under a store-assigned id
    async fn add(
        &self,
        collection: Collection,
        fields: Map<String, Value>,
        stamps: ServerStamps<'_>,
    ) -> Result<WriteResult, StoreError>;

    /// Overlay fields onto an existing document; fails when it is missing
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
        stamps: ServerStamps<'_>,
    ) -> Result<WriteResult, StoreError>;

    /// Remove a document; removing a missing document succeeds
    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    async fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Subscribe to full snapshots of `query`; the current snapshot is
    /// delivered immediately.
    async fn subscribe(&self, collection: Collection, query: Query) -> Result<Subscription, StoreError>;
}
