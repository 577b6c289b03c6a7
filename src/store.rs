//! Local mirrors of the `tests`, `warnings` and `users` collections.
//!
//! Every mutation writes to the document store first and patches the mirror
//! only after the store acknowledged it; a failed write leaves the mirror
//! untouched. Aggregates are recomputed from the mirrors on every call.

use chrono::NaiveDate;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{RecordError, StoreError};
use crate::model::{
    DateRange, Timestamp, TestDraft, TestPatch, TestRecord, UserProfile, WarningDraft,
    WarningPatch, WarningRecord, iso_date, role_for,
};
use crate::notifier::{LoadingGuard, Notifier};
use crate::remote::{
    Collection, Direction, Document, DocumentStore, OWNER_FIELD, Query, Subscription,
};
use crate::session::{CurrentUser, Session};

/// Upper bound on records fetched per collection
pub const DEFAULT_PAGE_SIZE: usize = 500;

const CREATE_STAMPS: &[&str] = &["createdAt", "updatedAt"];
const UPDATE_STAMPS: &[&str] = &["updatedAt"];

/// Push feeds kept while live updates are on
struct LiveFeeds {
    tests: Subscription,
    warnings: Subscription,
    users: Option<Subscription>,
}

pub struct RecordStore {
    documents: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    page_size: usize,
    tests: Vec<TestRecord>,
    warnings: Vec<WarningRecord>,
    users: Vec<UserProfile>,
    live: Option<LiveFeeds>,
}

fn decode_all<T>(docs: &[Document], decode: impl Fn(&Document) -> Result<T, StoreError>) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match decode(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("skipping unreadable document: {}", e);
                None
            }
        })
        .collect()
}

impl RecordStore {
    pub fn new(documents: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_page_size(documents, notifier, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(
        documents: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        page_size: usize,
    ) -> Self {
        Self {
            documents,
            notifier,
            page_size,
            tests: Vec::new(),
            warnings: Vec::new(),
            users: Vec::new(),
            live: None,
        }
    }

    pub fn tests(&self) -> &[TestRecord] {
        &self.tests
    }

    pub fn warnings(&self) -> &[WarningRecord] {
        &self.warnings
    }

    pub fn users(&self) -> &[UserProfile] {
        &self.users
    }

    pub fn find_test(&self, id: &str) -> Option<&TestRecord> {
        self.tests.iter().find(|t| t.id == id)
    }

    pub fn find_warning(&self, id: &str) -> Option<&WarningRecord> {
        self.warnings.iter().find(|w| w.id == id)
    }

    /// Query restricting non-managers to their own records.
    ///
    /// The owner predicate is part of the store query itself, so records of
    /// other users never reach this process.
    fn visible_query(&self, actor: &CurrentUser) -> Query {
        let query = Query::new()
            .order_by("date", Direction::Descending)
            .limit(self.page_size);
        if actor.is_manager() {
            query
        } else {
            query.owned_by(actor.uid())
        }
    }

    fn fail(&self, message: &str, e: StoreError) -> RecordError {
        error!("{}: {}", message, e);
        self.notifier.error(message);
        RecordError::Remote(e)
    }

    fn authorize(&self, actor: &CurrentUser, owner: Option<&str>, id: &str) -> Result<(), RecordError> {
        if actor.is_manager() {
            return Ok(());
        }
        match owner {
            Some(owner) if owner != actor.uid() => {
                warn!("{} may not modify {}", actor.uid(), id);
                self.notifier.error("Not authorized");
                Err(RecordError::Forbidden { id: id.to_string() })
            }
            _ => Ok(()),
        }
    }

    /// Owner of `id`, from the mirror or else from the store itself.
    ///
    /// Managers may touch anything, so the remote lookup is skipped for them.
    async fn owner_of(
        &self,
        actor: &CurrentUser,
        collection: Collection,
        id: &str,
        mirrored: Option<Option<String>>,
        failure: &str,
    ) -> Result<Option<String>, RecordError> {
        if let Some(owner) = mirrored {
            return Ok(owner);
        }
        if actor.is_manager() {
            return Ok(None);
        }
        let doc = self
            .documents
            .get(collection, id)
            .await
            .map_err(|e| self.fail(failure, e))?;
        Ok(doc.and_then(|d| d.data.get(OWNER_FIELD).and_then(Value::as_str).map(str::to_string)))
    }

    /// Fetch the visible collections, replacing the mirrors
    pub async fn load(&mut self, actor: &CurrentUser) -> Result<(), RecordError> {
        let _loading = LoadingGuard::new(self.notifier.as_ref());
        let query = self.visible_query(actor);

        let fetched = async {
            let tests = self.documents.query(Collection::Tests, &query).await?;
            let warnings = self.documents.query(Collection::Warnings, &query).await?;
            let users = if actor.is_manager() {
                self.documents.query(Collection::Users, &Query::new()).await?
            } else {
                Vec::new()
            };
            Ok::<_, StoreError>((tests, warnings, users))
        }
        .await;

        let (tests, warnings, users) = fetched.map_err(|e| self.fail("Failed to load data", e))?;
        self.tests = decode_all(&tests, TestRecord::from_document);
        self.warnings = decode_all(&warnings, WarningRecord::from_document);
        self.users = decode_all(&users, UserProfile::from_document);

        debug!(
            "loaded {} tests, {} warnings, {} users for {}",
            self.tests.len(),
            self.warnings.len(),
            self.users.len(),
            actor.uid()
        );
        Ok(())
    }

    /// Drop every mirror and stop live feeds
    pub fn clear(&mut self) {
        self.stop_live();
        self.tests.clear();
        self.warnings.clear();
        self.users.clear();
    }

    pub async fn add_test(&mut self, actor: &CurrentUser, draft: TestDraft) -> Result<String, RecordError> {
        let _loading = LoadingGuard::new(self.notifier.as_ref());

        let mut fields = draft.to_fields();
        fields.insert(OWNER_FIELD.to_string(), Value::String(actor.uid().to_string()));
        fields.insert("createdBy".to_string(), Value::String(actor.email().to_string()));

        let written = self
            .documents
            .add(Collection::Tests, fields, CREATE_STAMPS)
            .await
            .map_err(|e| self.fail("Failed to add test record", e))?;

        let at = Timestamp::new(written.committed_at);
        let file_link = Some(draft.file_link).filter(|l| !l.is_empty());
        self.tests.insert(
            0,
            TestRecord {
                id: written.id.clone(),
                date: draft.date,
                test_type: draft.test_type,
                network: draft.network,
                description: draft.description,
                result: draft.result,
                file_link,
                user_id: Some(actor.uid().to_string()),
                created_by: Some(actor.email().to_string()),
                created_at: Some(at),
                updated_at: Some(at),
            },
        );

        info!("added test {}", written.id);
        self.notifier.success("Test record added successfully!");
        Ok(written.id)
    }

    pub async fn update_test(
        &mut self,
        actor: &CurrentUser,
        id: &str,
        patch: TestPatch,
    ) -> Result<(), RecordError> {
        let mirrored = self.find_test(id).map(|t| t.user_id.clone());
        let owner = self
            .owner_of(actor, Collection::Tests, id, mirrored, "Failed to update test record")
            .await?;
        self.authorize(actor, owner.as_deref(), id)?;
        let _loading = LoadingGuard::new(self.notifier.as_ref());

        let written = self
            .documents
            .update(Collection::Tests, id, patch.to_fields(), UPDATE_STAMPS)
            .await
            .map_err(|e| self.fail("Failed to update test record", e))?;

        match self.tests.iter_mut().find(|t| t.id == id) {
            Some(test) => test.apply(&patch, Timestamp::new(written.committed_at)),
            None => warn!("updated test {} is not in the local mirror", id),
        }

        info!("updated test {}", id);
        self.notifier.success("Test record updated successfully!");
        Ok(())
    }

    pub async fn delete_test(&mut self, actor: &CurrentUser, id: &str) -> Result<(), RecordError> {
        let mirrored = self.find_test(id).map(|t| t.user_id.clone());
        let owner = self
            .owner_of(actor, Collection::Tests, id, mirrored, "Failed to delete test record")
            .await?;
        self.authorize(actor, owner.as_deref(), id)?;
        let _loading = LoadingGuard::new(self.notifier.as_ref());

        self.documents
            .delete(Collection::Tests, id)
            .await
            .map_err(|e| self.fail("Failed to delete test record", e))?;
        self.tests.retain(|t| t.id != id);

        info!("deleted test {}", id);
        self.notifier.success("Test record deleted");
        Ok(())
    }

    pub async fn add_warning(
        &mut self,
        actor: &CurrentUser,
        draft: WarningDraft,
    ) -> Result<String, RecordError> {
        let _loading = LoadingGuard::new(self.notifier.as_ref());

        let mut fields = draft.to_fields();
        fields.insert(OWNER_FIELD.to_string(), Value::String(actor.uid().to_string()));
        fields.insert("createdBy".to_string(), Value::String(actor.email().to_string()));

        let written = self
            .documents
            .add(Collection::Warnings, fields, CREATE_STAMPS)
            .await
            .map_err(|e| self.fail("Failed to add warning record", e))?;

        let at = Timestamp::new(written.committed_at);
        self.warnings.insert(
            0,
            WarningRecord {
                id: written.id.clone(),
                date: draft.date,
                warning_type: draft.warning_type,
                recipient: draft.recipient,
                reference: draft.reference,
                details: draft.details,
                problem_areas: draft.problem_areas,
                user_id: Some(actor.uid().to_string()),
                created_by: Some(actor.email().to_string()),
                created_at: Some(at),
                updated_at: Some(at),
            },
        );

        info!("added warning {}", written.id);
        self.notifier.success("Warning record added successfully!");
        Ok(written.id)
    }

    pub async fn update_warning(
        &mut self,
        actor: &CurrentUser,
        id: &str,
        patch: WarningPatch,
    ) -> Result<(), RecordError> {
        let mirrored = self.find_warning(id).map(|w| w.user_id.clone());
        let owner = self
            .owner_of(actor, Collection::Warnings, id, mirrored, "Failed to update warning record")
            .await?;
        self.authorize(actor, owner.as_deref(), id)?;
        let _loading = LoadingGuard::new(self.notifier.as_ref());

        let written = self
            .documents
            .update(Collection::Warnings, id, patch.to_fields(), UPDATE_STAMPS)
            .await
            .map_err(|e| self.fail("Failed to update warning record", e))?;

        match self.warnings.iter_mut().find(|w| w.id == id) {
            Some(warning) => warning.apply(&patch, Timestamp::new(written.committed_at)),
            None => warn!("updated warning {} is not in the local mirror", id),
        }

        info!("updated warning {}", id);
        self.notifier.success("Warning record updated successfully!");
        Ok(())
    }

    pub async fn delete_warning(&mut self, actor: &CurrentUser, id: &str) -> Result<(), RecordError> {
        let mirrored = self.find_warning(id).map(|w| w.user_id.clone());
        let owner = self
            .owner_of(actor, Collection::Warnings, id, mirrored, "Failed to delete warning record")
            .await?;
        self.authorize(actor, owner.as_deref(), id)?;
        let _loading = LoadingGuard::new(self.notifier.as_ref());

        self.documents
            .delete(Collection::Warnings, id)
            .await
            .map_err(|e| self.fail("Failed to delete warning record", e))?;
        self.warnings.retain(|w| w.id != id);

        info!("deleted warning {}", id);
        self.notifier.success("Warning record deleted");
        Ok(())
    }

    /// Promote or demote a user.
    ///
    /// When the subject is the signed-in user the session profile is patched
    /// too, so the acting view reflects the new role immediately. If that
    /// changes what the user may see, the mirrors and feeds are rebuilt
    /// under the new visibility.
    pub async fn update_user_role(
        &mut self,
        session: &mut Session,
        user_id: &str,
        is_manager: bool,
    ) -> Result<(), RecordError> {
        let actor = session.current().ok_or(RecordError::NotSignedIn)?;
        if !actor.is_manager() {
            warn!("{} may not change roles", actor.uid());
            self.notifier.error("Not authorized");
            return Err(RecordError::Forbidden {
                id: user_id.to_string(),
            });
        }
        let loading = LoadingGuard::new(self.notifier.as_ref());

        let mut fields = serde_json::Map::new();
        fields.insert("isManager".to_string(), Value::Bool(is_manager));
        fields.insert("role".to_string(), Value::String(role_for(is_manager).to_string()));
        self.documents
            .update(Collection::Users, user_id, fields, UPDATE_STAMPS)
            .await
            .map_err(|e| self.fail("Failed to update user role", e))?;

        if let Some(user) = self.users.iter_mut().find(|u| u.id == user_id) {
            user.set_manager(is_manager);
        }
        let rescope = session.set_manager_flag(user_id, is_manager) && !session.is_manager();

        info!("set isManager={} on {}", is_manager, user_id);
        self.notifier.success(if is_manager {
            "User promoted to manager"
        } else {
            "User demoted to user"
        });
        drop(loading);

        if let Some(actor) = session.current().filter(|_| rescope) {
            debug!("visibility of {} narrowed, reloading", user_id);
            // the role change itself stands; a failed reload leaves the
            // mirrors empty and was already reported
            if let Err(e) = self.rescope(actor).await {
                warn!("reload after role change failed: {}", e);
            }
        }
        Ok(())
    }

    /// Rebuild mirrors, and live feeds if they were on, for `actor`'s
    /// current visibility
    async fn rescope(&mut self, actor: &CurrentUser) -> Result<(), RecordError> {
        let live = self.is_live();
        self.clear();
        if live {
            self.start_live(actor).await
        } else {
            self.load(actor).await
        }
    }

    /// Tests inside `range`, optionally restricted to one network
    pub fn filter_tests(&self, range: &DateRange, network: Option<&str>) -> Vec<&TestRecord> {
        self.tests
            .iter()
            .filter(|t| range.contains(&t.date))
            .filter(|t| network.is_none_or(|n| t.network == n))
            .collect()
    }

    pub fn filter_warnings(&self, range: &DateRange) -> Vec<&WarningRecord> {
        self.warnings.iter().filter(|w| range.contains(&w.date)).collect()
    }

    pub fn tests_by_user(&self, uid: &str) -> Vec<&TestRecord> {
        self.tests
            .iter()
            .filter(|t| t.user_id.as_deref() == Some(uid))
            .collect()
    }

    pub fn warnings_by_user(&self, uid: &str) -> Vec<&WarningRecord> {
        self.warnings
            .iter()
            .filter(|w| w.user_id.as_deref() == Some(uid))
            .collect()
    }

    pub fn tests_on(&self, day: NaiveDate) -> Vec<&TestRecord> {
        let day = iso_date(day);
        self.tests.iter().filter(|t| t.date == day).collect()
    }

    pub fn warnings_on(&self, day: NaiveDate) -> Vec<&WarningRecord> {
        let day = iso_date(day);
        self.warnings.iter().filter(|w| w.date == day).collect()
    }

    /// Number of distinct dates carrying at least one test
    pub fn active_days(&self) -> usize {
        self.tests
            .iter()
            .map(|t| t.date.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Users active on `day`, in first-seen order.
    ///
    /// Each record contributes its creator email, else its owner id. Only if
    /// no record of the day carries either are warning recipients counted.
    pub fn active_users_on(&self, day: NaiveDate) -> Vec<String> {
        let tests = self.tests_on(day);
        let warnings = self.warnings_on(day);

        let mut seen = HashSet::new();
        let mut active = Vec::new();
        let creators = tests
            .iter()
            .map(|t| t.created_by.as_deref().or(t.user_id.as_deref()))
            .chain(
                warnings
                    .iter()
                    .map(|w| w.created_by.as_deref().or(w.user_id.as_deref())),
            );
        for user in creators.flatten() {
            if seen.insert(user) {
                active.push(user.to_string());
            }
        }

        if active.is_empty() {
            for warning in &warnings {
                if !warning.recipient.is_empty() && seen.insert(warning.recipient.as_str()) {
                    active.push(warning.recipient.clone());
                }
            }
        }
        active
    }

    /// Switch to push-based mirrors.
    ///
    /// Each pushed snapshot replaces the matching collection wholesale.
    pub async fn start_live(&mut self, actor: &CurrentUser) -> Result<(), RecordError> {
        let query = self.visible_query(actor);
        let subscribe = async {
            let tests = self.documents.subscribe(Collection::Tests, query.clone()).await?;
            let warnings = self.documents.subscribe(Collection::Warnings, query.clone()).await?;
            let users = if actor.is_manager() {
                Some(self.documents.subscribe(Collection::Users, Query::new()).await?)
            } else {
                None
            };
            Ok::<_, StoreError>(LiveFeeds {
                tests,
                warnings,
                users,
            })
        }
        .await;

        let feeds = subscribe.map_err(|e| self.fail("Failed to subscribe to updates", e))?;
        self.live = Some(feeds);
        self.poll_live();
        debug!("live updates on for {}", actor.uid());
        Ok(())
    }

    /// Tear down push feeds; nothing pushed afterwards reaches the mirrors
    pub fn stop_live(&mut self) {
        if self.live.take().is_some() {
            debug!("live updates off");
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Apply pending pushed snapshots. Returns whether any mirror changed.
    pub fn poll_live(&mut self) -> bool {
        let Some(live) = self.live.as_mut() else {
            return false;
        };

        let mut changed = false;
        if let Some(snapshot) = live.tests.latest() {
            self.tests = decode_all(&snapshot, TestRecord::from_document);
            changed = true;
        }
        if let Some(snapshot) = live.warnings.latest() {
            self.warnings = decode_all(&snapshot, WarningRecord::from_document);
            changed = true;
        }
        if let Some(snapshot) = live.users.as_mut().and_then(Subscription::latest) {
            self.users = decode_all(&snapshot, UserProfile::from_document);
            changed = true;
        }
        changed
    }
}
