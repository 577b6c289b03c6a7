//! Bridge between identity-provider auth state and the application's view
//! of who is signed in and what they may see.

use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{AuthError, StoreError};
use crate::model::{Timestamp, UserProfile};
use crate::notifier::{LoadingGuard, Notifier};
use crate::remote::{AuthUser, Collection, DocumentStore, IdentityProvider};

/// The signed-in identity together with its profile document
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub auth: AuthUser,
    pub profile: UserProfile,
}

impl CurrentUser {
    pub fn uid(&self) -> &str {
        &self.auth.uid
    }

    pub fn email(&self) -> &str {
        &self.auth.email
    }

    pub fn is_manager(&self) -> bool {
        self.profile.is_manager()
    }
}

/// Identity-provider state change observed by `Session::sync`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthTransition {
    SignedIn(AuthUser),
    SignedOut,
}

pub struct Session {
    provider: Arc<dyn IdentityProvider>,
    documents: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    auth_state: watch::Receiver<Option<AuthUser>>,
    initial_pending: bool,
    current: Option<CurrentUser>,
}

impl Session {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        documents: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let auth_state = provider.subscribe();
        Self {
            provider,
            documents,
            notifier,
            auth_state,
            initial_pending: true,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&CurrentUser> {
        self.current.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }

    pub fn uid(&self) -> Option<&str> {
        self.current.as_ref().map(CurrentUser::uid)
    }

    /// True when the loaded profile is manager-equivalent
    pub fn is_manager(&self) -> bool {
        self.current.as_ref().is_some_and(CurrentUser::is_manager)
    }

    /// Patch the in-memory profile after a role change made elsewhere
    pub(crate) fn set_manager_flag(&mut self, uid: &str, is_manager: bool) -> bool {
        match self.current.as_mut() {
            Some(current) if current.auth.uid == uid => {
                current.profile.set_manager(is_manager);
                true
            }
            _ => false,
        }
    }

    /// Sign in with email and password, then record the login time
    pub async fn login(&mut self, email: &str, password: &str) -> Result<(), AuthError> {
        let notifier = Arc::clone(&self.notifier);
        let _loading = LoadingGuard::new(notifier.as_ref());

        let user = self.provider.sign_in(email, password).await.map_err(|code| {
            warn!("sign-in rejected: {}", code);
            AuthError::from_login(code)
        })?;

        let profile = match self.record_login(&user).await {
            Ok(profile) => profile,
            Err(e) => {
                self.abandon_sign_in(&user).await;
                return Err(e.into());
            }
        };

        info!("signed in {}", user.uid);
        self.current = Some(CurrentUser {
            auth: user,
            profile,
        });
        Ok(())
    }

    /// Load the profile and merge the login time into it
    async fn record_login(&self, user: &AuthUser) -> Result<UserProfile, StoreError> {
        let mut profile = self.load_profile(user).await?;
        let now = Timestamp::now();
        let mut fields = Map::new();
        fields.insert("lastLogin".to_string(), Value::String(now.to_rfc3339()));
        fields.insert("email".to_string(), Value::String(user.email.clone()));
        self.documents
            .set(Collection::Users, &user.uid, fields, true)
            .await
            .inspect_err(|e| error!("failed to record last login for {}: {}", user.uid, e))?;
        profile.last_login = Some(now);
        profile.email = Some(user.email.clone());
        Ok(profile)
    }

    /// Undo a provider sign-in whose profile step failed. The resulting
    /// provider transitions are consumed here so `sync` reports nothing.
    async fn abandon_sign_in(&mut self, user: &AuthUser) {
        if let Err(code) = self.provider.sign_out().await {
            error!("failed to sign out {} after a profile error: {}", user.uid, code);
        }
        self.auth_state.borrow_and_update();
    }

    /// Create an account and its profile document with the default role
    pub async fn register(&mut self, name: &str, email: &str, password: &str) -> Result<(), AuthError> {
        let notifier = Arc::clone(&self.notifier);
        let _loading = LoadingGuard::new(notifier.as_ref());

        let user = self
            .provider
            .create_account(email, password)
            .await
            .map_err(|code| {
                warn!("registration rejected: {}", code);
                AuthError::from_registration(code)
            })?;

        let profile = UserProfile::new_registration(&user.uid, &user.email, name, Timestamp::now());
        let created = self
            .documents
            .set(Collection::Users, &user.uid, profile.to_fields(), false)
            .await;
        if let Err(e) = created {
            error!("failed to create profile for {}: {}", user.uid, e);
            self.abandon_sign_in(&user).await;
            return Err(e.into());
        }

        info!("registered {}", user.uid);
        self.current = Some(CurrentUser {
            auth: user,
            profile,
        });
        Ok(())
    }

    /// Sign out; failures are reported, never raised
    pub async fn logout(&mut self) {
        if let Err(code) = self.provider.sign_out().await {
            error!("sign-out failed: {}", code);
            self.notifier.error("Failed to log out");
        }
        if let Some(current) = self.current.take() {
            info!("signed out {}", current.auth.uid);
        }
    }

    /// Consume the next identity-provider transition, if one happened.
    ///
    /// The identity present when the session was created is reported as the
    /// first transition. A signed-in transition reloads the profile.
    pub async fn sync(&mut self) -> Result<Option<AuthTransition>, AuthError> {
        let changed = self.initial_pending || self.auth_state.has_changed().unwrap_or(false);
        if !changed {
            return Ok(None);
        }
        self.initial_pending = false;

        let user = self.auth_state.borrow_and_update().clone();
        match user {
            Some(user) => {
                let profile = self.load_profile(&user).await?;
                debug!("auth state: signed in {}", user.uid);
                self.current = Some(CurrentUser {
                    auth: user.clone(),
                    profile,
                });
                Ok(Some(AuthTransition::SignedIn(user)))
            }
            None => {
                debug!("auth state: signed out");
                self.current = None;
                Ok(Some(AuthTransition::SignedOut))
            }
        }
    }

    async fn load_profile(&self, user: &AuthUser) -> Result<UserProfile, StoreError> {
        let profile = match self.documents.get(Collection::Users, &user.uid).await? {
            Some(doc) => UserProfile::from_document(&doc)?,
            None => {
                warn!("no profile document for {}", user.uid);
                UserProfile {
                    id: user.uid.clone(),
                    uid: Some(user.uid.clone()),
                    ..Default::default()
                }
            }
        };

        Ok(UserProfile {
            email: profile.email.clone().or_else(|| Some(user.email.clone())),
            ..profile
        })
    }
}
