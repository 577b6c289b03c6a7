//! Local email/password identity provider.
//!
//! Credentials are shared by every client of a process and optionally
//! persisted to a JSON users file; each browser gets its own `LocalAuth`
//! carrying that browser's signed-in identity.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use rand_core::OsRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

use super::{AuthErrorCode, AuthUser, IdentityProvider};

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 6;

/// Failed sign-ins tolerated per email inside `ATTEMPT_WINDOW`
const MAX_FAILED_ATTEMPTS: usize = 5;
const ATTEMPT_WINDOW: Duration = Duration::from_secs(60);

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Stored credential for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub uid: String,
    pub email: String,
    /// Argon2 hash of the user's password
    pub password_hash: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Default)]
struct CredentialState {
    by_email: HashMap<String, Credential>,
    failures: HashMap<String, Vec<Instant>>,
}

/// Process-wide account database
pub struct CredentialStore {
    state: RwLock<CredentialState>,
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Store kept in memory only
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(CredentialState::default()),
            path: None,
        }
    }

    /// Store backed by a JSON users file, created when missing
    ///
    /// # Errors
    /// * Returns an error if the file exists but cannot be read or parsed
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = CredentialState::default();

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let users: HashMap<String, Credential> = serde_json::from_str(&contents)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            state.by_email = users;
        } else if let Some(dir) = path.parent() {
            create_dir_all(dir)?;
        }

        debug!(
            "credential store opened at {} with {} accounts",
            path.display(),
            state.by_email.len()
        );
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    fn save(&self, users: &HashMap<String, Credential>) -> Result<(), AuthErrorCode> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(users).map_err(|_| AuthErrorCode::Internal)?;
        fs::write(path, json).map_err(|e| {
            warn!("failed to write users file {}: {}", path.display(), e);
            AuthErrorCode::Internal
        })
    }

    /// Create an account and return its handle
    pub fn register(&self, email: &str, password: &str) -> Result<AuthUser, AuthErrorCode> {
        let email = normalize_email(email);
        if !EMAIL_RE.is_match(&email) {
            return Err(AuthErrorCode::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthErrorCode::WeakPassword);
        }

        let password_hash = hash_password(password)?;
        let mut state = self.state.write().map_err(|_| AuthErrorCode::Internal)?;
        if state.by_email.contains_key(&email) {
            return Err(AuthErrorCode::EmailAlreadyInUse);
        }

        let credential = Credential {
            uid: Uuid::new_v4().simple().to_string(),
            email: email.clone(),
            password_hash,
            disabled: false,
        };
        let user = AuthUser {
            uid: credential.uid.clone(),
            email: credential.email.clone(),
        };
        state.by_email.insert(email.clone(), credential);
        if let Err(e) = self.save(&state.by_email) {
            state.by_email.remove(&email);
            return Err(e);
        }

        info!("registered account {}", user.uid);
        Ok(user)
    }

    /// Check a password against the stored hash
    pub fn verify(&self, email: &str, password: &str) -> Result<AuthUser, AuthErrorCode> {
        let email = normalize_email(email);
        if !EMAIL_RE.is_match(&email) {
            return Err(AuthErrorCode::InvalidEmail);
        }

        let now = Instant::now();
        let credential = {
            let state = self.state.read().map_err(|_| AuthErrorCode::Internal)?;
            let recent = state.failures.get(&email).map_or(0, |failures| {
                failures
                    .iter()
                    .filter(|at| now.duration_since(**at) < ATTEMPT_WINDOW)
                    .count()
            });
            if recent >= MAX_FAILED_ATTEMPTS {
                return Err(AuthErrorCode::TooManyRequests);
            }
            let Some(credential) = state.by_email.get(&email).cloned() else {
                return Err(AuthErrorCode::UserNotFound);
            };
            credential
        };
        if credential.disabled {
            return Err(AuthErrorCode::UserDisabled);
        }

        // hashing runs without holding the lock
        let matched = verify_password(password, &credential.password_hash)?;

        let mut state = self.state.write().map_err(|_| AuthErrorCode::Internal)?;
        if matched {
            state.failures.remove(&email);
            Ok(AuthUser {
                uid: credential.uid,
                email: credential.email,
            })
        } else {
            let failures = state.failures.entry(email).or_default();
            failures.retain(|at| now.duration_since(*at) < ATTEMPT_WINDOW);
            failures.push(now);
            Err(AuthErrorCode::WrongPassword)
        }
    }

    /// Block or unblock sign-in for an account
    pub fn set_disabled(&self, email: &str, disabled: bool) -> Result<(), AuthErrorCode> {
        let email = normalize_email(email);
        let mut state = self.state.write().map_err(|_| AuthErrorCode::Internal)?;
        let credential = state
            .by_email
            .get_mut(&email)
            .ok_or(AuthErrorCode::UserNotFound)?;
        credential.disabled = disabled;
        self.save(&state.by_email)
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.by_email.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hash a password using Argon2id with a fresh salt
fn hash_password(password: &str) -> Result<String, AuthErrorCode> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthErrorCode::Internal)
}

/// Verify a password against a stored Argon2 hash
fn verify_password(password: &str, hash: &str) -> Result<bool, AuthErrorCode> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthErrorCode::Internal)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// One client's connection to the identity provider
pub struct LocalAuth {
    credentials: Arc<CredentialStore>,
    state: watch::Sender<Option<AuthUser>>,
}

impl LocalAuth {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        let (state, _) = watch::channel(None);
        Self { credentials, state }
    }

    fn publish(&self, user: Option<AuthUser>) {
        self.state.send_replace(user);
    }
}

#[async_trait]
impl IdentityProvider for LocalAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthErrorCode> {
        let user = self.credentials.verify(email, password)?;
        self.publish(Some(user.clone()));
        Ok(user)
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<AuthUser, AuthErrorCode> {
        let user = self.credentials.register(email, password)?;
        self.publish(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthErrorCode> {
        self.publish(None);
        Ok(())
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_verify() {
        let store = CredentialStore::in_memory();
        let user = store.register("Alice@Waspa.org", "secret1").unwrap();
        assert_eq!(user.email, "alice@waspa.org");

        let again = store.verify("alice@waspa.org", "secret1").unwrap();
        assert_eq!(again.uid, user.uid);
        assert_eq!(
            store.verify("alice@waspa.org", "wrong!!").unwrap_err(),
            AuthErrorCode::WrongPassword
        );
        assert_eq!(
            store.verify("bob@waspa.org", "secret1").unwrap_err(),
            AuthErrorCode::UserNotFound
        );
    }

    #[test]
    fn registration_rules() {
        let store = CredentialStore::in_memory();
        assert_eq!(store.register("not-an-email", "secret1").unwrap_err(), AuthErrorCode::InvalidEmail);
        assert_eq!(store.register("a@waspa.org", "12345").unwrap_err(), AuthErrorCode::WeakPassword);
        store.register("a@waspa.org", "123456").unwrap();
        assert_eq!(
            store.register("a@waspa.org", "654321").unwrap_err(),
            AuthErrorCode::EmailAlreadyInUse
        );
    }

    #[test]
    fn throttles_repeated_failures() {
        let store = CredentialStore::in_memory();
        store.register("a@waspa.org", "secret1").unwrap();
        for _ in 0..MAX_FAILED_ATTEMPTS {
            assert_eq!(store.verify("a@waspa.org", "nope123").unwrap_err(), AuthErrorCode::WrongPassword);
        }
        assert_eq!(
            store.verify("a@waspa.org", "secret1").unwrap_err(),
            AuthErrorCode::TooManyRequests
        );
    }

    #[test]
    fn unknown_emails_leave_no_failure_entries() {
        let store = CredentialStore::in_memory();
        store.register("a@waspa.org", "secret1").unwrap();
        for n in 0..20 {
            let email = format!("ghost{}@waspa.org", n);
            assert_eq!(store.verify(&email, "secret1").unwrap_err(), AuthErrorCode::UserNotFound);
        }
        assert!(store.state.read().unwrap().failures.is_empty());

        store.verify("a@waspa.org", "nope123").unwrap_err();
        assert_eq!(store.state.read().unwrap().failures.len(), 1);
        store.verify("a@waspa.org", "secret1").unwrap();
        assert!(store.state.read().unwrap().failures.is_empty());
    }

    #[test]
    fn failed_users_file_write_drops_the_account() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let store = CredentialStore::open(&path).unwrap();
        // a directory in the file's place makes every save fail
        fs::create_dir(&path).unwrap();

        assert_eq!(store.register("a@waspa.org", "secret1").unwrap_err(), AuthErrorCode::Internal);
        assert!(store.is_empty());
        assert_eq!(store.verify("a@waspa.org", "secret1").unwrap_err(), AuthErrorCode::UserNotFound);
    }

    #[test]
    fn disabled_accounts_cannot_sign_in() {
        let store = CredentialStore::in_memory();
        store.register("a@waspa.org", "secret1").unwrap();
        store.set_disabled("a@waspa.org", true).unwrap();
        assert_eq!(store.verify("a@waspa.org", "secret1").unwrap_err(), AuthErrorCode::UserDisabled);
    }

    #[test]
    fn users_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database").join("users.json");
        {
            let store = CredentialStore::open(&path).unwrap();
            store.register("a@waspa.org", "secret1").unwrap();
        }
        let reopened = CredentialStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.verify("a@waspa.org", "secret1").is_ok());
    }

    #[tokio::test]
    async fn local_auth_publishes_transitions() {
        let credentials = Arc::new(CredentialStore::in_memory());
        let auth = LocalAuth::new(credentials);
        let mut rx = auth.subscribe();
        assert!(rx.borrow_and_update().is_none());

        let user = auth.create_account("a@waspa.org", "secret1").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&user));

        auth.sign_out().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(auth.current_user().is_none());
    }
}
