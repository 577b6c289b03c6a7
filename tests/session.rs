mod common;

use common::{Backend, PASSWORD};
use waspa::error::AuthError;
use waspa::remote::{Collection, DocumentStore, IdentityProvider};
use waspa::session::AuthTransition;

#[tokio::test]
async fn wrong_password_and_unknown_email_are_classified() {
    let backend = Backend::new();
    backend.seed_user("ana@waspa.org.za", "Ana", "user").await;
    let mut client = backend.client();

    let err = client.session.login("ana@waspa.org.za", "not-it").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);

    let err = client.session.login("nobody@waspa.org.za", PASSWORD).await.unwrap_err();
    assert_eq!(err, AuthError::AccountNotFound);

    assert!(!client.session.is_authenticated());
    assert!(!client.toasts.is_loading(), "loading flag must clear on failure");
}

#[tokio::test]
async fn registration_errors_are_classified() {
    let backend = Backend::new();
    backend.seed_user("taken@waspa.org.za", "Taken", "user").await;
    let mut client = backend.client();

    let err = client
        .session
        .register("Weak", "weak@waspa.org.za", "123")
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::WeakPassword);

    let err = client
        .session
        .register("Dup", "taken@waspa.org.za", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::EmailInUse);

    let err = client
        .session
        .register("Bad", "not-an-email", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidEmail);
}

#[tokio::test]
async fn registration_writes_a_user_profile() {
    let backend = Backend::new();
    let mut client = backend.client();

    client
        .session
        .register("Nomsa", "nomsa@waspa.org.za", PASSWORD)
        .await
        .unwrap();

    let current = client.session.current().unwrap();
    assert_eq!(current.profile.display_name(), "Nomsa");
    assert!(!current.is_manager());

    let doc = backend
        .documents
        .get(Collection::Users, current.uid())
        .await
        .unwrap()
        .expect("profile document");
    assert_eq!(doc.data["role"], "user");
    assert_eq!(doc.data["isManager"], false);
    assert_eq!(doc.data["email"], "nomsa@waspa.org.za");
}

#[tokio::test]
async fn login_records_last_login_and_keeps_profile() {
    let backend = Backend::new();
    let user = backend.seed_user("sipho@waspa.org.za", "Sipho", "user").await;
    let mut client = backend.client();

    client.login("sipho@waspa.org.za").await;

    let current = client.session.current().unwrap();
    assert_eq!(current.profile.display_name(), "Sipho");
    assert!(current.profile.last_login.is_some());

    let doc = backend
        .documents
        .get(Collection::Users, &user.uid)
        .await
        .unwrap()
        .unwrap();
    assert!(doc.data.contains_key("lastLogin"));
    assert_eq!(doc.data["name"], "Sipho", "merge must keep existing fields");
}

#[tokio::test]
async fn legacy_admin_role_counts_as_manager() {
    let backend = Backend::new();
    backend.seed_user("boss@waspa.org.za", "Boss", "admin").await;
    let mut client = backend.client();

    client.login("boss@waspa.org.za").await;
    assert!(client.session.is_manager());
}

#[tokio::test]
async fn sync_reports_initial_state_then_transitions() {
    let backend = Backend::new();
    backend.seed_user("lebo@waspa.org.za", "Lebo", "manager").await;
    let mut client = backend.client();

    assert_eq!(client.session.sync().await.unwrap(), Some(AuthTransition::SignedOut));
    assert_eq!(client.session.sync().await.unwrap(), None);

    client.login("lebo@waspa.org.za").await;
    match client.session.sync().await.unwrap() {
        Some(AuthTransition::SignedIn(user)) => assert_eq!(user.email, "lebo@waspa.org.za"),
        other => panic!("expected sign-in, got {:?}", other),
    }
    assert!(client.session.is_manager());

    client.session.logout().await;
    assert!(!client.session.is_authenticated());
    assert_eq!(client.session.sync().await.unwrap(), Some(AuthTransition::SignedOut));
}

#[tokio::test]
async fn missing_profile_falls_back_to_plain_user() {
    let backend = Backend::new();
    backend.credentials.register("ghost@waspa.org.za", PASSWORD).unwrap();
    let mut client = backend.client();

    client.login("ghost@waspa.org.za").await;
    let current = client.session.current().unwrap();
    assert!(!current.is_manager());
    assert_eq!(current.profile.display_name(), "User");
}

#[tokio::test]
async fn failed_profile_write_undoes_the_sign_in() {
    let backend = Backend::new();
    backend.seed_user("ana@waspa.org.za", "Ana", "user").await;
    let mut client = backend.client();
    assert_eq!(client.session.sync().await.unwrap(), Some(AuthTransition::SignedOut));

    backend.documents.fail_writes(true);
    let err = client.session.login("ana@waspa.org.za", PASSWORD).await.unwrap_err();
    assert!(matches!(err, AuthError::Profile(_)));

    assert!(client.auth.current_user().is_none());
    assert!(!client.session.is_authenticated());
    assert_eq!(client.session.sync().await.unwrap(), None);

    let err = client
        .session
        .register("Ben", "ben@waspa.org.za", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Profile(_)));
    assert!(client.auth.current_user().is_none());
    assert_eq!(client.session.sync().await.unwrap(), None);
}
