/*!
# WASPA Compliance Dashboard

A browser-rendered dashboard for recording compliance tests and warnings,
served by a small Rust web shell.

## Overview

Staff log the tests they run against carrier networks and the warnings they
issue to members. Managers see every record, manage user roles and export
reports; everyone else sees only their own records.

## Architecture

### Collaborators
- **Identity provider** (`remote::IdentityProvider`): email/password sign-in,
  account creation and signed-in/signed-out notifications
- **Document store** (`remote::DocumentStore`): the `users`, `tests` and
  `warnings` collections, ordered owner-filtered queries and push snapshots

Local bindings for both live in `remote::identity` and `remote::documents`.

### Core
- **Session**: classified sign-in/registration, profile loading, manager check
- **Record Store**: local mirrors of the collections, CRUD that patches a mirror
  only after the store acknowledged the write, read-side aggregates
- **Report Formatter**: export rows and the summary block
- **View Controller**: UI state machine; every successful transition re-renders
  the whole page through one pure render function

### Web shell (feature `web`)
- One controller per browser, keyed by the `session` cookie
- Delegated `data-action` events posted as typed descriptors
- XLSX exports

## Modules

- **notifier**: toasts and the loading flag
- **model**: records, drafts, patches and the normalized `Timestamp`
- **remote**: collaborator traits and local bindings
- **session**: signed-in identity and role
- **store**: record mirrors and aggregates
- **report**: export rows and summary
- **downloader**: CSV and XLSX writers
- **view**: UI state, actions, statistics, rendering and the controller
- **config**: TOML configuration
- **error**: error types
*/

pub mod config;
pub mod downloader;
pub mod error;
pub mod model;
pub mod notifier;
pub mod remote;
pub mod report;
pub mod session;
pub mod store;
pub mod view;

#[cfg(feature = "web")]
pub mod app;

pub use error::{ActionError, AuthError, ExportError, RecordError, StoreError, ValidationError};
pub use notifier::{Notifier, Toast, ToastKind, ToastQueue};
pub use session::{CurrentUser, Session};
pub use store::RecordStore;
