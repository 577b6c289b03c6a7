use thiserror::Error;

use crate::remote::AuthErrorCode;

/// Errors raised by the document store binding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Document store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Malformed document {id}: {message}")]
    Malformed { id: String, message: String },
}

impl StoreError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn malformed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Classified, user-facing authentication failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("No account found with this email")]
    AccountNotFound,

    #[error("Too many attempts. Please try again later")]
    TooManyAttempts,

    #[error("This email is already registered")]
    EmailInUse,

    #[error("Password is too weak")]
    WeakPassword,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Authentication failed. Please try again.")]
    Generic,

    #[error("Failed to load profile: {0}")]
    Profile(#[from] StoreError),
}

impl AuthError {
    /// Classify a provider code raised by a sign-in attempt
    pub fn from_login(code: AuthErrorCode) -> Self {
        match code {
            AuthErrorCode::WrongPassword | AuthErrorCode::InvalidEmail => Self::InvalidCredentials,
            AuthErrorCode::UserNotFound => Self::AccountNotFound,
            AuthErrorCode::TooManyRequests => Self::TooManyAttempts,
            _ => Self::Generic,
        }
    }

    /// Classify a provider code raised by account creation
    pub fn from_registration(code: AuthErrorCode) -> Self {
        match code {
            AuthErrorCode::EmailAlreadyInUse => Self::EmailInUse,
            AuthErrorCode::WeakPassword => Self::WeakPassword,
            AuthErrorCode::InvalidEmail => Self::InvalidEmail,
            _ => Self::Generic,
        }
    }
}

/// Errors raised by record store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Not authorized to modify {id}")]
    Forbidden { id: String },

    #[error(transparent)]
    Remote(#[from] StoreError),
}

/// Form validation failures, caught before any remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please fill in all required fields")]
    MissingField { field: String },

    #[error("Reference must be in format WAxxxx (e.g., WA1234)")]
    BadReference { reference: String },

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Start date must not be after end date")]
    InvertedRange,

    #[error("Invalid date: {value}")]
    BadDate { value: String },

    #[error("Unknown network: {network}")]
    UnknownNetwork { network: String },
}

impl ValidationError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No data to export")]
    Empty,

    #[error("Spreadsheet writer failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

/// Why a dispatched action did not change the screen
#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Record not found")]
    UnknownRecord { id: String },

    #[error("Manager access required")]
    ManagerOnly,
}

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("Template error: {0}")]
    Template(#[from] handlebars::TemplateError),

    #[error("Render error: {0}")]
    Render(#[from] handlebars::RenderError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
