//! Typed action descriptors posted by the page's delegated listener, and
//! validation of the named form fields they carry.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

use super::state::{DashboardView, ManagerTab, TestFilter, UserTab};
use crate::error::ValidationError;
use crate::model::{DateRange, NETWORKS, TestDraft, WarningDraft};

lazy_static! {
    static ref REFERENCE_RE: Regex = Regex::new(r"^WA\d{4,}$").unwrap();
}

/// Datasets offered for export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dataset {
    Tests,
    Warnings,
    All,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Tests => "tests",
            Dataset::Warnings => "warnings",
            Dataset::All => "all",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        [Dataset::Tests, Dataset::Warnings, Dataset::All]
            .into_iter()
            .find(|d| d.as_str() == name)
    }

    pub fn filename(&self, format: ExportFormat) -> String {
        format!("waspa_{}_export.{}", self.as_str(), format.extension())
    }
}

/// File format of an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        [ExportFormat::Xlsx, ExportFormat::Csv]
            .into_iter()
            .find(|f| f.extension() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormKind {
    Login,
    Register,
    AddTest,
    EditTest,
    AddWarning,
    EditWarning,
    DateFilter,
    TestFilter,
}

/// One user interaction, as described by the markup's `data-action` attributes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    ShowRegister,
    ShowLogin,
    Logout,
    SwitchView {
        view: DashboardView,
    },
    UserTab {
        tab: UserTab,
    },
    ManagerTab {
        tab: ManagerTab,
    },
    EditTest {
        id: String,
    },
    EditWarning {
        id: String,
    },
    CloseDialog,
    DeleteTest {
        id: String,
    },
    DeleteWarning {
        id: String,
    },
    Promote {
        #[serde(rename = "userId")]
        user_id: String,
    },
    Demote {
        #[serde(rename = "userId")]
        user_id: String,
    },
    ClearDateFilter,
    ClearTestFilter,
    Export {
        dataset: Dataset,
        #[serde(default)]
        format: ExportFormat,
    },
    Refresh,
    Submit {
        form: FormKind,
        #[serde(default)]
        fields: HashMap<String, String>,
    },
}

pub type Fields = HashMap<String, String>;

fn required(fields: &Fields, name: &str) -> Result<String, ValidationError> {
    match fields.get(name).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => {
            warn!("form field '{}' is missing", name);
            Err(ValidationError::missing(name))
        }
    }
}

fn optional(fields: &Fields, name: &str) -> String {
    fields
        .get(name)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

/// Passwords are checked for presence but kept verbatim
fn secret(fields: &Fields, name: &str) -> Result<String, ValidationError> {
    required(fields, name)?;
    Ok(fields.get(name).cloned().unwrap_or_default())
}

pub fn validate_reference(reference: &str) -> Result<(), ValidationError> {
    if REFERENCE_RE.is_match(reference) {
        Ok(())
    } else {
        warn!("rejected warning reference '{}'", reference);
        Err(ValidationError::BadReference {
            reference: reference.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

pub fn login_form(fields: &Fields) -> Result<Credentials, ValidationError> {
    Ok(Credentials {
        email: required(fields, "email")?,
        password: secret(fields, "password")?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

pub fn registration_form(fields: &Fields) -> Result<Registration, ValidationError> {
    let registration = Registration {
        name: required(fields, "name")?,
        email: required(fields, "email")?,
        password: secret(fields, "password")?,
    };
    let confirm = secret(fields, "confirm")?;
    if confirm != registration.password {
        warn!("registration passwords differ");
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(registration)
}

pub fn test_form(fields: &Fields) -> Result<TestDraft, ValidationError> {
    Ok(TestDraft {
        date: required(fields, "date")?,
        test_type: required(fields, "type")?,
        network: required(fields, "network")?,
        description: required(fields, "description")?,
        result: required(fields, "result")?,
        file_link: optional(fields, "fileLink"),
    })
}

pub fn warning_form(fields: &Fields) -> Result<WarningDraft, ValidationError> {
    let draft = WarningDraft {
        date: required(fields, "date")?,
        warning_type: required(fields, "type")?,
        recipient: required(fields, "recipient")?,
        reference: required(fields, "reference")?,
        details: required(fields, "details")?,
        problem_areas: required(fields, "problemAreas")?,
    };
    validate_reference(&draft.reference)?;
    Ok(draft)
}

fn parse_date(value: &str) -> Result<Option<NaiveDate>, ValidationError> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| ValidationError::BadDate {
            value: value.to_string(),
        })
}

/// Optional `start`/`end` bounds; both may be blank
pub fn date_filter_form(fields: &Fields) -> Result<DateRange, ValidationError> {
    let start = parse_date(&optional(fields, "start"))?;
    let end = parse_date(&optional(fields, "end"))?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(ValidationError::InvertedRange);
        }
    }
    Ok(DateRange::new(start, end))
}

/// Date bounds plus an optional network; a blank network means all of them
pub fn test_filter_form(fields: &Fields) -> Result<TestFilter, ValidationError> {
    let range = date_filter_form(fields)?;
    let network = Some(optional(fields, "network")).filter(|n| !n.is_empty());
    if let Some(network) = &network {
        if !NETWORKS.contains(&network.as_str()) {
            return Err(ValidationError::UnknownNetwork {
                network: network.clone(),
            });
        }
    }
    Ok(TestFilter { range, network })
}
