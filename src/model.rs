//! Records as they live in the document store and in the local mirrors.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::de::{DeserializeOwned, Error as DeError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::remote::Document;

/// Carrier networks offered by the test forms
pub const NETWORKS: &[&str] = &["Vodacom", "MTN", "Cell C", "Telkom"];

pub const TEST_TYPES: &[&str] = &["Complete", "Partial"];

pub const TEST_RESULTS: &[&str] = &[
    "Complete",
    "Compliant",
    "Passed",
    "Partial",
    "Warning",
    "Inconclusive",
    "Failed",
    "Non-compliant",
];

/// Warning type values with their display labels
pub const WARNING_TYPES: &[(&str, &str)] = &[
    ("compliance", "Compliance Issue"),
    ("service", "Service Issue"),
    ("pricing", "Pricing Issue"),
    ("other", "Other"),
];

pub fn warning_type_label(value: &str) -> &str {
    WARNING_TYPES
        .iter()
        .find(|(v, _)| *v == value)
        .map(|(_, label)| *label)
        .unwrap_or(value)
}

/// Calendar date in the `YYYY-MM-DD` form records are keyed by
pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// One normalized point in time.
///
/// Stored documents carry creation times in several shapes (RFC 3339
/// strings, bare dates, `{seconds, nanoseconds}` objects, epoch millis).
/// They are all converted here, once, on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
    Fractional(f64),
    Parts {
        #[serde(alias = "_seconds")]
        seconds: i64,
        #[serde(default, alias = "_nanoseconds")]
        nanoseconds: u32,
    },
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let at = match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Text(text) => parse_text_timestamp(&text)
                .ok_or_else(|| D::Error::custom(format!("unrecognised timestamp '{}'", text)))?,
            RawTimestamp::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom("timestamp out of range"))?,
            RawTimestamp::Fractional(ms) => Utc
                .timestamp_millis_opt(ms as i64)
                .single()
                .ok_or_else(|| D::Error::custom("timestamp out of range"))?,
            RawTimestamp::Parts {
                seconds,
                nanoseconds,
            } => Utc
                .timestamp_opt(seconds, nanoseconds)
                .single()
                .ok_or_else(|| D::Error::custom("timestamp out of range"))?,
        };
        Ok(Timestamp(at))
    }
}

fn parse_text_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Display bucket a test result falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultBucket {
    Compliant,
    Inconclusive,
    NonCompliant,
}

impl ResultBucket {
    pub fn from_result(result: &str) -> Option<Self> {
        match result {
            "Complete" | "Compliant" | "Passed" => Some(Self::Compliant),
            "Partial" | "Warning" | "Inconclusive" => Some(Self::Inconclusive),
            "Failed" | "Non-compliant" => Some(Self::NonCompliant),
            _ => None,
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::Inconclusive => "inconclusive",
            Self::NonCompliant => "non-compliant",
        }
    }
}

fn decode<T: DeserializeOwned>(doc: &Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc.data.clone()))
        .map_err(|e| StoreError::malformed(&doc.id, e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Profile document from the `users` collection.
///
/// Profiles written by older builds carry either `isManager` or `role`, or
/// both; every field is optional to accept all of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(skip)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_manager: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<Timestamp>,
}

impl UserProfile {
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut profile: Self = decode(doc)?;
        profile.id = doc.id.clone();
        Ok(profile)
    }

    /// Profile written for a freshly registered account
    pub fn new_registration(uid: &str, email: &str, name: &str, now: Timestamp) -> Self {
        Self {
            id: uid.to_string(),
            uid: Some(uid.to_string()),
            email: Some(email.to_string()),
            name: Some(name.to_string()),
            role: Some("user".to_string()),
            is_manager: Some(false),
            created_at: Some(now),
            last_login: Some(now),
        }
    }

    pub fn to_fields(&self) -> Map<String, Value> {
        encode(self)
    }

    /// Manager-equivalent: the flag, or either legacy role string
    pub fn is_manager(&self) -> bool {
        self.is_manager == Some(true)
            || matches!(self.role.as_deref(), Some("manager") | Some("admin"))
    }

    pub fn set_manager(&mut self, is_manager: bool) {
        self.is_manager = Some(is_manager);
        self.role = Some(role_for(is_manager).to_string());
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("User")
    }
}

/// Role string written alongside the manager flag
pub fn role_for(is_manager: bool) -> &'static str {
    if is_manager { "manager" } else { "user" }
}

/// A logged compliance test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, rename = "type")]
    pub test_type: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl TestRecord {
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut record: Self = decode(doc)?;
        record.id = doc.id.clone();
        Ok(record)
    }

    pub fn bucket(&self) -> Option<ResultBucket> {
        ResultBucket::from_result(&self.result)
    }

    pub fn file_link(&self) -> Option<&str> {
        self.file_link.as_deref().filter(|l| !l.is_empty())
    }

    /// Overlay a partial update; unset patch fields keep their value
    pub fn apply(&mut self, patch: &TestPatch, updated_at: Timestamp) {
        if let Some(date) = &patch.date {
            self.date = date.clone();
        }
        if let Some(test_type) = &patch.test_type {
            self.test_type = test_type.clone();
        }
        if let Some(network) = &patch.network {
            self.network = network.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(result) = &patch.result {
            self.result = result.clone();
        }
        if let Some(file_link) = &patch.file_link {
            self.file_link = Some(file_link.clone());
        }
        self.updated_at = Some(updated_at);
    }
}

/// Fields supplied by the user when recording a test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDraft {
    pub date: String,
    #[serde(rename = "type")]
    pub test_type: String,
    pub network: String,
    pub description: String,
    pub result: String,
    #[serde(default)]
    pub file_link: String,
}

impl TestDraft {
    pub fn to_fields(&self) -> Map<String, Value> {
        encode(self)
    }
}

/// Partial update of a test; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_link: Option<String>,
}

impl TestPatch {
    pub fn to_fields(&self) -> Map<String, Value> {
        encode(self)
    }
}

impl From<TestDraft> for TestPatch {
    fn from(draft: TestDraft) -> Self {
        Self {
            date: Some(draft.date),
            test_type: Some(draft.test_type),
            network: Some(draft.network),
            description: Some(draft.description),
            result: Some(draft.result),
            file_link: Some(draft.file_link),
        }
    }
}

/// A logged compliance warning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningRecord {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, rename = "type")]
    pub warning_type: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub problem_areas: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl WarningRecord {
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut record: Self = decode(doc)?;
        record.id = doc.id.clone();
        Ok(record)
    }

    pub fn apply(&mut self, patch: &WarningPatch, updated_at: Timestamp) {
        if let Some(date) = &patch.date {
            self.date = date.clone();
        }
        if let Some(warning_type) = &patch.warning_type {
            self.warning_type = warning_type.clone();
        }
        if let Some(recipient) = &patch.recipient {
            self.recipient = recipient.clone();
        }
        if let Some(reference) = &patch.reference {
            self.reference = reference.clone();
        }
        if let Some(details) = &patch.details {
            self.details = details.clone();
        }
        if let Some(problem_areas) = &patch.problem_areas {
            self.problem_areas = problem_areas.clone();
        }
        self.updated_at = Some(updated_at);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningDraft {
    pub date: String,
    #[serde(rename = "type")]
    pub warning_type: String,
    pub recipient: String,
    pub reference: String,
    pub details: String,
    pub problem_areas: String,
}

impl WarningDraft {
    pub fn to_fields(&self) -> Map<String, Value> {
        encode(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub warning_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_areas: Option<String>,
}

impl WarningPatch {
    pub fn to_fields(&self) -> Map<String, Value> {
        encode(self)
    }
}

impl From<WarningDraft> for WarningPatch {
    fn from(draft: WarningDraft) -> Self {
        Self {
            date: Some(draft.date),
            warning_type: Some(draft.warning_type),
            recipient: Some(draft.recipient),
            reference: Some(draft.reference),
            details: Some(draft.details),
            problem_areas: Some(draft.problem_areas),
        }
    }
}

/// Optional inclusive date bounds used by filters and the statistics panel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Compares against the record's ISO date string, as stored
    pub fn contains(&self, date: &str) -> bool {
        if let Some(start) = self.start {
            if date < iso_date(start).as_str() {
                return false;
            }
        }
        if let Some(end) = self.end {
            if date > iso_date(end).as_str() {
                return false;
            }
        }
        true
    }
}
