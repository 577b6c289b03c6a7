//! Export rows and the summary block.
//!
//! Everything here is a pure function of the record slices it is given; the
//! output is a list of ordered `(header, value)` rows that any tabular writer
//! can consume.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{TestRecord, WarningRecord, warning_type_label};

/// One export row: ordered `(header, value)` pairs
pub type Row = Vec<(&'static str, String)>;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref SPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Remove markup tags and collapse runs of whitespace into single spaces
pub fn strip_markup(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, " ");
    SPACE_RE.replace_all(&without_tags, " ").trim().to_string()
}

/// Complete when either the type or the result says so
pub fn counts_as_complete(test: &TestRecord) -> bool {
    test.test_type == "Complete" || matches!(test.result.as_str(), "Complete" | "Compliant")
}

pub fn counts_as_partial(test: &TestRecord) -> bool {
    test.test_type == "Partial" || test.result == "Partial"
}

pub fn counts_as_non_compliant(test: &TestRecord) -> bool {
    matches!(test.result.as_str(), "Failed" | "Non-compliant")
}

pub fn test_row(test: &TestRecord) -> Row {
    vec![
        ("Date", test.date.clone()),
        ("Type", test.test_type.clone()),
        ("Network", test.network.clone()),
        ("Description", strip_markup(&test.description)),
        ("Result", test.result.clone()),
        ("File Link", test.file_link().unwrap_or_default().to_string()),
        ("Created By", test.created_by.clone().unwrap_or_default()),
        (
            "Created At",
            test.created_at.map(|at| at.to_rfc3339()).unwrap_or_default(),
        ),
    ]
}

pub fn warning_row(warning: &WarningRecord) -> Row {
    vec![
        ("Date", warning.date.clone()),
        ("Type", warning_type_label(&warning.warning_type).to_string()),
        ("Recipient", warning.recipient.clone()),
        ("Reference", warning.reference.clone()),
        ("Details", strip_markup(&warning.details)),
        ("Problem Areas", strip_markup(&warning.problem_areas)),
        ("Created By", warning.created_by.clone().unwrap_or_default()),
        (
            "Created At",
            warning.created_at.map(|at| at.to_rfc3339()).unwrap_or_default(),
        ),
    ]
}

pub fn test_rows<'a>(tests: impl IntoIterator<Item = &'a TestRecord>) -> Vec<Row> {
    tests.into_iter().map(test_row).collect()
}

pub fn warning_rows<'a>(warnings: impl IntoIterator<Item = &'a WarningRecord>) -> Vec<Row> {
    warnings.into_iter().map(warning_row).collect()
}

/// Headline numbers over a set of tests and warnings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_tests: usize,
    pub total_warnings: usize,
    pub complete: usize,
    pub partial: usize,
    pub non_compliant: usize,
    /// Distinct owner ids across both collections
    pub users: usize,
    pub earliest: Option<String>,
    pub latest: Option<String>,
    pub tests_by_network: BTreeMap<String, usize>,
    pub warnings_by_type: BTreeMap<String, usize>,
}

impl Summary {
    pub fn compute(tests: &[&TestRecord], warnings: &[&WarningRecord]) -> Self {
        let mut summary = Summary {
            total_tests: tests.len(),
            total_warnings: warnings.len(),
            ..Default::default()
        };

        let mut owners = BTreeSet::new();
        let mut dates = BTreeSet::new();

        for test in tests {
            if counts_as_complete(test) {
                summary.complete += 1;
            }
            if counts_as_partial(test) {
                summary.partial += 1;
            }
            if counts_as_non_compliant(test) {
                summary.non_compliant += 1;
            }
            *summary.tests_by_network.entry(test.network.clone()).or_default() += 1;
            owners.extend(test.user_id.as_deref());
            if !test.date.is_empty() {
                dates.insert(test.date.as_str());
            }
        }

        for warning in warnings {
            *summary
                .warnings_by_type
                .entry(warning.warning_type.clone())
                .or_default() += 1;
            owners.extend(warning.user_id.as_deref());
            if !warning.date.is_empty() {
                dates.insert(warning.date.as_str());
            }
        }

        summary.users = owners.len();
        summary.earliest = dates.first().map(|d| d.to_string());
        summary.latest = dates.last().map(|d| d.to_string());
        summary
    }

    /// Two-column `Metric`/`Value` rows for the summary sheet
    pub fn rows(&self) -> Vec<Row> {
        let mut rows = Vec::new();
        let mut push = |metric: String, value: String| {
            rows.push(vec![("Metric", metric), ("Value", value)]);
        };

        push("Total Tests".into(), self.total_tests.to_string());
        push("Total Warnings".into(), self.total_warnings.to_string());
        push("Complete Tests".into(), self.complete.to_string());
        push("Partial Tests".into(), self.partial.to_string());
        push("Non-compliant Tests".into(), self.non_compliant.to_string());
        push("Users".into(), self.users.to_string());
        push("Earliest Date".into(), self.earliest.clone().unwrap_or_default());
        push("Latest Date".into(), self.latest.clone().unwrap_or_default());
        for (network, count) in &self.tests_by_network {
            push(format!("Tests on {}", network), count.to_string());
        }
        for (kind, count) in &self.warnings_by_type {
            push(
                format!("{} Warnings", warning_type_label(kind)),
                count.to_string(),
            );
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test(date: &str, test_type: &str, result: &str, network: &str, owner: &str) -> TestRecord {
        TestRecord {
            id: format!("{}-{}", date, owner),
            date: date.into(),
            test_type: test_type.into(),
            network: network.into(),
            result: result.into(),
            user_id: Some(owner.into()),
            ..Default::default()
        }
    }

    #[test]
    fn markup_is_stripped_and_whitespace_collapsed() {
        assert_eq!(strip_markup("<b>x</b>  y"), "x y");
        assert_eq!(strip_markup("line\n\n<br/>next\t tab"), "line next tab");
        assert_eq!(strip_markup("plain"), "plain");
    }

    #[test]
    fn complete_counts_type_or_result() {
        let tests = [
            test("2024-01-01", "Complete", "Failed", "MTN", "u1"),
            test("2024-01-02", "Partial", "Compliant", "MTN", "u1"),
            test("2024-01-03", "Partial", "Partial", "Vodacom", "u2"),
        ];
        let refs: Vec<_> = tests.iter().collect();
        let summary = Summary::compute(&refs, &[]);

        assert_eq!(summary.total_tests, 3);
        assert_eq!(summary.complete, 2);
        assert_eq!(summary.partial, 2);
        assert_eq!(summary.non_compliant, 1);
        assert_eq!(summary.tests_by_network.get("MTN"), Some(&2));
    }

    #[test]
    fn summary_spans_both_collections() {
        let tests = [test("2024-02-10", "Complete", "Passed", "MTN", "u1")];
        let warnings = [
            WarningRecord {
                date: "2024-01-05".into(),
                warning_type: "pricing".into(),
                user_id: Some("u3".into()),
                ..Default::default()
            },
            WarningRecord {
                date: "2024-03-01".into(),
                warning_type: "pricing".into(),
                user_id: Some("u1".into()),
                ..Default::default()
            },
        ];
        let t: Vec<_> = tests.iter().collect();
        let w: Vec<_> = warnings.iter().collect();
        let summary = Summary::compute(&t, &w);

        assert_eq!(summary.users, 2);
        assert_eq!(summary.earliest.as_deref(), Some("2024-01-05"));
        assert_eq!(summary.latest.as_deref(), Some("2024-03-01"));
        assert_eq!(summary.warnings_by_type.get("pricing"), Some(&2));

        let rows = summary.rows();
        assert!(rows.iter().any(|r| r[0].1 == "Pricing Issue Warnings" && r[1].1 == "2"));
    }

    #[test]
    fn warning_row_uses_labels_and_clean_text() {
        let warning = WarningRecord {
            date: "2024-01-05".into(),
            warning_type: "service".into(),
            reference: "WA1234".into(),
            details: "<p>Late   opt-out</p>".into(),
            ..Default::default()
        };
        let row = warning_row(&warning);
        assert_eq!(row[1], ("Type", "Service Issue".to_string()));
        assert_eq!(row[4], ("Details", "Late opt-out".to_string()));
    }
}
