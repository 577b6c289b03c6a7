//! Whole-page rendering.
//!
//! `Renderer::render` is a pure function of a [`Frame`]: it builds one JSON
//! context from the session, the record mirrors and the UI state and runs it
//! through the page templates. Interactive elements carry `data-action`
//! attributes only; the page's single delegated listener turns them into
//! [`Action`](super::action::Action) descriptors.

use chrono::NaiveDate;
use handlebars::Handlebars;
use serde_json::{Value, json};

use super::state::{DashboardView, ManagerTab, Phase, UiState, UserTab};
use super::stats::{StatsPanel, Targets};
use crate::error::ViewError;
use crate::model::{
    NETWORKS, TEST_RESULTS, TEST_TYPES, TestRecord, UserProfile, WARNING_TYPES, WarningRecord,
    iso_date, warning_type_label,
};
use crate::report::Summary;
use crate::session::{CurrentUser, Session};
use crate::store::RecordStore;

const TEMPLATES: &[(&str, &str)] = &[
    ("loading", include_str!("../templates/loading.hbs")),
    ("login", include_str!("../templates/login.hbs")),
    ("register", include_str!("../templates/register.hbs")),
    ("dashboard", include_str!("../templates/dashboard.hbs")),
];

const PARTIALS: &[(&str, &str)] = &[
    ("header", include_str!("../templates/header.hbs")),
    ("counters", include_str!("../templates/counters.hbs")),
    ("tests_table", include_str!("../templates/tests_table.hbs")),
    ("warnings_table", include_str!("../templates/warnings_table.hbs")),
    ("test_fields", include_str!("../templates/test_fields.hbs")),
    ("warning_fields", include_str!("../templates/warning_fields.hbs")),
    ("stats", include_str!("../templates/stats.hbs")),
    ("export", include_str!("../templates/export.hbs")),
    ("admin", include_str!("../templates/admin.hbs")),
    ("dialogs", include_str!("../templates/dialogs.hbs")),
];

/// Everything one render reads
pub struct Frame<'a> {
    pub phase: Phase,
    pub ui: &'a UiState,
    pub session: &'a Session,
    pub records: &'a RecordStore,
    pub today: NaiveDate,
    pub targets: &'a Targets,
}

pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self, ViewError> {
        let mut registry = Handlebars::new();
        for (name, source) in PARTIALS {
            registry.register_partial(name, *source)?;
        }
        for (name, source) in TEMPLATES {
            registry.register_template_string(name, *source)?;
        }
        Ok(Self { registry })
    }

    pub fn render(&self, frame: &Frame<'_>) -> Result<String, ViewError> {
        let markup = match (frame.phase, frame.session.current()) {
            (Phase::Loading, _) => self.registry.render("loading", &json!({}))?,
            (Phase::LoggedIn, Some(user)) => {
                self.registry.render("dashboard", &dashboard_context(frame, user))?
            }
            (Phase::LoggedOut { showing_register: true }, _) => {
                self.registry.render("register", &json!({}))?
            }
            _ => self.registry.render("login", &json!({}))?,
        };
        Ok(markup)
    }
}

fn options(values: &[&str], selected: &str) -> Vec<Value> {
    values
        .iter()
        .map(|value| json!({ "value": value, "label": value, "selected": *value == selected }))
        .collect()
}

fn warning_type_options(selected: &str) -> Vec<Value> {
    WARNING_TYPES
        .iter()
        .map(|(value, label)| json!({ "value": value, "label": label, "selected": *value == selected }))
        .collect()
}

fn test_row(test: &TestRecord, user: &CurrentUser) -> Value {
    json!({
        "id": test.id,
        "date": test.date,
        "type": test.test_type,
        "network": test.network,
        "description": test.description,
        "result": test.result,
        "resultClass": test.bucket().map(|b| b.css_class()).unwrap_or(""),
        "fileLink": test.file_link(),
        "createdBy": test.created_by,
        "canEdit": can_edit(user, test.user_id.as_deref()),
    })
}

fn warning_row(warning: &WarningRecord, user: &CurrentUser) -> Value {
    json!({
        "id": warning.id,
        "date": warning.date,
        "type": warning.warning_type,
        "typeLabel": warning_type_label(&warning.warning_type),
        "recipient": warning.recipient,
        "reference": warning.reference,
        "details": warning.details,
        "problemAreas": warning.problem_areas,
        "createdBy": warning.created_by,
        "canEdit": can_edit(user, warning.user_id.as_deref()),
    })
}

fn user_row(profile: &UserProfile, user: &CurrentUser) -> Value {
    json!({
        "id": profile.id,
        "name": profile.display_name(),
        "email": profile.email,
        "isManager": profile.is_manager(),
        "isSelf": profile.id == user.uid(),
        "lastLogin": profile.last_login.map(|at| iso_date(at.as_datetime().date_naive())),
    })
}

fn can_edit(user: &CurrentUser, owner: Option<&str>) -> bool {
    user.is_manager() || owner.is_none_or(|owner| owner == user.uid())
}

fn test_form(test: Option<&TestRecord>, today: &str) -> Value {
    let blank = TestRecord::default();
    let test = test.unwrap_or(&blank);
    json!({
        "id": test.id,
        "date": if test.date.is_empty() { today } else { test.date.as_str() },
        "description": test.description,
        "fileLink": test.file_link(),
        "types": options(TEST_TYPES, &test.test_type),
        "networks": options(NETWORKS, &test.network),
        "results": options(TEST_RESULTS, &test.result),
    })
}

fn warning_form(warning: Option<&WarningRecord>, today: &str) -> Value {
    let blank = WarningRecord::default();
    let warning = warning.unwrap_or(&blank);
    json!({
        "id": warning.id,
        "date": if warning.date.is_empty() { today } else { warning.date.as_str() },
        "recipient": warning.recipient,
        "reference": warning.reference,
        "details": warning.details,
        "problemAreas": warning.problem_areas,
        "types": warning_type_options(&warning.warning_type),
    })
}

fn tabs<T: PartialEq + serde::Serialize + Copy>(all: &[(T, &str)], active: T, action: &str) -> Vec<Value> {
    all.iter()
        .map(|(tab, label)| json!({ "id": tab, "label": label, "active": *tab == active, "action": action }))
        .collect()
}

fn dashboard_context(frame: &Frame<'_>, user: &CurrentUser) -> Value {
    let records = frame.records;
    let ui = frame.ui;
    let today = iso_date(frame.today);
    let manager_view = user.is_manager() && ui.dashboard == DashboardView::Manager;

    let filter = &ui.test_filter;
    let tests: Vec<_> = records
        .filter_tests(&filter.range, filter.network.as_deref())
        .into_iter()
        .map(|t| test_row(t, user))
        .collect();
    let warnings: Vec<_> = records.warnings().iter().map(|w| warning_row(w, user)).collect();

    let all_tests: Vec<&TestRecord> = records.tests().iter().collect();
    let all_warnings: Vec<&WarningRecord> = records.warnings().iter().collect();
    let stats = StatsPanel::compute(
        &records.filter_tests(&ui.date_filter, None),
        &records.filter_warnings(&ui.date_filter),
        &ui.date_filter,
        frame.targets,
        frame.today,
    );

    let editing_test = ui
        .editing_test
        .as_deref()
        .and_then(|id| records.find_test(id))
        .map(|test| test_form(Some(test), &today));
    let editing_warning = ui
        .editing_warning
        .as_deref()
        .and_then(|id| records.find_warning(id))
        .map(|warning| warning_form(Some(warning), &today));

    let mut context = json!({
        "user": {
            "name": user.profile.display_name(),
            "email": user.email(),
            "isManager": user.is_manager(),
        },
        "managerView": manager_view,
        "views": {
            "user": ui.dashboard == DashboardView::User || !user.is_manager(),
            "manager": manager_view,
        },
        "counters": {
            "testsToday": records.tests_on(frame.today).len(),
            "warningsToday": records.warnings_on(frame.today).len(),
            "totalTests": records.tests().len(),
            "activeDays": records.active_days(),
        },
        "tests": tests,
        "warnings": warnings,
        "stats": stats,
        "testFilter": {
            "start": filter.range.start.map(iso_date),
            "end": filter.range.end.map(iso_date),
            "networks": options(NETWORKS, filter.network.as_deref().unwrap_or_default()),
            "active": filter.is_active(),
        },
        "dateFilter": {
            "start": ui.date_filter.start.map(iso_date),
            "end": ui.date_filter.end.map(iso_date),
        },
        "newTest": test_form(None, &today),
        "newWarning": warning_form(None, &today),
        "editingTest": editing_test,
        "editingWarning": editing_warning,
        "today": today,
    });

    if manager_view {
        let users: Vec<_> = records.users().iter().map(|u| user_row(u, user)).collect();
        context["tabs"] = json!(tabs(&ManagerTab::ALL, ui.manager_tab, "manager-tab"));
        context["tab"] = json!({
            "overview": ui.manager_tab == ManagerTab::Overview,
            "stats": ui.manager_tab == ManagerTab::Stats,
            "export": ui.manager_tab == ManagerTab::Export,
            "admin": ui.manager_tab == ManagerTab::Admin,
        });
        context["summary"] = json!(Summary::compute(&all_tests, &all_warnings));
        context["activeUsers"] = json!(records.active_users_on(frame.today));
        context["users"] = json!(users);
    } else {
        context["tabs"] = json!(tabs(&UserTab::ALL, ui.user_tab, "user-tab"));
        context["tab"] = json!({
            "tests": ui.user_tab == UserTab::Tests,
            "warnings": ui.user_tab == UserTab::Warnings,
            "stats": ui.user_tab == UserTab::Stats,
            "export": ui.user_tab == UserTab::Export,
        });
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::ToastQueue;
    use crate::remote::{CredentialStore, LocalAuth, LocalDocumentStore};
    use std::sync::Arc;

    fn signed_out() -> (Session, RecordStore) {
        let toasts = Arc::new(ToastQueue::new());
        let documents = Arc::new(LocalDocumentStore::in_memory());
        let auth = Arc::new(LocalAuth::new(Arc::new(CredentialStore::in_memory())));
        (
            Session::new(auth, documents.clone(), toasts.clone()),
            RecordStore::new(documents, toasts),
        )
    }

    fn render(phase: Phase) -> String {
        let (session, records) = signed_out();
        let ui = UiState::default();
        let frame = Frame {
            phase,
            ui: &ui,
            session: &session,
            records: &records,
            today: NaiveDate::from_ymd_opt(2024, 4, 15).unwrap(),
            targets: &Targets::default(),
        };
        Renderer::new().unwrap().render(&frame).unwrap()
    }

    #[test]
    fn phase_selects_the_template() {
        assert!(render(Phase::LoggedOut { showing_register: false }).contains("data-form=\"login\""));
        assert!(render(Phase::LoggedOut { showing_register: true }).contains("data-form=\"register\""));
    }

    #[test]
    fn logged_in_without_a_user_falls_back_to_login() {
        assert!(render(Phase::LoggedIn).contains("data-form=\"login\""));
    }

    #[test]
    fn interactive_elements_carry_no_inline_handlers() {
        for phase in [
            Phase::Loading,
            Phase::LoggedOut { showing_register: false },
            Phase::LoggedOut { showing_register: true },
        ] {
            assert!(!render(phase).contains("onclick"));
        }
    }
}
