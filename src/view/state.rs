use serde::{Deserialize, Serialize};

use crate::model::DateRange;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DashboardView {
    #[default]
    User,
    Manager,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserTab {
    #[default]
    Tests,
    Warnings,
    Stats,
    Export,
}

impl UserTab {
    pub const ALL: [(UserTab, &'static str); 4] = [
        (UserTab::Tests, "Tests"),
        (UserTab::Warnings, "Warnings"),
        (UserTab::Stats, "Statistics"),
        (UserTab::Export, "Export"),
    ];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagerTab {
    #[default]
    Overview,
    Stats,
    Export,
    Admin,
}

impl ManagerTab {
    pub const ALL: [(ManagerTab, &'static str); 4] = [
        (ManagerTab::Overview, "Overview"),
        (ManagerTab::Stats, "Statistics"),
        (ManagerTab::Export, "Export"),
        (ManagerTab::Admin, "Users"),
    ];
}

/// Bounds applied to the tests table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestFilter {
    pub range: DateRange,
    pub network: Option<String>,
}

impl TestFilter {
    pub fn is_active(&self) -> bool {
        !self.range.is_unbounded() || self.network.is_some()
    }
}

/// Client-only UI state; never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub dashboard: DashboardView,
    pub user_tab: UserTab,
    pub manager_tab: ManagerTab,
    pub show_register: bool,
    pub editing_test: Option<String>,
    pub editing_warning: Option<String>,
    pub date_filter: DateRange,
    pub test_filter: TestFilter,
}

impl UiState {
    pub fn is_editing(&self) -> bool {
        self.editing_test.is_some() || self.editing_warning.is_some()
    }

    pub fn close_dialogs(&mut self) {
        self.editing_test = None;
        self.editing_warning = None;
    }

    /// Back to the landing screen of a fresh sign-in
    pub fn reset_dashboard(&mut self) {
        self.dashboard = DashboardView::User;
        self.user_tab = UserTab::Tests;
        self.manager_tab = ManagerTab::Overview;
        self.date_filter = DateRange::default();
        self.test_filter = TestFilter::default();
        self.close_dialogs();
    }
}

/// Top-level screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    LoggedOut { showing_register: bool },
    LoggedIn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_drops_edit_state_and_filters() {
        let mut ui = UiState {
            dashboard: DashboardView::Manager,
            manager_tab: ManagerTab::Admin,
            editing_warning: Some("w1".into()),
            test_filter: TestFilter {
                range: DateRange::default(),
                network: Some("MTN".into()),
            },
            ..Default::default()
        };
        assert!(ui.test_filter.is_active());
        assert!(ui.is_editing());

        ui.reset_dashboard();
        assert_eq!(ui.dashboard, DashboardView::User);
        assert_eq!(ui.manager_tab, ManagerTab::Overview);
        assert!(!ui.is_editing());
        assert!(!ui.test_filter.is_active());
    }
}
