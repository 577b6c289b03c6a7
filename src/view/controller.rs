use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};

use super::action::{
    Action, Dataset, ExportFormat, Fields, FormKind, date_filter_form, login_form,
    registration_form, test_filter_form, test_form, warning_form,
};
use super::render::{Frame, Renderer};
use super::state::{DashboardView, ManagerTab, Phase, UiState, UserTab};
use super::stats::{Clock, SystemClock, Targets};
use crate::downloader::{Sheet, sheets_to_csv, to_xlsx};
use crate::error::{ActionError, ExportError, RecordError, ViewError};
use crate::model::{TestPatch, WarningPatch};
use crate::notifier::Notifier;
use crate::report::{Summary, test_rows, warning_rows};
use crate::session::{AuthTransition, Session};
use crate::store::RecordStore;

/// Whatever displays the root markup
pub trait Surface: Send + Sync {
    /// Replace the whole visible tree
    fn replace_root(&self, markup: String);
}

/// Surface that keeps the latest markup for the web shell to hand out
#[derive(Debug, Default)]
pub struct RootSlot {
    markup: Mutex<String>,
}

impl RootSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markup(&self) -> String {
        match self.markup.lock() {
            Ok(markup) => markup.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Surface for RootSlot {
    fn replace_root(&self, markup: String) {
        match self.markup.lock() {
            Ok(mut slot) => *slot = markup,
            Err(poisoned) => *poisoned.into_inner() = markup,
        }
    }
}

/// File produced by an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Owns the screen: reacts to actions and auth transitions, re-rendering the
/// whole tree after each successful one.
pub struct ViewController {
    session: Session,
    records: RecordStore,
    notifier: Arc<dyn Notifier>,
    surface: Arc<dyn Surface>,
    renderer: Renderer,
    clock: Arc<dyn Clock>,
    targets: Targets,
    live_updates: bool,
    ui: UiState,
    phase: Phase,
    frames: u64,
    pending_download: Option<(Dataset, ExportFormat)>,
}

impl ViewController {
    pub fn new(
        session: Session,
        records: RecordStore,
        notifier: Arc<dyn Notifier>,
        surface: Arc<dyn Surface>,
    ) -> Result<Self, ViewError> {
        Ok(Self {
            session,
            records,
            notifier,
            surface,
            renderer: Renderer::new()?,
            clock: Arc::new(SystemClock),
            targets: Targets::default(),
            live_updates: false,
            ui: UiState::default(),
            phase: Phase::Loading,
            frames: 0,
            pending_download: None,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_targets(mut self, targets: Targets) -> Self {
        self.targets = targets;
        self
    }

    /// Keep the mirrors fed by push snapshots instead of one-shot loads
    pub fn with_live_updates(mut self, live: bool) -> Self {
        self.live_updates = live;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Number of full renders performed so far
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Export the last export action prepared, if not yet fetched
    pub fn take_download(&mut self) -> Option<(Dataset, ExportFormat)> {
        self.pending_download.take()
    }

    /// Show the loading screen, then settle on the provider's initial state
    pub async fn start(&mut self) {
        self.phase = Phase::Loading;
        self.render();
        self.refresh().await;
    }

    /// Apply pending auth transitions and pushed snapshots.
    ///
    /// Renders once if anything changed; returns whether it did.
    pub async fn refresh(&mut self) -> bool {
        let mut changed = self.sync_auth().await;
        if self.records.poll_live() {
            debug!("live snapshot applied");
            changed = true;
        }
        if changed {
            self.render();
        }
        changed
    }

    async fn sync_auth(&mut self) -> bool {
        match self.session.sync().await {
            Ok(Some(AuthTransition::SignedIn(user))) => {
                debug!("signed-in transition for {}", user.uid);
                self.enter_dashboard().await;
                true
            }
            Ok(Some(AuthTransition::SignedOut)) => {
                self.leave_dashboard();
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("failed to apply auth transition: {}", e);
                self.notifier.error(&e.to_string());
                false
            }
        }
    }

    async fn enter_dashboard(&mut self) {
        self.phase = Phase::LoggedIn;
        self.ui.reset_dashboard();
        self.ui.show_register = false;

        let Some(actor) = self.session.current() else {
            return;
        };
        let loaded = if self.live_updates {
            self.records.start_live(actor).await
        } else {
            self.records.load(actor).await
        };
        if let Err(e) = loaded {
            warn!("dashboard opened without records: {}", e);
        }
    }

    fn leave_dashboard(&mut self) {
        self.records.clear();
        self.ui.close_dialogs();
        self.phase = Phase::LoggedOut {
            showing_register: self.ui.show_register,
        };
    }

    /// Handle one action. A successful transition is followed by exactly one
    /// full render; a failure is reported and leaves the screen as it was.
    pub async fn dispatch(&mut self, action: Action) -> Result<(), ActionError> {
        debug!("dispatch {:?}", action);
        let rerender = match self.apply(action).await {
            Ok(rerender) => rerender,
            Err(e) => {
                self.report(&e);
                return Err(e);
            }
        };
        if rerender {
            self.render();
        }
        Ok(())
    }

    async fn apply(&mut self, action: Action) -> Result<bool, ActionError> {
        match action {
            Action::ShowRegister => self.show_register(true),
            Action::ShowLogin => self.show_register(false),
            Action::Logout => {
                self.session.logout().await;
                self.ui.show_register = false;
                self.ui.reset_dashboard();
                self.sync_auth().await;
                self.leave_dashboard();
            }
            Action::SwitchView { view } => {
                if view == DashboardView::Manager && !self.session.is_manager() {
                    return Err(ActionError::ManagerOnly);
                }
                self.ui.dashboard = view;
                match view {
                    DashboardView::User => self.ui.user_tab = UserTab::Tests,
                    DashboardView::Manager => self.ui.manager_tab = ManagerTab::Overview,
                }
            }
            Action::UserTab { tab } => self.ui.user_tab = tab,
            Action::ManagerTab { tab } => {
                if !self.session.is_manager() {
                    return Err(ActionError::ManagerOnly);
                }
                self.ui.manager_tab = tab;
            }
            Action::EditTest { id } => {
                if self.records.find_test(&id).is_none() {
                    return Err(ActionError::UnknownRecord { id });
                }
                self.ui.editing_warning = None;
                self.ui.editing_test = Some(id);
            }
            Action::EditWarning { id } => {
                if self.records.find_warning(&id).is_none() {
                    return Err(ActionError::UnknownRecord { id });
                }
                self.ui.editing_test = None;
                self.ui.editing_warning = Some(id);
            }
            Action::CloseDialog => self.ui.close_dialogs(),
            Action::DeleteTest { id } => {
                let actor = self.session.current().ok_or(RecordError::NotSignedIn)?;
                self.records.delete_test(actor, &id).await?;
                if self.ui.editing_test.as_deref() == Some(id.as_str()) {
                    self.ui.editing_test = None;
                }
            }
            Action::DeleteWarning { id } => {
                let actor = self.session.current().ok_or(RecordError::NotSignedIn)?;
                self.records.delete_warning(actor, &id).await?;
                if self.ui.editing_warning.as_deref() == Some(id.as_str()) {
                    self.ui.editing_warning = None;
                }
            }
            Action::Promote { user_id } => {
                self.records
                    .update_user_role(&mut self.session, &user_id, true)
                    .await?;
            }
            Action::Demote { user_id } => {
                self.records
                    .update_user_role(&mut self.session, &user_id, false)
                    .await?;
                if !self.session.is_manager() {
                    self.ui.dashboard = DashboardView::User;
                    self.ui.close_dialogs();
                }
            }
            Action::ClearDateFilter => self.ui.date_filter = Default::default(),
            Action::ClearTestFilter => self.ui.test_filter = Default::default(),
            Action::Export { dataset, format } => {
                self.export_sheets(dataset)?;
                self.pending_download = Some((dataset, format));
                return Ok(false);
            }
            Action::Refresh => {
                self.refresh().await;
                return Ok(false);
            }
            Action::Submit { form, fields } => self.submit(form, &fields).await?,
        }
        Ok(true)
    }

    fn show_register(&mut self, showing: bool) {
        self.ui.show_register = showing;
        if let Phase::LoggedOut { .. } = self.phase {
            self.phase = Phase::LoggedOut {
                showing_register: showing,
            };
        }
    }

    async fn submit(&mut self, form: FormKind, fields: &Fields) -> Result<(), ActionError> {
        match form {
            FormKind::Login => {
                let credentials = login_form(fields)?;
                self.session
                    .login(&credentials.email, &credentials.password)
                    .await?;
                self.settle_sign_in().await;
            }
            FormKind::Register => {
                let registration = registration_form(fields)?;
                self.session
                    .register(&registration.name, &registration.email, &registration.password)
                    .await?;
                self.notifier.success("Account created successfully!");
                self.settle_sign_in().await;
            }
            FormKind::AddTest => {
                let draft = test_form(fields)?;
                let actor = self.session.current().ok_or(RecordError::NotSignedIn)?;
                self.records.add_test(actor, draft).await?;
            }
            FormKind::EditTest => {
                let id = self
                    .ui
                    .editing_test
                    .clone()
                    .ok_or_else(|| ActionError::UnknownRecord { id: String::new() })?;
                let patch = TestPatch::from(test_form(fields)?);
                let actor = self.session.current().ok_or(RecordError::NotSignedIn)?;
                self.records.update_test(actor, &id, patch).await?;
                self.ui.editing_test = None;
            }
            FormKind::AddWarning => {
                let draft = warning_form(fields)?;
                let actor = self.session.current().ok_or(RecordError::NotSignedIn)?;
                self.records.add_warning(actor, draft).await?;
            }
            FormKind::EditWarning => {
                let id = self
                    .ui
                    .editing_warning
                    .clone()
                    .ok_or_else(|| ActionError::UnknownRecord { id: String::new() })?;
                let patch = WarningPatch::from(warning_form(fields)?);
                let actor = self.session.current().ok_or(RecordError::NotSignedIn)?;
                self.records.update_warning(actor, &id, patch).await?;
                self.ui.editing_warning = None;
            }
            FormKind::DateFilter => {
                self.ui.date_filter = date_filter_form(fields)?;
            }
            FormKind::TestFilter => {
                self.ui.test_filter = test_filter_form(fields)?;
            }
        }
        Ok(())
    }

    /// Consume the provider's signed-in transition right away so the
    /// response to the form already shows the dashboard
    async fn settle_sign_in(&mut self) {
        self.sync_auth().await;
        if self.phase != Phase::LoggedIn && self.session.is_authenticated() {
            self.enter_dashboard().await;
        }
    }

    fn report(&self, err: &ActionError) {
        warn!("action rejected: {}", err);
        match err {
            // the record store already told the user
            ActionError::Record(RecordError::Remote(_) | RecordError::Forbidden { .. }) => {}
            ActionError::Record(RecordError::NotSignedIn) => self.notifier.error("Please log in first"),
            ActionError::Export(e) => self.report_export(e),
            other => self.notifier.error(&other.to_string()),
        }
    }

    fn report_export(&self, err: &ExportError) {
        match err {
            ExportError::Empty => self.notifier.error("No data to export"),
            ExportError::Xlsx(e) => {
                error!("spreadsheet export failed: {}", e);
                self.notifier.error("Export failed");
            }
        }
    }

    fn export_sheets(&self, dataset: Dataset) -> Result<Vec<Sheet>, ExportError> {
        let tests = self.records.tests();
        let warnings = self.records.warnings();
        let empty = match dataset {
            Dataset::Tests => tests.is_empty(),
            Dataset::Warnings => warnings.is_empty(),
            Dataset::All => tests.is_empty() && warnings.is_empty(),
        };
        if empty {
            return Err(ExportError::Empty);
        }

        let sheets = match dataset {
            Dataset::Tests => vec![Sheet::new("Tests", test_rows(tests))],
            Dataset::Warnings => vec![Sheet::new("Warnings", warning_rows(warnings))],
            Dataset::All => {
                let t: Vec<_> = tests.iter().collect();
                let w: Vec<_> = warnings.iter().collect();
                vec![
                    Sheet::new("Tests", test_rows(tests)),
                    Sheet::new("Warnings", warning_rows(warnings)),
                    Sheet::new("Summary", Summary::compute(&t, &w).rows()),
                ]
            }
        };
        Ok(sheets)
    }

    /// Build the file for `dataset` from the visible records
    pub fn export(&self, dataset: Dataset, format: ExportFormat) -> Result<Download, ExportError> {
        let built = self.export_sheets(dataset).and_then(|sheets| match format {
            ExportFormat::Xlsx => to_xlsx(&sheets),
            ExportFormat::Csv => sheets_to_csv(&sheets).map(String::into_bytes),
        });
        match built {
            Ok(bytes) => {
                info!(
                    "exported {} as {} ({} bytes)",
                    dataset.as_str(),
                    format.extension(),
                    bytes.len()
                );
                self.notifier.success("Export completed!");
                Ok(Download {
                    filename: dataset.filename(format),
                    content_type: format.content_type(),
                    bytes,
                })
            }
            Err(e) => {
                self.report_export(&e);
                Err(e)
            }
        }
    }

    fn render(&mut self) {
        let frame = Frame {
            phase: self.phase,
            ui: &self.ui,
            session: &self.session,
            records: &self.records,
            today: self.clock.today(),
            targets: &self.targets,
        };
        match self.renderer.render(&frame) {
            Ok(markup) => {
                self.frames += 1;
                debug!("frame {} ({} bytes)", self.frames, markup.len());
                self.surface.replace_root(markup);
            }
            Err(e) => {
                error!("render failed: {}", e);
                self.notifier.error("Failed to render the page");
            }
        }
    }
}
