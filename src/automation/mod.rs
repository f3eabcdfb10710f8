pub mod browser;
pub mod wait;
pub mod windows;

use serde_json::json;
use std::time::Duration;
use thirtyfour::prelude::*;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::AutomationError;
use crate::models::{
    ClassificationPlan, FormAction, FormTask, PlanDecision, ProcessedRows, ReassignTargets,
    RowFacts, RowState, RunSummary,
};
use browser::BrowserDriver;
use windows::{WebDriverWindows, WindowPort, WindowTracker};

// Selectors of the pending-requests listing and its accept flow.
const PENDING_ROWS: &str = "#solicitacoesPendentes .list-group-item.media";
const ROW_ID_INPUT: &str = "input.selecionado[id]";
const ROW_MENU_TOGGLE: &str = "a[data-toggle=\"dropdown\"]";
const ACCEPT_ANCHOR_PREFIX: &str = "a[id^=\"aceitar|\"]";
const ACCEPT_FORM: &str = "form[action*=\"aceitarSolicitacao\"]";
const MODAL_FORM: &str = ".modal.in form";
const CLASSIFICATION_SELECT: &str = "select[name^='preenchimentoPadrao_']";
const ACTIVE_PAGE: &str = ".pagination li.active";

// Selectors of the form-field editor listing.
const FORM_FIELD_ROWS: &str = ".list-group.lg-listview .list-group-item.media";
const ORDINAL_BADGE: &str = ".btn.bg-bluegray.btn-icon";
const EDIT_FIELD_BUTTON: &str = "button[id^=\"editarCampo\"]";
const EDIT_VALIDATION_BUTTON: &str = "button[value^=\"editarValidacao\"]";
const EDIT_DESCRIPTION_INPUT: &str = ".modal.in input[name=\"descricaoCampoFormulario\"]";
const VALIDATION_ANSWER_INPUT: &str = ".modal.in input[name=\"respostaParaValidar\"]";

const SUBMISSION_WINDOW_FEATURES: &str = "width=800,height=600,scrollbars=yes,resizable=yes";
const HIDDEN_WINDOW_FEATURES: &str = "width=1,height=1,left=9999,top=9999";

const HOST_LIBS_SCRIPT: &str =
    "return typeof $ !== 'undefined' && typeof $.fn.modal !== 'undefined';";

const DISMISS_MODAL_SCRIPT: &str = r#"
if (window.$ && $('.modal.in').length > 0) { $('.modal.in').modal('hide'); }
"#;

const SET_FORM_TARGET_SCRIPT: &str = "arguments[0].target = arguments[1];";

const SELECT_OPTION_SCRIPT: &str = r#"
arguments[0].value = arguments[1];
arguments[0].dispatchEvent(new Event('change', { bubbles: true }));
"#;

/// The page wires its own onclick handler onto the save button; it is
/// replaced with a pass-through so the click always submits.
const CLICK_SAVE_SCRIPT: &str = r#"
arguments[0].onclick = function () { return true; };
arguments[0].click();
"#;

const SET_INPUT_SCRIPT: &str = r#"
arguments[0].value = arguments[1];
arguments[0].dispatchEvent(new Event('input', { bubbles: true }));
arguments[0].dispatchEvent(new Event('change', { bubbles: true }));
"#;

const SUBMIT_FORM_SCRIPT: &str = "arguments[0].submit();";

/// Fixed waits between DOM mutations. The host page animates its menus and
/// modals and re-renders the listing after every submission, so each run
/// mode keeps the pacing it was tuned with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PauseProfile {
    pub menu_open: Duration,
    pub cascade: Duration,
    pub post_submit: Duration,
    pub stabilization: Duration,
    pub post_cleanup: Duration,
    pub page_load: Duration,
}

impl PauseProfile {
    pub fn classification() -> Self {
        Self {
            menu_open: Duration::from_millis(200),
            cascade: Duration::ZERO,
            post_submit: Duration::from_millis(2000),
            stabilization: Duration::from_millis(2500),
            post_cleanup: Duration::from_millis(2000),
            page_load: Duration::from_millis(4000),
        }
    }

    pub fn spreadsheet_plan() -> Self {
        Self {
            stabilization: Duration::from_millis(2000),
            ..Self::classification()
        }
    }

    pub fn bulk_reassign() -> Self {
        Self {
            menu_open: Duration::from_millis(200),
            cascade: Duration::from_millis(750),
            post_submit: Duration::from_millis(1500),
            stabilization: Duration::from_millis(1500),
            post_cleanup: Duration::from_millis(1500),
            page_load: Duration::from_millis(4000),
        }
    }

    pub fn form_fields() -> Self {
        Self {
            menu_open: Duration::ZERO,
            cascade: Duration::ZERO,
            post_submit: Duration::from_millis(1500),
            stabilization: Duration::from_millis(1500),
            post_cleanup: Duration::from_millis(1500),
            page_load: Duration::from_millis(4000),
        }
    }
}

/// What to do when processing a row fails partway through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the whole run. Leftover windows are still closed.
    AbortRun,
    /// Dismiss any open modal, mark the row processed and move on.
    SkipRow,
}

/// Everything that varies between the run modes: pacing, failure handling,
/// the open-window soft limit and whether the listing is paginated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunProfile {
    pub pauses: PauseProfile,
    pub failure_policy: FailurePolicy,
    pub max_open_windows: usize,
    pub paginate: bool,
    pub wait_timeout: Duration,
}

impl RunProfile {
    pub fn classification(wait_timeout: Duration, max_open_windows: usize) -> Self {
        Self {
            pauses: PauseProfile::classification(),
            failure_policy: FailurePolicy::AbortRun,
            max_open_windows,
            paginate: false,
            wait_timeout,
        }
    }

    pub fn spreadsheet_plan(wait_timeout: Duration, max_open_windows: usize) -> Self {
        Self {
            pauses: PauseProfile::spreadsheet_plan(),
            failure_policy: FailurePolicy::SkipRow,
            max_open_windows,
            paginate: true,
            wait_timeout,
        }
    }

    pub fn bulk_reassign(wait_timeout: Duration, max_open_windows: usize) -> Self {
        Self {
            pauses: PauseProfile::bulk_reassign(),
            failure_policy: FailurePolicy::SkipRow,
            max_open_windows,
            paginate: true,
            wait_timeout,
        }
    }

    pub fn form_fields(wait_timeout: Duration, max_open_windows: usize) -> Self {
        Self {
            pauses: PauseProfile::form_fields(),
            failure_policy: FailurePolicy::SkipRow,
            max_open_windows,
            paginate: false,
            wait_timeout,
        }
    }
}

/// Drives one automation run against the O.S. management page.
///
/// Submissions go to named background windows so the listing never
/// navigates away; the tracker keeps their count under the profile's soft
/// limit and honors the operator's close-windows button between rows.
pub struct AutomationEngine {
    browser: BrowserDriver,
    windows: WindowTracker<WebDriverWindows>,
    profile: RunProfile,
    processed: ProcessedRows,
}

impl AutomationEngine {
    pub async fn new(browser: BrowserDriver, profile: RunProfile) -> Result<Self, AutomationError> {
        let port = WebDriverWindows::new(browser.webdriver().clone()).await?;
        Ok(Self {
            browser,
            windows: WindowTracker::new(port, profile.max_open_windows),
            profile,
            processed: ProcessedRows::new(),
        })
    }

    pub async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        info!("Opening {url}");
        self.browser.navigate(url).await
    }

    /// Sanity checks on the host page, then the close-windows button.
    ///
    /// A page that already carries the button has a run attached to it;
    /// starting a second one there would double-process rows.
    pub async fn prepare_page(&self) -> Result<(), AutomationError> {
        let libs = self
            .browser
            .execute_script_and_get_value(HOST_LIBS_SCRIPT, vec![])
            .await?;
        if !libs.as_bool().unwrap_or(false) {
            return Err(AutomationError::configuration(
                "the page does not expose jQuery with Bootstrap modals; is this the O.S. management screen?",
            ));
        }
        if self.windows.port().button_present().await? {
            return Err(AutomationError::configuration(
                "a run is already attached to this page; reload it before starting another",
            ));
        }
        self.windows.port().inject_button().await?;
        info!("✅ Page ready, close-windows button installed");
        Ok(())
    }

    pub async fn close(self) -> Result<(), AutomationError> {
        self.browser.quit().await
    }

    // ---- run modes ------------------------------------------------------

    /// Accepts and classifies unclassified rows one at a time until none
    /// are left, always applying `classification`.
    pub async fn run_classification(
        &mut self,
        classification: &str,
    ) -> Result<RunSummary, AutomationError> {
        let mut summary = RunSummary::default();
        summary.pages = 1;

        loop {
            self.honor_close_request().await?;

            let rows = self.scan_rows().await?;
            let candidate = rows
                .into_iter()
                .find(|(_, facts)| !facts.is_classified() && !self.processed.contains(&facts.id));

            let (row, facts) = match candidate {
                Some(found) => found,
                None => {
                    info!("🎉 Work finished! No unclassified O.S. left.");
                    self.windows.close_all().await?;
                    break;
                }
            };

            info!("[PROCESSING] O.S. {} → \"{classification}\"", facts.id);
            match self.accept_and_classify(&row, &facts.id, classification).await {
                Ok(()) => {
                    self.processed.record(&facts.id);
                    debug!("O.S. {}: {}", facts.id, RowState::Recorded);
                    summary.recorded += 1;
                    info!("[SUCCESS] O.S. {} classified", facts.id);
                    sleep(self.profile.pauses.stabilization).await;
                    self.flush_windows_if_needed().await?;
                }
                Err(e) => {
                    summary.failed += 1;
                    if !self.handle_row_failure(&facts.id, e).await? {
                        break;
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Walks every page of the listing and applies the spreadsheet plan
    /// to each mapped row.
    pub async fn run_spreadsheet_plan(
        &mut self,
        plan: &ClassificationPlan,
    ) -> Result<RunSummary, AutomationError> {
        info!("Plan loaded with {} O.S. mappings", plan.len());
        let mut summary = RunSummary::default();
        let mut page = 1usize;

        'run: loop {
            info!("--- Checking page {page} ---");
            summary.pages = page;
            self.honor_close_request().await?;

            for (row, facts) in self.scan_rows().await? {
                if self.processed.contains(&facts.id) {
                    continue;
                }
                // Marked before acting so a mid-row failure is never retried
                // when the listing re-renders.
                self.processed.record(&facts.id);

                match plan.decide(&facts) {
                    PlanDecision::NotMapped => {
                        debug!("O.S. {} is not in the spreadsheet; leaving it alone", facts.id);
                        summary.skipped += 1;
                    }
                    PlanDecision::NotAllowed(classification) => {
                        warn!(
                            "O.S. {}: \"{classification}\" is not an accepted classification; skipping",
                            facts.id
                        );
                        summary.skipped += 1;
                    }
                    PlanDecision::AlreadyCorrect(classification) => {
                        info!("O.S. {} already shows \"{classification}\"; skipping", facts.id);
                        summary.skipped += 1;
                    }
                    PlanDecision::Apply(classification) => {
                        info!("[ACTION NEEDED] O.S. {} → \"{classification}\"", facts.id);
                        match self
                            .accept_and_classify(&row, &facts.id, &classification)
                            .await
                        {
                            Ok(()) => {
                                debug!("O.S. {}: {}", facts.id, RowState::Recorded);
                                summary.recorded += 1;
                                sleep(self.profile.pauses.stabilization).await;
                                self.flush_windows_if_needed().await?;
                            }
                            Err(e) => {
                                summary.failed += 1;
                                if !self.handle_row_failure(&facts.id, e).await? {
                                    break 'run;
                                }
                            }
                        }
                    }
                }
                self.honor_close_request().await?;
            }

            if !(self.profile.paginate && self.advance_page().await?) {
                info!("🎉 Work finished! All {page} page(s) checked.");
                self.windows.close_all().await?;
                break;
            }
            page += 1;
        }
        Ok(summary)
    }

    /// Accepts every pending row, pointing it at the configured group,
    /// activity and object. Submissions go to hidden windows.
    pub async fn run_bulk_reassign(
        &mut self,
        targets: &ReassignTargets,
    ) -> Result<RunSummary, AutomationError> {
        info!(
            "Reassigning to group \"{}\", activity \"{}\", object \"{}\"",
            targets.group, targets.activity, targets.object
        );
        let mut summary = RunSummary::default();
        let mut page = 1usize;

        'run: loop {
            info!("--- Checking page {page} ---");
            summary.pages = page;
            self.honor_close_request().await?;

            for (row, facts) in self.scan_rows().await? {
                if self.processed.contains(&facts.id) {
                    continue;
                }

                info!("[PROCESSING] O.S. {}", facts.id);
                match self.reassign_row(&row, &facts.id, targets).await {
                    Ok(()) => {
                        self.processed.record(&facts.id);
                        debug!("O.S. {}: {}", facts.id, RowState::Recorded);
                        summary.recorded += 1;
                        sleep(self.profile.pauses.stabilization).await;
                        self.flush_windows_if_needed().await?;
                    }
                    Err(e) => {
                        summary.failed += 1;
                        if !self.handle_row_failure(&facts.id, e).await? {
                            break 'run;
                        }
                    }
                }
                self.honor_close_request().await?;
            }

            if !(self.profile.paginate && self.advance_page().await?) {
                info!("🎉 Work finished! All {page} page(s) checked.");
                self.windows.close_all().await?;
                break;
            }
            page += 1;
        }
        Ok(summary)
    }

    /// Edits form-field descriptions (and validation answers for QR-code
    /// fields) according to the spreadsheet task list.
    pub async fn run_form_tasks(
        &mut self,
        tasks: &[FormTask],
    ) -> Result<RunSummary, AutomationError> {
        info!("Applying {} form-field task(s)", tasks.len());
        let mut summary = RunSummary::default();
        summary.pages = 1;

        self.browser
            .wait_for_element(FORM_FIELD_ROWS, self.profile.wait_timeout)
            .await?;

        for task in tasks {
            self.honor_close_request().await?;

            let action = task.action();
            if action == FormAction::Ignore {
                debug!("field {} (\"{}\") needs no edit", task.ordinal, task.question);
                summary.skipped += 1;
                continue;
            }

            // Re-queried per task: every submission re-renders the listing
            // and stales the previous elements.
            let field = match self.find_field_by_ordinal(&task.ordinal).await? {
                Some(field) => field,
                None => {
                    warn!("no form field carries ordinal {}; skipping it", task.ordinal);
                    summary.skipped += 1;
                    continue;
                }
            };

            info!("[PROCESSING] field {} (\"{}\")", task.ordinal, task.question);
            let result = match action {
                FormAction::EditAndValidate => {
                    match self.edit_field_description(&field, task).await {
                        Ok(()) => match self.find_field_by_ordinal(&task.ordinal).await? {
                            Some(field) => self.edit_field_validation(&field, task).await,
                            None => Err(AutomationError::MissingControl(format!(
                                "field {} disappeared after the description edit",
                                task.ordinal
                            ))),
                        },
                        Err(e) => Err(e),
                    }
                }
                FormAction::EditOnly => self.edit_field_description(&field, task).await,
                FormAction::Ignore => unreachable!(),
            };

            match result {
                Ok(()) => {
                    summary.recorded += 1;
                    info!("[SUCCESS] field {} updated", task.ordinal);
                }
                Err(e) => {
                    summary.failed += 1;
                    if !self.handle_row_failure(&task.ordinal, e).await? {
                        break;
                    }
                }
            }
        }

        self.windows.close_all().await?;
        Ok(summary)
    }

    // ---- row processing -------------------------------------------------

    /// Snapshot of the pending rows currently rendered. Rows without the
    /// hidden id input are decoration and get dropped.
    async fn scan_rows(&self) -> Result<Vec<(WebElement, RowFacts)>, AutomationError> {
        let elements = self.browser.find_elements(By::Css(PENDING_ROWS)).await?;
        let mut rows = Vec::with_capacity(elements.len());
        for element in elements {
            let input = match element.find(By::Css(ROW_ID_INPUT)).await {
                Ok(input) => input,
                Err(_) => continue,
            };
            let id = input.attr("id").await?.unwrap_or_default();
            if id.is_empty() {
                continue;
            }
            let text = element.text().await.unwrap_or_default();
            debug!("O.S. {id}: {}", RowState::Found);
            rows.push((element, RowFacts { id, text }));
        }
        Ok(rows)
    }

    async fn open_accept_form(
        &self,
        row: &WebElement,
        id: &str,
    ) -> Result<WebElement, AutomationError> {
        let toggle = row.find(By::Css(ROW_MENU_TOGGLE)).await.map_err(|_| {
            AutomationError::MissingControl(format!("dropdown toggle of O.S. {id}"))
        })?;
        toggle.click().await?;
        sleep(self.profile.pauses.menu_open).await;
        debug!("O.S. {id}: {}", RowState::MenuOpened);

        let anchor_selector = format!("a[id=\"aceitar|{id}\"]");
        let anchor = self
            .browser
            .wait_for_element(&anchor_selector, self.profile.wait_timeout)
            .await?;
        anchor.click().await?;

        let form = self
            .browser
            .wait_for_element(ACCEPT_FORM, self.profile.wait_timeout)
            .await?;
        debug!("O.S. {id}: {}", RowState::FormOpened);
        Ok(form)
    }

    /// The whole accept-and-classify pipeline for one row: menu, accept
    /// form, classification dropdown, save into a background window.
    async fn accept_and_classify(
        &mut self,
        row: &WebElement,
        id: &str,
        classification: &str,
    ) -> Result<(), AutomationError> {
        let form = self.open_accept_form(row, id).await?;

        let window_name = format!("os_submission_{id}");
        self.windows
            .open(&window_name, SUBMISSION_WINDOW_FEATURES)
            .await?;
        self.retarget_form(&form, &window_name).await?;

        let select = self
            .browser
            .wait_for_element_within(&form, CLASSIFICATION_SELECT, self.profile.wait_timeout)
            .await?;
        self.choose_option(&select, CLASSIFICATION_SELECT, classification)
            .await?;
        debug!("O.S. {id}: {}", RowState::FieldsFilled);

        self.click_save(&form).await?;
        debug!("O.S. {id}: {}", RowState::Submitted);
        sleep(self.profile.pauses.post_submit).await;
        self.dismiss_modal().await?;
        Ok(())
    }

    /// Accepts one row and reassigns it through the three cascading
    /// dropdowns. Each selection triggers a reload of the next dropdown,
    /// hence the cascade pause between them.
    async fn reassign_row(
        &mut self,
        row: &WebElement,
        id: &str,
        targets: &ReassignTargets,
    ) -> Result<(), AutomationError> {
        let toggle = row.find(By::Css(ROW_MENU_TOGGLE)).await.map_err(|_| {
            AutomationError::MissingControl(format!("dropdown toggle of O.S. {id}"))
        })?;
        toggle.click().await?;
        sleep(self.profile.pauses.menu_open).await;
        debug!("O.S. {id}: {}", RowState::MenuOpened);

        let anchor = row.find(By::Css(ACCEPT_ANCHOR_PREFIX)).await.map_err(|_| {
            AutomationError::MissingControl(format!("accept action of O.S. {id}"))
        })?;
        anchor.click().await?;

        let form = self
            .browser
            .wait_for_element(MODAL_FORM, self.profile.wait_timeout)
            .await?;
        debug!("O.S. {id}: {}", RowState::FormOpened);

        for (name, value) in [
            ("idGrupo", &targets.group),
            ("idAtividade", &targets.activity),
            ("idObjeto", &targets.object),
        ] {
            let selector = format!(".modal.in select[name=\"{name}\"]");
            let select = self
                .browser
                .wait_for_element(&selector, self.profile.wait_timeout)
                .await?;
            self.choose_option(&select, &selector, value).await?;
            sleep(self.profile.pauses.cascade).await;
        }
        debug!("O.S. {id}: {}", RowState::FieldsFilled);

        let window_name = format!("submission_popup_{id}");
        self.windows
            .open(&window_name, HIDDEN_WINDOW_FEATURES)
            .await?;
        self.retarget_form(&form, &window_name).await?;
        self.browser
            .execute_script(SUBMIT_FORM_SCRIPT, vec![json!(form)])
            .await?;
        debug!("O.S. {id}: {}", RowState::Submitted);

        sleep(self.profile.pauses.post_submit).await;
        self.dismiss_modal().await?;
        Ok(())
    }

    /// Finds the form-field row whose ordinal badge shows `ordinal`. Badges
    /// of required fields carry a trailing asterisk that does not count.
    async fn find_field_by_ordinal(
        &self,
        ordinal: &str,
    ) -> Result<Option<WebElement>, AutomationError> {
        for field in self.browser.find_elements(By::Css(FORM_FIELD_ROWS)).await? {
            let badge = match field.find(By::Css(ORDINAL_BADGE)).await {
                Ok(badge) => badge,
                Err(_) => continue,
            };
            let label = badge.text().await.unwrap_or_default();
            if label.trim().replace('*', "") == ordinal {
                return Ok(Some(field));
            }
        }
        Ok(None)
    }

    async fn edit_field_description(
        &mut self,
        field: &WebElement,
        task: &FormTask,
    ) -> Result<(), AutomationError> {
        let toggle = field.find(By::Css(ROW_MENU_TOGGLE)).await.map_err(|_| {
            AutomationError::MissingControl(format!("dropdown toggle of field {}", task.ordinal))
        })?;
        toggle.click().await?;
        sleep(self.profile.pauses.menu_open).await;

        let edit = self
            .browser
            .wait_for_element_within(field, EDIT_FIELD_BUTTON, self.profile.wait_timeout)
            .await?;
        edit.click().await?;

        let input = self
            .browser
            .wait_for_element(EDIT_DESCRIPTION_INPUT, self.profile.wait_timeout)
            .await?;
        self.browser
            .execute_script(SET_INPUT_SCRIPT, vec![json!(input), json!(task.edit_text)])
            .await?;
        self.submit_modal_form(&input, "Cadastrar").await
    }

    async fn edit_field_validation(
        &mut self,
        field: &WebElement,
        task: &FormTask,
    ) -> Result<(), AutomationError> {
        let edit = field
            .find(By::Css(EDIT_VALIDATION_BUTTON))
            .await
            .map_err(|_| {
                AutomationError::MissingControl(format!(
                    "validation editor of field {}",
                    task.ordinal
                ))
            })?;
        edit.click().await?;

        let input = self
            .browser
            .wait_for_element(VALIDATION_ANSWER_INPUT, self.profile.wait_timeout)
            .await?;
        self.browser
            .execute_script(
                SET_INPUT_SCRIPT,
                vec![json!(input), json!(task.validation_text)],
            )
            .await?;
        self.submit_modal_form(&input, "Atualizar").await
    }

    /// Submits the modal that contains `input` into a fresh background
    /// window, clicking the submit button labelled `label`.
    async fn submit_modal_form(
        &mut self,
        input: &WebElement,
        label: &str,
    ) -> Result<(), AutomationError> {
        let form = input.find(By::XPath("./ancestor::form[1]")).await.ok();
        let modal = input
            .find(By::XPath(
                "./ancestor::div[contains(@class,'modal-content')][1]",
            ))
            .await
            .map_err(|_| AutomationError::MissingControl("modal around the edited input".into()))?;

        let window_name = format!("submission_popup_{}", chrono::Utc::now().timestamp_millis());
        self.windows
            .open(&window_name, SUBMISSION_WINDOW_FEATURES)
            .await?;
        if let Some(form) = &form {
            self.retarget_form(form, &window_name).await?;
        }

        let mut clicked = false;
        for button in modal.find_all(By::Css("button[type=\"submit\"]")).await? {
            let text = button.text().await.unwrap_or_default();
            if text.trim().eq_ignore_ascii_case(label) {
                self.browser
                    .execute_script(CLICK_SAVE_SCRIPT, vec![json!(button)])
                    .await?;
                clicked = true;
                break;
            }
        }
        if !clicked {
            return Err(AutomationError::MissingControl(format!(
                "\"{label}\" submit button in the modal"
            )));
        }

        sleep(self.profile.pauses.post_submit).await;
        self.dismiss_modal().await?;
        sleep(self.profile.pauses.stabilization).await;
        self.flush_windows_if_needed().await
    }

    // ---- shared plumbing ------------------------------------------------

    /// Picks the option whose label (or value) matches `wanted`,
    /// case-insensitively, and fires the change event the page listens for.
    async fn choose_option(
        &self,
        select: &WebElement,
        select_name: &str,
        wanted: &str,
    ) -> Result<(), AutomationError> {
        for option in select.find_all(By::Tag("option")).await? {
            let label = option.text().await.unwrap_or_default();
            let label = label.trim();
            if label.eq_ignore_ascii_case(wanted.trim()) {
                let value = option
                    .attr("value")
                    .await?
                    .filter(|value| !value.is_empty())
                    .unwrap_or_else(|| label.to_string());
                self.browser
                    .execute_script(SELECT_OPTION_SCRIPT, vec![json!(select), json!(value)])
                    .await?;
                return Ok(());
            }
        }
        Err(AutomationError::MissingOption {
            select: select_name.to_string(),
            wanted: wanted.to_string(),
        })
    }

    async fn click_save(&self, form: &WebElement) -> Result<(), AutomationError> {
        for button in form.find_all(By::Css("button")).await? {
            let text = button.text().await.unwrap_or_default();
            if text.trim().eq_ignore_ascii_case("Salvar") {
                self.browser
                    .execute_script(CLICK_SAVE_SCRIPT, vec![json!(button)])
                    .await?;
                return Ok(());
            }
        }
        Err(AutomationError::MissingControl(
            "\"Salvar\" button in the accept form".into(),
        ))
    }

    async fn retarget_form(
        &self,
        form: &WebElement,
        target: &str,
    ) -> Result<(), AutomationError> {
        self.browser
            .execute_script(SET_FORM_TARGET_SCRIPT, vec![json!(form), json!(target)])
            .await
    }

    async fn dismiss_modal(&self) -> Result<(), AutomationError> {
        self.browser
            .execute_script(DISMISS_MODAL_SCRIPT, vec![])
            .await
    }

    /// Operator clicked the injected button: close everything now, then
    /// give the page a moment before touching it again.
    async fn honor_close_request(&mut self) -> Result<(), AutomationError> {
        if self.windows.port().take_close_request().await? {
            info!("🖱️ Close-windows button clicked; closing tracked windows");
            self.windows.close_all().await?;
            sleep(self.profile.pauses.post_cleanup).await;
        }
        Ok(())
    }

    async fn flush_windows_if_needed(&mut self) -> Result<(), AutomationError> {
        if self.windows.should_flush().await? {
            info!(
                "🧹 {} windows open, cleaning up before continuing",
                self.profile.max_open_windows
            );
            self.windows.close_all().await?;
            sleep(self.profile.pauses.post_cleanup).await;
        }
        Ok(())
    }

    /// Applies the profile's failure policy. Returns false when the run
    /// must stop.
    async fn handle_row_failure(
        &mut self,
        id: &str,
        error: AutomationError,
    ) -> Result<bool, AutomationError> {
        match self.profile.failure_policy {
            FailurePolicy::AbortRun => {
                error!("❌ Error on O.S. {id}: {error}. Stopping the run.");
                self.windows.close_all().await?;
                Ok(false)
            }
            FailurePolicy::SkipRow => {
                error!("❌ Error on O.S. {id}: {error}. Skipping it.");
                self.dismiss_modal().await?;
                self.processed.record(id);
                Ok(true)
            }
        }
    }

    /// Clicks through to the next page of the listing, if there is one.
    async fn advance_page(&self) -> Result<bool, AutomationError> {
        let active = match self.browser.find_element(By::Css(ACTIVE_PAGE)).await {
            Ok(active) => active,
            Err(_) => return Ok(false),
        };
        let next = match active.find(By::XPath("./following-sibling::li[1]")).await {
            Ok(next) => next,
            Err(_) => return Ok(false),
        };
        let class = next.attr("class").await?.unwrap_or_default();
        if class.contains("disabled") {
            return Ok(false);
        }
        let link = match next.find(By::Css("a")).await {
            Ok(link) => link,
            Err(_) => return Ok(false),
        };
        link.click().await?;
        info!("➡️ Moving to the next page");
        sleep(self.profile.pauses.page_load).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_runs_abort_on_failure_and_never_paginate() {
        let profile = RunProfile::classification(Duration::from_secs(10), 5);
        assert_eq!(profile.failure_policy, FailurePolicy::AbortRun);
        assert!(!profile.paginate);
        assert_eq!(profile.pauses.stabilization, Duration::from_millis(2500));
    }

    #[test]
    fn spreadsheet_runs_skip_failed_rows_and_walk_pages() {
        let profile = RunProfile::spreadsheet_plan(Duration::from_secs(10), 5);
        assert_eq!(profile.failure_policy, FailurePolicy::SkipRow);
        assert!(profile.paginate);
        // Same pacing as the single-classification mode except stabilization.
        assert_eq!(profile.pauses.post_submit, Duration::from_millis(2000));
        assert_eq!(profile.pauses.stabilization, Duration::from_millis(2000));
    }

    #[test]
    fn reassign_runs_pause_between_cascading_dropdowns() {
        let profile = RunProfile::bulk_reassign(Duration::from_secs(10), 5);
        assert_eq!(profile.pauses.cascade, Duration::from_millis(750));
        assert_eq!(profile.pauses.post_submit, Duration::from_millis(1500));
        assert!(profile.paginate);
    }

    #[test]
    fn form_runs_open_menus_without_waiting() {
        let profile = RunProfile::form_fields(Duration::from_secs(10), 3);
        assert_eq!(profile.pauses.menu_open, Duration::ZERO);
        assert_eq!(profile.max_open_windows, 3);
        assert!(!profile.paginate);
    }
}
