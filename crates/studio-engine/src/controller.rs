use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Map, Value};
use studio_contracts::events::{now_utc_iso, EventPayload, EventWriter};
use studio_contracts::models::QualityTier;
use studio_contracts::records::ImageRecord;
use studio_contracts::runs::summary::{write_summary, SessionSummary};

use crate::access::{HostEnvironment, TierGatekeeper, TierToggle};
use crate::client::GenerationClient;
use crate::config::DEFAULT_DOWNLOAD_STAGGER;
use crate::download::{schedule_downloads, DownloadBatch};
use crate::error::StudioError;

pub const BATCH_FAILURE_MESSAGE: &str = "An error occurred while processing.";
pub const TIER_AUTH_FAILURE_MESSAGE: &str =
    "API key error. Please re-select your high-quality tier API key.";
pub const REFINE_FAILURE_MESSAGE: &str = "Failed to apply refinement.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowMode {
    #[default]
    BatchGenerate,
    Refine,
}

/// Session state. Mutated only through [`WorkflowController`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkflowState {
    pub subjects: Vec<ImageRecord>,
    pub reference: Option<ImageRecord>,
    /// Newest first.
    pub history: Vec<ImageRecord>,
    pub selected_id: Option<String>,
    pub busy: bool,
    pub last_error: Option<String>,
    pub mode: WorkflowMode,
    pub last_prompt: String,
    pub prompt_draft: String,
}

impl WorkflowState {
    pub fn active_record(&self) -> Option<&ImageRecord> {
        let selected = self.selected_id.as_deref()?;
        self.history.iter().find(|record| record.id == selected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Busy,
    MissingSubjects,
    MissingReference,
    NoActiveRecord,
    EmptyPrompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Preconditions did not hold; state is untouched.
    Skipped(SkipReason),
    /// Ids of the new history entries, newest first.
    Completed { produced: Vec<String> },
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerPolicy {
    /// Also revoke high-tier access when a refinement hits an authorization
    /// failure. Off by default: only the batch path revokes.
    pub revoke_tier_on_refine_auth_failure: bool,
    pub download_stagger: Duration,
}

impl Default for ControllerPolicy {
    fn default() -> Self {
        Self {
            revoke_tier_on_refine_auth_failure: false,
            download_stagger: DEFAULT_DOWNLOAD_STAGGER,
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    state: WorkflowState,
    gate: TierGatekeeper,
    progress: BatchProgress,
    total_batches: u64,
    total_refinements: u64,
}

/// Owns the session state and runs batch generation and refinement against
/// the generation client.
///
/// Every operation takes `&self`; the busy flag is checked and set under the
/// state lock before any remote call, and the lock is not held while a call
/// is in flight.
pub struct WorkflowController {
    client: GenerationClient,
    events: EventWriter,
    policy: ControllerPolicy,
    session: Mutex<Session>,
    started_at: String,
}

impl WorkflowController {
    pub fn new(
        client: GenerationClient,
        events: EventWriter,
        host: &dyn HostEnvironment,
        policy: ControllerPolicy,
    ) -> Self {
        let gate = TierGatekeeper::probe(host);
        let controller = Self {
            client,
            events,
            policy,
            session: Mutex::new(Session {
                gate,
                ..Session::default()
            }),
            started_at: now_utc_iso(),
        };
        controller.emit(
            "session_started",
            json!({
                "transport": controller.client.transport_name(),
                "high_tier_access": gate.has_high_tier_access(),
            }),
        );
        controller
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.session().state.clone()
    }

    pub fn progress(&self) -> BatchProgress {
        self.session().progress
    }

    pub fn gate(&self) -> TierGatekeeper {
        self.session().gate
    }

    pub fn tier(&self) -> QualityTier {
        self.session().gate.tier()
    }

    pub fn is_busy(&self) -> bool {
        self.session().state.busy
    }

    pub fn add_subjects(&self, records: Vec<ImageRecord>) {
        let count = records.len();
        self.session().state.subjects.extend(records);
        self.emit("subjects_added", json!({ "count": count }));
    }

    pub fn remove_subject(&self, id: &str) -> bool {
        let removed = {
            let mut session = self.session();
            let before = session.state.subjects.len();
            session.state.subjects.retain(|record| record.id != id);
            session.state.subjects.len() != before
        };
        if removed {
            self.emit("subject_removed", json!({ "id": id }));
        }
        removed
    }

    pub fn set_reference(&self, record: Option<ImageRecord>) {
        let name = record.as_ref().map(|record| record.name.clone());
        self.session().state.reference = record;
        match name {
            Some(name) => self.emit("reference_set", json!({ "name": name })),
            None => self.emit("reference_cleared", json!({})),
        }
    }

    pub fn clear_reference(&self) {
        self.set_reference(None);
    }

    pub fn set_prompt_draft(&self, prompt: impl Into<String>) {
        self.session().state.prompt_draft = prompt.into();
    }

    pub fn select_result(&self, id: &str) -> bool {
        let selected = {
            let mut session = self.session();
            if session.state.history.iter().any(|record| record.id == id) {
                session.state.selected_id = Some(id.to_string());
                true
            } else {
                false
            }
        };
        if selected {
            self.emit("result_selected", json!({ "id": id }));
        }
        selected
    }

    /// Removes a history entry. A removed selection moves to the new first
    /// entry, or clears when history is empty.
    pub fn remove_result(&self, id: &str) -> bool {
        let removed = {
            let mut session = self.session();
            let state = &mut session.state;
            let before = state.history.len();
            state.history.retain(|record| record.id != id);
            if state.history.len() == before {
                false
            } else {
                if state.selected_id.as_deref() == Some(id) {
                    state.selected_id = state.history.first().map(|record| record.id.clone());
                }
                true
            }
        };
        if removed {
            self.emit("result_removed", json!({ "id": id }));
        }
        removed
    }

    /// Puts an existing image at the front of history and selects it, so it
    /// can be refined without a batch run.
    pub fn adopt_result(&self, record: ImageRecord) -> String {
        let id = record.id.clone();
        let name = record.name.clone();
        {
            let mut session = self.session();
            session.state.history.insert(0, record);
            session.state.selected_id = Some(id.clone());
        }
        self.emit("result_selected", json!({ "id": id, "name": name }));
        id
    }

    pub fn select_standard_tier(&self) {
        self.session().gate.select_standard();
        self.emit("tier_selected", json!({ "tier": QualityTier::Standard }));
    }

    /// The host flow may block on user input, so it runs without the state
    /// lock held.
    pub fn select_high_tier(&self, host: &dyn HostEnvironment) -> Result<TierToggle, StudioError> {
        if self.session().gate.try_select_high() {
            self.emit("tier_selected", json!({ "tier": QualityTier::High }));
            return Ok(TierToggle::Selected);
        }
        if !host.supports_credential_selection() {
            return Ok(TierToggle::Unavailable);
        }
        host.request_credential_selection()?;
        self.session().gate.grant_access();
        self.emit("tier_access_granted", json!({}));
        self.emit("tier_selected", json!({ "tier": QualityTier::High }));
        Ok(TierToggle::Authorized)
    }

    /// Composites every subject into the reference, one call at a time.
    /// Either every result lands in history or none does.
    pub fn run_batch_generate(&self) -> RunOutcome {
        let (subjects, reference, tier) = {
            let mut session = self.session();
            if session.state.busy {
                return RunOutcome::Skipped(SkipReason::Busy);
            }
            if session.state.subjects.is_empty() {
                return RunOutcome::Skipped(SkipReason::MissingSubjects);
            }
            let Some(reference) = session.state.reference.clone() else {
                return RunOutcome::Skipped(SkipReason::MissingReference);
            };
            session.state.busy = true;
            session.state.mode = WorkflowMode::BatchGenerate;
            session.state.last_error = None;
            session.progress = BatchProgress {
                current: 0,
                total: session.state.subjects.len(),
            };
            session.total_batches += 1;
            (session.state.subjects.clone(), reference, session.gate.tier())
        };
        let total = subjects.len();
        self.emit(
            "batch_started",
            json!({ "subjects": total, "reference": reference.name, "tier": tier }),
        );

        let mut produced = Vec::with_capacity(total);
        for (idx, subject) in subjects.iter().enumerate() {
            self.session().progress.current = idx + 1;
            self.emit(
                "batch_progress",
                json!({ "current": idx + 1, "total": total, "subject": subject.name }),
            );

            match self.client.composite(&subject.payload, &reference.payload, tier) {
                Ok(data_url) => {
                    produced.push(ImageRecord::from_data_url(
                        data_url,
                        batch_result_name(&subject.name),
                    ));
                }
                Err(err) => return self.fail_batch(&err, idx),
            }
        }

        produced.reverse();
        let ids: Vec<String> = produced.iter().map(|record| record.id.clone()).collect();
        {
            let mut session = self.session();
            let state = &mut session.state;
            produced.append(&mut state.history);
            state.history = produced;
            state.selected_id = ids.first().cloned();
            state.busy = false;
        }
        self.emit("batch_completed", json!({ "produced": ids }));
        RunOutcome::Completed { produced: ids }
    }

    fn fail_batch(&self, err: &StudioError, failed_index: usize) -> RunOutcome {
        let authorization = err.is_authorization_failure();
        let message = if authorization {
            TIER_AUTH_FAILURE_MESSAGE
        } else {
            BATCH_FAILURE_MESSAGE
        };
        {
            let mut session = self.session();
            if authorization {
                session.gate.revoke_access();
            }
            session.state.last_error = Some(message.to_string());
            session.state.busy = false;
        }
        if authorization {
            self.emit("tier_access_revoked", json!({}));
        }
        self.emit(
            "batch_failed",
            json!({
                "failed_index": failed_index,
                "error": err.to_string(),
                "message": message,
            }),
        );
        RunOutcome::Failed {
            message: message.to_string(),
        }
    }

    /// Applies `prompt` to the selected result and puts the edit at the
    /// front of history.
    pub fn run_refine(&self, prompt: &str) -> RunOutcome {
        let prompt = prompt.trim();
        let (active, tier) = {
            let mut session = self.session();
            if session.state.busy {
                return RunOutcome::Skipped(SkipReason::Busy);
            }
            let Some(active) = session.state.active_record().cloned() else {
                return RunOutcome::Skipped(SkipReason::NoActiveRecord);
            };
            if prompt.is_empty() {
                return RunOutcome::Skipped(SkipReason::EmptyPrompt);
            }
            session.state.busy = true;
            session.state.mode = WorkflowMode::Refine;
            session.state.last_error = None;
            session.total_refinements += 1;
            (active, session.gate.tier())
        };
        self.emit(
            "refine_started",
            json!({ "source_id": active.id, "prompt": prompt, "tier": tier }),
        );

        match self.client.refine(&active.payload, prompt, tier) {
            Ok(data_url) => {
                let record = ImageRecord::from_data_url(data_url, refine_result_name());
                let id = record.id.clone();
                {
                    let mut session = self.session();
                    let state = &mut session.state;
                    state.history.insert(0, record);
                    state.selected_id = Some(id.clone());
                    state.last_prompt = prompt.to_string();
                    state.prompt_draft.clear();
                    state.busy = false;
                }
                self.emit(
                    "refine_completed",
                    json!({ "id": id, "source_id": active.id }),
                );
                RunOutcome::Completed { produced: vec![id] }
            }
            Err(err) => {
                let revoke =
                    self.policy.revoke_tier_on_refine_auth_failure && err.is_authorization_failure();
                {
                    let mut session = self.session();
                    if revoke {
                        session.gate.revoke_access();
                    }
                    session.state.last_error = Some(REFINE_FAILURE_MESSAGE.to_string());
                    session.state.busy = false;
                }
                if revoke {
                    self.emit("tier_access_revoked", json!({}));
                }
                self.emit(
                    "refine_failed",
                    json!({ "error": err.to_string(), "message": REFINE_FAILURE_MESSAGE }),
                );
                RunOutcome::Failed {
                    message: REFINE_FAILURE_MESSAGE.to_string(),
                }
            }
        }
    }

    /// Saves every history entry into `out_dir`, newest first, staggered by
    /// the policy delay.
    pub fn download_all(&self, out_dir: &Path) -> Result<DownloadBatch, StudioError> {
        let history = self.session().state.history.clone();
        let batch = schedule_downloads(&history, out_dir, self.policy.download_stagger)?;
        let targets: Vec<String> = batch
            .targets()
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect();
        self.emit(
            "download_scheduled",
            json!({
                "out_dir": out_dir.to_string_lossy(),
                "stagger_ms": self.policy.download_stagger.as_millis() as u64,
                "targets": targets,
            }),
        );
        Ok(batch)
    }

    /// Writes `summary.json` beside the event log.
    pub fn finish(&self) -> anyhow::Result<PathBuf> {
        let summary = {
            let session = self.session();
            SessionSummary {
                session_id: self.events.session_id().to_string(),
                started_at: self.started_at.clone(),
                finished_at: now_utc_iso(),
                total_batches: session.total_batches,
                total_refinements: session.total_refinements,
                total_results: session.state.history.len() as u64,
                selected_id: session.state.selected_id.clone(),
                results: session
                    .state
                    .history
                    .iter()
                    .map(|record| {
                        let mut row = Map::new();
                        row.insert("id".to_string(), Value::String(record.id.clone()));
                        row.insert("name".to_string(), Value::String(record.name.clone()));
                        row
                    })
                    .collect(),
            }
        };
        let path = self
            .events
            .path()
            .parent()
            .map(|dir| dir.join("summary.json"))
            .unwrap_or_else(|| PathBuf::from("summary.json"));
        let mut extra = Map::new();
        extra.insert("tier".to_string(), json!(self.tier()));
        write_summary(&path, &summary, Some(&extra))?;
        self.events.emit(
            "session_finished",
            map_object(json!({ "summary_path": path.to_string_lossy() })),
        )?;
        Ok(path)
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event_type: &str, payload: Value) {
        if let Err(err) = self.events.emit(event_type, map_object(payload)) {
            eprintln!("event write failed: {err:#}");
        }
    }
}

fn batch_result_name(subject_name: &str) -> String {
    let base = subject_name.trim();
    let base = if base.is_empty() { "towel" } else { base };
    format!("Pro-{base}-{}.png", chrono::Utc::now().timestamp_millis())
}

fn refine_result_name() -> String {
    format!("Refined-{}.png", chrono::Utc::now().timestamp_millis())
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
