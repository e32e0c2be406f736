//! A file-backed [`Repository`] for the CLI binary.
//!
//! The persistence engine proper is out of scope for this workspace —
//! campaigns, contacts, and the DNC list come from a JSON snapshot on
//! disk, IVR flows come one-file-per-flow from a directory, and
//! completed-call records are appended as JSON lines rather than written
//! to a database. Good enough to drive `run`/`dial` against a real PBX;
//! not a substitute for the CRM backing a production deployment.

use async_trait::async_trait;
use chrono::NaiveTime;
use dialer_call_engine::error::{EngineError, Result};
use dialer_call_engine::ivr::{IvrFlow, RawFlow};
use dialer_call_engine::model::{
    AmdAction, Campaign, CampaignContact, CampaignStatus, ContactStatus, DialingMode,
};
use dialer_call_engine::repository::{
    CallLogRecord, Repository, SipSettings, SurveyResponseRecord,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Deserialize)]
struct CampaignFile {
    id: String,
    org_id: String,
    ivr_flow_id: String,
    #[serde(default)]
    greeting_audio_id: Option<String>,
    #[serde(default)]
    voicemail_audio_id: Option<String>,
    #[serde(default)]
    predictive: bool,
    max_concurrent_calls: u32,
    #[serde(default)]
    calls_per_minute: Option<u32>,
    #[serde(default)]
    max_retries: u32,
    #[serde(default)]
    retry_delay_minutes: i64,
    #[serde(default)]
    retry_on_no_answer: bool,
    #[serde(default)]
    retry_on_busy: bool,
    #[serde(default)]
    retry_on_failed: bool,
    #[serde(default = "default_ring_timeout")]
    ring_timeout_seconds: u64,
    #[serde(default = "default_true")]
    amd_enabled: bool,
    #[serde(default)]
    amd_action_on_human: AmdActionFile,
    #[serde(default = "hangup_action")]
    amd_action_on_machine: AmdActionFile,
    #[serde(default = "default_hours_start")]
    calling_hours_start: String,
    #[serde(default = "default_hours_end")]
    calling_hours_end: String,
    #[serde(default)]
    respect_timezone: bool,
    #[serde(default)]
    timezone: Option<String>,
    running: bool,
}

fn default_ring_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_hours_start() -> String {
    "09:00:00".to_string()
}
fn default_hours_end() -> String {
    "21:00:00".to_string()
}

#[derive(Debug, Default, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum AmdActionFile {
    #[default]
    ContinueFlow,
    Hangup,
    LeaveVoicemail,
}

fn hangup_action() -> AmdActionFile {
    AmdActionFile::Hangup
}

impl From<AmdActionFile> for AmdAction {
    fn from(a: AmdActionFile) -> Self {
        match a {
            AmdActionFile::ContinueFlow => AmdAction::ContinueFlow,
            AmdActionFile::Hangup => AmdAction::Hangup,
            AmdActionFile::LeaveVoicemail => AmdAction::LeaveVoicemail,
        }
    }
}

fn parse_time(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M:%S").unwrap_or_else(|_| NaiveTime::from_hms_opt(0, 0, 0).unwrap())
}

impl From<CampaignFile> for Campaign {
    fn from(f: CampaignFile) -> Self {
        Campaign {
            id: f.id,
            org_id: f.org_id,
            ivr_flow_id: f.ivr_flow_id,
            greeting_audio_id: f.greeting_audio_id,
            voicemail_audio_id: f.voicemail_audio_id,
            dialing_mode: if f.predictive {
                DialingMode::Predictive
            } else {
                DialingMode::Progressive
            },
            max_concurrent_calls: f.max_concurrent_calls,
            calls_per_minute: f.calls_per_minute,
            max_retries: f.max_retries,
            retry_delay_minutes: f.retry_delay_minutes,
            retry_on_no_answer: f.retry_on_no_answer,
            retry_on_busy: f.retry_on_busy,
            retry_on_failed: f.retry_on_failed,
            ring_timeout_seconds: f.ring_timeout_seconds,
            amd_enabled: f.amd_enabled,
            amd_action_on_human: f.amd_action_on_human.into(),
            amd_action_on_machine: f.amd_action_on_machine.into(),
            calling_hours_start: parse_time(&f.calling_hours_start),
            calling_hours_end: parse_time(&f.calling_hours_end),
            respect_timezone: f.respect_timezone,
            timezone: f.timezone.and_then(|tz| tz.parse().ok()),
            scheduled_start: None,
            scheduled_end: None,
            status: if f.running {
                CampaignStatus::Running
            } else {
                CampaignStatus::Paused
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContactFile {
    campaign_id: String,
    contact_id: String,
    phone: String,
    #[serde(default)]
    caller_id: String,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Default, Deserialize)]
struct StateFile {
    #[serde(default)]
    campaigns: Vec<CampaignFile>,
    #[serde(default)]
    contacts: Vec<ContactFile>,
    #[serde(default)]
    dnc: Vec<String>,
}

struct State {
    campaigns: Vec<Campaign>,
    contacts: Vec<CampaignContact>,
    dnc: HashSet<String>,
}

/// JSON-file-backed [`Repository`] for running the engine without a real
/// database. `state_path` holds campaigns/contacts/DNC; `flows_dir` holds
/// one `<flow_id>.json` per IVR flow; finished calls are appended to
/// `call_log_path` as JSON lines.
pub struct FileRepository {
    flows_dir: PathBuf,
    call_log_path: PathBuf,
    state: Mutex<State>,
}

impl FileRepository {
    pub async fn open(
        state_path: impl AsRef<Path>,
        flows_dir: impl Into<PathBuf>,
        call_log_path: impl Into<PathBuf>,
    ) -> Result<Arc<Self>> {
        let state_path = state_path.as_ref();
        let raw = if state_path.exists() {
            std::fs::read_to_string(state_path).map_err(|e| {
                EngineError::Persistence(format!("reading {}: {e}", state_path.display()))
            })?
        } else {
            String::new()
        };
        let parsed: StateFile = if raw.trim().is_empty() {
            StateFile::default()
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| EngineError::Persistence(format!("parsing state file: {e}")))?
        };

        let campaigns = parsed.campaigns.into_iter().map(Campaign::from).collect();
        let contacts = parsed
            .contacts
            .into_iter()
            .map(|c| CampaignContact {
                campaign_id: c.campaign_id,
                contact_id: c.contact_id,
                phone: c.phone,
                caller_id: c.caller_id,
                status: ContactStatus::Pending,
                attempts: 0,
                last_attempt_at: None,
                next_attempt_at: None,
                last_disposition: None,
                priority: c.priority,
            })
            .collect();
        let dnc = parsed.dnc.into_iter().collect();

        Ok(Arc::new(Self {
            flows_dir: flows_dir.into(),
            call_log_path: call_log_path.into(),
            state: Mutex::new(State {
                campaigns,
                contacts,
                dnc,
            }),
        }))
    }
}

/// Pagination page size for [`Repository::iter_eligible_contacts`]'s
/// cursor-by-contact-id protocol.
const PAGE_SIZE: usize = 200;

#[async_trait]
impl Repository for FileRepository {
    async fn load_running_campaigns(&self) -> Result<Vec<Campaign>> {
        let state = self.state.lock().await;
        Ok(state
            .campaigns
            .iter()
            .filter(|c| c.status == CampaignStatus::Running)
            .cloned()
            .collect())
    }

    async fn load_campaign_ivr(&self, campaign_id: &str) -> Result<IvrFlow> {
        let state = self.state.lock().await;
        let flow_id = state
            .campaigns
            .iter()
            .find(|c| c.id == campaign_id)
            .map(|c| c.ivr_flow_id.clone())
            .unwrap_or_else(|| campaign_id.to_string());
        drop(state);

        let path = self.flows_dir.join(format!("{flow_id}.json"));
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Persistence(format!("reading {}: {e}", path.display())))?;
        let flow: RawFlow = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Persistence(format!("parsing {}: {e}", path.display())))?;
        Ok(IvrFlow::from_raw(flow))
    }

    async fn iter_eligible_contacts(
        &self,
        campaign_id: &str,
        cursor: Option<String>,
    ) -> Result<Vec<CampaignContact>> {
        let state = self.state.lock().await;
        let mut matching: Vec<&CampaignContact> = state
            .contacts
            .iter()
            .filter(|c| c.campaign_id == campaign_id)
            .collect();
        matching.sort_by(|a, b| a.contact_id.cmp(&b.contact_id));
        let start = match cursor {
            Some(after) => matching
                .iter()
                .position(|c| c.contact_id == after)
                .map(|i| i + 1)
                .unwrap_or(matching.len()),
            None => 0,
        };
        Ok(matching
            .into_iter()
            .skip(start)
            .take(PAGE_SIZE)
            .cloned()
            .collect())
    }

    async fn save_call_log(&self, record: CallLogRecord) -> Result<()> {
        info!(
            call_id = %record.call_id,
            result = record.result.as_str(),
            amd_result = %record.amd_result,
            "call ended"
        );
        let line = serde_json::json!({
            "call_id": record.call_id,
            "campaign_id": record.campaign_id,
            "contact_id": record.contact_id,
            "caller_id": record.caller_id,
            "destination": record.destination,
            "start_at": record.start_at,
            "answer_at": record.answer_at,
            "end_at": record.end_at,
            "result": record.result.as_str(),
            "hangup_cause": record.hangup_cause,
            "amd_result": record.amd_result,
            "dtmf_inputs": record.dtmf_inputs.iter().collect::<String>(),
            "recording_path": record.recording_path,
        })
        .to_string();
        append_line(&self.call_log_path, &line)
    }

    async fn save_survey_response(&self, record: SurveyResponseRecord) -> Result<()> {
        let line = serde_json::json!({
            "call_log_id": record.call_log_id,
            "campaign_id": record.campaign_id,
            "contact_id": record.contact_id,
            "flow_id": record.flow_id,
            "flow_version": record.flow_version,
            "responses": record.responses,
            "completed_normally": record.completed_normally,
            "duration_seconds": record.duration_seconds,
        })
        .to_string();
        append_line(&self.call_log_path, &line)
    }

    async fn upsert_dnc(&self, phone: &str, _org_id: Option<&str>, reason: &str) -> Result<()> {
        info!(phone, reason, "added to do-not-call list");
        self.state.lock().await.dnc.insert(phone.to_string());
        Ok(())
    }

    async fn is_dnc(&self, phone: &str, _org_id: Option<&str>) -> Result<bool> {
        Ok(self.state.lock().await.dnc.contains(phone))
    }

    async fn update_campaign_contact(&self, contact: CampaignContact) -> Result<()> {
        let mut state = self.state.lock().await;
        match state
            .contacts
            .iter_mut()
            .find(|c| c.contact_id == contact.contact_id)
        {
            Some(existing) => *existing = contact,
            None => state.contacts.push(contact),
        }
        Ok(())
    }

    async fn load_sip_settings(&self, org_id: &str) -> Result<SipSettings> {
        Err(EngineError::Persistence(format!(
            "no per-org SIP settings store configured (org {org_id}); sip.* in the engine config is authoritative"
        )))
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| EngineError::Persistence(format!("opening {}: {e}", path.display())))?;
    writeln!(file, "{line}")
        .map_err(|e| EngineError::Persistence(format!("writing {}: {e}", path.display())))
}
