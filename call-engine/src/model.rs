//! Shared data model (spec §3): campaigns, their contacts, and the
//! in-memory `CallInfo` a SIP dialog owns for the life of a call.
//!
//! `CallInfo::state` reuses [`dialer_dialog_core::DialogState`] rather
//! than re-declaring the same six variants — the call engine's idea of
//! "is this call ringing yet" is exactly the dialog's.

use chrono::{DateTime, NaiveTime, Utc};
use dialer_dialog_core::DialogState;
use dialer_media_core::AmdResult;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialingMode {
    Progressive,
    Predictive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Dnc,
    Skipped,
}

/// What the IVR/call-handling layer does once AMD has made a decision.
/// The original hard-codes "hang up and mark voicemail" for machine and
/// "continue into the flow" for human; this is that choice made
/// per-campaign and explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmdAction {
    ContinueFlow,
    Hangup,
    LeaveVoicemail,
}

/// Final outcome recorded against a call, matching the original's
/// `CallDisposition` enum (`app/models/campaign.py`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDisposition {
    AnsweredHuman,
    AnsweredMachine,
    NoAnswer,
    Busy,
    Failed,
    InvalidNumber,
    Dnc,
}

impl CallDisposition {
    pub fn as_str(self) -> &'static str {
        match self {
            CallDisposition::AnsweredHuman => "answered_human",
            CallDisposition::AnsweredMachine => "answered_machine",
            CallDisposition::NoAnswer => "no_answer",
            CallDisposition::Busy => "busy",
            CallDisposition::Failed => "failed",
            CallDisposition::InvalidNumber => "invalid_number",
            CallDisposition::Dnc => "dnc",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: String,
    pub org_id: String,
    pub ivr_flow_id: String,
    pub greeting_audio_id: Option<String>,
    pub voicemail_audio_id: Option<String>,
    pub dialing_mode: DialingMode,
    pub max_concurrent_calls: u32,
    pub calls_per_minute: Option<u32>,
    pub max_retries: u32,
    pub retry_delay_minutes: i64,
    pub retry_on_no_answer: bool,
    pub retry_on_busy: bool,
    pub retry_on_failed: bool,
    pub ring_timeout_seconds: u64,
    pub amd_enabled: bool,
    pub amd_action_on_human: AmdAction,
    pub amd_action_on_machine: AmdAction,
    pub calling_hours_start: NaiveTime,
    pub calling_hours_end: NaiveTime,
    pub respect_timezone: bool,
    pub timezone: Option<chrono_tz::Tz>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
}

impl Campaign {
    /// Whether `retry_on_*` permits another attempt after this
    /// disposition (spec §9 retry laws, §4.10).
    pub fn retries_on(&self, disposition: CallDisposition) -> bool {
        match disposition {
            CallDisposition::NoAnswer => self.retry_on_no_answer,
            CallDisposition::Busy => self.retry_on_busy,
            CallDisposition::Failed => self.retry_on_failed,
            CallDisposition::AnsweredHuman
            | CallDisposition::AnsweredMachine
            | CallDisposition::InvalidNumber
            | CallDisposition::Dnc => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CampaignContact {
    pub campaign_id: String,
    pub contact_id: String,
    pub phone: String,
    pub caller_id: String,
    pub status: ContactStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_disposition: Option<CallDisposition>,
    pub priority: i32,
}

#[derive(Debug, Clone)]
pub struct DncEntry {
    pub phone: String,
    pub organization_id: Option<String>,
    pub reason: Option<String>,
}

/// Per-active-call state, owned by the SIP dialog task for the life of
/// the dialog (spec §3 `CallInfo`).
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: String,
    pub from_tag: String,
    pub to_tag: Option<String>,
    pub state: DialogState,
    pub destination: String,
    pub caller_id: String,
    pub campaign_id: String,
    pub campaign_contact_id: String,
    pub contact_id: String,
    pub local_sdp: String,
    pub remote_sdp: Option<String>,
    pub remote_rtp: Option<(String, u16)>,
    pub amd_result: AmdResult,
    pub start_at: DateTime<Utc>,
    pub answer_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub dtmf_inputs: Vec<char>,
    pub variables: HashMap<String, String>,
}

impl CallInfo {
    pub fn new(
        call_id: String,
        from_tag: String,
        destination: String,
        caller_id: String,
        campaign_id: String,
        campaign_contact_id: String,
        contact_id: String,
    ) -> Self {
        Self {
            call_id,
            from_tag,
            to_tag: None,
            state: DialogState::Idle,
            destination,
            caller_id,
            campaign_id,
            campaign_contact_id,
            contact_id,
            local_sdp: String::new(),
            remote_sdp: None,
            remote_rtp: None,
            amd_result: AmdResult::Unknown,
            start_at: Utc::now(),
            answer_at: None,
            end_at: None,
            dtmf_inputs: Vec::new(),
            variables: HashMap::new(),
        }
    }
}
