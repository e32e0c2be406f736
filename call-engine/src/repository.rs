//! The narrow persistence interface the core consumes (C12, spec §4.12).
//!
//! Everything durable — campaigns, contacts, IVR flows, call logs, DNC —
//! lives behind this trait. The scheduler and the end-of-call
//! persistence worker are the only callers; the SIP/RTP hot path never
//! touches it (spec §5 shared-resource policy).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::{SipTransportKind, SrtpMode};
use crate::error::Result;
use crate::ivr::IvrFlow;
use crate::model::{Campaign, CampaignContact, CallDisposition};

#[derive(Debug, Clone)]
pub struct SipSettings {
    pub server: String,
    pub port: u16,
    pub extension: String,
    pub secret: String,
    pub transport: SipTransportKind,
    pub srtp_mode: SrtpMode,
    pub rtp_port_start: u16,
    pub rtp_port_end: u16,
    pub codec_priority: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CallLogRecord {
    pub call_id: String,
    pub campaign_id: String,
    pub contact_id: String,
    pub caller_id: String,
    pub destination: String,
    pub start_at: DateTime<Utc>,
    pub answer_at: Option<DateTime<Utc>>,
    pub end_at: DateTime<Utc>,
    pub result: CallDisposition,
    pub hangup_cause: Option<String>,
    pub amd_result: String,
    pub dtmf_inputs: Vec<char>,
    pub recording_path: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SurveyResponseRecord {
    pub call_log_id: String,
    pub campaign_id: String,
    pub contact_id: String,
    pub flow_id: String,
    pub flow_version: u32,
    pub responses: HashMap<String, String>,
    pub completed_normally: bool,
    pub duration_seconds: f64,
}

/// Narrow repository contract (spec §4.12). Every method may be an
/// async round trip to a database; implementations are expected to run
/// on a bounded worker pool so a slow store never stalls the dispatch
/// loop (spec §5).
#[async_trait]
pub trait Repository: Send + Sync {
    async fn load_running_campaigns(&self) -> Result<Vec<Campaign>>;
    async fn load_campaign_ivr(&self, campaign_id: &str) -> Result<IvrFlow>;

    /// One page of contacts eligible for population, starting after
    /// `cursor`. Callers loop until an empty page comes back — this
    /// stands in for the original's row-by-row generator without
    /// requiring an async-stream dependency the rest of the stack
    /// doesn't otherwise need.
    async fn iter_eligible_contacts(
        &self,
        campaign_id: &str,
        cursor: Option<String>,
    ) -> Result<Vec<CampaignContact>>;

    async fn save_call_log(&self, record: CallLogRecord) -> Result<()>;
    async fn save_survey_response(&self, record: SurveyResponseRecord) -> Result<()>;
    async fn upsert_dnc(&self, phone: &str, org_id: Option<&str>, reason: &str) -> Result<()>;
    async fn is_dnc(&self, phone: &str, org_id: Option<&str>) -> Result<bool>;
    async fn update_campaign_contact(&self, contact: CampaignContact) -> Result<()>;
    async fn load_sip_settings(&self, org_id: &str) -> Result<SipSettings>;
}
