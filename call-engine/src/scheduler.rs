//! Campaign Scheduler (component C10, spec §4.10).
//!
//! Owns `CampaignContact` row transitions: populating a newly-running
//! campaign's contacts against the DNC set, selecting due contacts
//! within calling hours and handing them to the call manager as
//! [`PendingContact`] records, deciding retries on call end, and
//! sweeping stale `in_progress` rows left behind by a crash.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::call_manager::{ConcurrentCallManager, PendingContact};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::ivr::IvrFlow;
use crate::model::{Campaign, CallDisposition, CampaignContact, ContactStatus};
use crate::repository::Repository;

/// Whether `now` (UTC) falls within `[start, end]` local time for the
/// campaign, honoring `respect_timezone` (spec §4.10 dispatch
/// condition). A same-day window is assumed; if `end < start` the
/// window is treated as wrapping past midnight.
pub fn within_calling_hours(campaign: &Campaign, now: DateTime<Utc>) -> bool {
    let local_time = if campaign.respect_timezone {
        let tz: Tz = campaign.timezone.unwrap_or(chrono_tz::UTC);
        now.with_timezone(&tz).time()
    } else {
        now.time()
    };
    let (start, end) = (campaign.calling_hours_start, campaign.calling_hours_end);
    if start <= end {
        local_time >= start && local_time <= end
    } else {
        local_time >= start || local_time <= end
    }
}

/// Decide the next `CampaignContact` state after a call ends (spec
/// §4.10 retry decision).
pub fn next_contact_state(
    campaign: &Campaign,
    contact: &CampaignContact,
    disposition: CallDisposition,
) -> (ContactStatus, Option<DateTime<Utc>>) {
    match disposition {
        CallDisposition::Dnc => (ContactStatus::Dnc, None),
        CallDisposition::AnsweredHuman | CallDisposition::AnsweredMachine => {
            (ContactStatus::Completed, None)
        }
        CallDisposition::InvalidNumber => (ContactStatus::Failed, None),
        CallDisposition::NoAnswer | CallDisposition::Busy | CallDisposition::Failed => {
            if contact.attempts < campaign.max_retries && campaign.retries_on(disposition) {
                let next_attempt =
                    Utc::now() + chrono::Duration::minutes(campaign.retry_delay_minutes);
                (ContactStatus::Pending, Some(next_attempt))
            } else {
                (ContactStatus::Failed, None)
            }
        }
    }
}

/// Drives C10's periodic work: contact population at campaign start,
/// due-contact dispatch into the call manager's queue, and stale-row
/// cleanup.
pub struct CampaignScheduler<R: Repository> {
    repository: Arc<R>,
    call_manager: Arc<ConcurrentCallManager>,
    config: SchedulerConfig,
}

impl<R: Repository> CampaignScheduler<R> {
    pub fn new(
        repository: Arc<R>,
        call_manager: Arc<ConcurrentCallManager>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            call_manager,
            config,
        }
    }

    /// Snapshot eligible contacts into `CampaignContact` rows on the
    /// `scheduled -> running` transition. DNC-matched contacts land
    /// directly in `dnc` rather than `pending` (spec §4.10).
    pub async fn populate_campaign(&self, campaign: &Campaign) -> Result<usize> {
        let mut cursor = None;
        let mut populated = 0;
        loop {
            let page = self
                .repository
                .iter_eligible_contacts(&campaign.id, cursor.clone())
                .await?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|c| c.contact_id.clone());
            for mut contact in page {
                let is_dnc = self
                    .repository
                    .is_dnc(&contact.phone, Some(&campaign.org_id))
                    .await?;
                contact.status = if is_dnc {
                    ContactStatus::Dnc
                } else {
                    ContactStatus::Pending
                };
                self.repository.update_campaign_contact(contact).await?;
                populated += 1;
            }
        }
        info!(campaign_id = %campaign.id, populated, "populated campaign contacts");
        Ok(populated)
    }

    /// One selection tick: for each running campaign, pull due
    /// `pending` rows within calling hours and hand them to the call
    /// manager (spec §4.10 "every second").
    pub async fn dispatch_tick(&self) -> Result<()> {
        let campaigns = self.repository.load_running_campaigns().await?;
        let now = Utc::now();
        for campaign in campaigns {
            if !within_calling_hours(&campaign, now) {
                continue;
            }
            let campaign = Arc::new(campaign);
            let flow: Arc<IvrFlow> = match self.repository.load_campaign_ivr(&campaign.id).await {
                Ok(flow) => Arc::new(flow),
                Err(e) => {
                    error!(campaign_id = %campaign.id, error = %e, "failed to load ivr flow, skipping");
                    continue;
                }
            };

            let mut cursor = None;
            let mut due = Vec::new();
            loop {
                let page = self
                    .repository
                    .iter_eligible_contacts(&campaign.id, cursor.clone())
                    .await?;
                if page.is_empty() {
                    break;
                }
                cursor = page.last().map(|c| c.contact_id.clone());
                for contact in page {
                    if contact.status != ContactStatus::Pending {
                        continue;
                    }
                    if contact.next_attempt_at.is_some_and(|at| at > now) {
                        continue;
                    }
                    due.push(contact);
                }
            }

            if due.is_empty() {
                continue;
            }

            let mut to_queue = Vec::with_capacity(due.len());
            for mut contact in due {
                contact.status = ContactStatus::InProgress;
                contact.attempts += 1;
                contact.last_attempt_at = Some(now);
                let pending = PendingContact {
                    campaign: Arc::clone(&campaign),
                    contact: contact.clone(),
                    ivr_flow: Arc::clone(&flow),
                    scheduled_at: None,
                };
                self.repository.update_campaign_contact(contact).await?;
                to_queue.push(pending);
            }

            let queued = to_queue.len();
            self.call_manager.add_contacts_to_queue(to_queue).await;
            info!(campaign_id = %campaign.id, queued, "queued due contacts for dialing");
        }
        Ok(())
    }

    /// Reset `in_progress` rows whose `last_attempt_at` is older than
    /// the configured grace period back to `pending` (spec §3 invariant
    /// "`in_progress` implies an active call or the row is stale",
    /// grounded in `campaign_tasks.py`'s `cleanup_stale_calls`, default
    /// one-hour threshold).
    pub async fn sweep_stale_in_progress(&self, campaign_id: &str) -> Result<usize> {
        let threshold =
            Utc::now() - chrono::Duration::minutes(self.config.stale_in_progress_grace_minutes);
        let mut cursor = None;
        let mut cleaned = 0;
        loop {
            let page = self
                .repository
                .iter_eligible_contacts(campaign_id, cursor.clone())
                .await?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|c| c.contact_id.clone());
            for mut contact in page {
                if contact.status == ContactStatus::InProgress
                    && contact.last_attempt_at.is_some_and(|at| at < threshold)
                {
                    contact.status = ContactStatus::Pending;
                    contact.next_attempt_at = Some(Utc::now());
                    self.repository.update_campaign_contact(contact).await?;
                    cleaned += 1;
                }
            }
        }
        if cleaned > 0 {
            warn!(campaign_id, cleaned, "reset stale in-progress contacts to pending");
        }
        Ok(cleaned)
    }

    /// Apply the post-call retry decision to a contact row.
    pub async fn record_call_outcome(
        &self,
        campaign: &Campaign,
        mut contact: CampaignContact,
        disposition: CallDisposition,
    ) -> Result<()> {
        let (status, next_attempt_at) = next_contact_state(campaign, &contact, disposition);
        contact.status = status;
        contact.next_attempt_at = next_attempt_at;
        contact.last_disposition = Some(disposition);
        if status == ContactStatus::Dnc {
            self.repository
                .upsert_dnc(&contact.phone, Some(&campaign.org_id), "opt_out")
                .await?;
        }
        self.repository.update_campaign_contact(contact).await
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn campaign() -> Campaign {
        Campaign {
            id: "camp-1".into(),
            org_id: "org-1".into(),
            ivr_flow_id: "flow-1".into(),
            greeting_audio_id: None,
            voicemail_audio_id: None,
            dialing_mode: crate::model::DialingMode::Progressive,
            max_concurrent_calls: 5,
            calls_per_minute: None,
            max_retries: 2,
            retry_delay_minutes: 15,
            retry_on_no_answer: true,
            retry_on_busy: true,
            retry_on_failed: false,
            ring_timeout_seconds: 30,
            amd_enabled: true,
            amd_action_on_human: crate::model::AmdAction::ContinueFlow,
            amd_action_on_machine: crate::model::AmdAction::Hangup,
            calling_hours_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            calling_hours_end: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            respect_timezone: false,
            timezone: None,
            scheduled_start: None,
            scheduled_end: None,
            status: crate::model::CampaignStatus::Running,
        }
    }

    fn contact() -> CampaignContact {
        CampaignContact {
            campaign_id: "camp-1".into(),
            contact_id: "contact-1".into(),
            phone: "+15550000000".into(),
            caller_id: "+15551234567".into(),
            status: ContactStatus::InProgress,
            attempts: 0,
            last_attempt_at: None,
            next_attempt_at: None,
            last_disposition: None,
            priority: 100,
        }
    }

    #[test]
    fn within_calling_hours_rejects_outside_window() {
        let c = campaign();
        let morning = chrono::DateTime::parse_from_rfc3339("2026-01-01T06:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let afternoon = chrono::DateTime::parse_from_rfc3339("2026-01-01T14:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!within_calling_hours(&c, morning));
        assert!(within_calling_hours(&c, afternoon));
    }

    #[test]
    fn no_answer_retries_until_max_retries_then_fails() {
        let c = campaign();
        let mut contact = contact();
        contact.attempts = 1;
        let (status, next) = next_contact_state(&c, &contact, CallDisposition::NoAnswer);
        assert_eq!(status, ContactStatus::Pending);
        assert!(next.is_some());

        contact.attempts = 2;
        let (status, next) = next_contact_state(&c, &contact, CallDisposition::NoAnswer);
        assert_eq!(status, ContactStatus::Failed);
        assert!(next.is_none());
    }

    #[test]
    fn failed_disposition_does_not_retry_when_flag_is_off() {
        let c = campaign();
        let contact = contact();
        let (status, _) = next_contact_state(&c, &contact, CallDisposition::Failed);
        assert_eq!(status, ContactStatus::Failed);
    }

    #[test]
    fn answered_human_completes_without_retry() {
        let c = campaign();
        let contact = contact();
        let (status, next) = next_contact_state(&c, &contact, CallDisposition::AnsweredHuman);
        assert_eq!(status, ContactStatus::Completed);
        assert!(next.is_none());
    }
}
