//! Concurrent Call Manager (component C9) — a direct port of
//! `call_manager.py`'s `ConcurrentCallManager`/`CampaignCallState`: a
//! per-campaign concurrency + rate cap, a priority/time-ordered pending
//! queue, and a 100 ms dispatch loop that calls out to a
//! [`CallInitiator`] outside the manager's single lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CallManagerConfig;
use crate::error::Result;
use crate::ivr::IvrFlow;
use crate::model::{Campaign, CampaignContact};

/// A contact waiting to be dialed (spec §3 `PendingContact`), carrying
/// everything the call initiator needs so the SIP/RTP hot path never
/// has to reach back into the repository (spec §5 ownership summary) —
/// the campaign and contact rows are snapshotted at dispatch time
/// rather than re-fetched.
#[derive(Debug, Clone)]
pub struct PendingContact {
    pub campaign: Arc<Campaign>,
    pub contact: CampaignContact,
    pub ivr_flow: Arc<IvrFlow>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// What a call initiation produced, for `record_call_start`.
pub struct InitiatedCall {
    pub call_id: String,
}

/// Asks the SIP UA to place a call. Implemented by the engine
/// composition root; stubbed in tests (spec §8 S1–S3 use a stub
/// initiator with controllable hold/return timing).
#[async_trait]
pub trait CallInitiator: Send + Sync {
    async fn initiate_call(&self, contact: PendingContact) -> Result<Option<InitiatedCall>>;
}

/// Tracks call state for a single campaign (spec §3 `CampaignCallState`).
#[derive(Debug)]
struct CampaignCallState {
    max_concurrent_calls: u32,
    calls_per_minute: Option<u32>,
    active_call_ids: HashSet<String>,
    call_timestamps: Vec<DateTime<Utc>>,
    total_calls_initiated: u64,
    total_calls_completed: u64,
    total_calls_failed: u64,
}

impl CampaignCallState {
    fn new(max_concurrent_calls: u32, calls_per_minute: Option<u32>) -> Self {
        Self {
            max_concurrent_calls,
            calls_per_minute,
            active_call_ids: HashSet::new(),
            call_timestamps: Vec::new(),
            total_calls_initiated: 0,
            total_calls_completed: 0,
            total_calls_failed: 0,
        }
    }

    fn active_call_count(&self) -> u32 {
        self.active_call_ids.len() as u32
    }

    fn available_slots(&self) -> u32 {
        self.max_concurrent_calls
            .saturating_sub(self.active_call_count())
    }

    fn check_rate_limit(&mut self, now: DateTime<Utc>) -> bool {
        let Some(limit) = self.calls_per_minute else {
            return true;
        };
        let one_minute_ago = now - chrono::Duration::seconds(60);
        self.call_timestamps.retain(|ts| *ts > one_minute_ago);
        (self.call_timestamps.len() as u32) < limit
    }

    fn can_make_call(&mut self, now: DateTime<Utc>) -> bool {
        if self.active_call_count() >= self.max_concurrent_calls {
            return false;
        }
        self.check_rate_limit(now)
    }

    fn record_call_start(&mut self, call_id: String, now: DateTime<Utc>) {
        self.active_call_ids.insert(call_id);
        self.call_timestamps.push(now);
        self.total_calls_initiated += 1;
    }

    fn record_call_end(&mut self, call_id: &str, success: bool) {
        self.active_call_ids.remove(call_id);
        if success {
            self.total_calls_completed += 1;
        } else {
            self.total_calls_failed += 1;
        }
    }
}

/// Per-campaign breakdown returned by [`ConcurrentCallManager::status`].
#[derive(Debug, Clone)]
pub struct CampaignStatusSnapshot {
    pub max_concurrent_calls: u32,
    pub active_calls: u32,
    pub available_slots: u32,
    pub calls_per_minute: Option<u32>,
    pub total_initiated: u64,
    pub total_completed: u64,
    pub total_failed: u64,
}

/// Full manager snapshot (spec's supplemented `get_status` detail, §4
/// "C9 status snapshot").
#[derive(Debug, Clone)]
pub struct ManagerStatusSnapshot {
    pub global_max_concurrent: u32,
    pub total_active_calls: u32,
    pub global_slots_available: u32,
    pub pending_contacts: usize,
    pub campaigns: HashMap<String, CampaignStatusSnapshot>,
}

struct ManagerState {
    campaign_states: HashMap<String, CampaignCallState>,
    call_to_campaign: HashMap<String, String>,
    pending_contacts: Vec<PendingContact>,
}

/// Owns concurrency/rate state across every registered campaign plus the
/// pending dial queue, and drives the dispatch loop that turns pending
/// contacts into live calls within the invariants of spec §4.9.
pub struct ConcurrentCallManager {
    global_max_concurrent: u32,
    dispatch_interval: Duration,
    initiator: Arc<dyn CallInitiator>,
    state: Mutex<ManagerState>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConcurrentCallManager {
    pub fn new(config: &CallManagerConfig, initiator: Arc<dyn CallInitiator>) -> Arc<Self> {
        Arc::new(Self {
            global_max_concurrent: config.global_max_concurrent,
            dispatch_interval: Duration::from_millis(config.dispatch_interval_ms),
            initiator,
            state: Mutex::new(ManagerState {
                campaign_states: HashMap::new(),
                call_to_campaign: HashMap::new(),
                pending_contacts: Vec::new(),
            }),
            dispatch_task: Mutex::new(None),
        })
    }

    /// Register a campaign, or update its limits in place if already
    /// registered (spec §4 supplemented detail: re-registration updates
    /// rather than errors, matching `call_manager.py`).
    pub async fn register_campaign(
        &self,
        campaign_id: &str,
        max_concurrent_calls: u32,
        calls_per_minute: Option<u32>,
    ) {
        let mut state = self.state.lock().await;
        match state.campaign_states.get_mut(campaign_id) {
            Some(existing) => {
                existing.max_concurrent_calls = max_concurrent_calls;
                existing.calls_per_minute = calls_per_minute;
            }
            None => {
                state.campaign_states.insert(
                    campaign_id.to_string(),
                    CampaignCallState::new(max_concurrent_calls, calls_per_minute),
                );
                info!(campaign_id, max_concurrent_calls, ?calls_per_minute, "registered campaign");
            }
        }
    }

    pub async fn unregister_campaign(&self, campaign_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(removed) = state.campaign_states.remove(campaign_id) {
            for call_id in removed.active_call_ids {
                state.call_to_campaign.remove(&call_id);
            }
        }
        state
            .pending_contacts
            .retain(|c| c.campaign.id != campaign_id);
        info!(campaign_id, "unregistered campaign");
    }

    /// Insert contacts and re-sort the whole queue by `(priority asc,
    /// scheduled_at asc)` (spec §4.9 queue ordering, invariant 4 of §8).
    pub async fn add_contacts_to_queue(&self, contacts: Vec<PendingContact>) -> usize {
        let mut state = self.state.lock().await;
        let mut added = 0;
        for contact in contacts {
            if !state.campaign_states.contains_key(&contact.campaign.id) {
                warn!(campaign_id = %contact.campaign.id, "campaign not registered, dropping contact");
                continue;
            }
            state.pending_contacts.push(contact);
            added += 1;
        }
        state.pending_contacts.sort_by(|a, b| {
            (a.contact.priority, a.scheduled_at).cmp(&(b.contact.priority, b.scheduled_at))
        });
        added
    }

    pub async fn record_call_start(&self, campaign_id: &str, call_id: &str) {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if let Some(campaign) = state.campaign_states.get_mut(campaign_id) {
            campaign.record_call_start(call_id.to_string(), now);
            state
                .call_to_campaign
                .insert(call_id.to_string(), campaign_id.to_string());
        }
    }

    pub async fn record_call_end(&self, call_id: &str, success: bool) {
        let mut state = self.state.lock().await;
        if let Some(campaign_id) = state.call_to_campaign.remove(call_id) {
            if let Some(campaign) = state.campaign_states.get_mut(&campaign_id) {
                campaign.record_call_end(call_id, success);
            }
        }
    }

    pub async fn status(&self) -> ManagerStatusSnapshot {
        let state = self.state.lock().await;
        let total_active: u32 = state
            .campaign_states
            .values()
            .map(CampaignCallState::active_call_count)
            .sum();
        let campaigns = state
            .campaign_states
            .iter()
            .map(|(id, c)| {
                (
                    id.clone(),
                    CampaignStatusSnapshot {
                        max_concurrent_calls: c.max_concurrent_calls,
                        active_calls: c.active_call_count(),
                        available_slots: c.available_slots(),
                        calls_per_minute: c.calls_per_minute,
                        total_initiated: c.total_calls_initiated,
                        total_completed: c.total_calls_completed,
                        total_failed: c.total_calls_failed,
                    },
                )
            })
            .collect();
        ManagerStatusSnapshot {
            global_max_concurrent: self.global_max_concurrent,
            total_active_calls: total_active,
            global_slots_available: self.global_max_concurrent.saturating_sub(total_active),
            pending_contacts: state.pending_contacts.len(),
            campaigns,
        }
    }

    /// Start the 100 ms dispatch loop (spec §4.9). A no-op if already
    /// running.
    pub async fn start_processing(self: &Arc<Self>) {
        let mut task = self.dispatch_task.lock().await;
        if task.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.dispatch_interval);
            loop {
                ticker.tick().await;
                manager.process_pending_contacts().await;
            }
        }));
        info!("call manager dispatch loop started");
    }

    pub async fn stop_processing(&self) {
        if let Some(task) = self.dispatch_task.lock().await.take() {
            task.abort();
        }
        info!("call manager dispatch loop stopped");
    }

    /// One dispatch tick: select candidates under the lock, release it,
    /// then call the initiator for each (spec §4.9's "release lock;
    /// for each candidate call the Call Initiator").
    async fn process_pending_contacts(&self) {
        let to_dial = {
            let mut state = self.state.lock().await;
            if state.pending_contacts.is_empty() {
                return;
            }
            let now = Utc::now();
            let mut to_dial = Vec::new();
            let mut remaining = Vec::new();
            for contact in std::mem::take(&mut state.pending_contacts) {
                if contact.scheduled_at.is_some_and(|at| at > now) {
                    remaining.push(contact);
                    continue;
                }
                let can_dial = self.total_active_under_global(&state) < self.global_max_concurrent
                    && state
                        .campaign_states
                        .get_mut(&contact.campaign.id)
                        .is_some_and(|c| c.can_make_call(now));
                if can_dial {
                    to_dial.push(contact);
                } else {
                    remaining.push(contact);
                }
            }
            state.pending_contacts = remaining;
            to_dial
        };

        for contact in to_dial {
            self.initiate_one(contact).await;
        }
    }

    fn total_active_under_global(&self, state: &ManagerState) -> u32 {
        state
            .campaign_states
            .values()
            .map(CampaignCallState::active_call_count)
            .sum()
    }

    async fn initiate_one(&self, mut contact: PendingContact) {
        let phone = contact.contact.phone.clone();
        let campaign_id = contact.campaign.id.clone();
        info!(phone = %phone, campaign_id = %campaign_id, "initiating call");
        match self.initiator.initiate_call(contact.clone()).await {
            Ok(Some(call)) => {
                self.record_call_start(&campaign_id, &call.call_id).await;
            }
            Ok(None) => {
                warn!(phone = %phone, "call initiation returned nothing");
            }
            Err(e) => {
                error!(phone = %phone, error = %e, "failed to initiate call, requeuing");
                contact.scheduled_at = Some(Utc::now() + chrono::Duration::seconds(30));
                let mut state = self.state.lock().await;
                state.pending_contacts.push(contact);
                debug!("re-queued contact for retry in 30 seconds");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct StubInitiator {
        hold: Duration,
        started: AtomicU32,
        manager: TokioMutex<Option<Arc<ConcurrentCallManager>>>,
    }

    #[async_trait]
    impl CallInitiator for StubInitiator {
        async fn initiate_call(&self, contact: PendingContact) -> Result<Option<InitiatedCall>> {
            let n = self.started.fetch_add(1, Ordering::SeqCst);
            let call_id = format!("call-{n}");
            if let Some(manager) = self.manager.lock().await.clone() {
                let call_id_owned = call_id.clone();
                let hold = self.hold;
                tokio::spawn(async move {
                    tokio::time::sleep(hold).await;
                    manager.record_call_end(&call_id_owned, true).await;
                });
            }
            Ok(Some(InitiatedCall { call_id }))
        }
    }

    fn test_campaign(campaign_id: &str) -> Arc<crate::model::Campaign> {
        Arc::new(crate::model::Campaign {
            id: campaign_id.to_string(),
            org_id: "org-1".to_string(),
            ivr_flow_id: "flow-1".to_string(),
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
            amd_enabled: false,
            amd_action_on_human: crate::model::AmdAction::ContinueFlow,
            amd_action_on_machine: crate::model::AmdAction::Hangup,
            calling_hours_start: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            calling_hours_end: chrono::NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            respect_timezone: false,
            timezone: None,
            scheduled_start: None,
            scheduled_end: None,
            status: crate::model::CampaignStatus::Running,
        })
    }

    fn contact(campaign_id: &str, priority: i32) -> PendingContact {
        PendingContact {
            campaign: test_campaign(campaign_id),
            contact: CampaignContact {
                campaign_id: campaign_id.to_string(),
                contact_id: uuid::Uuid::new_v4().to_string(),
                phone: "+15550000000".to_string(),
                caller_id: "+15551234567".to_string(),
                status: crate::model::ContactStatus::InProgress,
                attempts: 0,
                last_attempt_at: None,
                next_attempt_at: None,
                last_disposition: None,
                priority,
            },
            ivr_flow: Arc::new(IvrFlow {
                start_node: "n0".to_string(),
                nodes: std::collections::HashMap::new(),
                edges: Vec::new(),
            }),
            scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn concurrency_cap_limits_simultaneous_calls() {
        let initiator = Arc::new(StubInitiator {
            hold: Duration::from_millis(200),
            started: AtomicU32::new(0),
            manager: TokioMutex::new(None),
        });
        let manager = ConcurrentCallManager::new(
            &CallManagerConfig {
                global_max_concurrent: 10,
                dispatch_interval_ms: 20,
            },
            initiator.clone(),
        );
        *initiator.manager.lock().await = Some(Arc::clone(&manager));

        manager.register_campaign("c1", 2, None).await;
        manager
            .add_contacts_to_queue(vec![
                contact("c1", 100),
                contact("c1", 100),
                contact("c1", 100),
            ])
            .await;
        manager.start_processing().await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let status = manager.status().await;
        assert!(status.campaigns["c1"].active_calls <= 2);

        manager.stop_processing().await;
    }

    #[tokio::test]
    async fn priority_order_picks_lowest_priority_first() {
        let initiator = Arc::new(StubInitiator {
            hold: Duration::from_secs(5),
            started: AtomicU32::new(0),
            manager: TokioMutex::new(None),
        });
        let manager = ConcurrentCallManager::new(
            &CallManagerConfig {
                global_max_concurrent: 1,
                dispatch_interval_ms: 20,
            },
            initiator,
        );
        manager.register_campaign("c1", 5, None).await;
        manager
            .add_contacts_to_queue(vec![contact("c1", 10), contact("c1", 5)])
            .await;

        let state = manager.state.lock().await;
        assert_eq!(state.pending_contacts[0].contact.priority, 5);
        assert_eq!(state.pending_contacts[1].contact.priority, 10);
    }

    #[tokio::test]
    async fn rate_cap_limits_starts_per_rolling_minute() {
        let initiator = Arc::new(StubInitiator {
            hold: Duration::from_secs(1),
            started: AtomicU32::new(0),
            manager: TokioMutex::new(None),
        });
        let manager = ConcurrentCallManager::new(
            &CallManagerConfig {
                global_max_concurrent: 10,
                dispatch_interval_ms: 20,
            },
            initiator.clone(),
        );
        *initiator.manager.lock().await = Some(Arc::clone(&manager));

        manager.register_campaign("c1", 10, Some(5)).await;
        manager
            .add_contacts_to_queue((0..20).map(|_| contact("c1", 10)).collect())
            .await;
        manager.start_processing().await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = manager.status().await;
        assert_eq!(status.campaigns["c1"].total_initiated, 5);

        manager.stop_processing().await;
    }

    #[tokio::test]
    async fn reregistering_a_campaign_updates_limits_in_place() {
        let initiator = Arc::new(StubInitiator {
            hold: Duration::from_secs(5),
            started: AtomicU32::new(0),
            manager: TokioMutex::new(None),
        });
        let manager = ConcurrentCallManager::new(
            &CallManagerConfig {
                global_max_concurrent: 10,
                dispatch_interval_ms: 20,
            },
            initiator,
        );
        manager.register_campaign("c1", 2, None).await;
        manager.register_campaign("c1", 9, Some(3)).await;
        let status = manager.status().await;
        assert_eq!(status.campaigns["c1"].max_concurrent_calls, 9);
        assert_eq!(status.campaigns["c1"].calls_per_minute, Some(3));
        assert_eq!(status.campaigns.len(), 1);
    }
}
