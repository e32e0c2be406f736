//! Engine composition root (spec §9 design note: "replace global
//! singletons with an engine-owned composition root that injects
//! component handles into constructors").
//!
//! [`Engine`] owns the SIP transport, the registrar, the concurrent call
//! manager, and the campaign scheduler, and wires a [`SipCallInitiator`]
//! between the call manager and the lower SIP/RTP/media crates. Nothing
//! outside this module constructs a `Dialog` or an `RtpSession` directly.

use async_trait::async_trait;
use chrono::Utc;
use dialer_dialog_core::{Dialog, InviteOutcome, Registrar, RegistrationConfig, SipTransport};
use dialer_media_core::amd::{self, AmdThresholds};
use dialer_media_core::{DtmfCollectionResult, JitterBuffer, MediaHandler, Variant};
use dialer_rtp_core::RtpSession;
use dialer_sip_core::sdp::{self, CodecDescriptor, RemoteMedia};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::audio::{load_pcm, FileAudioResolver};
use crate::call_manager::{CallInitiator, ConcurrentCallManager, InitiatedCall, PendingContact};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event_bus::{EventBus, Topic};
use crate::ivr::{AudioResolver, IvrContext, IvrExecutor, IvrFlow, IvrMedia};
use crate::model::{AmdAction, Campaign, CallDisposition, CampaignContact};
use crate::repository::{CallLogRecord, Repository, SurveyResponseRecord};
use crate::scheduler::CampaignScheduler;

/// RTP payload type this engine expects RFC 2833 telephone-event packets
/// on. The SDP offer (§4.5) only ever advertises PT 0/8/9, so there is no
/// negotiated event payload type to read back — 101 is the payload type
/// almost every PBX defaults to, fixed here rather than negotiated.
const TELEPHONE_EVENT_PT: u8 = 101;

fn preferred_codecs(priority: &[u8]) -> Vec<CodecDescriptor> {
    let chosen: Vec<CodecDescriptor> = sdp::DEFAULT_CODECS
        .iter()
        .filter(|c| priority.contains(&c.payload_type))
        .copied()
        .collect();
    if chosen.is_empty() {
        sdp::DEFAULT_CODECS.to_vec()
    } else {
        chosen
    }
}

/// Decode one RFC 2833 telephone-event payload, returning the digit only
/// once its end-of-event flag is set (the event is otherwise retransmitted
/// several times while the key is held).
fn decode_telephone_event(payload: &[u8]) -> Option<char> {
    if payload.len() < 4 {
        return None;
    }
    let event = payload[0];
    let end_of_event = payload[1] & 0x80 != 0;
    if !end_of_event {
        return None;
    }
    match event {
        0..=9 => Some((b'0' + event) as char),
        10 => Some('*'),
        11 => Some('#'),
        12..=15 => Some((b'A' + (event - 12)) as char),
        _ => None,
    }
}

/// Bridges [`IvrMedia`] (the executor's narrow media trait) to a live
/// [`MediaHandler`]/[`Dialog`] pair. `audio_path` arrives already resolved
/// — [`IvrExecutor`] resolves audio ids itself before calling in here.
struct DialMedia {
    media: Arc<MediaHandler>,
    dialog: Arc<Dialog>,
    hung_up: Arc<AtomicBool>,
}

#[async_trait]
impl IvrMedia for DialMedia {
    async fn play_audio(
        &self,
        audio_path: &str,
        allow_dtmf_interrupt: bool,
        interrupt_digits: &str,
    ) -> Option<char> {
        let pcm = match load_pcm(audio_path) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(audio_path, error = %e, "failed to load audio prompt, skipping playback");
                return None;
            }
        };
        let (_, digit) = self
            .media
            .play_pcm(&pcm, allow_dtmf_interrupt, interrupt_digits)
            .await;
        digit
    }

    async fn collect_dtmf(
        &self,
        max_digits: usize,
        timeout: Duration,
        inter_digit_timeout: Duration,
        termination_digits: &str,
        initial_timeout: Option<Duration>,
    ) -> DtmfCollectionResult {
        self.media
            .collect_dtmf(
                max_digits,
                timeout,
                inter_digit_timeout,
                termination_digits,
                initial_timeout,
            )
            .await
    }

    async fn hangup(&self) {
        if self.hung_up.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.dialog.bye().await {
            warn!(error = %e, "BYE failed while hanging up from IVR");
        }
    }
}

/// What a fully-resolved call ended up producing, for persistence.
struct CallOutcome {
    disposition: CallDisposition,
    amd_result: dialer_media_core::AmdResult,
    dtmf_inputs: Vec<char>,
    survey_responses: HashMap<String, String>,
    completed_normally: bool,
    answer_at: Option<chrono::DateTime<Utc>>,
}

/// Implements [`CallInitiator`] by placing a real SIP/RTP call per
/// dispatched [`PendingContact`]: INVITE, SDP/RTP setup, AMD, the IVR
/// executor, and end-of-call persistence plus the scheduler's retry
/// decision.
pub struct SipCallInitiator<R: Repository> {
    config: EngineConfig,
    transport: Arc<SipTransport>,
    local_addr: SocketAddr,
    events: Arc<EventBus>,
    repository: Arc<R>,
    scheduler: OnceLock<Arc<CampaignScheduler<R>>>,
    audio_resolver: Arc<FileAudioResolver>,
    amd_thresholds: AmdThresholds,
    manager: OnceLock<Weak<ConcurrentCallManager>>,
}

impl<R: Repository> Clone for SipCallInitiator<R> {
    fn clone(&self) -> Self {
        let scheduler = OnceLock::new();
        if let Some(s) = self.scheduler.get() {
            let _ = scheduler.set(Arc::clone(s));
        }
        let manager = OnceLock::new();
        if let Some(m) = self.manager.get() {
            let _ = manager.set(m.clone());
        }
        Self {
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
            local_addr: self.local_addr,
            events: Arc::clone(&self.events),
            repository: Arc::clone(&self.repository),
            scheduler,
            audio_resolver: Arc::clone(&self.audio_resolver),
            amd_thresholds: self.amd_thresholds,
            manager,
        }
    }
}

impl<R: Repository + 'static> SipCallInitiator<R> {
    fn set_call_manager(&self, manager: &Arc<ConcurrentCallManager>) {
        let _ = self.manager.set(Arc::downgrade(manager));
    }

    fn set_scheduler(&self, scheduler: &Arc<CampaignScheduler<R>>) {
        let _ = self.scheduler.set(Arc::clone(scheduler));
    }

    fn scheduler(&self) -> &Arc<CampaignScheduler<R>> {
        self.scheduler
            .get()
            .expect("scheduler set before any call is dispatched")
    }

    fn build_dialog(&self, contact: &CampaignContact) -> Dialog {
        let from_uri = format!("sip:{}@{}", self.config.sip.username, self.config.sip.server);
        let to_uri = format!("sip:{}@{}", contact.phone, self.config.sip.server);
        let contact_uri = format!("sip:{}@{}", self.config.sip.username, self.local_addr);
        Dialog::new(
            Arc::clone(&self.transport),
            from_uri,
            to_uri,
            contact_uri,
            self.local_addr.to_string(),
        )
    }

    /// Run AMD over `duration` worth of PCM already flowing into `jitter`,
    /// honoring the campaign's AMD toggle (spec §4.6 / supplemented detail
    /// "C6 AMD feed source").
    async fn run_amd(
        &self,
        campaign: &Campaign,
        jitter: &SyncMutex<JitterBuffer>,
        duration: Duration,
    ) -> dialer_media_core::AmdResult {
        if !campaign.amd_enabled || !self.config.amd.enabled {
            return dialer_media_core::AmdResult::Unknown;
        }
        tokio::time::sleep(duration).await;
        let samples = jitter.lock().drain_all();
        amd::analyze(&samples, duration.as_secs_f64(), 8000, &self.amd_thresholds)
    }

    /// Place one call end to end: INVITE, SDP/RTP setup, AMD, IVR, and the
    /// resulting disposition. Used both by the dispatched [`CallInitiator`]
    /// path and by the CLI's ad-hoc `dial` command.
    async fn place_call(
        &self,
        campaign: Arc<Campaign>,
        contact: CampaignContact,
        ivr_flow: Arc<IvrFlow>,
        dialog: Arc<Dialog>,
    ) -> (String, CallOutcome) {
        let call_id = dialog.call_id().to_string();

        self.events.publish(
            Topic::CallInitiated,
            serde_json::json!({
                "call_id": call_id,
                "campaign_id": campaign.id,
                "contact_id": contact.contact_id,
            }),
        );

        let to_uri = format!("sip:{}@{}", contact.phone, self.config.sip.server);
        let ring_timeout = Duration::from_secs(campaign.ring_timeout_seconds);

        let rtp_session = match RtpSession::bind(
            self.local_addr.ip(),
            self.config.rtp.port_start,
            self.config.rtp.port_end,
        )
        .await
        {
            Ok(s) => Arc::new(s),
            Err(e) => {
                error!(call_id, error = %e, "failed to bind RTP session");
                return (
                    call_id,
                    CallOutcome {
                        disposition: CallDisposition::Failed,
                        amd_result: dialer_media_core::AmdResult::Unknown,
                        dtmf_inputs: Vec::new(),
                        survey_responses: HashMap::new(),
                        completed_normally: true,
                        answer_at: None,
                    },
                );
            }
        };

        let codecs = preferred_codecs(&self.config.sip.codecs);
        let local_sdp = sdp::build_session(
            &self.config.sip.username,
            &self.local_addr.ip().to_string(),
            rtp_session.local_port(),
            u64::from(rtp_session.ssrc()),
            &codecs,
        );

        let outcome = match dialog
            .invite(&to_uri, Some(&contact.caller_id), local_sdp, ring_timeout)
            .await
        {
            Ok(o) => o,
            Err(e) => {
                warn!(call_id, error = %e, "INVITE attempt failed");
                let disposition = if e.is_recoverable() {
                    CallDisposition::NoAnswer
                } else {
                    CallDisposition::Failed
                };
                return (
                    call_id,
                    CallOutcome {
                        disposition,
                        amd_result: dialer_media_core::AmdResult::Unknown,
                        dtmf_inputs: Vec::new(),
                        survey_responses: HashMap::new(),
                        completed_normally: true,
                        answer_at: None,
                    },
                );
            }
        };

        let remote = match outcome {
            InviteOutcome::Answered { remote_media: Some(remote) } => remote,
            InviteOutcome::Answered { remote_media: None } => {
                warn!(call_id, "200 OK carried no SDP body, ending call");
                let _ = dialog.bye().await;
                return (
                    call_id,
                    CallOutcome {
                        disposition: CallDisposition::Failed,
                        amd_result: dialer_media_core::AmdResult::Unknown,
                        dtmf_inputs: Vec::new(),
                        survey_responses: HashMap::new(),
                        completed_normally: true,
                        answer_at: Some(Utc::now()),
                    },
                );
            }
            InviteOutcome::Rejected { status: 486, .. } | InviteOutcome::Rejected { status: 600, .. } => {
                return (
                    call_id,
                    CallOutcome {
                        disposition: CallDisposition::Busy,
                        amd_result: dialer_media_core::AmdResult::Unknown,
                        dtmf_inputs: Vec::new(),
                        survey_responses: HashMap::new(),
                        completed_normally: true,
                        answer_at: None,
                    },
                );
            }
            InviteOutcome::Rejected { status: 404, .. } | InviteOutcome::Rejected { status: 603, .. } => {
                return (
                    call_id,
                    CallOutcome {
                        disposition: CallDisposition::InvalidNumber,
                        amd_result: dialer_media_core::AmdResult::Unknown,
                        dtmf_inputs: Vec::new(),
                        survey_responses: HashMap::new(),
                        completed_normally: true,
                        answer_at: None,
                    },
                );
            }
            InviteOutcome::Rejected { .. } => {
                return (
                    call_id,
                    CallOutcome {
                        disposition: CallDisposition::Failed,
                        amd_result: dialer_media_core::AmdResult::Unknown,
                        dtmf_inputs: Vec::new(),
                        survey_responses: HashMap::new(),
                        completed_normally: true,
                        answer_at: None,
                    },
                );
            }
            InviteOutcome::RingTimeout | InviteOutcome::NoResponse => {
                return (
                    call_id,
                    CallOutcome {
                        disposition: CallDisposition::NoAnswer,
                        amd_result: dialer_media_core::AmdResult::Unknown,
                        dtmf_inputs: Vec::new(),
                        survey_responses: HashMap::new(),
                        completed_normally: true,
                        answer_at: None,
                    },
                );
            }
        };

        self.events.publish(Topic::CallAnswered, serde_json::json!({"call_id": call_id}));
        let answer_at = Some(Utc::now());
        let outcome = self
            .run_answered_call(&campaign, &contact, &ivr_flow, &dialog, &rtp_session, &remote, &call_id)
            .await;

        (
            call_id,
            CallOutcome {
                answer_at,
                ..outcome
            },
        )
    }

    /// Everything that happens once the far end has answered: RTP/media
    /// wiring, AMD, and (depending on the AMD decision and the campaign's
    /// configured action) the IVR executor.
    #[allow(clippy::too_many_arguments)]
    async fn run_answered_call(
        &self,
        campaign: &Campaign,
        contact: &CampaignContact,
        ivr_flow: &Arc<IvrFlow>,
        dialog: &Arc<Dialog>,
        rtp_session: &Arc<RtpSession>,
        remote: &RemoteMedia,
        call_id: &str,
    ) -> CallOutcome {
        let Some((ip, port)) = remote.endpoint() else {
            warn!(call_id, "remote SDP carried no usable endpoint, ending call");
            let _ = dialog.bye().await;
            return CallOutcome {
                disposition: CallDisposition::Failed,
                amd_result: dialer_media_core::AmdResult::Unknown,
                dtmf_inputs: Vec::new(),
                survey_responses: HashMap::new(),
                completed_normally: true,
                answer_at: None,
            };
        };
        let Ok(remote_ip) = ip.parse::<IpAddr>() else {
            warn!(call_id, ip, "remote SDP connection address did not parse");
            let _ = dialog.bye().await;
            return CallOutcome {
                disposition: CallDisposition::Failed,
                amd_result: dialer_media_core::AmdResult::Unknown,
                dtmf_inputs: Vec::new(),
                survey_responses: HashMap::new(),
                completed_normally: true,
                answer_at: None,
            };
        };
        rtp_session.set_remote_addr(SocketAddr::new(remote_ip, port));

        let codec_pt = sdp::negotiate(&remote.payload_types, &self.config.sip.codecs).unwrap_or(0);
        let codec = Variant::from_payload_type(codec_pt).unwrap_or(Variant::Mulaw);

        let amd_depth_samples = ((self.config.amd.timeout_seconds as usize) + 1) * 8000;
        let jitter = Arc::new(SyncMutex::new(JitterBuffer::new(amd_depth_samples)));
        let media = Arc::new(MediaHandler::new(Arc::clone(rtp_session), codec));

        let recv_jitter = Arc::clone(&jitter);
        let recv_media = Arc::clone(&media);
        let _receive_task = rtp_session.spawn_receive(move |packet| {
            if packet.payload_type == TELEPHONE_EVENT_PT {
                if let Some(digit) = decode_telephone_event(&packet.payload) {
                    let media = Arc::clone(&recv_media);
                    tokio::spawn(async move {
                        media.push_dtmf_digit(digit).await;
                    });
                }
                return;
            }
            if let Some(variant) = Variant::from_payload_type(packet.payload_type) {
                let pcm = variant.decode(&packet.payload);
                recv_jitter.lock().write(&pcm);
            }
        });

        let amd_timeout = Duration::from_secs(self.config.amd.timeout_seconds);
        let amd_result = self.run_amd(campaign, &jitter, amd_timeout).await;
        self.events.publish(
            Topic::CallAmd,
            serde_json::json!({"call_id": call_id, "result": amd_result.to_string()}),
        );

        let action = match amd_result {
            dialer_media_core::AmdResult::Machine | dialer_media_core::AmdResult::Beep => {
                Some(campaign.amd_action_on_machine)
            }
            dialer_media_core::AmdResult::Human
            | dialer_media_core::AmdResult::Silence
            | dialer_media_core::AmdResult::Unknown => Some(campaign.amd_action_on_human),
        };

        let hung_up = Arc::new(AtomicBool::new(false));
        let dial_media = Arc::new(DialMedia {
            media: Arc::clone(&media),
            dialog: Arc::clone(dialog),
            hung_up: Arc::clone(&hung_up),
        });

        let mut opted_out = false;
        let mut dtmf_inputs = Vec::new();
        let mut survey_responses = HashMap::new();
        let mut completed_normally = true;

        match action {
            Some(AmdAction::Hangup) => {
                dial_media.hangup().await;
            }
            Some(AmdAction::LeaveVoicemail) => {
                if let Some(audio_id) = &campaign.voicemail_audio_id {
                    let path = self.audio_resolver.resolve(audio_id);
                    dial_media.play_audio(&path, false, "").await;
                }
                dial_media.hangup().await;
            }
            Some(AmdAction::ContinueFlow) | None => {
                let executor = IvrExecutor::new(
                    dial_media.clone() as Arc<dyn IvrMedia>,
                    self.audio_resolver.clone() as Arc<dyn AudioResolver>,
                );
                let mut context = IvrContext::new(call_id.to_string());
                context.contact_id = Some(contact.contact_id.clone());
                context.campaign_id = Some(campaign.id.clone());
                context.phone_number = Some(contact.phone.clone());
                context.organization_id = Some(campaign.org_id.clone());

                let result = executor.execute_flow(ivr_flow, context).await;
                opted_out = result.opted_out;
                dtmf_inputs = result
                    .dtmf_inputs
                    .iter()
                    .filter_map(|s| s.chars().next())
                    .collect();
                survey_responses = result.survey_responses;
                completed_normally = result.completed_normally;
            }
        }

        if !hung_up.load(Ordering::SeqCst) {
            if let Err(e) = dialog.bye().await {
                warn!(call_id, error = %e, "BYE failed at end of call");
            }
        }

        let disposition = if opted_out {
            CallDisposition::Dnc
        } else {
            match amd_result {
                dialer_media_core::AmdResult::Machine | dialer_media_core::AmdResult::Beep => {
                    CallDisposition::AnsweredMachine
                }
                _ => CallDisposition::AnsweredHuman,
            }
        };

        CallOutcome {
            disposition,
            amd_result,
            dtmf_inputs,
            survey_responses,
            completed_normally,
            answer_at: None,
        }
    }

    /// Persist the call log and, if the flow collected anything, a survey
    /// response row; never let a persistence failure block the next call.
    async fn persist_outcome(
        &self,
        call_id: &str,
        campaign: &Campaign,
        contact: &CampaignContact,
        start_at: chrono::DateTime<Utc>,
        outcome: &CallOutcome,
    ) {
        let end_at = Utc::now();
        let log = CallLogRecord {
            call_id: call_id.to_string(),
            campaign_id: campaign.id.clone(),
            contact_id: contact.contact_id.clone(),
            caller_id: contact.caller_id.clone(),
            destination: contact.phone.clone(),
            start_at,
            answer_at: outcome.answer_at,
            end_at,
            result: outcome.disposition,
            hangup_cause: None,
            amd_result: outcome.amd_result.to_string(),
            dtmf_inputs: outcome.dtmf_inputs.clone(),
            recording_path: None,
            metadata: HashMap::new(),
        };
        if let Err(e) = self.repository.save_call_log(log).await {
            warn!(call_id, error = %e, "failed to persist call log");
        }

        if !outcome.survey_responses.is_empty() {
            let survey = SurveyResponseRecord {
                call_log_id: call_id.to_string(),
                campaign_id: campaign.id.clone(),
                contact_id: contact.contact_id.clone(),
                flow_id: campaign.ivr_flow_id.clone(),
                flow_version: 1,
                responses: outcome.survey_responses.clone(),
                completed_normally: outcome.completed_normally,
                duration_seconds: (end_at - start_at).num_milliseconds() as f64 / 1000.0,
            };
            if let Err(e) = self.repository.save_survey_response(survey).await {
                warn!(call_id, error = %e, "failed to persist survey response");
            }
        }
    }
}

#[async_trait]
impl<R: Repository + 'static> CallInitiator for SipCallInitiator<R> {
    async fn initiate_call(&self, pending: PendingContact) -> Result<Option<InitiatedCall>> {
        let dialog = Arc::new(self.build_dialog(&pending.contact));
        let call_id = dialog.call_id().to_string();

        let this = self.clone();
        tokio::spawn(async move {
            let start_at = Utc::now();
            let campaign = pending.campaign;
            let contact = pending.contact;
            let ivr_flow = pending.ivr_flow;

            let (call_id, outcome) = this
                .place_call(Arc::clone(&campaign), contact.clone(), ivr_flow, dialog)
                .await;

            this.persist_outcome(&call_id, &campaign, &contact, start_at, &outcome)
                .await;

            this.events.publish(
                Topic::CallEnded,
                serde_json::json!({"call_id": call_id, "disposition": outcome.disposition.as_str()}),
            );

            if let Err(e) = this
                .scheduler()
                .record_call_outcome(&campaign, contact, outcome.disposition)
                .await
            {
                warn!(call_id, error = %e, "failed to record retry decision");
            }

            let success = !matches!(outcome.disposition, CallDisposition::Failed);
            if let Some(manager) = this.manager.get().and_then(Weak::upgrade) {
                manager.record_call_end(&call_id, success).await;
            }
        });

        Ok(Some(InitiatedCall { call_id }))
    }
}

/// Owns the engine's long-lived handles: SIP transport, registrar, call
/// manager, and scheduler. Constructed once at startup and shared behind
/// an `Arc` with the CLI and any future status/control surface.
pub struct Engine<R: Repository> {
    config: EngineConfig,
    repository: Arc<R>,
    events: Arc<EventBus>,
    transport: Arc<SipTransport>,
    registrar: Arc<Registrar>,
    call_manager: Arc<ConcurrentCallManager>,
    scheduler: Arc<CampaignScheduler<R>>,
    initiator: Arc<SipCallInitiator<R>>,
    scheduler_task: SyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<R: Repository + 'static> Engine<R> {
    /// Resolve `sip.server:sip.port`, bind the UDP transport, and wire
    /// every component together. Does not register or start dispatching;
    /// call [`Engine::start`] for that.
    pub async fn new(
        config: EngineConfig,
        repository: Arc<R>,
        audio_base_dir: impl Into<std::path::PathBuf>,
    ) -> Result<Arc<Self>> {
        let remote_addr = format!("{}:{}", config.sip.server, config.sip.port)
            .to_socket_addrs()
            .map_err(|e| EngineError::Configuration(format!("resolving sip.server: {e}")))?
            .next()
            .ok_or_else(|| EngineError::Configuration("sip.server resolved to no address".into()))?;
        let bind_addr = SocketAddr::new(
            if remote_addr.is_ipv4() {
                IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
            } else {
                IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
            },
            0,
        );
        let (transport, mut inbound) = SipTransport::bind(bind_addr, remote_addr).await?;
        let local_addr = transport.local_addr()?;

        // In-dialog BYE/INFO from the far end doesn't correlate to any
        // pending transaction on this UDP transport; this engine doesn't
        // yet act on it beyond logging, since BYE is always initiated from
        // our side at the end of `run_answered_call`.
        tokio::spawn(async move {
            while let Some(req) = inbound.recv().await {
                info!(method = ?req.message.start_line, from = %req.from, "received in-dialog request");
            }
        });

        let events = Arc::new(EventBus::default());
        let audio_resolver = Arc::new(FileAudioResolver::new(audio_base_dir));
        let amd_thresholds: AmdThresholds = config.amd.thresholds.into();

        let registration_config = RegistrationConfig {
            server_uri: format!("sip:{}", config.sip.server),
            username: config.sip.username.clone(),
            password: config.sip.password.clone(),
            domain: config.sip.server.clone(),
            contact_uri: format!("sip:{}@{}", config.sip.username, local_addr),
            requested_expires: config.sip.register_expires,
        };
        let registrar = Registrar::new(Arc::clone(&transport), registration_config);

        let scheduler_config = config.scheduler.clone();
        // `scheduler` and `call_manager` both need a handle to `initiator`,
        // and `initiator` needs both back — broken by constructing
        // `initiator` with empty `OnceLock`s and filling them in once the
        // other two exist, rather than a strong reference cycle.
        let initiator = Arc::new(SipCallInitiator {
            config: config.clone(),
            transport: Arc::clone(&transport),
            local_addr,
            events: Arc::clone(&events),
            repository: Arc::clone(&repository),
            scheduler: OnceLock::new(),
            audio_resolver: Arc::clone(&audio_resolver),
            amd_thresholds,
            manager: OnceLock::new(),
        });

        let call_manager = ConcurrentCallManager::new(
            &config.call_manager,
            Arc::clone(&initiator) as Arc<dyn CallInitiator>,
        );
        initiator.set_call_manager(&call_manager);

        let scheduler = Arc::new(CampaignScheduler::new(
            Arc::clone(&repository),
            Arc::clone(&call_manager),
            scheduler_config,
        ));
        initiator.set_scheduler(&scheduler);

        Ok(Arc::new(Self {
            config,
            repository,
            events,
            transport,
            registrar,
            call_manager,
            scheduler,
            initiator,
            scheduler_task: SyncMutex::new(None),
        }))
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Register with the PBX, register every currently-running campaign,
    /// and start both the call manager's dispatch loop and the scheduler's
    /// polling loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.registrar.start().await.map_err(|e| EngineError::Registration {
            reason: e.to_string(),
        })?;

        for campaign in self.repository.load_running_campaigns().await? {
            self.call_manager
                .register_campaign(&campaign.id, campaign.max_concurrent_calls, campaign.calls_per_minute)
                .await;
        }

        self.call_manager.start_processing().await;

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.scheduler.poll_interval());
            loop {
                ticker.tick().await;
                if let Err(e) = engine.scheduler.dispatch_tick().await {
                    error!(error = %e, "scheduler dispatch tick failed");
                    continue;
                }
                match engine.repository.load_running_campaigns().await {
                    Ok(campaigns) => {
                        for campaign in campaigns {
                            engine
                                .call_manager
                                .register_campaign(
                                    &campaign.id,
                                    campaign.max_concurrent_calls,
                                    campaign.calls_per_minute,
                                )
                                .await;
                            if let Err(e) = engine.scheduler.sweep_stale_in_progress(&campaign.id).await {
                                warn!(campaign_id = %campaign.id, error = %e, "stale sweep failed");
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "failed to reload running campaigns"),
                }
            }
        });
        *self.scheduler_task.lock() = Some(handle);

        info!("engine started");
        Ok(())
    }

    /// Graceful shutdown: stop dispatching, stop the scheduler loop, and
    /// de-register from the PBX. Idempotent (spec §8 invariant 10).
    pub async fn stop(&self) -> Result<()> {
        self.call_manager.stop_processing().await;
        if let Some(task) = self.scheduler_task.lock().take() {
            task.abort();
        }
        self.registrar
            .stop()
            .await
            .map_err(|e| EngineError::Registration { reason: e.to_string() })?;
        info!("engine stopped");
        Ok(())
    }

    /// Place a single ad-hoc call outside any campaign, for the CLI's
    /// `dial --to <e164> [--flow <id>]` (spec §6). Blocks until the call
    /// ends and returns its disposition.
    pub async fn dial_once(&self, to: &str, flow_id: Option<&str>) -> Result<CallDisposition> {
        let campaign = Arc::new(Campaign {
            id: "__adhoc__".to_string(),
            org_id: String::new(),
            ivr_flow_id: flow_id.unwrap_or("__adhoc__").to_string(),
            greeting_audio_id: None,
            voicemail_audio_id: None,
            dialing_mode: crate::model::DialingMode::Progressive,
            max_concurrent_calls: 1,
            calls_per_minute: None,
            max_retries: 0,
            retry_delay_minutes: 0,
            retry_on_no_answer: false,
            retry_on_busy: false,
            retry_on_failed: false,
            ring_timeout_seconds: 30,
            amd_enabled: self.config.amd.enabled,
            amd_action_on_human: AmdAction::ContinueFlow,
            amd_action_on_machine: AmdAction::ContinueFlow,
            calling_hours_start: chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            calling_hours_end: chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            respect_timezone: false,
            timezone: None,
            scheduled_start: None,
            scheduled_end: None,
            status: crate::model::CampaignStatus::Running,
        });

        let contact = CampaignContact {
            campaign_id: campaign.id.clone(),
            contact_id: uuid::Uuid::new_v4().to_string(),
            phone: to.to_string(),
            caller_id: self.config.sip.username.clone(),
            status: crate::model::ContactStatus::InProgress,
            attempts: 0,
            last_attempt_at: None,
            next_attempt_at: None,
            last_disposition: None,
            priority: 0,
        };

        let ivr_flow = match flow_id {
            Some(id) => Arc::new(self.repository.load_campaign_ivr(id).await?),
            None => Arc::new(IvrFlow {
                start_node: "n0".to_string(),
                nodes: HashMap::from([("n0".to_string(), crate::ivr::IvrNode::Hangup { goodbye_audio_id: None })]),
                edges: Vec::new(),
            }),
        };

        let dialog = Arc::new(self.initiator.build_dialog(&contact));
        let start_at = Utc::now();
        let (call_id, outcome) = self
            .initiator
            .place_call(Arc::clone(&campaign), contact.clone(), ivr_flow, dialog)
            .await;
        self.initiator
            .persist_outcome(&call_id, &campaign, &contact, start_at, &outcome)
            .await;
        Ok(outcome.disposition)
    }

    pub async fn status(&self) -> crate::call_manager::ManagerStatusSnapshot {
        self.call_manager.status().await
    }
}
