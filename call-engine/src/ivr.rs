//! IVR flow graph and executor (component C8).
//!
//! A direct port of `ivr_executor.py`'s node-by-node walk: typed nodes
//! instead of duck-typed dicts (spec §9 redesign note — "encode as a
//! tagged variant with per-type required fields validated once at
//! publish"), but the same decision logic per node type, the same
//! default-edge fallback, and the same fail-closed behavior on a
//! missing/unknown node.

use async_trait::async_trait;
use dialer_media_core::DtmfCollectionResult;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The media operations an IVR executor needs from a live call. Kept
/// narrow and trait-object-friendly so the executor doesn't depend on
/// concrete dialog/media types — tests drive it with a stub.
#[async_trait]
pub trait IvrMedia: Send + Sync {
    /// Play `audio_path` to completion, or until a digit in
    /// `interrupt_digits` arrives if `allow_dtmf_interrupt` is set.
    /// Returns the interrupting digit, if any.
    async fn play_audio(
        &self,
        audio_path: &str,
        allow_dtmf_interrupt: bool,
        interrupt_digits: &str,
    ) -> Option<char>;

    async fn collect_dtmf(
        &self,
        max_digits: usize,
        timeout: Duration,
        inter_digit_timeout: Duration,
        termination_digits: &str,
        initial_timeout: Option<Duration>,
    ) -> DtmfCollectionResult;

    /// Tear down the call (BYE). Idempotent.
    async fn hangup(&self);
}

/// Maps an opaque audio blob id to a locally-accessible, pre-encoded
/// file path. The core never transcodes (spec §3 "Audio file reference").
pub trait AudioResolver: Send + Sync {
    fn resolve(&self, audio_file_id: &str) -> String;
}

/// Identity resolver for tests and for repositories that already hand
/// back filesystem paths as the id.
pub struct IdentityAudioResolver;

impl AudioResolver for IdentityAudioResolver {
    fn resolve(&self, audio_file_id: &str) -> String {
        audio_file_id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalOperator {
    Equals,
    NotEquals,
    Contains,
    Exists,
    Empty,
}

/// A single IVR node, already validated into its typed shape. `Invalid`
/// stands in for a node whose declared type is unrecognized or whose
/// required `data` fields didn't parse — the executor logs and falls
/// through to the default edge for both (spec §4.8, §7 IVR errors).
#[derive(Debug, Clone)]
pub enum IvrNode {
    Start,
    PlayAudio {
        audio_file_id: String,
        wait_for_dtmf: bool,
        options: HashMap<String, String>,
    },
    Menu {
        prompt_audio_id: Option<String>,
        timeout: Duration,
        max_retries: u32,
        options: HashMap<String, String>,
        invalid_node: Option<String>,
        timeout_node: Option<String>,
    },
    SurveyQuestion {
        question_id: String,
        prompt_audio_id: Option<String>,
        valid_inputs: Vec<String>,
        timeout: Duration,
        max_retries: u32,
    },
    Conditional {
        variable: String,
        operator: ConditionalOperator,
        value: String,
        true_node: String,
        false_node: Option<String>,
    },
    SetVariable {
        variable: String,
        value: String,
    },
    Hangup {
        goodbye_audio_id: Option<String>,
    },
    Transfer {
        transfer_to: String,
    },
    Record,
    OptOut {
        reason: Option<String>,
        confirmation_audio_id: Option<String>,
        hangup_after: bool,
    },
    Invalid {
        reason: String,
    },
}

/// Wire-format IVR flow (spec §6): a flat node list plus a flat edge
/// list, both keyed by string id.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEdge {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFlow {
    pub start_node: String,
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
}

/// The validated, in-memory flow the executor walks.
#[derive(Debug, Clone)]
pub struct IvrFlow {
    pub start_node: String,
    pub nodes: HashMap<String, IvrNode>,
    /// Preserves declaration order so "first outgoing edge" (the
    /// default-next rule) is well-defined even when a node has more
    /// than one edge.
    pub edges: Vec<RawEdge>,
}

fn opt_str(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key).and_then(|x| x.as_str()).map(str::to_string)
}

fn req_str(v: &serde_json::Value, key: &str) -> Result<String, String> {
    opt_str(v, key).ok_or_else(|| format!("missing required field `{key}`"))
}

fn duration_secs(v: &serde_json::Value, key: &str, default_secs: f64) -> Duration {
    let secs = v.get(key).and_then(serde_json::Value::as_f64).unwrap_or(default_secs);
    Duration::from_secs_f64(secs.max(0.0))
}

fn string_map(v: &serde_json::Value, key: &str) -> HashMap<String, String> {
    v.get(key)
        .and_then(serde_json::Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, val)| val.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

impl IvrFlow {
    /// Build a validated flow from the wire format, turning any node
    /// whose data doesn't satisfy its type's required fields into
    /// [`IvrNode::Invalid`] rather than failing the whole flow (spec
    /// §3 IVRFlow invariant: "validator runs at publish; executor
    /// treats violations as fail-closed ends").
    pub fn from_raw(raw: RawFlow) -> Self {
        let nodes = raw
            .nodes
            .into_iter()
            .map(|n| {
                let parsed = parse_node(&n.node_type, &n.data);
                (n.id, parsed.unwrap_or_else(IvrNode::Invalid))
            })
            .collect();
        Self {
            start_node: raw.start_node,
            nodes,
            edges: raw.edges,
        }
    }

    /// First outgoing edge from `node_id`, if any (spec §4.8 "default
    /// next edge is the first outgoing edge").
    pub fn default_next(&self, node_id: &str) -> Option<String> {
        self.edges
            .iter()
            .find(|e| e.source == node_id)
            .map(|e| e.target.clone())
    }
}

fn parse_node(node_type: &str, data: &serde_json::Value) -> Result<IvrNode, IvrNode> {
    let node = match node_type.to_lowercase().as_str() {
        "start" => IvrNode::Start,
        "play_audio" => IvrNode::PlayAudio {
            audio_file_id: req_str(data, "audio_file_id").map_err(IvrNode::Invalid)?,
            wait_for_dtmf: data
                .get("wait_for_dtmf")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            options: string_map(data, "options"),
        },
        "menu" => IvrNode::Menu {
            prompt_audio_id: opt_str(data, "prompt_audio_id"),
            timeout: duration_secs(data, "timeout", 5.0),
            max_retries: data
                .get("max_retries")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(3) as u32,
            options: string_map(data, "options"),
            invalid_node: opt_str(data, "invalid_node"),
            timeout_node: opt_str(data, "timeout_node"),
        },
        "survey_question" => IvrNode::SurveyQuestion {
            question_id: opt_str(data, "question_id").unwrap_or_default(),
            prompt_audio_id: opt_str(data, "prompt_audio_id"),
            valid_inputs: data
                .get("valid_inputs")
                .and_then(serde_json::Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_else(|| {
                    ["1", "2", "3", "4", "5"].iter().map(|s| s.to_string()).collect()
                }),
            timeout: duration_secs(data, "timeout", 10.0),
            max_retries: data
                .get("max_retries")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(2) as u32,
        },
        "conditional" => {
            let operator = match opt_str(data, "operator").as_deref() {
                Some("not_equals") => ConditionalOperator::NotEquals,
                Some("contains") => ConditionalOperator::Contains,
                Some("exists") => ConditionalOperator::Exists,
                Some("empty") => ConditionalOperator::Empty,
                _ => ConditionalOperator::Equals,
            };
            IvrNode::Conditional {
                variable: req_str(data, "variable").map_err(IvrNode::Invalid)?,
                operator,
                value: opt_str(data, "value").unwrap_or_default(),
                true_node: req_str(data, "true_node").map_err(IvrNode::Invalid)?,
                false_node: opt_str(data, "false_node"),
            }
        }
        "set_variable" => IvrNode::SetVariable {
            variable: req_str(data, "variable").map_err(IvrNode::Invalid)?,
            value: opt_str(data, "value").unwrap_or_default(),
        },
        "hangup" => IvrNode::Hangup {
            goodbye_audio_id: opt_str(data, "goodbye_audio_id"),
        },
        "transfer" => IvrNode::Transfer {
            transfer_to: opt_str(data, "transfer_to").unwrap_or_default(),
        },
        "record" => IvrNode::Record,
        "opt_out" => IvrNode::OptOut {
            reason: opt_str(data, "reason"),
            confirmation_audio_id: opt_str(data, "confirmation_audio_id"),
            hangup_after: data
                .get("hangup_after")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(true),
        },
        other => return Err(IvrNode::Invalid {
            reason: format!("unknown node type `{other}`"),
        }),
    };
    Ok(node)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvrExecutionState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct IvrContext {
    pub call_id: String,
    pub contact_id: Option<String>,
    pub campaign_id: Option<String>,
    pub phone_number: Option<String>,
    pub organization_id: Option<String>,
    pub variables: HashMap<String, String>,
    pub survey_responses: HashMap<String, String>,
    pub dtmf_inputs: Vec<String>,
    pub current_node_id: Option<String>,
    pub opted_out: bool,
}

impl IvrContext {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct IvrResult {
    pub state: IvrExecutionState,
    pub completed_normally: bool,
    pub survey_responses: HashMap<String, String>,
    pub dtmf_inputs: Vec<String>,
    pub variables: HashMap<String, String>,
    pub duration: Duration,
    pub last_node_id: Option<String>,
    pub opted_out: bool,
}

/// A handle the owner of a call can use to cancel an in-flight IVR
/// execution; checked between nodes and is the only coordination point
/// between the call's cancel signal and the executor (spec §5).
#[derive(Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct IvrExecutor {
    media: Arc<dyn IvrMedia>,
    audio_resolver: Arc<dyn AudioResolver>,
    cancel: CancelSignal,
}

impl IvrExecutor {
    pub fn new(media: Arc<dyn IvrMedia>, audio_resolver: Arc<dyn AudioResolver>) -> Self {
        Self {
            media,
            audio_resolver,
            cancel: CancelSignal::new(),
        }
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub async fn execute_flow(&self, flow: &IvrFlow, mut context: IvrContext) -> IvrResult {
        let start_time = Instant::now();
        info!(call_id = %context.call_id, "starting IVR execution");

        let mut current = Some(flow.start_node.clone());
        let mut completed_normally = true;

        while let Some(node_id) = current {
            if self.cancel.is_cancelled() {
                completed_normally = false;
                context.current_node_id = Some(node_id);
                break;
            }
            context.current_node_id = Some(node_id.clone());

            let Some(node) = flow.nodes.get(&node_id) else {
                warn!(node_id, "IVR node not found, ending flow");
                completed_normally = false;
                break;
            };
            debug!(node_id, "processing IVR node");

            let next = self.process_node(flow, &node_id, node, &mut context).await;
            if next.is_none() && matches!(node, IvrNode::Invalid { .. }) {
                // Unknown node type or missing required data with no
                // default edge to fall back on (spec §4.8 fail-closed end).
                completed_normally = false;
            }
            current = next;
        }

        let state = if self.cancel.is_cancelled() {
            IvrExecutionState::Cancelled
        } else {
            IvrExecutionState::Completed
        };

        IvrResult {
            state,
            completed_normally,
            survey_responses: context.survey_responses,
            dtmf_inputs: context.dtmf_inputs,
            variables: context.variables,
            duration: start_time.elapsed(),
            last_node_id: context.current_node_id,
            opted_out: context.opted_out,
        }
    }

    async fn process_node(
        &self,
        flow: &IvrFlow,
        node_id: &str,
        node: &IvrNode,
        context: &mut IvrContext,
    ) -> Option<String> {
        match node {
            IvrNode::Start => flow.default_next(node_id),
            IvrNode::PlayAudio {
                audio_file_id,
                wait_for_dtmf,
                options,
            } => {
                let path = self.audio_resolver.resolve(audio_file_id);
                let interrupt_digits: String = options.keys().cloned().collect();
                if *wait_for_dtmf {
                    if let Some(digit) = self.media.play_audio(&path, true, &interrupt_digits).await {
                        context.dtmf_inputs.push(digit.to_string());
                        if let Some(target) = options.get(&digit.to_string()) {
                            return Some(target.clone());
                        }
                    }
                } else {
                    self.media.play_audio(&path, false, "").await;
                }
                flow.default_next(node_id)
            }
            IvrNode::Menu {
                prompt_audio_id,
                timeout,
                max_retries,
                options,
                invalid_node,
                timeout_node,
            } => {
                let interrupt_digits: String = options.keys().cloned().collect();
                for attempt in 0..(*max_retries).max(1) {
                    if let Some(audio_id) = prompt_audio_id {
                        let path = self.audio_resolver.resolve(audio_id);
                        if let Some(digit) = self.media.play_audio(&path, true, &interrupt_digits).await {
                            context.dtmf_inputs.push(digit.to_string());
                            if let Some(target) = options.get(&digit.to_string()) {
                                return Some(target.clone());
                            }
                        }
                    }

                    let result = self
                        .media
                        .collect_dtmf(1, *timeout, *timeout, "", None)
                        .await;

                    if result.timed_out {
                        if attempt + 1 == *max_retries {
                            return timeout_node.clone().or_else(|| flow.default_next(node_id));
                        }
                        continue;
                    }

                    if let Some(digit) = result.digits.chars().next() {
                        context.dtmf_inputs.push(digit.to_string());
                        if let Some(target) = options.get(&digit.to_string()) {
                            return Some(target.clone());
                        } else if invalid_node.is_some() {
                            return invalid_node.clone();
                        }
                    }
                }
                timeout_node.clone().or_else(|| flow.default_next(node_id))
            }
            IvrNode::SurveyQuestion {
                question_id,
                prompt_audio_id,
                valid_inputs,
                timeout,
                max_retries,
            } => {
                let qid = if question_id.is_empty() {
                    node_id.to_string()
                } else {
                    question_id.clone()
                };
                for _ in 0..(*max_retries).max(1) {
                    if let Some(audio_id) = prompt_audio_id {
                        let path = self.audio_resolver.resolve(audio_id);
                        let joined: String = valid_inputs.concat();
                        if let Some(digit) = self.media.play_audio(&path, true, &joined).await {
                            let s = digit.to_string();
                            if valid_inputs.contains(&s) {
                                context.dtmf_inputs.push(s.clone());
                                context.survey_responses.insert(qid.clone(), s);
                                return flow.default_next(node_id);
                            }
                        }
                    }

                    let result = self
                        .media
                        .collect_dtmf(1, *timeout, *timeout, "", None)
                        .await;

                    if !result.digits.is_empty() && valid_inputs.contains(&result.digits) {
                        context.dtmf_inputs.push(result.digits.clone());
                        context.survey_responses.insert(qid.clone(), result.digits);
                        return flow.default_next(node_id);
                    }
                }
                context.survey_responses.insert(qid, String::new());
                flow.default_next(node_id)
            }
            IvrNode::Conditional {
                variable,
                operator,
                value,
                true_node,
                false_node,
            } => {
                let var_value = context.variables.get(variable);
                let result = match operator {
                    ConditionalOperator::Equals => var_value.map(String::as_str) == Some(value.as_str()),
                    ConditionalOperator::NotEquals => var_value.map(String::as_str) != Some(value.as_str()),
                    ConditionalOperator::Contains => var_value.is_some_and(|v| v.contains(value.as_str())),
                    ConditionalOperator::Exists => var_value.is_some(),
                    ConditionalOperator::Empty => var_value.map_or(true, |v| v.is_empty()),
                };
                if result {
                    Some(true_node.clone())
                } else {
                    false_node.clone().or_else(|| flow.default_next(node_id))
                }
            }
            IvrNode::SetVariable { variable, value } => {
                context.variables.insert(variable.clone(), value.clone());
                flow.default_next(node_id)
            }
            IvrNode::Hangup { goodbye_audio_id } => {
                if let Some(audio_id) = goodbye_audio_id {
                    let path = self.audio_resolver.resolve(audio_id);
                    self.media.play_audio(&path, false, "").await;
                }
                self.media.hangup().await;
                None
            }
            IvrNode::Transfer { transfer_to } => {
                warn!(transfer_to, "TRANSFER requested but not supported in direct SIP mode");
                flow.default_next(node_id)
            }
            IvrNode::Record => {
                warn!("RECORD requested but not implemented");
                flow.default_next(node_id)
            }
            IvrNode::OptOut {
                reason,
                confirmation_audio_id,
                hangup_after,
            } => {
                context.opted_out = true;
                context.variables.insert(
                    "opt_out_reason".to_string(),
                    reason.clone().unwrap_or_else(|| "user_request".to_string()),
                );
                info!(call_id = %context.call_id, "caller opted out");

                if let Some(audio_id) = confirmation_audio_id {
                    let path = self.audio_resolver.resolve(audio_id);
                    self.media.play_audio(&path, false, "").await;
                }

                if *hangup_after {
                    self.media.hangup().await;
                    None
                } else {
                    flow.default_next(node_id)
                }
            }
            IvrNode::Invalid { reason } => {
                warn!(node_id, reason, "IVR node invalid, following default edge");
                flow.default_next(node_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct StubMedia {
        dtmf_script: Mutex<Vec<DtmfCollectionResult>>,
        hung_up: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl IvrMedia for StubMedia {
        async fn play_audio(&self, _path: &str, _allow: bool, _digits: &str) -> Option<char> {
            None
        }

        async fn collect_dtmf(
            &self,
            _max_digits: usize,
            _timeout: Duration,
            _inter_digit_timeout: Duration,
            _termination_digits: &str,
            _initial_timeout: Option<Duration>,
        ) -> DtmfCollectionResult {
            self.dtmf_script
                .lock()
                .await
                .pop()
                .unwrap_or(DtmfCollectionResult {
                    timed_out: true,
                    ..Default::default()
                })
        }

        async fn hangup(&self) {
            self.hung_up.store(true, Ordering::SeqCst);
        }
    }

    fn menu_flow() -> IvrFlow {
        let raw = RawFlow {
            start_node: "n0".into(),
            nodes: vec![
                RawNode {
                    id: "n0".into(),
                    node_type: "play_audio".into(),
                    data: serde_json::json!({"audio_file_id": "greeting.wav"}),
                },
                RawNode {
                    id: "n1".into(),
                    node_type: "menu".into(),
                    data: serde_json::json!({
                        "prompt_audio_id": "prompt.wav",
                        "timeout": 3.0,
                        "max_retries": 2,
                        "options": {"1": "n2", "2": "n3"},
                        "timeout_node": "n4"
                    }),
                },
                RawNode {
                    id: "n2".into(),
                    node_type: "hangup".into(),
                    data: serde_json::json!({}),
                },
                RawNode {
                    id: "n3".into(),
                    node_type: "hangup".into(),
                    data: serde_json::json!({}),
                },
                RawNode {
                    id: "n4".into(),
                    node_type: "hangup".into(),
                    data: serde_json::json!({}),
                },
            ],
            edges: vec![
                RawEdge { source: "n0".into(), target: "n1".into() },
            ],
        };
        IvrFlow::from_raw(raw)
    }

    #[tokio::test]
    async fn menu_routes_on_digit_press() {
        let flow = menu_flow();
        let media = Arc::new(StubMedia {
            dtmf_script: Mutex::new(vec![DtmfCollectionResult {
                digits: "2".into(),
                timed_out: false,
                max_reached: false,
                terminated_by: None,
            }]),
            hung_up: std::sync::atomic::AtomicBool::new(false),
        });
        let executor = IvrExecutor::new(media.clone(), Arc::new(IdentityAudioResolver));
        let result = executor
            .execute_flow(&flow, IvrContext::new("call-1"))
            .await;

        assert_eq!(result.dtmf_inputs, vec!["2".to_string()]);
        assert_eq!(result.last_node_id.as_deref(), Some("n3"));
        assert!(!result.opted_out);
        assert!(media.hung_up.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn menu_exhausts_retries_to_timeout_node() {
        let flow = menu_flow();
        let media = Arc::new(StubMedia {
            dtmf_script: Mutex::new(Vec::new()),
            hung_up: std::sync::atomic::AtomicBool::new(false),
        });
        let executor = IvrExecutor::new(media, Arc::new(IdentityAudioResolver));
        let result = executor
            .execute_flow(&flow, IvrContext::new("call-2"))
            .await;
        assert_eq!(result.last_node_id.as_deref(), Some("n4"));
    }

    #[tokio::test]
    async fn unknown_node_type_is_invalid_and_follows_default_edge() {
        let raw = RawFlow {
            start_node: "n0".into(),
            nodes: vec![
                RawNode {
                    id: "n0".into(),
                    node_type: "frobnicate".into(),
                    data: serde_json::json!({}),
                },
                RawNode {
                    id: "n1".into(),
                    node_type: "hangup".into(),
                    data: serde_json::json!({}),
                },
            ],
            edges: vec![RawEdge { source: "n0".into(), target: "n1".into() }],
        };
        let flow = IvrFlow::from_raw(raw);
        assert!(matches!(flow.nodes["n0"], IvrNode::Invalid { .. }));

        let media = Arc::new(StubMedia {
            dtmf_script: Mutex::new(Vec::new()),
            hung_up: std::sync::atomic::AtomicBool::new(false),
        });
        let executor = IvrExecutor::new(media, Arc::new(IdentityAudioResolver));
        let result = executor
            .execute_flow(&flow, IvrContext::new("call-3"))
            .await;
        assert_eq!(result.last_node_id.as_deref(), Some("n1"));
        assert!(result.completed_normally);
    }

    #[tokio::test]
    async fn invalid_node_with_no_default_edge_ends_fail_closed() {
        let raw = RawFlow {
            start_node: "n0".into(),
            nodes: vec![RawNode {
                id: "n0".into(),
                node_type: "frobnicate".into(),
                data: serde_json::json!({}),
            }],
            edges: vec![],
        };
        let flow = IvrFlow::from_raw(raw);
        assert!(matches!(flow.nodes["n0"], IvrNode::Invalid { .. }));

        let media = Arc::new(StubMedia {
            dtmf_script: Mutex::new(Vec::new()),
            hung_up: std::sync::atomic::AtomicBool::new(false),
        });
        let executor = IvrExecutor::new(media, Arc::new(IdentityAudioResolver));
        let result = executor
            .execute_flow(&flow, IvrContext::new("call-5"))
            .await;
        assert_eq!(result.last_node_id.as_deref(), Some("n0"));
        assert!(!result.completed_normally);
    }

    #[tokio::test]
    async fn opt_out_sets_flag_and_hangs_up() {
        let raw = RawFlow {
            start_node: "n0".into(),
            nodes: vec![RawNode {
                id: "n0".into(),
                node_type: "opt_out".into(),
                data: serde_json::json!({"reason": "asked"}),
            }],
            edges: vec![],
        };
        let flow = IvrFlow::from_raw(raw);
        let media = Arc::new(StubMedia {
            dtmf_script: Mutex::new(Vec::new()),
            hung_up: std::sync::atomic::AtomicBool::new(false),
        });
        let executor = IvrExecutor::new(media.clone(), Arc::new(IdentityAudioResolver));
        let result = executor
            .execute_flow(&flow, IvrContext::new("call-4"))
            .await;
        assert!(result.opted_out);
        assert!(media.hung_up.load(Ordering::SeqCst));
    }
}
