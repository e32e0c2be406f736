//! Typed engine configuration (spec §6), loaded from a TOML file rather
//! than read out of environment variables. Every sub-struct has a
//! `Default` so a near-empty config file is enough to start the engine
//! against a local PBX on the loopback interface.

use dialer_media_core::AmdThresholds;
use serde::Deserialize;
use std::path::Path;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SipTransportKind {
    Udp,
    Tcp,
    Tls,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SrtpMode {
    Disabled,
    Optional,
    Mandatory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SipConfig {
    pub server: String,
    #[serde(default = "default_sip_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_transport")]
    pub transport: SipTransportKind,
    #[serde(default = "default_register_expires")]
    pub register_expires: u32,
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
    #[serde(default = "default_srtp_mode")]
    pub srtp_mode: SrtpMode,
    #[serde(default = "default_codecs")]
    pub codecs: Vec<u8>,
}

fn default_sip_port() -> u16 {
    5060
}
fn default_transport() -> SipTransportKind {
    SipTransportKind::Udp
}
fn default_register_expires() -> u32 {
    300
}
fn default_keepalive_interval() -> u64 {
    30
}
fn default_srtp_mode() -> SrtpMode {
    SrtpMode::Disabled
}
/// Default PT preference order — the original hard-codes `[0, 8, 9]`.
fn default_codecs() -> Vec<u8> {
    vec![0, 8, 9]
}

#[derive(Debug, Clone, Deserialize)]
pub struct RtpConfig {
    #[serde(default = "default_rtp_port_start")]
    pub port_start: u16,
    #[serde(default = "default_rtp_port_end")]
    pub port_end: u16,
}

fn default_rtp_port_start() -> u16 {
    20000
}
fn default_rtp_port_end() -> u16 {
    20999
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            port_start: default_rtp_port_start(),
            port_end: default_rtp_port_end(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallManagerConfig {
    #[serde(default = "default_global_max_concurrent")]
    pub global_max_concurrent: u32,
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
}

fn default_global_max_concurrent() -> u32 {
    50
}
fn default_dispatch_interval_ms() -> u64 {
    100
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            global_max_concurrent: default_global_max_concurrent(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AmdConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_amd_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub thresholds: AmdThresholdsConfig,
}

fn default_amd_timeout_seconds() -> u64 {
    5
}

/// Mirrors [`AmdThresholds`] field-for-field so a config file can
/// override any subset; `Default` falls back to the original's
/// hard-coded constants (spec §4.6, §9 open question).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AmdThresholdsConfig {
    pub energy_min: f64,
    pub voice_high: f64,
    pub voice_low: f64,
    pub beep_peak_ratio: f64,
    pub beep_band_low_hz: f64,
    pub beep_band_high_hz: f64,
    pub machine_speaking_ratio: f64,
    pub machine_min_duration_secs: f64,
    pub human_speaking_ratio: f64,
    pub human_max_duration_secs: f64,
}

impl Default for AmdThresholdsConfig {
    fn default() -> Self {
        let d = AmdThresholds::default();
        Self {
            energy_min: d.energy_min,
            voice_high: d.voice_high,
            voice_low: d.voice_low,
            beep_peak_ratio: d.beep_peak_ratio,
            beep_band_low_hz: d.beep_band_low_hz,
            beep_band_high_hz: d.beep_band_high_hz,
            machine_speaking_ratio: d.machine_speaking_ratio,
            machine_min_duration_secs: d.machine_min_duration_secs,
            human_speaking_ratio: d.human_speaking_ratio,
            human_max_duration_secs: d.human_max_duration_secs,
        }
    }
}

impl From<AmdThresholdsConfig> for AmdThresholds {
    fn from(c: AmdThresholdsConfig) -> Self {
        AmdThresholds {
            energy_min: c.energy_min,
            voice_high: c.voice_high,
            voice_low: c.voice_low,
            beep_peak_ratio: c.beep_peak_ratio,
            beep_band_low_hz: c.beep_band_low_hz,
            beep_band_high_hz: c.beep_band_high_hz,
            machine_speaking_ratio: c.machine_speaking_ratio,
            machine_min_duration_secs: c.machine_min_duration_secs,
            human_speaking_ratio: c.human_speaking_ratio,
            human_max_duration_secs: c.human_max_duration_secs,
        }
    }
}

/// Engine-wide IVR defaults. Declaration-only: every flow node already
/// carries its own `timeout`/`max_retries` in its wire data (`ivr.rs`'s
/// `parse_node`, falling back to its own per-node-type constants when a
/// node omits them), so these never reach the executor. Kept and parsed
/// for forward-compat with flows authored before those per-node
/// defaults existed; see DESIGN.md.
#[derive(Debug, Clone, Deserialize)]
pub struct IvrConfig {
    #[serde(default = "default_max_menu_retries")]
    pub max_menu_retries: u32,
    #[serde(default = "default_dtmf_timeout")]
    pub default_dtmf_timeout: f64,
    #[serde(default = "default_inter_digit_timeout")]
    pub inter_digit_timeout: f64,
}

fn default_max_menu_retries() -> u32 {
    3
}
fn default_dtmf_timeout() -> f64 {
    5.0
}
fn default_inter_digit_timeout() -> f64 {
    3.0
}

impl Default for IvrConfig {
    fn default() -> Self {
        Self {
            max_menu_retries: default_max_menu_retries(),
            default_dtmf_timeout: default_dtmf_timeout(),
            inter_digit_timeout: default_inter_digit_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stale_grace_minutes")]
    pub stale_in_progress_grace_minutes: i64,
}

fn default_poll_interval() -> u64 {
    1
}
fn default_stale_grace_minutes() -> i64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            stale_in_progress_grace_minutes: default_stale_grace_minutes(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub sip: SipConfig,
    #[serde(default)]
    pub rtp: RtpConfig,
    #[serde(default)]
    pub call_manager: CallManagerConfig,
    #[serde(default)]
    pub amd: AmdConfig,
    #[serde(default)]
    pub ivr: IvrConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::Configuration(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Configuration(format!(
                "reading {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml_str(&contents)
    }
}
