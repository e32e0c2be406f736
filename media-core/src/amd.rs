//! Answering-machine detection (component C6).
//!
//! Runs once per call, for up to `timeout` starting at answer, over PCM
//! pulled from the call's [`crate::jitter::JitterBuffer`]. The decision
//! tree and its thresholds are a direct port of the heuristics the
//! original dialer used in its `_analyze_audio_for_amd` routine, with the
//! magic numbers promoted to configuration.

use num_complex::Complex32;
use rustfft::FftPlanner;

const FRAME_SAMPLES: usize = 160;

/// Configurable thresholds for the AMD decision tree. Defaults match the
/// values the original heuristic hard-coded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmdThresholds {
    /// Below this RMS, the whole sample is treated as silence.
    pub energy_min: f64,
    /// Per-frame RMS above this is classified as voice.
    pub voice_high: f64,
    /// Per-frame RMS below this is classified as silence.
    pub voice_low: f64,
    /// Beep peak energy must be at least this many times the mean
    /// spectral energy to count as a detected beep.
    pub beep_peak_ratio: f64,
    /// Low end (Hz) of the sustained-tone beep-detection band.
    pub beep_band_low_hz: f64,
    /// High end (Hz) of the sustained-tone beep-detection band.
    pub beep_band_high_hz: f64,
    /// Speaking ratio and duration above which a long continuous
    /// greeting is classified `machine`.
    pub machine_speaking_ratio: f64,
    pub machine_min_duration_secs: f64,
    /// Speaking ratio and duration below which a short greeting with
    /// pauses is classified `human`.
    pub human_speaking_ratio: f64,
    pub human_max_duration_secs: f64,
}

impl Default for AmdThresholds {
    fn default() -> Self {
        Self {
            energy_min: 500.0,
            voice_high: 1000.0,
            voice_low: 1000.0,
            beep_peak_ratio: 10.0,
            beep_band_low_hz: 800.0,
            beep_band_high_hz: 2400.0,
            machine_speaking_ratio: 0.8,
            machine_min_duration_secs: 4.0,
            human_speaking_ratio: 0.7,
            human_max_duration_secs: 3.0,
        }
    }
}

/// The outcome of one AMD analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmdResult {
    Unknown,
    Human,
    Machine,
    Beep,
    Silence,
}

impl std::fmt::Display for AmdResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AmdResult::Unknown => "unknown",
            AmdResult::Human => "human",
            AmdResult::Machine => "machine",
            AmdResult::Beep => "beep",
            AmdResult::Silence => "silence",
        };
        f.write_str(s)
    }
}

fn rms(frame: &[i16]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / frame.len() as f64).sqrt()
}

/// Detect a sustained tone in `[low_hz, high_hz]` whose peak magnitude is
/// at least `peak_ratio` times the mean magnitude across the spectrum,
/// using up to one second of audio at 8 kHz.
fn detect_beep(samples: &[i16], clock_rate: u32, low_hz: f64, high_hz: f64, peak_ratio: f64) -> bool {
    if samples.len() < 1024 {
        return false;
    }
    let window = &samples[..samples.len().min(clock_rate as usize)];
    let mut buf: Vec<Complex32> = window.iter().map(|&s| Complex32::new(s as f32, 0.0)).collect();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(buf.len());
    fft.process(&mut buf);

    let n = buf.len();
    let bin_hz = clock_rate as f64 / n as f64;
    let half = n / 2;
    let magnitudes: Vec<f64> = buf[..half].iter().map(|c| c.norm() as f64).collect();
    if magnitudes.is_empty() {
        return false;
    }

    let total_mean = magnitudes.iter().sum::<f64>() / magnitudes.len() as f64;
    let band_peak = magnitudes
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let freq = *i as f64 * bin_hz;
            freq > low_hz && freq < high_hz
        })
        .map(|(_, &m)| m)
        .fold(0.0_f64, f64::max);

    total_mean > 0.0 && band_peak > total_mean * peak_ratio
}

/// Run the AMD decision tree over a window of collected PCM samples.
/// `duration_secs` is the wall-clock time the samples were collected
/// over, used by the speaking-ratio/duration rules.
pub fn analyze(samples: &[i16], duration_secs: f64, clock_rate: u32, thresholds: &AmdThresholds) -> AmdResult {
    if samples.is_empty() {
        return AmdResult::Silence;
    }

    let overall_energy = rms(samples);
    if overall_energy < thresholds.energy_min {
        return AmdResult::Silence;
    }

    let mut voice_frames = 0usize;
    let mut silence_frames = 0usize;
    for frame in samples.chunks(FRAME_SAMPLES) {
        if frame.len() < FRAME_SAMPLES {
            break;
        }
        let energy = rms(frame);
        if energy > thresholds.voice_high {
            voice_frames += 1;
        } else if energy < thresholds.voice_low {
            silence_frames += 1;
        }
    }
    let total_frames = voice_frames + silence_frames;
    if total_frames == 0 {
        return AmdResult::Silence;
    }
    let speaking_ratio = voice_frames as f64 / total_frames as f64;

    if detect_beep(
        samples,
        clock_rate,
        thresholds.beep_band_low_hz,
        thresholds.beep_band_high_hz,
        thresholds.beep_peak_ratio,
    ) {
        return AmdResult::Beep;
    }

    if speaking_ratio > thresholds.machine_speaking_ratio
        && duration_secs >= thresholds.machine_min_duration_secs
    {
        return AmdResult::Machine;
    }

    if speaking_ratio < thresholds.human_speaking_ratio
        && duration_secs < thresholds.human_max_duration_secs
    {
        return AmdResult::Human;
    }

    AmdResult::Human
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq_hz: f64, amplitude: i16, n: usize, clock_rate: u32) -> Vec<i16> {
        (0..n)
            .map(|i| {
                let t = i as f64 / clock_rate as f64;
                (amplitude as f64 * (2.0 * std::f64::consts::PI * freq_hz * t).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn empty_buffer_is_silence() {
        assert_eq!(
            analyze(&[], 0.0, 8000, &AmdThresholds::default()),
            AmdResult::Silence
        );
    }

    #[test]
    fn low_energy_noise_is_silence() {
        let samples = vec![1i16; 8000];
        assert_eq!(
            analyze(&samples, 5.0, 8000, &AmdThresholds::default()),
            AmdResult::Silence
        );
    }

    #[test]
    fn sustained_loud_tone_is_beep() {
        let samples = tone(1200.0, 20000, 8000, 8000);
        assert_eq!(
            analyze(&samples, 5.0, 8000, &AmdThresholds::default()),
            AmdResult::Beep
        );
    }

    #[test]
    fn long_continuous_voice_is_machine() {
        let mut samples = tone(300.0, 4000, 48000, 8000);
        samples.extend(std::iter::repeat(0i16).take(8000));
        let result = analyze(&samples, 6.0, 8000, &AmdThresholds::default());
        assert_eq!(result, AmdResult::Machine);
    }

    #[test]
    fn short_greeting_with_pauses_is_human() {
        let mut samples = Vec::new();
        for _ in 0..5 {
            samples.extend(tone(300.0, 4000, 800, 8000));
            samples.extend(std::iter::repeat(0i16).take(1600));
        }
        let result = analyze(&samples, 2.0, 8000, &AmdThresholds::default());
        assert_eq!(result, AmdResult::Human);
    }
}
