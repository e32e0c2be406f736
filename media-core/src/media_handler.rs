//! Audio playback pacing and DTMF collection (component C7).
//!
//! Playback sends one encoded G.711 frame every 20 ms over the call's
//! [`RtpSession`] — the pacing loop is the only thing standing between a
//! WAV file and a correctly-timed RTP stream. DTMF digits arrive out of
//! band (RFC 2833 telephone-event packets, decoded upstream and pushed in
//! here; SIP INFO as a fallback for peers that don't negotiate 2833) and
//! are queued for [`MediaHandler::collect_dtmf`] to consume with the same
//! total/inter-digit timeout semantics the original dialer used.

use crate::codec::{Variant, SAMPLES_PER_FRAME};
use bytes::Bytes;
use dialer_rtp_core::RtpSession;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Playback lifecycle state, mirroring the original handler's states
/// minus the ones that only made sense for a native audio player (no
/// `paused`/`error` here — pacing either runs or it doesn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Completed,
    Interrupted,
}

/// Outcome of a [`MediaHandler::collect_dtmf`] call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DtmfCollectionResult {
    pub digits: String,
    pub timed_out: bool,
    pub max_reached: bool,
    pub terminated_by: Option<char>,
}

struct DtmfState {
    buffer: VecDeque<char>,
}

/// Per-call media playback and DTMF collection.
pub struct MediaHandler {
    rtp_session: Arc<RtpSession>,
    codec: Variant,
    dtmf: Mutex<DtmfState>,
    dtmf_notify: Notify,
}

impl MediaHandler {
    pub fn new(rtp_session: Arc<RtpSession>, codec: Variant) -> Self {
        Self {
            rtp_session,
            codec,
            dtmf: Mutex::new(DtmfState {
                buffer: VecDeque::new(),
            }),
            dtmf_notify: Notify::new(),
        }
    }

    /// Feed one detected DTMF digit, from either the RFC 2833
    /// telephone-event decoder or a SIP INFO body parser. Called from the
    /// dialog layer, not from within this crate.
    pub async fn push_dtmf_digit(&self, digit: char) {
        debug!(digit, "DTMF digit received");
        self.dtmf.lock().await.buffer.push_back(digit);
        self.dtmf_notify.notify_one();
    }

    pub async fn clear_dtmf_buffer(&self) {
        self.dtmf.lock().await.buffer.clear();
    }

    /// Play PCM audio as a sequence of 20 ms frames, pacing sends to real
    /// time via a fixed-interval ticker. If `allow_dtmf_interrupt` is
    /// set, playback stops early the moment a digit in `interrupt_digits`
    /// arrives, and that digit is returned.
    pub async fn play_pcm(
        &self,
        pcm: &[i16],
        allow_dtmf_interrupt: bool,
        interrupt_digits: &str,
    ) -> (PlaybackState, Option<char>) {
        if allow_dtmf_interrupt {
            self.clear_dtmf_buffer().await;
        }

        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let frames: Vec<&[i16]> = pcm.chunks(SAMPLES_PER_FRAME).collect();
        for (i, frame) in frames.iter().enumerate() {
            ticker.tick().await;

            if allow_dtmf_interrupt {
                let mut state = self.dtmf.lock().await;
                while let Some(digit) = state.buffer.pop_front() {
                    if interrupt_digits.contains(digit) {
                        return (PlaybackState::Interrupted, Some(digit));
                    }
                }
            }

            let mut padded = frame.to_vec();
            padded.resize(SAMPLES_PER_FRAME, 0);
            let encoded = self.codec.encode(&padded);
            let marker = i == 0;
            if let Err(e) = self
                .rtp_session
                .send_frame(self.codec.payload_type(), Bytes::from(encoded), marker)
                .await
            {
                debug!(error = %e, "RTP send failed during playback");
            }
        }

        (PlaybackState::Completed, None)
    }

    /// Collect up to `max_digits` DTMF digits, honoring a total timeout,
    /// a per-digit (inter-digit) timeout, an optional distinct timeout
    /// for the first digit, and early termination on any digit in
    /// `termination_digits`.
    pub async fn collect_dtmf(
        &self,
        max_digits: usize,
        timeout: Duration,
        inter_digit_timeout: Duration,
        termination_digits: &str,
        initial_timeout: Option<Duration>,
    ) -> DtmfCollectionResult {
        self.clear_dtmf_buffer().await;

        let start = Instant::now();
        let mut collected = String::new();
        let mut first_digit_received = false;
        let first_timeout = initial_timeout.unwrap_or(timeout);

        loop {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return DtmfCollectionResult {
                    digits: collected,
                    timed_out: true,
                    ..Default::default()
                };
            }

            let per_digit_deadline = if first_digit_received {
                inter_digit_timeout
            } else {
                first_timeout.saturating_sub(elapsed)
            };
            let wait_for = per_digit_deadline.min(timeout - elapsed);
            if wait_for.is_zero() {
                return DtmfCollectionResult {
                    digits: collected,
                    timed_out: true,
                    ..Default::default()
                };
            }

            let notified = self.dtmf_notify.notified();
            if tokio::time::timeout(wait_for, notified).await.is_err() {
                return DtmfCollectionResult {
                    digits: collected,
                    timed_out: true,
                    ..Default::default()
                };
            }

            let mut state = self.dtmf.lock().await;
            while let Some(digit) = state.buffer.pop_front() {
                first_digit_received = true;
                if termination_digits.contains(digit) {
                    return DtmfCollectionResult {
                        digits: collected,
                        timed_out: false,
                        max_reached: false,
                        terminated_by: Some(digit),
                    };
                }
                collected.push(digit);
                if collected.chars().count() >= max_digits {
                    return DtmfCollectionResult {
                        digits: collected,
                        timed_out: false,
                        max_reached: true,
                        terminated_by: None,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    async fn handler() -> MediaHandler {
        let session = RtpSession::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 44000, 44010)
            .await
            .unwrap();
        MediaHandler::new(Arc::new(session), Variant::Mulaw)
    }

    #[tokio::test]
    async fn collect_dtmf_times_out_with_no_digits() {
        let h = handler().await;
        let result = h
            .collect_dtmf(
                4,
                Duration::from_millis(50),
                Duration::from_millis(50),
                "#",
                None,
            )
            .await;
        assert!(result.timed_out);
        assert!(result.digits.is_empty());
    }

    #[tokio::test]
    async fn collect_dtmf_returns_on_termination_digit() {
        let h = Arc::new(handler().await);
        tokio::spawn({
            let h = Arc::clone(&h);
            async move {
                h.push_dtmf_digit('1').await;
                h.push_dtmf_digit('2').await;
                h.push_dtmf_digit('#').await;
            }
        });
        // Give the spawned task a moment to deliver digits before we wait.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = h
            .collect_dtmf(
                4,
                Duration::from_secs(2),
                Duration::from_secs(2),
                "#",
                None,
            )
            .await;
        assert_eq!(result.digits, "12");
        assert_eq!(result.terminated_by, Some('#'));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn collect_dtmf_stops_at_max_digits() {
        let h = handler().await;
        h.push_dtmf_digit('1').await;
        h.push_dtmf_digit('2').await;
        let result = h
            .collect_dtmf(
                2,
                Duration::from_secs(2),
                Duration::from_secs(2),
                "#",
                None,
            )
            .await;
        assert_eq!(result.digits, "12");
        assert!(result.max_reached);
    }
}
