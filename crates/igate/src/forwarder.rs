//! Forwarding loop: TNC frames in, APRS-IS lines out

use crate::normalize::{append_q_construct, rewrite_destination};
use crate::Result;
use igate_core::{Backoff, RelayClient, TncError, TncInterface};
use igate_proto::{ax25, DecodeError, FrameType, RawFrame};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Longest packet text shown in the console log
const DISPLAY_MAX_CHARS: usize = 120;

/// Bytes of an undecodable payload included in the warning
const HEX_PREVIEW_BYTES: usize = 32;

/// Forwarding settings
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Gateway callsign used for the q-construct
    pub callsign: String,

    /// Destination override for packets sourced by the gateway itself
    pub software_tocall: Option<String>,

    /// Stop after the first decoded packet
    pub once: bool,

    /// Longest wait for a frame before re-checking shutdown and reconnect
    pub read_interval: Duration,

    /// Interval between stats log lines
    pub stats_interval: Duration,
}

impl ForwarderConfig {
    pub fn new(callsign: &str) -> Self {
        Self {
            callsign: callsign.trim().to_string(),
            software_tocall: None,
            once: false,
            read_interval: Duration::from_secs(1),
            stats_interval: Duration::from_secs(60),
        }
    }
}

/// Running totals for the stats log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardingCounters {
    pub frames_seen: u64,
    pub relayed_ok: u64,
    pub relayed_failed: u64,
}

/// What happened to a single frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Not a data frame
    Skipped,
    /// Payload was not a usable AX.25 UI frame
    DecodeFailed(DecodeError),
    /// Decoded; no APRS-IS session to send on
    NotRelayed(String),
    /// Decoded and sent
    Relayed(String),
    /// Decoded; send failed and the session was dropped
    RelayFailed(String),
}

impl FrameOutcome {
    /// Whether the frame produced packet text
    pub fn is_decoded(&self) -> bool {
        matches!(
            self,
            FrameOutcome::NotRelayed(_) | FrameOutcome::Relayed(_) | FrameOutcome::RelayFailed(_)
        )
    }
}

/// Owns the APRS-IS session, its backoff and the counters
pub struct Forwarder {
    config: ForwarderConfig,
    relay: Option<RelayClient>,
    backoff: Backoff,
    counters: ForwardingCounters,
}

impl Forwarder {
    /// Create a forwarder; `relay` of `None` runs receive-only
    pub fn new(config: ForwarderConfig, relay: Option<RelayClient>) -> Self {
        Self {
            config,
            relay,
            backoff: Backoff::default(),
            counters: ForwardingCounters::default(),
        }
    }

    /// Replace the reconnect backoff
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn counters(&self) -> ForwardingCounters {
        self.counters
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn relay(&self) -> Option<&RelayClient> {
        self.relay.as_ref()
    }

    /// Connect to APRS-IS if relaying, disconnected, and the backoff allows
    pub async fn try_connect(&mut self) {
        let Some(relay) = self.relay.as_mut() else {
            return;
        };
        if relay.is_connected() || !self.backoff.ready(Instant::now()) {
            return;
        }

        match relay.connect().await {
            Ok(()) => self.backoff.record_success(),
            Err(e) => {
                // Measured from the failure, not the start of the attempt
                let delay = self.backoff.record_failure(Instant::now());
                if e.is_login_rejection() {
                    error!(
                        "APRS-IS rejected login: {}; check callsign and passcode (retrying in {}s)",
                        e,
                        delay.as_secs()
                    );
                } else {
                    warn!(
                        "APRS-IS connection failed: {} (retrying in {}s)",
                        e,
                        delay.as_secs()
                    );
                }
            }
        }
    }

    /// Apply the forwarding policy to one frame
    pub async fn handle_frame(&mut self, frame: RawFrame) -> FrameOutcome {
        self.counters.frames_seen += 1;

        if frame.frame_type != FrameType::Data {
            debug!(
                channel = frame.channel,
                frame_type = ?frame.frame_type,
                "Skipping non-data KISS frame"
            );
            return FrameOutcome::Skipped;
        }

        let packet = match ax25::decode(&frame.payload) {
            Ok(packet) => packet,
            Err(e) => {
                let preview = &frame.payload[..frame.payload.len().min(HEX_PREVIEW_BYTES)];
                warn!(
                    len = frame.payload.len(),
                    preview = %hex::encode(preview),
                    "Failed to decode AX.25 frame: {}",
                    e
                );
                return FrameOutcome::DecodeFailed(e);
            }
        };

        let text = packet.to_tnc2();
        info!(
            "{}",
            display_line(self.counters.frames_seen, frame.channel, &text)
        );

        let text = self.normalize(&text);
        self.relay_text(text).await
    }

    /// Destination rewrite then q-construct
    pub fn normalize(&self, text: &str) -> String {
        let rewritten = rewrite_destination(
            text,
            &self.config.callsign,
            self.config.software_tocall.as_deref(),
        );
        append_q_construct(&rewritten, &self.config.callsign)
    }

    async fn relay_text(&mut self, text: String) -> FrameOutcome {
        if self.relay.is_none() {
            return FrameOutcome::NotRelayed(text);
        }
        self.try_connect().await;

        let Some(relay) = self.relay.as_mut().filter(|r| r.is_connected()) else {
            return FrameOutcome::NotRelayed(text);
        };

        match relay.send_packet(&text).await {
            Ok(()) => {
                self.counters.relayed_ok += 1;
                debug!("Relayed to APRS-IS: {}", text);
                FrameOutcome::Relayed(text)
            }
            Err(e) => {
                self.counters.relayed_failed += 1;
                warn!("APRS-IS transmission error: {}; reconnecting", e);
                relay.close().await;
                self.backoff.reset();
                FrameOutcome::RelayFailed(text)
            }
        }
    }

    /// Read frames until shutdown, `once` completion, or TNC loss
    ///
    /// Both connections are closed before returning.
    pub async fn run<T>(&mut self, tnc: &mut T, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        T: TncInterface + ?Sized,
    {
        info!("Forwarding frames from {}", tnc.name());
        if self.relay.is_none() {
            info!("APRS-IS uplink disabled (receive-only mode)");
        }

        let result = self.read_loop(tnc, &mut shutdown).await;

        tnc.close().await;
        if let Some(relay) = self.relay.as_mut() {
            relay.close().await;
        }
        self.log_stats("summary");

        result
    }

    async fn read_loop<T>(
        &mut self,
        tnc: &mut T,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()>
    where
        T: TncInterface + ?Sized,
    {
        let read_interval = self.config.read_interval;
        let mut next_stats = Instant::now() + self.config.stats_interval;

        loop {
            if *shutdown.borrow() {
                info!("Stopping forwarder");
                return Ok(());
            }

            if until_shutdown(shutdown, self.try_connect()).await.is_none() {
                info!("Stopping forwarder during APRS-IS connect");
                return Ok(());
            }

            let Some(read) = until_shutdown(shutdown, timeout(read_interval, tnc.read_frame())).await
            else {
                info!("Stopping forwarder");
                return Ok(());
            };

            match read {
                Err(_elapsed) => {}
                Ok(Ok(frame)) => {
                    let Some(outcome) = until_shutdown(shutdown, self.handle_frame(frame)).await
                    else {
                        info!("Stopping forwarder while relaying");
                        return Ok(());
                    };
                    if self.config.once && outcome.is_decoded() {
                        info!("First packet handled, exiting");
                        return Ok(());
                    }
                }
                Ok(Err(TncError::Frame(e))) => {
                    warn!("Dropping malformed KISS frame: {}", e);
                }
                Ok(Err(e)) => {
                    error!("KISS connection error: {}", e);
                    return Err(e.into());
                }
            }

            let now = Instant::now();
            if now >= next_stats {
                self.log_stats("stats");
                next_stats = now + self.config.stats_interval;
            }
        }
    }

    fn log_stats(&self, label: &str) {
        info!(
            "[{}] frames={} aprs_ok={} aprs_fail={}",
            label,
            self.counters.frames_seen,
            self.counters.relayed_ok,
            self.counters.relayed_failed
        );
    }
}

/// Drive `work` to completion unless shutdown is requested first
///
/// Returns `None` when shutdown won; `work` is dropped at that point. A
/// dropped shutdown sender counts as a request.
async fn until_shutdown<F>(shutdown: &mut watch::Receiver<bool>, work: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::pin!(work);

    loop {
        let changed = tokio::select! {
            output = &mut work => return Some(output),
            changed = shutdown.changed() => changed,
        };
        if changed.is_err() || *shutdown.borrow() {
            return None;
        }
    }
}

/// Console form of a packet: `[NNNNNN] port=<ch> <text>`
pub fn display_line(count: u64, channel: u8, text: &str) -> String {
    format!("[{:06}] port={} {}", count, channel, truncate_for_display(text))
}

fn truncate_for_display(text: &str) -> String {
    if text.chars().count() <= DISPLAY_MAX_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(DISPLAY_MAX_CHARS - 3).collect();
    out.push('…');
    out
}
