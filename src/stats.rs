use serde::Serialize;
use std::time::{Duration, Instant};

/// Byte counters plus first/last activity timestamps for one direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrafficStats {
    pub first: Option<Instant>,
    pub last: Option<Instant>,
    pub bytes: u64,
}

impl TrafficStats {
    pub(crate) fn update(&mut self, now: Instant, len: usize) {
        if self.first.is_none() {
            self.first = Some(now);
        }
        self.last = Some(now);
        self.bytes += len as u64;
    }

    /// Time between the first and the last packet seen.
    pub fn duration(&self) -> Duration {
        match (self.first, self.last) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::from_secs(0),
        }
    }

    pub fn bitrate(&self) -> f64 {
        let dur = self.duration().as_secs_f64();
        if dur > 0.0 {
            8.0 * self.bytes as f64 / dur
        } else {
            0.0
        }
    }
}

/// Event counters kept over the lifetime of a session.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct FlowCounters {
    pub n_sdp_recv: u64,
    pub n_cand_recv: u64,
    pub n_srtp_dropped: u64,
    pub n_srtp_error: u64,
    pub dtls_pkt_sent: u64,
    pub dtls_pkt_recv: u64,
}

/// How long each establishment milestone took, measured from the request
/// that started it. `None` until the milestone is reached.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct Milestones {
    pub turn_alloc: Option<Duration>,
    pub nat_estab: Option<Duration>,
    pub dtls_estab: Option<Duration>,
    pub dce_estab: Option<Duration>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MediaflowStats {
    pub tx: TrafficStats,
    pub rx: TrafficStats,
    pub counters: FlowCounters,
    pub milestones: Milestones,
}
