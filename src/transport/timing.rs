//! Header timestamps and RTT estimation.
//!
//! Each side stamps outgoing datagrams with its own millisecond clock and
//! echoes the latest stamp it received. When an echo of our stamp comes back,
//! `now - echo` is a round-trip sample (including the peer's hold time).

use std::time::{Duration, Instant};

/// RTT constants (RFC 6298).
pub mod constants {
    use std::time::Duration;

    /// Retransmission timeout before the first sample.
    pub const INITIAL_RTO: Duration = Duration::from_millis(1000);

    /// Lower bound for the retransmission timeout.
    pub const MIN_RTO: Duration = Duration::from_millis(100);

    /// Upper bound for the retransmission timeout.
    pub const MAX_RTO: Duration = Duration::from_millis(60000);

    /// SRTT gain (1/8).
    pub const SRTT_ALPHA: f64 = 0.125;

    /// RTTVAR gain (1/4).
    pub const RTTVAR_BETA: f64 = 0.25;

    /// Variance multiplier in the RTO formula.
    pub const RTO_K: f64 = 4.0;
}

/// Smoothed RTT and RTO per RFC 6298.
///
/// Only consumes samples; acting on the RTO is up to a reliability layer.
#[derive(Debug, Clone, Default)]
pub struct RttEstimator {
    /// (srtt, rttvar) in ms, once the first sample arrived.
    state: Option<(f64, f64)>,
    samples: u64,
}

impl RttEstimator {
    /// Create an estimator with no samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one RTT sample.
    pub fn observe(&mut self, sample: Duration) {
        let r = sample.as_secs_f64() * 1000.0;
        self.state = Some(match self.state {
            None => (r, r / 2.0),
            Some((srtt, rttvar)) => {
                let rttvar = (1.0 - constants::RTTVAR_BETA) * rttvar
                    + constants::RTTVAR_BETA * (srtt - r).abs();
                let srtt = (1.0 - constants::SRTT_ALPHA) * srtt + constants::SRTT_ALPHA * r;
                (srtt, rttvar)
            }
        });
        self.samples += 1;
    }

    /// Smoothed RTT, if any sample arrived.
    pub fn smoothed(&self) -> Option<Duration> {
        self.state.map(|(srtt, _)| Duration::from_secs_f64(srtt / 1000.0))
    }

    /// RTT variance, if any sample arrived.
    pub fn variance(&self) -> Option<Duration> {
        self.state.map(|(_, rttvar)| Duration::from_secs_f64(rttvar / 1000.0))
    }

    /// Retransmission timeout, clamped to `[MIN_RTO, MAX_RTO]`.
    pub fn rto(&self) -> Duration {
        let Some((srtt, rttvar)) = self.state else {
            return constants::INITIAL_RTO;
        };
        let rto_ms = srtt + constants::RTO_K * rttvar;
        Duration::from_secs_f64(rto_ms / 1000.0).clamp(constants::MIN_RTO, constants::MAX_RTO)
    }

    /// Number of samples observed.
    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}

/// Millisecond clock plus the peer stamp to echo back.
#[derive(Debug, Clone)]
pub struct EchoClock {
    start: Instant,
    peer_timestamp: u32,
}

impl Default for EchoClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoClock {
    /// Start a clock now.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Start a clock at `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            start,
            peer_timestamp: 0,
        }
    }

    /// Milliseconds since the clock started, plus one.
    ///
    /// The offset keeps live stamps distinct from 0, which means "no echo" on
    /// the wire. Wraps after ~49 days.
    pub fn now(&self) -> u32 {
        (self.start.elapsed().as_millis() as u32).wrapping_add(1)
    }

    /// Latest timestamp received from the peer.
    pub fn echo(&self) -> u32 {
        self.peer_timestamp
    }

    /// Record a received header's stamps.
    ///
    /// Returns an RTT sample when the header echoes one of our stamps.
    pub fn on_receive(&mut self, peer_timestamp: u32, echo_timestamp: u32) -> Option<Duration> {
        self.peer_timestamp = peer_timestamp;
        if echo_timestamp == 0 {
            return None;
        }
        let elapsed = self.now().wrapping_sub(echo_timestamp);
        // An echo from the future means a corrupt or foreign header.
        (elapsed < (1 << 31)).then(|| Duration::from_millis(u64::from(elapsed)))
    }
}
