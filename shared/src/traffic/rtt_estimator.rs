use std::time::Duration;

const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;
const VARIANCE_FACTOR: f64 = 4.0;
/// Clock granularity term of the retransmission timeout
const GRANULARITY_MS: f64 = 10.0;

fn to_millis(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}

fn from_millis(millis: f64) -> Duration {
    Duration::from_micros((millis.max(0.0) * 1000.0).round() as u64)
}

/// Smoothed RTT and RTT variance, Jacobson/Karels style
#[derive(Clone, Debug)]
pub struct RttEstimator {
    smoothed_ms: f64,
    variance_ms: f64,
    has_sample: bool,
}

impl RttEstimator {
    pub fn new(initial_rtt: Duration) -> Self {
        let initial_ms = to_millis(initial_rtt);
        Self {
            smoothed_ms: initial_ms,
            variance_ms: initial_ms / 2.0,
            has_sample: false,
        }
    }

    pub fn add_sample(&mut self, sample: Duration) {
        let sample_ms = to_millis(sample);
        if !self.has_sample {
            self.smoothed_ms = sample_ms;
            self.variance_ms = sample_ms / 2.0;
            self.has_sample = true;
            return;
        }

        self.variance_ms =
            (1.0 - BETA) * self.variance_ms + BETA * (self.smoothed_ms - sample_ms).abs();
        self.smoothed_ms = (1.0 - ALPHA) * self.smoothed_ms + ALPHA * sample_ms;
    }

    pub fn has_sample(&self) -> bool {
        self.has_sample
    }

    pub fn smoothed(&self) -> Duration {
        from_millis(self.smoothed_ms)
    }

    pub fn variance(&self) -> Duration {
        from_millis(self.variance_ms)
    }

    pub fn smoothed_millis(&self) -> f32 {
        self.smoothed_ms as f32
    }

    /// SRTT + max(G, 4 * RTTVAR)
    pub fn retransmission_timeout(&self) -> Duration {
        from_millis(self.smoothed_ms + (VARIANCE_FACTOR * self.variance_ms).max(GRANULARITY_MS))
    }
}
