use crate::backends::Instant;

use super::TrafficControlConfig;

/// Additive-increase, multiplicative-decrease congestion window.
///
/// Losses of datagrams sent before the current recovery epoch started do not
/// shrink the window again; one burst of loss costs one decrease.
#[derive(Clone, Debug)]
pub struct CongestionWindow {
    window: u32,
    acked_since_increase: u32,
    recovery_start: Option<Instant>,
    min_window: u32,
    max_window: u32,
    additive_increase: u32,
    multiplicative_decrease: f32,
}

impl CongestionWindow {
    pub fn new(config: &TrafficControlConfig) -> Self {
        let min_window = config.min_window_bytes.max(1);
        let max_window = config.max_window_bytes.max(min_window);
        Self {
            window: config.initial_window_bytes.clamp(min_window, max_window),
            acked_since_increase: 0,
            recovery_start: None,
            min_window,
            max_window,
            additive_increase: config.additive_increase_bytes,
            multiplicative_decrease: config.multiplicative_decrease.clamp(0.0, 1.0),
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn min_window(&self) -> u32 {
        self.min_window
    }

    pub fn max_window(&self) -> u32 {
        self.max_window
    }

    pub fn in_recovery(&self) -> bool {
        self.recovery_start.is_some()
    }

    /// Returns whether the window size changed
    pub fn on_ack(&mut self, bytes: u32, sent_at: &Instant) -> bool {
        if let Some(recovery_start) = self.recovery_start {
            if !sent_at.is_after(&recovery_start) {
                return false;
            }
            self.recovery_start = None;
        }

        self.acked_since_increase = self.acked_since_increase.saturating_add(bytes);
        if self.acked_since_increase < self.window {
            return false;
        }
        self.acked_since_increase -= self.window;

        let previous = self.window;
        self.window = self
            .window
            .saturating_add(self.additive_increase)
            .min(self.max_window);
        self.window != previous
    }

    /// Returns whether the window size changed
    pub fn on_loss(&mut self, sent_at: &Instant, now: &Instant) -> bool {
        if let Some(recovery_start) = self.recovery_start {
            if !sent_at.is_after(&recovery_start) {
                return false;
            }
        }
        self.recovery_start = Some(*now);
        self.acked_since_increase = 0;

        let previous = self.window;
        let decreased = (self.window as f32 * self.multiplicative_decrease) as u32;
        self.window = decreased.max(self.min_window);
        self.window != previous
    }
}
