use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// One point on the scrolling rate chart. Timestamps within a session are
/// non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub timestamp_ms: u64,
    pub value: f64,
}

/// Running totals for the current connection session. Reset exactly once per
/// connection attempt, on entry into Connecting; never mid-session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub current_rate_hz: u64,
    pub samples_lost_cumulative: u64,
    pub total_samples_cumulative: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Folds the backend's sampling-rate and sample-loss pushes into stats and a
/// bounded time series. Points older than the window are evicted as new ones
/// arrive, so memory stays constant across long sessions.
pub struct TelemetryAccumulator {
    stats: SessionStats,
    series: VecDeque<TelemetrySample>,
    window_ms: u64,
    last_timestamp_ms: u64,
}

impl TelemetryAccumulator {
    pub fn new(window_ms: u64) -> Self {
        TelemetryAccumulator {
            stats: SessionStats::default(),
            series: VecDeque::new(),
            window_ms,
            last_timestamp_ms: 0,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn series(&self) -> &VecDeque<TelemetrySample> {
        &self.series
    }

    /// One rate push counts as the number of samples produced in the last
    /// interval. Fractional rates are rounded up.
    pub fn on_rate_sample(&mut self, rate_hz: f64) {
        self.on_rate_sample_at(rate_hz, now_ms());
    }

    pub fn on_rate_sample_at(&mut self, rate_hz: f64, timestamp_ms: u64) {
        let rounded = rate_hz.ceil().max(0.0) as u64;
        self.stats.current_rate_hz = rounded;
        self.stats.total_samples_cumulative += rounded;

        // guard against clock steps; the series must stay monotonic
        let timestamp_ms = timestamp_ms.max(self.last_timestamp_ms);
        self.last_timestamp_ms = timestamp_ms;

        self.series.push_back(TelemetrySample {
            timestamp_ms,
            value: rounded as f64,
        });

        let cutoff = timestamp_ms.saturating_sub(self.window_ms);
        while let Some(front) = self.series.front() {
            if front.timestamp_ms < cutoff {
                self.series.pop_front();
            } else {
                break;
            }
        }
    }

    /// The backend reports a cumulative count; store it verbatim.
    pub fn on_sample_loss(&mut self, cumulative: u64) {
        self.stats.samples_lost_cumulative = cumulative;
    }

    pub fn reset(&mut self) {
        self.stats = SessionStats::default();
        self.series.clear();
        self.last_timestamp_ms = 0;
    }
}
