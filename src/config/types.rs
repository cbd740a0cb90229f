use serde::{Deserialize, Serialize};

/// How many milliseconds of rate history the scrolling chart keeps. Eviction
/// is by age, so memory stays bounded no matter how long a session runs.
pub const DEFAULT_CHART_WINDOW_MS: u64 = 30_000;

/// Stream identifier passed to the backend when serial streaming starts.
pub const DEFAULT_STREAM_NAME: &str = "UDL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelConfig {
    /// Address of the acquisition backend service, host:port.
    pub backend_addr: String,
    /// Name under which the serial stream is published.
    pub stream_name: String,
    /// Chart history horizon in milliseconds.
    pub chart_window_ms: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        PanelConfig {
            backend_addr: "127.0.0.1:9750".to_string(),
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            chart_window_ms: DEFAULT_CHART_WINDOW_MS,
        }
    }
}

impl PanelConfig {
    /// Guards against nonsense values from a hand-edited config file.
    pub fn sanitize(&mut self) {
        if self.chart_window_ms < 1_000 {
            self.chart_window_ms = DEFAULT_CHART_WINDOW_MS;
        }
        if self.stream_name.is_empty() {
            self.stream_name = DEFAULT_STREAM_NAME.to_string();
        }
    }
}
