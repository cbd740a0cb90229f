use futures::channel::mpsc::{channel, Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Opaque handle to the serial port the backend detected. The panel never
/// interprets it, it is only echoed back into the start-streaming command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortHandle(pub String);

impl std::fmt::Display for PortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One device as reported by a backend discovery event. Ids are unique within
/// a discovery session; the name is best-effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: Option<String>,
}

impl DeviceDescriptor {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Unknown device ({})", self.id),
        }
    }
}

/// Payload of the connection-status push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionNotice {
    pub connected: bool,
    pub detail: String,
}

const DISCOVERY_CHANNEL_CAPACITY: usize = 16;
const TELEMETRY_CHANNEL_CAPACITY: usize = 128;

/// Sender halves of the five backend push channels, handed to whatever feeds
/// events in (the RPC client in production, the test harness in tests).
/// Cloneable so the backend connection can be re-established.
#[derive(Clone)]
pub struct EventSenders {
    pub discovery: Sender<Vec<DeviceDescriptor>>,
    pub connection: Sender<ConnectionNotice>,
    pub rate: Sender<f64>,
    pub sample_loss: Sender<u64>,
    pub derived_stream: Sender<String>,
}

/// Receiver halves, owned by the EventBridge. Order is preserved per channel;
/// nothing is guaranteed across channels.
pub struct EventChannels {
    pub discovery: Receiver<Vec<DeviceDescriptor>>,
    pub connection: Receiver<ConnectionNotice>,
    pub rate: Receiver<f64>,
    pub sample_loss: Receiver<u64>,
    pub derived_stream: Receiver<String>,
}

pub fn event_channels() -> (EventSenders, EventChannels) {
    let (discovery_tx, discovery_rx) = channel(DISCOVERY_CHANNEL_CAPACITY);
    let (connection_tx, connection_rx) = channel(DISCOVERY_CHANNEL_CAPACITY);
    let (rate_tx, rate_rx) = channel(TELEMETRY_CHANNEL_CAPACITY);
    let (loss_tx, loss_rx) = channel(TELEMETRY_CHANNEL_CAPACITY);
    let (stream_tx, stream_rx) = channel(DISCOVERY_CHANNEL_CAPACITY);

    (
        EventSenders {
            discovery: discovery_tx,
            connection: connection_tx,
            rate: rate_tx,
            sample_loss: loss_tx,
            derived_stream: stream_tx,
        },
        EventChannels {
            discovery: discovery_rx,
            connection: connection_rx,
            rate: rate_rx,
            sample_loss: loss_rx,
            derived_stream: stream_rx,
        },
    )
}
