use indexmap::IndexMap;

use crate::backend::types::{DeviceDescriptor, PortHandle};
use crate::error::BackendError;

/// The acquisition transport the operator picked. At most one mode other than
/// None is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    None,
    Serial,
    WiFi,
    Bluetooth,
}

pub const TRANSPORTS: [TransportMode; 3] = [
    TransportMode::Serial,
    TransportMode::WiFi,
    TransportMode::Bluetooth,
];

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            TransportMode::None => "None",
            TransportMode::Serial => "Serial",
            TransportMode::WiFi => "WiFi",
            TransportMode::Bluetooth => "Bluetooth",
        };

        write!(f, "{}", result)
    }
}

/// Step within one transport's connect lifecycle. Owned exclusively by the
/// orchestrator; views only read it. Idle is both the initial state and the
/// per-session terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnecting,
}

/// Single source of truth for the connection views. Never copied into view
/// state; views derive their rendering from a borrow of this.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub mode: TransportMode,
    pub phase: ConnectionPhase,
    /// Discovered devices in discovery order, keyed by id. Replaced wholesale
    /// on every discovery event.
    pub devices: IndexMap<String, DeviceDescriptor>,
    pub selected_device_id: Option<String>,
    pub status_message: Option<String>,
}

impl ConnectionSession {
    pub fn new() -> Self {
        ConnectionSession {
            mode: TransportMode::None,
            phase: ConnectionPhase::Idle,
            devices: IndexMap::new(),
            selected_device_id: None,
            status_message: None,
        }
    }

    /// Back to {None, Idle}, dropping devices, selection and status.
    pub fn reset(&mut self) {
        *self = ConnectionSession::new();
    }
}

impl Default for ConnectionSession {
    fn default() -> Self {
        ConnectionSession::new()
    }
}

/// A command for the acquisition backend, produced by the orchestrator and
/// executed by the GUI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRequest {
    DetectDevice,
    StartStreaming { port: PortHandle },
    StartWifiStreaming,
    ScanDevices,
    ConnectToDevice { device_id: String },
    DisconnectFromDevice { device_id: String },
    Cleanup,
}

/// Side effects requested by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Invoke(BackendRequest),
    ResetTelemetry,
}

/// Resolution of a previously issued backend command, fed back into the
/// orchestrator by the GUI layer.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    DeviceDetected(Result<PortHandle, BackendError>),
    StreamingStarted(Result<(), BackendError>),
    WifiStreamingStarted(Result<(), BackendError>),
    ScanStarted(Result<(), BackendError>),
    DeviceConnected {
        device_id: String,
        result: Result<String, BackendError>,
    },
    DeviceDisconnected(Result<String, BackendError>),
    CleanupFinished(Result<(), BackendError>),
}

/// Per-mode connect strategy. One table instead of three near-identical
/// connect handlers; the selection flag is what distinguishes the scanning
/// transports from the direct ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSpec {
    pub initial_request: BackendRequest,
    pub initial_phase: ConnectionPhase,
    pub expects_selection: bool,
}

impl TransportMode {
    pub fn spec(&self) -> Option<TransportSpec> {
        match self {
            TransportMode::None => None,
            TransportMode::Serial => Some(TransportSpec {
                initial_request: BackendRequest::DetectDevice,
                initial_phase: ConnectionPhase::Connecting,
                expects_selection: false,
            }),
            TransportMode::WiFi => Some(TransportSpec {
                initial_request: BackendRequest::StartWifiStreaming,
                initial_phase: ConnectionPhase::Connecting,
                expects_selection: false,
            }),
            TransportMode::Bluetooth => Some(TransportSpec {
                initial_request: BackendRequest::ScanDevices,
                initial_phase: ConnectionPhase::Scanning,
                expects_selection: true,
            }),
        }
    }
}
