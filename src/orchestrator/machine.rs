use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::backend::types::{ConnectionNotice, DeviceDescriptor};
use crate::orchestrator::types::{
    Action, BackendRequest, CommandOutcome, ConnectionPhase, ConnectionSession, TransportMode,
};

/// The connection state machine. Owns the session; every mutation happens in
/// one of the methods below, each of which returns the side effects (backend
/// requests, telemetry resets) the caller must execute. The phase enum is the
/// only concurrency guard: a command may be in flight exactly when the phase
/// says so.
pub struct ConnectionOrchestrator {
    session: ConnectionSession,
}

impl ConnectionOrchestrator {
    pub fn new() -> Self {
        ConnectionOrchestrator {
            session: ConnectionSession::new(),
        }
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    /// Exclusivity gate: accepted only while Idle and for a real transport.
    /// A rejected call leaves the session untouched.
    pub fn select_transport(&mut self, mode: TransportMode) -> Vec<Action> {
        if self.session.phase != ConnectionPhase::Idle {
            debug!("Ignoring transport selection {} while phase is {:?}", mode, self.session.phase);
            return Vec::new();
        }

        let spec = match mode.spec() {
            Some(spec) => spec,
            None => return Vec::new(),
        };

        info!("Transport selected: {}", mode);
        self.session.mode = mode;
        self.session.phase = spec.initial_phase;
        self.session.devices = IndexMap::new();
        self.session.selected_device_id = None;
        self.session.status_message = None;

        vec![
            Action::ResetTelemetry,
            Action::Invoke(spec.initial_request),
        ]
    }

    /// Valid only while Scanning with at least one discovered device.
    pub fn select_device(&mut self, device_id: &str) {
        if self.session.phase != ConnectionPhase::Scanning {
            debug!("Ignoring device selection while phase is {:?}", self.session.phase);
            return;
        }
        if !self.session.devices.contains_key(device_id) {
            debug!("Ignoring selection of unknown device {}", device_id);
            return;
        }

        self.session.selected_device_id = Some(device_id.to_string());
    }

    /// Valid only with a recorded selection; moves the session into
    /// Connecting and issues the connect command.
    pub fn confirm_device_selection(&mut self) -> Vec<Action> {
        if self.session.phase != ConnectionPhase::Scanning {
            debug!("Ignoring connect confirmation while phase is {:?}", self.session.phase);
            return Vec::new();
        }
        let device_id = match &self.session.selected_device_id {
            Some(id) => id.clone(),
            None => return Vec::new(),
        };

        info!("Connecting to device {}", device_id);
        self.session.phase = ConnectionPhase::Connecting;
        self.session.status_message = None;

        vec![
            Action::ResetTelemetry,
            Action::Invoke(BackendRequest::ConnectToDevice { device_id }),
        ]
    }

    /// Valid only while Connected. Cleanup is chained after the disconnect
    /// command resolves, whatever its outcome.
    pub fn disconnect(&mut self) -> Vec<Action> {
        if self.session.phase != ConnectionPhase::Connected {
            debug!("Ignoring disconnect while phase is {:?}", self.session.phase);
            return Vec::new();
        }

        info!("Disconnecting");
        self.session.phase = ConnectionPhase::Disconnecting;

        let device_id = self.session.selected_device_id.clone().unwrap_or_default();
        vec![Action::Invoke(BackendRequest::DisconnectFromDevice { device_id })]
    }

    /// A discovery event replaces the device set wholesale; the backend
    /// re-broadcasts the whole current list every time. An explicit empty
    /// list means "no device found", which is distinct from still scanning.
    pub fn on_discovery(&mut self, devices: Vec<DeviceDescriptor>) -> Vec<Action> {
        if self.session.phase != ConnectionPhase::Scanning {
            debug!("Ignoring discovery event while phase is {:?}", self.session.phase);
            return Vec::new();
        }

        self.session.devices = devices
            .into_iter()
            .map(|device| (device.id.clone(), device))
            .collect();

        if self.session.devices.is_empty() {
            self.session.status_message = Some("No device found".to_string());
        } else {
            self.session.status_message = None;
        }

        // a fresh list may no longer contain the selected device
        if let Some(selected) = &self.session.selected_device_id {
            if !self.session.devices.contains_key(selected) {
                self.session.selected_device_id = None;
            }
        }

        Vec::new()
    }

    /// Pushes on the connection-status channel. Confirms a pending connect,
    /// or reports a mid-session drop; the latter is handled exactly like a
    /// user-initiated disconnect.
    pub fn on_connection_status(&mut self, notice: ConnectionNotice) -> Vec<Action> {
        if notice.connected {
            if self.session.phase == ConnectionPhase::Connecting {
                info!("Backend confirmed the connection");
                self.session.phase = ConnectionPhase::Connected;
                if !notice.detail.is_empty() {
                    self.session.status_message = Some(notice.detail);
                }
            }
            return Vec::new();
        }

        match self.session.phase {
            ConnectionPhase::Connected => {
                warn!("Backend reports the connection is gone");
                self.session.phase = ConnectionPhase::Disconnecting;
                let device_id = self.session.selected_device_id.clone().unwrap_or_default();
                vec![Action::Invoke(BackendRequest::DisconnectFromDevice { device_id })]
            },
            ConnectionPhase::Connecting => self.fail_connect_attempt(if notice.detail.is_empty() {
                "Connection failed".to_string()
            } else {
                notice.detail
            }),
            _ => Vec::new(),
        }
    }

    /// Resolution of an issued backend command. Late resolutions are never
    /// dropped; a stale success that would leak a backend resource triggers
    /// an immediate disconnect so every path ends in a consistent phase.
    pub fn on_command_outcome(&mut self, outcome: CommandOutcome) -> Vec<Action> {
        match outcome {
            CommandOutcome::DeviceDetected(Ok(port)) => {
                if self.session.phase == ConnectionPhase::Connecting
                    && self.session.mode == TransportMode::Serial
                {
                    info!("Device detected on {}", port);
                    vec![Action::Invoke(BackendRequest::StartStreaming { port })]
                } else {
                    debug!("Stale detect result for {} ignored", port);
                    Vec::new()
                }
            },
            CommandOutcome::DeviceDetected(Err(err)) => {
                if self.session.phase == ConnectionPhase::Connecting
                    && self.session.mode == TransportMode::Serial
                {
                    self.fail_connect_attempt(err.to_string())
                } else {
                    debug!("Stale detect failure ignored: {}", err);
                    Vec::new()
                }
            },
            CommandOutcome::StreamingStarted(Ok(()))
            | CommandOutcome::WifiStreamingStarted(Ok(())) => {
                // Connected is entered on the connection-status confirmation
                Vec::new()
            },
            CommandOutcome::StreamingStarted(Err(err)) => {
                if self.session.phase == ConnectionPhase::Connecting
                    && self.session.mode == TransportMode::Serial
                {
                    self.fail_connect_attempt(err.to_string())
                } else {
                    debug!("Stale streaming failure ignored: {}", err);
                    Vec::new()
                }
            },
            CommandOutcome::WifiStreamingStarted(Err(err)) => {
                if self.session.phase == ConnectionPhase::Connecting
                    && self.session.mode == TransportMode::WiFi
                {
                    self.fail_connect_attempt(err.to_string())
                } else {
                    debug!("Stale wifi streaming failure ignored: {}", err);
                    Vec::new()
                }
            },
            CommandOutcome::ScanStarted(Ok(())) => Vec::new(),
            CommandOutcome::ScanStarted(Err(err)) => {
                if self.session.phase == ConnectionPhase::Scanning {
                    // stays in Scanning, per the Bluetooth error policy
                    self.session.status_message = Some(format!("Scan could not start: {}", err));
                }
                Vec::new()
            },
            CommandOutcome::DeviceConnected { device_id, result: Ok(status) } => {
                if self.session.phase == ConnectionPhase::Connecting {
                    info!("Connected to device {}", device_id);
                    self.session.phase = ConnectionPhase::Connected;
                    if !status.is_empty() {
                        self.session.status_message = Some(status);
                    }
                    Vec::new()
                } else if matches!(
                    self.session.phase,
                    ConnectionPhase::Idle | ConnectionPhase::Scanning
                ) {
                    // the attempt was already written off while the connect
                    // was in flight; the backend now holds a connection
                    // nobody wants
                    warn!("Stale connect success for {}; releasing", device_id);
                    vec![Action::Invoke(BackendRequest::DisconnectFromDevice { device_id })]
                } else {
                    warn!("Stale connect success for {} in phase {:?}", device_id, self.session.phase);
                    Vec::new()
                }
            },
            CommandOutcome::DeviceConnected { device_id, result: Err(err) } => {
                if self.session.phase == ConnectionPhase::Connecting
                    && self.session.mode == TransportMode::Bluetooth
                {
                    warn!("Connect to {} failed: {}", device_id, err);
                    self.session.phase = ConnectionPhase::Scanning;
                    self.session.status_message = Some(err.to_string());
                } else {
                    debug!("Stale connect failure for {} ignored: {}", device_id, err);
                }
                Vec::new()
            },
            CommandOutcome::DeviceDisconnected(result) => {
                match result {
                    Ok(status) => info!("Disconnect command resolved: {}", status),
                    Err(err) => warn!("Disconnect command failed: {}", err),
                }
                // cleanup runs on every disconnect path, success or failure
                vec![Action::Invoke(BackendRequest::Cleanup)]
            },
            CommandOutcome::CleanupFinished(result) => {
                if let Err(err) = result {
                    // logged only; the session still ends up Idle
                    warn!("Cleanup failed: {}", err);
                }
                if self.session.phase == ConnectionPhase::Disconnecting {
                    self.session.reset();
                    vec![Action::ResetTelemetry]
                } else {
                    Vec::new()
                }
            },
        }
    }

    /// Failed connect attempt. Bluetooth falls back to the scan it came from;
    /// the direct transports go back to {None, Idle}. Either way the failure
    /// is surfaced as status text.
    fn fail_connect_attempt(&mut self, message: String) -> Vec<Action> {
        warn!("Connect attempt failed: {}", message);
        if self.session.mode == TransportMode::Bluetooth {
            self.session.phase = ConnectionPhase::Scanning;
            self.session.status_message = Some(message);
        } else {
            self.session.reset();
            self.session.status_message = Some(message);
        }
        Vec::new()
    }
}

impl Default for ConnectionOrchestrator {
    fn default() -> Self {
        ConnectionOrchestrator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::PortHandle;
    use crate::error::BackendError;

    fn device(id: &str, name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            name: Some(name.to_string()),
        }
    }

    fn requests(actions: &[Action]) -> Vec<&BackendRequest> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Invoke(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn select_transport_dispatches_the_mode_specific_command() {
        let mut orch = ConnectionOrchestrator::new();

        let actions = orch.select_transport(TransportMode::Serial);
        assert_eq!(requests(&actions), vec![&BackendRequest::DetectDevice]);
        assert!(actions.contains(&Action::ResetTelemetry));
        assert_eq!(orch.session().phase, ConnectionPhase::Connecting);
        assert_eq!(orch.session().mode, TransportMode::Serial);
    }

    #[test]
    fn select_transport_while_busy_is_a_no_op() {
        // Scenario C: serial while WiFi is connecting
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::WiFi);

        let actions = orch.select_transport(TransportMode::Serial);
        assert!(actions.is_empty());
        assert_eq!(orch.session().mode, TransportMode::WiFi);
        assert_eq!(orch.session().phase, ConnectionPhase::Connecting);
    }

    #[test]
    fn select_transport_none_is_a_no_op() {
        let mut orch = ConnectionOrchestrator::new();

        let actions = orch.select_transport(TransportMode::None);
        assert!(actions.is_empty());
        assert_eq!(orch.session().phase, ConnectionPhase::Idle);
    }

    #[test]
    fn empty_discovery_means_no_device_found() {
        // Scenario A
        let mut orch = ConnectionOrchestrator::new();
        let actions = orch.select_transport(TransportMode::Bluetooth);
        assert_eq!(requests(&actions), vec![&BackendRequest::ScanDevices]);
        assert_eq!(orch.session().phase, ConnectionPhase::Scanning);

        orch.on_discovery(Vec::new());

        assert!(orch.session().devices.is_empty());
        assert_eq!(orch.session().status_message.as_deref(), Some("No device found"));
        assert_eq!(orch.session().phase, ConnectionPhase::Scanning);
    }

    #[test]
    fn bluetooth_scan_select_confirm_connect() {
        // Scenario B
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::Bluetooth);

        orch.on_discovery(vec![device("A1", "NPG-01")]);
        orch.select_device("A1");
        assert_eq!(orch.session().selected_device_id.as_deref(), Some("A1"));

        let actions = orch.confirm_device_selection();
        assert_eq!(
            requests(&actions),
            vec![&BackendRequest::ConnectToDevice { device_id: "A1".to_string() }]
        );
        assert_eq!(orch.session().phase, ConnectionPhase::Connecting);

        orch.on_command_outcome(CommandOutcome::DeviceConnected {
            device_id: "A1".to_string(),
            result: Ok("Connected".to_string()),
        });

        assert_eq!(orch.session().phase, ConnectionPhase::Connected);
        assert_eq!(orch.session().selected_device_id.as_deref(), Some("A1"));
    }

    #[test]
    fn connect_failure_reverts_to_scanning_with_status() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::Bluetooth);
        orch.on_discovery(vec![device("A1", "NPG-01")]);
        orch.select_device("A1");
        orch.confirm_device_selection();

        orch.on_command_outcome(CommandOutcome::DeviceConnected {
            device_id: "A1".to_string(),
            result: Err(BackendError::rejected("device unreachable")),
        });

        assert_eq!(orch.session().phase, ConnectionPhase::Scanning);
        assert!(orch.session().status_message.is_some());
    }

    #[test]
    fn select_device_requires_a_known_device() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::Bluetooth);
        orch.on_discovery(vec![device("A1", "NPG-01")]);

        orch.select_device("B2");
        assert_eq!(orch.session().selected_device_id, None);

        let actions = orch.confirm_device_selection();
        assert!(actions.is_empty());
        assert_eq!(orch.session().phase, ConnectionPhase::Scanning);
    }

    #[test]
    fn discovery_replaces_the_list_wholesale() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::Bluetooth);

        orch.on_discovery(vec![device("A1", "NPG-01"), device("B2", "NPG-02")]);
        orch.select_device("A1");

        orch.on_discovery(vec![device("B2", "NPG-02")]);

        assert_eq!(orch.session().devices.len(), 1);
        assert!(orch.session().devices.contains_key("B2"));
        // the selected device vanished with the new list
        assert_eq!(orch.session().selected_device_id, None);
    }

    #[test]
    fn serial_detect_chains_into_start_streaming() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::Serial);

        let actions = orch.on_command_outcome(CommandOutcome::DeviceDetected(Ok(PortHandle(
            "/dev/ttyUSB0".to_string(),
        ))));
        assert_eq!(
            requests(&actions),
            vec![&BackendRequest::StartStreaming { port: PortHandle("/dev/ttyUSB0".to_string()) }]
        );
        assert_eq!(orch.session().phase, ConnectionPhase::Connecting);

        orch.on_connection_status(ConnectionNotice {
            connected: true,
            detail: "Connected".to_string(),
        });
        assert_eq!(orch.session().phase, ConnectionPhase::Connected);
    }

    #[test]
    fn detect_failure_resets_the_session() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::Serial);

        orch.on_command_outcome(CommandOutcome::DeviceDetected(Err(BackendError::rejected(
            "no device found",
        ))));

        assert_eq!(orch.session().phase, ConnectionPhase::Idle);
        assert_eq!(orch.session().mode, TransportMode::None);
        assert!(orch.session().status_message.is_some());
    }

    #[test]
    fn disconnect_always_chains_cleanup() {
        // Scenario E: disconnect command fails, cleanup still runs, phase
        // resolves to Idle regardless
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::WiFi);
        orch.on_connection_status(ConnectionNotice { connected: true, detail: String::new() });
        assert_eq!(orch.session().phase, ConnectionPhase::Connected);

        let actions = orch.disconnect();
        assert_eq!(orch.session().phase, ConnectionPhase::Disconnecting);
        assert_eq!(requests(&actions).len(), 1);

        let actions = orch.on_command_outcome(CommandOutcome::DeviceDisconnected(Err(
            BackendError::rejected("device already gone"),
        )));
        assert_eq!(requests(&actions), vec![&BackendRequest::Cleanup]);

        let actions = orch.on_command_outcome(CommandOutcome::CleanupFinished(Ok(())));
        assert!(actions.contains(&Action::ResetTelemetry));
        assert_eq!(orch.session().phase, ConnectionPhase::Idle);
        assert_eq!(orch.session().mode, TransportMode::None);
    }

    #[test]
    fn cleanup_failure_never_blocks_the_reset() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::WiFi);
        orch.on_connection_status(ConnectionNotice { connected: true, detail: String::new() });
        orch.disconnect();
        orch.on_command_outcome(CommandOutcome::DeviceDisconnected(Ok("bye".to_string())));

        orch.on_command_outcome(CommandOutcome::CleanupFinished(Err(BackendError::rejected(
            "backend hiccup",
        ))));

        assert_eq!(orch.session().phase, ConnectionPhase::Idle);
    }

    #[test]
    fn disconnect_while_idle_is_a_no_op() {
        let mut orch = ConnectionOrchestrator::new();

        let actions = orch.disconnect();
        assert!(actions.is_empty());
        assert_eq!(orch.session().phase, ConnectionPhase::Idle);
    }

    #[test]
    fn mid_session_drop_behaves_like_a_disconnect() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::WiFi);
        orch.on_connection_status(ConnectionNotice { connected: true, detail: String::new() });

        let actions = orch.on_connection_status(ConnectionNotice {
            connected: false,
            detail: "stream ended".to_string(),
        });
        assert_eq!(orch.session().phase, ConnectionPhase::Disconnecting);
        assert_eq!(requests(&actions).len(), 1);

        orch.on_command_outcome(CommandOutcome::DeviceDisconnected(Ok(String::new())));
        orch.on_command_outcome(CommandOutcome::CleanupFinished(Ok(())));
        assert_eq!(orch.session().phase, ConnectionPhase::Idle);
    }

    #[test]
    fn stale_connect_success_is_released_not_dropped() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::Bluetooth);
        orch.on_discovery(vec![device("A1", "NPG-01")]);
        orch.select_device("A1");
        orch.confirm_device_selection();

        // the attempt fails from the panel's point of view before the
        // backend resolves the original connect command
        orch.on_connection_status(ConnectionNotice { connected: false, detail: String::new() });
        assert_eq!(orch.session().phase, ConnectionPhase::Scanning);
        orch.session.reset(); // simulate the session ending up Idle

        let actions = orch.on_command_outcome(CommandOutcome::DeviceConnected {
            device_id: "A1".to_string(),
            result: Ok("Connected".to_string()),
        });

        // the late success still resolves: the unwanted connection is torn down
        assert_eq!(
            requests(&actions),
            vec![&BackendRequest::DisconnectFromDevice { device_id: "A1".to_string() }]
        );
        assert_eq!(orch.session().phase, ConnectionPhase::Idle);
    }

    #[test]
    fn stale_connect_success_while_scanning_is_released() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::Bluetooth);
        orch.on_discovery(vec![device("A1", "NPG-01")]);
        orch.select_device("A1");
        orch.confirm_device_selection();

        // a failure push drops the panel back to Scanning before the
        // original connect command resolves
        orch.on_connection_status(ConnectionNotice { connected: false, detail: String::new() });
        assert_eq!(orch.session().phase, ConnectionPhase::Scanning);

        let actions = orch.on_command_outcome(CommandOutcome::DeviceConnected {
            device_id: "A1".to_string(),
            result: Ok("Connected".to_string()),
        });

        // the unwanted connection is torn down; the scan keeps going
        assert_eq!(
            requests(&actions),
            vec![&BackendRequest::DisconnectFromDevice { device_id: "A1".to_string() }]
        );
        assert_eq!(orch.session().phase, ConnectionPhase::Scanning);
    }

    #[test]
    fn late_connected_event_while_already_connected_is_tolerated() {
        let mut orch = ConnectionOrchestrator::new();
        orch.select_transport(TransportMode::WiFi);
        orch.on_connection_status(ConnectionNotice { connected: true, detail: String::new() });

        let actions = orch.on_connection_status(ConnectionNotice {
            connected: true,
            detail: "Connected".to_string(),
        });
        assert!(actions.is_empty());
        assert_eq!(orch.session().phase, ConnectionPhase::Connected);
    }
}
