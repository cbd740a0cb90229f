use std::fmt;
use std::sync::Arc;
use iced::Event;

use crate::backend::AcquisitionBackend;
use crate::bridge::BridgeUpdate;
use crate::config::types::PanelConfig;
use crate::error::BackendError;
use crate::orchestrator::types::{CommandOutcome, TransportMode};

/// Cloneable handle to the backend, wrapped so Message stays Debug.
#[derive(Clone)]
pub struct BackendHandle(pub Arc<dyn AcquisitionBackend>);

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BackendHandle")
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    EventOccurred(Event),
    ConfigLoadComplete((PanelConfig, Option<String>)),
    BackendConnected(Result<BackendHandle, BackendError>),
    NoticeConfirmed,

    // operator intents
    TransportPressed(TransportMode),
    DevicePicked(String),
    ConfirmDevice,
    CancelScan,
    Disconnect,

    // backend traffic
    Bridge(BridgeUpdate),
    Outcome(CommandOutcome),

    // window chrome
    PinToggled,
    MinimizePressed,
    ClosePressed,

    // chart redraw pulse
    Tick,
}
