pub mod rpc;
pub mod types;

use async_trait::async_trait;

use crate::backend::types::PortHandle;
use crate::error::BackendError;

/// Command-invocation interface of the out-of-process acquisition backend.
/// Every call is asynchronous and may fail; results of discovery arrive on the
/// push channels, not through return values. The panel never assumes
/// exclusive access to the transport handle beyond issuing these commands.
#[async_trait]
pub trait AcquisitionBackend: Send + Sync {
    /// Probe serial ports for a supported board. Resolves to an opaque port
    /// handle, or fails when no device is present or access is denied.
    async fn detect_device(&self) -> Result<PortHandle, BackendError>;

    /// Open the LSL stream for a detected serial device.
    async fn start_streaming(&self, port: &PortHandle, stream_name: &str) -> Result<(), BackendError>;

    /// Start streaming from the WiFi device directly.
    async fn start_wifi_streaming(&self) -> Result<(), BackendError>;

    /// Begin a BLE scan. Results arrive on the device-discovery channel.
    async fn scan_devices(&self) -> Result<(), BackendError>;

    /// Connect to a previously discovered BLE device.
    async fn connect_to_device(&self, device_id: &str) -> Result<String, BackendError>;

    /// Disconnect from the device.
    async fn disconnect_from_device(&self, device_id: &str) -> Result<String, BackendError>;

    /// Release backend-held resources. Best-effort; callers must not depend
    /// on it succeeding.
    async fn cleanup(&self) -> Result<(), BackendError>;
}
