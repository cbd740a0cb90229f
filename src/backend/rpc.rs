use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::SinkExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::spawn;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::types::{ConnectionNotice, DeviceDescriptor, EventSenders, PortHandle};
use crate::backend::AcquisitionBackend;
use crate::error::BackendError;

// Wire format: one JSON object per line in both directions. Requests carry an
// id; the matching response echoes it. Pushes carry an event name instead.

#[derive(Serialize)]
struct Request<'a> {
    id: &'a str,
    command: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    params: Value,
}

#[derive(Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    payload: Value,
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, BackendError>>>>>;

/// Line-delimited JSON client for the acquisition backend service. Commands
/// are request/response; autonomous pushes are fanned out to the five event
/// channel senders. No device protocol is interpreted here.
pub struct RpcBackend {
    writer: AsyncMutex<OwnedWriteHalf>,
    pending: Pending,
}

impl RpcBackend {
    pub async fn connect(
        addr: &str,
        senders: EventSenders,
        cancel: CancellationToken,
    ) -> Result<Arc<RpcBackend>, BackendError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(BackendError::unreachable)?;
        info!("Connected to acquisition backend at {}", addr);

        let (read_half, write_half) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        spawn(read_task(read_half, pending.clone(), senders, cancel));

        Ok(Arc::new(RpcBackend {
            writer: AsyncMutex::new(write_half),
            pending,
        }))
    }

    async fn invoke(&self, command: &str, params: Value) -> Result<Value, BackendError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("Failed to lock pending request map")
            .insert(id.clone(), tx);

        let request = Request { id: &id, command, params };
        let mut line = serde_json::to_string(&request).map_err(BackendError::bad_response)?;
        line.push('\n');

        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = writer.write_all(line.as_bytes()).await {
                self.pending
                    .lock()
                    .expect("Failed to lock pending request map")
                    .remove(&id);
                return Err(BackendError::unreachable(err));
            }
        }

        rx.await.map_err(|_| BackendError::ChannelClosed)?
    }
}

async fn read_task(
    read_half: OwnedReadHalf,
    pending: Pending,
    mut senders: EventSenders,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(read_half).lines();

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let incoming: Incoming = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(err) => {
                            warn!("Discarding malformed backend line: {:?}", err);
                            continue;
                        },
                    };

                    if let Some(id) = incoming.id {
                        let waiter = pending
                            .lock()
                            .expect("Failed to lock pending request map")
                            .remove(&id);

                        match waiter {
                            Some(tx) => {
                                let result = if incoming.ok {
                                    Ok(incoming.result)
                                } else {
                                    Err(BackendError::rejected(
                                        incoming.error.unwrap_or_else(|| "unspecified failure".to_string()),
                                    ))
                                };
                                // receiver may have been dropped, nothing to do then
                                let _ = tx.send(result);
                            },
                            None => debug!("Response for unknown request id {}", id),
                        }
                    } else if let Some(event) = incoming.event {
                        dispatch_event(&mut senders, &event, incoming.payload).await;
                    }
                },
                Ok(None) => {
                    info!("Acquisition backend closed the connection");
                    break 'mainloop;
                },
                Err(err) => {
                    warn!("Error reading from acquisition backend: {:?}", err);
                    break 'mainloop;
                },
            },
        }
    }

    // resolve every outstanding command so no caller hangs forever
    let waiters: Vec<_> = pending
        .lock()
        .expect("Failed to lock pending request map")
        .drain()
        .collect();
    for (_, tx) in waiters {
        let _ = tx.send(Err(BackendError::ChannelClosed));
    }
}

async fn dispatch_event(senders: &mut EventSenders, event: &str, payload: Value) {
    match event {
        "device-discovery" => {
            match serde_json::from_value::<Vec<DeviceDescriptor>>(payload) {
                Ok(devices) => {
                    let _ = senders.discovery.send(devices).await;
                },
                Err(err) => warn!("Malformed device-discovery payload: {:?}", err),
            }
        },
        "connection-status" => {
            let notice = match payload {
                Value::Bool(connected) => ConnectionNotice { connected, detail: String::new() },
                Value::String(text) => {
                    let connected = text.trim().to_ascii_lowercase().starts_with("connected");
                    ConnectionNotice { connected, detail: text.trim().to_string() }
                },
                other => {
                    warn!("Malformed connection-status payload: {:?}", other);
                    return;
                },
            };
            let _ = senders.connection.send(notice).await;
        },
        "sampling-rate" => match payload.as_f64() {
            Some(rate) => {
                let _ = senders.rate.send(rate).await;
            },
            None => warn!("Malformed sampling-rate payload"),
        },
        "sample-loss" => match payload.as_u64() {
            Some(count) => {
                let _ = senders.sample_loss.send(count).await;
            },
            None => warn!("Malformed sample-loss payload"),
        },
        "derived-stream-status" => match payload.as_str() {
            Some(name) => {
                let _ = senders.derived_stream.send(name.to_string()).await;
            },
            None => warn!("Malformed derived-stream-status payload"),
        },
        other => debug!("Ignoring unknown backend event channel: {}", other),
    }
}

#[async_trait]
impl AcquisitionBackend for RpcBackend {
    async fn detect_device(&self) -> Result<PortHandle, BackendError> {
        let result = self.invoke("detect-device", Value::Null).await?;
        match result.as_str() {
            Some(port) => Ok(PortHandle(port.to_string())),
            None => Err(BackendError::bad_response("expected a port handle string")),
        }
    }

    async fn start_streaming(&self, port: &PortHandle, stream_name: &str) -> Result<(), BackendError> {
        self.invoke(
            "start-streaming",
            json!({ "port": port.0, "streamName": stream_name }),
        )
        .await?;
        Ok(())
    }

    async fn start_wifi_streaming(&self) -> Result<(), BackendError> {
        self.invoke("start-wifi-streaming", Value::Null).await?;
        Ok(())
    }

    async fn scan_devices(&self) -> Result<(), BackendError> {
        self.invoke("scan-devices", Value::Null).await?;
        Ok(())
    }

    async fn connect_to_device(&self, device_id: &str) -> Result<String, BackendError> {
        let result = self
            .invoke("connect-to-device", json!({ "deviceId": device_id }))
            .await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    async fn disconnect_from_device(&self, device_id: &str) -> Result<String, BackendError> {
        let result = self
            .invoke("disconnect-from-device", json!({ "deviceId": device_id }))
            .await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    async fn cleanup(&self) -> Result<(), BackendError> {
        self.invoke("cleanup", Value::Null).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::event_channels;
    use futures::StreamExt;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn rpc_pair() -> (Arc<RpcBackend>, TcpStream, crate::backend::types::EventChannels, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (senders, channels) = event_channels();
        let cancel = CancellationToken::new();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let backend = RpcBackend::connect(&addr.to_string(), senders, cancel.clone())
            .await
            .unwrap();
        let server = accept.await.unwrap();

        (backend, server, channels, cancel)
    }

    async fn read_request(server: &mut TcpStream) -> Value {
        let mut buf = vec![0u8; 4096];
        let n = server.read(&mut buf).await.unwrap();
        let line = std::str::from_utf8(&buf[..n]).unwrap();
        serde_json::from_str(line.trim_end()).unwrap()
    }

    #[tokio::test]
    async fn detect_device_round_trip() {
        let (backend, mut server, _channels, _cancel) = rpc_pair().await;

        let call = tokio::spawn(async move { backend.detect_device().await });

        let request = read_request(&mut server).await;
        assert_eq!(request["command"], "detect-device");

        let reply = format!(
            "{}\n",
            json!({ "id": request["id"], "ok": true, "result": "/dev/ttyUSB0" })
        );
        server.write_all(reply.as_bytes()).await.unwrap();

        let port = call.await.unwrap().unwrap();
        assert_eq!(port, PortHandle("/dev/ttyUSB0".to_string()));
    }

    #[tokio::test]
    async fn rejected_command_maps_to_error() {
        let (backend, mut server, _channels, _cancel) = rpc_pair().await;

        let call = tokio::spawn(async move { backend.scan_devices().await });

        let request = read_request(&mut server).await;
        let reply = format!(
            "{}\n",
            json!({ "id": request["id"], "ok": false, "error": "no adapter" })
        );
        server.write_all(reply.as_bytes()).await.unwrap();

        match call.await.unwrap() {
            Err(BackendError::Rejected { message }) => assert_eq!(message, "no adapter"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn pushes_are_fanned_out_to_their_channels() {
        let (_backend, mut server, mut channels, _cancel) = rpc_pair().await;

        let lines = [
            json!({ "event": "sampling-rate", "payload": 12.4 }),
            json!({ "event": "sample-loss", "payload": 3 }),
            json!({ "event": "connection-status", "payload": "Connected " }),
            json!({ "event": "derived-stream-status", "payload": "uidserial007" }),
            json!({ "event": "device-discovery", "payload": [{ "id": "A1", "name": "NPG-01" }] }),
        ];
        for line in &lines {
            server.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
        }

        assert_eq!(channels.rate.next().await, Some(12.4));
        assert_eq!(channels.sample_loss.next().await, Some(3));

        let notice = channels.connection.next().await.unwrap();
        assert!(notice.connected);
        assert_eq!(notice.detail, "Connected");

        assert_eq!(channels.derived_stream.next().await, Some("uidserial007".to_string()));

        let devices = channels.discovery.next().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "A1");
        assert_eq!(devices[0].name.as_deref(), Some("NPG-01"));
    }

    #[tokio::test]
    async fn closed_connection_fails_outstanding_commands() {
        let (backend, server, _channels, _cancel) = rpc_pair().await;

        let call = tokio::spawn(async move { backend.cleanup().await });
        drop(server);

        // the write may fail first (broken pipe) or the pending request may be
        // drained on EOF, depending on timing
        match call.await.unwrap() {
            Err(BackendError::ChannelClosed) | Err(BackendError::Unreachable { .. }) => {},
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
