use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use futures::channel::mpsc::Sender;
use futures::{SinkExt, StreamExt};
use iced::subscription::{self, Subscription};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::backend::types::{ConnectionNotice, DeviceDescriptor, EventChannels};

/// A raw backend push translated into one typed update. Pure fan-out; the
/// routing to orchestrator or telemetry happens in the update loop.
#[derive(Debug, Clone)]
pub enum BridgeUpdate {
    Discovery(Vec<DeviceDescriptor>),
    Connection(ConnectionNotice),
    Rate(f64),
    SampleLoss(u64),
    DerivedStream(String),
}

/// Owns the receiving halves of the five backend event channels and exposes
/// them as a single iced subscription. The channels can be consumed exactly
/// once; a duplicate subscription is ignored with a warning instead of
/// double-registering. The cancellation token is the disposer: cancelling it
/// stops the pump and drops the receivers.
pub struct EventBridge {
    channels: Arc<Mutex<Option<EventChannels>>>,
    cancel: CancellationToken,
}

impl EventBridge {
    pub fn new(channels: EventChannels, cancel: CancellationToken) -> Self {
        EventBridge {
            channels: Arc::new(Mutex::new(Some(channels))),
            cancel,
        }
    }

    pub fn subscription(&self) -> Subscription<BridgeUpdate> {
        struct Bridge;

        let channels = self.channels.clone();
        let cancel = self.cancel.clone();

        subscription::channel(
            std::any::TypeId::of::<Bridge>(),
            64,
            move |output| {
                let channels = channels.clone();
                let cancel = cancel.clone();

                async move {
                    let taken = channels
                        .lock()
                        .expect("Failed to lock event channels")
                        .take();

                    match taken {
                        Some(channels) => pump(channels, output, cancel).await,
                        None => warn!("Backend event channels already subscribed; ignoring duplicate"),
                    }

                    // subscription::channel expects a future that never resolves
                    futures::future::pending::<Infallible>().await
                }
            },
        )
    }
}

/// Forwards events until cancelled or until every backend channel closes.
/// Delivery order within one channel is preserved; nothing is guaranteed
/// across channels.
async fn pump(
    mut channels: EventChannels,
    mut output: Sender<BridgeUpdate>,
    cancel: CancellationToken,
) {
    'mainloop: loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            Some(devices) = channels.discovery.next() => BridgeUpdate::Discovery(devices),
            Some(notice) = channels.connection.next() => BridgeUpdate::Connection(notice),
            Some(rate) = channels.rate.next() => BridgeUpdate::Rate(rate),
            Some(count) = channels.sample_loss.next() => BridgeUpdate::SampleLoss(count),
            Some(name) = channels.derived_stream.next() => BridgeUpdate::DerivedStream(name),
            else => {
                info!("All backend event channels closed");
                break 'mainloop;
            },
        };

        if output.send(update).await.is_err() {
            // the UI side is gone, nothing left to forward to
            break 'mainloop;
        }
    }

    info!("Event bridge stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::event_channels;
    use futures::channel::mpsc::channel;

    #[tokio::test]
    async fn per_channel_order_is_preserved() {
        let (mut senders, channels) = event_channels();
        let (output_tx, mut output_rx) = channel(64);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(pump(channels, output_tx, cancel.clone()));

        for rate in [250.0, 251.0, 252.0] {
            senders.rate.send(rate).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            match output_rx.next().await.unwrap() {
                BridgeUpdate::Rate(rate) => seen.push(rate),
                other => panic!("unexpected update: {:?}", other),
            }
        }
        assert_eq!(seen, vec![250.0, 251.0, 252.0]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn every_channel_is_forwarded_typed() {
        let (mut senders, channels) = event_channels();
        let (output_tx, mut output_rx) = channel(64);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(pump(channels, output_tx, cancel.clone()));

        senders.discovery.send(vec![]).await.unwrap();
        match output_rx.next().await.unwrap() {
            BridgeUpdate::Discovery(devices) => assert!(devices.is_empty()),
            other => panic!("unexpected update: {:?}", other),
        }

        senders
            .connection
            .send(ConnectionNotice { connected: true, detail: "Connected".to_string() })
            .await
            .unwrap();
        match output_rx.next().await.unwrap() {
            BridgeUpdate::Connection(notice) => assert!(notice.connected),
            other => panic!("unexpected update: {:?}", other),
        }

        senders.sample_loss.send(9).await.unwrap();
        match output_rx.next().await.unwrap() {
            BridgeUpdate::SampleLoss(count) => assert_eq!(count, 9),
            other => panic!("unexpected update: {:?}", other),
        }

        senders.derived_stream.send("uidwifi007".to_string()).await.unwrap();
        match output_rx.next().await.unwrap() {
            BridgeUpdate::DerivedStream(name) => assert_eq!(name, "uidwifi007"),
            other => panic!("unexpected update: {:?}", other),
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn pump_stops_when_all_senders_are_dropped() {
        let (senders, channels) = event_channels();
        let (output_tx, _output_rx) = channel(64);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(pump(channels, output_tx, cancel));
        drop(senders);

        handle.await.unwrap();
    }
}
