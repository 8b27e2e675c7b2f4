//! Background task that owns a transport, moving bytes between it and the
//! event loop and reopening it after failures

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::endpoint::Endpoint;
use super::transport::{open_transport, Transport};

/// Sleep after a read that returned nothing
pub const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Outbound frames buffered per link before writes start being dropped
pub const OUTBOUND_QUEUE_DEPTH: usize = 512;

const INBOUND_QUEUE_DEPTH: usize = 1024;
const READ_BUFFER_SIZE: usize = 4096;

/// What a pump reports to the owning link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEvent {
    /// Bytes read from the transport, stamped on arrival
    Data {
        bytes: Bytes,
        /// Microseconds since the Unix epoch
        received_us: u64,
    },
    /// The transport is open
    Up(String),
    /// The transport failed or could not be opened; a retry is scheduled
    Down(String),
}

/// Where a pump gets its transport from
pub enum TransportSource {
    /// Open (and keep reopening) an endpoint
    Endpoint {
        endpoint: Endpoint,
        rtscts: bool,
        reconnect_interval: Duration,
    },
    /// Use an already-open transport once
    Fixed(Box<dyn Transport>),
}

/// Owning side of a running pump
pub struct PumpHandle {
    pub outbound: mpsc::Sender<Bytes>,
    pub inbound: mpsc::Receiver<PumpEvent>,
    task: JoinHandle<()>,
}

impl PumpHandle {
    /// Stop the pump task
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a pump on the current tokio runtime
///
/// `wake` is notified whenever new input is queued so the event loop can
/// stop waiting.
pub fn spawn_pump(source: TransportSource, wake: Arc<Notify>) -> PumpHandle {
    let (events_tx, inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

    let task = tokio::spawn(run_pump(source, events_tx, outbound_rx, wake));

    PumpHandle {
        outbound,
        inbound,
        task,
    }
}

enum DriveEnd {
    /// The link side went away, stop for good
    Closed,
    /// The transport failed
    Failed(String),
}

async fn run_pump(
    source: TransportSource,
    events: mpsc::Sender<PumpEvent>,
    mut outbound: mpsc::Receiver<Bytes>,
    wake: Arc<Notify>,
) {
    match source {
        TransportSource::Fixed(transport) => {
            let description = transport.describe();
            if !post(&events, &wake, PumpEvent::Up(description)).await {
                return;
            }
            if let DriveEnd::Failed(reason) = drive(transport, &events, &mut outbound, &wake).await {
                post(&events, &wake, PumpEvent::Down(reason)).await;
            }
        }
        TransportSource::Endpoint {
            endpoint,
            rtscts,
            reconnect_interval,
        } => {
            let mut reported_down = false;
            loop {
                match open_transport(&endpoint, rtscts).await {
                    Ok(transport) => {
                        info!("Opened {}", transport.describe());
                        reported_down = false;
                        if !post(&events, &wake, PumpEvent::Up(transport.describe())).await {
                            return;
                        }
                        match drive(transport, &events, &mut outbound, &wake).await {
                            DriveEnd::Closed => return,
                            DriveEnd::Failed(reason) => {
                                warn!("Link {} failed: {}", endpoint, reason);
                                reported_down = true;
                                if !post(&events, &wake, PumpEvent::Down(reason)).await {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        if !reported_down {
                            warn!("{}", e);
                            reported_down = true;
                            if !post(&events, &wake, PumpEvent::Down(e.to_string())).await {
                                return;
                            }
                        } else {
                            debug!("Retrying {}: {}", endpoint, e);
                        }
                    }
                }

                // Writes queued while the transport is down are discarded
                let retry = tokio::time::sleep(reconnect_interval);
                tokio::pin!(retry);
                loop {
                    tokio::select! {
                        _ = &mut retry => break,
                        out = outbound.recv() => {
                            if out.is_none() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn drive(
    mut transport: Box<dyn Transport>,
    events: &mpsc::Sender<PumpEvent>,
    outbound: &mut mpsc::Receiver<Bytes>,
    wake: &Notify,
) -> DriveEnd {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(bytes) => {
                    if let Err(e) = transport.send(&bytes).await {
                        return DriveEnd::Failed(e.to_string());
                    }
                }
                None => return DriveEnd::Closed,
            },
            res = transport.recv(&mut buf) => match res {
                Ok(0) => tokio::time::sleep(EMPTY_READ_BACKOFF).await,
                Ok(n) => {
                    let event = PumpEvent::Data {
                        bytes: Bytes::copy_from_slice(&buf[..n]),
                        received_us: now_us(),
                    };
                    if !post(events, wake, event).await {
                        return DriveEnd::Closed;
                    }
                }
                Err(e) => return DriveEnd::Failed(e.to_string()),
            },
        }
    }
}

async fn post(events: &mpsc::Sender<PumpEvent>, wake: &Notify, event: PumpEvent) -> bool {
    let delivered = events.send(event).await.is_ok();
    wake.notify_one();
    delivered
}

/// Wall-clock microseconds since the Unix epoch
pub fn now_us() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::memory_pair;
    use crate::link::transport::mocks::MockTransport;
    use std::io;

    #[tokio::test]
    async fn test_fixed_pump_moves_bytes_both_ways() {
        let (transport, mut peer) = memory_pair("t");
        let wake = Arc::new(Notify::new());
        let mut handle = spawn_pump(TransportSource::Fixed(Box::new(transport)), wake.clone());

        assert_eq!(handle.inbound.recv().await, Some(PumpEvent::Up("memory:t".to_string())));

        peer.to_link.send(Bytes::from_static(&[1, 2, 3])).unwrap();
        match handle.inbound.recv().await {
            Some(PumpEvent::Data { bytes, received_us }) => {
                assert_eq!(bytes.as_ref(), &[1, 2, 3]);
                assert!(received_us > 0);
            }
            other => panic!("Expected data, got: {:?}", other),
        }

        handle.outbound.send(Bytes::from_static(&[9])).await.unwrap();
        assert_eq!(peer.from_link.recv().await.unwrap().as_ref(), &[9]);
    }

    #[tokio::test]
    async fn test_fixed_pump_reports_failure() {
        let mock = MockTransport::new();
        mock.push_read(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
        let wake = Arc::new(Notify::new());
        let mut handle = spawn_pump(TransportSource::Fixed(Box::new(mock)), wake);

        assert!(matches!(handle.inbound.recv().await, Some(PumpEvent::Up(_))));
        match handle.inbound.recv().await {
            Some(PumpEvent::Down(reason)) => assert!(reason.contains("unplugged")),
            other => panic!("Expected Down, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_reads_are_not_reported() {
        let mock = MockTransport::new();
        let wake = Arc::new(Notify::new());
        let mut handle = spawn_pump(TransportSource::Fixed(Box::new(mock)), wake);

        assert!(matches!(handle.inbound.recv().await, Some(PumpEvent::Up(_))));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unopenable_endpoint_reports_down_once() {
        let source = TransportSource::Endpoint {
            endpoint: Endpoint::Serial {
                path: "/dev/nonexistent_serial_device_12345".to_string(),
                baud: 57600,
            },
            rtscts: false,
            reconnect_interval: Duration::from_millis(5),
        };
        let wake = Arc::new(Notify::new());
        let mut handle = spawn_pump(source, wake);

        assert!(matches!(handle.inbound.recv().await, Some(PumpEvent::Down(_))));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.inbound.try_recv().is_err(), "retries must not repeat the report");
    }
}
