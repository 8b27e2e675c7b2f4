//! # Link Module
//!
//! One transport-level connection carrying a MAVLink stream.
//!
//! This module handles:
//! - Opening serial, UDP and TCP endpoints, reopening them after failures
//! - Non-blocking reads that turn queued bytes into frames
//! - Forwarding raw frame bytes verbatim
//! - Sequence-gap loss statistics per source
//! - The per-link health latch (pending, healthy, unhealthy)
//!
//! A link's index is fixed for the life of the process. Transports are
//! reopened in place rather than replaced, so the index always refers to
//! the same endpoint.

pub mod endpoint;
pub mod pump;
pub mod set;
pub mod transport;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::mavlink::encoder::{encode_frame, FrameHeader};
use crate::mavlink::protocol::*;
use crate::mavlink::{Frame, FrameParser, MavVersion, ParseEvent};
use endpoint::Endpoint;
pub use set::LinkSet;
use pump::{spawn_pump, PumpEvent, PumpHandle, TransportSource};
use transport::Transport;

/// Silence after which a link is declared unhealthy
pub const LINK_SILENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Message types whose arrival proves the vehicle side is alive
pub const LIVENESS_MESSAGES: &[u32] = &[
    MSG_ID_HEARTBEAT,
    MSG_ID_SYS_STATUS,
    MSG_ID_GPS_RAW_INT,
    MSG_ID_GPS2_RAW,
    MSG_ID_GLOBAL_POSITION_INT,
];

/// True if `message_id` can bring a link back to healthy
pub fn is_liveness(message_id: u32) -> bool {
    LIVENESS_MESSAGES.contains(&message_id)
}

/// Which side of the proxy a link sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Connection to the autopilot
    Master,
    /// Connection to a consumer receiving a forwarded copy
    Output,
}

/// Health latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// Opened, nothing heard yet
    Pending,
    Healthy,
    Unhealthy,
}

/// A change of [`LinkHealth`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// Pending to healthy; not announced
    Established,
    /// Unhealthy to healthy
    Recovered,
    /// Pending or healthy to unhealthy
    Lost,
}

/// Options applied when opening endpoints
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub default_baud: u32,
    pub rtscts: bool,
    pub reconnect_interval: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            default_baud: endpoint::DEFAULT_BAUD_RATE,
            rtscts: false,
            reconnect_interval: Duration::from_secs(1),
        }
    }
}

/// One item produced by [`Link::read`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInput {
    /// A complete frame, stamped with its receipt time
    Frame(Frame),
    /// Bytes that could not be framed
    BadData {
        data: Bytes,
        reason: String,
        received_us: u64,
    },
    /// Undecoded bytes exactly as read, before framing
    Raw(Bytes),
    /// Transport opened (or reopened)
    TransportUp(String),
    /// Transport failed; the pump keeps retrying
    TransportDown(String),
}

/// Counters reported by the `link` command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames received
    pub received: u64,
    /// Frames missing according to sequence numbers
    pub lost: u64,
    /// Bad-data records
    pub bad_data: u64,
    /// Frames queued for sending
    pub sent: u64,
    /// Frames dropped because the outbound queue was full
    pub dropped: u64,
}

/// A MAVLink connection
pub struct Link {
    index: usize,
    role: LinkRole,
    label: String,
    pump: PumpHandle,
    parser: FrameParser,
    health: LinkHealth,
    link_delayed: bool,
    highest_msec: u32,
    opened_at: Instant,
    last_message: Option<Instant>,
    last_heartbeat: Option<Instant>,
    transport_up: bool,
    stats: LinkStats,
    last_seq: HashMap<(u8, u8), u8>,
    tx_seq: u8,
    peer_version: MavVersion,
    forced_version: Option<MavVersion>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("index", &self.index)
            .field("role", &self.role)
            .field("label", &self.label)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Open a link to `spec`
    ///
    /// The transport is opened in the background and reopened on failure,
    /// so an unreachable device does not fail here.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::InvalidConfig`] if `spec` is not a valid endpoint.
    pub fn open(
        index: usize,
        role: LinkRole,
        spec: &str,
        options: &LinkOptions,
        wake: Arc<Notify>,
    ) -> Result<Self> {
        let endpoint = Endpoint::parse(spec, options.default_baud)?;
        let label = endpoint.to_string();
        let source = TransportSource::Endpoint {
            endpoint,
            rtscts: options.rtscts,
            reconnect_interval: options.reconnect_interval,
        };
        Ok(Self::with_pump(index, role, label, spawn_pump(source, wake)))
    }

    /// Wrap an already-open transport (simulators, tests)
    pub fn attach(
        index: usize,
        role: LinkRole,
        transport: Box<dyn Transport>,
        wake: Arc<Notify>,
    ) -> Self {
        let label = transport.describe();
        Self::with_pump(index, role, label, spawn_pump(TransportSource::Fixed(transport), wake))
    }

    fn with_pump(index: usize, role: LinkRole, label: String, pump: PumpHandle) -> Self {
        Self {
            index,
            role,
            label,
            pump,
            parser: FrameParser::new(),
            health: LinkHealth::Pending,
            link_delayed: false,
            highest_msec: 0,
            opened_at: Instant::now(),
            last_message: None,
            last_heartbeat: None,
            transport_up: false,
            stats: LinkStats::default(),
            last_seq: HashMap::new(),
            tx_seq: 0,
            peer_version: MavVersion::V1,
            forced_version: None,
        }
    }

    /// Zero-based index, stable for the life of the process
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Endpoint description
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn health(&self) -> LinkHealth {
        self.health
    }

    pub fn is_healthy(&self) -> bool {
        self.health == LinkHealth::Healthy
    }

    /// True while this link lags behind the freshest autopilot clock
    pub fn link_delayed(&self) -> bool {
        self.link_delayed
    }

    /// Highest `time_boot_ms` seen on this link
    pub fn highest_msec(&self) -> u32 {
        self.highest_msec
    }

    /// When the link was created
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn last_message(&self) -> Option<Instant> {
        self.last_message
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    pub fn transport_up(&self) -> bool {
        self.transport_up
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Drain everything the transport has delivered, without waiting
    ///
    /// Returns an empty list when nothing is queued; that is never an
    /// error and never changes link health.
    pub fn read(&mut self) -> Vec<LinkInput> {
        let mut inputs = Vec::new();

        loop {
            match self.pump.inbound.try_recv() {
                Ok(PumpEvent::Data { bytes, received_us }) => {
                    inputs.push(LinkInput::Raw(bytes.clone()));
                    for event in self.parser.push(&bytes) {
                        match event {
                            ParseEvent::Frame(mut frame) => {
                                frame.timestamp_us = Some(received_us);
                                inputs.push(LinkInput::Frame(frame));
                            }
                            ParseEvent::BadData { data, reason } => {
                                inputs.push(LinkInput::BadData {
                                    data,
                                    reason,
                                    received_us,
                                });
                            }
                        }
                    }
                }
                Ok(PumpEvent::Up(description)) => {
                    self.transport_up = true;
                    inputs.push(LinkInput::TransportUp(description));
                }
                Ok(PumpEvent::Down(reason)) => {
                    self.transport_up = false;
                    self.parser.reset();
                    inputs.push(LinkInput::TransportDown(reason));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        inputs
    }

    /// Queue raw frame bytes for sending, unchanged
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] when the outbound queue is full or
    /// the pump has stopped. The frame is dropped in both cases.
    pub fn write(&mut self, bytes: Bytes) -> Result<()> {
        match self.pump.outbound.try_send(bytes) {
            Ok(()) => {
                self.stats.sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.dropped += 1;
                Err(ProxyError::transport(&self.label, format!("write dropped: {}", e)))
            }
        }
    }

    /// Encode and send a message originated by the proxy itself
    ///
    /// Uses the MAVLink version last heard from the far side.
    pub fn send_message(
        &mut self,
        system_id: u8,
        component_id: u8,
        message_id: u32,
        payload: &[u8],
    ) -> Result<()> {
        let header = FrameHeader {
            version: self.peer_version,
            seq: self.tx_seq,
            system_id,
            component_id,
        };
        let frame = encode_frame(header, message_id, payload)?;
        self.tx_seq = self.tx_seq.wrapping_add(1);
        self.write(frame)
    }

    /// Send our own frames as `version` regardless of what the far side uses
    pub fn force_version(&mut self, version: MavVersion) {
        self.forced_version = Some(version);
        self.peer_version = version;
    }

    /// Count a received frame and check its sequence number for gaps
    pub fn record_receipt(&mut self, frame: &Frame) {
        self.stats.received += 1;
        if self.forced_version.is_none() {
            self.peer_version = frame.version;
        }

        let source = (frame.system_id, frame.component_id);
        if let Some(last) = self.last_seq.insert(source, frame.seq) {
            let expected = last.wrapping_add(1);
            let gap = frame.seq.wrapping_sub(expected);
            if gap != 0 {
                debug!(
                    "link {}: {} lost from {}:{} (seq {} expected {})",
                    self.index + 1,
                    gap,
                    source.0,
                    source.1,
                    frame.seq,
                    expected
                );
                self.stats.lost += gap as u64;
            }
        }
    }

    /// Count a bad-data record
    pub fn record_bad_data(&mut self) {
        self.stats.bad_data += 1;
    }

    /// Percentage of frames lost, from sequence gaps
    pub fn packet_loss(&self) -> f64 {
        let total = self.stats.received + self.stats.lost;
        if total == 0 {
            return 0.0;
        }
        100.0 * self.stats.lost as f64 / total as f64
    }

    /// Note that a frame arrived at `now`
    ///
    /// Only liveness messages move the latch to healthy.
    pub fn note_message(&mut self, now: Instant, message_id: u32) -> Option<HealthTransition> {
        self.last_message = Some(now);
        if message_id == MSG_ID_HEARTBEAT {
            self.last_heartbeat = Some(now);
        }

        if !is_liveness(message_id) {
            return None;
        }

        match self.health {
            LinkHealth::Healthy => None,
            LinkHealth::Pending => {
                self.health = LinkHealth::Healthy;
                Some(HealthTransition::Established)
            }
            LinkHealth::Unhealthy => {
                self.health = LinkHealth::Healthy;
                Some(HealthTransition::Recovered)
            }
        }
    }

    /// Declare the link unhealthy if it has been silent for `timeout`
    pub fn check_silence(&mut self, now: Instant, timeout: Duration) -> Option<HealthTransition> {
        if self.health == LinkHealth::Unhealthy {
            return None;
        }
        let since = self.last_message.unwrap_or(self.opened_at);
        if now.saturating_duration_since(since) > timeout {
            self.health = LinkHealth::Unhealthy;
            return Some(HealthTransition::Lost);
        }
        None
    }

    /// Declare the link unhealthy after a transport failure
    pub fn mark_transport_failed(&mut self) -> Option<HealthTransition> {
        if self.health == LinkHealth::Unhealthy {
            return None;
        }
        self.health = LinkHealth::Unhealthy;
        Some(HealthTransition::Lost)
    }

    pub(crate) fn set_link_delayed(&mut self, delayed: bool) {
        self.link_delayed = delayed;
    }

    pub(crate) fn set_highest_msec(&mut self, msec: u32) {
        self.highest_msec = msec;
    }

    /// Forget parser state, sequence history and counters
    pub fn reset(&mut self) {
        self.parser.reset();
        self.last_seq.clear();
        self.stats = LinkStats::default();
        self.link_delayed = false;
        self.highest_msec = 0;
    }

    #[cfg(test)]
    pub(crate) fn backdate_open(&mut self, by: Duration) {
        self.opened_at -= by;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::encoder::encode_frame;
    use transport::memory_pair;
    use transport::mocks::MockTransport;

    fn heartbeat(seq: u8) -> Bytes {
        let header = FrameHeader {
            version: MavVersion::V1,
            seq,
            system_id: 1,
            component_id: 1,
        };
        encode_frame(header, MSG_ID_HEARTBEAT, &[0, 0, 0, 0, 2, 3, 0, 4, 3]).unwrap()
    }

    fn frame_from(bytes: &Bytes) -> Frame {
        match FrameParser::new().push(bytes).remove(0) {
            ParseEvent::Frame(f) => f,
            other => panic!("Expected frame, got: {:?}", other),
        }
    }

    async fn wait_for_input(link: &mut Link) -> Vec<LinkInput> {
        for _ in 0..100 {
            let inputs = link.read();
            if !inputs.is_empty() {
                return inputs;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn test_read_decodes_and_stamps_frames() {
        let (transport, peer) = memory_pair("veh");
        let mut link = Link::attach(0, LinkRole::Master, Box::new(transport), Arc::new(Notify::new()));

        let inputs = wait_for_input(&mut link).await;
        assert!(matches!(inputs[0], LinkInput::TransportUp(_)));
        assert!(link.transport_up());

        peer.to_link.send(heartbeat(0)).unwrap();
        let inputs = wait_for_input(&mut link).await;
        let frames: Vec<_> = inputs
            .iter()
            .filter_map(|i| match i {
                LinkInput::Frame(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].timestamp_us.is_some());
        assert!(inputs.iter().any(|i| matches!(i, LinkInput::Raw(_))));
    }

    #[tokio::test]
    async fn test_empty_read_is_harmless() {
        let mut link = Link::attach(
            1,
            LinkRole::Master,
            Box::new(MockTransport::new()),
            Arc::new(Notify::new()),
        );
        wait_for_input(&mut link).await;

        for _ in 0..10 {
            assert!(link.read().is_empty());
        }
        assert_eq!(link.health(), LinkHealth::Pending);
    }

    #[tokio::test]
    async fn test_write_forwards_bytes_verbatim() {
        let (transport, mut peer) = memory_pair("gcs");
        let mut link = Link::attach(0, LinkRole::Output, Box::new(transport), Arc::new(Notify::new()));

        let raw = Bytes::from_static(&[0xFE, 0x02, 0x05, 0x01, 0x01, 200, 0xAA, 0xBB, 0x12, 0x34]);
        link.write(raw.clone()).unwrap();
        assert_eq!(peer.from_link.recv().await.unwrap(), raw);
        assert_eq!(link.stats().sent, 1);
    }

    #[tokio::test]
    async fn test_send_message_increments_sequence() {
        let (transport, mut peer) = memory_pair("veh");
        let mut link = Link::attach(0, LinkRole::Master, Box::new(transport), Arc::new(Notify::new()));

        link.send_message(255, 0, MSG_ID_HEARTBEAT, &[0u8; 9]).unwrap();
        link.send_message(255, 0, MSG_ID_HEARTBEAT, &[0u8; 9]).unwrap();

        let first = frame_from(&peer.from_link.recv().await.unwrap());
        let second = frame_from(&peer.from_link.recv().await.unwrap());
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(first.system_id, 255);
    }

    #[tokio::test]
    async fn test_send_version_follows_peer_unless_forced() {
        let (transport, mut peer) = memory_pair("veh");
        let mut link = Link::attach(0, LinkRole::Master, Box::new(transport), Arc::new(Notify::new()));

        let v2 = encode_frame(
            FrameHeader {
                version: MavVersion::V2,
                seq: 0,
                system_id: 1,
                component_id: 1,
            },
            MSG_ID_HEARTBEAT,
            &[0, 0, 0, 0, 2, 3, 0, 4, 3],
        )
        .unwrap();
        link.record_receipt(&frame_from(&v2));
        link.send_message(255, 0, MSG_ID_HEARTBEAT, &[0u8; 9]).unwrap();
        assert_eq!(frame_from(&peer.from_link.recv().await.unwrap()).version, MavVersion::V2);

        link.force_version(MavVersion::V1);
        link.record_receipt(&frame_from(&v2));
        link.send_message(255, 0, MSG_ID_HEARTBEAT, &[0u8; 9]).unwrap();
        assert_eq!(frame_from(&peer.from_link.recv().await.unwrap()).version, MavVersion::V1);
    }

    #[tokio::test]
    async fn test_packet_loss_from_sequence_gaps() {
        let mut link = Link::attach(
            0,
            LinkRole::Master,
            Box::new(MockTransport::new()),
            Arc::new(Notify::new()),
        );
        assert_eq!(link.packet_loss(), 0.0);

        for seq in [0u8, 1, 2, 5, 6] {
            link.record_receipt(&frame_from(&heartbeat(seq)));
        }

        // seq 3 and 4 missing: 2 lost out of 7
        assert_eq!(link.stats().lost, 2);
        assert!((link.packet_loss() - 200.0 / 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sequence_wraps_without_loss() {
        let mut link = Link::attach(
            0,
            LinkRole::Master,
            Box::new(MockTransport::new()),
            Arc::new(Notify::new()),
        );
        for seq in [254u8, 255, 0, 1] {
            link.record_receipt(&frame_from(&heartbeat(seq)));
        }
        assert_eq!(link.stats().lost, 0);
    }

    #[tokio::test]
    async fn test_health_latch_transitions_once() {
        let mut link = Link::attach(
            1,
            LinkRole::Master,
            Box::new(MockTransport::new()),
            Arc::new(Notify::new()),
        );
        let start = Instant::now();

        assert_eq!(link.check_silence(start, LINK_SILENCE_TIMEOUT), None);

        let later = start + Duration::from_secs(6);
        assert_eq!(link.check_silence(later, LINK_SILENCE_TIMEOUT), Some(HealthTransition::Lost));
        assert_eq!(link.check_silence(later + Duration::from_secs(3), LINK_SILENCE_TIMEOUT), None);

        // A non-liveness message does not recover the link
        assert_eq!(link.note_message(later, 30), None);
        assert_eq!(link.health(), LinkHealth::Unhealthy);

        assert_eq!(
            link.note_message(later, MSG_ID_HEARTBEAT),
            Some(HealthTransition::Recovered)
        );
        assert_eq!(link.note_message(later, MSG_ID_HEARTBEAT), None);
        assert!(link.is_healthy());
    }

    #[tokio::test]
    async fn test_first_liveness_message_is_silent_transition() {
        let mut link = Link::attach(
            0,
            LinkRole::Master,
            Box::new(MockTransport::new()),
            Arc::new(Notify::new()),
        );
        assert_eq!(
            link.note_message(Instant::now(), MSG_ID_SYS_STATUS),
            Some(HealthTransition::Established)
        );
    }

    #[tokio::test]
    async fn test_second_gps_counts_as_liveness() {
        let mut link = Link::attach(
            0,
            LinkRole::Master,
            Box::new(MockTransport::new()),
            Arc::new(Notify::new()),
        );
        assert_eq!(
            link.note_message(Instant::now(), MSG_ID_GPS2_RAW),
            Some(HealthTransition::Established)
        );
        assert!(link.is_healthy());
    }

    #[test]
    fn test_open_rejects_bad_endpoint() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let result = Link::open(0, LinkRole::Master, "udpout:nohost", &LinkOptions::default(), Arc::new(Notify::new()));
        assert!(matches!(result, Err(ProxyError::InvalidConfig(_))));
    }
}
