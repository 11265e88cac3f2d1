//! Flow-controlled delivery of one framebuffer to the badge.
//!
//! [`TransferSession`] does no I/O. Operations queue [`Request`]s for a driver to
//! carry out (see [`crate::link`]), and the driver feeds outcomes back through
//! [`TransferSession::handle_event`]. All state lives here and is only touched from
//! that one control context, so at most one write is ever in flight.

use std::collections::VecDeque;

use tokio::sync::watch;
use uuid::Uuid;

use crate::config::LinkConfig;
use crate::error::SendError;
use crate::packed::PackedBitmap;
use crate::protocol::{
    effective_chunk_size, frame_writes, DEFAULT_MTU, FRAMEBUFFER_UUID, FRAME_HEADER_LEN,
    MAX_FRAME_PAYLOAD, PREFERRED_MTU, SERVICE_UUID,
};
use crate::transport::{DeviceInfo, MtuOutcome, ServiceInfo, TransportEvent};

/// What discovery failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Service,
    Characteristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    NegotiatingMtu,
    Discovering,
    Ready,
    Sending,
    /// The last transfer was aborted by a write failure. The link is still usable.
    Failed,
    /// Discovery came back without the badge service or characteristic.
    /// Only a fresh connect gets out of this.
    NotFound(Missing),
    Disconnected,
}

/// An operation the driver must start on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    StartScan,
    StopScan,
    Connect(String),
    RequestMtu(u16),
    DiscoverServices,
    Write { characteristic: Uuid, data: Vec<u8> },
    Disconnect,
}

/// Snapshot published to observers after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Human-readable summary of the last thing that happened.
    pub message: String,
    pub negotiated_mtu: u16,
    pub chunk_size: usize,
    pub sent_total: usize,
    pub expected_total: usize,
    pub pending_chunks: usize,
    pub scanning: bool,
    pub scan_hits: u32,
    pub last_scan_failure: Option<String>,
    pub devices: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub preferred_mtu: u16,
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            preferred_mtu: PREFERRED_MTU,
            service: SERVICE_UUID,
            characteristic: FRAMEBUFFER_UUID,
        }
    }
}

impl From<&LinkConfig> for LinkSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            preferred_mtu: config.preferred_mtu,
            service: config.service_uuid,
            characteristic: config.characteristic_uuid,
        }
    }
}

pub struct TransferSession {
    settings: LinkSettings,
    state: SessionState,
    message: String,
    characteristic: Option<Uuid>,
    negotiated_mtu: u16,
    queue: VecDeque<Vec<u8>>,
    /// Length of the chunk awaiting acknowledgment.
    in_flight: Option<usize>,
    sent_total: usize,
    expected_total: usize,
    scanning: bool,
    scan_hits: u32,
    last_scan_failure: Option<String>,
    devices: Vec<DeviceInfo>,
    outbox: VecDeque<Request>,
    status_tx: watch::Sender<SessionStatus>,
}

impl TransferSession {
    pub fn new(settings: LinkSettings) -> Self {
        let mut session = Self {
            settings,
            state: SessionState::Idle,
            message: "Idle".to_string(),
            characteristic: None,
            negotiated_mtu: DEFAULT_MTU,
            queue: VecDeque::new(),
            in_flight: None,
            sent_total: 0,
            expected_total: 0,
            scanning: false,
            scan_hits: 0,
            last_scan_failure: None,
            devices: Vec::new(),
            outbox: VecDeque::new(),
            status_tx: watch::channel(placeholder_status()).0,
        };
        session.publish();
        session
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready && self.characteristic.is_some()
    }

    pub fn sent_total(&self) -> usize {
        self.sent_total
    }

    pub fn expected_total(&self) -> usize {
        self.expected_total
    }

    /// Chunks queued behind the one in flight.
    pub fn pending_chunks(&self) -> usize {
        self.queue.len()
    }

    pub fn negotiated_mtu(&self) -> u16 {
        self.negotiated_mtu
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            message: self.message.clone(),
            negotiated_mtu: self.negotiated_mtu,
            chunk_size: effective_chunk_size(self.negotiated_mtu),
            sent_total: self.sent_total,
            expected_total: self.expected_total,
            pending_chunks: self.queue.len(),
            scanning: self.scanning,
            scan_hits: self.scan_hits,
            last_scan_failure: self.last_scan_failure.clone(),
            devices: self.devices.clone(),
        }
    }

    /// Next operation for the driver to start.
    pub fn poll_request(&mut self) -> Option<Request> {
        self.outbox.pop_front()
    }

    pub fn start_scan(&mut self) {
        if self.scanning {
            self.outbox.push_back(Request::StopScan);
        }
        self.scanning = true;
        self.scan_hits = 0;
        self.last_scan_failure = None;
        self.devices.clear();
        self.outbox.push_back(Request::StartScan);
        self.set_message("Scanning...");
    }

    /// Forgets the scan right away; the transport is asked to stop on a best-effort basis.
    pub fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        self.outbox.push_back(Request::StopScan);
        self.set_message(format!("Scan stopped ({} hits)", self.scan_hits));
    }

    /// Starts a fresh connection. A running scan is stopped and any existing link
    /// is torn down first.
    pub fn connect(&mut self, address: &str) {
        self.stop_scan();
        if self.link_active() {
            self.outbox.push_back(Request::Disconnect);
        }
        self.reset_link();
        self.sent_total = 0;
        self.expected_total = 0;
        self.state = SessionState::Connecting;
        self.outbox.push_back(Request::Connect(address.to_string()));
        tracing::info!(address, "connecting");
        self.set_message(format!("Connecting to {address}..."));
    }

    /// Drops the link and anything still queued.
    pub fn disconnect(&mut self) {
        if self.link_active() {
            self.outbox.push_back(Request::Disconnect);
        }
        self.reset_link();
        self.state = SessionState::Disconnected;
        self.set_message("Disconnected");
    }

    pub fn send(&mut self, bitmap: &PackedBitmap) -> Result<(), SendError> {
        self.send_payload(bitmap.as_bytes())
    }

    /// Queues one frame (header + payload) and starts draining it.
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<(), SendError> {
        if self.state == SessionState::Sending || self.in_flight.is_some() {
            tracing::warn!(
                sent = self.sent_total,
                expected = self.expected_total,
                "send refused, transfer already in flight"
            );
            return Err(SendError::Busy);
        }
        let usable = matches!(self.state, SessionState::Ready | SessionState::Failed);
        if !usable || self.characteristic.is_none() {
            self.set_message("Not ready (connect first)");
            return Err(SendError::NotReady);
        }
        let chunk_size = effective_chunk_size(self.negotiated_mtu);
        let writes = frame_writes(payload, chunk_size).ok_or(SendError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_FRAME_PAYLOAD,
        })?;

        self.queue = writes.into();
        self.sent_total = 0;
        self.expected_total = FRAME_HEADER_LEN + payload.len();
        self.state = SessionState::Sending;
        tracing::info!(
            bytes = self.expected_total,
            chunk_size,
            writes = self.queue.len(),
            "sending frame"
        );
        self.message = format!("Sending... (0/{}) chunk={chunk_size}", self.expected_total);
        self.pump();
        self.publish();
        Ok(())
    }

    /// Applies one transport event. This is the only place link state advances.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ScanHit(device) => self.on_scan_hit(device),
            TransportEvent::ScanFailed(reason) => {
                self.scanning = false;
                self.message = format!("Scan failed: {reason}");
                self.last_scan_failure = Some(reason);
            }
            TransportEvent::Connected => {
                if self.state != SessionState::Connecting {
                    tracing::debug!(state = ?self.state, "stale connect event ignored");
                    return;
                }
                self.state = SessionState::NegotiatingMtu;
                self.outbox
                    .push_back(Request::RequestMtu(self.settings.preferred_mtu));
                self.message = "Connected. Negotiating MTU...".to_string();
            }
            TransportEvent::ConnectFailed(error) => {
                if self.state != SessionState::Connecting {
                    return;
                }
                tracing::warn!(%error, "connect failed");
                self.state = SessionState::Disconnected;
                self.message = format!("Connect failed: {error}");
            }
            TransportEvent::Disconnected => {
                if matches!(self.state, SessionState::Idle | SessionState::Disconnected) {
                    return;
                }
                let was_sending = self.state == SessionState::Sending;
                self.reset_link();
                self.state = SessionState::Disconnected;
                self.message = if was_sending {
                    format!("Disconnected (sent {}/{})", self.sent_total, self.expected_total)
                } else {
                    "Disconnected".to_string()
                };
                tracing::info!(was_sending, "link dropped");
            }
            TransportEvent::Mtu(outcome) => self.on_mtu(outcome),
            TransportEvent::ServicesDiscovered(result) => self.on_services(result),
            TransportEvent::WriteComplete(result) => {
                let Some(len) = self.in_flight.take() else {
                    tracing::debug!("write completion with nothing in flight ignored");
                    return;
                };
                match result {
                    Ok(()) => {
                        self.sent_total += len;
                        self.message =
                            format!("Sending... ({}/{})", self.sent_total, self.expected_total);
                        self.pump();
                    }
                    Err(error) => {
                        let dropped = self.queue.len();
                        self.queue.clear();
                        self.state = SessionState::Failed;
                        tracing::warn!(%error, sent = self.sent_total, dropped, "write failed, transfer aborted");
                        self.message = format!(
                            "Write failed: {error} (sent {}/{})",
                            self.sent_total, self.expected_total
                        );
                    }
                }
            }
        }
        self.publish();
    }

    fn on_scan_hit(&mut self, device: DeviceInfo) {
        if !self.scanning {
            return;
        }
        self.scan_hits += 1;
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(known) => *known = device,
            None => {
                tracing::debug!(id = %device.id, name = ?device.name, "device found");
                self.devices.push(device);
            }
        }
    }

    fn on_mtu(&mut self, outcome: MtuOutcome) {
        if self.state != SessionState::NegotiatingMtu {
            return;
        }
        // whatever the outcome, discovery goes ahead with the MTU we ended up with
        self.message = match outcome {
            MtuOutcome::Granted(mtu) if mtu >= DEFAULT_MTU => {
                self.negotiated_mtu = mtu;
                format!("MTU = {mtu}. Discovering services...")
            }
            MtuOutcome::Granted(mtu) => {
                format!("MTU {mtu} below minimum, using {DEFAULT_MTU}. Discovering services...")
            }
            MtuOutcome::Rejected(reason) => {
                format!("MTU request failed ({reason}). Discovering services...")
            }
            MtuOutcome::Unsupported => "MTU fixed by transport. Discovering services...".to_string(),
        };
        tracing::info!(mtu = self.negotiated_mtu, "mtu settled");
        self.state = SessionState::Discovering;
        self.outbox.push_back(Request::DiscoverServices);
    }

    fn on_services(&mut self, result: Result<Vec<ServiceInfo>, crate::error::TransportError>) {
        if self.state != SessionState::Discovering {
            return;
        }
        let services = match result {
            Ok(services) => services,
            Err(error) => {
                self.state = SessionState::NotFound(Missing::Service);
                self.message = format!("Service discovery failed: {error}");
                return;
            }
        };
        let Some(service) = services.iter().find(|s| s.uuid == self.settings.service) else {
            tracing::warn!(service = %self.settings.service, "badge service not found");
            self.state = SessionState::NotFound(Missing::Service);
            self.message = "Service not found".to_string();
            return;
        };
        if !service.characteristics.contains(&self.settings.characteristic) {
            tracing::warn!(characteristic = %self.settings.characteristic, "framebuffer characteristic not found");
            self.state = SessionState::NotFound(Missing::Characteristic);
            self.message = "Framebuffer characteristic not found".to_string();
            return;
        }
        self.characteristic = Some(self.settings.characteristic);
        self.state = SessionState::Ready;
        self.message = "Ready".to_string();
        tracing::info!(mtu = self.negotiated_mtu, "badge ready");
    }

    /// Issues the next queued chunk unless one is already awaiting its ack.
    fn pump(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(characteristic) = self.characteristic else {
            return;
        };
        match self.queue.pop_front() {
            Some(data) => {
                self.in_flight = Some(data.len());
                self.outbox.push_back(Request::Write {
                    characteristic,
                    data,
                });
            }
            None => {
                self.state = SessionState::Ready;
                self.message = format!("Send done ({}/{})", self.sent_total, self.expected_total);
                tracing::info!(sent = self.sent_total, "frame delivered");
            }
        }
    }

    fn link_active(&self) -> bool {
        !matches!(self.state, SessionState::Idle | SessionState::Disconnected)
    }

    fn reset_link(&mut self) {
        self.characteristic = None;
        self.queue.clear();
        self.in_flight = None;
        self.negotiated_mtu = DEFAULT_MTU;
    }

    fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.publish();
    }

    fn publish(&mut self) {
        let status = self.status();
        self.status_tx.send_replace(status);
    }
}

fn placeholder_status() -> SessionStatus {
    SessionStatus {
        state: SessionState::Idle,
        message: String::new(),
        negotiated_mtu: DEFAULT_MTU,
        chunk_size: effective_chunk_size(DEFAULT_MTU),
        sent_total: 0,
        expected_total: 0,
        pending_chunks: 0,
        scanning: false,
        scan_hits: 0,
        last_scan_failure: None,
        devices: Vec::new(),
    }
}
