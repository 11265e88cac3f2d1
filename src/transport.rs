use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// One discovered GATT service and the characteristics it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Result of asking the link for a larger MTU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MtuOutcome {
    Granted(u16),
    Rejected(String),
    /// The backend cannot negotiate at all.
    Unsupported,
}

/// Everything that can happen on the link, in the order it is observed.
#[derive(Debug)]
pub enum TransportEvent {
    ScanHit(DeviceInfo),
    ScanFailed(String),
    Connected,
    ConnectFailed(TransportError),
    /// The link dropped, or a disconnect completed.
    Disconnected,
    Mtu(MtuOutcome),
    ServicesDiscovered(Result<Vec<ServiceInfo>, TransportError>),
    /// Acknowledgment (or rejection) of the single outstanding write.
    WriteComplete(Result<(), TransportError>),
}

/// Where a transport posts events it produces on its own (scan hits, link drops).
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { tx }
    }

    /// Posts an event; silently dropped once the receiving loop is gone.
    pub fn emit(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event sink closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An ordered, acknowledged, chunk-oriented link to one badge.
///
/// Every call starts one operation and resolves when the backend reports its
/// outcome. Callers never have more than one `write_with_response` pending.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Starts scanning; hits are posted as [`TransportEvent::ScanHit`].
    async fn start_scan(&self, sink: EventSink) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Connects to `address`. Later link drops are posted as [`TransportEvent::Disconnected`].
    async fn connect(&self, address: &str, sink: EventSink) -> Result<(), TransportError>;

    async fn request_mtu(&self, mtu: u16) -> MtuOutcome;

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError>;

    /// Writes one chunk and waits for the remote's acknowledgment.
    async fn write_with_response(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
