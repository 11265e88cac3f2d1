//! Async driver for [`TransferSession`].
//!
//! One task owns the session. User commands and transport events meet in a single
//! `select!` loop, so session state is never touched from two places at once.
//! Requests the session emits go to a second task that runs them one at a time,
//! in order, and their outcomes come back into the loop as events.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::SendError;
use crate::packed::PackedBitmap;
use crate::session::{LinkSettings, Request, SessionStatus, TransferSession};
use crate::transport::{EventSink, Transport, TransportEvent};

enum Command {
    StartScan,
    StopScan,
    Connect(String),
    Send(PackedBitmap, oneshot::Sender<Result<(), SendError>>),
    Disconnect,
}

/// Handle to a running link. Cheap calls; progress is observed through the status.
pub struct BadgeLink {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    task: JoinHandle<()>,
}

impl BadgeLink {
    /// Spawns the control loop on the current tokio runtime.
    ///
    /// - `transport`: backend the requests run against (BLE or mock)
    /// - `settings`: MTU to ask for and the service/characteristic to require
    pub fn spawn<T: Transport>(transport: T, settings: LinkSettings) -> Self {
        let session = TransferSession::new(settings);
        let status = session.subscribe();
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(transport, session, rx));
        Self {
            commands,
            status,
            task,
        }
    }

    pub fn start_scan(&self) {
        self.command(Command::StartScan);
    }

    pub fn stop_scan(&self) {
        self.command(Command::StopScan);
    }

    pub fn connect(&self, address: &str) {
        self.command(Command::Connect(address.to_string()));
    }

    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Queues `bitmap` for transfer. Resolves as soon as the session has accepted or
    /// refused it; delivery is reported through [`BadgeLink::status`].
    pub async fn send(&self, bitmap: PackedBitmap) -> Result<(), SendError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send(bitmap, tx))
            .map_err(|_| SendError::LinkClosed)?;
        rx.await.map_err(|_| SendError::LinkClosed)?
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Waits until the status satisfies `pred`. `None` if the loop has ended.
    pub async fn wait_for(
        &self,
        mut pred: impl FnMut(&SessionStatus) -> bool,
    ) -> Option<SessionStatus> {
        let mut rx = self.status.clone();
        let status = rx.wait_for(|s| pred(s)).await.ok().map(|s| (*s).clone());
        status
    }

    /// Stops the loop, disconnecting first if a link is up.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(error) = self.task.await {
            tracing::warn!(%error, "link task ended abnormally");
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("link task has shut down, command dropped");
        }
    }
}

async fn run<T: Transport>(
    transport: T,
    mut session: TransferSession,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let sink = EventSink::new(event_tx);
    let (requests, request_rx) = mpsc::unbounded_channel();
    let executor = tokio::spawn(execute_all(transport, request_rx, sink.clone()));

    loop {
        forward(&mut session, &requests);
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => apply(&mut session, command),
                None => break,
            },
            Some(event) = events.recv() => session.handle_event(event),
        }
    }

    session.disconnect();
    forward(&mut session, &requests);
    // executor drains whatever is still queued, then stops
    drop(requests);
    if let Err(error) = executor.await {
        tracing::warn!(%error, "request executor ended abnormally");
    }
    tracing::debug!("link loop stopped");
}

fn apply(session: &mut TransferSession, command: Command) {
    match command {
        Command::StartScan => session.start_scan(),
        Command::StopScan => session.stop_scan(),
        Command::Connect(address) => session.connect(&address),
        Command::Disconnect => session.disconnect(),
        Command::Send(bitmap, reply) => {
            // the caller may have stopped waiting; the session outcome stands either way
            let _ = reply.send(session.send(&bitmap));
        }
    }
}

/// Moves everything the session queued over to the executor.
fn forward(session: &mut TransferSession, requests: &mpsc::UnboundedSender<Request>) {
    while let Some(request) = session.poll_request() {
        if requests.send(request).is_err() {
            tracing::warn!("request executor gone, request dropped");
            return;
        }
    }
}

/// The only place transport operations are started. Each one completes before
/// the next begins, in the order the session issued them.
async fn execute_all<T: Transport>(
    transport: T,
    mut requests: mpsc::UnboundedReceiver<Request>,
    sink: EventSink,
) {
    while let Some(request) = requests.recv().await {
        execute(&transport, request, &sink).await;
    }
}

async fn execute<T: Transport>(transport: &T, request: Request, sink: &EventSink) {
    match request {
        Request::StartScan => {
            if let Err(error) = transport.start_scan(sink.clone()).await {
                sink.emit(TransportEvent::ScanFailed(error.to_string()));
            }
        }
        Request::StopScan => {
            if let Err(error) = transport.stop_scan().await {
                tracing::debug!(%error, "stop scan refused, scan handle dropped anyway");
            }
        }
        Request::Connect(address) => match transport.connect(&address, sink.clone()).await {
            Ok(()) => sink.emit(TransportEvent::Connected),
            Err(error) => sink.emit(TransportEvent::ConnectFailed(error)),
        },
        Request::RequestMtu(mtu) => sink.emit(TransportEvent::Mtu(transport.request_mtu(mtu).await)),
        Request::DiscoverServices => {
            sink.emit(TransportEvent::ServicesDiscovered(transport.discover_services().await))
        }
        Request::Write {
            characteristic,
            data,
        } => {
            let result = transport.write_with_response(characteristic, &data).await;
            sink.emit(TransportEvent::WriteComplete(result));
        }
        Request::Disconnect => {
            if let Err(error) = transport.disconnect().await {
                tracing::debug!(%error, "disconnect failed");
            }
        }
    }
}
