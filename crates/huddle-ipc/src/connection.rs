//! Push-channel connection lifecycle.
//!
//! `ConnectionManager` owns at most one live link. A background task opens
//! the link, decodes inbound envelopes into `ConnectionEvent`s and writes
//! queued client messages. When the link drops it schedules exactly one
//! reconnect after the policy delay. `disconnect()` cancels everything and
//! leaves the manager in a terminal `Disconnected` state until the next
//! explicit `connect()`.
//!
//! Each run is tagged with a generation. State writes from a run that has
//! since been disconnected are discarded, and its event queue is dropped
//! with it, so nothing stale reaches the owner.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{FrameReader, FrameWriter, Transport};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

const OUTBOUND_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
}

impl ConnectionState {
    pub fn is_online(self) -> bool {
        self == ConnectionState::Connected
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    /// The link dropped or could not be opened; a reconnect is scheduled.
    Offline {
        reason: String,
        retry_in: Duration,
    },
    Message(ServerMessage),
}

/// Delay before each reconnect attempt.
///
/// With `factor == 1.0` (the default) every attempt waits `delay`, forever.
/// A larger factor grows the delay per consecutive failure up to `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            factor: 1.0,
            max_delay: delay,
        }
    }

    pub fn exponential(delay: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            delay,
            factor,
            max_delay,
        }
    }

    /// Delay after `failures` consecutive failed attempts (0 = first drop).
    pub fn delay_for(&self, failures: u32) -> Duration {
        if self.factor <= 1.0 || failures == 0 {
            return self.delay;
        }
        #[allow(clippy::cast_possible_wrap)]
        let exponent = failures.min(64) as i32;
        let secs = self.delay.as_secs_f64() * self.factor.powi(exponent);
        let cap = self.max_delay.max(self.delay);
        Duration::try_from_secs_f64(secs).map_or(cap, |delay| delay.min(cap))
    }
}

/// Connection state shared with the run task, guarded by generation.
#[derive(Debug)]
struct StateCell {
    tx: watch::Sender<ConnectionState>,
    generation: AtomicU64,
}

impl StateCell {
    /// Publish `state` only if `generation` is still the current run.
    fn set(&self, generation: u64, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn force(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

struct Run {
    cancel: CancellationToken,
    retry_now: Arc<Notify>,
    outbound: mpsc::Sender<ClientMessage>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state: Arc<StateCell>,
    generation: u64,
    run: Option<Run>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("generation", &self.generation)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            policy,
            state: Arc::new(StateCell {
                tx,
                generation: AtomicU64::new(0),
            }),
            generation: 0,
            run: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.tx.subscribe()
    }

    /// Identifies the current run. Bumped by every `disconnect()`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start the connection loop.
    ///
    /// A no-op while connecting or connected. While a reconnect is pending
    /// it skips the remaining delay instead of opening a second link.
    pub fn connect(&mut self) {
        if let Some(run) = &self.run {
            if self.state() == ConnectionState::ReconnectScheduled {
                debug!("connect requested while waiting, retrying now");
                run.retry_now.notify_one();
            }
            return;
        }

        let cancel = CancellationToken::new();
        let retry_now = Arc::new(Notify::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = RunTask {
            transport: Arc::clone(&self.transport),
            policy: self.policy.clone(),
            state: Arc::clone(&self.state),
            generation: self.generation,
            events: events_tx,
            outbound: outbound_rx,
            cancel: cancel.clone(),
            retry_now: Arc::clone(&retry_now),
        };
        let span = info_span!("push_connection", generation = self.generation);
        self.state.set(self.generation, ConnectionState::Connecting);
        tokio::spawn(task.run().instrument(span));

        self.run = Some(Run {
            cancel,
            retry_now,
            outbound: outbound_tx,
            events: events_rx,
        });
    }

    /// Stop the connection loop and cancel any scheduled reconnect.
    ///
    /// Events still queued from the stopped run are discarded.
    pub fn disconnect(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        self.generation += 1;
        self.state.generation.store(self.generation, Ordering::SeqCst);
        run.cancel.cancel();
        self.state.force(ConnectionState::Disconnected);
        info!("push channel disconnected");
    }

    /// Queue a `request_sync` for the server.
    ///
    /// Returns `false` when there is no running connection to carry it. A
    /// fresh connection always receives an unsolicited `state_sync`.
    pub fn request_sync(&self) -> bool {
        self.send(ClientMessage::RequestSync)
    }

    pub fn send(&self, message: ClientMessage) -> bool {
        let Some(run) = &self.run else {
            debug!(?message, "not connected, dropping client message");
            return false;
        };
        match run.outbound.try_send(message) {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %error, "failed to queue client message");
                false
            }
        }
    }

    /// Next event from the current run.
    ///
    /// Pends forever while disconnected, so it can sit in a `select!`.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        match self.run.as_mut() {
            Some(run) => run.events.recv().await,
            None => std::future::pending().await,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
        }
    }
}

struct RunTask {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state: Arc<StateCell>,
    generation: u64,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    outbound: mpsc::Receiver<ClientMessage>,
    cancel: CancellationToken,
    retry_now: Arc<Notify>,
}

enum LinkExit {
    Cancelled,
    Dropped(String),
}

impl RunTask {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            self.state.set(self.generation, ConnectionState::Connecting);
            let opened = tokio::select! {
                opened = self.transport.open() => opened,
                () = self.cancel.cancelled() => break,
            };

            let reason = match opened {
                Ok((mut reader, mut writer)) => {
                    failures = 0;
                    self.state.set(self.generation, ConnectionState::Connected);
                    info!("push channel connected");
                    let _ = self.events.send(ConnectionEvent::Connected);

                    let exit = self.pump(reader.as_mut(), writer.as_mut()).await;
                    writer.close().await;
                    match exit {
                        LinkExit::Cancelled => break,
                        LinkExit::Dropped(reason) => reason,
                    }
                }
                Err(error) => format!("{error:#}"),
            };

            let retry_in = self.policy.delay_for(failures);
            failures = failures.saturating_add(1);
            self.state
                .set(self.generation, ConnectionState::ReconnectScheduled);
            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = retry_in.as_millis() as u64;
            warn!(reason = %reason, delay_ms, "push channel offline, reconnect scheduled");
            let _ = self
                .events
                .send(ConnectionEvent::Offline { reason, retry_in });

            tokio::select! {
                () = tokio::time::sleep(retry_in) => {}
                () = self.retry_now.notified() => debug!("reconnect delay skipped"),
                () = self.cancel.cancelled() => break,
            }
        }

        self.state.set(self.generation, ConnectionState::Disconnected);
        debug!("push connection task stopped");
    }

    async fn pump(
        &mut self,
        reader: &mut dyn FrameReader,
        writer: &mut dyn FrameWriter,
    ) -> LinkExit {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return LinkExit::Cancelled,
                frame = reader.recv_text() => match frame {
                    Ok(Some(text)) => self.dispatch(&text),
                    Ok(None) => return LinkExit::Dropped("connection closed by server".to_owned()),
                    Err(error) => return LinkExit::Dropped(format!("{error:#}")),
                },
                Some(message) = self.outbound.recv() => {
                    if let Err(error) = writer.send(&message).await {
                        return LinkExit::Dropped(format!("{error:#}"));
                    }
                    debug!(?message, "client message sent");
                }
            }
        }
    }

    /// Decode one frame. Malformed frames are logged and dropped; they never
    /// end the link.
    fn dispatch(&self, text: &str) {
        match ServerMessage::decode(text) {
            Ok(message) => {
                debug!(kind = message.kind(), "push envelope received");
                let _ = self.events.send(ConnectionEvent::Message(message));
            }
            Err(error) => {
                warn!(
                    error = %format!("{error:#}"),
                    bytes = text.len(),
                    "dropping malformed push envelope"
                );
            }
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use huddle_core::{DashboardData, Message};
    use tokio::time::Instant;

    fn manager(transport: &Arc<ScriptedTransport>) -> ConnectionManager {
        let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
        ConnectionManager::new(transport, ReconnectPolicy::default())
    }

    async fn expect_connected(manager: &mut ConnectionManager) {
        assert_eq!(manager.next_event().await, Some(ConnectionEvent::Connected));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_decoded_envelopes() {
        let transport = Arc::new(ScriptedTransport::new());
        let link = transport.accept();
        let mut manager = manager(&transport);

        manager.connect();
        expect_connected(&mut manager).await;

        link.push(&ServerMessage::StateSync(DashboardData::default()));
        assert_eq!(
            manager.next_event().await,
            Some(ConnectionEvent::Message(ServerMessage::StateSync(
                DashboardData::default()
            )))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_envelopes_do_not_drop_the_link() {
        let transport = Arc::new(ScriptedTransport::new());
        let link = transport.accept();
        let mut manager = manager(&transport);

        manager.connect();
        expect_connected(&mut manager).await;

        link.push_raw("{this is not json");
        link.push_raw(r#"{"type":"mystery"}"#);
        let message = Message::new("m1", "qa", "coordinator", "2025-01-01");
        link.push(&ServerMessage::MessageAdded(message.clone()));

        assert_eq!(
            manager.next_event().await,
            Some(ConnectionEvent::Message(ServerMessage::MessageAdded(message)))
        );
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::new());
        let _link = transport.accept();
        let mut manager = manager(&transport);

        manager.connect();
        manager.connect();
        expect_connected(&mut manager).await;
        manager.connect();
        tokio::task::yield_now().await;

        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_once_after_fixed_delay() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut first = transport.accept();
        let _second = transport.accept();
        let mut manager = manager(&transport);

        manager.connect();
        expect_connected(&mut manager).await;

        first.close();
        let Some(ConnectionEvent::Offline { retry_in, .. }) = manager.next_event().await else {
            panic!("expected offline event");
        };
        assert_eq!(retry_in, DEFAULT_RECONNECT_DELAY);
        assert_eq!(manager.state(), ConnectionState::ReconnectScheduled);
        let dropped_at = Instant::now();

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(transport.attempts(), 1);

        expect_connected(&mut manager).await;
        assert_eq!(dropped_at.elapsed(), DEFAULT_RECONNECT_DELAY);
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut link = transport.accept();
        let _unused = transport.accept();
        let mut manager = manager(&transport);

        manager.connect();
        expect_connected(&mut manager).await;
        link.close();
        assert!(matches!(
            manager.next_event().await,
            Some(ConnectionEvent::Offline { .. })
        ));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_is_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.refuse("server down");
        let _link = transport.accept();
        let mut manager = manager(&transport);

        manager.connect();
        let Some(ConnectionEvent::Offline { reason, .. }) = manager.next_event().await else {
            panic!("expected offline event");
        };
        assert!(reason.contains("server down"));

        expect_connected(&mut manager).await;
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_waiting_retries_immediately() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.refuse("server down");
        let _link = transport.accept();
        let mut manager = manager(&transport);

        manager.connect();
        assert!(matches!(
            manager.next_event().await,
            Some(ConnectionEvent::Offline { .. })
        ));
        let started = Instant::now();

        manager.connect();
        expect_connected(&mut manager).await;
        assert!(started.elapsed() < DEFAULT_RECONNECT_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn request_sync_reaches_the_server() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut link = transport.accept();
        let mut manager = manager(&transport);

        assert!(!manager.request_sync());

        manager.connect();
        expect_connected(&mut manager).await;
        assert!(manager.request_sync());
        assert_eq!(link.next_sent().await, Some(ClientMessage::RequestSync));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_disconnect_starts_new_generation() {
        let transport = Arc::new(ScriptedTransport::new());
        let first = transport.accept();
        let second = transport.accept();
        let mut manager = manager(&transport);

        manager.connect();
        expect_connected(&mut manager).await;
        first.push(&ServerMessage::AgentOnline {
            agent: "qa".into(),
            is_online: true,
        });
        tokio::task::yield_now().await;

        manager.disconnect();
        manager.connect();
        expect_connected(&mut manager).await;
        assert_eq!(manager.generation(), 1);

        second.push(&ServerMessage::AgentOnline {
            agent: "qa".into(),
            is_online: false,
        });
        assert_eq!(
            manager.next_event().await,
            Some(ConnectionEvent::Message(ServerMessage::AgentOnline {
                agent: "qa".into(),
                is_online: false,
            }))
        );
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), DEFAULT_RECONNECT_DELAY);
        assert_eq!(policy.delay_for(50), DEFAULT_RECONNECT_DELAY);
    }

    #[test]
    fn exponential_policy_is_capped() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(30),
        );
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }
}
