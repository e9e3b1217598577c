//! Link session: connection lifecycle state machine, reliable command
//! channel and the credential exchanges layered on top of it.
//!
//! All session state (link state, the single pending response, the warm
//! cache) is owned by one spawned actor task; transport events, API calls
//! and timers are serialized onto it through channels, so concurrent
//! callers never race on shared state.

use crate::{
    cache::{is_valid_pin, CredentialCache},
    chunker::{chunk, Reassembler},
    error::{DongleError, Result},
    protocol::{self, Command},
    transport::{Transport, TransportEvent, WriteMode},
    types::{CredentialEntry, DeviceInfo, LinkConfig, LinkState},
};
use std::{sync::Arc, time::Instant};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::sleep,
};
use tracing::{debug, info, warn};

/// Outcome of a warm credential fetch
#[derive(Debug)]
pub struct WarmFetch {
    /// Cached payload for this PIN, filled before any transport I/O
    pub cached: Option<String>,
    /// Result of the live two-step exchange; [`DongleError::NotReady`] when
    /// the link could not carry it
    pub live: Result<String>,
}

enum SessionCommand {
    Scan {
        done: oneshot::Sender<Result<Vec<DeviceInfo>>>,
    },
    Connect {
        id: String,
        done: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        done: oneshot::Sender<Result<()>>,
    },
    Send {
        line: String,
        done: oneshot::Sender<Result<()>>,
    },
    Request {
        line: String,
        responder: oneshot::Sender<Result<String>>,
    },
    SendLowLatency {
        line: String,
    },
    SetStatusSink {
        sink: mpsc::UnboundedSender<String>,
    },
}

/// Cloneable handle to a running link session
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    state_rx: watch::Receiver<LinkState>,
    cache: Arc<CredentialCache>,
    config: Arc<LinkConfig>,
}

/// Owner of the session actor task.
///
/// Hold one `LinkSession` in the application context and pass
/// [`SessionHandle`] clones to every consumer; the actor is aborted when the
/// session is dropped. The handle API is available directly on the session
/// through `Deref`.
pub struct LinkSession {
    handle: SessionHandle,
    task: tokio::task::JoinHandle<()>,
}

impl LinkSession {
    /// Spawn the session actor over the given transport.
    ///
    /// Returns the session and the initial status receiver carrying
    /// human-readable status messages. The status sink follows last-listener-
    /// wins semantics: [`SessionHandle::set_status_sink`] replaces it.
    pub fn spawn<T: Transport>(
        transport: T,
        config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(CredentialCache::new());
        let config = Arc::new(config);

        let actor = Actor {
            reassembler: Reassembler::new(config.idle_timeout, config.duplicate_window),
            frame_size: config.default_frame_size,
            transport,
            config: Arc::clone(&config),
            state_tx,
            status_tx,
            pending: None,
            last_target: None,
            reconnect_attempts: 0,
            user_disconnected: false,
            reconnect_deadline: None,
        };
        let task = tokio::spawn(actor.run(cmd_rx));

        let handle = SessionHandle {
            cmd_tx,
            state_rx,
            cache,
            config,
        };
        (Self { handle, task }, status_rx)
    }

    /// A fresh handle for another consumer
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }
}

impl std::ops::Deref for LinkSession {
    type Target = SessionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SessionHandle {
    /// Current link state
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state_rx.borrow().clone()
    }

    /// Wait until the link reaches `Ready`
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::SessionClosed`] if the session actor is gone.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.state_rx.clone();
        loop {
            if rx.borrow().is_ready() {
                return Ok(());
            }
            rx.changed().await.map_err(|_| DongleError::SessionClosed)?;
        }
    }

    /// Scan for dongles
    ///
    /// # Errors
    ///
    /// Returns transport scan errors or [`DongleError::SessionClosed`].
    pub async fn scan(&self) -> Result<Vec<DeviceInfo>> {
        let (done, rx) = oneshot::channel();
        self.dispatch(SessionCommand::Scan { done })?;
        rx.await.map_err(|_| DongleError::SessionClosed)?
    }

    /// Connect to a device by identity.
    ///
    /// Valid only from `Disconnected` or `Reconnecting`. Completion of the
    /// link itself is observed via [`Self::wait_ready`] or the status channel.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::ConnectionFailed`] when called from any other
    /// state or when the transport rejects the attempt.
    pub async fn connect(&self, id: &str) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.dispatch(SessionCommand::Connect {
            id: id.to_string(),
            done,
        })?;
        rx.await.map_err(|_| DongleError::SessionClosed)?
    }

    /// Disconnect, disabling auto-reconnect and cancelling any pending
    /// scheduled attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::SessionClosed`] if the session actor is gone.
    pub async fn disconnect(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.dispatch(SessionCommand::Disconnect { done })?;
        rx.await.map_err(|_| DongleError::SessionClosed)?
    }

    /// Send one line, newline-terminated and chunked at the conservative
    /// default frame size, with inter-chunk pacing.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::NotReady`] outside the `Ready` state, or the
    /// transport write error.
    pub async fn send(&self, line: &str) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.dispatch(SessionCommand::Send {
            line: line.to_string(),
            done,
        })?;
        rx.await.map_err(|_| DongleError::SessionClosed)?
    }

    /// Send a typed command
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`].
    pub async fn send_command(&self, command: &Command) -> Result<()> {
        self.send(&command.encode()).await
    }

    /// Send a line and await the idle-gap-framed response.
    ///
    /// At most one response may be pending per session: a later `request`
    /// supersedes an earlier one (last-write-wins), whose caller receives
    /// [`DongleError::Superseded`]. There is no internal deadline beyond the
    /// idle-gap window; callers needing one should wrap this in their own
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::NotReady`] outside `Ready`,
    /// [`DongleError::Superseded`] when replaced,
    /// [`DongleError::Disconnected`] if the link drops while waiting, or
    /// [`DongleError::SessionClosed`] if the session stops while waiting.
    pub async fn request(&self, line: &str) -> Result<String> {
        let (responder, rx) = oneshot::channel();
        self.dispatch(SessionCommand::Request {
            line: line.to_string(),
            responder,
        })?;
        match rx.await {
            Ok(result) => result,
            // A dropped responder normally means a later request replaced
            // this one; if the actor itself is gone, the session is closed.
            Err(_) if self.cmd_tx.is_closed() => Err(DongleError::SessionClosed),
            Err(_) => Err(DongleError::Superseded),
        }
    }

    /// Best-effort unacknowledged send at the negotiated frame size, for
    /// continuous real-time control streams. Failures are logged, never
    /// surfaced; lines that exceed the negotiated frame fall back to the
    /// acknowledged chunked path.
    pub fn send_low_latency(&self, line: &str) {
        let _ = self.cmd_tx.send(SessionCommand::SendLowLatency {
            line: line.to_string(),
        });
    }

    /// Replace the status sink (last listener wins)
    pub fn set_status_sink(&self, sink: mpsc::UnboundedSender<String>) {
        let _ = self.cmd_tx.send(SessionCommand::SetStatusSink { sink });
    }

    /// The session's credential warm cache
    #[must_use]
    pub fn credential_cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// Warm credential fetch: the cache is consulted synchronously before
    /// any transport I/O, then a live refresh runs when the link is `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidPin`] for a malformed PIN. Live-path
    /// failures are carried inside [`WarmFetch::live`] so a cache hit is
    /// never lost to them.
    pub async fn warm_fetch(&self, pin: &str) -> Result<WarmFetch> {
        if !is_valid_pin(pin) {
            return Err(DongleError::InvalidPin);
        }
        let cached = self.cache.lookup(pin);
        let live = if self.state().is_ready() {
            self.fetch_credentials_live(pin).await
        } else {
            Err(DongleError::NotReady {
                reason: format!("link is {}", self.state()),
            })
        };
        Ok(WarmFetch { cached, live })
    }

    /// Two-step authenticated credential read (`RETRIEVEPW`, then the PIN).
    /// Updates the warm cache with the fresh payload.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidPin`], [`DongleError::GateRefused`] with
    /// the device's text when a gate fails, or any channel error.
    pub async fn fetch_credentials_live(&self, pin: &str) -> Result<String> {
        if !is_valid_pin(pin) {
            return Err(DongleError::InvalidPin);
        }
        let gate = self.request(&Command::RetrievePw.encode()).await?;
        if !protocol::is_ok(&gate) {
            return Err(DongleError::GateRefused(gate));
        }
        sleep(self.config.step_gap).await;
        let payload = self.request(pin).await?;
        self.cache.store(pin, &payload);
        Ok(payload)
    }

    /// Three-step authenticated PIN change (`CHANGELOGIN`, old PIN, new PIN).
    /// Returns the device's final response text.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidPin`] for malformed PINs,
    /// [`DongleError::GateRefused`] when a gate fails, or any channel error.
    pub async fn change_pin(&self, old_pin: &str, new_pin: &str) -> Result<String> {
        if !is_valid_pin(old_pin) || !is_valid_pin(new_pin) {
            return Err(DongleError::InvalidPin);
        }
        let gate = self.request(&Command::ChangeLogin.encode()).await?;
        if !protocol::is_ok(&gate) {
            return Err(DongleError::GateRefused(gate));
        }
        sleep(self.config.step_gap).await;
        let auth = self.request(old_pin).await?;
        if !protocol::is_ok(&auth) {
            return Err(DongleError::GateRefused(auth));
        }
        sleep(self.config.step_gap).await;
        self.request(new_pin).await
    }

    /// Three-step authenticated credential overwrite (`PWUPDATE`, PIN,
    /// CSV payload). An empty entry set is encoded as a single space; the
    /// cache is updated when the device confirms with `OK`.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidPin`], [`DongleError::GateRefused`]
    /// when a gate fails, or any channel error.
    pub async fn push_credentials(
        &self,
        pin: &str,
        entries: &[CredentialEntry],
    ) -> Result<String> {
        if !is_valid_pin(pin) {
            return Err(DongleError::InvalidPin);
        }
        let payload = protocol::encode_credential_csv(entries);
        let gate = self.request(&Command::PwUpdate.encode()).await?;
        if !protocol::is_ok(&gate) {
            return Err(DongleError::GateRefused(gate));
        }
        sleep(self.config.step_gap).await;
        let auth = self.request(pin).await?;
        if !protocol::is_ok(&auth) {
            return Err(DongleError::GateRefused(auth));
        }
        sleep(self.config.step_gap).await;
        let response = self.request(&payload).await?;
        if protocol::is_ok(&response) {
            self.cache.store(pin, &payload);
        }
        Ok(response)
    }

    /// Request the device macro file listing
    ///
    /// # Errors
    ///
    /// Same as [`Self::request`].
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let response = self.request(&Command::List.encode()).await?;
        Ok(protocol::parse_file_listing(&response))
    }

    /// Play a device-stored macro; returns the device's response text
    ///
    /// # Errors
    ///
    /// Same as [`Self::request`].
    pub async fn play_file(&self, name: &str) -> Result<String> {
        self.request(&Command::Play(name.to_string()).encode()).await
    }

    /// Retrieve the content of a device-stored macro
    ///
    /// # Errors
    ///
    /// Same as [`Self::request`].
    pub async fn view_file(&self, name: &str) -> Result<String> {
        self.request(&Command::View(name.to_string()).encode()).await
    }

    /// Start the device-side recording mirror
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`].
    pub async fn start_device_record(&self, name: &str) -> Result<()> {
        self.send_command(&Command::Record(name.to_string())).await
    }

    /// Stop the device-side recording mirror
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`].
    pub async fn stop_device_record(&self) -> Result<()> {
        self.send_command(&Command::StopRecord).await
    }

    fn dispatch(&self, command: SessionCommand) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| DongleError::SessionClosed)
    }
}

struct Actor<T: Transport> {
    transport: T,
    config: Arc<LinkConfig>,
    state_tx: watch::Sender<LinkState>,
    status_tx: mpsc::UnboundedSender<String>,
    reassembler: Reassembler,
    pending: Option<oneshot::Sender<Result<String>>>,
    frame_size: usize,
    last_target: Option<String>,
    reconnect_attempts: u32,
    user_disconnected: bool,
    reconnect_deadline: Option<tokio::time::Instant>,
}

impl<T: Transport> Actor<T> {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>) {
        let mut events = match self.transport.take_events() {
            Some(rx) => rx,
            None => {
                warn!("transport events already taken, session cannot receive");
                return;
            }
        };

        loop {
            let idle_deadline = self.reassembler.idle_deadline();
            let idle_sleep = async {
                match idle_deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending().await,
                }
            };
            let reconnect_deadline = self.reconnect_deadline;
            let reconnect_sleep = async {
                match reconnect_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        self.status("Transport closed");
                        break;
                    }
                },
                () = idle_sleep => self.finalize_response(),
                () = reconnect_sleep => self.attempt_reconnect().await,
            }
        }
        debug!("session actor stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Scan { done } => {
                let result = self.transport.scan(self.config.scan_timeout).await;
                let _ = done.send(result);
            }
            SessionCommand::Connect { id, done } => {
                let _ = done.send(self.start_connect(id).await);
            }
            SessionCommand::Disconnect { done } => {
                let _ = done.send(self.do_disconnect().await);
            }
            SessionCommand::Send { line, done } => {
                let _ = done.send(self.do_send(&line).await);
            }
            SessionCommand::Request { line, responder } => {
                if !self.state().is_ready() {
                    let _ = responder.send(Err(self.not_ready()));
                    return;
                }
                // Last-write-wins: a superseded caller's receiver resolves
                // with an error when the old sender drops here.
                self.pending = Some(responder);
                self.reassembler.discard_partial();
                if let Err(e) = self.do_send(&line).await {
                    if let Some(responder) = self.pending.take() {
                        let _ = responder.send(Err(e));
                    }
                }
            }
            SessionCommand::SendLowLatency { line } => {
                self.do_send_low_latency(&line).await;
            }
            SessionCommand::SetStatusSink { sink } => {
                self.status_tx = sink;
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if self.state() != LinkState::Connecting {
                    debug!("ignoring Connected event in state {}", self.state());
                    return;
                }
                self.status("Connected, discovering services...");
                // Discovering too early fails on some peers.
                sleep(self.config.settle_delay).await;
                self.set_state(LinkState::ServiceDiscovery);
                self.finish_discovery().await;
            }
            TransportEvent::Disconnected { reason } => {
                if matches!(
                    self.state(),
                    LinkState::Disconnected | LinkState::Reconnecting { .. }
                ) {
                    debug!("ignoring Disconnected event in state {}", self.state());
                    return;
                }
                info!("link dropped: {reason}");
                self.status(&reason);
                self.drop_link(DongleError::Disconnected);
                self.set_state(LinkState::Disconnected);
                if !self.user_disconnected && self.config.reconnect.enabled {
                    self.schedule_reconnect();
                }
            }
            TransportEvent::Notification(data) => self.handle_notification(&data),
        }
    }

    async fn finish_discovery(&mut self) {
        match self.transport.discover_services().await {
            Ok(profile) if profile.has_uart => {
                match self
                    .transport
                    .negotiate_frame_size(self.config.requested_frame_size)
                    .await
                {
                    Ok(granted) => {
                        debug!("frame size negotiated: {granted}");
                        self.frame_size = granted;
                    }
                    Err(e) => {
                        // Non-fatal: the conservative default always works.
                        debug!("frame negotiation failed (non-critical): {e}");
                    }
                }
                if let Err(e) = self.transport.subscribe_notifications().await {
                    self.fail_attempt(&format!("Enabling notifications failed: {e}"))
                        .await;
                    return;
                }
                self.reconnect_attempts = 0;
                self.set_state(LinkState::Ready);
                self.status("Connected to PWDongle");
            }
            Ok(_) => {
                self.fail_attempt("Error: UART service not found").await;
            }
            Err(e) => {
                self.fail_attempt(&format!("Service discovery failed: {e}"))
                    .await;
            }
        }
    }

    /// Terminal failure of one connection attempt: surface it, tear the
    /// transport down and leave the attempt eligible for reconnect.
    async fn fail_attempt(&mut self, status: &str) {
        warn!("{status}");
        self.status(status);
        let _ = self.transport.disconnect().await;
        self.drop_link(DongleError::Disconnected);
        self.set_state(LinkState::Disconnected);
        if !self.user_disconnected && self.config.reconnect.enabled {
            self.schedule_reconnect();
        }
    }

    fn handle_notification(&mut self, data: &[u8]) {
        let now = Instant::now();
        if self.pending.is_some() {
            self.reassembler.accept(data, now);
        } else if self.reassembler.accept(data, now) {
            // Unsolicited traffic is surfaced, never buffered.
            let text = String::from_utf8_lossy(data);
            self.status(&format!("Response: {text}"));
            self.reassembler.discard_partial();
        }
    }

    fn finalize_response(&mut self) {
        if let Some(text) = self.reassembler.take_if_idle(Instant::now()) {
            if let Some(responder) = self.pending.take() {
                let _ = responder.send(Ok(text));
            }
        }
    }

    async fn start_connect(&mut self, id: String) -> Result<()> {
        let state = self.state();
        if !state.can_connect() {
            return Err(DongleError::ConnectionFailed(format!(
                "connect is not valid while {state}"
            )));
        }
        self.user_disconnected = false;
        self.reconnect_deadline = None;
        self.last_target = Some(id.clone());
        self.set_state(LinkState::Connecting);
        self.status(&format!("Connecting to {id}..."));
        if let Err(e) = self.transport.connect(&id).await {
            self.set_state(LinkState::Disconnected);
            return Err(e);
        }
        Ok(())
    }

    async fn do_disconnect(&mut self) -> Result<()> {
        self.user_disconnected = true;
        self.reconnect_deadline = None;
        self.reconnect_attempts = 0;
        self.drop_link(DongleError::Disconnected);
        let result = self.transport.disconnect().await;
        self.set_state(LinkState::Disconnected);
        self.status("Disconnected");
        result
    }

    async fn do_send(&mut self, line: &str) -> Result<()> {
        if !self.state().is_ready() {
            return Err(self.not_ready());
        }
        let chunks = chunk(line, self.config.default_frame_size);
        let last = chunks.len() - 1;
        for (i, piece) in chunks.iter().enumerate() {
            self.transport.write(piece, WriteMode::Acknowledged).await?;
            if i < last {
                sleep(self.config.chunk_pacing).await;
            }
        }
        debug!("sent: {line}");
        Ok(())
    }

    async fn do_send_low_latency(&mut self, line: &str) {
        if !self.state().is_ready() {
            debug!("low-latency send dropped, link not ready");
            return;
        }
        let mut data = line.as_bytes().to_vec();
        data.push(b'\n');
        if data.len() <= self.frame_size {
            if let Err(e) = self.transport.write(&data, WriteMode::Unacknowledged).await {
                debug!("low-latency send failed: {e}");
            }
        } else {
            // Oversized lines take the standard chunked path.
            debug!("line exceeds negotiated frame ({}), chunking", self.frame_size);
            if let Err(e) = self.do_send(line).await {
                debug!("low-latency fallback send failed: {e}");
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let policy = &self.config.reconnect;
        if self.last_target.is_none() {
            return;
        }
        if self.reconnect_attempts >= policy.max_attempts {
            warn!("max reconnection attempts ({}) reached", policy.max_attempts);
            self.status(&format!(
                "Reconnection failed after {} attempts",
                policy.max_attempts
            ));
            return;
        }
        self.reconnect_attempts += 1;
        let delay = policy.delay_for_attempt(self.reconnect_attempts);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.set_state(LinkState::Reconnecting {
            attempt: self.reconnect_attempts,
            next_delay_ms: delay_ms,
        });
        self.status(&format!(
            "Reconnecting in {}s (attempt {}/{})",
            delay.as_secs_f64().ceil() as u64,
            self.reconnect_attempts,
            policy.max_attempts
        ));
        self.reconnect_deadline = Some(tokio::time::Instant::now() + delay);
    }

    async fn attempt_reconnect(&mut self) {
        self.reconnect_deadline = None;
        let Some(id) = self.last_target.clone() else {
            return;
        };
        info!("reconnect attempt {} to {id}", self.reconnect_attempts);
        self.status(&format!("Reconnecting to {id}..."));
        self.set_state(LinkState::Connecting);
        if let Err(e) = self.transport.connect(&id).await {
            self.status(&format!("Reconnection failed: {e}"));
            self.set_state(LinkState::Disconnected);
            self.schedule_reconnect();
        }
    }

    /// Resolve a pending response with an error and clear inbound state
    fn drop_link(&mut self, error: DongleError) {
        if let Some(responder) = self.pending.take() {
            let _ = responder.send(Err(error));
        }
        self.reassembler.reset();
    }

    fn not_ready(&self) -> DongleError {
        DongleError::NotReady {
            reason: format!("link is {}", self.state()),
        }
    }

    fn state(&self) -> LinkState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, state: LinkState) {
        debug!("link state: {state}");
        self.state_tx.send_replace(state);
    }

    fn status(&self, message: &str) {
        let _ = self.status_tx.send(message.to_string());
    }
}
