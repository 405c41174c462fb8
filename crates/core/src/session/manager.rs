//! Connection supervision: connect, retry, keepalive and invocation.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use super::{Dispatcher, KeepalivePulse, RetryPolicy};
use crate::{
    auth::{AuthContext, Credentials},
    cache::SnapshotCache,
    config::AppConfig,
    error::{SessionError, TransportError},
    hub::{methods, Connector, HubEndpoint, HubMessage, HubTransport, WebSocketConnector},
    models::Level,
    store::SessionStore,
};

/// How long a user disconnect waits for the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle state of the hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no retry scheduled.
    #[default]
    Disconnected,
    /// First attempt in progress.
    Connecting,
    /// Handshake done; invocations are accepted.
    Connected,
    /// Retrying after a failure or a lost connection.
    Reconnecting,
}

impl ConnectionState {
    /// Human readable name.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the manager does after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Try again after the delay.
    Retry(Duration),
    /// Attempts exhausted; only a manual reconnect helps.
    GiveUp,
    /// Not retryable (bad credential).
    Stop,
}

/// Connection record. Changes only through the `on_*` lifecycle methods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    state: ConnectionState,
    transport: Option<&'static str>,
    last_error: Option<String>,
    attempt: u32,
    retry_in: Option<Duration>,
    manual_retry_required: bool,
}

impl Connection {
    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Transport label while connected.
    pub fn transport(&self) -> Option<&'static str> {
        self.transport
    }

    /// Most recent failure, kept until the next successful connect.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Retry attempts made since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the scheduled retry, if one is scheduled.
    pub fn retry_in(&self) -> Option<Duration> {
        self.retry_in
    }

    /// Set once retries are exhausted or the credential was rejected.
    pub fn manual_retry_required(&self) -> bool {
        self.manual_retry_required
    }

    /// An attempt is starting.
    pub fn on_connecting(&mut self) {
        self.state = if self.attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        self.retry_in = None;
        self.manual_retry_required = false;
    }

    /// Handshake finished; resets the retry counter.
    pub fn on_connected(&mut self, transport: &'static str) {
        *self = Connection {
            state: ConnectionState::Connected,
            transport: Some(transport),
            ..Connection::default()
        };
    }

    /// Opening the connection failed. Authentication failures are never retried.
    pub fn on_connect_failed(&mut self, error: &SessionError, policy: &RetryPolicy) -> Transition {
        self.transport = None;
        self.last_error = Some(error.to_string());
        if !error.is_retryable() {
            self.state = ConnectionState::Disconnected;
            self.attempt = 0;
            self.retry_in = None;
            self.manual_retry_required = true;
            return Transition::Stop;
        }
        self.schedule_retry(policy)
    }

    /// An established connection dropped.
    pub fn on_disconnected(&mut self, reason: impl Into<String>, policy: &RetryPolicy) -> Transition {
        self.transport = None;
        self.last_error = Some(reason.into());
        self.schedule_retry(policy)
    }

    /// The user asked to disconnect; forget everything.
    pub fn on_user_disconnect(&mut self) {
        *self = Connection::default();
    }

    fn schedule_retry(&mut self, policy: &RetryPolicy) -> Transition {
        match policy.next_delay(self.attempt) {
            Some(delay) => {
                self.attempt += 1;
                self.state = ConnectionState::Reconnecting;
                self.retry_in = Some(delay);
                self.manual_retry_required = false;
                Transition::Retry(delay)
            }
            None => {
                self.state = ConnectionState::Disconnected;
                self.retry_in = None;
                self.manual_retry_required = true;
                Transition::GiveUp
            }
        }
    }
}

/// Observable view of the connection, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Line shown in the status bar.
    pub message: String,
    /// Transport label while connected.
    pub transport: Option<&'static str>,
    /// Retry attempts made since the last successful connection.
    pub attempt: u32,
    /// Retry ceiling from the policy.
    pub max_attempts: u32,
    /// Delay before the next retry, while one is scheduled.
    pub retry_in: Option<Duration>,
    /// Most recent failure.
    pub last_error: Option<String>,
    /// Retries are exhausted or were never allowed.
    pub manual_retry_required: bool,
}

impl SessionStatus {
    fn new(connection: &Connection, max_attempts: u32, message: impl Into<String>) -> Self {
        Self {
            state: connection.state,
            message: message.into(),
            transport: connection.transport,
            attempt: connection.attempt,
            max_attempts,
            retry_in: connection.retry_in,
            last_error: connection.last_error.clone(),
            manual_retry_required: connection.manual_retry_required,
        }
    }

    /// True once the hub handshake finished.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Tunables of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Reconnect backoff.
    pub policy: RetryPolicy,
    /// Interval between `KeepAlive` invocations while connected.
    pub keepalive_interval: Duration,
    /// Silence from the hub after which the connection counts as lost.
    pub server_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            keepalive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionOptions {
    /// Backoff and timers from `[retry]` and `[hub]`.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config.retry),
            keepalive_interval: config.hub.keepalive_interval(),
            server_timeout: config.hub.server_timeout(),
        }
    }
}

enum Outbound {
    Message(HubMessage),
    Close,
}

enum Ended {
    ByUser,
    Lost(String),
}

enum Next {
    Open(Box<dyn HubTransport>, mpsc::UnboundedReceiver<Outbound>),
    RetryAfter(Duration),
}

#[derive(Default)]
struct Shared {
    /// Bumped whenever a session is torn down; stale supervisors check it.
    generation: u64,
    connection: Connection,
    link: Option<mpsc::UnboundedSender<Outbound>>,
    supervisor: Option<JoinHandle<()>>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    auth: AuthContext,
    options: SessionOptions,
    keepalive: KeepalivePulse,
    shared: Mutex<Shared>,
    status: watch::Sender<SessionStatus>,
    next_invocation: AtomicU64,
}

/// Owns the hub connection of one user session.
///
/// A supervisor task drives the live transport: it writes queued
/// invocations, hands pushed events to the [`Dispatcher`] in arrival order
/// and, when the connection drops without the user asking, reconnects
/// following the [`RetryPolicy`]. Every transition is published as a
/// [`SessionStatus`].
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Manager over `connector`. Credentials are read from `auth` on every
    /// attempt, so a token refreshed elsewhere is used by the next retry.
    pub fn new(
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher,
        auth: AuthContext,
        options: SessionOptions,
    ) -> Self {
        let context = dispatcher.context();
        let level = context.store.active_level();
        if let Some(cached) = context.cache.as_ref().and_then(|cache| cache.load_level(level)) {
            debug!(level, "showing cached snapshot");
            context.store.replace_snapshot(cached);
        }

        let (status, _) = watch::channel(SessionStatus::new(
            &Connection::default(),
            options.policy.max_attempts(),
            "Not connected",
        ));
        Self {
            inner: Arc::new(Inner {
                connector,
                dispatcher,
                auth,
                options,
                keepalive: KeepalivePulse::new(),
                shared: Mutex::new(Shared::default()),
                status,
                next_invocation: AtomicU64::new(1),
            }),
        }
    }

    /// Websocket-backed manager with the store and cache described by `config`.
    pub fn from_config(config: &AppConfig, auth: AuthContext) -> Result<Self, TransportError> {
        let endpoint = HubEndpoint::from_config(config)?;
        let store = Arc::new(SessionStore::new(config.session.default_level));
        let cache = SnapshotCache::new(config.cache.root());
        Ok(Self::new(
            Arc::new(WebSocketConnector::new(endpoint)),
            Dispatcher::new(store, Some(cache)),
            auth,
            SessionOptions::from_config(config),
        ))
    }

    /// Per-level timetables and in-flight state.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.dispatcher.context().store
    }

    /// Subscribe to status changes.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Status as of now.
    pub fn current_status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Open a connection with `credentials`, which also become the shared
    /// credential of the session.
    ///
    /// A missing credential fails with [`SessionError::Authentication`] and is
    /// not retried. A transport failure is returned as well, but the
    /// background retry loop keeps trying.
    pub async fn connect(&self, credentials: Credentials) -> Result<(), SessionError> {
        let generation = self.stop_session().await;
        let inner = &self.inner;

        if !credentials.is_present() {
            let error = SessionError::Authentication("no access token available".into());
            inner.connect_failed(generation, &error);
            return Err(error);
        }

        inner.auth.set(credentials.clone());
        {
            let mut shared = inner.shared.lock();
            shared.connection.on_connecting();
            inner.publish(&shared.connection, "Connecting to timetable hub");
        }

        match inner.connector.connect(&credentials).await {
            Ok(transport) => {
                if let Some(outbound) = inner.establish(generation, transport.name()) {
                    inner.spawn_supervisor(generation, Next::Open(transport, outbound));
                }
                Ok(())
            }
            Err(error) => {
                if let Some(Transition::Retry(delay)) = inner.connect_failed(generation, &error) {
                    inner.spawn_supervisor(generation, Next::RetryAfter(delay));
                }
                Err(error)
            }
        }
    }

    /// Manual retry: start over with the current shared credential and a
    /// fresh attempt counter.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        let credentials = self
            .inner
            .auth
            .credentials()
            .ok_or_else(|| SessionError::Authentication("sign in first".into()))?;
        info!("manual reconnect requested");
        self.connect(credentials).await
    }

    /// Close the connection on the user's behalf; nothing is retried.
    pub async fn disconnect(&self) {
        self.stop_session().await;
        let shared = self.inner.shared.lock();
        self.inner.publish(&shared.connection, "Disconnected");
    }

    /// Queue a hub invocation on the live connection.
    pub fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<(), SessionError> {
        let link = self
            .inner
            .shared
            .lock()
            .link
            .clone()
            .ok_or(SessionError::NotConnected)?;
        let level = self.store().active_level();
        link.send(Outbound::Message(self.inner.invocation(method, arguments, level)))
            .map_err(|_| SessionError::NotConnected)?;
        debug!(method, "invocation queued");
        Ok(())
    }

    /// Ask for the active level's timetable and saved timetables.
    pub fn refresh(&self) -> Result<(), SessionError> {
        let level = self.store().active_level();
        for (method, arguments) in refresh_calls(level) {
            self.invoke(method, arguments)?;
        }
        Ok(())
    }

    /// Show `level`: the cached snapshot immediately, a fresh one once the
    /// hub answers.
    pub fn select_level(&self, level: Level) {
        let context = self.inner.dispatcher.context();
        let cached = context.cache.as_ref().and_then(|cache| cache.load_level(level));
        info!(level, cached = cached.is_some(), "level selected");
        context.store.switch_level(level, cached);

        if self.current_status().is_connected() {
            if let Err(err) = self.refresh() {
                debug!(level, %err, "refresh after level switch skipped");
            }
        }
    }

    /// Tear down whatever session is running and return the new generation.
    async fn stop_session(&self) -> u64 {
        let (generation, link, supervisor) = {
            let mut shared = self.inner.shared.lock();
            shared.generation += 1;
            shared.connection.on_user_disconnect();
            self.inner.keepalive.stop();
            (shared.generation, shared.link.take(), shared.supervisor.take())
        };

        if let Some(mut supervisor) = supervisor {
            match link {
                Some(link) if link.send(Outbound::Close).is_ok() => {
                    if time::timeout(CLOSE_GRACE, &mut supervisor).await.is_err() {
                        warn!("hub connection did not close in time");
                        supervisor.abort();
                    }
                }
                _ => supervisor.abort(),
            }
        }
        generation
    }
}

impl Inner {
    fn publish(&self, connection: &Connection, message: impl Into<String>) {
        let status = SessionStatus::new(connection, self.options.policy.max_attempts(), message);
        info!(state = %status.state, attempt = status.attempt, status = %status.message, "session status");
        self.status.send_replace(status);
    }

    /// Invocation with a fresh id, tracked until its completion arrives.
    fn invocation(&self, method: &str, arguments: Vec<Value>, level: Level) -> HubMessage {
        let id = self.next_invocation.fetch_add(1, Ordering::Relaxed).to_string();
        self.dispatcher.context().requests.begin(id.clone(), level);
        HubMessage::invoke(id, method, arguments)
    }

    /// Register a freshly opened transport: reset the retry state, start the
    /// keepalive and queue the initial refresh. `None` when the session was
    /// torn down meanwhile.
    fn establish(
        &self,
        generation: u64,
        transport: &'static str,
    ) -> Option<mpsc::UnboundedReceiver<Outbound>> {
        let (link, outbound) = mpsc::unbounded_channel();
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return None;
        }

        shared.connection.on_connected(transport);
        shared.link = Some(link.clone());

        let beat = link.clone();
        self.keepalive.start(self.options.keepalive_interval, move || {
            let sent = beat
                .send(Outbound::Message(HubMessage::send(methods::KEEP_ALIVE, Vec::new())))
                .map_err(|_| SessionError::NotConnected);
            std::future::ready(sent)
        });

        // The receiver is alive, so these cannot fail.
        let context = self.dispatcher.context();
        context.requests.clear();
        let level = context.store.active_level();
        for (method, arguments) in refresh_calls(level) {
            let _ = link.send(Outbound::Message(self.invocation(method, arguments, level)));
        }

        self.publish(&shared.connection, format!("Connected via {transport}"));
        Some(outbound)
    }

    /// Record a failed connect; `None` when the session is stale.
    fn connect_failed(&self, generation: u64, error: &SessionError) -> Option<Transition> {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return None;
        }
        let transition = shared.connection.on_connect_failed(error, &self.options.policy);
        warn!(%error, ?transition, "hub connection failed");
        let message = match transition {
            Transition::Retry(delay) => format!(
                "Connection failed: {error}. {}",
                self.retry_text(&shared.connection, delay)
            ),
            Transition::GiveUp => self.give_up_text(),
            Transition::Stop => format!("Sign in to continue: {error}"),
        };
        self.publish(&shared.connection, message);
        Some(transition)
    }

    /// Record the end of a live connection; `None` when the session is stale.
    fn connection_ended(&self, generation: u64, ended: Ended) -> Option<Transition> {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return None;
        }
        shared.link = None;
        self.keepalive.stop();
        self.dispatcher.context().requests.clear();

        match ended {
            Ended::ByUser => {
                shared.connection.on_user_disconnect();
                self.publish(&shared.connection, "Disconnected");
                Some(Transition::Stop)
            }
            Ended::Lost(reason) => {
                let transition = shared.connection.on_disconnected(&reason, &self.options.policy);
                warn!(%reason, ?transition, "hub connection lost");
                let message = match transition {
                    Transition::Retry(delay) => format!(
                        "Connection lost: {reason}. {}",
                        self.retry_text(&shared.connection, delay)
                    ),
                    _ => self.give_up_text(),
                };
                self.publish(&shared.connection, message);
                Some(transition)
            }
        }
    }

    /// Current shared credential for the next retry; `None` when the session
    /// is stale. Blank when the user was signed out meanwhile.
    fn begin_attempt(&self, generation: u64) -> Option<Credentials> {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return None;
        }
        let credentials = self.auth.credentials().unwrap_or_default();
        shared.connection.on_connecting();
        let message = format!(
            "Reconnecting (attempt {}/{})",
            shared.connection.attempt(),
            self.options.policy.max_attempts()
        );
        self.publish(&shared.connection, message);
        Some(credentials)
    }

    fn retry_text(&self, connection: &Connection, delay: Duration) -> String {
        format!(
            "Retrying in {:.1}s (attempt {}/{})",
            delay.as_secs_f64(),
            connection.attempt(),
            self.options.policy.max_attempts()
        )
    }

    fn give_up_text(&self) -> String {
        format!(
            "Unable to reach the hub after {} attempts. Reconnect to try again.",
            self.options.policy.max_attempts()
        )
    }

    fn spawn_supervisor(self: &Arc<Self>, generation: u64, next: Next) {
        let handle = tokio::spawn(supervise(self.clone(), generation, next));
        let mut shared = self.shared.lock();
        if shared.generation == generation {
            if let Some(previous) = shared.supervisor.replace(handle) {
                previous.abort();
            }
        } else {
            handle.abort();
        }
    }
}

fn refresh_calls(level: Level) -> [(&'static str, Vec<Value>); 2] {
    [
        (methods::GET_TIMETABLE, vec![json!(level)]),
        (methods::LIST_TIMETABLES, vec![json!(level)]),
    ]
}

async fn supervise(inner: Arc<Inner>, generation: u64, mut next: Next) {
    loop {
        let (transport, outbound) = match next {
            Next::Open(transport, outbound) => (transport, outbound),
            Next::RetryAfter(delay) => {
                time::sleep(delay).await;
                let Some(credentials) = inner.begin_attempt(generation) else {
                    return;
                };
                let attempt = if credentials.is_present() {
                    inner.connector.connect(&credentials).await
                } else {
                    Err(SessionError::Authentication("signed out".into()))
                };
                match attempt {
                    Ok(transport) => match inner.establish(generation, transport.name()) {
                        Some(outbound) => (transport, outbound),
                        None => return,
                    },
                    Err(error) => match inner.connect_failed(generation, &error) {
                        Some(Transition::Retry(delay)) => {
                            next = Next::RetryAfter(delay);
                            continue;
                        }
                        _ => return,
                    },
                }
            }
        };

        let ended = drive(&inner, transport, outbound).await;
        match inner.connection_ended(generation, ended) {
            Some(Transition::Retry(delay)) => next = Next::RetryAfter(delay),
            _ => return,
        }
    }
}

async fn drive(
    inner: &Inner,
    mut transport: Box<dyn HubTransport>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> Ended {
    let server_timeout = inner.options.server_timeout;
    let silence = time::sleep(server_timeout);
    tokio::pin!(silence);

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Message(message)) => {
                    if let Err(err) = transport.send(message).await {
                        return Ended::Lost(err.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(err) = transport.close().await {
                        debug!(%err, "error while closing hub connection");
                    }
                    return Ended::ByUser;
                }
            },
            inbound = transport.receive() => {
                silence.as_mut().reset(Instant::now() + server_timeout);
                if let Some(ended) = handle_inbound(inner, inbound) {
                    return ended;
                }
            }
            () = &mut silence => {
                warn!(timeout = ?server_timeout, "hub went silent");
                return Ended::Lost("server timeout".into());
            }
        }
    }
}

/// Act on one message from the hub; `Some` when the connection is over.
fn handle_inbound(
    inner: &Inner,
    inbound: Result<Option<HubMessage>, TransportError>,
) -> Option<Ended> {
    match inbound {
        Ok(Some(HubMessage::Invocation { target, arguments, .. })) => {
            inner.dispatcher.dispatch(&target, &arguments);
        }
        Ok(Some(HubMessage::Completion { invocation_id, error, .. })) => {
            inner.dispatcher.context().requests.complete(&invocation_id);
            match error {
                Some(error) => warn!(invocation_id = %invocation_id, %error, "hub invocation failed"),
                None => debug!(invocation_id = %invocation_id, "hub invocation completed"),
            }
        }
        Ok(Some(HubMessage::Ping)) => {}
        Ok(Some(HubMessage::Close { error, allow_reconnect })) => {
            debug!(?error, allow_reconnect, "server closed the hub connection");
            return Some(Ended::Lost(
                error.unwrap_or_else(|| "server closed the connection".into()),
            ));
        }
        Ok(Some(HubMessage::Unsupported(kind))) => {
            debug!(kind, "ignoring unsupported hub message");
        }
        Ok(None) => return Some(Ended::Lost("connection closed".into())),
        Err(err) => return Some(Ended::Lost(err.to_string())),
    }
    None
}
