//! Transports that carry hub records, and the websocket connector
//! that negotiates and opens them.

use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderName, HeaderValue},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{self, FrameBuffer, HubMessage};
use crate::{
    auth::Credentials,
    config::AppConfig,
    error::{SessionError, TransportError},
};

/// Header carrying the static API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// One open, handshaken hub connection.
#[async_trait]
pub trait HubTransport: Send {
    /// Short label for status output (`websockets`, `memory`, ...).
    fn name(&self) -> &'static str;

    /// Send one record.
    async fn send(&mut self, message: HubMessage) -> Result<(), TransportError>;

    /// Next message from the server; `Ok(None)` once the connection is closed.
    async fn receive(&mut self) -> Result<Option<HubMessage>, TransportError>;

    /// Send the close frame and wait for the server to acknowledge it.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens hub connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Negotiate, upgrade and handshake; the transport returned is ready for invocations.
    async fn connect(&self, credentials: &Credentials)
        -> Result<Box<dyn HubTransport>, SessionError>;
}

/// Where and how to reach the hub.
#[derive(Debug, Clone)]
pub struct HubEndpoint {
    /// Hub url, `http(s)` or `ws(s)`.
    pub url: Url,
    /// Sent as [`API_KEY_HEADER`] on negotiate and upgrade.
    pub api_key: String,
    /// Go straight to the websocket upgrade without `/negotiate`.
    pub skip_negotiation: bool,
    /// Bound on negotiate plus upgrade.
    pub connect_timeout: Duration,
}

impl HubEndpoint {
    /// `{base_url}/{hub.path}` from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, TransportError> {
        let base = config.api.base_url.trim_end_matches('/');
        let path = config.hub.path.trim_matches('/');
        Ok(Self {
            url: Url::parse(&format!("{base}/{path}"))?,
            api_key: config.api.api_key.clone(),
            skip_negotiation: config.hub.skip_negotiation,
            connect_timeout: config.hub.connect_timeout(),
        })
    }

    fn negotiate_url(&self) -> Result<Url, TransportError> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Negotiate("hub url cannot be a base".into()))?
            .pop_if_empty()
            .push("negotiate");
        url.query_pairs_mut().append_pair("negotiateVersion", "1");
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    connection_id: Option<String>,
    connection_token: Option<String>,
    url: Option<String>,
    access_token: Option<String>,
    error: Option<String>,
}

/// Negotiated target for the websocket upgrade.
#[derive(Debug, Clone, PartialEq)]
struct Target {
    url: Url,
    connection_token: Option<String>,
    access_token: String,
}

/// Connects to the hub over websockets using the SignalR JSON protocol.
pub struct WebSocketConnector {
    endpoint: HubEndpoint,
    http: reqwest::Client,
}

impl WebSocketConnector {
    /// Connector for `endpoint` with its own HTTP client for negotiation.
    pub fn new(endpoint: HubEndpoint) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    /// Where this connector connects.
    pub fn endpoint(&self) -> &HubEndpoint {
        &self.endpoint
    }

    async fn negotiate(&self, credentials: &Credentials) -> Result<Target, SessionError> {
        if self.endpoint.skip_negotiation {
            return Ok(Target {
                url: self.endpoint.url.clone(),
                connection_token: None,
                access_token: credentials.access_token.clone(),
            });
        }

        let url = self.endpoint.negotiate_url()?;
        debug!(%url, "negotiating hub connection");
        let response = self
            .http
            .post(url)
            .bearer_auth(&credentials.access_token)
            .header(API_KEY_HEADER, &self.endpoint.api_key)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SessionError::Authentication(format!(
                "hub rejected credential ({status})"
            )));
        }
        if !status.is_success() {
            return Err(TransportError::Negotiate(format!("negotiate returned {status}")).into());
        }

        let body: NegotiateResponse = response.json().await.map_err(TransportError::from)?;
        resolve_target(&self.endpoint.url, credentials, body).map_err(SessionError::from)
    }

    async fn open(&self, target: Target) -> Result<WebSocketTransport, SessionError> {
        let url = websocket_url(&target)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(TransportError::from)?;
        let headers = request.headers_mut();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", target.access_token))
                .map_err(|_| TransportError::Header("Authorization"))?,
        );
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            HeaderValue::from_str(&self.endpoint.api_key)
                .map_err(|_| TransportError::Header("X-Api-Key"))?,
        );

        let (stream, _response) = connect_async(request).await.map_err(upgrade_error)?;
        let mut transport = WebSocketTransport::new(stream);
        transport.handshake().await?;
        Ok(transport)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn HubTransport>, SessionError> {
        if !credentials.is_present() {
            return Err(SessionError::Authentication("no access token".into()));
        }

        let timeout = self.endpoint.connect_timeout;
        let attempt = async {
            let target = self.negotiate(credentials).await?;
            let transport = self.open(target).await?;
            Ok::<_, SessionError>(transport)
        };

        let transport = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        info!(url = %self.endpoint.url, "hub connection established");
        Ok(Box::new(transport))
    }
}

/// A refused upgrade with 401/403 is a credential problem, not a network one.
fn upgrade_error(err: WsError) -> SessionError {
    if let WsError::Http(response) = &err {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return SessionError::Authentication(format!(
                "hub rejected credential on upgrade ({status})"
            ));
        }
    }
    TransportError::from(err).into()
}

fn resolve_target(
    hub_url: &Url,
    credentials: &Credentials,
    body: NegotiateResponse,
) -> Result<Target, TransportError> {
    if let Some(error) = body.error {
        return Err(TransportError::Negotiate(error));
    }

    // Redirect to another service (e.g. a managed SignalR instance).
    if let Some(redirect) = body.url {
        return Ok(Target {
            url: Url::parse(&redirect)?,
            connection_token: None,
            access_token: body
                .access_token
                .unwrap_or_else(|| credentials.access_token.clone()),
        });
    }

    let token = body
        .connection_token
        .or(body.connection_id)
        .ok_or_else(|| TransportError::Negotiate("response carried no connection id".into()))?;

    Ok(Target {
        url: hub_url.clone(),
        connection_token: Some(token),
        access_token: credentials.access_token.clone(),
    })
}

fn websocket_url(target: &Target) -> Result<Url, TransportError> {
    let mut url = target.url.clone();
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Negotiate(format!("cannot use {} for websockets", target.url)))?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(token) = &target.connection_token {
            query.append_pair("id", token);
        }
        query.append_pair("access_token", &target.access_token);
    }
    Ok(url)
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Hub connection over a websocket.
pub struct WebSocketTransport {
    socket: Socket,
    buffer: FrameBuffer,
    ready: VecDeque<HubMessage>,
}

impl WebSocketTransport {
    fn new(socket: Socket) -> Self {
        Self {
            socket,
            buffer: FrameBuffer::new(),
            ready: VecDeque::new(),
        }
    }

    async fn handshake(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(protocol::handshake_request()))
            .await?;

        loop {
            let Some(text) = self.next_text().await? else {
                return Err(TransportError::Handshake(
                    "connection closed during handshake".into(),
                ));
            };
            let mut records = self.buffer.push(&text).into_iter();
            let Some(reply) = records.next() else {
                continue;
            };
            protocol::parse_handshake_response(&reply).map_err(TransportError::Handshake)?;
            for record in records {
                self.enqueue(&record);
            }
            return Ok(());
        }
    }

    async fn next_text(&mut self) -> Result<Option<String>, TransportError> {
        while let Some(message) = self.socket.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Message::Close(frame) => {
                    debug!(?frame, "websocket closed by server");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
        Ok(None)
    }

    fn enqueue(&mut self, record: &str) {
        match HubMessage::decode(record) {
            Ok(message) => self.ready.push_back(message),
            Err(err) => warn!(%err, "dropping malformed hub record"),
        }
    }
}

#[async_trait]
impl HubTransport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websockets"
    }

    async fn send(&mut self, message: HubMessage) -> Result<(), TransportError> {
        self.socket.send(Message::Text(message.encode())).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<HubMessage>, TransportError> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(Some(message));
            }
            let Some(text) = self.next_text().await? else {
                return Ok(None);
            };
            for record in self.buffer.push(&text) {
                self.enqueue(&record);
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.socket.close(None).await {
            Ok(()) => Ok(()),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
