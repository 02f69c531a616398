//! Server connection: handshake, negotiated features and request plumbing.
//!
//! A `Connection` holds no socket of its own. Opening it runs a version handshake
//! through the transport and records the server version together with the
//! features that version supports. Commands borrow the connection to build
//! and send their requests.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method};
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::config::ConnectionSettings;
use crate::error::{ChError, ChResult, ServerError};
use crate::features::FeatureFlags;
use crate::transport::{HttpRequest, HttpResponse, Transport, is_gzip};
use crate::uri::UriBuilder;
use crate::version::ServerVersion;

const VERSION_QUERY: &str = "SELECT version() FORMAT TSV";
const ACCEPT_TYPES: &str = "application/json, text/csv, application/octet-stream";

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Closed = 0,
    Open = 1,
    /// The last handshake failed; open again to retry.
    Broken = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Open,
            2 => ConnectionState::Broken,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Broken => write!(f, "broken"),
        }
    }
}

/// Version and features, always stored together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: ServerVersion,
    pub features: FeatureFlags,
}

/// A logical connection to one server.
///
/// Not meant for overlapping use: open it before running commands, and do
/// not call [`open`](Self::open) while a command on it is in flight.
pub struct Connection {
    settings: ConnectionSettings,
    session_id: Option<String>,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    server: RwLock<Option<ServerInfo>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.settings.host)
            .field("port", &self.settings.port)
            .field("database", &self.settings.database)
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Create a connection with its own HTTP client.
    pub fn new(settings: ConnectionSettings) -> ChResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .gzip(true)
            .deflate(true)
            .build()
            .map_err(|e| ChError::Config(format!("cannot build HTTP client: {}", e)))?;
        Self::with_transport(settings, Arc::new(client))
    }

    /// Create a connection over a caller-provided transport.
    ///
    /// The transport must decompress gzip responses when compression is on.
    pub fn with_transport(
        settings: ConnectionSettings,
        transport: Arc<dyn Transport>,
    ) -> ChResult<Self> {
        settings.base_url()?;
        let session_id = settings.use_session.then(|| {
            settings
                .session_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
        });
        Ok(Self {
            settings,
            session_id,
            transport,
            state: AtomicU8::new(ConnectionState::Closed as u8),
            server: RwLock::new(None),
        })
    }

    /// Parse a connection string and create a connection with its own client.
    pub fn from_connection_string(connection_string: &str) -> ChResult<Self> {
        Self::new(connection_string.parse()?)
    }

    /// New closed connection with the same settings and transport.
    ///
    /// An explicit session id is kept; a generated one is generated afresh,
    /// so the two connections never share a server session by accident.
    pub fn try_clone(&self) -> ChResult<Self> {
        Self::with_transport(self.settings.clone(), Arc::clone(&self.transport))
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn database(&self) -> &str {
        &self.settings.database
    }

    pub fn change_database(&mut self, database: impl Into<String>) {
        self.settings.database = database.into();
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn uses_compression(&self) -> bool {
        self.settings.compression
    }

    pub fn custom_settings(&self) -> &std::collections::BTreeMap<String, String> {
        &self.settings.custom_settings
    }

    pub fn set_custom_setting(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.settings.custom_settings.insert(name.into(), value.into());
    }

    pub fn remove_custom_setting(&mut self, name: &str) -> Option<String> {
        self.settings.custom_settings.remove(name)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn server_info(&self) -> ChResult<ServerInfo> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(ChError::ConnectionNotOpen(state));
        }
        let guard = self.server.read().unwrap_or_else(PoisonError::into_inner);
        (*guard).ok_or(ChError::ConnectionNotOpen(state))
    }

    /// Version reported by the server during the handshake. Requires Open.
    pub fn server_version(&self) -> ChResult<ServerVersion> {
        Ok(self.server_info()?.version)
    }

    /// Features of the connected server. Requires Open.
    pub fn supported_features(&self) -> ChResult<FeatureFlags> {
        Ok(self.server_info()?.features)
    }

    pub async fn open(&self) -> ChResult<()> {
        self.open_with(&CancellationToken::new()).await
    }

    /// Run the version handshake unless the connection is already open.
    ///
    /// On failure the connection is left Broken and the error returned; a
    /// later call retries the handshake.
    pub async fn open_with(&self, cancel: &CancellationToken) -> ChResult<()> {
        if self.state() == ConnectionState::Open {
            return Ok(());
        }

        match self.handshake(cancel).await {
            Ok(info) => {
                *self.server.write().unwrap_or_else(PoisonError::into_inner) = Some(info);
                self.set_state(ConnectionState::Open);
                tracing::info!(
                    "Connected to {}:{} (server {}, features: {})",
                    self.settings.host,
                    self.settings.port,
                    info.version,
                    info.features
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Broken);
                tracing::warn!("Handshake with {} failed: {}", self.settings.host, e);
                Err(e)
            }
        }
    }

    async fn handshake(&self, cancel: &CancellationToken) -> ChResult<ServerInfo> {
        let uri = self.uri_builder()?.sql(Some(VERSION_QUERY.to_string())).build();
        let mut request = HttpRequest::new(Method::GET, uri);
        request.headers = self.default_headers()?;

        tracing::debug!("Checking server version at {}:{}", self.settings.host, self.settings.port);
        let response = self.send(request, cancel).await?;
        let response = handle_error(response, VERSION_QUERY)?;

        if is_gzip(&response.body) {
            return Err(ChError::CompressionMismatch);
        }
        if response.body.is_empty() {
            return Err(ChError::ServerNotFunctional);
        }

        let text = String::from_utf8_lossy(&response.body);
        let version = ServerVersion::parse(&text)?;
        Ok(ServerInfo {
            version,
            features: FeatureFlags::for_version(version),
        })
    }

    pub(crate) async fn ensure_open(&self, cancel: &CancellationToken) -> ChResult<()> {
        if self.state() != ConnectionState::Open {
            self.open_with(cancel).await?;
        }
        Ok(())
    }

    pub fn close(&self) {
        self.set_state(ConnectionState::Closed);
    }

    pub fn create_command(&self) -> Command<'_> {
        Command::with_connection(self)
    }

    /// URI builder preloaded with this connection's database, session,
    /// compression flag and server settings.
    pub fn uri_builder(&self) -> ChResult<UriBuilder> {
        Ok(UriBuilder::new(self.settings.base_url()?)
            .database(self.settings.database.clone())
            .session_id(self.session_id.clone())
            .compression(self.settings.compression)
            .settings(self.settings.custom_settings.clone()))
    }

    /// Authorization, Accept and (with compression) Accept-Encoding headers.
    pub fn default_headers(&self) -> ChResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.settings.username, self.settings.password
        ));
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Basic {}", credentials))?);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_TYPES));
        if self.settings.compression {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        }
        Ok(headers)
    }

    /// Send a request, giving up as soon as `cancel` fires.
    pub(crate) async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> ChResult<HttpResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Request cancelled");
                Err(ChError::Cancelled)
            }
            result = self.transport.send(request) => result,
        }
    }

    /// POST a raw body, e.g. `INSERT ... FORMAT ...` data.
    ///
    /// `sql` goes in the `query` argument and the body is sent as-is;
    /// `is_compressed` marks it as already gzip-encoded.
    pub async fn post_stream(
        &self,
        sql: Option<&str>,
        data: Bytes,
        is_compressed: bool,
        cancel: &CancellationToken,
    ) -> ChResult<HttpResponse> {
        let uri = self.uri_builder()?.sql(sql.map(str::to_string)).build();
        let mut request = HttpRequest::new(Method::POST, uri);
        request.headers = self.default_headers()?;
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        if is_compressed {
            request.headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        request.body = data;

        let response = self.send(request, cancel).await?;
        handle_error(response, sql.unwrap_or_default())
    }
}

/// Turn a non-2xx response into a [`ServerError`] carrying `query`.
pub(crate) fn handle_error(response: HttpResponse, query: &str) -> ChResult<HttpResponse> {
    if response.status.is_success() {
        return Ok(response);
    }
    let body = String::from_utf8_lossy(&response.body);
    let err = ServerError::from_response(&body, query);
    tracing::warn!("Server returned {}: {}", response.status, err.message);
    Err(err.into())
}
