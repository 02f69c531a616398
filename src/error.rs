//! Error types for the ClickHouse HTTP driver.

use nom::{
    bytes::complete::tag,
    character::complete::{char, digit1, multispace0},
    combinator::map_res,
    sequence::{delimited, preceded},
    IResult,
};
use thiserror::Error;

use crate::connection::ConnectionState;

/// Broad classification of a [`ChError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid connection target, misconfigured compression.
    Configuration,
    /// Malformed version, empty handshake response, bad placeholders.
    Protocol,
    /// Non-2xx response from the server.
    Server,
    /// Failure of the underlying network layer.
    Transport,
    /// Misuse of the API.
    Programming,
    /// The request was cancelled by the caller or the command.
    Cancelled,
}

/// The main error type for driver operations.
#[derive(Debug, Error)]
pub enum ChError {
    /// Invalid connection settings, detected before any network call.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server sent a gzip body the transport did not decompress.
    #[error(
        "Server returned compressed result but the transport did not decompress it. Check transport settings"
    )]
    CompressionMismatch,

    /// The version handshake came back empty.
    #[error("Server did not return version, check if the server is functional")]
    ServerNotFunctional,

    /// The version handshake returned something that is not a version.
    #[error("Invalid server version: '{0}'")]
    InvalidVersion(String),

    /// A `{...}` placeholder without a `:type` part, or an unterminated one.
    #[error("Parameter placeholder '{0}' doesn't have a data type")]
    UnsupportedParameterSyntax(String),

    /// A placeholder names a parameter that was never bound.
    #[error("Parameter '{0}' not found in parameters list")]
    MissingParameter(String),

    /// A successful response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The server rejected the query.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Network failure, propagated unchanged.
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The request was cancelled.
    #[error("Request was cancelled")]
    Cancelled,

    /// A command was executed without a connection.
    #[error("Connection is not set")]
    NoConnection,

    /// Server information was requested from a connection that is not open.
    #[error("Connection is not open (state: {0})")]
    ConnectionNotOpen(ConnectionState),

    /// Tuple index outside `[0, len)`.
    #[error("Index {index} is out of range for a tuple of length {len}")]
    OutOfRange { index: usize, len: usize },

    /// Fixed-arity tuples exist for 1..=7 elements only.
    #[error("Unsupported tuple arity: {0}")]
    UnsupportedArity(usize),

    /// A value could not be used where it was passed.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChError {
    /// Wrap a transport-level failure.
    pub fn transport(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Transport(err.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::CompressionMismatch => ErrorKind::Configuration,
            Self::ServerNotFunctional
            | Self::InvalidVersion(_)
            | Self::UnsupportedParameterSyntax(_)
            | Self::MissingParameter(_)
            | Self::Decode(_) => ErrorKind::Protocol,
            Self::Server(_) => ErrorKind::Server,
            Self::Transport(_) | Self::Io(_) => ErrorKind::Transport,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NoConnection
            | Self::ConnectionNotOpen(_)
            | Self::OutOfRange { .. }
            | Self::UnsupportedArity(_)
            | Self::Argument(_) => ErrorKind::Programming,
        }
    }
}

impl From<reqwest::Error> for ChError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

impl From<http::header::InvalidHeaderValue> for ChError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::Config(format!("invalid header value: {}", err))
    }
}

/// A query failure reported by the server.
#[derive(Debug, Clone, Error)]
#[error("Server error: {message}")]
pub struct ServerError {
    /// Numeric error code from the `Code: N.` prefix, when present.
    pub code: Option<i32>,
    /// Error text as returned by the server.
    pub message: String,
    /// SQL text that was sent with the failing request.
    pub query: String,
}

impl ServerError {
    /// Build from a non-success response body.
    pub fn from_response(body: &str, query: impl Into<String>) -> Self {
        let message = body.trim().to_string();
        let code = parse_error_code(&message).ok().map(|(_, code)| code);
        Self {
            code,
            message,
            query: query.into(),
        }
    }
}

/// `Code: 62. DB::Exception: ...`
fn parse_error_code(input: &str) -> IResult<&str, i32> {
    delimited(
        preceded(multispace0, tag("Code:")),
        preceded(multispace0, map_res(digit1, str::parse::<i32>)),
        char('.'),
    )(input)
}

/// Result type alias for driver operations.
pub type ChResult<T> = Result<T, ChError>;
