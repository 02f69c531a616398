//! # clickhouse-http
//!
//! Core of a ClickHouse driver speaking the HTTP interface.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use clickhouse_http::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> ChResult<()> {
//! let conn = Connection::from_connection_string("Host=localhost;Port=8123")?;
//! conn.open().await?;
//!
//! let mut cmd = conn.create_command();
//! cmd.set_sql("SELECT {id:UInt32} + 1").bind("id", 41u32);
//! let answer = cmd.execute_scalar(&CancellationToken::new()).await?;
//! assert_eq!(answer.as_deref(), Some("42"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Parameter binding
//!
//! | Server            | Mode            | On the wire                          |
//! |-------------------|-----------------|--------------------------------------|
//! | `> 19.11.3.11`    | HTTP parameters | `param_id=41`, SQL sent unchanged    |
//! | older             | Inline          | `SELECT 41 + 1`                      |
//!
//! The mode is chosen per request from the version seen at handshake.

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod features;
pub mod param;
pub mod substitution;
pub mod transport;
pub mod tuple;
pub mod uri;
pub mod value;
pub mod version;

pub mod prelude {
    pub use crate::command::{
        Command, CommandBehavior, QuerySummary, RawResult, RenderedRequest, RowDecoder,
        TabSeparated,
    };
    pub use crate::config::{ConnectionSettings, Protocol};
    pub use crate::connection::{Connection, ConnectionState};
    pub use crate::error::*;
    pub use crate::features::FeatureFlags;
    pub use crate::param::{Parameter, ParameterCollection};
    pub use crate::transport::Transport;
    pub use crate::tuple::{DbTuple, Inspect, TupleKind};
    pub use crate::value::Value;
    pub use crate::version::ServerVersion;
}

pub use connection::Connection;
pub use error::{ChError, ChResult};
