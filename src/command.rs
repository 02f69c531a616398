//! Query execution.
//!
//! A [`Command`] carries SQL, bound parameters and an optional query id.
//! Each execution picks one binding mode from the server's features:
//! HTTP parameters (`param_<name>` in the URI, SQL untouched) or inline
//! literals substituted into the SQL text.

use std::future::Future;

use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::connection::{Connection, handle_error};
use crate::error::{ChError, ChResult};
use crate::features::FeatureFlags;
use crate::param::ParameterCollection;
use crate::substitution::substitute;
use crate::transport::{HttpRequest, HttpResponse, gzip};
use crate::tuple::{Inspect, convert};
use crate::value::Value;

pub const QUERY_ID_HEADER: &str = "x-clickhouse-query-id";
pub const SUMMARY_HEADER: &str = "x-clickhouse-summary";

/// How much of the result the caller needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommandBehavior {
    #[default]
    Default,
    /// Only the first row (`LIMIT 1`).
    SingleRow,
    /// Column metadata without rows (`LIMIT 0`).
    SchemaOnly,
}

impl CommandBehavior {
    fn suffix(self) -> &'static str {
        match self {
            CommandBehavior::Default => "",
            CommandBehavior::SingleRow => " LIMIT 1",
            CommandBehavior::SchemaOnly => " LIMIT 0",
        }
    }
}

/// Progress counters from the `X-ClickHouse-Summary` header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QuerySummary {
    #[serde(deserialize_with = "de_counter")]
    pub read_rows: u64,
    #[serde(deserialize_with = "de_counter")]
    pub read_bytes: u64,
    #[serde(deserialize_with = "de_counter")]
    pub written_rows: u64,
    #[serde(deserialize_with = "de_counter")]
    pub written_bytes: u64,
    #[serde(deserialize_with = "de_counter")]
    pub total_rows_to_read: u64,
}

/// The server sends counters as JSON strings.
fn de_counter<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Counter {
        Text(String),
        Number(u64),
    }

    match Counter::deserialize(deserializer)? {
        Counter::Number(n) => Ok(n),
        Counter::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// A successful response, undecoded.
#[derive(Debug, Clone)]
pub struct RawResult {
    pub status: StatusCode,
    pub query_id: Option<String>,
    pub summary: Option<QuerySummary>,
    pub headers: HeaderMap,
    body: Bytes,
}

impl RawResult {
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    pub fn text(&self) -> ChResult<&str> {
        std::str::from_utf8(&self.body).map_err(|e| ChError::Decode(e.to_string()))
    }

    pub fn json<T: DeserializeOwned>(&self) -> ChResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| ChError::Decode(e.to_string()))
    }
}

/// Turns a response body into rows.
pub trait RowDecoder {
    type Output;

    fn decode(&self, body: &[u8]) -> ChResult<Self::Output>;
}

/// Decoder for the server's default `TabSeparated` output.
///
/// Each row is a list of unescaped fields; `\N` decodes to `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TabSeparated;

impl RowDecoder for TabSeparated {
    type Output = Vec<Vec<Option<String>>>;

    fn decode(&self, body: &[u8]) -> ChResult<Self::Output> {
        let text = std::str::from_utf8(body).map_err(|e| ChError::Decode(e.to_string()))?;
        let text = text.strip_suffix('\n').unwrap_or(text);
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(text
            .split('\n')
            .map(|line| line.split('\t').map(unescape_field).collect())
            .collect())
    }
}

fn unescape_field(field: &str) -> Option<String> {
    if field == "\\N" {
        return None;
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}

/// The SQL and URI a command would send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRequest {
    pub sql: String,
    pub uri: Url,
}

/// SQL plus bound parameters, executed over a [`Connection`].
#[derive(Debug, Default)]
pub struct Command<'c> {
    connection: Option<&'c Connection>,
    sql: String,
    parameters: ParameterCollection,
    query_id: Option<String>,
    cancel: CancellationToken,
}

impl<'c> Command<'c> {
    /// A command with no connection; set one before executing.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn with_connection(connection: &'c Connection) -> Self {
        Self {
            connection: Some(connection),
            ..Self::default()
        }
    }

    pub fn connection(&self) -> Option<&'c Connection> {
        self.connection
    }

    pub fn set_connection(&mut self, connection: &'c Connection) -> &mut Self {
        self.connection = Some(connection);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn set_sql(&mut self, sql: impl Into<String>) -> &mut Self {
        self.sql = sql.into();
        self
    }

    pub fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    /// Bind `value` to the `{name:Type}` placeholder.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.parameters.add(name, value);
        self
    }

    /// Bind a native multi-value (a Rust tuple, or anything implementing
    /// [`Inspect`]) as a tuple parameter.
    pub fn bind_tuple(&mut self, name: impl Into<String>, value: &dyn Inspect) -> ChResult<&mut Self> {
        let tuple = convert(Some(value))?;
        self.parameters.add(name, tuple);
        Ok(self)
    }

    /// Id sent with the next request; after a request, the id the server
    /// reported, if it reported one.
    pub fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    pub fn set_query_id(&mut self, query_id: Option<String>) -> &mut Self {
        self.query_id = query_id;
        self
    }

    /// Abort any in-flight execution of this command.
    ///
    /// The command stays cancelled; later executions fail immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Clone of the command-level token, for cancelling from another task
    /// while an execution holds the command.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The SQL and URI this command would send to a server with `flags`.
    pub fn render(&self, flags: FeatureFlags) -> ChResult<RenderedRequest> {
        let connection = self.connection.ok_or(ChError::NoConnection)?;
        self.render_for(connection, flags, CommandBehavior::Default)
    }

    fn render_for(
        &self,
        connection: &Connection,
        flags: FeatureFlags,
        behavior: CommandBehavior,
    ) -> ChResult<RenderedRequest> {
        let mut builder = connection.uri_builder()?.query_id(self.query_id.clone());

        let mut sql = if flags.contains(FeatureFlags::HTTP_PARAMETERS) {
            builder = builder.query_parameters(self.parameters.format_http());
            self.sql.clone()
        } else {
            substitute(&self.sql, &self.parameters.format_inline())?
        };
        sql.push_str(behavior.suffix());

        Ok(RenderedRequest {
            sql,
            uri: builder.build(),
        })
    }

    /// Run the command and return the undecoded response.
    pub async fn execute_raw(&mut self, cancel: &CancellationToken) -> ChResult<RawResult> {
        self.execute_behavior(CommandBehavior::Default, cancel).await
    }

    /// Run a statement and return the number of rows it wrote.
    pub async fn execute_non_query(&mut self, cancel: &CancellationToken) -> ChResult<u64> {
        let result = self.execute_raw(cancel).await?;
        Ok(result.summary.map(|s| s.written_rows).unwrap_or(0))
    }

    /// Run a query and decode the body with `decoder`.
    pub async fn execute_with<D: RowDecoder>(
        &mut self,
        behavior: CommandBehavior,
        decoder: &D,
        cancel: &CancellationToken,
    ) -> ChResult<D::Output> {
        let result = self.execute_behavior(behavior, cancel).await?;
        decoder.decode(result.bytes())
    }

    /// First field of the first row, `None` for an empty result or `NULL`.
    pub async fn execute_scalar(&mut self, cancel: &CancellationToken) -> ChResult<Option<String>> {
        let rows = self
            .execute_with(CommandBehavior::Default, &TabSeparated, cancel)
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .flatten())
    }

    async fn execute_behavior(
        &mut self,
        behavior: CommandBehavior,
        cancel: &CancellationToken,
    ) -> ChResult<RawResult> {
        let connection = self.connection.ok_or(ChError::NoConnection)?;

        let scope = self.cancel.child_token();
        let _guard = scope.clone().drop_guard();

        let (response, sql) = race(cancel, self.exchange(connection, behavior, &scope)).await?;

        if let Some(id) = response.header_str(QUERY_ID_HEADER) {
            self.query_id = Some(id.to_string());
        }
        let response = handle_error(response, &sql)?;

        let summary = response
            .header_str(SUMMARY_HEADER)
            .and_then(|raw| serde_json::from_str::<QuerySummary>(raw).ok());
        tracing::debug!(
            "Query {} finished with {}",
            self.query_id.as_deref().unwrap_or("-"),
            response.status
        );

        Ok(RawResult {
            status: response.status,
            query_id: self.query_id.clone(),
            summary,
            headers: response.headers,
            body: response.body,
        })
    }

    /// Build and send one request; returns the response with the SQL sent.
    async fn exchange(
        &self,
        connection: &Connection,
        behavior: CommandBehavior,
        scope: &CancellationToken,
    ) -> ChResult<(HttpResponse, String)> {
        connection.ensure_open(scope).await?;
        let flags = connection.supported_features()?;
        let rendered = self.render_for(connection, flags, behavior)?;

        let mut request = HttpRequest::new(Method::POST, rendered.uri);
        request.headers = connection.default_headers()?;
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/sql"));
        request.body = if connection.uses_compression() {
            request
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            gzip(rendered.sql.as_bytes())?
        } else {
            Bytes::from(rendered.sql.clone())
        };

        let mode = if flags.contains(FeatureFlags::HTTP_PARAMETERS) { "http" } else { "inline" };
        tracing::debug!(
            "POST {} ({} binding, {} bytes): {}",
            connection.settings().host,
            mode,
            rendered.sql.len(),
            self.sql
        );
        let response = connection.send(request, scope).await?;
        Ok((response, rendered.sql))
    }
}

/// Run `fut` unless the caller's token fires first.
async fn race<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = ChResult<T>>,
) -> ChResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionSettings;
    use pretty_assertions::assert_eq;

    fn connection() -> Connection {
        let settings = ConnectionSettings::builder().compression(false).build();
        Connection::new(settings).unwrap()
    }

    #[test]
    fn test_decode_tab_separated() {
        let rows = TabSeparated
            .decode(b"1\ta\\tb\n2\t\\N\n")
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Some("1".to_string()), Some("a\tb".to_string())],
                vec![Some("2".to_string()), None],
            ]
        );
        assert!(TabSeparated.decode(b"").unwrap().is_empty());
    }

    #[test]
    fn test_summary_from_header() {
        let summary: QuerySummary = serde_json::from_str(
            r#"{"read_rows":"0","read_bytes":"0","written_rows":"3","written_bytes":"24","total_rows_to_read":"0"}"#,
        )
        .unwrap();
        assert_eq!(summary.written_rows, 3);
        assert_eq!(summary.written_bytes, 24);
    }

    #[test]
    fn test_render_inline() {
        let conn = connection();
        let mut cmd = conn.create_command();
        cmd.set_sql("SELECT {x:Int32}, {s:String}")
            .bind("x", 5)
            .bind("s", "it's");
        let rendered = cmd.render(FeatureFlags::empty()).unwrap();
        assert_eq!(rendered.sql, "SELECT 5, 'it\\'s'");
        assert!(!rendered.uri.as_str().contains("param_"));
    }

    #[test]
    fn test_render_http_parameters() {
        let conn = connection();
        let mut cmd = conn.create_command();
        cmd.set_sql("SELECT {x:Int32}").bind("x", 5);
        let rendered = cmd.render(FeatureFlags::HTTP_PARAMETERS).unwrap();
        assert_eq!(rendered.sql, "SELECT {x:Int32}");
        assert!(rendered.uri.as_str().contains("param_x=5"));
    }

    #[test]
    fn test_render_inline_without_parameters() {
        let conn = connection();
        let mut cmd = conn.create_command();
        cmd.set_sql("SELECT 1");
        assert_eq!(cmd.render(FeatureFlags::empty()).unwrap().sql, "SELECT 1");

        cmd.set_sql("SELECT {x:Int32}");
        assert!(matches!(
            cmd.render(FeatureFlags::empty()),
            Err(ChError::MissingParameter(ref name)) if name == "x"
        ));
    }

    #[test]
    fn test_render_needs_connection() {
        let cmd = Command::new("SELECT 1");
        assert!(matches!(cmd.render(FeatureFlags::empty()), Err(ChError::NoConnection)));
    }

    #[test]
    fn test_bind_tuple() {
        let conn = connection();
        let mut cmd = conn.create_command();
        cmd.set_sql("SELECT {t:Tuple(Int32, String)}");
        cmd.bind_tuple("t", &(1, "a")).unwrap();
        let rendered = cmd.render(FeatureFlags::empty()).unwrap();
        assert_eq!(rendered.sql, "SELECT (1, 'a')");
    }

    #[test]
    fn test_behavior_suffix() {
        assert_eq!(CommandBehavior::SingleRow.suffix(), " LIMIT 1");
        assert_eq!(CommandBehavior::SchemaOnly.suffix(), " LIMIT 0");
        assert_eq!(CommandBehavior::Default.suffix(), "");
    }
}
