//! Command execution: binding modes, query ids, errors and cancellation.

mod common;

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clickhouse_http::prelude::*;
use common::{MockTransport, open, query_arg};
use flate2::read::GzDecoder;
use http::Method;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;

const OLD_SERVER: &str = "19.1.5.1";
const NEW_SERVER: &str = "23.8.2.7";

fn body_text(request: &clickhouse_http::transport::HttpRequest) -> String {
    String::from_utf8(request.body.to_vec()).unwrap()
}

/// Log sink shared between a test and its subscriber.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Older servers get literals substituted into the SQL text.
#[tokio::test]
async fn test_inline_binding() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, OLD_SERVER, false).await;
    mock.respond(200, "5\tx\n");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT {x:Int32}, {s:String}")
        .bind("x", 5)
        .bind("s", "x");
    let value = cmd.execute_scalar(&CancellationToken::new()).await?;
    assert_eq!(value.as_deref(), Some("5"));

    let request = mock.last_request();
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.headers[CONTENT_TYPE], "text/sql");
    assert_eq!(body_text(&request), "SELECT 5, 'x'");
    assert!(request.url.query_pairs().all(|(k, _)| !k.starts_with("param_")));
    Ok(())
}

/// Newer servers get `param_<name>` arguments and the SQL as written.
#[tokio::test]
async fn test_http_parameter_binding() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, NEW_SERVER, false).await;
    mock.respond(200, "");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT {x:Int32}, {s:String}")
        .bind("x", 5)
        .bind("s", "a\tb");
    cmd.execute_raw(&CancellationToken::new()).await?;

    let request = mock.last_request();
    assert_eq!(body_text(&request), "SELECT {x:Int32}, {s:String}");
    assert_eq!(query_arg(&request, "param_x").as_deref(), Some("5"));
    assert_eq!(query_arg(&request, "param_s").as_deref(), Some("a\\tb"));
    Ok(())
}

#[tokio::test]
async fn test_missing_parameter_fails_before_sending() {
    let mock = MockTransport::new();
    let conn = open(&mock, OLD_SERVER, false).await;

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT {x:Int32} + {y:Int32}").bind("x", 1);
    let err = cmd.execute_raw(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ChError::MissingParameter(ref name) if name == "y"));
    assert_eq!(mock.requests().len(), 1);
}

/// Unbound placeholders are an error on older servers even with no binds.
#[tokio::test]
async fn test_unbound_placeholder_without_any_binds() {
    let mock = MockTransport::new();
    let conn = open(&mock, OLD_SERVER, false).await;

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT {x:Int32}");
    let err = cmd.execute_raw(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ChError::MissingParameter(ref name) if name == "x"));
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(mock.requests().len(), 1);
}

/// Queries without placeholders go through unchanged in inline mode.
#[tokio::test]
async fn test_inline_mode_without_placeholders() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, OLD_SERVER, false).await;
    mock.respond(200, "1\n");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT 1");
    cmd.execute_raw(&CancellationToken::new()).await?;
    assert_eq!(body_text(&mock.last_request()), "SELECT 1");
    Ok(())
}

/// Debug logs show the SQL as written, never the substituted literals.
#[tokio::test]
async fn test_debug_log_omits_bound_values() -> ChResult<()> {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mock = MockTransport::new();
    let conn = open(&mock, OLD_SERVER, false).await;
    mock.respond(200, "1\n");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT {secret:String}").bind("secret", "hunter2");
    cmd.execute_raw(&CancellationToken::new()).await?;

    assert_eq!(body_text(&mock.last_request()), "SELECT 'hunter2'");
    let text = logs.text();
    assert!(text.contains("SELECT {secret:String}"));
    assert!(!text.contains("hunter2"));
    Ok(())
}

/// The server's query id replaces the caller's.
#[tokio::test]
async fn test_query_id_is_overwritten_by_server() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, NEW_SERVER, false).await;
    mock.respond_with_headers(200, "1\n", &[("x-clickhouse-query-id", "server-id")]);

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT 1").set_query_id(Some("mine".into()));
    let result = cmd.execute_raw(&CancellationToken::new()).await?;

    assert_eq!(query_arg(&mock.last_request(), "query_id").as_deref(), Some("mine"));
    assert_eq!(cmd.query_id(), Some("server-id"));
    assert_eq!(result.query_id.as_deref(), Some("server-id"));
    Ok(())
}

#[tokio::test]
async fn test_query_id_kept_without_header() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, NEW_SERVER, false).await;
    mock.respond(200, "1\n");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT 1").set_query_id(Some("mine".into()));
    cmd.execute_raw(&CancellationToken::new()).await?;
    assert_eq!(cmd.query_id(), Some("mine"));
    Ok(())
}

/// Server errors carry the body text and the SQL actually sent.
#[tokio::test]
async fn test_server_error() {
    let mock = MockTransport::new();
    let conn = open(&mock, OLD_SERVER, false).await;
    mock.respond_with_headers(
        400,
        "DB::Exception: Syntax error",
        &[("x-clickhouse-query-id", "failed-id")],
    );

    let mut cmd = conn.create_command();
    cmd.set_sql("SELEC {x:Int32}").bind("x", 5);
    let err = cmd.execute_raw(&CancellationToken::new()).await.unwrap_err();

    match err {
        ChError::Server(e) => {
            assert!(e.message.contains("DB::Exception: Syntax error"));
            assert_eq!(e.query, "SELEC 5");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(cmd.query_id(), Some("failed-id"));
}

#[tokio::test]
async fn test_transport_error_is_not_a_server_error() {
    let mock = MockTransport::new();
    let conn = open(&mock, NEW_SERVER, false).await;
    mock.fail("timed out");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT 1");
    let err = cmd.execute_raw(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn test_command_without_connection() {
    let mut cmd = Command::new("SELECT 1");
    let err = cmd.execute_raw(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ChError::NoConnection));
    assert_eq!(err.kind(), ErrorKind::Programming);
}

/// A closed connection is opened by the first execution.
#[tokio::test]
async fn test_execute_opens_connection() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = Connection::with_transport(common::settings(false), mock.clone())?;
    mock.respond(200, "23.1.1.1");
    mock.respond(200, "1\n");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT 1");
    cmd.execute_raw(&CancellationToken::new()).await?;

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, Method::GET);
    assert_eq!(conn.state(), ConnectionState::Open);
    Ok(())
}

#[tokio::test]
async fn test_compressed_request_body() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, NEW_SERVER, true).await;
    mock.respond(200, "");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT 42");
    cmd.execute_raw(&CancellationToken::new()).await?;

    let request = mock.last_request();
    assert_eq!(request.headers[CONTENT_ENCODING], "gzip");
    assert_eq!(query_arg(&request, "enable_http_compression").as_deref(), Some("true"));
    let mut sql = String::new();
    GzDecoder::new(&request.body[..]).read_to_string(&mut sql)?;
    assert_eq!(sql, "SELECT 42");
    Ok(())
}

#[tokio::test]
async fn test_caller_cancellation() {
    let mock = MockTransport::stalling();
    let conn = open(&mock, NEW_SERVER, false).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT sleep(3)");
    let err = cmd.execute_raw(&cancel).await.unwrap_err();
    assert!(matches!(err, ChError::Cancelled));
    assert!(!cmd.is_cancelled());
}

#[tokio::test]
async fn test_command_cancellation() {
    let mock = MockTransport::stalling();
    let conn = open(&mock, NEW_SERVER, false).await;

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT sleep(3)");
    let handle = cmd.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    let err = cmd.execute_raw(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ChError::Cancelled));
    assert!(cmd.is_cancelled());
}

#[tokio::test]
async fn test_execute_non_query_reads_summary() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, NEW_SERVER, false).await;
    mock.respond_with_headers(
        200,
        "",
        &[(
            "x-clickhouse-summary",
            r#"{"read_rows":"0","read_bytes":"0","written_rows":"3","written_bytes":"24","total_rows_to_read":"0"}"#,
        )],
    );
    mock.respond(200, "");

    let mut cmd = conn.create_command();
    cmd.set_sql("INSERT INTO t VALUES (1), (2), (3)");
    assert_eq!(cmd.execute_non_query(&CancellationToken::new()).await?, 3);
    assert_eq!(cmd.execute_non_query(&CancellationToken::new()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_single_row_behavior() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, NEW_SERVER, false).await;
    mock.respond(200, "1\tone\n");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT id, name FROM t");
    let rows = cmd
        .execute_with(CommandBehavior::SingleRow, &TabSeparated, &CancellationToken::new())
        .await?;

    assert_eq!(body_text(&mock.last_request()), "SELECT id, name FROM t LIMIT 1");
    assert_eq!(rows, vec![vec![Some("1".to_string()), Some("one".to_string())]]);
    Ok(())
}

#[tokio::test]
async fn test_raw_result_json() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, NEW_SERVER, false).await;
    mock.respond(200, r#"{"rows": 2}"#);

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT count() AS rows FROM t FORMAT JSONEachRow");
    let result = cmd.execute_raw(&CancellationToken::new()).await?;
    let parsed: serde_json::Value = result.json()?;
    assert_eq!(parsed["rows"], 2);
    assert!(matches!(
        result.json::<Vec<u32>>(),
        Err(ChError::Decode(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_bind_tuple_inline() -> ChResult<()> {
    let mock = MockTransport::new();
    let conn = open(&mock, OLD_SERVER, false).await;
    mock.respond(200, "1\n");

    let mut cmd = conn.create_command();
    cmd.set_sql("SELECT {t:Tuple(Int32, String)} = (1, 'a')");
    cmd.bind_tuple("t", &(1, "a"))?;
    cmd.execute_raw(&CancellationToken::new()).await?;
    assert_eq!(body_text(&mock.last_request()), "SELECT (1, 'a') = (1, 'a')");
    Ok(())
}
