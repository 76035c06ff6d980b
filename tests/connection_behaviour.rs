//! Connection lifecycle: lazy establishment, bounded backoff, dry runs, and
//! synthetic transfer results.

#[path = "common/test_constants.rs"]
mod test_constants;

use std::sync::Arc;

use camino::Utf8Path;
use polihon::command::ExecOptions;
use polihon::connection::{Connection, ConnectionError, OutputChunk, TransportError};
use polihon::test_support::{ScriptedTransport, TransportCall};
use test_constants::{FAST_CEILING, FAST_INTERVAL, HOST_ALPHA};

fn fast_connection(transport: &ScriptedTransport) -> Connection {
    Connection::new(HOST_ALPHA, Arc::new(transport.clone())).with_connect_retry(
        3,
        FAST_INTERVAL,
        FAST_CEILING,
    )
}

#[tokio::test]
async fn session_is_established_lazily_on_first_execute() {
    let transport = ScriptedTransport::new();
    transport.push_stdout("ok\n", 0);
    let mut connection = fast_connection(&transport);
    assert!(!connection.is_established());
    assert_eq!(transport.connect_count(), 0);

    let result = connection
        .execute("echo ok", &ExecOptions::default())
        .await
        .expect("execution succeeds");
    assert!(connection.is_established());
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(result.stdout(), "ok\n");
    assert_eq!(result.exit_code(), Some(0));
}

#[tokio::test]
async fn second_execute_reuses_the_session() {
    let transport = ScriptedTransport::new();
    let mut connection = fast_connection(&transport);
    connection
        .execute("true", &ExecOptions::default())
        .await
        .expect("first execution succeeds");
    connection
        .execute("true", &ExecOptions::default())
        .await
        .expect("second execution succeeds");
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn connect_retries_with_backoff_until_the_bound() {
    let transport = ScriptedTransport::new();
    transport.fail_connects(2);
    let mut connection = fast_connection(&transport);
    connection
        .execute("true", &ExecOptions::default())
        .await
        .expect("third attempt succeeds");
    assert_eq!(transport.connect_count(), 3);
}

#[tokio::test]
async fn connect_exhaustion_is_fatal() {
    let transport = ScriptedTransport::new();
    transport.fail_connects(10);
    let mut connection = fast_connection(&transport);
    let err = connection
        .execute("true", &ExecOptions::default())
        .await
        .expect_err("connect never succeeds");
    assert!(matches!(
        err,
        ConnectionError::ConnectExhausted { attempts: 3, .. }
    ));
    assert_eq!(transport.connect_count(), 3);
    assert_eq!(transport.exec_count(), 0);
}

#[tokio::test]
async fn dry_run_touches_no_transport() {
    let transport = ScriptedTransport::new();
    let mut connection = fast_connection(&transport);
    let opts = ExecOptions::default().with_dry_run(true);
    let result = connection
        .execute("rm -rf /data", &opts)
        .await
        .expect("dry run always succeeds");
    assert_eq!(result.exit_code(), Some(0));
    assert_eq!(result.output(), "");
    assert!(transport.calls().is_empty());
    assert!(!connection.is_established());
}

#[tokio::test]
async fn pty_and_stdin_reach_the_transport() {
    let transport = ScriptedTransport::new();
    let mut connection = fast_connection(&transport);
    let opts = ExecOptions::default()
        .with_pty(true)
        .with_stdin(b"payload".to_vec());
    connection
        .execute("cat", &opts)
        .await
        .expect("execution succeeds");
    let exec = transport
        .calls()
        .into_iter()
        .find(|call| matches!(call, TransportCall::Exec { .. }))
        .expect("exec was recorded");
    assert_eq!(
        exec,
        TransportCall::Exec {
            command: String::from("cat"),
            pty: true,
            stdin: Some(b"payload".to_vec()),
        }
    );
}

#[tokio::test]
async fn interleaved_chunks_are_folded_in_arrival_order() {
    let transport = ScriptedTransport::new();
    transport.push_output(
        vec![
            OutputChunk::Stdout(String::from("a\n")),
            OutputChunk::Stderr(String::from("b\n")),
            OutputChunk::Stdout(String::from("c\n")),
        ],
        Some(2),
        None,
    );
    let mut connection = fast_connection(&transport);
    let result = connection
        .execute("mixed", &ExecOptions::default())
        .await
        .expect("execution succeeds");
    assert_eq!(result.stdout(), "a\nc\n");
    assert_eq!(result.stderr(), "b\n");
    assert_eq!(result.output(), "a\nb\nc\n");
    assert_eq!(result.exit_code(), Some(2));
}

#[tokio::test]
async fn missing_exit_code_is_an_error() {
    let transport = ScriptedTransport::new();
    transport.push_output(vec![], None, None);
    let mut connection = fast_connection(&transport);
    let err = connection
        .execute("true", &ExecOptions::default())
        .await
        .expect_err("channel closed without a status");
    assert!(matches!(err, ConnectionError::MissingExitCode { .. }));
}

#[tokio::test]
async fn transfer_success_yields_a_synthetic_zero_result() {
    let transport = ScriptedTransport::new();
    let mut connection = fast_connection(&transport);
    let result = connection
        .copy_to(
            Utf8Path::new("/tmp/src"),
            Utf8Path::new("/tmp/dst"),
            false,
        )
        .await
        .expect("transfer succeeds");
    assert_eq!(result.command(), "copy /tmp/src -> /tmp/dst");
    assert_eq!(result.exit_code(), Some(0));
}

#[tokio::test]
async fn transfer_failure_yields_exit_one_with_the_message() {
    let transport = ScriptedTransport::new();
    transport.push_copy(Err(TransportError::Transfer(String::from("disk full"))));
    let mut connection = fast_connection(&transport);
    let result = connection
        .copy_from(
            Utf8Path::new("/var/log/app.log"),
            Utf8Path::new("logs/app.log"),
            false,
        )
        .await
        .expect("failure is reported inside the result");
    assert_eq!(result.command(), "copy /var/log/app.log <- logs/app.log");
    assert_eq!(result.exit_code(), Some(1));
    assert_eq!(result.stderr(), "transfer failure: disk full");
}

#[tokio::test]
async fn close_is_idempotent_and_reconnect_is_lazy() {
    let transport = ScriptedTransport::new();
    let mut connection = fast_connection(&transport);
    connection
        .execute("true", &ExecOptions::default())
        .await
        .expect("execution succeeds");
    connection.close();
    connection.close();
    assert!(!connection.is_established());
    connection
        .execute("true", &ExecOptions::default())
        .await
        .expect("execution succeeds after reconnect");
    assert_eq!(transport.connect_count(), 2);
}
