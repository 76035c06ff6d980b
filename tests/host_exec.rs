//! Host-level execution: exit-code acceptance, reporting, and failure
//! recording.

#[path = "common/fixtures.rs"]
mod fixtures;
#[path = "common/test_constants.rs"]
mod test_constants;

use std::sync::Arc;

use camino::Utf8Path;
use polihon::command::{Command, ExecOptions};
use polihon::context::RunContext;
use polihon::host::ExecError;
use polihon::hypervisor::BackendKind;
use polihon::test_support::{MemorySink, ScriptedTransport};
use test_constants::{HOST_ALPHA, UBUNTU_PLATFORM};

fn memory_context() -> (RunContext, MemorySink) {
    let sink = MemorySink::new();
    (RunContext::with_sink(Arc::new(sink.clone())), sink)
}

#[tokio::test]
async fn zero_exit_succeeds_by_default() {
    let transport = ScriptedTransport::new();
    transport.push_stdout("up 3 days\n", 0);
    let mut host = fixtures::connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &transport);
    let (ctx, sink) = memory_context();

    let result = host
        .exec(&Command::new("uptime"), &ExecOptions::default(), &ctx)
        .await
        .expect("zero exit is acceptable");
    assert_eq!(result.stdout(), "up 3 days\n");
    assert_eq!(sink.results().len(), 1);
    assert!(!ctx.has_failures());
}

#[tokio::test]
async fn nonzero_exit_raises_and_records_the_failure() {
    let transport = ScriptedTransport::new();
    transport.push_stdout("", 3);
    let mut host = fixtures::connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &transport);
    let (ctx, sink) = memory_context();

    let err = host
        .exec(&Command::new("false"), &ExecOptions::default(), &ctx)
        .await
        .expect_err("exit 3 is not acceptable");
    assert!(matches!(
        err,
        ExecError::CommandFailure {
            exit_code: Some(3),
            ..
        }
    ));
    assert!(ctx.has_failures());
    // The result reaches the sink even though the call raises.
    assert_eq!(sink.results().len(), 1);
    assert_eq!(sink.results()[0].exit_code(), Some(3));
}

#[tokio::test]
async fn acceptable_exit_codes_widen_the_success_set() {
    let transport = ScriptedTransport::new();
    transport.push_stdout("", 2);
    let mut host = fixtures::connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &transport);
    let (ctx, _sink) = memory_context();

    let opts = ExecOptions::default().with_acceptable_exit_codes([0, 2]);
    let result = host
        .exec(&Command::new("diff a b"), &opts, &ctx)
        .await
        .expect("exit 2 is acceptable here");
    assert_eq!(result.exit_code(), Some(2));
    assert!(!ctx.has_failures());
}

#[tokio::test]
async fn accept_all_exit_codes_never_raises() {
    let transport = ScriptedTransport::new();
    transport.push_stdout("", 127);
    let mut host = fixtures::connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &transport);
    let (ctx, _sink) = memory_context();

    let opts = ExecOptions::default().with_accept_all_exit_codes(true);
    let result = host
        .exec(&Command::new("maybe-missing"), &opts, &ctx)
        .await
        .expect("caller inspects the result instead");
    assert_eq!(result.exit_code(), Some(127));
    assert!(!ctx.has_failures());
}

#[tokio::test]
async fn silent_execution_skips_the_sink() {
    let transport = ScriptedTransport::new();
    transport.push_stdout("secret\n", 0);
    let mut host = fixtures::connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &transport);
    let (ctx, sink) = memory_context();

    let opts = ExecOptions::default().with_silent(true);
    host.exec(&Command::new("cat /etc/token"), &opts, &ctx)
        .await
        .expect("execution succeeds");
    assert!(sink.results().is_empty());
}

#[tokio::test]
async fn context_dry_run_applies_to_every_call() {
    let transport = ScriptedTransport::new();
    let mut host = fixtures::connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &transport);
    let sink = MemorySink::new();
    let ctx = RunContext::with_sink(Arc::new(sink.clone())).with_dry_run(true);

    let result = host
        .exec(&Command::new("reboot"), &ExecOptions::default(), &ctx)
        .await
        .expect("dry run succeeds");
    assert_eq!(result.exit_code(), Some(0));
    assert!(transport.calls().is_empty());
    // Dry-run results are still reported.
    assert_eq!(sink.results().len(), 1);
}

#[tokio::test]
async fn unprovisioned_host_cannot_execute() {
    let mut host = fixtures::host(HOST_ALPHA, BackendKind::Pooled, UBUNTU_PLATFORM);
    let (ctx, _sink) = memory_context();
    let err = host
        .exec(&Command::new("true"), &ExecOptions::default(), &ctx)
        .await
        .expect_err("no connection installed");
    assert!(matches!(err, ExecError::NotProvisioned { .. }));
}

#[tokio::test]
async fn transfers_report_their_synthetic_results() {
    let transport = ScriptedTransport::new();
    let mut host = fixtures::connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &transport);
    let (ctx, sink) = memory_context();

    host.copy_to(
        Utf8Path::new("payload.tar"),
        Utf8Path::new("/tmp/payload.tar"),
        false,
        &ctx,
    )
    .await
    .expect("transfer succeeds");
    assert_eq!(sink.results().len(), 1);
    assert_eq!(
        sink.results()[0].command(),
        "copy payload.tar -> /tmp/payload.tar"
    );
}
