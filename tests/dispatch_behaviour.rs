//! Target resolution and sequential/parallel dispatch semantics.

#[path = "common/fixtures.rs"]
mod fixtures;
#[path = "common/test_constants.rs"]
mod test_constants;

use std::sync::Arc;
use std::time::Duration;

use polihon::command::{Command, ExecOptions};
use polihon::connection::OutputChunk;
use polihon::context::RunContext;
use polihon::dispatch::{DispatchError, Dispatcher, ResultHook, Target};
use polihon::host::Role;
use polihon::test_support::{MemorySink, ScriptedTransport};
use test_constants::{HOST_ALPHA, HOST_BETA, UBUNTU_PLATFORM};

fn memory_context() -> (RunContext, MemorySink) {
    let sink = MemorySink::new();
    (RunContext::with_sink(Arc::new(sink.clone())), sink)
}

#[tokio::test]
async fn role_targets_resolve_in_inventory_order() {
    let dispatcher = Dispatcher::new(vec![
        polihon::host::shared(fixtures::host_with_roles(
            "m1",
            [Role::Master],
            UBUNTU_PLATFORM,
        )),
        polihon::host::shared(fixtures::host_with_roles(
            "a1",
            [Role::Agent],
            UBUNTU_PLATFORM,
        )),
        polihon::host::shared(fixtures::host_with_roles(
            "a2",
            [Role::Agent],
            UBUNTU_PLATFORM,
        )),
    ]);
    let resolved = dispatcher
        .resolve(&Target::Role(Role::Agent))
        .await
        .expect("agents exist");
    let mut names = Vec::new();
    for shared in &resolved {
        names.push(shared.lock().await.name().to_owned());
    }
    assert_eq!(names, vec!["a1", "a2"]);
}

#[tokio::test]
async fn unmatched_role_is_an_error() {
    let transport = ScriptedTransport::new();
    let dispatcher = Dispatcher::new(vec![fixtures::shared_connected_host(
        HOST_ALPHA,
        UBUNTU_PLATFORM,
        &transport,
    )]);
    let err = dispatcher
        .resolve(&Target::Role(Role::Database))
        .await
        .expect_err("no database host declared");
    assert!(matches!(err, DispatchError::UnknownRole { .. }));
}

#[tokio::test]
async fn sequential_dispatch_stops_at_the_first_failure() {
    let t1 = ScriptedTransport::new();
    let t2 = ScriptedTransport::new();
    let t3 = ScriptedTransport::new();
    t1.push_stdout("", 1);
    let hosts = vec![
        fixtures::shared_connected_host("h1", UBUNTU_PLATFORM, &t1),
        fixtures::shared_connected_host("h2", UBUNTU_PLATFORM, &t2),
        fixtures::shared_connected_host("h3", UBUNTU_PLATFORM, &t3),
    ];
    let dispatcher = Dispatcher::new(hosts.clone());
    let (ctx, _sink) = memory_context();

    let err = dispatcher
        .dispatch(
            &Target::Hosts(hosts),
            &Command::new("step"),
            &ExecOptions::default(),
            None,
            &ctx,
        )
        .await
        .expect_err("first host fails");
    assert!(matches!(err, DispatchError::Exec { ref host, .. } if host == "h1"));
    // Later hosts were never reached.
    assert_eq!(t2.exec_count(), 0);
    assert_eq!(t3.exec_count(), 0);
}

#[tokio::test]
async fn parallel_results_come_back_in_input_order() {
    let t1 = ScriptedTransport::new();
    let t2 = ScriptedTransport::new();
    // The first host finishes last; input order must still win.
    t1.push_output(
        vec![OutputChunk::Stdout(String::from("slow\n"))],
        Some(0),
        Some(Duration::from_millis(30)),
    );
    t2.push_stdout("fast\n", 0);
    let hosts = vec![
        fixtures::shared_connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &t1),
        fixtures::shared_connected_host(HOST_BETA, UBUNTU_PLATFORM, &t2),
    ];
    let dispatcher = Dispatcher::new(hosts.clone());
    let (ctx, _sink) = memory_context();

    let opts = ExecOptions::default().with_run_in_parallel(true);
    let results = dispatcher
        .dispatch(&Target::Hosts(hosts), &Command::new("work"), &opts, None, &ctx)
        .await
        .expect("both hosts succeed");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].host(), HOST_ALPHA);
    assert_eq!(results[0].stdout(), "slow\n");
    assert_eq!(results[1].host(), HOST_BETA);
}

#[tokio::test]
async fn parallel_dispatch_joins_every_task_before_raising() {
    let t1 = ScriptedTransport::new();
    let t2 = ScriptedTransport::new();
    let t3 = ScriptedTransport::new();
    // The middle host fails immediately; the slow first host must still
    // complete before the error surfaces.
    t1.push_output(
        vec![OutputChunk::Stdout(String::from("done\n"))],
        Some(0),
        Some(Duration::from_millis(30)),
    );
    t2.push_stdout("", 1);
    let hosts = vec![
        fixtures::shared_connected_host("h1", UBUNTU_PLATFORM, &t1),
        fixtures::shared_connected_host("h2", UBUNTU_PLATFORM, &t2),
        fixtures::shared_connected_host("h3", UBUNTU_PLATFORM, &t3),
    ];
    let dispatcher = Dispatcher::new(hosts.clone());
    let (ctx, _sink) = memory_context();

    let opts = ExecOptions::default().with_run_in_parallel(true);
    let err = dispatcher
        .dispatch(&Target::Hosts(hosts), &Command::new("work"), &opts, None, &ctx)
        .await
        .expect_err("h2 failed");
    assert!(matches!(err, DispatchError::Exec { ref host, .. } if host == "h2"));
    // Every sibling ran to completion despite the failure.
    assert_eq!(t1.exec_count(), 1);
    assert_eq!(t3.exec_count(), 1);
}

#[tokio::test]
async fn hooks_see_each_result_and_can_reject_it() {
    let t1 = ScriptedTransport::new();
    let t2 = ScriptedTransport::new();
    t1.push_stdout("2\n", 0);
    t2.push_stdout("7\n", 0);
    let hosts = vec![
        fixtures::shared_connected_host("h1", UBUNTU_PLATFORM, &t1),
        fixtures::shared_connected_host("h2", UBUNTU_PLATFORM, &t2),
    ];
    let dispatcher = Dispatcher::new(hosts.clone());
    let (ctx, _sink) = memory_context();

    let hook = ResultHook::inspect(|result| {
        if result.stdout().trim() == "2" {
            Ok(())
        } else {
            Err(format!("unexpected count {}", result.stdout().trim()))
        }
    });
    let opts = ExecOptions::default().with_run_in_parallel(true);
    let err = dispatcher
        .dispatch(&Target::Hosts(hosts), &Command::new("count"), &opts, Some(&hook), &ctx)
        .await
        .expect_err("second hook invocation rejects");
    assert!(matches!(
        err,
        DispatchError::Hook { ref host, ref message }
            if host == "h2" && message == "unexpected count 7"
    ));
}

#[tokio::test]
async fn dispatch_one_returns_a_single_result() {
    let transport = ScriptedTransport::new();
    transport.push_stdout("ok\n", 0);
    let host = fixtures::shared_connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &transport);
    let dispatcher = Dispatcher::new(vec![Arc::clone(&host)]);
    let (ctx, _sink) = memory_context();

    let result = dispatcher
        .dispatch_one(
            &Target::Host(host),
            &Command::new("status"),
            &ExecOptions::default(),
            &ctx,
        )
        .await
        .expect("single host succeeds");
    assert_eq!(result.host(), HOST_ALPHA);
}

#[tokio::test]
async fn dispatch_one_rejects_multi_host_targets() {
    let t1 = ScriptedTransport::new();
    let t2 = ScriptedTransport::new();
    let hosts = vec![
        fixtures::shared_connected_host(HOST_ALPHA, UBUNTU_PLATFORM, &t1),
        fixtures::shared_connected_host(HOST_BETA, UBUNTU_PLATFORM, &t2),
    ];
    let dispatcher = Dispatcher::new(hosts.clone());
    let (ctx, _sink) = memory_context();

    let err = dispatcher
        .dispatch_one(
            &Target::Hosts(hosts),
            &Command::new("status"),
            &ExecOptions::default(),
            &ctx,
        )
        .await
        .expect_err("two hosts resolved");
    assert!(matches!(err, DispatchError::AmbiguousTarget { count: 2 }));
    // Neither host was contacted.
    assert_eq!(t1.exec_count(), 0);
    assert_eq!(t2.exec_count(), 0);
}

#[tokio::test]
async fn dispatch_one_rejects_empty_targets() {
    let dispatcher = Dispatcher::new(Vec::new());
    let (ctx, _sink) = memory_context();

    let err = dispatcher
        .dispatch_one(
            &Target::Hosts(Vec::new()),
            &Command::new("status"),
            &ExecOptions::default(),
            &ctx,
        )
        .await
        .expect_err("nothing resolved");
    assert!(matches!(err, DispatchError::AmbiguousTarget { count: 0 }));
}
