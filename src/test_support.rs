//! Test support utilities shared across unit and integration tests.
//!
//! Scripted fakes return pre-seeded outcomes in FIFO order and record every
//! invocation, so tests drive deterministic behaviour without real
//! transports or provider APIs.

use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8Path;

use crate::connection::{
    ExecRequest, OutputChunk, Transport, TransportError, TransportFuture, TransportOutput,
};
use crate::hypervisor::cloud::{CloudHandle, CloudService, CreateSpec};
use crate::hypervisor::container::{ContainerHandle, ContainerRuntime, ContainerSpec, ImageSpec};
use crate::hypervisor::pooled::{PoolResponse, PoolService};
use crate::hypervisor::snapshot::{VmHandle, VmService, VmSnapshot};
use crate::hypervisor::{ServiceError, ServiceFuture};
use crate::report::ReportSink;
use crate::result::CommandResult;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Records a single call made through [`ScriptedTransport`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportCall {
    /// Session establishment attempt.
    Connect,
    /// Remote execution.
    Exec {
        /// Literal command line.
        command: String,
        /// Pseudo-terminal flag.
        pty: bool,
        /// Stdin bytes, if any were piped.
        stdin: Option<Vec<u8>>,
    },
    /// Local-to-remote transfer.
    CopyTo {
        /// Source path.
        source: String,
        /// Destination path.
        destination: String,
        /// Recursive flag.
        recursive: bool,
    },
    /// Remote-to-local transfer.
    CopyFrom {
        /// Source path.
        source: String,
        /// Destination path.
        destination: String,
        /// Recursive flag.
        recursive: bool,
    },
}

#[derive(Clone, Debug)]
struct ScriptedExec {
    delay: Option<Duration>,
    outcome: Result<TransportOutput, TransportError>,
}

/// Scripted [`Transport`] with FIFO-seeded outcomes.
///
/// Unseeded executions succeed with exit 0 and no output. Clones share the
/// same script and call log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    connect_failures: Arc<Mutex<u32>>,
    execs: Arc<Mutex<VecDeque<ScriptedExec>>>,
    copies: Arc<Mutex<VecDeque<Result<(), TransportError>>>>,
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl ScriptedTransport {
    /// Creates a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_connects(&self, count: u32) {
        *lock(&self.connect_failures) = count;
    }

    /// Queues an execution returning `stdout` and `exit_code`.
    pub fn push_stdout(&self, stdout: impl Into<String>, exit_code: i32) {
        self.push_output(
            vec![OutputChunk::Stdout(stdout.into())],
            Some(exit_code),
            None,
        );
    }

    /// Queues an execution with explicit chunks, exit code, and optional
    /// completion delay.
    pub fn push_output(
        &self,
        chunks: Vec<OutputChunk>,
        exit_code: Option<i32>,
        delay: Option<Duration>,
    ) {
        lock(&self.execs).push_back(ScriptedExec {
            delay,
            outcome: Ok(TransportOutput { chunks, exit_code }),
        });
    }

    /// Queues an execution that fails at the transport level.
    pub fn push_exec_failure(&self, message: impl Into<String>) {
        lock(&self.execs).push_back(ScriptedExec {
            delay: None,
            outcome: Err(TransportError::Session(message.into())),
        });
    }

    /// Queues a transfer outcome.
    pub fn push_copy(&self, outcome: Result<(), TransportError>) {
        lock(&self.copies).push_back(outcome);
    }

    /// Snapshot of every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    /// Number of connect attempts observed.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, TransportCall::Connect))
            .count()
    }

    /// Number of executions observed.
    #[must_use]
    pub fn exec_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, TransportCall::Exec { .. }))
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self) -> TransportFuture<'_, ()> {
        lock(&self.calls).push(TransportCall::Connect);
        let failures = Arc::clone(&self.connect_failures);
        Box::pin(async move {
            let mut remaining = lock(&failures);
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Unreachable(String::from(
                    "scripted connect failure",
                )));
            }
            Ok(())
        })
    }

    fn exec<'a>(&'a self, request: ExecRequest<'a>) -> TransportFuture<'a, TransportOutput> {
        lock(&self.calls).push(TransportCall::Exec {
            command: request.command.to_owned(),
            pty: request.pty,
            stdin: request.stdin.map(<[u8]>::to_vec),
        });
        let scripted = lock(&self.execs).pop_front().unwrap_or(ScriptedExec {
            delay: None,
            outcome: Ok(TransportOutput {
                chunks: Vec::new(),
                exit_code: Some(0),
            }),
        });
        Box::pin(async move {
            if let Some(delay) = scripted.delay {
                tokio::time::sleep(delay).await;
            }
            scripted.outcome
        })
    }

    fn copy_to<'a>(
        &'a self,
        source: &'a Utf8Path,
        destination: &'a Utf8Path,
        recursive: bool,
    ) -> TransportFuture<'a, ()> {
        lock(&self.calls).push(TransportCall::CopyTo {
            source: source.to_string(),
            destination: destination.to_string(),
            recursive,
        });
        let outcome = lock(&self.copies).pop_front().unwrap_or(Ok(()));
        Box::pin(async move { outcome })
    }

    fn copy_from<'a>(
        &'a self,
        source: &'a Utf8Path,
        destination: &'a Utf8Path,
        recursive: bool,
    ) -> TransportFuture<'a, ()> {
        lock(&self.calls).push(TransportCall::CopyFrom {
            source: source.to_string(),
            destination: destination.to_string(),
            recursive,
        });
        let outcome = lock(&self.copies).pop_front().unwrap_or(Ok(()));
        Box::pin(async move { outcome })
    }
}

/// Sink that stores every reported result for later assertions.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    results: Arc<Mutex<Vec<CommandResult>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every reported result, in arrival order.
    #[must_use]
    pub fn results(&self) -> Vec<CommandResult> {
        lock(&self.results).clone()
    }
}

impl ReportSink for MemorySink {
    fn report(&self, result: &CommandResult) {
        lock(&self.results).push(result.clone());
    }
}

/// Scripted pool service: FIFO responses, recorded requests and releases.
#[derive(Clone, Debug, Default)]
pub struct ScriptedPool {
    responses: Arc<Mutex<VecDeque<Result<PoolResponse, ServiceError>>>>,
    requests: Arc<Mutex<Vec<String>>>,
    released: Arc<Mutex<Vec<String>>>,
    release_failures: Arc<Mutex<VecDeque<ServiceError>>>,
}

impl ScriptedPool {
    /// Creates a pool with an empty script. Unseeded requests answer
    /// not-ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a granted lease.
    pub fn push_ready(&self, hostname: impl Into<String>, token: impl Into<String>) {
        lock(&self.responses).push_back(Ok(PoolResponse::Ready {
            hostname: hostname.into(),
            token: token.into(),
        }));
    }

    /// Queues a not-ready answer.
    pub fn push_not_ready(&self) {
        lock(&self.responses).push_back(Ok(PoolResponse::NotReady));
    }

    /// Makes the next release fail.
    pub fn push_release_failure(&self, message: impl Into<String>) {
        lock(&self.release_failures).push_back(ServiceError::new(message));
    }

    /// Templates requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }

    /// Tokens released so far.
    #[must_use]
    pub fn released(&self) -> Vec<String> {
        lock(&self.released).clone()
    }
}

impl PoolService for ScriptedPool {
    fn request<'a>(&'a self, template: &'a str) -> ServiceFuture<'a, PoolResponse> {
        lock(&self.requests).push(template.to_owned());
        let response = lock(&self.responses)
            .pop_front()
            .unwrap_or(Ok(PoolResponse::NotReady));
        Box::pin(async move { response })
    }

    fn release<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, ()> {
        lock(&self.released).push(token.to_owned());
        let failure = lock(&self.release_failures).pop_front();
        Box::pin(async move { failure.map_or(Ok(()), Err) })
    }
}

/// Scripted VM service backing the snapshot-clone driver.
#[derive(Clone, Debug, Default)]
pub struct ScriptedVmService {
    vms: Arc<Mutex<BTreeMap<String, Vec<VmSnapshot>>>>,
    templates: Arc<Mutex<Vec<String>>>,
    ready_after: Arc<Mutex<BTreeMap<String, (u32, IpAddr)>>>,
    polls: Arc<Mutex<BTreeMap<String, u32>>>,
    events: Arc<Mutex<Vec<String>>>,
}

impl ScriptedVmService {
    /// Creates a service with no VMs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing VM with its snapshot tree.
    pub fn add_vm(&self, name: impl Into<String>, snapshots: Vec<VmSnapshot>) {
        lock(&self.vms).insert(name.into(), snapshots);
    }

    /// Registers a clone template.
    pub fn add_template(&self, name: impl Into<String>) {
        lock(&self.templates).push(name.into());
    }

    /// Makes `vm` report `address` after `polls` empty answers.
    pub fn set_guest_address(&self, vm: impl Into<String>, polls: u32, address: IpAddr) {
        lock(&self.ready_after).insert(vm.into(), (polls, address));
    }

    /// Ordered event log (`clone`, `revert`, `power_on`, `power_off`,
    /// `destroy` entries).
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }
}

impl VmService for ScriptedVmService {
    fn find_vm<'a>(&'a self, name: &'a str) -> ServiceFuture<'a, Option<VmHandle>> {
        let found = lock(&self.vms).contains_key(name).then(|| VmHandle {
            id: format!("vm-{name}"),
            name: name.to_owned(),
        });
        Box::pin(async move { Ok(found) })
    }

    fn snapshots<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, Vec<VmSnapshot>> {
        let tree = lock(&self.vms).get(&vm.name).cloned().unwrap_or_default();
        Box::pin(async move { Ok(tree) })
    }

    fn revert<'a>(&'a self, vm: &'a VmHandle, snapshot: &'a str) -> ServiceFuture<'a, ()> {
        lock(&self.events).push(format!("revert {} {snapshot}", vm.name));
        Box::pin(async move { Ok(()) })
    }

    fn clone_from_template<'a>(
        &'a self,
        template: &'a str,
        name: &'a str,
    ) -> ServiceFuture<'a, VmHandle> {
        let known = lock(&self.templates).iter().any(|entry| entry == template);
        let outcome = if known {
            lock(&self.events).push(format!("clone {template} {name}"));
            lock(&self.vms).insert(name.to_owned(), Vec::new());
            Ok(VmHandle {
                id: format!("vm-{name}"),
                name: name.to_owned(),
            })
        } else {
            Err(ServiceError::new(format!("template '{template}' not found")))
        };
        Box::pin(async move { outcome })
    }

    fn power_on<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, ()> {
        lock(&self.events).push(format!("power_on {}", vm.name));
        Box::pin(async move { Ok(()) })
    }

    fn power_off<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, ()> {
        lock(&self.events).push(format!("power_off {}", vm.name));
        Box::pin(async move { Ok(()) })
    }

    fn destroy<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, ()> {
        lock(&self.events).push(format!("destroy {}", vm.name));
        lock(&self.vms).remove(&vm.name);
        Box::pin(async move { Ok(()) })
    }

    fn guest_address<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, Option<IpAddr>> {
        let answer = lock(&self.ready_after)
            .get(&vm.name)
            .copied()
            .and_then(|(polls_needed, address)| {
                let mut polls = lock(&self.polls);
                let seen = polls.entry(vm.name.clone()).or_insert(0);
                *seen += 1;
                (*seen > polls_needed).then_some(address)
            });
        Box::pin(async move { Ok(answer) })
    }
}

/// Scripted cloud API backing the cloud-create driver.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCloud {
    created: Arc<Mutex<Vec<CreateSpec>>>,
    ready_after: Arc<Mutex<BTreeMap<String, (u32, IpAddr)>>>,
    polls: Arc<Mutex<BTreeMap<String, u32>>>,
    terminated: Arc<Mutex<Vec<String>>>,
    terminate_failures: Arc<Mutex<VecDeque<ServiceError>>>,
}

impl ScriptedCloud {
    /// Creates a cloud with no instances.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the instance named `name` report `address` after `polls` empty
    /// answers. Instances without an entry never become ready.
    pub fn set_address(&self, name: impl Into<String>, polls: u32, address: IpAddr) {
        lock(&self.ready_after).insert(name.into(), (polls, address));
    }

    /// Makes the next terminate call fail.
    pub fn push_terminate_failure(&self, message: impl Into<String>) {
        lock(&self.terminate_failures).push_back(ServiceError::new(message));
    }

    /// Create specs observed so far, in call order.
    #[must_use]
    pub fn created(&self) -> Vec<CreateSpec> {
        lock(&self.created).clone()
    }

    /// Instance ids terminated so far.
    #[must_use]
    pub fn terminated(&self) -> Vec<String> {
        lock(&self.terminated).clone()
    }
}

impl CloudService for ScriptedCloud {
    fn create<'a>(&'a self, spec: &'a CreateSpec) -> ServiceFuture<'a, CloudHandle> {
        lock(&self.created).push(spec.clone());
        let handle = CloudHandle {
            id: spec.name.clone(),
        };
        Box::pin(async move { Ok(handle) })
    }

    fn address<'a>(&'a self, handle: &'a CloudHandle) -> ServiceFuture<'a, Option<IpAddr>> {
        let answer = lock(&self.ready_after)
            .get(&handle.id)
            .copied()
            .and_then(|(polls_needed, address)| {
                let mut polls = lock(&self.polls);
                let seen = polls.entry(handle.id.clone()).or_insert(0);
                *seen += 1;
                (*seen > polls_needed).then_some(address)
            });
        Box::pin(async move { Ok(answer) })
    }

    fn terminate<'a>(&'a self, handle: &'a CloudHandle) -> ServiceFuture<'a, ()> {
        lock(&self.terminated).push(handle.id.clone());
        let failure = lock(&self.terminate_failures).pop_front();
        Box::pin(async move { failure.map_or(Ok(()), Err) })
    }
}

/// Scripted container runtime backing the container driver.
#[derive(Clone, Debug, Default)]
pub struct ScriptedContainerRuntime {
    built: Arc<Mutex<Vec<ImageSpec>>>,
    started: Arc<Mutex<Vec<ContainerSpec>>>,
    ssh_ports: Arc<Mutex<VecDeque<Option<u16>>>>,
    killed: Arc<Mutex<Vec<String>>>,
    removed: Arc<Mutex<Vec<String>>>,
    removed_images: Arc<Mutex<Vec<String>>>,
}

impl ScriptedContainerRuntime {
    /// Creates a runtime with no containers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an inspection answer for the published SSH port. Unseeded
    /// inspections report port 49200.
    pub fn push_ssh_port(&self, port: Option<u16>) {
        lock(&self.ssh_ports).push_back(port);
    }

    /// Image specs built so far.
    #[must_use]
    pub fn built(&self) -> Vec<ImageSpec> {
        lock(&self.built).clone()
    }

    /// Container specs started so far.
    #[must_use]
    pub fn started(&self) -> Vec<ContainerSpec> {
        lock(&self.started).clone()
    }

    /// Container ids killed so far.
    #[must_use]
    pub fn killed(&self) -> Vec<String> {
        lock(&self.killed).clone()
    }

    /// Container ids removed so far.
    #[must_use]
    pub fn removed(&self) -> Vec<String> {
        lock(&self.removed).clone()
    }

    /// Image ids removed so far.
    #[must_use]
    pub fn removed_images(&self) -> Vec<String> {
        lock(&self.removed_images).clone()
    }
}

impl ContainerRuntime for ScriptedContainerRuntime {
    fn build<'a>(&'a self, spec: &'a ImageSpec) -> ServiceFuture<'a, String> {
        let mut built = lock(&self.built);
        built.push(spec.clone());
        let id = format!("image-{}", built.len());
        Box::pin(async move { Ok(id) })
    }

    fn create_and_start<'a>(
        &'a self,
        spec: &'a ContainerSpec,
    ) -> ServiceFuture<'a, ContainerHandle> {
        let mut started = lock(&self.started);
        started.push(spec.clone());
        let handle = ContainerHandle {
            id: format!("container-{}", started.len()),
        };
        Box::pin(async move { Ok(handle) })
    }

    fn ssh_port<'a>(&'a self, _handle: &'a ContainerHandle) -> ServiceFuture<'a, Option<u16>> {
        let port = lock(&self.ssh_ports).pop_front().unwrap_or(Some(49200));
        Box::pin(async move { Ok(port) })
    }

    fn kill<'a>(&'a self, handle: &'a ContainerHandle) -> ServiceFuture<'a, ()> {
        lock(&self.killed).push(handle.id.clone());
        Box::pin(async move { Ok(()) })
    }

    fn remove_container<'a>(&'a self, handle: &'a ContainerHandle) -> ServiceFuture<'a, ()> {
        lock(&self.removed).push(handle.id.clone());
        Box::pin(async move { Ok(()) })
    }

    fn remove_image<'a>(&'a self, image: &'a str) -> ServiceFuture<'a, ()> {
        lock(&self.removed_images).push(image.to_owned());
        Box::pin(async move { Ok(()) })
    }
}
