//! Core library for the Polihon test-run provisioning harness.
//!
//! The crate provisions short-lived systems under test across several
//! hypervisor backends (pooled leases, snapshot clones, cloud instances,
//! containers), executes commands on them over a pluggable transport, and
//! tears everything down according to a preserve-hosts policy.

pub mod command;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod host;
pub mod hosts_file;
pub mod hypervisor;
pub mod inventory;
pub mod network;
pub mod predicate;
pub mod report;
pub mod result;
pub mod retry;
pub mod test_support;

pub use command::{Command, CommandBuilder, ExecOptions};
pub use connection::{
    Connection, ConnectionError, ExecRequest, OutputChunk, Transport, TransportError,
    TransportFuture, TransportOutput,
};
pub use context::RunContext;
pub use dispatch::{DispatchError, Dispatcher, ResultHook, Target};
pub use host::{
    ConfigLayer, ExecError, Host, HostConfig, HostError, Role, SharedHost, shared,
};
pub use hosts_file::{HostsEntry, fragment};
pub use hypervisor::{
    BackendKind, DriverFuture, HypervisorDriver, ProvisionState, ProvisioningError, ServiceError,
    ServiceFuture,
};
pub use inventory::{HostSpec, Inventory, InventoryError};
pub use network::{
    CleanupError, DriverFactory, NetworkManager, PolicyParseError, PreservePolicy,
};
pub use predicate::{Decision, HostPredicate, decide};
pub use report::{NullSink, ReportSink, TracingSink};
pub use result::{CommandResult, ResultError};
pub use retry::{RetryError, RetryOutcome, RetryPolicy, retry_on};
