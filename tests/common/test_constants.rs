//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file
//! in `tests/`). Placing shared constants under `tests/common/` avoids
//! creating an additional integration test binary while still allowing reuse
//! via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

#![expect(
    dead_code,
    reason = "each test binary uses a subset of the shared constants"
)]

use std::time::Duration;

/// Poll/backoff interval short enough to keep tests fast.
pub const FAST_INTERVAL: Duration = Duration::from_millis(1);
/// Backoff ceiling used alongside [`FAST_INTERVAL`].
pub const FAST_CEILING: Duration = Duration::from_millis(4);

/// Undotted host name; its fully qualified name comes from the backend.
pub const HOST_ALPHA: &str = "alpha";
/// Second undotted host name for multi-host batches.
pub const HOST_BETA: &str = "beta";
/// Already-dotted host name that is its own fully qualified name.
pub const HOST_GAMMA: &str = "gamma.example.net";

/// Debian-family platform string.
pub const UBUNTU_PLATFORM: &str = "ubuntu-24.04-amd64";
/// Enterprise-Linux-family platform string.
pub const EL_PLATFORM: &str = "el-9-x86_64";
/// SUSE-family platform string.
pub const SLES_PLATFORM: &str = "sles-15-x86_64";
/// ARM platform string exercising the flavor fallback.
pub const ARM_PLATFORM: &str = "ubuntu-24.04-aarch64";
