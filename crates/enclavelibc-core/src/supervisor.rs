//! Supervisor call gate.
//!
//! The domain never blocks by itself. Each suspension, each wake of another
//! thread, and each new OS thread is a round trip through this trait to the
//! untrusted host. Results are advisory: callers re-check their own state
//! after every call returns.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Host-side identity of the OS thread bound to a thread descriptor.
///
/// This is the descriptor's arena slot. The host never sees generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostThread(pub u32);

impl fmt::Display for HostThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-thread#{}", self.0)
    }
}

/// Clock a timed wait deadline is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    #[default]
    Realtime,
    Monotonic,
}

/// Realtime clock id, as accepted by condition attributes.
pub const CLOCK_REALTIME_ID: i32 = 0;
/// Monotonic clock id, as accepted by condition attributes.
pub const CLOCK_MONOTONIC_ID: i32 = 1;

impl ClockKind {
    /// Maps a clock id onto a supported clock. Anything else is rejected.
    #[must_use]
    pub const fn from_clock_id(id: i32) -> Option<Self> {
        match id {
            CLOCK_REALTIME_ID => Some(Self::Realtime),
            CLOCK_MONOTONIC_ID => Some(Self::Monotonic),
            _ => None,
        }
    }

    #[must_use]
    pub const fn clock_id(self) -> i32 {
        match self {
            Self::Realtime => CLOCK_REALTIME_ID,
            Self::Monotonic => CLOCK_MONOTONIC_ID,
        }
    }
}

/// Absolute deadline, split the way the C ABI passes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const NSEC_PER_SEC: i64 = 1_000_000_000;

    #[must_use]
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// A deadline with `nsec` outside `0..1e9` is malformed.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.nsec >= 0 && self.nsec < Self::NSEC_PER_SEC
    }

    #[must_use]
    pub fn from_duration(d: Duration) -> Self {
        Self {
            sec: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            nsec: i64::from(d.subsec_nanos()),
        }
    }

    /// Offset from the clock epoch. Negative instants saturate to zero.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        if self.sec < 0 {
            return Duration::ZERO;
        }
        let nsec = self.nsec.clamp(0, Self::NSEC_PER_SEC - 1);
        Duration::new(self.sec as u64, nsec as u32)
    }

    #[must_use]
    pub fn saturating_add(self, d: Duration) -> Self {
        let total = self.as_duration().saturating_add(d);
        Self::from_duration(total)
    }
}

/// Outcome of a successful `timed_wait` round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Woken,
    TimedOut,
}

/// Names the gate call that failed, for diagnostics and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorCall {
    Wait,
    Wake,
    WakeAndWait,
    TimedWait,
    CreateOsThread,
}

impl SupervisorCall {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::Wake => "wake",
            Self::WakeAndWait => "wake_and_wait",
            Self::TimedWait => "timed_wait",
            Self::CreateOsThread => "create_os_thread",
        }
    }
}

impl fmt::Display for SupervisorCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A gate call the supervisor refused or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("supervisor call {call} failed with status {status}")]
pub struct SupervisorError {
    pub call: SupervisorCall,
    pub status: i32,
}

impl SupervisorError {
    #[must_use]
    pub const fn new(call: SupervisorCall, status: i32) -> Self {
        Self { call, status }
    }
}

/// Entry point a freshly created OS thread must run inside the domain.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// The narrow interface to the untrusted host.
///
/// Implementations may lie. A wake may be spurious, a timeout may be
/// reported for a thread that was already released, and a wake may arrive
/// before the matching wait; the primitives tolerate all three.
pub trait Supervisor: Send + Sync {
    /// Block the calling OS thread until `me` is woken.
    fn wait(&self, me: HostThread) -> Result<(), SupervisorError>;

    /// Wake `target`. A wake with no pending wait is remembered.
    fn wake(&self, target: HostThread) -> Result<(), SupervisorError>;

    /// Wake `target`, then block `me`, in one round trip.
    fn wake_and_wait(&self, target: HostThread, me: HostThread) -> Result<(), SupervisorError>;

    /// Block `me` until woken or until the absolute `deadline` on `clock`.
    fn timed_wait(
        &self,
        me: HostThread,
        deadline: Timespec,
        clock: ClockKind,
    ) -> Result<WaitStatus, SupervisorError>;

    /// Materialize a new OS thread that runs `entry` inside the domain.
    fn create_os_thread(&self, entry: ThreadEntry) -> Result<(), SupervisorError>;
}
