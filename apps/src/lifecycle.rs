//! App Lifecycle
//!
//! State machine and crash-restart bookkeeping:
//!
//! ```text
//! NEW → INSTALLED → RUNNING ⇄ STOPPED
//!                      ↓
//!                    ERROR ──(crash_count < max_retries)──▶ RUNNING
//!                      ↓
//!                    FAILED  (explicit restart / reinstall only)
//! ```

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use super::registry::AppId;

// ── Types ───────────────────────────────────────────────────

/// Lifecycle state of an installed app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    /// Not (or no longer) in the registry.
    New,
    Installed,
    Running,
    Stopped,
    /// Terminated abnormally; a restart may be pending.
    Error,
    /// Crash budget exhausted. Terminal.
    Failed,
}

impl AppState {
    /// Human-readable label for logs and the shell.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::New => "new",
            AppState::Installed => "installed",
            AppState::Running => "running",
            AppState::Stopped => "stopped",
            AppState::Error => "error",
            AppState::Failed => "failed",
        }
    }

    /// States from which a plain `start` is accepted.
    pub fn can_start(&self) -> bool {
        matches!(self, AppState::Installed | AppState::Stopped | AppState::Error)
    }
}

impl core::fmt::Display for AppState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auto-restart policy of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub delay_ms: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy {
            enabled: false,
            max_retries: 3,
            delay_ms: 1000,
        }
    }
}

/// Outcome of an abnormal termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashDecision {
    /// Schedule restart number `attempt` (1-based) after the policy delay.
    Restart { attempt: u32 },
    /// Budget exhausted or restarts disabled.
    Fail,
}

/// Apply `policy` to an app that has already crashed `crash_count` times.
pub fn crash_decision(policy: &RestartPolicy, crash_count: u32) -> CrashDecision {
    if policy.enabled && crash_count < policy.max_retries {
        CrashDecision::Restart {
            attempt: crash_count + 1,
        }
    } else {
        CrashDecision::Fail
    }
}

// ── Restart schedule ────────────────────────────────────────

/// Pending auto-restarts, at most one per app.
#[derive(Debug, Default)]
pub struct RestartSchedule {
    due: BTreeMap<AppId, u64>,
}

impl RestartSchedule {
    pub const fn new() -> Self {
        RestartSchedule {
            due: BTreeMap::new(),
        }
    }

    /// Schedule (or reschedule) a restart of `app` at `deadline_ms`.
    pub fn schedule(&mut self, app: AppId, deadline_ms: u64) {
        self.due.insert(app, deadline_ms);
    }

    /// Cancel the pending restart of `app`. Returns whether one existed.
    pub fn cancel(&mut self, app: AppId) -> bool {
        self.due.remove(&app).is_some()
    }

    pub fn clear(&mut self) {
        self.due.clear();
    }

    pub fn is_pending(&self, app: AppId) -> bool {
        self.due.contains_key(&app)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.due.values().copied().min()
    }

    /// Remove and return every app due at `now_ms`, earliest first.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<AppId> {
        let mut ready: Vec<(u64, AppId)> = self
            .due
            .iter()
            .filter(|(_, deadline)| **deadline <= now_ms)
            .map(|(app, deadline)| (*deadline, *app))
            .collect();
        ready.sort();
        for (_, app) in &ready {
            self.due.remove(app);
        }
        ready.into_iter().map(|(_, app)| app).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RestartPolicy {
        RestartPolicy {
            enabled: true,
            max_retries,
            delay_ms: 1000,
        }
    }

    #[test]
    fn test_crash_decision_budget() {
        let p = policy(3);
        assert_eq!(crash_decision(&p, 0), CrashDecision::Restart { attempt: 1 });
        assert_eq!(crash_decision(&p, 2), CrashDecision::Restart { attempt: 3 });
        assert_eq!(crash_decision(&p, 3), CrashDecision::Fail);
    }

    #[test]
    fn test_crash_decision_disabled() {
        let p = RestartPolicy::default();
        assert!(!p.enabled);
        assert_eq!(crash_decision(&p, 0), CrashDecision::Fail);
    }

    #[test]
    fn test_can_start() {
        assert!(AppState::Installed.can_start());
        assert!(AppState::Stopped.can_start());
        assert!(AppState::Error.can_start());
        assert!(!AppState::Failed.can_start());
        assert!(!AppState::Running.can_start());
    }

    #[test]
    fn test_schedule_per_app() {
        let mut s = RestartSchedule::new();
        s.schedule(AppId(1), 2000);
        s.schedule(AppId(2), 1500);
        assert_eq!(s.next_deadline(), Some(1500));

        assert!(s.take_due(1000).is_empty());
        assert_eq!(s.take_due(1500), [AppId(2)]);
        assert!(s.is_pending(AppId(1)));
        assert!(!s.is_pending(AppId(2)));
    }

    #[test]
    fn test_schedule_due_in_deadline_order() {
        let mut s = RestartSchedule::new();
        s.schedule(AppId(1), 300);
        s.schedule(AppId(2), 100);
        s.schedule(AppId(3), 200);
        assert_eq!(s.take_due(1000), [AppId(2), AppId(3), AppId(1)]);
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn test_cancel_and_reschedule() {
        let mut s = RestartSchedule::new();
        s.schedule(AppId(1), 100);
        s.schedule(AppId(1), 500);
        assert!(s.take_due(200).is_empty());
        assert!(s.cancel(AppId(1)));
        assert!(!s.cancel(AppId(1)));
        assert!(s.take_due(1000).is_empty());
    }
}
