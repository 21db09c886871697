use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{RealmError, RealmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// stopped -> starting -> started -> stopping -> stopped.
/// A failed start falls back to stopped so the realm can be started again.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self { Self { state: Mutex::new(LifecycleState::Stopped) } }
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState { *self.state.lock() }

    pub fn is_started(&self) -> bool { self.state() == LifecycleState::Started }

    pub fn begin_start(&self) -> RealmResult<()> {
        self.transition(LifecycleState::Stopped, LifecycleState::Starting)
    }

    pub fn finish_start(&self, ok: bool) {
        let mut s = self.state.lock();
        if *s == LifecycleState::Starting {
            *s = if ok { LifecycleState::Started } else { LifecycleState::Stopped };
        }
    }

    pub fn begin_stop(&self) -> RealmResult<()> {
        self.transition(LifecycleState::Started, LifecycleState::Stopping)
    }

    pub fn finish_stop(&self) {
        let mut s = self.state.lock();
        if *s == LifecycleState::Stopping { *s = LifecycleState::Stopped; }
    }

    fn transition(&self, expected: LifecycleState, next: LifecycleState) -> RealmResult<()> {
        let mut s = self.state.lock();
        if *s != expected {
            return Err(RealmError::Lifecycle { expected, actual: *s });
        }
        *s = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle() {
        let lc = Lifecycle::default();
        assert_eq!(lc.state(), LifecycleState::Stopped);
        lc.begin_start().unwrap();
        assert_eq!(lc.state(), LifecycleState::Starting);
        lc.finish_start(true);
        assert!(lc.is_started());
        lc.begin_stop().unwrap();
        lc.finish_stop();
        assert_eq!(lc.state(), LifecycleState::Stopped);
    }

    #[test]
    fn double_start_and_stray_stop_rejected() {
        let lc = Lifecycle::default();
        assert!(lc.begin_stop().is_err());
        lc.begin_start().unwrap();
        lc.finish_start(true);
        let err = lc.begin_start().unwrap_err();
        assert!(matches!(err, RealmError::Lifecycle { actual: LifecycleState::Started, .. }));
    }

    #[test]
    fn failed_start_returns_to_stopped() {
        let lc = Lifecycle::default();
        lc.begin_start().unwrap();
        lc.finish_start(false);
        assert_eq!(lc.state(), LifecycleState::Stopped);
        assert!(lc.begin_start().is_ok());
    }
}
