//! Service record — the state machine behind one named, container-backed
//! service. Owned by the state manager in a `DashMap`; records never hold a
//! back-reference to the manager (§9 design notes).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::docker::ContainerInfo;

/// An in-flight lifecycle operation, set at the start of the op and cleared
/// by `clean_status()` on the terminal engine observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusOverride {
    Starting,
    Stopping,
    Restarting,
    Removing,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRecord {
    pub name: String,
    /// Whether this service's image is in the catalog and speaks the status RPC.
    pub native: bool,
    pub env: HashMap<String, String>,
    pub pos: Option<(i32, i32)>,
    pub build_options: HashMap<String, String>,
    /// Last-observed engine state, refreshed by the reconciler.
    pub dockstate: Option<ContainerInfo>,
    /// Last status-RPC response, if any.
    pub appstate: Option<Value>,
    /// When `appstate` was last refreshed — used to decide whether it's
    /// still recent enough to count toward `is_active`.
    pub appstate_at: Option<Instant>,
    pub status_override: Option<StatusOverride>,
    /// RPC methods this service last advertised while active.
    pub methods: Vec<String>,
}

impl ServiceRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The status shown externally: override if present, else the
    /// engine-observed state, else `"absent"`.
    pub fn effective_status(&self) -> String {
        if let Some(override_) = self.status_override {
            return match override_ {
                StatusOverride::Starting => "STARTING",
                StatusOverride::Stopping => "STOPPING",
                StatusOverride::Restarting => "RESTARTING",
                StatusOverride::Removing => "REMOVING",
            }
            .to_string();
        }

        match &self.dockstate {
            Some(info) => info.state.clone(),
            None => "absent".to_string(),
        }
    }

    /// Active requires the engine to report `running`, no blocking override,
    /// and a status-RPC response no older than `service_timeout` — a stale
    /// probe is treated the same as no probe at all.
    pub fn is_active(&self, service_timeout: Duration) -> bool {
        if self.effective_status() != "running" {
            return false;
        }
        match self.appstate_at {
            Some(at) => at.elapsed() <= service_timeout,
            None => false,
        }
    }

    /// Clears the in-flight override, and — if the engine no longer reports
    /// this service running — clears stale app state too, so a just-stopped
    /// or just-restarted service isn't reported active on old data until its
    /// next successful probe.
    pub fn clean_status(&mut self) {
        self.status_override = None;
        let still_running = self
            .dockstate
            .as_ref()
            .map(|d| d.state == "running")
            .unwrap_or(false);
        if !still_running {
            self.appstate = None;
            self.appstate_at = None;
            self.methods.clear();
        }
    }

    pub fn set_appstate(&mut self, appstate: Value, methods: Vec<String>) {
        self.appstate = Some(appstate);
        self.appstate_at = Some(Instant::now());
        self.methods = methods;
    }

    pub fn set_pos(&mut self, col: i32, row: i32) {
        self.pos = Some((col, row));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_dockstate() -> ContainerInfo {
        ContainerInfo {
            id: "abc".to_string(),
            name: "web".to_string(),
            image: "web:latest".to_string(),
            state: "running".to_string(),
            status: "Up 1 second".to_string(),
            log_driver: None,
            labels: HashMap::new(),
            created_at: 0,
            ports: Vec::new(),
            state_info: None,
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn absent_record_has_absent_status() {
        let record = ServiceRecord::new("web");
        assert_eq!(record.effective_status(), "absent");
        assert!(!record.is_active(TIMEOUT));
    }

    #[test]
    fn override_wins_over_dockstate() {
        let mut record = ServiceRecord::new("web");
        record.dockstate = Some(running_dockstate());
        record.status_override = Some(StatusOverride::Stopping);
        assert_eq!(record.effective_status(), "STOPPING");
    }

    #[test]
    fn running_without_a_probe_is_not_active() {
        let mut record = ServiceRecord::new("web");
        record.dockstate = Some(running_dockstate());
        assert!(!record.is_active(TIMEOUT));
    }

    #[test]
    fn dockstate_running_is_active_once_override_clears_and_probed() {
        let mut record = ServiceRecord::new("web");
        record.dockstate = Some(running_dockstate());
        record.status_override = Some(StatusOverride::Starting);
        assert!(!record.is_active(TIMEOUT));
        record.clean_status();
        record.set_appstate(serde_json::json!({"ok": true}), vec!["ping".to_string()]);
        assert!(record.is_active(TIMEOUT));
    }

    #[test]
    fn stale_probe_past_timeout_is_not_active() {
        let mut record = ServiceRecord::new("web");
        record.dockstate = Some(running_dockstate());
        record.set_appstate(serde_json::json!({"ok": true}), vec!["ping".to_string()]);
        assert!(!record.is_active(Duration::from_secs(0)));
    }

    #[test]
    fn clean_status_drops_stale_appstate_on_non_running_transition() {
        let mut record = ServiceRecord::new("web");
        record.set_appstate(serde_json::json!({"ok": true}), vec!["ping".to_string()]);
        record.status_override = Some(StatusOverride::Stopping);
        record.dockstate = None;
        record.clean_status();
        assert!(record.appstate.is_none());
        assert!(record.methods.is_empty());
    }

    #[test]
    fn clean_status_keeps_appstate_when_still_running() {
        let mut record = ServiceRecord::new("web");
        record.dockstate = Some(running_dockstate());
        record.set_appstate(serde_json::json!({"ok": true}), vec!["ping".to_string()]);
        record.status_override = Some(StatusOverride::Restarting);
        record.clean_status();
        assert!(record.appstate.is_some());
    }
}
