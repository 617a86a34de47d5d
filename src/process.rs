use std::{
    path::Path,
    sync::{Arc, RwLock},
};

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::utility::exe_file_name;

/// Absolute path of the watched executable. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    path: String,
    folded: String,
}

impl TargetSpec {
    /// `None` for an empty or whitespace-only path: no target means never trigger.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        Some(Self {
            path: path.to_string(),
            folded: fold(path),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        exe_file_name(&self.path)
    }

    /// Case-insensitive match against a resolved executable path.
    pub fn matches(&self, exe: &Path) -> bool {
        fold(&exe.to_string_lossy()) == self.folded
    }
}

fn fold(path: &str) -> String {
    path.to_lowercase()
}

/// The one piece of session input that may change from outside the worker.
/// Readers always see a whole value, either the old target or the new one.
#[derive(Debug, Clone, Default)]
pub struct TargetHandle {
    current: Arc<RwLock<Option<TargetSpec>>>,
}

impl TargetHandle {
    pub fn new(path: Option<&str>) -> Self {
        Self {
            current: Arc::new(RwLock::new(path.and_then(TargetSpec::parse))),
        }
    }

    /// Replaces the target; returns true when it actually changed.
    pub fn set(&self, path: Option<&str>) -> bool {
        let next = path.and_then(TargetSpec::parse);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if *guard == next {
            return false;
        }
        *guard = next;
        true
    }

    pub fn current(&self) -> Option<TargetSpec> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub trait PresenceDetector {
    fn is_running(&mut self, target: &TargetSpec) -> bool;
}

impl<F> PresenceDetector for F
where
    F: FnMut(&TargetSpec) -> bool,
{
    fn is_running(&mut self, target: &TargetSpec) -> bool {
        self(target)
    }
}

/// Process table scan through `sysinfo`. Processes whose executable path
/// cannot be resolved (access denied, exited mid-scan) are simply not matched.
pub struct SysinfoPresence {
    system: System,
}

impl Default for SysinfoPresence {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoPresence {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl PresenceDetector for SysinfoPresence {
    fn is_running(&mut self, target: &TargetSpec) -> bool {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
        );

        self.system
            .processes()
            .values()
            .filter_map(|process| process.exe())
            .any(|exe| target.matches(exe))
    }
}
