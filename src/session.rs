//! The monitor session state machine.
//!
//! Presence is sampled once per poll; only a change from the previous sample
//! triggers a pass. A rising edge turns every secondary display off, a falling
//! edge brings them back from the snapshot store. Every transition and every
//! per-display outcome is published on the status bus.

use std::{fmt, thread, time::Duration};

use crate::{
    data_loaders::config::SessionConfig,
    display::{secondaries, DisplayDevice, DisplayEnumerator, DisplayError, DisplayMode, ModeController},
    error, info,
    process::{PresenceDetector, TargetHandle, TargetSpec},
    snapshot::SnapshotStore,
    status::{StatusBus, StatusCategory, StatusEvent},
    warn,
    worker::CancelToken,
    DEBUG_NAME,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSessionState {
    Idle,
    Disabling,
    Disabled,
    Restoring,
}

impl fmt::Display for MonitorSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Disabling => "disabling",
            Self::Disabled => "disabled",
            Self::Restoring => "restoring",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub retry_delay: Duration,
    pub disable_delay: Duration,
    pub refresh_baseline_before_disable: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            retry_delay: config.retry_delay(),
            disable_delay: config.disable_delay(),
            refresh_baseline_before_disable: config.refresh_baseline_before_disable,
        }
    }
}

/// Secondary display picked by a disable pass, remembered for the restore.
#[derive(Debug, Clone)]
struct PassTarget {
    id: String,
    label: String,
}

pub struct SessionController<E, C, P>
where
    E: DisplayEnumerator,
    C: ModeController<Mode = E::Mode>,
    P: PresenceDetector,
{
    enumerator: E,
    modes: C,
    presence: P,
    target: TargetHandle,
    store: SnapshotStore<E::Mode>,
    settings: SessionSettings,
    status: StatusBus,
    cancel: CancelToken,
    state: MonitorSessionState,
    was_running: bool,
    pass_targets: Vec<PassTarget>,
}

impl<E, C, P> SessionController<E, C, P>
where
    E: DisplayEnumerator,
    C: ModeController<Mode = E::Mode>,
    P: PresenceDetector,
{
    pub fn new(
        enumerator: E,
        modes: C,
        presence: P,
        target: TargetHandle,
        settings: SessionSettings,
        status: StatusBus,
    ) -> Self {
        Self {
            enumerator,
            modes,
            presence,
            target,
            store: SnapshotStore::new(),
            settings,
            status,
            cancel: CancelToken::new(),
            state: MonitorSessionState::Idle,
            was_running: false,
            pass_targets: Vec::new(),
        }
    }

    pub fn state(&self) -> MonitorSessionState {
        self.state
    }

    /// Read-only view of the captured modes and the disabled set.
    pub fn snapshot(&self) -> &SnapshotStore<E::Mode> {
        &self.store
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Captures the baseline for every attached display and returns the
    /// enumeration so the caller can report the inventory.
    pub fn capture_baseline(&mut self) -> Result<Vec<DisplayDevice<E::Mode>>, DisplayError> {
        let displays = self.enumerator.list_displays()?;
        let added = self.store.capture(&displays);
        info!(
            "[{}][SESSION] Baseline captured for {} display(s) ({} new)",
            DEBUG_NAME,
            self.store.len(),
            added
        );
        Ok(displays)
    }

    /// One polling cycle: sample presence and act on an edge.
    pub fn poll_once(&mut self) -> MonitorSessionState {
        let target = self.target.current();
        let running = match &target {
            Some(target) => self.presence.is_running(target),
            None => false,
        };

        match (self.was_running, running, target) {
            (false, true, Some(target)) => {
                // An unreadable display list leaves the edge unlatched so the
                // next cycle tries again.
                if self.begin_session(&target) {
                    self.was_running = true;
                }
            }
            (true, false, target) => {
                self.was_running = false;
                if self.state == MonitorSessionState::Disabled || self.store.any_disabled() {
                    let name = target
                        .as_ref()
                        .map(|t| t.file_name().to_string())
                        .unwrap_or_else(|| "Target".to_string());
                    self.end_session(&format!("{name} exited; restoring displays"), true);
                }
            }
            // A restore that failed twice is tried again on every idle cycle.
            (false, false, _) if self.store.any_disabled() => {
                self.end_session("Displays still off; retrying restore", false);
            }
            _ => {}
        }

        self.state
    }

    /// Restores now regardless of presence. The running target stays latched,
    /// so it only triggers again after it exits and starts anew.
    pub fn restore_now(&mut self) {
        if self.state != MonitorSessionState::Disabled && !self.store.any_disabled() {
            info!("[{}][SESSION] Restore requested but nothing is disabled", DEBUG_NAME);
            return;
        }
        self.end_session("Restore requested; restoring displays", false);
    }

    /// Controlled stop: never leave a display off behind us.
    pub fn shutdown(&mut self) {
        if self.state == MonitorSessionState::Disabled || self.store.any_disabled() {
            self.end_session("Shutting down; restoring displays", false);
        }
        self.state = MonitorSessionState::Idle;
        self.was_running = false;
        self.emit(StatusEvent::transition(StatusCategory::Idle, "Session stopped"));
    }

    fn begin_session(&mut self, target: &TargetSpec) -> bool {
        self.state = MonitorSessionState::Disabling;
        self.emit(StatusEvent::transition(
            StatusCategory::Detected,
            format!("{} started; turning secondary displays off", target.file_name()),
        ));

        if !self.settings.disable_delay.is_zero() {
            info!(
                "[{}][SESSION] Waiting {}ms before turning displays off",
                DEBUG_NAME,
                self.settings.disable_delay.as_millis()
            );
            if self.cancel.wait(self.settings.disable_delay) {
                self.state = MonitorSessionState::Idle;
                self.emit(StatusEvent::transition(
                    StatusCategory::Idle,
                    "Stop requested before displays were turned off",
                ));
                return true;
            }
        }

        let displays = match self.enumerator.list_displays() {
            Ok(displays) => displays,
            Err(e) => {
                self.state = MonitorSessionState::Idle;
                self.emit(StatusEvent::transition(
                    StatusCategory::Failed,
                    format!("Could not list displays ({e}); will retry next cycle"),
                ));
                return false;
            }
        };

        self.store.capture(&displays);
        if self.settings.refresh_baseline_before_disable {
            for device in secondaries(&displays) {
                self.store.refresh(device);
            }
        }

        self.pass_targets = secondaries(&displays)
            .map(|d| PassTarget {
                id: d.id.clone(),
                label: d.label(),
            })
            .collect();

        let total = self.pass_targets.len();
        let turned_off = self.disable_pass();

        self.state = MonitorSessionState::Disabled;
        let summary = if total == 0 {
            "No secondary displays to turn off".to_string()
        } else {
            format!("Secondary displays off: {turned_off} of {total}")
        };
        self.emit(StatusEvent::transition(StatusCategory::Disabled, summary));
        true
    }

    fn disable_pass(&mut self) -> usize {
        let mut staged = Vec::new();
        let mut skipped = Vec::new();

        for target in self.pass_targets.clone() {
            let Some(mode) = self.store.get(&target.id).cloned() else {
                error!(
                    "[{}][SESSION] No baseline for {}; refusing to turn it off",
                    DEBUG_NAME,
                    target.id
                );
                self.emit(StatusEvent::for_display(
                    StatusCategory::Failed,
                    &target.id,
                    format!("No saved mode for {}; left on", target.label),
                ));
                skipped.push(target.id);
                continue;
            };

            let result = self.attempt(&target, "turn off", |modes| modes.disable(&target.id));
            match result {
                Ok(()) => {
                    self.store.mark_disabled(&target.id);
                    staged.push((target, mode));
                }
                Err(e) => self.emit(StatusEvent::for_display(
                    StatusCategory::Failed,
                    &target.id,
                    format!("Could not turn off {} ({e}); left on", target.label),
                )),
            }
        }

        // Never turned off, so there is nothing to bring back on exit.
        self.pass_targets.retain(|t| !skipped.contains(&t.id));

        if staged.is_empty() {
            return 0;
        }
        if let Err(e) = self.commit() {
            // The disabled marks stay: the restore pass reapplies the
            // snapshot, which is harmless if the display never went dark.
            self.emit(StatusEvent::transition(
                StatusCategory::Failed,
                format!("Could not apply display changes ({e})"),
            ));
            return 0;
        }

        for (target, mode) in &staged {
            self.emit(StatusEvent::for_display(
                StatusCategory::Disabled,
                &target.id,
                format!("{} turned off (was {})", target.label, mode.describe()),
            ));
        }
        staged.len()
    }

    /// Runs a restore pass. Only a target exit is announced as `detected`;
    /// other triggers are logged and surface through their outcomes.
    fn end_session(&mut self, reason: &str, target_exited: bool) {
        self.state = MonitorSessionState::Restoring;
        if target_exited {
            self.emit(StatusEvent::transition(StatusCategory::Detected, reason));
        } else {
            info!("[{}][SESSION] {}", DEBUG_NAME, reason);
        }

        let (restored, attempted) = self.restore_pass();

        self.state = MonitorSessionState::Idle;
        let summary = if attempted == 0 {
            "Idle; no displays needed restoring".to_string()
        } else if restored == attempted {
            format!("Idle; restored {restored} display(s)")
        } else {
            format!("Idle; restored {restored} of {attempted} display(s)")
        };
        self.emit(StatusEvent::transition(StatusCategory::Idle, summary));
    }

    fn restore_pass(&mut self) -> (usize, usize) {
        let mut targets = self.pass_targets.clone();
        for id in self.store.disabled_ids() {
            if !targets.iter().any(|t| t.id == id) {
                targets.push(PassTarget {
                    id: id.to_string(),
                    label: id.to_string(),
                });
            }
        }

        let mut staged = Vec::new();
        for target in &targets {
            let Some(mode) = self.store.get(&target.id).cloned() else {
                error!(
                    "[{}][SESSION] BUG: {} was targeted without a captured baseline",
                    DEBUG_NAME,
                    target.id
                );
                self.emit(StatusEvent::for_display(
                    StatusCategory::Failed,
                    &target.id,
                    format!("BUG: no saved mode for {}; cannot restore it", target.label),
                ));
                continue;
            };

            match self.attempt(target, "restore", |modes| modes.restore(&target.id, &mode)) {
                Ok(()) => staged.push((target.clone(), mode)),
                Err(e) => self.emit(StatusEvent::for_display(
                    StatusCategory::Failed,
                    &target.id,
                    format!("Could not restore {} ({e})", target.label),
                )),
            }
        }

        let restored = if staged.is_empty() {
            0
        } else if let Err(e) = self.commit() {
            self.emit(StatusEvent::transition(
                StatusCategory::Failed,
                format!("Could not apply restored modes ({e})"),
            ));
            0
        } else {
            for (target, mode) in &staged {
                self.store.mark_restored(&target.id);
                self.emit(StatusEvent::for_display(
                    StatusCategory::Restored,
                    &target.id,
                    format!("{} restored to {}", target.label, mode.describe()),
                ));
            }
            staged.len()
        };

        let store = &self.store;
        self.pass_targets.retain(|t| store.is_disabled(&t.id));
        (restored, targets.len())
    }

    /// Runs `op` once, and once more after the fixed backoff if it failed.
    fn attempt<F>(&self, target: &PassTarget, action: &str, mut op: F) -> Result<(), DisplayError>
    where
        F: FnMut(&C) -> Result<(), DisplayError>,
    {
        match op(&self.modes) {
            Ok(()) => Ok(()),
            Err(first) => {
                self.emit(StatusEvent::for_display(
                    StatusCategory::Failed,
                    &target.id,
                    format!(
                        "Could not {action} {} ({first}); retrying in {}ms",
                        target.label,
                        self.settings.retry_delay.as_millis()
                    ),
                ));
                thread::sleep(self.settings.retry_delay);
                op(&self.modes)
            }
        }
    }

    fn commit(&self) -> Result<(), DisplayError> {
        match self.modes.commit() {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(
                    "[{}][SESSION] Applying display changes failed ({first}); retrying",
                    DEBUG_NAME
                );
                thread::sleep(self.settings.retry_delay);
                self.modes.commit()
            }
        }
    }

    fn emit(&self, event: StatusEvent) {
        match event.category {
            StatusCategory::Failed => warn!("[{}][SESSION] {}", DEBUG_NAME, event.message),
            _ => info!("[{}][SESSION] {}", DEBUG_NAME, event.message),
        }
        self.status.emit(event);
    }
}
