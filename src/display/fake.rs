//! In-memory desktop used by unit tests in place of the Win32 backend.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use super::{DisplayDevice, DisplayEnumerator, DisplayError, DisplayMode, ModeController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeMode {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
    pub orientation: u32,
    pub fields: u32,
}

impl FakeMode {
    pub fn new(width: u32, height: u32, x: i32, y: i32) -> Self {
        Self {
            width,
            height,
            x,
            y,
            orientation: 0,
            fields: 0x001c_00a0,
        }
    }
}

impl DisplayMode for FakeMode {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    fn orientation(&self) -> u32 {
        self.orientation
    }

    fn fields(&self) -> u32 {
        self.fields
    }
}

#[derive(Debug, Clone)]
pub struct FakeMonitor {
    pub id: String,
    pub description: String,
    pub is_primary: bool,
    pub active: bool,
    pub mode: FakeMode,
    /// Mode staged but not yet committed.
    pub staged: Option<Option<FakeMode>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Disable(String),
    Restore(String),
    Commit,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub monitors: Vec<FakeMonitor>,
    pub calls: Vec<Call>,
    pub fail_disable: HashMap<String, u32>,
    pub fail_restore: HashMap<String, u32>,
    pub fail_enumeration: u32,
    pub fail_commit: u32,
}

/// Shared handle: clones see the same desktop, so a test can keep one while
/// the session owns another.
#[derive(Debug, Clone, Default)]
pub struct FakeDesktop {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_monitor(self, id: &str, is_primary: bool, mode: FakeMode) -> Self {
        self.state().monitors.push(FakeMonitor {
            id: id.to_string(),
            description: format!("Generic Monitor {id}"),
            is_primary,
            active: true,
            mode,
            staged: None,
        });
        self
    }

    /// Primary at the origin plus one 1920x1080 secondary to its right.
    pub fn dual() -> Self {
        Self::new()
            .with_monitor(r"\\.\DISPLAY1", true, FakeMode::new(2560, 1440, 0, 0))
            .with_monitor(r"\\.\DISPLAY2", false, FakeMode::new(1920, 1080, 2560, 0))
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn monitor(&self, id: &str) -> FakeMonitor {
        self.state()
            .monitors
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no fake monitor {id}"))
    }

    pub fn fail_disable(&self, id: &str, times: u32) {
        self.state().fail_disable.insert(id.to_string(), times);
    }

    pub fn fail_restore(&self, id: &str, times: u32) {
        self.state().fail_restore.insert(id.to_string(), times);
    }

    pub fn fail_enumeration(&self, times: u32) {
        self.state().fail_enumeration = times;
    }

    pub fn set_mode(&self, id: &str, mode: FakeMode) {
        if let Some(m) = self.state().monitors.iter_mut().find(|m| m.id == id) {
            m.mode = mode;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    fn stage(&self, id: &str, mode: Option<FakeMode>, failures: fn(&mut FakeState) -> &mut HashMap<String, u32>) -> Result<(), DisplayError> {
        let mut state = self.state();
        if let Some(left) = failures(&mut *state).get_mut(id) {
            if *left > 0 {
                *left -= 1;
                return Err(DisplayError::ChangeRejected {
                    device: id.to_string(),
                    code: -1,
                });
            }
        }

        let monitor = state
            .monitors
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| DisplayError::ChangeRejected {
                device: id.to_string(),
                code: -2,
            })?;
        monitor.staged = Some(mode);
        Ok(())
    }
}

impl DisplayEnumerator for FakeDesktop {
    type Mode = FakeMode;

    fn list_displays(&self) -> Result<Vec<DisplayDevice<FakeMode>>, DisplayError> {
        let mut state = self.state();
        if state.fail_enumeration > 0 {
            state.fail_enumeration -= 1;
            return Err(DisplayError::Enumeration("fake outage".to_string()));
        }

        Ok(state
            .monitors
            .iter()
            .filter(|m| m.active)
            .map(|m| DisplayDevice {
                id: m.id.clone(),
                description: m.description.clone(),
                is_primary: m.is_primary,
                is_attached: true,
                mode: m.mode,
            })
            .collect())
    }
}

impl ModeController for FakeDesktop {
    type Mode = FakeMode;

    fn disable(&self, id: &str) -> Result<(), DisplayError> {
        self.state().calls.push(Call::Disable(id.to_string()));
        self.stage(id, None, |s| &mut s.fail_disable)
    }

    fn restore(&self, id: &str, mode: &FakeMode) -> Result<(), DisplayError> {
        self.state().calls.push(Call::Restore(id.to_string()));
        self.stage(id, Some(*mode), |s| &mut s.fail_restore)
    }

    fn commit(&self) -> Result<(), DisplayError> {
        let mut state = self.state();
        state.calls.push(Call::Commit);
        if state.fail_commit > 0 {
            state.fail_commit -= 1;
            return Err(DisplayError::CommitRejected(-1));
        }

        for monitor in state.monitors.iter_mut() {
            match monitor.staged.take() {
                Some(Some(mode)) => {
                    monitor.mode = mode;
                    monitor.active = true;
                }
                Some(None) => {
                    monitor.mode = FakeMode {
                        width: 0,
                        height: 0,
                        ..monitor.mode
                    };
                    monitor.active = false;
                }
                None => {}
            }
        }
        Ok(())
    }
}
