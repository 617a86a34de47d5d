//! Baseline display modes, and the set of displays currently switched off.
//!
//! Both live in one type so that "disabled implies captured" holds by
//! construction: `mark_disabled` refuses ids without a snapshot, and capture
//! never touches an id while it is disabled.

use std::collections::{BTreeMap, BTreeSet};

use crate::display::{DisplayDevice, DisplayEnumerator, DisplayError, DisplayMode};

#[derive(Debug, Clone)]
pub struct SnapshotStore<M> {
    modes: BTreeMap<String, M>,
    disabled: BTreeSet<String>,
}

impl<M> Default for SnapshotStore<M> {
    fn default() -> Self {
        Self {
            modes: BTreeMap::new(),
            disabled: BTreeSet::new(),
        }
    }
}

impl<M: DisplayMode> SnapshotStore<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerates and records every display that has no snapshot yet.
    /// Returns how many entries were added.
    pub fn save_baseline<E>(&mut self, enumerator: &E) -> Result<usize, DisplayError>
    where
        E: DisplayEnumerator<Mode = M>,
    {
        let displays = enumerator.list_displays()?;
        Ok(self.capture(&displays))
    }

    /// First successful capture per id wins; existing entries are left alone.
    pub fn capture(&mut self, displays: &[DisplayDevice<M>]) -> usize {
        let mut added = 0;
        for device in displays {
            if self.disabled.contains(&device.id) || self.modes.contains_key(&device.id) {
                continue;
            }
            if !is_capturable(&device.mode) {
                continue;
            }
            self.modes.insert(device.id.clone(), device.mode.clone());
            added += 1;
        }
        added
    }

    /// Overwrites the entry for `device` with its current mode.
    /// Refused while the display is disabled, since its current mode is the blank one.
    pub fn refresh(&mut self, device: &DisplayDevice<M>) -> bool {
        if self.disabled.contains(&device.id) || !is_capturable(&device.mode) {
            return false;
        }
        self.modes.insert(device.id.clone(), device.mode.clone());
        true
    }

    pub fn get(&self, id: &str) -> Option<&M> {
        self.modes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Records that `id` was switched off. Returns false, recording nothing,
    /// when there is no snapshot to bring it back with.
    pub fn mark_disabled(&mut self, id: &str) -> bool {
        if !self.modes.contains_key(id) {
            return false;
        }
        self.disabled.insert(id.to_string());
        true
    }

    pub fn mark_restored(&mut self, id: &str) {
        self.disabled.remove(id);
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled.contains(id)
    }

    pub fn disabled_ids(&self) -> impl Iterator<Item = &str> {
        self.disabled.iter().map(String::as_str)
    }

    pub fn any_disabled(&self) -> bool {
        !self.disabled.is_empty()
    }
}

// A zero-sized mode is what a disabled display reports; restoring it would be a no-op.
fn is_capturable<M: DisplayMode>(mode: &M) -> bool {
    mode.width() > 0 && mode.height() > 0
}
