//! Display enumeration and mode control.
//!
//! The OS boundary sits behind two traits so the session logic can run
//! against the Win32 backend in production and an in-memory desktop in tests.

use std::fmt;

use thiserror::Error;

#[cfg(test)]
pub mod fake;
#[cfg(windows)]
pub mod win32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    #[error("display enumeration failed: {0}")]
    Enumeration(String),
    #[error("{device}: mode change rejected with code {code}")]
    ChangeRejected { device: String, code: i32 },
    #[error("applying staged display changes failed with code {0}")]
    CommitRejected(i32),
}

/// A captured display mode.
///
/// Implementations are opaque blobs: reapplying a captured value must restore
/// the display exactly, so only the accessors below are interpreted.
pub trait DisplayMode: Clone + PartialEq + fmt::Debug + Send + 'static {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn position(&self) -> (i32, i32);
    fn orientation(&self) -> u32;
    /// Bit mask of the fields the OS considers meaningful in this mode.
    fn fields(&self) -> u32;

    fn describe(&self) -> String {
        let (x, y) = self.position();
        format!("{}x{} at ({}, {})", self.width(), self.height(), x, y)
    }
}

/// One attached display as seen during a single enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayDevice<M> {
    /// Stable OS device name, e.g. `\\.\DISPLAY2`.
    pub id: String,
    pub description: String,
    pub is_primary: bool,
    pub is_attached: bool,
    /// Mode in effect when the device was enumerated.
    pub mode: M,
}

impl<M> DisplayDevice<M> {
    pub fn is_secondary(&self) -> bool {
        self.is_attached && !self.is_primary
    }

    pub fn label(&self) -> String {
        if self.description.is_empty() {
            self.id.clone()
        } else {
            format!("{} ({})", self.description, self.id)
        }
    }
}

pub trait DisplayEnumerator {
    type Mode: DisplayMode;

    /// Attached displays in device-index order, each with its current mode.
    /// Devices whose mode cannot be read are left out rather than failing the call.
    fn list_displays(&self) -> Result<Vec<DisplayDevice<Self::Mode>>, DisplayError>;
}

/// Single-shot mode changes. No retries happen here.
pub trait ModeController {
    type Mode: DisplayMode;

    /// Stages a zero-resolution mode for `id`.
    fn disable(&self, id: &str) -> Result<(), DisplayError>;

    /// Stages `mode` for `id`, exactly as captured.
    fn restore(&self, id: &str, mode: &Self::Mode) -> Result<(), DisplayError>;

    /// Applies everything staged by `disable`/`restore`.
    fn commit(&self) -> Result<(), DisplayError>;
}

/// The secondary displays out of an enumeration, in enumeration order.
pub fn secondaries<M>(displays: &[DisplayDevice<M>]) -> impl Iterator<Item = &DisplayDevice<M>> {
    displays.iter().filter(|d| d.is_secondary())
}
