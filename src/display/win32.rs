use std::{fmt, mem};

use windows::{
    core::PCWSTR,
    Win32::Graphics::Gdi::{
        ChangeDisplaySettingsExW, EnumDisplayDevicesW, EnumDisplaySettingsW, CDS_NORESET,
        CDS_TYPE, CDS_UPDATEREGISTRY, DEVMODEW, DISPLAY_DEVICEW,
        DISPLAY_DEVICE_ATTACHED_TO_DESKTOP, DISPLAY_DEVICE_PRIMARY_DEVICE, DISP_CHANGE,
        DISP_CHANGE_SUCCESSFUL, DM_PELSHEIGHT, DM_PELSWIDTH, DM_POSITION, ENUM_CURRENT_SETTINGS,
    },
};

use super::{DisplayDevice, DisplayEnumerator, DisplayError, DisplayMode, ModeController};
use crate::{
    info,
    utility::{from_wide_buf, to_wstring},
    warn, DEBUG_NAME,
};

/// A `DEVMODEW` captured from `EnumDisplaySettingsW`, kept whole.
#[derive(Clone, Copy)]
pub struct Win32Mode(DEVMODEW);

impl Win32Mode {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: DEVMODEW is a plain-old-data repr(C) struct.
        unsafe {
            std::slice::from_raw_parts(
                &self.0 as *const DEVMODEW as *const u8,
                mem::size_of::<DEVMODEW>(),
            )
        }
    }

    fn raw(&self) -> &DEVMODEW {
        &self.0
    }
}

impl PartialEq for Win32Mode {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for Win32Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Win32Mode")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("position", &self.position())
            .field("orientation", &self.orientation())
            .field("frequency", &self.0.dmDisplayFrequency)
            .field("bits_per_pel", &self.0.dmBitsPerPel)
            .field("fields", &format_args!("{:#x}", self.fields()))
            .finish()
    }
}

impl DisplayMode for Win32Mode {
    fn width(&self) -> u32 {
        self.0.dmPelsWidth
    }

    fn height(&self) -> u32 {
        self.0.dmPelsHeight
    }

    fn position(&self) -> (i32, i32) {
        // SAFETY: display devices always use the display arm of the union.
        let point = unsafe { self.0.Anonymous1.Anonymous2.dmPosition };
        (point.x, point.y)
    }

    fn orientation(&self) -> u32 {
        unsafe { self.0.Anonymous1.Anonymous2.dmDisplayOrientation.0 }
    }

    fn fields(&self) -> u32 {
        self.0.dmFields.0
    }
}

/// Win32 display backend: GDI enumeration plus staged `ChangeDisplaySettingsExW` calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Displays;

impl Win32Displays {
    pub fn new() -> Self {
        Self
    }

    fn stage_flags() -> CDS_TYPE {
        CDS_TYPE(CDS_UPDATEREGISTRY.0 | CDS_NORESET.0)
    }

    fn current_mode(device_name: &str) -> Option<Win32Mode> {
        let mut dev_mode: DEVMODEW = unsafe { mem::zeroed() };
        dev_mode.dmSize = mem::size_of::<DEVMODEW>() as u16;
        let name_wide = to_wstring(device_name);

        let ok = unsafe {
            EnumDisplaySettingsW(PCWSTR(name_wide.as_ptr()), ENUM_CURRENT_SETTINGS, &mut dev_mode)
                .as_bool()
        };

        ok.then_some(Win32Mode(dev_mode))
    }

    fn change(device_name: &str, dev_mode: &DEVMODEW) -> Result<(), DisplayError> {
        let name_wide = to_wstring(device_name);
        let result = unsafe {
            ChangeDisplaySettingsExW(
                PCWSTR(name_wide.as_ptr()),
                Some(dev_mode as *const DEVMODEW),
                None,
                Self::stage_flags(),
                None,
            )
        };

        check(result).map_err(|code| DisplayError::ChangeRejected {
            device: device_name.to_string(),
            code,
        })
    }
}

fn check(result: DISP_CHANGE) -> Result<(), i32> {
    if result == DISP_CHANGE_SUCCESSFUL {
        Ok(())
    } else {
        Err(result.0)
    }
}

impl DisplayEnumerator for Win32Displays {
    type Mode = Win32Mode;

    fn list_displays(&self) -> Result<Vec<DisplayDevice<Win32Mode>>, DisplayError> {
        let mut displays = Vec::new();
        let mut index = 0u32;

        loop {
            let mut device: DISPLAY_DEVICEW = unsafe { mem::zeroed() };
            device.cb = mem::size_of::<DISPLAY_DEVICEW>() as u32;

            let found =
                unsafe { EnumDisplayDevicesW(PCWSTR::null(), index, &mut device, 0).as_bool() };
            if !found {
                break;
            }
            index += 1;

            if device.StateFlags & DISPLAY_DEVICE_ATTACHED_TO_DESKTOP == 0 {
                continue;
            }

            let id = from_wide_buf(&device.DeviceName);
            let Some(mode) = Self::current_mode(&id) else {
                warn!(
                    "[{}][DISPLAY] {} is attached but its mode could not be read; skipping",
                    DEBUG_NAME,
                    id
                );
                continue;
            };

            displays.push(DisplayDevice {
                id,
                description: from_wide_buf(&device.DeviceString),
                is_primary: device.StateFlags & DISPLAY_DEVICE_PRIMARY_DEVICE != 0,
                is_attached: true,
                mode,
            });
        }

        // Device index 0 always exists on a machine with a desktop.
        if index == 0 {
            return Err(DisplayError::Enumeration(
                "EnumDisplayDevicesW returned no devices".to_string(),
            ));
        }

        info!("[{}][DISPLAY] Enumerated {} attached display(s)", DEBUG_NAME, displays.len());
        Ok(displays)
    }
}

impl ModeController for Win32Displays {
    type Mode = Win32Mode;

    fn disable(&self, id: &str) -> Result<(), DisplayError> {
        let mut dev_mode: DEVMODEW = unsafe { mem::zeroed() };
        dev_mode.dmSize = mem::size_of::<DEVMODEW>() as u16;
        dev_mode.dmFields = DM_PELSWIDTH | DM_PELSHEIGHT | DM_POSITION;
        dev_mode.dmPelsWidth = 0;
        dev_mode.dmPelsHeight = 0;

        Self::change(id, &dev_mode)
    }

    fn restore(&self, id: &str, mode: &Win32Mode) -> Result<(), DisplayError> {
        Self::change(id, mode.raw())
    }

    fn commit(&self) -> Result<(), DisplayError> {
        let result =
            unsafe { ChangeDisplaySettingsExW(PCWSTR::null(), None, None, CDS_TYPE(0), None) };
        check(result).map_err(DisplayError::CommitRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_blobs_compare_equal() {
        let mut raw: DEVMODEW = unsafe { mem::zeroed() };
        raw.dmSize = mem::size_of::<DEVMODEW>() as u16;
        raw.dmPelsWidth = 2560;
        raw.dmPelsHeight = 1440;
        raw.dmDisplayFrequency = 144;

        let captured = Win32Mode(raw);
        let copy = captured;
        assert_eq!(captured, copy);
        assert_eq!(copy.width(), 2560);

        let mut changed = raw;
        changed.dmDisplayFrequency = 60;
        assert_ne!(captured, Win32Mode(changed));
    }

    #[test]
    fn disable_request_masks_size_and_position() {
        let mask = (DM_PELSWIDTH | DM_PELSHEIGHT | DM_POSITION).0;
        assert_ne!(mask & DM_POSITION.0, 0);
        assert_eq!(mask & !(DM_PELSWIDTH.0 | DM_PELSHEIGHT.0 | DM_POSITION.0), 0);
    }
}
