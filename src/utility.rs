use std::{
    env,
    path::{Path, PathBuf},
};

#[cfg(windows)]
pub fn to_wstring(s: &str) -> Vec<u16> {
    use std::{ffi::OsStr, os::windows::ffi::OsStrExt};

    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Decodes a fixed-size, NUL-padded UTF-16 buffer as found in Win32 structs.
pub fn from_wide_buf(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// Directory the app treats as its home: the exe's folder, or its parent when
/// the exe sits inside a `bin/` folder.
pub fn app_root_dir() -> Option<PathBuf> {
    let exe_path = env::current_exe().ok()?;
    let exe_dir = exe_path.parent()?;

    if exe_dir.file_name().and_then(|n| n.to_str()) == Some("bin") {
        return exe_dir.parent().map(Path::to_path_buf);
    }

    Some(exe_dir.to_path_buf())
}

pub fn app_config_path() -> PathBuf {
    app_root_dir()
        .map(|root| root.join("config.yaml"))
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}

pub fn app_log_path() -> PathBuf {
    app_root_dir()
        .map(|root| root.join("monitor-sentinel.log"))
        .unwrap_or_else(|| PathBuf::from("monitor-sentinel.log"))
}

/// Last path component, used for short status text ("Game.exe").
pub fn exe_file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_buffer_stops_at_first_nul() {
        let mut buf = [0u16; 16];
        for (slot, c) in buf.iter_mut().zip(r"\\.\DISPLAY2".encode_utf16()) {
            *slot = c;
        }
        assert_eq!(from_wide_buf(&buf), r"\\.\DISPLAY2");
    }

    #[test]
    fn wide_buffer_without_terminator_uses_whole_slice() {
        let buf: Vec<u16> = "ABC".encode_utf16().collect();
        assert_eq!(from_wide_buf(&buf), "ABC");
    }

    #[test]
    fn exe_file_name_handles_both_separators() {
        assert_eq!(exe_file_name(r"C:\Games\Game.exe"), "Game.exe");
        assert_eq!(exe_file_name("/opt/game/run"), "run");
        assert_eq!(exe_file_name("plain.exe"), "plain.exe");
    }
}
