// Only the Windows host wires the session to real displays.
#![cfg_attr(not(windows), allow(dead_code))]

mod data_loaders;
mod display;
mod logging;
mod process;
mod session;
mod snapshot;
mod status;
mod utility;
mod worker;

use std::{
    fs,
    path::Path,
    sync::mpsc::Receiver,
    thread,
    time::{Duration, Instant, SystemTime},
};

use crate::{
    data_loaders::config::AppConfig,
    display::DisplayDevice,
    process::TargetHandle,
    status::StatusEvent,
    utility::app_config_path,
    worker::CancelToken,
};

pub const DEBUG_NAME: &str = "SENTINEL";

const HOST_TICK: Duration = Duration::from_millis(100);

fn main() {
    logging::init(true, "info");

    let config_path = app_config_path();
    let config = AppConfig::load(&config_path).unwrap_or_else(|| {
        warn!(
            "[{}] No usable config at {}; running with defaults",
            DEBUG_NAME,
            config_path.display()
        );
        AppConfig::default()
    });

    logging::set_debug(config.debug);
    logging::set_level(&config.log_level);
    std::panic::set_hook(Box::new(|panic_info| {
        error!("[{}] Panic: {}", DEBUG_NAME, panic_info);
    }));

    info!("!---------- [{}] Starting Monitor Sentinel ----------!", DEBUG_NAME);
    info!("[{}] Config loaded from {}", DEBUG_NAME, config_path.display());

    if let Err(e) = platform::run(config, &config_path) {
        error!("[{}] {}", DEBUG_NAME, e);
        eprintln!("monitor-sentinel: {e}");
        std::process::exit(1);
    }
}

/// Logs the displays found at startup, flagging setups with nothing to turn off.
fn report_inventory<M: display::DisplayMode>(displays: &[DisplayDevice<M>]) {
    println!("Found {} display(s):", displays.len());
    for (i, device) in displays.iter().enumerate() {
        let role = if device.is_primary { "PRIMARY" } else { "secondary" };
        println!("  {}: {} [{}] {}", i + 1, device.label(), role, device.mode.describe());
        info!(
            "[{}] Display {}: {} [{}] {}",
            DEBUG_NAME,
            i + 1,
            device.label(),
            role,
            device.mode.describe()
        );
    }

    if display::secondaries(displays).next().is_none() {
        warn!("[{}] No secondary displays detected; nothing will be turned off", DEBUG_NAME);
        println!("No secondary displays detected; nothing will be turned off.");
    }
}

fn describe_target(target: &TargetHandle) -> String {
    target
        .current()
        .map(|t| t.path().to_string())
        .unwrap_or_else(|| "<not set>".to_string())
}

/// Watches `config.yaml` and pushes a changed target into the running session.
struct ConfigWatcher<'a> {
    path: &'a Path,
    enabled: bool,
    interval: Duration,
    last_tick: Instant,
    last_modified: Option<SystemTime>,
}

impl<'a> ConfigWatcher<'a> {
    fn new(path: &'a Path, config: &AppConfig) -> Self {
        Self {
            path,
            enabled: config.settings.watcher.enabled,
            interval: Duration::from_millis(config.settings.watcher.interval_ms),
            last_tick: Instant::now(),
            last_modified: modified_time(path),
        }
    }

    fn tick(&mut self, target: &TargetHandle) {
        if !self.enabled || self.last_tick.elapsed() < self.interval {
            return;
        }
        self.last_tick = Instant::now();

        let current_modified = modified_time(self.path);
        let changed = match (self.last_modified, current_modified) {
            (Some(prev), Some(curr)) => curr > prev,
            (None, Some(_)) => true,
            _ => false,
        };
        if !changed {
            return;
        }
        self.last_modified = current_modified;

        let Some(config) = AppConfig::load(self.path) else {
            warn!(
                "[{}][WATCHER] Detected config change but failed to parse {}; keeping previous config",
                DEBUG_NAME,
                self.path.display()
            );
            return;
        };

        logging::set_debug(config.debug);
        logging::set_level(&config.log_level);
        self.interval = Duration::from_millis(config.settings.watcher.interval_ms);
        if target.set(config.target_exe.as_deref()) {
            warn!(
                "[{}][WATCHER] Target changed to {}",
                DEBUG_NAME,
                describe_target(target)
            );
            println!("Now watching: {}", describe_target(target));
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn echo_status(events: &Receiver<StatusEvent>) {
    for event in events.try_iter() {
        let now = chrono::Local::now().format("%H:%M:%S");
        println!("[{now}] {event}");
    }
}

/// Runs the host loop until `cancel` fires: status echo and config reloads.
fn host_loop(
    cancel: &CancelToken,
    target: &TargetHandle,
    watcher: &mut ConfigWatcher<'_>,
    events: &Receiver<StatusEvent>,
    mut pump: impl FnMut() -> bool,
) {
    loop {
        if !pump() {
            cancel.cancel();
        }
        echo_status(events);
        if cancel.is_cancelled() {
            break;
        }
        watcher.tick(target);
        thread::sleep(HOST_TICK);
    }
}

#[cfg(windows)]
mod platform {
    use std::{path::Path, sync::OnceLock};

    use windows::{
        core::BOOL,
        Win32::{
            System::Console::SetConsoleCtrlHandler,
            UI::WindowsAndMessaging::{
                DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE, WM_QUIT,
            },
        },
    };

    use super::*;
    use crate::{
        display::win32::Win32Displays,
        info,
        process::SysinfoPresence,
        session::{SessionController, SessionSettings},
        status::StatusBus,
        warn,
        worker::SessionWorker,
    };

    static CTRL_CANCEL: OnceLock<CancelToken> = OnceLock::new();

    unsafe extern "system" fn console_ctrl_handler(ctrl_type: u32) -> BOOL {
        if let Some(cancel) = CTRL_CANCEL.get() {
            warn!("[{}] Console control event {}; stopping", DEBUG_NAME, ctrl_type);
            cancel.cancel();
            // Give the worker its chance to restore before Windows tears us down.
            thread::sleep(Duration::from_secs(5));
        }
        BOOL(1)
    }

    /// Drains the thread message queue; false once WM_QUIT arrives.
    fn pump_messages() -> bool {
        unsafe {
            let mut msg = MSG::default();
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    warn!("[{}] WM_QUIT received; stopping", DEBUG_NAME);
                    return false;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        true
    }

    pub fn run(config: AppConfig, config_path: &Path) -> Result<(), String> {
        let target = TargetHandle::new(config.target_exe.as_deref());
        let status = StatusBus::new();
        let events = status.subscribe();

        let displays = Win32Displays::new();
        let mut controller = SessionController::new(
            displays,
            displays,
            SysinfoPresence::new(),
            target.clone(),
            SessionSettings::from(&config.settings.session),
            status,
        );

        match controller.capture_baseline() {
            Ok(inventory) => report_inventory(&inventory),
            Err(e) => warn!(
                "[{}] Baseline capture failed ({}); displays will be captured before first use",
                DEBUG_NAME, e
            ),
        }

        println!("Watching: {}", describe_target(&target));
        println!("Press Ctrl+C to exit; displays are restored before the process ends.");

        let worker = SessionWorker::spawn(controller, config.settings.session.poll_interval())
            .map_err(|e| format!("Failed to start session worker: {e}"))?;
        let cancel = worker.cancel_token().clone();
        let _ = CTRL_CANCEL.set(cancel.clone());

        unsafe {
            if SetConsoleCtrlHandler(Some(console_ctrl_handler), true).is_err() {
                warn!("[{}] Could not install console control handler", DEBUG_NAME);
            }
        }

        let mut watcher = ConfigWatcher::new(config_path, &config);
        host_loop(&cancel, &target, &mut watcher, &events, pump_messages);

        worker.stop();
        echo_status(&events);
        info!("[{}] Stopped", DEBUG_NAME);
        Ok(())
    }
}

#[cfg(not(windows))]
mod platform {
    use std::path::Path;

    use super::*;

    pub fn run(_config: AppConfig, _config_path: &Path) -> Result<(), String> {
        Err("display control needs the Windows display configuration API".to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::status::StatusCategory;

    #[test]
    fn watcher_pushes_new_target_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "target_exe: a.exe\nsettings:\n  watcher:\n    interval_ms: 100\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        let target = TargetHandle::new(config.target_exe.as_deref());

        let mut watcher = ConfigWatcher::new(&path, &config);
        watcher.last_modified = Some(SystemTime::UNIX_EPOCH);
        watcher.last_tick = Instant::now() - Duration::from_secs(1);
        data_loaders::config::save_target_exe(&path, Some("b.exe")).unwrap();

        watcher.tick(&target);
        assert_eq!(describe_target(&target), "b.exe");
    }

    #[test]
    fn watcher_keeps_target_when_file_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "target_exe: a.exe\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        let target = TargetHandle::new(config.target_exe.as_deref());

        let mut watcher = ConfigWatcher::new(&path, &config);
        watcher.last_modified = Some(SystemTime::UNIX_EPOCH);
        watcher.last_tick = Instant::now() - Duration::from_secs(5);
        fs::write(&path, "target_exe: [broken").unwrap();

        watcher.tick(&target);
        assert_eq!(describe_target(&target), "a.exe");
    }

    #[test]
    fn host_loop_stops_when_pump_reports_quit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = AppConfig::default();
        let target = TargetHandle::new(None);
        let mut watcher = ConfigWatcher::new(&path, &config);
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        tx.send(StatusEvent::transition(StatusCategory::Idle, "waiting")).unwrap();

        let mut ticks = 0;
        host_loop(&cancel, &target, &mut watcher, &rx, || {
            ticks += 1;
            ticks < 3
        });

        assert!(cancel.is_cancelled());
        assert_eq!(ticks, 3);
        assert!(rx.try_recv().is_err());
        assert_eq!(describe_target(&target), "<not set>");
    }
}
