//! Application bootstrap and event loop
//!
//! Startup order:
//! 1. data directories, 2. log/fault sinks, 3. single-instance check
//! (a contended launch relays its arguments and exits here), 4. settings,
//! 5. daemon proxy, mount faker, notifier, main window, 6. main window shown
//! and the ready signal fired, then the tray, 7. initial settings apply,
//! 8. one-time usage guide after upgrading from 0.8, 9. the winit loop.

use crate::autostart::Autostart;
use crate::config::AppPaths;
use crate::daemon::{DaemonProxy, Delivery};
use crate::instance::{self, Acquisition, InstanceLock, LockError};
use crate::ipc::{CommandBatch, CommandServer};
use crate::logging;
use crate::monitor::{MonitorController, Transition};
use crate::mounts::MountsFaker;
use crate::notify::Notifier;
use crate::relay::{RelayClient, RelayOutcome, UnreachableReason};
use crate::settings::{
    default_settings, Settings, Subscription, FRONTEND, INTERNAL, PREVIOUS_VERSION,
    SHOW_MONITOR_WINDOW,
};
use crate::tray::{self, Systray, TrayCommand};
use crate::windows::{MainWindow, MonitorWindow};
use anyhow::{anyhow, Result};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder, EventLoopWindowTarget};
use winit::window::WindowId;

pub const USAGE_GUIDE_URL: &str = "https://github.com/Xinkai/XwareDesktop/wiki/使用说明";

/// Marker value that triggers the usage guide once
pub const UPGRADE_FROM_VERSION: &str = "0.8";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DAEMON_PROBE_INTERVAL: Duration = Duration::from_secs(5);

const START_ERROR_TITLE: &str = "Xware Desktop failed to start";
const START_ERROR_TEXT: &str = concat!(
    "Xware Desktop is already running, or did not exit cleanly.\n",
    "Please check that:\n",
    "    1. no other Xware Desktop is running\n",
    "    2. nothing is left over from the previous run ",
    "(look for processes named xware-desktop in your process manager)\n",
);

/// Events injected into the winit loop from other threads
#[derive(Debug)]
pub enum AppEvent {
    Commands(CommandBatch),
}

/// Result of the single-instance check
#[derive(Debug)]
pub enum Startup {
    /// Continue starting up; hold the lock until exit
    Primary(InstanceLock),
    /// Not the primary; exit with this status without touching the GUI
    Exit(i32),
}

/// Become primary, or hand `commands` to the running primary.
///
/// `show_error` is called once when a contended launch cannot deliver.
pub fn check_one_instance<D>(
    lock_path: &Path,
    relay: &RelayClient,
    commands: &CommandBatch,
    show_error: D,
) -> Result<Startup, LockError>
where
    D: FnOnce(&UnreachableReason),
{
    match instance::acquire(lock_path)? {
        Acquisition::Primary(lock) => Ok(Startup::Primary(lock)),
        Acquisition::Contended => {
            let outcome = relay.relay(commands);
            if let RelayOutcome::Unreachable(reason) = &outcome {
                show_error(reason);
            }
            Ok(Startup::Exit(outcome.exit_code()))
        }
    }
}

/// Blocking warning shown when a second launch cannot reach the first
pub fn show_start_error(reason: &UnreachableReason) {
    tracing::error!("Start aborted, another instance holds the lock: {}", reason);
    let _ = rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Warning)
        .set_title(START_ERROR_TITLE)
        .set_description(START_ERROR_TEXT)
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}

pub fn show_fatal_error(error: &anyhow::Error) {
    let _ = rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title(START_ERROR_TITLE)
        .set_description(format!("{:#}", error))
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}

/// Fires its listeners exactly once, after the main window exists.
/// Listeners added later run immediately.
#[derive(Default)]
pub struct ReadySignal {
    fired: bool,
    listeners: Vec<Box<dyn FnOnce()>>,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fired(&self) -> bool {
        self.fired
    }

    pub fn subscribe(&mut self, listener: impl FnOnce() + 'static) {
        if self.is_fired() {
            listener();
        } else {
            self.listeners.push(Box::new(listener));
        }
    }

    /// Returns false if the signal had already fired
    pub fn fire(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        for listener in self.listeners.drain(..) {
            listener();
        }
        true
    }
}

/// Open the usage guide when the marker says we came from 0.8, then move
/// the marker to this version. Never fails startup.
pub fn run_upgrade_hook<F>(settings: &mut Settings, open_url: F) -> bool
where
    F: FnOnce(&str) -> std::io::Result<()>,
{
    if settings.get(INTERNAL, PREVIOUS_VERSION) != Some(UPGRADE_FROM_VERSION) {
        return false;
    }

    tracing::info!("Upgraded from {}, opening usage guide", UPGRADE_FROM_VERSION);
    if let Err(e) = open_url(USAGE_GUIDE_URL) {
        tracing::warn!("Failed to open usage guide: {}", e);
    }

    settings.set(INTERNAL, PREVIOUS_VERSION, env!("CARGO_PKG_VERSION"));
    if let Err(e) = settings.save() {
        tracing::warn!("Failed to record current version: {}", e);
    }
    true
}

/// Everything the primary instance owns, built once by [`run`]
pub struct AppContext {
    _lock: InstanceLock,
    settings: Settings,
    settings_events: Subscription,
    daemon: DaemonProxy,
    mounts: MountsFaker,
    notifier: Notifier,
    autostart: Autostart,
    main_window: MainWindow,
    monitor: MonitorController<MonitorWindow>,
    tray: Option<Systray>,
    server: Rc<RefCell<Option<CommandServer>>>,
    exit_code: Rc<Cell<i32>>,
    daemon_online: bool,
    last_probe: Option<Instant>,
}

impl AppContext {
    /// Re-read settings after one or more settings-applied events
    fn sync_settings(&mut self, target: &EventLoopWindowTarget<AppEvent>) {
        match self.monitor.sync(&self.settings, || MonitorWindow::open(target)) {
            Ok(Transition::Opened) => {
                if let Some(window) = self.monitor.window() {
                    window.request_redraw();
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Failed to open monitor window: {:#}", e);
                self.settings.set_bool(FRONTEND, SHOW_MONITOR_WINDOW, false);
            }
        }

        let mut changed = false;
        while self.settings_events.try_next().is_some() {
            changed = true;
        }
        if !changed {
            return;
        }

        self.notifier.reload(&self.settings);
        if let Err(e) = self.mounts.sync(&self.settings) {
            tracing::warn!("{:#}", e);
        }
        if let Some(tray) = &self.tray {
            tray.set_monitor_checked(self.settings.get_bool(FRONTEND, SHOW_MONITOR_WINDOW));
        }
    }

    fn set_monitor_flag(&mut self, show: bool, target: &EventLoopWindowTarget<AppEvent>) {
        self.settings.set_bool(FRONTEND, SHOW_MONITOR_WINDOW, show);
        if let Err(e) = self.settings.save() {
            tracing::warn!("Failed to save settings: {}", e);
        }
        self.settings.apply();
        self.sync_settings(target);
    }

    fn handle_commands(&mut self, batch: CommandBatch) {
        let count = batch.len();
        tracing::info!("Handling relayed commands: {:?}", batch.as_slice());

        match self.daemon.submit(batch) {
            Ok(Delivery::Sent) => {}
            Ok(Delivery::Queued) => {
                tracing::info!("Daemon offline, {} batches waiting", self.daemon.pending())
            }
            Err(e) => tracing::warn!("Failed to forward commands to daemon: {}", e),
        }
        self.notifier.commands_received(count);
    }

    fn handle_tray(&mut self, command: TrayCommand, target: &EventLoopWindowTarget<AppEvent>) {
        match command {
            TrayCommand::ShowMainWindow => self.main_window.show(),
            TrayCommand::SetMonitorWindow(show) => self.set_monitor_flag(show, target),
            TrayCommand::SetAutostart(on) => {
                if let Err(e) = self.autostart.set_enabled(on) {
                    tracing::warn!("{:#}", e);
                }
                if let Some(tray) = &self.tray {
                    tray.set_autostart_checked(self.autostart.is_enabled());
                }
            }
            TrayCommand::Quit => {
                tracing::info!("Quit requested from tray");
                self.exit_code.set(0);
                target.exit();
            }
        }
    }

    fn handle_window_event(
        &mut self,
        window_id: WindowId,
        event: WindowEvent,
        target: &EventLoopWindowTarget<AppEvent>,
    ) {
        if window_id == self.main_window.id() {
            if let WindowEvent::CloseRequested = event {
                // Keep running in the tray
                self.main_window.hide();
            }
            return;
        }

        let daemon_online = self.daemon_online;
        let Some(monitor) = self.monitor.window_mut() else {
            return;
        };
        if window_id != monitor.id() {
            return;
        }
        match event {
            WindowEvent::CloseRequested => self.set_monitor_flag(false, target),
            WindowEvent::RedrawRequested | WindowEvent::Resized(_) => {
                if let Err(e) = monitor.redraw(daemon_online) {
                    tracing::warn!("{:#}", e);
                }
            }
            _ => {}
        }
    }

    fn probe_daemon(&mut self) {
        if self
            .last_probe
            .is_some_and(|at| at.elapsed() < DAEMON_PROBE_INTERVAL)
        {
            return;
        }
        self.last_probe = Some(Instant::now());

        let online = self.daemon.is_online();
        if online {
            if let Err(e) = self.daemon.flush() {
                tracing::warn!("Failed to flush queued commands: {}", e);
            }
        }
        if online == self.daemon_online {
            return;
        }

        tracing::info!("Daemon is now {}", if online { "online" } else { "offline" });
        self.daemon_online = online;
        if let Some(tray) = &self.tray {
            tray.set_daemon_online(online);
        }
        if let Some(window) = self.monitor.window() {
            window.request_redraw();
        }
    }

    fn tick(&mut self, target: &EventLoopWindowTarget<AppEvent>) {
        let mut commands = Vec::new();
        if let Some(tray) = &self.tray {
            tray.pump();
            while let Some(command) = tray.poll() {
                commands.push(command);
            }
        }
        for command in commands {
            self.handle_tray(command, target);
        }

        self.sync_settings(target);
        self.probe_daemon();
    }

    fn shutdown(&mut self) {
        if let Some(mut server) = self.server.borrow_mut().take() {
            server.shutdown();
        }
        tracing::info!("Event loop exiting");
    }
}

/// Start the frontend. Returns the process exit code.
pub fn run(paths: AppPaths, commands: CommandBatch) -> Result<i32> {
    paths.ensure_dirs()?;
    logging::init(&paths);
    tracing::info!("XWARE DESKTOP STARTS, version {}", env!("CARGO_PKG_VERSION"));

    let relay = RelayClient::new(&paths.command_socket);
    let lock = match check_one_instance(&paths.lock_file, &relay, &commands, show_start_error)? {
        Startup::Primary(lock) => lock,
        Startup::Exit(code) => return Ok(code),
    };
    if !commands.is_empty() {
        tracing::info!("Ignoring {} arguments in the primary instance", commands.len());
    }

    let mut settings = Settings::load(&paths.config_file, default_settings());
    let settings_events = settings.subscribe();
    let monitor = MonitorController::new(&mut settings);

    let daemon = DaemonProxy::new(&paths, &settings);
    let mounts = MountsFaker::new(&paths.mounts_file);
    let notifier = Notifier::new(&settings);
    let autostart = Autostart::new(&paths);

    let event_loop = EventLoopBuilder::<AppEvent>::with_user_event()
        .build()
        .map_err(|e| anyhow!("Failed to create event loop: {}", e))?;
    let target: &EventLoopWindowTarget<AppEvent> = &event_loop;
    let main_window = MainWindow::new(target)?;

    let server = Rc::new(RefCell::new(None));
    let mut ready = ReadySignal::new();
    {
        let slot = Rc::clone(&server);
        let socket = paths.command_socket.clone();
        let proxy = event_loop.create_proxy();
        ready.subscribe(move || {
            let handler = move |batch| {
                proxy
                    .send_event(AppEvent::Commands(batch))
                    .map_err(|_| "event loop closed".to_string())
            };
            match CommandServer::bind(&socket, handler) {
                Ok(bound) => *slot.borrow_mut() = Some(bound),
                Err(e) => tracing::error!("Command channel unavailable: {}", e),
            }
        });
    }

    main_window.show();
    ready.fire();

    let tray = match tray::init_toolkit()
        .and_then(|_| Systray::new(settings.get_bool(FRONTEND, SHOW_MONITOR_WINDOW), autostart.is_enabled()))
    {
        Ok(tray) => Some(tray),
        Err(e) => {
            tracing::warn!("Running without tray icon: {:#}", e);
            None
        }
    };

    let exit_code = Rc::new(Cell::new(0));
    let mut ctx = AppContext {
        _lock: lock,
        settings,
        settings_events,
        daemon,
        mounts,
        notifier,
        autostart,
        main_window,
        monitor,
        tray,
        server,
        exit_code: Rc::clone(&exit_code),
        daemon_online: false,
        last_probe: None,
    };

    ctx.settings.apply();
    ctx.sync_settings(&event_loop);

    run_upgrade_hook(&mut ctx.settings, |url| open::that(url));

    event_loop
        .run(move |event, target| match event {
            Event::UserEvent(AppEvent::Commands(batch)) => ctx.handle_commands(batch),
            Event::WindowEvent { window_id, event } => {
                ctx.handle_window_event(window_id, event, target)
            }
            Event::AboutToWait => {
                ctx.tick(target);
                target.set_control_flow(ControlFlow::WaitUntil(Instant::now() + POLL_INTERVAL));
            }
            Event::LoopExiting => ctx.shutdown(),
            _ => {}
        })
        .map_err(|e| anyhow!("Event loop failed: {}", e))?;

    Ok(exit_code.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_fires_once() {
        let calls = Rc::new(Cell::new(0));
        let mut ready = ReadySignal::new();
        for _ in 0..2 {
            let calls = Rc::clone(&calls);
            ready.subscribe(move || calls.set(calls.get() + 1));
        }

        assert_eq!(calls.get(), 0);
        assert!(ready.fire());
        assert!(!ready.fire());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_late_listener_runs_immediately() {
        let called = Rc::new(Cell::new(false));
        let mut ready = ReadySignal::new();
        ready.fire();

        let flag = Rc::clone(&called);
        ready.subscribe(move || flag.set(true));
        assert!(called.get());
    }

    fn settings_in(dir: &tempfile::TempDir) -> Settings {
        Settings::load(&dir.path().join("frontend.json"), default_settings())
    }

    #[test]
    fn test_upgrade_hook_runs_once_from_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(&dir);
        let mut opened = Vec::new();

        assert!(run_upgrade_hook(&mut settings, |url| {
            opened.push(url.to_string());
            Ok(())
        }));
        assert_eq!(opened, vec![USAGE_GUIDE_URL.to_string()]);
        assert_eq!(settings.get(INTERNAL, PREVIOUS_VERSION), Some(env!("CARGO_PKG_VERSION")));

        let reloaded = settings_in(&dir);
        assert_eq!(reloaded.get(INTERNAL, PREVIOUS_VERSION), Some(env!("CARGO_PKG_VERSION")));

        assert!(!run_upgrade_hook(&mut settings, |_| panic!("opened twice")));
    }

    #[test]
    fn test_upgrade_hook_survives_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(&dir);

        let ran = run_upgrade_hook(&mut settings, |_| {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no browser"))
        });

        assert!(ran);
        assert_ne!(settings.get(INTERNAL, PREVIOUS_VERSION), Some(UPGRADE_FROM_VERSION));
    }

    #[test]
    fn test_other_versions_skip_upgrade_hook() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(&dir);
        settings.set(INTERNAL, PREVIOUS_VERSION, "0.9");

        assert!(!run_upgrade_hook(&mut settings, |_| panic!("should not open")));
        assert_eq!(settings.get(INTERNAL, PREVIOUS_VERSION), Some("0.9"));
    }
}
