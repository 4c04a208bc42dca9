/// System tray icon with context menu
///
/// Menu clicks are polled from the global tray-icon menu channel and turned
/// into [`TrayCommand`]s for the event loop. On Linux the icon lives in GTK,
/// so [`Systray::pump`] must be called regularly from the loop thread.
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tray_icon::menu::{CheckMenuItem, Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

const ICON_FILE: &str = "xware-desktop.png";
const ICON_SIZE: u32 = 32;

/// Actions requested from the tray menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayCommand {
    ShowMainWindow,
    SetMonitorWindow(bool),
    SetAutostart(bool),
    Quit,
}

/// Load the icon shipped next to the executable, falling back to a flat square
fn load_app_icon() -> Result<Icon> {
    let paths_to_try = [
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.join(ICON_FILE))),
        Some(PathBuf::from("/usr/share/pixmaps").join(ICON_FILE)),
    ];

    for path in paths_to_try.into_iter().flatten() {
        if !path.exists() {
            continue;
        }
        match image::open(&path) {
            Ok(img) => {
                let img = img.resize_exact(ICON_SIZE, ICON_SIZE, image::imageops::FilterType::Lanczos3);
                return Icon::from_rgba(img.to_rgba8().into_raw(), ICON_SIZE, ICON_SIZE)
                    .map_err(|e| anyhow!("Failed to create icon from image: {:?}", e));
            }
            Err(e) => tracing::warn!("Failed to decode {}: {}", path.display(), e),
        }
    }

    let icon_rgba: Vec<u8> = (0..ICON_SIZE * ICON_SIZE)
        .flat_map(|_| [0x1E, 0x88, 0xE5, 0xFF])
        .collect();
    Icon::from_rgba(icon_rgba, ICON_SIZE, ICON_SIZE)
        .map_err(|e| anyhow!("Failed to create fallback icon: {:?}", e))
}

/// Initialize the platform toolkit the tray depends on
pub fn init_toolkit() -> Result<()> {
    #[cfg(target_os = "linux")]
    gtk::init().map_err(|e| anyhow!("Failed to initialize GTK: {}", e))?;
    Ok(())
}

pub struct Systray {
    tray_icon: TrayIcon,
    show_item: MenuId,
    monitor_item: CheckMenuItem,
    autostart_item: CheckMenuItem,
    quit_item: MenuId,
}

impl Systray {
    pub fn new(monitor_visible: bool, autostart: bool) -> Result<Self> {
        tracing::info!("Creating tray icon");
        let icon = load_app_icon()?;

        let menu = Menu::new();
        let show_item = MenuItem::new("Show Xware Desktop", true, None);
        let monitor_item = CheckMenuItem::new("Monitor window", true, monitor_visible, None);
        let autostart_item = CheckMenuItem::new("Start on login", true, autostart, None);
        let separator = PredefinedMenuItem::separator();
        let quit_item = MenuItem::new("Quit", true, None);

        menu.append(&show_item)
            .map_err(|e| anyhow!("Failed to add show item: {}", e))?;
        menu.append(&monitor_item)
            .map_err(|e| anyhow!("Failed to add monitor item: {}", e))?;
        menu.append(&autostart_item)
            .map_err(|e| anyhow!("Failed to add autostart item: {}", e))?;
        menu.append(&separator)
            .map_err(|e| anyhow!("Failed to add separator: {}", e))?;
        menu.append(&quit_item)
            .map_err(|e| anyhow!("Failed to add quit item: {}", e))?;

        let tray_icon = TrayIconBuilder::new()
            .with_tooltip("Xware Desktop")
            .with_icon(icon)
            .with_menu(Box::new(menu))
            .build()
            .map_err(|e| anyhow!("Failed to create tray icon: {}", e))?;

        tracing::info!("Tray icon created");

        Ok(Self {
            tray_icon,
            show_item: show_item.id().clone(),
            monitor_item,
            autostart_item,
            quit_item: quit_item.id().clone(),
        })
    }

    /// Run pending toolkit events without blocking
    pub fn pump(&self) {
        #[cfg(target_os = "linux")]
        while gtk::events_pending() {
            gtk::main_iteration_do(false);
        }
    }

    /// Next menu action, if any
    pub fn poll(&self) -> Option<TrayCommand> {
        let event = MenuEvent::receiver().try_recv().ok()?;
        tracing::debug!("Menu event: {:?}", event.id);

        if event.id == self.show_item {
            Some(TrayCommand::ShowMainWindow)
        } else if event.id == *self.monitor_item.id() {
            Some(TrayCommand::SetMonitorWindow(self.monitor_item.is_checked()))
        } else if event.id == *self.autostart_item.id() {
            Some(TrayCommand::SetAutostart(self.autostart_item.is_checked()))
        } else if event.id == self.quit_item {
            Some(TrayCommand::Quit)
        } else {
            None
        }
    }

    /// Keep the check mark in line with the settings flag
    pub fn set_monitor_checked(&self, checked: bool) {
        self.monitor_item.set_checked(checked);
    }

    pub fn set_autostart_checked(&self, checked: bool) {
        self.autostart_item.set_checked(checked);
    }

    pub fn set_daemon_online(&self, online: bool) {
        let tooltip = if online {
            "Xware Desktop - daemon running"
        } else {
            "Xware Desktop - daemon not running"
        };
        let _ = self.tray_icon.set_tooltip(Some(tooltip));
    }
}
