/// Top-level windows of the frontend
///
/// The main window is created once at startup and hidden to the tray when
/// closed. The monitor window is a small always-on-top status strip whose
/// lifetime belongs to [`crate::monitor::MonitorController`]; dropping it
/// closes it.
use anyhow::{anyhow, Result};
use std::num::NonZeroU32;
use std::rc::Rc;
use winit::dpi::LogicalSize;
use winit::event_loop::EventLoopWindowTarget;
use winit::window::{Window, WindowBuilder, WindowId, WindowLevel};

const MAIN_TITLE: &str = "Xware Desktop";
const MONITOR_TITLE: &str = "Xware Desktop - Monitor";

const COLOR_BACKGROUND: u32 = 0x0020_2428;
const COLOR_ONLINE: u32 = 0x0033_AA55;
const COLOR_OFFLINE: u32 = 0x0088_3333;

pub struct MainWindow {
    window: Window,
}

impl MainWindow {
    pub fn new<T>(target: &EventLoopWindowTarget<T>) -> Result<Self> {
        let window = WindowBuilder::new()
            .with_title(MAIN_TITLE)
            .with_inner_size(LogicalSize::new(800.0, 540.0))
            .with_visible(false)
            .build(target)
            .map_err(|e| anyhow!("Failed to create main window: {}", e))?;

        Ok(Self { window })
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    pub fn show(&self) {
        self.window.set_visible(true);
        self.window.focus_window();
    }

    pub fn hide(&self) {
        self.window.set_visible(false);
    }
}

/// Status strip showing whether the daemon answers
pub struct MonitorWindow {
    window: Rc<Window>,
    surface: softbuffer::Surface<Rc<Window>, Rc<Window>>,
    _context: softbuffer::Context<Rc<Window>>,
}

impl MonitorWindow {
    pub fn open<T>(target: &EventLoopWindowTarget<T>) -> Result<Self> {
        let window = WindowBuilder::new()
            .with_title(MONITOR_TITLE)
            .with_inner_size(LogicalSize::new(240.0, 48.0))
            .with_resizable(false)
            .with_window_level(WindowLevel::AlwaysOnTop)
            .build(target)
            .map_err(|e| anyhow!("Failed to create monitor window: {}", e))?;
        let window = Rc::new(window);

        let context = softbuffer::Context::new(Rc::clone(&window))
            .map_err(|e| anyhow!("Failed to create drawing context: {}", e))?;
        let surface = softbuffer::Surface::new(&context, Rc::clone(&window))
            .map_err(|e| anyhow!("Failed to create drawing surface: {}", e))?;

        Ok(Self {
            window,
            surface,
            _context: context,
        })
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Paint the background with a status bar along the bottom edge
    pub fn redraw(&mut self, daemon_online: bool) -> Result<()> {
        let size = self.window.inner_size();
        let (Some(width), Some(height)) = (NonZeroU32::new(size.width), NonZeroU32::new(size.height)) else {
            return Ok(());
        };

        self.surface
            .resize(width, height)
            .map_err(|e| anyhow!("Failed to resize monitor surface: {}", e))?;

        let mut buffer = self
            .surface
            .buffer_mut()
            .map_err(|e| anyhow!("Failed to map monitor surface: {}", e))?;

        let status = if daemon_online { COLOR_ONLINE } else { COLOR_OFFLINE };
        let (width, height) = (width.get() as usize, height.get() as usize);
        let bar_top = height.saturating_sub(height / 4);
        for (index, pixel) in buffer.iter_mut().enumerate() {
            *pixel = if index / width >= bar_top { status } else { COLOR_BACKGROUND };
        }

        buffer
            .present()
            .map_err(|e| anyhow!("Failed to present monitor surface: {}", e))
    }
}
