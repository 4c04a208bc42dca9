//! Monitor window lifecycle
//!
//! Two-state machine (absent / present) driven only by the
//! `frontend.showmonitorwindow` flag, re-read on every settings-applied
//! event. Re-applying an unchanged flag is a no-op.

use crate::settings::{Settings, Subscription, FRONTEND, SHOW_MONITOR_WINDOW};
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Absent,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Closed,
    Unchanged,
}

/// Owns the optional monitor window handle `W`
pub struct MonitorController<W> {
    window: Option<W>,
    subscription: Subscription,
}

impl<W> MonitorController<W> {
    /// Subscribe to settings-applied events. Starts absent.
    ///
    /// Dropping the controller closes its receiver; the next
    /// `Settings::apply` forgets it.
    pub fn new(settings: &mut Settings) -> Self {
        Self {
            window: None,
            subscription: settings.subscribe(),
        }
    }

    pub fn presence(&self) -> Presence {
        if self.window.is_some() {
            Presence::Present
        } else {
            Presence::Absent
        }
    }

    pub fn window(&self) -> Option<&W> {
        self.window.as_ref()
    }

    pub fn window_mut(&mut self) -> Option<&mut W> {
        self.window.as_mut()
    }

    /// Drive one transition from the flag value `show`.
    ///
    /// `open` is only called when moving from absent to present. If it fails
    /// the machine stays absent.
    pub fn apply<F>(&mut self, show: bool, open: F) -> Result<Transition>
    where
        F: FnOnce() -> Result<W>,
    {
        match (show, self.window.is_some()) {
            (true, false) => {
                self.window = Some(open()?);
                tracing::debug!("Monitor window opened");
                Ok(Transition::Opened)
            }
            (false, true) => {
                tracing::debug!("Closing monitor window");
                self.window = None;
                Ok(Transition::Closed)
            }
            _ => Ok(Transition::Unchanged),
        }
    }

    /// Handle every pending settings-applied event
    pub fn sync<F>(&mut self, settings: &Settings, mut open: F) -> Result<Transition>
    where
        F: FnMut() -> Result<W>,
    {
        let mut last = Transition::Unchanged;
        while self.subscription.try_next().is_some() {
            let show = settings.get_bool(FRONTEND, SHOW_MONITOR_WINDOW);
            match self.apply(show, &mut open)? {
                Transition::Unchanged => {}
                t => last = t,
            }
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::default_settings;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts live instances so tests can see duplicate construction
    struct FakeWindow {
        live: Rc<Cell<usize>>,
    }

    impl FakeWindow {
        fn open(live: &Rc<Cell<usize>>, opened: &Rc<Cell<usize>>) -> Result<Self> {
            live.set(live.get() + 1);
            opened.set(opened.get() + 1);
            Ok(Self { live: Rc::clone(live) })
        }
    }

    impl Drop for FakeWindow {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        settings: Settings,
        controller: MonitorController<FakeWindow>,
        live: Rc<Cell<usize>>,
        opened: Rc<Cell<usize>>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut settings = Settings::load(&dir.path().join("frontend.json"), default_settings());
            let controller = MonitorController::new(&mut settings);
            Self {
                _dir: dir,
                settings,
                controller,
                live: Rc::new(Cell::new(0)),
                opened: Rc::new(Cell::new(0)),
            }
        }

        fn set_and_apply(&mut self, show: bool) -> Transition {
            self.settings.set_bool(FRONTEND, SHOW_MONITOR_WINDOW, show);
            self.settings.apply();
            let (live, opened) = (Rc::clone(&self.live), Rc::clone(&self.opened));
            self.controller
                .sync(&self.settings, || FakeWindow::open(&live, &opened))
                .unwrap()
        }
    }

    #[test]
    fn test_starts_absent() {
        let h = Harness::new();
        assert_eq!(h.controller.presence(), Presence::Absent);
    }

    #[test]
    fn test_toggle_opens_and_closes() {
        let mut h = Harness::new();

        assert_eq!(h.set_and_apply(true), Transition::Opened);
        assert_eq!(h.controller.presence(), Presence::Present);
        assert_eq!(h.live.get(), 1);

        assert_eq!(h.set_and_apply(false), Transition::Closed);
        assert_eq!(h.controller.presence(), Presence::Absent);
        assert_eq!(h.live.get(), 0);
    }

    #[test]
    fn test_reapplying_true_never_duplicates() {
        let mut h = Harness::new();
        h.set_and_apply(true);
        for _ in 0..5 {
            assert_eq!(h.set_and_apply(true), Transition::Unchanged);
        }
        assert_eq!(h.live.get(), 1);
        assert_eq!(h.opened.get(), 1);
    }

    #[test]
    fn test_reapplying_false_never_closes_absent_window() {
        let mut h = Harness::new();
        for _ in 0..3 {
            assert_eq!(h.set_and_apply(false), Transition::Unchanged);
        }
        assert_eq!(h.live.get(), 0);
        assert_eq!(h.opened.get(), 0);
    }

    #[test]
    fn test_burst_of_events_reads_current_flag() {
        let mut h = Harness::new();
        h.settings.set_bool(FRONTEND, SHOW_MONITOR_WINDOW, true);
        h.settings.apply();
        h.settings.apply();
        h.settings.apply();

        let (live, opened) = (Rc::clone(&h.live), Rc::clone(&h.opened));
        let t = h
            .controller
            .sync(&h.settings, || FakeWindow::open(&live, &opened))
            .unwrap();

        assert_eq!(t, Transition::Opened);
        assert_eq!(h.opened.get(), 1);
    }

    #[test]
    fn test_failed_open_stays_absent() {
        let mut h = Harness::new();
        let result = h.controller.apply(true, || Err(anyhow::anyhow!("no display")));

        assert!(result.is_err());
        assert_eq!(h.controller.presence(), Presence::Absent);
    }

    #[test]
    fn test_dropped_controller_is_pruned() {
        let mut h = Harness::new();
        let extra: MonitorController<FakeWindow> = MonitorController::new(&mut h.settings);
        assert_eq!(h.settings.apply(), 2);

        drop(extra);
        assert_eq!(h.settings.apply(), 1);
        assert_eq!(h.settings.apply(), 1);
    }
}
