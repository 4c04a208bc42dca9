//! Desktop notifications

use crate::settings::{Settings, FRONTEND, NOTIFY_ON_COMMAND};

const APP_NAME: &str = "Xware Desktop";

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(settings: &Settings) -> Self {
        let mut notifier = Self { enabled: true };
        notifier.reload(settings);
        notifier
    }

    pub fn reload(&mut self, settings: &Settings) {
        self.enabled = settings.get_bool(FRONTEND, NOTIFY_ON_COMMAND);
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Text shown when a second launch hands over its arguments
    pub fn commands_message(count: usize) -> String {
        match count {
            1 => "Received 1 task from the command line".to_string(),
            n => format!("Received {} tasks from the command line", n),
        }
    }

    pub fn commands_received(&self, count: usize) {
        if self.enabled {
            self.show(&Self::commands_message(count));
        }
    }

    pub fn show(&self, body: &str) {
        if let Err(e) = notify_rust::Notification::new()
            .appname(APP_NAME)
            .summary(APP_NAME)
            .body(body)
            .show()
        {
            tracing::warn!("Failed to show notification: {}", e);
        }
    }
}
