//! Terminal toasts

use console::style;
use shared::{Notification, NotificationVariant, Notifier};

/// Prints notifications to stderr, styled by variant
#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn render(notification: &Notification) -> String {
        match notification.variant {
            NotificationVariant::Default => format!(
                "{} {}: {}",
                style("✓").green(),
                style(&notification.title).bold(),
                notification.description
            ),
            NotificationVariant::Destructive => format!(
                "{} {}: {}",
                style("✗").red(),
                style(&notification.title).red().bold(),
                notification.description
            ),
        }
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        eprintln!("{}", Self::render(&notification));
    }
}
