use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the focus broadcast channel. Listeners only act on the latest
/// transition, so lagging behind is harmless.
const FOCUS_CHANNEL_CAPACITY: usize = 16;

/// Tracks whether the application is in the foreground.
///
/// Bindings configured with `refetch_on_window_focus` listen for the
/// `false -> true` transition and refresh stale data.
pub struct FocusManager {
    focused: AtomicBool,
    tx: broadcast::Sender<bool>,
}

impl FocusManager {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FOCUS_CHANNEL_CAPACITY);
        Self {
            focused: AtomicBool::new(true),
            tx,
        }
    }

    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    /// Record a focus change. Repeating the current state is a no-op.
    pub fn set_focused(&self, focused: bool) {
        if self.focused.swap(focused, Ordering::SeqCst) == focused {
            return;
        }
        debug!(focused, "Focus changed");
        // No listeners is fine
        let _ = self.tx.send(focused);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for FocusManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_transitions_are_broadcast() {
        let focus = FocusManager::new();
        let mut rx = focus.subscribe();

        focus.set_focused(true); // already focused
        focus.set_focused(false);
        focus.set_focused(false);
        focus.set_focused(true);

        assert!(!rx.recv().await.unwrap());
        assert!(rx.recv().await.unwrap());
        assert!(rx.try_recv().is_err());
        assert!(focus.is_focused());
    }
}
