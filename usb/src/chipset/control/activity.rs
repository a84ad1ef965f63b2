use std::time::{Duration, Instant};

/// Tracks target keyboard / mouse activity from the CTS line. The CH9329 toggles CTS when the
/// target host talks to it, so any edge means the target is alive.
#[derive(Debug, Default, Clone)]
pub struct HidActivity {
    last_cts: Option<bool>,
    last_activity: Option<Instant>,
    keyboard_connected: bool,
    mouse_connected: bool,
}

impl HidActivity {
    /// Feeds a CTS sample, returns true when it was an edge.
    pub fn observe(&mut self, cts: bool, now: Instant) -> bool {
        let previous = self.last_cts.replace(cts);
        match previous {
            Some(previous) if previous != cts => {
                self.keyboard_connected = true;
                self.mouse_connected = true;
                self.last_activity = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn is_target_connected(&self, now: Instant, window: Duration) -> bool {
        self.last_activity
            .is_some_and(|last| now.saturating_duration_since(last) <= window)
    }

    pub fn keyboard_connected(&self) -> bool {
        self.keyboard_connected
    }

    pub fn mouse_connected(&self) -> bool {
        self.mouse_connected
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }
}
