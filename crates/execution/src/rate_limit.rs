use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Venue request budget: at most `capacity` requests per `interval`.
/// `acquire` sleeps until the next window when the budget is spent, so a
/// burst of submissions never exceeds the venue's rate limit.
pub struct RequestBudget {
    capacity: u32,
    interval: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    window_start: Instant,
    used: u32,
}

impl RequestBudget {
    #[must_use]
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            interval,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Takes one request slot, waiting out the current window if the
    /// budget is exhausted.
    pub async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                if now.duration_since(state.window_start) >= self.interval {
                    state.window_start = now;
                    state.used = 0;
                }
                if state.used < self.capacity {
                    state.used += 1;
                    return;
                }
                state.window_start + self.interval
            };
            tokio::time::sleep_until(wait_until).await;
        }
    }
}
