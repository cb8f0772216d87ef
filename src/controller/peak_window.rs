use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

use crate::config::WindowConfig;
use crate::domain::{PeakWindowState, WindowEvent};

/// Result of feeding one wall-clock reading to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    pub state: PeakWindowState,
    pub in_peak: bool,
    /// Set only on the invocation that crosses a window boundary
    pub event: Option<WindowEvent>,
    /// Whether `state` differs from the persisted record
    pub changed: bool,
}

/// Tracks the daily `[start, end)` peak window by local hour.
///
/// Pure: the caller persists `WindowUpdate::state` when `changed` is set.
#[derive(Debug, Clone, Copy)]
pub struct PeakWindowTracker {
    start_hour: u32,
    end_hour: u32,
}

impl PeakWindowTracker {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn from_config(cfg: &WindowConfig) -> Self {
        Self::new(cfg.peak_start_hour, cfg.peak_end_hour)
    }

    pub fn in_window(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }

    pub fn update(&self, prior: Option<&PeakWindowState>, now: NaiveDateTime) -> WindowUpdate {
        let today = now.date();

        if self.in_window(now.hour()) {
            let state = PeakWindowState::peak(today);
            let changed = prior != Some(&state);
            return WindowUpdate {
                state,
                in_peak: true,
                event: changed.then_some(WindowEvent::Entered),
                changed,
            };
        }

        let state = PeakWindowState::off_peak(today);
        match prior {
            Some(p) if p.is_peak() => WindowUpdate {
                state,
                in_peak: false,
                event: Some(WindowEvent::Exited),
                changed: true,
            },
            // Midnight rollover or first run: refresh the date without an event
            _ => WindowUpdate {
                state,
                in_peak: false,
                event: None,
                changed: prior != Some(&state),
            },
        }
    }

    /// Start of the window on the given reading's calendar day
    pub fn window_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        now.date().and_time(NaiveTime::MIN) + Duration::hours(self.start_hour as i64)
    }

    fn window_end(&self, now: NaiveDateTime) -> NaiveDateTime {
        now.date().and_time(NaiveTime::MIN) + Duration::hours(self.end_hour as i64)
    }

    /// Hours until the next window start; 0 while inside the window
    pub fn hours_to_peak(&self, now: NaiveDateTime) -> f64 {
        let start = self.window_start(now);
        let remaining = if now >= self.window_end(now) {
            start + Duration::days(1) - now
        } else if now < start {
            start - now
        } else {
            return 0.0;
        };
        remaining.num_seconds() as f64 / 3600.0
    }
}
