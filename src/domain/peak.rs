use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PeakPhase {
    Peak,
    OffPeak,
}

/// Persisted window state, stored as `Peak-YYYY-MM-DD` or `OffPeak-YYYY-MM-DD`.
///
/// The date lets a midnight rollover while off-peak refresh the record without
/// masking the next day's window entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeakWindowState {
    pub phase: PeakPhase,
    pub date: NaiveDate,
}

impl PeakWindowState {
    pub fn peak(date: NaiveDate) -> Self {
        Self {
            phase: PeakPhase::Peak,
            date,
        }
    }

    pub fn off_peak(date: NaiveDate) -> Self {
        Self {
            phase: PeakPhase::OffPeak,
            date,
        }
    }

    pub fn is_peak(&self) -> bool {
        self.phase == PeakPhase::Peak
    }
}

impl fmt::Display for PeakWindowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            PeakPhase::Peak => "Peak",
            PeakPhase::OffPeak => "OffPeak",
        };
        write!(f, "{}-{}", phase, self.date.format("%Y-%m-%d"))
    }
}

impl FromStr for PeakWindowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (phase, date) = if let Some(rest) = s.strip_prefix("OffPeak-") {
            (PeakPhase::OffPeak, rest)
        } else if let Some(rest) = s.strip_prefix("Peak-") {
            (PeakPhase::Peak, rest)
        } else {
            return Err(format!("Unknown peak state: {}", s));
        };
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| format!("Invalid peak state date '{}': {}", date, e))?;
        Ok(Self { phase, date })
    }
}

/// Edge emitted when the tracker crosses a window boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WindowEvent {
    Entered,
    Exited,
}
