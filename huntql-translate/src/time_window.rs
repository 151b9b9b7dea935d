use std::{fmt, ops::Range};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static RELATIVE_WINDOW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:last|past)\s+(?:(\d+)\s+)?(minute|hour|day|week|month)s?\b")
        .expect("relative window regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeUnit {
    fn parse(unit: &str) -> Option<Self> {
        Some(match unit.to_ascii_lowercase().as_str() {
            "minute" => Self::Minute,
            "hour" => Self::Hour,
            "day" => Self::Day,
            "week" => Self::Week,
            "month" => Self::Month,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// A relative window such as "last 24 hours", anchored at now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub quantity: u32,
    pub unit: TimeUnit,
}

impl TimeWindow {
    /// Every relative window mentioned in `text`, with the span it covers.
    pub fn find_all(text: &str) -> Vec<(TimeWindow, Range<usize>)> {
        RELATIVE_WINDOW
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let quantity = match caps.get(1) {
                    Some(n) => n.as_str().parse().ok()?,
                    None => 1,
                };
                let unit = TimeUnit::parse(caps.get(2)?.as_str())?;
                Some((TimeWindow { quantity, unit }, whole.range()))
            })
            .collect()
    }

    pub fn find(text: &str) -> Option<TimeWindow> {
        Self::find_all(text).into_iter().next().map(|(w, _)| w)
    }

    /// Renders as a KQL timespan literal. Weeks and months become days.
    pub fn to_timespan(&self) -> String {
        match self.unit {
            TimeUnit::Minute => format!("{}m", self.quantity),
            TimeUnit::Hour => format!("{}h", self.quantity),
            TimeUnit::Day => format!("{}d", self.quantity),
            TimeUnit::Week => format!("{}d", self.quantity.saturating_mul(7)),
            TimeUnit::Month => format!("{}d", self.quantity.saturating_mul(30)),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "last {} {}", self.quantity, self.unit.as_str())
    }
}
