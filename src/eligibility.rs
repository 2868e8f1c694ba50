use chrono::NaiveDate;
use serde::Serialize;

pub const REASON_FUTURE: &str = "future date";
pub const REASON_TODAY: &str = "today's attendance";
pub const REASON_BACKLOG_OPEN: &str = "backlog window open";
pub const REASON_WINDOW_CLOSED: &str = "window closed, backlog required";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatus {
    Open,
    Closed,
    Rejected,
}

impl WindowStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Rejected => "rejected",
        }
    }
}

/// Who a backlog window applies to: a class section's register, or a
/// teacher's own attendance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowScope {
    Class,
    Teacher,
}

impl WindowScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" => Some(Self::Class),
            "teacher" => Some(Self::Teacher),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacklogWindow {
    pub id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub status: WindowStatus,
}

impl BacklogWindow {
    /// Inclusive on both ends.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub allowed: bool,
    pub reason: String,
    pub is_past: bool,
    pub is_future: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
}

/// Windows passed in must already be filtered to the scope being checked.
pub fn check_eligibility(
    target: NaiveDate,
    today: NaiveDate,
    windows: &[BacklogWindow],
) -> Eligibility {
    if target > today {
        return Eligibility {
            allowed: false,
            reason: REASON_FUTURE.to_string(),
            is_past: false,
            is_future: true,
            window_id: None,
        };
    }
    if target == today {
        return Eligibility {
            allowed: true,
            reason: REASON_TODAY.to_string(),
            is_past: false,
            is_future: false,
            window_id: None,
        };
    }

    match open_window_for(target, windows) {
        Some(w) => Eligibility {
            allowed: true,
            reason: REASON_BACKLOG_OPEN.to_string(),
            is_past: true,
            is_future: false,
            window_id: Some(w.id.clone()),
        },
        None => Eligibility {
            allowed: false,
            reason: REASON_WINDOW_CLOSED.to_string(),
            is_past: true,
            is_future: false,
            window_id: None,
        },
    }
}

pub fn open_window_for(date: NaiveDate, windows: &[BacklogWindow]) -> Option<&BacklogWindow> {
    windows
        .iter()
        .find(|w| w.status == WindowStatus::Open && w.covers(date))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn window(id: &str, start: &str, end: &str, status: WindowStatus) -> BacklogWindow {
        BacklogWindow {
            id: id.to_string(),
            start: d(start),
            end: d(end),
            status,
        }
    }

    #[test]
    fn future_dates_are_never_allowed() {
        let windows = vec![window("w1", "2026-01-01", "2026-12-31", WindowStatus::Open)];
        let e = check_eligibility(d("2026-03-11"), d("2026-03-10"), &windows);
        assert!(!e.allowed);
        assert!(e.is_future);
        assert!(!e.is_past);
        assert_eq!(e.reason, REASON_FUTURE);
    }

    #[test]
    fn today_is_always_allowed() {
        let e = check_eligibility(d("2026-03-10"), d("2026-03-10"), &[]);
        assert!(e.allowed);
        assert_eq!(e.reason, REASON_TODAY);
        assert!(!e.is_past && !e.is_future);
    }

    #[test]
    fn past_date_requires_open_covering_window() {
        let today = d("2026-03-10");
        let e = check_eligibility(d("2026-03-05"), today, &[]);
        assert!(!e.allowed);
        assert!(e.is_past);
        assert_eq!(e.reason, REASON_WINDOW_CLOSED);

        let windows = vec![
            window("closed", "2026-03-01", "2026-03-09", WindowStatus::Closed),
            window("rejected", "2026-03-01", "2026-03-09", WindowStatus::Rejected),
        ];
        assert!(!check_eligibility(d("2026-03-05"), today, &windows).allowed);

        let windows = vec![window("open", "2026-03-03", "2026-03-05", WindowStatus::Open)];
        let e = check_eligibility(d("2026-03-05"), today, &windows);
        assert!(e.allowed);
        assert_eq!(e.window_id.as_deref(), Some("open"));
    }

    #[test]
    fn window_range_is_inclusive() {
        let w = window("w", "2026-03-03", "2026-03-05", WindowStatus::Open);
        assert!(w.covers(d("2026-03-03")));
        assert!(w.covers(d("2026-03-05")));
        assert!(!w.covers(d("2026-03-02")));
        assert!(!w.covers(d("2026-03-06")));
    }
}
