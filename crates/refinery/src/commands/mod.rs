//! Command implementations. Each module takes parsed options, talks to the
//! core, and prints; rendering is kept in pure functions.

pub mod list;
pub mod reject;
pub mod retry;
pub mod run;
pub mod show;
pub mod submit;

use chrono::{DateTime, Utc};

/// Age as `Ns`, `Nm`, `Nh` or `Nd`.
pub fn format_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - created_at).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// At most `max` characters, ending in `...` when shortened.
pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let kept: String = value.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
