use serde::{Deserialize, Serialize};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
};

/// Display status computed on every read. Only an explicit `paid` is ever
/// taken from storage; everything else is derived from the due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveStatus {
    Paid,
    Overdue,
    Pending,
}

impl EffectiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveStatus::Paid => "paid",
            EffectiveStatus::Overdue => "overdue",
            EffectiveStatus::Pending => "pending",
        }
    }
}

impl std::fmt::Display for EffectiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn derive_status(
    stored_status: Option<&str>,
    due_date: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> EffectiveStatus {
    if stored_status.is_some_and(is_paid) {
        return EffectiveStatus::Paid;
    }
    match due_date {
        Some(due) if now > due => EffectiveStatus::Overdue,
        _ => EffectiveStatus::Pending,
    }
}

/// Same as [`derive_status`] with the due date still in its stored text form.
/// A due date that cannot be parsed counts as absent.
pub fn derive_status_from_stored(
    stored_status: Option<&str>,
    due_date: Option<&str>,
    now: OffsetDateTime,
) -> EffectiveStatus {
    derive_status(stored_status, due_date.and_then(parse_timestamp), now)
}

pub fn is_paid(status: &str) -> bool {
    status.trim().eq_ignore_ascii_case("paid")
}

/// Parses an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_timestamp(input: &str) -> Option<OffsetDateTime> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(at) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(at);
    }
    Date::parse(s, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|d| d.midnight().assume_utc())
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use time::Duration;

    use super::*;

    #[test]
    fn due_exactly_now_is_pending() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        assert_eq!(derive_status(None, Some(now), now), EffectiveStatus::Pending);
    }

    #[test]
    fn due_one_second_ago_is_overdue() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        let due = now - Duration::seconds(1);
        assert_eq!(derive_status(None, Some(due), now), EffectiveStatus::Overdue);
    }

    #[test]
    fn paid_always_wins() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        let long_ago = datetime!(2001-01-01 0:00 UTC);
        assert_eq!(derive_status(Some("paid"), Some(long_ago), now), EffectiveStatus::Paid);
        assert_eq!(derive_status(Some(" PAID "), None, now), EffectiveStatus::Paid);
    }

    #[test]
    fn stale_stored_values_are_ignored() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        let future = now + Duration::days(3);
        let past = now - Duration::days(3);
        assert_eq!(derive_status(Some("overdue"), Some(future), now), EffectiveStatus::Pending);
        assert_eq!(derive_status(Some("pending"), Some(past), now), EffectiveStatus::Overdue);
    }

    #[test]
    fn no_due_date_is_pending() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        assert_eq!(derive_status(None, None, now), EffectiveStatus::Pending);
    }

    #[test]
    fn parses_dates_and_timestamps() {
        assert_eq!(
            parse_timestamp("2024-02-29"),
            Some(datetime!(2024-02-29 0:00 UTC))
        );
        assert_eq!(
            parse_timestamp("2024-02-29T10:30:00+02:00"),
            Some(datetime!(2024-02-29 8:30 UTC))
        );
        assert_eq!(parse_timestamp("next tuesday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn stored_text_dates_are_compared() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        assert_eq!(
            derive_status_from_stored(None, Some("2024-02-28"), now),
            EffectiveStatus::Overdue
        );
        assert_eq!(
            derive_status_from_stored(None, Some("garbage"), now),
            EffectiveStatus::Pending
        );
    }
}
