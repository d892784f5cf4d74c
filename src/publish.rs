//! Effective visibility of an entry at a point in time.
use crate::model::DeclaredStatus;
use chrono::{DateTime, TimeZone};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Published,
    /// Not yet due, but shown because future entries were requested.
    Scheduled,
    Hidden,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        !matches!(self, Visibility::Hidden)
    }
}

/// Resolve what a reader sees for an entry at `now`.
///
/// Published entries are always visible. Scheduled entries become published
/// once their timestamp is due; before that they are visible only when
/// `include_future` is set. Everything else is hidden.
pub fn effective_state<A, B>(
    declared: DeclaredStatus,
    entry_date: &DateTime<A>,
    now: &DateTime<B>,
    include_future: bool,
) -> Visibility
where
    A: TimeZone,
    B: TimeZone,
{
    match declared {
        DeclaredStatus::Published => Visibility::Published,
        DeclaredStatus::Scheduled if entry_date <= now => Visibility::Published,
        DeclaredStatus::Scheduled if include_future => Visibility::Scheduled,
        _ => Visibility::Hidden,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, Utc};

    #[test]
    fn published_always_visible() {
        let now = Utc::now();
        let later = now + Duration::days(30);
        for future in [false, true] {
            assert_eq!(
                effective_state(DeclaredStatus::Published, &later, &now, future),
                Visibility::Published
            );
        }
    }

    #[test]
    fn draft_and_gone_never_visible() {
        let now = Utc::now();
        let earlier = now - Duration::days(1);
        for status in [DeclaredStatus::Draft, DeclaredStatus::Gone] {
            for future in [false, true] {
                assert_eq!(
                    effective_state(status, &earlier, &now, future),
                    Visibility::Hidden
                );
            }
        }
    }

    #[test]
    fn scheduled_transitions_once_due() {
        let due = Utc::now() + Duration::hours(2);
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let due_local = due.with_timezone(&tz);

        let mut seen_published = false;
        for minutes in (-240..=240).step_by(15) {
            let now = due + Duration::minutes(minutes);
            let state = effective_state(DeclaredStatus::Scheduled, &due_local, &now, false);
            if now < due {
                assert_eq!(state, Visibility::Hidden, "at {minutes}");
                assert!(!seen_published, "flapped back to hidden at {minutes}");
            } else {
                assert_eq!(state, Visibility::Published, "at {minutes}");
                seen_published = true;
            }
        }
        assert!(seen_published);
    }

    #[test]
    fn scheduled_visible_with_future_flag() {
        let now = Utc::now();
        let later = now + Duration::days(1);
        let state = effective_state(DeclaredStatus::Scheduled, &later, &now, true);
        assert_eq!(state, Visibility::Scheduled);
        assert!(state.is_visible());
    }
}
