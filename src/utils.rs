use chrono::{DateTime, Utc};

/// Humanize the gap between `now` and `reference` as
/// "N years M months K days". Display convention: 365-day years,
/// 30-day months. Returns "Never used" when the reference is absent.
pub fn format_time_difference(now: DateTime<Utc>, reference: Option<DateTime<Utc>>) -> String {
    let Some(reference) = reference else {
        return "Never used".to_string();
    };

    let total_days = (now - reference).num_days().max(0);
    let years = total_days / 365;
    let months = (total_days % 365) / 30;
    let days = (total_days % 365) % 30;

    let mut parts = Vec::new();
    if years > 0 {
        parts.push(format!("{} year{}", years, plural(years)));
    }
    if months > 0 {
        parts.push(format!("{} month{}", months, plural(months)));
    }
    if days > 0 || parts.is_empty() {
        parts.push(format!("{} day{}", days, plural(days)));
    }

    parts.join(" ")
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn absent_reference_reads_never_used() {
        assert_eq!(format_time_difference(Utc::now(), None), "Never used");
    }

    #[test]
    fn same_instant_reads_zero_days() {
        let now = Utc::now();
        assert_eq!(format_time_difference(now, Some(now)), "0 days");
    }

    #[test]
    fn compound_spans_use_display_calendar() {
        let now = Utc::now();
        // 1 year + 2 months + 3 days under the 365/30 convention
        let reference = now - Duration::days(365 + 60 + 3);
        assert_eq!(
            format_time_difference(now, Some(reference)),
            "1 year 2 months 3 days"
        );
    }

    #[test]
    fn future_reference_clamps_to_zero() {
        let now = Utc::now();
        let reference = now + Duration::days(10);
        assert_eq!(format_time_difference(now, Some(reference)), "0 days");
    }

    #[test]
    fn singular_and_plural_forms() {
        let now = Utc::now();
        assert_eq!(
            format_time_difference(now, Some(now - Duration::days(1))),
            "1 day"
        );
        assert_eq!(
            format_time_difference(now, Some(now - Duration::days(731))),
            "2 years 1 day"
        );
    }
}
