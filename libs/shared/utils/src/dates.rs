use chrono::{DateTime, NaiveDate, Utc};

/// `DD.MM.YYYY` (Clinic source format) to `YYYY-MM-DD`. Anything that is not a
/// real calendar date yields `None`.
pub fn birth_date_to_iso(raw: &str) -> Option<String> {
    let mut parts = raw.trim().split('.');
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let year: i32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    NaiveDate::from_ymd_opt(year, month, day).map(|date| date.format("%Y-%m-%d").to_string())
}

/// `YYYY-MM-DD` (optionally followed by a time part) to `DD.MM.YYYY`.
pub fn iso_to_birth_date(raw: &str) -> Option<String> {
    let date_part = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%d.%m.%Y").to_string())
}

pub fn epoch_ms_to_utc(epoch_ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(epoch_ms)
}

pub fn utc_to_epoch_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_birth_date_conversion() {
        assert_eq!(birth_date_to_iso("07.03.1985").as_deref(), Some("1985-03-07"));
        assert_eq!(birth_date_to_iso("7.3.1985").as_deref(), Some("1985-03-07"));
        assert_eq!(birth_date_to_iso("31.02.1985"), None);
        assert_eq!(birth_date_to_iso("1985-03-07"), None);
        assert_eq!(birth_date_to_iso(""), None);
    }

    #[test]
    fn test_iso_to_birth_date() {
        assert_eq!(iso_to_birth_date("1985-03-07").as_deref(), Some("07.03.1985"));
        assert_eq!(iso_to_birth_date("1985-03-07T00:00:00Z").as_deref(), Some("07.03.1985"));
        assert_eq!(iso_to_birth_date("07.03.1985"), None);
    }

    #[test]
    fn test_epoch_ms_roundtrip_is_utc() {
        let dt = Utc.with_ymd_and_hms(2025, 10, 1, 8, 30, 0).unwrap();
        let ms = utc_to_epoch_ms(dt);
        assert_eq!(epoch_ms_to_utc(ms), Some(dt));
    }
}
