use time::macros::{format_description, offset};
use time::{OffsetDateTime, UtcOffset};

/// All human-facing timestamps (log lines, artifact filenames) use UTC+8.
pub const BEIJING_OFFSET: UtcOffset = offset!(+8);

pub fn now_beijing() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(BEIJING_OFFSET)
}

/// `YYYY-MM-DD` in Beijing time; drives daily log rotation.
pub fn beijing_date_string() -> String {
    let fmt = format_description!("[year]-[month]-[day]");
    now_beijing().format(&fmt).unwrap_or_default()
}

/// `YYYY-MM-DD HH:MM:SS` in Beijing time.
pub fn beijing_timestamp_string() -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    now_beijing().format(&fmt).unwrap_or_default()
}

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> i64 {
    let now = OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_string_shape() {
        let date = beijing_date_string();
        assert_eq!(date.len(), 10);
        assert_eq!(&date[4..5], "-");
        assert_eq!(&date[7..8], "-");
    }

    #[test]
    fn epoch_ms_is_positive() {
        assert!(epoch_ms() > 1_600_000_000_000);
    }
}
