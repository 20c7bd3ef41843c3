use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Zone-less layouts the server uses for `LocalDateTime` columns.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse a `sentAt` value.
///
/// Browsers and this client send RFC 3339 with an offset. History, summary
/// and push rows come straight from the server's `LocalDateTime` and carry
/// no zone at all; those are read in the local zone, the same way a
/// browser's `Date` reads them.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = raw.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|ndt| from_local(&ndt))
}

/// Resolve a wall-clock time in the local zone. A time skipped by a DST
/// jump takes the offset in force at that instant read as UTC.
fn from_local(ndt: &NaiveDateTime) -> DateTime<Utc> {
    match Local.from_local_datetime(ndt).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => {
            let offset = Local.offset_from_utc_datetime(ndt);
            (*ndt - offset).and_utc()
        }
    }
}

/// Format an outgoing `sentAt`: millisecond precision, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_zulu() {
        let ts = parse_timestamp("2024-05-01T10:15:30.123Z").unwrap();
        assert_eq!(ts.timestamp_millis(), Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap().timestamp_millis() + 123);
    }

    #[test]
    fn parses_offset_into_utc() {
        let ts = parse_timestamp("2024-05-01T12:15:30+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap());
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, sec: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, sec)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parses_server_local_date_time() {
        let micros = parse_timestamp("2024-05-01T10:15:30.123456").unwrap();
        assert_eq!(micros.timestamp_subsec_micros(), 123456);

        let whole = parse_timestamp("2024-05-01T10:15:30").unwrap();
        assert_eq!(whole, local(2024, 5, 1, 10, 15, 30));

        let minutes = parse_timestamp("2024-05-01T10:15").unwrap();
        assert_eq!(minutes, local(2024, 5, 1, 10, 15, 0));
    }

    #[test]
    fn zone_less_values_share_a_clock_with_now() {
        let server_now = Local::now().naive_local();
        let raw = server_now.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
        let parsed = parse_timestamp(&raw).unwrap();
        assert!((parsed - Utc::now()).num_seconds().abs() < 5);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn formats_with_millis_and_z() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-05-01T10:15:30.000Z");
    }
}
