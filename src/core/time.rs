use time::macros::format_description;
use time::OffsetDateTime;

/// Ledger timestamps use the `YYYY-MM-DD HH:MM:SS` layout, in UTC.
pub(crate) fn ledger_timestamp(value: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    value.format(&format).unwrap_or_else(|_| value.to_string())
}

pub(crate) fn ledger_timestamp_now() -> String {
    ledger_timestamp(OffsetDateTime::now_utc())
}

pub(crate) fn unix_millis_now() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}
