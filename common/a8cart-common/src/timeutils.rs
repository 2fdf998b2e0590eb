use cfg_if::cfg_if;
use time::OffsetDateTime;

/// Read the host wall-clock time in the local time zone.
///
/// Falls back to UTC if the local offset cannot be determined, which `time` refuses to do on some
/// platforms when the process is multi-threaded.
#[must_use]
pub fn local_datetime() -> OffsetDateTime {
    cfg_if! {
        if #[cfg(target_arch = "wasm32")] {
            use time::UtcOffset;

            let date = js_sys::Date::new_0();
            let utc_nanos = (date.get_time() * 1_000_000.0) as i128;

            // getTimezoneOffset() is UTC minus local time, in minutes
            let offset_seconds = -(date.get_timezone_offset() * 60.0) as i32;
            let offset = UtcOffset::from_whole_seconds(offset_seconds).unwrap_or(UtcOffset::UTC);

            OffsetDateTime::from_unix_timestamp_nanos(utc_nanos)
                .map(|datetime| datetime.to_offset(offset))
                .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        } else {
            OffsetDateTime::now_local().unwrap_or_else(|err| {
                log::debug!("Unable to determine local UTC offset, using UTC: {err}");
                OffsetDateTime::now_utc()
            })
        }
    }
}

/// Hundredths of a second within the current second.
#[must_use]
pub fn centiseconds(datetime: OffsetDateTime) -> u8 {
    (datetime.nanosecond() / 10_000_000) as u8
}

/// Last two decimal digits of the year, as stored by 2-digit RTC year registers.
#[must_use]
pub fn two_digit_year(datetime: OffsetDateTime) -> u8 {
    datetime.year().rem_euclid(100) as u8
}
