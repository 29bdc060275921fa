use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Pack a calendar time into the 32-bit `DateTime` element.
///
/// Layout from the low bit up: seconds/2 (5 bits), minutes (6), hours (5),
/// day (5), month (4), years since 2000 (7).
pub fn pack_datetime(dt: &NaiveDateTime) -> u32 {
    let year = (dt.year() - 2000).clamp(0, 0x7F) as u32;
    (dt.second() / 2)
        | (dt.minute() << 5)
        | (dt.hour() << 11)
        | (dt.day() << 16)
        | (dt.month() << 21)
        | (year << 25)
}

/// Unpack a `DateTime` element; `None` when the fields do not form a valid date
pub fn unpack_datetime(packed: u32) -> Option<NaiveDateTime> {
    let sec = (packed & 0x1F) * 2;
    let min = (packed >> 5) & 0x3F;
    let hour = (packed >> 11) & 0x1F;
    let day = (packed >> 16) & 0x1F;
    let month = (packed >> 21) & 0x0F;
    let year = 2000 + ((packed >> 25) & 0x7F) as i32;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, min, sec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_known_value() {
        let dt = NaiveDate::from_ymd_opt(2001, 2, 3)
            .unwrap()
            .and_hms_opt(4, 5, 6)
            .unwrap();
        let packed = pack_datetime(&dt);
        assert_eq!(packed, 3 | (5 << 5) | (4 << 11) | (3 << 16) | (2 << 21) | (1 << 25));
        assert_eq!(unpack_datetime(packed), Some(dt));
    }

    #[test]
    fn test_odd_seconds_are_rounded_down() {
        let dt = NaiveDate::from_ymd_opt(2030, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        let back = unpack_datetime(pack_datetime(&dt)).unwrap();
        assert_eq!(back.second(), 58);
        assert_eq!(back.minute(), 59);
        assert_eq!(back.year(), 2030);
    }

    #[test]
    fn test_invalid_fields_rejected() {
        // month 0, day 0
        assert_eq!(unpack_datetime(0), None);
    }
}
