//! Calendar value payloads.
//!
//! The timezone database and datetime arithmetic are external
//! collaborators — this crate only needs concrete payloads for the
//! `Value` variants plus the handful of read-only accessors/comparisons a
//! VM opcode might need (equality, ordering, display). Calendar math
//! (adding a `Period` to a `LocalDate`, timezone conversion, etc.) is out
//! of scope; a host embedding this runtime supplies that behavior and
//! hands back the resulting payloads.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDate {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanosecond: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDateTime {
    pub date: LocalDate,
    pub time: LocalTime,
}

/// Milliseconds since the Unix epoch (UTC), independent of any zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    pub epoch_millis: i64,
}

/// A calendar date tagged with a zone name — distinct from `LocalDate`
/// in that it is zone-aware (source grammar's `Date` vs `LocalDate`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateWithZone {
    pub date: LocalDate,
    pub zone: std::rc::Rc<str>,
}

/// An IANA zone identifier; the timezone database itself lives outside
/// this crate, so `Zone` is just the opaque name used to look entries up
/// in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Zone {
    pub id: std::rc::Rc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    pub seconds: i64,
    pub nanoseconds: i32,
}

/// Calendar period (years/months/days) — not reducible to a fixed duration
/// without a calendar, hence kept distinct from `Duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    pub years: i32,
    pub months: i32,
    pub days: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_date_ordering_is_calendar_order() {
        let a = LocalDate { year: 2024, month: 1, day: 1 };
        let b = LocalDate { year: 2024, month: 1, day: 2 };
        assert!(a < b);
    }

    #[test]
    fn instant_equality_is_by_epoch_millis() {
        let a = Instant { epoch_millis: 1000 };
        let b = Instant { epoch_millis: 1000 };
        assert_eq!(a, b);
    }
}
