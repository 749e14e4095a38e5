use chrono::NaiveDate;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ACTIVE_PER_ROOM: usize = 4_096;

/// Longest single stay that will be admitted.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Longest a Pending hold may last before it must be confirmed.
pub const MAX_HOLD_DURATION_SECS: u64 = 24 * 60 * 60;

/// Widest calendar window a query may ask for.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 2 * 366;

pub const MAX_ROOM_ID_LEN: usize = 64;
pub const MAX_ROOM_TYPE_LEN: usize = 64;
pub const MAX_GUEST_NAME_LEN: usize = 256;
pub const MAX_GUEST_EMAIL_LEN: usize = 320;
pub const MAX_GUEST_PHONE_LEN: usize = 32;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Earliest date accepted anywhere in a range.
pub const MIN_VALID_DATE: NaiveDate = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
/// Latest date accepted anywhere in a range (exclusive end may equal it).
pub const MAX_VALID_DATE: NaiveDate = NaiveDate::from_ymd_opt(2200, 1, 1).unwrap();
