//! Hard limits. Anything past these is rejected with `LimitExceeded` or a
//! validation error before it reaches the store.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 64;

/// Longest bookable appointment: one full day.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;
pub const MAX_SLOT_DURATION_MINUTES: u32 = 12 * 60;

pub const MAX_APPOINTMENTS_PER_DAY: usize = 512;
pub const MAX_DATE_OVERRIDES: usize = 4096;

pub const MAX_SERVICE_LEN: usize = 200;
pub const MIN_FULL_NAME_LEN: usize = 3;
pub const MAX_FULL_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;

/// Optimistic transactions: attempts before `Contention` surfaces to the caller.
pub const MAX_TXN_ATTEMPTS: u32 = 5;
pub const TXN_BACKOFF_BASE_MS: u64 = 5;

/// Dates outside this window are rejected outright.
pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2200;

/// Largest WAL record accepted on write or replay. A compaction snapshot is
/// one record, so this also caps the live state of a salon.
pub const MAX_WAL_RECORD_LEN: usize = 256 * 1024 * 1024;
