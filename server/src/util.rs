use chrono::{DateTime, Duration, Utc};

const EXPIRY_MARGIN_SECS: i64 = 30;

/// True when the token expires within the next few seconds.
pub fn check_expired(expires_at: DateTime<Utc>) -> bool {
    let now_with_margin = Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS);
    now_with_margin > expires_at
}
