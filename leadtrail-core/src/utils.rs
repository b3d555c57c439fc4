//! Stateless helpers: id generation, cookie strings, value checks

use chrono::{DateTime, Duration, Utc};

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of the random suffix on generated ids
const RANDOM_SUFFIX_LEN: usize = 9;

/// Generate an id of the form `<prefix>_<epoch-ms>_<random-base36>`
///
/// ```
/// use chrono::TimeZone;
/// let now = chrono::Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
/// let id = leadtrail_core::utils::generate_id("visitor", now);
/// assert!(id.starts_with("visitor_1700000000000_"));
/// ```
pub fn generate_id(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        now.timestamp_millis(),
        random_base36(RANDOM_SUFFIX_LEN)
    )
}

/// Random lowercase base36 string of exactly `len` characters
pub fn random_base36(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        let mut n = uuid::Uuid::new_v4().as_u128();
        for _ in 0..12 {
            if out.len() == len {
                break;
            }
            out.push(BASE36[(n % 36) as usize] as char);
            n /= 36;
        }
    }
    out
}

/// `ms` as a chrono duration, saturating at the largest representable span
pub fn millis(ms: u64) -> Duration {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(Duration::MAX)
}

/// True when the value has at least one non-whitespace character
pub fn is_filled(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Look up a cookie in a `Cookie:` style header (`a=1; b=2`)
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Build a `Set-Cookie` style string that expires `days` from `now`
pub fn set_cookie_string(name: &str, value: &str, days: i64, now: DateTime<Utc>) -> String {
    let expires = now + Duration::days(days);
    format!(
        "{}={}; expires={}; path=/; SameSite=Lax",
        name,
        value,
        expires.format("%a, %d %b %Y %H:%M:%S GMT")
    )
}
