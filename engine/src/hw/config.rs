pub const STOP_TIMEOUT_MS_ENV: &str = "RTBRIDGE_STOP_TIMEOUT_MS";
pub const EVENT_CAPACITY_ENV: &str = "RTBRIDGE_EVENT_CAPACITY";
pub const RT_PRIORITY_ENV: &str = "RTBRIDGE_RT_PRIORITY";

pub fn env_flag(key: &str) -> bool {
    std::env::var(key).ok().is_some_and(|v| parse_flag(&v))
}

pub fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    let s = value.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}
