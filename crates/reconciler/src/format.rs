//! Display strings for the tray

use chrono::{DateTime, Utc};

const UNKNOWN: &str = "未知";

/// Traffic in the decimal units the campus portal bills in.
pub fn usage_str(bytes: Option<u64>) -> String {
    let Some(bytes) = bytes else {
        return UNKNOWN.to_string();
    };
    let value = bytes as f64;
    if bytes < 1_000 {
        format!("{bytes}B")
    } else if bytes < 1_000_000 {
        format!("{:.2}K", value / 1e3)
    } else if bytes < 1_000_000_000 {
        format!("{:.2}M", value / 1e6)
    } else {
        format!("{:.2}G", value / 1e9)
    }
}

/// Account balance in yuan.
pub fn balance_str(balance: Option<f64>) -> String {
    match balance {
        Some(yuan) => format!("{yuan:.2}元"),
        None => UNKNOWN.to_string(),
    }
}

/// Coarse "N ago" text. Timestamps in the future (clock skew) read as just now.
pub fn time_passed_str(since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(since) = since else {
        return UNKNOWN.to_string();
    };
    let secs = (now - since).num_seconds();
    if secs < 60 {
        "刚刚".to_string()
    } else if secs < 3_600 {
        format!("{}分钟前", secs / 60)
    } else if secs < 86_400 {
        format!("{}小时前", secs / 3_600)
    } else {
        format!("{}天前", secs / 86_400)
    }
}
