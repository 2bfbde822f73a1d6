//! Normalization of the dimension values the two pipelines report differently.
//!
//! One pipeline exports ISO country codes and raw user agents; the other exports display
//! names and pre-classified device/OS/browser columns. Everything here maps the former
//! onto the latter so attribute equality in the matcher is meaningful.

use super::types::DeviceCategory;

pub const NOT_SET: &str = "(not set)";

const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("AE", "United Arab Emirates"),
    ("AR", "Argentina"),
    ("AT", "Austria"),
    ("AU", "Australia"),
    ("BD", "Bangladesh"),
    ("BE", "Belgium"),
    ("BR", "Brazil"),
    ("CA", "Canada"),
    ("CH", "Switzerland"),
    ("CL", "Chile"),
    ("CN", "China"),
    ("CO", "Colombia"),
    ("CZ", "Czechia"),
    ("DE", "Germany"),
    ("DK", "Denmark"),
    ("EG", "Egypt"),
    ("ES", "Spain"),
    ("FI", "Finland"),
    ("FJ", "Fiji"),
    ("FR", "France"),
    ("GB", "United Kingdom"),
    ("GR", "Greece"),
    ("HK", "Hong Kong"),
    ("ID", "Indonesia"),
    ("IE", "Ireland"),
    ("IL", "Israel"),
    ("IN", "India"),
    ("IT", "Italy"),
    ("JP", "Japan"),
    ("KE", "Kenya"),
    ("KR", "South Korea"),
    ("LK", "Sri Lanka"),
    ("MG", "Madagascar"),
    ("MX", "Mexico"),
    ("MY", "Malaysia"),
    ("NC", "New Caledonia"),
    ("NG", "Nigeria"),
    ("NL", "Netherlands"),
    ("NO", "Norway"),
    ("NZ", "New Zealand"),
    ("PE", "Peru"),
    ("PG", "Papua New Guinea"),
    ("PH", "Philippines"),
    ("PK", "Pakistan"),
    ("PL", "Poland"),
    ("PT", "Portugal"),
    ("RU", "Russia"),
    ("SA", "Saudi Arabia"),
    ("SE", "Sweden"),
    ("SG", "Singapore"),
    ("TH", "Thailand"),
    ("TR", "Turkey"),
    ("TW", "Taiwan"),
    ("UA", "Ukraine"),
    ("US", "United States"),
    ("VN", "Vietnam"),
    ("ZA", "South Africa"),
    ("ZW", "Zimbabwe"),
];

/// Maps a two-letter code to its display name; anything else passes through trimmed.
pub fn country_display_name(raw: Option<&str>) -> String {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return NOT_SET.to_string();
    }
    if trimmed.len() == 2 {
        let upper = trimmed.to_ascii_uppercase();
        if let Ok(idx) = COUNTRY_NAMES.binary_search_by(|(code, _)| (*code).cmp(upper.as_str())) {
            return COUNTRY_NAMES[idx].1.to_string();
        }
    }
    trimmed.to_string()
}

/// Comparison key for countries: case-folded display name with internal whitespace collapsed.
pub fn country_key(country: &str) -> String {
    country_display_name(Some(country))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trims a free-text dimension, mapping blanks to `(not set)`.
pub fn dimension_or_not_set(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => NOT_SET.to_string(),
    }
}

pub fn dimension_key(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn classify_device(user_agent: &str) -> DeviceCategory {
    let ua = user_agent;
    if ua.contains("iPad") || (ua.contains("Android") && !ua.contains("Mobile")) {
        return DeviceCategory::Tablet;
    }
    const MOBILE_MARKERS: [&str; 6] = [
        "iPhone",
        "iPod",
        "Windows Phone",
        "BlackBerry",
        "Opera Mini",
        "IEMobile",
    ];
    if MOBILE_MARKERS.iter().any(|marker| ua.contains(marker))
        || (ua.contains("Android") && ua.contains("Mobile"))
    {
        return DeviceCategory::Mobile;
    }
    DeviceCategory::Desktop
}

pub fn classify_operating_system(user_agent: &str) -> &'static str {
    let ua = user_agent;
    if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        "iOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Windows Phone") {
        "Windows Phone"
    } else if ua.contains("CrOS") {
        "Chrome OS"
    } else if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Macintosh") {
        "Macintosh"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        NOT_SET
    }
}

pub fn classify_browser(user_agent: &str) -> &'static str {
    let ua = user_agent;
    if ua.contains("Edg/") || ua.contains("Edge/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("SamsungBrowser") {
        "Samsung Internet"
    } else if ua.contains("Firefox/") {
        "Firefox"
    } else if ua.contains("CriOS") || ua.contains("Chrome/") {
        "Chrome"
    } else if ua.contains("Safari/") {
        "Safari"
    } else if ua.contains("MSIE") || ua.contains("Trident") {
        "Internet Explorer"
    } else if (ua.contains("iPhone") || ua.contains("iPad")) && ua.contains("Mobile/") {
        "Safari (in-app)"
    } else {
        NOT_SET
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentClass {
    pub device_category: DeviceCategory,
    pub operating_system: String,
    pub browser: String,
}

/// Classifies a raw user agent; an empty agent is a desktop with unknown OS and browser.
pub fn classify_user_agent(user_agent: Option<&str>) -> UserAgentClass {
    let ua = user_agent.map(str::trim).unwrap_or_default();
    if ua.is_empty() {
        return UserAgentClass {
            device_category: DeviceCategory::Desktop,
            operating_system: NOT_SET.to_string(),
            browser: NOT_SET.to_string(),
        };
    }
    UserAgentClass {
        device_category: classify_device(ua),
        operating_system: classify_operating_system(ua).to_string(),
        browser: classify_browser(ua).to_string(),
    }
}

pub fn is_bot_user_agent(user_agent: &str) -> bool {
    const BOT_MARKERS: [&str; 4] = ["bot", "crawler", "spider", "headlesschrome"];
    let lowered = user_agent.to_ascii_lowercase();
    BOT_MARKERS.iter().any(|marker| lowered.contains(marker))
}
