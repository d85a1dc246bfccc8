//! Device classification from user agent strings.
//!
//! Ordered substring rules, checked case-insensitively: mobile keywords
//! first, then tablet keywords, then desktop as the default. OS and browser
//! follow their own ordered contains-checks (Chrome ships "safari" in its
//! UA, so Chrome is tested first; Android ships "linux", so Android wins
//! over Linux by order).

use regex::Regex;

use super::model::{DeviceInfo, DeviceKind};

const MOBILE_KEYWORDS: &[&str] = &[
    "mobile",
    "android",
    "iphone",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

const TABLET_KEYWORDS: &[&str] = &["tablet", "ipad"];

/// Parse a user agent string into coarse device details.
///
/// Never fails; unrecognized agents come back as desktop/unknown.
pub fn parse_user_agent(user_agent: &str) -> DeviceInfo {
    let ua = user_agent.to_lowercase();

    let kind = if MOBILE_KEYWORDS.iter().any(|k| ua.contains(k)) {
        DeviceKind::Mobile
    } else if TABLET_KEYWORDS.iter().any(|k| ua.contains(k)) {
        DeviceKind::Tablet
    } else {
        DeviceKind::Desktop
    };

    let os = if ua.contains("windows") {
        "Windows"
    } else if ua.contains("macintosh") || ua.contains("mac os") {
        "macOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("iphone") || ua.contains("ipad") {
        "iOS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "unknown"
    };

    let browser = if ua.contains("edge") {
        "Edge"
    } else if ua.contains("opera") || ua.contains("opr/") {
        "Opera"
    } else if ua.contains("chrome") && !ua.contains("chromium") {
        "Chrome"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("safari") {
        "Safari"
    } else {
        "unknown"
    };

    DeviceInfo {
        kind,
        os: os.to_string(),
        browser: browser.to_string(),
        version: extract_version(&ua, browser),
    }
}

/// Extract the browser version with a per-browser pattern.
fn extract_version(ua: &str, browser: &str) -> String {
    let pattern = match browser {
        "Chrome" => r"chrome/([0-9.]+)",
        "Firefox" => r"firefox/([0-9.]+)",
        "Safari" => r"version/([0-9.]+)",
        "Edge" => r"edge?/([0-9.]+)",
        _ => return "unknown".to_string(),
    };

    Regex::new(pattern)
        .ok()
        .and_then(|re| re.captures(ua))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const SAFARI_IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Safari/604.1";
    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

    #[test]
    fn chrome_on_windows_is_desktop() {
        let device = parse_user_agent(CHROME_DESKTOP);
        assert_eq!(device.kind, DeviceKind::Desktop);
        assert_eq!(device.os, "Windows");
        assert_eq!(device.browser, "Chrome");
        assert_eq!(device.version, "120.0.0.0");
    }

    #[test]
    fn iphone_is_mobile_ios_safari() {
        let device = parse_user_agent(SAFARI_IPHONE);
        assert_eq!(device.kind, DeviceKind::Mobile);
        assert_eq!(device.os, "iOS");
        assert_eq!(device.browser, "Safari");
        assert_eq!(device.version, "17.0");
    }

    #[test]
    fn ipad_is_tablet() {
        let device = parse_user_agent(SAFARI_IPAD);
        assert_eq!(device.kind, DeviceKind::Tablet);
        assert_eq!(device.os, "iOS");
    }

    #[test]
    fn mobile_keywords_win_over_tablet_keywords() {
        // "android" is in the mobile list, so an Android tablet UA that
        // carries both classifies as mobile - ordering, not specificity.
        let device = parse_user_agent("Mozilla/5.0 (Linux; Android 13; Tablet) Chrome/120.0");
        assert_eq!(device.kind, DeviceKind::Mobile);
        assert_eq!(device.os, "Android");
    }

    #[test]
    fn firefox_on_linux() {
        let device = parse_user_agent(FIREFOX_LINUX);
        assert_eq!(device.kind, DeviceKind::Desktop);
        assert_eq!(device.os, "Linux");
        assert_eq!(device.browser, "Firefox");
        assert_eq!(device.version, "121.0");
    }

    #[test]
    fn empty_agent_is_unknown_desktop() {
        let device = parse_user_agent("");
        assert_eq!(device.kind, DeviceKind::Desktop);
        assert_eq!(device.os, "unknown");
        assert_eq!(device.browser, "unknown");
        assert_eq!(device.version, "unknown");
    }
}
