//! Ad-tag macro substitution for the single-tag (non-waterfall) player.
//!
//! A tag template such as
//! `https://ads.example/vast?ua=[USER_AGENT]&ip=[IP]&cb=[CACHE_BUSTER]&w=[WIDTH]&h=[HEIGHT]`
//! is filled in once, before the first ad request, from a client-info lookup
//! and the detected device class.

use crate::config::{PlayerConfig, Size};
use crate::error::{AdError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Client details returned by the lookup endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientInfo {
    pub ua: String,
    pub ip: String,
}

/// Coarse device class used to pick the nominal player size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    pub fn from_user_agent(ua: &str) -> Self {
        let apple = ["iPod", "iPhone", "iPad"].iter().any(|m| ua.contains(m));
        if apple || ua.to_lowercase().contains("android") {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn player_size(self, config: &PlayerConfig) -> Size {
        match self {
            DeviceClass::Desktop => config.desktop_size,
            DeviceClass::Mobile => config.mobile_size,
        }
    }
}

/// Fill in the first occurrence of each supported macro.
pub fn expand_ad_tag(template: &str, info: &ClientInfo, size: Size, cache_buster: i64) -> String {
    template
        .replacen("[USER_AGENT]", &encode_uri_component(&info.ua), 1)
        .replacen("[IP]", &info.ip, 1)
        .replacen("[CACHE_BUSTER]", &cache_buster.to_string(), 1)
        .replacen("[WIDTH]", &size.width.to_string(), 1)
        .replacen("[HEIGHT]", &size.height.to_string(), 1)
}

/// Milliseconds since the Unix epoch.
pub fn cache_buster_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Percent-encode everything except the URI-component unreserved set.
fn encode_uri_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// One-time client-info lookup performed before the first ad request.
pub trait ClientInfoLookup {
    fn lookup(&self) -> Result<ClientInfo>;
}

/// Client details known up front (CLI flags, tests).
pub struct StaticClientInfo(pub ClientInfo);

impl ClientInfoLookup for StaticClientInfo {
    fn lookup(&self) -> Result<ClientInfo> {
        Ok(self.0.clone())
    }
}

/// Blocking HTTP lookup against a JSON endpoint.
pub struct HttpClientInfoLookup {
    url: String,
    timeout: Duration,
}

impl HttpClientInfoLookup {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        HttpClientInfoLookup {
            url: url.into(),
            timeout,
        }
    }
}

impl ClientInfoLookup for HttpClientInfoLookup {
    fn lookup(&self) -> Result<ClientInfo> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AdError::Lookup(format!("client build: {}", e)))?;
        let response = client
            .get(&self.url)
            .send()
            .map_err(|e| AdError::Lookup(format!("GET {}: {}", self.url, e)))?;
        if !response.status().is_success() {
            return Err(AdError::Lookup(format!("GET {}: status {}", self.url, response.status())));
        }
        let info: ClientInfo = response
            .json()
            .map_err(|e| AdError::Lookup(format!("decode {}: {}", self.url, e)))?;
        debug!(ip = %info.ip, "client info resolved");
        Ok(info)
    }
}

/// Resolve a tag template: look up the client, size by device class, expand.
pub fn resolve_ad_tag(
    template: &str,
    lookup: &dyn ClientInfoLookup,
    config: &PlayerConfig,
) -> Result<String> {
    if template.trim().is_empty() {
        return Err(AdError::EmptyAdTagInput);
    }
    let info = lookup.lookup()?;
    let size = DeviceClass::from_user_agent(&info.ua).player_size(config);
    Ok(expand_ad_tag(template, &info, size, cache_buster_now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desktop_info() -> ClientInfo {
        ClientInfo {
            ua: "Mozilla/5.0 (X11; Linux x86_64)".into(),
            ip: "203.0.113.9".into(),
        }
    }

    #[test]
    fn detects_mobile_user_agents() {
        assert_eq!(DeviceClass::from_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)"), DeviceClass::Mobile);
        assert_eq!(DeviceClass::from_user_agent("Mozilla/5.0 (Linux; Android 14)"), DeviceClass::Mobile);
        assert_eq!(DeviceClass::from_user_agent("Mozilla/5.0 (iPad; CPU OS 16_0)"), DeviceClass::Mobile);
        assert_eq!(DeviceClass::from_user_agent("Mozilla/5.0 (Windows NT 10.0)"), DeviceClass::Desktop);
    }

    #[test]
    fn expands_all_macros() {
        let tag = expand_ad_tag(
            "https://ads/vast?ua=[USER_AGENT]&ip=[IP]&cb=[CACHE_BUSTER]&w=[WIDTH]&h=[HEIGHT]",
            &desktop_info(),
            Size::new(640, 360),
            1700000000000,
        );
        assert_eq!(
            tag,
            "https://ads/vast?ua=Mozilla%2F5.0%20(X11%3B%20Linux%20x86_64)&ip=203.0.113.9&cb=1700000000000&w=640&h=360"
        );
    }

    #[test]
    fn replaces_only_first_occurrence() {
        let tag = expand_ad_tag("[IP]/[IP]", &desktop_info(), Size::new(1, 1), 0);
        assert_eq!(tag, "203.0.113.9/[IP]");
    }

    #[test]
    fn template_without_macros_is_unchanged() {
        let tag = expand_ad_tag("https://ads/vast?x=1", &desktop_info(), Size::new(1, 1), 0);
        assert_eq!(tag, "https://ads/vast?x=1");
    }

    #[test]
    fn resolve_uses_mobile_size_for_mobile_clients() {
        let lookup = StaticClientInfo(ClientInfo {
            ua: "Android".into(),
            ip: "10.0.0.1".into(),
        });
        let tag = resolve_ad_tag("w=[WIDTH]&h=[HEIGHT]", &lookup, &PlayerConfig::default()).unwrap();
        assert_eq!(tag, "w=360&h=240");
    }

    #[test]
    fn resolve_rejects_empty_template() {
        let lookup = StaticClientInfo(desktop_info());
        let err = resolve_ad_tag("", &lookup, &PlayerConfig::default()).unwrap_err();
        assert!(matches!(err, AdError::EmptyAdTagInput));
    }
}
