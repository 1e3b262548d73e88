use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

/// Attribute map of a cookie (`HttpOnly`, `SameSite`, …). Keys are stored
/// lowercased; value-less attributes map to the empty string.
pub type CookieAttrs = HashMap<String, String>;

/// Per-host ordered cookie list. The jar is mutated from two places (the
/// HTTP client on `Set-Cookie` and the script bridge on `document.cookie`),
/// which are serialized by the single engine context owning it.
///
/// Persisted JSON shape: `{host: [[cookie_string, attr_map], …]}`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    entries: HashMap<String, Vec<(String, CookieAttrs)>>,
}

impl CookieJar {
    pub fn new() -> Self {
        CookieJar::default()
    }

    /// Ordered `(cookie-string, attrs)` items stored for `host`.
    pub fn get_cookie_items_by_host(&self, host: &str) -> &[(String, CookieAttrs)] {
        self.entries.get(host).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The `Cookie:`/`document.cookie` value for `host`, items joined with
    /// `"; "`. HttpOnly entries are hidden from scripts.
    pub fn get_cookie_value_by_host(&self, host: &str, is_script: bool) -> String {
        self.get_cookie_items_by_host(host)
            .iter()
            .filter(|(_, attrs)| !(is_script && attrs.contains_key("httponly")))
            .map(|(cookie, _)| cookie.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Stores a raw `name=value; attr=val; …` header for `host`, replacing
    /// any existing entry with the same name in place. Script writes are
    /// silently refused when they would replace an HttpOnly entry.
    pub fn set_cookie_by_host(&mut self, host: &str, raw: &str, is_script: bool) {
        let Some((cookie, attrs)) = parse_set_cookie(raw) else {
            debug!("ignoring malformed cookie for {host}: {raw:?}");
            return;
        };
        let name = cookie_name(&cookie);
        let bucket = self.entries.entry(host.to_string()).or_default();
        if let Some(existing) = bucket.iter_mut().find(|(c, _)| cookie_name(c) == name) {
            if is_script && existing.1.contains_key("httponly") {
                debug!("script write refused for http-only cookie {name:?} on {host}");
                return;
            }
            *existing = (cookie, attrs);
        } else {
            bucket.push((cookie, attrs));
        }
    }

    /// Cookie header for an outgoing request, applying the SameSite policy
    /// against the referrer's host. `lax` drops the cookie on cross-site
    /// non-GET requests, `strict` on any cross-site request; `none` or an
    /// absent attribute always attaches.
    pub fn get_request_cookies(
        &self,
        host: &str,
        referrer_host: Option<&str>,
        method: &str,
    ) -> String {
        let cross_site = matches!(referrer_host, Some(r) if r != host);
        self.get_cookie_items_by_host(host)
            .iter()
            .filter(|(_, attrs)| {
                match attrs.get("samesite").map(String::as_str) {
                    Some("lax") => !(cross_site && method != "GET"),
                    Some("strict") => !cross_site,
                    _ => true,
                }
            })
            .map(|(cookie, _)| cookie.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses `name=value; attr=val; …` into the stored `(cookie, attrs)` pair.
/// Attribute keys and the SameSite value are lowercased; a trailing `;` and
/// empty cookie values are tolerated per RFC 6265.
fn parse_set_cookie(raw: &str) -> Option<(String, CookieAttrs)> {
    let mut parts = raw.split(';');
    let first = parts.next()?.trim();
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let cookie = format!("{}={}", name, value.trim());

    let mut attrs = CookieAttrs::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((k, v)) => {
                attrs.insert(k.trim().to_ascii_lowercase(), v.trim().to_ascii_lowercase());
            }
            None => {
                attrs.insert(part.to_ascii_lowercase(), String::new());
            }
        }
    }
    Some((cookie, attrs))
}

fn cookie_name(cookie: &str) -> &str {
    cookie.split_once('=').map(|(n, _)| n).unwrap_or(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut jar = CookieJar::new();
        jar.set_cookie_by_host("example.org", "session=1234", false);
        assert_eq!(jar.get_cookie_value_by_host("example.org", false), "session=1234");
        assert_eq!(jar.get_cookie_value_by_host("other.org", false), "");
    }

    #[test]
    fn replaced_by_name_in_place() {
        let mut jar = CookieJar::new();
        jar.set_cookie_by_host("h", "a=1", false);
        jar.set_cookie_by_host("h", "b=2", false);
        jar.set_cookie_by_host("h", "a=3", false);
        assert_eq!(jar.get_cookie_value_by_host("h", false), "a=3; b=2");
    }

    #[test]
    fn http_only_hidden_from_scripts() {
        let mut jar = CookieJar::new();
        jar.set_cookie_by_host("h", "secret=x; HttpOnly", false);
        jar.set_cookie_by_host("h", "open=y", false);
        assert_eq!(jar.get_cookie_value_by_host("h", true), "open=y");
        assert_eq!(jar.get_cookie_value_by_host("h", false), "secret=x; open=y");
    }

    #[test]
    fn script_cannot_replace_http_only() {
        let mut jar = CookieJar::new();
        jar.set_cookie_by_host("h", "secret=x; HttpOnly", false);
        jar.set_cookie_by_host("h", "secret=evil", true);
        assert_eq!(jar.get_cookie_value_by_host("h", false), "secret=x");
        // The network is still allowed to replace it.
        jar.set_cookie_by_host("h", "secret=y; HttpOnly", false);
        assert_eq!(jar.get_cookie_value_by_host("h", false), "secret=y");
    }

    #[test]
    fn samesite_lax_drops_cross_site_post() {
        let mut jar = CookieJar::new();
        jar.set_cookie_by_host("host", "a=1; SameSite=Lax", false);
        assert_eq!(jar.get_request_cookies("host", Some("evil.org"), "POST"), "");
        assert_eq!(jar.get_request_cookies("host", Some("evil.org"), "GET"), "a=1");
        assert_eq!(jar.get_request_cookies("host", Some("host"), "POST"), "a=1");
        assert_eq!(jar.get_request_cookies("host", None, "POST"), "a=1");
    }

    #[test]
    fn samesite_strict_drops_any_cross_site() {
        let mut jar = CookieJar::new();
        jar.set_cookie_by_host("host", "a=1; SameSite=Strict", false);
        assert_eq!(jar.get_request_cookies("host", Some("evil.org"), "GET"), "");
        assert_eq!(jar.get_request_cookies("host", Some("host"), "GET"), "a=1");
    }

    #[test]
    fn samesite_none_always_attaches() {
        let mut jar = CookieJar::new();
        jar.set_cookie_by_host("host", "a=1; SameSite=None", false);
        assert_eq!(jar.get_request_cookies("host", Some("evil.org"), "POST"), "a=1");
    }

    #[test]
    fn tolerates_trailing_semicolon_and_empty_value() {
        let mut jar = CookieJar::new();
        jar.set_cookie_by_host("h", "a=;", false);
        assert_eq!(jar.get_cookie_value_by_host("h", false), "a=");
    }
}
