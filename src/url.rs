use crate::errors::{Error, Result};

/// A parsed URL over the schemes the engine understands:
/// `http`, `https`, `file`, `data`, `about` and the `view-source:` prefix.
///
/// Immutable after construction. Sub-resources and links are resolved by
/// constructing a new `Url` with the referencing page as parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Query string without the leading `?`; empty when absent.
    pub search: String,
    /// Fragment without the leading `#`; empty when absent.
    pub fragment: String,
    pub viewsource: bool,
    /// `data:` URLs only.
    pub mimetype: String,
    /// `data:` URLs only.
    pub content: String,
}

impl Url {
    fn blank(scheme: &str) -> Self {
        Url {
            scheme: scheme.to_string(),
            host: String::new(),
            port: 0,
            path: String::new(),
            search: String::new(),
            fragment: String::new(),
            viewsource: false,
            mimetype: String::new(),
            content: String::new(),
        }
    }

    /// Parses `url`, optionally resolving it against `parent`.
    ///
    /// Relative forms (`/path`, `name.html`, `#frag`, `//host/…`,
    /// `host:port`) are only meaningful with the parent they are relative
    /// to; absolute forms carry their own scheme.
    pub fn new(url: &str, parent: Option<&Url>) -> Result<Url> {
        let url = url.replace('\\', "/");
        let mut url = url.as_str();

        let mut viewsource = false;
        if let Some(rest) = url.strip_prefix("view-source:") {
            viewsource = true;
            url = rest;
        }

        if let Some(rest) = url.strip_prefix("about:") {
            let mut out = Url::blank("about");
            out.path = rest.to_string();
            out.viewsource = viewsource;
            return Ok(out);
        }

        if let Some(rest) = url.strip_prefix("data:") {
            let (mimetype, content) = rest
                .split_once(',')
                .ok_or_else(|| Error::InvalidUrl(format!("data url without comma: {url}")))?;
            let mut out = Url::blank("data");
            out.mimetype = mimetype.to_string();
            out.content = content.to_string();
            out.viewsource = viewsource;
            return Ok(out);
        }

        let mut out = if let Some(rest) = url.strip_prefix("//") {
            // Scheme-relative: new host, scheme carried over from the parent.
            let scheme = parent.map(|p| p.scheme.clone()).unwrap_or_else(|| "http".to_string());
            Url::parse_hostpath(&scheme, rest)?
        } else if url.starts_with('/') && parent.is_some() {
            let parent = parent.unwrap();
            let mut out = parent.clone();
            out.fragment.clear();
            out.search.clear();
            Url::split_path(&mut out, url);
            out
        } else if !url.contains("://") {
            if let Some(parent) = parent {
                let mut out = parent.clone();
                if let Some(frag) = url.strip_prefix('#') {
                    out.fragment = frag.to_string();
                    out.viewsource |= viewsource;
                    return Ok(out);
                }
                out.fragment.clear();
                out.search.clear();
                // Replace the last path segment of the parent.
                let base = match out.path.rfind('/') {
                    Some(i) => out.path[..=i].to_string(),
                    None => "/".to_string(),
                };
                Url::split_path(&mut out, &format!("{base}{url}"));
                out
            } else if Url::looks_like_hostport(url) {
                Url::parse_hostpath("http", url)?
            } else {
                return Err(Error::InvalidUrl(url.to_string()));
            }
        } else {
            let (scheme, rest) = url.split_once("://").unwrap();
            match scheme {
                "http" | "https" => Url::parse_hostpath(scheme, rest)?,
                "file" => {
                    let mut out = Url::blank("file");
                    Url::split_path(&mut out, rest);
                    out
                }
                other => return Err(Error::UnsupportedScheme(other.to_string())),
            }
        };

        out.viewsource |= viewsource;
        Ok(out)
    }

    /// `host[:port]/path?search#fragment` for http and https.
    fn parse_hostpath(scheme: &str, rest: &str) -> Result<Url> {
        let mut out = Url::blank(scheme);
        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], rest[i..].to_string()),
            None => (rest, "/".to_string()),
        };
        // A URL with no path can still carry a query or fragment,
        // e.g. "http://h?q".
        let mut host = host;
        let mut path = path;
        if let Some(i) = host.find(['?', '#']) {
            path = format!("/{}", &host[i..]);
            host = &host[..i];
        }
        if let Some((name, port)) = host.split_once(':') {
            out.host = name.to_string();
            out.port = port
                .parse()
                .map_err(|_| Error::InvalidUrl(format!("bad port in {rest}")))?;
        } else {
            out.host = host.to_string();
            out.port = match scheme {
                "https" => 443,
                _ => 80,
            };
        }
        Url::split_path(&mut out, &path);
        Ok(out)
    }

    /// Splits `#fragment` then `?search` off `path` and stores all three.
    fn split_path(out: &mut Url, path: &str) {
        let mut path = path.to_string();
        if let Some((rest, frag)) = path.split_once('#') {
            out.fragment = frag.to_string();
            path = rest.to_string();
        }
        if let Some((rest, search)) = path.split_once('?') {
            out.search = search.to_string();
            path = rest.to_string();
        }
        out.path = path;
    }

    /// `host:port` or `host:port/...` with a numeric port and no scheme.
    fn looks_like_hostport(url: &str) -> bool {
        let head = url.split(['/', '?', '#']).next().unwrap_or("");
        match head.split_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        }
    }

    /// Canonical string form. Default ports are omitted; `view-source:` is
    /// restored when the flag is set.
    pub fn get_str(&self) -> String {
        let prefix = if self.viewsource { "view-source:" } else { "" };
        match self.scheme.as_str() {
            "about" => format!("{prefix}about:{}", self.path),
            "data" => format!("{prefix}data:{},{}", self.mimetype, self.content),
            "file" => format!("{prefix}file://{}", self.path),
            _ => {
                let default_port = match self.scheme.as_str() {
                    "https" => 443,
                    _ => 80,
                };
                let mut s = format!("{prefix}{}://{}", self.scheme, self.host);
                if self.port != default_port {
                    s.push_str(&format!(":{}", self.port));
                }
                s.push_str(&self.path);
                if !self.search.is_empty() {
                    s.push('?');
                    s.push_str(&self.search);
                }
                if !self.fragment.is_empty() {
                    s.push('#');
                    s.push_str(&self.fragment);
                }
                s
            }
        }
    }

    /// `scheme://host:port`, the security principal for CSP and XHR checks.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Key under which a response for this URL is cached.
    pub fn cache_key(&self) -> String {
        let mut key = format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path);
        if !self.search.is_empty() {
            key.push('?');
            key.push_str(&self.search);
        }
        key
    }

    /// Resolves a link found on this page.
    pub fn resolve(&self, link: &str) -> Result<Url> {
        Url::new(link, Some(self))
    }

    /// Request target: `path?search`.
    pub fn request_path(&self) -> String {
        if self.search.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.search)
        }
    }
}
