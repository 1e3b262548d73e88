use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cookies::CookieJar;
use crate::http::now_seconds;
use crate::state::WindowState;

const APP_DIR: &str = "skiff";

/// Where profile state lives: nowhere (private mode), one custom
/// directory, or the XDG-style per-user directories.
#[derive(Debug, Clone)]
pub enum ProfileMode {
    Private,
    Custom(PathBuf),
    User,
}

/// JSON-backed profile stores. Every load tolerates missing or corrupt
/// files (fresh state, warning logged); every save logs and continues on
/// failure. Nothing here is fatal to navigation.
pub struct Profile {
    state_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn xdg_dir(var: &str, home_suffix: &str) -> Option<PathBuf> {
    match env::var_os(var) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir).join(APP_DIR)),
        _ => home_dir().map(|h| h.join(home_suffix).join(APP_DIR)),
    }
}

impl Profile {
    pub fn new(mode: ProfileMode) -> Profile {
        match mode {
            ProfileMode::Private => Profile { state_dir: None, data_dir: None, cache_dir: None },
            ProfileMode::Custom(dir) => Profile {
                state_dir: Some(dir.clone()),
                data_dir: Some(dir.clone()),
                cache_dir: Some(dir),
            },
            ProfileMode::User => Profile {
                state_dir: xdg_dir("XDG_STATE_HOME", ".local/state"),
                data_dir: xdg_dir("XDG_DATA_HOME", ".local/share"),
                cache_dir: xdg_dir("XDG_CACHE_HOME", ".cache"),
            },
        }
    }

    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone()
    }

    pub fn load_state(&self) -> Option<WindowState> {
        read_json(self.state_dir.as_ref()?.join("__state.json"))
    }

    pub fn save_state(&self, state: &WindowState) {
        if let Some(dir) = &self.state_dir {
            write_json(dir.join("__state.json"), state);
        }
    }

    pub fn load_history(&self) -> History {
        let entries = self
            .data_dir
            .as_ref()
            .and_then(|d| read_json::<HistoryFile>(d.join("__history.json")))
            .map(|f| f.history)
            .unwrap_or_default();
        History { entries, dirty: false }
    }

    pub fn save_history(&self, history: &mut History) {
        if !history.dirty {
            return;
        }
        if let Some(dir) = &self.data_dir {
            write_json(
                dir.join("__history.json"),
                &HistoryFile { history: history.entries.clone() },
            );
        }
        history.dirty = false;
    }

    pub fn load_bookmarks(&self) -> Bookmarks {
        let entries = self
            .data_dir
            .as_ref()
            .and_then(|d| read_json::<BookmarksFile>(d.join("__bookmarks.json")))
            .map(|f| f.bookmarks)
            .unwrap_or_default();
        Bookmarks { entries, dirty: false }
    }

    pub fn save_bookmarks(&self, bookmarks: &mut Bookmarks) {
        if !bookmarks.dirty {
            return;
        }
        if let Some(dir) = &self.data_dir {
            write_json(
                dir.join("__bookmarks.json"),
                &BookmarksFile { bookmarks: bookmarks.entries.clone() },
            );
        }
        bookmarks.dirty = false;
    }

    pub fn load_cookies(&self) -> CookieJar {
        self.data_dir
            .as_ref()
            .and_then(|d| read_json(d.join("__cookies.json")))
            .unwrap_or_default()
    }

    pub fn save_cookies(&self, jar: &CookieJar) {
        if let Some(dir) = &self.data_dir {
            if !jar.is_empty() {
                write_json(dir.join("__cookies.json"), jar);
            }
        }
    }
}

fn read_json<T: DeserializeOwned>(path: PathBuf) -> Option<T> {
    if !path.is_file() {
        return None;
    }
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            warn!("failed to read {}: {e}", path.display());
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("malformed profile file {}: {e}", path.display());
            None
        }
    }
}

fn write_json<T: Serialize>(path: PathBuf, value: &T) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("failed to create {}: {e}", parent.display());
            return;
        }
    }
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            if let Err(e) = fs::write(&path, json) {
                warn!("failed to write {}: {e}", path.display());
            }
        }
        Err(e) => warn!("failed to serialize {}: {e}", path.display()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub url: String,
    pub time: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

/// Global visit history, also used to annotate `:visited` links.
pub struct History {
    entries: Vec<HistoryEntry>,
    dirty: bool,
}

impl History {
    pub fn contains(&self, url: &str) -> bool {
        self.entries.iter().any(|e| e.url == url)
    }

    pub fn record(&mut self, url: &str) {
        self.entries.push(HistoryEntry { url: url.to_string(), time: now_seconds() });
        self.dirty = true;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BookmarksFile {
    #[serde(default)]
    bookmarks: HashMap<String, Bookmark>,
}

pub struct Bookmarks {
    entries: HashMap<String, Bookmark>,
    dirty: bool,
}

impl Bookmarks {
    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Adds the bookmark, or removes it when already present.
    pub fn toggle(&mut self, url: &str, title: &str) {
        if self.entries.remove(url).is_none() {
            self.entries.insert(
                url.to_string(),
                Bookmark { url: url.to_string(), title: title.to_string() },
            );
        }
        self.dirty = true;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bookmark> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_profile() -> (Profile, PathBuf) {
        let dir = env::temp_dir().join(format!("skiff-profile-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        (Profile::new(ProfileMode::Custom(dir.clone())), dir)
    }

    #[test]
    fn private_profile_touches_no_disk() {
        let profile = Profile::new(ProfileMode::Private);
        assert!(profile.load_state().is_none());
        assert!(profile.cache_dir().is_none());
        let mut state = WindowState::default();
        state.newtab("http://a/");
        profile.save_state(&state); // must not panic, must not write
    }

    #[test]
    fn state_round_trip() {
        let (profile, dir) = temp_profile();
        let mut state = WindowState::default();
        state.newtab("http://example.org/");
        state.set_size(1024.0, 768.0);
        profile.save_state(&state);
        let loaded = profile.load_state().unwrap();
        assert_eq!(loaded.tabs.len(), 1);
        assert_eq!(loaded.tabs[0].url, "http://example.org/");
        assert_eq!(loaded.width, Some(1024.0));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn cookies_round_trip() {
        let (profile, dir) = temp_profile();
        let mut jar = CookieJar::new();
        jar.set_cookie_by_host("h", "a=1; HttpOnly", false);
        profile.save_cookies(&jar);
        let loaded = profile.load_cookies();
        assert_eq!(loaded.get_cookie_value_by_host("h", false), "a=1");
        assert_eq!(loaded.get_cookie_value_by_host("h", true), "");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn bookmarks_toggle_and_round_trip() {
        let (profile, dir) = temp_profile();
        let mut bookmarks = profile.load_bookmarks();
        bookmarks.toggle("http://a/", "A");
        profile.save_bookmarks(&mut bookmarks);
        let loaded = profile.load_bookmarks();
        assert!(loaded.contains("http://a/"));
        let mut loaded = loaded;
        loaded.toggle("http://a/", "A");
        assert!(!loaded.contains("http://a/"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn history_records_and_checks() {
        let (profile, dir) = temp_profile();
        let mut history = profile.load_history();
        assert!(!history.contains("http://a/"));
        history.record("http://a/");
        assert!(history.contains("http://a/"));
        profile.save_history(&mut history);
        let loaded = profile.load_history();
        assert!(loaded.contains("http://a/"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn corrupt_files_tolerated() {
        let (profile, dir) = temp_profile();
        fs::write(dir.join("__state.json"), "{broken").unwrap();
        fs::write(dir.join("__cookies.json"), "[]").unwrap();
        assert!(profile.load_state().is_none());
        let _ = profile.load_cookies();
        fs::remove_dir_all(dir).unwrap();
    }
}
