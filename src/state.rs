use serde::{Deserialize, Serialize};

fn is_zero(v: &f32) -> bool {
    *v == 0.0
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

/// A point in a tab's history: enough to re-issue the navigation (method
/// and payload included so form POSTs can be replayed after confirmation).
/// Default-valued fields are elided from the persisted form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub scroll: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// Navigation state of one tab. The back and forward stacks are disjoint
/// by construction: pushing a location always clears the forward stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TabState {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub scroll: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<LocationSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub future: Vec<LocationSnapshot>,
    /// "yes", "no" or "" (not applicable).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secure: String,
}

impl TabState {
    pub fn new(url: &str) -> Self {
        TabState { url: url.to_string(), ..Default::default() }
    }

    fn snapshot(&self) -> LocationSnapshot {
        LocationSnapshot {
            url: self.url.clone(),
            title: self.title.clone(),
            scroll: self.scroll,
            payload: self.payload.clone(),
            method: self.method.clone(),
        }
    }

    fn restore(&mut self, snap: LocationSnapshot) {
        self.url = snap.url;
        self.title = snap.title;
        self.scroll = snap.scroll;
        self.payload = snap.payload;
        self.method = snap.method;
    }

    pub fn pushlocation(&mut self, url: &str, payload: Option<String>, method: Option<String>) {
        self.history.push(self.snapshot());
        self.future.clear();
        self.url = url.to_string();
        self.payload = payload;
        self.method = method;
        self.scroll = 0.0;
        self.title.clear();
    }

    /// Like `pushlocation` but without touching the stacks; a no-op when
    /// the url is unchanged.
    pub fn replacelocation(&mut self, url: &str, payload: Option<String>, method: Option<String>) {
        if self.url == url {
            return;
        }
        self.url = url.to_string();
        self.payload = payload;
        self.method = method;
    }

    pub fn back(&mut self) -> bool {
        match self.history.pop() {
            Some(snap) => {
                self.future.push(self.snapshot());
                self.restore(snap);
                true
            }
            None => false,
        }
    }

    pub fn forward(&mut self) -> bool {
        match self.future.pop() {
            Some(snap) => {
                self.history.push(self.snapshot());
                self.restore(snap);
                true
            }
            None => false,
        }
    }
}

/// Whole-window navigation state: the tab list, the active index, and the
/// last known window size. Persisted as `__state.json`. Every mutation
/// raises the dirty bit; persistence runs only when it is set.
#[derive(Debug, Serialize, Deserialize)]
pub struct WindowState {
    #[serde(default)]
    pub tabs: Vec<TabState>,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub active_tab_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(skip)]
    dirty: bool,
}

impl Default for WindowState {
    fn default() -> Self {
        WindowState {
            tabs: Vec::new(),
            active_tab_index: 0,
            width: None,
            height: None,
            dirty: false,
        }
    }
}

impl WindowState {
    pub fn newtab(&mut self, url: &str) {
        self.tabs.push(TabState::new(url));
        self.active_tab_index = self.tabs.len() - 1;
        self.dirty = true;
    }

    pub fn active_tab(&self) -> Option<&TabState> {
        self.tabs.get(self.active_tab_index)
    }

    /// Mutable access to the active tab; raises the dirty bit.
    pub fn active_tab_mut(&mut self) -> Option<&mut TabState> {
        self.dirty = true;
        self.tabs.get_mut(self.active_tab_index)
    }

    pub fn set_scroll(&mut self, pos: f32) {
        if let Some(tab) = self.tabs.get_mut(self.active_tab_index) {
            if tab.scroll != pos {
                tab.scroll = pos;
                self.dirty = true;
            }
        }
    }

    pub fn closetabindex(&mut self, i: usize) {
        if i >= self.tabs.len() {
            return;
        }
        self.tabs.remove(i);
        if i <= self.active_tab_index && self.active_tab_index > 0 {
            self.active_tab_index -= 1;
        }
        if !self.tabs.is_empty() {
            self.active_tab_index = self.active_tab_index.min(self.tabs.len() - 1);
        } else {
            self.active_tab_index = 0;
        }
        self.dirty = true;
    }

    /// Switches the active tab: relative offsets wrap modulo the tab
    /// count, absolute indices clamp.
    pub fn switchtab(&mut self, i: isize, relative: bool) {
        if self.tabs.is_empty() {
            return;
        }
        let count = self.tabs.len() as isize;
        self.active_tab_index = if relative {
            (self.active_tab_index as isize + i).rem_euclid(count) as usize
        } else {
            i.clamp(0, count - 1) as usize
        };
        self.dirty = true;
    }

    pub fn set_size(&mut self, width: f32, height: f32) {
        if self.width != Some(width) || self.height != Some(height) {
            self.width = Some(width);
            self.height = Some(height);
            self.dirty = true;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns and clears the dirty bit.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_back_forward() {
        let mut tab = TabState::new("http://a/");
        tab.pushlocation("http://b/", None, None);
        assert_eq!(tab.url, "http://b/");
        assert_eq!(tab.history.len(), 1);
        assert!(tab.future.is_empty());

        assert!(tab.back());
        assert_eq!(tab.url, "http://a/");
        assert!(tab.history.is_empty());
        assert_eq!(tab.future.len(), 1);
        assert_eq!(tab.future[0].url, "http://b/");

        // A new push clears the forward stack.
        tab.pushlocation("http://c/", None, None);
        assert!(tab.future.is_empty());
        assert_eq!(tab.history.len(), 1);

        assert!(!tab.forward());
    }

    #[test]
    fn back_and_forward_replay_method_and_payload() {
        let mut tab = TabState::new("http://a/");
        tab.pushlocation("http://b/submit", Some("x=1".into()), Some("POST".into()));
        assert!(tab.back());
        assert!(tab.forward());
        assert_eq!(tab.url, "http://b/submit");
        assert_eq!(tab.payload.as_deref(), Some("x=1"));
        assert_eq!(tab.method.as_deref(), Some("POST"));
    }

    #[test]
    fn replacelocation_skips_stacks() {
        let mut tab = TabState::new("http://a/");
        tab.replacelocation("http://b/", None, None);
        assert_eq!(tab.url, "http://b/");
        assert!(tab.history.is_empty());
        tab.replacelocation("http://b/", Some("ignored".into()), None);
        assert!(tab.payload.is_none());
    }

    #[test]
    fn close_tab_adjusts_active() {
        let mut w = WindowState::default();
        w.newtab("a");
        w.newtab("b");
        w.newtab("c");
        assert_eq!(w.active_tab_index, 2);
        w.closetabindex(0);
        assert_eq!(w.active_tab_index, 1);
        assert_eq!(w.active_tab().unwrap().url, "c");
        w.closetabindex(1);
        assert_eq!(w.active_tab_index, 0);
        w.closetabindex(0);
        assert!(w.tabs.is_empty());
        assert_eq!(w.active_tab_index, 0);
    }

    #[test]
    fn switch_tab_wraps_and_clamps() {
        let mut w = WindowState::default();
        w.newtab("a");
        w.newtab("b");
        w.newtab("c");
        w.switchtab(1, true);
        assert_eq!(w.active_tab_index, 0);
        w.switchtab(-1, true);
        assert_eq!(w.active_tab_index, 2);
        w.switchtab(99, false);
        assert_eq!(w.active_tab_index, 2);
        w.switchtab(-5, false);
        assert_eq!(w.active_tab_index, 0);
    }

    #[test]
    fn dirty_bit() {
        let mut w = WindowState::default();
        assert!(!w.take_dirty());
        w.newtab("a");
        assert!(w.take_dirty());
        assert!(!w.take_dirty());
        w.set_scroll(10.0);
        assert!(w.take_dirty());
        w.set_scroll(10.0);
        assert!(!w.take_dirty());
    }

    #[test]
    fn snapshot_elides_defaults() {
        let mut tab = TabState::new("http://a/");
        tab.pushlocation("http://b/", None, None);
        let json = serde_json::to_string(&tab).unwrap();
        assert!(json.contains("history"));
        assert!(!json.contains("payload"));
        assert!(!json.contains("scroll"));
        assert!(!json.contains("future"));
    }
}
