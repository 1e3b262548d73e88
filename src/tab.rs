use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use lazy_static::lazy_static;
use log::{error, info, warn};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::css_parser::{CssParser, Rule};
use crate::display::DrawCommand;
use crate::errors::Error;
use crate::html_parser::{parse_source, HtmlParser};
use crate::http::{Engine, RequestOptions};
use crate::layout::{find_fragment_y, layout_document, paint_tree, LayoutRef, VSTEP};
use crate::node::{tree_text, tree_to_vec, NodeRef};
use crate::profile::{Bookmarks, History};
use crate::script::{Page, ScriptRuntime};
use crate::state::TabState;
use crate::style::{sort_rules, style};
use crate::url::Url;

lazy_static! {
    static ref DEFAULT_STYLE_SHEET: Vec<Rule> =
        CssParser::new(include_str!("../assets/browser.css")).parse();
}

/// What the browser shell must do after routing a click into the tab.
#[derive(Debug, PartialEq)]
pub enum ClickOutcome {
    None,
    /// Middle-click on a link: open this URL in a new tab.
    NewTab(String),
}

/// The live runtime of one tab: DOM, stylesheet, layout and display list,
/// plus the script bridge. Navigation state (`TabState`) is owned by the
/// window and passed into every method that can change it.
pub struct Tab {
    engine: Rc<RefCell<Engine>>,
    history: Rc<RefCell<History>>,
    bookmarks: Rc<RefCell<Bookmarks>>,
    page: Rc<RefCell<Page>>,
    js: Option<ScriptRuntime>,
    js_enabled: bool,
    rtl: bool,
    /// None in headless (CLI/test) mode: no layout, no paint.
    ctx: Option<egui::Context>,
    pub width: f32,
    pub display_list: Vec<DrawCommand>,
    pub document: Option<LayoutRef>,
    focused: Option<NodeRef>,
    pub loaded: bool,
    /// Bumped by every `load`; lets event processing notice that a script
    /// navigated mid-flight.
    load_seq: u64,
}

impl Tab {
    pub fn new(
        engine: Rc<RefCell<Engine>>,
        history: Rc<RefCell<History>>,
        bookmarks: Rc<RefCell<Bookmarks>>,
        ctx: Option<egui::Context>,
        js_enabled: bool,
        rtl: bool,
    ) -> Tab {
        Tab {
            engine,
            history,
            bookmarks,
            page: Rc::new(RefCell::new(Page::new())),
            js: None,
            js_enabled,
            rtl,
            ctx,
            width: 800.0,
            display_list: Vec::new(),
            document: None,
            focused: None,
            loaded: false,
            load_seq: 0,
        }
    }

    /// Loads `url` into the tab: request, parse, sub-resources, scripts,
    /// render, fragment scroll, `load` event. Never panics the window; all
    /// failures materialize an error page.
    pub fn load(
        &mut self,
        state: &mut TabState,
        url: &str,
        read_cache: bool,
        payload: Option<String>,
        referrer: Option<Url>,
        method: Option<String>,
    ) {
        state.title.clear();
        self.display_list.clear();
        self.document = None;
        self.focused = None;
        self.loaded = true;
        self.load_seq = self.load_seq.wrapping_add(1);

        let url = match Url::new(url, None) {
            Ok(url) => url,
            Err(e) => {
                warn!("failed to parse url {url:?}: {e}");
                Url::new("about:blank", None).expect("about:blank parses")
            }
        };
        info!("navigating to {}", url.get_str());

        let (body, headers, final_url) = if url.scheme == "about" {
            state.secure = String::new();
            (self.about_body(&url.path), HashMap::new(), url.clone())
        } else {
            let opts = RequestOptions {
                max_redirect: 5,
                read_cache,
                payload,
                cookies: true,
                referrer,
                method,
            };
            match self.engine.borrow_mut().request(&url, &opts) {
                Ok(response) => {
                    state.secure = if response.url.scheme == "https" {
                        "yes".to_string()
                    } else {
                        String::new()
                    };
                    let final_url = response.url.clone();
                    (response.body, response.headers, final_url)
                }
                Err(e) => {
                    state.secure = match &e {
                        Error::Tls(_) => "no".to_string(),
                        _ => String::new(),
                    };
                    error!("navigation failed: {e}");
                    (error_page(&e), HashMap::new(), url.clone())
                }
            }
        };

        let mut final_url = final_url;
        final_url.viewsource = url.viewsource;
        state.url = final_url.get_str();
        self.history.borrow_mut().record(&final_url.get_str());

        let root = if final_url.viewsource {
            parse_source(&body)
        } else {
            HtmlParser::parse(&body)
        };

        {
            let mut page = self.page.borrow_mut();
            page.reset(final_url.clone());
            page.root = Some(root.clone());
            page.allowed_origins = parse_csp(&headers);
            page.rules = DEFAULT_STYLE_SHEET.clone();
        }

        self.js = if self.js_enabled {
            match ScriptRuntime::new(self.page.clone(), self.engine.clone()) {
                Ok(runtime) => Some(runtime),
                Err(e) => {
                    error!("script runtime unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        // One walk over the document: visited links, titles, stylesheets,
        // scripts. A script that navigates aborts the rest of the walk.
        let mut all = Vec::new();
        tree_to_vec(&root, &mut all);
        for node in &all {
            let tag = match node.borrow().tag() {
                Some(tag) => tag.to_string(),
                None => continue,
            };
            match tag.as_str() {
                "a" => {
                    let href = node.borrow().get_attribute("href");
                    if let Some(href) = href {
                        if let Ok(resolved) = final_url.resolve(&href) {
                            if self.history.borrow().contains(&resolved.get_str()) {
                                node.borrow_mut().set_visited(true);
                            }
                        }
                    }
                }
                "link" => {
                    let rel = node.borrow().get_attribute("rel").unwrap_or_default();
                    let href = node.borrow().get_attribute("href");
                    if rel == "stylesheet" {
                        if let Some(href) = href {
                            self.load_stylesheet(&final_url, &href);
                        }
                    }
                }
                "style" => {
                    let css = tree_text(node);
                    let mut rules = CssParser::new(&css).parse();
                    self.page.borrow_mut().rules.append(&mut rules);
                }
                "title" => {
                    let title = tree_text(node).trim().to_string();
                    state.title = title.clone();
                    self.page.borrow_mut().title = title;
                }
                "script" => {
                    // Ids parsed so far must already be visible as script
                    // globals when this script runs.
                    self.publish_globals();
                    if self.run_script(&final_url, node) && self.flush_script_effects(state) {
                        return;
                    }
                }
                _ => {}
            }
        }

        self.publish_globals();
        state.title = self.page.borrow().title.clone();
        self.render();

        if !final_url.fragment.is_empty() {
            if let (Some(doc), Some(root)) = (&self.document, &self.page.borrow().root) {
                if let Some(y) = find_fragment_y(doc, root, &final_url.fragment) {
                    state.scroll = y;
                }
            }
        }

        self.dispatch_to_body(state, "load");
    }

    fn about_body(&self, path: &str) -> String {
        match path {
            "blank" => String::new(),
            "bookmarks" => {
                let bookmarks = self.bookmarks.borrow();
                let mut items = String::new();
                for bookmark in bookmarks.iter() {
                    let title = if bookmark.title.is_empty() {
                        &bookmark.url
                    } else {
                        &bookmark.title
                    };
                    items.push_str(&format!(
                        "<li><a href=\"{}\">{}</a></li>",
                        bookmark.url, title
                    ));
                }
                format!(
                    "<html><head><title>Bookmarks</title></head>\
                     <body><h1>Bookmarks</h1><ul>{items}</ul></body></html>"
                )
            }
            _ => "<html><body><h1>page not found</h1></body></html>".to_string(),
        }
    }

    fn load_stylesheet(&mut self, base: &Url, href: &str) {
        let resolved = match base.resolve(href) {
            Ok(url) => url,
            Err(e) => {
                warn!("bad stylesheet url {href:?}: {e}");
                return;
            }
        };
        if !self.page.borrow().csp_allows(&resolved) {
            return;
        }
        let opts = RequestOptions { referrer: Some(base.clone()), ..Default::default() };
        match self.engine.borrow_mut().request(&resolved, &opts) {
            Ok(response) => {
                let mut rules = CssParser::new(&response.body).parse();
                self.page.borrow_mut().rules.append(&mut rules);
            }
            Err(e) => warn!("stylesheet {} failed: {e}", resolved.get_str()),
        }
    }

    /// Runs an inline or external script. Returns true when anything was
    /// actually executed.
    fn run_script(&mut self, base: &Url, node: &NodeRef) -> bool {
        let Some(js) = &self.js else { return false };
        let src = node.borrow().get_attribute("src");
        let (name, source) = match src {
            Some(src) => {
                let resolved = match base.resolve(&src) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("bad script url {src:?}: {e}");
                        return false;
                    }
                };
                if !self.page.borrow().csp_allows(&resolved) {
                    return false;
                }
                let opts = RequestOptions { referrer: Some(base.clone()), ..Default::default() };
                let body = match self.engine.borrow_mut().request(&resolved, &opts) {
                    Ok(response) => response.body,
                    Err(e) => {
                        warn!("script {} failed: {e}", resolved.get_str());
                        return false;
                    }
                };
                (resolved.get_str(), body)
            }
            None => ("inline".to_string(), tree_text(node)),
        };
        if source.trim().is_empty() {
            return false;
        }
        js.run(&name, &source);
        true
    }

    fn publish_globals(&mut self) {
        let globals = self.page.borrow_mut().collect_id_globals();
        if let Some(js) = &self.js {
            for (name, handle) in globals {
                js.publish_global(&name, handle);
            }
        }
        self.page.borrow_mut().globals_stale = false;
    }

    /// Applies everything scripts queued during an evaluation: appended
    /// sub-resources, stylesheet rebuilds, global republish, requested
    /// default actions and navigation. Returns true when the page
    /// navigated away (callers must abort their walk).
    fn flush_script_effects(&mut self, state: &mut TabState) -> bool {
        let seq = self.load_seq;
        loop {
            let pending = {
                let mut page = self.page.borrow_mut();
                std::mem::take(&mut page.pending_loads)
            };
            if pending.is_empty() {
                break;
            }
            let base = self.page.borrow().url.clone();
            for node in pending {
                self.load_node(&base, &node);
            }
        }

        if std::mem::take(&mut self.page.borrow_mut().styles_stale) {
            self.rebuild_rules();
        }
        if self.page.borrow().globals_stale {
            self.publish_globals();
        }

        let defaults = std::mem::take(&mut self.page.borrow_mut().pending_defaults);
        for (handle, event_type) in defaults {
            let node = self.page.borrow().node_for(handle);
            if let Some(node) = node {
                if event_type == "click" {
                    self.default_click(state, &node, 1);
                }
            }
        }

        state.title = self.page.borrow().title.clone();

        // A default action above may already have navigated this tab.
        if self.load_seq != seq {
            return true;
        }

        let pending = self.page.borrow_mut().pending_location.take();
        if let Some(target) = pending {
            let resolved = {
                let page = self.page.borrow();
                page.url
                    .resolve(&target)
                    .map(|u| u.get_str())
                    .unwrap_or(target)
            };
            state.pushlocation(&resolved, None, None);
            self.load(state, &resolved, true, None, None, None);
            return true;
        }
        false
    }

    /// Script-appended `<link>`/`<style>`/`<script>` nodes get the same
    /// treatment the load-time walk gives them.
    fn load_node(&mut self, base: &Url, node: &NodeRef) {
        let tag = node.borrow().tag().map(str::to_string);
        match tag.as_deref() {
            Some("script") => {
                self.run_script(base, node);
            }
            Some("style") => {
                let css = tree_text(node);
                let mut rules = CssParser::new(&css).parse();
                self.page.borrow_mut().rules.append(&mut rules);
                self.page.borrow_mut().needs_render = true;
            }
            Some("link") => {
                let rel = node.borrow().get_attribute("rel").unwrap_or_default();
                if rel == "stylesheet" {
                    if let Some(href) = node.borrow().get_attribute("href") {
                        self.load_stylesheet(base, &href);
                        self.page.borrow_mut().needs_render = true;
                    }
                }
            }
            _ => {}
        }
    }

    /// Rebuilds the cascade from the built-in sheet plus every `<style>`
    /// and `<link rel=stylesheet>` still in the document (after a script
    /// removed one).
    fn rebuild_rules(&mut self) {
        let (root, base) = {
            let page = self.page.borrow();
            (page.root.clone(), page.url.clone())
        };
        self.page.borrow_mut().rules = DEFAULT_STYLE_SHEET.clone();
        let Some(root) = root else { return };
        let mut all = Vec::new();
        tree_to_vec(&root, &mut all);
        for node in &all {
            let tag = node.borrow().tag().map(str::to_string);
            match tag.as_deref() {
                Some("style") => {
                    let css = tree_text(node);
                    let mut rules = CssParser::new(&css).parse();
                    self.page.borrow_mut().rules.append(&mut rules);
                }
                Some("link") => {
                    let rel = node.borrow().get_attribute("rel").unwrap_or_default();
                    if rel == "stylesheet" {
                        if let Some(href) = node.borrow().get_attribute("href") {
                            self.load_stylesheet(&base, &href);
                        }
                    }
                }
                _ => {}
            }
        }
        self.page.borrow_mut().needs_render = true;
    }

    /// Style + layout + paint. A no-op in headless mode.
    pub fn render(&mut self) {
        let Some(ctx) = self.ctx.clone() else {
            self.page.borrow_mut().needs_render = false;
            return;
        };
        let (root, mut rules) = {
            let page = self.page.borrow();
            match &page.root {
                Some(root) => (root.clone(), page.rules.clone()),
                None => return,
            }
        };
        sort_rules(&mut rules);
        style(&root, &rules);
        let doc = layout_document(&ctx, &root, self.width, self.rtl);
        self.display_list.clear();
        paint_tree(&doc, &mut self.display_list);
        self.document = Some(doc);
        self.page.borrow_mut().needs_render = false;
    }

    pub fn render_if_needed(&mut self) {
        if self.page.borrow().needs_render {
            self.render();
        }
    }

    /// Total page height for scroll clamping.
    pub fn content_height(&self) -> f32 {
        self.document
            .as_ref()
            .map(|d| d.borrow().height + 2.0 * VSTEP)
            .unwrap_or(0.0)
    }

    /// Plain text of the page (CLI mode).
    pub fn text_content(&self) -> String {
        match &self.page.borrow().root {
            Some(root) => tree_text(root),
            None => String::new(),
        }
    }

    pub fn title(&self) -> String {
        self.page.borrow().title.clone()
    }

    /// Routes a click at page coordinates (`y` already includes scroll).
    /// Hit-tests the display list back to front, then walks ancestors for
    /// something clickable. The bridge sees the event first and may
    /// prevent the default.
    pub fn click(&mut self, state: &mut TabState, x: f32, y: f32, button: u8) -> ClickOutcome {
        let hit = self
            .display_list
            .iter()
            .rev()
            .find(|cmd| cmd.node.is_some() && cmd.rect.contains(x, y))
            .and_then(|cmd| cmd.node.clone());
        let Some(hit) = hit else {
            self.unfocus();
            return ClickOutcome::None;
        };

        let mut current = Some(hit);
        while let Some(node) = current {
            let tag = node.borrow().tag().map(str::to_string);
            match tag.as_deref() {
                Some("a") if node.borrow().get_attribute("href").is_some() => {
                    if self.dispatch_event(state, "click", &node) {
                        return ClickOutcome::None;
                    }
                    return self.default_click(state, &node, button);
                }
                Some("input") => {
                    if self.dispatch_event(state, "click", &node) {
                        return ClickOutcome::None;
                    }
                    self.focus_input(&node);
                    return ClickOutcome::None;
                }
                Some("button") => {
                    if self.dispatch_event(state, "click", &node) {
                        return ClickOutcome::None;
                    }
                    return self.default_click(state, &node, button);
                }
                _ => {}
            }
            current = node.borrow().parent.upgrade();
        }
        self.unfocus();
        ClickOutcome::None
    }

    /// The default action of a click on `node`: follow links (button 1
    /// pushes, button 2 opens a tab), submit forms for buttons.
    fn default_click(&mut self, state: &mut TabState, node: &NodeRef, button: u8) -> ClickOutcome {
        let tag = node.borrow().tag().map(str::to_string);
        match tag.as_deref() {
            Some("a") => {
                let Some(href) = node.borrow().get_attribute("href") else {
                    return ClickOutcome::None;
                };
                let resolved = {
                    let page = self.page.borrow();
                    page.url.resolve(&href)
                };
                let Ok(resolved) = resolved else { return ClickOutcome::None };
                match button {
                    1 => {
                        state.pushlocation(&resolved.get_str(), None, None);
                        self.load(state, &resolved.get_str(), true, None, None, None);
                        ClickOutcome::None
                    }
                    2 => ClickOutcome::NewTab(resolved.get_str()),
                    _ => ClickOutcome::None,
                }
            }
            Some("input") => {
                self.focus_input(node);
                ClickOutcome::None
            }
            Some("button") => {
                // Walk up to the owning form.
                let mut current = Some(node.clone());
                while let Some(n) = current {
                    if n.borrow().tag() == Some("form")
                        && n.borrow().get_attribute("action").is_some()
                    {
                        self.submit_form(state, &n);
                        return ClickOutcome::None;
                    }
                    current = n.borrow().parent.upgrade();
                }
                ClickOutcome::None
            }
            _ => ClickOutcome::None,
        }
    }

    fn focus_input(&mut self, node: &NodeRef) {
        self.unfocus();
        let input_type = node.borrow().get_attribute("type").unwrap_or_default();
        if input_type == "checkbox" {
            let checked = node.borrow().is_checked();
            node.borrow_mut().set_checked(!checked);
        } else {
            let len = node
                .borrow()
                .get_attribute("value")
                .map(|v| v.chars().count())
                .unwrap_or(0);
            node.borrow_mut().set_caret(len);
        }
        node.borrow_mut().set_focused(true);
        self.focused = Some(node.clone());
        self.page.borrow_mut().needs_render = true;
    }

    fn unfocus(&mut self) {
        if let Some(old) = self.focused.take() {
            old.borrow_mut().set_focused(false);
            self.page.borrow_mut().needs_render = true;
        }
    }

    /// Form submission: named inputs, URL-encoded; GET folds the body into
    /// the query string, POST records method and payload for replay.
    fn submit_form(&mut self, state: &mut TabState, form: &NodeRef) {
        if self.dispatch_event(state, "submit", form) {
            return;
        }
        let body = collect_form_body(form);
        let action = form.borrow().get_attribute("action").unwrap_or_default();
        let method = form
            .borrow()
            .get_attribute("method")
            .unwrap_or_default()
            .to_lowercase();
        let resolved = {
            let page = self.page.borrow();
            page.url.resolve(&action)
        };
        let Ok(mut resolved) = resolved else { return };
        if method == "get" {
            resolved.search = body;
            let target = resolved.get_str();
            state.pushlocation(&target, None, None);
            self.load(state, &target, true, None, None, None);
        } else {
            let target = resolved.get_str();
            state.pushlocation(&target, Some(body.clone()), Some("POST".to_string()));
            self.load(state, &target, true, Some(body), None, Some("POST".to_string()));
        }
    }

    /// A printable key: the focused input consumes it (after a `keydown`
    /// dispatch). Returns false when nothing consumed the key.
    pub fn keypress(&mut self, state: &mut TabState, ch: char) -> bool {
        let Some(node) = self.focused.clone() else { return false };
        if self.dispatch_event(state, "keydown", &node) {
            return true;
        }
        let mut value = node.borrow().get_attribute("value").unwrap_or_default();
        let caret = node.borrow().caret().min(value.chars().count());
        let byte = char_to_byte(&value, caret);
        value.insert(byte, ch);
        node.borrow_mut().set_attribute("value", &value);
        node.borrow_mut().set_caret(caret + 1);
        self.page.borrow_mut().needs_render = true;
        true
    }

    /// Backspace: edits the focused input, or reports unconsumed so the
    /// shell can navigate back.
    pub fn backspace(&mut self, state: &mut TabState) -> bool {
        let Some(node) = self.focused.clone() else { return false };
        if self.dispatch_event(state, "keydown", &node) {
            return true;
        }
        let mut value = node.borrow().get_attribute("value").unwrap_or_default();
        let caret = node.borrow().caret().min(value.chars().count());
        if caret == 0 {
            return true;
        }
        let start = char_to_byte(&value, caret - 1);
        let end = char_to_byte(&value, caret);
        value.replace_range(start..end, "");
        node.borrow_mut().set_attribute("value", &value);
        node.borrow_mut().set_caret(caret - 1);
        self.page.borrow_mut().needs_render = true;
        true
    }

    /// Arrow keys move the caret in the focused input.
    pub fn move_caret(&mut self, delta: i32) {
        let Some(node) = self.focused.clone() else { return };
        let len = node
            .borrow()
            .get_attribute("value")
            .map(|v| v.chars().count())
            .unwrap_or(0);
        let caret = node.borrow().caret() as i32 + delta;
        node.borrow_mut().set_caret(caret.clamp(0, len as i32) as usize);
        self.page.borrow_mut().needs_render = true;
    }

    /// Dispatches an event through the bridge; returns true when script
    /// prevented the default action or navigated the tab away. Script side
    /// effects are flushed before returning.
    fn dispatch_event(&mut self, state: &mut TabState, event_type: &str, node: &NodeRef) -> bool {
        let Some(js) = &self.js else { return false };
        let handle = self.page.borrow_mut().handle_for(node);
        let prevented = js.dispatch_event(event_type, handle);
        let navigated = self.flush_script_effects(state);
        prevented || navigated
    }

    fn dispatch_to_body(&mut self, state: &mut TabState, event_type: &str) {
        let body = {
            let page = self.page.borrow();
            let Some(root) = &page.root else { return };
            let mut all = Vec::new();
            tree_to_vec(root, &mut all);
            all.into_iter().find(|n| n.borrow().tag() == Some("body"))
        };
        if let Some(body) = body {
            self.dispatch_event(state, event_type, &body);
        }
    }
}

fn error_page(e: &Error) -> String {
    format!(
        "<html><body><h1>Unable to load page</h1><p><b>{}</b></p><p>{}</p></body></html>",
        e.kind(),
        e
    )
}

/// `Content-Security-Policy: default-src origin [origin…]` → allow-list.
pub fn parse_csp(headers: &HashMap<String, String>) -> Option<Vec<String>> {
    let value = headers.get("content-security-policy")?;
    let mut parts = value.split_whitespace();
    if parts.next()? != "default-src" {
        return None;
    }
    Some(parts.map(str::to_string).collect())
}

fn char_to_byte(s: &str, chars: usize) -> usize {
    s.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn encode_form_value(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

/// Walks the form's `input` descendants with a `name`; checkboxes only
/// contribute when checked.
pub fn collect_form_body(form: &NodeRef) -> String {
    let mut all = Vec::new();
    tree_to_vec(form, &mut all);
    let mut pairs = Vec::new();
    for node in &all {
        if node.borrow().tag() != Some("input") {
            continue;
        }
        let Some(name) = node.borrow().get_attribute("name") else { continue };
        let input_type = node.borrow().get_attribute("type").unwrap_or_default();
        if input_type == "checkbox" && !node.borrow().is_checked() {
            continue;
        }
        let value = node.borrow().get_attribute("value").unwrap_or_default();
        pairs.push(format!("{}={}", encode_form_value(&name), encode_form_value(&value)));
    }
    pairs.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HttpCache;
    use crate::cookies::CookieJar;
    use crate::node::find_element_by_id;
    use crate::profile::{Profile, ProfileMode};

    fn make_tab() -> (Tab, TabState) {
        let engine = Rc::new(RefCell::new(Engine::new(HttpCache::new(None), CookieJar::new())));
        let profile = Profile::new(ProfileMode::Private);
        let history = Rc::new(RefCell::new(profile.load_history()));
        let bookmarks = Rc::new(RefCell::new(profile.load_bookmarks()));
        let tab = Tab::new(engine, history, bookmarks, None, false, false);
        (tab, TabState::new("about:blank"))
    }

    #[test]
    fn load_data_url_headless() {
        let (mut tab, mut state) = make_tab();
        tab.load(
            &mut state,
            "data:text/html,<title>Hi</title><p>body text</p>",
            true,
            None,
            None,
            None,
        );
        assert_eq!(state.title, "Hi");
        assert!(tab.text_content().contains("body text"));
    }

    #[test]
    fn bad_url_falls_back_to_blank() {
        let (mut tab, mut state) = make_tab();
        tab.load(&mut state, "gopher://old/", true, None, None, None);
        assert_eq!(state.url, "about:blank");
    }

    #[test]
    fn about_bookmarks_lists_entries() {
        let (tab, _) = make_tab();
        tab.bookmarks.borrow_mut().toggle("http://x/", "Example");
        let body = tab.about_body("bookmarks");
        assert!(body.contains("<a href=\"http://x/\">Example</a>"));
        assert!(tab.about_body("nonsense").contains("page not found"));
        assert_eq!(tab.about_body("blank"), "");
    }

    #[test]
    fn csp_header_parsing() {
        let mut headers = HashMap::new();
        headers.insert(
            "content-security-policy".to_string(),
            "default-src http://a:80 http://b:8000".to_string(),
        );
        assert_eq!(
            parse_csp(&headers),
            Some(vec!["http://a:80".to_string(), "http://b:8000".to_string()])
        );
        headers.insert("content-security-policy".to_string(), "script-src http://a".into());
        assert_eq!(parse_csp(&headers), None);
        assert_eq!(parse_csp(&HashMap::new()), None);
    }

    #[test]
    fn form_body_collection() {
        let root = HtmlParser::parse(
            "<form action=/submit>\
             <input name=user value=\"jo e\">\
             <input type=checkbox name=opt value=on>\
             <input type=checkbox name=sel value=yes>\
             <input value=anonymous>\
             </form>",
        );
        let form = {
            let mut all = Vec::new();
            tree_to_vec(&root, &mut all);
            all.into_iter().find(|n| n.borrow().tag() == Some("form")).unwrap()
        };
        // Check one checkbox.
        let mut all = Vec::new();
        tree_to_vec(&form, &mut all);
        let sel = all
            .iter()
            .find(|n| n.borrow().get_attribute("name").as_deref() == Some("sel"))
            .unwrap();
        sel.borrow_mut().set_checked(true);

        let body = collect_form_body(&form);
        assert_eq!(body, "user=jo%20e&sel=yes");
    }

    #[test]
    fn visited_links_annotated() {
        let (mut tab, mut state) = make_tab();
        tab.history.borrow_mut().record("http://example.org/seen");
        tab.load(
            &mut state,
            "data:text/html,<a id=x href=\"http://example.org/seen\">a</a>\
             <a id=y href=\"http://example.org/new\">b</a>",
            true,
            None,
            None,
            None,
        );
        let root = tab.page.borrow().root.clone().unwrap();
        assert!(find_element_by_id(&root, "x").unwrap().borrow().is_visited());
        assert!(!find_element_by_id(&root, "y").unwrap().borrow().is_visited());
    }

    #[test]
    fn error_page_contains_kind() {
        let page = error_page(&Error::Network("unreachable".into()));
        assert!(page.contains("network error"));
        assert!(page.contains("unreachable"));
    }
}
