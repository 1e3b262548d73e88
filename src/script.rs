use std::cell::RefCell;
use std::rc::Rc;

use log::{error, info, warn};
use rquickjs::{Context, Ctx, Function, Runtime};

use crate::css_parser::{CssParser, Rule};
use crate::errors::{Error, Result};
use crate::html_parser::HtmlParser;
use crate::http::{Engine, RequestOptions};
use crate::node::{
    append_child, detach, inner_html, insert_before, new_element, new_text, remove_child, to_html,
    tree_to_vec, NodeRef,
};
use crate::url::Url;

const RUNTIME_JS: &str = include_str!("../assets/runtime.js");

/// Shared page state the bridge operates on. The tab owns it through an
/// `Rc<RefCell<…>>` that the host functions also capture; every host call
/// takes a scoped borrow and never calls back into the interpreter, so
/// bridge calls cannot re-enter each other.
pub struct Page {
    pub url: Url,
    pub root: Option<NodeRef>,
    /// Cascade rules, sorted ascending by priority.
    pub rules: Vec<Rule>,
    /// CSP allow-list (`default-src`); `None` means no policy.
    pub allowed_origins: Option<Vec<String>>,
    pub title: String,
    /// Set by `location` assignments; the tab navigates after the current
    /// evaluation finishes and aborts further processing of this page.
    pub pending_location: Option<String>,
    /// `<link>`/`<style>`/`<script>` nodes appended by the bridge, loaded
    /// by the tab once the current evaluation returns.
    pub pending_loads: Vec<NodeRef>,
    /// Raised when removed `<link>`/`<style>` nodes require a stylesheet
    /// rebuild.
    pub styles_stale: bool,
    /// Raised when id-named script globals must be republished.
    pub globals_stale: bool,
    pub needs_render: bool,
    /// Default actions requested by script (`element.click()`), performed
    /// by the tab once the current evaluation returns.
    pub pending_defaults: Vec<(u32, String)>,
    handles: Vec<NodeRef>,
}

impl Page {
    pub fn new() -> Page {
        Page {
            url: Url::new("about:blank", None).expect("about:blank parses"),
            root: None,
            rules: Vec::new(),
            allowed_origins: None,
            title: String::new(),
            pending_location: None,
            pending_loads: Vec::new(),
            styles_stale: false,
            globals_stale: false,
            needs_render: false,
            pending_defaults: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Clears everything for a fresh navigation.
    pub fn reset(&mut self, url: Url) {
        *self = Page::new();
        self.url = url;
    }

    pub fn handle_for(&mut self, node: &NodeRef) -> u32 {
        if let Some(i) = self.handles.iter().position(|h| Rc::ptr_eq(h, node)) {
            return i as u32;
        }
        self.handles.push(node.clone());
        (self.handles.len() - 1) as u32
    }

    pub fn node_for(&self, handle: u32) -> Option<NodeRef> {
        self.handles.get(handle as usize).cloned()
    }

    pub fn query_selector_all(&mut self, selector: &str) -> Vec<u32> {
        let Ok(selector) = CssParser::parse_selector(selector) else {
            return Vec::new();
        };
        let Some(root) = self.root.clone() else { return Vec::new() };
        let mut all = Vec::new();
        tree_to_vec(&root, &mut all);
        all.iter()
            .filter(|n| n.borrow().is_element() && selector.matches(n))
            .map(|n| self.handle_for(n))
            .collect()
    }

    /// Elements with an `id` attribute, published as script globals when
    /// the name is a valid identifier.
    pub fn collect_id_globals(&mut self) -> Vec<(String, u32)> {
        let Some(root) = self.root.clone() else { return Vec::new() };
        let mut all = Vec::new();
        tree_to_vec(&root, &mut all);
        let mut globals = Vec::new();
        for node in &all {
            let Some(id) = node.borrow().get_attribute("id") else { continue };
            if is_identifier(&id) {
                let handle = self.handle_for(node);
                globals.push((id, handle));
            }
        }
        globals
    }

    /// Replaces the node's children by reparsing `html` as a fragment.
    pub fn inner_html_set(&mut self, handle: u32, html: &str) {
        let Some(node) = self.node_for(handle) else { return };
        let fragment = HtmlParser::parse(html);
        let mut all = Vec::new();
        tree_to_vec(&fragment, &mut all);
        let Some(body) = all
            .iter()
            .find(|n| n.borrow().tag() == Some("body"))
            .cloned()
        else {
            return;
        };
        let old = node.borrow().children.clone();
        for child in old {
            detach(&child);
        }
        let new_children = body.borrow().children.clone();
        for child in new_children {
            append_child(&node, &child);
        }
        self.globals_stale = true;
        self.needs_render = true;
    }

    /// Style-resolves the document so computed values are current, then
    /// returns the node's style map as JSON.
    pub fn computed_style_json(&mut self, handle: u32) -> String {
        if let Some(root) = self.root.clone() {
            crate::style::style(&root, &self.rules);
        }
        let Some(node) = self.node_for(handle) else { return "{}".into() };
        let style = node.borrow().style.clone();
        serde_json::to_string(&style).unwrap_or_else(|_| "{}".into())
    }

    /// Whether the engine may fetch `url` as a sub-resource of this page
    /// under the active `default-src` policy. A violation is logged.
    pub fn csp_allows(&self, url: &Url) -> bool {
        match &self.allowed_origins {
            None => true,
            Some(allowed) => {
                let ok = allowed.iter().any(|o| o == &url.origin());
                if !ok {
                    warn!("csp violation: {} not in default-src", url.get_str());
                }
                ok
            }
        }
    }

    fn mark_loadable(&mut self, node: &NodeRef) {
        let is_loadable = matches!(node.borrow().tag(), Some("link" | "style" | "script"));
        if is_loadable {
            self.pending_loads.push(node.clone());
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn script_err(e: rquickjs::Error) -> Error {
    Error::Script(e.to_string())
}

fn caught_text(ctx: &Ctx, err: rquickjs::Error) -> String {
    if matches!(err, rquickjs::Error::Exception) {
        format!("{:?}", ctx.catch())
    } else {
        err.to_string()
    }
}

/// The embedded interpreter plus the registered host functions. One
/// runtime per page load; the DOM façade lives in `assets/runtime.js`.
pub struct ScriptRuntime {
    _runtime: Runtime,
    context: Context,
}

impl ScriptRuntime {
    pub fn new(page: Rc<RefCell<Page>>, engine: Rc<RefCell<Engine>>) -> Result<ScriptRuntime> {
        let runtime = Runtime::new().map_err(script_err)?;
        let context = Context::full(&runtime).map_err(script_err)?;

        context
            .with(|ctx| -> std::result::Result<(), rquickjs::Error> {
                let globals = ctx.globals();

                globals.set(
                    "__log",
                    Function::new(ctx.clone(), move |msg: String| {
                        info!("script: {msg}");
                    })?,
                )?;

                {
                    let page = page.clone();
                    globals.set(
                        "__query_selector_all",
                        Function::new(ctx.clone(), move |sel: String| -> Vec<u32> {
                            page.borrow_mut().query_selector_all(&sel)
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__get_attribute",
                        Function::new(ctx.clone(), move |h: u32, name: String| -> Option<String> {
                            let page = page.borrow();
                            page.node_for(h).and_then(|n| n.borrow().get_attribute(&name))
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__set_attribute",
                        Function::new(ctx.clone(), move |h: u32, name: String, value: String| {
                            let mut page = page.borrow_mut();
                            if let Some(node) = page.node_for(h) {
                                node.borrow_mut().set_attribute(&name, &value);
                                if name == "id" {
                                    page.globals_stale = true;
                                }
                                page.needs_render = true;
                            }
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__inner_html_get",
                        Function::new(ctx.clone(), move |h: u32| -> String {
                            let page = page.borrow();
                            page.node_for(h).map(|n| inner_html(&n)).unwrap_or_default()
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__inner_html_set",
                        Function::new(ctx.clone(), move |h: u32, html: String| {
                            page.borrow_mut().inner_html_set(h, &html);
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__outer_html_get",
                        Function::new(ctx.clone(), move |h: u32| -> String {
                            let page = page.borrow();
                            page.node_for(h).map(|n| to_html(&n)).unwrap_or_default()
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__children",
                        Function::new(ctx.clone(), move |h: u32| -> Vec<u32> {
                            let mut page = page.borrow_mut();
                            let Some(node) = page.node_for(h) else { return Vec::new() };
                            let children: Vec<NodeRef> = node
                                .borrow()
                                .children
                                .iter()
                                .filter(|c| c.borrow().is_element())
                                .cloned()
                                .collect();
                            children.iter().map(|c| page.handle_for(c)).collect()
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__parent",
                        Function::new(ctx.clone(), move |h: u32| -> Option<u32> {
                            let mut page = page.borrow_mut();
                            let parent = page.node_for(h)?.borrow().parent.upgrade()?;
                            Some(page.handle_for(&parent))
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__create_element",
                        Function::new(ctx.clone(), move |tag: String| -> u32 {
                            let node = new_element(&tag.to_lowercase(), Default::default());
                            page.borrow_mut().handle_for(&node)
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__create_text_node",
                        Function::new(ctx.clone(), move |text: String| -> u32 {
                            let node = new_text(&text);
                            page.borrow_mut().handle_for(&node)
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__append_child",
                        Function::new(ctx.clone(), move |parent: u32, child: u32| {
                            let mut page = page.borrow_mut();
                            let (Some(parent), Some(child)) =
                                (page.node_for(parent), page.node_for(child))
                            else {
                                return;
                            };
                            append_child(&parent, &child);
                            page.mark_loadable(&child);
                            page.globals_stale = true;
                            page.needs_render = true;
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__insert_before",
                        Function::new(
                            ctx.clone(),
                            move |parent: u32, child: u32, reference: Option<u32>| {
                                let mut page = page.borrow_mut();
                                let (Some(parent), Some(child)) =
                                    (page.node_for(parent), page.node_for(child))
                                else {
                                    return;
                                };
                                let reference = reference.and_then(|r| page.node_for(r));
                                insert_before(&parent, &child, reference.as_ref());
                                page.mark_loadable(&child);
                                page.globals_stale = true;
                                page.needs_render = true;
                            },
                        )?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__remove_child",
                        Function::new(ctx.clone(), move |parent: u32, child: u32| {
                            let mut page = page.borrow_mut();
                            let (Some(parent), Some(child)) =
                                (page.node_for(parent), page.node_for(child))
                            else {
                                return;
                            };
                            if remove_child(&parent, &child) {
                                if matches!(child.borrow().tag(), Some("link" | "style")) {
                                    page.styles_stale = true;
                                }
                                page.globals_stale = true;
                                page.needs_render = true;
                            }
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__get_computed_style",
                        Function::new(ctx.clone(), move |h: u32| -> String {
                            page.borrow_mut().computed_style_json(h)
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    let engine = engine.clone();
                    globals.set(
                        "__xhr_send",
                        Function::new(
                            ctx.clone(),
                            move |method: String, url: String, body: Option<String>| -> Option<String> {
                                xhr_send(&page, &engine, &method, &url, body)
                            },
                        )?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__location_get",
                        Function::new(ctx.clone(), move || -> String {
                            page.borrow().url.get_str()
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__location_set",
                        Function::new(ctx.clone(), move |url: String| {
                            page.borrow_mut().pending_location = Some(url);
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    let engine = engine.clone();
                    globals.set(
                        "__cookie_get",
                        Function::new(ctx.clone(), move || -> String {
                            let host = page.borrow().url.host.clone();
                            engine.borrow().cookies.get_cookie_value_by_host(&host, true)
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    let engine = engine.clone();
                    globals.set(
                        "__cookie_set",
                        Function::new(ctx.clone(), move |raw: String| {
                            let host = page.borrow().url.host.clone();
                            engine.borrow_mut().cookies.set_cookie_by_host(&host, &raw, true);
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__title_get",
                        Function::new(ctx.clone(), move || -> String {
                            page.borrow().title.clone()
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__title_set",
                        Function::new(ctx.clone(), move |title: String| {
                            page.borrow_mut().title = title;
                        })?,
                    )?;
                }
                {
                    let page = page.clone();
                    globals.set(
                        "__do_default",
                        Function::new(ctx.clone(), move |h: u32, event_type: String| {
                            page.borrow_mut().pending_defaults.push((h, event_type));
                        })?,
                    )?;
                }

                ctx.eval::<(), _>(RUNTIME_JS)?;
                Ok(())
            })
            .map_err(script_err)?;

        Ok(ScriptRuntime { _runtime: runtime, context })
    }

    /// Evaluates page script. Errors are logged, never fatal; DOM changes
    /// made before an error remain.
    pub fn run(&self, name: &str, source: &str) {
        self.context.with(|ctx| {
            if let Err(e) = ctx.eval::<(), _>(source.as_bytes().to_vec()) {
                error!("script error in {name}: {}", caught_text(&ctx, e));
            }
        });
    }

    /// Invokes the runtime trampoline for an event; returns true when the
    /// default action was prevented.
    pub fn dispatch_event(&self, event_type: &str, handle: u32) -> bool {
        self.context.with(|ctx| {
            let Ok(f) = ctx.globals().get::<_, Function>("__dispatch_event") else {
                return false;
            };
            match f.call::<_, bool>((event_type.to_string(), handle)) {
                Ok(prevented) => prevented,
                Err(e) => {
                    error!("dispatch {event_type}: {}", caught_text(&ctx, e));
                    false
                }
            }
        })
    }

    /// Publishes an id-named element as a script global.
    pub fn publish_global(&self, name: &str, handle: u32) {
        self.context.with(|ctx| {
            if let Ok(f) = ctx.globals().get::<_, Function>("__register_id") {
                if let Err(e) = f.call::<_, ()>((name.to_string(), handle)) {
                    error!("publish {name}: {}", caught_text(&ctx, e));
                }
            }
        });
    }
}

/// XHR host side: resolve against the tab, require `data:` or the tab's
/// origin, enforce the CSP allow-list, forward cookies, return body text.
/// Failures return `None`, which the runtime surfaces as a thrown error.
fn xhr_send(
    page: &Rc<RefCell<Page>>,
    engine: &Rc<RefCell<Engine>>,
    method: &str,
    url: &str,
    body: Option<String>,
) -> Option<String> {
    let (resolved, referrer) = {
        let page = page.borrow();
        let resolved = match page.url.resolve(url) {
            Ok(u) => u,
            Err(e) => {
                error!("xhr: bad url {url}: {e}");
                return None;
            }
        };
        if resolved.scheme != "data" {
            if resolved.origin() != page.url.origin() {
                error!("xhr: cross-origin request to {} blocked", resolved.get_str());
                return None;
            }
            if !page.csp_allows(&resolved) {
                return None;
            }
        }
        (resolved, page.url.clone())
    };
    let opts = RequestOptions {
        payload: body,
        method: Some(method.to_string()),
        referrer: Some(referrer),
        ..Default::default()
    };
    match engine.borrow_mut().request(&resolved, &opts) {
        Ok(response) => Some(response.body),
        Err(e) => {
            error!("xhr: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::debug_string;

    fn page_with(html: &str) -> Page {
        let mut page = Page::new();
        page.root = Some(HtmlParser::parse(html));
        page
    }

    #[test]
    fn query_selector_all_finds_elements() {
        let mut page = page_with("<p class=x>one</p><p>two</p><div class=x>d</div>");
        assert_eq!(page.query_selector_all("p").len(), 2);
        assert_eq!(page.query_selector_all(".x").len(), 2);
        assert_eq!(page.query_selector_all("p.x").len(), 1);
        assert!(page.query_selector_all("{nonsense").is_empty());
    }

    #[test]
    fn handles_are_stable() {
        let mut page = page_with("<p>one</p>");
        let a = page.query_selector_all("p")[0];
        let b = page.query_selector_all("p")[0];
        assert_eq!(a, b);
        assert!(page.node_for(a).is_some());
        assert!(page.node_for(999).is_none());
    }

    #[test]
    fn id_globals_filter_invalid_names() {
        let mut page = page_with("<div id=good></div><div id=\"1bad\"></div><div id=also_ok></div>");
        let names: Vec<String> = page.collect_id_globals().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"good".to_string()));
        assert!(names.contains(&"also_ok".to_string()));
        assert!(!names.iter().any(|n| n == "1bad"));
    }

    #[test]
    fn inner_html_set_reparses_fragment() {
        let mut page = page_with("<div id=host><p>old</p></div>");
        let handle = page.query_selector_all("div")[0];
        page.inner_html_set(handle, "<b>new</b> text");
        let node = page.node_for(handle).unwrap();
        assert_eq!(debug_string(&node), "div[b['new'],' text']");
        assert!(page.needs_render);
        assert!(page.globals_stale);
    }

    #[test]
    fn inner_and_outer_html_serialize() {
        let page = page_with("<div id=host><p>x &amp; y</p></div>");
        let mut p = page;
        let handle = p.query_selector_all("div")[0];
        let node = p.node_for(handle).unwrap();
        assert_eq!(inner_html(&node), "<p>x &amp; y</p>");
        assert_eq!(to_html(&node), "<div id=\"host\"><p>x &amp; y</p></div>");
    }

    #[test]
    fn csp_allow_list() {
        let mut page = Page::new();
        page.url = Url::new("http://origin-a:8000/", None).unwrap();
        let other = Url::new("http://origin-b:8000/x.js", None).unwrap();
        assert!(page.csp_allows(&other));
        page.allowed_origins = Some(vec!["http://origin-a:8000".to_string()]);
        assert!(!page.csp_allows(&other));
        let same = Url::new("http://origin-a:8000/y.js", None).unwrap();
        assert!(page.csp_allows(&same));
    }
}
