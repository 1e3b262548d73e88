use std::cell::RefCell;
use std::rc::Rc;

use egui::{Color32, Key, PointerButton};
use log::debug;

use crate::cache::HttpCache;
use crate::chrome::{Chrome, ChromeAction, ConfirmDialog};
use crate::display;
use crate::http::Engine;
use crate::profile::{Bookmarks, History, Profile, ProfileMode};
use crate::state::WindowState;
use crate::tab::{ClickOutcome, Tab};

const SCROLL_STEP: f32 = 100.0;

/// Everything the command line decided before the window opens.
pub struct BrowserConfig {
    pub profile_mode: ProfileMode,
    pub urls: Vec<String>,
    pub js_enabled: bool,
    pub rtl: bool,
}

/// A POST replay waiting for user confirmation. Cancelling undoes the
/// history move that triggered it.
struct PendingReplay {
    dialog: ConfirmDialog,
    url: String,
    payload: Option<String>,
    method: Option<String>,
    /// True when `back()` raised the dialog (cancel ⇒ `forward()`).
    undo_forward: bool,
}

/// The eframe shell: owns the engine context, the persisted window state
/// and one tab runtime per tab, and routes input events into the engine.
pub struct Browser {
    engine: Rc<RefCell<Engine>>,
    profile: Profile,
    history: Rc<RefCell<History>>,
    bookmarks: Rc<RefCell<Bookmarks>>,
    window: WindowState,
    runtimes: Vec<Tab>,
    chrome: Chrome,
    confirm: Option<PendingReplay>,
    js_enabled: bool,
    rtl: bool,
}

impl Browser {
    pub fn new(cc: &eframe::CreationContext<'_>, config: BrowserConfig) -> Browser {
        cc.egui_ctx.set_visuals(egui::Visuals::light());

        let profile = Profile::new(config.profile_mode);
        let jar = profile.load_cookies();
        let engine = Rc::new(RefCell::new(Engine::new(
            HttpCache::new(profile.cache_dir()),
            jar,
        )));
        let history = Rc::new(RefCell::new(profile.load_history()));
        let bookmarks = Rc::new(RefCell::new(profile.load_bookmarks()));

        let mut window = profile.load_state().unwrap_or_default();
        for url in &config.urls {
            window.newtab(url);
        }
        if window.tabs.is_empty() {
            window.newtab("about:blank");
        }
        window.active_tab_index = window.active_tab_index.min(window.tabs.len() - 1);

        let mut browser = Browser {
            engine,
            profile,
            history,
            bookmarks,
            window,
            runtimes: Vec::new(),
            chrome: Chrome::new(),
            confirm: None,
            js_enabled: config.js_enabled,
            rtl: config.rtl,
        };
        for _ in 0..browser.window.tabs.len() {
            browser.runtimes.push(browser.make_runtime(&cc.egui_ctx));
        }
        browser
    }

    fn make_runtime(&self, ctx: &egui::Context) -> Tab {
        Tab::new(
            self.engine.clone(),
            self.history.clone(),
            self.bookmarks.clone(),
            Some(ctx.clone()),
            self.js_enabled,
            self.rtl,
        )
    }

    fn active(&self) -> usize {
        self.window.active_tab_index
    }

    fn go_back(&mut self) {
        let i = self.active();
        let Some(state) = self.window.tabs.get_mut(i) else { return };
        if !state.back() {
            return;
        }
        let (url, payload, method) = (state.url.clone(), state.payload.clone(), state.method.clone());
        self.window.mark_dirty();
        if method.as_deref() == Some("POST") {
            self.confirm = Some(PendingReplay {
                dialog: ConfirmDialog::new("This page was the result of a form submission.\nResend the form data?"),
                url,
                payload,
                method,
                undo_forward: true,
            });
        } else {
            let state = &mut self.window.tabs[i];
            self.runtimes[i].load(state, &url, true, None, None, None);
        }
    }

    fn go_forward(&mut self) {
        let i = self.active();
        let Some(state) = self.window.tabs.get_mut(i) else { return };
        if !state.forward() {
            return;
        }
        let (url, payload, method) = (state.url.clone(), state.payload.clone(), state.method.clone());
        self.window.mark_dirty();
        if method.as_deref() == Some("POST") {
            self.confirm = Some(PendingReplay {
                dialog: ConfirmDialog::new("This page was the result of a form submission.\nResend the form data?"),
                url,
                payload,
                method,
                undo_forward: false,
            });
        } else {
            let state = &mut self.window.tabs[i];
            self.runtimes[i].load(state, &url, true, None, None, None);
        }
    }

    fn open_tab(&mut self, ctx: &egui::Context, url: &str) {
        self.window.newtab(url);
        self.runtimes.push(self.make_runtime(ctx));
        let i = self.active();
        let state = &mut self.window.tabs[i];
        let url = state.url.clone();
        self.runtimes[i].load(state, &url, true, None, None, None);
    }

    fn handle_chrome_action(&mut self, ctx: &egui::Context, action: ChromeAction) {
        match action {
            ChromeAction::None => {}
            ChromeAction::Navigate(url) => {
                let i = self.active();
                let state = &mut self.window.tabs[i];
                state.pushlocation(&url, None, None);
                self.runtimes[i].load(state, &url, true, None, None, None);
                self.window.mark_dirty();
            }
            ChromeAction::Back => self.go_back(),
            ChromeAction::Forward => self.go_forward(),
            ChromeAction::NewTab => self.open_tab(ctx, "about:blank"),
            ChromeAction::CloseTab(i) => {
                self.window.closetabindex(i);
                if i < self.runtimes.len() {
                    self.runtimes.remove(i);
                }
                if self.window.tabs.is_empty() {
                    self.open_tab(ctx, "about:blank");
                }
            }
            ChromeAction::SwitchTab(i) => {
                self.window.switchtab(i as isize, false);
            }
            ChromeAction::ToggleBookmark => {
                let i = self.active();
                let (url, title) = {
                    let state = &self.window.tabs[i];
                    (state.url.clone(), state.title.clone())
                };
                self.bookmarks.borrow_mut().toggle(&url, &title);
                self.window.mark_dirty();
            }
        }
    }

    fn handle_confirm(&mut self, ctx: &egui::Context) {
        let Some(pending) = &self.confirm else { return };
        match pending.dialog.show(ctx) {
            Some(true) => {
                let pending = self.confirm.take().expect("pending replay");
                let i = self.active();
                let state = &mut self.window.tabs[i];
                self.runtimes[i].load(
                    state,
                    &pending.url,
                    true,
                    pending.payload,
                    None,
                    pending.method,
                );
                self.window.mark_dirty();
            }
            Some(false) => {
                let pending = self.confirm.take().expect("pending replay");
                let i = self.active();
                let state = &mut self.window.tabs[i];
                // Undo the history move; the displayed document never
                // changed, so no reload is needed.
                if pending.undo_forward {
                    state.forward();
                } else {
                    state.back();
                }
                self.window.mark_dirty();
            }
            None => {}
        }
    }

    fn persist(&mut self) {
        if self.window.take_dirty() {
            debug!("persisting profile state");
            self.profile.save_state(&self.window);
            self.profile.save_history(&mut self.history.borrow_mut());
            self.profile.save_bookmarks(&mut self.bookmarks.borrow_mut());
            self.profile.save_cookies(&self.engine.borrow().cookies);
        }
    }
}

impl eframe::App for Browser {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Lazily load the active tab (restored tabs load on first view).
        let i = self.active();
        if i < self.runtimes.len() && !self.runtimes[i].loaded {
            let state = &mut self.window.tabs[i];
            let url = state.url.clone();
            self.runtimes[i].load(state, &url, true, None, None, None);
            self.window.mark_dirty();
        }

        let tabs_meta: Vec<(String, String)> = self
            .window
            .tabs
            .iter()
            .map(|t| (t.title.clone(), t.url.clone()))
            .collect();
        let (secure, url) = self
            .window
            .active_tab()
            .map(|t| (t.secure.clone(), t.url.clone()))
            .unwrap_or_default();
        let bookmarked = self.bookmarks.borrow().contains(&url);
        let action = self
            .chrome
            .show(ctx, &tabs_meta, self.active(), &secure, bookmarked);
        self.handle_chrome_action(ctx, action);
        self.handle_confirm(ctx);

        let mut new_tab_request: Option<String> = None;
        let mut back_request = false;

        egui::CentralPanel::default()
            .frame(egui::Frame::new().fill(Color32::WHITE))
            .show(ctx, |ui| {
                let rect = ui.max_rect();
                let i = self.window.active_tab_index;
                if i >= self.runtimes.len() {
                    return;
                }

                // Window geometry feeds both the state file and relayout.
                self.window.set_size(rect.width(), rect.height());
                if (self.runtimes[i].width - rect.width()).abs() > 1.0 {
                    self.runtimes[i].width = rect.width();
                    if self.runtimes[i].loaded {
                        self.runtimes[i].render();
                    }
                }

                let response = ui.allocate_rect(rect, egui::Sense::click());
                let modal_open = self.confirm.is_some();

                if !modal_open {
                    let primary = response.clicked_by(PointerButton::Primary);
                    let middle = response.clicked_by(PointerButton::Middle);
                    if primary || middle {
                        if let Some(pos) = response.interact_pointer_pos() {
                            let state = &mut self.window.tabs[i];
                            let x = pos.x - rect.min.x;
                            let y = pos.y - rect.min.y + state.scroll;
                            let button = if middle { 2 } else { 1 };
                            let outcome = self.runtimes[i].click(state, x, y, button);
                            if let ClickOutcome::NewTab(url) = outcome {
                                new_tab_request = Some(url);
                            }
                            self.window.mark_dirty();
                        }
                    }

                    if !ctx.wants_keyboard_input() {
                        let events = ctx.input(|input| input.events.clone());
                        for event in events {
                            match event {
                                egui::Event::Text(text) => {
                                    let state = &mut self.window.tabs[i];
                                    for ch in text.chars() {
                                        self.runtimes[i].keypress(state, ch);
                                    }
                                    self.window.mark_dirty();
                                }
                                egui::Event::Key { key, pressed: true, .. } => match key {
                                    Key::Backspace => {
                                        let state = &mut self.window.tabs[i];
                                        if !self.runtimes[i].backspace(state) {
                                            back_request = true;
                                        }
                                        self.window.mark_dirty();
                                    }
                                    Key::ArrowLeft => self.runtimes[i].move_caret(-1),
                                    Key::ArrowRight => self.runtimes[i].move_caret(1),
                                    Key::ArrowDown => {
                                        let state = &mut self.window.tabs[i];
                                        state.scroll += SCROLL_STEP;
                                        self.window.mark_dirty();
                                    }
                                    Key::ArrowUp => {
                                        let state = &mut self.window.tabs[i];
                                        state.scroll -= SCROLL_STEP;
                                        self.window.mark_dirty();
                                    }
                                    _ => {}
                                },
                                _ => {}
                            }
                        }
                    }

                    let wheel = ctx.input(|input| input.raw_scroll_delta.y);
                    if wheel != 0.0 {
                        let state = &mut self.window.tabs[i];
                        state.scroll -= wheel;
                        self.window.mark_dirty();
                    }
                }

                self.runtimes[i].render_if_needed();

                // Clamp the scroll into the content.
                let content_height = self.runtimes[i].content_height();
                {
                    let state = &mut self.window.tabs[i];
                    let max_scroll = (content_height - rect.height()).max(0.0);
                    state.scroll = state.scroll.clamp(0.0, max_scroll);
                }

                let scroll = self.window.tabs[i].scroll;
                display::execute(
                    ui.painter(),
                    rect.min,
                    &self.runtimes[i].display_list,
                    scroll,
                    0.0,
                    rect.height(),
                );

                // Scrollbar thumb when the page overflows the viewport.
                if content_height > rect.height() {
                    let top = scroll / content_height;
                    let bottom = (scroll + rect.height()) / content_height;
                    let thumb = egui::Rect::from_min_max(
                        egui::Pos2::new(rect.max.x - 8.0, rect.min.y + top * rect.height()),
                        egui::Pos2::new(rect.max.x, rect.min.y + bottom * rect.height()),
                    );
                    ui.painter().rect_filled(thumb, 0, Color32::BLACK);
                }
            });

        if back_request {
            self.go_back();
        }
        if let Some(url) = new_tab_request {
            self.open_tab(ctx, &url);
        }

        if let Some(address) = self.window.active_tab().map(|s| s.url.clone()) {
            self.chrome.set_address(&address);
        }
        self.persist();
    }
}
