use egui::{Align2, Key, TextEdit};

/// What the user asked the shell to do this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ChromeAction {
    None,
    Navigate(String),
    Back,
    Forward,
    NewTab,
    CloseTab(usize),
    SwitchTab(usize),
    ToggleBookmark,
}

/// Browser chrome: tab strip, back/forward, address bar with its own
/// editing state, bookmark toggle and the secure indicator.
pub struct Chrome {
    pub address: String,
    pub editing: bool,
}

impl Chrome {
    pub fn new() -> Chrome {
        Chrome { address: String::new(), editing: false }
    }

    /// Keeps the address bar in sync with the active tab unless the user
    /// is typing in it.
    pub fn set_address(&mut self, url: &str) {
        if !self.editing {
            self.address = url.to_string();
        }
    }

    pub fn show(
        &mut self,
        ctx: &egui::Context,
        tabs: &[(String, String)],
        active: usize,
        secure: &str,
        bookmarked: bool,
    ) -> ChromeAction {
        let mut action = ChromeAction::None;

        egui::TopBottomPanel::top("chrome").show(ctx, |ui| {
            ui.horizontal(|ui| {
                for (i, (title, url)) in tabs.iter().enumerate() {
                    let label = if !title.is_empty() {
                        title.clone()
                    } else if !url.is_empty() {
                        url.clone()
                    } else {
                        "(untitled)".to_string()
                    };
                    let label: String = label.chars().take(24).collect();
                    if ui.selectable_label(i == active, label).clicked() {
                        action = ChromeAction::SwitchTab(i);
                    }
                    if ui.small_button("x").clicked() {
                        action = ChromeAction::CloseTab(i);
                    }
                    ui.separator();
                }
                if ui.button("+").clicked() {
                    action = ChromeAction::NewTab;
                }
            });

            ui.horizontal(|ui| {
                if ui.button("<").clicked() {
                    action = ChromeAction::Back;
                }
                if ui.button(">").clicked() {
                    action = ChromeAction::Forward;
                }
                match secure {
                    "yes" => {
                        ui.label("locked");
                    }
                    "no" => {
                        ui.label("insecure");
                    }
                    _ => {}
                }
                let star = if bookmarked { "*" } else { "o" };
                if ui.button(star).clicked() {
                    action = ChromeAction::ToggleBookmark;
                }
                let response = ui.add_sized(
                    ui.available_size(),
                    TextEdit::singleline(&mut self.address),
                );
                self.editing = response.has_focus();
                if response.lost_focus() && ui.input(|i| i.key_pressed(Key::Enter)) {
                    action = ChromeAction::Navigate(self.address.clone());
                    self.editing = false;
                }
            });
        });

        action
    }
}

impl Default for Chrome {
    fn default() -> Self {
        Chrome::new()
    }
}

/// Modal confirmation used before replaying a POST from history. Captures
/// all input while shown.
pub struct ConfirmDialog {
    pub prompt: String,
}

impl ConfirmDialog {
    pub fn new(prompt: &str) -> ConfirmDialog {
        ConfirmDialog { prompt: prompt.to_string() }
    }

    /// Draws the dialog; `Some(true)` on confirm, `Some(false)` on cancel,
    /// `None` while the user has not decided.
    pub fn show(&self, ctx: &egui::Context) -> Option<bool> {
        let mut result = None;
        egui::Window::new("Confirm")
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(&self.prompt);
                ui.horizontal(|ui| {
                    if ui.button("Resend").clicked() {
                        result = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        result = Some(false);
                    }
                });
            });
        result
    }
}
