//! The engine of a minimal graphical web browser: URL resolution, an
//! HTTP/1.1 client with cache and socket pool, HTML/CSS parsers, style
//! resolution, layout, per-tab navigation state and a scripting bridge.
//! The binary in `main.rs` wires it to an eframe window.

pub mod browser;
pub mod cache;
pub mod chrome;
pub mod cookies;
pub mod css_parser;
pub mod display;
pub mod errors;
pub mod html_parser;
pub mod http;
pub mod layout;
pub mod node;
pub mod profile;
pub mod script;
pub mod selector;
pub mod state;
pub mod style;
pub mod tab;
pub mod url;
