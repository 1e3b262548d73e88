use std::cell::RefCell;
use std::io::BufRead;
use std::path::PathBuf;
use std::rc::Rc;

use skiff::browser::{Browser, BrowserConfig};
use skiff::cache::HttpCache;
use skiff::http::Engine;
use skiff::profile::{Bookmarks, History, Profile, ProfileMode};
use skiff::state::TabState;
use skiff::tab::Tab;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "skiff web browser

usage: skiff [flags] [url...]

flags:
  --private                 no-disk profile
  --profile <dir>           use <dir> for all profile state
  --profile-dir <dir>       alias for --profile
  --cache-dir <dir>         alias for --profile
  --disable-javascript      do not run page scripts (also: --nojs)
  --gui                     open a window (default)
  --cli                     print page text to stdout
  --rtl                     right-to-left line layout
  --exit                    load the urls headlessly, then exit
  --test, --testall         the unit suite runs with `cargo test`
  --wtest <dir>             load every .html file in <dir> headlessly
  --wstest                  read a test server url from stdin; exit 0
                            when the final page title is \"passed\"
  --version                 print the version
  --help                    this text";

enum Interface {
    Gui,
    Cli,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    env_logger::init();

    let mut interface = Interface::Gui;
    let mut profile_mode = ProfileMode::User;
    let mut js_enabled = true;
    let mut rtl = false;
    let mut exit_after_load = false;
    let mut wstest = false;
    let mut wtest_dir: Option<PathBuf> = None;
    let mut urls: Vec<String> = Vec::new();
    let mut keyname: Option<String> = None;

    for arg in std::env::args().skip(1) {
        if let Some(flag) = keyname.take() {
            match flag.as_str() {
                "--cache-dir" | "--profile-dir" | "--profile" => {
                    profile_mode = ProfileMode::Custom(PathBuf::from(arg));
                }
                "--wtest" => wtest_dir = Some(PathBuf::from(arg)),
                _ => unreachable!("flag {flag} takes no value"),
            }
            continue;
        }
        if arg.starts_with('-') {
            match arg.as_str() {
                "--private" => profile_mode = ProfileMode::Private,
                "--disable-javascript" | "--nojs" => js_enabled = false,
                "--gui" => interface = Interface::Gui,
                "--cli" => interface = Interface::Cli,
                "--test" | "--testall" => {
                    println!("the unit suite runs with `cargo test`");
                    return 0;
                }
                "--wstest" => wstest = true,
                "--wtest" | "--cache-dir" | "--profile-dir" | "--profile" => {
                    keyname = Some(arg);
                }
                "--version" => {
                    println!("{VERSION}");
                    return 0;
                }
                "--help" => {
                    println!("{USAGE}");
                    return 0;
                }
                "--rtl" => rtl = true,
                "--exit" => exit_after_load = true,
                other => {
                    eprintln!("unknown flag '{other}'");
                    return 1;
                }
            }
        } else {
            urls.push(arg);
        }
    }
    if let Some(flag) = keyname {
        eprintln!("flag '{flag}' needs a value");
        return 1;
    }

    if wstest {
        return run_wstest(profile_mode, js_enabled, rtl);
    }
    if let Some(dir) = wtest_dir {
        return run_wtest(&dir, profile_mode, js_enabled, rtl);
    }

    match interface {
        Interface::Cli => run_headless(&urls, profile_mode, js_enabled, rtl, true),
        Interface::Gui if exit_after_load => {
            run_headless(&urls, profile_mode, js_enabled, rtl, false)
        }
        Interface::Gui => run_gui(BrowserConfig { profile_mode, urls, js_enabled, rtl }),
    }
}

struct Headless {
    engine: Rc<RefCell<Engine>>,
    history: Rc<RefCell<History>>,
    bookmarks: Rc<RefCell<Bookmarks>>,
    profile: Profile,
    js_enabled: bool,
    rtl: bool,
}

impl Headless {
    fn new(profile_mode: ProfileMode, js_enabled: bool, rtl: bool) -> Headless {
        let profile = Profile::new(profile_mode);
        let jar = profile.load_cookies();
        let engine = Rc::new(RefCell::new(Engine::new(
            HttpCache::new(profile.cache_dir()),
            jar,
        )));
        Headless {
            history: Rc::new(RefCell::new(profile.load_history())),
            bookmarks: Rc::new(RefCell::new(profile.load_bookmarks())),
            engine,
            profile,
            js_enabled,
            rtl,
        }
    }

    fn browse(&self, url: &str) -> (Tab, TabState) {
        let mut tab = Tab::new(
            self.engine.clone(),
            self.history.clone(),
            self.bookmarks.clone(),
            None,
            self.js_enabled,
            self.rtl,
        );
        let mut state = TabState::new(url);
        tab.load(&mut state, url, true, None, None, None);
        (tab, state)
    }

    fn save(&self) {
        self.profile.save_history(&mut self.history.borrow_mut());
        self.profile.save_cookies(&self.engine.borrow().cookies);
    }
}

fn run_headless(
    urls: &[String],
    profile_mode: ProfileMode,
    js_enabled: bool,
    rtl: bool,
    print: bool,
) -> i32 {
    let headless = Headless::new(profile_mode, js_enabled, rtl);
    for url in urls {
        let (tab, _state) = headless.browse(url);
        if print {
            println!("{}", tab.text_content());
        }
    }
    headless.save();
    0
}

/// Web-service test mode: a test server on stdout tells us where to go;
/// the run passes when the final page title is "passed".
fn run_wstest(profile_mode: ProfileMode, js_enabled: bool, rtl: bool) -> i32 {
    let mut target = None;
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if let Some(pos) = line.find("http://") {
            target = Some(line[pos..].trim().to_string());
            break;
        }
    }
    let target = target.or_else(|| {
        std::env::var("DEFAULT_HTTP_PORT")
            .ok()
            .map(|port| format!("http://localhost:{port}/"))
    });
    let Some(url) = target else {
        eprintln!("no test url on stdin and DEFAULT_HTTP_PORT unset");
        return 1;
    };

    let headless = Headless::new(profile_mode, js_enabled, rtl);
    let (tab, _state) = headless.browse(&url);
    if tab.title() == "passed" {
        println!("passed");
        0
    } else {
        eprintln!("failed: final title was {:?}", tab.title());
        1
    }
}

/// Loads every .html file in `dir`; a page that sets its title to
/// "failed" fails the run.
fn run_wtest(dir: &std::path::Path, profile_mode: ProfileMode, js_enabled: bool, rtl: bool) -> i32 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        eprintln!("cannot read test dir {}", dir.display());
        return 1;
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "html"))
        .collect();
    files.sort();

    let headless = Headless::new(profile_mode, js_enabled, rtl);
    for file in files {
        let url = format!("file://{}", file.display());
        let (tab, _state) = headless.browse(&url);
        if tab.title() == "failed" {
            eprintln!("{} failed", file.display());
            return 1;
        }
        println!("{} ok", file.display());
    }
    0
}

fn run_gui(config: BrowserConfig) -> i32 {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1024.0, 768.0]),
        ..Default::default()
    };
    let result = eframe::run_native(
        "skiff",
        options,
        Box::new(move |cc| Ok(Box::new(Browser::new(cc, config)))),
    );
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("window error: {e}");
            1
        }
    }
}
