//! Desktop side effects: launching applications, opening URLs, playing
//! YouTube videos and typing notes into a text editor.
//!
//! Every call here blocks, so the dispatcher runs them through
//! [`SideEffects`] on blocking threads and replies to the user without
//! waiting. Failures are logged; nobody is waiting for them.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use tokio::task::{JoinError, JoinSet};
use wait_timeout::ChildExt;

use crate::error::AutomationError;

pub trait Automation: Send + Sync {
    fn open_app(&self, app: &str) -> Result<(), AutomationError>;
    fn open_url(&self, url: &str) -> Result<(), AutomationError>;
    fn play_media(&self, query: &str) -> Result<(), AutomationError>;
    fn write_text(&self, text: &str) -> Result<(), AutomationError>;
}

/// How long a freshly launched program is watched for an early failure.
/// Programs still running after this are left alone.
const LAUNCH_GRACE: Duration = Duration::from_millis(1500);

/// Time for the editor window to take focus before pasting.
#[cfg(feature = "keystrokes")]
const EDITOR_SETTLE: Duration = Duration::from_millis(800);

pub struct DesktopAutomation {
    editor: Vec<String>,
    #[cfg_attr(feature = "keystrokes", allow(dead_code))]
    notes_dir: PathBuf,
}

impl DesktopAutomation {
    /// `editor` overrides the platform text editor; it is split on
    /// whitespace into a program and its arguments.
    pub fn new(editor: Option<&str>) -> Self {
        let editor = editor
            .map(|e| e.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_editor);
        let notes_dir = dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".jarvis")
            .join("notes");
        Self { editor, notes_dir }
    }

    fn launch_editor(&self, extra: Option<&str>) -> Result<(), AutomationError> {
        let (program, args) = self
            .editor
            .split_first()
            .ok_or_else(|| AutomationError::UnknownApp("text editor".into()))?;
        let mut args: Vec<String> = args.to_vec();
        if let Some(extra) = extra {
            args.push(extra.to_string());
        }
        launch(program, &args)
    }
}

impl Automation for DesktopAutomation {
    fn open_app(&self, app: &str) -> Result<(), AutomationError> {
        if app == "notepad" {
            return self.launch_editor(None);
        }
        let argv = app_command(app).ok_or_else(|| AutomationError::UnknownApp(app.into()))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AutomationError::UnknownApp(app.into()))?;
        launch(program, args)
    }

    fn open_url(&self, url: &str) -> Result<(), AutomationError> {
        Url::parse(url).map_err(|e| AutomationError::Url(format!("{url}: {e}")))?;
        #[cfg(target_os = "windows")]
        let result = launch(
            "rundll32",
            &["url.dll,FileProtocolHandler".to_string(), url.to_string()],
        );
        #[cfg(target_os = "macos")]
        let result = launch("open", &[url.to_string()]);
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let result = launch("xdg-open", &[url.to_string()]);
        result
    }

    fn play_media(&self, query: &str) -> Result<(), AutomationError> {
        let url = match youtube_watch_url(query) {
            Ok(url) => url,
            Err(e) => {
                log::debug!("YouTube lookup for '{}' failed ({e}); opening results page", query);
                youtube_search_url(query)?
            }
        };
        self.open_url(&url)
    }

    fn write_text(&self, text: &str) -> Result<(), AutomationError> {
        #[cfg(feature = "keystrokes")]
        {
            self.launch_editor(None)?;
            std::thread::sleep(EDITOR_SETTLE);
            paste_text(text)
        }
        #[cfg(not(feature = "keystrokes"))]
        {
            std::fs::create_dir_all(&self.notes_dir)?;
            let name = format!("note-{}.txt", chrono::Local::now().format("%Y%m%d-%H%M%S"));
            let path = self.notes_dir.join(name);
            std::fs::write(&path, text)?;
            log::info!("Saved note to {}", path.display());
            let path = path.to_string_lossy();
            self.launch_editor(Some(path.as_ref()))
        }
    }
}

fn default_editor() -> Vec<String> {
    #[cfg(target_os = "windows")]
    let editor = vec!["notepad.exe".to_string()];
    #[cfg(target_os = "macos")]
    let editor = vec!["open".to_string(), "-e".to_string()];
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let editor = vec!["gedit".to_string()];
    editor
}

/// Launcher for each application the open intent knows about.
fn app_command(app: &str) -> Option<Vec<String>> {
    let home = dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".into());
    #[cfg(target_os = "windows")]
    let argv: Option<Vec<String>> = match app {
        "chrome" => Some(vec!["cmd".into(), "/C".into(), "start".into(), "chrome".into()]),
        "calculator" => Some(vec!["calc.exe".into()]),
        "file explorer" => Some(vec!["explorer.exe".into(), home]),
        _ => None,
    };
    #[cfg(target_os = "macos")]
    let argv: Option<Vec<String>> = match app {
        "chrome" => Some(vec!["open".into(), "-a".into(), "Google Chrome".into()]),
        "calculator" => Some(vec!["open".into(), "-a".into(), "Calculator".into()]),
        "file explorer" => Some(vec!["open".into(), home]),
        _ => None,
    };
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let argv: Option<Vec<String>> = match app {
        "chrome" => Some(vec!["google-chrome".into()]),
        "calculator" => Some(vec!["gnome-calculator".into()]),
        "file explorer" => Some(vec!["xdg-open".into(), home]),
        _ => None,
    };
    argv
}

/// Start `program` detached. An exit within [`LAUNCH_GRACE`] with a
/// failure status is reported; anything still running is left to run.
fn launch(program: &str, args: &[String]) -> Result<(), AutomationError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| AutomationError::Spawn {
            program: program.to_string(),
            source,
        })?;
    match child.wait_timeout(LAUNCH_GRACE) {
        Ok(Some(status)) if !status.success() => Err(AutomationError::Exited {
            program: program.to_string(),
            code: status.code().unwrap_or(-1),
        }),
        Ok(Some(_)) => Ok(()),
        Ok(None) => {
            reap(program, child);
            Ok(())
        }
        Err(e) => {
            log::debug!("Could not watch {program}: {e}");
            reap(program, child);
            Ok(())
        }
    }
}

/// Wait for a detached child on its own thread so it is not left as a
/// zombie when it exits.
fn reap(program: &str, mut child: Child) -> Option<thread::JoinHandle<()>> {
    let name = program.to_string();
    let spawned = thread::Builder::new()
        .name(format!("reap-{name}"))
        .spawn(move || match child.wait() {
            Ok(status) => log::debug!("{name} exited with {status}"),
            Err(e) => log::debug!("Failed to wait for {name}: {e}"),
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("Could not start reaper for {program}: {e}");
            None
        }
    }
}

fn youtube_search_url(query: &str) -> Result<String, AutomationError> {
    Url::parse_with_params("https://www.youtube.com/results", &[("search_query", query)])
        .map(String::from)
        .map_err(|e| AutomationError::Url(e.to_string()))
}

/// Resolve the first video of a YouTube search so it starts playing
/// immediately rather than showing the results list.
fn youtube_watch_url(query: &str) -> Result<String, AutomationError> {
    let search = youtube_search_url(query)?;
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| AutomationError::Url(e.to_string()))?;
    let html = client
        .get(&search)
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.text())
        .map_err(|e| AutomationError::Url(e.to_string()))?;
    first_video_id(&html)
        .map(|id| format!("https://www.youtube.com/watch?v={id}"))
        .ok_or_else(|| AutomationError::Url("no video in search results".into()))
}

static VIDEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""videoId":"([A-Za-z0-9_-]{11})""#).expect("valid"));

fn first_video_id(html: &str) -> Option<String> {
    VIDEO_ID
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Paste `text` into the focused window: stash the clipboard, set the
/// text, send Ctrl+V (Cmd+V on macOS), then restore the clipboard.
#[cfg(feature = "keystrokes")]
fn paste_text(text: &str) -> Result<(), AutomationError> {
    use std::thread::sleep;

    use arboard::Clipboard;
    use rdev::{simulate, EventType, Key};

    let mut clipboard =
        Clipboard::new().map_err(|e| AutomationError::Keystroke(format!("clipboard: {e}")))?;
    let previous = clipboard.get_text().ok();
    clipboard
        .set_text(text)
        .map_err(|e| AutomationError::Keystroke(format!("clipboard: {e}")))?;
    sleep(Duration::from_millis(50));

    let modifier = if cfg!(target_os = "macos") {
        Key::MetaLeft
    } else {
        Key::ControlLeft
    };
    for event in [
        EventType::KeyPress(modifier),
        EventType::KeyPress(Key::KeyV),
        EventType::KeyRelease(Key::KeyV),
        EventType::KeyRelease(modifier),
    ] {
        simulate(&event).map_err(|e| AutomationError::Keystroke(format!("{e:?}")))?;
        sleep(Duration::from_millis(20));
    }

    sleep(Duration::from_millis(100));
    if let Some(prev) = previous {
        if let Err(e) = clipboard.set_text(prev) {
            log::warn!("Failed to restore clipboard: {e}");
        }
    }
    Ok(())
}

/// Detached blocking tasks started by intent handlers.
///
/// Spawning never waits. Results are logged when the task is reaped,
/// either on a later spawn or when [`SideEffects::drain`] runs at
/// shutdown.
#[derive(Default)]
pub struct SideEffects {
    tasks: Mutex<JoinSet<()>>,
}

impl SideEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on a blocking thread. Must be called inside a Tokio runtime.
    pub fn spawn<F>(&self, label: impl Into<String>, f: F)
    where
        F: FnOnce() -> Result<(), AutomationError> + Send + 'static,
    {
        let label = label.into();
        let mut tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while let Some(res) = tasks.try_join_next() {
            log_join(res);
        }
        log::debug!("Starting side effect: {label}");
        tasks.spawn_blocking(move || match f() {
            Ok(()) => log::debug!("Side effect finished: {label}"),
            Err(e) => log::warn!("Side effect '{label}' failed: {e}"),
        });
    }

    pub fn outstanding(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Wait up to `wait` for outstanding side effects. Any still running
    /// afterwards are detached.
    pub async fn drain(&self, wait: Duration) {
        let mut tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, JoinSet::new()),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), JoinSet::new()),
        };
        if tasks.is_empty() {
            return;
        }
        log::info!("Waiting for {} side effect(s) to finish", tasks.len());
        let joined = tokio::time::timeout(wait, async {
            while let Some(res) = tasks.join_next().await {
                log_join(res);
            }
        })
        .await;
        if joined.is_err() {
            log::warn!("{} side effect(s) still running at shutdown", tasks.len());
            tasks.detach_all();
        }
    }
}

fn log_join(res: Result<(), JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            log::error!("Side effect panicked: {e}");
        } else {
            log::debug!("Side effect cancelled: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn finds_first_video_id() {
        let html = r#"...{"videoId":"kJQP7kiw5Fk","x":1}...{"videoId":"aaaaaaaaaaa"}"#;
        assert_eq!(first_video_id(html).as_deref(), Some("kJQP7kiw5Fk"));
        assert_eq!(first_video_id("<html></html>"), None);
    }

    #[test]
    fn search_url_is_encoded() {
        let url = youtube_search_url("lofi beats & rain").unwrap();
        assert_eq!(
            url,
            "https://www.youtube.com/results?search_query=lofi+beats+%26+rain"
        );
    }

    #[test]
    fn known_apps_have_launchers() {
        for app in ["chrome", "calculator", "file explorer"] {
            assert!(app_command(app).is_some(), "{app}");
        }
        assert!(app_command("photoshop").is_none());
    }

    #[test]
    fn unknown_app_is_an_error() {
        let auto = DesktopAutomation::new(None);
        assert!(matches!(
            auto.open_app("photoshop"),
            Err(AutomationError::UnknownApp(_))
        ));
    }

    #[test]
    fn missing_program_reports_spawn_error() {
        let err = launch("definitely-not-a-real-program-4242", &[]).unwrap_err();
        assert!(matches!(err, AutomationError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn launch_reports_quick_failure_and_detaches_long_runners() {
        assert!(launch("true", &[]).is_ok());
        assert!(matches!(
            launch("false", &[]),
            Err(AutomationError::Exited { code: 1, .. })
        ));
        let start = std::time::Instant::now();
        assert!(launch("sleep", &["5".to_string()]).is_ok());
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reaped_child_leaves_no_zombie() {
        let child = Command::new("sleep").arg("0.2").spawn().unwrap();
        let pid = child.id();
        reap("sleep", child).expect("reaper thread").join().unwrap();
        // A zombie keeps its /proc entry until it is waited on.
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
    }

    #[test]
    fn bad_url_is_rejected_before_launch() {
        let auto = DesktopAutomation::new(Some("true"));
        assert!(matches!(
            auto.open_url("not a url"),
            Err(AutomationError::Url(_))
        ));
    }

    #[tokio::test]
    async fn side_effects_run_and_drain() {
        let effects = SideEffects::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            effects.spawn("count", move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        effects.spawn("fails", || Err(AutomationError::UnknownApp("x".into())));
        effects.spawn("panics", || panic!("boom"));
        effects.drain(Duration::from_secs(5)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(effects.outstanding(), 0);
    }

    #[tokio::test]
    async fn drain_gives_up_on_slow_tasks() {
        let effects = SideEffects::new();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        effects.spawn("slow", move || {
            let _ = rx.recv_timeout(Duration::from_secs(5));
            Ok(())
        });
        let start = std::time::Instant::now();
        effects.drain(Duration::from_millis(50)).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        drop(tx);
    }
}
