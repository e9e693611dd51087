//! Ordered intent table and argument extraction.
//!
//! Rules are tested in order against lower-cased text and the first match
//! wins. Several rules overlap ("what is the date and time" hits both the
//! time and date patterns) so the order is part of the behaviour.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Time,
    Date,
    OpenApp,
    PlayMedia,
    Search,
    WriteText,
    SystemStatus,
    Shutdown,
    Weather,
}

impl Intent {
    pub fn name(self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Time => "time",
            Intent::Date => "date",
            Intent::OpenApp => "open_app",
            Intent::PlayMedia => "play_media",
            Intent::Search => "search",
            Intent::WriteText => "write_text",
            Intent::SystemStatus => "system_status",
            Intent::Shutdown => "shutdown",
            Intent::Weather => "weather",
        }
    }
}

pub struct IntentRule {
    pub intent: Intent,
    pub pattern: Regex,
}

fn rule(intent: Intent, pattern: &str) -> IntentRule {
    IntentRule {
        intent,
        pattern: Regex::new(pattern).expect("intent patterns are valid"),
    }
}

pub static RULES: Lazy<Vec<IntentRule>> = Lazy::new(|| {
    vec![
        rule(Intent::Greeting, r"\b(hi|hello|hey)\b.*\bjarvis\b"),
        rule(Intent::Time, r"what.*time|current.*time|time.*now"),
        rule(Intent::Date, r"what.*date|today.*date|current.*date"),
        rule(
            Intent::OpenApp,
            r"open.*(chrome|notepad|calculator|file explorer)",
        ),
        rule(Intent::PlayMedia, r"play.*(youtube|song)"),
        rule(Intent::Search, r"search.*google"),
        rule(Intent::WriteText, r"write.*notepad"),
        rule(
            Intent::SystemStatus,
            r"(cpu|ram|memory|system).*usage|system status",
        ),
        rule(Intent::Shutdown, r"(shutdown|shut down|turn off).*computer"),
        rule(Intent::Weather, r"weather.*in"),
    ]
});

/// First intent whose pattern matches `lower`, which must already be
/// lower-cased.
pub fn classify(lower: &str) -> Option<Intent> {
    RULES
        .iter()
        .find(|r| r.pattern.is_match(lower))
        .map(|r| r.intent)
}

static OPEN_APP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"open.*?(chrome|notepad|calculator|file explorer)").expect("valid"));

pub fn app_name(lower: &str) -> Option<String> {
    OPEN_APP
        .captures(lower)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

static PLAY_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bplay\b").expect("valid"));
static MEDIA_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(?:on|in|from)\s+)?youtube\b|\b(?:the\s+)?song\b").expect("valid")
});

/// "play despacito on youtube" -> "despacito".
pub fn media_query(lower: &str) -> Option<String> {
    let start = PLAY_WORD.find(lower)?.end();
    let stripped = MEDIA_NOISE.replace_all(&lower[start..], " ");
    non_empty(collapse(&stripped))
}

static SEARCH_AFTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"google\s*(?:for\s+)?(?P<q>.*)$").expect("valid"));
static SEARCH_BEFORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"search\s+(?:for\s+)?(?P<q>.*?)\s*(?:\b(?:on|in|with|using)\s+)?google").expect("valid")
});

/// "search google for rust lifetimes" and "search rust lifetimes on
/// google" both give "rust lifetimes". `None` when nothing was asked for.
pub fn search_query(lower: &str) -> Option<String> {
    let after = SEARCH_AFTER
        .captures(lower)
        .and_then(|c| non_empty(collapse(&c["q"])));
    after.or_else(|| {
        SEARCH_BEFORE
            .captures(lower)
            .and_then(|c| non_empty(collapse(&c["q"])))
    })
}

static NOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bwrite\b\s*(?P<pre>.*?)\s*(?:\b(?:in|on|to|into)\s+)?(?:the\s+)?\bnotepad\b[\s:,]*(?P<post>.*)$",
    )
    .expect("valid")
});

/// Text to type into the editor, taken from the original (not
/// lower-cased) input so capitalisation survives.
pub fn note_content(text: &str) -> Option<String> {
    let caps = NOTE.captures(text)?;
    let joined = format!("{} {}", &caps["pre"], &caps["post"]);
    non_empty(collapse(&joined))
}

static WEATHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"weather.*?\bin\s+(?P<loc>.+?)[?.!]*$").expect("valid"));

pub fn weather_location(lower: &str) -> Option<String> {
    WEATHER
        .captures(lower)
        .and_then(|c| non_empty(collapse(&c["loc"])))
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
