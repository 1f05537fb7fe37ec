//! Core data model: challenges, tabs, sessions, and the icon variants.
//!
//! Everything here serializes with camelCase field names so exported JSON
//! stays byte-compatible with backup files produced by the original web
//! client. `order` fields are the authoritative sequence keys; array
//! position is never relied upon.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Hard cap on live tabs. More buckets than this overwhelms the end user.
pub const MAX_TABS: usize = 4;
/// Challenge display text is truncated to this many characters.
pub const MAX_CHALLENGE_TEXT: usize = 200;
/// Tab names are truncated to this many characters.
pub const MAX_TAB_NAME: usize = 50;

/// The four fixed tab color tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TabColor {
    SoftBlue,
    SoftGreen,
    SoftLilac,
    SoftTeal,
}

impl TabColor {
    pub fn all() -> [TabColor; 4] {
        [
            TabColor::SoftBlue,
            TabColor::SoftGreen,
            TabColor::SoftLilac,
            TabColor::SoftTeal,
        ]
    }

    pub fn hex(self) -> &'static str {
        match self {
            TabColor::SoftBlue => "#A5D8DD",
            TabColor::SoftGreen => "#B8D4B8",
            TabColor::SoftLilac => "#D4C5E2",
            TabColor::SoftTeal => "#9FCFC0",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TabColor::SoftBlue => "Soft Blue",
            TabColor::SoftGreen => "Soft Green",
            TabColor::SoftLilac => "Soft Lilac",
            TabColor::SoftTeal => "Soft Teal",
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            TabColor::SoftBlue => "soft-blue",
            TabColor::SoftGreen => "soft-green",
            TabColor::SoftLilac => "soft-lilac",
            TabColor::SoftTeal => "soft-teal",
        }
    }
}

/// Timer behavior attached to a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerType {
    #[default]
    None,
    Up,
    Down,
}

/// A challenge icon, classified once at construction.
///
/// The wire and backup formats carry a single string; which kind it is
/// gets decided here instead of being re-sniffed on every render:
///
/// - `data:` URI → [`Icon::Raster`]
/// - `set:name` reference (e.g. `tabler:bed`) → [`Icon::Named`]
/// - anything else → [`Icon::Emoji`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Icon {
    Emoji(String),
    /// Full `data:` URI. The base64 payload is checked at parse time;
    /// the original string is preserved verbatim either way.
    Raster(String),
    Named {
        set: String,
        name: String,
    },
}

impl Icon {
    pub fn parse(raw: &str) -> Icon {
        if raw.starts_with("data:") {
            if Self::decode_data_uri(raw).is_none() {
                tracing::warn!("icon data URI has an undecodable payload");
            }
            return Icon::Raster(raw.to_string());
        }
        if let Some((set, name)) = raw.split_once(':') {
            let set_ok = !set.is_empty()
                && set
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if set_ok && !name.is_empty() {
                return Icon::Named {
                    set: set.to_string(),
                    name: name.to_string(),
                };
            }
        }
        Icon::Emoji(raw.to_string())
    }

    /// Decode the raster payload, if this is a well-formed base64 data URI.
    pub fn raster_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Icon::Raster(uri) => Self::decode_data_uri(uri),
            _ => None,
        }
    }

    fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
        let rest = uri.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        if !header.ends_with(";base64") {
            return None;
        }
        base64::engine::general_purpose::STANDARD.decode(payload).ok()
    }
}

impl Default for Icon {
    fn default() -> Self {
        Icon::Emoji("⭐".to_string())
    }
}

/// The single-string wire encoding.
impl std::fmt::Display for Icon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Icon::Emoji(s) | Icon::Raster(s) => f.write_str(s),
            Icon::Named { set, name } => write!(f, "{set}:{name}"),
        }
    }
}

impl Serialize for Icon {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Icon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(D::Error::custom("icon string is empty"));
        }
        Ok(Icon::parse(&raw))
    }
}

/// A single task shown to the end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    pub text: String,
    #[serde(rename = "iconUrl")]
    pub icon: Icon,
    #[serde(default)]
    pub timer_type: TimerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_duration: Option<u32>,
    #[serde(default)]
    pub completion_times: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_time: Option<u32>,
    pub order: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Challenge {
    /// Record one completion: append the duration, keep best/last current.
    pub fn record_completion(&mut self, seconds: u32) {
        self.completion_times.push(seconds);
        self.best_time = Some(match self.best_time {
            Some(best) => best.min(seconds),
            None => seconds,
        });
        self.last_time = Some(seconds);
        self.updated_at = Some(Utc::now());
    }
}

/// An organizational bucket for challenges. At most [`MAX_TABS`] exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    pub name: String,
    pub color: TabColor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub order: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One challenge's result inside a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSession {
    pub challenge_id: String,
    /// Seconds.
    pub time_taken: u32,
    pub order: u32,
}

/// An immutable record of one completed run. Appended, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub date: DateTime<Utc>,
    pub challenges: Vec<ChallengeSession>,
    pub total_time: u32,
}

/// Root aggregate. Owned exclusively by the controller for the lifetime
/// of a process; store and remote adapter only read and write copies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub current_session: Option<Session>,
}

/// Ephemeral persisted state of one running timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSession {
    pub item_id: String,
    pub timer_type: TimerType,
    /// Unix millis when the timer started.
    pub start_time: i64,
    pub elapsed_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    pub is_running: bool,
    pub is_paused: bool,
}

/// Ephemeral persisted position inside an in-progress run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    pub challenge_index: usize,
    #[serde(default)]
    pub completed: Vec<ChallengeSession>,
    pub started_at: DateTime<Utc>,
}

/// Renumber `order` to a dense 1..N, preserving current relative order.
pub fn renumber_challenges(challenges: &mut [Challenge]) {
    challenges.sort_by_key(|c| c.order);
    for (i, challenge) in challenges.iter_mut().enumerate() {
        challenge.order = i as u32 + 1;
    }
}

/// Renumber tab `order` to a dense 1..N, preserving relative order.
pub fn renumber_tabs(tabs: &mut [Tab]) {
    tabs.sort_by_key(|t| t.order);
    for (i, tab) in tabs.iter_mut().enumerate() {
        tab.order = i as u32 + 1;
    }
}

/// Challenges shown under a tab, sorted by order.
///
/// A challenge whose `tab_id` is absent or references a tab that no
/// longer exists belongs to every tab (pre-tab data fallback).
pub fn challenges_for_tab<'a>(
    tab_id: &str,
    challenges: &'a [Challenge],
    tabs: &[Tab],
) -> Vec<&'a Challenge> {
    let mut matched: Vec<&Challenge> = challenges
        .iter()
        .filter(|c| match &c.tab_id {
            Some(id) => id == tab_id || !tabs.iter().any(|t| &t.id == id),
            None => true,
        })
        .collect();
    matched.sort_by_key(|c| c.order);
    matched
}

/// "90" → "1m 30s", "45" → "45 seconds".
pub fn format_duration(seconds: u32) -> String {
    let minutes = seconds / 60;
    let secs = seconds % 60;
    if minutes == 0 {
        return format!("{secs} second{}", if secs == 1 { "" } else { "s" });
    }
    if secs == 0 {
        return format!("{minutes} minute{}", if minutes == 1 { "" } else { "s" });
    }
    format!("{minutes}m {secs}s")
}

/// "95" → "1:35".
pub fn format_completion_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
