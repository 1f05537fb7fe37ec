//! Local persistence — one redb file, fixed string keys, JSON blob values.
//!
//! This is the boundary where storage failures stop: reads degrade to
//! defaults (or empty) and writes report `false`, so callers never see an
//! error from here. No network I/O happens in this module.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{
    AppData, Challenge, Icon, RunProgress, Tab, TimerSession, TimerType,
};

const STORE_FILE_NAME: &str = "stride.redb";

const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("stride_state");

// Each logical dataset has its own non-overlapping key.
const KEY_APP_DATA: &str = "app_data";
const KEY_TABS: &str = "tabs";
const KEY_ACTIVE_TAB: &str = "active_tab";
const KEY_TABS_MIGRATED: &str = "tabs_migrated";
const KEY_RUN_PROGRESS: &str = "run_progress";
const KEY_TIMER_SESSION: &str = "timer_session";
const KEY_SOUND_ENABLED: &str = "sound_enabled";
const KEY_CUSTOM_ICONS: &str = "custom_icons";

pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    /// Open (or create) the store at the default data directory.
    pub fn open() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join("stride");
        std::fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;
        Self::open_at(&data_dir.join(STORE_FILE_NAME))
    }

    /// Open (or create) the store at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("Failed to open local store")?;
        // Ensure table exists
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(STATE_TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("stride").join(STORE_FILE_NAME))
    }

    // ── Main dataset ─────────────────────────────────────────────────

    /// Load the full dataset. Absent or structurally invalid blobs reset
    /// to the built-in defaults, which are persisted before returning.
    pub fn load(&self) -> AppData {
        match self.read_key(KEY_APP_DATA) {
            Ok(Some(bytes)) => match parse_app_data(&bytes) {
                Some(data) => data,
                None => {
                    tracing::warn!("stored dataset is structurally invalid, resetting to defaults");
                    self.reset()
                }
            },
            Ok(None) => {
                // First use — seed the store
                self.reset()
            }
            Err(e) => {
                tracing::warn!("could not read local store: {e}");
                default_data()
            }
        }
    }

    /// Persist the full dataset. Returns `false` (and logs) on failure.
    pub fn save(&self, data: &AppData) -> bool {
        self.put_json(KEY_APP_DATA, data)
    }

    /// Persist and return the built-in default dataset.
    pub fn reset(&self) -> AppData {
        let data = default_data();
        self.save(&data);
        data
    }

    /// Pretty-printed serialization for file backup.
    pub fn export_snapshot(data: &AppData) -> String {
        serde_json::to_string_pretty(data).unwrap_or_default()
    }

    /// Parse and structurally validate an uploaded backup.
    pub fn import_snapshot(text: &str) -> Option<AppData> {
        match parse_app_data(text.as_bytes()) {
            Some(data) => Some(data),
            None => {
                tracing::warn!("import rejected: not a valid backup document");
                None
            }
        }
    }

    // ── Tabs ─────────────────────────────────────────────────────────

    /// Load tabs sorted by order. Empty on absent or corrupt data.
    pub fn load_tabs(&self) -> Vec<Tab> {
        let mut tabs: Vec<Tab> = self.get_json(KEY_TABS).unwrap_or_default();
        tabs.sort_by_key(|t| t.order);
        tabs
    }

    pub fn save_tabs(&self, tabs: &[Tab]) -> bool {
        self.put_json(KEY_TABS, &tabs)
    }

    pub fn active_tab_id(&self) -> Option<String> {
        self.get_json(KEY_ACTIVE_TAB)
    }

    pub fn set_active_tab(&self, tab_id: &str) -> bool {
        self.put_json(KEY_ACTIVE_TAB, &tab_id)
    }

    pub fn clear_active_tab(&self) -> bool {
        self.remove_key(KEY_ACTIVE_TAB)
    }

    // ── Migration flag ───────────────────────────────────────────────

    pub fn is_migrated(&self) -> bool {
        self.get_json(KEY_TABS_MIGRATED).unwrap_or(false)
    }

    /// Commit the tab-system migration in one transaction: the sole tab,
    /// the active-tab pointer, and the migrated flag land together, so
    /// the flag can never be observed without its tab.
    pub fn commit_migration(&self, default_tab: &Tab) -> Result<()> {
        let tabs_json = serde_json::to_vec(&vec![default_tab.clone()])?;
        let active_json = serde_json::to_vec(&default_tab.id)?;
        let flag_json = serde_json::to_vec(&true)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATE_TABLE)?;
            table.insert(KEY_TABS, tabs_json.as_slice())?;
            table.insert(KEY_ACTIVE_TAB, active_json.as_slice())?;
            table.insert(KEY_TABS_MIGRATED, flag_json.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    // ── Ephemera ─────────────────────────────────────────────────────

    pub fn load_run_progress(&self) -> Option<RunProgress> {
        self.get_json(KEY_RUN_PROGRESS)
    }

    pub fn save_run_progress(&self, progress: &RunProgress) -> bool {
        self.put_json(KEY_RUN_PROGRESS, progress)
    }

    pub fn clear_run_progress(&self) -> bool {
        self.remove_key(KEY_RUN_PROGRESS)
    }

    pub fn load_timer_session(&self) -> Option<TimerSession> {
        self.get_json(KEY_TIMER_SESSION)
    }

    pub fn save_timer_session(&self, session: &TimerSession) -> bool {
        self.put_json(KEY_TIMER_SESSION, session)
    }

    pub fn clear_timer_session(&self) -> bool {
        self.remove_key(KEY_TIMER_SESSION)
    }

    pub fn sound_enabled(&self) -> bool {
        self.get_json(KEY_SOUND_ENABLED).unwrap_or(true)
    }

    pub fn set_sound_enabled(&self, enabled: bool) -> bool {
        self.put_json(KEY_SOUND_ENABLED, &enabled)
    }

    /// User-curated list of icon references.
    pub fn custom_icons(&self) -> Vec<String> {
        self.get_json(KEY_CUSTOM_ICONS).unwrap_or_default()
    }

    pub fn save_custom_icons(&self, icons: &[String]) -> bool {
        self.put_json(KEY_CUSTOM_ICONS, &icons)
    }

    // ── Raw key access ───────────────────────────────────────────────

    fn read_key(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(STATE_TABLE)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    fn write_key(&self, key: &str, value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATE_TABLE)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove_key(&self, key: &str) -> bool {
        let result: Result<()> = (|| {
            let txn = self.db.begin_write()?;
            {
                let mut table = txn.open_table(STATE_TABLE)?;
                table.remove(key)?;
            }
            txn.commit()?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!("could not remove {key}: {e}");
            return false;
        }
        true
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.read_key(key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("corrupt value under {key}: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("could not read {key}: {e}");
                None
            }
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("could not serialize {key}: {e}");
                return false;
            }
        };
        if let Err(e) = self.write_key(key, &bytes) {
            tracing::warn!("could not persist {key}: {e}");
            return false;
        }
        true
    }
}

/// Parse a dataset blob, enforcing the structural contract: a
/// `challenges` array must be present. Anything else is rejected.
fn parse_app_data(bytes: &[u8]) -> Option<AppData> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    if !value.get("challenges").map(|c| c.is_array()).unwrap_or(false) {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Opaque record id: current millis plus a short random suffix. Unique
/// enough for interactive use, not cryptographic.
pub fn generate_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(9)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// The dataset a fresh install starts with: five sample challenges with
/// emoji icons (simple, clear, immediate recognition), no history.
pub fn default_data() -> AppData {
    let samples = [
        ("1", "Make your bed", "🛏️"),
        ("2", "Drink a glass of water", "💧"),
        ("3", "Do 5 push-ups", "💪"),
        ("4", "Take deep breaths for 1 minute", "🧘"),
        ("5", "Organize your desk", "📚"),
    ];
    let challenges = samples
        .iter()
        .enumerate()
        .map(|(i, (id, text, emoji))| Challenge {
            id: id.to_string(),
            tab_id: None,
            text: text.to_string(),
            icon: Icon::Emoji(emoji.to_string()),
            timer_type: TimerType::None,
            timer_duration: None,
            completion_times: Vec::new(),
            best_time: None,
            last_time: None,
            order: i as u32 + 1,
            created_at: Utc::now(),
            updated_at: None,
        })
        .collect();
    AppData {
        challenges,
        sessions: Vec::new(),
        current_session: None,
    }
}
