//! Application state controller.
//!
//! Owns the in-memory dataset for the lifetime of a process. Every user
//! mutation flows through here: apply in memory, persist to the local
//! store synchronously, then push to the remote when one is configured.
//! Subscription snapshots from other devices come back through an
//! internal channel and are applied without re-pushing, which keeps the
//! two directions from feeding each other.
//!
//! The store and sync adapter are injected at construction and torn down
//! with an explicit [`AppController::shutdown`].

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::mpsc;

use crate::migration;
use crate::models::{
    renumber_challenges, renumber_tabs, AppData, Challenge, Icon, Session, Tab, TabColor,
    TimerType, MAX_CHALLENGE_TEXT, MAX_TABS, MAX_TAB_NAME,
};
use crate::remote::{PushReceipt, RemoteSync, SyncEvent};
use crate::store::{generate_id, LocalStore};

/// Where this device stands relative to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No remote configured; fully local.
    Offline,
    /// A push or the initial reconciliation is in flight.
    Syncing,
    Synced,
    /// The last remote operation failed; local state is still good.
    Error,
}

impl SyncStatus {
    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::Offline => "local only",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "sync error",
        }
    }
}

/// Fields for a new challenge.
pub struct ChallengeDraft {
    pub text: String,
    pub icon: Icon,
    /// Defaults to the active tab when absent.
    pub tab_id: Option<String>,
    pub timer_type: TimerType,
    /// Only meaningful for countdown timers.
    pub timer_duration: Option<u32>,
}

impl ChallengeDraft {
    pub fn new(text: impl Into<String>, icon: Icon) -> Self {
        Self {
            text: text.into(),
            icon,
            tab_id: None,
            timer_type: TimerType::None,
            timer_duration: None,
        }
    }
}

/// Partial update for an existing challenge. Absent fields stay as-is.
#[derive(Default)]
pub struct ChallengeEdit {
    pub text: Option<String>,
    pub icon: Option<Icon>,
    pub tab_id: Option<Option<String>>,
    pub timer_type: Option<TimerType>,
    pub timer_duration: Option<Option<u32>>,
}

/// Partial update for a tab.
#[derive(Default)]
pub struct TabEdit {
    pub name: Option<String>,
    pub color: Option<TabColor>,
    pub icon: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub challenges: usize,
    pub sessions: usize,
}

pub struct AppController {
    store: LocalStore,
    remote: RemoteSync,
    data: AppData,
    tabs: Vec<Tab>,
    active_tab: Option<String>,
    status: SyncStatus,
    storage_degraded: bool,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    events_rx: mpsc::UnboundedReceiver<SyncEvent>,
}

impl AppController {
    /// Load local state synchronously; the remote is not touched until
    /// [`startup`](Self::startup).
    pub fn new(store: LocalStore, remote: RemoteSync) -> Self {
        let data = store.load();
        let tabs = store.load_tabs();
        let active_tab = store.active_tab_id();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            remote,
            data,
            tabs,
            active_tab,
            status: SyncStatus::Offline,
            storage_degraded: false,
            events_tx,
            events_rx,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn data(&self) -> &AppData {
        &self.data
    }

    pub fn challenges(&self) -> &[Challenge] {
        &self.data.challenges
    }

    pub fn sessions(&self) -> &[Session] {
        &self.data.sessions
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_tab_id(&self) -> Option<&str> {
        self.active_tab.as_deref()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.status
    }

    /// True once any local write has failed this session.
    pub fn storage_degraded(&self) -> bool {
        self.storage_degraded
    }

    pub fn remote_configured(&self) -> bool {
        self.remote.configured()
    }

    pub fn remote_backend(&self) -> &str {
        self.remote.backend_name()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Reconcile with the remote (when configured), run the tab
    /// migration if this dataset predates tabs, and open subscriptions.
    pub async fn startup(&mut self) {
        if !self.remote.configured() {
            self.status = SyncStatus::Offline;
            self.migrate_if_needed(false).await;
            return;
        }

        self.status = SyncStatus::Syncing;
        let init = self.remote.initialize(&self.store).await;
        self.data = init.data;
        self.status = if init.healthy {
            SyncStatus::Synced
        } else {
            SyncStatus::Error
        };

        self.migrate_if_needed(true).await;

        let tx = self.events_tx.clone();
        self.remote.subscribe_challenges(move |challenges| {
            let _ = tx.send(SyncEvent::ChallengesChanged(challenges));
        });
        let tx = self.events_tx.clone();
        self.remote.subscribe_sessions(move |sessions| {
            let _ = tx.send(SyncEvent::SessionsChanged(sessions));
        });
    }

    /// Detach subscriptions. The controller stays usable locally.
    pub fn shutdown(&mut self) {
        self.remote.cleanup();
    }

    async fn migrate_if_needed(&mut self, push: bool) {
        if migration::is_migrated(&self.store) {
            return;
        }
        let challenges = std::mem::take(&mut self.data.challenges);
        let (_default_tab, migrated) = migration::migrate(&self.store, challenges);
        self.data.challenges = migrated;
        self.tabs = self.store.load_tabs();
        self.active_tab = self.store.active_tab_id();
        self.persist();
        if push {
            self.push_challenges().await;
        }
    }

    // ── Challenge mutations ──────────────────────────────────────────

    pub async fn add_challenge(&mut self, draft: ChallengeDraft) -> Result<String> {
        let text = bounded_text(&draft.text, MAX_CHALLENGE_TEXT)?;
        let id = generate_id();
        let now = Utc::now();
        let challenge = Challenge {
            id: id.clone(),
            tab_id: draft.tab_id.or_else(|| self.active_tab.clone()),
            text,
            icon: draft.icon,
            timer_type: draft.timer_type,
            timer_duration: match draft.timer_type {
                TimerType::Down => draft.timer_duration,
                _ => None,
            },
            completion_times: Vec::new(),
            best_time: None,
            last_time: None,
            order: self.data.challenges.len() as u32 + 1,
            created_at: now,
            updated_at: Some(now),
        };
        self.data.challenges.push(challenge);
        self.persist();
        self.push_challenge(&id).await;
        Ok(id)
    }

    pub async fn edit_challenge(&mut self, id: &str, edit: ChallengeEdit) -> Result<()> {
        let challenge = self
            .data
            .challenges
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow::anyhow!("no challenge with id {id}"))?;

        if let Some(text) = edit.text {
            challenge.text = bounded_text(&text, MAX_CHALLENGE_TEXT)?;
        }
        if let Some(icon) = edit.icon {
            challenge.icon = icon;
        }
        if let Some(tab_id) = edit.tab_id {
            challenge.tab_id = tab_id;
        }
        if let Some(timer_type) = edit.timer_type {
            challenge.timer_type = timer_type;
            if timer_type != TimerType::Down {
                challenge.timer_duration = None;
            }
        }
        if let Some(duration) = edit.timer_duration {
            if challenge.timer_type == TimerType::Down {
                challenge.timer_duration = duration;
            }
        }
        challenge.updated_at = Some(Utc::now());

        self.persist();
        self.push_challenge(id).await;
        Ok(())
    }

    /// Remove a challenge and renumber the survivors to a dense 1..N.
    pub async fn delete_challenge(&mut self, id: &str) -> Result<()> {
        let before = self.data.challenges.len();
        self.data.challenges.retain(|c| c.id != id);
        if self.data.challenges.len() == before {
            bail!("no challenge with id {id}");
        }
        renumber_challenges(&mut self.data.challenges);
        self.persist();
        self.push_challenges().await;
        Ok(())
    }

    /// Shift a challenge by `delta` positions (negative = earlier).
    pub async fn move_challenge(&mut self, id: &str, delta: i32) -> Result<()> {
        reorder(&mut self.data.challenges, |c| c.id == id, delta, |c, order| {
            c.order = order
        })?;
        self.persist();
        self.push_challenges().await;
        Ok(())
    }

    /// Record one completion on a challenge (times, best, last).
    pub async fn complete_challenge(&mut self, id: &str, seconds: u32) -> Result<()> {
        let challenge = self
            .data
            .challenges
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow::anyhow!("no challenge with id {id}"))?;
        challenge.record_completion(seconds);
        self.persist();
        self.push_challenge(id).await;
        Ok(())
    }

    /// Append a finished run to the history and clear transient state.
    pub async fn complete_session(&mut self, session: Session) -> Result<()> {
        self.data.sessions.push(session.clone());
        self.data.current_session = None;
        self.store.clear_run_progress();
        self.persist();

        if self.remote.configured() {
            self.status = SyncStatus::Syncing;
            let result = self.remote.save_session(&session).await;
            self.apply_push_result("session push", result);
        }
        Ok(())
    }

    // ── Tab mutations ────────────────────────────────────────────────

    pub fn add_tab(
        &mut self,
        name: &str,
        color: TabColor,
        icon: Option<String>,
    ) -> Result<String> {
        if self.tabs.len() >= MAX_TABS {
            bail!("Maximum {MAX_TABS} tabs allowed. Too many tabs may be overwhelming.");
        }
        let name = bounded_text(name, MAX_TAB_NAME)?;
        let now = Utc::now();
        let id = generate_id();
        self.tabs.push(Tab {
            id: id.clone(),
            name,
            color,
            icon,
            order: self.tabs.len() as u32 + 1,
            created_at: now,
            updated_at: now,
        });
        self.persist_tabs();
        if self.active_tab.is_none() {
            self.set_active_tab(&id)?;
        }
        Ok(id)
    }

    pub fn edit_tab(&mut self, id: &str, edit: TabEdit) -> Result<()> {
        let tab = self
            .tabs
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("no tab with id {id}"))?;
        if let Some(name) = edit.name {
            tab.name = bounded_text(&name, MAX_TAB_NAME)?;
        }
        if let Some(color) = edit.color {
            tab.color = color;
        }
        if let Some(icon) = edit.icon {
            tab.icon = icon;
        }
        tab.updated_at = Utc::now();
        self.persist_tabs();
        Ok(())
    }

    /// Delete a tab. Its challenges move to the first remaining tab, or
    /// back to "all tabs" when none remain.
    pub async fn delete_tab(&mut self, id: &str) -> Result<()> {
        let before = self.tabs.len();
        self.tabs.retain(|t| t.id != id);
        if self.tabs.len() == before {
            bail!("no tab with id {id}");
        }
        renumber_tabs(&mut self.tabs);
        self.persist_tabs();

        let fallback = self.tabs.first().map(|t| t.id.clone());
        let mut challenges_changed = false;
        for challenge in &mut self.data.challenges {
            if challenge.tab_id.as_deref() == Some(id) {
                challenge.tab_id = fallback.clone();
                challenge.updated_at = Some(Utc::now());
                challenges_changed = true;
            }
        }
        if challenges_changed {
            self.persist();
            self.push_challenges().await;
        }

        if self.active_tab.as_deref() == Some(id) {
            match &fallback {
                Some(first) => {
                    let first = first.clone();
                    self.set_active_tab(&first)?;
                }
                None => {
                    self.active_tab = None;
                    self.store.clear_active_tab();
                }
            }
        }
        Ok(())
    }

    pub fn move_tab(&mut self, id: &str, delta: i32) -> Result<()> {
        reorder(&mut self.tabs, |t| t.id == id, delta, |t, order| {
            t.order = order
        })?;
        self.persist_tabs();
        Ok(())
    }

    pub fn set_active_tab(&mut self, id: &str) -> Result<()> {
        if !self.tabs.iter().any(|t| t.id == id) {
            bail!("no tab with id {id}");
        }
        self.active_tab = Some(id.to_string());
        if !self.store.set_active_tab(id) {
            self.storage_degraded = true;
        }
        Ok(())
    }

    // ── Backup / restore ─────────────────────────────────────────────

    pub fn export(&self) -> String {
        LocalStore::export_snapshot(&self.data)
    }

    /// Replace the dataset wholesale from a backup document. Invalid
    /// input leaves everything untouched.
    pub async fn import(&mut self, text: &str) -> Result<ImportSummary> {
        let Some(imported) = LocalStore::import_snapshot(text) else {
            bail!("not a valid backup document");
        };
        let summary = ImportSummary {
            challenges: imported.challenges.len(),
            sessions: imported.sessions.len(),
        };
        self.data = imported;
        self.persist();
        self.push_challenges().await;
        Ok(summary)
    }

    // ── Remote feedback ──────────────────────────────────────────────

    /// Apply queued subscription snapshots: overwrite the collection in
    /// memory, re-persist locally, and do not push back. Returns how many
    /// snapshots were applied.
    pub fn drain_sync_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                SyncEvent::ChallengesChanged(challenges) => {
                    self.data.challenges = challenges;
                }
                SyncEvent::SessionsChanged(sessions) => {
                    self.data.sessions = sessions;
                }
            }
            applied += 1;
        }
        if applied > 0 {
            self.persist();
            self.status = SyncStatus::Synced;
        }
        applied
    }

    // ── Internals ────────────────────────────────────────────────────

    fn persist(&mut self) {
        if !self.store.save(&self.data) {
            self.storage_degraded = true;
        }
    }

    fn persist_tabs(&mut self) {
        if !self.store.save_tabs(&self.tabs) {
            self.storage_degraded = true;
        }
    }

    async fn push_challenges(&mut self) {
        if !self.remote.configured() {
            return;
        }
        self.status = SyncStatus::Syncing;
        let result = self.remote.save_challenges(&self.data.challenges).await;
        self.apply_push_result("challenge push", result);
    }

    async fn push_challenge(&mut self, id: &str) {
        if !self.remote.configured() {
            return;
        }
        let Some(challenge) = self.data.challenges.iter().find(|c| c.id == id) else {
            return;
        };
        self.status = SyncStatus::Syncing;
        let result = self.remote.save_challenge(challenge).await;
        self.apply_push_result("challenge push", result);
    }

    fn apply_push_result(&mut self, what: &str, result: Result<PushReceipt>) {
        match result {
            Ok(_) => self.status = SyncStatus::Synced,
            Err(e) => {
                tracing::warn!("{what} failed: {e}");
                self.status = SyncStatus::Error;
            }
        }
    }
}

fn bounded_text(raw: &str, max: usize) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("text is empty");
    }
    Ok(trimmed.chars().take(max).collect())
}

/// Move the matching item by `delta` positions in order-sorted sequence,
/// then reassign dense 1..N orders.
fn reorder<T>(
    items: &mut Vec<T>,
    matches: impl Fn(&T) -> bool,
    delta: i32,
    set_order: impl Fn(&mut T, u32),
) -> Result<()> {
    if items.is_empty() {
        bail!("nothing to reorder");
    }
    let mut taken = std::mem::take(items);
    let position = match taken.iter().position(&matches) {
        Some(position) => position,
        None => {
            *items = taken;
            bail!("no such item");
        }
    };
    let target = (position as i32 + delta).clamp(0, taken.len() as i32 - 1) as usize;
    let item = taken.remove(position);
    taken.insert(target, item);
    for (i, item) in taken.iter_mut().enumerate() {
        set_order(item, i as u32 + 1);
    }
    *items = taken;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::MemoryRemote;
    use crate::remote::RemoteStore;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn offline_controller() -> (TempDir, AppController) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open_at(&dir.path().join("test.redb")).unwrap();
        (dir, AppController::new(store, RemoteSync::offline()))
    }

    fn synced_controller(remote: Arc<MemoryRemote>) -> (TempDir, AppController) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open_at(&dir.path().join("test.redb")).unwrap();
        let sync = RemoteSync::new(remote);
        (dir, AppController::new(store, sync))
    }

    fn draft(text: &str) -> ChallengeDraft {
        ChallengeDraft::new(text, Icon::Emoji("⭐".to_string()))
    }

    fn assert_dense_orders(challenges: &[Challenge]) {
        let mut orders: Vec<u32> = challenges.iter().map(|c| c.order).collect();
        orders.sort_unstable();
        let expected: Vec<u32> = (1..=challenges.len() as u32).collect();
        assert_eq!(orders, expected);
    }

    #[tokio::test]
    async fn test_orders_stay_dense_through_add_delete_move() {
        let (_dir, mut controller) = offline_controller();
        assert_eq!(controller.challenges().len(), 5);
        assert_dense_orders(controller.challenges());

        let id = controller.add_challenge(draft("Water the plants")).await.unwrap();
        assert_eq!(controller.challenges().len(), 6);
        assert_dense_orders(controller.challenges());

        controller.move_challenge(&id, -3).await.unwrap();
        assert_dense_orders(controller.challenges());

        controller.delete_challenge(&id).await.unwrap();
        assert_eq!(controller.challenges().len(), 5);
        assert_dense_orders(controller.challenges());
    }

    #[tokio::test]
    async fn test_delete_order_three_keeps_relative_order() {
        let (_dir, mut controller) = offline_controller();
        let victim = controller
            .challenges()
            .iter()
            .find(|c| c.order == 3)
            .unwrap()
            .id
            .clone();
        let survivors: Vec<String> = controller
            .challenges()
            .iter()
            .filter(|c| c.id != victim)
            .map(|c| c.id.clone())
            .collect();

        controller.delete_challenge(&victim).await.unwrap();

        assert_eq!(controller.challenges().len(), 4);
        let orders: Vec<u32> = controller.challenges().iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);
        let ids: Vec<String> = controller.challenges().iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, survivors);
    }

    #[tokio::test]
    async fn test_move_challenge_clamps_at_edges() {
        let (_dir, mut controller) = offline_controller();
        let first = controller.challenges()[0].id.clone();
        controller.move_challenge(&first, -5).await.unwrap();
        assert_eq!(controller.challenges()[0].id, first);

        controller.move_challenge(&first, 100).await.unwrap();
        assert_eq!(controller.challenges().last().unwrap().id, first);
        assert_dense_orders(controller.challenges());
    }

    #[tokio::test]
    async fn test_add_challenge_rejects_empty_and_bounds_text() {
        let (_dir, mut controller) = offline_controller();
        assert!(controller.add_challenge(draft("   ")).await.is_err());

        let long = "x".repeat(MAX_CHALLENGE_TEXT + 50);
        let id = controller.add_challenge(draft(&long)).await.unwrap();
        let added = controller.challenges().iter().find(|c| c.id == id).unwrap();
        assert_eq!(added.text.chars().count(), MAX_CHALLENGE_TEXT);
    }

    #[tokio::test]
    async fn test_edit_challenge_clears_duration_when_timer_off() {
        let (_dir, mut controller) = offline_controller();
        let mut d = draft("Timed");
        d.timer_type = TimerType::Down;
        d.timer_duration = Some(120);
        let id = controller.add_challenge(d).await.unwrap();

        controller
            .edit_challenge(
                &id,
                ChallengeEdit {
                    timer_type: Some(TimerType::None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let edited = controller.challenges().iter().find(|c| c.id == id).unwrap();
        assert_eq!(edited.timer_type, TimerType::None);
        assert!(edited.timer_duration.is_none());
    }

    #[tokio::test]
    async fn test_tab_cap_rejects_fifth() {
        let (_dir, mut controller) = offline_controller();
        for i in 0..MAX_TABS {
            controller
                .add_tab(&format!("Tab {i}"), TabColor::SoftBlue, None)
                .unwrap();
        }
        assert_eq!(controller.tabs().len(), MAX_TABS);

        let result = controller.add_tab("One too many", TabColor::SoftTeal, None);
        assert!(result.is_err());
        assert_eq!(controller.tabs().len(), MAX_TABS);
    }

    #[tokio::test]
    async fn test_first_tab_becomes_active() {
        let (_dir, mut controller) = offline_controller();
        let id = controller.add_tab("Morning", TabColor::SoftBlue, None).unwrap();
        assert_eq!(controller.active_tab_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_delete_tab_reassigns_challenges_and_active() {
        let (_dir, mut controller) = offline_controller();
        let morning = controller.add_tab("Morning", TabColor::SoftBlue, None).unwrap();
        let evening = controller.add_tab("Evening", TabColor::SoftGreen, None).unwrap();
        controller.set_active_tab(&evening).unwrap();

        let mut d = draft("Brush teeth");
        d.tab_id = Some(evening.clone());
        let challenge = controller.add_challenge(d).await.unwrap();

        controller.delete_tab(&evening).await.unwrap();

        assert_eq!(controller.tabs().len(), 1);
        assert_eq!(controller.tabs()[0].order, 1);
        assert_eq!(controller.active_tab_id(), Some(morning.as_str()));
        let moved = controller
            .challenges()
            .iter()
            .find(|c| c.id == challenge)
            .unwrap();
        assert_eq!(moved.tab_id.as_deref(), Some(morning.as_str()));
    }

    #[tokio::test]
    async fn test_set_active_tab_requires_existing() {
        let (_dir, mut controller) = offline_controller();
        assert!(controller.set_active_tab("ghost").is_err());
    }

    #[tokio::test]
    async fn test_offline_startup_runs_migration() {
        let (_dir, mut controller) = offline_controller();
        assert!(controller.tabs().is_empty());

        controller.startup().await;

        assert_eq!(controller.sync_status(), SyncStatus::Offline);
        assert_eq!(controller.tabs().len(), 1);
        assert_eq!(controller.tabs()[0].name, migration::DEFAULT_TAB_NAME);
        let tab_id = controller.tabs()[0].id.clone();
        assert!(controller
            .challenges()
            .iter()
            .all(|c| c.tab_id.as_deref() == Some(tab_id.as_str())));
        assert_eq!(controller.active_tab_id(), Some(tab_id.as_str()));
    }

    #[tokio::test]
    async fn test_startup_pull_branch_remote_wins() {
        let mut remote_challenges = crate::store::default_data().challenges;
        remote_challenges.truncate(3);
        let remote = Arc::new(MemoryRemote::with_challenges(remote_challenges));
        let (_dir, mut controller) = synced_controller(remote);

        controller.startup().await;

        assert_eq!(controller.sync_status(), SyncStatus::Synced);
        assert_eq!(controller.challenges().len(), 3);
        // The pulled dataset replaced the local cache too
        assert_eq!(controller.store().load().challenges.len(), 3);
    }

    #[tokio::test]
    async fn test_startup_push_branch_seeds_remote() {
        let remote = Arc::new(MemoryRemote::default());
        let (_dir, mut controller) = synced_controller(remote.clone());

        controller.startup().await;

        assert_eq!(controller.sync_status(), SyncStatus::Synced);
        // Local defaults (5) landed on the empty remote, then migration
        // re-pushed the tabbed versions
        assert_eq!(remote.challenge_count(), 5);
        let tabbed = remote.fetch_challenges().await.unwrap();
        assert!(tabbed.iter().all(|c| c.tab_id.is_some()));
    }

    #[tokio::test]
    async fn test_mutations_push_to_remote() {
        let remote = Arc::new(MemoryRemote::default());
        let (_dir, mut controller) = synced_controller(remote.clone());
        controller.startup().await;

        let id = controller.add_challenge(draft("Feed the cat")).await.unwrap();
        assert_eq!(controller.sync_status(), SyncStatus::Synced);
        assert!(remote.challenges.lock().unwrap().contains_key(&id));

        controller.delete_challenge(&id).await.unwrap();
        assert!(!remote.challenges.lock().unwrap().contains_key(&id));
    }

    #[tokio::test]
    async fn test_failed_push_sets_error_but_keeps_local_state() {
        let remote = Arc::new(MemoryRemote::default());
        let (_dir, mut controller) = synced_controller(remote.clone());
        controller.startup().await;

        remote.fail_next_puts.store(u32::MAX, Ordering::SeqCst);
        let id = controller.add_challenge(draft("Unpushable")).await.unwrap();

        assert_eq!(controller.sync_status(), SyncStatus::Error);
        // Local state and store still carry the new challenge
        assert!(controller.challenges().iter().any(|c| c.id == id));
        assert!(controller.store().load().challenges.iter().any(|c| c.id == id));
    }

    #[tokio::test]
    async fn test_drain_sync_events_applies_without_pushing() {
        let remote = Arc::new(MemoryRemote::default());
        let (_dir, mut controller) = synced_controller(remote.clone());
        controller.startup().await;

        let pushes_before = remote.put_calls.load(Ordering::SeqCst);
        let mut snapshot = crate::store::default_data().challenges;
        snapshot.truncate(2);
        remote.emit_challenges(snapshot);

        let applied = controller.drain_sync_events();

        assert_eq!(applied, 1);
        assert_eq!(controller.challenges().len(), 2);
        assert_eq!(controller.store().load().challenges.len(), 2);
        // Applying a snapshot must not echo a push back
        assert_eq!(remote.put_calls.load(Ordering::SeqCst), pushes_before);
    }

    #[tokio::test]
    async fn test_complete_challenge_updates_stats_and_pushes_record() {
        let remote = Arc::new(MemoryRemote::default());
        let (_dir, mut controller) = synced_controller(remote.clone());
        controller.startup().await;
        let id = controller.challenges()[0].id.clone();

        controller.complete_challenge(&id, 75).await.unwrap();
        controller.complete_challenge(&id, 60).await.unwrap();

        let challenge = controller.challenges().iter().find(|c| c.id == id).unwrap();
        assert_eq!(challenge.completion_times, vec![75, 60]);
        assert_eq!(challenge.best_time, Some(60));
        assert_eq!(challenge.last_time, Some(60));

        let pushed = remote.challenges.lock().unwrap()[&id].clone();
        assert_eq!(pushed.completion_times, vec![75, 60]);
    }

    #[tokio::test]
    async fn test_complete_session_appends_and_pushes() {
        let remote = Arc::new(MemoryRemote::default());
        let (_dir, mut controller) = synced_controller(remote.clone());
        controller.startup().await;

        let session = Session {
            id: generate_id(),
            date: Utc::now(),
            challenges: vec![crate::models::ChallengeSession {
                challenge_id: controller.challenges()[0].id.clone(),
                time_taken: 42,
                order: 1,
            }],
            total_time: 42,
        };
        controller.complete_session(session.clone()).await.unwrap();

        assert_eq!(controller.sessions().len(), 1);
        assert!(controller.data().current_session.is_none());
        assert_eq!(remote.sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_replaces_and_invalid_import_leaves_untouched() {
        let (_dir, mut controller) = offline_controller();
        let mut snapshot = controller.data().clone();
        snapshot.challenges.truncate(2);
        let text = LocalStore::export_snapshot(&snapshot);

        let summary = controller.import(&text).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                challenges: 2,
                sessions: 0
            }
        );
        assert_eq!(controller.challenges().len(), 2);

        let result = controller.import("{\"nope\": true}").await;
        assert!(result.is_err());
        assert_eq!(controller.challenges().len(), 2);
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let (_dir, mut controller) = offline_controller();
        controller.startup().await;
        let exported = controller.export();
        let imported = LocalStore::import_snapshot(&exported).unwrap();
        assert_eq!(&imported, controller.data());
    }

    #[tokio::test]
    async fn test_shutdown_then_local_mutations_still_work() {
        let remote = Arc::new(MemoryRemote::default());
        let (_dir, mut controller) = synced_controller(remote);
        controller.startup().await;
        controller.shutdown();

        let id = controller.add_challenge(draft("Still works")).await.unwrap();
        assert!(controller.challenges().iter().any(|c| c.id == id));
    }

    #[test]
    fn test_reorder_helper_unknown_item_restores_list() {
        let mut items: Vec<(String, u32)> = vec![("a".into(), 1), ("b".into(), 2)];
        let result = reorder(&mut items, |(id, _)| id == "ghost", 1, |item, o| item.1 = o);
        assert!(result.is_err());
        assert_eq!(items.len(), 2);
    }
}
