use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::{Lifecycle, Session};
use crate::error::{DeckError, DeckResult};
use crate::tmux::Launcher;

/// Result of moving the active pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The active session is now the one with this number
    Cycled(u32),
    /// Zero or one session; nothing moved
    NothingToCycle,
}

/// What changed when reconciling with a multiplexer listing
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Sessions seen for the first time after launch
    pub promoted: Vec<String>,
    /// Prefixed sessions found in the multiplexer that were not tracked
    pub adopted: Vec<String>,
    /// Tracked, live sessions missing from the listing
    pub missing: Vec<String>,
}

/// The authoritative list of managed sessions, their numbering and aliases,
/// and which one is active.
///
/// Sessions are kept ordered by number. The active pointer is an index into
/// that list and is kept valid across every mutation.
#[derive(Debug)]
pub struct SessionRegistry {
    prefix: String,
    sessions: Vec<Session>,
    active: Option<usize>,
    next_number: u32,
    /// Lowercased alias -> session number
    aliases: HashMap<String, u32>,
}

impl SessionRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sessions: Vec::new(),
            active: None,
            next_number: 1,
            aliases: HashMap::new(),
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.and_then(|i| self.sessions.get(i))
    }

    /// Owned copy of the active session, taken once per render cycle.
    pub fn active_snapshot(&self) -> Option<Session> {
        self.active().cloned()
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub fn by_number(&self, number: u32) -> Option<&Session> {
        self.sessions.iter().find(|s| s.number == number)
    }

    fn index_of(&self, session_id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == session_id)
    }

    /// Multiplexer name for a session number.
    pub fn name_for(&self, number: u32) -> String {
        format!("{}-{}", self.prefix, number)
    }

    fn number_from_name(&self, name: &str) -> Option<u32> {
        name.strip_prefix(&self.prefix)?
            .strip_prefix('-')?
            .parse()
            .ok()
    }

    /// Allocate the next session number. A reserved number is consumed even
    /// if the launch that follows fails.
    pub fn reserve(&mut self) -> (u32, String) {
        let number = self.next_number;
        self.next_number = self.next_number.saturating_add(1);
        (number, self.name_for(number))
    }

    /// Record a confirmed launch and make it active.
    pub fn confirm(&mut self, number: u32, session_id: String) -> &Session {
        if let Some(idx) = self.index_of(&session_id) {
            self.active = Some(idx);
            return &self.sessions[idx];
        }
        let idx = self.insert(Session::new(session_id, number, Lifecycle::Starting));
        self.active = Some(idx);
        &self.sessions[idx]
    }

    fn insert(&mut self, session: Session) -> usize {
        let idx = self
            .sessions
            .iter()
            .position(|s| s.number > session.number)
            .unwrap_or(self.sessions.len());
        self.sessions.insert(idx, session);
        if let Some(active) = self.active {
            if active >= idx {
                self.active = Some(active + 1);
            }
        }
        idx
    }

    /// Track an existing multiplexer session carrying our prefix.
    pub fn adopt(&mut self, name: &str) -> Option<&Session> {
        if self.index_of(name).is_some() {
            return None;
        }
        let number = self.number_from_name(name)?;
        if self.by_number(number).is_some() {
            return None;
        }
        self.next_number = self.next_number.max(number.saturating_add(1));
        let idx = self.insert(Session::new(name.to_string(), number, Lifecycle::Running));
        if self.active.is_none() {
            self.active = Some(idx);
        }
        info!(session = name, number, "adopted existing session");
        Some(&self.sessions[idx])
    }

    /// Reconcile with the names currently listed by the multiplexer.
    pub fn sync_listing(&mut self, listed: &[String]) -> SyncReport {
        let mut report = SyncReport::default();

        for session in &mut self.sessions {
            let present = listed.iter().any(|name| name == &session.id);
            match (session.lifecycle, present) {
                (Lifecycle::Starting, true) => {
                    session.lifecycle = Lifecycle::Running;
                    report.promoted.push(session.id.clone());
                }
                (Lifecycle::Running | Lifecycle::Unresponsive, false) => {
                    report.missing.push(session.id.clone());
                }
                _ => {}
            }
        }

        for name in listed {
            if self.adopt(name).is_some() {
                report.adopted.push(name.clone());
            }
        }
        report
    }

    pub fn set_lifecycle(&mut self, session_id: &str, lifecycle: Lifecycle) -> DeckResult<()> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| DeckError::SessionNotFound(session_id.to_string()))?;
        if session.lifecycle == lifecycle {
            return Ok(());
        }
        session.lifecycle = lifecycle;
        session.dead_since = (lifecycle == Lifecycle::Dead).then(Instant::now);
        info!(session = session_id, %lifecycle, "lifecycle changed");
        Ok(())
    }

    /// Bring a dead session back under the same identity after a relaunch.
    pub fn revive(&mut self, session_id: &str) -> DeckResult<()> {
        self.set_lifecycle(session_id, Lifecycle::Starting)
    }

    /// Remove sessions that have been dead for at least `grace`.
    pub fn reap_dead(&mut self, grace: Duration) -> Vec<Session> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.dead_since.is_some_and(|t| t.elapsed() >= grace))
            .map(|s| s.id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| self.remove(id).ok())
            .collect()
    }

    /// Drop a session. If it was active, the pointer moves to the session that
    /// slid into its place (or the new last one); an empty registry has none.
    pub fn remove(&mut self, session_id: &str) -> DeckResult<Session> {
        let idx = self
            .index_of(session_id)
            .ok_or_else(|| DeckError::SessionNotFound(session_id.to_string()))?;
        let session = self.sessions.remove(idx);

        if let Some(alias) = &session.alias {
            self.aliases.remove(&alias.to_lowercase());
        }

        self.active = match self.active {
            _ if self.sessions.is_empty() => None,
            Some(active) if active == idx => Some(idx.min(self.sessions.len() - 1)),
            Some(active) if active > idx => Some(active - 1),
            other => other,
        };

        info!(session = %session.id, number = session.number, "session removed");
        Ok(session)
    }

    /// Resolve a number, alias (case-insensitive) or session id.
    pub fn resolve(&self, key: &str) -> DeckResult<&Session> {
        let key = key.trim();
        let found = match key.parse::<u32>() {
            Ok(number) => self.by_number(number),
            Err(_) => self
                .aliases
                .get(&key.to_lowercase())
                .and_then(|n| self.by_number(*n))
                .or_else(|| self.get(key)),
        };
        found.ok_or_else(|| DeckError::SessionNotFound(key.to_string()))
    }

    pub fn switch_to(&mut self, key: &str) -> DeckResult<&Session> {
        let id = self.resolve(key)?.id.clone();
        let idx = self
            .index_of(&id)
            .ok_or_else(|| DeckError::SessionNotFound(key.to_string()))?;
        self.active = Some(idx);
        Ok(&self.sessions[idx])
    }

    pub fn cycle_next(&mut self) -> CycleOutcome {
        self.cycle(1)
    }

    pub fn cycle_prev(&mut self) -> CycleOutcome {
        self.cycle(-1)
    }

    fn cycle(&mut self, step: isize) -> CycleOutcome {
        let len = self.sessions.len();
        if len <= 1 {
            self.active = (len == 1).then_some(0);
            return CycleOutcome::NothingToCycle;
        }
        let next = match self.active {
            Some(i) => (i as isize + step).rem_euclid(len as isize) as usize,
            None => 0,
        };
        self.active = Some(next);
        CycleOutcome::Cycled(self.sessions[next].number)
    }

    /// Give `alias` to session `number`, taking it from any previous owner.
    pub fn set_alias(&mut self, number: u32, alias: &str) -> DeckResult<()> {
        let alias = alias.trim();
        if alias.is_empty()
            || alias.chars().any(char::is_whitespace)
            || alias.parse::<u32>().is_ok()
        {
            return Err(DeckError::InvalidAlias(alias.to_string()));
        }
        let idx = self
            .sessions
            .iter()
            .position(|s| s.number == number)
            .ok_or_else(|| DeckError::SessionNotFound(number.to_string()))?;

        let key = alias.to_lowercase();
        if let Some(previous) = self.aliases.remove(&key) {
            if let Some(owner) = self.sessions.iter_mut().find(|s| s.number == previous) {
                owner.alias = None;
            }
        }
        if let Some(old) = self.sessions[idx].alias.take() {
            self.aliases.remove(&old.to_lowercase());
        }

        self.sessions[idx].alias = Some(alias.to_string());
        self.aliases.insert(key, number);
        Ok(())
    }

    pub fn clear_alias(&mut self, number: u32) -> DeckResult<()> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.number == number)
            .ok_or_else(|| DeckError::SessionNotFound(number.to_string()))?;
        if let Some(old) = session.alias.take() {
            self.aliases.remove(&old.to_lowercase());
        }
        Ok(())
    }

    /// Detect and repair inconsistent bookkeeping. Returns what was wrong.
    pub fn check_invariants(&mut self) -> Vec<DeckError> {
        let mut violations = Vec::new();

        if let Some(active) = self.active {
            if active >= self.sessions.len() {
                violations.push(DeckError::RegistryInvariantViolation(format!(
                    "active index {} out of {} sessions",
                    active,
                    self.sessions.len()
                )));
                self.active = None;
            }
        }

        let numbers: Vec<u32> = self.sessions.iter().map(|s| s.number).collect();
        self.aliases.retain(|alias, number| {
            let live = numbers.contains(number);
            if !live {
                violations.push(DeckError::RegistryInvariantViolation(format!(
                    "alias '{}' points at missing session {}",
                    alias, number
                )));
            }
            live
        });

        for session in &mut self.sessions {
            let Some(alias) = &session.alias else { continue };
            if self.aliases.get(&alias.to_lowercase()) != Some(&session.number) {
                violations.push(DeckError::RegistryInvariantViolation(format!(
                    "session {} claims alias '{}' it does not own",
                    session.number, alias
                )));
                session.alias = None;
            }
        }

        for violation in &violations {
            warn!(error = %violation, "registry repaired");
        }
        violations
    }
}

/// Start the session reserved as `name`. Runs without the registry so a
/// slow launcher never holds it; pass the id to [`SessionRegistry::confirm`].
pub async fn launch(
    launcher: &dyn Launcher,
    name: &str,
    work_dir: &Path,
    initial_input: Option<&str>,
) -> DeckResult<String> {
    launcher
        .start(name, work_dir, initial_input)
        .await
        .map_err(|e| {
            warn!(session = name, error = %e, "launch failed");
            DeckError::LaunchFailure(format!("{:#}", e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Launcher double: fails for the names listed in `refuse`.
    #[derive(Default)]
    struct FakeLauncher {
        refuse: Vec<String>,
    }

    #[async_trait]
    impl Launcher for FakeLauncher {
        async fn start(&self, name: &str, _work_dir: &Path, _initial: Option<&str>) -> Result<String> {
            if self.refuse.iter().any(|r| r == name) {
                anyhow::bail!("duplicate session: {}", name);
            }
            Ok(name.to_string())
        }

        async fn send_text(&self, _: &str, _: &str, _: bool) -> bool {
            true
        }

        async fn send_control_key(&self, _: &str, _: &str) -> bool {
            true
        }

        async fn exists(&self, _: &str) -> bool {
            true
        }

        async fn terminate(&self, _: &str) -> bool {
            true
        }
    }

    async fn create(registry: &mut SessionRegistry, launcher: &FakeLauncher) -> DeckResult<Session> {
        let (number, name) = registry.reserve();
        let session_id = launch(launcher, &name, Path::new("."), None).await?;
        Ok(registry.confirm(number, session_id).clone())
    }

    async fn registry_with(n: usize) -> SessionRegistry {
        let launcher = FakeLauncher::default();
        let mut registry = SessionRegistry::new("deck");
        for _ in 0..n {
            create(&mut registry, &launcher).await.expect("create");
        }
        registry
    }

    fn numbers(registry: &SessionRegistry) -> Vec<u32> {
        registry.sessions().iter().map(|s| s.number).collect()
    }

    #[tokio::test]
    async fn test_create_assigns_numbers_and_activates() {
        let registry = registry_with(3).await;
        assert_eq!(numbers(&registry), vec![1, 2, 3]);
        assert_eq!(registry.active().map(|s| s.number), Some(3));
        assert_eq!(registry.sessions()[0].id, "deck-1");
        assert_eq!(registry.sessions()[0].lifecycle, Lifecycle::Starting);
    }

    #[tokio::test]
    async fn test_failed_launch_consumes_number() {
        let launcher = FakeLauncher {
            refuse: vec!["deck-2".to_string()],
            ..Default::default()
        };
        let mut registry = SessionRegistry::new("deck");
        create(&mut registry, &launcher).await.expect("first");
        let err = create(&mut registry, &launcher)
            .await
            .expect_err("second fails");
        assert!(matches!(err, DeckError::LaunchFailure(_)));
        let third = create(&mut registry, &launcher).await.expect("third");

        assert_eq!(third.number, 3);
        assert_eq!(numbers(&registry), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_remove_middle_keeps_numbers_and_valid_active() {
        let mut registry = registry_with(3).await;
        registry.switch_to("2").expect("switch");

        registry.remove("deck-2").expect("remove");

        assert_eq!(numbers(&registry), vec![1, 3]);
        let active = registry.active().expect("active session");
        assert!(registry.sessions().contains(active));
        assert_eq!(active.number, 3);
    }

    #[tokio::test]
    async fn test_remove_last_active_moves_back() {
        let mut registry = registry_with(3).await;
        registry.remove("deck-3").expect("remove");
        assert_eq!(registry.active().map(|s| s.number), Some(2));
    }

    #[tokio::test]
    async fn test_remove_before_active_shifts_index() {
        let mut registry = registry_with(3).await;
        registry.remove("deck-1").expect("remove");
        assert_eq!(registry.active().map(|s| s.number), Some(3));
    }

    #[tokio::test]
    async fn test_remove_everything_clears_active() {
        let mut registry = registry_with(1).await;
        registry.remove("deck-1").expect("remove");
        assert!(registry.active().is_none());
        assert!(matches!(
            registry.remove("deck-1"),
            Err(DeckError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_alias_moves_to_new_owner() {
        let mut registry = registry_with(2).await;
        registry.set_alias(2, "main").expect("alias 2");
        registry.set_alias(1, "main").expect("alias 1");

        assert_eq!(registry.resolve("main").map(|s| s.number), Ok(1));
        assert_eq!(registry.resolve("MAIN").map(|s| s.number), Ok(1));
        assert_eq!(registry.by_number(2).and_then(|s| s.alias.clone()), None);
        assert!(registry.check_invariants().is_empty());
    }

    #[tokio::test]
    async fn test_realias_releases_old_name() {
        let mut registry = registry_with(1).await;
        registry.set_alias(1, "old").expect("alias");
        registry.set_alias(1, "new").expect("realias");
        assert!(registry.resolve("old").is_err());
        assert_eq!(registry.resolve("new").map(|s| s.number), Ok(1));
    }

    #[tokio::test]
    async fn test_alias_validation() {
        let mut registry = registry_with(1).await;
        assert!(matches!(registry.set_alias(1, "  "), Err(DeckError::InvalidAlias(_))));
        assert!(matches!(registry.set_alias(1, "42"), Err(DeckError::InvalidAlias(_))));
        assert!(matches!(registry.set_alias(1, "a b"), Err(DeckError::InvalidAlias(_))));
        assert!(matches!(registry.set_alias(9, "x"), Err(DeckError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_removing_session_releases_alias() {
        let mut registry = registry_with(2).await;
        registry.set_alias(1, "build").expect("alias");
        registry.remove("deck-1").expect("remove");
        assert!(registry.resolve("build").is_err());
        registry.set_alias(2, "build").expect("reuse alias");
    }

    #[tokio::test]
    async fn test_switch_to_unknown_is_error() {
        let mut registry = registry_with(2).await;
        assert_eq!(
            registry.switch_to("nope").map(|s| s.number),
            Err(DeckError::SessionNotFound("nope".to_string()))
        );
        assert_eq!(registry.active().map(|s| s.number), Some(2));
        assert_eq!(registry.switch_to("deck-1").map(|s| s.number), Ok(1));
    }

    #[tokio::test]
    async fn test_cycle_wraps() {
        let mut registry = registry_with(3).await;
        assert_eq!(registry.cycle_next(), CycleOutcome::Cycled(1));
        assert_eq!(registry.cycle_prev(), CycleOutcome::Cycled(3));
        assert_eq!(registry.cycle_prev(), CycleOutcome::Cycled(2));
    }

    #[tokio::test]
    async fn test_cycle_with_one_or_none() {
        let mut empty = SessionRegistry::new("deck");
        assert_eq!(empty.cycle_next(), CycleOutcome::NothingToCycle);
        assert!(empty.active().is_none());

        let mut single = registry_with(1).await;
        assert_eq!(single.cycle_prev(), CycleOutcome::NothingToCycle);
        assert_eq!(single.active().map(|s| s.number), Some(1));
    }

    #[test]
    fn test_sync_listing_promotes_adopts_and_reports_missing() {
        let mut registry = SessionRegistry::new("deck");
        let (number, name) = registry.reserve();
        registry.confirm(number, name);
        registry.adopt("deck-7");

        let listed = vec![
            "deck-1".to_string(),
            "deck-4".to_string(),
            "scratch".to_string(),
        ];
        let report = registry.sync_listing(&listed);
        assert_eq!(report.promoted, vec!["deck-1"]);
        assert_eq!(report.adopted, vec!["deck-4"]);
        assert_eq!(report.missing, vec!["deck-7"]);
        assert_eq!(numbers(&registry), vec![1, 4, 7]);

        // new sessions continue after the highest adopted number
        assert_eq!(registry.reserve().0, 8);
    }

    #[test]
    fn test_adopt_keeps_active_pointer() {
        let mut registry = SessionRegistry::new("deck");
        registry.adopt("deck-5");
        registry.switch_to("5").expect("switch");
        registry.adopt("deck-2");
        assert_eq!(registry.active().map(|s| s.number), Some(5));
        assert!(registry.adopt("deck-2").is_none());
        assert!(registry.adopt("other-3").is_none());
    }

    #[test]
    fn test_adopt_highest_number_does_not_overflow() {
        let mut registry = SessionRegistry::new("deck");
        let adopted = registry.adopt("deck-4294967295").map(|s| s.number);
        assert_eq!(adopted, Some(u32::MAX));
        assert_eq!(registry.reserve().0, u32::MAX);
        assert_eq!(registry.reserve().0, u32::MAX);
    }

    #[test]
    fn test_reap_dead_after_grace() {
        let mut registry = SessionRegistry::new("deck");
        registry.adopt("deck-1");
        registry.adopt("deck-2");
        registry.set_lifecycle("deck-1", Lifecycle::Dead).expect("mark");

        assert!(registry.reap_dead(Duration::from_secs(60)).is_empty());
        let reaped = registry.reap_dead(Duration::ZERO);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id, "deck-1");
        assert_eq!(numbers(&registry), vec![2]);
    }

    #[test]
    fn test_revive_clears_dead_marker() {
        let mut registry = SessionRegistry::new("deck");
        registry.adopt("deck-1");
        registry.set_lifecycle("deck-1", Lifecycle::Dead).expect("mark");
        registry.revive("deck-1").expect("revive");
        let session = registry.get("deck-1").expect("session");
        assert_eq!(session.lifecycle, Lifecycle::Starting);
        assert!(session.dead_since.is_none());
    }

    #[test]
    fn test_check_invariants_self_heals() {
        let mut registry = SessionRegistry::new("deck");
        registry.adopt("deck-1");
        registry.active = Some(5);
        registry.aliases.insert("ghost".to_string(), 99);
        registry.sessions[0].alias = Some("stray".to_string());

        let violations = registry.check_invariants();
        assert_eq!(violations.len(), 3);
        assert!(registry.active.is_none());
        assert!(registry.aliases.is_empty());
        assert!(registry.sessions[0].alias.is_none());
        assert!(registry.check_invariants().is_empty());
    }
}
