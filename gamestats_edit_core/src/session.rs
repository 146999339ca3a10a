use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::{StatValue, StatsBackend};
use crate::cascade::CascadeRuleSet;
use crate::config::EngineConfig;
use crate::events::EngineEvent;
use crate::schema::{FloatStatDefinition, IntStatDefinition, SchemaCatalog, StatDefinition};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("\"{id}\" is not defined in the loaded schema")]
    UnknownId { id: String },
    #[error("\"{id}\" has no loaded live state")]
    NotLoaded { id: String },
    #[error("\"{id}\" is protected and cannot be modified from the client")]
    Protected { id: String },
    #[error("\"{id}\" is increment-only: {proposed} is below the loaded value {original}")]
    IncrementOnly {
        id: String,
        proposed: StatValue,
        original: StatValue,
    },
    #[error("\"{id}\": {proposed} is outside the allowed range [{min}, {max}]")]
    OutOfRange {
        id: String,
        proposed: StatValue,
        min: StatValue,
        max: StatValue,
    },
    #[error("\"{id}\": change of {delta} exceeds the per-commit limit of {max_change}")]
    DeltaTooLarge {
        id: String,
        delta: StatValue,
        max_change: StatValue,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("backend rejected achievement write for \"{id}\"")]
    AchievementRejected { id: String },
    #[error("backend rejected stat write for \"{id}\"")]
    StatRejected { id: String },
    #[error("backend rejected the persist call")]
    PersistRejected,
}

/// Live achievement state for one definition, snapshotted at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AchievementState {
    pub is_achieved: bool,
    /// Defined only while achieved; a backend timestamp of 0 means the
    /// unlock time is simply unknown.
    pub unlock_time: Option<u32>,
    pub original_is_achieved: bool,
    /// Countdown value owned by the external scheduler; never validated here.
    pub counter: Option<u32>,
}

impl AchievementState {
    pub fn is_modified(&self) -> bool {
        self.is_achieved != self.original_is_achieved
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatState {
    pub current: StatValue,
    pub original: StatValue,
}

impl StatState {
    pub fn is_modified(&self) -> bool {
        self.current != self.original
    }
}

/// One editing session for one running title: definitions, live state, the
/// optimistic mutation buffer, and the commit path. Not safe for concurrent
/// writers; callers serialize the apply-batch-then-commit workflow.
pub struct StatsSession<B: StatsBackend> {
    backend: B,
    config: EngineConfig,
    catalog: SchemaCatalog,
    cascade: Option<CascadeRuleSet>,
    achievement_states: HashMap<String, AchievementState>,
    stat_states: HashMap<String, StatState>,
    events: Vec<EngineEvent>,
}

impl<B: StatsBackend> StatsSession<B> {
    pub fn new(backend: B, catalog: SchemaCatalog, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            catalog,
            cascade: None,
            achievement_states: HashMap::new(),
            stat_states: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Installs title-specific cascade rules. They only run when the config
    /// also opts in via `enable_cascade`.
    pub fn with_cascade_rules(mut self, rules: CascadeRuleSet) -> Self {
        if !rules.is_empty() {
            self.cascade = Some(rules);
        }
        self
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn achievement_state(&self, id: &str) -> Option<&AchievementState> {
        self.achievement_states.get(id)
    }

    pub fn stat_state(&self, id: &str) -> Option<&StatState> {
        self.stat_states.get(id)
    }

    pub fn modified_count(&self) -> usize {
        let achievements = self
            .achievement_states
            .values()
            .filter(|state| state.is_modified())
            .count();
        let stats = self
            .stat_states
            .values()
            .filter(|state| state.is_modified())
            .count();
        achievements + stats
    }

    /// The external scheduler parks its countdown here; the engine stores it
    /// untouched.
    pub fn set_counter(&mut self, id: &str, counter: Option<u32>) {
        if let Some(state) = self.achievement_states.get_mut(id) {
            state.counter = counter;
        }
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Pulls current achieved state and stat values for every definition.
    /// A failed lookup is logged and that entry omitted; it never aborts the
    /// snapshot for the rest. Replaces all prior local edits.
    pub fn load_live_state(&mut self) {
        let mut achievement_states = HashMap::new();
        for def in &self.catalog.achievements {
            match self.backend.get_achievement(&def.id) {
                Some((achieved, unlock_time)) => {
                    let counter = self
                        .achievement_states
                        .get(&def.id)
                        .and_then(|prev| prev.counter);
                    achievement_states.insert(
                        def.id.clone(),
                        AchievementState {
                            is_achieved: achieved,
                            unlock_time: (achieved && unlock_time != 0).then_some(unlock_time),
                            original_is_achieved: achieved,
                            counter,
                        },
                    );
                }
                None => warn!(id = %def.id, "achievement lookup failed, omitted from snapshot"),
            }
        }

        let mut stat_states = HashMap::new();
        for def in &self.catalog.stats {
            match self.backend.get_stat(def.id()) {
                Some(raw) => {
                    let value = match def {
                        StatDefinition::Integer(_) => StatValue::Int(raw.as_i32()),
                        StatDefinition::Float(_) => StatValue::Float(raw.as_f32()),
                    };
                    stat_states.insert(
                        def.id().to_string(),
                        StatState {
                            current: value,
                            original: value,
                        },
                    );
                }
                None => warn!(id = %def.id(), "stat lookup failed, omitted from snapshot"),
            }
        }

        info!(
            game_id = %self.catalog.game_id,
            achievements = achievement_states.len(),
            stats = stat_states.len(),
            "live state loaded"
        );
        self.events.push(EngineEvent::LiveStateLoaded {
            achievements: achievement_states.len(),
            stats: stat_states.len(),
        });
        self.achievement_states = achievement_states;
        self.stat_states = stat_states;
    }

    /// Buffers an achievement edit. Protection is checked before anything
    /// else and holds even in simulate mode. Accepted proposals mutate local
    /// state immediately; they become durable only on a successful commit.
    pub fn propose_achievement(&mut self, id: &str, achieved: bool) -> Result<(), ValidationError> {
        let result = self.try_propose_achievement(id, achieved);
        if let Err(err) = &result {
            self.record_rejection(id, err);
        }
        result
    }

    /// Buffers a stat edit, validating in order: protection, increment-only,
    /// range, bounded delta. First failure wins.
    pub fn propose_stat(&mut self, id: &str, value: StatValue) -> Result<(), ValidationError> {
        let result = self.try_propose_stat(id, value);
        if let Err(err) = &result {
            self.record_rejection(id, err);
        }
        result
    }

    fn record_rejection(&mut self, id: &str, err: &ValidationError) {
        debug!(id, reason = %err, "proposal rejected");
        self.events.push(EngineEvent::ValidationRejected {
            id: id.to_string(),
            reason: err.to_string(),
        });
    }

    fn try_propose_achievement(
        &mut self,
        id: &str,
        achieved: bool,
    ) -> Result<(), ValidationError> {
        let def = self
            .catalog
            .achievement(id)
            .ok_or_else(|| ValidationError::UnknownId { id: id.to_string() })?;
        if def.is_protected() {
            return Err(ValidationError::Protected { id: id.to_string() });
        }
        let state = self
            .achievement_states
            .get_mut(id)
            .ok_or_else(|| ValidationError::NotLoaded { id: id.to_string() })?;

        let was_achieved = state.is_achieved;
        state.is_achieved = achieved;
        if !achieved {
            state.unlock_time = None;
        }

        if achieved && !was_achieved && self.cascade_active() {
            self.apply_cascade(id);
        }
        Ok(())
    }

    fn try_propose_stat(&mut self, id: &str, proposed: StatValue) -> Result<(), ValidationError> {
        let def = self
            .catalog
            .stat(id)
            .ok_or_else(|| ValidationError::UnknownId { id: id.to_string() })?;
        if def.is_protected() {
            return Err(ValidationError::Protected { id: id.to_string() });
        }
        let state = self
            .stat_states
            .get(id)
            .ok_or_else(|| ValidationError::NotLoaded { id: id.to_string() })?;

        let new_value = match def {
            StatDefinition::Integer(int_def) => {
                let value = proposed.as_i32();
                validate_int(int_def, value, state.original.as_i32())?;
                StatValue::Int(value)
            }
            StatDefinition::Float(float_def) => {
                let value = proposed.as_f32();
                validate_float(float_def, value, state.original.as_f32())?;
                StatValue::Float(value)
            }
        };

        if let Some(state) = self.stat_states.get_mut(id) {
            state.current = new_value;
        }
        Ok(())
    }

    /// Proposes every unprotected achievement, skipping protected ones
    /// silently. Returns how many entries actually changed.
    pub fn set_all_achievements(&mut self, achieved: bool) -> usize {
        let candidates: Vec<String> = self
            .catalog
            .achievements
            .iter()
            .filter(|def| !def.is_protected())
            .map(|def| def.id.clone())
            .collect();

        let mut changed = 0;
        for id in candidates {
            let unchanged = self
                .achievement_states
                .get(&id)
                .map_or(true, |state| state.is_achieved == achieved);
            if unchanged {
                continue;
            }
            if self.try_propose_achievement(&id, achieved).is_ok() {
                changed += 1;
            }
        }
        changed
    }

    pub fn unlock_all(&mut self) -> usize {
        self.set_all_achievements(true)
    }

    pub fn lock_all(&mut self) -> usize {
        self.set_all_achievements(false)
    }

    fn cascade_active(&self) -> bool {
        self.config.enable_cascade && self.cascade.is_some()
    }

    fn cascade_threshold(&self, achievement_id: &str) -> i32 {
        self.cascade
            .as_ref()
            .map(|rules| rules.threshold(achievement_id))
            .unwrap_or(0)
    }

    /// Side effects of a newly achieved, rule-mapped achievement: raise the
    /// dependent stat to the required value and unlock siblings whose
    /// threshold on that stat is already covered.
    fn apply_cascade(&mut self, achievement_id: &str) {
        let Some(rule) = self
            .cascade
            .as_ref()
            .and_then(|rules| rules.rule_for(achievement_id))
            .cloned()
        else {
            return;
        };

        let Some(stat_value) = self.force_stat_floor(&rule.stat_id, rule.required_value) else {
            warn!(
                achievement = achievement_id,
                stat = %rule.stat_id,
                "cascade rule targets a stat that is not loaded"
            );
            return;
        };

        let siblings: Vec<String> = self
            .cascade
            .as_ref()
            .map(|rules| {
                rules
                    .rules_on_stat(&rule.stat_id)
                    .filter(|sibling| {
                        sibling.achievement_id != achievement_id
                            && f64::from(sibling.required_value) <= stat_value
                    })
                    .map(|sibling| sibling.achievement_id.clone())
                    .collect()
            })
            .unwrap_or_default();

        for sibling in siblings {
            let protected = self
                .catalog
                .achievement(&sibling)
                .map_or(true, |def| def.is_protected());
            if protected {
                continue;
            }
            if let Some(state) = self.achievement_states.get_mut(&sibling) {
                if !state.is_achieved {
                    state.is_achieved = true;
                    state.unlock_time = None;
                    info!(achievement = %sibling, "cascade auto-unlock");
                }
            }
        }
    }

    /// Force-raises a stat for cascade consistency, bypassing the user-edit
    /// constraints. Never lowers a value the user already pushed higher.
    /// Returns the resulting stat value, or None when the stat is unknown or
    /// was omitted from the snapshot.
    fn force_stat_floor(&mut self, stat_id: &str, required: i32) -> Option<f64> {
        let forced = match self.catalog.stat(stat_id)? {
            StatDefinition::Integer(_) => StatValue::Int(required),
            StatDefinition::Float(_) => StatValue::Float(required as f32),
        };
        let state = self.stat_states.get_mut(stat_id)?;
        let current = f64::from(state.current.as_f32());
        if current < f64::from(required) {
            state.current = forced;
            info!(stat = stat_id, required, "cascade forced stat value");
            Some(f64::from(required))
        } else {
            Some(current)
        }
    }

    /// Pushes all buffered mutations: achievements ordered by ascending
    /// cascade threshold, then stats, then persist, aborting on the first
    /// backend rejection. Simulate mode skips the backend calls but reports
    /// the same counts. On success the buffered values become the new
    /// originals.
    pub fn commit(&mut self) -> Result<(usize, usize), CommitError> {
        let result = self.try_commit();
        match &result {
            Ok((achievements, stats)) => {
                self.events.push(EngineEvent::CommitResult {
                    achievements: *achievements,
                    stats: *stats,
                    ok: true,
                });
            }
            Err(err) => {
                error!(error = %err, "commit failed");
                self.events.push(EngineEvent::CommitResult {
                    achievements: 0,
                    stats: 0,
                    ok: false,
                });
            }
        }
        result
    }

    fn try_commit(&mut self) -> Result<(usize, usize), CommitError> {
        let mut pending_achievements: Vec<(String, bool)> = self
            .achievement_states
            .iter()
            .filter(|(_, state)| state.is_modified())
            .map(|(id, state)| (id.clone(), state.is_achieved))
            .collect();
        // lower cascade thresholds first so side effects of an early write
        // are consistent before a dependent achievement lands
        pending_achievements.sort_by(|(a, _), (b, _)| {
            self.cascade_threshold(a)
                .cmp(&self.cascade_threshold(b))
                .then_with(|| a.cmp(b))
        });

        let mut pending_stats: Vec<(String, StatValue)> = self
            .stat_states
            .iter()
            .filter(|(_, state)| state.is_modified())
            .map(|(id, state)| (id.clone(), state.current))
            .collect();
        pending_stats.sort_by(|(a, _), (b, _)| a.cmp(b));

        let simulate = self.config.simulate_writes;
        for (id, achieved) in &pending_achievements {
            if simulate {
                debug!(id = %id, achieved, "simulate: skipping achievement write");
            } else if !self.backend.set_achievement(id, *achieved) {
                return Err(CommitError::AchievementRejected { id: id.clone() });
            }
        }
        for (id, value) in &pending_stats {
            if simulate {
                debug!(id = %id, value = %value, "simulate: skipping stat write");
            } else if !self.backend.set_stat(id, *value) {
                return Err(CommitError::StatRejected { id: id.clone() });
            }
        }
        if !simulate && !self.backend.persist() {
            return Err(CommitError::PersistRejected);
        }

        for (id, _) in &pending_achievements {
            if let Some(state) = self.achievement_states.get_mut(id) {
                state.original_is_achieved = state.is_achieved;
            }
        }
        for (id, _) in &pending_stats {
            if let Some(state) = self.stat_states.get_mut(id) {
                state.original = state.current;
            }
        }
        info!(
            achievements = pending_achievements.len(),
            stats = pending_stats.len(),
            simulate,
            "commit applied"
        );
        Ok((pending_achievements.len(), pending_stats.len()))
    }

    /// Commit with the mandatory recovery path: any failure forces a full
    /// live-state reload, discarding local edits in favor of backend truth.
    /// The backend has no transactions, so partial rollback is never
    /// attempted.
    pub fn commit_and_sync(&mut self) -> Result<(usize, usize), CommitError> {
        match self.commit() {
            Ok(counts) => Ok(counts),
            Err(err) => {
                warn!("resynchronizing with backend after failed commit");
                self.load_live_state();
                Err(err)
            }
        }
    }

    /// Bulk reset through the backend, always followed by a reload so local
    /// state reflects whatever the backend actually did.
    pub fn reset_all(&mut self, also_achievements: bool) -> bool {
        let ok = self.backend.reset_all(also_achievements);
        if !ok {
            warn!(also_achievements, "backend rejected reset_all");
        }
        self.load_live_state();
        ok
    }
}

fn validate_int(
    def: &IntStatDefinition,
    proposed: i32,
    original: i32,
) -> Result<(), ValidationError> {
    if def.increment_only && proposed < original {
        return Err(ValidationError::IncrementOnly {
            id: def.id.clone(),
            proposed: StatValue::Int(proposed),
            original: StatValue::Int(original),
        });
    }
    if proposed < def.min_value || proposed > def.max_value {
        return Err(ValidationError::OutOfRange {
            id: def.id.clone(),
            proposed: StatValue::Int(proposed),
            min: StatValue::Int(def.min_value),
            max: StatValue::Int(def.max_value),
        });
    }
    if def.max_change > 0 {
        let delta = (i64::from(proposed) - i64::from(original)).unsigned_abs();
        if delta > def.max_change as u64 {
            return Err(ValidationError::DeltaTooLarge {
                id: def.id.clone(),
                delta: StatValue::Int(delta.min(i32::MAX as u64) as i32),
                max_change: StatValue::Int(def.max_change),
            });
        }
    }
    Ok(())
}

fn validate_float(
    def: &FloatStatDefinition,
    proposed: f32,
    original: f32,
) -> Result<(), ValidationError> {
    if def.increment_only && proposed < original {
        return Err(ValidationError::IncrementOnly {
            id: def.id.clone(),
            proposed: StatValue::Float(proposed),
            original: StatValue::Float(original),
        });
    }
    if proposed < def.min_value || proposed > def.max_value {
        return Err(ValidationError::OutOfRange {
            id: def.id.clone(),
            proposed: StatValue::Float(proposed),
            min: StatValue::Float(def.min_value),
            max: StatValue::Float(def.max_value),
        });
    }
    if def.max_change > 0.0 && (proposed - original).abs() > def.max_change {
        return Err(ValidationError::DeltaTooLarge {
            id: def.id.clone(),
            delta: StatValue::Float((proposed - original).abs()),
            max_change: StatValue::Float(def.max_change),
        });
    }
    Ok(())
}
