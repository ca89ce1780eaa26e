use std::sync::Arc;

use chrono::NaiveDate;

use crate::core::{
    ContributionConfig, EngineError, EngineResult, FinancialProfile, Projection,
    ProjectionSettings, project,
};

pub type SubscriptionId = u64;

type Listener = Box<dyn Fn(&ProjectionUpdate) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ProjectionUpdate {
    pub generation: u64,
    pub projection: Arc<Projection>,
    pub error: Option<EngineError>,
}

/// Inputs captured for one recomputation. Can be run off the owning thread and
/// handed back with [`ProjectionSession::complete`].
#[derive(Debug, Clone)]
pub struct RecomputeTicket {
    pub generation: u64,
    config: Arc<ContributionConfig>,
    profile: FinancialProfile,
    settings: ProjectionSettings,
    today: NaiveDate,
}

impl RecomputeTicket {
    pub fn run(&self) -> EngineResult<Projection> {
        project(&self.profile, &self.settings, &self.config, self.today)
    }
}

/// Holds the current profile and settings, recomputes the projection whenever
/// either changes and notifies subscribers. A failed projection leaves an empty
/// projection in place together with the error.
pub struct ProjectionSession {
    config: Arc<ContributionConfig>,
    profile: FinancialProfile,
    settings: ProjectionSettings,
    today: NaiveDate,
    generation: u64,
    applied: u64,
    current: Arc<Projection>,
    last_error: Option<EngineError>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: SubscriptionId,
}

impl std::fmt::Debug for ProjectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionSession")
            .field("generation", &self.generation)
            .field("applied", &self.applied)
            .field("months", &self.current.months.len())
            .field("last_error", &self.last_error)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ProjectionSession {
    pub fn new(
        config: Arc<ContributionConfig>,
        profile: FinancialProfile,
        settings: ProjectionSettings,
        today: NaiveDate,
    ) -> Self {
        let mut session = Self {
            config,
            profile,
            settings,
            today,
            generation: 0,
            applied: 0,
            current: Arc::new(Projection::empty()),
            last_error: None,
            listeners: Vec::new(),
            next_subscription: 0,
        };
        session.recompute();
        session
    }

    pub fn profile(&self) -> &FinancialProfile {
        &self.profile
    }

    pub fn settings(&self) -> &ProjectionSettings {
        &self.settings
    }

    pub fn projection(&self) -> Arc<Projection> {
        Arc::clone(&self.current)
    }

    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.applied
    }

    pub fn set_profile(&mut self, profile: FinancialProfile) {
        self.profile = profile;
        self.recompute();
    }

    pub fn set_settings(&mut self, settings: ProjectionSettings) {
        self.settings = settings;
        self.recompute();
    }

    pub fn set_today(&mut self, today: NaiveDate) {
        self.today = today;
        self.recompute();
    }

    pub fn subscribe(
        &mut self,
        listener: impl Fn(&ProjectionUpdate) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.next_subscription += 1;
        let id = self.next_subscription;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Snapshot the current inputs under a new generation. Any older ticket that
    /// completes afterwards is discarded.
    pub fn request(&mut self) -> RecomputeTicket {
        self.generation += 1;
        RecomputeTicket {
            generation: self.generation,
            config: Arc::clone(&self.config),
            profile: self.profile.clone(),
            settings: self.settings.clone(),
            today: self.today,
        }
    }

    /// Publish the result of `generation`. Returns `false` when a newer request has
    /// been issued since, in which case the result is dropped.
    pub fn complete(&mut self, generation: u64, result: EngineResult<Projection>) -> bool {
        if generation != self.generation || generation <= self.applied {
            log::debug!(
                "dropping stale projection generation {generation} (latest {})",
                self.generation
            );
            return false;
        }
        self.applied = generation;
        match result {
            Ok(projection) => {
                self.current = Arc::new(projection);
                self.last_error = None;
            }
            Err(err) => {
                log::warn!("projection failed, showing empty projection: {err}");
                self.current = Arc::new(Projection::empty());
                self.last_error = Some(err);
            }
        }
        self.notify();
        true
    }

    fn recompute(&mut self) {
        let ticket = self.request();
        let result = ticket.run();
        self.complete(ticket.generation, result);
    }

    fn notify(&self) {
        let update = ProjectionUpdate {
            generation: self.applied,
            projection: Arc::clone(&self.current),
            error: self.last_error.clone(),
        };
        for (_, listener) in &self.listeners {
            listener(&update);
        }
    }
}
