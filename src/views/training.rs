use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::realtime::{
    Event, EventBus, EventData, EventKind, Subscription, TrainingDataNotice, TrainingStatus,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    #[default]
    Idle,
    Training,
    Completed,
    Failed,
}

impl TrainingPhase {
    pub fn label(&self) -> &'static str {
        match self {
            TrainingPhase::Idle => "Ready to Train",
            TrainingPhase::Training => "Training in Progress",
            TrainingPhase::Completed => "Training Completed",
            TrainingPhase::Failed => "Training Failed",
        }
    }

    fn for_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::TrainingStarted | EventKind::TrainingProgress => Some(TrainingPhase::Training),
            EventKind::TrainingCompleted => Some(TrainingPhase::Completed),
            EventKind::TrainingFailed => Some(TrainingPhase::Failed),
            _ => None,
        }
    }

    /// Phase of a polled status on its own, without any live events.
    pub fn of(status: &TrainingStatus) -> Self {
        Self::infer(status).unwrap_or_default()
    }

    /// Best guess from a polled status, which carries no event kind.
    fn infer(status: &TrainingStatus) -> Option<Self> {
        if status.is_training == Some(true) {
            return Some(TrainingPhase::Training);
        }
        let message = status.message.as_deref()?.to_lowercase();
        if message.contains("completed") {
            Some(TrainingPhase::Completed)
        } else if message.contains("failed") || message.contains("error") {
            Some(TrainingPhase::Failed)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    status: TrainingStatus,
    phase: TrainingPhase,
    contributions: Vec<TrainingDataNotice>,
}

impl MonitorState {
    /// Fields present in `newer` replace ours; absent ones keep their value.
    fn merge(&mut self, newer: &TrainingStatus) {
        if newer.is_training.is_some() {
            self.status.is_training = newer.is_training;
        }
        if newer.progress.is_some() {
            self.status.progress = newer.progress;
        }
        if newer.message.is_some() {
            self.status.message = newer.message.clone();
        }
        if newer.training_id.is_some() {
            self.status.training_id = newer.training_id.clone();
        }
    }

    fn apply(&mut self, event: &Event) {
        match event.data() {
            EventData::Training(status) => {
                self.merge(status);
                if let Some(phase) = TrainingPhase::for_event(event.kind()) {
                    self.phase = phase;
                }
            }
            EventData::TrainingDataAdded(notice) => self.contributions.push(notice.clone()),
            _ => {
                if let Some(phase) = TrainingPhase::for_event(event.kind()) {
                    self.phase = phase;
                }
            }
        }
    }
}

/// Training run progress and new contributions, as broadcast by the service.
pub struct TrainingMonitor {
    bus: EventBus,
    state: Arc<Mutex<MonitorState>>,
    _subscription: Subscription,
}

impl TrainingMonitor {
    pub fn new(bus: &EventBus) -> Self {
        let state = Arc::new(Mutex::new(MonitorState::default()));
        let mut kinds = EventKind::training().to_vec();
        kinds.push(EventKind::TrainingDataAdded);

        let subscription = {
            let state = state.clone();
            bus.listen_all(kinds, move |event| state.lock().apply(event))
        };

        Self {
            bus: bus.clone(),
            state,
            _subscription: subscription,
        }
    }

    /// Fold in a status fetched over REST.
    pub fn seed(&self, status: &TrainingStatus) {
        let mut state = self.state.lock();
        state.merge(status);
        if let Some(phase) = TrainingPhase::infer(&state.status) {
            state.phase = phase;
        }
    }

    /// Ask the service to retrain over the live link. False when not connected
    /// or a run is already in progress.
    pub fn start(&self) -> bool {
        if !self.bus.is_connected() || self.is_training() {
            return false;
        }
        self.bus.start_training();
        true
    }

    pub fn status(&self) -> TrainingStatus {
        self.state.lock().status.clone()
    }

    pub fn phase(&self) -> TrainingPhase {
        self.state.lock().phase
    }

    pub fn is_training(&self) -> bool {
        self.state.lock().phase == TrainingPhase::Training
    }

    /// Progress clamped to 0..=100.
    pub fn percent(&self) -> f64 {
        self.state.lock().status.percent()
    }

    pub fn contributions(&self) -> Vec<TrainingDataNotice> {
        self.state.lock().contributions.clone()
    }
}
