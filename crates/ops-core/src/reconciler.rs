//! Single owner of every live collection the console displays.
//!
//! Events from all topics pass through [`EntityReconciler::apply`], one at a
//! time, on the thread that owns the reconciler. The mission lifecycle is touched
//! by three different event kinds; the terminal-status rule lives in
//! [`EntityReconciler::transition_mission`] so it is enforced in one place.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::{
    events::ConsoleEvent,
    model::{AudioEvent, Detection, DroneState, LogLine, MissionStatus, MissionWaypoint},
    window::RecentWindow,
};

pub const DEFAULT_DETECTION_WINDOW: usize = 20;
pub const DEFAULT_AUDIO_WINDOW: usize = 50;
pub const DEFAULT_MISSION_WINDOW: usize = 100;
pub const DEFAULT_LOG_WINDOW: usize = 200;

/// Capacities of the recency windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowLimits {
    pub detections: usize,
    pub audio_events: usize,
    pub missions: usize,
    pub logs: usize,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            detections: DEFAULT_DETECTION_WINDOW,
            audio_events: DEFAULT_AUDIO_WINDOW,
            missions: DEFAULT_MISSION_WINDOW,
            logs: DEFAULT_LOG_WINDOW,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Ignored(IgnoreReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The mission is unknown, usually created before this session's window.
    UnknownMission,
    /// The mission already reached a terminal status.
    TerminalMission,
    /// A mission with the same id is already tracked.
    DuplicateMission,
    /// `mission_ended` carried a reason that is not a terminal status.
    UnknownEndReason,
}

impl IgnoreReason {
    pub fn label(self) -> &'static str {
        match self {
            IgnoreReason::UnknownMission => "unknown_mission",
            IgnoreReason::TerminalMission => "terminal_mission",
            IgnoreReason::DuplicateMission => "duplicate_mission",
            IgnoreReason::UnknownEndReason => "unknown_end_reason",
        }
    }
}

/// Entity counts for status lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub detections: usize,
    pub overlay_boxes: usize,
    pub audio_events: usize,
    pub map_events: usize,
    pub missions: usize,
    pub active_missions: usize,
    pub drones: usize,
    pub logs: usize,
}

pub struct EntityReconciler {
    detections: RecentWindow<Detection>,
    audio_events: RecentWindow<AudioEvent>,
    map_events: RecentWindow<AudioEvent>,
    missions: RecentWindow<MissionWaypoint>,
    drones: BTreeMap<String, DroneState>,
    drones_revision: u64,
    logs: RecentWindow<LogLine>,
}

impl Default for EntityReconciler {
    fn default() -> Self {
        Self::new(WindowLimits::default())
    }
}

impl EntityReconciler {
    pub fn new(limits: WindowLimits) -> Self {
        Self {
            detections: RecentWindow::new(limits.detections),
            audio_events: RecentWindow::new(limits.audio_events),
            map_events: RecentWindow::new(limits.audio_events),
            missions: RecentWindow::new(limits.missions),
            drones: BTreeMap::new(),
            drones_revision: 0,
            logs: RecentWindow::new(limits.logs),
        }
    }

    /// Apply one decoded event. Never fails; rejected events report why.
    pub fn apply(&mut self, event: ConsoleEvent) -> ApplyOutcome {
        let kind = event.kind();
        let outcome = match event {
            ConsoleEvent::Detection(detection) => {
                self.detections.push(detection);
                ApplyOutcome::Inserted
            }
            ConsoleEvent::AudioEvent(event) => {
                if event.coordinates().is_some() {
                    self.map_events.push(event.clone());
                }
                self.audio_events.push(event);
                ApplyOutcome::Inserted
            }
            ConsoleEvent::MissionEnqueued(mut waypoint) => {
                if self.missions.find(|m| m.id == waypoint.id).is_some() {
                    ApplyOutcome::Ignored(IgnoreReason::DuplicateMission)
                } else {
                    waypoint.status = MissionStatus::Queued;
                    self.missions.push(waypoint);
                    ApplyOutcome::Inserted
                }
            }
            ConsoleEvent::MissionDispatched { id } => {
                self.transition_mission(&id, MissionStatus::Dispatched)
            }
            ConsoleEvent::MissionEnded { id, reason } => {
                match MissionStatus::from_end_reason(&reason) {
                    Some(status) => self.transition_mission(&id, status),
                    None => ApplyOutcome::Ignored(IgnoreReason::UnknownEndReason),
                }
            }
            ConsoleEvent::MissionTimeoutRtl { id } => {
                self.transition_mission(&id, MissionStatus::TimeoutRtl)
            }
            ConsoleEvent::DroneUpdate(state) => {
                self.drones_revision = self.drones_revision.wrapping_add(1);
                match self.drones.insert(state.id.clone(), state) {
                    Some(_) => ApplyOutcome::Updated,
                    None => ApplyOutcome::Inserted,
                }
            }
            ConsoleEvent::Log(line) => {
                self.logs.push(line);
                ApplyOutcome::Inserted
            }
        };

        match outcome {
            ApplyOutcome::Ignored(reason) => {
                debug!(kind, reason = reason.label(), "event ignored by reconciler")
            }
            _ => trace!(kind, ?outcome, "event applied"),
        }
        outcome
    }

    /// Move a mission to `next` unless it is unknown or already terminal.
    fn transition_mission(&mut self, id: &str, next: MissionStatus) -> ApplyOutcome {
        let Some(current) = self.missions.find(|m| m.id == id).map(|m| m.status) else {
            return ApplyOutcome::Ignored(IgnoreReason::UnknownMission);
        };
        if current.is_terminal() {
            return ApplyOutcome::Ignored(IgnoreReason::TerminalMission);
        }
        if let Some(mission) = self.missions.find_mut(|m| m.id == id) {
            mission.status = next;
        }
        ApplyOutcome::Updated
    }

    pub fn seed_detections(&mut self, newest_first: Vec<Detection>) {
        self.detections.seed(newest_first);
    }

    pub fn seed_audio_events(&mut self, newest_first: Vec<AudioEvent>) {
        let mapped: Vec<AudioEvent> = newest_first
            .iter()
            .filter(|event| event.coordinates().is_some())
            .cloned()
            .collect();
        self.map_events.seed(mapped);
        self.audio_events.seed(newest_first);
    }

    pub fn seed_logs(&mut self, newest_first: Vec<LogLine>) {
        self.logs.seed(newest_first);
    }

    /// Every recent detection, including those without a box (ticker view).
    pub fn detections(&self) -> &RecentWindow<Detection> {
        &self.detections
    }

    /// Detections that carry a box, newest first (overlay view).
    pub fn overlay_detections(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(|det| det.bbox.is_some())
    }

    /// Every recent audio event, with or without coordinates.
    pub fn audio_events(&self) -> &RecentWindow<AudioEvent> {
        &self.audio_events
    }

    /// Audio events that can be placed on the map.
    pub fn map_events(&self) -> &RecentWindow<AudioEvent> {
        &self.map_events
    }

    pub fn missions(&self) -> &RecentWindow<MissionWaypoint> {
        &self.missions
    }

    pub fn mission(&self, id: &str) -> Option<&MissionWaypoint> {
        self.missions.find(|m| m.id == id)
    }

    pub fn drones(&self) -> impl Iterator<Item = &DroneState> {
        self.drones.values()
    }

    pub fn drone(&self, id: &str) -> Option<&DroneState> {
        self.drones.get(id)
    }

    pub fn drones_revision(&self) -> u64 {
        self.drones_revision
    }

    pub fn logs(&self) -> &RecentWindow<LogLine> {
        &self.logs
    }

    pub fn counts(&self) -> EntityCounts {
        EntityCounts {
            detections: self.detections.len(),
            overlay_boxes: self.overlay_detections().count(),
            audio_events: self.audio_events.len(),
            map_events: self.map_events.len(),
            missions: self.missions.len(),
            active_missions: self
                .missions
                .iter()
                .filter(|m| !m.status.is_terminal())
                .count(),
            drones: self.drones.len(),
            logs: self.logs.len(),
        }
    }
}
