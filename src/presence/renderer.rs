//! Presence renderer — one marker per remote participant.
//!
//! DESIGN
//! ======
//! Message handling only computes desired state (`cursors`); `render()`
//! applies it to the [`MarkerSurface`] and owns the resulting handles
//! (`markers`). Identity is the `ParticipantId` key in both maps.
//!
//! Marker creation is gated on color resolution. The first message from an
//! unseen participant records its position in `resolving` and starts one
//! profile lookup; later messages from that participant are dropped until
//! the lookup completes. Check-then-insert on `resolving` happens inside a
//! single `&mut self` call, so a participant is looked up at most once.
//!
//! ERROR HANDLING
//! ==============
//! A failed lookup resolves to the configured default color with a warning.
//! So does a lookup task that panics or is cancelled: lookups live in a
//! `JoinSet` keyed back to their participant by task id, so no participant
//! stays in `resolving` once its task has ended. Malformed messages are
//! dropped without logging.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::message::{CursorPosition, Position};
use super::surface::MarkerSurface;
use crate::config::PresenceConfig;
use crate::frame::{Data, Frame};
use crate::ids::ParticipantId;
use crate::profile::ProfileLookup;

/// Sweep cadence when idle pruning is enabled and the timeout is large.
const MAX_PRUNE_PERIOD: Duration = Duration::from_secs(1);

/// Desired state of one remote participant's cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantCursor {
    pub participant_id: ParticipantId,
    pub position: Position,
    pub color: String,
    pub updated_at: Instant,
    dirty: bool,
}

#[derive(Debug)]
struct ColorResolution {
    participant_id: ParticipantId,
    color: String,
}

pub struct PresenceRenderer<S: MarkerSurface> {
    surface: S,
    profiles: Arc<dyn ProfileLookup>,
    default_color: String,
    idle_timeout: Option<Duration>,
    cursors: HashMap<ParticipantId, ParticipantCursor>,
    markers: HashMap<ParticipantId, S::Marker>,
    /// Participants with a lookup in flight -> position from their first message.
    resolving: HashMap<ParticipantId, Position>,
    /// Session color cache. Survives idle pruning.
    colors: HashMap<ParticipantId, String>,
    retired: Vec<ParticipantId>,
    lookups: JoinSet<ColorResolution>,
    lookup_owners: HashMap<TaskId, ParticipantId>,
}

impl<S: MarkerSurface> PresenceRenderer<S> {
    #[must_use]
    pub fn new(surface: S, profiles: Arc<dyn ProfileLookup>, config: &PresenceConfig) -> Self {
        Self {
            surface,
            profiles,
            default_color: config.default_color.clone(),
            idle_timeout: config.idle_timeout,
            cursors: HashMap::new(),
            markers: HashMap::new(),
            resolving: HashMap::new(),
            colors: HashMap::new(),
            retired: Vec::new(),
            lookups: JoinSet::new(),
            lookup_owners: HashMap::new(),
        }
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    pub fn handle_frame(&mut self, frame: &Frame) {
        self.handle_payload(&frame.data);
    }

    /// Apply one raw channel payload. Malformed payloads are ignored.
    pub fn handle_payload(&mut self, data: &Data) {
        if let Some(msg) = CursorPosition::from_payload(data) {
            self.apply(msg);
        }
    }

    /// Apply one parsed cursor message.
    pub fn apply(&mut self, msg: CursorPosition) {
        let CursorPosition { participant_id, position } = msg;

        if let Some(cursor) = self.cursors.get_mut(&participant_id) {
            cursor.position = position;
            cursor.updated_at = Instant::now();
            cursor.dirty = true;
            return;
        }

        if let Some(color) = self.colors.get(&participant_id).cloned() {
            self.insert_cursor(participant_id, position, color);
            return;
        }

        if self.resolving.contains_key(&participant_id) {
            return;
        }
        self.resolving.insert(participant_id.clone(), position);
        self.start_lookup(participant_id);
    }

    fn start_lookup(&mut self, participant_id: ParticipantId) {
        let profiles = Arc::clone(&self.profiles);
        let default_color = self.default_color.clone();
        let owner = participant_id.clone();

        debug!(%participant_id, "presence: resolving cursor color");
        let handle = self.lookups.spawn(async move {
            let color = match profiles.fetch_profile(&participant_id).await {
                Ok(profile) if !profile.display_color.trim().is_empty() => profile.display_color,
                Ok(_) => {
                    warn!(%participant_id, "presence: profile has no display color; using default");
                    default_color
                }
                Err(e) => {
                    warn!(%participant_id, error = %e, "presence: profile lookup failed; using default color");
                    default_color
                }
            };
            ColorResolution { participant_id, color }
        });
        self.lookup_owners.insert(handle.id(), owner);
    }

    /// Apply one finished lookup task. A task that panicked or was
    /// cancelled resolves its participant to the default color.
    fn finish_lookup(&mut self, joined: Result<(TaskId, ColorResolution), JoinError>) {
        let resolution = match joined {
            Ok((task_id, resolution)) => {
                self.lookup_owners.remove(&task_id);
                resolution
            }
            Err(e) => {
                let Some(participant_id) = self.lookup_owners.remove(&e.id()) else {
                    return;
                };
                warn!(%participant_id, error = %e, "presence: profile lookup task failed; using default color");
                ColorResolution { participant_id, color: self.default_color.clone() }
            }
        };
        self.complete_resolution(resolution);
    }

    fn complete_resolution(&mut self, resolution: ColorResolution) {
        let ColorResolution { participant_id, color } = resolution;
        let Some(position) = self.resolving.remove(&participant_id) else {
            return;
        };
        self.colors.insert(participant_id.clone(), color.clone());
        self.insert_cursor(participant_id, position, color);
    }

    fn insert_cursor(&mut self, participant_id: ParticipantId, position: Position, color: String) {
        let cursor =
            ParticipantCursor { participant_id: participant_id.clone(), position, color, updated_at: Instant::now(), dirty: true };
        self.cursors.insert(participant_id, cursor);
    }

    /// Drop cursors idle longer than the configured timeout. Returns how many
    /// were retired. No-op when idle pruning is disabled.
    pub fn prune_idle(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let before = self.cursors.len();
        let retired = &mut self.retired;
        self.cursors.retain(|id, cursor| {
            let keep = now.saturating_duration_since(cursor.updated_at) < timeout;
            if !keep {
                retired.push(id.clone());
            }
            keep
        });
        before - self.cursors.len()
    }

    // =========================================================================
    // RENDER
    // =========================================================================

    /// Push desired state to the surface: remove retired markers, create
    /// missing ones, move changed ones.
    pub fn render(&mut self) {
        for participant_id in self.retired.drain(..) {
            if let Some(marker) = self.markers.remove(&participant_id) {
                self.surface.remove(marker);
            }
        }

        for cursor in self.cursors.values_mut().filter(|c| c.dirty) {
            cursor.dirty = false;
            match self.markers.get_mut(&cursor.participant_id) {
                Some(marker) => self.surface.place(marker, cursor.position),
                None => {
                    let marker = self
                        .surface
                        .create(&cursor.participant_id, &cursor.color, cursor.position);
                    self.markers.insert(cursor.participant_id.clone(), marker);
                }
            }
        }
    }

    // =========================================================================
    // DRIVERS
    // =========================================================================

    /// Wait for every in-flight lookup, apply the results, and render.
    pub async fn settle(&mut self) {
        while let Some(joined) = self.lookups.join_next_with_id().await {
            self.finish_lookup(joined);
        }
        self.render();
    }

    /// Process channel messages and lookup completions until `cursor_rx`
    /// closes, rendering after each event. Returns the renderer so the
    /// caller can settle or tear it down.
    pub async fn run(mut self, mut cursor_rx: mpsc::Receiver<Frame>) -> Self {
        let prune_period = self
            .idle_timeout
            .map_or(MAX_PRUNE_PERIOD, |t| t.clamp(Duration::from_millis(1), MAX_PRUNE_PERIOD));
        let mut prune_tick = tokio::time::interval(prune_period);
        prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_frame = cursor_rx.recv() => {
                    let Some(frame) = maybe_frame else { break };
                    self.handle_frame(&frame);
                }
                Some(joined) = self.lookups.join_next_with_id(), if !self.lookups.is_empty() => {
                    self.finish_lookup(joined);
                }
                _ = prune_tick.tick(), if self.idle_timeout.is_some() => {
                    self.prune_idle(Instant::now());
                }
            }
            self.render();
        }
        self
    }

    /// Cancel in-flight lookups, remove every marker from the surface and
    /// hand the surface back.
    #[must_use]
    pub fn teardown(mut self) -> S {
        self.lookups.abort_all();
        self.lookup_owners.clear();
        for (_, marker) in self.markers.drain() {
            self.surface.remove(marker);
        }
        self.cursors.clear();
        self.resolving.clear();
        self.surface
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    #[must_use]
    pub fn cursor(&self, participant_id: &ParticipantId) -> Option<&ParticipantCursor> {
        self.cursors.get(participant_id)
    }

    #[must_use]
    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    #[must_use]
    pub fn is_resolving(&self, participant_id: &ParticipantId) -> bool {
        self.resolving.contains_key(participant_id)
    }

    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }
}

#[cfg(test)]
#[path = "renderer_test.rs"]
mod tests;
