//! Marker surface — where the renderer's desired state becomes visible.

use std::collections::HashMap;

use super::message::Position;
use crate::ids::ParticipantId;

/// A rendering target for remote cursor markers. The renderer owns every
/// handle it receives from `create` and hands each back exactly once to
/// `remove`.
pub trait MarkerSurface {
    type Marker;

    fn create(&mut self, participant_id: &ParticipantId, color: &str, position: Position) -> Self::Marker;

    fn place(&mut self, marker: &mut Self::Marker, position: Position);

    fn remove(&mut self, marker: Self::Marker);
}

/// Visible state of one marker on a [`HeadlessSurface`].
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerView {
    pub color: String,
    pub position: Position,
}

/// In-memory surface. Records what a real surface would show.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    markers: HashMap<ParticipantId, MarkerView>,
    created: usize,
}

impl HeadlessSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn marker(&self, participant_id: &ParticipantId) -> Option<&MarkerView> {
        self.markers.get(participant_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Total markers ever created, including removed ones.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created
    }
}

impl MarkerSurface for HeadlessSurface {
    type Marker = ParticipantId;

    fn create(&mut self, participant_id: &ParticipantId, color: &str, position: Position) -> ParticipantId {
        self.created += 1;
        self.markers
            .insert(participant_id.clone(), MarkerView { color: color.to_owned(), position });
        participant_id.clone()
    }

    fn place(&mut self, marker: &mut ParticipantId, position: Position) {
        if let Some(view) = self.markers.get_mut(marker) {
            view.position = position;
        }
    }

    fn remove(&mut self, marker: ParticipantId) {
        self.markers.remove(&marker);
    }
}
