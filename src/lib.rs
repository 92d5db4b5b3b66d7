//! syncpad — shared whiteboard rooms with live cursor presence.
//!
//! SYSTEM CONTEXT
//! ==============
//! Two independent halves share a room id:
//! - presence: local pointer moves are broadcast as `cursor:moved` events
//!   and remote ones are drawn as one colored marker per participant
//! - snapshots: the room's raster is persisted with a trailing debounce
//!   and pushed back to every member through the store's change feed
//!
//! [`session::RoomSession`] composes both for one participant; the server
//! binary relays events between websocket clients and the store, and
//! [`client`] runs a session against a remote server.

pub mod channel;
pub mod client;
pub mod config;
pub mod db;
pub mod frame;
pub mod ids;
pub mod presence;
pub mod profile;
pub mod routes;
pub mod services;
pub mod session;
pub mod snapshot;
pub mod state;
