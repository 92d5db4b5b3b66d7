//! Live cursor presence.
//!
//! ARCHITECTURE
//! ============
//! pointer move → [`PresenceBroadcaster`] → room channel (`cursor:moved`)
//! → [`PresenceRenderer`] per remote sender → [`MarkerSurface`].
//!
//! The channel is best-effort fan-out: no ordering across senders, no
//! replay for late joiners. Per-sender recency is the only guarantee the
//! renderer relies on.

pub mod broadcaster;
pub mod message;
pub mod renderer;
pub mod surface;

pub use broadcaster::{PresenceBroadcaster, SurfaceBounds};
pub use message::{CursorPosition, Position};
pub use renderer::{ParticipantCursor, PresenceRenderer};
pub use surface::{HeadlessSurface, MarkerSurface, MarkerView};
