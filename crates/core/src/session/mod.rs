//! Room membership: the session actor, its handle and the published snapshot

mod handle;
mod manager;
mod snapshot;

pub use handle::SessionHandle;
pub use manager::SessionManager;
pub use snapshot::{PeerView, RoomPhase, RoomSnapshot};
