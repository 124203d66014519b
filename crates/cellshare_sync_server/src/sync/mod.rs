mod room;

pub use room::{ConnectionId, RoomEvent, ShareRoom, ShareState, ShareStats};
