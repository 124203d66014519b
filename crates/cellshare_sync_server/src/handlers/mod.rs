pub mod ws;

pub use ws::{WsState, ws_handler};
