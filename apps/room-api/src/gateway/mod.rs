//! The session gateway: WebSocket connections, per-room fan-out, and the
//! command/event wire protocol.

pub mod events;
pub mod fanout;
pub mod server;
pub mod session;
