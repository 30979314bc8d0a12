/// Idle read timeout wrapper used to detect silently dead WebSocket connections.
pub mod timeout;
