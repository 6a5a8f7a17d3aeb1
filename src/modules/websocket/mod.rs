/// WebSocket Module
///
/// Real-time side of messaging:
///
/// - Frame protocol (`ClientFrame` & `ServerEvent`)
/// - DeliveryRouter actor (connections and per-user channels)
/// - WebSocketSession actor (one per connection)
/// - Presence (connection tracking and last seen)
/// - HTTP handlers (upgrade, presence lookup)
pub mod events;
pub mod handler;
pub mod message;
pub mod presence;
pub mod server;
pub mod session;
