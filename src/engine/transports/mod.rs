//! Concrete [`Transport`](crate::engine::transport::Transport)
//! implementations behind feature gates.
//!
//! | Feature               | Transport              |
//! |-----------------------|------------------------|
//! | `transport-polling`   | [`PollingTransport`]   |
//! | `transport-websocket` | [`WebSocketTransport`] |

#[cfg(feature = "transport-polling")]
pub mod polling;

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-polling")]
pub use polling::{HttpClient, PollingTransport, ReqwestHttpClient};

#[cfg(feature = "transport-websocket")]
pub use websocket::{TungsteniteConnection, WebSocketTransport, WsConnection};
