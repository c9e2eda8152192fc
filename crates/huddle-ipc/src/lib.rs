pub mod client;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod testing;
pub mod transport;

pub use client::{PushClient, PushReader, PushWriter, WsTransport};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, ReconnectPolicy};
pub use protocol::{ClientMessage, Envelope, ServerMessage};
pub use server::{PushConnection, PushServer};
pub use transport::{FrameReader, FrameWriter, Transport};

/// Derive the push-channel URL from the HTTP API base URL.
///
/// `http://host:8080` becomes `ws://host:8080/ws`; `https` maps to `wss`.
/// Inputs that already use a WebSocket scheme are returned unchanged.
pub fn push_url_from_api(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        return trimmed.to_owned();
    }

    let (scheme, rest) = if let Some(rest) = trimmed.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        ("ws", rest)
    } else {
        ("ws", trimmed)
    };

    format!("{scheme}://{rest}/ws")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_maps_http_to_ws() {
        assert_eq!(
            push_url_from_api("http://localhost:8080"),
            "ws://localhost:8080/ws"
        );
    }

    #[test]
    fn push_url_maps_https_to_wss() {
        assert_eq!(
            push_url_from_api("https://mail.example/"),
            "wss://mail.example/ws"
        );
    }

    #[test]
    fn push_url_keeps_explicit_ws() {
        assert_eq!(
            push_url_from_api("ws://127.0.0.1:9000/push"),
            "ws://127.0.0.1:9000/push"
        );
    }
}
