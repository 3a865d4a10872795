//! Event subscription over WebSocket
//!
//! The server pushes change events to registered bots. The transport
//! registers, subscribes to the event kinds the configuration needs, and
//! hands every text frame to the [`EventDispatcher`] before reading the next
//! one, so events are handled strictly in arrival order.

use crate::config::BotConfig;
use crate::error::{Error, Result};
use crate::events::{BRANCH_ATTRIBUTE_CHANGED, CODE_REVIEW_CHANGED, EventDispatcher};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Pause before reconnecting after the connection drops
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Messages the bot sends to the server
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientMessage<'a> {
    Register {
        #[serde(rename = "type")]
        kind: &'static str,
        name: &'a str,
        apikey: &'a str,
    },
    Subscribe {
        #[serde(rename = "type")]
        event: &'a str,
    },
}

/// Event kinds to subscribe to for a configuration
pub fn subscriptions(config: &BotConfig) -> Vec<&'static str> {
    let mut events = Vec::new();
    if config.review_filter_enabled() {
        events.push(CODE_REVIEW_CHANGED);
    }
    if config.attribute_filter_enabled() {
        events.push(BRANCH_ATTRIBUTE_CHANGED);
    }
    events
}

/// WebSocket client feeding the event dispatcher
pub struct EventTransport {
    url: Url,
    bot_name: String,
    api_key: String,
    events: Vec<&'static str>,
    reconnect_delay: Duration,
}

impl EventTransport {
    /// Create a transport for `url`
    pub fn new(
        url: &str,
        bot_name: impl Into<String>,
        api_key: impl Into<String>,
        events: Vec<&'static str>,
    ) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::Transport(format!("invalid WebSocket URL '{url}': {e}")))?;

        Ok(Self {
            url,
            bot_name: bot_name.into(),
            api_key: api_key.into(),
            events,
            reconnect_delay: RECONNECT_DELAY,
        })
    }

    /// Override the reconnect delay
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Receive events forever, reconnecting whenever the connection drops
    pub async fn run(&self, dispatcher: &EventDispatcher) {
        loop {
            match self.session(dispatcher).await {
                Ok(()) => info!(url = %self.url, "event connection closed"),
                Err(e) => warn!(url = %self.url, error = %e, "event connection failed"),
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// One connection: register, subscribe, then dispatch until closed
    async fn session(&self, dispatcher: &EventDispatcher) -> Result<()> {
        let (stream, _) = connect_async(self.url.as_str()).await.map_err(transport_error)?;
        info!(url = %self.url, "connected to event server");
        let (mut write, mut read) = stream.split();

        for message in self.handshake()? {
            write.send(Message::Text(message.into())).await.map_err(transport_error)?;
        }
        debug!(events = ?self.events, "subscribed");

        while let Some(frame) = read.next().await {
            match frame.map_err(transport_error)? {
                Message::Text(text) => dispatcher.on_message(text.as_str()),
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    /// Registration followed by one subscription per event kind
    fn handshake(&self) -> Result<Vec<String>> {
        let mut messages = vec![serde_json::to_string(&ClientMessage::Register {
            kind: "mergebot",
            name: &self.bot_name,
            apikey: &self.api_key,
        })?];
        for &event in &self.events {
            messages.push(serde_json::to_string(&ClientMessage::Subscribe { event })?);
        }
        Ok(messages)
    }
}

fn transport_error(e: impl std::fmt::Display) -> Error {
    Error::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url() {
        let result = EventTransport::new("not a url", "bot", "key", vec![]);
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn test_handshake_messages() {
        let transport = EventTransport::new(
            "wss://server:7111/plug",
            "trunk-bot",
            "secret",
            vec![CODE_REVIEW_CHANGED, BRANCH_ATTRIBUTE_CHANGED],
        )
        .unwrap();

        let messages = transport.handshake().unwrap();
        assert_eq!(messages.len(), 3);

        let register: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(register["action"], "register");
        assert_eq!(register["type"], "mergebot");
        assert_eq!(register["name"], "trunk-bot");
        assert_eq!(register["apikey"], "secret");

        let subscribe: serde_json::Value = serde_json::from_str(&messages[2]).unwrap();
        assert_eq!(subscribe["action"], "subscribe");
        assert_eq!(subscribe["type"], BRANCH_ATTRIBUTE_CHANGED);
    }
}
