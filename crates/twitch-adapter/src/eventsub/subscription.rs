//! Subscription descriptor builders
//!
//! Pure constructors for the body of `POST /eventsub/subscriptions`. The
//! session never registers anything itself; callers build a descriptor
//! from the session id they got in `on_welcome` and send it through
//! [`HelixClient::create_eventsub_subscription`](crate::helix::HelixClient::create_eventsub_subscription).
//!
//! # Source
//! - https://dev.twitch.tv/docs/eventsub/eventsub-reference/#conditions

use serde_json::{Map, Value};

use super::classify::SubscriptionType;
use crate::types::{SubscriptionDescriptor, Transport};

/// Condition object; key order carries no meaning on the wire
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Condition(Map<String, Value>);

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an arbitrary condition key
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), Value::String(value.into()));
        self
    }

    pub fn broadcaster(broadcaster_user_id: impl Into<String>) -> Self {
        Self::new().with("broadcaster_user_id", broadcaster_user_id)
    }

    pub fn moderator(self, moderator_user_id: impl Into<String>) -> Self {
        self.with("moderator_user_id", moderator_user_id)
    }

    pub fn user(self, user_id: impl Into<String>) -> Self {
        self.with("user_id", user_id)
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl SubscriptionDescriptor {
    /// Descriptor for any known type; version comes from the type table
    pub fn new(subscription: SubscriptionType, condition: Condition, transport: Transport) -> Self {
        Self {
            subscription_type: subscription.name().to_string(),
            version: subscription.version().to_string(),
            condition: condition.into_map(),
            transport,
        }
    }

    /// Escape hatch for (type, version) pairs missing from the table
    pub fn custom(
        subscription_type: impl Into<String>,
        version: impl Into<String>,
        condition: Condition,
        transport: Transport,
    ) -> Self {
        Self {
            subscription_type: subscription_type.into(),
            version: version.into(),
            condition: condition.into_map(),
            transport,
        }
    }

    /// Any type whose only condition is `broadcaster_user_id`
    /// (stream.online, channel.subscribe, channel.cheer, channel.ban, ...)
    pub fn for_broadcaster(
        subscription: SubscriptionType,
        broadcaster_user_id: &str,
        transport: Transport,
    ) -> Self {
        Self::new(subscription, Condition::broadcaster(broadcaster_user_id), transport)
    }

    /// Any type conditioned on broadcaster + moderator
    /// (channel.follow, channel.moderate, channel.shield_mode.*, ...)
    pub fn for_moderator(
        subscription: SubscriptionType,
        broadcaster_user_id: &str,
        moderator_user_id: &str,
        transport: Transport,
    ) -> Self {
        Self::new(
            subscription,
            Condition::broadcaster(broadcaster_user_id).moderator(moderator_user_id),
            transport,
        )
    }

    /// channel.chat.message v1 as `user_id` reading `broadcaster_user_id`'s chat
    pub fn channel_chat_message(broadcaster_user_id: &str, user_id: &str, transport: Transport) -> Self {
        Self::new(
            SubscriptionType::ChannelChatMessage,
            Condition::broadcaster(broadcaster_user_id).user(user_id),
            transport,
        )
    }

    /// channel.follow v2
    pub fn channel_follow(broadcaster_user_id: &str, moderator_user_id: &str, transport: Transport) -> Self {
        Self::for_moderator(SubscriptionType::ChannelFollow, broadcaster_user_id, moderator_user_id, transport)
    }

    /// channel.raid v1 for raids coming into `to_broadcaster_user_id`
    pub fn channel_raid_to(to_broadcaster_user_id: &str, transport: Transport) -> Self {
        Self::new(
            SubscriptionType::ChannelRaid,
            Condition::new().with("to_broadcaster_user_id", to_broadcaster_user_id),
            transport,
        )
    }

    /// channel.raid v1 for raids leaving `from_broadcaster_user_id`
    pub fn channel_raid_from(from_broadcaster_user_id: &str, transport: Transport) -> Self {
        Self::new(
            SubscriptionType::ChannelRaid,
            Condition::new().with("from_broadcaster_user_id", from_broadcaster_user_id),
            transport,
        )
    }

    pub fn stream_online(broadcaster_user_id: &str, transport: Transport) -> Self {
        Self::for_broadcaster(SubscriptionType::StreamOnline, broadcaster_user_id, transport)
    }

    pub fn stream_offline(broadcaster_user_id: &str, transport: Transport) -> Self {
        Self::for_broadcaster(SubscriptionType::StreamOffline, broadcaster_user_id, transport)
    }

    /// user.whisper.message / user.update style: conditioned on `user_id` only
    pub fn for_user(subscription: SubscriptionType, user_id: &str, transport: Transport) -> Self {
        Self::new(subscription, Condition::new().user(user_id), transport)
    }

    /// conduit.shard.disabled for one conduit
    pub fn conduit_shard_disabled(client_id: &str, conduit_id: &str, transport: Transport) -> Self {
        Self::new(
            SubscriptionType::ConduitShardDisabled,
            Condition::new().with("client_id", client_id).with("conduit_id", conduit_id),
            transport,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_builder_keys() {
        let condition = Condition::broadcaster("1").user("2").moderator("3").with("user_id", "4");
        assert_eq!(
            Value::Object(condition.into_map()),
            json!({"broadcaster_user_id": "1", "moderator_user_id": "3", "user_id": "4"})
        );
    }

    #[test]
    fn test_chat_message_descriptor_wire_shape() {
        let desc = SubscriptionDescriptor::channel_chat_message(
            "1971641",
            "2914196",
            Transport::websocket("AQoQexAWVYKSTIu4ec_2VAxyuhAB"),
        );

        assert_eq!(
            serde_json::to_value(&desc).unwrap(),
            json!({
                "type": "channel.chat.message",
                "version": "1",
                "condition": {"broadcaster_user_id": "1971641", "user_id": "2914196"},
                "transport": {"method": "websocket", "session_id": "AQoQexAWVYKSTIu4ec_2VAxyuhAB"}
            })
        );
    }

    #[test]
    fn test_follow_uses_version_two() {
        let desc = SubscriptionDescriptor::channel_follow("1", "2", Transport::conduit("c"));
        assert_eq!(desc.version, "2");
        assert_eq!(desc.condition["moderator_user_id"], "2");
        assert_eq!(desc.transport, Transport::conduit("c"));
    }

    #[test]
    fn test_webhook_transport_keeps_secret() {
        let desc = SubscriptionDescriptor::stream_online(
            "42",
            Transport::webhook("https://example.com/eventsub", "0123456789abcdef"),
        );
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value["transport"]["secret"], "0123456789abcdef");
        assert_eq!(value["type"], "stream.online");
    }

    #[test]
    fn test_custom_descriptor() {
        let desc = SubscriptionDescriptor::custom(
            "channel.brand_new",
            "beta",
            Condition::broadcaster("7"),
            Transport::websocket("s"),
        );
        assert_eq!(desc.subscription_type, "channel.brand_new");
        assert_eq!(desc.version, "beta");
    }
}
