//! Frame classification
//!
//! Outer level: the five session-lifecycle categories, decided by
//! `metadata.message_type` alone, so at most one predicate holds per frame.
//! Inner level (notifications only): the exact `(subscription_type,
//! subscription_version)` pair. A pair missing from the table is still a
//! notification, it just has no [`SubscriptionType`].
//!
//! # Source
//! - https://dev.twitch.tv/docs/eventsub/websocket-reference
//! - https://dev.twitch.tv/docs/eventsub/eventsub-subscription-types

use serde::{Deserialize, Serialize};

use crate::types::Frame;

/// Session-lifecycle category of a frame
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Welcome,
    Keepalive,
    Notification,
    Reconnect,
    Revocation,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::Welcome,
        MessageKind::Keepalive,
        MessageKind::Notification,
        MessageKind::Reconnect,
        MessageKind::Revocation,
    ];

    /// Wire value of `metadata.message_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Welcome => "session_welcome",
            MessageKind::Keepalive => "session_keepalive",
            MessageKind::Notification => "notification",
            MessageKind::Reconnect => "session_reconnect",
            MessageKind::Revocation => "revocation",
        }
    }

    pub fn from_message_type(message_type: &str) -> Option<Self> {
        MessageKind::ALL.into_iter().find(|kind| kind.as_str() == message_type)
    }
}

pub fn is_welcome(frame: &Frame) -> bool {
    frame.kind() == Some(MessageKind::Welcome)
}

pub fn is_keepalive(frame: &Frame) -> bool {
    frame.kind() == Some(MessageKind::Keepalive)
}

pub fn is_notification(frame: &Frame) -> bool {
    frame.kind() == Some(MessageKind::Notification)
}

pub fn is_reconnect(frame: &Frame) -> bool {
    frame.kind() == Some(MessageKind::Reconnect)
}

pub fn is_revocation(frame: &Frame) -> bool {
    frame.kind() == Some(MessageKind::Revocation)
}

/// Known subscription type of a notification frame
pub fn notification_type(frame: &Frame) -> Option<SubscriptionType> {
    if !is_notification(frame) {
        return None;
    }
    let name = frame.metadata.subscription_type.as_deref()?;
    let version = frame.metadata.subscription_version.as_deref()?;
    SubscriptionType::from_parts(name, version)
}

/// True when `frame` is a notification for exactly `subscription`'s type and version
pub fn is_notification_of(frame: &Frame, subscription: SubscriptionType) -> bool {
    notification_type(frame) == Some(subscription)
}

macro_rules! subscription_types {
    ($($variant:ident => ($name:literal, $version:literal),)+) => {
        /// EventSub subscription types this client knows, one variant per
        /// (type, version) pair
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum SubscriptionType {
            $($variant,)+
        }

        impl SubscriptionType {
            pub const ALL: &'static [SubscriptionType] = &[$(SubscriptionType::$variant,)+];

            /// Wire value of the `type` field
            pub fn name(&self) -> &'static str {
                match self {
                    $(SubscriptionType::$variant => $name,)+
                }
            }

            /// Wire value of the `version` field
            pub fn version(&self) -> &'static str {
                match self {
                    $(SubscriptionType::$variant => $version,)+
                }
            }

            /// Exact match on both strings
            pub fn from_parts(name: &str, version: &str) -> Option<Self> {
                match (name, version) {
                    $(($name, $version) => Some(SubscriptionType::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

subscription_types! {
    AutomodMessageHold => ("automod.message.hold", "1"),
    AutomodMessageHoldV2 => ("automod.message.hold", "2"),
    AutomodMessageUpdate => ("automod.message.update", "1"),
    AutomodMessageUpdateV2 => ("automod.message.update", "2"),
    AutomodSettingsUpdate => ("automod.settings.update", "1"),
    AutomodTermsUpdate => ("automod.terms.update", "1"),
    ChannelUpdate => ("channel.update", "2"),
    ChannelFollow => ("channel.follow", "2"),
    ChannelAdBreakBegin => ("channel.ad_break.begin", "1"),
    ChannelChatClear => ("channel.chat.clear", "1"),
    ChannelChatClearUserMessages => ("channel.chat.clear_user_messages", "1"),
    ChannelChatMessage => ("channel.chat.message", "1"),
    ChannelChatMessageDelete => ("channel.chat.message_delete", "1"),
    ChannelChatNotification => ("channel.chat.notification", "1"),
    ChannelChatSettingsUpdate => ("channel.chat_settings.update", "1"),
    ChannelChatUserMessageHold => ("channel.chat.user_message_hold", "1"),
    ChannelChatUserMessageUpdate => ("channel.chat.user_message_update", "1"),
    ChannelSharedChatBegin => ("channel.shared_chat.begin", "1"),
    ChannelSharedChatUpdate => ("channel.shared_chat.update", "1"),
    ChannelSharedChatEnd => ("channel.shared_chat.end", "1"),
    ChannelSubscribe => ("channel.subscribe", "1"),
    ChannelSubscriptionEnd => ("channel.subscription.end", "1"),
    ChannelSubscriptionGift => ("channel.subscription.gift", "1"),
    ChannelSubscriptionMessage => ("channel.subscription.message", "1"),
    ChannelCheer => ("channel.cheer", "1"),
    ChannelRaid => ("channel.raid", "1"),
    ChannelBan => ("channel.ban", "1"),
    ChannelUnban => ("channel.unban", "1"),
    ChannelUnbanRequestCreate => ("channel.unban_request.create", "1"),
    ChannelUnbanRequestResolve => ("channel.unban_request.resolve", "1"),
    ChannelModerate => ("channel.moderate", "1"),
    ChannelModerateV2 => ("channel.moderate", "2"),
    ChannelModeratorAdd => ("channel.moderator.add", "1"),
    ChannelModeratorRemove => ("channel.moderator.remove", "1"),
    ChannelPointsAutomaticRewardRedemptionAdd => ("channel.channel_points_automatic_reward_redemption.add", "1"),
    ChannelPointsCustomRewardAdd => ("channel.channel_points_custom_reward.add", "1"),
    ChannelPointsCustomRewardUpdate => ("channel.channel_points_custom_reward.update", "1"),
    ChannelPointsCustomRewardRemove => ("channel.channel_points_custom_reward.remove", "1"),
    ChannelPointsCustomRewardRedemptionAdd => ("channel.channel_points_custom_reward_redemption.add", "1"),
    ChannelPointsCustomRewardRedemptionUpdate => ("channel.channel_points_custom_reward_redemption.update", "1"),
    ChannelPollBegin => ("channel.poll.begin", "1"),
    ChannelPollProgress => ("channel.poll.progress", "1"),
    ChannelPollEnd => ("channel.poll.end", "1"),
    ChannelPredictionBegin => ("channel.prediction.begin", "1"),
    ChannelPredictionProgress => ("channel.prediction.progress", "1"),
    ChannelPredictionLock => ("channel.prediction.lock", "1"),
    ChannelPredictionEnd => ("channel.prediction.end", "1"),
    ChannelSuspiciousUserMessage => ("channel.suspicious_user.message", "1"),
    ChannelSuspiciousUserUpdate => ("channel.suspicious_user.update", "1"),
    ChannelVipAdd => ("channel.vip.add", "1"),
    ChannelVipRemove => ("channel.vip.remove", "1"),
    ChannelWarningAcknowledge => ("channel.warning.acknowledge", "1"),
    ChannelWarningSend => ("channel.warning.send", "1"),
    ChannelCharityCampaignDonate => ("channel.charity_campaign.donate", "1"),
    ChannelCharityCampaignStart => ("channel.charity_campaign.start", "1"),
    ChannelCharityCampaignProgress => ("channel.charity_campaign.progress", "1"),
    ChannelCharityCampaignStop => ("channel.charity_campaign.stop", "1"),
    ChannelGoalBegin => ("channel.goal.begin", "1"),
    ChannelGoalProgress => ("channel.goal.progress", "1"),
    ChannelGoalEnd => ("channel.goal.end", "1"),
    ChannelHypeTrainBegin => ("channel.hype_train.begin", "1"),
    ChannelHypeTrainProgress => ("channel.hype_train.progress", "1"),
    ChannelHypeTrainEnd => ("channel.hype_train.end", "1"),
    ChannelShieldModeBegin => ("channel.shield_mode.begin", "1"),
    ChannelShieldModeEnd => ("channel.shield_mode.end", "1"),
    ChannelShoutoutCreate => ("channel.shoutout.create", "1"),
    ChannelShoutoutReceive => ("channel.shoutout.receive", "1"),
    ConduitShardDisabled => ("conduit.shard.disabled", "1"),
    StreamOnline => ("stream.online", "1"),
    StreamOffline => ("stream.offline", "1"),
    UserUpdate => ("user.update", "1"),
    UserWhisperMessage => ("user.whisper.message", "1"),
}
