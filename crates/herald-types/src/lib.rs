//! Shared domain types for the Herald platform.
//!
//! Defines the closed set of domain events that flow through the ingestion
//! pipeline, the notification taxonomy derived from them, and the status
//! enums persisted alongside outbox and notification records. Every enum
//! that lands in a database column carries a canonical string form
//! (`as_str` / `FromStr`) so rows stay readable in raw SQL.

use serde::{Deserialize, Serialize};

/// Metadata attached to a `POST_CREATED` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostMetadata {
    /// Title of the created post, if the producer supplied one.
    pub title: Option<String>,
}

/// Metadata attached to a `COMMENTED` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentMetadata {
    /// Short excerpt of the comment body for display in notifications.
    pub excerpt: Option<String>,
}

/// A domain event accepted by the ingestion endpoint.
///
/// The event type set is closed: anything outside it is rejected at the
/// edge. Each variant carries a fixed metadata shape rather than an
/// open-ended bag, so downstream consumers never guess at payload keys.
///
/// `entity_id` means different things per variant: the created post for
/// `PostCreated`, the followed user for `Followed`, and the liked or
/// commented post for `Liked`/`Commented`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    /// An author published a new post.
    #[serde(rename_all = "camelCase")]
    PostCreated {
        actor_id: String,
        entity_id: String,
        #[serde(default)]
        metadata: PostMetadata,
    },

    /// One user started following another.
    #[serde(rename_all = "camelCase")]
    Followed {
        actor_id: String,
        entity_id: String,
    },

    /// A user liked a post.
    #[serde(rename_all = "camelCase")]
    Liked {
        actor_id: String,
        entity_id: String,
    },

    /// A user commented on a post.
    #[serde(rename_all = "camelCase")]
    Commented {
        actor_id: String,
        entity_id: String,
        #[serde(default)]
        metadata: CommentMetadata,
    },
}

impl DomainEvent {
    /// Returns the canonical event type string, as stored in the outbox.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PostCreated { .. } => "POST_CREATED",
            Self::Followed { .. } => "FOLLOWED",
            Self::Liked { .. } => "LIKED",
            Self::Commented { .. } => "COMMENTED",
        }
    }

    /// The user who performed the action.
    pub fn actor_id(&self) -> &str {
        match self {
            Self::PostCreated { actor_id, .. }
            | Self::Followed { actor_id, .. }
            | Self::Liked { actor_id, .. }
            | Self::Commented { actor_id, .. } => actor_id,
        }
    }

    /// The entity the action touched (post id or user id, per variant).
    pub fn entity_id(&self) -> &str {
        match self {
            Self::PostCreated { entity_id, .. }
            | Self::Followed { entity_id, .. }
            | Self::Liked { entity_id, .. }
            | Self::Commented { entity_id, .. } => entity_id,
        }
    }

    /// The kind of entity a notification about this event points at.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Self::PostCreated { .. } | Self::Liked { .. } | Self::Commented { .. } => {
                EntityKind::Post
            }
            Self::Followed { .. } => EntityKind::User,
        }
    }

    /// Validates required fields. Type membership is already guaranteed by
    /// the closed enum; this checks the ids are non-empty.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.actor_id().trim().is_empty() {
            return Err(EventValidationError::MissingField("actorId"));
        }
        if self.entity_id().trim().is_empty() {
            return Err(EventValidationError::MissingField("entityId"));
        }
        Ok(())
    }
}

/// Error returned when an incoming event fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventValidationError {
    /// A required field was empty or absent.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// The kind of entity a notification references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "USER")]
    User,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::User => "USER",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POST" => Ok(Self::Post),
            "USER" => Ok(Self::User),
            _ => Err(ParseEnumError::new("entity kind", s)),
        }
    }
}

/// Category of a delivered notification, derived from the event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    NewFollower,
    NewPostFromFollowing,
    NewLikeOnYourPost,
    NewCommentOnYourPost,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewFollower => "NEW_FOLLOWER",
            Self::NewPostFromFollowing => "NEW_POST_FROM_FOLLOWING",
            Self::NewLikeOnYourPost => "NEW_LIKE_ON_YOUR_POST",
            Self::NewCommentOnYourPost => "NEW_COMMENT_ON_YOUR_POST",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW_FOLLOWER" => Ok(Self::NewFollower),
            "NEW_POST_FROM_FOLLOWING" => Ok(Self::NewPostFromFollowing),
            "NEW_LIKE_ON_YOUR_POST" => Ok(Self::NewLikeOnYourPost),
            "NEW_COMMENT_ON_YOUR_POST" => Ok(Self::NewCommentOnYourPost),
            _ => Err(ParseEnumError::new("notification type", s)),
        }
    }
}

/// Processing status of an outbox record.
///
/// The transition is strictly one-way: `Pending` → `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processed => "PROCESSED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSED" => Ok(Self::Processed),
            _ => Err(ParseEnumError::new("outbox status", s)),
        }
    }
}

/// Push-delivery status of a notification record.
///
/// Observability only: a `Failed` notification is still served by the pull
/// API. Set once after the relay attempt and never reverted from `Emitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Emitted,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Emitted => "EMITTED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "EMITTED" => Ok(Self::Emitted),
            "FAILED" => Ok(Self::Failed),
            _ => Err(ParseEnumError::new("delivery status", s)),
        }
    }
}

/// Error returned when parsing an unknown enum string from storage.
#[derive(Debug, Clone)]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {}: {}", self.what, self.value)
    }
}

impl std::error::Error for ParseEnumError {}
