//! Recipient resolution: pure functions over an event and its context.

use herald_types::{DomainEvent, EntityKind, NotificationType};

/// Social context the worker assembles before resolving recipients.
///
/// Resolution itself does no I/O: everything it needs is fetched up front
/// and passed in here, which keeps the recipient rules trivially testable.
#[derive(Debug, Clone, Default)]
pub struct RecipientContext {
    /// Followers of the acting user (used for post-created events).
    pub followers: Vec<String>,
    /// Resolved owner of the entity acted upon (used for likes/comments).
    pub entity_owner: Option<String>,
}

/// Resolves the recipients of an event.
///
/// The actor is never a recipient, whatever the event type: nobody is
/// notified about their own action. Duplicate ids in the context collapse
/// to one.
pub fn resolve_recipients(event: &DomainEvent, ctx: &RecipientContext) -> Vec<String> {
    let candidates: Vec<String> = match event {
        DomainEvent::PostCreated { .. } => ctx.followers.clone(),
        DomainEvent::Followed { entity_id, .. } => vec![entity_id.clone()],
        DomainEvent::Liked { .. } | DomainEvent::Commented { .. } => {
            ctx.entity_owner.iter().cloned().collect()
        }
    };

    let actor = event.actor_id();
    let mut recipients = Vec::new();
    for candidate in candidates {
        if candidate != actor && !recipients.contains(&candidate) {
            recipients.push(candidate);
        }
    }
    recipients
}

/// Derives the notification category, entity kind, and display message for
/// an event, given the actor's display name.
pub fn notification_details(
    event: &DomainEvent,
    actor_name: &str,
) -> (NotificationType, EntityKind, String) {
    match event {
        DomainEvent::PostCreated { .. } => (
            NotificationType::NewPostFromFollowing,
            EntityKind::Post,
            format!("{actor_name} created a new post"),
        ),
        DomainEvent::Followed { .. } => (
            NotificationType::NewFollower,
            EntityKind::User,
            format!("{actor_name} started following you"),
        ),
        DomainEvent::Liked { .. } => (
            NotificationType::NewLikeOnYourPost,
            EntityKind::Post,
            format!("{actor_name} liked your post"),
        ),
        DomainEvent::Commented { .. } => (
            NotificationType::NewCommentOnYourPost,
            EntityKind::Post,
            format!("{actor_name} commented on your post"),
        ),
    }
}
