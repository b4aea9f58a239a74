//! Social graph stores for the Herald platform: users, posts, and follow
//! edges.
//!
//! These are thin CRUD collaborators of the notification pipeline. The
//! fan-out worker reads from them (follower listing for post events,
//! post-ownership lookup for likes and comments, actor names for message
//! rendering) but never writes to them.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during social store operations.
#[derive(Debug, Error)]
pub enum SocialError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID for the user (e.g. UUID).
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// A published post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID for the post.
    pub post_id: String,
    /// Public ID of the author.
    pub author_id: String,
    /// Post title.
    pub title: String,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// Creates a new user.
pub fn create_user(conn: &Connection, user_id: &str, name: &str) -> Result<User, SocialError> {
    let user = conn.query_row(
        "INSERT INTO users (user_id, name) VALUES (?1, ?2)
         RETURNING id, user_id, name, created_at",
        params![user_id, name],
        map_row_to_user,
    )?;
    Ok(user)
}

/// Retrieves a user by public ID.
pub fn get_user(conn: &Connection, user_id: &str) -> Result<User, SocialError> {
    conn.query_row(
        "SELECT id, user_id, name, created_at FROM users WHERE user_id = ?1",
        [user_id],
        map_row_to_user,
    )
    .optional()?
    .ok_or_else(|| SocialError::NotFound(user_id.to_string()))
}

/// Lists all users, oldest first.
pub fn list_users(conn: &Connection) -> Result<Vec<User>, SocialError> {
    let mut stmt =
        conn.prepare("SELECT id, user_id, name, created_at FROM users ORDER BY created_at ASC")?;
    let rows = stmt.query_map([], map_row_to_user)?;
    let mut users = Vec::new();
    for row in rows {
        users.push(row?);
    }
    Ok(users)
}

fn map_row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Parameters for creating a new post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePostParams {
    pub post_id: String,
    pub author_id: String,
    pub title: String,
}

/// Creates a new post. The author must exist.
pub fn create_post(conn: &Connection, params: &CreatePostParams) -> Result<Post, SocialError> {
    // Verify the author exists so a dangling author_id surfaces as NotFound
    // rather than an orphaned row.
    let _ = get_user(conn, &params.author_id)?;

    let post = conn.query_row(
        "INSERT INTO posts (post_id, author_id, title) VALUES (?1, ?2, ?3)
         RETURNING id, post_id, author_id, title, created_at",
        params![params.post_id, params.author_id, params.title],
        map_row_to_post,
    )?;
    Ok(post)
}

/// Retrieves a post by public ID.
pub fn get_post(conn: &Connection, post_id: &str) -> Result<Post, SocialError> {
    conn.query_row(
        "SELECT id, post_id, author_id, title, created_at FROM posts WHERE post_id = ?1",
        [post_id],
        map_row_to_post,
    )
    .optional()?
    .ok_or_else(|| SocialError::NotFound(post_id.to_string()))
}

/// Lists posts, newest first, optionally filtered by author.
pub fn list_posts(conn: &Connection, author_id: Option<&str>) -> Result<Vec<Post>, SocialError> {
    let mut posts = Vec::new();
    match author_id {
        Some(author) => {
            let mut stmt = conn.prepare(
                "SELECT id, post_id, author_id, title, created_at FROM posts
                 WHERE author_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([author], map_row_to_post)?;
            for row in rows {
                posts.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, post_id, author_id, title, created_at FROM posts
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([], map_row_to_post)?;
            for row in rows {
                posts.push(row?);
            }
        }
    }
    Ok(posts)
}

/// Looks up the author of a post, if the post is known to the store.
pub fn post_author(conn: &Connection, post_id: &str) -> Result<Option<String>, SocialError> {
    let author: Option<String> = conn
        .query_row(
            "SELECT author_id FROM posts WHERE post_id = ?1",
            [post_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(author)
}

fn map_row_to_post(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        title: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Creates a follow edge. Returns `true` if the edge was newly created,
/// `false` if it already existed (following twice is idempotent).
pub fn create_follow(
    conn: &Connection,
    follower_id: &str,
    followee_id: &str,
) -> Result<bool, SocialError> {
    let _ = get_user(conn, follower_id)?;
    let _ = get_user(conn, followee_id)?;

    let changed = conn.execute(
        "INSERT INTO follows (follower_id, followee_id) VALUES (?1, ?2)
         ON CONFLICT (follower_id, followee_id) DO NOTHING",
        params![follower_id, followee_id],
    )?;
    Ok(changed > 0)
}

/// Removes a follow edge. Unfollowing a user you do not follow is a no-op.
pub fn delete_follow(
    conn: &Connection,
    follower_id: &str,
    followee_id: &str,
) -> Result<bool, SocialError> {
    let changed = conn.execute(
        "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
        params![follower_id, followee_id],
    )?;
    Ok(changed > 0)
}

/// Lists the user IDs of everyone following `followee_id`.
pub fn list_followers(conn: &Connection, followee_id: &str) -> Result<Vec<String>, SocialError> {
    let mut stmt = conn.prepare(
        "SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map([followee_id], |row| row.get(0))?;
    let mut followers = Vec::new();
    for row in rows {
        followers.push(row?);
    }
    Ok(followers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_db::run_migrations;
    use rusqlite::Connection;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().expect("failed to open in-memory db");
        run_migrations(&conn).expect("failed to run migrations");
        conn
    }

    #[test]
    fn user_crud() {
        let conn = setup_db();

        let alice = create_user(&conn, "user-a", "Alice").expect("create failed");
        assert_eq!(alice.user_id, "user-a");
        assert_eq!(alice.name, "Alice");

        let fetched = get_user(&conn, "user-a").expect("get failed");
        assert_eq!(fetched, alice);

        create_user(&conn, "user-b", "Bob").expect("create failed");
        let users = list_users(&conn).expect("list failed");
        assert_eq!(users.len(), 2);

        match get_user(&conn, "user-z").unwrap_err() {
            SocialError::NotFound(id) => assert_eq!(id, "user-z"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn post_crud_and_ownership() {
        let conn = setup_db();
        create_user(&conn, "user-a", "Alice").expect("create user failed");

        let params = CreatePostParams {
            post_id: "post-1".to_string(),
            author_id: "user-a".to_string(),
            title: "Concrete shell roofs".to_string(),
        };
        let post = create_post(&conn, &params).expect("create post failed");
        assert_eq!(post.author_id, "user-a");

        assert_eq!(
            post_author(&conn, "post-1").expect("lookup failed"),
            Some("user-a".to_string())
        );
        assert_eq!(post_author(&conn, "post-x").expect("lookup failed"), None);

        let by_author = list_posts(&conn, Some("user-a")).expect("list failed");
        assert_eq!(by_author.len(), 1);

        // Post with unknown author is rejected
        let bad = CreatePostParams {
            post_id: "post-2".to_string(),
            author_id: "user-ghost".to_string(),
            title: "Orphan".to_string(),
        };
        assert!(matches!(
            create_post(&conn, &bad),
            Err(SocialError::NotFound(_))
        ));
    }

    #[test]
    fn follow_edges_are_idempotent() {
        let conn = setup_db();
        create_user(&conn, "user-a", "Alice").expect("create failed");
        create_user(&conn, "user-b", "Bob").expect("create failed");

        assert!(create_follow(&conn, "user-b", "user-a").expect("follow failed"));
        assert!(
            !create_follow(&conn, "user-b", "user-a").expect("refollow failed"),
            "second follow should be absorbed"
        );

        let followers = list_followers(&conn, "user-a").expect("list failed");
        assert_eq!(followers, vec!["user-b".to_string()]);

        assert!(delete_follow(&conn, "user-b", "user-a").expect("unfollow failed"));
        assert!(!delete_follow(&conn, "user-b", "user-a").expect("unfollow failed"));
        assert!(list_followers(&conn, "user-a").expect("list failed").is_empty());
    }
}
