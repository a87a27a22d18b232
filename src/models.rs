use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::votes::Voice;

// Thread and post ids are Postgres BIGSERIAL
pub type Id = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub nickname: String,
    pub fullname: String,
    pub email: String,
    pub about: String,
}
/// Signup form; the nickname comes from the request path.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub fullname: String,
    pub email: String,
    #[serde(default)]
    pub about: String,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub about: Option<String>,
}

impl UpdateUser {
    /// Drops fields that were sent empty; an update with nothing left is a plain read.
    pub fn normalized(self) -> Self {
        fn keep(v: Option<String>) -> Option<String> { v.filter(|s| !s.is_empty()) }
        Self { fullname: keep(self.fullname), email: keep(self.email), about: keep(self.about) }
    }
    pub fn is_empty(&self) -> bool {
        self.fullname.is_none() && self.email.is_none() && self.about.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Forum {
    pub slug: String,
    pub title: String,
    pub user: String,     // author nickname
    pub posts: i64,       // denormalized, never decremented
    pub threads: i64,     // denormalized, never decremented
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewForum {
    pub slug: String,
    pub title: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Thread {
    pub id: Id,
    pub title: String,
    pub author: String,
    pub forum: String,
    pub message: String,
    pub votes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub created: DateTime<Utc>,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewThread {
    pub title: String,
    pub author: String,
    pub message: String,
    pub slug: Option<String>,
    pub created: Option<DateTime<Utc>>,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateThread {
    pub title: Option<String>,
    pub message: Option<String>,
}

impl UpdateThread {
    pub fn normalized(self) -> Self {
        Self {
            title: self.title.filter(|s| !s.is_empty()),
            message: self.message.filter(|s| !s.is_empty()),
        }
    }
    pub fn is_empty(&self) -> bool { self.title.is_none() && self.message.is_none() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub parent: Id, // 0 for a root post
    pub author: String,
    pub forum: String,
    pub thread: Id,
    pub message: String,
    #[serde(rename = "isEdited")]
    pub is_edited: bool,
    pub created: DateTime<Utc>,
    /// Materialized ancestor path, root first, ending with `id`.
    #[serde(skip)]
    pub path: Vec<Id>,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    #[serde(default)]
    pub parent: Id,
    pub author: String,
    pub message: String,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdatePost {
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub author: String,
    pub thread: Id,
    pub voice: i32,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewVote {
    pub nickname: String,
    #[schema(value_type = i32)]
    pub voice: Voice,
}

/// Which related rows `get_post` should attach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Related {
    pub user: bool,
    pub forum: bool,
    pub thread: bool,
}

impl Related {
    /// Parses the comma separated `related` query value (`user,forum,thread`).
    pub fn parse(raw: &str) -> Self {
        let mut related = Self::default();
        for part in raw.split(',').map(str::trim) {
            match part {
                "user" => related.user = true,
                "forum" => related.forum = true,
                "thread" => related.thread = true,
                _ => {}
            }
        }
        related
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostDetail {
    pub post: Post,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forum: Option<Forum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ServiceStatus {
    pub user: i64,
    pub forum: i64,
    pub thread: i64,
    pub post: i64,
}

/// Rows that collided with a rejected create, returned alongside the conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Existing {
    Users(Vec<User>),
    Forum(Box<Forum>),
    Thread(Box<Thread>),
}

/// A thread addressed either by numeric id or by slug.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ThreadIdent {
    Id(Id),
    Slug(String),
}

impl FromStr for ThreadIdent {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<Id>() {
            Ok(id) => ThreadIdent::Id(id),
            Err(_) => ThreadIdent::Slug(s.to_string()),
        })
    }
}

impl From<String> for ThreadIdent {
    fn from(raw: String) -> Self {
        match raw.parse::<Id>() {
            Ok(id) => ThreadIdent::Id(id),
            Err(_) => ThreadIdent::Slug(raw),
        }
    }
}

impl From<Id> for ThreadIdent {
    fn from(id: Id) -> Self { ThreadIdent::Id(id) }
}

impl fmt::Display for ThreadIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadIdent::Id(id) => write!(f, "{id}"),
            ThreadIdent::Slug(slug) => f.write_str(slug),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_identifiers_are_ids() {
        assert_eq!("42".parse::<ThreadIdent>().unwrap(), ThreadIdent::Id(42));
        assert_eq!(ThreadIdent::from("t-42".to_string()), ThreadIdent::Slug("t-42".into()));
        let ident: ThreadIdent = serde_json::from_str("\"7\"").unwrap();
        assert_eq!(ident.to_string(), "7");
    }

    #[test]
    fn related_ignores_unknown_parts() {
        let r = Related::parse("user, thread,bogus");
        assert!(r.user && r.thread && !r.forum);
        assert_eq!(Related::parse(""), Related::default());
    }

    #[test]
    fn empty_update_fields_are_dropped() {
        let upd = UpdateUser { fullname: Some(String::new()), email: None, about: Some("hi".into()) }.normalized();
        assert_eq!(upd.fullname, None);
        assert_eq!(upd.about.as_deref(), Some("hi"));
        assert!(UpdateThread::default().normalized().is_empty());
    }

    #[test]
    fn post_path_is_not_serialized() {
        let post = Post {
            id: 3,
            parent: 1,
            author: "a".into(),
            forum: "f".into(),
            thread: 1,
            message: "m".into(),
            is_edited: false,
            created: Utc::now(),
            path: vec![1, 3],
        };
        let v = serde_json::to_value(&post).unwrap();
        assert!(v.get("path").is_none());
        assert_eq!(v["isEdited"], false);
    }
}
