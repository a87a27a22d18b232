use std::fmt;

use async_trait::async_trait;

use crate::models::*;
use crate::pagination::{ForumThreadsPage, ForumUsersPage, PostPage};
use crate::path::PathError;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "postgres-store")]
pub mod pg;

/// Entity kinds named in not-found errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Forum,
    Thread,
    Post,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::User => "user",
            Entity::Forum => "forum",
            Entity::Thread => "thread",
            Entity::Post => "post",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("{0} not found")] NotFound(Entity),
    #[error("conflict")] Conflict,
    /// Uniqueness violation; carries the rows that already hold the key(s).
    #[error("conflict with existing rows")] Duplicate(Existing),
    /// Referential-integrity violation on an author reference.
    #[error("author not found")] AuthorNotFound,
    #[error("internal error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// A post batch with an unusable parent is rejected as a whole.
pub(crate) fn reject_batch(e: PathError) -> RepoError {
    log::debug!("post batch rejected: {e}");
    RepoError::Conflict
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, nickname: &str, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, nickname: &str) -> RepoResult<User>;
    async fn update_user(&self, nickname: &str, upd: UpdateUser) -> RepoResult<User>;
}

#[async_trait]
pub trait ForumRepo: Send + Sync {
    async fn create_forum(&self, new: NewForum) -> RepoResult<Forum>;
    async fn get_forum(&self, slug: &str) -> RepoResult<Forum>;
    async fn forum_threads(&self, slug: &str, page: &ForumThreadsPage) -> RepoResult<Vec<Thread>>;
    /// Distinct authors of threads and posts in the forum, read from the membership index.
    async fn forum_users(&self, slug: &str, page: &ForumUsersPage) -> RepoResult<Vec<User>>;
}

#[async_trait]
pub trait ThreadRepo: Send + Sync {
    async fn create_thread(&self, forum: &str, new: NewThread) -> RepoResult<Thread>;
    async fn get_thread(&self, ident: &ThreadIdent) -> RepoResult<Thread>;
    async fn update_thread(&self, ident: &ThreadIdent, upd: UpdateThread) -> RepoResult<Thread>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Inserts the whole batch in one transaction, or nothing.
    async fn create_posts(&self, ident: &ThreadIdent, posts: Vec<NewPost>) -> RepoResult<Vec<Post>>;
    async fn thread_posts(&self, ident: &ThreadIdent, page: &PostPage) -> RepoResult<Vec<Post>>;
    /// Path a post with `new_id` would receive under `parent` in `thread`.
    async fn assign_path(&self, thread: Id, parent: Id, new_id: Id) -> RepoResult<Vec<Id>>;
    async fn get_post(&self, id: Id, related: Related) -> RepoResult<PostDetail>;
    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post>;
}

#[async_trait]
pub trait VoteRepo: Send + Sync {
    /// Records `vote`, replacing an earlier vote by the same author, and returns the thread.
    async fn vote(&self, ident: &ThreadIdent, vote: NewVote) -> RepoResult<Thread>;
}

#[async_trait]
pub trait ServiceRepo: Send + Sync {
    async fn status(&self) -> RepoResult<ServiceStatus>;
    async fn clear(&self) -> RepoResult<()>;
}

pub trait Repo: UserRepo + ForumRepo + ThreadRepo + PostRepo + VoteRepo + ServiceRepo {}

impl<T> Repo for T where T: UserRepo + ForumRepo + ThreadRepo + PostRepo + VoteRepo + ServiceRepo {}
