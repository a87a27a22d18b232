//! Store operations as seen by callers: each one resolves to an [`Outcome`].

use std::sync::Arc;

use crate::models::*;
use crate::outcome::{Outcome, StatusKind};
use crate::pagination::{ForumThreadsPage, ForumUsersPage, PostPage};
use crate::repo::{Repo, RepoError};

#[derive(Clone)]
pub struct ForumService {
    repo: Arc<dyn Repo>,
}

impl ForumService {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Arc<dyn Repo> {
        &self.repo
    }

    // ── users ─────────────────────────────────────────────────────────

    pub async fn create_user(&self, nickname: &str, new: NewUser) -> Outcome<User> {
        Outcome::settle(self.repo.create_user(nickname, new).await, StatusKind::Created)
    }

    pub async fn get_user(&self, nickname: &str) -> Outcome<User> {
        Outcome::settle(self.repo.get_user(nickname).await, StatusKind::Ok)
    }

    pub async fn update_user(&self, nickname: &str, upd: UpdateUser) -> Outcome<User> {
        Outcome::settle(self.repo.update_user(nickname, upd).await, StatusKind::Ok)
    }

    // ── forums ────────────────────────────────────────────────────────

    pub async fn create_forum(&self, new: NewForum) -> Outcome<Forum> {
        Outcome::settle(self.repo.create_forum(new).await, StatusKind::Created)
    }

    pub async fn get_forum(&self, slug: &str) -> Outcome<Forum> {
        Outcome::settle(self.repo.get_forum(slug).await, StatusKind::Ok)
    }

    pub async fn forum_threads(&self, slug: &str, page: &ForumThreadsPage) -> Outcome<Vec<Thread>> {
        Outcome::settle(self.repo.forum_threads(slug, page).await, StatusKind::Ok)
    }

    pub async fn forum_users(&self, slug: &str, page: &ForumUsersPage) -> Outcome<Vec<User>> {
        Outcome::settle(self.repo.forum_users(slug, page).await, StatusKind::Ok)
    }

    // ── threads ───────────────────────────────────────────────────────

    pub async fn create_thread(&self, forum: &str, new: NewThread) -> Outcome<Thread> {
        Outcome::settle(self.repo.create_thread(forum, new).await, StatusKind::Created)
    }

    pub async fn get_thread(&self, ident: &ThreadIdent) -> Outcome<Thread> {
        Outcome::settle(self.repo.get_thread(ident).await, StatusKind::Ok)
    }

    pub async fn update_thread(&self, ident: &ThreadIdent, upd: UpdateThread) -> Outcome<Thread> {
        Outcome::settle(self.repo.update_thread(ident, upd).await, StatusKind::Ok)
    }

    pub async fn vote(&self, ident: &ThreadIdent, vote: NewVote) -> Outcome<Thread> {
        Outcome::settle(self.repo.vote(ident, vote).await, StatusKind::Ok)
    }

    // ── posts ─────────────────────────────────────────────────────────

    pub async fn create_posts(&self, ident: &ThreadIdent, posts: Vec<NewPost>) -> Outcome<Vec<Post>> {
        Outcome::settle(self.repo.create_posts(ident, posts).await, StatusKind::Created)
    }

    pub async fn thread_posts(&self, ident: &ThreadIdent, page: &PostPage) -> Outcome<Vec<Post>> {
        Outcome::settle(self.repo.thread_posts(ident, page).await, StatusKind::Ok)
    }

    pub async fn get_post(&self, id: Id, related: Related) -> Outcome<PostDetail> {
        Outcome::settle(self.repo.get_post(id, related).await, StatusKind::Ok)
    }

    pub async fn update_post(&self, id: Id, upd: UpdatePost) -> Outcome<Post> {
        Outcome::settle(self.repo.update_post(id, upd).await, StatusKind::Ok)
    }

    // ── service ───────────────────────────────────────────────────────

    pub async fn status(&self) -> Outcome<ServiceStatus> {
        Outcome::settle(self.repo.status().await.map_err(degrade), StatusKind::Ok)
    }

    pub async fn clear(&self) -> Outcome<()> {
        let result = self.repo.clear().await.map_err(degrade);
        if result.is_ok() {
            log::info!("store cleared");
        }
        Outcome::settle(result, StatusKind::Ok)
    }
}

/// Administrative failures always surface as Internal.
fn degrade(e: RepoError) -> RepoError {
    match e {
        RepoError::Internal(_) => e,
        other => RepoError::Internal(other.to_string()),
    }
}
