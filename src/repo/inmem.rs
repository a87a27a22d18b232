use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::*;
use crate::pagination;
use crate::path::{self, PostAnchor};
use crate::pool::StorePool;
use crate::votes::{Voice, VoteOutcome};

// nicknames, emails and slugs are matched case-insensitively
fn key(s: &str) -> String {
    s.to_lowercase()
}

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    emails: HashMap<String, String>, // email key -> nickname key
    forums: HashMap<String, Forum>,
    threads: BTreeMap<Id, Thread>,
    thread_slugs: HashMap<String, Id>,
    posts: BTreeMap<Id, Post>,
    thread_posts: HashMap<Id, Vec<Id>>,
    votes: HashMap<(Id, String), Voice>,
    members: HashMap<String, BTreeSet<String>>, // forum key -> nickname keys
    next_thread_id: Id,
    next_post_id: Id,
}

impl State {
    fn user(&self, nickname: &str) -> Option<&User> {
        self.users.get(&key(nickname))
    }

    fn forum(&self, slug: &str) -> RepoResult<&Forum> {
        self.forums.get(&key(slug)).ok_or(RepoError::NotFound(Entity::Forum))
    }

    fn thread_id(&self, ident: &ThreadIdent) -> RepoResult<Id> {
        let id = match ident {
            ThreadIdent::Id(id) => Some(*id).filter(|id| self.threads.contains_key(id)),
            ThreadIdent::Slug(slug) => self.thread_slugs.get(&key(slug)).copied(),
        };
        id.ok_or(RepoError::NotFound(Entity::Thread))
    }

    fn thread(&self, ident: &ThreadIdent) -> RepoResult<&Thread> {
        let id = self.thread_id(ident)?;
        self.threads.get(&id).ok_or(RepoError::NotFound(Entity::Thread))
    }

    fn anchor(&self, id: Id) -> Option<PostAnchor> {
        self.posts.get(&id).map(|p| PostAnchor { thread: p.thread, path: p.path.clone() })
    }

    fn join_member(&mut self, forum_key: &str, nickname: &str) {
        self.members.entry(forum_key.to_string()).or_default().insert(key(nickname));
    }
}

fn poisoned() -> RepoError {
    log::error!("in-memory state lock poisoned");
    RepoError::Internal("state lock poisoned".into())
}

/// Process-local store; every operation is one atomic step under the state lock.
#[derive(Clone, Default)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    pool: StorePool,
}

impl InMemRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(pool: StorePool) -> Self {
        Self { state: Arc::default(), pool }
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn create_user(&self, nickname: &str, new: NewUser) -> RepoResult<User> {
        let _conn = self.pool.acquire().await?;
        let mut guard = self.write()?;
        let s = &mut *guard;
        let (nick_key, email_key) = (key(nickname), key(&new.email));

        let mut existing: Vec<User> = Vec::new();
        if let Some(u) = s.users.get(&nick_key) {
            existing.push(u.clone());
        }
        if let Some(u) = s.emails.get(&email_key).and_then(|k| s.users.get(k)) {
            if !existing.contains(u) {
                existing.push(u.clone());
            }
        }
        if !existing.is_empty() {
            return Err(RepoError::Duplicate(Existing::Users(existing)));
        }

        let user = User { nickname: nickname.to_string(), fullname: new.fullname, email: new.email, about: new.about };
        s.emails.insert(email_key, nick_key.clone());
        s.users.insert(nick_key, user.clone());
        Ok(user)
    }

    async fn get_user(&self, nickname: &str) -> RepoResult<User> {
        let _conn = self.pool.acquire().await?;
        let s = self.read()?;
        s.user(nickname).cloned().ok_or(RepoError::NotFound(Entity::User))
    }

    async fn update_user(&self, nickname: &str, upd: UpdateUser) -> RepoResult<User> {
        let upd = upd.normalized();
        let _conn = self.pool.acquire().await?;
        let mut guard = self.write()?;
        let s = &mut *guard;
        let nick_key = key(nickname);
        let mut user = s.users.get(&nick_key).cloned().ok_or(RepoError::NotFound(Entity::User))?;
        if upd.is_empty() {
            return Ok(user);
        }

        if let Some(email) = upd.email {
            let email_key = key(&email);
            if s.emails.get(&email_key).is_some_and(|owner| *owner != nick_key) {
                return Err(RepoError::Conflict);
            }
            s.emails.remove(&key(&user.email));
            s.emails.insert(email_key, nick_key.clone());
            user.email = email;
        }
        if let Some(fullname) = upd.fullname { user.fullname = fullname; }
        if let Some(about) = upd.about { user.about = about; }

        s.users.insert(nick_key, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl ForumRepo for InMemRepo {
    async fn create_forum(&self, new: NewForum) -> RepoResult<Forum> {
        let _conn = self.pool.acquire().await?;
        let mut s = self.write()?;
        let author = s.user(&new.user).ok_or(RepoError::NotFound(Entity::User))?.nickname.clone();
        let slug_key = key(&new.slug);
        if let Some(existing) = s.forums.get(&slug_key) {
            return Err(RepoError::Duplicate(Existing::Forum(Box::new(existing.clone()))));
        }
        let forum = Forum { slug: new.slug, title: new.title, user: author, posts: 0, threads: 0 };
        s.forums.insert(slug_key, forum.clone());
        Ok(forum)
    }

    async fn get_forum(&self, slug: &str) -> RepoResult<Forum> {
        let _conn = self.pool.acquire().await?;
        let s = self.read()?;
        s.forum(slug).cloned()
    }

    async fn forum_threads(&self, slug: &str, page: &ForumThreadsPage) -> RepoResult<Vec<Thread>> {
        let _conn = self.pool.acquire().await?;
        let s = self.read()?;
        let forum = s.forum(slug)?;
        Ok(page.select(s.threads.values().filter(|t| t.forum == forum.slug)))
    }

    async fn forum_users(&self, slug: &str, page: &ForumUsersPage) -> RepoResult<Vec<User>> {
        let _conn = self.pool.acquire().await?;
        let s = self.read()?;
        s.forum(slug)?;
        let members = s.members.get(&key(slug)).into_iter().flatten();
        Ok(page.select(members.filter_map(|nick| s.users.get(nick))))
    }
}

#[async_trait]
impl ThreadRepo for InMemRepo {
    async fn create_thread(&self, forum: &str, new: NewThread) -> RepoResult<Thread> {
        let _conn = self.pool.acquire().await?;
        let mut guard = self.write()?;
        let s = &mut *guard;
        let author = s.user(&new.author).ok_or(RepoError::NotFound(Entity::User))?.nickname.clone();
        let forum_slug = s.forum(forum)?.slug.clone();

        let slug = new.slug.filter(|slug| !slug.is_empty());
        if let Some(slug) = &slug {
            if let Some(existing) = s.thread_slugs.get(&key(slug)).and_then(|id| s.threads.get(id)) {
                return Err(RepoError::Duplicate(Existing::Thread(Box::new(existing.clone()))));
            }
        }

        s.next_thread_id += 1;
        let thread = Thread {
            id: s.next_thread_id,
            title: new.title,
            author,
            forum: forum_slug,
            message: new.message,
            votes: 0,
            slug,
            created: new.created.unwrap_or_else(Utc::now),
        };
        if let Some(slug) = &thread.slug {
            s.thread_slugs.insert(key(slug), thread.id);
        }
        s.threads.insert(thread.id, thread.clone());
        let forum_key = key(&thread.forum);
        if let Some(forum) = s.forums.get_mut(&forum_key) {
            forum.threads += 1;
        }
        s.join_member(&forum_key, &thread.author);
        Ok(thread)
    }

    async fn get_thread(&self, ident: &ThreadIdent) -> RepoResult<Thread> {
        let _conn = self.pool.acquire().await?;
        let s = self.read()?;
        s.thread(ident).cloned()
    }

    async fn update_thread(&self, ident: &ThreadIdent, upd: UpdateThread) -> RepoResult<Thread> {
        let upd = upd.normalized();
        let _conn = self.pool.acquire().await?;
        let mut s = self.write()?;
        let id = s.thread_id(ident)?;
        let thread = s.threads.get_mut(&id).ok_or(RepoError::NotFound(Entity::Thread))?;
        if let Some(title) = upd.title { thread.title = title; }
        if let Some(message) = upd.message { thread.message = message; }
        Ok(thread.clone())
    }
}

#[async_trait]
impl PostRepo for InMemRepo {
    async fn create_posts(&self, ident: &ThreadIdent, posts: Vec<NewPost>) -> RepoResult<Vec<Post>> {
        let _conn = self.pool.acquire().await?;
        let mut guard = self.write()?;
        let s = &mut *guard;
        let thread = s.thread(ident)?.clone();

        // ── 1. validate the whole batch; nothing is written on failure ──
        for new in &posts {
            let anchor = s.anchor(new.parent);
            path::check_parent(thread.id, new.parent, anchor.as_ref()).map_err(reject_batch)?;
        }
        let authors = posts
            .iter()
            .map(|new| s.user(&new.author).map(|u| u.nickname.clone()).ok_or(RepoError::AuthorNotFound))
            .collect::<RepoResult<Vec<_>>>()?;

        // ── 2. stage rows with their ids and paths ──────────────────────
        let created = Utc::now();
        let mut next_id = s.next_post_id;
        let mut staged = Vec::with_capacity(posts.len());
        for (new, author) in posts.into_iter().zip(authors) {
            next_id += 1;
            let anchor = s.anchor(new.parent);
            let path = path::assign_path(thread.id, new.parent, anchor.as_ref(), next_id).map_err(reject_batch)?;
            staged.push(Post {
                id: next_id,
                parent: new.parent,
                author,
                forum: thread.forum.clone(),
                thread: thread.id,
                message: new.message,
                is_edited: false,
                created,
                path,
            });
        }

        // ── 3. apply ────────────────────────────────────────────────────
        s.next_post_id = next_id;
        let forum_key = key(&thread.forum);
        for post in &staged {
            s.thread_posts.entry(thread.id).or_default().push(post.id);
            s.posts.insert(post.id, post.clone());
            s.join_member(&forum_key, &post.author);
        }
        if let Some(forum) = s.forums.get_mut(&forum_key) {
            forum.posts += staged.len() as i64;
        }
        log::debug!("thread {}: committed {} posts", thread.id, staged.len());
        Ok(staged)
    }

    async fn thread_posts(&self, ident: &ThreadIdent, page: &PostPage) -> RepoResult<Vec<Post>> {
        let _conn = self.pool.acquire().await?;
        let s = self.read()?;
        let thread_id = s.thread_id(ident)?;
        let rows = s
            .thread_posts
            .get(&thread_id)
            .into_iter()
            .flatten()
            .filter_map(|id| s.posts.get(id));
        let cursor_post = page.since.and_then(|id| s.posts.get(&id));
        Ok(pagination::select_page(rows, page, cursor_post))
    }

    async fn assign_path(&self, thread: Id, parent: Id, new_id: Id) -> RepoResult<Vec<Id>> {
        let _conn = self.pool.acquire().await?;
        let s = self.read()?;
        let anchor = s.anchor(parent);
        Ok(path::assign_path(thread, parent, anchor.as_ref(), new_id)?)
    }

    async fn get_post(&self, id: Id, related: Related) -> RepoResult<PostDetail> {
        let _conn = self.pool.acquire().await?;
        let s = self.read()?;
        let post = s.posts.get(&id).cloned().ok_or(RepoError::NotFound(Entity::Post))?;
        let author = if related.user { s.user(&post.author).cloned() } else { None };
        let forum = if related.forum { s.forum(&post.forum).ok().cloned() } else { None };
        let thread = if related.thread { s.threads.get(&post.thread).cloned() } else { None };
        Ok(PostDetail { post, author, forum, thread })
    }

    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
        let _conn = self.pool.acquire().await?;
        let mut s = self.write()?;
        let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound(Entity::Post))?;
        if let Some(message) = upd.message.filter(|m| !m.is_empty() && *m != post.message) {
            post.message = message;
            post.is_edited = true;
        }
        Ok(post.clone())
    }
}

#[async_trait]
impl VoteRepo for InMemRepo {
    async fn vote(&self, ident: &ThreadIdent, vote: NewVote) -> RepoResult<Thread> {
        let _conn = self.pool.acquire().await?;
        let mut guard = self.write()?;
        let s = &mut *guard;
        let thread_id = s.thread_id(ident)?;
        let author = s.user(&vote.nickname).map(|u| key(&u.nickname)).ok_or(RepoError::AuthorNotFound)?;

        // insert-or-replace; the previous value decides the delta
        let previous = s.votes.insert((thread_id, author), vote.voice);
        let outcome = VoteOutcome::of(previous, vote.voice);

        let thread = s.threads.get_mut(&thread_id).ok_or(RepoError::NotFound(Entity::Thread))?;
        thread.votes += outcome.delta();
        Ok(thread.clone())
    }
}

#[async_trait]
impl ServiceRepo for InMemRepo {
    async fn status(&self) -> RepoResult<ServiceStatus> {
        let _conn = self.pool.acquire().await?;
        let s = self.read()?;
        Ok(ServiceStatus {
            user: s.users.len() as i64,
            forum: s.forums.len() as i64,
            thread: s.threads.len() as i64,
            post: s.posts.len() as i64,
        })
    }

    async fn clear(&self) -> RepoResult<()> {
        let _conn = self.pool.acquire().await?;
        let mut s = self.write()?;
        *s = State::default();
        Ok(())
    }
}
