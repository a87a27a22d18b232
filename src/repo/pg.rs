use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgConnection, Pool, Postgres};

use super::*;
use crate::path::{self, PostAnchor};
use crate::votes::{Voice, VoteOutcome, VOTE_RETRIES};

/// Maps a driver error onto the repository taxonomy by SQLSTATE class.
fn classify(e: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() || db.is_check_violation() {
            return RepoError::Conflict;
        }
        // every foreign key the store writes through references an author
        if db.is_foreign_key_violation() {
            return RepoError::AuthorNotFound;
        }
    }
    log::error!("postgres: {e}");
    RepoError::Internal(e.to_string())
}

async fn find_user(conn: &mut PgConnection, nickname: &str) -> RepoResult<Option<User>> {
    sqlx::query_as::<_, User>(
        "SELECT nickname, fullname, email, about FROM users WHERE lower(nickname) = lower($1)",
    )
    .bind(nickname)
    .fetch_optional(conn)
    .await
    .map_err(classify)
}

async fn find_forum(conn: &mut PgConnection, slug: &str) -> RepoResult<Option<Forum>> {
    sqlx::query_as::<_, Forum>(
        r#"SELECT slug, title, author AS "user", posts, threads FROM forums WHERE lower(slug) = lower($1)"#,
    )
    .bind(slug)
    .fetch_optional(conn)
    .await
    .map_err(classify)
}

async fn find_thread(conn: &mut PgConnection, ident: &ThreadIdent) -> RepoResult<Option<Thread>> {
    let q = match ident {
        ThreadIdent::Id(id) => sqlx::query_as::<_, Thread>(
            "SELECT id, title, author, forum, message, votes, slug, created FROM threads WHERE id = $1",
        )
        .bind(*id),
        ThreadIdent::Slug(slug) => sqlx::query_as::<_, Thread>(
            "SELECT id, title, author, forum, message, votes, slug, created FROM threads WHERE lower(slug) = lower($1)",
        )
        .bind(slug.as_str()),
    };
    q.fetch_optional(conn).await.map_err(classify)
}

async fn find_post(conn: &mut PgConnection, id: Id) -> RepoResult<Option<Post>> {
    sqlx::query_as::<_, Post>(
        "SELECT id, parent, author, forum, thread, message, is_edited, created, path FROM posts WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(classify)
}

async fn find_anchor(conn: &mut PgConnection, id: Id) -> RepoResult<Option<PostAnchor>> {
    sqlx::query_as::<_, PostAnchor>("SELECT thread, path FROM posts WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(classify)
}

#[derive(Clone)]
pub struct PgRepo {
    pool: Pool<Postgres>,
}

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn conn(&self) -> RepoResult<sqlx::pool::PoolConnection<Postgres>> {
        self.pool.acquire().await.map_err(classify)
    }

    async fn begin(&self) -> RepoResult<sqlx::Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(classify)
    }
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn create_user(&self, nickname: &str, new: NewUser) -> RepoResult<User> {
        let mut conn = self.conn().await?;
        let created = sqlx::query_as::<_, User>(
            "INSERT INTO users (nickname, fullname, email, about) VALUES ($1, $2, $3, $4) \
             ON CONFLICT DO NOTHING RETURNING nickname, fullname, email, about",
        )
        .bind(nickname)
        .bind(&new.fullname)
        .bind(&new.email)
        .bind(&new.about)
        .fetch_optional(&mut *conn)
        .await
        .map_err(classify)?;
        if let Some(user) = created {
            return Ok(user);
        }

        let existing = sqlx::query_as::<_, User>(
            "SELECT nickname, fullname, email, about FROM users \
             WHERE lower(nickname) = lower($1) OR lower(email) = lower($2) ORDER BY nickname",
        )
        .bind(nickname)
        .bind(&new.email)
        .fetch_all(&mut *conn)
        .await
        .map_err(classify)?;
        if existing.is_empty() {
            // the colliding row vanished between the two statements
            return Err(RepoError::Conflict);
        }
        Err(RepoError::Duplicate(Existing::Users(existing)))
    }

    async fn get_user(&self, nickname: &str) -> RepoResult<User> {
        let mut conn = self.conn().await?;
        find_user(&mut conn, nickname).await?.ok_or(RepoError::NotFound(Entity::User))
    }

    async fn update_user(&self, nickname: &str, upd: UpdateUser) -> RepoResult<User> {
        let upd = upd.normalized();
        if upd.is_empty() {
            return self.get_user(nickname).await;
        }
        sqlx::query_as::<_, User>(
            "UPDATE users SET fullname = COALESCE($2, fullname), email = COALESCE($3, email), \
             about = COALESCE($4, about) WHERE lower(nickname) = lower($1) \
             RETURNING nickname, fullname, email, about",
        )
        .bind(nickname)
        .bind(upd.fullname)
        .bind(upd.email)
        .bind(upd.about)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or(RepoError::NotFound(Entity::User))
    }
}

#[async_trait]
impl ForumRepo for PgRepo {
    async fn create_forum(&self, new: NewForum) -> RepoResult<Forum> {
        let mut tx = self.begin().await?;
        let author = find_user(&mut tx, &new.user).await?.ok_or(RepoError::NotFound(Entity::User))?;
        let inserted = sqlx::query_as::<_, Forum>(
            r#"INSERT INTO forums (slug, title, author) VALUES ($1, $2, $3)
               ON CONFLICT DO NOTHING RETURNING slug, title, author AS "user", posts, threads"#,
        )
        .bind(&new.slug)
        .bind(&new.title)
        .bind(&author.nickname)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;

        match inserted {
            Some(forum) => {
                tx.commit().await.map_err(classify)?;
                Ok(forum)
            }
            None => {
                let existing = find_forum(&mut tx, &new.slug).await?;
                Err(existing.map_or(RepoError::Conflict, |f| RepoError::Duplicate(Existing::Forum(Box::new(f)))))
            }
        }
    }

    async fn get_forum(&self, slug: &str) -> RepoResult<Forum> {
        let mut conn = self.conn().await?;
        find_forum(&mut conn, slug).await?.ok_or(RepoError::NotFound(Entity::Forum))
    }

    async fn forum_threads(&self, slug: &str, page: &ForumThreadsPage) -> RepoResult<Vec<Thread>> {
        let mut conn = self.conn().await?;
        let forum = find_forum(&mut conn, slug).await?.ok_or(RepoError::NotFound(Entity::Forum))?;
        let mut q = sqlx::query_as::<_, Thread>(page.sql()).bind(&forum.slug);
        if let Some(since) = page.since {
            q = q.bind(since);
        }
        q.bind(page.limit).fetch_all(&mut *conn).await.map_err(classify)
    }

    async fn forum_users(&self, slug: &str, page: &ForumUsersPage) -> RepoResult<Vec<User>> {
        let mut conn = self.conn().await?;
        let forum = find_forum(&mut conn, slug).await?.ok_or(RepoError::NotFound(Entity::Forum))?;
        let mut q = sqlx::query_as::<_, User>(page.sql()).bind(&forum.slug);
        if let Some(since) = &page.since {
            q = q.bind(since);
        }
        q.bind(page.limit).fetch_all(&mut *conn).await.map_err(classify)
    }
}

#[async_trait]
impl ThreadRepo for PgRepo {
    async fn create_thread(&self, forum: &str, new: NewThread) -> RepoResult<Thread> {
        let mut tx = self.begin().await?;
        let author = find_user(&mut tx, &new.author).await?.ok_or(RepoError::NotFound(Entity::User))?;
        let forum = find_forum(&mut tx, forum).await?.ok_or(RepoError::NotFound(Entity::Forum))?;
        let slug = new.slug.filter(|s| !s.is_empty());

        let inserted = sqlx::query_as::<_, Thread>(
            "INSERT INTO threads (title, author, forum, message, slug, created) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT DO NOTHING RETURNING id, title, author, forum, message, votes, slug, created",
        )
        .bind(&new.title)
        .bind(&author.nickname)
        .bind(&forum.slug)
        .bind(&new.message)
        .bind(slug.as_deref())
        .bind(new.created.unwrap_or_else(Utc::now))
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;

        let Some(thread) = inserted else {
            let existing = match slug {
                Some(slug) => find_thread(&mut tx, &ThreadIdent::Slug(slug)).await?,
                None => None,
            };
            return Err(existing.map_or(RepoError::Conflict, |t| RepoError::Duplicate(Existing::Thread(Box::new(t)))));
        };

        sqlx::query("UPDATE forums SET threads = threads + 1 WHERE slug = $1")
            .bind(&forum.slug)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        sqlx::query("INSERT INTO forum_users (forum, nickname) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(&forum.slug)
            .bind(&author.nickname)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(thread)
    }

    async fn get_thread(&self, ident: &ThreadIdent) -> RepoResult<Thread> {
        let mut conn = self.conn().await?;
        find_thread(&mut conn, ident).await?.ok_or(RepoError::NotFound(Entity::Thread))
    }

    async fn update_thread(&self, ident: &ThreadIdent, upd: UpdateThread) -> RepoResult<Thread> {
        let upd = upd.normalized();
        let mut conn = self.conn().await?;
        let thread = find_thread(&mut conn, ident).await?.ok_or(RepoError::NotFound(Entity::Thread))?;
        if upd.is_empty() {
            return Ok(thread);
        }
        sqlx::query_as::<_, Thread>(
            "UPDATE threads SET title = COALESCE($2, title), message = COALESCE($3, message) WHERE id = $1 \
             RETURNING id, title, author, forum, message, votes, slug, created",
        )
        .bind(thread.id)
        .bind(upd.title)
        .bind(upd.message)
        .fetch_one(&mut *conn)
        .await
        .map_err(classify)
    }
}

#[async_trait]
impl PostRepo for PgRepo {
    async fn create_posts(&self, ident: &ThreadIdent, posts: Vec<NewPost>) -> RepoResult<Vec<Post>> {
        let mut tx = self.begin().await?;
        let thread = find_thread(&mut tx, ident).await?.ok_or(RepoError::NotFound(Entity::Thread))?;

        // parents are checked for the whole batch before any row is written
        let mut anchors: HashMap<Id, Option<PostAnchor>> = HashMap::new();
        for new in &posts {
            if new.parent != 0 && !anchors.contains_key(&new.parent) {
                let anchor = find_anchor(&mut tx, new.parent).await?;
                anchors.insert(new.parent, anchor);
            }
            let anchor = anchors.get(&new.parent).and_then(Option::as_ref);
            path::check_parent(thread.id, new.parent, anchor).map_err(reject_batch)?;
        }

        let created = Utc::now();
        let mut inserted = Vec::with_capacity(posts.len());
        let mut authors: Vec<String> = Vec::new();
        for new in posts {
            let id: Id = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('posts', 'id'))")
                .fetch_one(&mut *tx)
                .await
                .map_err(classify)?;
            let anchor = anchors.get(&new.parent).and_then(Option::as_ref);
            let path = path::assign_path(thread.id, new.parent, anchor, id).map_err(reject_batch)?;

            // the author is resolved inside the insert; no row means no such user
            let post = sqlx::query_as::<_, Post>(
                "INSERT INTO posts (id, parent, author, forum, thread, message, created, path) \
                 SELECT $1, $2, u.nickname, $4, $5, $6, $7, $8 FROM users u WHERE lower(u.nickname) = lower($3) \
                 RETURNING id, parent, author, forum, thread, message, is_edited, created, path",
            )
            .bind(id)
            .bind(new.parent)
            .bind(&new.author)
            .bind(&thread.forum)
            .bind(thread.id)
            .bind(&new.message)
            .bind(created)
            .bind(&path)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?
            .ok_or(RepoError::AuthorNotFound)?;

            if !authors.contains(&post.author) {
                authors.push(post.author.clone());
            }
            inserted.push(post);
        }

        if !inserted.is_empty() {
            sqlx::query("UPDATE forums SET posts = posts + $2 WHERE slug = $1")
                .bind(&thread.forum)
                .bind(inserted.len() as i64)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
            sqlx::query(
                "INSERT INTO forum_users (forum, nickname) SELECT $1, unnest($2::text[]) ON CONFLICT DO NOTHING",
            )
            .bind(&thread.forum)
            .bind(&authors)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)?;
        log::debug!("thread {}: committed {} posts", thread.id, inserted.len());
        Ok(inserted)
    }

    async fn thread_posts(&self, ident: &ThreadIdent, page: &PostPage) -> RepoResult<Vec<Post>> {
        let mut conn = self.conn().await?;
        let thread = find_thread(&mut conn, ident).await?.ok_or(RepoError::NotFound(Entity::Thread))?;
        let mut q = sqlx::query_as::<_, Post>(page.shape().sql()).bind(thread.id);
        if let Some(since) = page.since {
            q = q.bind(since);
        }
        q.bind(page.limit).fetch_all(&mut *conn).await.map_err(classify)
    }

    async fn assign_path(&self, thread: Id, parent: Id, new_id: Id) -> RepoResult<Vec<Id>> {
        let anchor = if parent == 0 {
            None
        } else {
            let mut conn = self.conn().await?;
            find_anchor(&mut conn, parent).await?
        };
        Ok(path::assign_path(thread, parent, anchor.as_ref(), new_id)?)
    }

    async fn get_post(&self, id: Id, related: Related) -> RepoResult<PostDetail> {
        let mut conn = self.conn().await?;
        let post = find_post(&mut conn, id).await?.ok_or(RepoError::NotFound(Entity::Post))?;
        let author = if related.user { find_user(&mut conn, &post.author).await? } else { None };
        let forum = if related.forum { find_forum(&mut conn, &post.forum).await? } else { None };
        let thread = if related.thread { find_thread(&mut conn, &ThreadIdent::Id(post.thread)).await? } else { None };
        Ok(PostDetail { post, author, forum, thread })
    }

    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
        let mut conn = self.conn().await?;
        let post = find_post(&mut conn, id).await?.ok_or(RepoError::NotFound(Entity::Post))?;
        let Some(message) = upd.message.filter(|m| !m.is_empty() && *m != post.message) else {
            return Ok(post);
        };
        sqlx::query_as::<_, Post>(
            "UPDATE posts SET message = $2, is_edited = TRUE WHERE id = $1 \
             RETURNING id, parent, author, forum, thread, message, is_edited, created, path",
        )
        .bind(id)
        .bind(message)
        .fetch_one(&mut *conn)
        .await
        .map_err(classify)
    }
}

/// One insert-or-update attempt. `Failed` means the insert lost a race to a
/// row that could not be read back yet.
async fn vote_step(conn: &mut PgConnection, thread: Id, author: &str, voice: Voice) -> RepoResult<VoteOutcome> {
    let inserted = sqlx::query(
        "INSERT INTO votes (author, thread, voice) VALUES ($1, $2, $3) ON CONFLICT (author, thread) DO NOTHING",
    )
    .bind(author)
    .bind(thread)
    .bind(voice.value())
    .execute(&mut *conn)
    .await
    .map_err(classify)?
    .rows_affected();
    if inserted == 1 {
        return Ok(VoteOutcome::Inserted(voice));
    }

    let previous: Option<i32> =
        sqlx::query_scalar("SELECT voice FROM votes WHERE author = $1 AND thread = $2 FOR UPDATE")
            .bind(author)
            .bind(thread)
            .fetch_optional(&mut *conn)
            .await
            .map_err(classify)?;
    let Some(previous) = previous else {
        return Ok(VoteOutcome::Failed);
    };
    let previous = Voice::try_from(previous).map_err(|e| RepoError::Internal(e.to_string()))?;

    sqlx::query("UPDATE votes SET voice = $3 WHERE author = $1 AND thread = $2")
        .bind(author)
        .bind(thread)
        .bind(voice.value())
        .execute(&mut *conn)
        .await
        .map_err(classify)?;
    Ok(VoteOutcome::of(Some(previous), voice))
}

#[async_trait]
impl VoteRepo for PgRepo {
    async fn vote(&self, ident: &ThreadIdent, vote: NewVote) -> RepoResult<Thread> {
        let mut tx = self.begin().await?;
        let thread = find_thread(&mut tx, ident).await?.ok_or(RepoError::NotFound(Entity::Thread))?;
        let author = find_user(&mut tx, &vote.nickname).await?.ok_or(RepoError::AuthorNotFound)?;

        let mut outcome = VoteOutcome::Failed;
        for attempt in 0..=VOTE_RETRIES {
            outcome = vote_step(&mut tx, thread.id, &author.nickname, vote.voice).await?;
            if outcome != VoteOutcome::Failed {
                break;
            }
            log::debug!("vote by {} on thread {}: attempt {attempt} lost the insert race", author.nickname, thread.id);
        }
        if outcome == VoteOutcome::Failed {
            log::warn!("vote by {} on thread {} failed after retry", author.nickname, thread.id);
            return Err(RepoError::Conflict);
        }

        let thread = sqlx::query_as::<_, Thread>(
            "UPDATE threads SET votes = votes + $2 WHERE id = $1 \
             RETURNING id, title, author, forum, message, votes, slug, created",
        )
        .bind(thread.id)
        .bind(outcome.delta())
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(thread)
    }
}

#[async_trait]
impl ServiceRepo for PgRepo {
    async fn status(&self) -> RepoResult<ServiceStatus> {
        let (user, forum, thread, post) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            "SELECT (SELECT count(*) FROM users), (SELECT count(*) FROM forums), \
             (SELECT count(*) FROM threads), (SELECT count(*) FROM posts)",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        Ok(ServiceStatus { user, forum, thread, post })
    }

    async fn clear(&self) -> RepoResult<()> {
        sqlx::query("TRUNCATE users, forums, threads, posts, votes, forum_users RESTART IDENTITY CASCADE")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}
