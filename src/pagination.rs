//! Cursor pagination over thread posts and forum listings.
//!
//! A page request is reduced to a [`QueryShape`]: sort mode × cursor present ×
//! direction. Each of the twelve shapes maps to one fixed SQL statement and to
//! one row predicate/comparator pair used by the in-memory store, so both
//! backends agree on order and cursor semantics.
//!
//! * `flat`: ordered by `(created, id)`; cursor is a post id compared on `id`.
//! * `tree`: ordered by materialized path; cursor is the path of the given post.
//! * `parent_tree`: `limit` selects root posts (by id, after the cursor post's
//!   root); every post below a selected root is returned, so a page usually
//!   holds more than `limit` rows.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Id, Post, Thread, User};
use crate::path::root_of;

pub const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Flat,
    Tree,
    ParentTree,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown sort mode `{0}`")]
pub struct UnknownSortMode(pub String);

impl FromStr for SortMode {
    type Err = UnknownSortMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "flat" => Ok(SortMode::Flat),
            "tree" => Ok(SortMode::Tree),
            "parent_tree" => Ok(SortMode::ParentTree),
            other => Err(UnknownSortMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn from_desc(desc: bool) -> Self {
        if desc { Direction::Desc } else { Direction::Asc }
    }

    fn orient(self, ord: Ordering) -> Ordering {
        match self {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }

    /// Whether `key` lies strictly beyond `cursor` when walking in this direction.
    fn past<T: Ord + ?Sized>(self, key: &T, cursor: &T) -> bool {
        self.orient(key.cmp(cursor)) == Ordering::Greater
    }
}

fn row_limit(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(0)
}

/// Page request over the posts of one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostPage {
    pub limit: i64,
    /// Id of the last post seen; `None` starts from the beginning.
    pub since: Option<Id>,
    pub sort: SortMode,
    pub desc: bool,
}

impl Default for PostPage {
    fn default() -> Self {
        Self { limit: DEFAULT_LIMIT, since: None, sort: SortMode::Flat, desc: false }
    }
}

impl PostPage {
    pub fn shape(&self) -> QueryShape {
        QueryShape {
            mode: self.sort,
            cursor: self.since.is_some(),
            direction: Direction::from_desc(self.desc),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryShape {
    pub mode: SortMode,
    pub cursor: bool,
    pub direction: Direction,
}

/// A page cursor resolved against stored rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorKey {
    Start,
    Id(Id),
    Path(Vec<Id>),
    Root(Id),
    /// The cursor post does not exist; nothing lies beyond it.
    Dangling,
}

impl CursorKey {
    pub fn resolve(mode: SortMode, since: Option<Id>, cursor_post: Option<&Post>) -> Self {
        let Some(since) = since else { return CursorKey::Start };
        match mode {
            SortMode::Flat => CursorKey::Id(since),
            SortMode::Tree => cursor_post
                .map(|p| CursorKey::Path(p.path.clone()))
                .unwrap_or(CursorKey::Dangling),
            SortMode::ParentTree => cursor_post
                .and_then(|p| root_of(&p.path))
                .map(CursorKey::Root)
                .unwrap_or(CursorKey::Dangling),
        }
    }
}

macro_rules! select_posts {
    ($tail:literal) => {
        concat!(
            "SELECT id, parent, author, forum, thread, message, is_edited, created, path ",
            "FROM posts WHERE thread = $1 ",
            $tail
        )
    };
}

impl QueryShape {
    /// The statement for this shape. Binds: `$1` thread id, then the cursor
    /// post id when `cursor` is set, then the limit.
    pub fn sql(self) -> &'static str {
        use Direction::{Asc, Desc};
        use SortMode::{Flat, ParentTree, Tree};
        match (self.mode, self.cursor, self.direction) {
            (Flat, false, Asc) => select_posts!("ORDER BY created, id LIMIT $2"),
            (Flat, false, Desc) => select_posts!("ORDER BY created DESC, id DESC LIMIT $2"),
            (Flat, true, Asc) => select_posts!("AND id > $2 ORDER BY created, id LIMIT $3"),
            (Flat, true, Desc) => select_posts!("AND id < $2 ORDER BY created DESC, id DESC LIMIT $3"),
            (Tree, false, Asc) => select_posts!("ORDER BY path LIMIT $2"),
            (Tree, false, Desc) => select_posts!("ORDER BY path DESC LIMIT $2"),
            (Tree, true, Asc) => select_posts!(
                "AND path > (SELECT path FROM posts WHERE id = $2) ORDER BY path LIMIT $3"
            ),
            (Tree, true, Desc) => select_posts!(
                "AND path < (SELECT path FROM posts WHERE id = $2) ORDER BY path DESC LIMIT $3"
            ),
            (ParentTree, false, Asc) => select_posts!(
                "AND path[1] IN (SELECT id FROM posts WHERE thread = $1 AND parent = 0 \
                 ORDER BY id LIMIT $2) ORDER BY path[1], path"
            ),
            (ParentTree, false, Desc) => select_posts!(
                "AND path[1] IN (SELECT id FROM posts WHERE thread = $1 AND parent = 0 \
                 ORDER BY id DESC LIMIT $2) ORDER BY path[1] DESC, path"
            ),
            (ParentTree, true, Asc) => select_posts!(
                "AND path[1] IN (SELECT id FROM posts WHERE thread = $1 AND parent = 0 \
                 AND id > (SELECT path[1] FROM posts WHERE id = $2) \
                 ORDER BY id LIMIT $3) ORDER BY path[1], path"
            ),
            (ParentTree, true, Desc) => select_posts!(
                "AND path[1] IN (SELECT id FROM posts WHERE thread = $1 AND parent = 0 \
                 AND id < (SELECT path[1] FROM posts WHERE id = $2) \
                 ORDER BY id DESC LIMIT $3) ORDER BY path[1] DESC, path"
            ),
        }
    }

    /// Cursor predicate. In `parent_tree` mode it is evaluated on root posts only.
    pub fn admits(self, post: &Post, cursor: &CursorKey) -> bool {
        let dir = self.direction;
        match cursor {
            CursorKey::Start => true,
            CursorKey::Dangling => false,
            CursorKey::Id(c) => dir.past(&post.id, c),
            CursorKey::Path(c) => dir.past(post.path.as_slice(), c.as_slice()),
            CursorKey::Root(c) => root_of(&post.path).is_some_and(|r| dir.past(&r, c)),
        }
    }

    pub fn compare(self, a: &Post, b: &Post) -> Ordering {
        let dir = self.direction;
        match self.mode {
            SortMode::Flat => dir.orient(a.created.cmp(&b.created).then(a.id.cmp(&b.id))),
            SortMode::Tree => dir.orient(a.path.cmp(&b.path)),
            // subtrees follow the direction, rows inside a subtree stay in pre-order
            SortMode::ParentTree => dir
                .orient(root_of(&a.path).cmp(&root_of(&b.path)))
                .then_with(|| a.path.cmp(&b.path)),
        }
    }
}

/// Evaluates `page` over the posts of one thread held in memory.
///
/// `cursor_post` is the stored post named by `page.since`, looked up across
/// all threads.
pub fn select_page<'a, I>(thread_posts: I, page: &PostPage, cursor_post: Option<&Post>) -> Vec<Post>
where
    I: IntoIterator<Item = &'a Post>,
{
    let shape = page.shape();
    let cursor = CursorKey::resolve(page.sort, page.since, cursor_post);
    if cursor == CursorKey::Dangling {
        return Vec::new();
    }
    let limit = row_limit(page.limit);
    match shape.mode {
        SortMode::Flat | SortMode::Tree => {
            let mut rows: Vec<&Post> = thread_posts
                .into_iter()
                .filter(|p| shape.admits(p, &cursor))
                .collect();
            rows.sort_by(|a, b| shape.compare(a, b));
            rows.into_iter().take(limit).cloned().collect()
        }
        SortMode::ParentTree => {
            let posts: Vec<&Post> = thread_posts.into_iter().collect();
            let mut roots: Vec<Id> = posts
                .iter()
                .filter(|p| p.parent == 0 && shape.admits(p, &cursor))
                .map(|p| p.id)
                .collect();
            roots.sort_by(|a, b| shape.direction.orient(a.cmp(b)));
            roots.truncate(limit);
            let selected: HashSet<Id> = roots.into_iter().collect();
            let mut rows: Vec<&Post> = posts
                .into_iter()
                .filter(|p| root_of(&p.path).is_some_and(|r| selected.contains(&r)))
                .collect();
            rows.sort_by(|a, b| shape.compare(a, b));
            rows.into_iter().cloned().collect()
        }
    }
}

/// Threads of a forum, paged by creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumThreadsPage {
    pub limit: i64,
    /// Inclusive bound on `created`.
    pub since: Option<DateTime<Utc>>,
    pub desc: bool,
}

impl Default for ForumThreadsPage {
    fn default() -> Self {
        Self { limit: DEFAULT_LIMIT, since: None, desc: false }
    }
}

macro_rules! select_threads {
    ($tail:literal) => {
        concat!(
            "SELECT id, title, author, forum, message, votes, slug, created ",
            "FROM threads WHERE forum = $1 ",
            $tail
        )
    };
}

impl ForumThreadsPage {
    /// Binds: `$1` canonical forum slug, then `since` when set, then the limit.
    pub fn sql(&self) -> &'static str {
        match (self.since.is_some(), self.desc) {
            (false, false) => select_threads!("ORDER BY created, id LIMIT $2"),
            (false, true) => select_threads!("ORDER BY created DESC, id DESC LIMIT $2"),
            (true, false) => select_threads!("AND created >= $2 ORDER BY created, id LIMIT $3"),
            (true, true) => select_threads!("AND created <= $2 ORDER BY created DESC, id DESC LIMIT $3"),
        }
    }

    pub fn select<'a, I>(&self, threads: I) -> Vec<Thread>
    where
        I: IntoIterator<Item = &'a Thread>,
    {
        let dir = Direction::from_desc(self.desc);
        let mut rows: Vec<&Thread> = threads
            .into_iter()
            .filter(|t| match self.since {
                None => true,
                Some(since) => dir.orient(t.created.cmp(&since)) != Ordering::Less,
            })
            .collect();
        rows.sort_by(|a, b| dir.orient(a.created.cmp(&b.created).then(a.id.cmp(&b.id))));
        rows.into_iter().take(row_limit(self.limit)).cloned().collect()
    }
}

/// Distinct forum authors, paged by case-insensitive nickname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumUsersPage {
    pub limit: i64,
    /// Exclusive nickname cursor.
    pub since: Option<String>,
    pub desc: bool,
}

impl Default for ForumUsersPage {
    fn default() -> Self {
        Self { limit: DEFAULT_LIMIT, since: None, desc: false }
    }
}

macro_rules! select_members {
    ($tail:literal) => {
        concat!(
            "SELECT u.nickname, u.fullname, u.email, u.about ",
            "FROM forum_users m JOIN users u ON u.nickname = m.nickname WHERE m.forum = $1 ",
            $tail
        )
    };
}

impl ForumUsersPage {
    /// Binds: `$1` canonical forum slug, then `since` when set, then the limit.
    pub fn sql(&self) -> &'static str {
        match (self.since.is_some(), self.desc) {
            (false, false) => select_members!("ORDER BY lower(m.nickname) LIMIT $2"),
            (false, true) => select_members!("ORDER BY lower(m.nickname) DESC LIMIT $2"),
            (true, false) => select_members!(
                "AND lower(m.nickname) > lower($2) ORDER BY lower(m.nickname) LIMIT $3"
            ),
            (true, true) => select_members!(
                "AND lower(m.nickname) < lower($2) ORDER BY lower(m.nickname) DESC LIMIT $3"
            ),
        }
    }

    pub fn select<'a, I>(&self, members: I) -> Vec<User>
    where
        I: IntoIterator<Item = &'a User>,
    {
        let dir = Direction::from_desc(self.desc);
        let since = self.since.as_deref().map(str::to_lowercase);
        let mut rows: Vec<(String, &User)> = members
            .into_iter()
            .map(|u| (u.nickname.to_lowercase(), u))
            .filter(|(key, _)| since.as_ref().map_or(true, |s| dir.past(key, s)))
            .collect();
        rows.sort_by(|a, b| dir.orient(a.0.cmp(&b.0)));
        rows.into_iter().take(row_limit(self.limit)).map(|(_, u)| u.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(id: Id, parent: Id, path: &[Id], created_secs: i64) -> Post {
        Post {
            id,
            parent,
            author: "a".into(),
            forum: "f".into(),
            thread: 1,
            message: format!("m{id}"),
            is_edited: false,
            created: Utc.timestamp_opt(created_secs, 0).unwrap(),
            path: path.to_vec(),
        }
    }

    // 1 ─┬─ 2 ── 4
    //    └─ 3
    // 5 ── 6
    // 7
    fn forest() -> Vec<Post> {
        vec![
            post(1, 0, &[1], 10),
            post(2, 1, &[1, 2], 10),
            post(3, 1, &[1, 3], 20),
            post(4, 2, &[1, 2, 4], 20),
            post(5, 0, &[5], 5),
            post(6, 5, &[5, 6], 30),
            post(7, 0, &[7], 30),
        ]
    }

    fn ids(posts: &[Post]) -> Vec<Id> {
        posts.iter().map(|p| p.id).collect()
    }

    fn page(sort: SortMode, limit: i64, since: Option<Id>, desc: bool) -> PostPage {
        PostPage { limit, since, sort, desc }
    }

    fn run(posts: &[Post], p: &PostPage) -> Vec<Id> {
        let cursor = p.since.and_then(|id| posts.iter().find(|x| x.id == id));
        ids(&select_page(posts, p, cursor))
    }

    #[test]
    fn sort_mode_parsing() {
        assert_eq!("".parse::<SortMode>().unwrap(), SortMode::Flat);
        assert_eq!("tree".parse::<SortMode>().unwrap(), SortMode::Tree);
        assert_eq!("parent_tree".parse::<SortMode>().unwrap(), SortMode::ParentTree);
        assert!("sideways".parse::<SortMode>().is_err());
    }

    #[test]
    fn flat_orders_by_created_then_id() {
        let posts = forest();
        assert_eq!(run(&posts, &page(SortMode::Flat, 100, None, false)), vec![5, 1, 2, 3, 4, 6, 7]);
        assert_eq!(run(&posts, &page(SortMode::Flat, 3, None, true)), vec![7, 6, 4]);
        // cursor filters on id, not on the sort key
        assert_eq!(run(&posts, &page(SortMode::Flat, 100, Some(4), false)), vec![5, 6, 7]);
        assert_eq!(run(&posts, &page(SortMode::Flat, 100, Some(4), true)), vec![3, 2, 1]);
    }

    #[test]
    fn tree_is_preorder_and_pages_by_path() {
        let posts = forest();
        assert_eq!(run(&posts, &page(SortMode::Tree, 100, None, false)), vec![1, 2, 4, 3, 5, 6, 7]);
        assert_eq!(run(&posts, &page(SortMode::Tree, 3, Some(4), false)), vec![3, 5, 6]);
        assert_eq!(run(&posts, &page(SortMode::Tree, 100, None, true)), vec![7, 6, 5, 3, 4, 2, 1]);
        assert_eq!(run(&posts, &page(SortMode::Tree, 2, Some(5), true)), vec![3, 4]);
    }

    #[test]
    fn parent_tree_limit_counts_roots() {
        let posts = forest();
        let rows = run(&posts, &page(SortMode::ParentTree, 2, None, false));
        assert_eq!(rows, vec![1, 2, 4, 3, 5, 6]);
        // the cursor is any post; paging resumes after its root
        assert_eq!(run(&posts, &page(SortMode::ParentTree, 1, Some(4), false)), vec![5, 6]);
        assert_eq!(run(&posts, &page(SortMode::ParentTree, 2, None, true)), vec![7, 5, 6]);
        assert_eq!(run(&posts, &page(SortMode::ParentTree, 5, Some(6), true)), vec![1, 2, 4, 3]);
    }

    #[test]
    fn dangling_cursor_yields_empty_page() {
        let posts = forest();
        assert!(run(&posts, &page(SortMode::Tree, 10, Some(99), false)).is_empty());
        assert!(run(&posts, &page(SortMode::ParentTree, 10, Some(99), false)).is_empty());
        // flat compares ids directly
        assert_eq!(run(&posts, &page(SortMode::Flat, 10, Some(99), true)).len(), 7);
    }

    #[test]
    fn every_shape_binds_thread_cursor_and_limit() {
        for mode in [SortMode::Flat, SortMode::Tree, SortMode::ParentTree] {
            for cursor in [false, true] {
                for direction in [Direction::Asc, Direction::Desc] {
                    let sql = QueryShape { mode, cursor, direction }.sql();
                    let last = if cursor { "$3" } else { "$2" };
                    assert!(sql.contains(last), "{sql}");
                    assert_eq!(sql.contains("$3"), cursor, "{sql}");
                    assert!(sql.starts_with("SELECT id, parent"), "{sql}");
                }
            }
        }
    }

    #[test]
    fn forum_thread_since_is_inclusive() {
        let mk = |id: Id, secs: i64| Thread {
            id,
            title: "t".into(),
            author: "a".into(),
            forum: "f".into(),
            message: "m".into(),
            votes: 0,
            slug: None,
            created: Utc.timestamp_opt(secs, 0).unwrap(),
        };
        let threads = vec![mk(1, 10), mk(2, 20), mk(3, 30)];
        let since = Some(Utc.timestamp_opt(20, 0).unwrap());
        let asc = ForumThreadsPage { limit: 10, since, desc: false }.select(&threads);
        assert_eq!(asc.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 3]);
        let desc = ForumThreadsPage { limit: 10, since, desc: true }.select(&threads);
        assert_eq!(desc.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn forum_users_cursor_ignores_case() {
        let mk = |nick: &str| User {
            nickname: nick.into(),
            fullname: String::new(),
            email: format!("{nick}@x"),
            about: String::new(),
        };
        let users = vec![mk("bob"), mk("Alice"), mk("carol")];
        let page = ForumUsersPage { limit: 10, since: Some("ALICE".into()), desc: false };
        let names: Vec<String> = page.select(&users).into_iter().map(|u| u.nickname).collect();
        assert_eq!(names, vec!["bob", "carol"]);
        let page = ForumUsersPage { limit: 1, since: None, desc: true };
        assert_eq!(page.select(&users)[0].nickname, "carol");
    }
}
