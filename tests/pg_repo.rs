#![cfg(feature = "postgres-store")]

use std::collections::HashSet;

use serial_test::serial;
use sqlx::postgres::PgPoolOptions;

use forumdb::models::*;
use forumdb::pagination::{ForumUsersPage, PostPage, SortMode};
use forumdb::path;
use forumdb::repo::pg::PgRepo;
use forumdb::repo::{Entity, RepoError};
use forumdb::repo::{ForumRepo, PostRepo, ServiceRepo, ThreadRepo, UserRepo, VoteRepo};
use forumdb::votes::Voice;

/// Fresh, migrated and truncated store, or `None` when no database is configured.
async fn pg_repo() -> Option<PgRepo> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new().max_connections(8).connect(&url).await.ok()?;
    sqlx::migrate!("./migrations").run(&pool).await.ok()?;
    let repo = PgRepo::new(pool);
    repo.clear().await.ok()?;
    Some(repo)
}

fn signup(nick: &str) -> NewUser {
    NewUser { fullname: format!("{nick} full"), email: format!("{nick}@example.org"), about: String::new() }
}

fn post(author: &str, parent: Id, message: &str) -> NewPost {
    NewPost { parent, author: author.into(), message: message.into() }
}

async fn setup(r: &PgRepo) -> Thread {
    r.create_user("alice", signup("alice")).await.unwrap();
    r.create_forum(NewForum { slug: "f".into(), title: "F".into(), user: "alice".into() }).await.unwrap();
    let nt = NewThread { title: "T".into(), author: "alice".into(), message: "op".into(), slug: Some("t".into()), created: None };
    r.create_thread("f", nt).await.unwrap()
}

#[tokio::test]
#[serial]
async fn pg_paths_and_tree_order() {
    let Some(r) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    let t = setup(&r).await;
    let ident = ThreadIdent::Id(t.id);

    let roots = r.create_posts(&ident, vec![post("alice", 0, "r1"), post("alice", 0, "r2")]).await.unwrap();
    let kids = r.create_posts(&ident, vec![post("alice", roots[0].id, "a"), post("alice", roots[1].id, "b")]).await.unwrap();
    let grand = r.create_posts(&ident, vec![post("alice", kids[0].id, "c")]).await.unwrap();

    assert_eq!(roots[0].path, vec![roots[0].id]);
    assert!(path::is_consistent(kids[0].id, roots[0].id, &kids[0].path, Some(&roots[0].path)));
    assert!(path::is_consistent(grand[0].id, kids[0].id, &grand[0].path, Some(&kids[0].path)));

    let page = PostPage { limit: 100, sort: SortMode::Tree, ..Default::default() };
    let tree: Vec<Id> = r.thread_posts(&ident, &page).await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(tree, vec![roots[0].id, kids[0].id, grand[0].id, roots[1].id, kids[1].id]);
}

#[tokio::test]
#[serial]
async fn pg_parent_tree_limit_counts_roots() {
    let Some(r) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    let t = setup(&r).await;
    let ident = ThreadIdent::Id(t.id);
    let roots = r.create_posts(&ident, (0..5).map(|_| post("alice", 0, "root")).collect()).await.unwrap();
    for root in &roots {
        r.create_posts(&ident, vec![post("alice", root.id, "x"), post("alice", root.id, "y")]).await.unwrap();
    }

    let page = PostPage { limit: 2, sort: SortMode::ParentTree, ..Default::default() };
    let rows = r.thread_posts(&ident, &page).await.unwrap();
    let seen: HashSet<Id> = rows.iter().map(|p| p.path[0]).collect();
    assert!(rows.len() > 2);
    assert_eq!(seen, HashSet::from([roots[0].id, roots[1].id]));

    let page = PostPage { limit: 2, since: rows.last().map(|p| p.id), sort: SortMode::ParentTree, desc: false };
    let next: HashSet<Id> = r.thread_posts(&ident, &page).await.unwrap().iter().map(|p| p.path[0]).collect();
    assert_eq!(next, HashSet::from([roots[2].id, roots[3].id]));
}

#[tokio::test]
#[serial]
async fn pg_revote_and_failed_batch() {
    let Some(r) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    let t = setup(&r).await;
    let ident = ThreadIdent::Slug("t".into());

    r.vote(&ident, NewVote { nickname: "alice".into(), voice: Voice::UP }).await.unwrap();
    let th = r.vote(&ident, NewVote { nickname: "alice".into(), voice: Voice::DOWN }).await.unwrap();
    assert_eq!(th.votes, -1);
    let rows = sqlx::query_as::<_, Vote>("SELECT author, thread, voice FROM votes WHERE thread = $1")
        .bind(t.id)
        .fetch_all(r.pool())
        .await
        .unwrap();
    assert_eq!(rows, vec![Vote { author: "alice".into(), thread: t.id, voice: -1 }]);
    assert!(matches!(r.vote(&ident, NewVote { nickname: "ghost".into(), voice: Voice::UP }).await, Err(RepoError::AuthorNotFound)));

    r.create_user("b", signup("b")).await.unwrap();
    let other = r
        .create_thread("f", NewThread { title: "o".into(), author: "b".into(), message: "o".into(), slug: None, created: None })
        .await
        .unwrap();
    let foreign = r.create_posts(&ThreadIdent::Id(other.id), vec![post("b", 0, "elsewhere")]).await.unwrap();
    let before = r.get_forum("f").await.unwrap().posts;

    let res = r.create_posts(&ident, vec![post("alice", 0, "m1"), post("b", foreign[0].id, "m2")]).await;
    assert!(matches!(res, Err(RepoError::Conflict)));
    let res = r.create_posts(&ident, vec![post("alice", 0, "m1"), post("ghost", 0, "m2")]).await;
    assert!(matches!(res, Err(RepoError::AuthorNotFound)));
    assert!(r.thread_posts(&ident, &PostPage::default()).await.unwrap().is_empty());
    assert_eq!(r.get_forum("f").await.unwrap().posts, before);
}

#[tokio::test]
#[serial]
async fn pg_signup_conflict_and_forum_users() {
    let Some(r) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    let t = setup(&r).await;
    r.create_user("bob", signup("bob")).await.unwrap();

    let err = r
        .create_user("ALICE", NewUser { fullname: "x".into(), email: "BOB@example.org".into(), about: String::new() })
        .await
        .unwrap_err();
    match err {
        RepoError::Duplicate(Existing::Users(rows)) => {
            let nicks: HashSet<String> = rows.into_iter().map(|u| u.nickname).collect();
            assert_eq!(nicks, HashSet::from(["alice".to_string(), "bob".to_string()]));
        }
        other => panic!("expected duplicate users, got {other:?}"),
    }

    for n in 0..6 {
        let author = if n % 2 == 0 { "alice" } else { "bob" };
        r.create_posts(&ThreadIdent::Id(t.id), vec![post(author, 0, "hi")]).await.unwrap();
    }
    let users = r.forum_users("f", &ForumUsersPage::default()).await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(r.get_forum("F").await.unwrap().posts, 6);

    assert!(matches!(r.get_thread(&ThreadIdent::Id(999_999)).await, Err(RepoError::NotFound(Entity::Thread))));
}
