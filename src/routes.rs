use std::sync::Arc;

use actix_web::body::BoxBody;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::error::ApiError;
use crate::models::*;
use crate::outcome::{ErrorBody, Outcome};
use crate::pagination::{ForumThreadsPage, ForumUsersPage, PostPage, SortMode, DEFAULT_LIMIT};
use crate::repo::Repo;
use crate::service::ForumService;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default().error_handler(|err, _req| ApiError::MalformedBody(err.to_string()).into()),
    )
    .app_data(web::QueryConfig::default().error_handler(|err, _req| ApiError::bad_request(err).into()))
    .service(
        web::scope("/api")
            .service(web::resource("/user/{nickname}/create").route(web::post().to(create_user)))
            .service(
                web::resource("/user/{nickname}/profile")
                    .route(web::get().to(get_user))
                    .route(web::post().to(update_user)),
            )
            .service(web::resource("/forum/create").route(web::post().to(create_forum)))
            .service(web::resource("/forum/{slug}/details").route(web::get().to(get_forum)))
            .service(web::resource("/forum/{slug}/create").route(web::post().to(create_thread)))
            .service(web::resource("/forum/{slug}/threads").route(web::get().to(forum_threads)))
            .service(web::resource("/forum/{slug}/users").route(web::get().to(forum_users)))
            .service(web::resource("/thread/{slug_or_id}/create").route(web::post().to(create_posts)))
            .service(
                web::resource("/thread/{slug_or_id}/details")
                    .route(web::get().to(get_thread))
                    .route(web::post().to(update_thread)),
            )
            .service(web::resource("/thread/{slug_or_id}/vote").route(web::post().to(vote)))
            .service(web::resource("/thread/{slug_or_id}/posts").route(web::get().to(thread_posts)))
            .service(
                web::resource("/post/{id}/details")
                    .route(web::get().to(get_post))
                    .route(web::post().to(update_post)),
            )
            .service(web::resource("/service/clear").route(web::post().to(clear)))
            .service(web::resource("/service/status").route(web::get().to(status))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub forum: ForumService,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { forum: ForumService::new(repo) }
    }
}

impl<T: Serialize> Responder for Outcome<T> {
    type Body = BoxBody;

    fn respond_to(self, _req: &HttpRequest) -> HttpResponse<Self::Body> {
        HttpResponse::build(self.status.http_status()).json(self.payload)
    }
}

fn limit(raw: Option<i64>) -> Result<i64, ApiError> {
    match raw {
        None => Ok(DEFAULT_LIMIT),
        Some(n) if n < 0 => Err(ApiError::bad_request(format!("limit must not be negative, got {n}"))),
        Some(n) => Ok(n),
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PostsQuery {
    /// Rows per page (roots per page in `parent_tree` mode); default 100.
    pub limit: Option<i64>,
    /// Id of the post after which the page starts; `0` means from the beginning.
    pub since: Option<Id>,
    /// `flat` (default), `tree` or `parent_tree`.
    pub sort: Option<String>,
    pub desc: Option<bool>,
}

impl PostsQuery {
    pub fn into_page(self) -> Result<PostPage, ApiError> {
        let sort = self.sort.as_deref().unwrap_or_default().parse::<SortMode>().map_err(ApiError::bad_request)?;
        Ok(PostPage {
            limit: limit(self.limit)?,
            since: self.since.filter(|&id| id != 0),
            sort,
            desc: self.desc.unwrap_or(false),
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ForumThreadsQuery {
    pub limit: Option<i64>,
    /// Inclusive creation-time bound.
    pub since: Option<DateTime<Utc>>,
    pub desc: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ForumUsersQuery {
    pub limit: Option<i64>,
    /// Exclusive nickname cursor, compared case-insensitively.
    pub since: Option<String>,
    pub desc: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PostDetailsQuery {
    /// Comma separated subset of `user,forum,thread`.
    pub related: Option<String>,
}

// ── users ─────────────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/api/user/{nickname}/create",
    params(("nickname" = String, Path, description = "Nickname of the new user")),
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Nickname or email taken; body lists the colliding users", body = [User])
    )
)]
pub async fn create_user(data: web::Data<AppState>, path: web::Path<String>, payload: web::Json<NewUser>) -> impl Responder {
    data.forum.create_user(&path, payload.into_inner()).await
}

#[utoipa::path(
    get,
    path = "/api/user/{nickname}/profile",
    params(("nickname" = String, Path, description = "Nickname")),
    responses(
        (status = 200, description = "User profile", body = User),
        (status = 404, description = "User not found", body = ErrorBody)
    )
)]
pub async fn get_user(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    data.forum.get_user(&path).await
}

#[utoipa::path(
    post,
    path = "/api/user/{nickname}/profile",
    params(("nickname" = String, Path, description = "Nickname")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Updated profile", body = User),
        (status = 404, description = "User not found", body = ErrorBody),
        (status = 409, description = "Email taken", body = ErrorBody)
    )
)]
pub async fn update_user(data: web::Data<AppState>, path: web::Path<String>, payload: web::Json<UpdateUser>) -> impl Responder {
    data.forum.update_user(&path, payload.into_inner()).await
}

// ── forums ────────────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/api/forum/create",
    request_body = NewForum,
    responses(
        (status = 201, description = "Forum created", body = Forum),
        (status = 404, description = "Author not found", body = ErrorBody),
        (status = 409, description = "Slug taken; body is the existing forum", body = Forum)
    )
)]
pub async fn create_forum(data: web::Data<AppState>, payload: web::Json<NewForum>) -> impl Responder {
    data.forum.create_forum(payload.into_inner()).await
}

#[utoipa::path(
    get,
    path = "/api/forum/{slug}/details",
    params(("slug" = String, Path, description = "Forum slug")),
    responses(
        (status = 200, description = "Forum", body = Forum),
        (status = 404, description = "Forum not found", body = ErrorBody)
    )
)]
pub async fn get_forum(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    data.forum.get_forum(&path).await
}

#[utoipa::path(
    get,
    path = "/api/forum/{slug}/threads",
    params(("slug" = String, Path, description = "Forum slug"), ForumThreadsQuery),
    responses(
        (status = 200, description = "Threads by creation time", body = [Thread]),
        (status = 404, description = "Forum not found", body = ErrorBody)
    )
)]
pub async fn forum_threads(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ForumThreadsQuery>,
) -> Result<impl Responder, ApiError> {
    let q = query.into_inner();
    let page = ForumThreadsPage { limit: limit(q.limit)?, since: q.since, desc: q.desc.unwrap_or(false) };
    Ok(data.forum.forum_threads(&path, &page).await)
}

#[utoipa::path(
    get,
    path = "/api/forum/{slug}/users",
    params(("slug" = String, Path, description = "Forum slug"), ForumUsersQuery),
    responses(
        (status = 200, description = "Distinct thread and post authors", body = [User]),
        (status = 404, description = "Forum not found", body = ErrorBody)
    )
)]
pub async fn forum_users(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ForumUsersQuery>,
) -> Result<impl Responder, ApiError> {
    let q = query.into_inner();
    let page = ForumUsersPage {
        limit: limit(q.limit)?,
        since: q.since.filter(|s| !s.is_empty()),
        desc: q.desc.unwrap_or(false),
    };
    Ok(data.forum.forum_users(&path, &page).await)
}

// ── threads ───────────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/api/forum/{slug}/create",
    params(("slug" = String, Path, description = "Forum slug")),
    request_body = NewThread,
    responses(
        (status = 201, description = "Thread created", body = Thread),
        (status = 404, description = "Author or forum not found", body = ErrorBody),
        (status = 409, description = "Slug taken; body is the existing thread", body = Thread)
    )
)]
pub async fn create_thread(data: web::Data<AppState>, path: web::Path<String>, payload: web::Json<NewThread>) -> impl Responder {
    data.forum.create_thread(&path, payload.into_inner()).await
}

#[utoipa::path(
    get,
    path = "/api/thread/{slug_or_id}/details",
    params(("slug_or_id" = String, Path, description = "Thread id or slug")),
    responses(
        (status = 200, description = "Thread", body = Thread),
        (status = 404, description = "Thread not found", body = ErrorBody)
    )
)]
pub async fn get_thread(data: web::Data<AppState>, path: web::Path<ThreadIdent>) -> impl Responder {
    data.forum.get_thread(&path).await
}

#[utoipa::path(
    post,
    path = "/api/thread/{slug_or_id}/details",
    params(("slug_or_id" = String, Path, description = "Thread id or slug")),
    request_body = UpdateThread,
    responses(
        (status = 200, description = "Updated thread", body = Thread),
        (status = 404, description = "Thread not found", body = ErrorBody)
    )
)]
pub async fn update_thread(
    data: web::Data<AppState>,
    path: web::Path<ThreadIdent>,
    payload: web::Json<UpdateThread>,
) -> impl Responder {
    data.forum.update_thread(&path, payload.into_inner()).await
}

#[utoipa::path(
    post,
    path = "/api/thread/{slug_or_id}/vote",
    params(("slug_or_id" = String, Path, description = "Thread id or slug")),
    request_body = NewVote,
    responses(
        (status = 200, description = "Thread with updated vote total", body = Thread),
        (status = 400, description = "Voice is not -1 or 1", body = ErrorBody),
        (status = 404, description = "Thread or author not found", body = ErrorBody)
    )
)]
pub async fn vote(data: web::Data<AppState>, path: web::Path<ThreadIdent>, payload: web::Json<NewVote>) -> impl Responder {
    data.forum.vote(&path, payload.into_inner()).await
}

// ── posts ─────────────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/api/thread/{slug_or_id}/create",
    params(("slug_or_id" = String, Path, description = "Thread id or slug")),
    request_body = [NewPost],
    responses(
        (status = 201, description = "All posts created", body = [Post]),
        (status = 404, description = "Thread or author not found", body = ErrorBody),
        (status = 409, description = "A parent is missing or in another thread; nothing was created", body = ErrorBody)
    )
)]
pub async fn create_posts(
    data: web::Data<AppState>,
    path: web::Path<ThreadIdent>,
    payload: web::Json<Vec<NewPost>>,
) -> impl Responder {
    data.forum.create_posts(&path, payload.into_inner()).await
}

#[utoipa::path(
    get,
    path = "/api/thread/{slug_or_id}/posts",
    params(("slug_or_id" = String, Path, description = "Thread id or slug"), PostsQuery),
    responses(
        (status = 200, description = "One page of posts", body = [Post]),
        (status = 400, description = "Unknown sort mode", body = ErrorBody),
        (status = 404, description = "Thread not found", body = ErrorBody)
    )
)]
pub async fn thread_posts(
    data: web::Data<AppState>,
    path: web::Path<ThreadIdent>,
    query: web::Query<PostsQuery>,
) -> Result<impl Responder, ApiError> {
    let page = query.into_inner().into_page()?;
    Ok(data.forum.thread_posts(&path, &page).await)
}

#[utoipa::path(
    get,
    path = "/api/post/{id}/details",
    params(("id" = Id, Path, description = "Post id"), PostDetailsQuery),
    responses(
        (status = 200, description = "Post with requested related rows", body = PostDetail),
        (status = 404, description = "Post not found", body = ErrorBody)
    )
)]
pub async fn get_post(data: web::Data<AppState>, path: web::Path<Id>, query: web::Query<PostDetailsQuery>) -> impl Responder {
    let related = query.related.as_deref().map(Related::parse).unwrap_or_default();
    data.forum.get_post(path.into_inner(), related).await
}

#[utoipa::path(
    post,
    path = "/api/post/{id}/details",
    params(("id" = Id, Path, description = "Post id")),
    request_body = UpdatePost,
    responses(
        (status = 200, description = "Post, edited when the message changed", body = Post),
        (status = 404, description = "Post not found", body = ErrorBody)
    )
)]
pub async fn update_post(data: web::Data<AppState>, path: web::Path<Id>, payload: web::Json<UpdatePost>) -> impl Responder {
    data.forum.update_post(path.into_inner(), payload.into_inner()).await
}

// ── service ───────────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/api/service/clear",
    responses((status = 200, description = "All data removed"), (status = 500, description = "Store failure", body = ErrorBody))
)]
pub async fn clear(data: web::Data<AppState>) -> impl Responder {
    data.forum.clear().await
}

#[utoipa::path(
    get,
    path = "/api/service/status",
    responses(
        (status = 200, description = "Row counts", body = ServiceStatus),
        (status = 500, description = "Store failure", body = ErrorBody)
    )
)]
pub async fn status(data: web::Data<AppState>) -> impl Responder {
    data.forum.status().await
}
