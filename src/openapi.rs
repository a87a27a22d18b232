use crate::models::{
    Forum, NewForum, NewPost, NewThread, NewUser, NewVote, Post, PostDetail, ServiceStatus, Thread, UpdatePost,
    UpdateThread, UpdateUser, User,
};
use crate::outcome::ErrorBody;
use crate::pagination::SortMode;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::create_user,
        crate::routes::get_user,
        crate::routes::update_user,
        crate::routes::create_forum,
        crate::routes::get_forum,
        crate::routes::forum_threads,
        crate::routes::forum_users,
        crate::routes::create_thread,
        crate::routes::get_thread,
        crate::routes::update_thread,
        crate::routes::vote,
        crate::routes::create_posts,
        crate::routes::thread_posts,
        crate::routes::get_post,
        crate::routes::update_post,
        crate::routes::clear,
        crate::routes::status,
    ),
    components(schemas(
        User, NewUser, UpdateUser, Forum, NewForum, Thread, NewThread, UpdateThread,
        Post, NewPost, UpdatePost, PostDetail, NewVote, ServiceStatus, SortMode, ErrorBody
    )),
    tags(
        (name = "users", description = "User profiles"),
        (name = "forums", description = "Forums and their listings"),
        (name = "threads", description = "Threads and votes"),
        (name = "posts", description = "Threaded posts"),
        (name = "service", description = "Administrative operations"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in ["/api/user/{nickname}/create", "/api/forum/{slug}/users", "/api/thread/{slug_or_id}/posts", "/api/service/status"] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
