//! Materialized ancestor paths for threaded replies.
//!
//! Every post stores the ids of its ancestors, root first, followed by its own
//! id. Comparing two paths element-wise gives a pre-order traversal of the reply
//! forest: an ancestor's path is a prefix of, and so sorts before, all of its
//! descendants, and siblings sort by their trailing id (insertion order).
//! Paths are computed once on insert from the parent's stored path and are
//! never rebuilt by walking the tree.

use crate::models::Id;
use crate::repo::{Entity, RepoError};

/// Thread membership and stored path of an already persisted post.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PostAnchor {
    pub thread: Id,
    pub path: Vec<Id>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("parent post {0} not found")]
    ParentMissing(Id),
    #[error("parent post {parent} belongs to thread {found}, not {expected}")]
    ForeignThread { parent: Id, expected: Id, found: Id },
}

impl From<PathError> for RepoError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::ParentMissing(_) => RepoError::NotFound(Entity::Post),
            PathError::ForeignThread { .. } => RepoError::Conflict,
        }
    }
}

/// Checks that `parent` may receive a reply in `thread`.
///
/// `anchor` is the stored state of the parent, or `None` when no such post
/// exists. A zero parent denotes a root post and is always accepted.
pub fn check_parent(thread: Id, parent: Id, anchor: Option<&PostAnchor>) -> Result<(), PathError> {
    if parent == 0 {
        return Ok(());
    }
    let anchor = anchor.ok_or(PathError::ParentMissing(parent))?;
    if anchor.thread != thread {
        return Err(PathError::ForeignThread { parent, expected: thread, found: anchor.thread });
    }
    Ok(())
}

/// Computes the path of a post that has just been assigned `new_id`.
pub fn assign_path(
    thread: Id,
    parent: Id,
    anchor: Option<&PostAnchor>,
    new_id: Id,
) -> Result<Vec<Id>, PathError> {
    check_parent(thread, parent, anchor)?;
    match anchor.filter(|_| parent != 0) {
        None => Ok(vec![new_id]),
        Some(anchor) => {
            let mut path = Vec::with_capacity(anchor.path.len() + 1);
            path.extend_from_slice(&anchor.path);
            path.push(new_id);
            Ok(path)
        }
    }
}

/// Root ancestor of a path (its first element).
pub fn root_of(path: &[Id]) -> Option<Id> {
    path.first().copied()
}

/// Nesting depth; root posts have depth 0.
pub fn depth(path: &[Id]) -> usize {
    path.len().saturating_sub(1)
}

/// Verifies the stored path of post `id` against its parent's stored path.
pub fn is_consistent(id: Id, parent: Id, path: &[Id], parent_path: Option<&[Id]>) -> bool {
    if path.last() != Some(&id) {
        return false;
    }
    match (parent, parent_path) {
        (0, _) => path.len() == 1,
        (_, Some(pp)) => path.len() == pp.len() + 1 && path.starts_with(pp),
        (_, None) => false,
    }
}
