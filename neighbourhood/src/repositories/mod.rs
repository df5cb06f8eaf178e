//! One repository per resource. Each translates between models and documents and reports
//! app-level refusals as short snake_case error codes.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod comments;
pub mod likes;
pub mod posts;
pub mod profile;
pub mod requests;
pub mod search;

use anyhow::Result;
use backend_api::{BackendError, Document};
use serde::de::DeserializeOwned;

pub use admin::AdminRepository;
pub use auth::{AuthRepository, SignUp};
pub use chat::{chat_id, ChatRepository};
pub use comments::CommentsRepository;
pub use likes::{LikeOutcome, LikesRepository};
pub use posts::{FeedPage, NewPost, PostsRepository};
pub use profile::{ProfileRepository, ProfileUpdate};
pub use requests::{NewRequest, RequestsRepository};
pub use search::SearchRepository;

pub(crate) fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> Result<Vec<T>> {
    docs.iter()
        .map(|d| d.decode::<T>().map_err(anyhow::Error::from))
        .collect()
}

pub(crate) fn forbidden() -> anyhow::Error {
    anyhow::anyhow!("forbidden")
}

/// Translate backend refusals the user can act on into error codes.
pub(crate) fn backend_code(err: BackendError) -> anyhow::Error {
    match err {
        BackendError::InvalidCredentials => anyhow::anyhow!("invalid_credentials"),
        BackendError::Unauthenticated => anyhow::anyhow!("not_signed_in"),
        BackendError::AlreadyExists(code)
        | BackendError::InvalidArgument(code)
        | BackendError::PermissionDenied(code) => anyhow::anyhow!(code),
        BackendError::NotFound { .. } => anyhow::anyhow!("not_found"),
        other => other.into(),
    }
}
