//! View-models hold observable UI state and turn user intents into repository calls.
//! Failures become an `error` string in state; nothing is retried.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod chat_list;
pub mod feed;
pub mod post_detail;
pub mod profile;
pub mod requests;
pub mod search;
pub mod state;

pub use admin::{AdminState, AdminViewModel};
pub use auth::{AuthState, AuthViewModel};
pub use chat::{ChatState, ChatViewModel};
pub use chat_list::{ChatListState, ChatListViewModel};
pub use feed::{FeedState, FeedViewModel};
pub use post_detail::{PostDetailState, PostDetailViewModel};
pub use profile::{ProfileState, ProfileViewModel};
pub use requests::{RequestsState, RequestsViewModel};
pub use search::{SearchState, SearchViewModel};
pub use state::{ListenerHandle, StateHolder};
