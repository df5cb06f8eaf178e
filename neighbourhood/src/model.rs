use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub const USERS: &str = "users";
pub const POSTS: &str = "posts";
pub const CHATS: &str = "chats";
pub const SERVICE_REQUESTS: &str = "service_requests";

pub fn comments_collection(post_id: &str) -> String {
    format!("{POSTS}/{post_id}/comments")
}

pub fn messages_collection(chat_id: &str) -> String {
    format!("{CHATS}/{chat_id}/messages")
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    ServiceProvider,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::ServiceProvider => "service_provider",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "service_provider" | "provider" => Ok(Role::ServiceProvider),
            "admin" => Ok(Role::Admin),
            _ => anyhow::bail!("unknown_role"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    NotApplicable,
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(rename = "id", default)]
    pub uid: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub neighbourhood: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub provider_status: ProviderStatus,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub created_at: i64,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_approved_provider(&self) -> bool {
        self.role == Role::ServiceProvider && self.provider_status == ProviderStatus::Approved
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    #[default]
    Post,
    Announcement,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default)]
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub liked_by: BTreeSet<String>,
    #[serde(default)]
    pub comment_count: i64,
    pub created_at: i64,
    #[serde(rename = "type", default)]
    pub kind: PostType,
    #[serde(default)]
    pub neighbourhood: String,
    #[serde(default)]
    pub reported_by: BTreeSet<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl Post {
    pub fn is_liked_by(&self, uid: &str) -> bool {
        self.liked_by.contains(uid)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    #[serde(default)]
    pub id: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub participant_names: BTreeMap<String, String>,
    #[serde(default)]
    pub unread_count: BTreeMap<String, i64>,
    #[serde(default)]
    pub typing_users: BTreeSet<String>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl ChatThread {
    pub fn unread_for(&self, uid: &str) -> i64 {
        self.unread_count.get(uid).copied().unwrap_or(0)
    }

    /// The first participant that is not `uid`.
    pub fn other_participant(&self, uid: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != uid)
    }

    pub fn name_of(&self, uid: &str) -> String {
        self.participant_names
            .get(uid)
            .cloned()
            .unwrap_or_else(|| uid.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub read_by: BTreeSet<String>,
    #[serde(default)]
    pub delivered_to: BTreeSet<String>,
    #[serde(default)]
    pub system: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "in_progress" => Ok(RequestStatus::InProgress),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            _ => anyhow::bail!("unknown_status"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    #[serde(default)]
    pub id: String,
    pub member_id: String,
    pub member_name: String,
    pub provider_id: String,
    pub provider_name: String,
    pub service_type: String,
    pub description: String,
    #[serde(default)]
    pub status: RequestStatus,
    pub created_at: i64,
    pub updated_at: i64,
}
