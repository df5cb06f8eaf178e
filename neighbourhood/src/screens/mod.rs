//! Plain-text rendering of view-model state for the terminal front end.

pub mod cli;

use std::fmt::Write;

use time::OffsetDateTime;

use crate::model::{ChatThread, Post, PostType, Profile, ProviderStatus, ServiceRequest};
use crate::viewmodels::{
    AdminState, ChatListState, ChatState, FeedState, PostDetailState, RequestsState, SearchState,
};

/// `YYYY-MM-DD HH:MM` in UTC.
pub fn format_timestamp(ms: i64) -> String {
    match OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000) {
        Ok(t) => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}",
            t.year(),
            u8::from(t.month()),
            t.day(),
            t.hour(),
            t.minute()
        ),
        Err(_) => "-".into(),
    }
}

pub fn render_profile(profile: &Profile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} <{}> [{}]", profile.name, profile.email, profile.role.as_str());
    let _ = writeln!(out, "  id: {}", profile.uid);
    if !profile.neighbourhood.is_empty() {
        let _ = writeln!(out, "  neighbourhood: {}", profile.neighbourhood);
    }
    if let Some(service) = &profile.service_type {
        let status = match profile.provider_status {
            ProviderStatus::Approved => "approved",
            ProviderStatus::Pending => "pending approval",
            ProviderStatus::Rejected => "rejected",
            ProviderStatus::NotApplicable => "-",
        };
        let _ = writeln!(out, "  service: {} ({})", service, status);
    }
    if !profile.bio.is_empty() {
        let _ = writeln!(out, "  bio: {}", profile.bio);
    }
    if let Some(url) = &profile.photo_url {
        let _ = writeln!(out, "  photo: {}", url);
    }
    if profile.disabled {
        let _ = writeln!(out, "  (disabled)");
    }
    out
}

/// One post; `viewer` marks posts the viewer has liked.
pub fn render_post(post: &Post, viewer: Option<&str>) -> String {
    let mut out = String::new();
    let tag = match post.kind {
        PostType::Announcement => "[announcement] ",
        PostType::Post => "",
    };
    let _ = writeln!(
        out,
        "{}{} · {} · {}",
        tag,
        post.author_name,
        format_timestamp(post.created_at),
        post.id
    );
    let _ = writeln!(out, "  {}", post.content);
    if let Some(url) = &post.image_url {
        let _ = writeln!(out, "  image: {}", url);
    }
    let heart = match viewer {
        Some(uid) if post.is_liked_by(uid) => "♥",
        _ => "♡",
    };
    let _ = write!(out, "  {} {}  comments {}", heart, post.likes, post.comment_count);
    if !post.reported_by.is_empty() {
        let _ = write!(out, "  reports {}", post.reported_by.len());
    }
    if post.hidden {
        let _ = write!(out, "  (hidden)");
    }
    out.push('\n');
    out
}

pub fn render_feed(state: &FeedState, viewer: Option<&str>) -> String {
    if state.posts.is_empty() {
        return "No posts yet.\n".into();
    }
    let mut out = String::new();
    for post in &state.posts {
        out.push_str(&render_post(post, viewer));
        out.push('\n');
    }
    if state.end_reached {
        out.push_str("-- end of feed --\n");
    }
    out
}

pub fn render_post_detail(state: &PostDetailState, viewer: Option<&str>) -> String {
    let Some(post) = &state.post else {
        return "Post not found.\n".into();
    };
    let mut out = render_post(post, viewer);
    for comment in &state.comments {
        let _ = writeln!(
            out,
            "    {} ({}): {}  [{}]",
            comment.author_name,
            format_timestamp(comment.created_at),
            comment.text,
            comment.id
        );
    }
    out
}

fn thread_line(thread: &ChatThread, uid: &str) -> String {
    let other = thread
        .other_participant(uid)
        .map(|o| thread.name_of(o))
        .unwrap_or_default();
    let preview = thread
        .last_message
        .as_ref()
        .map(|m| m.text.as_str())
        .unwrap_or("");
    let unread = thread.unread_for(uid);
    let badge = if unread > 0 {
        format!(" ({} new)", unread)
    } else {
        String::new()
    };
    format!("{}{}: {}  [{}]", other, badge, preview, thread.id)
}

pub fn render_chat_list(state: &ChatListState, uid: &str) -> String {
    if state.threads.is_empty() {
        return "No conversations.\n".into();
    }
    let mut out = format!("Unread: {}\n", state.total_unread);
    for thread in &state.threads {
        out.push_str(&thread_line(thread, uid));
        out.push('\n');
    }
    out
}

/// Messages oldest first; own messages show read receipts.
pub fn render_chat(state: &ChatState, uid: &str) -> String {
    let mut out = String::new();
    for message in &state.messages {
        out.push_str(&render_message(state, message, uid));
    }
    if !state.typing_names.is_empty() {
        let _ = writeln!(out, "{} typing…", state.typing_names.join(", "));
    }
    out
}

pub fn render_message(state: &ChatState, message: &crate::model::ChatMessage, uid: &str) -> String {
    let time = format_timestamp(message.timestamp);
    if message.system {
        return format!("[{}] * {}\n", time, message.text);
    }
    let sender = state
        .thread
        .as_ref()
        .map(|t| t.name_of(&message.sender_id))
        .unwrap_or_else(|| message.sender_id.clone());
    let receipt = if message.sender_id != uid {
        ""
    } else if message.read_by.iter().any(|r| r != uid) {
        " ✓✓"
    } else if message.delivered_to.iter().any(|r| r != uid) {
        " ✓"
    } else {
        ""
    };
    format!("[{}] {}: {}{}\n", time, sender, message.text, receipt)
}

fn request_line(request: &ServiceRequest) -> String {
    format!(
        "{} · {} for {} by {} · {}  [{}]",
        request.status.as_str(),
        request.service_type,
        request.member_name,
        request.provider_name,
        request.description,
        request.id
    )
}

pub fn render_requests(state: &RequestsState) -> String {
    if state.requests.is_empty() {
        return "No service requests.\n".into();
    }
    state
        .requests
        .iter()
        .map(|r| request_line(r) + "\n")
        .collect()
}

fn provider_line(profile: &Profile) -> String {
    format!(
        "{} · {}  [{}]",
        profile.name,
        profile.service_type.as_deref().unwrap_or("-"),
        profile.uid
    )
}

pub fn render_providers(providers: &[Profile]) -> String {
    if providers.is_empty() {
        return "No providers found.\n".into();
    }
    providers.iter().map(|p| provider_line(p) + "\n").collect()
}

pub fn render_search(state: &SearchState, viewer: Option<&str>) -> String {
    let mut out = format!("Posts matching \"{}\":\n", state.query);
    if state.posts.is_empty() {
        out.push_str("  none\n");
    }
    for post in &state.posts {
        out.push_str(&render_post(post, viewer));
    }
    out.push_str("Providers:\n");
    out.push_str(&render_providers(&state.providers));
    out
}

pub fn render_admin(state: &AdminState) -> String {
    let mut out = String::from("Pending providers:\n");
    if state.pending_providers.is_empty() {
        out.push_str("  none\n");
    }
    for profile in &state.pending_providers {
        let _ = writeln!(out, "  {} <{}>", provider_line(profile), profile.email);
    }
    out.push_str("Reported posts:\n");
    if state.reported_posts.is_empty() {
        out.push_str("  none\n");
    }
    for post in &state.reported_posts {
        out.push_str(&render_post(post, None));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatMessage, RequestStatus};
    use std::collections::BTreeMap;

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00");
        assert_eq!(format_timestamp(1_700_000_000_000), "2023-11-14 22:13");
    }

    #[test]
    fn post_shows_like_state_and_flags() {
        let mut post = Post {
            id: "p1".into(),
            author_name: "Ana".into(),
            content: "Lost cat".into(),
            likes: 2,
            kind: PostType::Announcement,
            ..Default::default()
        };
        post.liked_by.insert("u1".into());
        post.reported_by.insert("u2".into());
        let text = render_post(&post, Some("u1"));
        assert!(text.starts_with("[announcement] Ana"));
        assert!(text.contains("♥ 2"));
        assert!(text.contains("reports 1"));
        assert!(render_post(&post, Some("u3")).contains("♡ 2"));
    }

    #[test]
    fn own_messages_show_receipts() {
        let mut names = BTreeMap::new();
        names.insert("a".to_string(), "Ana".to_string());
        names.insert("b".to_string(), "Bo".to_string());
        let state = ChatState {
            thread: Some(ChatThread {
                id: "a_b".into(),
                participants: vec!["a".into(), "b".into()],
                participant_names: names,
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut message = ChatMessage {
            sender_id: "a".into(),
            text: "hi".into(),
            ..Default::default()
        };
        message.read_by.insert("a".into());
        assert!(render_message(&state, &message, "a").ends_with("Ana: hi\n"));
        message.delivered_to.insert("b".into());
        assert!(render_message(&state, &message, "a").ends_with("✓\n"));
        message.read_by.insert("b".into());
        assert!(render_message(&state, &message, "a").ends_with("✓✓\n"));
        assert!(render_message(&state, &message, "b").ends_with("Ana: hi\n"));
    }

    #[test]
    fn empty_states_have_placeholders() {
        assert_eq!(render_feed(&FeedState::default(), None), "No posts yet.\n");
        assert_eq!(render_requests(&RequestsState::default()), "No service requests.\n");
        let state = RequestsState {
            requests: vec![ServiceRequest {
                id: "r1".into(),
                status: RequestStatus::Accepted,
                service_type: "plumbing".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(render_requests(&state).starts_with("accepted · plumbing"));
    }
}
