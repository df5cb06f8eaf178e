use std::sync::Arc;

use anyhow::Result;
use backend_api::{Direction, DocumentStore, Filter, Query};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Post, Profile, Role, POSTS, USERS};

use super::decode_all;

/// How many of the newest posts a search looks through.
pub const SEARCH_WINDOW: usize = 200;

static TERM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

/// Lowercased word terms of a search string.
pub fn terms(input: &str) -> Vec<String> {
    TERM.find_iter(input)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn matches_all(terms: &[String], haystacks: &[&str]) -> bool {
    let text = haystacks.join(" ").to_lowercase();
    terms.iter().all(|t| text.contains(t.as_str()))
}

/// Client-side search over recent documents.
#[derive(Clone)]
pub struct SearchRepository {
    store: Arc<dyn DocumentStore>,
}

impl SearchRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Visible posts whose content or author name contains every term.
    pub fn posts(&self, input: &str) -> Result<Vec<Post>> {
        let terms = terms(input);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.store.query(
            &Query::collection(POSTS)
                .filter(Filter::eq("hidden", false))
                .order_by("createdAt", Direction::Descending)
                .limit(SEARCH_WINDOW),
        )?;
        let posts: Vec<Post> = decode_all(&docs)?;
        Ok(posts
            .into_iter()
            .filter(|p| matches_all(&terms, &[&p.content, &p.author_name]))
            .collect())
    }

    /// Approved providers whose name or service type contains every term.
    pub fn providers(&self, input: &str) -> Result<Vec<Profile>> {
        let terms = terms(input);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.store.query(
            &Query::collection(USERS)
                .filter(Filter::eq("role", Role::ServiceProvider.as_str()))
                .filter(Filter::eq("providerStatus", "approved"))
                .order_by("name", Direction::Ascending),
        )?;
        let providers: Vec<Profile> = decode_all(&docs)?;
        Ok(providers
            .into_iter()
            .filter(|p| !p.disabled)
            .filter(|p| {
                let service = p.service_type.as_deref().unwrap_or_default();
                matches_all(&terms, &[&p.name, service])
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::NewPost;
    use crate::testing;

    #[test]
    fn splits_terms() {
        assert_eq!(terms("  Lost CAT, near-park! "), ["lost", "cat", "near", "park"]);
        assert!(terms(" ?! ").is_empty());
    }

    #[test]
    fn post_search_needs_every_term() {
        let env = testing::env();
        env.member("Ana");
        let posts = env.app.posts();
        for text in ["Lost cat near the park", "Found a cat", "Park cleanup Saturday"] {
            posts
                .create(NewPost {
                    content: text.into(),
                    ..Default::default()
                })
                .unwrap();
        }
        let search = env.app.search();
        let hits: Vec<_> = search
            .posts("cat park")
            .unwrap()
            .into_iter()
            .map(|p| p.content)
            .collect();
        assert_eq!(hits, ["Lost cat near the park"]);
        assert_eq!(search.posts("ana").unwrap().len(), 3);
        assert!(search.posts("").unwrap().is_empty());
    }

    #[test]
    fn provider_search_by_service() {
        let env = testing::env();
        env.provider("Bo Pipes", "plumbing");
        env.provider("Al Green", "gardening");
        let found = env.app.search().providers("PLUMB").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Bo Pipes");
    }
}
