// Endpoint helpers for the demo backends: the placeholder posts API and
// the GitHub users listing used by the infinite-scroll query.

use super::client::RestClient;
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{Value, json};

pub const POSTS_BASE_URL: &str = "https://jsonplaceholder.typicode.com";
pub const USERS_BASE_URL: &str = "https://api.github.com";

/// Page size shared by the posts pagination and the users cursor.
pub const PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Post {
    #[serde(rename = "userId")]
    pub user_id: u64,
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Fetch one page of posts. Pages are 1-based; offsets follow the
/// `_start`/`_limit` convention of the placeholder API.
pub async fn fetch_posts_page(client: &RestClient, page: u32) -> Result<Value> {
    let start = (page.saturating_sub(1)) * PAGE_SIZE;
    client
        .get_json_with_params("/posts", &[("_start", start), ("_limit", PAGE_SIZE)])
        .await
}

pub async fn fetch_post(client: &RestClient, id: u64) -> Result<Value> {
    client.get_json(&format!("/posts/{id}")).await
}

pub async fn delete_post(client: &RestClient, id: u64) -> Result<Value> {
    client.delete_json(&format!("/posts/{id}")).await
}

/// Patch the post's title; returns the updated fields from the server.
pub async fn update_post(client: &RestClient, id: u64, title: &str) -> Result<Value> {
    client
        .patch_json(&format!("/posts/{id}"), &json!({ "title": title }))
        .await
}

/// Fetch one page of GitHub users for the infinite-scroll query.
pub async fn fetch_users_page(client: &RestClient, page: u64) -> Result<Value> {
    client
        .get_json_with_params("/users", &[("per_page", u64::from(PAGE_SIZE)), ("page", page)])
        .await
}

/// Decode a cached page of posts for display.
pub fn decode_posts(value: &Value) -> Result<Vec<Post>> {
    serde_json::from_value(value.clone())
        .map_err(|err| Error::Parse(format!("posts page has unexpected shape: {err}")))
}

pub fn decode_post(value: &Value) -> Result<Post> {
    serde_json::from_value(value.clone())
        .map_err(|err| Error::Parse(format!("post has unexpected shape: {err}")))
}
