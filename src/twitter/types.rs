//! Twitter API v2 wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Standard v2 response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default = "Option::default")]
    pub data: Option<T>,

    #[serde(default)]
    pub includes: Option<Includes>,

    #[serde(default)]
    pub meta: Option<ResponseMeta>,

    #[serde(default)]
    pub errors: Option<Vec<ApiErrorDetail>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<User>,

    #[serde(default)]
    pub tweets: Vec<Tweet>,

    #[serde(default)]
    pub polls: Vec<Poll>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMeta {
    #[serde(default)]
    pub result_count: Option<u32>,

    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub detail: Option<String>,
}

impl ApiErrorDetail {
    pub fn message(&self) -> String {
        self.detail
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tweet {
    pub id: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub author_id: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub public_metrics: Option<TweetPublicMetrics>,

    #[serde(default)]
    pub referenced_tweets: Option<Vec<ReferencedTweet>>,

    #[serde(default)]
    pub attachments: Option<Attachments>,

    /// Resolved from `includes.users`.
    #[serde(skip)]
    pub author: Option<User>,

    /// Resolved from `includes.tweets` when this tweet quotes another.
    #[serde(skip)]
    pub quoted: Option<Box<Tweet>>,

    /// Resolved from `includes.polls`.
    #[serde(skip)]
    pub poll: Option<Poll>,
}

impl Tweet {
    pub fn quoted_id(&self) -> Option<&str> {
        self.referenced_tweets
            .as_deref()?
            .iter()
            .find(|r| r.ref_type == "quoted")
            .map(|r| r.id.as_str())
    }

    pub fn has_media(&self) -> bool {
        self.attachments
            .as_ref()
            .and_then(|a| a.media_keys.as_deref())
            .is_some_and(|keys| !keys.is_empty())
    }

    pub fn poll_id(&self) -> Option<&str> {
        self.attachments
            .as_ref()?
            .poll_ids
            .as_deref()?
            .first()
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferencedTweet {
    #[serde(rename = "type")]
    pub ref_type: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Attachments {
    #[serde(default)]
    pub poll_ids: Option<Vec<String>>,

    #[serde(default)]
    pub media_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TweetPublicMetrics {
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub quote_count: u64,
    #[serde(default)]
    pub bookmark_count: Option<u64>,
    #[serde(default)]
    pub impression_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Poll {
    pub id: String,

    #[serde(default)]
    pub options: Vec<PollOption>,

    #[serde(default)]
    pub voting_status: Option<String>,

    #[serde(default)]
    pub end_datetime: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollOption {
    #[serde(default)]
    pub position: u32,
    pub label: String,
    #[serde(default)]
    pub votes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub username: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub verified: Option<bool>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub public_metrics: Option<UserPublicMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPublicMetrics {
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub tweet_count: u64,
    #[serde(default)]
    pub listed_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DmEvent {
    pub id: String,

    #[serde(default)]
    pub event_type: Option<String>,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub sender_id: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub dm_conversation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DmSent {
    pub dm_conversation_id: String,
    pub dm_event_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trend {
    pub trend_name: String,

    #[serde(default)]
    pub tweet_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedTweet {
    pub id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateTweetRequest {
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyTo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollRequest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<TweetMedia>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TweetMedia {
    pub media_ids: Vec<String>,
}

/// `data` of a media upload.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedMedia {
    pub id: String,

    #[serde(default)]
    pub media_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyTo {
    pub in_reply_to_tweet_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollRequest {
    pub options: Vec<String>,
    pub duration_minutes: u32,
}

/// Search product: ordering, or media-only results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Latest,
    Top,
    Media,
}

impl SortOrder {
    /// `"Top"` or `"Media"` (any case); everything else means latest.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("top") {
            SortOrder::Top
        } else if name.eq_ignore_ascii_case("media") {
            SortOrder::Media
        } else {
            SortOrder::Latest
        }
    }

    pub fn as_query_value(self) -> &'static str {
        match self {
            SortOrder::Latest | SortOrder::Media => "recency",
            SortOrder::Top => "relevancy",
        }
    }
}

/// Which part of a user's timeline to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum UserTweetsKind {
    #[default]
    Tweets,
    TweetsAndReplies,
    Media,
}

impl UserTweetsKind {
    /// Value for the timeline's `exclude` parameter.
    pub fn exclude(self) -> Option<&'static str> {
        match self {
            UserTweetsKind::Tweets | UserTweetsKind::Media => Some("replies"),
            UserTweetsKind::TweetsAndReplies => None,
        }
    }
}

/// Where an uploaded file is going to be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPurpose {
    Tweet,
    DirectMessage,
}

/// MIME type for the image formats the one-shot upload accepts.
pub fn media_mime_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub fn media_category(mime_type: &str, purpose: MediaPurpose) -> &'static str {
    match (purpose, mime_type == "image/gif") {
        (MediaPurpose::Tweet, false) => "tweet_image",
        (MediaPurpose::Tweet, true) => "tweet_gif",
        (MediaPurpose::DirectMessage, false) => "dm_image",
        (MediaPurpose::DirectMessage, true) => "dm_gif",
    }
}

/// Attach authors, quoted tweets and polls from `includes` to each tweet.
pub fn resolve_includes(mut tweets: Vec<Tweet>, includes: Option<&Includes>) -> Vec<Tweet> {
    let Some(includes) = includes else {
        return tweets;
    };

    let find_user = |id: &Option<String>| {
        id.as_ref()
            .and_then(|id| includes.users.iter().find(|u| &u.id == id).cloned())
    };

    for tweet in &mut tweets {
        tweet.author = find_user(&tweet.author_id);

        if let Some(quoted_id) = tweet.quoted_id() {
            if let Some(quoted) = includes.tweets.iter().find(|t| t.id == quoted_id) {
                let mut quoted = quoted.clone();
                quoted.author = find_user(&quoted.author_id);
                tweet.quoted = Some(Box::new(quoted));
            }
        }

        if let Some(poll_id) = tweet.poll_id() {
            tweet.poll = includes.polls.iter().find(|p| p.id == poll_id).cloned();
        }
    }

    tweets
}
