use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

use crate::error::{AppError, Result};
use crate::twitter::types::{media_mime_type, UserTweetsKind};

pub const MAX_COUNT: u32 = 100;
pub const POLL_MIN_CHOICES: usize = 2;
pub const POLL_MAX_CHOICES: usize = 4;
pub const POLL_MIN_MINUTES: u32 = 5;
pub const POLL_MAX_MINUTES: u32 = 10_080;
pub const MAX_TWEET_MEDIA: usize = 4;

pub const TOOL_NAMES: [&str; 20] = [
    "search_twitter",
    "get_user_tweets",
    "get_timeline",
    "get_latest_timeline",
    "search_users",
    "get_user_info",
    "follow_user",
    "unfollow_user",
    "get_dm_history",
    "get_tweet_info",
    "favorite_tweet",
    "unfavorite_tweet",
    "retweet_tweet",
    "delete_retweet",
    "post_poll_tweet",
    "get_trends",
    "post_tweet",
    "delete_tweet",
    "send_dm",
    "delete_dm",
];

/// A decoded tool invocation. The wire form is `{"tool": ..., "args": {...}}`.
/// Unknown argument names are rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case", deny_unknown_fields)]
pub enum ToolCall {
    SearchTwitter {
        query: String,
        #[serde(default = "default_sort")]
        sort_by: String,
        #[serde(default = "default_count")]
        count: u32,
    },
    GetUserTweets {
        username: String,
        #[serde(default)]
        tweet_type: UserTweetsKind,
        #[serde(default = "default_count")]
        count: u32,
    },
    GetTimeline {
        #[serde(default = "default_count")]
        count: u32,
    },
    GetLatestTimeline {
        #[serde(default = "default_count")]
        count: u32,
    },
    SearchUsers {
        query: String,
        #[serde(default = "default_user_count")]
        count: u32,
    },
    GetUserInfo {
        username: String,
    },
    FollowUser {
        username: String,
    },
    UnfollowUser {
        username: String,
    },
    GetDmHistory {
        username: String,
        #[serde(default = "default_count")]
        count: u32,
    },
    GetTweetInfo {
        tweet_id: String,
    },
    FavoriteTweet {
        tweet_id: String,
    },
    UnfavoriteTweet {
        tweet_id: String,
    },
    RetweetTweet {
        tweet_id: String,
    },
    DeleteRetweet {
        tweet_id: String,
    },
    PostPollTweet {
        text: String,
        choices: Vec<String>,
        #[serde(default = "default_poll_minutes")]
        duration_minutes: u32,
        #[serde(default)]
        reply_to: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    GetTrends {
        #[serde(default = "default_woeid")]
        woeid: u32,
    },
    PostTweet {
        text: String,
        #[serde(default)]
        media_paths: Vec<String>,
        #[serde(default)]
        reply_to: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    DeleteTweet {
        tweet_id: String,
    },
    SendDm {
        username: String,
        message: String,
        #[serde(default)]
        media_path: Option<String>,
    },
    DeleteDm {
        message_id: String,
    },
}

fn default_sort() -> String {
    "Latest".to_string()
}

fn default_count() -> u32 {
    20
}

fn default_user_count() -> u32 {
    10
}

fn default_poll_minutes() -> u32 {
    1440
}

fn default_woeid() -> u32 {
    1
}

impl ToolCall {
    /// Decodes `args` for the named tool. Missing `args` is treated as `{}`.
    pub fn parse(tool: &str, args: Value) -> Result<Self> {
        if !TOOL_NAMES.contains(&tool) {
            return Err(AppError::InvalidArgument(format!("Unknown tool '{}'", tool)));
        }

        let args = if args.is_null() { json!({}) } else { args };
        serde_json::from_value(json!({ "tool": tool, "args": args })).map_err(|e| {
            AppError::InvalidArgument(format!("Invalid arguments for '{}': {}", tool, e))
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SearchTwitter { .. } => "search_twitter",
            ToolCall::GetUserTweets { .. } => "get_user_tweets",
            ToolCall::GetTimeline { .. } => "get_timeline",
            ToolCall::GetLatestTimeline { .. } => "get_latest_timeline",
            ToolCall::SearchUsers { .. } => "search_users",
            ToolCall::GetUserInfo { .. } => "get_user_info",
            ToolCall::FollowUser { .. } => "follow_user",
            ToolCall::UnfollowUser { .. } => "unfollow_user",
            ToolCall::GetDmHistory { .. } => "get_dm_history",
            ToolCall::GetTweetInfo { .. } => "get_tweet_info",
            ToolCall::FavoriteTweet { .. } => "favorite_tweet",
            ToolCall::UnfavoriteTweet { .. } => "unfavorite_tweet",
            ToolCall::RetweetTweet { .. } => "retweet_tweet",
            ToolCall::DeleteRetweet { .. } => "delete_retweet",
            ToolCall::PostPollTweet { .. } => "post_poll_tweet",
            ToolCall::GetTrends { .. } => "get_trends",
            ToolCall::PostTweet { .. } => "post_tweet",
            ToolCall::DeleteTweet { .. } => "delete_tweet",
            ToolCall::SendDm { .. } => "send_dm",
            ToolCall::DeleteDm { .. } => "delete_dm",
        }
    }

    /// The endpoint class whose quota this tool consumes.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ToolCall::SearchTwitter { .. } | ToolCall::GetTweetInfo { .. } => "search_tweet",
            ToolCall::GetUserTweets { .. } => "user_tweets",
            ToolCall::GetTimeline { .. } | ToolCall::GetLatestTimeline { .. } => "home_timeline",
            ToolCall::SearchUsers { .. } => "user_search",
            ToolCall::GetUserInfo { .. } => "user_lookup",
            ToolCall::FollowUser { .. } => "follow",
            ToolCall::UnfollowUser { .. } => "unfollow",
            ToolCall::GetDmHistory { .. } => "dm_read",
            ToolCall::FavoriteTweet { .. } => "favorite",
            ToolCall::UnfavoriteTweet { .. } => "unfavorite",
            ToolCall::RetweetTweet { .. } => "retweet",
            ToolCall::DeleteRetweet { .. } => "delete_retweet",
            ToolCall::PostPollTweet { .. } | ToolCall::PostTweet { .. } => "tweet",
            ToolCall::GetTrends { .. } => "trends",
            ToolCall::DeleteTweet { .. } => "delete_tweet",
            ToolCall::SendDm { .. } | ToolCall::DeleteDm { .. } => "dm_write",
        }
    }

    /// Local files to upload before the call itself.
    pub fn media_paths(&self) -> &[String] {
        match self {
            ToolCall::PostTweet { media_paths, .. } => media_paths,
            ToolCall::SendDm { media_path: Some(path), .. } => std::slice::from_ref(path),
            _ => &[],
        }
    }

    /// Checks and normalizes arguments. Runs before admission so a bad
    /// request never consumes quota.
    pub fn validate(self) -> Result<Self> {
        use ToolCall::*;

        let call = match self {
            SearchTwitter { query, sort_by, count } => SearchTwitter {
                query: required("query", query)?,
                sort_by,
                count: clamp_count(count),
            },
            GetUserTweets { username, tweet_type, count } => GetUserTweets {
                username: username_arg(username)?,
                tweet_type,
                count: clamp_count(count),
            },
            GetTimeline { count } => GetTimeline { count: clamp_count(count) },
            GetLatestTimeline { count } => GetLatestTimeline { count: clamp_count(count) },
            SearchUsers { query, count } => SearchUsers {
                query: required("query", query)?,
                count: clamp_count(count),
            },
            GetUserInfo { username } => GetUserInfo { username: username_arg(username)? },
            FollowUser { username } => FollowUser { username: username_arg(username)? },
            UnfollowUser { username } => UnfollowUser { username: username_arg(username)? },
            GetDmHistory { username, count } => GetDmHistory {
                username: username_arg(username)?,
                count: clamp_count(count),
            },
            GetTweetInfo { tweet_id } => GetTweetInfo { tweet_id: id_arg("tweet_id", tweet_id)? },
            FavoriteTweet { tweet_id } => FavoriteTweet { tweet_id: id_arg("tweet_id", tweet_id)? },
            UnfavoriteTweet { tweet_id } => UnfavoriteTweet {
                tweet_id: id_arg("tweet_id", tweet_id)?,
            },
            RetweetTweet { tweet_id } => RetweetTweet { tweet_id: id_arg("tweet_id", tweet_id)? },
            DeleteRetweet { tweet_id } => DeleteRetweet { tweet_id: id_arg("tweet_id", tweet_id)? },
            PostPollTweet { text, choices, duration_minutes, reply_to, tags } => {
                let choices: Vec<String> =
                    choices.into_iter().map(|c| c.trim().to_string()).collect();
                if !(POLL_MIN_CHOICES..=POLL_MAX_CHOICES).contains(&choices.len()) {
                    return Err(AppError::InvalidArgument(format!(
                        "A poll needs between {} and {} choices",
                        POLL_MIN_CHOICES, POLL_MAX_CHOICES
                    )));
                }
                if choices.iter().any(String::is_empty) {
                    return Err(AppError::InvalidArgument("Poll choices must not be empty".into()));
                }
                if !(POLL_MIN_MINUTES..=POLL_MAX_MINUTES).contains(&duration_minutes) {
                    return Err(AppError::InvalidArgument(format!(
                        "Poll duration must be between {} and {} minutes",
                        POLL_MIN_MINUTES, POLL_MAX_MINUTES
                    )));
                }
                PostPollTweet {
                    text: required("text", text)?,
                    choices,
                    duration_minutes,
                    reply_to: reply_to.map(|id| id_arg("reply_to", id)).transpose()?,
                    tags,
                }
            }
            GetTrends { woeid } => GetTrends { woeid },
            PostTweet { text, media_paths, reply_to, tags } => {
                if media_paths.len() > MAX_TWEET_MEDIA {
                    return Err(AppError::InvalidArgument(format!(
                        "A tweet can carry at most {} media files",
                        MAX_TWEET_MEDIA
                    )));
                }
                PostTweet {
                    text: required("text", text)?,
                    media_paths: media_paths
                        .into_iter()
                        .map(media_arg)
                        .collect::<Result<_>>()?,
                    reply_to: reply_to.map(|id| id_arg("reply_to", id)).transpose()?,
                    tags,
                }
            }
            DeleteTweet { tweet_id } => DeleteTweet { tweet_id: id_arg("tweet_id", tweet_id)? },
            SendDm { username, message, media_path } => SendDm {
                username: username_arg(username)?,
                message: required("message", message)?,
                media_path: media_path.map(media_arg).transpose()?,
            },
            DeleteDm { message_id } => DeleteDm { message_id: id_arg("message_id", message_id)? },
        };

        Ok(call)
    }
}

/// Appends `tags` as `@mentions` on a new line.
pub fn with_mentions(text: &str, tags: &[String]) -> String {
    let mentions: Vec<String> = tags
        .iter()
        .map(|tag| tag.trim().trim_start_matches('@'))
        .filter(|tag| !tag.is_empty())
        .map(|tag| format!("@{}", tag))
        .collect();

    if mentions.is_empty() {
        text.to_string()
    } else {
        format!("{}\n{}", text, mentions.join(" "))
    }
}

fn clamp_count(count: u32) -> u32 {
    count.clamp(1, MAX_COUNT)
}

fn required(field: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidArgument(format!("'{}' must not be empty", field)));
    }
    Ok(value)
}

fn username_arg(username: String) -> Result<String> {
    let username = username.trim().trim_start_matches('@').to_string();
    if username.is_empty() {
        return Err(AppError::InvalidArgument("'username' must not be empty".into()));
    }
    Ok(username)
}

/// An existing image file of a supported type.
fn media_arg(path: String) -> Result<String> {
    let path = path.trim().to_string();
    if !Path::new(&path).is_file() {
        return Err(AppError::InvalidArgument(format!("Media file not found: {}", path)));
    }
    if media_mime_type(Path::new(&path)).is_none() {
        return Err(AppError::InvalidArgument(format!(
            "Unsupported media file: {} (png, jpeg, gif or webp)",
            path
        )));
    }
    Ok(path)
}

fn id_arg(field: &str, id: String) -> Result<String> {
    let id = id.trim().to_string();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidArgument(format!(
            "'{}' must be a numeric id, got '{}'",
            field, id
        )));
    }
    Ok(id)
}
