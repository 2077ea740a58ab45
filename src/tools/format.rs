//! Markdown rendering of remote results.

use chrono::{DateTime, Utc};

use crate::twitter::types::{DmEvent, Poll, Trend, Tweet, User};

const SEPARATOR: &str = "\n---\n";

pub fn tweets_markdown(tweets: &[Tweet]) -> String {
    if tweets.is_empty() {
        return "No tweets found.".to_string();
    }
    tweets.iter().map(tweet_markdown).collect::<Vec<_>>().join(SEPARATOR)
}

pub fn tweet_markdown(tweet: &Tweet) -> String {
    let mut lines = Vec::new();

    let (heading, link) = match &tweet.author {
        Some(user) => (
            format!("**@{}** ({})", user.username, user.name),
            format!("https://twitter.com/{}/status/{}", user.username, tweet.id),
        ),
        None => (
            "Unknown user".to_string(),
            format!("https://twitter.com/i/web/status/{}", tweet.id),
        ),
    };
    lines.push(format!("### {}", heading));
    lines.push(format!("[{}]({}) | ID: `{}`", timestamp(tweet.created_at), link, tweet.id));
    lines.push(String::new());
    lines.push(tweet.text.clone());

    if let Some(quoted) = &tweet.quoted {
        let author = quoted
            .author
            .as_ref()
            .map(|u| format!("@{}", u.username))
            .unwrap_or_else(|| "unknown".to_string());
        lines.push(String::new());
        lines.push(format!("> Quoting **{}**:", author));
        lines.extend(quoted.text.lines().map(|line| format!("> {}", line)));
    }

    if let Some(poll) = &tweet.poll {
        lines.push(String::new());
        lines.extend(poll_lines(poll));
    }

    if let Some(metrics) = &tweet.public_metrics {
        let mut stats = vec![
            format!("Replies: {}", metrics.reply_count),
            format!("Retweets: {}", metrics.retweet_count),
            format!("Likes: {}", metrics.like_count),
            format!("Quotes: {}", metrics.quote_count),
        ];
        if let Some(bookmarks) = metrics.bookmark_count {
            stats.push(format!("Bookmarks: {}", bookmarks));
        }
        if let Some(views) = metrics.impression_count {
            stats.push(format!("Views: {}", views));
        }
        lines.push(String::new());
        lines.push(format!("*Stats: {}*", stats.join(" | ")));
    }

    lines.join("\n")
}

fn poll_lines(poll: &Poll) -> Vec<String> {
    let mut options = poll.options.clone();
    options.sort_by_key(|o| o.position);

    let mut lines = vec!["**Poll:**".to_string()];
    lines.extend(
        options
            .iter()
            .map(|o| format!("- {} ({} votes)", o.label, o.votes)),
    );
    lines.push(format!(
        "Status: {} | Ends: {}",
        poll.voting_status.as_deref().unwrap_or("unknown"),
        timestamp(poll.end_datetime)
    ));
    lines
}

pub fn users_markdown(users: &[User]) -> String {
    if users.is_empty() {
        return "No users found.".to_string();
    }
    users.iter().map(user_markdown).collect::<Vec<_>>().join(SEPARATOR)
}

pub fn user_markdown(user: &User) -> String {
    let mut lines = vec![
        format!(
            "### {} ([@{}](https://twitter.com/{}))",
            user.name, user.username, user.username
        ),
        format!("ID: `{}`", user.id),
    ];

    if let Some(description) = user.description.as_deref().filter(|d| !d.is_empty()) {
        lines.push(format!("Bio: {}", description));
    }
    if let Some(location) = user.location.as_deref().filter(|l| !l.is_empty()) {
        lines.push(format!("Location: {}", location));
    }
    if let Some(url) = user.url.as_deref().filter(|u| !u.is_empty()) {
        lines.push(format!("Website: {}", url));
    }
    lines.push(format!("Joined: {}", timestamp(user.created_at)));
    if let Some(metrics) = &user.public_metrics {
        lines.push(format!(
            "Tweets: {} | Following: {} | Followers: {}",
            metrics.tweet_count, metrics.following_count, metrics.followers_count
        ));
    }
    lines.push(format!(
        "Verified: {}",
        if user.verified.unwrap_or(false) { "yes" } else { "no" }
    ));

    lines.join("\n")
}

/// `self_id` marks each message as sent or received when known.
pub fn dms_markdown(events: &[DmEvent], self_id: Option<&str>) -> String {
    let messages: Vec<&DmEvent> = events
        .iter()
        .filter(|e| e.event_type.as_deref().map_or(true, |t| t == "MessageCreate"))
        .collect();
    if messages.is_empty() {
        return "No direct messages found.".to_string();
    }

    messages
        .iter()
        .map(|event| {
            let sender = event.sender_id.as_deref().unwrap_or("unknown");
            let direction = match self_id {
                Some(me) if sender == me => " (sent)",
                Some(_) => " (received)",
                None => "",
            };
            [
                format!("**Message ID:** `{}`", event.id),
                format!("Time: {}", timestamp(event.created_at)),
                format!("Sender ID: `{}`{}", sender, direction),
                format!("Text: {}", event.text.as_deref().unwrap_or("")),
            ]
            .join("\n")
        })
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

pub fn trends_markdown(trends: &[Trend]) -> String {
    if trends.is_empty() {
        return "No trends found.".to_string();
    }

    trends
        .iter()
        .map(|trend| match trend.tweet_count {
            Some(count) => format!(
                "- **{}** ({} tweets)",
                trend.trend_name,
                group_thousands(count)
            ),
            None => format!("- **{}**", trend.trend_name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown time".to_string())
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
