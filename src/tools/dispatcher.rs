use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::analytics::stats::Stats;
use crate::error::{AppError, GateError, Result};
use crate::tools::catalog::{with_mentions, ToolCall};
use crate::tools::format;
use crate::tools::protocol::{ToolRequest, ToolResponse};
use crate::twitter::types::{
    CreateTweetRequest, MediaPurpose, PollRequest, ReplyTo, SortOrder, TweetMedia,
};
use crate::twitter::SocialApi;
use crate::utils::time::{elapsed_ms, now_instant};

/// Endpoint class every media upload is counted against.
pub const UPLOAD_ENDPOINT: &str = "upload_media";

/// Runs tool calls against the remote API, each one gated by the
/// admission controller on the tool's endpoint class.
pub struct ToolDispatcher {
    controller: Arc<AdmissionController>,
    api: Arc<dyn SocialApi>,
    stats: Arc<Stats>,
}

impl ToolDispatcher {
    pub fn new(
        controller: Arc<AdmissionController>,
        api: Arc<dyn SocialApi>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            controller,
            api,
            stats,
        }
    }

    pub async fn dispatch(&self, request: ToolRequest) -> ToolResponse {
        self.stats.inc_requests_received();
        let start = now_instant();
        let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let call = match ToolCall::parse(&request.tool, request.args).and_then(ToolCall::validate)
        {
            Ok(call) => call,
            Err(e) => {
                warn!("Rejected request {} for '{}': {}", id, request.tool, e);
                self.stats.inc_invalid_requests();
                return ToolResponse::failure(id, request.tool, e.to_string());
            }
        };

        info!("Request {}: {} on '{}'", id, call.name(), call.endpoint());
        let result = match self.upload_media(&call).await {
            Ok(media_ids) => {
                self.controller
                    .execute_gated(call.endpoint(), self.job(&call, &media_ids))
                    .await
            }
            Err(e) => Err(e),
        };
        self.stats.update_request_latency(elapsed_ms(start));

        match result {
            Ok(content) => ToolResponse::success(id, call.name(), content),
            Err(e) => ToolResponse::failure(id, call.name(), e.to_string()),
        }
    }

    /// Uploads the call's media files, each one gated on `upload_media`.
    /// Nothing is uploaded when the call itself would be refused.
    async fn upload_media(
        &self,
        call: &ToolCall,
    ) -> std::result::Result<Vec<String>, GateError<AppError>> {
        let paths = call.media_paths();
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let reservation = self.controller.check_and_reserve(call.endpoint()).await;
        if !reservation.allowed {
            return Err(GateError::LocallyThrottled {
                endpoint: call.endpoint().to_string(),
                retry_after: reservation.retry_after,
            });
        }

        let purpose = match call {
            ToolCall::SendDm { .. } => MediaPurpose::DirectMessage,
            _ => MediaPurpose::Tweet,
        };

        let mut media_ids = Vec::with_capacity(paths.len());
        for path in paths {
            let media_id = self
                .controller
                .execute_gated(UPLOAD_ENDPOINT, self.api.upload_media(Path::new(path), purpose))
                .await?;
            info!("Uploaded {} as media {}", path, media_id);
            media_ids.push(media_id);
        }
        Ok(media_ids)
    }

    /// A missing user or tweet, or a refusal the API explains, is an answer
    /// rather than a failure: the remote was reached, so the call is
    /// counted like any other success.
    async fn job(&self, call: &ToolCall, media_ids: &[String]) -> Result<String> {
        match self.run(call, media_ids).await {
            Err(AppError::NotFound(detail)) => {
                info!("{} found nothing: {}", call.name(), detail);
                Ok(not_found_message(call, &detail))
            }
            Err(AppError::Api { status, message }) if status != 429 => {
                match refusal_message(call, &message) {
                    Some(answer) => {
                        info!("{} refused ({}): {}", call.name(), status, message);
                        Ok(answer)
                    }
                    None => Err(AppError::Api { status, message }),
                }
            }
            other => other,
        }
    }

    async fn run(&self, call: &ToolCall, media_ids: &[String]) -> Result<String> {
        let api = self.api.as_ref();

        match call {
            ToolCall::SearchTwitter {
                query,
                sort_by,
                count,
            } => {
                let tweets = api
                    .search_tweets(query, SortOrder::from_name(sort_by), *count)
                    .await?;
                Ok(format::tweets_markdown(&tweets))
            }
            ToolCall::GetUserTweets {
                username,
                tweet_type,
                count,
            } => {
                let user = api.user_by_username(username).await?;
                let tweets = api.user_tweets(&user.id, *tweet_type, *count).await?;
                Ok(format::tweets_markdown(&tweets))
            }
            ToolCall::GetTimeline { count } | ToolCall::GetLatestTimeline { count } => {
                let tweets = api.home_timeline(*count).await?;
                Ok(format::tweets_markdown(&tweets))
            }
            ToolCall::SearchUsers { query, count } => {
                let users = api.search_users(query, *count).await?;
                Ok(format::users_markdown(&users))
            }
            ToolCall::GetUserInfo { username } => {
                let user = api.user_by_username(username).await?;
                Ok(format::user_markdown(&user))
            }
            ToolCall::FollowUser { username } => {
                let user = api.user_by_username(username).await?;
                api.follow(&user.id).await?;
                Ok(format!("Followed @{}.", username))
            }
            ToolCall::UnfollowUser { username } => {
                let user = api.user_by_username(username).await?;
                api.unfollow(&user.id).await?;
                Ok(format!("Unfollowed @{}.", username))
            }
            ToolCall::GetDmHistory { username, count } => {
                let user = api.user_by_username(username).await?;
                let mut events = api.dm_events(&user.id, *count).await?;
                events.truncate(*count as usize);

                let self_id = match api.account_id().await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!("Could not resolve own user id: {}", e);
                        None
                    }
                };
                Ok(format::dms_markdown(&events, self_id.as_deref()))
            }
            ToolCall::GetTweetInfo { tweet_id } => {
                let tweet = api.tweet(tweet_id).await?;
                Ok(format::tweet_markdown(&tweet))
            }
            ToolCall::FavoriteTweet { tweet_id } => {
                api.like(tweet_id).await?;
                Ok(format!("Liked tweet {}.", tweet_id))
            }
            ToolCall::UnfavoriteTweet { tweet_id } => {
                api.unlike(tweet_id).await?;
                Ok(format!("Removed like from tweet {}.", tweet_id))
            }
            ToolCall::RetweetTweet { tweet_id } => {
                api.retweet(tweet_id).await?;
                Ok(format!("Retweeted tweet {}.", tweet_id))
            }
            ToolCall::DeleteRetweet { tweet_id } => {
                api.unretweet(tweet_id).await?;
                Ok(format!("Removed retweet of tweet {}.", tweet_id))
            }
            ToolCall::PostPollTweet {
                text,
                choices,
                duration_minutes,
                reply_to,
                tags,
            } => {
                let request = CreateTweetRequest {
                    text: with_mentions(text, tags),
                    reply: reply_to.clone().map(|id| ReplyTo {
                        in_reply_to_tweet_id: id,
                    }),
                    poll: Some(PollRequest {
                        options: choices.clone(),
                        duration_minutes: *duration_minutes,
                    }),
                    media: None,
                };
                let created = api.create_tweet(&request).await?;
                Ok(format!("Posted poll tweet: {}", created.id))
            }
            ToolCall::GetTrends { woeid } => {
                let trends = api.trends(*woeid).await?;
                Ok(format::trends_markdown(&trends))
            }
            ToolCall::PostTweet {
                text,
                reply_to,
                tags,
                ..
            } => {
                let request = CreateTweetRequest {
                    text: with_mentions(text, tags),
                    reply: reply_to.clone().map(|id| ReplyTo {
                        in_reply_to_tweet_id: id,
                    }),
                    poll: None,
                    media: (!media_ids.is_empty()).then(|| TweetMedia {
                        media_ids: media_ids.to_vec(),
                    }),
                };
                let created = api.create_tweet(&request).await?;
                Ok(format!("Posted tweet: {}", created.id))
            }
            ToolCall::DeleteTweet { tweet_id } => {
                api.delete_tweet(tweet_id).await?;
                Ok(format!("Deleted tweet {}.", tweet_id))
            }
            ToolCall::SendDm {
                username, message, ..
            } => {
                let user = api.user_by_username(username).await?;
                api.send_dm(&user.id, message, media_ids.first().map(String::as_str))
                    .await?;
                Ok(format!(
                    "Sent a direct message to @{} (ID: {}).",
                    username, user.id
                ))
            }
            ToolCall::DeleteDm { message_id } => {
                api.delete_dm(message_id).await?;
                Ok(format!("Deleted direct message {}.", message_id))
            }
        }
    }
}

fn not_found_message(call: &ToolCall, detail: &str) -> String {
    match call {
        ToolCall::GetUserTweets { username, .. }
        | ToolCall::GetUserInfo { username }
        | ToolCall::FollowUser { username }
        | ToolCall::UnfollowUser { username }
        | ToolCall::GetDmHistory { username, .. }
        | ToolCall::SendDm { username, .. } => format!("User @{} was not found.", username),
        ToolCall::GetTweetInfo { tweet_id }
        | ToolCall::FavoriteTweet { tweet_id }
        | ToolCall::UnfavoriteTweet { tweet_id }
        | ToolCall::RetweetTweet { tweet_id }
        | ToolCall::DeleteRetweet { tweet_id }
        | ToolCall::DeleteTweet { tweet_id } => format!("Tweet {} was not found.", tweet_id),
        ToolCall::DeleteDm { message_id } => {
            format!(
                "Direct message {} was not found or cannot be deleted.",
                message_id
            )
        }
        _ => format!("Not found: {}", detail),
    }
}

/// Plain answers for refusals whose error detail says what went wrong.
fn refusal_message(call: &ToolCall, detail: &str) -> Option<String> {
    let detail = detail.to_lowercase();
    let says = |needle: &str| detail.contains(needle);

    let answer = match call {
        ToolCall::FollowUser { username } if says("already follow") => {
            format!("Already following @{}.", username)
        }
        ToolCall::FollowUser { username } if says("blocked") => {
            format!("Cannot follow @{}: you have been blocked.", username)
        }
        ToolCall::FollowUser { username } if says("suspended") => {
            format!("Cannot follow @{}: the account is suspended.", username)
        }
        ToolCall::UnfollowUser { username } if says("not following") => {
            format!("You are not following @{}.", username)
        }
        ToolCall::FavoriteTweet { tweet_id }
            if says("already favorited") || says("already liked") =>
        {
            format!("Tweet {} is already liked.", tweet_id)
        }
        ToolCall::UnfavoriteTweet { tweet_id } if says("not favorited") || says("not liked") => {
            format!("Tweet {} is not liked.", tweet_id)
        }
        ToolCall::RetweetTweet { tweet_id } if says("already retweeted") => {
            format!("Tweet {} is already retweeted.", tweet_id)
        }
        ToolCall::DeleteRetweet { tweet_id } if says("not retweeted") => {
            format!("Tweet {} is not retweeted.", tweet_id)
        }
        ToolCall::PostTweet { .. } | ToolCall::PostPollTweet { .. } if says("duplicate") => {
            "Not posted: the text duplicates a recent tweet.".to_string()
        }
        ToolCall::SendDm { username, .. } if says("cannot send messages") => format!(
            "Cannot message @{}: they do not follow you or do not accept direct messages.",
            username
        ),
        ToolCall::SendDm { username, .. } if says("blocked") => {
            format!("Cannot message @{}: you have been blocked.", username)
        }
        ToolCall::GetDmHistory { username, .. } if says("permission") => format!(
            "Missing permission to read direct messages with @{}.",
            username
        ),
        _ => return None,
    };

    Some(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{CooldownRange, PolicyTable};
    use crate::twitter::types::{CreatedTweet, DmEvent, DmSent, Trend, Tweet, User, UserTweetsKind};
    use crate::utils::delay::{RecordingSleeper, Sleeper};
    use crate::utils::time::{Clock, ManualClock};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct MockApi {
        calls: Mutex<Vec<String>>,
        posted: Mutex<Vec<CreateTweetRequest>>,
        throttled: AtomicBool,
        fail_hard: AtomicBool,
        /// Error detail for a 403 answer to every call.
        refusal: Mutex<Option<String>>,
    }

    impl MockApi {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn refuse_with(&self, detail: &str) {
            *self.refusal.lock() = Some(detail.to_string());
        }

        fn hit(&self, name: &str) -> Result<()> {
            self.calls.lock().push(name.to_string());
            if self.throttled.load(Ordering::SeqCst) {
                return Err(AppError::RateLimited {
                    retry_after: Some(900),
                });
            }
            if self.fail_hard.load(Ordering::SeqCst) {
                return Err(AppError::Api {
                    status: 503,
                    message: "Service Unavailable".into(),
                });
            }
            if let Some(detail) = self.refusal.lock().clone() {
                return Err(AppError::Api {
                    status: 403,
                    message: detail,
                });
            }
            Ok(())
        }
    }

    fn user(id: &str, username: &str) -> User {
        serde_json::from_value(json!({"id": id, "name": username, "username": username})).unwrap()
    }

    fn tweet(id: &str) -> Tweet {
        serde_json::from_value(json!({"id": id, "text": format!("tweet {}", id)})).unwrap()
    }

    #[async_trait]
    impl SocialApi for MockApi {
        async fn account_id(&self) -> Result<String> {
            Ok("42".to_string())
        }

        async fn search_tweets(
            &self,
            query: &str,
            _order: SortOrder,
            count: u32,
        ) -> Result<Vec<Tweet>> {
            self.hit(&format!("search_tweets:{}:{}", query, count))?;
            Ok((0..count.min(3)).map(|i| tweet(&i.to_string())).collect())
        }

        async fn user_by_username(&self, username: &str) -> Result<User> {
            // Lookups succeed even while the follow-up call is refused.
            self.calls.lock().push(format!("user_by_username:{}", username));
            if self.throttled.load(Ordering::SeqCst) {
                return Err(AppError::RateLimited {
                    retry_after: Some(900),
                });
            }
            if username == "ghost" {
                return Err(AppError::NotFound(format!(
                    "Could not find user with username: [{}].",
                    username
                )));
            }
            Ok(user("7", username))
        }

        async fn user_tweets(
            &self,
            user_id: &str,
            kind: UserTweetsKind,
            _count: u32,
        ) -> Result<Vec<Tweet>> {
            self.hit(&format!("user_tweets:{}:{:?}", user_id, kind))?;
            Ok(vec![])
        }

        async fn home_timeline(&self, count: u32) -> Result<Vec<Tweet>> {
            self.hit(&format!("home_timeline:{}", count))?;
            Ok(vec![tweet("1")])
        }

        async fn search_users(&self, _query: &str, _count: u32) -> Result<Vec<User>> {
            self.hit("search_users")?;
            Ok(vec![user("7", "alice")])
        }

        async fn tweet(&self, tweet_id: &str) -> Result<Tweet> {
            self.hit(&format!("tweet:{}", tweet_id))?;
            Ok(tweet(tweet_id))
        }

        async fn upload_media(&self, path: &Path, purpose: MediaPurpose) -> Result<String> {
            self.hit(&format!("upload_media:{:?}", purpose))?;
            let index = self.calls().iter().filter(|c| c.starts_with("upload_media")).count();
            assert!(path.is_file());
            Ok(format!("m{}", index))
        }

        async fn create_tweet(&self, request: &CreateTweetRequest) -> Result<CreatedTweet> {
            self.hit("create_tweet")?;
            self.posted.lock().push(request.clone());
            Ok(CreatedTweet {
                id: "1001".into(),
                text: request.text.clone(),
            })
        }

        async fn delete_tweet(&self, tweet_id: &str) -> Result<()> {
            self.hit(&format!("delete_tweet:{}", tweet_id))
        }

        async fn follow(&self, target_user_id: &str) -> Result<()> {
            self.hit(&format!("follow:{}", target_user_id))
        }

        async fn unfollow(&self, target_user_id: &str) -> Result<()> {
            self.hit(&format!("unfollow:{}", target_user_id))
        }

        async fn like(&self, tweet_id: &str) -> Result<()> {
            self.hit(&format!("like:{}", tweet_id))
        }

        async fn unlike(&self, tweet_id: &str) -> Result<()> {
            self.hit(&format!("unlike:{}", tweet_id))
        }

        async fn retweet(&self, tweet_id: &str) -> Result<()> {
            self.hit(&format!("retweet:{}", tweet_id))
        }

        async fn unretweet(&self, tweet_id: &str) -> Result<()> {
            self.hit(&format!("unretweet:{}", tweet_id))
        }

        async fn dm_events(&self, participant_id: &str, _count: u32) -> Result<Vec<DmEvent>> {
            self.hit(&format!("dm_events:{}", participant_id))?;
            Ok(serde_json::from_value(json!([
                {"id": "1", "event_type": "MessageCreate", "text": "ping", "sender_id": "42"},
                {"id": "2", "event_type": "MessageCreate", "text": "pong", "sender_id": "7"}
            ]))
            .unwrap())
        }

        async fn send_dm(
            &self,
            participant_id: &str,
            _text: &str,
            media_id: Option<&str>,
        ) -> Result<DmSent> {
            self.hit(&format!("send_dm:{}:{}", participant_id, media_id.unwrap_or("-")))?;
            Ok(DmSent {
                dm_conversation_id: "7-42".into(),
                dm_event_id: "555".into(),
            })
        }

        async fn delete_dm(&self, event_id: &str) -> Result<()> {
            self.hit(&format!("delete_dm:{}", event_id))
        }

        async fn trends(&self, _woeid: u32) -> Result<Vec<Trend>> {
            self.hit("trends")?;
            Ok(vec![Trend {
                trend_name: "#rustlang".into(),
                tweet_count: Some(1200),
            }])
        }
    }

    struct Harness {
        dispatcher: ToolDispatcher,
        controller: Arc<AdmissionController>,
        api: Arc<MockApi>,
        sleeper: Arc<RecordingSleeper>,
        clock: Arc<ManualClock>,
        stats: Arc<Stats>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::at_secs(10_000));
        let sleeper = Arc::new(RecordingSleeper::new());
        let stats = Arc::new(Stats::new());
        let controller = Arc::new(
            AdmissionController::with_runtime(
                PolicyTable::default(),
                clock.clone() as Arc<dyn Clock>,
                sleeper.clone() as Arc<dyn Sleeper>,
            )
            .with_stats(stats.clone()),
        );
        let api = Arc::new(MockApi::default());
        let dispatcher = ToolDispatcher::new(controller.clone(), api.clone(), stats.clone());

        Harness {
            dispatcher,
            controller,
            api,
            sleeper,
            clock,
            stats,
        }
    }

    fn request(tool: &str, args: serde_json::Value) -> ToolRequest {
        ToolRequest {
            id: Some("req-1".into()),
            tool: tool.into(),
            args,
        }
    }

    fn image() -> tempfile::NamedTempFile {
        tempfile::Builder::new().suffix(".png").tempfile().unwrap()
    }

    #[tokio::test]
    async fn test_post_tweet_appends_mentions_and_cools_down() {
        let h = harness();

        let args = json!({"text": "Hello", "tags": ["@alice", "bob"], "reply_to": "99"});
        let response = h.dispatcher.dispatch(request("post_tweet", args)).await;

        assert!(response.ok, "{}", response.content);
        assert_eq!(response.id, "req-1");
        assert_eq!(response.content, "Posted tweet: 1001");

        let posted = h.api.posted.lock().clone();
        assert_eq!(posted[0].text, "Hello\n@alice @bob");
        assert_eq!(posted[0].reply.as_ref().unwrap().in_reply_to_tweet_id, "99");
        assert!(posted[0].media.is_none());

        assert_eq!(h.controller.usage_count("tweet").await, 1);
        let delays = h.sleeper.delays();
        assert_eq!(delays.len(), 1);
        assert!(CooldownRange::SENSITIVE.contains(delays[0]));
    }

    #[tokio::test]
    async fn test_post_tweet_uploads_media_first() {
        let h = harness();
        let (first, second) = (image(), image());

        let args = json!({"text": "Cats", "media_paths": [first.path(), second.path()]});
        let response = h.dispatcher.dispatch(request("post_tweet", args)).await;
        assert!(response.ok, "{}", response.content);

        assert_eq!(
            h.api.calls(),
            vec!["upload_media:Tweet", "upload_media:Tweet", "create_tweet"]
        );
        let posted = h.api.posted.lock().clone();
        assert_eq!(posted[0].media.as_ref().unwrap().media_ids, vec!["m1", "m2"]);

        assert_eq!(h.controller.usage_count(UPLOAD_ENDPOINT).await, 2);
        assert_eq!(h.controller.usage_count("tweet").await, 1);
        assert_eq!(h.sleeper.count(), 3);
    }

    #[tokio::test]
    async fn test_no_upload_when_posting_is_throttled() {
        let h = harness();
        for _ in 0..10 {
            h.controller.record_usage("tweet").await;
        }
        let file = image();

        let args = json!({"text": "Cats", "media_paths": [file.path()]});
        let response = h.dispatcher.dispatch(request("post_tweet", args)).await;

        assert!(!response.ok);
        assert!(response.content.contains("Rate limit exceeded for 'tweet'"));
        assert!(h.api.calls().is_empty());
        assert_eq!(h.controller.usage_count(UPLOAD_ENDPOINT).await, 0);
    }

    #[tokio::test]
    async fn test_send_dm_with_attachment() {
        let h = harness();
        let file = image();

        let args = json!({"username": "alice", "message": "look", "media_path": file.path()});
        let response = h.dispatcher.dispatch(request("send_dm", args)).await;
        assert!(response.ok, "{}", response.content);

        assert_eq!(
            h.api.calls(),
            vec!["upload_media:DirectMessage", "user_by_username:alice", "send_dm:7:m1"]
        );
        assert_eq!(h.controller.usage_count(UPLOAD_ENDPOINT).await, 1);
        assert_eq!(h.controller.usage_count("dm_write").await, 1);
    }

    #[tokio::test]
    async fn test_poll_shares_tweet_quota() {
        let h = harness();

        let args = json!({"text": "Tabs or spaces?", "choices": ["tabs", "spaces"]});
        let response = h.dispatcher.dispatch(request("post_poll_tweet", args)).await;
        assert!(response.ok, "{}", response.content);

        let posted = h.api.posted.lock().clone();
        let poll = posted[0].poll.as_ref().unwrap();
        assert_eq!(poll.options, vec!["tabs", "spaces"]);
        assert_eq!(poll.duration_minutes, 1440);
        assert_eq!(h.controller.usage_count("tweet").await, 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments_consume_nothing() {
        let h = harness();

        let response = h
            .dispatcher
            .dispatch(request("post_tweet", json!({"text": "   "})))
            .await;
        assert!(!response.ok);
        assert!(response.content.contains("'text' must not be empty"));

        let response = h
            .dispatcher
            .dispatch(request("launch_rocket", json!({})))
            .await;
        assert!(!response.ok);
        assert_eq!(response.tool, "launch_rocket");

        // An argument this tool does not take is refused, not dropped.
        let args = json!({"text": "hi", "media_path": "/tmp/cat.png"});
        let response = h.dispatcher.dispatch(request("post_tweet", args)).await;
        assert!(!response.ok);
        assert!(response.content.contains("media_path"), "{}", response.content);

        assert!(h.api.calls().is_empty());
        assert_eq!(h.controller.usage_count("tweet").await, 0);
        assert_eq!(h.sleeper.count(), 0);
        assert_eq!(h.stats.invalid_requests.load(Ordering::Relaxed), 3);
        assert_eq!(h.stats.requests_received.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_remote_throttle_blocks_endpoint_for_window() {
        let h = harness();
        h.api.throttled.store(true, Ordering::SeqCst);

        let args = json!({"username": "alice"});
        let response = h.dispatcher.dispatch(request("follow_user", args.clone())).await;
        assert!(!response.ok);
        assert!(response
            .content
            .contains("Remote rate limit reached for 'follow'"));
        assert_eq!(h.controller.usage_count("follow").await, 5);
        assert_eq!(h.sleeper.count(), 0);

        h.api.throttled.store(false, Ordering::SeqCst);
        let before = h.api.calls().len();
        h.clock.advance(std::time::Duration::from_secs(100));

        let response = h.dispatcher.dispatch(request("follow_user", args.clone())).await;
        assert!(!response.ok);
        assert!(
            response.content.contains("Retry after ~800 seconds"),
            "{}",
            response.content
        );
        assert_eq!(h.api.calls().len(), before);

        // Other endpoints are unaffected.
        let response = h.dispatcher.dispatch(request("get_user_info", args)).await;
        assert!(response.ok);
    }

    #[tokio::test]
    async fn test_other_failure_is_not_counted() {
        let h = harness();
        h.api.fail_hard.store(true, Ordering::SeqCst);

        let args = json!({"tweet_id": "5"});
        let response = h.dispatcher.dispatch(request("favorite_tweet", args)).await;
        assert!(!response.ok);
        assert!(response.content.contains("'favorite' failed"));
        assert!(response.content.contains("Service Unavailable"));
        assert_eq!(h.controller.usage_count("favorite").await, 0);
        assert_eq!(h.sleeper.count(), 0);
        assert_eq!(h.stats.operations_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_known_refusals_are_answers() {
        let h = harness();

        h.api.refuse_with("You are unable to follow more people, you already follow this user.");
        let response = h
            .dispatcher
            .dispatch(request("follow_user", json!({"username": "alice"})))
            .await;
        assert!(response.ok, "{}", response.content);
        assert_eq!(response.content, "Already following @alice.");
        assert_eq!(h.controller.usage_count("follow").await, 1);

        h.api.refuse_with("You are not allowed to create a Tweet with duplicate content.");
        let response = h
            .dispatcher
            .dispatch(request("post_tweet", json!({"text": "again"})))
            .await;
        assert!(response.ok);
        assert_eq!(
            response.content,
            "Not posted: the text duplicates a recent tweet."
        );

        h.api.refuse_with("You cannot send messages to this user.");
        let response = h
            .dispatcher
            .dispatch(request("send_dm", json!({"username": "bob", "message": "hi"})))
            .await;
        assert!(response.ok);
        assert!(response.content.starts_with("Cannot message @bob"));

        // An unrecognized refusal stays a failure and is not counted.
        h.api.refuse_with("Something else entirely.");
        let response = h
            .dispatcher
            .dispatch(request("retweet_tweet", json!({"tweet_id": "8"})))
            .await;
        assert!(!response.ok);
        assert_eq!(h.controller.usage_count("retweet").await, 0);
    }

    #[tokio::test]
    async fn test_missing_user_is_an_answer() {
        let h = harness();

        let args = json!({"username": "@ghost", "message": "hi"});
        let response = h.dispatcher.dispatch(request("send_dm", args)).await;
        assert!(response.ok);
        assert_eq!(response.content, "User @ghost was not found.");
        assert_eq!(h.controller.usage_count("dm_write").await, 1);
        assert_eq!(h.api.calls(), vec!["user_by_username:ghost"]);
    }

    #[tokio::test]
    async fn test_dm_history_marks_direction() {
        let h = harness();

        let args = json!({"username": "alice"});
        let response = h.dispatcher.dispatch(request("get_dm_history", args)).await;
        assert!(response.ok);
        assert!(response.content.contains("Sender ID: `42` (sent)"));
        assert!(response.content.contains("Sender ID: `7` (received)"));
        assert_eq!(
            h.api.calls(),
            vec!["user_by_username:alice", "dm_events:7"]
        );
        assert_eq!(h.controller.usage_count("dm_read").await, 1);
    }

    #[tokio::test]
    async fn test_user_tweets_kind_is_forwarded() {
        let h = harness();

        let args = json!({"username": "alice", "tweet_type": "TweetsAndReplies"});
        let response = h.dispatcher.dispatch(request("get_user_tweets", args)).await;
        assert!(response.ok);
        assert_eq!(
            h.api.calls(),
            vec!["user_by_username:alice", "user_tweets:7:TweetsAndReplies"]
        );
    }

    #[tokio::test]
    async fn test_counts_are_clamped_and_ids_assigned() {
        let h = harness();

        let response = h
            .dispatcher
            .dispatch(ToolRequest {
                id: None,
                tool: "search_twitter".into(),
                args: json!({"query": "rust", "count": 1000}),
            })
            .await;
        assert!(response.ok);
        assert!(Uuid::parse_str(&response.id).is_ok());
        assert_eq!(h.api.calls(), vec!["search_tweets:rust:100"]);
        assert_eq!(h.controller.usage_count("search_tweet").await, 1);
        assert!(CooldownRange::DEFAULT.contains(h.sleeper.delays()[0]));
    }

    #[tokio::test]
    async fn test_tweet_info_uses_search_quota() {
        let h = harness();

        let args = json!({"tweet_id": "123"});
        let response = h.dispatcher.dispatch(request("get_tweet_info", args)).await;
        assert!(response.ok);
        assert!(response.content.contains("tweet 123"));
        assert_eq!(h.controller.usage_count("search_tweet").await, 1);
    }
}
