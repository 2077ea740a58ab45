use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::twitter::types::{
    CreateTweetRequest, CreatedTweet, DmEvent, DmSent, MediaPurpose, SortOrder, Trend, Tweet, User,
    UserTweetsKind,
};

/// The remote social-network service, as the tool layer sees it.
///
/// Every call may fail; a "too many requests" answer surfaces as
/// `AppError::RateLimited` and is never retried here.
#[async_trait]
pub trait SocialApi: Send + Sync {
    /// User id of the authenticated account.
    async fn account_id(&self) -> Result<String>;

    async fn search_tweets(&self, query: &str, order: SortOrder, count: u32) -> Result<Vec<Tweet>>;

    async fn user_by_username(&self, username: &str) -> Result<User>;

    async fn user_tweets(
        &self,
        user_id: &str,
        kind: UserTweetsKind,
        count: u32,
    ) -> Result<Vec<Tweet>>;

    /// Reverse-chronological home timeline of the authenticated account.
    async fn home_timeline(&self, count: u32) -> Result<Vec<Tweet>>;

    async fn search_users(&self, query: &str, count: u32) -> Result<Vec<User>>;

    async fn tweet(&self, tweet_id: &str) -> Result<Tweet>;

    /// Uploads one image and returns its media id.
    async fn upload_media(&self, path: &Path, purpose: MediaPurpose) -> Result<String>;

    async fn create_tweet(&self, request: &CreateTweetRequest) -> Result<CreatedTweet>;

    async fn delete_tweet(&self, tweet_id: &str) -> Result<()>;

    async fn follow(&self, target_user_id: &str) -> Result<()>;

    async fn unfollow(&self, target_user_id: &str) -> Result<()>;

    async fn like(&self, tweet_id: &str) -> Result<()>;

    async fn unlike(&self, tweet_id: &str) -> Result<()>;

    async fn retweet(&self, tweet_id: &str) -> Result<()>;

    async fn unretweet(&self, tweet_id: &str) -> Result<()>;

    /// Direct messages exchanged with one participant, newest first.
    async fn dm_events(&self, participant_id: &str, count: u32) -> Result<Vec<DmEvent>>;

    async fn send_dm(
        &self,
        participant_id: &str,
        text: &str,
        media_id: Option<&str>,
    ) -> Result<DmSent>;

    async fn delete_dm(&self, event_id: &str) -> Result<()>;

    async fn trends(&self, woeid: u32) -> Result<Vec<Trend>>;
}
