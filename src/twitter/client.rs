//! Twitter v2 REST client.
//!
//! Calls are made once. A 429 surfaces as `AppError::RateLimited` so the
//! admission controller can saturate the endpoint; nothing here sleeps or
//! retries.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{AppError, Result};
use crate::twitter::api::SocialApi;
use crate::twitter::session::{Session, SessionStore};
use crate::twitter::types::{
    media_category, media_mime_type, resolve_includes, ApiErrorDetail, ApiResponse,
    CreateTweetRequest, CreatedTweet, DmEvent, DmSent, MediaPurpose, SortOrder, Trend, Tweet,
    UploadedMedia, User, UserTweetsKind,
};
use crate::utils::time::now_ts;

const TWEET_FIELDS: &str =
    "id,text,author_id,created_at,public_metrics,referenced_tweets,attachments";
const TWEET_EXPANSIONS: &str =
    "author_id,referenced_tweets.id,referenced_tweets.id.author_id,attachments.poll_ids";
const USER_FIELDS: &str =
    "id,name,username,description,location,url,verified,created_at,public_metrics";
const POLL_FIELDS: &str = "id,options,voting_status,end_datetime";
const DM_EVENT_FIELDS: &str = "id,event_type,text,sender_id,created_at,dm_conversation_id";

pub struct TwitterClient {
    http: Client,
    base_url: Url,
    sessions: SessionStore,
}

impl TwitterClient {
    pub fn new(http: Client, api_url: &str, sessions: SessionStore) -> Result<Self> {
        let base_url = Url::parse(api_url)
            .map_err(|e| AppError::Init(format!("Invalid API URL '{}': {}", api_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Init(format!("API URL '{}' cannot be a base", api_url)));
        }

        Ok(Self {
            http,
            base_url,
            sessions,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Active session, validated against `/2/users/me` the first time.
    pub async fn session(&self) -> Result<Arc<Session>> {
        self.sessions
            .authenticate(|token| async move { self.fetch_me(&token).await })
            .await
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Init(format!("API URL '{}' cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_me(&self, token: &str) -> Result<User> {
        let response = self
            .http
            .get(self.url(&["2", "users", "me"])?)
            .query(&[("user.fields", USER_FIELDS)])
            .bearer_auth(token)
            .send()
            .await?;

        let body: ApiResponse<User> = handle_response(response).await?;
        into_data(body, "authenticated user")
    }

    #[instrument(skip(self, query, body))]
    async fn call<T, B>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let session = self.session().await?;
        let url = self.url(segments)?;
        debug!(%method, %url, "Calling Twitter API");

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&session.access_token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Access token rejected by the API; session invalidated");
            self.sessions.invalidate();
        }

        handle_response(response).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T> {
        self.call(Method::GET, segments, query, None::<&()>).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        self.call(Method::POST, segments, &[], Some(body)).await
    }

    async fn delete(&self, segments: &[&str]) -> Result<()> {
        let _: ApiResponse<serde_json::Value> = self
            .call(Method::DELETE, segments, &[], None::<&()>)
            .await?;
        Ok(())
    }

    async fn tweet_list(
        &self,
        segments: &[&str],
        mut query: Vec<(&str, String)>,
    ) -> Result<Vec<Tweet>> {
        query.extend(tweet_query());
        let body: ApiResponse<Vec<Tweet>> = self.get(segments, &query).await?;
        Ok(resolve_includes(body.data.unwrap_or_default(), body.includes.as_ref()))
    }
}

#[async_trait]
impl SocialApi for TwitterClient {
    async fn account_id(&self) -> Result<String> {
        Ok(self.session().await?.user_id.clone())
    }

    async fn search_tweets(&self, query: &str, order: SortOrder, count: u32) -> Result<Vec<Tweet>> {
        let query = match order {
            SortOrder::Media => format!("{} has:media", query),
            SortOrder::Latest | SortOrder::Top => query.to_string(),
        };
        let params = vec![
            ("query", query),
            ("sort_order", order.as_query_value().to_string()),
            // The endpoint refuses pages smaller than 10.
            ("max_results", count.clamp(10, 100).to_string()),
        ];
        let mut tweets = self
            .tweet_list(&["2", "tweets", "search", "recent"], params)
            .await?;
        tweets.truncate(count as usize);
        Ok(tweets)
    }

    async fn user_by_username(&self, username: &str) -> Result<User> {
        let username = username.trim_start_matches('@');
        let body: ApiResponse<User> = self
            .get(
                &["2", "users", "by", "username", username],
                &[("user.fields", USER_FIELDS.to_string())],
            )
            .await?;
        into_data(body, &format!("@{}", username))
    }

    async fn user_tweets(
        &self,
        user_id: &str,
        kind: UserTweetsKind,
        count: u32,
    ) -> Result<Vec<Tweet>> {
        let mut params = vec![("max_results", count.clamp(5, 100).to_string())];
        if let Some(exclude) = kind.exclude() {
            params.push(("exclude", exclude.to_string()));
        }

        let mut tweets = self.tweet_list(&["2", "users", user_id, "tweets"], params).await?;
        // The timeline has no media filter of its own.
        if kind == UserTweetsKind::Media {
            tweets.retain(Tweet::has_media);
        }
        tweets.truncate(count as usize);
        Ok(tweets)
    }

    async fn home_timeline(&self, count: u32) -> Result<Vec<Tweet>> {
        let session = self.session().await?;
        let params = vec![("max_results", count.clamp(1, 100).to_string())];
        self.tweet_list(
            &["2", "users", session.user_id.as_str(), "timelines", "reverse_chronological"],
            params,
        )
        .await
    }

    async fn search_users(&self, query: &str, count: u32) -> Result<Vec<User>> {
        let body: ApiResponse<Vec<User>> = self
            .get(
                &["2", "users", "search"],
                &[
                    ("query", query.to_string()),
                    ("max_results", count.clamp(1, 100).to_string()),
                    ("user.fields", USER_FIELDS.to_string()),
                ],
            )
            .await?;
        Ok(body.data.unwrap_or_default())
    }

    async fn tweet(&self, tweet_id: &str) -> Result<Tweet> {
        let body: ApiResponse<Tweet> = self.get(&["2", "tweets", tweet_id], &tweet_query()).await?;
        let includes = body.includes.clone();
        let tweet = into_data(body, &format!("tweet {}", tweet_id))?;
        resolve_includes(vec![tweet], includes.as_ref())
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("tweet {}", tweet_id)))
    }

    async fn upload_media(&self, path: &Path, purpose: MediaPurpose) -> Result<String> {
        let mime_type = media_mime_type(path).ok_or_else(|| {
            AppError::InvalidArgument(format!("Unsupported media file: {}", path.display()))
        })?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());

        let form = Form::new()
            .text("media_category", media_category(mime_type, purpose))
            .part("media", Part::bytes(bytes).file_name(file_name).mime_str(mime_type)?);

        let session = self.session().await?;
        let request = self
            .http
            .post(self.url(&["2", "media", "upload"])?)
            .bearer_auth(&session.access_token)
            .multipart(form);

        let body: ApiResponse<UploadedMedia> = self.send(request).await?;
        let media = into_data(body, "uploaded media")?;
        debug!(id = %media.id, "Uploaded {}", path.display());
        Ok(media.id)
    }

    async fn create_tweet(&self, request: &CreateTweetRequest) -> Result<CreatedTweet> {
        let body: ApiResponse<CreatedTweet> = self.post(&["2", "tweets"], request).await?;
        into_data(body, "created tweet")
    }

    async fn delete_tweet(&self, tweet_id: &str) -> Result<()> {
        self.delete(&["2", "tweets", tweet_id]).await
    }

    async fn follow(&self, target_user_id: &str) -> Result<()> {
        let session = self.session().await?;
        let _: ApiResponse<serde_json::Value> = self
            .post(
                &["2", "users", session.user_id.as_str(), "following"],
                &json!({ "target_user_id": target_user_id }),
            )
            .await?;
        Ok(())
    }

    async fn unfollow(&self, target_user_id: &str) -> Result<()> {
        let session = self.session().await?;
        self.delete(&["2", "users", session.user_id.as_str(), "following", target_user_id])
            .await
    }

    async fn like(&self, tweet_id: &str) -> Result<()> {
        let session = self.session().await?;
        let _: ApiResponse<serde_json::Value> = self
            .post(
                &["2", "users", session.user_id.as_str(), "likes"],
                &json!({ "tweet_id": tweet_id }),
            )
            .await?;
        Ok(())
    }

    async fn unlike(&self, tweet_id: &str) -> Result<()> {
        let session = self.session().await?;
        self.delete(&["2", "users", session.user_id.as_str(), "likes", tweet_id])
            .await
    }

    async fn retweet(&self, tweet_id: &str) -> Result<()> {
        let session = self.session().await?;
        let _: ApiResponse<serde_json::Value> = self
            .post(
                &["2", "users", session.user_id.as_str(), "retweets"],
                &json!({ "tweet_id": tweet_id }),
            )
            .await?;
        Ok(())
    }

    async fn unretweet(&self, tweet_id: &str) -> Result<()> {
        let session = self.session().await?;
        self.delete(&["2", "users", session.user_id.as_str(), "retweets", tweet_id])
            .await
    }

    async fn dm_events(&self, participant_id: &str, count: u32) -> Result<Vec<DmEvent>> {
        let body: ApiResponse<Vec<DmEvent>> = self
            .get(
                &["2", "dm_conversations", "with", participant_id, "dm_events"],
                &[
                    ("max_results", count.clamp(1, 100).to_string()),
                    ("dm_event.fields", DM_EVENT_FIELDS.to_string()),
                ],
            )
            .await?;
        Ok(body.data.unwrap_or_default())
    }

    async fn send_dm(
        &self,
        participant_id: &str,
        text: &str,
        media_id: Option<&str>,
    ) -> Result<DmSent> {
        let mut message = json!({ "text": text });
        if let Some(media_id) = media_id {
            message["attachments"] = json!([{ "media_id": media_id }]);
        }

        let body: ApiResponse<DmSent> = self
            .post(
                &["2", "dm_conversations", "with", participant_id, "messages"],
                &message,
            )
            .await?;
        into_data(body, "sent message")
    }

    async fn delete_dm(&self, event_id: &str) -> Result<()> {
        self.delete(&["2", "dm_events", event_id]).await
    }

    async fn trends(&self, woeid: u32) -> Result<Vec<Trend>> {
        let woeid = woeid.to_string();
        let body: ApiResponse<Vec<Trend>> = self
            .get(&["2", "trends", "by", "woeid", woeid.as_str()], &[])
            .await?;
        Ok(body.data.unwrap_or_default())
    }
}

fn tweet_query() -> Vec<(&'static str, String)> {
    vec![
        ("tweet.fields", TWEET_FIELDS.to_string()),
        ("expansions", TWEET_EXPANSIONS.to_string()),
        ("user.fields", USER_FIELDS.to_string()),
        ("poll.fields", POLL_FIELDS.to_string()),
    ]
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after_secs(response.headers());
        warn!(?retry_after, "Twitter API returned 429");
        return Err(AppError::RateLimited { retry_after });
    }

    let bytes = response.bytes().await?;
    if status.is_success() {
        return serde_json::from_slice(&bytes).map_err(AppError::from);
    }

    #[derive(serde::Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        detail: Option<String>,
    }

    let message = serde_json::from_slice::<ErrorBody>(&bytes)
        .ok()
        .and_then(|body| body.detail.or(body.title))
        .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());

    if status == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(message));
    }

    Err(AppError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Seconds until the window resets, from `x-rate-limit-reset` (epoch
/// seconds) or `retry-after`.
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    if let Some(reset) = header("x-rate-limit-reset") {
        return Some(reset.saturating_sub(now_ts()));
    }
    header("retry-after")
}

/// v2 answers a missing resource with HTTP 200, no `data` and an `errors` array.
fn into_data<T>(body: ApiResponse<T>, what: &str) -> Result<T> {
    match body.data {
        Some(data) => Ok(data),
        None => {
            let message = body
                .errors
                .as_deref()
                .and_then(|errors| errors.first())
                .map(ApiErrorDetail::message)
                .unwrap_or_else(|| format!("{} not found", what));
            Err(AppError::NotFound(message))
        }
    }
}
