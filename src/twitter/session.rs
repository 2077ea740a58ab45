use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::twitter::types::User;

/// A validated credential set, persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user_id: String,
    pub username: String,
    pub saved_at: DateTime<Utc>,
}

/// Credential cache: the session file on disk plus the session validated
/// in this process.
pub struct SessionStore {
    path: PathBuf,
    fallback_token: Option<String>,
    current: ArcSwapOption<Session>,
    login: Mutex<()>,
}

impl SessionStore {
    pub fn new(path: PathBuf, fallback_token: Option<String>) -> Self {
        Self {
            path,
            fallback_token,
            current: ArcSwapOption::empty(),
            login: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.load_full()
    }

    /// Forget the in-process session, e.g. after the remote rejected its token.
    pub fn invalidate(&self) {
        self.current.store(None);
    }

    /// Returns the active session, validating the cached one or the
    /// configured token with `validate` when there is none yet.
    pub async fn authenticate<F, Fut>(&self, validate: F) -> Result<Arc<Session>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<User>>,
    {
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let _login = self.login.lock().await;
        // Another task may have finished logging in while we waited.
        if let Some(session) = self.current() {
            return Ok(session);
        }

        if let Some(cached) = self.load()? {
            match validate(cached.access_token.clone()).await {
                Ok(user) => {
                    info!("Loaded cached session for @{}", user.username);
                    let session = Arc::new(Session {
                        user_id: user.id,
                        username: user.username,
                        ..cached
                    });
                    self.current.store(Some(session.clone()));
                    return Ok(session);
                }
                Err(e @ AppError::Api { status: 401 | 403, .. }) => {
                    warn!("Cached session rejected ({}); re-authenticating", e);
                    self.remove()?;
                }
                Err(e) => return Err(e),
            }
        }

        let token = self.fallback_token.clone().ok_or_else(|| {
            AppError::Auth(
                "No valid cached session and TWITTER_ACCESS_TOKEN is not set".to_string(),
            )
        })?;

        let user = validate(token.clone()).await.map_err(|e| match e {
            AppError::Api { status: 401, message } | AppError::Api { status: 403, message } => {
                AppError::Auth(format!("Access token rejected: {}", message))
            }
            other => other,
        })?;

        let session = Session {
            access_token: token,
            user_id: user.id,
            username: user.username,
            saved_at: Utc::now(),
        };
        self.save(&session)?;
        info!("Authenticated as @{}; session saved to {}", session.username, self.path.display());

        let session = Arc::new(session);
        self.current.store(Some(session.clone()));
        Ok(session)
    }

    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!("Ignoring unreadable session file {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(session)?)?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user(id: &str, username: &str) -> User {
        User {
            id: id.into(),
            name: username.into(),
            username: username.into(),
            description: None,
            location: None,
            url: None,
            verified: None,
            created_at: None,
            public_metrics: None,
        }
    }

    fn accept(token: &'static str) -> impl Fn(String) -> std::future::Ready<Result<User>> {
        move |candidate| {
            std::future::ready(if candidate == token {
                Ok(user("42", "relay_bot"))
            } else {
                Err(AppError::Api { status: 401, message: "Unauthorized".into() })
            })
        }
    }

    #[tokio::test]
    async fn test_fallback_token_is_validated_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let store = SessionStore::new(path.clone(), Some("good".into()));

        let session = store.authenticate(accept("good")).await.unwrap();
        assert_eq!(session.user_id, "42");
        assert!(path.exists());

        let reloaded = store.load().unwrap().unwrap();
        assert_eq!(reloaded.access_token, "good");
        assert_eq!(reloaded.username, "relay_bot");
    }

    #[tokio::test]
    async fn test_cached_session_reused_without_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        SessionStore::new(path.clone(), None)
            .save(&Session {
                access_token: "cached".into(),
                user_id: "42".into(),
                username: "relay_bot".into(),
                saved_at: Utc::now(),
            })
            .unwrap();

        let store = SessionStore::new(path, None);
        let session = store.authenticate(accept("cached")).await.unwrap();
        assert_eq!(session.access_token, "cached");
    }

    #[tokio::test]
    async fn test_stale_cache_replaced_by_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::new(path.clone(), Some("fresh".into()));
        store
            .save(&Session {
                access_token: "expired".into(),
                user_id: "42".into(),
                username: "relay_bot".into(),
                saved_at: Utc::now(),
            })
            .unwrap();

        let session = store.authenticate(accept("fresh")).await.unwrap();
        assert_eq!(session.access_token, "fresh");
        assert_eq!(store.load().unwrap().unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"), None);

        let err = store.authenticate(accept("anything")).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[tokio::test]
    async fn test_rejected_token_is_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"), Some("bad".into()));

        let err = store.authenticate(accept("good")).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[tokio::test]
    async fn test_session_validated_once_per_process() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"), Some("good".into()));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            store
                .authenticate(|_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Ok(user("42", "relay_bot")))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.invalidate();
        assert!(store.current().is_none());
    }
}
