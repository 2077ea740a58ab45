use config::{Config as ConfigLoader, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::admission::{AdmissionSettings, PolicyTable};
use crate::error::{AppError, Result};

const DEFAULT_API_URL: &str = "https://api.twitter.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(AppError::Init(format!("Unknown LOG_FORMAT '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // General
    pub log_level: String,
    pub log_format: LogFormat,
    pub stats_interval_secs: u64,
    pub max_in_flight: usize,

    // Account
    pub username: Option<String>,
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub user_agent: Option<String>,
    pub session_path: PathBuf,

    // Remote API
    pub api_url: String,
    pub timeout_secs: u64,

    // Admission control
    pub admission: AdmissionSettings,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let api_url = env::var("TWITTER_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        url::Url::parse(&api_url)
            .map_err(|e| AppError::Init(format!("Invalid TWITTER_API_URL '{}': {}", api_url, e)))?;

        let session_path = env::var("RELAY_SESSION_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_session_path());

        let log_format = env::var("LOG_FORMAT").unwrap_or_default().parse()?;

        let policy_file = non_empty_var("RELAY_POLICY_FILE");
        let admission = load_admission(policy_file.as_deref().map(Path::new))?;

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            stats_interval_secs: env_or("STATS_INTERVAL_SECS", 300),
            max_in_flight: env_or("MAX_IN_FLIGHT", 8),
            username: non_empty_var("TWITTER_USERNAME"),
            email: non_empty_var("TWITTER_EMAIL"),
            access_token: non_empty_var("TWITTER_ACCESS_TOKEN"),
            user_agent: non_empty_var("USER_AGENT"),
            session_path,
            api_url,
            timeout_secs: env_or("TWITTER_TIMEOUT_SECS", 30),
            admission,
        })
    }
}

/// Built-in policy, then the optional policy file, then `RELAY_POLICY__*`
/// environment overrides (e.g. `RELAY_POLICY__LIMITS__TWEET=5`).
pub fn load_admission(policy_file: Option<&Path>) -> Result<AdmissionSettings> {
    load_admission_with_env(policy_file, None)
}

/// `env` replaces the process environment when set.
fn load_admission_with_env(
    policy_file: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<AdmissionSettings> {
    let mut builder =
        ConfigLoader::builder().add_source(ConfigLoader::try_from(&AdmissionSettings::default())?);

    if let Some(path) = policy_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("RELAY_POLICY")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("sensitive_endpoints")
            .source(env),
    );

    let settings: AdmissionSettings = builder.build()?.try_deserialize()?;

    // Reject bad windows and cooldown ranges at startup.
    PolicyTable::from_settings(&settings)?;

    Ok(settings)
}

fn default_session_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".twitter-relay")
        .join("session.json")
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_policy_loads() {
        let settings = load_admission(None).unwrap();
        assert_eq!(settings.window_secs, 900);
        assert_eq!(settings.limits.get("follow"), Some(&5));
        assert!(settings.sensitive_endpoints.contains(&"tweet".to_string()));
    }

    #[test]
    fn test_policy_file_overrides_merge() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
window_secs = 600
sensitive_endpoints = ["tweet", "follow", "dm_write"]

[limits]
tweet = 3
"#
        )
        .unwrap();

        let settings = load_admission(Some(file.path())).unwrap();
        assert_eq!(settings.window_secs, 600);
        assert_eq!(settings.limits.get("tweet"), Some(&3));
        // Untouched entries survive the merge.
        assert_eq!(settings.limits.get("follow"), Some(&5));
        assert_eq!(settings.sensitive_endpoints.len(), 3);
    }

    #[test]
    fn test_policy_file_with_bad_cooldown_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[default_cooldown]
min_secs = 20.0
max_secs = 10.0
"#
        )
        .unwrap();

        assert!(load_admission(Some(file.path())).is_err());
    }

    #[test]
    fn test_environment_overrides_policy() {
        let env: HashMap<String, String> = [
            ("RELAY_POLICY__LIMITS__TWEET", "4"),
            ("RELAY_POLICY__WINDOW_SECS", "300"),
            ("RELAY_POLICY__SENSITIVE_ENDPOINTS", "tweet,dm_write"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let settings = load_admission_with_env(None, Some(env)).unwrap();
        assert_eq!(settings.limits.get("tweet"), Some(&4));
        assert_eq!(settings.limits.get("follow"), Some(&5));
        assert_eq!(settings.window_secs, 300);
        assert_eq!(settings.sensitive_endpoints, vec!["tweet", "dm_write"]);
    }

    #[test]
    fn test_environment_applies_over_policy_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[limits]\ntweet = 3\nfollow = 2").unwrap();

        let env = HashMap::from([("RELAY_POLICY__LIMITS__TWEET".to_string(), "7".to_string())]);
        let settings = load_admission_with_env(Some(file.path()), Some(env)).unwrap();
        assert_eq!(settings.limits.get("tweet"), Some(&7));
        assert_eq!(settings.limits.get("follow"), Some(&2));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
