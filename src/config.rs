//! Environment-driven configuration.  Loaded once at startup; immutable
//! afterwards.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::approval::WorkflowSettings;
use crate::dedup::Deduplicator;
use crate::error::ConfigError;
use crate::filter::{Classifier, TopicCategory, TopicModel, TopicTerm};
use crate::pipeline::{PipelineSettings, RetryPolicy};
use crate::schedule::{ScheduleGate, ScheduleWindow};

/// Upper bound for `APPROVAL_TIMEOUT_SECS` (7 days).
const MAX_APPROVAL_TIMEOUT_SECS: u64 = 7 * 86_400;
/// Upper bound for `DEDUP_TTL_SECS` (30 days).
const MAX_DEDUP_TTL_SECS: u64 = 30 * 86_400;

pub struct Settings {
    pub relevance_threshold: f64,
    pub dedup_ttl: Duration,
    pub dedup_capacity: usize,
    pub approval_timeout: Duration,
    pub timezone: Tz,
    pub windows: Vec<ScheduleWindow>,
    pub force_24h: bool,
    pub authorized_admins: HashSet<i64>,
    pub topic_terms_path: Option<String>,
    pub topic_model: TopicModel,
    pub retry: RetryPolicy,
    pub target_channel: Option<String>,
    pub attribution: String,
    pub state_db_path: Option<String>,
}

/// One entry of a `TOPIC_TERMS_PATH` file.
#[derive(Deserialize)]
struct RawTerm {
    phrase: String,
    weight: f64,
    category: String,
}

impl Settings {
    /// Construct from environment variables.
    ///
    /// | Env var                   | Default       | Purpose                                  |
    /// |---------------------------|---------------|------------------------------------------|
    /// | `RELEVANCE_THRESHOLD`     | `5`           | minimum score for a relevant verdict     |
    /// | `DEDUP_TTL_SECS`          | `86400`       | fingerprint lifetime, 1 s – 30 days      |
    /// | `DEDUP_CAPACITY`          | `10000`       | max fingerprints kept                    |
    /// | `APPROVAL_TIMEOUT_SECS`   | `3600`        | admin decision deadline, 1 s – 7 days    |
    /// | `SCHEDULE_TIMEZONE`       | `Asia/Tehran` | IANA zone for operating hours            |
    /// | `SCHEDULE_WINDOWS`        | `08:30-22:00` | `;`-separated `[days@]HH:MM-HH:MM`       |
    /// | `FORCE_24_HOUR_OPERATION` | `false`       | ignore the windows                       |
    /// | `ADMIN_IDS`               | **required**  | comma-separated Telegram user ids        |
    /// | `TOPIC_TERMS_PATH`        | built-in      | JSON `[{phrase, weight, category}]`      |
    /// | `NOTIFY_RETRY_ATTEMPTS`   | `3`           | delivery attempts per recipient          |
    /// | `NOTIFY_BACKOFF_MS`       | `500`         | first retry delay, doubled each retry    |
    /// | `TARGET_CHANNEL`          | unset         | where approved news is published         |
    /// | `ATTRIBUTION`             | empty         | footer of published posts                |
    /// | `STATE_DB_PATH`           | unset         | SQLite state file (memory when unset)    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let relevance_threshold = parse_or(&var, "RELEVANCE_THRESHOLD", 5.0_f64)?;
        if !relevance_threshold.is_finite() {
            return Err(ConfigError::invalid("RELEVANCE_THRESHOLD", "must be finite"));
        }

        let timezone = match var("SCHEDULE_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ConfigError::UnknownTimezone(name))?,
            None => chrono_tz::Asia::Tehran,
        };

        let windows = var("SCHEDULE_WINDOWS")
            .unwrap_or_else(|| "08:30-22:00".to_string())
            .split(';')
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(ScheduleWindow::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let authorized_admins = parse_admins(
            &var("ADMIN_IDS").ok_or_else(|| ConfigError::MissingEnv("ADMIN_IDS".into()))?,
        )?;

        let topic_terms_path = var("TOPIC_TERMS_PATH");
        let topic_model = match &topic_terms_path {
            Some(path) => load_terms(path)?,
            None => TopicModel::builtin(),
        };

        Ok(Self {
            relevance_threshold,
            dedup_ttl: parse_secs(&var, "DEDUP_TTL_SECS", 86_400, MAX_DEDUP_TTL_SECS)?,
            dedup_capacity: parse_or(&var, "DEDUP_CAPACITY", 10_000)?,
            approval_timeout: parse_secs(
                &var,
                "APPROVAL_TIMEOUT_SECS",
                3_600,
                MAX_APPROVAL_TIMEOUT_SECS,
            )?,
            timezone,
            windows,
            force_24h: parse_bool(var("FORCE_24_HOUR_OPERATION")),
            authorized_admins,
            topic_terms_path,
            topic_model,
            retry: RetryPolicy {
                attempts: parse_or(&var, "NOTIFY_RETRY_ATTEMPTS", 3)?,
                initial_backoff: Duration::from_millis(parse_or(&var, "NOTIFY_BACKOFF_MS", 500)?),
            },
            target_channel: var("TARGET_CHANNEL"),
            attribution: var("ATTRIBUTION").unwrap_or_default(),
            state_db_path: var("STATE_DB_PATH"),
        })
    }

    pub fn gate(&self) -> ScheduleGate {
        ScheduleGate::new(self.timezone, self.windows.clone()).always_on(self.force_24h)
    }

    pub fn deduplicator(&self) -> Deduplicator {
        Deduplicator::new(self.dedup_ttl, self.dedup_capacity)
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.topic_model.clone(), self.relevance_threshold)
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            timeout: self.approval_timeout,
            authorized_admins: self.authorized_admins.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            target_channel: self.target_channel.clone(),
            attribution: self.attribution.clone(),
            retry: self.retry,
        }
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "threshold={}, terms={} ({}), dedup_ttl={}s, timeout={}s, tz={}, windows={}, \
             24h={}, admins={}, target={}, state_db={}",
            self.relevance_threshold,
            self.topic_model.len(),
            self.topic_terms_path.as_deref().unwrap_or("built-in"),
            self.dedup_ttl.as_secs(),
            self.approval_timeout.as_secs(),
            self.timezone.name(),
            self.windows.len(),
            self.force_24h,
            self.authorized_admins.len(),
            self.target_channel.as_deref().unwrap_or("<none>"),
            self.state_db_path.as_deref().unwrap_or("<memory>"),
        )
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::invalid(key, format!("{raw:?}: {e}"))),
        None => Ok(default),
    }
}

/// Whole seconds in `1..=max`.
fn parse_secs(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
    max: u64,
) -> Result<Duration, ConfigError> {
    let secs = parse_or(var, key, default)?;
    if secs == 0 || secs > max {
        return Err(ConfigError::invalid(
            key,
            format!("{secs}s is outside 1..={max}s"),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(raw: Option<String>) -> bool {
    raw.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
}

fn parse_admins(raw: &str) -> Result<HashSet<i64>, ConfigError> {
    let admins = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ConfigError::invalid("ADMIN_IDS", format!("{s:?} is not a user id")))
        })
        .collect::<Result<HashSet<_>, _>>()?;
    if admins.is_empty() {
        return Err(ConfigError::invalid("ADMIN_IDS", "no admin ids given"));
    }
    Ok(admins)
}

pub fn parse_terms(json: &str) -> Result<TopicModel, ConfigError> {
    let raw: Vec<RawTerm> = serde_json::from_str(json)?;
    let terms = raw
        .into_iter()
        .map(|t| {
            let category = TopicCategory::from_variant_name(&t.category).ok_or_else(|| {
                let message = format!("unknown category {:?}", t.category);
                ConfigError::invalid("TOPIC_TERMS_PATH", message)
            })?;
            Ok(TopicTerm::new(&t.phrase, t.weight, category))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    TopicModel::new(terms)
}

fn load_terms(path: &str) -> Result<TopicModel, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    parse_terms(&json)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Weekday;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let s = settings(&[("ADMIN_IDS", "1, 2")]).unwrap();
        assert_eq!(s.relevance_threshold, 5.0);
        assert_eq!(s.dedup_ttl, Duration::from_secs(86_400));
        assert_eq!(s.approval_timeout, Duration::from_secs(3_600));
        assert_eq!(s.timezone, chrono_tz::Asia::Tehran);
        assert_eq!(s.windows.len(), 1);
        assert!(!s.force_24h);
        assert_eq!(s.authorized_admins, HashSet::from([1, 2]));
        assert_eq!(s.retry.attempts, 3);
        assert!(s.topic_model.len() > 0);
        assert_eq!(s.target_channel, None);
    }

    #[test]
    fn admin_ids_are_required() {
        assert!(matches!(settings(&[]), Err(ConfigError::MissingEnv(k)) if k == "ADMIN_IDS"));
        assert!(settings(&[("ADMIN_IDS", "abc")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let s = settings(&[
            ("ADMIN_IDS", "7"),
            ("RELEVANCE_THRESHOLD", "2.5"),
            ("SCHEDULE_TIMEZONE", "Europe/Berlin"),
            ("SCHEDULE_WINDOWS", "08:00-12:00; sat-sun@20:00-02:00"),
            ("FORCE_24_HOUR_OPERATION", "yes"),
            ("TARGET_CHANNEL", "@out"),
        ])
        .unwrap();
        assert_eq!(s.relevance_threshold, 2.5);
        assert_eq!(s.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(s.windows.len(), 2);
        assert_eq!(s.windows[1].days, vec![Weekday::Sat, Weekday::Sun]);
        assert!(s.force_24h);
        assert_eq!(s.target_channel.as_deref(), Some("@out"));
    }

    #[test]
    fn invalid_values_are_fatal() {
        assert!(matches!(
            settings(&[("ADMIN_IDS", "1"), ("SCHEDULE_TIMEZONE", "Mars/Olympus")]),
            Err(ConfigError::UnknownTimezone(_))
        ));
        assert!(settings(&[("ADMIN_IDS", "1"), ("SCHEDULE_WINDOWS", "9-5")]).is_err());
        assert!(settings(&[("ADMIN_IDS", "1"), ("DEDUP_TTL_SECS", "-3")]).is_err());
        assert!(settings(&[("ADMIN_IDS", "1"), ("RELEVANCE_THRESHOLD", "NaN")]).is_err());
    }

    #[test]
    fn durations_are_bounded() {
        let with = |key, value| settings(&[("ADMIN_IDS", "1"), (key, value)]);
        assert!(matches!(
            with("APPROVAL_TIMEOUT_SECS", "100000000000000"),
            Err(ConfigError::Invalid { key, .. }) if key == "APPROVAL_TIMEOUT_SECS"
        ));
        assert!(with("APPROVAL_TIMEOUT_SECS", "0").is_err());
        assert!(with("DEDUP_TTL_SECS", "18446744073709551615").is_err());
        assert!(with("DEDUP_TTL_SECS", "2592001").is_err());

        let s = settings(&[
            ("ADMIN_IDS", "1"),
            ("APPROVAL_TIMEOUT_SECS", "604800"),
            ("DEDUP_TTL_SECS", "2592000"),
        ])
        .unwrap();
        assert_eq!(s.approval_timeout, Duration::from_secs(7 * 86_400));
        assert_eq!(s.dedup_ttl, Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn terms_file_is_validated() {
        let model = parse_terms(
            r#"[{"phrase": "Airstrike", "weight": 6, "category": "war"},
                {"phrase": "football", "weight": -2, "category": "economy"}]"#,
        )
        .unwrap();
        assert_eq!(model.len(), 2);
        assert_eq!(model.terms()[0].phrase, "airstrike");

        assert!(matches!(parse_terms("not json"), Err(ConfigError::Terms(_))));
        assert!(parse_terms(r#"[{"phrase": "x", "weight": 1, "category": "sports"}]"#).is_err());
        assert!(parse_terms("[]").is_err());
    }

    #[test]
    fn terms_file_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terms.json");
        std::fs::write(
            &path,
            r#"[{"phrase": "blockade", "weight": 3, "category": "geopolitics"}]"#,
        )
        .unwrap();
        let path = path.to_str().unwrap();
        let s = settings(&[("ADMIN_IDS", "1"), ("TOPIC_TERMS_PATH", path)]).unwrap();
        assert_eq!(s.topic_model.len(), 1);

        assert!(matches!(
            settings(&[("ADMIN_IDS", "1"), ("TOPIC_TERMS_PATH", "/nonexistent/terms.json")]),
            Err(ConfigError::Io { .. })
        ));
    }
}
