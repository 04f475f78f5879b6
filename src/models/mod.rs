use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

// ── Lookup request ────────────────────────────────────────────────────────────

/// One username's hashtag lookup, e.g. `rebelscapes` + `alice` → `rebelscapes_alice`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub username: String,
    pub hashtag: String,
}

impl LookupRequest {
    pub fn new(base: &str, username: &str) -> Self {
        let base = base.trim().trim_start_matches('#');
        let username = username.trim();
        Self {
            username: username.to_string(),
            hashtag: format!("{}_{}", base, username),
        }
    }
}

// ── Post sample ───────────────────────────────────────────────────────────────

/// What one visited post contributed. Folded into a verdict, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct PostSample {
    pub handle: String,
    pub raw_timestamp_text: Option<String>,
    pub parsed_instant: Option<DateTime<Utc>>,
    pub parse_error: Option<String>,
    /// The detail view never loaded (retries exhausted or unreachable).
    pub load_failed: bool,
    /// The detail view bounced to the login page.
    pub login_wall: bool,
}

impl PostSample {
    pub fn parsed(handle: String, raw: String, instant: DateTime<Utc>) -> Self {
        Self {
            handle,
            raw_timestamp_text: Some(raw),
            parsed_instant: Some(instant),
            parse_error: None,
            load_failed: false,
            login_wall: false,
        }
    }

    pub fn unparsed(handle: String, raw: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            handle,
            raw_timestamp_text: raw,
            parsed_instant: None,
            parse_error: Some(reason.into()),
            load_failed: false,
            login_wall: false,
        }
    }

    pub fn load_failure(handle: String, reason: impl Into<String>) -> Self {
        Self {
            handle,
            raw_timestamp_text: None,
            parsed_instant: None,
            parse_error: Some(reason.into()),
            load_failed: true,
            login_wall: false,
        }
    }

    pub fn login_redirect(handle: String, landed: &str) -> Self {
        Self {
            login_wall: true,
            ..Self::load_failure(handle, format!("redirected to the login wall ({})", landed))
        }
    }
}

// ── Verdict ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Success,
    NoPosts,
    Partial,
    Error,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Success => "success",
            VerdictStatus::NoPosts => "no_posts",
            VerdictStatus::Partial => "partial",
            VerdictStatus::Error => "error",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            VerdictStatus::Success => "✅",
            VerdictStatus::NoPosts => "📭",
            VerdictStatus::Partial => "⚠️",
            VerdictStatus::Error => "❌",
        }
    }
}

/// The per-username unit written to the result file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyVerdict {
    pub username: String,
    pub hashtag: String,
    #[serde(rename = "post_count")]
    pub posts_seen: usize,
    pub dates_found: usize,
    #[serde(rename = "most_recent_date", with = "rfc3339_opt")]
    pub most_recent_instant: Option<DateTime<Utc>>,
    /// Display text of the winning post, kept for humans only.
    pub most_recent_display: Option<String>,
    pub status: VerdictStatus,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl RecencyVerdict {
    pub fn display_hashtag(&self) -> String {
        format!("#{}", self.hashtag)
    }
}

mod rfc3339_opt {
    use super::*;
    use serde::Deserializer;

    pub fn serialize<S: Serializer>(v: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(dt) => s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

// ── Result set ────────────────────────────────────────────────────────────────

/// Verdicts in input order, serialised as a JSON object keyed by username.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    verdicts: Vec<RecencyVerdict>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a verdict; a repeated username replaces the earlier entry in place.
    pub fn insert(&mut self, verdict: RecencyVerdict) {
        match self.verdicts.iter_mut().find(|v| v.username == verdict.username) {
            Some(slot) => *slot = verdict,
            None => self.verdicts.push(verdict),
        }
    }

    #[cfg(test)]
    pub fn get(&self, username: &str) -> Option<&RecencyVerdict> {
        self.verdicts.iter().find(|v| v.username == username)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecencyVerdict> {
        self.verdicts.iter()
    }

    #[cfg(test)]
    pub fn usernames(&self) -> Vec<&str> {
        self.verdicts.iter().map(|v| v.username.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn count(&self, status: VerdictStatus) -> usize {
        self.verdicts.iter().filter(|v| v.status == status).count()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.verdicts.len()))?;
        for v in &self.verdicts {
            map.serialize_entry(&v.username, v)?;
        }
        map.end()
    }
}

// ── Session state ─────────────────────────────────────────────────────────────

/// Serialised browsing-context credentials. The cookie blob is owned by the
/// browser and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub cookies: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

impl SessionState {
    /// Non-empty blob; anything else is treated as no session at all.
    pub fn is_usable(&self) -> bool {
        match &self.cookies {
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
            _ => false,
        }
    }
}
