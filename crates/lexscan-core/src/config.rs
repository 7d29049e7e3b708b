use std::{collections::HashMap, path::Path, time::Duration};

use anyhow::{bail, Result};

/// Progress phrases shown while a job is in flight, cycled in order.
pub const DEFAULT_THINKING_PHRASES: &[&str] = &[
    "Reading your document...",
    "Identifying clauses...",
    "Scoring clause risk...",
    "Cross-checking red flags...",
    "Preparing your summary...",
];

pub const DEFAULT_TEXT_REPLY: &str = "Upload a contract (PDF) and we'll flag risky clauses.";

/// Full application configuration, from env first and `.env` second.
#[derive(Debug, Clone)]
pub struct Config {
    // External services
    pub analysis_api_url: String,
    pub highlight_api_url: String,
    pub request_timeout_s: u64,

    // Orchestrator
    pub poll_interval_ms: u64,
    pub thinking_phrases: Vec<String>,
    /// Bot reply to chat input that carries no file.
    pub text_reply: String,

    // Web
    pub web_bind: String,
    pub web_port: u16,
    pub max_upload_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

pub fn parse_dotenv_str(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().trim_matches('"');
            map.insert(k.trim().to_string(), v.to_string());
        }
    }
    map
}

fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_dotenv_str(&contents),
        Err(_) => HashMap::new(),
    }
}

fn parse_phrases(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_env_file(Path::new(".env"))
    }

    pub fn from_env_file(path: &Path) -> Result<Self> {
        let dotenv = parse_dotenv(path);
        let config = Self::from_lookup(|key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()));
        config.validate()?;
        Ok(config)
    }

    /// Build from an arbitrary key lookup; missing or unparseable values fall
    /// back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get_str = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let get_u64 = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let get_u16 = |key: &str, default: u16| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let thinking_phrases = lookup("THINKING_PHRASES")
            .map(|raw| parse_phrases(&raw))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| {
                DEFAULT_THINKING_PHRASES
                    .iter()
                    .map(|p| p.to_string())
                    .collect()
            });

        Config {
            analysis_api_url: get_str("ANALYSIS_API_URL", "http://0.0.0.0:8000"),
            highlight_api_url: get_str("HIGHLIGHT_API_URL", "http://127.0.0.1:8001"),
            request_timeout_s: get_u64("REQUEST_TIMEOUT_S", 120),
            poll_interval_ms: get_u64("POLL_INTERVAL_MS", 1000),
            thinking_phrases,
            text_reply: get_str("TEXT_REPLY", DEFAULT_TEXT_REPLY),
            web_bind: get_str("WEB_BIND", "127.0.0.1"),
            web_port: get_u16("WEB_PORT", 3232),
            max_upload_mb: get_u64("MAX_UPLOAD_MB", 50),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (key, url) in [
            ("ANALYSIS_API_URL", &self.analysis_api_url),
            ("HIGHLIGHT_API_URL", &self.highlight_api_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("{key} must be an http(s) URL, got {url:?}");
            }
        }
        if self.poll_interval_ms == 0 {
            bail!("POLL_INTERVAL_MS must be positive");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_service_constants() {
        let c = Config::default();
        assert_eq!(c.analysis_api_url, "http://0.0.0.0:8000");
        assert_eq!(c.highlight_api_url, "http://127.0.0.1:8001");
        assert_eq!(c.poll_interval(), Duration::from_secs(1));
        assert_eq!(c.thinking_phrases.len(), DEFAULT_THINKING_PHRASES.len());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn lookup_overrides_and_bad_numbers_fall_back() {
        let c = Config::from_lookup(|k| match k {
            "POLL_INTERVAL_MS" => Some("250".into()),
            "WEB_PORT" => Some("not-a-port".into()),
            "THINKING_PHRASES" => Some(" One | Two ||Three ".into()),
            _ => None,
        });
        assert_eq!(c.poll_interval_ms, 250);
        assert_eq!(c.web_port, 3232);
        assert_eq!(c.thinking_phrases, ["One", "Two", "Three"]);
    }

    #[test]
    fn empty_phrase_override_keeps_defaults() {
        let c = Config::from_lookup(|k| (k == "THINKING_PHRASES").then(|| " | ".to_string()));
        assert_eq!(c.thinking_phrases.len(), DEFAULT_THINKING_PHRASES.len());
    }

    #[test]
    fn dotenv_parsing_skips_comments() {
        let map = parse_dotenv_str("# comment\n\nANALYSIS_API_URL = \"http://x:1\"\nJUNK\n");
        assert_eq!(map.get("ANALYSIS_API_URL").map(String::as_str), Some("http://x:1"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn reads_dotenv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "LEXSCAN_TEST_ONLY_KEY=1").unwrap();
        writeln!(file, "HIGHLIGHT_API_URL=ftp://nope").unwrap();
        // Invalid scheme must be rejected unless the env overrides it.
        if std::env::var("HIGHLIGHT_API_URL").is_err() {
            assert!(Config::from_env_file(file.path()).is_err());
        }
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let c = Config::from_lookup(|k| (k == "POLL_INTERVAL_MS").then(|| "0".to_string()));
        assert!(c.validate().is_err());
    }
}
