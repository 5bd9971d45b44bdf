// src/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const ENV_QUERIES_PATH: &str = "SEARCH_QUERIES_PATH";

/// Process configuration, read once at startup. Every API key is independently
/// optional: a missing key disables the corresponding agent instead of failing
/// the pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    pub comtrade_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,

    pub scheduler_enabled: bool,
    pub scheduler_daily_hour: u8,
    pub scheduler_daily_minute: u8,
    /// Missed firings older than this are dropped instead of run late.
    pub misfire_grace_secs: u64,

    /// Self-imposed ceiling on Comtrade calls per day.
    pub comtrade_daily_call_limit: u64,
    /// Stop fetching once this many calls were already recorded today.
    pub comtrade_call_threshold: u64,

    pub data_dir: PathBuf,
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            comtrade_api_key: None,
            openai_api_key: None,
            gemini_api_key: None,
            scheduler_enabled: true,
            scheduler_daily_hour: 2,
            scheduler_daily_minute: 0,
            misfire_grace_secs: 3600,
            comtrade_daily_call_limit: 500,
            comtrade_call_threshold: 480,
            data_dir: PathBuf::from("data"),
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Settings {
    /// Build settings from environment variables, falling back to defaults.
    /// `.env` loading (dotenvy) happens in the entrypoint before this runs.
    pub fn from_env() -> Self {
        let d = Settings::default();
        Self {
            comtrade_api_key: non_empty_var("COMTRADE_API_KEY"),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            scheduler_enabled: bool_var("SCHEDULER_ENABLED", d.scheduler_enabled),
            scheduler_daily_hour: num_var("SCHEDULER_DAILY_HOUR", d.scheduler_daily_hour),
            scheduler_daily_minute: num_var("SCHEDULER_DAILY_MINUTE", d.scheduler_daily_minute),
            misfire_grace_secs: num_var("SCHEDULER_MISFIRE_GRACE_SECS", d.misfire_grace_secs),
            comtrade_daily_call_limit: num_var("COMTRADE_DAILY_CALL_LIMIT", d.comtrade_daily_call_limit),
            comtrade_call_threshold: num_var("COMTRADE_CALL_THRESHOLD", d.comtrade_call_threshold),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(d.bind_addr),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn bool_var(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn num_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Load the AI-search query list from an explicit path. Supports TOML or JSON.
pub fn load_queries_from(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading search queries from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_queries(&content, ext.as_str())
}

/// Load the query list using env var + fallbacks:
/// 1) $SEARCH_QUERIES_PATH
/// 2) config/search_queries.toml
/// 3) config/search_queries.json
/// Empty list when nothing is configured; the watcher agent has a built-in set.
pub fn load_queries_default() -> Result<Vec<String>> {
    if let Ok(p) = std::env::var(ENV_QUERIES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_queries_from(&pb);
        } else {
            return Err(anyhow!("SEARCH_QUERIES_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/search_queries.toml");
    if toml_p.exists() {
        return load_queries_from(&toml_p);
    }
    let json_p = PathBuf::from("config/search_queries.json");
    if json_p.exists() {
        return load_queries_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_queries(s: &str, hint_ext: &str) -> Result<Vec<String>> {
    let try_toml = hint_ext == "toml" || s.contains("queries");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported search query list format"))
}

fn parse_toml(s: &str) -> Result<Vec<String>> {
    #[derive(serde::Deserialize)]
    struct TomlQueries {
        queries: Vec<String>,
    }
    let v: TomlQueries = toml::from_str(s)?;
    Ok(clean_list(v.queries))
}

fn parse_json(s: &str) -> Result<Vec<String>> {
    let v: Vec<String> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|x| x == t) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn dedup_trim_and_formats_work() {
        let toml = r#"queries = [" nearshoring textile ", "", "CBAM textile", "CBAM textile"]"#;
        let json = r#"["cotton prices", "  CBAM textile  ", ""]"#;
        let toml_out = parse_toml(toml).unwrap();
        assert_eq!(
            toml_out,
            vec!["nearshoring textile".to_string(), "CBAM textile".to_string()]
        );
        let json_out = parse_json(json).unwrap();
        assert_eq!(
            json_out,
            vec!["cotton prices".to_string(), "CBAM textile".to_string()]
        );
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        env::remove_var(ENV_QUERIES_PATH);

        let v = load_queries_default().unwrap();
        assert!(v.is_empty());

        let p_json = tmp.path().join("search_queries.json");
        std::fs::write(&p_json, r#"["X"]"#).unwrap();
        env::set_var(ENV_QUERIES_PATH, p_json.display().to_string());
        let v2 = load_queries_default().unwrap();
        assert_eq!(v2, vec!["X".to_string()]);
        env::remove_var(ENV_QUERIES_PATH);

        env::set_current_dir(&old).unwrap();
    }

    #[serial_test::serial]
    #[test]
    fn settings_read_env_overrides() {
        env::set_var("SCHEDULER_DAILY_HOUR", "5");
        env::set_var("COMTRADE_API_KEY", "  ");
        let s = Settings::from_env();
        assert_eq!(s.scheduler_daily_hour, 5);
        // blank keys count as absent
        assert!(s.comtrade_api_key.is_none());
        env::remove_var("SCHEDULER_DAILY_HOUR");
        env::remove_var("COMTRADE_API_KEY");
    }
}
