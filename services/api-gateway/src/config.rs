//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The upstream token is loaded from the UPSTREAM_TOKEN env var or
//! token_file, never stored in the TOML directly.

use common::Secret;
use handler_pool::PoolSettings;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Path to a file holding the upstream bearer token
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
}

/// Header set on every upstream request
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Token resolution order:
    /// 1. UPSTREAM_TOKEN env var
    /// 2. token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(token) = std::env::var("UPSTREAM_TOKEN") {
            config.proxy.token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.proxy.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.proxy.token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let url = reqwest::Url::parse(&self.proxy.upstream_url).map_err(|e| {
            common::Error::Config(format!(
                "upstream_url is not a valid URL ({e}): {}",
                self.proxy.upstream_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                self.proxy.upstream_url
            )));
        }

        if self.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        self.pool
            .lifetime()
            .and_then(|_| self.pool.cleanup_interval())
            .map_err(|e| common::Error::Config(format!("[pool] {e}")))?;

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("api-gateway.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    const VALID_TOML: &str = r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://orders.internal"

[pool]
lifetime_secs = 30
cleanup_interval_secs = 5

[[headers]]
name = "x-api-version"
value = "2"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("UPSTREAM_TOKEN") };
        let file = write_config(VALID_TOML);

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.proxy.upstream_url, "https://orders.internal");
        assert_eq!(config.proxy.timeout_secs, 60);
        assert_eq!(config.proxy.max_connections, 1000);
        assert_eq!(config.pool.lifetime().unwrap(), Duration::from_secs(30));
        assert_eq!(config.pool.cleanup_interval().unwrap(), Duration::from_secs(5));
        assert!(config.pool.keep_cookie_store);
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].name, "x-api-version");
        assert!(config.proxy.token.is_none());
    }

    #[test]
    fn test_pool_table_is_optional() {
        let file = write_config(
            r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "http://localhost:9000"
"#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.pool.lifetime().unwrap(), Duration::from_secs(120));
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/api-gateway.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = write_config("not valid {{{{ toml");
        assert!(matches!(
            Config::load(file.path()),
            Err(common::Error::Toml(_))
        ));
    }

    #[test]
    fn test_rejects_non_http_upstream() {
        let file = write_config(
            r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "ftp://orders.internal"
"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("upstream_url"), "got: {err}");
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let file = write_config(
            r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://orders.internal"
timeout_secs = 0
"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"), "got: {err}");
    }

    #[test]
    fn test_rejects_negative_cleanup_interval() {
        let file = write_config(
            r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://orders.internal"

[pool]
cleanup_interval_secs = -1
"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("cleanup_interval_secs"), "got: {err}");
    }

    #[test]
    fn test_token_from_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut token_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(token_file, "file-token").unwrap();
        let file = write_config(&format!(
            r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://orders.internal"
token_file = "{}"
"#,
            token_file.path().display()
        ));

        unsafe { remove_env("UPSTREAM_TOKEN") };
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.proxy.token.as_ref().unwrap().expose(), "file-token");

        unsafe { set_env("UPSTREAM_TOKEN", "env-token") };
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.proxy.token.as_ref().unwrap().expose(), "env-token");
        unsafe { remove_env("UPSTREAM_TOKEN") };
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("UPSTREAM_TOKEN", "very-secret") };
        let file = write_config(VALID_TOML);
        let config = Config::load(file.path()).unwrap();
        unsafe { remove_env("UPSTREAM_TOKEN") };

        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        assert_eq!(
            Config::resolve_path(Some("/custom/path.toml")),
            PathBuf::from("/custom/path.toml")
        );

        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };

        assert_eq!(Config::resolve_path(None), PathBuf::from("api-gateway.toml"));
    }
}
