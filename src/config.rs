use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Caller-supplied TTLs must fall inside this window.
pub const MIN_TTL: Duration = Duration::from_secs(60 * 60);
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_MAX_RENDER_BYTES: usize = 256 * 1024;

/// Runtime knobs, read once at startup from `CLIPD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `CLIPD_LISTEN`
    pub listen: SocketAddr,
    /// `CLIPD_DATA_DIR`; root of the filesystem store.
    pub data_dir: PathBuf,
    /// `CLIPD_DEFAULT_TTL`; applied when the uploader does not pick one.
    pub default_ttl: Duration,
    /// `CLIPD_SLUG_LENGTH`
    pub slug_length: usize,
    /// `CLIPD_MAX_BODY_BYTES`; upload cap, pre-base64-inflation.
    pub max_body_bytes: usize,
    /// `CLIPD_MAX_RENDER_BYTES`; inline HTML rendering threshold.
    pub max_render_bytes: usize,
    /// `CLIPD_API_KEYS`; comma separated; empty disables upload auth.
    pub api_keys: Vec<String>,
    /// `CLIPD_S3_BUCKET`; selects the object-store backend when set.
    pub s3_bucket: Option<String>,
    /// `CLIPD_S3_PREFIX`
    pub s3_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: SocketAddr::from(([0, 0, 0, 0], 8820)),
            data_dir: PathBuf::from("./data"),
            default_ttl: DEFAULT_TTL,
            slug_length: crate::slug::DEFAULT_LENGTH,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_render_bytes: DEFAULT_MAX_RENDER_BYTES,
            api_keys: Vec::new(),
            s3_bucket: None,
            s3_prefix: String::new(),
        }
    }
}

impl Config {
    /// Build a config from the environment, falling back to defaults and
    /// logging (not failing on) unparseable values.
    pub fn from_env() -> Config {
        let defaults = Config::default();

        Config {
            listen: env_parsed("CLIPD_LISTEN", defaults.listen),
            data_dir: std::env::var("CLIPD_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            default_ttl: env_duration("CLIPD_DEFAULT_TTL", defaults.default_ttl),
            slug_length: env_parsed("CLIPD_SLUG_LENGTH", defaults.slug_length),
            max_body_bytes: env_parsed("CLIPD_MAX_BODY_BYTES", defaults.max_body_bytes),
            max_render_bytes: env_parsed("CLIPD_MAX_RENDER_BYTES", defaults.max_render_bytes),
            api_keys: std::env::var("CLIPD_API_KEYS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|key| !key.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            s3_bucket: std::env::var("CLIPD_S3_BUCKET").ok().filter(|b| !b.is_empty()),
            s3_prefix: std::env::var("CLIPD_S3_PREFIX").unwrap_or_default(),
        }
    }

    pub fn auth_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("ignoring unparseable {key}={raw:?}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_duration(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(raw) => match humantime::parse_duration(&raw) {
            Ok(value) => value,
            Err(_) => {
                log::warn!("ignoring unparseable {key}={raw:?}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.default_ttl, Duration::from_secs(86_400));
        assert_eq!(config.slug_length, 5);
        assert_eq!(config.max_body_bytes, 5 * 1024 * 1024);
        assert_eq!(config.max_render_bytes, 256 * 1024);
        assert!(!config.auth_enabled());
    }

    #[test]
    fn ttl_window_bounds() {
        assert_eq!(MIN_TTL, Duration::from_secs(3_600));
        assert_eq!(MAX_TTL, Duration::from_secs(604_800));
        assert!(MIN_TTL <= DEFAULT_TTL && DEFAULT_TTL <= MAX_TTL);
    }
}
