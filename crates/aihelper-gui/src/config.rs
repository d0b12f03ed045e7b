use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: String,
    pub max_concurrency: usize,
    pub gui_enabled: bool,
    pub auth_token: Option<String>,
    pub max_upload_bytes: usize,
    /// Core configuration file; `None` defers to `AIHELPER_CONFIG` / ./config.toml.
    pub config_path: Option<PathBuf>,
}

impl AppConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";
    const DEFAULT_MAX_UPLOAD_MB: usize = 20;

    pub fn from_env() -> Result<Self> {
        let listen_addr =
            env::var("GUI_LISTEN_ADDR").unwrap_or_else(|_| Self::DEFAULT_LISTEN_ADDR.to_string());

        let max_concurrency = env::var("GUI_MAX_CONCURRENCY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|nz| nz.get())
                    .unwrap_or(4)
            });

        let gui_enabled = env::var("GUI_ENABLE_GUI")
            .ok()
            .map(|value| {
                parse_bool(&value).with_context(|| "GUI_ENABLE_GUI must be true or false")
            })
            .transpose()?
            .unwrap_or(true);

        let auth_token = env::var("GUI_AUTH_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let max_upload_mb = env::var("GUI_MAX_UPLOAD_MB")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(Self::DEFAULT_MAX_UPLOAD_MB);

        let config_path = env::var("GUI_CONFIG_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            listen_addr,
            max_concurrency,
            gui_enabled,
            auth_token,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            config_path,
        })
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool(" Yes "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
