use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use feishu_mcp::McpServerConfig;
use feishu_notify::{redact_url, SecurityManager, SecurityMode};

use crate::error::{RootError, RootResult};

pub const ENV_WEBHOOK_URL: &str = "FEISHU_WEBHOOK_URL";
pub const ENV_SECRET: &str = "FEISHU_SECRET";
pub const ENV_SECURITY_TYPE: &str = "FEISHU_SECURITY_TYPE";
pub const ENV_KEYWORDS: &str = "FEISHU_KEYWORDS";

/// Webhook and security settings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeishuConfig {
    /// Custom-bot webhook URL. Its last path segment is the access token.
    #[serde(default)]
    pub webhook_url: String,

    /// One of `none`, `signature`, `keyword`.
    #[serde(default = "default_security_type")]
    pub security_type: String,

    /// Signing secret, required for `signature`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Required for `keyword`; a message must contain at least one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

fn default_security_type() -> String {
    SecurityMode::None.as_str().to_string()
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            security_type: default_security_type(),
            secret: None,
            keywords: Vec::new(),
        }
    }
}

impl std::fmt::Debug for FeishuConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeishuConfig")
            .field("webhook_url", &redact_url(&self.webhook_url))
            .field("security_type", &self.security_type)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("keywords", &self.keywords)
            .finish()
    }
}

impl FeishuConfig {
    pub fn security_mode(&self) -> RootResult<SecurityMode> {
        Ok(SecurityMode::from_str(&self.security_type)?)
    }

    /// Build the security manager these settings describe. Not validated.
    pub fn security_manager(&self) -> RootResult<SecurityManager> {
        Ok(SecurityManager::new(
            self.security_mode()?,
            self.secret.clone(),
            self.keywords.clone(),
        ))
    }
}

/// MCP handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpConfig {
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_server_version")]
    pub server_version: String,

    #[serde(default = "default_instructions")]
    pub instructions: String,
}

fn default_server_name() -> String {
    "mcp-feishu".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_instructions() -> String {
    feishu_mcp::DEFAULT_INSTRUCTIONS.to_string()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            server_version: default_server_version(),
            instructions: default_instructions(),
        }
    }
}

impl McpConfig {
    pub fn to_server_config(&self) -> McpServerConfig {
        McpServerConfig {
            server_name: self.server_name.clone(),
            server_version: self.server_version.clone(),
            instructions: self.instructions.clone(),
        }
    }
}

/// Top-level configuration.
///
/// Built from the environment, with gaps filled from a TOML (or `.json`)
/// file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub feishu: FeishuConfig,

    #[serde(default)]
    pub mcp: McpConfig,
}

/// Where configuration may come from.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file. Must exist when given.
    pub config_path: Option<PathBuf>,
    /// Never consult the default config file.
    pub env_only: bool,
}

impl AppConfig {
    /// Read settings through `get`, usually `std::env::var`. Empty values
    /// count as unset.
    pub fn from_env_with<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        Self {
            feishu: FeishuConfig {
                webhook_url: get(ENV_WEBHOOK_URL).unwrap_or_default(),
                security_type: get(ENV_SECURITY_TYPE).unwrap_or_else(default_security_type),
                secret: get(ENV_SECRET),
                keywords: get(ENV_KEYWORDS)
                    .map(|raw| parse_keywords(&raw))
                    .unwrap_or_default(),
            },
            mcp: McpConfig::default(),
        }
    }

    /// Load a config file. TOML unless the extension is `.json`.
    pub fn load_file(path: &Path) -> RootResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RootError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        if is_json(path) {
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(toml::from_str(&contents)?)
        }
    }

    /// Environment wins; the file fills what the environment left empty.
    /// The file's security type only applies while the environment says
    /// `none`.
    pub fn merge(env: Self, file: Self) -> Self {
        let env_feishu = env.feishu;
        let file_feishu = file.feishu;

        let security_type = if env_feishu.security_type == SecurityMode::None.as_str()
            && !file_feishu.security_type.is_empty()
        {
            file_feishu.security_type
        } else {
            env_feishu.security_type
        };

        Self {
            feishu: FeishuConfig {
                webhook_url: if env_feishu.webhook_url.is_empty() {
                    file_feishu.webhook_url
                } else {
                    env_feishu.webhook_url
                },
                security_type,
                secret: env_feishu
                    .secret
                    .filter(|s| !s.is_empty())
                    .or(file_feishu.secret),
                keywords: if env_feishu.keywords.is_empty() {
                    file_feishu.keywords
                } else {
                    env_feishu.keywords
                },
            },
            mcp: file.mcp,
        }
    }

    /// Load from the process environment and, when needed, a config file.
    pub fn load(options: &LoadOptions) -> RootResult<Self> {
        Self::load_with(options, |key| std::env::var(key).ok())
    }

    /// Load using `get` as the environment.
    ///
    /// The file is only consulted when the environment has no webhook URL.
    /// A missing default file is not an error; a missing explicit one is.
    pub fn load_with<F>(options: &LoadOptions, get: F) -> RootResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Self::from_env_with(get);
        if !env.feishu.webhook_url.is_empty() {
            tracing::info!("configuration loaded from environment");
            return Ok(env);
        }

        let path = match (&options.config_path, options.env_only) {
            (Some(path), _) => path.clone(),
            (None, true) => return Ok(env),
            (None, false) => {
                let path = Self::default_config_path();
                if !path.exists() {
                    tracing::debug!(path = %path.display(), "no default config file");
                    return Ok(env);
                }
                path
            }
        };

        tracing::info!(path = %path.display(), "filling configuration from file");
        let file = Self::load_file(&path)?;
        Ok(Self::merge(env, file))
    }

    /// Write this configuration, TOML unless the extension is `.json`.
    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check the settings are complete and consistent.
    pub fn validate(&self) -> RootResult<()> {
        let url = self.feishu.webhook_url.trim();
        if url.is_empty() {
            return Err(RootError::Config(format!(
                "webhook_url must not be empty (set {} or provide a config file)",
                ENV_WEBHOOK_URL
            )));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(RootError::Config(
                "webhook_url must be an http(s) URL".into(),
            ));
        }
        self.feishu.security_manager()?.validate()?;
        if self.mcp.server_name.trim().is_empty() {
            return Err(RootError::Config("mcp.server_name must not be empty".into()));
        }
        Ok(())
    }

    /// A starting point for `init`.
    pub fn example() -> Self {
        Self {
            feishu: FeishuConfig {
                webhook_url: "https://open.feishu.cn/open-apis/bot/v2/hook/your-webhook-token".into(),
                ..FeishuConfig::default()
            },
            mcp: McpConfig::default(),
        }
    }

    /// Human-readable summary with the token and secret hidden.
    pub fn redacted_summary(&self) -> String {
        let mut lines = vec![
            format!("webhook_url:   {}", redact_url(&self.feishu.webhook_url)),
            format!("security_type: {}", self.feishu.security_type),
            format!(
                "secret:        {}",
                if self.feishu.secret.is_some() { "set" } else { "unset" }
            ),
        ];
        if !self.feishu.keywords.is_empty() {
            lines.push(format!("keywords:      {}", self.feishu.keywords.join(", ")));
        }
        lines.push(format!(
            "server:        {} {}",
            self.mcp.server_name, self.mcp.server_version
        ));
        lines.join("\n")
    }

    /// Default config file, `config.toml` in the working directory.
    pub fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }
}

/// `FEISHU_KEYWORDS` is a JSON array of strings or a comma-separated list.
fn parse_keywords(raw: &str) -> Vec<String> {
    let parsed = serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|_| {
        raw.split(',').map(str::to_string).collect()
    });
    parsed
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
