//! A single typed `Config` value loaded from `.auto-codex/config.json`.
//!
//! Closed-set fields are modeled as enums with a custom
//! case-insensitive `Deserialize` so unknown values fail at load time
//! with a field-pointing error, rather than passing through as bare
//! strings to be checked ad hoc at each call site. A missing config
//! file is not an error — every field has a built-in default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AutoCodexError, PreconditionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
}

impl Default for SandboxMode {
    fn default() -> Self {
        Self::WorkspaceWrite
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WebSearchPolicy {
    Cached,
    Live,
}

impl Default for WebSearchPolicy {
    fn default() -> Self {
        Self::Cached
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
    #[serde(rename = "xhigh")]
    XHigh,
}

impl Default for ReasoningEffort {
    fn default() -> Self {
        Self::XHigh
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderCheckMode {
    Off,
    Warn,
    Fail,
}

impl Default for PlaceholderCheckMode {
    fn default() -> Self {
        Self::Off
    }
}

/// Case-insensitive `Deserialize` for the closed-set config enums:
/// `"XHigh"` and `"xhigh"` both parse to `ReasoningEffort::XHigh`,
/// anything else fails fast with the field name in the error path.
macro_rules! case_insensitive_deserialize {
    ($ty:ty, { $($variant:literal => $value:expr),+ $(,)? }) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                let lowered = raw.to_ascii_lowercase();
                match lowered.as_str() {
                    $($variant => Ok($value),)+
                    other => Err(serde::de::Error::custom(format!(
                        concat!("unrecognized ", stringify!($ty), " value {:?}"),
                        other
                    ))),
                }
            }
        }
    };
}

case_insensitive_deserialize!(SandboxMode, {
    "read-only" => SandboxMode::ReadOnly,
    "readonly" => SandboxMode::ReadOnly,
    "workspace-write" => SandboxMode::WorkspaceWrite,
    "workspacewrite" => SandboxMode::WorkspaceWrite,
});

case_insensitive_deserialize!(WebSearchPolicy, {
    "cached" => WebSearchPolicy::Cached,
    "live" => WebSearchPolicy::Live,
});

case_insensitive_deserialize!(ReasoningEffort, {
    "none" => ReasoningEffort::None,
    "minimal" => ReasoningEffort::Minimal,
    "low" => ReasoningEffort::Low,
    "medium" => ReasoningEffort::Medium,
    "high" => ReasoningEffort::High,
    "xhigh" => ReasoningEffort::XHigh,
});

case_insensitive_deserialize!(PlaceholderCheckMode, {
    "off" => PlaceholderCheckMode::Off,
    "warn" => PlaceholderCheckMode::Warn,
    "fail" => PlaceholderCheckMode::Fail,
});

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct CommandsConfig {
    pub setup: Option<Vec<String>>,
    pub test: Option<Vec<String>>,
    pub lint: Option<Vec<String>>,
    pub format: Option<Vec<String>>,
    pub build: Option<Vec<String>>,
    /// If true, `test` runs via a shell; else as argv directly.
    pub test_shell: bool,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self { setup: None, test: None, lint: None, format: None, build: None, test_shell: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct CodexConfig {
    pub model: String,
    pub sandbox: SandboxMode,
    pub web_search: WebSearchPolicy,
    pub network_access: bool,
    pub reasoning_effort: ReasoningEffort,
    pub full_auto: bool,
    pub api_keys_env: Vec<String>,
    /// The executor binary to invoke. Not a recognized `codex.*` config
    /// key (the executable name is otherwise fixed); kept configurable
    /// here purely so tests can point it at a stub binary without
    /// touching `PATH`.
    #[serde(skip, default = "default_executable")]
    pub executable: String,
}

fn default_executable() -> String {
    "codex".to_string()
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5.2-codex".to_string(),
            sandbox: SandboxMode::default(),
            web_search: WebSearchPolicy::default(),
            network_access: false,
            reasoning_effort: ReasoningEffort::default(),
            full_auto: true,
            api_keys_env: Vec::new(),
            executable: "codex".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct PlanningConfig {
    pub ask_questions: bool,
    pub max_questions: u32,
    pub non_interactive: bool,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self { ask_questions: true, max_questions: 5, non_interactive: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct QualityConfig {
    pub placeholder_check: PlaceholderCheckMode,
    pub placeholder_tokens: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self { placeholder_check: PlaceholderCheckMode::default(), placeholder_tokens: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct Config {
    pub agents: usize,
    pub commands: CommandsConfig,
    pub codex: CodexConfig,
    pub planning: PlanningConfig,
    pub quality: QualityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agents: 4,
            commands: CommandsConfig::default(),
            codex: CodexConfig::default(),
            planning: PlanningConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl Config {
    /// Load `<repo_root>/.auto-codex/config.json`, falling back to
    /// defaults if the file is absent.
    pub fn load(repo_root: &Path) -> Result<Self, AutoCodexError> {
        let path = repo_root.join(".auto-codex").join("config.json");
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| AutoCodexError::Precondition {
                kind: PreconditionKind::InvalidConfig,
                message: format!("invalid config at {}: {e}", path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(AutoCodexError::from(e)),
        }
    }

    /// Clamp a requested worker count into `[1, 16]`.
    pub fn clamp_workers(requested: usize) -> usize {
        requested.clamp(1, 16)
    }
}
