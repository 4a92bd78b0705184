//! Loader for workspace configuration with YAML + environment overlays.
//!
//! Sources are merged in this order, later ones winning:
//!
//! 1. built-in defaults (every section below has them, so an empty file is valid)
//! 2. an optional YAML/TOML/JSON file (`sibyl.yaml` by convention)
//! 3. inline YAML snippets (tests)
//! 4. `SIBYL__SECTION__FIELD` environment variables
//!
//! After merging, every string value gets `${VAR}` expansion, followed
//! recursively up to a fixed depth so cyclic references terminate.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

/// Placeholder substituted with the form-encoded query in `capture.url_template`.
pub const QUERY_PLACEHOLDER: &str = "{query}";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
pub struct SibylConfig {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum LlmConfig {
    /// Any server speaking the OpenAI chat-completions protocol.
    Openai {
        #[serde(default = "default_model")]
        model: String,
        #[serde(default)]
        auth_token: String,
        #[serde(default = "default_openai_endpoint")]
        endpoint: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
    },
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig::Openai {
            model: default_model(),
            auth_token: String::new(),
            endpoint: default_openai_endpoint(),
            temperature: None,
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.5-pro".into()
}
fn default_openai_endpoint() -> String {
    "http://localhost:2048/v1".into()
}
fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> usize {
    5
}

/// How the research agent reaches the out-of-process search capability.
#[derive(Debug, Deserialize)]
pub struct SearchConfig {
    /// Program followed by leading arguments; the query is appended last.
    #[serde(default = "default_search_command")]
    pub command: Vec<String>,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            command: default_search_command(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_command() -> Vec<String> {
    vec!["sibyl-search".into(), "prompt".into()]
}
fn default_search_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Persistent browser profile so logins and consent survive across runs.
    #[serde(default = "default_profile_dir")]
    pub profile_dir: Option<PathBuf>,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    /// Human-like random delays around navigation and clicks.
    #[serde(default = "default_true")]
    pub pacing: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: true,
            profile_dir: default_profile_dir(),
            history_file: default_history_file(),
            pacing: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_webdriver_url() -> String {
    "http://localhost:9515".into()
}
fn default_profile_dir() -> Option<PathBuf> {
    Some(PathBuf::from("./sibyl_session/profile"))
}
fn default_history_file() -> PathBuf {
    PathBuf::from("./sibyl_session/prompt_history.txt")
}

#[derive(Debug, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_url_template")]
    pub url_template: String,
    #[serde(default = "default_region_selector")]
    pub region_selector: String,
    #[serde(default = "default_new_chat_selector")]
    pub new_chat_selector: String,
    #[serde(default = "default_input_selector")]
    pub input_selector: String,
    #[serde(default = "default_consent_button_text")]
    pub consent_button_text: Option<String>,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_locate_timeout_secs")]
    pub locate_timeout_secs: u64,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            region_selector: default_region_selector(),
            new_chat_selector: default_new_chat_selector(),
            input_selector: default_input_selector(),
            consent_button_text: default_consent_button_text(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            locate_timeout_secs: default_locate_timeout_secs(),
            extractor: ExtractorConfig::default(),
            completion: CompletionConfig::default(),
        }
    }
}

fn default_url_template() -> String {
    "https://google.com/search?q={query}&udm=50".into()
}
fn default_region_selector() -> String {
    r#"div[data-subtree="aimc"]"#.into()
}
fn default_new_chat_selector() -> String {
    r#"button[aria-label="Start new search"]"#.into()
}
fn default_input_selector() -> String {
    r#"textarea[placeholder="Ask anything"]"#.into()
}
fn default_consent_button_text() -> Option<String> {
    Some("Accept all".into())
}
fn default_navigation_timeout_secs() -> u64 {
    60
}
fn default_locate_timeout_secs() -> u64 {
    90
}

/// Class discriminators of the three block kinds inside a response region.
#[derive(Debug, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_heading_class")]
    pub heading_class: String,
    #[serde(default = "default_paragraph_class")]
    pub paragraph_class: String,
    #[serde(default = "default_list_class")]
    pub list_class: String,
    #[serde(default = "default_noise_pattern")]
    pub noise_pattern: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            heading_class: default_heading_class(),
            paragraph_class: default_paragraph_class(),
            list_class: default_list_class(),
            noise_pattern: default_noise_pattern(),
        }
    }
}

fn default_heading_class() -> String {
    "otQkpb".into()
}
fn default_paragraph_class() -> String {
    "Y3BBE".into()
}
fn default_list_class() -> String {
    "U6u95".into()
}
fn default_noise_pattern() -> String {
    r"Sv6Kpe\[.*?\]".into()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStrategy {
    #[default]
    Dom,
    Network,
}

#[derive(Debug, Deserialize)]
pub struct CompletionConfig {
    #[serde(default)]
    pub strategy: CompletionStrategy,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stable_polls")]
    pub stable_polls: u32,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_stream_start_timeout_secs")]
    pub stream_start_timeout_secs: u64,
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    #[serde(default = "default_stream_url_pattern")]
    pub stream_url_pattern: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            strategy: CompletionStrategy::default(),
            poll_interval_ms: default_poll_interval_ms(),
            stable_polls: default_stable_polls(),
            max_wait_secs: default_max_wait_secs(),
            stream_start_timeout_secs: default_stream_start_timeout_secs(),
            quiet_period_ms: default_quiet_period_ms(),
            stream_url_pattern: default_stream_url_pattern(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_stable_polls() -> u32 {
    6
}
fn default_max_wait_secs() -> u64 {
    120
}
fn default_stream_start_timeout_secs() -> u64 {
    10
}
fn default_quiet_period_ms() -> u64 {
    3000
}
fn default_stream_url_pattern() -> String {
    r"/async/(folsrch|aim)|batchexecute".into()
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub stderr: bool,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            format: default_log_format(),
            stderr: true,
            filter: default_log_filter(),
        }
    }
}

fn default_log_format() -> String {
    "text".into()
}
fn default_log_filter() -> String {
    "info".into()
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

impl SibylConfig {
    /// Reject values no run could succeed with.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.search.command.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(LoadError::Invalid(
                "search.command must name a program".into(),
            ));
        }
        if !self.capture.url_template.contains(QUERY_PLACEHOLDER) {
            return Err(LoadError::Invalid(format!(
                "capture.url_template must contain {QUERY_PLACEHOLDER}"
            )));
        }
        if self.capture.completion.poll_interval_ms == 0 {
            return Err(LoadError::Invalid(
                "capture.completion.poll_interval_ms must be positive".into(),
            ));
        }
        if self.capture.completion.stable_polls == 0 {
            return Err(LoadError::Invalid(
                "capture.completion.stable_polls must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Builder hides the `config` crate wiring (YAML + env overrides).
pub struct SibylConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for SibylConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SibylConfigLoader {
    /// Start from the built-in defaults; `SIBYL__` env overrides are applied at [`load`](Self::load).
    ///
    /// ```
    /// use sibyl_config::SibylConfigLoader;
    ///
    /// let config = SibylConfigLoader::new()
    ///     .with_yaml_str("version: '1'")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.version.as_deref(), Some("1"));
    /// assert_eq!(config.research.max_iterations, 5);
    /// assert_eq!(config.search.timeout_secs, 180);
    /// ```
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
        }
    }

    /// Attach a YAML/TOML/JSON file that must exist; the format is inferred by suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Attach a file that may be absent, so deployments can rely purely on the environment.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Allow tests/CLI to merge inline YAML snippets.
    ///
    /// ```
    /// use sibyl_config::{CompletionStrategy, SibylConfigLoader};
    ///
    /// let cfg = SibylConfigLoader::new()
    ///     .with_yaml_str(
    ///         r#"
    /// capture:
    ///   completion:
    ///     strategy: network
    ///     quiet_period_ms: 1500
    /// "#,
    ///     )
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(cfg.capture.completion.strategy, CompletionStrategy::Network);
    /// assert_eq!(cfg.capture.completion.quiet_period_ms, 1500);
    /// assert_eq!(cfg.capture.completion.stable_polls, 6);
    /// ```
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Consume the builder and deserialize the merged sources into strongly typed config.
    ///
    /// ```
    /// use sibyl_config::{LlmConfig, SibylConfigLoader};
    ///
    /// unsafe { std::env::set_var("SIBYL_DOC_TOKEN", "injected-from-env"); }
    ///
    /// let config = SibylConfigLoader::new()
    ///     .with_yaml_str(r#"
    /// llm:
    ///   provider: "openai"
    ///   model: "gpt-4o"
    ///   auth_token: "${SIBYL_DOC_TOKEN}"
    /// "#)
    ///     .load()
    ///     .expect("valid configuration");
    ///
    /// let LlmConfig::Openai { model, auth_token, endpoint, .. } = &config.llm;
    /// assert_eq!(model, "gpt-4o");
    /// assert_eq!(auth_token, "injected-from-env");
    /// assert_eq!(endpoint, "http://localhost:2048/v1");
    ///
    /// unsafe { std::env::remove_var("SIBYL_DOC_TOKEN"); }
    /// ```
    pub fn load(self) -> Result<SibylConfig, LoadError> {
        let cfg = self
            .builder
            .add_source(
                Environment::with_prefix("SIBYL")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        // Re-enter the `config` deserializer so env strings like "5" or "true"
        // still coerce into numeric and boolean fields.
        let expanded = serde_json::to_string(&v).map_err(|e| ConfigError::Message(e.to_string()))?;
        let typed: SibylConfig = Config::builder()
            .add_source(File::from_str(&expanded, config::FileFormat::Json))
            .build()?
            .try_deserialize()?;
        typed.validate()?;

        Ok(typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_simple_string() {
        temp_env::with_var("FOO", Some("bar"), || {
            let mut v = json!("prefix-${FOO}-suffix");
            expand_env_in_value(&mut v);
            assert_eq!(v, json!("prefix-bar-suffix"));
        });
    }

    #[test]
    fn expands_inside_command_arrays() {
        temp_env::with_var("SIBYL_BIN", Some("/opt/sibyl/bin"), || {
            let mut v = json!({ "command": ["${SIBYL_BIN}/sibyl-search", "prompt"] });
            expand_env_in_value(&mut v);
            assert_eq!(
                v,
                json!({ "command": ["/opt/sibyl/bin/sibyl-search", "prompt"] })
            );
        });
    }

    #[test]
    fn stops_on_cycles() {
        temp_env::with_vars([("A", Some("${B}")), ("B", Some("${A}"))], || {
            let mut v = json!("x=${A}-y");
            expand_env_in_value(&mut v);
            let s = v.as_str().unwrap();
            assert!(s.starts_with("x=") && s.ends_with("-y"));
            assert!(s.contains("${"));
        });
    }

    #[test]
    fn unknown_vars_are_left_as_is() {
        let mut v = json!("hi-${SIBYL_DOES_NOT_EXIST}");
        expand_env_in_value(&mut v);
        assert_eq!(v, json!("hi-${SIBYL_DOES_NOT_EXIST}"));
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = SibylConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.capture.extractor.heading_class, "otQkpb");
        assert_eq!(cfg.capture.completion.strategy, CompletionStrategy::Dom);
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let mut cfg = SibylConfig::default();
        cfg.capture.url_template = "https://example.com/search".into();
        assert!(matches!(cfg.validate(), Err(LoadError::Invalid(_))));
    }

    #[test]
    fn empty_command_is_rejected() {
        let mut cfg = SibylConfig::default();
        cfg.search.command.clear();
        assert!(matches!(cfg.validate(), Err(LoadError::Invalid(_))));
    }
}
