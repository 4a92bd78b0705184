//! Config → runtime objects.

use anyhow::{Context, Result};
use sibyl_agent::ProcessGateway;
use sibyl_common::observability::{LogConfig, LogFormat};
use sibyl_config::{
    BrowserConfig, CaptureConfig, CompletionStrategy, ExtractorConfig, LlmConfig, LoggingConfig,
    SearchConfig, SibylConfig, SibylConfigLoader,
};
use sibyl_drivers::DriverOptions;
use sibyl_drivers::sibyl_browser::pacing::Pacing;
use sibyl_llm::openai::OpenAiChatClient;
use sibyl_llm::traits::ChatClient;
use sibyl_web::{CaptureSettings, CompletionOptions, ExtractorProfile, Strategy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "sibyl.yaml";

/// Load `explicit` (must exist) or the optional `sibyl.yaml` in the working directory.
pub fn load_config(explicit: Option<&Path>) -> Result<SibylConfig> {
    let loader = match explicit {
        Some(path) => SibylConfigLoader::new().with_file(path),
        None => SibylConfigLoader::new().with_optional_file(DEFAULT_CONFIG_FILE),
    };
    loader.load().context("loading configuration")
}

pub fn log_config(app_name: &'static str, cfg: &LoggingConfig, debug: bool) -> LogConfig {
    LogConfig {
        app_name,
        log_dir: cfg.dir.clone(),
        emit_stderr: cfg.stderr,
        format: LogFormat::parse(&cfg.format),
        default_filter: if debug {
            "debug".to_string()
        } else {
            cfg.filter.clone()
        },
    }
}

pub fn build_chat_client(cfg: &LlmConfig) -> Result<Arc<dyn ChatClient>> {
    match cfg {
        LlmConfig::Openai {
            model,
            auth_token,
            endpoint,
            temperature,
            max_tokens,
            request_timeout_secs,
        } => {
            let client = OpenAiChatClient::new(endpoint, auth_token.clone(), model.clone())?
                .with_timeout(Duration::from_secs(*request_timeout_secs))
                .with_temperature(*temperature)
                .with_max_tokens(*max_tokens);
            Ok(Arc::new(client))
        }
    }
}

/// Prefer a binary sitting next to the running executable for bare names, so
/// an installed `sibyl` finds its sibling `sibyl-search` without `PATH` help.
pub fn resolve_program(program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.components().count() == 1 {
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let sibling = dir.join(format!("{program}{}", std::env::consts::EXE_SUFFIX));
            if sibling.is_file() {
                return sibling;
            }
        }
    }
    path.to_path_buf()
}

/// The search tool; `config_file` is forwarded so both binaries read the same settings.
pub fn build_gateway(cfg: &SearchConfig, config_file: Option<&Path>) -> Result<ProcessGateway> {
    let (program, args) = cfg
        .command
        .split_first()
        .context("search.command must name a program")?;
    let mut args: Vec<std::ffi::OsString> = args.iter().map(Into::into).collect();
    if let Some(file) = config_file {
        args.push("--config".into());
        args.push(file.into());
    }
    Ok(ProcessGateway::new(resolve_program(program))
        .with_args(args)
        .with_timeout(Duration::from_secs(cfg.timeout_secs)))
}

pub fn driver_options(cfg: &BrowserConfig, headful: bool) -> DriverOptions {
    DriverOptions {
        webdriver_url: cfg.webdriver_url.clone(),
        headless: cfg.headless && !headful,
        profile_dir: cfg.profile_dir.clone(),
        pacing: Pacing::new(cfg.pacing),
    }
}

pub fn extractor_profile(cfg: &ExtractorConfig) -> ExtractorProfile {
    ExtractorProfile {
        heading_class: cfg.heading_class.clone(),
        paragraph_class: cfg.paragraph_class.clone(),
        list_class: cfg.list_class.clone(),
        noise_pattern: cfg.noise_pattern.clone(),
    }
}

pub fn completion_options(cfg: &CaptureConfig) -> CompletionOptions {
    let c = &cfg.completion;
    CompletionOptions {
        strategy: match c.strategy {
            CompletionStrategy::Dom => Strategy::Dom,
            CompletionStrategy::Network => Strategy::Network,
        },
        locate_timeout: Duration::from_secs(cfg.locate_timeout_secs),
        poll_interval: Duration::from_millis(c.poll_interval_ms),
        stable_polls: c.stable_polls,
        max_wait: Duration::from_secs(c.max_wait_secs),
        stream_start_timeout: Duration::from_secs(c.stream_start_timeout_secs),
        quiet_period: Duration::from_millis(c.quiet_period_ms),
        stream_url_pattern: c.stream_url_pattern.clone(),
    }
}

pub fn capture_settings(cfg: &CaptureConfig) -> CaptureSettings {
    CaptureSettings {
        url_template: cfg.url_template.clone(),
        region_selector: cfg.region_selector.clone(),
        new_chat_selector: cfg.new_chat_selector.clone(),
        input_selector: cfg.input_selector.clone(),
        consent_button_text: cfg.consent_button_text.clone(),
        navigation_timeout: Duration::from_secs(cfg.navigation_timeout_secs),
        locate_timeout: Duration::from_secs(cfg.locate_timeout_secs),
    }
}
