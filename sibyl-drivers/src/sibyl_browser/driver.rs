use crate::sibyl_browser::{pacing::Pacing, page::SibylPage};
use anyhow::{Context, Result};
use fantoccini::{Client, ClientBuilder};
use serde_json::json;
use std::path::{Path, PathBuf};
use webdriver::capabilities::Capabilities;

/// Launch settings for a Chrome session behind chromedriver.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub webdriver_url: String,
    pub headless: bool,
    /// Persistent profile so cookies and consent choices survive restarts.
    pub profile_dir: Option<PathBuf>,
    pub pacing: Pacing,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            profile_dir: None,
            pacing: Pacing::default(),
        }
    }
}

/// Chrome arguments for a session launched with `options`.
pub fn chrome_arguments(options: &DriverOptions) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
        "--window-size=1920,1080".to_string(),
        "--lang=en-US".to_string(),
    ];
    if let Some(dir) = &options.profile_dir {
        args.push(format!("--user-data-dir={}", dir.display()));
    }
    if options.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    args
}

/// Create the profile directory and resolve it to an absolute path.
///
/// Chrome is started by chromedriver, which resolves a relative
/// `--user-data-dir` against its own working directory.
pub fn prepare_profile_dir(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating browser profile dir {}", dir.display()))?;
    std::fs::canonicalize(dir)
        .with_context(|| format!("resolving browser profile dir {}", dir.display()))
}

/// Thin wrapper around a `fantoccini` WebDriver client.
pub struct SibylDriver {
    pub client: Client,
    pacing: Pacing,
}

impl SibylDriver {
    /// Connect to a running WebDriver service and open a Chrome session.
    pub async fn new(mut options: DriverOptions) -> Result<Self> {
        if let Some(dir) = options.profile_dir.take() {
            options.profile_dir = Some(prepare_profile_dir(&dir)?);
        }

        let mut caps = Capabilities::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            json!({ "args": chrome_arguments(&options) }),
        );

        tracing::info!(
            target: "browser.driver",
            url = %options.webdriver_url,
            headless = options.headless,
            profile = ?options.profile_dir,
            "connecting to webdriver"
        );
        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&options.webdriver_url)
            .await
            .with_context(|| format!("connecting to webdriver at {}", options.webdriver_url))?;

        Ok(Self {
            client,
            pacing: options.pacing,
        })
    }

    /// A page handle sharing this session.
    pub fn page(&self) -> SibylPage {
        SibylPage::new(self.client.clone(), self.pacing)
    }

    /// Close the underlying browser session.
    pub async fn close(self) -> Result<()> {
        self.client.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_and_profile_flags() {
        let opts = DriverOptions {
            profile_dir: Some(PathBuf::from("/tmp/sibyl-profile")),
            ..DriverOptions::default()
        };
        let args = chrome_arguments(&opts);
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/sibyl-profile".to_string()));

        let headful = DriverOptions {
            headless: false,
            ..DriverOptions::default()
        };
        let args = chrome_arguments(&headful);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.iter().any(|a| a.starts_with("--user-data-dir")));
    }

    #[test]
    fn relative_profile_dir_is_made_absolute() {
        let relative = PathBuf::from(format!("target/sibyl-profile-{}", std::process::id()));
        let resolved = prepare_profile_dir(&relative).unwrap();

        assert!(resolved.is_absolute());
        assert!(resolved.is_dir());
        assert!(resolved.ends_with(&relative));
        let expected = std::env::current_dir().unwrap().join(&relative);
        assert_eq!(resolved, std::fs::canonicalize(expected).unwrap());

        let args = chrome_arguments(&DriverOptions {
            profile_dir: Some(resolved.clone()),
            ..DriverOptions::default()
        });
        assert!(args.contains(&format!("--user-data-dir={}", resolved.display())));

        std::fs::remove_dir_all(&resolved).unwrap();
    }
}
