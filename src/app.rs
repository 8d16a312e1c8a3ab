use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api;
use crate::config::{self, Config};
use crate::data::Services;
use crate::image_loader::{ImageLoader, LoadOutcome};
use crate::image_url::{sanitize_image_url, validate_image_url, ValidationResult};
use crate::logging;
use crate::model::{ScrapeReport, ScrapingStatus};
use crate::preload::{self, HttpPreloader};
use crate::ui;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Serve sample data from memory instead of the backend.
    pub offline: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let config_path = config::default_path();
    let display_path = friendly_path(config_path.as_ref());

    let log_note = match logging::init_file(&cfg.log) {
        Ok(path) => format!("Logs: {}", friendly_path(Some(&path))),
        Err(err) => format!("Logging disabled: {err}"),
    };

    let services = build_services(&cfg, opts.offline)?;
    let images = Arc::new(build_preloader(&cfg)?);

    let status = if opts.offline {
        format!("Offline mode: showing sample gear. {log_note}")
    } else {
        format!("Connected to {}. {log_note}", cfg.api.base_url)
    };
    info!(offline = opts.offline, base_url = %cfg.api.base_url, "starting hookah-tui");

    let options = ui::Options {
        status_message: status,
        services,
        preloader: images.clone(),
        display: images,
        default_tab: ui::Tab::from_config(&cfg.ui.default_tab),
        config_path: display_path,
    };

    let mut model = ui::Model::new(options);
    model.run()?;

    info!("hookah-tui exited");
    Ok(())
}

/// Result of `--check-image`.
#[derive(Debug, Clone)]
pub struct ImageCheck {
    pub validation: ValidationResult,
    pub sanitized: Option<String>,
    pub outcome: LoadOutcome,
}

/// Runs one URL through the same pipeline the gear cards use and blocks
/// until it settles.
pub fn check_image(url: &str) -> Result<ImageCheck> {
    let cfg = load_cli_config()?;
    let preloader = Arc::new(build_preloader(&cfg)?);
    let validation = validate_image_url(Some(url));
    let sanitized = sanitize_image_url(Some(url));

    let mut loader = ImageLoader::new(preloader, Some(url.to_string()));
    let outcome = loader.wait();
    info!(url, ?outcome, "image check finished");

    Ok(ImageCheck {
        validation,
        sanitized,
        outcome,
    })
}

pub fn scrape(offline: bool, website: Option<&str>, category: Option<&str>) -> Result<ScrapeReport> {
    let cfg = load_cli_config()?;
    let services = build_services(&cfg, offline)?;
    services.scraper.trigger(website, category)
}

pub fn scrape_status(offline: bool) -> Result<ScrapingStatus> {
    let cfg = load_cli_config()?;
    let services = build_services(&cfg, offline)?;
    services.scraper.status()
}

fn load_cli_config() -> Result<Config> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    if let Err(err) = logging::init_file(&cfg.log) {
        logging::init_stderr(&cfg.log);
        warn!(error = %format!("{err:#}"), "file logging unavailable");
    }
    Ok(cfg)
}

fn build_services(cfg: &Config, offline: bool) -> Result<Services> {
    if offline {
        return Ok(Services::mock());
    }
    let client = api::Client::new(api::ClientConfig {
        base_url: Some(cfg.api.base_url.clone()),
        user_agent: cfg.api.user_agent.clone(),
        timeout: cfg.api.timeout,
        http_client: None,
    })
    .context("create api client")?;
    Ok(Services::from_client(Arc::new(client)))
}

fn build_preloader(cfg: &Config) -> Result<HttpPreloader> {
    HttpPreloader::new(preload::Config {
        user_agent: cfg.api.user_agent.clone(),
        http_client: None,
    })
    .context("create image preloader")
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/hookah-tui/config.yaml".to_string()
    }
}
