use std::time::Duration;

use anyhow::{bail, Result};
use hookah_tui::app::{self, RunOptions};
use hookah_tui::image_loader::LoadOutcome;
use indicatif::{ProgressBar, ProgressStyle};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let offline = args.iter().any(|arg| arg == "--offline");

    match handle_cli_flags(&args, offline) {
        Ok(true) => return,
        Ok(false) => {}
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    }

    if let Err(err) = hookah_tui::run(RunOptions { offline }) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags(args: &[String], offline: bool) -> Result<bool> {
    let mut saw_flag = false;
    let mut idx = 0;
    while idx < args.len() {
        match args[idx].as_str() {
            "--version" | "-V" => {
                println!("Hookah-TUI {}", hookah_tui::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "Hookah-TUI - Browse hookah gear, manage your collection and get recommendations.\n\n  --version, -V                     Show version and exit\n  --help,    -h                     Show this help message\n  --offline                         Use built-in sample data instead of the backend\n  --check-image <URL>               Validate and preload an image URL, then exit\n  --scrape [WEBSITE] [CATEGORY]     Ask the backend to scrape products, then exit\n  --status                          Show catalog statistics and exit"
                );
                saw_flag = true;
            }
            "--check-image" => {
                saw_flag = true;
                let Some(url) = args.get(idx + 1) else {
                    bail!("--check-image needs a URL");
                };
                idx += 1;
                if !check_image(url)? {
                    std::process::exit(2);
                }
            }
            "--scrape" => {
                saw_flag = true;
                let rest: Vec<&str> = args[idx + 1..]
                    .iter()
                    .take_while(|arg| !arg.starts_with('-'))
                    .take(2)
                    .map(String::as_str)
                    .collect();
                idx += rest.len();
                scrape(offline, rest.first().copied(), rest.get(1).copied())?;
            }
            "--status" => {
                saw_flag = true;
                let status = app::scrape_status(offline)?;
                println!("Total products: {}", status.total_products);
                println!("Categories:     {}", status.categories);
                println!("Brands:         {}", status.brands);
                if let Some(websites) = status.websites {
                    println!("Websites:       {websites}");
                }
                if !status.last_updated.is_empty() {
                    println!("Last updated:   {}", status.last_updated);
                }
            }
            _ => {}
        }
        idx += 1;
    }
    Ok(saw_flag)
}

/// Prints the pipeline verdict; returns whether the image loaded.
fn check_image(url: &str) -> Result<bool> {
    let report = app::check_image(url)?;
    match &report.validation.error {
        Some(reason) => println!("validation: error ({reason})"),
        None => println!("validation: ok"),
    }
    if let Some(note) = &report.validation.note {
        println!("note: {note}");
    }
    match &report.sanitized {
        Some(url) => println!("sanitized: {url}"),
        None => println!("sanitized: none"),
    }
    let verdict = match report.outcome {
        LoadOutcome::Loaded => "loaded",
        LoadOutcome::Error => "error",
        LoadOutcome::Loading => "loading",
    };
    println!("outcome: {verdict}");
    Ok(report.outcome == LoadOutcome::Loaded)
}

fn scrape(offline: bool, website: Option<&str>, category: Option<&str>) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message(format!(
        "Scraping {}{}…",
        website.unwrap_or(hookah_tui::api::DEMO_WEBSITE),
        category.map(|c| format!(" ({c})")).unwrap_or_default()
    ));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = app::scrape(offline, website, category);
    spinner.finish_and_clear();

    let report = result?;
    println!(
        "Scraped {}: {} products found",
        report.website, report.products_found
    );
    if let Some(category) = report.category.as_deref().filter(|c| !c.is_empty()) {
        println!("Category: {category}");
    }
    if let Some(details) = report.details {
        println!("Added: {} · Updated: {}", details.added, details.updated);
    }
    Ok(())
}
