use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Padding, Paragraph, Tabs, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::wrap;
use tracing::{debug, error, info, warn};
use unicode_width::UnicodeWidthStr;

use crate::api::ApiError;
use crate::data::Services;
use crate::image_loader::ImageLoader;
use crate::model::{
    capitalize, scrape_categories_for, FilterOptions, Gear, Recommendations, ScrapeReport,
    ScrapingStatus, UserGear, Website, ALL_WEBSITES,
};
use crate::preload::{ImageDisplay, ImageInfo, Preloader};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);
const COLOR_STAR: Color = Color::Rgb(249, 226, 175);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const TAG_LIMIT: usize = 3;
const LIST_NAME_WIDTH: usize = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Browse,
    Collection,
    Recommendations,
    Scraper,
}

impl Tab {
    const ALL: [Tab; 4] = [
        Tab::Browse,
        Tab::Collection,
        Tab::Recommendations,
        Tab::Scraper,
    ];

    /// Parses the `ui.default_tab` config value; unknown names fall back to
    /// browsing.
    pub fn from_config(value: &str) -> Tab {
        match value.trim().to_ascii_lowercase().as_str() {
            "collection" | "my-gear" => Tab::Collection,
            "recommendations" => Tab::Recommendations,
            "scraper" => Tab::Scraper,
            _ => Tab::Browse,
        }
    }

    fn index(self) -> usize {
        match self {
            Tab::Browse => 0,
            Tab::Collection => 1,
            Tab::Recommendations => 2,
            Tab::Scraper => 3,
        }
    }

    fn title(self, collection_len: usize) -> String {
        match self {
            Tab::Browse => "Browse Gear".to_string(),
            Tab::Collection => format!("My Collection ({collection_len})"),
            Tab::Recommendations => "Recommendations".to_string(),
            Tab::Scraper => "Scraper".to_string(),
        }
    }

    fn next(self) -> Tab {
        Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
    }

    fn previous(self) -> Tab {
        Tab::ALL[(self.index() + Tab::ALL.len() - 1) % Tab::ALL.len()]
    }
}

/// What the image area of a gear card shows.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageView {
    Loading,
    Fallback,
    Image { url: String, display: DisplayState },
}

/// Progress of the display fetch for an already preloaded image.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayState {
    Pending,
    Shown(ImageInfo),
    Failed,
}

/// Image slot of one gear card. Wraps the loader and mirrors what the
/// display side reported; a display failure triggers one automatic retry
/// per source before committing to the fallback.
struct ProductImage {
    gear_id: i64,
    loader: ImageLoader,
    display: DisplayState,
    display_token: Option<u64>,
    auto_retried: bool,
}

impl ProductImage {
    fn new(preloader: Arc<dyn Preloader>, gear: &Gear) -> Self {
        Self {
            gear_id: gear.id,
            loader: ImageLoader::new(preloader, gear.image_url.clone()),
            display: DisplayState::Pending,
            display_token: None,
            auto_retried: false,
        }
    }

    fn set_source(&mut self, source: Option<String>) {
        if self.loader.source() == source.as_deref() {
            return;
        }
        self.loader.set_source(source);
        self.reset_display();
        self.auto_retried = false;
    }

    fn retry(&mut self) {
        self.loader.retry();
        self.reset_display();
    }

    fn reset_display(&mut self) {
        self.display = DisplayState::Pending;
        self.display_token = None;
    }

    fn view(&self) -> ImageView {
        match self.loader.sanitized_url() {
            Some(_) if self.loader.is_loading() => ImageView::Loading,
            Some(url) if !self.loader.has_error() => ImageView::Image {
                url: url.to_string(),
                display: self.display.clone(),
            },
            _ => ImageView::Fallback,
        }
    }

    /// URL to hand to the display side, if it has not been requested yet.
    fn display_request(&self) -> Option<String> {
        if self.display_token.is_some() || self.display != DisplayState::Pending {
            return None;
        }
        match self.view() {
            ImageView::Image { url, .. } => Some(url),
            _ => None,
        }
    }

    fn apply_display(&mut self, token: u64, result: Result<ImageInfo>) -> bool {
        if self.display_token != Some(token) {
            return false;
        }
        self.display_token = None;
        match result {
            Ok(info) => self.display = DisplayState::Shown(info),
            Err(err) => {
                warn!(gear_id = self.gear_id, error = %format!("{err:#}"), "image display failed");
                self.display = DisplayState::Failed;
                if !self.auto_retried {
                    self.auto_retried = true;
                    self.retry();
                }
            }
        }
        true
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterField {
    Category,
    Brand,
    MinPrice,
    MaxPrice,
    Clear,
}

impl FilterField {
    const ALL: [FilterField; 5] = [
        FilterField::Category,
        FilterField::Brand,
        FilterField::MinPrice,
        FilterField::MaxPrice,
        FilterField::Clear,
    ];

    fn label(self) -> &'static str {
        match self {
            FilterField::Category => "Category",
            FilterField::Brand => "Brand",
            FilterField::MinPrice => "Min Price",
            FilterField::MaxPrice => "Max Price",
            FilterField::Clear => "Clear Filters",
        }
    }
}

#[derive(Default)]
struct FilterPanel {
    categories: Vec<String>,
    brands: Vec<String>,
    loading: bool,
    focused: bool,
    field: usize,
    min_input: String,
    max_input: String,
}

impl FilterPanel {
    fn field(&self) -> FilterField {
        FilterField::ALL[self.field % FilterField::ALL.len()]
    }

    fn move_field(&mut self, delta: isize) {
        let len = FilterField::ALL.len() as isize;
        self.field = (self.field as isize + delta).rem_euclid(len) as usize;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScraperField {
    Website,
    Category,
    Start,
}

impl ScraperField {
    const ALL: [ScraperField; 3] = [
        ScraperField::Website,
        ScraperField::Category,
        ScraperField::Start,
    ];
}

struct ScraperPanel {
    websites: Vec<Website>,
    status: Option<ScrapingStatus>,
    selected_website: String,
    selected_category: String,
    field: usize,
    in_progress: bool,
    result: Option<ScrapeReport>,
    error: Option<String>,
}

impl Default for ScraperPanel {
    fn default() -> Self {
        Self {
            websites: Vec::new(),
            status: None,
            selected_website: ALL_WEBSITES.to_string(),
            selected_category: String::new(),
            field: 0,
            in_progress: false,
            result: None,
            error: None,
        }
    }
}

impl ScraperPanel {
    fn field(&self) -> ScraperField {
        ScraperField::ALL[self.field % ScraperField::ALL.len()]
    }

    fn categories(&self) -> Vec<String> {
        scrape_categories_for(&self.websites, &self.selected_website)
    }

    fn website_label(&self) -> String {
        if self.selected_website == ALL_WEBSITES {
            return "All Websites".to_string();
        }
        self.websites
            .iter()
            .find(|site| site.name == self.selected_website)
            .map(|site| site.display_name.clone())
            .unwrap_or_else(|| self.selected_website.clone())
    }

    fn cycle_website(&mut self, delta: isize) {
        let mut options = vec![ALL_WEBSITES.to_string()];
        options.extend(self.websites.iter().map(|site| site.name.clone()));
        self.selected_website = cycle_option(&options, &self.selected_website, delta);
        self.selected_category.clear();
    }

    fn cycle_category(&mut self, delta: isize) {
        let mut options = vec![String::new()];
        options.extend(self.categories());
        self.selected_category = cycle_option(&options, &self.selected_category, delta);
    }
}

enum AsyncResponse {
    Initial {
        request_id: u64,
        gear: Result<Vec<Gear>>,
        collection: Result<Vec<UserGear>>,
    },
    FilterOptions {
        categories: Result<Vec<String>>,
        brands: Result<Vec<String>>,
    },
    Gear {
        request_id: u64,
        result: Result<Vec<Gear>>,
    },
    Collection {
        request_id: u64,
        result: Result<Vec<UserGear>>,
    },
    CollectionChanged {
        gear_name: String,
        added: bool,
        result: Result<()>,
    },
    Recommendations {
        request_id: u64,
        result: Result<Recommendations>,
    },
    CategoryPicks {
        request_id: u64,
        category: String,
        result: Result<Vec<Gear>>,
    },
    GearDetail {
        result: Result<Gear>,
    },
    ScraperStatus {
        result: Result<ScrapingStatus>,
    },
    Websites {
        result: Result<Vec<Website>>,
    },
    ScrapeFinished {
        result: Result<ScrapeReport>,
    },
    ImageDisplay {
        gear_id: i64,
        token: u64,
        result: Result<ImageInfo>,
    },
}

pub struct Options {
    pub status_message: String,
    pub services: Services,
    pub preloader: Arc<dyn Preloader>,
    pub display: Arc<dyn ImageDisplay>,
    pub default_tab: Tab,
    pub config_path: String,
}

pub struct Model {
    status_message: String,
    services: Services,
    preloader: Arc<dyn Preloader>,
    display: Arc<dyn ImageDisplay>,
    tab: Tab,
    gear: Vec<Gear>,
    collection: Vec<UserGear>,
    recommendations: Recommendations,
    picks_category: Option<String>,
    filters: FilterOptions,
    filter_panel: FilterPanel,
    scraper: ScraperPanel,
    selected: [usize; 3],
    error: Option<String>,
    image: Option<ProductImage>,
    spinner: Spinner,
    needs_redraw: bool,
    config_path: String,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    pending_initial: Option<u64>,
    pending_gear: Option<u64>,
    pending_collection: Option<u64>,
    pending_recommendations: Option<u64>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let mut model = Self {
            status_message: opts.status_message,
            services: opts.services,
            preloader: opts.preloader,
            display: opts.display,
            tab: opts.default_tab,
            gear: Vec::new(),
            collection: Vec::new(),
            recommendations: Recommendations::default(),
            picks_category: None,
            filters: FilterOptions::default(),
            filter_panel: FilterPanel::default(),
            scraper: ScraperPanel::default(),
            selected: [0; 3],
            error: None,
            image: None,
            spinner: Spinner::new(),
            needs_redraw: true,
            config_path: opts.config_path,
            response_tx,
            response_rx,
            next_request_id: 0,
            pending_initial: None,
            pending_gear: None,
            pending_collection: None,
            pending_recommendations: None,
        };
        model.load_initial();
        model.load_filter_options();
        model.on_tab_entered();
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                            }
                        }
                        self.mark_dirty();
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.pending_initial.is_some()
            || self.pending_gear.is_some()
            || self.pending_collection.is_some()
            || self.pending_recommendations.is_some()
            || self.filter_panel.loading
            || self.scraper.in_progress
            || self.image.as_ref().is_some_and(|img| img.loader.is_loading())
    }

    fn list_loading(&self) -> bool {
        match self.tab {
            Tab::Browse => self.pending_initial.is_some() || self.pending_gear.is_some(),
            Tab::Collection => self.pending_initial.is_some(),
            Tab::Recommendations => self.pending_recommendations.is_some(),
            Tab::Scraper => false,
        }
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() -> AsyncResponse + Send + 'static,
    {
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    /// Catalog and collection are fetched in parallel and applied together.
    fn load_initial(&mut self) {
        let request_id = self.next_request_id();
        self.pending_initial = Some(request_id);
        self.status_message = "Loading gear catalog…".to_string();
        let catalog = self.services.catalog.clone();
        let collection = self.services.collection.clone();
        self.spawn(move || {
            let (gear, collection) = thread::scope(|scope| {
                let gear = scope.spawn(|| catalog.list_gear(&FilterOptions::default()));
                let owned = scope.spawn(|| collection.list());
                (join_scoped(gear), join_scoped(owned))
            });
            AsyncResponse::Initial {
                request_id,
                gear,
                collection,
            }
        });
    }

    fn load_filter_options(&mut self) {
        self.filter_panel.loading = true;
        let catalog = self.services.catalog.clone();
        self.spawn(move || {
            let (categories, brands) = thread::scope(|scope| {
                let categories = scope.spawn(|| catalog.categories());
                let brands = scope.spawn(|| catalog.brands());
                (join_scoped(categories), join_scoped(brands))
            });
            AsyncResponse::FilterOptions { categories, brands }
        });
    }

    fn load_gear(&mut self) {
        let request_id = self.next_request_id();
        self.pending_gear = Some(request_id);
        let filters = self.filters.clone();
        debug!(?filters, "loading gear");
        let catalog = self.services.catalog.clone();
        self.spawn(move || AsyncResponse::Gear {
            request_id,
            result: catalog.list_gear(&filters),
        });
    }

    fn load_collection(&mut self) {
        let request_id = self.next_request_id();
        self.pending_collection = Some(request_id);
        let collection = self.services.collection.clone();
        self.spawn(move || AsyncResponse::Collection {
            request_id,
            result: collection.list(),
        });
    }

    fn load_recommendations(&mut self) {
        let request_id = self.next_request_id();
        self.pending_recommendations = Some(request_id);
        let service = self.services.recommendations.clone();
        self.spawn(move || AsyncResponse::Recommendations {
            request_id,
            result: service.recommendations(),
        });
    }

    fn load_category_picks(&mut self) {
        let Some(category) = self.selected_gear().map(|gear| gear.category.clone()) else {
            return;
        };
        let request_id = self.next_request_id();
        self.pending_recommendations = Some(request_id);
        self.status_message = format!("Finding more {}…", capitalize(&category));
        let service = self.services.recommendations.clone();
        self.spawn(move || AsyncResponse::CategoryPicks {
            request_id,
            result: service.for_category(&category),
            category,
        });
    }

    fn reload_selected_detail(&mut self) {
        let Some(id) = self.selected_gear().map(|gear| gear.id) else {
            return;
        };
        let catalog = self.services.catalog.clone();
        self.spawn(move || AsyncResponse::GearDetail {
            result: catalog.gear(id),
        });
    }

    fn load_scraper_panel(&mut self) {
        let scraper = self.services.scraper.clone();
        self.spawn(move || AsyncResponse::Websites {
            result: scraper.websites(),
        });
        self.load_scraper_status();
    }

    fn load_scraper_status(&mut self) {
        let scraper = self.services.scraper.clone();
        self.spawn(move || AsyncResponse::ScraperStatus {
            result: scraper.status(),
        });
    }

    fn on_tab_entered(&mut self) {
        match self.tab {
            Tab::Browse => {
                if self.pending_initial.is_none() {
                    self.load_gear();
                }
            }
            Tab::Collection => {}
            Tab::Recommendations => self.load_recommendations(),
            Tab::Scraper => self.load_scraper_panel(),
        }
        self.filter_panel.focused = false;
        self.sync_image();
    }

    fn switch_tab(&mut self, tab: Tab) {
        if self.tab == tab {
            return;
        }
        self.tab = tab;
        self.status_message = tab.title(self.collection.len());
        self.on_tab_entered();
    }

    fn apply_filters(&mut self, filters: FilterOptions) {
        if self.filters == filters {
            return;
        }
        self.filters = filters;
        self.selected[Tab::Browse.index()] = 0;
        if self.tab == Tab::Browse {
            self.load_gear();
        }
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        if let Some(image) = self.image.as_mut() {
            changed |= image.loader.poll();
        }
        changed |= self.request_image_display();
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Initial {
                request_id,
                gear,
                collection,
            } => {
                if self.pending_initial != Some(request_id) {
                    return;
                }
                self.pending_initial = None;
                let mut failed = false;
                match gear {
                    Ok(items) => self.gear = items,
                    Err(err) => {
                        error!(error = %format!("{err:#}"), "initial catalog load failed");
                        failed = true;
                    }
                }
                match collection {
                    Ok(items) => self.collection = items,
                    Err(err) => {
                        error!(error = %format!("{err:#}"), "initial collection load failed");
                        failed = true;
                    }
                }
                if failed {
                    self.error = Some("Failed to load initial data".to_string());
                    self.status_message = "Could not reach the gear service".to_string();
                } else {
                    self.error = None;
                    self.status_message = format!(
                        "Loaded {} items · {} in your collection",
                        self.gear.len(),
                        self.collection.len()
                    );
                }
                // Filters chosen while the first load was in flight.
                if !self.filters.is_empty() && self.tab == Tab::Browse {
                    self.load_gear();
                }
            }
            AsyncResponse::FilterOptions { categories, brands } => {
                self.filter_panel.loading = false;
                match categories {
                    Ok(items) => self.filter_panel.categories = items,
                    Err(err) => warn!(error = %format!("{err:#}"), "failed to load categories"),
                }
                match brands {
                    Ok(items) => self.filter_panel.brands = items,
                    Err(err) => warn!(error = %format!("{err:#}"), "failed to load brands"),
                }
            }
            AsyncResponse::Gear { request_id, result } => {
                if self.pending_gear != Some(request_id) {
                    return;
                }
                self.pending_gear = None;
                match result {
                    Ok(items) => {
                        self.status_message = format!("{} items", items.len());
                        self.gear = items;
                        self.error = None;
                    }
                    Err(err) => {
                        error!(error = %format!("{err:#}"), "failed to load gear");
                        self.error = Some("Failed to load gear".to_string());
                        self.status_message = format!("Failed to load gear: {}", rejection_message(&err));
                    }
                }
            }
            AsyncResponse::Collection { request_id, result } => {
                if self.pending_collection != Some(request_id) {
                    return;
                }
                self.pending_collection = None;
                match result {
                    Ok(items) => self.collection = items,
                    Err(err) => {
                        error!(error = %format!("{err:#}"), "failed to load collection");
                        self.error = Some("Failed to load your collection".to_string());
                        self.status_message =
                            format!("Failed to load collection: {}", rejection_message(&err));
                    }
                }
            }
            AsyncResponse::CollectionChanged {
                gear_name,
                added,
                result,
            } => match result {
                Ok(()) => {
                    self.status_message = if added {
                        format!("Added {gear_name} to your collection")
                    } else {
                        format!("Removed {gear_name} from your collection")
                    };
                    self.load_collection();
                }
                Err(err) => {
                    error!(error = %format!("{err:#}"), added, "collection update failed");
                    let action = if added { "add gear to" } else { "remove gear from" };
                    self.error = Some(format!("Failed to {action} collection"));
                    self.status_message = format!("Error: {}", rejection_message(&err));
                }
            },
            AsyncResponse::Recommendations { request_id, result } => {
                if self.pending_recommendations != Some(request_id) {
                    return;
                }
                self.pending_recommendations = None;
                match result {
                    Ok(recs) => {
                        self.status_message = recs.kind.label().to_string();
                        self.recommendations = recs;
                        self.picks_category = None;
                        self.error = None;
                    }
                    Err(err) => {
                        error!(error = %format!("{err:#}"), "failed to load recommendations");
                        self.error = Some("Failed to load recommendations".to_string());
                        self.status_message =
                            format!("Failed to load recommendations: {}", rejection_message(&err));
                    }
                }
            }
            AsyncResponse::CategoryPicks {
                request_id,
                category,
                result,
            } => {
                if self.pending_recommendations != Some(request_id) {
                    return;
                }
                self.pending_recommendations = None;
                match result {
                    Ok(items) => {
                        self.status_message =
                            format!("{} top rated {}", items.len(), capitalize(&category));
                        self.recommendations.items = items;
                        self.picks_category = Some(category);
                        self.selected[Tab::Recommendations.index()] = 0;
                        self.error = None;
                    }
                    Err(err) => {
                        error!(error = %format!("{err:#}"), %category, "failed to load category picks");
                        self.status_message =
                            format!("Failed to load recommendations: {}", rejection_message(&err));
                    }
                }
            }
            AsyncResponse::GearDetail { result } => match result {
                Ok(fresh) => {
                    self.status_message = format!("Refreshed {}", fresh.name);
                    replace_gear(&mut self.gear, &fresh);
                    replace_gear(&mut self.recommendations.items, &fresh);
                    for owned in self.collection.iter_mut().filter(|c| c.gear_id == fresh.id) {
                        owned.gear = Some(fresh.clone());
                    }
                }
                Err(err) => {
                    error!(error = %format!("{err:#}"), "failed to load gear details");
                    self.status_message =
                        format!("Failed to load gear details: {}", rejection_message(&err));
                }
            },
            AsyncResponse::ScraperStatus { result } => match result {
                Ok(status) => self.scraper.status = Some(status),
                Err(err) => warn!(error = %format!("{err:#}"), "failed to load scraping status"),
            },
            AsyncResponse::Websites { result } => match result {
                Ok(sites) => self.scraper.websites = sites,
                Err(err) => warn!(error = %format!("{err:#}"), "failed to load websites"),
            },
            AsyncResponse::ScrapeFinished { result } => {
                self.scraper.in_progress = false;
                match result {
                    Ok(report) => {
                        info!(
                            website = %report.website,
                            found = report.products_found,
                            "scrape finished"
                        );
                        self.status_message =
                            format!("Scraping finished: {} products", report.products_found);
                        self.scraper.result = Some(report);
                        self.load_scraper_status();
                    }
                    Err(err) => {
                        error!(error = %format!("{err:#}"), "scrape failed");
                        let message = match err.downcast_ref::<ApiError>() {
                            Some(ApiError::Rejected(msg)) => msg.clone(),
                            _ => "Failed to start scraping".to_string(),
                        };
                        self.scraper.error = Some(message);
                    }
                }
            }
            AsyncResponse::ImageDisplay {
                gear_id,
                token,
                result,
            } => {
                if let Some(image) = self.image.as_mut().filter(|img| img.gear_id == gear_id) {
                    image.apply_display(token, result);
                }
            }
        }
        self.clamp_selection();
        self.sync_image();
    }

    /// Items listed on the current tab.
    fn visible_gear(&self) -> Vec<&Gear> {
        match self.tab {
            Tab::Browse => self.gear.iter().collect(),
            Tab::Collection => self
                .collection
                .iter()
                .filter_map(|item| item.gear.as_ref())
                .collect(),
            Tab::Recommendations => self.recommendations.items.iter().collect(),
            Tab::Scraper => Vec::new(),
        }
    }

    fn selected_index(&self) -> Option<usize> {
        match self.tab {
            Tab::Scraper => None,
            tab => Some(self.selected[tab.index()]),
        }
    }

    fn selected_gear(&self) -> Option<&Gear> {
        let idx = self.selected_index()?;
        self.visible_gear().get(idx).copied()
    }

    fn clamp_selection(&mut self) {
        for tab in [Tab::Browse, Tab::Collection, Tab::Recommendations] {
            let len = match tab {
                Tab::Browse => self.gear.len(),
                Tab::Collection => self.collection.iter().filter(|c| c.gear.is_some()).count(),
                _ => self.recommendations.items.len(),
            };
            let slot = &mut self.selected[tab.index()];
            *slot = (*slot).min(len.saturating_sub(1));
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let Some(idx) = self.selected_index() else {
            return;
        };
        let len = self.visible_gear().len();
        if len == 0 {
            return;
        }
        let next = (idx as isize + delta).clamp(0, len as isize - 1) as usize;
        self.selected[self.tab.index()] = next;
        self.sync_image();
    }

    /// Keeps the card's image slot pointed at the selected gear. A different
    /// gear gets a fresh slot; the old one, and its in-flight work, is dropped.
    fn sync_image(&mut self) {
        let Some((id, url)) = self
            .selected_gear()
            .map(|gear| (gear.id, gear.image_url.clone()))
        else {
            self.image = None;
            return;
        };
        if let Some(image) = self.image.as_mut().filter(|img| img.gear_id == id) {
            image.set_source(url);
            return;
        }
        let gear = self.selected_gear().cloned();
        self.image = gear.map(|gear| ProductImage::new(self.preloader.clone(), &gear));
    }

    fn request_image_display(&mut self) -> bool {
        let Some(image) = self.image.as_mut() else {
            return false;
        };
        let Some(url) = image.display_request() else {
            return false;
        };
        let token = self.next_request_id.wrapping_add(1);
        self.next_request_id = token;
        image.display_token = Some(token);
        let gear_id = image.gear_id;
        let display = self.display.clone();
        self.spawn(move || AsyncResponse::ImageDisplay {
            gear_id,
            token,
            result: display.describe(&url),
        });
        true
    }

    fn in_collection(&self, gear_id: i64) -> bool {
        self.collection.iter().any(|item| item.gear_id == gear_id)
    }

    fn add_selected(&mut self) {
        let Some(gear) = self.selected_gear().cloned() else {
            return;
        };
        if self.in_collection(gear.id) {
            self.status_message = format!("{} is already in your collection", gear.name);
            return;
        }
        let collection = self.services.collection.clone();
        self.status_message = format!("Adding {}…", gear.name);
        self.spawn(move || AsyncResponse::CollectionChanged {
            gear_name: gear.name,
            added: true,
            result: collection.add(gear.id).map(|_| ()),
        });
    }

    fn remove_selected(&mut self) {
        let Some(gear) = self.selected_gear().cloned() else {
            return;
        };
        if !self.in_collection(gear.id) {
            self.status_message = format!("{} is not in your collection", gear.name);
            return;
        }
        let collection = self.services.collection.clone();
        self.status_message = format!("Removing {}…", gear.name);
        self.spawn(move || AsyncResponse::CollectionChanged {
            gear_name: gear.name,
            added: false,
            result: collection.remove(gear.id),
        });
    }

    fn open_selected(&mut self) {
        let Some(gear) = self.selected_gear() else {
            return;
        };
        let Some(url) = gear.product_url.clone().filter(|u| !u.trim().is_empty()) else {
            self.status_message = "No product link for this item".to_string();
            return;
        };
        match webbrowser::open(&url) {
            Ok(()) => self.status_message = format!("Opened {url}"),
            Err(err) => {
                warn!(%url, error = %err, "failed to open browser");
                self.status_message = format!("Could not open browser: {err}");
            }
        }
    }

    fn refresh(&mut self) {
        self.error = None;
        match self.tab {
            Tab::Browse => self.load_gear(),
            Tab::Collection => self.load_collection(),
            Tab::Recommendations => self.load_recommendations(),
            Tab::Scraper => self.load_scraper_panel(),
        }
    }

    fn trigger_scrape(&mut self) {
        if self.scraper.in_progress {
            return;
        }
        self.scraper.in_progress = true;
        self.scraper.error = None;
        self.scraper.result = None;
        let website = self.scraper.selected_website.clone();
        let category = Some(self.scraper.selected_category.clone()).filter(|c| !c.is_empty());
        info!(%website, ?category, "starting scrape");
        self.status_message = "Scraping…".to_string();
        let scraper = self.services.scraper.clone();
        self.spawn(move || AsyncResponse::ScrapeFinished {
            result: scraper.trigger(Some(&website), category.as_deref()),
        });
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.filter_panel.focused {
            return Ok(self.handle_filter_key(code));
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('1') => self.switch_tab(Tab::Browse),
            KeyCode::Char('2') => self.switch_tab(Tab::Collection),
            KeyCode::Char('3') => self.switch_tab(Tab::Recommendations),
            KeyCode::Char('4') => self.switch_tab(Tab::Scraper),
            KeyCode::Tab => self.switch_tab(self.tab.next()),
            KeyCode::BackTab => self.switch_tab(self.tab.previous()),
            KeyCode::Char('r') => self.refresh(),
            _ if self.tab == Tab::Scraper => self.handle_scraper_key(code),
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(10),
            KeyCode::PageUp => self.move_selection(-10),
            KeyCode::Char('a') => self.add_selected(),
            KeyCode::Char('d') => self.remove_selected(),
            KeyCode::Char('o') => self.open_selected(),
            KeyCode::Enter => self.reload_selected_detail(),
            KeyCode::Char('m') if self.tab == Tab::Recommendations => self.load_category_picks(),
            KeyCode::Char('i') => {
                if let Some(image) = self.image.as_mut() {
                    image.retry();
                    self.status_message = "Retrying image…".to_string();
                }
            }
            KeyCode::Char('f') if self.tab == Tab::Browse => {
                self.filter_panel.focused = true;
                self.status_message = "Filters: ↑/↓ field · ←/→ change · Enter apply".to_string();
            }
            KeyCode::Char('c') if self.tab == Tab::Browse => self.clear_filters(),
            _ => {}
        }
        Ok(false)
    }

    fn handle_filter_key(&mut self, code: KeyCode) -> bool {
        let field = self.filter_panel.field();
        match code {
            KeyCode::Esc => {
                self.filter_panel.focused = false;
                self.status_message = "Filters closed".to_string();
            }
            KeyCode::Up | KeyCode::BackTab => self.filter_panel.move_field(-1),
            KeyCode::Down | KeyCode::Tab => self.filter_panel.move_field(1),
            KeyCode::Left | KeyCode::Right => {
                let delta = if code == KeyCode::Left { -1 } else { 1 };
                let mut filters = self.filters.clone();
                match field {
                    FilterField::Category => {
                        filters.category =
                            cycle_filter(&self.filter_panel.categories, &filters.category, delta);
                    }
                    FilterField::Brand => {
                        filters.brand =
                            cycle_filter(&self.filter_panel.brands, &filters.brand, delta);
                    }
                    _ => return false,
                }
                self.apply_filters(filters);
            }
            KeyCode::Char(ch) if is_price_field(field) && (ch.is_ascii_digit() || ch == '.') => {
                self.price_input_mut(field).push(ch);
            }
            KeyCode::Backspace if is_price_field(field) => {
                self.price_input_mut(field).pop();
            }
            KeyCode::Enter => match field {
                FilterField::Clear => self.clear_filters(),
                FilterField::MinPrice | FilterField::MaxPrice => self.commit_price_inputs(),
                _ => {}
            },
            _ => {}
        }
        false
    }

    fn price_input_mut(&mut self, field: FilterField) -> &mut String {
        if field == FilterField::MinPrice {
            &mut self.filter_panel.min_input
        } else {
            &mut self.filter_panel.max_input
        }
    }

    fn commit_price_inputs(&mut self) {
        let min = parse_price(&self.filter_panel.min_input);
        let max = parse_price(&self.filter_panel.max_input);
        match (min, max) {
            (Ok(min_price), Ok(max_price)) => {
                let filters = FilterOptions {
                    min_price,
                    max_price,
                    ..self.filters.clone()
                };
                self.apply_filters(filters);
            }
            _ => self.status_message = "Prices must be numbers".to_string(),
        }
    }

    fn clear_filters(&mut self) {
        self.filter_panel.min_input.clear();
        self.filter_panel.max_input.clear();
        self.apply_filters(FilterOptions::default());
        self.status_message = "Filters cleared".to_string();
    }

    fn handle_scraper_key(&mut self, code: KeyCode) {
        let len = ScraperField::ALL.len();
        match code {
            KeyCode::Char('k') | KeyCode::Up => {
                self.scraper.field = (self.scraper.field + len - 1) % len;
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.scraper.field = (self.scraper.field + 1) % len;
            }
            KeyCode::Left | KeyCode::Right | KeyCode::Char('h') | KeyCode::Char('l') => {
                let delta = if matches!(code, KeyCode::Left | KeyCode::Char('h')) {
                    -1
                } else {
                    1
                };
                match self.scraper.field() {
                    ScraperField::Website => self.scraper.cycle_website(delta),
                    ScraperField::Category => self.scraper.cycle_category(delta),
                    ScraperField::Start => {}
                }
            }
            KeyCode::Char('s') => self.trigger_scrape(),
            KeyCode::Enter if self.scraper.field() == ScraperField::Start => self.trigger_scrape(),
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        let titles: Vec<Line> = Tab::ALL
            .iter()
            .map(|tab| Line::from(tab.title(self.collection.len())))
            .collect();
        let tabs = Tabs::new(titles)
            .select(self.tab.index())
            .style(Style::default().fg(COLOR_TEXT_SECONDARY).bg(COLOR_PANEL_BG))
            .highlight_style(
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(tabs, layout[1]);

        if self.tab == Tab::Scraper {
            self.draw_scraper(frame, layout[2]);
        } else {
            let columns = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
                .split(layout[2]);
            let list_area = if self.tab == Tab::Browse {
                let rows = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(9), Constraint::Min(0)])
                    .split(columns[0]);
                self.draw_filters(frame, rows[0]);
                rows[1]
            } else {
                columns[0]
            };
            self.draw_list(frame, list_area);
            self.draw_card(frame, columns[1]);
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[3]);
    }

    fn panel_block(&self, title: String, focused: bool) -> Block<'static> {
        let border_style = if focused {
            Style::default().fg(COLOR_BORDER_FOCUSED)
        } else {
            Style::default().fg(COLOR_BORDER_IDLE)
        };
        let title_style = if focused {
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        };
        Block::default()
            .title(Span::styled(title, title_style))
            .borders(Borders::ALL)
            .border_style(border_style)
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1))
    }

    fn draw_filters(&self, frame: &mut Frame<'_>, area: Rect) {
        let panel = &self.filter_panel;
        let block = self.panel_block("Filters".to_string(), panel.focused);
        let mut lines = Vec::new();
        for (idx, field) in FilterField::ALL.iter().enumerate() {
            let value = match field {
                FilterField::Category => filter_value_label(&self.filters.category, "All Categories"),
                FilterField::Brand => filter_value_label(&self.filters.brand, "All Brands"),
                FilterField::MinPrice => price_input_label(&panel.min_input, "$0"),
                FilterField::MaxPrice => price_input_label(&panel.max_input, "$1000"),
                FilterField::Clear => String::new(),
            };
            let active = panel.focused && idx == panel.field;
            let style = if active {
                Style::default()
                    .fg(COLOR_ACCENT)
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(COLOR_TEXT_PRIMARY)
            };
            let text = if value.is_empty() {
                format!("[{}]", field.label())
            } else {
                format!("{:<10} {}", field.label(), value)
            };
            lines.push(Line::from(Span::styled(text, style)));
        }
        if panel.loading {
            lines.push(Line::from(Span::styled(
                "Loading filter options…",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_list(&self, frame: &mut Frame<'_>, area: Rect) {
        let title = match (self.tab, &self.picks_category) {
            (Tab::Recommendations, Some(category)) => format!("Top {} picks", capitalize(category)),
            (Tab::Recommendations, None) if !self.recommendations.items.is_empty() => format!(
                "{} · you own {}",
                self.recommendations.kind.label(),
                self.recommendations.user_gear_count
            ),
            (tab, _) => tab.title(self.collection.len()),
        };
        let block = self.panel_block(title, !self.filter_panel.focused);
        let items = self.visible_gear();

        if let Some(message) = self.list_placeholder(items.is_empty()) {
            let (text, color) = message;
            let paragraph = Paragraph::new(Line::from(Span::styled(text, Style::default().fg(color))))
                .block(block)
                .wrap(Wrap { trim: true });
            frame.render_widget(paragraph, area);
            return;
        }

        let rows: Vec<ListItem> = items
            .iter()
            .map(|gear| {
                let marker = if self.in_collection(gear.id) { "✓ " } else { "  " };
                let name = truncate_to_width(&gear.name, LIST_NAME_WIDTH);
                let mut spans = vec![
                    Span::styled(marker, Style::default().fg(COLOR_SUCCESS)),
                    Span::styled(name, Style::default().fg(COLOR_TEXT_PRIMARY)),
                ];
                if let Some(price) = gear.price_label() {
                    spans.push(Span::styled(
                        format!("  {price}"),
                        Style::default().fg(COLOR_SUCCESS),
                    ));
                }
                let detail = Line::from(vec![
                    Span::raw("  "),
                    Span::styled(
                        format!("{} · {} ", gear.brand, capitalize(&gear.category)),
                        Style::default().fg(COLOR_TEXT_SECONDARY),
                    ),
                    Span::styled(gear.stars(), Style::default().fg(COLOR_STAR)),
                ]);
                ListItem::new(vec![Line::from(spans), detail])
            })
            .collect();

        let list = List::new(rows).block(block).highlight_style(
            Style::default()
                .bg(COLOR_PANEL_SELECTED_BG)
                .add_modifier(Modifier::BOLD),
        );
        let mut state = ListState::default().with_selected(self.selected_index());
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn list_placeholder(&self, empty: bool) -> Option<(String, Color)> {
        if self.list_loading() && empty {
            return Some((format!("{} Loading…", self.spinner.frame()), COLOR_ACCENT));
        }
        if let Some(error) = &self.error {
            if empty {
                return Some((format!("{error}. Press r to retry."), COLOR_ERROR));
            }
        }
        if !empty {
            return None;
        }
        let text = match self.tab {
            Tab::Collection => "Your collection is empty. Add gear from the Browse tab with a.",
            Tab::Recommendations => "No recommendations yet.",
            _ => "No gear matches these filters.",
        };
        Some((text.to_string(), COLOR_TEXT_SECONDARY))
    }

    fn draw_card(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.panel_block("Details".to_string(), false);
        let inner_width = block.inner(area).width.max(1) as usize;
        let mut lines = match self.selected_gear() {
            Some(gear) => {
                let view = self
                    .image
                    .as_ref()
                    .filter(|img| img.gear_id == gear.id)
                    .map(ProductImage::view)
                    .unwrap_or(ImageView::Loading);
                gear_card_lines(gear, self.in_collection(gear.id), &view, inner_width)
            }
            None => vec![Line::from(Span::styled(
                "Select an item to see its details.",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))],
        };
        if let Some(error) = &self.error {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(COLOR_ERROR),
            )));
        }
        let paragraph = Paragraph::new(Text::from(lines))
            .block(block)
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn draw_scraper(&self, frame: &mut Frame<'_>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(8), Constraint::Min(0)])
            .split(area);

        let panel = &self.scraper;
        let mut status_lines = Vec::new();
        match &panel.status {
            Some(status) => {
                status_lines.push(stat_line("Total Products", status.total_products));
                status_lines.push(stat_line("Categories", status.categories));
                status_lines.push(stat_line("Brands", status.brands));
                if let Some(websites) = status.websites {
                    status_lines.push(stat_line("Websites", websites));
                }
                if !status.last_updated.is_empty() {
                    status_lines.push(Line::from(Span::styled(
                        format!("Last updated {}", status.last_updated),
                        Style::default().fg(COLOR_TEXT_SECONDARY),
                    )));
                }
            }
            None => status_lines.push(Line::from(Span::styled(
                "Loading database status…",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))),
        }
        frame.render_widget(
            Paragraph::new(status_lines).block(self.panel_block("Database Status".into(), false)),
            rows[0],
        );

        let category_label = if panel.selected_category.is_empty() {
            "All Categories".to_string()
        } else {
            capitalize(&panel.selected_category)
        };
        let start_label = if panel.in_progress {
            format!("{} Scraping…", self.spinner.frame())
        } else {
            "[Start Scraping]".to_string()
        };
        let fields = [
            format!("Website    {}", panel.website_label()),
            format!("Category   {category_label}"),
            start_label,
        ];
        let mut lines: Vec<Line> = fields
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                let style = if idx == panel.field {
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .bg(COLOR_PANEL_SELECTED_BG)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(COLOR_TEXT_PRIMARY)
                };
                Line::from(Span::styled(text, style))
            })
            .collect();
        lines.push(Line::default());
        if let Some(error) = &panel.error {
            lines.push(Line::from(Span::styled(
                format!("Error: {error}"),
                Style::default().fg(COLOR_ERROR),
            )));
        }
        if let Some(report) = &panel.result {
            lines.extend(scrape_report_lines(report));
        }
        if !panel.websites.is_empty() {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                "Available Websites",
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::BOLD),
            )));
            for site in &panel.websites {
                lines.push(Line::from(vec![
                    Span::styled(format!("  {} ", site.display_name), Style::default().fg(COLOR_TEXT_PRIMARY)),
                    Span::styled(site.url.clone(), Style::default().fg(COLOR_ACCENT)),
                    Span::styled(
                        format!("  {}", site.categories.join(", ")),
                        Style::default().fg(COLOR_TEXT_SECONDARY),
                    ),
                ]));
            }
        }
        lines.push(Line::default());
        for note in [
            "Scraping can take a few minutes depending on the number of products.",
            "Existing products are updated and new ones are added.",
        ] {
            lines.push(Line::from(Span::styled(
                note,
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        frame.render_widget(
            Paragraph::new(lines)
                .block(self.panel_block("Scrape Products".into(), true))
                .wrap(Wrap { trim: true }),
            rows[1],
        );
    }

    fn footer_text(&self) -> String {
        let mut parts: Vec<&str> = vec!["1-4/Tab switch tab", "r refresh"];
        match self.tab {
            Tab::Scraper => {
                parts.push("j/k field");
                parts.push("←/→ change");
                parts.push("s start scrape");
            }
            Tab::Browse if self.filter_panel.focused => {
                parts = vec![
                    "↑/↓ field",
                    "←/→ category/brand",
                    "type price · Enter apply",
                    "Esc close filters",
                ];
            }
            tab => {
                parts.push("j/k move");
                parts.push("a add · d remove");
                parts.push("o open product");
                parts.push("Enter refresh item");
                if tab == Tab::Recommendations {
                    parts.push("m more like this");
                }
                parts.push("i retry image");
                if tab == Tab::Browse {
                    parts.push("f filters · c clear");
                }
            }
        }
        parts.push("q quit");
        let mut text = parts.join(" · ");
        if !self.config_path.is_empty() && self.tab == Tab::Scraper {
            text.push_str(&format!(" · config {}", self.config_path));
        }
        text
    }
}

fn join_scoped<T>(handle: thread::ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow::anyhow!("worker thread panicked")))
}

fn replace_gear(items: &mut [Gear], fresh: &Gear) {
    for item in items.iter_mut().filter(|item| item.id == fresh.id) {
        *item = fresh.clone();
    }
}

fn rejection_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Rejected(msg)) => msg.clone(),
        _ => format!("{err}"),
    }
}

fn is_price_field(field: FilterField) -> bool {
    matches!(field, FilterField::MinPrice | FilterField::MaxPrice)
}

/// Empty input clears the bound.
fn parse_price(input: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse::<f64>().map(Some)
}

fn cycle_option(options: &[String], current: &str, delta: isize) -> String {
    if options.is_empty() {
        return current.to_string();
    }
    let len = options.len() as isize;
    let pos = options.iter().position(|o| o == current).unwrap_or(0) as isize;
    options[(pos + delta).rem_euclid(len) as usize].clone()
}

/// Steps through `None` followed by each option.
fn cycle_filter(options: &[String], current: &Option<String>, delta: isize) -> Option<String> {
    let mut all = vec![String::new()];
    all.extend(options.iter().cloned());
    let next = cycle_option(&all, current.as_deref().unwrap_or(""), delta);
    Some(next).filter(|value| !value.is_empty())
}

fn filter_value_label(value: &Option<String>, empty: &str) -> String {
    match value {
        Some(v) => capitalize(v),
        None => empty.to_string(),
    }
}

fn price_input_label(input: &str, placeholder: &str) -> String {
    if input.is_empty() {
        placeholder.to_string()
    } else {
        format!("${input}")
    }
}

fn truncate_to_width(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + w + 1 > max {
            break;
        }
        out.push(ch);
        width += w;
    }
    out.push('…');
    out
}

fn stat_line(label: &str, value: i64) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("{value:>6} "),
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(label.to_string(), Style::default().fg(COLOR_TEXT_SECONDARY)),
    ])
}

fn scrape_report_lines(report: &ScrapeReport) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(Span::styled(
            "Scraping Completed",
            Style::default()
                .fg(COLOR_SUCCESS)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(format!("Products Found: {}", report.products_found)),
        Line::from(format!("Website: {}", report.website)),
    ];
    if let Some(category) = report.category.as_deref().filter(|c| !c.is_empty()) {
        lines.push(Line::from(format!("Category: {category}")));
    }
    if let Some(details) = &report.details {
        lines.push(Line::from(format!(
            "Added: {} · Updated: {}",
            details.added, details.updated
        )));
    }
    lines
}

fn image_lines(view: &ImageView) -> Vec<Line<'static>> {
    let muted = Style::default().fg(COLOR_TEXT_SECONDARY);
    let fallback = || {
        vec![
            Line::from(Span::styled("🚬 Hookah Gear", muted)),
            Line::from(Span::styled("Image Unavailable", muted)),
        ]
    };
    match view {
        ImageView::Loading => vec![Line::from(Span::styled("🚬 Loading Gear…", muted))],
        ImageView::Fallback => fallback(),
        ImageView::Image { url, display } => match display {
            DisplayState::Failed => fallback(),
            DisplayState::Pending => vec![
                Line::from(Span::styled(format!("🖼  {url}"), muted)),
                Line::from(Span::styled("Opening image…", muted)),
            ],
            DisplayState::Shown(info) => {
                let size = if info.width > 0 && info.height > 0 {
                    format!("{}×{} ", info.width, info.height)
                } else {
                    String::new()
                };
                vec![
                    Line::from(Span::styled(
                        format!("🖼  {url}"),
                        Style::default().fg(COLOR_ACCENT),
                    )),
                    Line::from(Span::styled(
                        format!("{} {}· {} KB", info.mime, size, info.size_bytes.div_ceil(1024)),
                        muted,
                    )),
                ]
            }
        },
    }
}

/// Full card for one gear item.
pub fn gear_card_lines(
    gear: &Gear,
    in_collection: bool,
    image: &ImageView,
    width: usize,
) -> Vec<Line<'static>> {
    let primary = Style::default().fg(COLOR_TEXT_PRIMARY);
    let muted = Style::default().fg(COLOR_TEXT_SECONDARY);
    let mut lines = image_lines(image);
    lines.push(Line::default());

    lines.push(Line::from(Span::styled(
        gear.name.clone(),
        primary.add_modifier(Modifier::BOLD),
    )));
    let mut brand = vec![Span::styled(gear.brand.clone(), Style::default().fg(COLOR_ACCENT))];
    if let Some(model) = gear.model.as_deref().filter(|m| !m.is_empty()) {
        brand.push(Span::styled(format!(" {model}"), muted));
    }
    brand.push(Span::styled(format!(" · {}", capitalize(&gear.category)), muted));
    lines.push(Line::from(brand));

    let mut price_row = Vec::new();
    if let Some(price) = gear.price_label() {
        price_row.push(Span::styled(
            format!("{price}  "),
            Style::default()
                .fg(COLOR_SUCCESS)
                .add_modifier(Modifier::BOLD),
        ));
    }
    if gear.rating > 0.0 {
        price_row.push(Span::styled(gear.stars(), Style::default().fg(COLOR_STAR)));
        price_row.push(Span::styled(format!(" ({})", gear.review_count), muted));
    }
    if !price_row.is_empty() {
        lines.push(Line::from(price_row));
    }

    if let Some(description) = gear.description.as_deref().filter(|d| !d.is_empty()) {
        lines.push(Line::default());
        for row in wrap(description, width.max(10)) {
            lines.push(Line::from(Span::styled(row.into_owned(), primary)));
        }
    }

    let tags = gear.tag_summary(TAG_LIMIT);
    if !tags.is_empty() {
        lines.push(Line::default());
        let spans: Vec<Span> = tags
            .into_iter()
            .map(|tag| {
                Span::styled(
                    format!("[{tag}] "),
                    Style::default().fg(COLOR_ACCENT).bg(COLOR_PANEL_FOCUSED_BG),
                )
            })
            .collect();
        lines.push(Line::from(spans));
    }

    if !gear.specifications.is_empty() {
        lines.push(Line::default());
        lines.push(Line::from(Span::styled("Specifications", muted.add_modifier(Modifier::BOLD))));
        for (key, value) in &gear.specifications {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lines.push(Line::from(vec![
                Span::styled(format!("  {}: ", key.replace('_', " ")), muted),
                Span::styled(rendered, primary),
            ]));
        }
    }

    lines.push(Line::default());
    if in_collection {
        lines.push(Line::from(Span::styled(
            "✓ In your collection (d to remove)",
            Style::default().fg(COLOR_SUCCESS),
        )));
    } else {
        lines.push(Line::from(Span::styled("a: Add to Collection", Style::default().fg(COLOR_ACCENT))));
    }
    if gear.product_url.as_deref().is_some_and(|u| !u.is_empty()) {
        lines.push(Line::from(Span::styled("o: View Product", muted)));
    }
    if let Some(source) = gear.source_website.as_deref() {
        let mut footer = format!("Source: {source}");
        if let Some(updated) = gear.updated_display() {
            footer.push_str(&format!(" · updated {updated}"));
        }
        lines.push(Line::from(Span::styled(footer, muted)));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticImages {
        preload_ok: bool,
        display_ok: bool,
        display_calls: AtomicUsize,
    }

    impl StaticImages {
        fn new(preload_ok: bool, display_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                preload_ok,
                display_ok,
                display_calls: AtomicUsize::new(0),
            })
        }
    }

    impl Preloader for StaticImages {
        fn preload(&self, _url: &str) -> bool {
            self.preload_ok
        }
    }

    impl ImageDisplay for StaticImages {
        fn describe(&self, _url: &str) -> Result<ImageInfo> {
            self.display_calls.fetch_add(1, Ordering::SeqCst);
            if self.display_ok {
                Ok(ImageInfo {
                    mime: "image/png".into(),
                    width: 400,
                    height: 300,
                    size_bytes: 2048,
                })
            } else {
                Err(anyhow!("decode failed"))
            }
        }
    }

    fn plain(line: &Line<'_>) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    fn model_with(images: Arc<StaticImages>, tab: Tab) -> Model {
        Model::new(Options {
            status_message: String::new(),
            services: Services::mock(),
            preloader: images.clone(),
            display: images,
            default_tab: tab,
            config_path: String::new(),
        })
    }

    /// Pumps async work until `done` holds or two seconds pass.
    fn settle(model: &mut Model, done: impl Fn(&Model) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            model.poll_async();
            if done(model) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("model did not settle");
    }

    fn idle(model: &Model) -> bool {
        !model.is_loading()
            && model
                .image
                .as_ref()
                .map_or(true, |img| img.display_token.is_none())
    }

    #[test]
    fn initial_load_fills_catalog_and_filters() {
        let mut model = model_with(StaticImages::new(true, true), Tab::Browse);
        settle(&mut model, idle);
        assert_eq!(model.gear.len(), 6);
        assert!(model.collection.is_empty());
        assert!(!model.filter_panel.categories.is_empty());
        assert!(!model.filter_panel.brands.is_empty());
        assert!(model.error.is_none());
        assert_eq!(model.image.as_ref().map(|img| img.gear_id), Some(model.gear[0].id));
    }

    #[test]
    fn adding_gear_updates_collection_title() {
        let mut model = model_with(StaticImages::new(true, true), Tab::Browse);
        settle(&mut model, idle);
        let first = model.gear[0].id;
        model.handle_key(KeyCode::Char('a')).unwrap();
        settle(&mut model, |m| m.in_collection(first) && idle(m));
        assert_eq!(Tab::Collection.title(model.collection.len()), "My Collection (1)");

        model.handle_key(KeyCode::Char('2')).unwrap();
        assert_eq!(model.selected_gear().map(|g| g.id), Some(first));
        model.handle_key(KeyCode::Char('d')).unwrap();
        settle(&mut model, |m| m.collection.is_empty() && idle(m));
        assert!(model.selected_gear().is_none());
    }

    #[test]
    fn category_filter_reloads_catalog() {
        let mut model = model_with(StaticImages::new(true, true), Tab::Browse);
        settle(&mut model, idle);
        model.handle_key(KeyCode::Char('f')).unwrap();
        model.handle_key(KeyCode::Right).unwrap();
        let category = model.filters.category.clone().expect("category selected");
        settle(&mut model, idle);
        assert!(!model.gear.is_empty());
        assert!(model.gear.iter().all(|g| g.category == category));

        model.handle_key(KeyCode::Esc).unwrap();
        model.handle_key(KeyCode::Char('c')).unwrap();
        settle(&mut model, idle);
        assert!(model.filters.is_empty());
        assert_eq!(model.gear.len(), 6);
    }

    #[test]
    fn price_inputs_apply_on_enter() {
        let mut model = model_with(StaticImages::new(true, true), Tab::Browse);
        settle(&mut model, idle);
        model.handle_key(KeyCode::Char('f')).unwrap();
        model.handle_key(KeyCode::Down).unwrap();
        model.handle_key(KeyCode::Down).unwrap();
        for ch in "50".chars() {
            model.handle_key(KeyCode::Char(ch)).unwrap();
        }
        model.handle_key(KeyCode::Enter).unwrap();
        assert_eq!(model.filters.min_price, Some(50.0));
        settle(&mut model, idle);
        assert!(model.gear.iter().all(|g| g.price.unwrap_or(0.0) >= 50.0));
    }

    #[test]
    fn display_failure_retries_once_then_falls_back() {
        let images = StaticImages::new(true, false);
        let mut model = model_with(images.clone(), Tab::Browse);
        settle(&mut model, |m| {
            idle(m)
                && m.image
                    .as_ref()
                    .is_some_and(|img| img.auto_retried && img.display == DisplayState::Failed)
        });
        assert_eq!(images.display_calls.load(Ordering::SeqCst), 2);
        let view = model.image.as_ref().map(ProductImage::view);
        assert!(matches!(
            view,
            Some(ImageView::Image {
                display: DisplayState::Failed,
                ..
            })
        ));
        let lines = image_lines(&view.unwrap_or(ImageView::Loading));
        assert_eq!(plain(&lines[1]), "Image Unavailable");
    }

    #[test]
    fn failed_preload_shows_fallback_without_display_fetch() {
        let images = StaticImages::new(false, true);
        let mut model = model_with(images.clone(), Tab::Browse);
        settle(&mut model, |m| {
            idle(m) && m.image.as_ref().is_some_and(|img| img.loader.has_error())
        });
        assert_eq!(model.image.as_ref().map(ProductImage::view), Some(ImageView::Fallback));
        assert_eq!(images.display_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scraper_tab_runs_a_scrape() {
        let mut model = model_with(StaticImages::new(true, true), Tab::Scraper);
        settle(&mut model, |m| {
            idle(m) && m.scraper.status.is_some() && !m.scraper.websites.is_empty()
        });
        model.handle_key(KeyCode::Right).unwrap();
        assert_eq!(model.scraper.selected_website, model.scraper.websites[0].name);
        model.handle_key(KeyCode::Char('s')).unwrap();
        settle(&mut model, |m| m.scraper.result.is_some() && idle(m));
        let report = model.scraper.result.as_ref().unwrap();
        assert_eq!(report.website, model.scraper.websites[0].name);
        assert!(model.scraper.error.is_none());
    }

    #[test]
    fn recommendations_load_when_tab_opens() {
        let mut model = model_with(StaticImages::new(true, true), Tab::Browse);
        settle(&mut model, idle);
        model.handle_key(KeyCode::Char('3')).unwrap();
        settle(&mut model, idle);
        assert!(!model.recommendations.items.is_empty());
    }

    #[test]
    fn more_like_this_narrows_to_category() {
        let mut model = model_with(StaticImages::new(true, true), Tab::Recommendations);
        settle(&mut model, |m| idle(m) && !m.recommendations.items.is_empty());
        let category = model.selected_gear().map(|g| g.category.clone()).unwrap();
        model.handle_key(KeyCode::Char('m')).unwrap();
        settle(&mut model, |m| m.picks_category.is_some() && idle(m));
        assert_eq!(model.picks_category.as_deref(), Some(category.as_str()));
        assert!(model.recommendations.items.iter().all(|g| g.category == category));

        model.handle_key(KeyCode::Char('r')).unwrap();
        settle(&mut model, |m| m.picks_category.is_none() && idle(m));
    }

    #[test]
    fn enter_refreshes_selected_item() {
        let mut model = model_with(StaticImages::new(true, true), Tab::Browse);
        settle(&mut model, idle);
        model.gear[0].name = "stale".into();
        model.handle_key(KeyCode::Enter).unwrap();
        settle(&mut model, |m| m.gear[0].name != "stale" && idle(m));
        assert!(model.status_message.starts_with("Refreshed"));
    }

    #[test]
    fn card_shows_three_tags_and_overflow() {
        let gear: Gear = serde_json::from_value(serde_json::json!({
            "id": 1,
            "name": "Starbuzz Carbine",
            "category": "hookah",
            "brand": "Starbuzz",
            "price": 249.0,
            "rating": 4.5,
            "review_count": 10,
            "description": "Stainless steel hookah",
            "compatibility_tags": ["a", "b", "c", "d", "e"],
            "specifications": {"height_cm": 70}
        }))
        .unwrap();
        let text: Vec<String> = gear_card_lines(&gear, false, &ImageView::Fallback, 40)
            .iter()
            .map(plain)
            .collect();
        assert!(text.contains(&"$249.00  ★★★★☆ (10)".to_string()));
        assert!(text.contains(&"[a] [b] [c] [+2 more] ".to_string()));
        assert!(text.contains(&"  height cm: 70".to_string()));
        assert!(text.contains(&"a: Add to Collection".to_string()));
    }

    #[test]
    fn filter_cycling_wraps_through_all() {
        let options = vec!["bowl".to_string(), "hose".to_string()];
        assert_eq!(cycle_filter(&options, &None, 1), Some("bowl".into()));
        assert_eq!(cycle_filter(&options, &Some("hose".into()), 1), None);
        assert_eq!(cycle_filter(&options, &None, -1), Some("hose".into()));
        assert_eq!(parse_price(" "), Ok(None));
        assert!(parse_price("abc").is_err());
        assert_eq!(truncate_to_width("abcdef", 4), "abc…");
    }

    #[test]
    fn default_tab_parses_config_names() {
        assert_eq!(Tab::from_config("Collection"), Tab::Collection);
        assert_eq!(Tab::from_config("scraper"), Tab::Scraper);
        assert_eq!(Tab::from_config("nonsense"), Tab::Browse);
    }
}
