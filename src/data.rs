use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::api;
use crate::model::{
    FilterOptions, Gear, RecommendationKind, Recommendations, ScrapeDetails, ScrapeReport,
    ScrapingStatus, UserGear, Website,
};

pub trait CatalogService: Send + Sync {
    fn list_gear(&self, filters: &FilterOptions) -> Result<Vec<Gear>>;
    fn gear(&self, id: i64) -> Result<Gear>;
    fn categories(&self) -> Result<Vec<String>>;
    fn brands(&self) -> Result<Vec<String>>;
}

pub trait CollectionService: Send + Sync {
    fn list(&self) -> Result<Vec<UserGear>>;
    fn add(&self, gear_id: i64) -> Result<UserGear>;
    fn remove(&self, gear_id: i64) -> Result<()>;
}

pub trait RecommendationService: Send + Sync {
    fn recommendations(&self) -> Result<Recommendations>;
    fn for_category(&self, category: &str) -> Result<Vec<Gear>>;
}

pub trait ScraperService: Send + Sync {
    fn trigger(&self, website: Option<&str>, category: Option<&str>) -> Result<ScrapeReport>;
    fn status(&self) -> Result<ScrapingStatus>;
    fn websites(&self) -> Result<Vec<Website>>;
}

/// The four services the UI talks to, bundled for injection.
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<dyn CatalogService + Send + Sync>,
    pub collection: Arc<dyn CollectionService + Send + Sync>,
    pub recommendations: Arc<dyn RecommendationService + Send + Sync>,
    pub scraper: Arc<dyn ScraperService + Send + Sync>,
}

impl Services {
    pub fn from_client(client: Arc<api::Client>) -> Self {
        Self {
            catalog: Arc::new(ApiCatalogService::new(client.clone())),
            collection: Arc::new(ApiCollectionService::new(client.clone())),
            recommendations: Arc::new(ApiRecommendationService::new(client.clone())),
            scraper: Arc::new(ApiScraperService::new(client)),
        }
    }

    pub fn mock() -> Self {
        let backend = Arc::new(MockBackend::default());
        Self {
            catalog: backend.clone(),
            collection: backend.clone(),
            recommendations: backend.clone(),
            scraper: backend,
        }
    }
}

pub struct ApiCatalogService {
    client: Arc<api::Client>,
}

impl ApiCatalogService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CatalogService for ApiCatalogService {
    fn list_gear(&self, filters: &FilterOptions) -> Result<Vec<Gear>> {
        self.client.list_gear(filters)
    }

    fn gear(&self, id: i64) -> Result<Gear> {
        self.client.gear(id)
    }

    fn categories(&self) -> Result<Vec<String>> {
        self.client.categories()
    }

    fn brands(&self) -> Result<Vec<String>> {
        self.client.brands()
    }
}

pub struct ApiCollectionService {
    client: Arc<api::Client>,
}

impl ApiCollectionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CollectionService for ApiCollectionService {
    fn list(&self) -> Result<Vec<UserGear>> {
        self.client.user_gear()
    }

    fn add(&self, gear_id: i64) -> Result<UserGear> {
        self.client.add_user_gear(gear_id)
    }

    fn remove(&self, gear_id: i64) -> Result<()> {
        self.client.remove_user_gear(gear_id)
    }
}

pub struct ApiRecommendationService {
    client: Arc<api::Client>,
}

impl ApiRecommendationService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl RecommendationService for ApiRecommendationService {
    fn recommendations(&self) -> Result<Recommendations> {
        self.client.recommendations()
    }

    fn for_category(&self, category: &str) -> Result<Vec<Gear>> {
        self.client.category_recommendations(category)
    }
}

pub struct ApiScraperService {
    client: Arc<api::Client>,
}

impl ApiScraperService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ScraperService for ApiScraperService {
    fn trigger(&self, website: Option<&str>, category: Option<&str>) -> Result<ScrapeReport> {
        self.client
            .trigger_scrape(website, category)
            .context("trigger data collection")
    }

    fn status(&self) -> Result<ScrapingStatus> {
        self.client.scrape_status()
    }

    fn websites(&self) -> Result<Vec<Website>> {
        self.client.websites()
    }
}

/// In-memory stand-in for the whole backend, used by `--offline` and tests.
pub struct MockBackend {
    gear: Mutex<Vec<Gear>>,
    collection: Mutex<Vec<UserGear>>,
    next_entry_id: Mutex<i64>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            gear: Mutex::new(sample_gear()),
            collection: Mutex::new(Vec::new()),
            next_entry_id: Mutex::new(1),
        }
    }
}

impl MockBackend {
    fn owned_ids(&self) -> HashSet<i64> {
        self.collection.lock().iter().map(|ug| ug.gear_id).collect()
    }
}

impl CatalogService for MockBackend {
    fn list_gear(&self, filters: &FilterOptions) -> Result<Vec<Gear>> {
        Ok(self
            .gear
            .lock()
            .iter()
            .filter(|g| filters.category.as_ref().map_or(true, |c| &g.category == c))
            .filter(|g| filters.brand.as_ref().map_or(true, |b| &g.brand == b))
            .filter(|g| {
                filters
                    .min_price
                    .map_or(true, |min| g.price.is_some_and(|p| p >= min))
            })
            .filter(|g| {
                filters
                    .max_price
                    .map_or(true, |max| g.price.is_some_and(|p| p <= max))
            })
            .cloned()
            .collect())
    }

    fn gear(&self, id: i64) -> Result<Gear> {
        self.gear
            .lock()
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| anyhow!(api::ApiError::Rejected("Gear not found".into())))
    }

    fn categories(&self) -> Result<Vec<String>> {
        Ok(distinct(self.gear.lock().iter().map(|g| g.category.clone())))
    }

    fn brands(&self) -> Result<Vec<String>> {
        Ok(distinct(self.gear.lock().iter().map(|g| g.brand.clone())))
    }
}

impl CollectionService for MockBackend {
    fn list(&self) -> Result<Vec<UserGear>> {
        Ok(self.collection.lock().clone())
    }

    fn add(&self, gear_id: i64) -> Result<UserGear> {
        let gear = self.gear(gear_id)?;
        let mut collection = self.collection.lock();
        if collection.iter().any(|ug| ug.gear_id == gear_id) {
            bail!(api::ApiError::Rejected("Gear already in collection".into()));
        }
        let mut next = self.next_entry_id.lock();
        let entry = UserGear {
            id: *next,
            user_id: 1,
            gear_id,
            gear: Some(gear),
            added_at: Some(chrono::Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string()),
        };
        *next += 1;
        collection.push(entry.clone());
        Ok(entry)
    }

    fn remove(&self, gear_id: i64) -> Result<()> {
        let mut collection = self.collection.lock();
        let before = collection.len();
        collection.retain(|ug| ug.gear_id != gear_id);
        if collection.len() == before {
            bail!(api::ApiError::Rejected("Gear not found in collection".into()));
        }
        Ok(())
    }
}

impl RecommendationService for MockBackend {
    fn recommendations(&self) -> Result<Recommendations> {
        let owned = self.owned_ids();
        let mut catalog = self.gear.lock().clone();
        catalog.sort_by(|a, b| b.rating.total_cmp(&a.rating));

        if owned.is_empty() {
            catalog.truncate(10);
            return Ok(Recommendations {
                items: catalog,
                kind: RecommendationKind::Popular,
                user_gear_count: 0,
            });
        }

        let mine: Vec<&Gear> = catalog.iter().filter(|g| owned.contains(&g.id)).collect();
        let tags: HashSet<&str> = mine
            .iter()
            .flat_map(|g| g.compatibility_tags.iter().map(String::as_str))
            .collect();
        let categories: HashSet<&str> = mine.iter().map(|g| g.category.as_str()).collect();

        let mut picks: Vec<Gear> = catalog
            .iter()
            .filter(|g| !owned.contains(&g.id))
            .filter(|g| g.compatibility_tags.iter().any(|t| tags.contains(t.as_str())))
            .take(20)
            .cloned()
            .collect();
        if picks.len() < 10 {
            picks.extend(
                catalog
                    .iter()
                    .filter(|g| !owned.contains(&g.id) && !categories.contains(g.category.as_str()))
                    .take(10)
                    .cloned(),
            );
        }
        let mut seen = HashSet::new();
        picks.retain(|g| seen.insert(g.id));
        picks.truncate(15);

        Ok(Recommendations {
            items: picks,
            kind: RecommendationKind::Compatible,
            user_gear_count: owned.len() as i64,
        })
    }

    fn for_category(&self, category: &str) -> Result<Vec<Gear>> {
        let owned = self.owned_ids();
        let catalog = self.gear.lock();
        let tags: HashSet<&str> = catalog
            .iter()
            .filter(|g| owned.contains(&g.id))
            .flat_map(|g| g.compatibility_tags.iter().map(String::as_str))
            .collect();
        let mut picks: Vec<Gear> = catalog
            .iter()
            .filter(|g| g.category == category && !owned.contains(&g.id))
            .filter(|g| {
                tags.is_empty() || g.compatibility_tags.iter().any(|t| tags.contains(t.as_str()))
            })
            .cloned()
            .collect();
        picks.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        picks.truncate(10);
        Ok(picks)
    }
}

impl ScraperService for MockBackend {
    fn trigger(&self, website: Option<&str>, category: Option<&str>) -> Result<ScrapeReport> {
        let website = website.unwrap_or(api::DEMO_WEBSITE).to_string();
        let found = self
            .gear
            .lock()
            .iter()
            .filter(|g| category.map_or(true, |c| g.category == c))
            .count() as i64;
        Ok(ScrapeReport {
            products_found: found,
            website,
            category: category.map(str::to_string),
            details: Some(ScrapeDetails {
                added: 0,
                updated: found,
            }),
        })
    }

    fn status(&self) -> Result<ScrapingStatus> {
        let gear = self.gear.lock();
        let websites = distinct(gear.iter().filter_map(|g| g.source_website.clone()));
        Ok(ScrapingStatus {
            total_products: gear.len() as i64,
            categories: distinct(gear.iter().map(|g| g.category.clone())).len() as i64,
            brands: distinct(gear.iter().map(|g| g.brand.clone())).len() as i64,
            websites: Some(websites.len() as i64),
            last_updated: "2024-01-01".into(),
        })
    }

    fn websites(&self) -> Result<Vec<Website>> {
        Ok(vec![
            Website {
                name: "5starhookah".into(),
                display_name: "5 Star Hookah".into(),
                url: "https://www.5starhookah.com".into(),
                categories: vec!["hookah".into(), "bowl".into(), "hose".into(), "hmd".into()],
            },
            Website {
                name: "hookah-shisha".into(),
                display_name: "Hookah-Shisha".into(),
                url: "https://www.hookah-shisha.com".into(),
                categories: vec!["hookah".into(), "bowl".into()],
            },
        ])
    }
}

fn distinct(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.filter(|v| seen.insert(v.clone())).collect()
}

fn spec(pairs: Value) -> Map<String, Value> {
    match pairs {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[allow(clippy::too_many_arguments)]
fn sample(
    id: i64,
    name: &str,
    category: &str,
    brand: &str,
    price: f64,
    image: &str,
    specifications: Value,
    tags: &[&str],
    rating: f64,
    reviews: i64,
) -> Gear {
    Gear {
        id,
        name: name.into(),
        category: category.into(),
        brand: brand.into(),
        model: None,
        description: None,
        price: Some(price),
        image_url: if image.is_empty() {
            None
        } else {
            Some(image.into())
        },
        product_url: Some(format!("https://example.com/gear/{id}")),
        specifications: spec(specifications),
        compatibility_tags: tags.iter().map(|t| t.to_string()).collect(),
        rating,
        review_count: reviews,
        source_website: Some("demo".into()),
        created_at: Some("2024-01-01T00:00:00".into()),
        updated_at: None,
    }
}

fn sample_gear() -> Vec<Gear> {
    let mut gear = vec![
        sample(
            1,
            "Khalil Mamoon Classic",
            "hookah",
            "Khalil Mamoon",
            89.99,
            "https://example.com/km-classic.jpg",
            json!({"height": "28 inches", "material": "brass", "hose_ports": 1}),
            &["standard_hose", "egyptian_bowl", "wide_base"],
            4.5,
            127,
        ),
        sample(
            2,
            "Shika Hookah",
            "hookah",
            "Shika",
            149.99,
            "https://example.com/shika-v4.jpg",
            json!({"height": "32 inches", "material": "stainless_steel", "hose_ports": 2}),
            &["modern_hose", "phunnel_bowl", "wide_base", "multi_port"],
            4.7,
            89,
        ),
        sample(
            3,
            "Kaloud Lotus Bowl",
            "bowl",
            "Kaloud",
            34.99,
            "https://example.com/kaloud-lotus.jpg",
            json!({"material": "ceramic", "capacity": "25-30g"}),
            &["kaloud_lotus_hmd", "ceramic", "heat_management"],
            4.8,
            234,
        ),
        sample(
            4,
            "Egyptian Clay Bowl",
            "bowl",
            "Traditional",
            12.99,
            "https://example.com/egyptian-bowl.jpg",
            json!({"material": "clay", "capacity": "15-20g"}),
            &["egyptian_bowl", "clay"],
            4.0,
            56,
        ),
        sample(
            5,
            "Washable Silicone Hose",
            "hose",
            "Kaya",
            19.99,
            "https://example.com/silicone-hose.png",
            json!({"length": "72 inches", "washable": true}),
            &["standard_hose", "modern_hose"],
            4.3,
            310,
        ),
        sample(
            6,
            "Kaloud Lotus I+",
            "hmd",
            "Kaloud",
            39.99,
            "",
            json!({"material": "aluminum"}),
            &["kaloud_lotus_hmd", "heat_management"],
            4.9,
            512,
        ),
    ];
    gear[0].description = Some("Traditional Egyptian hookah with brass construction".into());
    gear[2].description = Some("Premium ceramic bowl designed for heat management".into());
    gear
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_filters_by_category_and_price() {
        let backend = MockBackend::default();
        let bowls = backend
            .list_gear(&FilterOptions {
                category: Some("bowl".into()),
                ..FilterOptions::default()
            })
            .unwrap();
        assert_eq!(bowls.len(), 2);

        let cheap = backend
            .list_gear(&FilterOptions {
                max_price: Some(20.0),
                ..FilterOptions::default()
            })
            .unwrap();
        assert!(cheap.iter().all(|g| g.price.unwrap() <= 20.0));
        assert_eq!(cheap.len(), 2);
    }

    #[test]
    fn mock_collection_rejects_duplicates_and_unknown_ids() {
        let backend = MockBackend::default();
        backend.add(3).unwrap();
        let err = backend.add(3).unwrap_err();
        assert_eq!(err.to_string(), "Gear already in collection");
        assert!(backend.add(999).is_err());
        assert_eq!(backend.list().unwrap().len(), 1);

        backend.remove(3).unwrap();
        assert!(backend.remove(3).is_err());
        assert!(backend.list().unwrap().is_empty());
    }

    #[test]
    fn mock_recommendations_switch_to_compatible() {
        let backend = MockBackend::default();
        let popular = backend.recommendations().unwrap();
        assert_eq!(popular.kind, RecommendationKind::Popular);
        assert_eq!(popular.items[0].id, 6);

        backend.add(3).unwrap();
        let compatible = backend.recommendations().unwrap();
        assert_eq!(compatible.kind, RecommendationKind::Compatible);
        assert_eq!(compatible.user_gear_count, 1);
        assert!(compatible.items.iter().all(|g| g.id != 3));
        assert_eq!(compatible.items[0].id, 6);
    }
}
