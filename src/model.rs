use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Every backend response is wrapped in this envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gear {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub brand: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub product_url: Option<String>,
    /// Free-form key/value data; shape varies per source site.
    #[serde(default, deserialize_with = "null_as_default")]
    pub specifications: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub compatibility_tags: Vec<String>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: i64,
    #[serde(default)]
    pub source_website: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Gear {
    pub fn price_label(&self) -> Option<String> {
        self.price.map(|price| format!("${price:.2}"))
    }

    /// Five stars: full for each whole point, one open star for a fractional
    /// part, open stars for the rest.
    pub fn stars(&self) -> String {
        let rating = self.rating.clamp(0.0, 5.0);
        let full = rating.floor() as usize;
        let half = rating.fract() != 0.0;
        let empty = 5 - full - usize::from(half);
        let mut out = "★".repeat(full);
        if half {
            out.push('☆');
        }
        out.push_str(&"☆".repeat(empty));
        out
    }

    /// First `limit` tags plus a `+N more` marker when some were cut.
    pub fn tag_summary(&self, limit: usize) -> Vec<String> {
        let mut tags: Vec<String> = self
            .compatibility_tags
            .iter()
            .take(limit)
            .cloned()
            .collect();
        if self.compatibility_tags.len() > limit {
            tags.push(format!("+{} more", self.compatibility_tags.len() - limit));
        }
        tags
    }

    pub fn updated_display(&self) -> Option<String> {
        let raw = self.updated_at.as_deref().or(self.created_at.as_deref())?;
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .ok()
            .or_else(|| Some(raw.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserGear {
    pub id: i64,
    #[serde(default)]
    pub user_id: i64,
    pub gear_id: i64,
    #[serde(default)]
    pub gear: Option<Gear>,
    #[serde(default)]
    pub added_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self == &FilterOptions::default()
    }

    /// Query pairs in the order the catalog endpoint documents them; unset
    /// filters are omitted.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(category) = self.category.as_ref().filter(|s| !s.is_empty()) {
            params.push(("category".into(), category.clone()));
        }
        if let Some(brand) = self.brand.as_ref().filter(|s| !s.is_empty()) {
            params.push(("brand".into(), brand.clone()));
        }
        if let Some(min) = self.min_price {
            params.push(("min_price".into(), min.to_string()));
        }
        if let Some(max) = self.max_price {
            params.push(("max_price".into(), max.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Compatible,
    #[default]
    Popular,
}

impl RecommendationKind {
    pub fn label(&self) -> &'static str {
        match self {
            RecommendationKind::Compatible => "Compatible with your collection",
            RecommendationKind::Popular => "Popular picks",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recommendations {
    pub items: Vec<Gear>,
    pub kind: RecommendationKind,
    pub user_gear_count: i64,
}

/// Raw shape of the recommendations response, which extends the envelope.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RecommendationsEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Gear>,
    #[serde(default, rename = "type")]
    pub kind: RecommendationKind,
    #[serde(default)]
    pub user_gear_count: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeDetails {
    #[serde(default)]
    pub added: i64,
    #[serde(default)]
    pub updated: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeReport {
    #[serde(default)]
    pub products_found: i64,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub details: Option<ScrapeDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapingStatus {
    #[serde(default)]
    pub total_products: i64,
    #[serde(default)]
    pub categories: i64,
    #[serde(default)]
    pub brands: i64,
    #[serde(default)]
    pub websites: Option<i64>,
    #[serde(default)]
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Source selector meaning "every known site".
pub const ALL_WEBSITES: &str = "all";
/// Categories offered when no single source is selected.
pub const DEFAULT_SCRAPE_CATEGORIES: [&str; 4] = ["hookah", "bowl", "hose", "hmd"];

pub fn scrape_categories_for(websites: &[Website], selected: &str) -> Vec<String> {
    if selected == ALL_WEBSITES {
        return DEFAULT_SCRAPE_CATEGORIES
            .iter()
            .map(|s| s.to_string())
            .collect();
    }
    websites
        .iter()
        .find(|site| site.name == selected)
        .map(|site| site.categories.clone())
        .unwrap_or_default()
}

/// `hmd` → `Hmd`; used for category pickers.
pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let value = Option::<T>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gear_with(rating: f64, tags: &[&str]) -> Gear {
        Gear {
            id: 1,
            name: "Khalil Mamoon Trimetal".into(),
            category: "hookah".into(),
            brand: "Khalil Mamoon".into(),
            model: None,
            description: None,
            price: Some(189.5),
            image_url: None,
            product_url: None,
            specifications: Map::new(),
            compatibility_tags: tags.iter().map(|t| t.to_string()).collect(),
            rating,
            review_count: 12,
            source_website: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn decodes_gear_with_loose_specifications() {
        let raw = r#"{
            "id": 7,
            "name": "Phunnel Bowl",
            "category": "bowl",
            "brand": "Kaloud",
            "price": 24.99,
            "image_url": "https://example.com/bowl.png",
            "specifications": {"material": "clay", "capacity_g": 20, "glazed": true},
            "compatibility_tags": null,
            "rating": 4.5,
            "review_count": 88,
            "created_at": "2024-03-01T10:00:00.123456",
            "updated_at": null
        }"#;
        let gear: Gear = serde_json::from_str(raw).unwrap();
        assert_eq!(gear.id, 7);
        assert!(gear.compatibility_tags.is_empty());
        let keys: Vec<&str> = gear.specifications.keys().map(String::as_str).collect();
        assert_eq!(keys, ["material", "capacity_g", "glazed"]);
        assert_eq!(gear.specifications["capacity_g"], Value::from(20));
        assert_eq!(gear.updated_display().as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn stars_cover_full_half_and_empty() {
        assert_eq!(gear_with(4.5, &[]).stars(), "★★★★☆");
        assert_eq!(gear_with(3.0, &[]).stars(), "★★★☆☆");
        assert_eq!(gear_with(0.0, &[]).stars(), "☆☆☆☆☆");
        assert_eq!(gear_with(5.0, &[]).stars(), "★★★★★");
        assert_eq!(gear_with(2.2, &[]).stars().chars().count(), 5);
    }

    #[test]
    fn tag_summary_truncates_after_three() {
        let gear = gear_with(4.0, &["egyptian", "phunnel", "kaloud", "hmd"]);
        assert_eq!(gear.tag_summary(3), ["egyptian", "phunnel", "kaloud", "+1 more"]);
        assert_eq!(gear_with(4.0, &["egyptian"]).tag_summary(3), ["egyptian"]);
    }

    #[test]
    fn filter_params_skip_unset_values() {
        let filters = FilterOptions {
            category: Some("hose".into()),
            brand: Some(String::new()),
            min_price: None,
            max_price: Some(50.0),
        };
        assert_eq!(
            filters.to_params(),
            vec![
                ("category".to_string(), "hose".to_string()),
                ("max_price".to_string(), "50".to_string()),
            ]
        );
        assert!(FilterOptions::default().is_empty());
    }

    #[test]
    fn scrape_categories_depend_on_source() {
        let sites = vec![Website {
            name: "5starhookah".into(),
            display_name: "5 Star Hookah".into(),
            url: "https://5starhookah.com".into(),
            categories: vec!["hookah".into(), "hose".into()],
        }];
        assert_eq!(scrape_categories_for(&sites, ALL_WEBSITES).len(), 4);
        assert_eq!(scrape_categories_for(&sites, "5starhookah"), ["hookah", "hose"]);
        assert!(scrape_categories_for(&sites, "unknown").is_empty());
        assert_eq!(capitalize("hmd"), "Hmd");
    }

    #[test]
    fn recommendations_envelope_defaults_user_count() {
        let raw = r#"{"success": true, "data": [], "count": 0, "type": "popular"}"#;
        let env: RecommendationsEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.kind, RecommendationKind::Popular);
        assert_eq!(env.user_gear_count, 0);
    }
}
