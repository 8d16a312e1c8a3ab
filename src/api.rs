use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::USER_AGENT;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::model::{
    Envelope, FilterOptions, Gear, Recommendations, RecommendationsEnvelope, ScrapeReport,
    ScrapingStatus, UserGear, Website,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
/// Site name the trigger endpoint falls back to when none is chosen.
pub const DEMO_WEBSITE: &str = "demo";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Rejected(String),
    #[error("response carried no data")]
    MissingData,
    #[error("api error {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Serialize)]
struct AddGearBody {
    gear_id: i64,
}

#[derive(Debug, Serialize)]
struct TriggerBody<'a> {
    website: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base = config
            .base_url
            .filter(|base| !base.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        // Trailing slash so `join` appends instead of replacing the last segment.
        let base = format!("{}/", base.trim_end_matches('/'));
        let base_url = Url::parse(&base).with_context(|| format!("api: parse base url {base}"))?;
        let http = match config.http_client {
            Some(client) => client,
            // `None` disables the blocking client's default 30s limit.
            None => HttpClient::builder()
                .timeout(config.timeout)
                .build()
                .context("api: build http client")?,
        };
        let user_agent = if config.user_agent.trim().is_empty() {
            format!("hookah-tui/{}", crate::VERSION)
        } else {
            config.user_agent
        };

        Ok(Client {
            http,
            user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn list_gear(&self, filters: &FilterOptions) -> Result<Vec<Gear>> {
        let params = filters.to_params();
        self.get_data("gear/", &params).context("api: list gear")
    }

    pub fn gear(&self, id: i64) -> Result<Gear> {
        self.get_data(&format!("gear/{id}"), &[])
            .with_context(|| format!("api: fetch gear {id}"))
    }

    pub fn categories(&self) -> Result<Vec<String>> {
        self.get_data("gear/categories", &[])
            .context("api: list categories")
    }

    pub fn brands(&self) -> Result<Vec<String>> {
        self.get_data("gear/brands", &[]).context("api: list brands")
    }

    pub fn user_gear(&self) -> Result<Vec<UserGear>> {
        self.get_data("user/gear", &[])
            .context("api: list collection")
    }

    pub fn add_user_gear(&self, gear_id: i64) -> Result<UserGear> {
        let req = self
            .request(Method::POST, "user/gear", &[])?
            .json(&AddGearBody { gear_id });
        let env: Envelope<UserGear> = self.send(req).context("api: add to collection")?;
        unwrap_envelope(env).context("api: add to collection")
    }

    pub fn remove_user_gear(&self, gear_id: i64) -> Result<()> {
        let req = self.request(Method::DELETE, &format!("user/gear/{gear_id}"), &[])?;
        let env: Envelope<serde_json::Value> =
            self.send(req).context("api: remove from collection")?;
        check_envelope(&env).context("api: remove from collection")
    }

    pub fn recommendations(&self) -> Result<Recommendations> {
        let req = self.request(Method::GET, "recommendations/", &[])?;
        let env: RecommendationsEnvelope = self.send(req).context("api: recommendations")?;
        if !env.success {
            return Err(rejection(env.error, env.message)).context("api: recommendations");
        }
        Ok(Recommendations {
            items: env.data,
            kind: env.kind,
            user_gear_count: env.user_gear_count,
        })
    }

    pub fn category_recommendations(&self, category: &str) -> Result<Vec<Gear>> {
        let encoded = utf8_percent_encode(category, NON_ALPHANUMERIC).to_string();
        self.get_data(&format!("recommendations/category/{encoded}"), &[])
            .with_context(|| format!("api: recommendations for {category}"))
    }

    pub fn trigger_scrape(&self, website: Option<&str>, category: Option<&str>) -> Result<ScrapeReport> {
        let body = TriggerBody {
            website: website.filter(|w| !w.is_empty()).unwrap_or(DEMO_WEBSITE),
            category: category.filter(|c| !c.is_empty()),
        };
        let req = self.request(Method::POST, "scraper/trigger", &[])?.json(&body);
        let env: Envelope<ScrapeReport> = self.send(req).context("api: trigger scraping")?;
        if let Some(message) = env.message.as_deref() {
            debug!(message, "scrape finished");
        }
        unwrap_envelope(env).context("api: trigger scraping")
    }

    pub fn scrape_status(&self) -> Result<ScrapingStatus> {
        self.get_data("scraper/status", &[])
            .context("api: scraping status")
    }

    pub fn websites(&self) -> Result<Vec<Website>> {
        self.get_data("scraper/websites", &[])
            .context("api: list websites")
    }

    fn get_data<T>(&self, path: &str, params: &[(String, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let req = self.request(Method::GET, path, params)?;
        let env: Envelope<T> = self.send(req)?;
        Ok(unwrap_envelope(env)?)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
    ) -> Result<RequestBuilder> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        debug!(%method, %url, "api request");
        Ok(self
            .http
            .request(method, url)
            .header(USER_AGENT, self.user_agent.clone()))
    }

    /// Sends and decodes. Error statuses are still decoded when the body is
    /// an envelope, so the backend's own message reaches the user.
    fn send<T>(&self, req: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let resp: Response = req.send()?;
        let status = resp.status();
        let body = resp.text()?;
        if status.is_success() {
            return serde_json::from_str(&body).context("api: decode response");
        }
        if let Ok(env) = serde_json::from_str::<Envelope<serde_json::Value>>(&body) {
            if !env.success {
                return Err(rejection(env.error, env.message).into());
            }
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        }
        .into())
    }
}

fn rejection(error: Option<String>, message: Option<String>) -> ApiError {
    ApiError::Rejected(
        error
            .or(message)
            .unwrap_or_else(|| "request was not successful".to_string()),
    )
}

fn check_envelope<T>(env: &Envelope<T>) -> Result<(), ApiError> {
    if env.success {
        Ok(())
    } else {
        Err(rejection(env.error.clone(), env.message.clone()))
    }
}

fn unwrap_envelope<T>(env: Envelope<T>) -> Result<T, ApiError> {
    check_envelope(&env)?;
    env.data.ok_or(ApiError::MissingData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Arc;
    use std::thread;

    use parking_lot::Mutex;
    use tiny_http::{Header, Response as HttpResponse, Server};

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        url: String,
        body: String,
    }

    /// Answers every request with `reply(method, url)` and records what it saw.
    fn start_server<F>(reply: F) -> (String, Arc<Mutex<Vec<Seen>>>)
    where
        F: Fn(&str, &str) -> (u16, String) + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        thread::spawn(move || {
            for mut req in server.incoming_requests() {
                let mut body = String::new();
                let _ = req.as_reader().read_to_string(&mut body);
                let method = req.method().to_string();
                let url = req.url().to_string();
                let (status, payload) = reply(&method, &url);
                log.lock().push(Seen { method, url, body });
                let header = Header::from_bytes("Content-Type", "application/json").unwrap();
                let _ = req.respond(
                    HttpResponse::from_string(payload)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });
        (format!("http://{addr}/api"), seen)
    }

    fn client(base: String) -> Client {
        Client::new(ClientConfig {
            base_url: Some(base),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    const GEAR_JSON: &str = r#"{"id": 3, "name": "Kaloud Lotus", "category": "hmd", "brand": "Kaloud",
        "price": 39.0, "rating": 4.8, "review_count": 210, "specifications": {}, "compatibility_tags": ["phunnel"]}"#;

    #[test]
    fn list_gear_sends_filters_as_query() {
        let (base, seen) = start_server(|_, _| {
            (200, format!(r#"{{"success": true, "data": [{GEAR_JSON}], "count": 1}}"#))
        });
        let filters = FilterOptions {
            category: Some("hmd".into()),
            brand: Some("Kaloud".into()),
            min_price: Some(10.0),
            max_price: None,
        };
        let gear = client(base).list_gear(&filters).unwrap();
        assert_eq!(gear.len(), 1);
        assert_eq!(gear[0].name, "Kaloud Lotus");
        let seen = seen.lock();
        assert_eq!(seen[0].method, "GET");
        assert_eq!(
            seen[0].url,
            "/api/gear/?category=hmd&brand=Kaloud&min_price=10"
        );
    }

    #[test]
    fn unsuccessful_envelope_becomes_rejection() {
        let (base, _) = start_server(|_, _| {
            (404, r#"{"success": false, "error": "Gear not found"}"#.to_string())
        });
        let err = client(base).gear(99).unwrap_err();
        let api = err.downcast_ref::<ApiError>().unwrap();
        assert!(matches!(api, ApiError::Rejected(msg) if msg == "Gear not found"));
    }

    #[test]
    fn non_envelope_error_keeps_status() {
        let (base, _) = start_server(|_, _| (502, "bad gateway".to_string()));
        let err = client(base).brands().unwrap_err();
        let api = err.downcast_ref::<ApiError>().unwrap();
        assert!(matches!(api, ApiError::Status { status: 502, .. }));
    }

    #[test]
    fn collection_add_and_remove() {
        let (base, seen) = start_server(|method, _| match method {
            "POST" => (
                201,
                format!(
                    r#"{{"success": true, "data": {{"id": 1, "user_id": 1, "gear_id": 3, "gear": {GEAR_JSON}}}, "message": "Gear added to collection"}}"#
                ),
            ),
            _ => (
                200,
                r#"{"success": true, "message": "Gear removed from collection"}"#.to_string(),
            ),
        });
        let api = client(base);
        let added = api.add_user_gear(3).unwrap();
        assert_eq!(added.gear_id, 3);
        assert_eq!(added.gear.unwrap().brand, "Kaloud");
        api.remove_user_gear(3).unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0].url, "/api/user/gear");
        let body: serde_json::Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(body["gear_id"], 3);
        assert_eq!(seen[1].method, "DELETE");
        assert_eq!(seen[1].url, "/api/user/gear/3");
    }

    #[test]
    fn recommendations_keep_kind_and_collection_size() {
        let (base, _) = start_server(|_, _| {
            (
                200,
                format!(
                    r#"{{"success": true, "data": [{GEAR_JSON}], "count": 1, "type": "compatible", "user_gear_count": 2}}"#
                ),
            )
        });
        let recs = client(base).recommendations().unwrap();
        assert_eq!(recs.kind, crate::model::RecommendationKind::Compatible);
        assert_eq!(recs.user_gear_count, 2);
        assert_eq!(recs.items.len(), 1);
    }

    #[test]
    fn category_recommendations_encode_the_segment() {
        let (base, seen) =
            start_server(|_, _| (200, r#"{"success": true, "data": []}"#.to_string()));
        client(base).category_recommendations("heat mgmt").unwrap();
        assert_eq!(seen.lock()[0].url, "/api/recommendations/category/heat%20mgmt");
    }

    #[test]
    fn trigger_defaults_to_demo_site() {
        let (base, seen) = start_server(|_, _| {
            (
                200,
                r#"{"success": true, "message": "Scraping completed for demo",
                    "data": {"products_found": 12, "website": "demo", "details": {"added": 10, "updated": 2}}}"#
                    .to_string(),
            )
        });
        let api = client(base);
        let report = api.trigger_scrape(None, Some("")).unwrap();
        assert_eq!(report.products_found, 12);
        assert_eq!(report.details.unwrap().added, 10);

        let body: serde_json::Value = serde_json::from_str(&seen.lock()[0].body).unwrap();
        assert_eq!(body, serde_json::json!({"website": "demo"}));
    }

    #[test]
    fn trigger_passes_site_and_category() {
        let (base, seen) = start_server(|_, _| {
            (
                200,
                r#"{"success": true, "data": {"products_found": 3, "website": "5starhookah", "category": "bowl"}}"#
                    .to_string(),
            )
        });
        let report = client(base)
            .trigger_scrape(Some("5starhookah"), Some("bowl"))
            .unwrap();
        assert_eq!(report.category.as_deref(), Some("bowl"));
        let body: serde_json::Value = serde_json::from_str(&seen.lock()[0].body).unwrap();
        assert_eq!(body["website"], "5starhookah");
        assert_eq!(body["category"], "bowl");
    }

    #[test]
    fn base_url_without_trailing_slash_keeps_prefix() {
        let api = client("http://example.com/api".into());
        assert_eq!(api.base_url().as_str(), "http://example.com/api/");
        assert_eq!(
            api.base_url().join("scraper/status").unwrap().as_str(),
            "http://example.com/api/scraper/status"
        );
    }
}
