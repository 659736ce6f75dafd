//! DigitalOcean API v2 client.

use std::fmt;

use async_trait::async_trait;
use drops_core::{ComputeCreateRequest, ObservedCompute, ObservedVolume, VolumeCreateRequest};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::{Cancel, DropletAction, Provider, ProviderError, RetryPolicy};

pub const DEFAULT_API_URL: &str = "https://api.digitalocean.com";
pub const DEFAULT_PER_PAGE: u32 = 50;

#[derive(Clone)]
pub struct DigitalOcean {
    http: Client,
    base_url: String,
    token: String,
    per_page: u32,
    retry: RetryPolicy,
}

impl fmt::Debug for DigitalOcean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalOcean")
            .field("base_url", &self.base_url)
            .field("per_page", &self.per_page)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DigitalOcean {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            per_page: DEFAULT_PER_PAGE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, 200);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, method: Method, url: &str, body: Option<&serde_json::Value>) -> Result<Response, ProviderError> {
        let mut req = self.http.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(ProviderError::Api {
            status: status.as_u16(),
            message: api_message(&text),
        })
    }

    /// One mutating call, retried as a unit.
    async fn mutate(
        &self,
        cancel: &Cancel,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(), ProviderError> {
        let url = &self.url(path);
        let body = body.as_ref();
        let this = self;
        let method = &method;
        let status = self
            .retry
            .run(operation, cancel, move || async move {
                this.execute(method.clone(), url, body).await.map(|r| r.status())
            })
            .await?;
        info!("{operation} returned {status}");
        Ok(())
    }

    /// Walks `path` page by page until the provider reports no next page.
    async fn list_all<P: Page>(&self, cancel: &Cancel, operation: &str, path: &str) -> Result<Vec<P::Item>, ProviderError> {
        let mut out = Vec::new();
        let mut page = 1u32;
        loop {
            let url = &format!("{}?page={page}&per_page={}", self.url(path), self.per_page);
            let this = self;
            let body: P = self
                .retry
                .run(operation, cancel, move || async move {
                    let resp = this.execute(Method::GET, url, None).await?;
                    resp.json::<P>()
                        .await
                        .map_err(|e| ProviderError::Decode(e.to_string()))
                })
                .await?;
            let (items, more) = body.into_parts();
            debug!("{operation} page {page}: {} item(s)", items.len());
            out.extend(items);
            if !more {
                break;
            }
            page += 1;
        }
        Ok(out)
    }
}

#[async_trait]
impl Provider for DigitalOcean {
    async fn list_compute(&self, cancel: &Cancel) -> Result<Vec<ObservedCompute>, ProviderError> {
        self.list_all::<DropletsPage>(cancel, "list droplets", "/v2/droplets")
            .await
    }

    async fn list_volumes(&self, cancel: &Cancel) -> Result<Vec<ObservedVolume>, ProviderError> {
        self.list_all::<VolumesPage>(cancel, "list volumes", "/v2/volumes")
            .await
    }

    async fn create_compute(&self, cancel: &Cancel, request: &ComputeCreateRequest) -> Result<(), ProviderError> {
        let body = to_body(request)?;
        let op = format!("create droplet {}", request.name);
        self.mutate(cancel, &op, Method::POST, "/v2/droplets", Some(body))
            .await
    }

    async fn delete_compute(&self, cancel: &Cancel, id: u64) -> Result<(), ProviderError> {
        let op = format!("delete droplet {id}");
        self.mutate(cancel, &op, Method::DELETE, &format!("/v2/droplets/{id}"), None)
            .await
    }

    async fn act_on_compute(&self, cancel: &Cancel, id: u64, action: DropletAction<'_>) -> Result<(), ProviderError> {
        let body = match action {
            DropletAction::Resize { size } => json!({ "type": "resize", "size": size, "disk": true }),
            DropletAction::Rebuild { image } => json!({ "type": "rebuild", "image": image }),
        };
        let op = format!("droplet {id} {action}");
        self.mutate(cancel, &op, Method::POST, &format!("/v2/droplets/{id}/actions"), Some(body))
            .await
    }

    async fn create_volume(&self, cancel: &Cancel, request: &VolumeCreateRequest) -> Result<(), ProviderError> {
        let body = to_body(request)?;
        let op = format!("create volume {}", request.name);
        self.mutate(cancel, &op, Method::POST, "/v2/volumes", Some(body))
            .await
    }

    async fn delete_volume(&self, cancel: &Cancel, id: &str) -> Result<(), ProviderError> {
        let op = format!("delete volume {id}");
        self.mutate(cancel, &op, Method::DELETE, &format!("/v2/volumes/{id}"), None)
            .await
    }

    async fn resize_volume(
        &self,
        cancel: &Cancel,
        id: &str,
        region: &str,
        size_gigabytes: u64,
    ) -> Result<(), ProviderError> {
        let body = json!({ "type": "resize", "size_gigabytes": size_gigabytes, "region": region });
        let op = format!("resize volume {id} to {size_gigabytes}GB");
        self.mutate(cancel, &op, Method::POST, &format!("/v2/volumes/{id}/actions"), Some(body))
            .await
    }

    async fn attach_volume(&self, cancel: &Cancel, volume_id: &str, droplet_id: u64) -> Result<(), ProviderError> {
        let body = json!({ "type": "attach", "droplet_id": droplet_id });
        let op = format!("attach volume {volume_id} to droplet {droplet_id}");
        self.mutate(cancel, &op, Method::POST, &format!("/v2/volumes/{volume_id}/actions"), Some(body))
            .await
    }

    async fn detach_volume(&self, cancel: &Cancel, volume_id: &str, droplet_id: u64) -> Result<(), ProviderError> {
        let body = json!({ "type": "detach", "droplet_id": droplet_id });
        let op = format!("detach volume {volume_id} from droplet {droplet_id}");
        self.mutate(cancel, &op, Method::POST, &format!("/v2/volumes/{volume_id}/actions"), Some(body))
            .await
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<serde_json::Value, ProviderError> {
    serde_json::to_value(value).map_err(|e| ProviderError::Decode(e.to_string()))
}

/// Prefers the `message` field of an API error document over the raw body.
fn api_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiError {
        message: String,
    }
    match serde_json::from_str::<ApiError>(body) {
        Ok(e) => e.message,
        Err(_) => body.trim().to_string(),
    }
}

trait Page: DeserializeOwned + Send {
    type Item: Send;
    /// Items on this page and whether another page follows.
    fn into_parts(self) -> (Vec<Self::Item>, bool);
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    pages: Option<Pages>,
}

#[derive(Debug, Default, Deserialize)]
struct Pages {
    #[serde(default)]
    next: Option<String>,
}

impl Links {
    fn has_next(&self) -> bool {
        self.pages.as_ref().is_some_and(|p| p.next.is_some())
    }
}

#[derive(Debug, Deserialize)]
struct DropletsPage {
    #[serde(default)]
    droplets: Vec<WireDroplet>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct WireDroplet {
    id: u64,
    name: String,
    #[serde(default)]
    size_slug: Option<String>,
    #[serde(default)]
    image: Option<WireImage>,
    #[serde(default)]
    volume_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireImage {
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VolumesPage {
    #[serde(default)]
    volumes: Vec<WireVolume>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct WireVolume {
    id: String,
    name: String,
    #[serde(default)]
    region: Option<WireRegion>,
    #[serde(default)]
    size_gigabytes: u64,
}

#[derive(Debug, Deserialize)]
struct WireRegion {
    slug: String,
}

impl From<WireDroplet> for ObservedCompute {
    fn from(d: WireDroplet) -> Self {
        ObservedCompute {
            id: d.id,
            name: d.name,
            size_slug: d.size_slug,
            image_slug: d.image.and_then(|i| i.slug),
            volume_ids: d.volume_ids,
        }
    }
}

impl From<WireVolume> for ObservedVolume {
    fn from(v: WireVolume) -> Self {
        ObservedVolume {
            id: v.id,
            name: v.name,
            region: v.region.map(|r| r.slug).unwrap_or_default(),
            size_gigabytes: v.size_gigabytes,
        }
    }
}

impl Page for DropletsPage {
    type Item = ObservedCompute;

    fn into_parts(self) -> (Vec<ObservedCompute>, bool) {
        let more = self.links.has_next();
        (self.droplets.into_iter().map(Into::into).collect(), more)
    }
}

impl Page for VolumesPage {
    type Item = ObservedVolume;

    fn into_parts(self) -> (Vec<ObservedVolume>, bool) {
        let more = self.links.has_next();
        (self.volumes.into_iter().map(Into::into).collect(), more)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn droplet_page_maps_slugs_and_next_link() {
        let body = r#"{
            "droplets": [
                {"id": 3164444, "name": "web-1", "size_slug": "s-1vcpu-1gb",
                 "image": {"id": 1, "slug": "ubuntu-22-04-x64"}, "volume_ids": ["vol-a"]},
                {"id": 3164445, "name": "custom", "size_slug": "s-1vcpu-2gb",
                 "image": {"id": 2, "slug": null}}
            ],
            "links": {"pages": {"next": "https://api.digitalocean.com/v2/droplets?page=2"}},
            "meta": {"total": 3}
        }"#;
        let page: DropletsPage = serde_json::from_str(body).unwrap();
        let (items, more) = page.into_parts();
        assert!(more);
        assert_eq!(items[0].image_slug.as_deref(), Some("ubuntu-22-04-x64"));
        assert_eq!(items[0].volume_ids, vec!["vol-a".to_string()]);
        assert_eq!(items[1].image_slug, None);
        assert!(items[1].volume_ids.is_empty());
    }

    #[test]
    fn last_page_has_no_next_link() {
        let body = r#"{
            "volumes": [{"id": "506f78a4", "name": "data", "region": {"slug": "nyc3"}, "size_gigabytes": 100}],
            "links": {"pages": {"prev": "https://api.digitalocean.com/v2/volumes?page=1"}}
        }"#;
        let page: VolumesPage = serde_json::from_str(body).unwrap();
        let (items, more) = page.into_parts();
        assert!(!more);
        assert_eq!(items[0].region, "nyc3");
        assert_eq!(items[0].size_gigabytes, 100);
    }

    #[test]
    fn empty_links_mean_single_page() {
        let page: DropletsPage = serde_json::from_str(r#"{"droplets": [], "links": {}}"#).unwrap();
        assert!(!page.into_parts().1);
    }

    #[test]
    fn api_message_prefers_message_field() {
        assert_eq!(
            api_message(r#"{"id": "unprocessable_entity", "message": "invalid size"}"#),
            "invalid size"
        );
        assert_eq!(api_message("  gateway timeout \n"), "gateway timeout");
    }

    #[test]
    fn debug_hides_token() {
        let client = DigitalOcean::new("secret-token").with_base_url("http://localhost:9/");
        let shown = format!("{client:?}");
        assert!(!shown.contains("secret-token"));
        assert!(shown.contains("http://localhost:9"));
    }
}
