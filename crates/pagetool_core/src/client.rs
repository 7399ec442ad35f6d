use std::cell::Cell;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::config::SiteConfig;
use crate::page::{ContentItem, SearchPage};
use crate::resolve::PageRef;

/// The remote service caps listing pages at this size.
pub const SEARCH_PAGE_LIMIT: usize = 25;

const CONTENT_ENDPOINT: &str = "/rest/api/content";
const SEARCH_ENDPOINT: &str = "/rest/api/content/search";

/// Operations the core consumes from the remote content service.
///
/// Receivers are shared so lazy page iterators and the property filter can
/// borrow the same API concurrently; implementations track bookkeeping such
/// as the request count through interior mutability.
pub trait ContentApi {
    fn search_by_query(
        &self,
        query: &str,
        expand: &[&str],
        start: usize,
        limit: usize,
    ) -> Result<SearchPage>;

    /// Fetch a single item. A reference that names nothing yields `None`;
    /// a title reference matched by more than one item is an error.
    fn get_item(&self, reference: &PageRef, expand: &[&str]) -> Result<Option<ContentItem>>;

    fn create_item(
        &self,
        space: &str,
        title: &str,
        body: &str,
        parent: Option<&str>,
    ) -> Result<ContentItem>;

    fn update_item(&self, id: &str, title: &str, version: i64, body: &str)
    -> Result<ContentItem>;

    fn delete_item(&self, id: &str) -> Result<()>;

    fn list_children(&self, id: &str, child_type: &str, expand: &[&str])
    -> Result<Vec<ContentItem>>;

    /// Look up a named property of an item: scalar, collection, or absent.
    fn get_property(&self, item: &ContentItem, name: &str) -> Result<Option<Value>>;

    fn add_labels(&self, id: &str, labels: &[String]) -> Result<()>;

    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct RestClientConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl RestClientConfig {
    pub fn from_site(config: &SiteConfig) -> Result<Self> {
        let base_url = match config.base_url() {
            Some(value) => value,
            None => bail!("no base URL configured (set PAGETOOL_BASE_URL or [site].base_url)"),
        };
        Ok(Self {
            base_url,
            username: config.username(),
            password: config.password(),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
        })
    }
}

/// Blocking REST client for the content service.
///
/// Credentials are resolved before construction; every call is a single
/// request with no retry, and any non-success response fails with the
/// status and the raw response body.
pub struct RestClient {
    client: Client,
    config: RestClientConfig,
    request_count: Cell<usize>,
}

impl RestClient {
    pub fn new(config: RestClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build content service HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: Cell::new(0),
        })
    }

    pub fn from_config(config: &SiteConfig) -> Result<Self> {
        Self::new(RestClientConfig::from_site(config)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        match self.get_json_optional(path, params)? {
            Some(payload) => Ok(payload),
            None => bail!("remote request failed with HTTP 404 for {path}"),
        }
    }

    /// GET returning `None` on 404, for the fetch-or-create branch.
    fn get_json_optional(&self, path: &str, params: &[(&str, String)]) -> Result<Option<Value>> {
        self.request_count.set(self.request_count.get() + 1);
        let pairs = params
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect::<Vec<_>>();
        let mut request = self
            .client
            .get(self.endpoint(path))
            .header("User-Agent", self.config.user_agent.clone())
            .header("X-Atlassian-Token", "no-check")
            .query(&pairs);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }
        let response = request
            .send()
            .with_context(|| format!("failed to call {path}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode_response(path, response).map(Some)
    }

    fn send_json(&self, method: reqwest::Method, path: &str, payload: &Value) -> Result<Value> {
        self.request_count.set(self.request_count.get() + 1);
        let mut request = self
            .client
            .request(method, self.endpoint(path))
            .header("User-Agent", self.config.user_agent.clone())
            .header("X-Atlassian-Token", "no-check")
            .json(payload);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }
        let response = request
            .send()
            .with_context(|| format!("failed to call {path}"))?;
        decode_response(path, response)
    }

    fn decode_item(&self, payload: Value) -> Result<ContentItem> {
        serde_json::from_value(payload).context("failed to decode content item payload")
    }
}

fn decode_response(path: &str, response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .with_context(|| format!("failed to read response body for {path}"))?;
    if !status.is_success() {
        bail!("remote request failed with HTTP {status} for {path}: {text}");
    }
    if text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).with_context(|| format!("failed to decode JSON from {path}"))
}

fn expand_param(expand: &[&str]) -> String {
    expand.join(",")
}

pub(crate) fn create_payload(
    space: &str,
    title: &str,
    body: &str,
    parent: Option<&str>,
) -> Value {
    let mut payload = json!({
        "type": "page",
        "title": title,
        "space": {"key": space},
        "body": {"storage": {"value": body, "representation": "storage"}},
    });
    if let Some(parent) = parent {
        payload["ancestors"] = json!([{"id": parent}]);
    }
    payload
}

pub(crate) fn update_payload(title: &str, version: i64, body: &str) -> Value {
    json!({
        "type": "page",
        "title": title,
        "version": {"number": version},
        "body": {"storage": {"value": body, "representation": "storage"}},
    })
}

impl ContentApi for RestClient {
    fn search_by_query(
        &self,
        query: &str,
        expand: &[&str],
        start: usize,
        limit: usize,
    ) -> Result<SearchPage> {
        let payload = self.get_json(
            SEARCH_ENDPOINT,
            &[
                ("cql", query.to_string()),
                ("expand", expand_param(expand)),
                ("start", start.to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        serde_json::from_value(payload).context("failed to decode search payload")
    }

    fn get_item(&self, reference: &PageRef, expand: &[&str]) -> Result<Option<ContentItem>> {
        if let Some(id) = reference.id_hint() {
            let payload = self.get_json_optional(
                &format!("{CONTENT_ENDPOINT}/{id}"),
                &[("expand", expand_param(expand))],
            )?;
            return match payload {
                Some(payload) => self.decode_item(payload).map(Some),
                None => Ok(None),
            };
        }

        let page = self.search_by_query(&reference.to_query(), expand, 0, 2)?;
        let mut results = page.results;
        match results.len() {
            0 => Ok(None),
            1 => Ok(Some(results.remove(0))),
            _ => bail!("ambiguous page reference: {reference}"),
        }
    }

    fn create_item(
        &self,
        space: &str,
        title: &str,
        body: &str,
        parent: Option<&str>,
    ) -> Result<ContentItem> {
        let payload = self.send_json(
            reqwest::Method::POST,
            CONTENT_ENDPOINT,
            &create_payload(space, title, body, parent),
        )?;
        self.decode_item(payload)
    }

    fn update_item(
        &self,
        id: &str,
        title: &str,
        version: i64,
        body: &str,
    ) -> Result<ContentItem> {
        let payload = self.send_json(
            reqwest::Method::PUT,
            &format!("{CONTENT_ENDPOINT}/{id}"),
            &update_payload(title, version, body),
        )?;
        self.decode_item(payload)
    }

    fn delete_item(&self, id: &str) -> Result<()> {
        self.send_json(
            reqwest::Method::DELETE,
            &format!("{CONTENT_ENDPOINT}/{id}"),
            &Value::Null,
        )?;
        Ok(())
    }

    fn list_children(
        &self,
        id: &str,
        child_type: &str,
        expand: &[&str],
    ) -> Result<Vec<ContentItem>> {
        let payload = self.get_json(
            &format!("{CONTENT_ENDPOINT}/{id}/child/{child_type}"),
            &[("expand", expand_param(expand))],
        )?;
        let page: SearchPage =
            serde_json::from_value(payload).context("failed to decode children payload")?;
        Ok(page.results)
    }

    fn get_property(&self, item: &ContentItem, name: &str) -> Result<Option<Value>> {
        let payload = self.get_json_optional(
            &format!("{CONTENT_ENDPOINT}/{}/property/{name}", item.id),
            &[],
        )?;
        Ok(payload.and_then(|mut value| {
            if value.get("value").is_some() {
                Some(value["value"].take())
            } else {
                None
            }
        }))
    }

    fn add_labels(&self, id: &str, labels: &[String]) -> Result<()> {
        let payload = labels
            .iter()
            .map(|label| json!({"prefix": "global", "name": label}))
            .collect::<Vec<_>>();
        self.send_json(
            reqwest::Method::POST,
            &format!("{CONTENT_ENDPOINT}/{id}/label"),
            &Value::Array(payload),
        )?;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count.get()
    }
}

#[cfg(test)]
mod tests {
    use super::{RestClient, RestClientConfig, create_payload, update_payload};

    fn client(base_url: &str) -> RestClient {
        RestClient::new(RestClientConfig {
            base_url: base_url.to_string(),
            username: None,
            password: None,
            user_agent: "test-agent/1.0".to_string(),
            timeout_ms: 1_000,
        })
        .expect("build client")
    }

    #[test]
    fn endpoint_joins_without_doubled_slash() {
        let client = client("https://wiki.example.org/");
        assert_eq!(
            client.endpoint("/rest/api/content"),
            "https://wiki.example.org/rest/api/content"
        );
    }

    #[test]
    fn create_payload_includes_parent_only_when_given() {
        let payload = create_payload("DOC", "Alpha", "<p>hi</p>", None);
        assert!(payload.get("ancestors").is_none());
        assert_eq!(payload["space"]["key"], "DOC");
        assert_eq!(payload["body"]["storage"]["representation"], "storage");

        let payload = create_payload("DOC", "Alpha", "<p>hi</p>", Some("99"));
        assert_eq!(payload["ancestors"][0]["id"], "99");
    }

    #[test]
    fn update_payload_carries_version_as_read() {
        let payload = update_payload("Alpha", 7, "<p>new</p>");
        assert_eq!(payload["version"]["number"], 7);
        assert_eq!(payload["title"], "Alpha");
    }
}
