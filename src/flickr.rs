//! Flickr photo-search client for geopin.
//!
//! This module speaks the two-phase search protocol against the Flickr REST
//! endpoint:
//!
//! 1. A discovery call (no `page` parameter) to learn how many result pages
//!    exist for the pin's bounding box.
//! 2. A page call for one uniformly random page within the usable depth,
//!    yielding the photo metadata entries for that page.
//!
//! The API degrades for very deep pages, so the random page is always drawn
//! from `1..=min(pages, 40)`. Every failure surfaces as a tagged
//! [`SearchError`]; nothing is retried here, retry policy belongs to the
//! caller.

use log::debug;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::bbox::BoundingBox;

/// The search method invoked on the REST endpoint.
pub const SEARCH_METHOD: &str = "flickr.photos.search";

/// Hard ceiling on how deep a random page may be drawn. The API misbehaves
/// beyond this depth, so it is not configurable.
pub const MAX_PAGE_DEPTH: u32 = 40;

/// Everything that can go wrong talking to the search API.
#[derive(Debug, Error)]
pub enum SearchError {
    /// No response was received at all.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    /// The credentials were rejected. Kept separate from `Http` so the user
    /// sees a clearer message.
    #[error("your login details are incorrect, please try again")]
    Authentication { status: u16 },
    /// Any other non-2xx response.
    #[error("the request returned an invalid response (status code {0})")]
    Http(u16),
    /// The body was not valid JSON.
    #[error("unable to parse the response body as JSON")]
    Decode,
    /// The API answered but reported failure (`stat != "ok"`).
    #[error("the remote API returned an error: {0}")]
    RemoteApi(String),
    /// The response was missing an expected field or had the wrong shape.
    #[error("missing or mistyped field `{0}` in the response")]
    MalformedResponse(&'static str),
    /// A well-formed response with zero matching photos. A legitimate
    /// outcome, not a transport failure.
    #[error("no images found")]
    NoResults,
}

/// Metadata for one remote photo, as returned by the page call.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoMeta {
    /// Remote-assigned photo id.
    pub id: String,
    /// URL of the medium-sized image.
    pub url: String,
}

/// Client for the geotagged photo search API.
///
/// One instance per process is the expected usage, but nothing here is
/// global: endpoint, key and box extents are injected at construction.
pub struct SearchClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
    half_width: f64,
    half_height: f64,
}

impl SearchClient {
    pub fn new(
        endpoint: Url,
        api_key: impl Into<String>,
        half_width: f64,
        half_height: f64,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key: api_key.into(),
            half_width,
            half_height,
        }
    }

    /// Runs the full two-phase search for a coordinate.
    pub async fn search(&self, latitude: f64, longitude: f64) -> Result<Vec<PhotoMeta>, SearchError> {
        let bbox = BoundingBox::around(latitude, longitude, self.half_width, self.half_height);
        let params = self.base_params(&bbox);

        // Phase one: how many pages are there for this box?
        let body = self.fetch(&params).await?;
        let photos = validate_envelope(&body)?;
        let pages = photos
            .get("pages")
            .and_then(Value::as_u64)
            .ok_or(SearchError::MalformedResponse("photos.pages"))? as u32;

        let page = choose_page(pages);
        debug!("search at ({latitude}, {longitude}): {pages} pages, requesting page {page}");

        // Phase two: fetch that page.
        let mut page_params = params;
        page_params.push(("page".to_string(), page.to_string()));

        let body = self.fetch(&page_params).await?;
        let photos = validate_envelope(&body)?;

        let total = photos
            .get("total")
            .and_then(|value| match value {
                Value::String(s) => s.parse::<u64>().ok(),
                Value::Number(n) => n.as_u64(),
                _ => None,
            })
            .ok_or(SearchError::MalformedResponse("photos.total"))?;

        if total == 0 {
            return Err(SearchError::NoResults);
        }

        let entries = photos
            .get("photo")
            .and_then(Value::as_array)
            .ok_or(SearchError::MalformedResponse("photos.photo"))?;

        entries.iter().map(parse_photo_entry).collect()
    }

    /// Issues one GET against the endpoint, classifying transport and HTTP
    /// failures and decoding the JSON body.
    async fn fetch(&self, params: &[(String, String)]) -> Result<Value, SearchError> {
        let response = self
            .http
            .get(self.endpoint.clone())
            .query(params)
            .send()
            .await
            .map_err(SearchError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => SearchError::Authentication {
                    status: status.as_u16(),
                },
                code => SearchError::Http(code),
            });
        }

        let body = response.text().await.map_err(SearchError::Transport)?;
        serde_json::from_str(&body).map_err(|_| SearchError::Decode)
    }

    fn base_params(&self, bbox: &BoundingBox) -> Vec<(String, String)> {
        vec![
            ("method".to_string(), SEARCH_METHOD.to_string()),
            ("api_key".to_string(), self.api_key.clone()),
            ("bbox".to_string(), bbox.to_string()),
            ("safe_search".to_string(), "1".to_string()),
            ("extras".to_string(), "url_m".to_string()),
            ("format".to_string(), "json".to_string()),
            ("nojsoncallback".to_string(), "1".to_string()),
        ]
    }
}

/// Checks the response envelope (`stat == "ok"`, `photos` object present) and
/// returns the `photos` payload.
fn validate_envelope(body: &Value) -> Result<&serde_json::Map<String, Value>, SearchError> {
    let stat = body
        .get("stat")
        .and_then(Value::as_str)
        .ok_or(SearchError::MalformedResponse("stat"))?;

    if stat != "ok" {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(stat)
            .to_string();
        return Err(SearchError::RemoteApi(message));
    }

    body.get("photos")
        .and_then(Value::as_object)
        .ok_or(SearchError::MalformedResponse("photos"))
}

fn parse_photo_entry(entry: &Value) -> Result<PhotoMeta, SearchError> {
    let id = entry
        .get("id")
        .and_then(Value::as_str)
        .ok_or(SearchError::MalformedResponse("photo.id"))?;
    let url = entry
        .get("url_m")
        .and_then(Value::as_str)
        .ok_or(SearchError::MalformedResponse("photo.url_m"))?;

    Ok(PhotoMeta {
        id: id.to_string(),
        url: url.to_string(),
    })
}

/// Draws a uniformly random page within the usable depth. Zero pages still
/// yields page 1, matching what the API expects for an empty result set.
pub fn choose_page(pages: u32) -> u32 {
    let limit = pages.min(MAX_PAGE_DEPTH);
    if limit <= 1 {
        return 1;
    }
    rand::thread_rng().gen_range(1..=limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn test_client(server: &mockito::ServerGuard) -> SearchClient {
        let endpoint = Url::parse(&server.url()).expect("mock server URL should parse");
        SearchClient::new(endpoint, "test_key", 1.0, 1.0)
    }

    fn discovery_body(pages: u32) -> String {
        format!(r#"{{"stat":"ok","photos":{{"pages":{pages}}}}}"#)
    }

    /// Matches only phase-one requests: the query of a discovery call ends
    /// with `nojsoncallback=1`, while page calls append `page=N` after it.
    fn discovery_query() -> Matcher {
        Matcher::Regex("nojsoncallback=1$".to_string())
    }

    #[test]
    fn test_choose_page_stays_within_clamped_depth() {
        for pages in [0, 1, 2, 5, 40, 41, 100, 10_000] {
            let limit = pages.min(MAX_PAGE_DEPTH).max(1);
            for _ in 0..50 {
                let page = choose_page(pages);
                assert!(
                    (1..=limit).contains(&page),
                    "page {page} out of range for pages={pages}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_search_returns_photo_metadata() {
        let mut server = mockito::Server::new_async().await;

        let discovery = server
            .mock("GET", "/")
            .match_query(discovery_query())
            .with_status(200)
            .with_body(discovery_body(1))
            .create_async()
            .await;
        let page = server
            .mock("GET", "/")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(
                r#"{"stat":"ok","photos":{"total":"2","photo":[
                    {"id":"a","url_m":"http://images.test/a.jpg"},
                    {"id":"b","url_m":"http://images.test/b.jpg"}
                ]}}"#,
            )
            .create_async()
            .await;

        let photos = test_client(&server).search(41.8781, -87.6298).await.unwrap();

        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].id, "a");
        assert_eq!(photos[0].url, "http://images.test/a.jpg");
        assert_eq!(photos[1].id, "b");

        discovery.assert_async().await;
        page.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_requests_page_within_discovered_range() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/")
            .match_query(discovery_query())
            .with_status(200)
            .with_body(discovery_body(5))
            .create_async()
            .await;
        // The page parameter is appended last, so anchor the match there.
        let page = server
            .mock("GET", "/")
            .match_query(Matcher::Regex("page=[1-5]$".to_string()))
            .with_status(200)
            .with_body(
                r#"{"stat":"ok","photos":{"total":"1","photo":[
                    {"id":"a","url_m":"http://images.test/a.jpg"}
                ]}}"#,
            )
            .create_async()
            .await;

        let photos = test_client(&server).search(0.0, 0.0).await.unwrap();

        assert_eq!(photos.len(), 1);
        page.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_failure_skips_the_page_phase() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"stat":"fail","message":"Invalid API Key"}"#)
            .create_async()
            .await;
        let page = server
            .mock("GET", "/")
            .match_query(Matcher::Regex("page=".to_string()))
            .expect(0)
            .create_async()
            .await;

        let err = test_client(&server).search(0.0, 0.0).await.unwrap_err();

        assert!(matches!(err, SearchError::RemoteApi(ref message) if message == "Invalid API Key"));
        page.assert_async().await;
    }

    #[tokio::test]
    async fn test_zero_total_is_no_results() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/")
            .match_query(discovery_query())
            .with_status(200)
            .with_body(discovery_body(1))
            .create_async()
            .await;
        server
            .mock("GET", "/")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(r#"{"stat":"ok","photos":{"total":"0"}}"#)
            .create_async()
            .await;

        let err = test_client(&server).search(0.0, 0.0).await.unwrap_err();

        assert!(matches!(err, SearchError::NoResults));
    }

    #[tokio::test]
    async fn test_missing_photo_array_is_malformed() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/")
            .match_query(discovery_query())
            .with_status(200)
            .with_body(discovery_body(1))
            .create_async()
            .await;
        server
            .mock("GET", "/")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(r#"{"stat":"ok","photos":{"total":"3"}}"#)
            .create_async()
            .await;

        let err = test_client(&server).search(0.0, 0.0).await.unwrap_err();

        assert!(matches!(err, SearchError::MalformedResponse("photos.photo")));
    }

    #[tokio::test]
    async fn test_missing_pages_is_malformed() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"stat":"ok","photos":{}}"#)
            .create_async()
            .await;

        let err = test_client(&server).search(0.0, 0.0).await.unwrap_err();

        assert!(matches!(err, SearchError::MalformedResponse("photos.pages")));
    }

    #[tokio::test]
    async fn test_auth_status_codes_get_their_own_error() {
        for status in [401, 403] {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("GET", "/")
                .match_query(Matcher::Any)
                .with_status(status)
                .create_async()
                .await;

            let err = test_client(&server).search(0.0, 0.0).await.unwrap_err();

            assert!(matches!(err, SearchError::Authentication { status: s } if s == status as u16));
        }
    }

    #[tokio::test]
    async fn test_other_http_failures_carry_the_status_code() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = test_client(&server).search(0.0, 0.0).await.unwrap_err();

        assert!(matches!(err, SearchError::Http(503)));
    }

    #[tokio::test]
    async fn test_non_json_body_is_a_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let err = test_client(&server).search(0.0, 0.0).await.unwrap_err();

        assert!(matches!(err, SearchError::Decode));
    }
}
