//! PostgREST-style HTTP transport.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_RANGE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{json_type_name, DatasetKind, Entity, Visit};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::{RemoteError, RemoteResult, RemoteStore};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const VISITS_TABLE: &str = "visits";

/// HTTP client for a PostgREST endpoint (`{url}/rest/v1/{table}`)
#[derive(Clone)]
pub struct RestRemoteStore {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for RestRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestRemoteStore")
            .field("base_url", &self.base_url)
            .field("anon_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RestRemoteStore {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let anon_key = normalize_text_option(Some(anon_key.into()))
            .ok_or_else(|| Error::Config("remote anon key must not be empty".to_string()))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(RemoteError::from)?;

        Ok(Self {
            base_url,
            anon_key,
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .header(ACCEPT, "application/json")
    }

    fn returning_row(builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Prefer", "return=representation")
            .header(ACCEPT, SINGLE_OBJECT)
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn ping(&self) -> RemoteResult<()> {
        let url = self.table_url(DatasetKind::Apartments.table());
        let response = self
            .request(Method::HEAD, &url)
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn list(&self, kind: DatasetKind) -> RemoteResult<Value> {
        let url = self.table_url(kind.table());
        let mut builder = self.request(Method::GET, &url).query(&[("select", "*")]);
        if !kind.is_collection() {
            builder = builder.header(ACCEPT, SINGLE_OBJECT);
        }

        let response = builder.send().await?;
        // PostgREST answers 406 when a single-object read matches no row
        if !kind.is_collection() && response.status() == StatusCode::NOT_ACCEPTABLE {
            return Ok(Value::Null);
        }
        let response = check_status(response).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn create(&self, kind: DatasetKind, entity: &Entity) -> RemoteResult<Entity> {
        let url = self.table_url(kind.table());
        let response = Self::returning_row(self.request(Method::POST, &url))
            .json(entity)
            .send()
            .await?;
        let response = check_status(response).await?;
        entity_from_body(response.json::<Value>().await?)
    }

    async fn update(&self, kind: DatasetKind, id: &str, patch: &Entity) -> RemoteResult<Entity> {
        let url = self.table_url(kind.table());
        let response = Self::returning_row(self.request(Method::PATCH, &url))
            .query(&[("id", format!("eq.{id}"))])
            .json(patch)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_ACCEPTABLE {
            return Err(RemoteError::NotFound(format!("{kind}/{id}")));
        }
        let response = check_status(response).await?;
        entity_from_body(response.json::<Value>().await?)
    }

    async fn delete(&self, kind: DatasetKind, id: &str) -> RemoteResult<()> {
        let url = self.table_url(kind.table());
        let response = self
            .request(Method::DELETE, &url)
            .query(&[("id", format!("eq.{id}"))])
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn force_full_resync(&self) -> RemoteResult<()> {
        let url = self.table_url("rpc/force_full_resync");
        let response = self
            .request(Method::POST, &url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn record_visit(&self, visit: &Visit) -> RemoteResult<()> {
        let url = self.table_url(VISITS_TABLE);
        let response = self
            .request(Method::POST, &url)
            .header("Prefer", "return=minimal")
            .json(visit)
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn count_visits(&self, since: DateTime<Utc>) -> RemoteResult<u64> {
        let url = self.table_url(VISITS_TABLE);
        let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let response = self
            .request(Method::HEAD, &url)
            .header("Prefer", "count=exact")
            .query(&[
                ("select", "id".to_string()),
                ("visited_at", format!("gte.{since}")),
            ])
            .send()
            .await?;
        let response = check_status(response).await?;
        parse_content_range_total(response.headers()).ok_or_else(|| {
            RemoteError::Malformed("visit count response lacked a Content-Range total".to_string())
        })
    }
}

async fn check_status(response: Response) -> RemoteResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Api {
        status: status.as_u16(),
        message: parse_api_error(status, &body),
    })
}

fn entity_from_body(body: Value) -> RemoteResult<Entity> {
    // Some deployments ignore the single-object Accept header and return an array
    let body = match body {
        Value::Array(mut rows) if rows.len() == 1 => rows.remove(0),
        other => other,
    };
    match body {
        Value::Object(map) => Ok(Entity::from(map)),
        other => Err(RemoteError::Malformed(format!(
            "expected the written row, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Total from a `Content-Range: 0-24/3573` (or `*/0`) header
fn parse_content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|value: &HeaderValue| value.to_str().ok())
        .and_then(|range| range.rsplit_once('/'))
        .and_then(|(_, total)| total.trim().parse().ok())
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    error: Option<String>,
    hint: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return match normalize_text_option(payload.hint) {
                Some(hint) => format!("{} (hint: {hint})", message.trim()),
                None => message.trim().to_string(),
            };
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("remote url must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "remote url must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_range(range: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_str(range).unwrap());
        headers
    }

    #[test]
    fn content_range_total_is_parsed() {
        assert_eq!(
            parse_content_range_total(&headers_with_range("0-24/3573")),
            Some(3573)
        );
        assert_eq!(parse_content_range_total(&headers_with_range("*/0")), Some(0));
        assert_eq!(parse_content_range_total(&headers_with_range("0-24/*")), None);
        assert_eq!(parse_content_range_total(&HeaderMap::new()), None);
    }

    #[test]
    fn api_error_prefers_structured_message() {
        let body = r#"{"code":"42501","message":"permission denied for table reservations","hint":"check RLS"}"#;
        assert_eq!(
            parse_api_error(StatusCode::FORBIDDEN, body),
            "permission denied for table reservations (hint: check RLS)"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "  upstream down "),
            "upstream down"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[test]
    fn base_url_is_validated_and_trimmed() {
        assert_eq!(
            normalize_base_url(" https://db.example.com/ ".to_string()).unwrap(),
            "https://db.example.com"
        );
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("db.example.com".to_string()).is_err());
    }

    #[test]
    fn table_urls_follow_rest_layout() {
        let store = RestRemoteStore::new("https://db.example.com", "anon").unwrap();
        assert_eq!(
            store.table_url(DatasetKind::CleaningTasks.table()),
            format!(
                "https://db.example.com/rest/v1/{}",
                DatasetKind::CleaningTasks.table()
            )
        );
        assert!(RestRemoteStore::new("https://db.example.com", "  ").is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let store = RestRemoteStore::new("https://db.example.com", "secret-key").unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn written_row_accepts_object_or_single_row_array() {
        let row = serde_json::json!({"id": "r1"});
        assert_eq!(
            entity_from_body(row.clone()).unwrap().id().as_deref(),
            Some("r1")
        );
        assert_eq!(
            entity_from_body(Value::Array(vec![row])).unwrap().id().as_deref(),
            Some("r1")
        );
        assert!(matches!(
            entity_from_body(Value::Null),
            Err(RemoteError::Malformed(_))
        ));
    }
}
