//! Client for the data.go.kr special-day service (`getHoliDeInfo`).
//!
//! The endpoint is paginated (`numOfRows` / `pageNo`) and has a few shape
//! quirks in its JSON mode: `items` is an empty string when a page has no
//! results, and `items.item` is a bare object instead of an array when there
//! is exactly one. Pages are walked until `totalCount` items are collected,
//! then merged back into a single document with the endpoint's own shape.

use super::json::parse_json_with_context;
use super::{UpstreamError, UpstreamFetcher};
use crate::utils::fmt_duration;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use chrono_tz::Tz;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::{Value, json};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use url::Url;

/// Result code the service uses for success.
const RESULT_OK: &str = "00";

/// Hard stop for pagination in case `totalCount` is inconsistent.
const MAX_PAGES: u32 = 50;

#[derive(Debug, Clone)]
pub struct HolidayApiConfig {
    /// Service root, e.g. `https://apis.data.go.kr/B090041/openapi/service/SpcdeInfoService`.
    pub base_url: String,
    /// Decoded service key; it is URL-encoded when the query is built.
    pub service_key: String,
    pub rows_per_page: u32,
    /// Year to request. Defaults to the current year in `timezone`.
    pub year: Option<i32>,
    pub timezone: Tz,
    pub requests_per_minute: u32,
    pub timeout: Duration,
}

pub struct HolidayApi {
    http: reqwest::Client,
    endpoint: Url,
    service_key: String,
    rows_per_page: u32,
    year: Option<i32>,
    timezone: Tz,
    limiter: DefaultDirectRateLimiter,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    response: EnvelopeResponse,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResponse {
    header: ResultHeader,
    #[serde(default)]
    body: Option<PageBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultHeader {
    result_code: String,
    #[serde(default)]
    result_msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageBody {
    #[serde(default)]
    items: Value,
    #[serde(default)]
    total_count: u32,
}

impl HolidayApi {
    pub fn new(config: HolidayApiConfig) -> Result<Self, UpstreamError> {
        let endpoint = Url::parse(&format!(
            "{}/getHoliDeInfo",
            config.base_url.trim_end_matches('/')
        ))
        .map_err(|e| anyhow::anyhow!("invalid upstream base URL: {e}"))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("holiday-cache/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        info!(
            endpoint = %endpoint,
            rows_per_page = config.rows_per_page,
            requests_per_minute = per_minute.get(),
            timeout = fmt_duration(config.timeout),
            "holiday API client configured"
        );

        Ok(Self {
            http,
            endpoint,
            service_key: config.service_key,
            rows_per_page: config.rows_per_page.max(1),
            year: config.year,
            timezone: config.timezone,
            limiter,
        })
    }

    fn target_year(&self) -> i32 {
        self.year
            .unwrap_or_else(|| Utc::now().with_timezone(&self.timezone).year())
    }

    async fn fetch_page(&self, year: i32, page: u32) -> Result<(ResultHeader, PageBody), UpstreamError> {
        self.limiter.until_ready().await;

        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&[
                ("solYear", year.to_string()),
                ("ServiceKey", self.service_key.clone()),
                ("_type", "json".to_owned()),
                ("numOfRows", self.rows_per_page.to_string()),
                ("pageNo", page.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                page,
            });
        }

        let text = response.text().await?;
        let envelope: Envelope = parse_json_with_context(&text)
            .map_err(|source| UpstreamError::ParseFailed { page, source })?;

        let header = envelope.response.header;
        if header.result_code != RESULT_OK {
            return Err(UpstreamError::Api {
                code: header.result_code,
                message: header.result_msg,
            });
        }

        let body = envelope.response.body.unwrap_or(PageBody {
            items: Value::Null,
            total_count: 0,
        });
        trace!(page, total_count = body.total_count, "holiday page received");
        Ok((header, body))
    }
}

#[async_trait]
impl UpstreamFetcher for HolidayApi {
    async fn fetch(&self) -> Result<Value, UpstreamError> {
        let start = Instant::now();
        let year = self.target_year();

        let mut items = Vec::new();
        let mut header = None;
        let mut total_count: u32;
        let mut page = 1;

        loop {
            let (page_header, body) = self.fetch_page(year, page).await?;
            header.get_or_insert(page_header);
            total_count = body.total_count;

            let batch = normalize_items(body.items);
            let received = batch.len();
            items.extend(batch);

            if received == 0 || items.len() >= total_count as usize || page >= MAX_PAGES {
                break;
            }
            page += 1;
        }

        debug!(
            year,
            pages = page,
            items = items.len(),
            total_count,
            elapsed = fmt_duration(start.elapsed()),
            "holiday data fetched"
        );

        let (code, message) = header
            .map(|h| (h.result_code, h.result_msg))
            .unwrap_or_else(|| (RESULT_OK.to_owned(), String::new()));
        Ok(merged_document(code, message, items, total_count))
    }
}

/// Flatten the endpoint's `items` field into a list of item objects.
fn normalize_items(items: Value) -> Vec<Value> {
    match items {
        Value::Object(mut map) => match map.remove("item") {
            Some(Value::Array(list)) => list,
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![single],
        },
        _ => Vec::new(),
    }
}

/// Rebuild a single-page response holding every collected item.
fn merged_document(code: String, message: String, items: Vec<Value>, total_count: u32) -> Value {
    let rows = items.len();
    json!({
        "response": {
            "header": { "resultCode": code, "resultMsg": message },
            "body": {
                "items": { "item": items },
                "numOfRows": rows,
                "pageNo": 1,
                "totalCount": total_count
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_items_quirks() {
        assert!(normalize_items(json!("")).is_empty());
        assert!(normalize_items(Value::Null).is_empty());
        assert!(normalize_items(json!({})).is_empty());

        let single = normalize_items(json!({"item": {"dateName": "삼일절", "locdate": 20250301}}));
        assert_eq!(single.len(), 1);
        assert_eq!(single[0]["dateName"], "삼일절");

        let many = normalize_items(json!({"item": [{"locdate": 1}, {"locdate": 2}]}));
        assert_eq!(many.len(), 2);
    }

    #[test]
    fn envelope_accepts_empty_items_string() {
        let body = r#"{"response":{"header":{"resultCode":"00","resultMsg":"NORMAL SERVICE."},
            "body":{"items":"","numOfRows":30,"pageNo":1,"totalCount":0}}}"#;
        let envelope: Envelope = parse_json_with_context(body).unwrap();
        let page = envelope.response.body.unwrap();
        assert_eq!(page.total_count, 0);
        assert!(normalize_items(page.items).is_empty());
    }

    #[test]
    fn merged_document_keeps_endpoint_shape() {
        let doc = merged_document(
            "00".into(),
            "NORMAL SERVICE.".into(),
            vec![json!({"locdate": 20250101}), json!({"locdate": 20250128})],
            2,
        );
        assert_eq!(doc["response"]["header"]["resultCode"], "00");
        assert_eq!(doc["response"]["body"]["numOfRows"], 2);
        assert_eq!(doc["response"]["body"]["totalCount"], 2);
        assert_eq!(doc["response"]["body"]["items"]["item"][1]["locdate"], 20250128);
    }

    #[test]
    fn rejects_malformed_base_url() {
        let result = HolidayApi::new(HolidayApiConfig {
            base_url: "not a url".into(),
            service_key: "key".into(),
            rows_per_page: 10,
            year: Some(2025),
            timezone: chrono_tz::Asia::Seoul,
            requests_per_minute: 10,
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(result, Err(UpstreamError::Other(_))));
    }
}
