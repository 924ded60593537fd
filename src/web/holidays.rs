//! Holiday snapshot endpoints.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

use crate::state::AppState;
use crate::web::encoding::{read_snapshot_headers, snapshot_headers};
use crate::web::routes::{cache, with_cache_control};

/// One holiday, flattened out of the upstream document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolidayView {
    /// `YYYY-MM-DD`, or the raw `locdate` when it isn't a valid date.
    pub date: String,
    pub name: String,
    pub is_holiday: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolidayPage {
    pub has_cache: bool,
    pub holidays: Vec<HolidayView>,
    pub cache_info: Option<Value>,
}

/// `GET /api/holidays`: the snapshot as JSON, with the transport headers.
pub(super) async fn get_holidays(State(state): State<AppState>) -> Response {
    let snapshot = state.gateway.serve().await;
    let headers = snapshot_headers(&snapshot);

    let mut response = with_cache_control(&snapshot, cache::NO_STORE);
    for (name, value) in headers {
        response.headers_mut().insert(name, value);
    }
    response
}

/// `GET /holiday-test/*`: renders from the headers the cache layer attached.
pub(super) async fn holiday_page(headers: HeaderMap) -> Response {
    let decoded = match read_snapshot_headers(&headers) {
        Ok(decoded) => decoded,
        Err(e) => {
            error!(error = %e, "Failed to decode cache side channel");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({ "error": "Holiday data could not be decoded" })),
            )
                .into_response();
        }
    };

    let holidays = decoded
        .payload
        .as_ref()
        .map(extract_holidays)
        .unwrap_or_default();

    with_cache_control(
        HolidayPage {
            has_cache: decoded.payload.is_some(),
            holidays,
            cache_info: decoded.cache_info,
        },
        cache::NO_STORE,
    )
}

/// Pull `response.body.items.item` out of an upstream document. A single
/// item may appear as a bare object.
pub fn extract_holidays(payload: &Value) -> Vec<HolidayView> {
    let items = match payload.pointer("/response/body/items/item") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| HolidayView {
            date: format_locdate(&item["locdate"]),
            name: item["dateName"].as_str().unwrap_or_default().to_owned(),
            is_holiday: item["isHoliday"].as_str() == Some("Y"),
        })
        .collect()
}

/// `locdate` arrives as `20250301`, either a number or a string.
fn format_locdate(locdate: &Value) -> String {
    let raw = match locdate {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return String::new(),
    };
    NaiveDate::parse_from_str(&raw, "%Y%m%d")
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_list_and_single_item() {
        let doc = json!({"response": {"body": {"items": {"item": [
            {"dateName": "삼일절", "isHoliday": "Y", "locdate": 20250301},
            {"dateName": "제헌절", "isHoliday": "N", "locdate": "20250717"}
        ]}}}});
        let holidays = extract_holidays(&doc);
        assert_eq!(
            holidays,
            vec![
                HolidayView {
                    date: "2025-03-01".into(),
                    name: "삼일절".into(),
                    is_holiday: true,
                },
                HolidayView {
                    date: "2025-07-17".into(),
                    name: "제헌절".into(),
                    is_holiday: false,
                },
            ]
        );

        let single = json!({"response": {"body": {"items": {"item":
            {"dateName": "광복절", "isHoliday": "Y", "locdate": 20250815}
        }}}});
        assert_eq!(extract_holidays(&single).len(), 1);
    }

    #[test]
    fn tolerates_unexpected_shapes() {
        assert!(extract_holidays(&json!({})).is_empty());
        assert!(extract_holidays(&json!({"response": {"body": {"items": ""}}})).is_empty());
        assert_eq!(format_locdate(&json!("2025")), "2025");
        assert_eq!(format_locdate(&Value::Null), "");
    }
}
