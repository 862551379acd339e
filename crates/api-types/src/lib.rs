//! JSON response bodies for nearby queries.

use nearstop_transit::cache::CacheStats;
use nearstop_transit::models::types::{Payload, QueryError, ResultItem};
use nearstop_transit::paging::{CursorPage, Page};
use nearstop_transit::spatial::coordinate::DistanceUnit;
use serde::{Deserialize, Serialize};

/// Offset-mode page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetEnvelope<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prev_page: Option<usize>,
}

impl<T> From<Page<T>> for OffsetEnvelope<T> {
    fn from(page: Page<T>) -> Self {
        let links = page.links();
        Self {
            next_page: links.next.map(|r| r.page()),
            prev_page: links.prev.map(|r| r.page()),
            total_count: page.total_count,
            page: page.page_number,
            per_page: page.page_size,
            total_pages: page.total_pages,
            has_next: page.has_next,
            has_prev: page.has_prev,
            items: page.items,
        }
    }
}

impl OffsetEnvelope<NearbyItem> {
    pub fn nearby(page: Page<ResultItem>, unit: DistanceUnit) -> Self {
        page.map(|item| NearbyItem::new(&item, unit)).into()
    }
}

/// Cursor-mode page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorEnvelope<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> From<CursorPage<T>> for CursorEnvelope<T> {
    fn from(page: CursorPage<T>) -> Self {
        Self {
            has_more: page.has_more(),
            next_cursor: page.next_cursor.map(|c| c.encode()),
            items: page.items,
        }
    }
}

impl CursorEnvelope<NearbyItem> {
    pub fn nearby(page: CursorPage<ResultItem>, unit: DistanceUnit) -> Self {
        let next_cursor = page.next_cursor.map(|c| c.encode());
        Self {
            items: page.items.iter().map(|item| NearbyItem::new(item, unit)).collect(),
            has_more: next_cursor.is_some(),
            next_cursor,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ItemDetails {
    Stop {
        name: String,
    },
    Route {
        short_name: String,
        long_name: String,
        /// GTFS route type code
        route_type: u16,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyItem {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub distance: f64,
    pub unit: DistanceUnit,
    #[serde(flatten)]
    pub details: ItemDetails,
}

impl NearbyItem {
    /// `unit` must be the unit the query was made in.
    pub fn new(item: &ResultItem, unit: DistanceUnit) -> Self {
        let details = match &item.payload {
            Payload::Stop { name } => ItemDetails::Stop {
                name: name.to_string(),
            },
            Payload::Route {
                short_name,
                long_name,
                route_type,
            } => ItemDetails::Route {
                short_name: short_name.to_string(),
                long_name: long_name.to_string(),
                route_type: route_type.to_gtfs(),
            },
        };
        Self {
            id: item.entity_id.to_string(),
            lat: item.coordinate.lat(),
            lon: item.coordinate.lon(),
            distance: item.distance,
            unit,
            details,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsView {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub current_size: usize,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheStatsView {
    fn from(stats: CacheStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            coalesced: stats.coalesced,
            evictions: stats.evictions,
            invalidations: stats.invalidations,
            current_size: stats.current_size,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Error response body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub retryable: bool,
}

impl From<&QueryError> for ErrorBody {
    fn from(error: &QueryError) -> Self {
        let code = match error {
            QueryError::InvalidCoordinate { .. } => "invalid_coordinate",
            QueryError::InvalidParameter(_) => "invalid_parameter",
            QueryError::UpstreamUnavailable(_) => "upstream_unavailable",
            QueryError::StaleCursor => "stale_cursor",
            QueryError::InvalidCursor(_) => "invalid_cursor",
            QueryError::ComputationFailed(_) => "computation_failed",
            QueryError::Timeout => "timeout",
        };
        Self {
            error: error.to_string(),
            code: code.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearstop_transit::identifiers::EntityIdentifier;
    use nearstop_transit::models::types::RouteType;
    use nearstop_transit::paging::page;
    use nearstop_transit::spatial::coordinate::Coordinate;
    use serde_json::json;

    fn stop_item(id: &str, distance: f64) -> ResultItem {
        ResultItem {
            entity_id: EntityIdentifier::new(id),
            coordinate: Coordinate::new(40.7127, -74.0059).unwrap(),
            distance,
            payload: Payload::Stop {
                name: "City Hall".into(),
            },
        }
    }

    #[test]
    fn test_offset_envelope_json() {
        let items: Vec<_> = (0..17).map(|i| stop_item(&format!("s{i}"), i as f64)).collect();
        let envelope = OffsetEnvelope::nearby(page(&items, 2, 5).unwrap(), DistanceUnit::Miles);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["totalCount"], 17);
        assert_eq!(value["perPage"], 5);
        assert_eq!(value["totalPages"], 4);
        assert_eq!(value["hasNext"], true);
        assert_eq!(value["hasPrev"], true);
        assert_eq!(value["nextPage"], 3);
        assert_eq!(value["prevPage"], 1);
        assert_eq!(value["items"][0]["id"], "s5");
        assert_eq!(value["items"][0]["kind"], "stop");
        assert_eq!(value["items"][0]["unit"], "miles");
    }

    #[test]
    fn test_single_page_omits_links() {
        let envelope: OffsetEnvelope<u8> = page(&[1u8, 2, 3], 1, 5).unwrap().into();
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["items"], json!([1, 2, 3]));
        assert_eq!(value["totalPages"], 1);
        assert!(value.get("prevPage").is_none());
        assert!(value.get("nextPage").is_none());
    }

    #[test]
    fn test_route_item_json() {
        let item = ResultItem {
            entity_id: EntityIdentifier::new("M15"),
            coordinate: Coordinate::new(40.71, -74.0).unwrap(),
            distance: 0.25,
            payload: Payload::Route {
                short_name: "M15".into(),
                long_name: "First & Second Avenues".into(),
                route_type: RouteType::Bus,
            },
        };
        let value = serde_json::to_value(NearbyItem::new(&item, DistanceUnit::Kilometers)).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "M15",
                "lat": 40.71,
                "lon": -74.0,
                "distance": 0.25,
                "unit": "kilometers",
                "kind": "route",
                "shortName": "M15",
                "longName": "First & Second Avenues",
                "routeType": 3
            })
        );

        let back: NearbyItem = serde_json::from_value(value).unwrap();
        assert_eq!(back.details, ItemDetails::Route {
            short_name: "M15".into(),
            long_name: "First & Second Avenues".into(),
            route_type: 3,
        });
    }

    #[test]
    fn test_cursor_envelope_end_of_results() {
        let envelope: CursorEnvelope<u8> = CursorPage {
            items: vec![1, 2, 3],
            next_cursor: None,
        }
        .into();
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["nextCursor"], serde_json::Value::Null);
        assert_eq!(value["hasMore"], false);
    }

    #[test]
    fn test_stats_and_error_bodies() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            current_size: 1,
            ..CacheStats::default()
        };
        let value = serde_json::to_value(CacheStatsView::from(stats)).unwrap();
        assert_eq!(value["currentSize"], 1);
        assert_eq!(value["hitRate"], 0.75);

        let body = ErrorBody::from(&QueryError::StaleCursor);
        assert_eq!(body.code, "stale_cursor");
        assert!(body.retryable);
        let body = ErrorBody::from(&QueryError::InvalidCoordinate { lat: 91.0, lon: 0.0 });
        assert_eq!(body.code, "invalid_coordinate");
        assert!(!body.retryable);
    }
}
