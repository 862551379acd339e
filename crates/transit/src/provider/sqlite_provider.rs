//! Spatial engine over an embedded SQLite database.
//!
//! Stops and route shape points live in plain tables with composite
//! (lat, lon) B-tree indices; each bounding-box part becomes one range scan
//! expressed with `BETWEEN`. Queries run on tokio's blocking pool.

use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use geo::Point;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::engine::traits::SpatialEngine;
use crate::identifiers::*;
use crate::models::types::*;
use crate::provider::static_provider::{RouteImpl, StopImpl};
use crate::spatial::bbox::BoundingBox;
use crate::spatial::coordinate::Coordinate;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stops (
    stop_id     TEXT PRIMARY KEY,
    stop_name   TEXT NOT NULL,
    stop_lat    REAL NOT NULL,
    stop_lon    REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS stops_lat_lon ON stops (stop_lat, stop_lon);

CREATE TABLE IF NOT EXISTS routes (
    route_id          TEXT PRIMARY KEY,
    route_short_name  TEXT NOT NULL,
    route_long_name   TEXT NOT NULL,
    route_type        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS route_shape_points (
    route_id           TEXT NOT NULL REFERENCES routes (route_id),
    shape_pt_sequence  INTEGER NOT NULL,
    shape_pt_lat       REAL NOT NULL,
    shape_pt_lon       REAL NOT NULL,
    PRIMARY KEY (route_id, shape_pt_sequence)
);
CREATE INDEX IF NOT EXISTS route_shape_points_lat_lon
    ON route_shape_points (shape_pt_lat, shape_pt_lon);
";

const STOPS_IN_BOX: &str = "
SELECT stop_id, stop_name, stop_lat, stop_lon
FROM stops
WHERE stop_lat BETWEEN ?1 AND ?2
  AND stop_lon BETWEEN ?3 AND ?4
";

const ROUTE_POINTS_IN_BOX: &str = "
SELECT r.route_id, r.route_short_name, r.route_long_name, r.route_type,
       p.shape_pt_lat, p.shape_pt_lon
FROM route_shape_points p
JOIN routes r ON r.route_id = p.route_id
WHERE p.shape_pt_lat BETWEEN ?1 AND ?2
  AND p.shape_pt_lon BETWEEN ?3 AND ?4
  AND (?5 IS NULL OR r.route_type = ?5)
";

fn upstream(error: impl Display) -> QueryError {
    QueryError::UpstreamUnavailable(error.to_string())
}

/// SQLite-backed [`SpatialEngine`].
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct SqliteSpatialEngine {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSpatialEngine {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path).map_err(upstream)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(upstream)?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(upstream)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace stops and routes in one transaction.
    pub fn load(&self, stops: &[StopImpl], routes: &[RouteImpl]) -> Result<()> {
        for route in routes {
            if let Some(geom) = &route.geometry {
                for coord in geom.coords() {
                    Coordinate::from_point(Point::from(*coord))?;
                }
            }
        }

        let mut conn = self.lock();
        let tx = conn.transaction().map_err(upstream)?;
        {
            let mut insert_stop = tx
                .prepare(
                    "INSERT OR REPLACE INTO stops (stop_id, stop_name, stop_lat, stop_lon)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(upstream)?;
            for stop in stops {
                insert_stop
                    .execute(params![
                        stop.id.as_str(),
                        &*stop.name,
                        stop.location.lat(),
                        stop.location.lon()
                    ])
                    .map_err(upstream)?;
            }

            let mut insert_route = tx
                .prepare(
                    "INSERT OR REPLACE INTO routes
                         (route_id, route_short_name, route_long_name, route_type)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(upstream)?;
            let mut clear_points = tx
                .prepare("DELETE FROM route_shape_points WHERE route_id = ?1")
                .map_err(upstream)?;
            let mut insert_point = tx
                .prepare(
                    "INSERT INTO route_shape_points
                         (route_id, shape_pt_sequence, shape_pt_lat, shape_pt_lon)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(upstream)?;
            for route in routes {
                insert_route
                    .execute(params![
                        route.id.as_str(),
                        &*route.short_name,
                        &*route.long_name,
                        route.route_type.to_gtfs()
                    ])
                    .map_err(upstream)?;
                clear_points
                    .execute(params![route.id.as_str()])
                    .map_err(upstream)?;
                if let Some(geom) = &route.geometry {
                    for (sequence, coord) in geom.coords().enumerate() {
                        insert_point
                            .execute(params![route.id.as_str(), sequence as i64, coord.y, coord.x])
                            .map_err(upstream)?;
                    }
                }
            }
        }
        tx.commit().map_err(upstream)?;

        debug!(stops = stops.len(), routes = routes.len(), "loaded transit data into sqlite");
        Ok(())
    }

    /// Run `sql` directly; used by maintenance tooling and tests.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock().execute_batch(sql).map_err(upstream)
    }

    /// A panic while holding the lock rolls back any open transaction as it
    /// unwinds, so the connection is still usable after poisoning.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn query_candidates(
    conn: &Connection,
    bbox: &BoundingBox,
    filter: &EntityFilter,
) -> Result<Vec<Candidate>> {
    let mut out = Vec::new();
    for part in bbox.parts() {
        match filter {
            EntityFilter::Stops => {
                let mut stmt = conn.prepare_cached(STOPS_IN_BOX).map_err(upstream)?;
                let rows = stmt
                    .query_map(
                        params![part.min_lat, part.max_lat, part.min_lon, part.max_lon],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, f64>(2)?,
                                row.get::<_, f64>(3)?,
                            ))
                        },
                    )
                    .map_err(upstream)?;
                for row in rows {
                    let (id, name, lat, lon) = row.map_err(upstream)?;
                    out.push(Candidate {
                        entity_id: StopIdentifier::new(id).into_entity(),
                        coordinate: Coordinate::new(lat, lon).map_err(upstream)?,
                        payload: Payload::Stop { name: name.into() },
                    });
                }
            }
            EntityFilter::Routes { route_type } => {
                let route_type = route_type.map(|t| i64::from(t.to_gtfs()));
                let mut stmt = conn.prepare_cached(ROUTE_POINTS_IN_BOX).map_err(upstream)?;
                let rows = stmt
                    .query_map(
                        params![part.min_lat, part.max_lat, part.min_lon, part.max_lon, route_type],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, i64>(3)?,
                                row.get::<_, f64>(4)?,
                                row.get::<_, f64>(5)?,
                            ))
                        },
                    )
                    .map_err(upstream)?;
                for row in rows {
                    let (id, short_name, long_name, code, lat, lon) = row.map_err(upstream)?;
                    let route_type = u16::try_from(code)
                        .ok()
                        .and_then(RouteType::from_gtfs)
                        .ok_or_else(|| upstream(format!("route {id} has unknown route_type {code}")))?;
                    out.push(Candidate {
                        entity_id: RouteIdentifier::new(id).into_entity(),
                        coordinate: Coordinate::new(lat, lon).map_err(upstream)?,
                        payload: Payload::Route {
                            short_name: short_name.into(),
                            long_name: long_name.into(),
                            route_type,
                        },
                    });
                }
            }
        }
    }
    Ok(out)
}

impl SpatialEngine for SqliteSpatialEngine {
    fn query_bounding_box<'a>(
        &'a self,
        bbox: &'a BoundingBox,
        filter: &'a EntityFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candidate>>> + Send + 'a>> {
        let engine = self.clone();
        let bbox = *bbox;
        let filter = *filter;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = engine.lock();
                query_candidates(&conn, &bbox, &filter)
            })
            .await
            .map_err(upstream)?
        })
    }
}
