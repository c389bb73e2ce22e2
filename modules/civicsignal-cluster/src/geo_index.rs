//! Geohash-bucketed index over active clusters.
//!
//! Buckets are keyed by (category, geocell) so a query only touches the cells
//! covering its search disk in a single category. Clusters never merge across
//! categories, so there is nothing to find in the others.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use civicsignal_common::{Category, CivicSignalError, GeoPoint, RejectReason};

use crate::cluster::ClusterId;

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// (category, geocell): the unit of bucketing, pending pools and lane
/// serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LaneKey {
    pub category: Category,
    pub cell: String,
}

impl LaneKey {
    pub fn new(category: Category, cell: impl Into<String>) -> Self {
        Self {
            category,
            cell: cell.into(),
        }
    }
}

impl std::fmt::Display for LaneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.cell)
    }
}

/// Geohash of a point at the given precision.
pub fn geocell(point: &GeoPoint, precision: usize) -> Result<String, CivicSignalError> {
    geohash::encode(
        geohash::Coord {
            x: point.lng,
            y: point.lat,
        },
        precision,
    )
    .map_err(|_| CivicSignalError::InputRejected(RejectReason::InvalidCoordinates))
}

/// Every geocell intersecting the bounding box of a disk. Samples the box on
/// a grid no coarser than one cell, so no intersecting cell is skipped.
pub fn covering_cells(
    center: &GeoPoint,
    radius_m: f64,
    precision: usize,
) -> Result<BTreeSet<String>, CivicSignalError> {
    let origin = geocell(center, precision)?;
    let (_, lng_err, lat_err) = geohash::decode(&origin)
        .map_err(|_| CivicSignalError::InputRejected(RejectReason::InvalidCoordinates))?;
    let lat_step = lat_err * 2.0;
    let lng_step = lng_err * 2.0;

    let radius_m = radius_m.max(0.0);
    let lat_delta = radius_m / METERS_PER_DEGREE;
    let cos_lat = center.lat.to_radians().cos().max(0.01);
    let lng_delta = radius_m / (METERS_PER_DEGREE * cos_lat);

    let min_lat = (center.lat - lat_delta).max(-89.999_999);
    let max_lat = (center.lat + lat_delta).min(89.999_999);
    let min_lng = (center.lng - lng_delta).max(-179.999_999);
    let max_lng = (center.lng + lng_delta).min(179.999_999);

    let mut cells = BTreeSet::new();
    let mut lat = min_lat;
    loop {
        let mut lng = min_lng;
        loop {
            cells.insert(geocell(&GeoPoint::new(lat, lng), precision)?);
            if lng >= max_lng {
                break;
            }
            lng = (lng + lng_step).min(max_lng);
        }
        if lat >= max_lat {
            break;
        }
        lat = (lat + lat_step).min(max_lat);
    }
    Ok(cells)
}

/// Lane keys for a search disk in one category.
pub fn covering_lanes(
    category: Category,
    center: &GeoPoint,
    radius_m: f64,
    precision: usize,
) -> Result<BTreeSet<LaneKey>, CivicSignalError> {
    Ok(covering_cells(center, radius_m, precision)?
        .into_iter()
        .map(|cell| LaneKey::new(category, cell))
        .collect())
}

#[derive(Debug, Clone)]
struct IndexEntry {
    key: LaneKey,
    centroid: GeoPoint,
    radius_m: f64,
}

/// A cluster found by a radius query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub cluster_id: ClusterId,
    pub distance_m: f64,
    pub centroid: GeoPoint,
    pub radius_m: f64,
}

#[derive(Debug, Clone)]
pub struct GeoIndex {
    precision: usize,
    buckets: HashMap<LaneKey, BTreeSet<ClusterId>>,
    entries: HashMap<ClusterId, IndexEntry>,
}

impl GeoIndex {
    pub fn new(precision: usize) -> Self {
        Self {
            precision,
            buckets: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ClusterId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Index a new cluster. Re-inserting an id replaces its previous entry.
    pub fn insert(
        &mut self,
        id: ClusterId,
        category: Category,
        centroid: GeoPoint,
        radius_m: f64,
    ) -> Result<(), CivicSignalError> {
        let key = LaneKey::new(category, geocell(&centroid, self.precision)?);
        self.remove(id);
        self.buckets.entry(key.clone()).or_default().insert(id);
        self.entries.insert(
            id,
            IndexEntry {
                key,
                centroid,
                radius_m,
            },
        );
        Ok(())
    }

    /// Move a cluster after its centroid or radius changed.
    pub fn update(&mut self, id: ClusterId, centroid: GeoPoint, radius_m: f64) -> Result<(), CivicSignalError> {
        let Some(category) = self.entries.get(&id).map(|e| e.key.category) else {
            return Err(CivicSignalError::InvariantViolation(format!(
                "{id} is not indexed"
            )));
        };
        self.insert(id, category, centroid, radius_m)
    }

    pub fn remove(&mut self, id: ClusterId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&entry.key) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.buckets.remove(&entry.key);
            }
        }
        true
    }

    /// Clusters of `category` whose centroid lies within `radius_m` of
    /// `point`, nearest first, ties broken by lower id. The result is an owned
    /// snapshot; callers re-query rather than hold it across mutations.
    pub fn query(
        &self,
        point: &GeoPoint,
        radius_m: f64,
        category: Category,
    ) -> Result<Vec<IndexHit>, CivicSignalError> {
        let mut hits = Vec::new();
        for cell in covering_cells(point, radius_m, self.precision)? {
            let Some(bucket) = self.buckets.get(&LaneKey::new(category, cell)) else {
                continue;
            };
            for id in bucket {
                let Some(entry) = self.entries.get(id) else {
                    continue;
                };
                let distance_m = entry.centroid.distance_m(point);
                if distance_m <= radius_m {
                    hits.push(IndexHit {
                        cluster_id: *id,
                        distance_m,
                        centroid: entry.centroid,
                        radius_m: entry.radius_m,
                    });
                }
            }
        }
        hits.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then(a.cluster_id.cmp(&b.cluster_id))
        });
        Ok(hits)
    }
}
