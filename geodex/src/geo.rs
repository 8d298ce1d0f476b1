//! Geographic primitives: coordinates, bounding boxes and quadtree cell math.
//!
//! The world is subdivided per level into a regular grid of
//! `2^level x 2^level` cells covering longitude [-180, 180] and latitude
//! [-90, 90]. Cell coordinates are computed in a renormalized space where
//! both axes start at zero.

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoCoord {
    pub lat: f64,
    pub lon: f64,
}

impl GeoCoord {
    pub fn new(lat: f64, lon: f64) -> GeoCoord {
        GeoCoord { lat, lon }
    }

    /// True if both components are finite and within world bounds.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl std::fmt::Display for GeoCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {})", self.lat, self.lon)
    }
}

/// A geographic bounding box.
///
/// Invariant: `min_lat <= max_lat` and `min_lon <= max_lon`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl GeoBox {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> GeoBox {
        GeoBox {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// The minimal box enclosing a point sequence. Returns `None` for an
    /// empty sequence.
    pub fn from_coords(coords: &[GeoCoord]) -> Option<GeoBox> {
        let first = coords.first()?;
        let mut bbox = GeoBox::new(first.lat, first.lon, first.lat, first.lon);

        for coord in &coords[1..] {
            bbox.min_lat = bbox.min_lat.min(coord.lat);
            bbox.min_lon = bbox.min_lon.min(coord.lon);
            bbox.max_lat = bbox.max_lat.max(coord.lat);
            bbox.max_lon = bbox.max_lon.max(coord.lon);
        }

        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn is_valid(&self) -> bool {
        self.min_lat <= self.max_lat && self.min_lon <= self.max_lon
    }

    pub fn intersects(&self, other: &GeoBox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    pub fn includes_coord(&self, coord: &GeoCoord) -> bool {
        coord.lat >= self.min_lat
            && coord.lat <= self.max_lat
            && coord.lon >= self.min_lon
            && coord.lon <= self.max_lon
    }

    pub fn union(&self, other: &GeoBox) -> GeoBox {
        GeoBox {
            min_lat: self.min_lat.min(other.min_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lat: self.max_lat.max(other.max_lat),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    pub fn center(&self) -> GeoCoord {
        GeoCoord::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

impl std::fmt::Display for GeoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} {} - {} {}]",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

/// Width in degrees of one cell at the given quadtree level.
pub fn cell_width(level: u32) -> f64 {
    360.0 / (1u64 << level) as f64
}

/// Height in degrees of one cell at the given quadtree level.
pub fn cell_height(level: u32) -> f64 {
    180.0 / (1u64 << level) as f64
}

/// The inclusive cell coordinate range covered by a bounding box at the
/// given level, in renormalized (all-positive) cell space.
pub fn cell_range(bbox: &GeoBox, level: u32) -> (u32, u32, u32, u32) {
    let width = cell_width(level);
    let height = cell_height(level);
    let max_cell = (1u64 << level) as f64 - 1.0;

    let x1 = ((bbox.min_lon + 180.0) / width).floor().clamp(0.0, max_cell) as u32;
    let x2 = ((bbox.max_lon + 180.0) / width).floor().clamp(0.0, max_cell) as u32;
    let y1 = ((bbox.min_lat + 90.0) / height).floor().clamp(0.0, max_cell) as u32;
    let y2 = ((bbox.max_lat + 90.0) / height).floor().clamp(0.0, max_cell) as u32;

    (x1, y1, x2, y2)
}

/// The geographic bounds of cell (x, y) at the given level.
pub fn cell_bounds(x: u32, y: u32, level: u32) -> GeoBox {
    let width = cell_width(level);
    let height = cell_height(level);

    GeoBox {
        min_lat: y as f64 * height - 90.0,
        min_lon: x as f64 * width - 180.0,
        max_lat: (y + 1) as f64 * height - 90.0,
        max_lon: (x + 1) as f64 * width - 180.0,
    }
}
