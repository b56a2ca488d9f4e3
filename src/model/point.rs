//! Spatial points in the four supported coordinate reference systems.

use std::collections::BTreeMap;
use std::fmt;

use super::Value;
use super::value::format_float;

/// Coordinate reference system of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// `cartesian`, SRID 7203
    Cartesian2D,
    /// `cartesian-3d`, SRID 9157
    Cartesian3D,
    /// `wgs-84`, SRID 4326
    Geographic2D,
    /// `wgs-84-3d`, SRID 4979
    Geographic3D,
}

impl Crs {
    pub fn srid(self) -> i64 {
        match self {
            Crs::Cartesian2D => 7203,
            Crs::Cartesian3D => 9157,
            Crs::Geographic2D => 4326,
            Crs::Geographic3D => 4979,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Crs::Cartesian2D => "cartesian",
            Crs::Cartesian3D => "cartesian-3d",
            Crs::Geographic2D => "wgs-84",
            Crs::Geographic3D => "wgs-84-3d",
        }
    }

    pub fn dimensions(self) -> usize {
        match self {
            Crs::Cartesian2D | Crs::Geographic2D => 2,
            Crs::Cartesian3D | Crs::Geographic3D => 3,
        }
    }

    pub fn is_geographic(self) -> bool {
        matches!(self, Crs::Geographic2D | Crs::Geographic3D)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cartesian" => Some(Crs::Cartesian2D),
            "cartesian-3d" => Some(Crs::Cartesian3D),
            "wgs-84" => Some(Crs::Geographic2D),
            "wgs-84-3d" => Some(Crs::Geographic3D),
            _ => None,
        }
    }

    pub fn from_srid(srid: i64) -> Option<Self> {
        match srid {
            7203 => Some(Crs::Cartesian2D),
            9157 => Some(Crs::Cartesian3D),
            4326 => Some(Crs::Geographic2D),
            4979 => Some(Crs::Geographic3D),
            _ => None,
        }
    }

    fn default_for(dimensions: usize, geographic: bool) -> Self {
        match (dimensions, geographic) {
            (3, true) => Crs::Geographic3D,
            (3, false) => Crs::Cartesian3D,
            (_, true) => Crs::Geographic2D,
            (_, false) => Crs::Cartesian2D,
        }
    }
}

/// A point value. For geographic systems `x` is longitude, `y` latitude and
/// `z` height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub crs: Crs,
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Point {
    /// Build a point, checking that the coordinate count matches the CRS
    /// and every coordinate is finite.
    pub fn new(crs: Crs, x: f64, y: f64, z: Option<f64>) -> std::result::Result<Self, String> {
        let dims = if z.is_some() { 3 } else { 2 };
        if dims != crs.dimensions() {
            return Err(format!(
                "crs '{}' needs {} coordinates, got {dims}",
                crs.name(),
                crs.dimensions()
            ));
        }
        if ![Some(x), Some(y), z].into_iter().flatten().all(f64::is_finite) {
            return Err("point coordinates must be finite".into());
        }
        Ok(Self { crs, x, y, z })
    }

    pub fn coordinates(&self) -> Vec<f64> {
        let mut c = vec![self.x, self.y];
        c.extend(self.z);
        c
    }

    /// Build a point from the map argument of `point({...})`.
    ///
    /// Accepts `x/y[/z]` or `longitude/latitude[/height]`, with an optional
    /// `crs` name or `srid`. Without either the CRS is inferred from the
    /// coordinate names and count.
    pub fn from_map(map: &BTreeMap<String, Value>) -> std::result::Result<Self, String> {
        let coord = |key: &str| -> std::result::Result<Option<f64>, String> {
            match map.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => v
                    .as_float()
                    .map(Some)
                    .ok_or_else(|| format!("point coordinate '{key}' must be numeric, got {}", v.type_name())),
            }
        };

        let geographic = map.contains_key("longitude") || map.contains_key("latitude");
        let (x, y, z) = if geographic {
            (coord("longitude")?, coord("latitude")?, coord("height")?)
        } else {
            (coord("x")?, coord("y")?, coord("z")?)
        };
        let (Some(x), Some(y)) = (x, y) else {
            return Err("point needs both x and y (or longitude and latitude)".into());
        };

        let crs = match (map.get("crs"), map.get("srid")) {
            (Some(Value::String(name)), _) => {
                Crs::from_name(name).ok_or_else(|| format!("unknown crs '{name}'"))?
            }
            (Some(other), _) => return Err(format!("crs must be a string, got {}", other.type_name())),
            (None, Some(Value::Int(srid))) => {
                Crs::from_srid(*srid).ok_or_else(|| format!("unknown srid {srid}"))?
            }
            (None, Some(other)) => return Err(format!("srid must be an integer, got {}", other.type_name())),
            (None, None) => Crs::default_for(if z.is_some() { 3 } else { 2 }, geographic),
        };
        Point::new(crs, x, y, z)
    }
}

impl fmt::Display for Point {
    /// Renders the Cypher constructor call that rebuilds this point.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "point({{x: {}, y: {}", format_float(self.x), format_float(self.y))?;
        if let Some(z) = self.z {
            write!(f, ", z: {}", format_float(z))?;
        }
        write!(f, ", crs: '{}'}})", self.crs.name())
    }
}
