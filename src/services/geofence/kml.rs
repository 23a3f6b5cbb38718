//! KML sourcing for polygon geofences
//!
//! Placemarks named `open`, `close`, or `restricted` (case-insensitively)
//! supply the vertex lists. Coordinates use the KML
//! `longitude,latitude[,altitude]` line format.

use crate::domain::types::Point;
use anyhow::Context;
use serde::Deserialize;
use std::fs;

/// Vertex lists parsed out of a KML document.
#[derive(Debug, Default, PartialEq)]
pub struct KmlPolygons {
    pub open: Vec<Point>,
    pub close: Vec<Point>,
    pub restricted: Vec<Point>,
}

// The whole document is lowercased before parsing, so these structs only
// need to know the lowercase tag spellings.
#[derive(Debug, Deserialize)]
struct Kml {
    document: Document,
}

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default, rename = "placemark")]
    placemarks: Vec<Placemark>,
}

#[derive(Debug, Default, Deserialize)]
struct Placemark {
    #[serde(default)]
    name: String,
    #[serde(default)]
    polygon: Polygon,
}

#[derive(Debug, Default, Deserialize)]
struct Polygon {
    #[serde(default)]
    outerboundaryis: OuterBoundary,
}

#[derive(Debug, Default, Deserialize)]
struct OuterBoundary {
    #[serde(default)]
    linearring: LinearRing,
}

#[derive(Debug, Default, Deserialize)]
struct LinearRing {
    #[serde(default)]
    coordinates: String,
}

pub fn load_kml_file(path: &str) -> anyhow::Result<KmlPolygons> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("could not read kml file {}", path))?;
    parse_kml(&content)
}

/// Parse a KML document into per-name vertex lists. Placemarks with other
/// names are ignored.
pub fn parse_kml(content: &str) -> anyhow::Result<KmlPolygons> {
    // lowercase the whole document so tag and placemark-name matching is
    // case-insensitive
    let lowered = content.to_lowercase();
    let kml: Kml = quick_xml::de::from_str(&lowered).context("could not parse kml document")?;

    let mut polygons = KmlPolygons::default();
    for placemark in &kml.document.placemarks {
        let target = match placemark.name.trim() {
            "open" => &mut polygons.open,
            "close" => &mut polygons.close,
            "restricted" => &mut polygons.restricted,
            _ => continue,
        };
        *target = parse_coordinates(&placemark.polygon.outerboundaryis.linearring.coordinates)?;
    }

    Ok(polygons)
}

fn parse_coordinates(coordinates: &str) -> anyhow::Result<Vec<Point>> {
    let mut points = Vec::new();
    for line in coordinates.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // kml coordinate order is longitude,latitude[,altitude]
        let mut parts = line.split(',');
        let lng = parts.next().unwrap_or("");
        let lat = parts
            .next()
            .with_context(|| format!("missing latitude in coordinate line {}", line))?;

        points.push(Point {
            lat: lat
                .trim()
                .parse()
                .with_context(|| format!("could not parse latitude from line {}", line))?,
            lng: lng
                .trim()
                .parse()
                .with_context(|| format!("could not parse longitude from line {}", line))?,
        });
    }
    Ok(points)
}
