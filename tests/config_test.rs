//! Integration tests for configuration loading

use geogdo::domain::types::TrackerId;
use geogdo::infra::Config;
use geogdo::services::geofence::{kml, Geofence};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
global:
  tracker_mqtt_settings:
    connection:
      host: test-broker
      port: 1884
      client_id: test-client
      user: bus-user
      pass: bus-pass
  cooldown: 2

garage_doors:
  - geofence:
      type: circular
      settings:
        center: {lat: 40.0, lng: -75.0}
        close_distance: 0.1
        open_distance: 0.05
    opener:
      type: http
      settings:
        connection: {host: gdo-one.local, port: 8080}
        commands:
          - {name: open, endpoint: /open, http_method: post}
          - {name: close, endpoint: /close, http_method: post}
    trackers:
      - id: 1
        lat_topic: teslamate/cars/1/latitude
        lng_topic: teslamate/cars/1/longitude

  - geofence:
      type: namedzone
      settings:
        open_trigger: {from: not_home, to: home}
        close_trigger: {from: home, to: not_home}
    opener:
      type: http
      settings:
        connection: {host: gdo-two.local}
        commands:
          - {name: open, endpoint: /open, http_method: get}
    trackers:
      - id: phone-a
        zone_topic: tracker/phone-a/geofence
      - id: phone-b
        zone_topic: tracker/phone-b/geofence
        complex_topic:
          topic: owntracks/b/phone
          lat_json_key: lat
          lng_json_key: lon
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    let conn = &config.global.tracker_mqtt_settings.connection;
    assert_eq!(conn.host, "test-broker");
    assert_eq!(conn.port, 1884);
    assert_eq!(conn.client_id, "test-client");
    assert_eq!(config.global.cooldown, 2);

    assert_eq!(config.garage_doors.len(), 2);

    let first = &config.garage_doors[0];
    assert_eq!(first.geofence.kind, "circular");
    assert_eq!(first.trackers[0].id, TrackerId::from("1"));
    assert!(Geofence::from_config(&first.geofence).is_ok());

    let second = &config.garage_doors[1];
    assert_eq!(second.geofence.kind, "namedzone");
    assert_eq!(second.trackers.len(), 2);
    assert_eq!(second.trackers[1].complex_topic.lat_json_key, "lat");
    assert_eq!(second.trackers[1].complex_topic.lng_json_key, "lon");
    assert!(Geofence::from_config(&second.geofence).is_ok());
}

#[test]
fn test_missing_file_is_an_error() {
    let err = Config::from_file("/nonexistent/config.yml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_invalid_yaml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"global: [not, a, mapping").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_garage_without_trackers_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            br#"
global:
  tracker_mqtt_settings:
    connection: {host: test-broker}
garage_doors:
  - geofence:
      type: circular
      settings:
        center: {lat: 1.0, lng: 1.0}
        open_distance: 0.1
    opener: {type: http}
    trackers: []
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("no trackers found for garage door #0"));
}

#[test]
fn test_polygon_geofence_from_kml_file() {
    let mut kml_file = NamedTempFile::new().unwrap();
    kml_file
        .write_all(
            br#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark>
      <name>Open</name>
      <Polygon><outerBoundaryIs><LinearRing><coordinates>
        -75.01,40.01
        -74.99,40.01
        -74.99,39.99
        -75.01,39.99
      </coordinates></LinearRing></outerBoundaryIs></Polygon>
    </Placemark>
    <Placemark>
      <name>close</name>
      <Polygon><outerBoundaryIs><LinearRing><coordinates>
        -75.02,40.02
        -74.98,40.02
        -74.98,39.98
        -75.02,39.98
      </coordinates></LinearRing></outerBoundaryIs></Polygon>
    </Placemark>
  </Document>
</kml>"#,
        )
        .unwrap();
    kml_file.flush().unwrap();

    // direct parse
    let polygons = kml::load_kml_file(kml_file.path().to_str().unwrap()).unwrap();
    assert_eq!(polygons.open.len(), 4);
    assert_eq!(polygons.close.len(), 4);
    assert_eq!(polygons.open[0].lat, 40.01);
    assert_eq!(polygons.open[0].lng, -75.01);

    // through the geofence config path
    let geofence_yaml = format!(
        "type: polygon\nsettings:\n  kml_file: {}\n",
        kml_file.path().display()
    );
    let geofence_config: geogdo::infra::config::GeofenceConfig =
        serde_yaml::from_str(&geofence_yaml).unwrap();
    let geofence = Geofence::from_config(&geofence_config).unwrap();
    match geofence {
        Geofence::Polygon(p) => {
            assert_eq!(p.open.len(), 4);
            assert_eq!(p.close.len(), 4);
            assert!(p.restricted.is_empty());
        }
        other => panic!("expected polygon geofence, got {:?}", other),
    }
}
