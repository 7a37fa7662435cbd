use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::GeoPoint;

/// One end of a delivery: coordinates plus the party responsible there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
    pub owner_id: String,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// Wire shape for a location. Older records carry the object JSON-encoded inside a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LocationInput {
    Structured(Location),
    Encoded(String),
}

#[derive(Debug, Error)]
pub enum LocationParseError {
    #[error("location string is not a valid location object: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("location coordinates out of range: lat={lat}, lng={lng}")]
    OutOfRange { lat: f64, lng: f64 },

    #[error("location owner_id cannot be empty")]
    MissingOwner,
}

pub fn parse_location(input: LocationInput) -> Result<Location, LocationParseError> {
    let location = match input {
        LocationInput::Structured(location) => location,
        LocationInput::Encoded(raw) => serde_json::from_str::<Location>(&raw)?,
    };

    if !location.point().is_valid() {
        return Err(LocationParseError::OutOfRange {
            lat: location.lat,
            lng: location.lng,
        });
    }

    if location.owner_id.trim().is_empty() {
        return Err(LocationParseError::MissingOwner);
    }

    Ok(location)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_location, LocationInput, LocationParseError};

    fn input(value: serde_json::Value) -> LocationInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_structured_object() {
        let location = parse_location(input(json!({
            "lat": -1.2864,
            "lng": 36.8172,
            "address": "Wakulima Market",
            "owner_id": "buyer-7"
        })))
        .unwrap();

        assert_eq!(location.owner_id, "buyer-7");
        assert_eq!(location.lat, -1.2864);
    }

    #[test]
    fn accepts_string_encoded_object() {
        let encoded = r#"{"lat":-1.2864,"lng":36.8172,"address":"Wakulima Market","owner_id":"buyer-7"}"#;
        let location = parse_location(input(json!(encoded))).unwrap();

        assert_eq!(location.address, "Wakulima Market");
        assert_eq!(location.lng, 36.8172);
    }

    #[test]
    fn rejects_malformed_string() {
        let result = parse_location(input(json!("Wakulima Market, Nairobi")));
        assert!(matches!(result, Err(LocationParseError::Malformed(_))));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let result = parse_location(input(json!({
            "lat": 120.0,
            "lng": 36.8,
            "address": "nowhere",
            "owner_id": "farmer-1"
        })));
        assert!(matches!(result, Err(LocationParseError::OutOfRange { .. })));
    }

    #[test]
    fn rejects_missing_owner() {
        let result = parse_location(input(json!({
            "lat": 1.0,
            "lng": 1.0,
            "address": "farm gate",
            "owner_id": "  "
        })));
        assert!(matches!(result, Err(LocationParseError::MissingOwner)));
    }
}
