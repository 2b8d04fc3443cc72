use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hazard classification returned by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HazardState {
    #[default]
    Safe,
    Warning,
    Danger,
}

impl HazardState {
    pub fn name(&self) -> &'static str {
        match self {
            HazardState::Safe => "SAFE",
            HazardState::Warning => "WARNING",
            HazardState::Danger => "DANGER",
        }
    }
}

impl std::fmt::Display for HazardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Point in transmission-resolution coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// One detector verdict. Travels as `{"state": "DANGER", "point": [160, 120]}`;
/// `point` may be `null` or absent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Detection {
    pub state: HazardState,
    #[serde(default, with = "point_pair")]
    pub point: Option<Point>,
}

impl Detection {
    pub fn new(state: HazardState, point: Option<Point>) -> Self {
        Self { state, point }
    }

    /// Parse one inbound text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let detection: Detection = serde_json::from_str(text)?;
        if let Some(p) = detection.point {
            if !p.x.is_finite() || !p.y.is_finite() {
                return Err(ProtocolError::BadPoint);
            }
        }
        Ok(detection)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed detector message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("detector point is not a finite coordinate pair")]
    BadPoint,
}

/// `[x, y]` on the wire, `Point` in code
mod point_pair {
    use super::Point;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(point: &Option<Point>, s: S) -> Result<S::Ok, S::Error> {
        point.map(|p| [p.x, p.y]).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Point>, D::Error> {
        let pair: Option<[f64; 2]> = Option::deserialize(d)?;
        Ok(pair.map(|[x, y]| Point::new(x, y)))
    }
}

/// Width the distance thresholds are expressed in
pub const REFERENCE_WIDTH: f64 = 640.0;
/// Beyond this distance from the object the hand is safe
pub const SAFE_DISTANCE: f64 = 100.0;
/// At or within this distance the hand is in danger
pub const WARNING_DISTANCE: f64 = 50.0;

/// Classify a distance measured in reference-width pixels
pub fn classify(distance: f64) -> HazardState {
    if distance > SAFE_DISTANCE {
        HazardState::Safe
    } else if distance > WARNING_DISTANCE {
        HazardState::Warning
    } else {
        HazardState::Danger
    }
}

/// Classify a point against the center of a `width`×`height` frame,
/// scaling the distance up to the reference width first.
pub fn classify_in_frame(point: Point, width: u32, height: u32) -> HazardState {
    let center = Point::new(width as f64 / 2.0, height as f64 / 2.0);
    let scale = REFERENCE_WIDTH / width.max(1) as f64;
    classify(point.distance_to(center) * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_safe_without_point() {
        let d = Detection::decode(r#"{"state":"SAFE","point":null}"#).unwrap();
        assert_eq!(d, Detection::new(HazardState::Safe, None));

        // point may be omitted entirely
        let d = Detection::decode(r#"{"state":"WARNING"}"#).unwrap();
        assert_eq!(d.state, HazardState::Warning);
        assert!(d.point.is_none());
    }

    #[test]
    fn test_decode_danger_with_point() {
        let d = Detection::decode(r#"{"state":"DANGER","point":[160,120]}"#).unwrap();
        assert_eq!(d.state, HazardState::Danger);
        assert_eq!(d.point, Some(Point::new(160.0, 120.0)));
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let d = Detection::decode(r#"{"state":"SAFE","point":null,"image":"abcd"}"#).unwrap();
        assert_eq!(d.state, HazardState::Safe);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Detection::decode("not json").is_err());
        assert!(Detection::decode(r#"{"state":"PANIC"}"#).is_err());
        assert!(Detection::decode(r#"{"point":[1,2]}"#).is_err());
        assert!(Detection::decode(r#"{"state":"SAFE","point":[1]}"#).is_err());
    }

    #[test]
    fn test_encode_matches_wire_shape() {
        let d = Detection::new(HazardState::Danger, Some(Point::new(160.0, 120.0)));
        let json: serde_json::Value = serde_json::from_str(&d.encode().unwrap()).unwrap();
        assert_eq!(json["state"], "DANGER");
        assert_eq!(json["point"][0], 160.0);
        assert_eq!(json["point"][1], 120.0);

        let safe = Detection::default().encode().unwrap();
        assert_eq!(safe, r#"{"state":"SAFE","point":null}"#);
    }

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(classify(150.0), HazardState::Safe);
        assert_eq!(classify(100.0), HazardState::Warning);
        assert_eq!(classify(75.0), HazardState::Warning);
        assert_eq!(classify(50.0), HazardState::Danger);
        assert_eq!(classify(0.0), HazardState::Danger);
    }

    #[test]
    fn test_classify_scales_to_frame_width() {
        // 40px off-center in a 320-wide frame is 80px at reference width
        let state = classify_in_frame(Point::new(200.0, 120.0), 320, 240);
        assert_eq!(state, HazardState::Warning);
        let state = classify_in_frame(Point::new(160.0, 120.0), 320, 240);
        assert_eq!(state, HazardState::Danger);
        let state = classify_in_frame(Point::new(0.0, 0.0), 320, 240);
        assert_eq!(state, HazardState::Safe);
    }
}
