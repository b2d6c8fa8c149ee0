//! Wire format of the remote scoring service.
//!
//! The service takes one POST per still. Its body is the JSON request
//! serialised to a string and then serialised again, so the payload on the
//! wire is a JSON string literal. Responses are plain JSON objects.

use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// Device descriptor as sent to the scorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
}

/// One scoring request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    /// Base64 JPEG without any `data:` URI prefix.
    pub image: String,
    pub subject_id: String,
    pub session_token: String,
    pub selected_device: Option<DeviceInfo>,
    pub device_list: Vec<DeviceInfo>,
    pub elapsed_seconds: Option<u64>,
}

impl ScoreRequest {
    /// Encode the request body: JSON, stringified twice.
    pub fn to_body(&self) -> serde_json::Result<String> {
        let inner = serde_json::to_string(self)?;
        serde_json::to_string(&inner)
    }

    /// Inverse of [`ScoreRequest::to_body`].
    pub fn from_body(body: &str) -> serde_json::Result<Self> {
        let inner: String = serde_json::from_str(body)?;
        serde_json::from_str(&inner)
    }
}

/// Raw scorer response.
///
/// Field aliases accept the naming used by the deployed service
/// (`bbox`, `spoofing`, `face_score`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResponse {
    #[serde(alias = "bbox")]
    pub bounding_box: BoundingBox,
    #[serde(alias = "spoofing")]
    pub spoof_score: f32,
    #[serde(alias = "face_score")]
    pub face_match_score: f32,
}

impl ScoreResponse {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ScoreRequest {
        ScoreRequest {
            image: "/9j/4AAQ".to_string(),
            subject_id: "f1".to_string(),
            session_token: "abc123".to_string(),
            selected_device: Some(DeviceInfo {
                id: "cam0".to_string(),
                label: "Front".to_string(),
            }),
            device_list: vec![DeviceInfo {
                id: "cam0".to_string(),
                label: "Front".to_string(),
            }],
            elapsed_seconds: None,
        }
    }

    #[test]
    fn test_body_is_double_encoded() {
        let body = request().to_body().unwrap();
        assert!(body.starts_with('"'));
        assert!(body.contains("\\\"subjectId\\\":\\\"f1\\\""));

        let parsed = ScoreRequest::from_body(&body).unwrap();
        assert_eq!(parsed.subject_id, "f1");
        assert_eq!(parsed.elapsed_seconds, None);
    }

    #[test]
    fn test_null_elapsed_serialised() {
        let inner = serde_json::to_value(request()).unwrap();
        assert!(inner["elapsedSeconds"].is_null());
        assert_eq!(inner["selectedDevice"]["label"], "Front");
    }

    #[test]
    fn test_response_current_names() {
        let raw = r#"{"boundingBox":{"left":1,"top":2,"right":3,"bottom":4},
                      "spoofScore":0.1,"faceMatchScore":0.2}"#;
        let resp = ScoreResponse::from_json(raw).unwrap();
        assert_eq!(resp.bounding_box.right, 3.0);
        assert!((resp.spoof_score - 0.1).abs() < 1e-6);
        assert!((resp.face_match_score - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_response_legacy_names() {
        let raw = r#"{"bbox":{"left":10,"top":20,"right":30,"bottom":40},
                      "spoofing":0.8,"face_score":0.9}"#;
        let resp = ScoreResponse::from_json(raw).unwrap();
        assert_eq!(resp.bounding_box.left, 10.0);
        assert!((resp.spoof_score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_response_missing_field_rejected() {
        assert!(ScoreResponse::from_json(r#"{"spoofScore":0.1}"#).is_err());
    }
}
