use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::RequestError;
use crate::gateway::RequestGateway;
use crate::request::RequestSpec;

const CREATE_PATH: &str = "/meeting/create";
const DELETE_PATH: &str = "/meeting/delete";
const TOKEN_PATH: &str = "/meeting/token";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingInfo {
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingCreated {
    pub meeting_id: String,
    #[serde(default)]
    pub create_time: Option<String>,
}

/// Room access token issued by the media backend.
#[derive(Debug, Clone, Deserialize)]
pub struct MeetingToken {
    pub token: String,
}

/// Meeting lifecycle calls. Token requests go to the media backend origin.
pub struct MeetingService {
    gateway: Arc<RequestGateway>,
    livekit_base_url: String,
}

impl MeetingService {
    pub fn new(gateway: Arc<RequestGateway>, livekit_base_url: impl Into<String>) -> Self {
        Self {
            gateway,
            livekit_base_url: livekit_base_url.into(),
        }
    }

    pub async fn create_meeting(&self, info: &MeetingInfo) -> Result<MeetingCreated, RequestError> {
        let spec = RequestSpec::post(CREATE_PATH).json(info)?;
        let created: MeetingCreated = self.gateway.send_json(&spec).await?;
        tracing::info!("created meeting {}", created.meeting_id);
        Ok(created)
    }

    pub async fn delete_meeting(&self, meeting_id: &str) -> Result<serde_json::Value, RequestError> {
        let spec = RequestSpec::post(DELETE_PATH).body(json!({ "meetingId": meeting_id }));
        self.gateway.send_json(&spec).await
    }

    /// Ask the media backend for a token to join `meeting_id` as `username`.
    pub async fn meeting_token(
        &self,
        meeting_id: &str,
        username: &str,
    ) -> Result<MeetingToken, RequestError> {
        let spec = RequestSpec::post(TOKEN_PATH)
            .base_override(self.livekit_base_url.clone())
            .body(json!({ "meetingId": meeting_id, "username": username }));
        self.gateway.send_json(&spec).await
    }
}
