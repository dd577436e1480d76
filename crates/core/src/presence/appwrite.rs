//! Appwrite document store over its REST API

use super::{PresenceRecord, PresenceStore, STATUS_ENDED};
use crate::config::PresenceConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROJECT_HEADER: &str = "X-Appwrite-Project";
const KEY_HEADER: &str = "X-Appwrite-Key";

/// Remote presence store
pub struct AppwritePresenceStore {
    config: PresenceConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateDocument<'a> {
    document_id: &'a str,
    data: &'a PresenceRecord,
}

#[derive(Debug, Serialize)]
struct UpdateDocument<'a> {
    data: StatusPatch<'a>,
}

#[derive(Debug, Serialize)]
struct StatusPatch<'a> {
    status: &'a str,
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    total: u64,
    documents: Vec<PresenceRecord>,
}

impl AppwritePresenceStore {
    pub fn new(config: PresenceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Persistence(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.config.endpoint.trim_end_matches('/'),
            self.config.database_id,
            self.config.collection_id
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(PROJECT_HEADER, &self.config.project_id);
        match &self.config.api_key {
            Some(key) => request.header(KEY_HEADER, key),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::Persistence(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Persistence(format!(
                "Store returned {}: {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Persistence(format!("Failed to parse response: {}", e)))
    }

    async fn find(&self, attribute: &str, value: &str) -> Result<DocumentList> {
        let request = self
            .client
            .get(self.documents_url())
            .query(&[("queries[]", equal_query(attribute, value))]);
        self.send(request).await
    }
}

/// Query string for an equality filter
fn equal_query(attribute: &str, value: &str) -> String {
    serde_json::json!({
        "method": "equal",
        "attribute": attribute,
        "values": [value],
    })
    .to_string()
}

#[async_trait]
impl PresenceStore for AppwritePresenceStore {
    async fn record_join(
        &self,
        meeting_url: &str,
        room_id: &str,
        caller_id: &str,
        callee_ids: &[String],
        caller_name: &str,
    ) -> Result<PresenceRecord> {
        let record = PresenceRecord::new(meeting_url, room_id, caller_id, callee_ids, caller_name);
        let body = CreateDocument {
            document_id: "unique()",
            data: &record,
        };

        let created: PresenceRecord = self
            .send(self.client.post(self.documents_url()).json(&body))
            .await?;
        debug!("Presence record created for room {}", room_id);
        Ok(created)
    }

    async fn mark_ended(&self, caller_id: &str) -> Result<PresenceRecord> {
        let existing = self.find("callerId", caller_id).await?;
        let document_id = existing
            .documents
            .first()
            .and_then(|d| d.document_id.clone())
            .ok_or_else(|| {
                Error::Persistence(format!("No document found for callerId {}", caller_id))
            })?;
        debug!(
            "Marking presence document {} ended ({} matches)",
            document_id, existing.total
        );

        let body = UpdateDocument {
            data: StatusPatch {
                status: STATUS_ENDED,
            },
        };
        let url = format!("{}/{}", self.documents_url(), document_id);
        self.send(self.client.patch(url).json(&body)).await
    }

    async fn list(&self, room_id: Option<&str>) -> Result<Vec<PresenceRecord>> {
        let list = match room_id {
            Some(room) => self.find("room", room).await?,
            None => self.send(self.client.get(self.documents_url())).await?,
        };
        Ok(list.documents)
    }
}
