// src/tools/clients.rs
//
// External report plumbing: the fleet inventory service (system metadata)
// and the report engine (chart content generation).
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SystemDetail {
    pub product: String,
    pub system: String,
    pub name: String,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct SystemsClient {
    client: Client,
    base_url: String,
}

impl SystemsClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub async fn get_system_detail(&self, system_id: &str) -> Result<SystemDetail, String> {
        let response = self
            .client
            .get(format!("{}/api/systems/{}", self.base_url, system_id))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("Fleet inventory request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Fleet inventory error ({}): {}", status, body));
        }

        response
            .json()
            .await
            .map_err(|e| format!("Failed to parse system detail: {}", e))
    }
}

/// Catalog entry for one chartable report field. `identifier` is
/// `resource__field`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MetricModel {
    pub identifier: String,
    pub resource_name: Option<String>,
    pub field_name: Option<String>,
}

/// Everything the report engine needs to render one chart.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContentRequest {
    pub resource: String,
    pub resource_name: String,
    pub field: String,
    pub field_name: String,
    pub object_id: String,
    pub system: String,
    pub object_type: Option<String>,
    pub product: String,
    pub time_unit: String,
    pub time_duration: u32,
}

#[derive(Debug, Clone)]
pub struct ReportsClient {
    client: Client,
    base_url: String,
}

impl ReportsClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub async fn get_metric_models(
        &self,
        namespace: &str,
        process_anomalies: bool,
    ) -> Result<Vec<MetricModel>, String> {
        let response = self
            .client
            .get(format!("{}/api/metric-models", self.base_url))
            .query(&[
                ("namespace", namespace),
                ("anomalies", &process_anomalies.to_string()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("Report engine request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Report engine error ({}): {}", status, body));
        }

        response
            .json()
            .await
            .map_err(|e| format!("Failed to parse metric models: {}", e))
    }

    pub async fn generate_metric_content(
        &self,
        secure_permissions: &str,
        request: &ContentRequest,
    ) -> Result<serde_json::Value, String> {
        self.generate_content("metrics", secure_permissions, request)
            .await
    }

    pub async fn generate_anomaly_content(
        &self,
        secure_permissions: &str,
        request: &ContentRequest,
    ) -> Result<serde_json::Value, String> {
        self.generate_content("anomalies", secure_permissions, request)
            .await
    }

    async fn generate_content(
        &self,
        kind: &str,
        secure_permissions: &str,
        request: &ContentRequest,
    ) -> Result<serde_json::Value, String> {
        let response = self
            .client
            .post(format!("{}/api/content/{}", self.base_url, kind))
            .header("Authorization", format!("Bearer {}", secure_permissions))
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("Report engine request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Report engine error ({}): {}", status, body));
        }

        response
            .json()
            .await
            .map_err(|e| format!("Failed to parse report content: {}", e))
    }
}
