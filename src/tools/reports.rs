// src/tools/reports.rs
//
// Metric/anomaly chart helper exposed to the assistant: resolves a fleet
// object to its system and product, retrieves the best-matching report field
// from the vector index, and asks the report engine for chart content.
use crate::embeddings::EmbeddingsClient;
use crate::tools::clients::{ContentRequest, MetricModel, ReportsClient, SystemsClient};
use crate::vector_store::VectorStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const METRIC_MODEL_NAMESPACE: &str = "capacityReports";

/// Composite fleet object id: `SYSTEM_OBJECTTYPE_objectname`. The object
/// name may itself contain underscores ("APM00193712772_FILESYSTEM_fs_95").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectId {
    raw: String,
    system: String,
    object_type: Option<String>,
    object_name: Option<String>,
}

impl ObjectId {
    pub fn parse(raw: &str) -> Result<ObjectId, String> {
        let mut parts = raw.splitn(3, '_');
        let system = match parts.next() {
            Some(system) if !system.is_empty() => system.to_string(),
            _ => return Err(format!("malformed object id: {}", raw)),
        };
        Ok(ObjectId {
            raw: raw.to_string(),
            system,
            object_type: parts.next().map(str::to_string),
            object_name: parts.next().map(str::to_string),
        })
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn object_type(&self) -> Option<&str> {
        self.object_type.as_deref()
    }

    pub fn object_name(&self) -> Option<&str> {
        self.object_name.as_deref()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Chart window requested by the user, normalized to the report engine's
/// `(unit, duration)` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphTime {
    OneHour,
    OneDay,
    OneWeek,
    OneMonth,
    ThreeMonths,
    OneYear,
}

impl GraphTime {
    pub fn normalized(&self) -> (&'static str, u32) {
        match self {
            GraphTime::OneHour => ("hour", 1),
            GraphTime::OneDay => ("day", 1),
            GraphTime::OneWeek => ("week", 1),
            GraphTime::OneMonth => ("month", 1),
            GraphTime::ThreeMonths => ("month", 3),
            GraphTime::OneYear => ("year", 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Layout {
    LineChart,
    AnomalyChart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolLayoutResponse {
    pub layout: Layout,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatLayoutResponse {
    pub responses: Vec<ToolLayoutResponse>,
}

pub struct ReportsTool {
    systems_client: Arc<SystemsClient>,
    reports_client: Arc<ReportsClient>,
    embeddings: Arc<EmbeddingsClient>,
    vector_store: Arc<VectorStore>,
    collection: String,
}

impl ReportsTool {
    pub fn new(
        systems_client: Arc<SystemsClient>,
        reports_client: Arc<ReportsClient>,
        embeddings: Arc<EmbeddingsClient>,
        vector_store: Arc<VectorStore>,
        collection: String,
    ) -> Self {
        Self {
            systems_client,
            reports_client,
            embeddings,
            vector_store,
            collection,
        }
    }

    pub async fn get_metric_models(
        &self,
        namespace: &str,
        process_anomalies: bool,
    ) -> Result<Vec<MetricModel>, String> {
        self.reports_client
            .get_metric_models(namespace, process_anomalies)
            .await
    }

    /// Builds one chart for the requested metrics (or their anomalies) on a
    /// fleet object.
    pub async fn metric_anomaly_helper(
        &self,
        secure_permissions: &str,
        object_id: &ObjectId,
        metrics: &[String],
        time_range: GraphTime,
        anomalies_requested: bool,
    ) -> Result<ChatLayoutResponse, String> {
        let models = self
            .get_metric_models(METRIC_MODEL_NAMESPACE, anomalies_requested)
            .await?;

        let system_detail = self
            .systems_client
            .get_system_detail(object_id.system())
            .await?;
        let product = system_detail.product;

        let type_filter = if anomalies_requested { "anomaly" } else { "metric" };
        let query_text = build_query_text(&product, object_id.object_type(), metrics);
        let vector = self
            .embeddings
            .generate_single_embedding(query_text)
            .await?;

        let mut filters: Vec<(&str, String)> = vec![
            ("type", type_filter.to_string()),
            ("product", product.clone()),
        ];
        if let Some(object_type) = object_id.object_type() {
            filters.push(("object_type", object_type.to_string()));
        }

        let hits = self
            .vector_store
            .search(&self.collection, vector, 1, &filters)
            .await
            .map_err(|e| format!("report field retrieval failed: {}", e))?;
        let top = hits
            .first()
            .ok_or_else(|| "no report field matches the requested metrics".to_string())?;

        let identifier = top
            .payload
            .get("identifier")
            .and_then(|v| v.as_str())
            .unwrap_or(&top.id)
            .to_string();
        let (resource, field) = split_identifier(&identifier)?;
        let (resource_name, field_name) = display_names(&models, &identifier, &resource, &field);

        let (time_unit, time_duration) = time_range.normalized();
        let request = ContentRequest {
            resource,
            resource_name,
            field,
            field_name,
            object_id: object_id.to_string(),
            system: object_id.system().to_string(),
            object_type: object_id.object_type().map(str::to_string),
            product,
            time_unit: time_unit.to_string(),
            time_duration,
        };

        let data = if anomalies_requested {
            self.reports_client
                .generate_anomaly_content(secure_permissions, &request)
                .await?
        } else {
            self.reports_client
                .generate_metric_content(secure_permissions, &request)
                .await?
        };

        let layout = if anomalies_requested {
            Layout::AnomalyChart
        } else {
            Layout::LineChart
        };

        Ok(ChatLayoutResponse {
            responses: vec![ToolLayoutResponse { layout, data }],
        })
    }
}

fn build_query_text(product: &str, object_type: Option<&str>, metrics: &[String]) -> String {
    format!(
        "{} {} {}",
        product,
        object_type.unwrap_or_default(),
        metrics.join(" ")
    )
    .trim()
    .to_string()
}

/// Report field identifiers are `resource__field`.
fn split_identifier(identifier: &str) -> Result<(String, String), String> {
    identifier
        .split_once("__")
        .map(|(resource, field)| (resource.to_string(), field.to_string()))
        .ok_or_else(|| format!("malformed report field identifier: {}", identifier))
}

/// Prefers catalog display names; falls back to the raw identifier halves.
fn display_names(
    models: &[MetricModel],
    identifier: &str,
    resource: &str,
    field: &str,
) -> (String, String) {
    let model = models.iter().find(|m| m.identifier == identifier);
    let resource_name = model
        .and_then(|m| m.resource_name.clone())
        .unwrap_or_else(|| resource.to_string());
    let field_name = model
        .and_then(|m| m.field_name.clone())
        .unwrap_or_else(|| field.to_string());
    (resource_name, field_name)
}
