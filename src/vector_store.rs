// src/vector_store.rs
//
// Qdrant wrapper shared by doc retrieval (agent workflow) and the reports
// tool. Collections are provisioned elsewhere by the ingestion pipeline;
// this side only ensures they exist and searches them.
use qdrant_client::qdrant::{
    condition::ConditionOneOf, point_id::PointIdOptions, r#match::MatchValue,
    CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Condition, Distance,
    FieldCondition, FieldType, Filter, Match, SearchPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;

#[derive(Clone)]
pub struct VectorStore {
    client: Qdrant,
}

/// One scored hit with its payload lowered to plain JSON.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

impl VectorStore {
    pub fn new(
        url: &str,
        api_key: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut client_builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            client_builder = client_builder.api_key(key);
        }
        let client = client_builder.build()?;
        Ok(Self { client })
    }

    pub async fn ensure_collection(
        &self,
        name: &str,
        dim: u64,
        indexed_fields: &[&str],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let result = self
            .client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dim, Distance::Cosine)),
            )
            .await;

        match result {
            Ok(_) => {
                tracing::info!("created qdrant collection: {}", name);
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("already exists") {
                    tracing::debug!("qdrant collection '{}' already exists", name);
                } else {
                    tracing::warn!("failed to create qdrant collection '{}': {}", name, e);
                    return Err(Box::new(e));
                }
            }
        }

        for field in indexed_fields {
            let index_result = self
                .client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(name, *field, FieldType::Keyword)
                        .wait(true),
                )
                .await;
            if let Err(e) = index_result {
                if e.to_string().contains("already exists") {
                    tracing::debug!("{} index on '{}' already exists", field, name);
                } else {
                    tracing::warn!("failed to create {} index on '{}': {}", field, name, e);
                }
            }
        }

        Ok(())
    }

    /// Top-k search with keyword equality filters ANDed together.
    pub async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filters: &[(&str, String)],
    ) -> Result<Vec<ScoredDocument>, Box<dyn std::error::Error + Send + Sync>> {
        let must = filters
            .iter()
            .map(|(key, value)| Condition {
                condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                    key: key.to_string(),
                    r#match: Some(Match {
                        match_value: Some(MatchValue::Keyword(value.clone())),
                    }),
                    ..Default::default()
                })),
            })
            .collect::<Vec<_>>();

        let mut search = SearchPointsBuilder::new(collection, vector, limit).with_payload(true);
        if !must.is_empty() {
            search = search.filter(Filter {
                must,
                ..Default::default()
            });
        }

        let search_result = self.client.search_points(search).await?;

        let mut documents = Vec::new();
        for scored_point in search_result.result {
            let id = match scored_point.id.and_then(|id| id.point_id_options) {
                Some(PointIdOptions::Uuid(uuid)) => uuid,
                Some(PointIdOptions::Num(num)) => num.to_string(),
                None => continue,
            };
            let payload = serde_json::to_value(&scored_point.payload)
                .unwrap_or(serde_json::Value::Null);
            documents.push(ScoredDocument {
                id,
                score: scored_point.score,
                payload,
            });
        }

        Ok(documents)
    }
}
