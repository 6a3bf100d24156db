// src/vector/qdrant.rs
// Authoritative vector store over the hosted Qdrant instance.

use anyhow::{Context, Result};
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, GetPointsBuilder, PointId, PointStruct,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{IndexKind, ScoredHit, StoredPoint, PAYLOAD_INDICES};
use crate::embedding::EMBEDDING_DIM;

pub struct AuthoritativeStore {
    client: Qdrant,
}

impl AuthoritativeStore {
    pub fn new(url: &str, api_key: Option<&str>) -> Result<Self> {
        let mut builder = Qdrant::from_url(url).skip_compatibility_check();
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder.build().context("failed to connect to Qdrant")?;
        Ok(Self { client })
    }

    /// Create every collection and payload index that is missing. Safe to run
    /// on every startup and from both processes.
    pub async fn bootstrap(&self) -> Result<()> {
        for collection in [
            super::collections::MESSAGES,
            super::collections::ROOMS,
            super::collections::USERS,
            super::collections::AI_CHAT_MESSAGES,
        ] {
            self.ensure_collection(collection).await?;
        }
        for (collection, field, kind) in PAYLOAD_INDICES {
            let field_type = match kind {
                IndexKind::Keyword => FieldType::Keyword,
                IndexKind::Datetime => FieldType::Datetime,
            };
            // Index creation is idempotent server-side; an "already exists"
            // style failure is not worth failing startup over.
            if let Err(e) = self
                .client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    *collection,
                    *field,
                    field_type,
                ))
                .await
            {
                debug!("payload index {collection}.{field}: {e}");
            }
        }
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .context("failed to check collection existence")?;
        if exists {
            return Ok(());
        }

        info!("creating collection {collection}");
        match self
            .client
            .create_collection(
                CreateCollectionBuilder::new(collection).vectors_config(VectorParamsBuilder::new(
                    EMBEDDING_DIM as u64,
                    Distance::Cosine,
                )),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                // Another process may have won the creation race.
                if e.to_string().contains("already exists") {
                    debug!("collection {collection} created concurrently");
                    Ok(())
                } else {
                    Err(e).context(format!("failed to create collection {collection}"))
                }
            }
        }
    }

    /// Insert or replace a point by ID.
    pub async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: HashMap<String, QdrantValue>,
    ) -> Result<()> {
        let point = PointStruct::new(id.to_string(), vector, payload);
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, vec![point]).wait(true))
            .await
            .context("failed to upsert point")?;
        Ok(())
    }

    /// By-ID fetch. Missing IDs are simply absent from the result.
    pub async fn retrieve(&self, collection: &str, ids: &[String]) -> Result<Vec<StoredPoint>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.clone())).collect();
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(collection, point_ids)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await
            .context("failed to retrieve points")?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_id_string(point.id.as_ref())?;
                Some(StoredPoint {
                    id,
                    payload: point.payload,
                })
            })
            .collect())
    }

    /// Cosine-similarity search with an optional payload filter.
    pub async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<Filter>,
    ) -> Result<Vec<ScoredHit>> {
        let mut builder = SearchPointsBuilder::new(collection, vector, limit).with_payload(true);
        if let Some(filter) = filter {
            builder = builder.filter(filter);
        }
        let response = self
            .client
            .search_points(builder)
            .await
            .context("failed to search points")?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_id_string(point.id.as_ref())?;
                Some(ScoredHit {
                    id,
                    score: point.score,
                    payload: point.payload,
                })
            })
            .collect())
    }

    /// Paginated enumeration of every point matching the filter.
    pub async fn scroll(
        &self,
        collection: &str,
        filter: Option<Filter>,
        page_size: u32,
    ) -> Result<Vec<StoredPoint>> {
        let mut all = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(collection)
                .limit(page_size)
                .with_payload(true)
                .with_vectors(false);
            if let Some(filter) = filter.clone() {
                builder = builder.filter(filter);
            }
            if let Some(off) = offset.clone() {
                builder = builder.offset(off);
            }

            let response = self
                .client
                .scroll(builder)
                .await
                .context("failed to scroll points")?;

            if response.result.is_empty() {
                break;
            }
            for point in response.result {
                if let Some(id) = point_id_string(point.id.as_ref()) {
                    all.push(StoredPoint {
                        id,
                        payload: point.payload,
                    });
                }
            }

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(all)
    }

    pub async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.clone())).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(point_ids)
                    .wait(true),
            )
            .await
            .context("failed to delete points")?;
        Ok(())
    }

    pub async fn delete_by_filter(&self, collection: &str, filter: Filter) -> Result<()> {
        self.client
            .delete_points(DeletePointsBuilder::new(collection).points(filter).wait(true))
            .await
            .context("failed to delete by filter")?;
        Ok(())
    }

    pub async fn count(&self, collection: &str, filter: Option<Filter>) -> Result<u64> {
        let mut builder = CountPointsBuilder::new(collection).exact(true);
        if let Some(filter) = filter {
            builder = builder.filter(filter);
        }
        let response = self
            .client
            .count(builder)
            .await
            .context("failed to count points")?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    pub async fn health_check(&self) -> bool {
        match self
            .client
            .collection_exists(super::collections::MESSAGES)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("authoritative store health check failed: {e}");
                false
            }
        }
    }
}

/// Exact-match filter over payload fields.
pub fn eq_filter(pairs: &[(&str, &str)]) -> Filter {
    Filter::must(
        pairs
            .iter()
            .map(|(field, value)| Condition::matches(*field, value.to_string()))
            .collect::<Vec<_>>(),
    )
}

fn point_id_string(id: Option<&PointId>) -> Option<String> {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match id?.point_id_options.as_ref()? {
        PointIdOptions::Uuid(u) => Some(u.clone()),
        PointIdOptions::Num(n) => Some(n.to_string()),
    }
}
