use vldb_core::validate::validate_top_k;
use vldb_core::{
    ConfigError, DistanceFn, MetadataPredicate, Metric, SearchHit, ValidationError, VectorRecord,
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Exact search: every query scores every record.
#[derive(Clone, Copy)]
pub struct FlatIndex {
    metric: Metric,
    distance_fn: DistanceFn,
}

impl std::fmt::Debug for FlatIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatIndex")
            .field("metric", &self.metric)
            .finish()
    }
}

impl FlatIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            distance_fn: metric.distance_fn(),
        }
    }

    pub fn from_name(metric: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(metric.parse()?))
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    fn score(
        &self,
        query: &[f32],
        record: &VectorRecord,
        predicate: Option<&dyn MetadataPredicate>,
    ) -> Option<Result<SearchHit, ValidationError>> {
        if let Some(p) = predicate {
            match &record.metadata {
                Some(meta) if p.matches(meta) => {}
                _ => return None,
            }
        }
        Some((self.distance_fn)(query, &record.vector).map(|distance| SearchHit {
            id: record.id.clone(),
            distance,
        }))
    }

    /// Returns up to `top_k` hits in ascending distance order.
    ///
    /// With a predicate, records without metadata are skipped. Equal
    /// distances keep the order of `records`.
    pub fn search(
        &self,
        query: &[f32],
        records: &[VectorRecord],
        top_k: usize,
        predicate: Option<&dyn MetadataPredicate>,
    ) -> Result<Vec<SearchHit>, ValidationError> {
        let k = validate_top_k(top_k, records.len())?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        #[cfg(feature = "parallel")]
        let scored: Result<Vec<SearchHit>, ValidationError> = records
            .par_iter()
            .filter_map(|r| self.score(query, r, predicate))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let scored: Result<Vec<SearchHit>, ValidationError> = records
            .iter()
            .filter_map(|r| self.score(query, r, predicate))
            .collect();
        let mut scored = scored?;

        let kept = scored.len();
        // stable: ties stay in scan order
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);

        log::debug!(
            target: "vldb::index",
            "flat_search metric={} scanned={} kept={} returned={}",
            self.metric,
            records.len(),
            kept,
            scored.len()
        );
        Ok(scored)
    }
}
