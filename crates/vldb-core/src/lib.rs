use std::fmt;
use std::str::FromStr;

pub type Vector = Vec<f32>;

pub use serde_json::Value as JsonValue;

/// Free-form metadata attached to a record: a JSON object.
pub type Metadata = serde_json::Map<String, JsonValue>;

pub mod distance;
mod error;
pub mod validate;

pub use distance::{
    cosine_distance, cosine_similarity, distance, dot_distance, l2_distance, resolve_metric,
    DistanceFn,
};
pub use error::{ConfigError, ValidationError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    L2,
    #[default]
    Cosine,
    Dot,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::L2, Metric::Cosine, Metric::Dot];

    pub fn name(self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
        }
    }

    /// On-disk metric code stored in the file header.
    pub fn code(self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::Cosine => 1,
            Metric::Dot => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(Metric::L2),
            1 => Ok(Metric::Cosine),
            2 => Ok(Metric::Dot),
            other => Err(ConfigError::UnsupportedMetricCode(other)),
        }
    }

    pub fn distance_fn(self) -> DistanceFn {
        match self {
            Metric::L2 => l2_distance,
            Metric::Cosine => cosine_distance,
            Metric::Dot => dot_distance,
        }
    }

    /// Maps a raw distance to a user-facing score where higher is better.
    ///
    /// L2 and cosine use `1 / (1 + d)`; dot undoes the negation applied by
    /// [`dot_distance`] so the score is the plain inner product.
    pub fn similarity(self, distance: f64) -> f64 {
        match self {
            Metric::L2 | Metric::Cosine => 1.0 / (1.0 + distance),
            Metric::Dot => -distance,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l2" => Ok(Metric::L2),
            "cosine" => Ok(Metric::Cosine),
            "dot" => Ok(Metric::Dot),
            other => Err(ConfigError::UnsupportedMetric(other.to_string())),
        }
    }
}

/// One stored entry. Identifiers are unique within a database.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vector,
    pub metadata: Option<Metadata>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vector, metadata: Option<Metadata>) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
        }
    }
}

/// A scored candidate produced by an index scan. Lower distance is closer.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub distance: f64,
}

/// Anything that can accept or reject a record by its metadata.
///
/// Implemented for plain closures, so `|m: &Metadata| m.get("lang") == ...`
/// can be handed straight to a search.
pub trait MetadataPredicate: Send + Sync {
    fn matches(&self, metadata: &Metadata) -> bool;
}

impl<F> MetadataPredicate for F
where
    F: Fn(&Metadata) -> bool + Send + Sync,
{
    fn matches(&self, metadata: &Metadata) -> bool {
        self(metadata)
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, Default)]
pub struct MetadataFilter {
    /// Pairs a record's metadata must all contain with identical values.
    pub required: Vec<(String, JsonValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.required.push((key.into(), value.into()));
        self
    }
}

impl MetadataPredicate for MetadataFilter {
    fn matches(&self, metadata: &Metadata) -> bool {
        self.required
            .iter()
            .all(|(k, v)| metadata.get(k).is_some_and(|val| val == v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: JsonValue) -> Metadata {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn metric_names_and_codes_round_trip() {
        for metric in Metric::ALL {
            assert_eq!(metric.name().parse::<Metric>().unwrap(), metric);
            assert_eq!(Metric::from_code(metric.code()).unwrap(), metric);
        }
        assert_eq!(Metric::default(), Metric::Cosine);
    }

    #[test]
    fn unknown_metric_is_a_config_error() {
        assert!(matches!(
            "manhattan".parse::<Metric>(),
            Err(ConfigError::UnsupportedMetric(name)) if name == "manhattan"
        ));
        assert!(matches!(
            Metric::from_code(7),
            Err(ConfigError::UnsupportedMetricCode(7))
        ));
    }

    #[test]
    fn metric_serde_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&Metric::Dot).unwrap(), "\"dot\"");
        let m: Metric = serde_json::from_str("\"l2\"").unwrap();
        assert_eq!(m, Metric::L2);
    }

    #[test]
    fn similarity_conversion() {
        assert_eq!(Metric::Cosine.similarity(0.0), 1.0);
        assert_eq!(Metric::Cosine.similarity(1.0), 0.5);
        assert_eq!(Metric::L2.similarity(f64::INFINITY), 0.0);
        assert_eq!(Metric::Dot.similarity(-3.0), 3.0);
    }

    #[test]
    fn filter_requires_every_pair() {
        let filter = MetadataFilter::new().eq("category", "A").eq("rank", 2);
        assert!(filter.matches(&meta(json!({ "category": "A", "rank": 2, "x": true }))));
        assert!(!filter.matches(&meta(json!({ "category": "A", "rank": 3 }))));
        assert!(!filter.matches(&meta(json!({ "category": "A" }))));
        assert!(MetadataFilter::new().matches(&Metadata::new()));
    }

    #[test]
    fn closures_are_predicates() {
        let pred = |m: &Metadata| m.get("lang").and_then(|v| v.as_str()) == Some("rust");
        assert!(pred.matches(&meta(json!({ "lang": "rust" }))));
        assert!(!pred.matches(&meta(json!({ "lang": "go" }))));
    }
}
