//! Catalog metadata types
//!
//! This module defines the records kept in the model catalog: technical
//! metadata, documentation and the filter used to query them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::error::Error;

/// Renders the catalog key of a model version
pub fn catalog_key(name: &str, version: &str) -> String {
    format!("{}:{}", name, version)
}

/// Training framework of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    PyTorch,
    TensorFlow,
    Onnx,
    TensorRt,
}

impl Framework {
    pub const ALL: [Framework; 4] = [
        Framework::PyTorch,
        Framework::TensorFlow,
        Framework::Onnx,
        Framework::TensorRt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::PyTorch => "pytorch",
            Framework::TensorFlow => "tensorflow",
            Framework::Onnx => "onnx",
            Framework::TensorRt => "tensorrt",
        }
    }
}

/// Problem a model solves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Classification,
    Detection,
    Segmentation,
    Nlp,
    Speech,
    Vision,
    Multimodal,
    Other,
}

impl Task {
    pub const ALL: [Task; 8] = [
        Task::Classification,
        Task::Detection,
        Task::Segmentation,
        Task::Nlp,
        Task::Speech,
        Task::Vision,
        Task::Multimodal,
        Task::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Classification => "classification",
            Task::Detection => "detection",
            Task::Segmentation => "segmentation",
            Task::Nlp => "nlp",
            Task::Speech => "speech",
            Task::Vision => "vision",
            Task::Multimodal => "multimodal",
            Task::Other => "other",
        }
    }
}

/// Numeric precision of the stored weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp32,
    Fp16,
    Int8,
    Fp8,
}

impl Precision {
    pub const ALL: [Precision; 4] = [
        Precision::Fp32,
        Precision::Fp16,
        Precision::Int8,
        Precision::Fp8,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Fp32 => "fp32",
            Precision::Fp16 => "fp16",
            Precision::Int8 => "int8",
            Precision::Fp8 => "fp8",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == lowered)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown framework: {}", s)))
    }
}

impl FromStr for Task {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == lowered)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown task: {}", s)))
    }
}

impl FromStr for Precision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == lowered)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown precision: {}", s)))
    }
}

/// A set of lower-cased, deduplicated tags
///
/// Every way of building a `TagSet`, deserialization included, normalizes
/// its input, so two sets compare equal whatever casing they were built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag, returning whether it was new
    pub fn insert(&mut self, tag: &str) -> bool {
        self.0.insert(tag.to_lowercase())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(&tag.to_lowercase())
    }

    /// Whether every tag of `other` is also in this set
    pub fn is_superset(&self, other: &TagSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tags joined by a single space
    pub fn joined(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|t| t.as_ref().to_lowercase()).collect())
    }
}

impl From<Vec<String>> for TagSet {
    fn from(tags: Vec<String>) -> Self {
        tags.into_iter().collect()
    }
}

impl From<TagSet> for Vec<String> {
    fn from(tags: TagSet) -> Self {
        tags.0.into_iter().collect()
    }
}

/// Serving hints for a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingHints {
    /// Serving platform
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Largest batch the server should form
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,
}

fn default_platform() -> String {
    "pytorch".to_string()
}

fn default_max_batch_size() -> u32 {
    1
}

impl Default for ServingHints {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

/// Technical metadata of one model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model name
    pub name: String,

    /// Model version
    pub version: String,

    /// Training framework
    pub framework: Framework,

    /// Task type
    pub task: Task,

    /// Weight precision
    pub precision: Precision,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Tags
    #[serde(default)]
    pub tags: TagSet,

    /// Input tensor specs by name
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,

    /// Output tensor specs by name
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,

    /// Benchmark results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<BTreeMap<String, f64>>,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub license: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper: Option<String>,

    /// Minimum GPU memory needed to serve the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_gpu_memory_mb: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_batch_size: Option<u32>,

    /// Serving hints
    #[serde(default)]
    pub serving: ServingHints,
}

impl ModelMetadata {
    /// Creates metadata with the required fields and defaults elsewhere
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        framework: Framework,
        task: Task,
        precision: Precision,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            framework,
            task,
            precision,
            description: String::new(),
            tags: TagSet::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            performance_metrics: None,
            author: String::new(),
            license: String::new(),
            homepage: None,
            paper: None,
            min_gpu_memory_mb: None,
            recommended_batch_size: None,
            serving: ServingHints::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = license.into();
        self
    }

    /// Catalog key of this model version
    pub fn key(&self) -> String {
        catalog_key(&self.name, &self.version)
    }
}

/// A worked usage example
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelExample {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,

    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

/// Human-facing documentation of a model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDocumentation {
    pub overview: String,
    pub architecture: String,
    pub performance: String,
    pub limitations: String,

    /// Usage examples, in presentation order
    pub examples: Vec<ModelExample>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocessing: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub postprocessing: Option<String>,

    /// Citations and links, in presentation order
    pub references: Vec<String>,
}

/// A catalog record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Technical metadata
    pub metadata: ModelMetadata,

    /// Documentation
    #[serde(default)]
    pub documentation: ModelDocumentation,

    /// Deployment settings handed to the deployment system as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_config: Option<Value>,

    /// Serving settings handed to the inference server as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_config: Option<Value>,

    /// Set once when the entry is added
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Refreshed by every mutation
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn new(metadata: ModelMetadata) -> Self {
        let now = Utc::now();
        Self {
            metadata,
            documentation: ModelDocumentation::default(),
            deployment_config: None,
            serving_config: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_documentation(mut self, documentation: ModelDocumentation) -> Self {
        self.documentation = documentation;
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn key(&self) -> String {
        self.metadata.key()
    }

    /// Case-insensitive substring match on name, description and tags
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.metadata.name.to_lowercase().contains(&query)
            || self.metadata.description.to_lowercase().contains(&query)
            || self.metadata.tags.joined().contains(&query)
    }
}

/// Conjunctive filter over catalog entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    pub framework: Option<Framework>,
    pub task: Option<Task>,
    pub precision: Option<Precision>,

    /// Entries must carry all of these tags
    pub tags: Option<TagSet>,
}

impl CatalogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn framework(mut self, framework: Framework) -> Self {
        self.framework = Some(framework);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = Some(tags.into_iter().collect());
        self
    }

    /// Whether an entry passes every set criterion
    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        let metadata = &entry.metadata;

        if self.framework.map_or(false, |f| f != metadata.framework) {
            return false;
        }
        if self.task.map_or(false, |t| t != metadata.task) {
            return false;
        }
        if self.precision.map_or(false, |p| p != metadata.precision) {
            return false;
        }
        if let Some(tags) = &self.tags {
            if !metadata.tags.is_superset(tags) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bert() -> ModelMetadata {
        ModelMetadata::new("bert", "1.0.0", Framework::PyTorch, Task::Nlp, Precision::Fp16)
            .with_description("Bidirectional encoder")
            .with_tags(["NLP", "Transformer", "nlp"])
    }

    #[test]
    fn test_tags_are_normalized() {
        let metadata = bert();
        assert_eq!(metadata.tags.len(), 2);
        assert!(metadata.tags.contains("transformer"));
        assert!(metadata.tags.contains("NLP"));
        assert_eq!(metadata.tags.joined(), "nlp transformer");
    }

    #[test]
    fn test_tags_normalized_on_deserialize() {
        let tags: TagSet = serde_json::from_str(r#"["Vision", "vision", "CNN"]"#).unwrap();
        assert_eq!(serde_json::to_string(&tags).unwrap(), r#"["cnn","vision"]"#);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_string(&Framework::TensorRt).unwrap(), r#""tensorrt""#);
        assert_eq!(serde_json::to_string(&Precision::Fp8).unwrap(), r#""fp8""#);
        assert_eq!("PyTorch".parse::<Framework>().unwrap(), Framework::PyTorch);
        assert_eq!("multimodal".parse::<Task>().unwrap(), Task::Multimodal);
        assert!("bf16".parse::<Precision>().is_err());
    }

    #[test]
    fn test_entry_defaults_from_minimal_json() {
        let json = r#"{
            "metadata": {
                "name": "resnet",
                "version": "2",
                "framework": "onnx",
                "task": "classification",
                "precision": "int8"
            }
        }"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();

        assert_eq!(entry.key(), "resnet:2");
        assert_eq!(entry.metadata.serving, ServingHints::default());
        assert_eq!(entry.metadata.serving.platform, "pytorch");
        assert!(entry.metadata.tags.is_empty());
        assert!(entry.documentation.examples.is_empty());
    }

    #[test]
    fn test_matches_query() {
        let entry = CatalogEntry::new(bert());
        assert!(entry.matches_query("BER"));
        assert!(entry.matches_query("encoder"));
        assert!(entry.matches_query("transf"));
        assert!(entry.matches_query(""));
        assert!(!entry.matches_query("resnet"));
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let entry = CatalogEntry::new(bert());

        assert!(CatalogFilter::new().matches(&entry));
        assert!(CatalogFilter::new().framework(Framework::PyTorch).task(Task::Nlp).matches(&entry));
        assert!(!CatalogFilter::new().framework(Framework::PyTorch).task(Task::Vision).matches(&entry));
        assert!(CatalogFilter::new().tags(["Transformer"]).matches(&entry));
        assert!(!CatalogFilter::new().tags(["transformer", "vision"]).matches(&entry));
        assert!(!CatalogFilter::new().precision(Precision::Fp32).matches(&entry));
    }
}
