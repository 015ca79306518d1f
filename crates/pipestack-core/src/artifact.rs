//! Pipeline artifacts.
//!
//! An artifact is a named handle to output one pipeline action produces and
//! later actions consume. Artifacts are write-once: each is produced by
//! exactly one action, and must be produced before anything reads it.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::intrinsic::get_artifact_att;
use crate::{Error, Result};

/// Name of a pipeline artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct Artifact(String);

impl Artifact {
    /// CodePipeline allows `[A-Za-z0-9_-]{1,100}`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 100
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::InvalidInput(format!("invalid artifact name '{name}'")));
        }
        Ok(Self(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// A file inside this artifact.
    pub fn at_path(&self, file_name: impl Into<String>) -> Result<ArtifactPath> {
        ArtifactPath::new(self.clone(), file_name)
    }

    /// Storage coordinates, resolved by the pipeline when the action runs.
    pub fn s3_location(&self) -> S3Location {
        S3Location {
            bucket_name: get_artifact_att(&self.0, "BucketName"),
            object_key: get_artifact_att(&self.0, "ObjectKey"),
        }
    }
}

/// `Artifact::file` reference used by deploy actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[display("{artifact}::{file_name}")]
pub struct ArtifactPath {
    pub artifact: Artifact,
    pub file_name: String,
}

impl ArtifactPath {
    /// Braces in a file name mean a name template was never interpolated
    /// (e.g. `{stack.stackName}.template.json`); such paths are rejected.
    pub fn new(artifact: Artifact, file_name: impl Into<String>) -> Result<Self> {
        let file_name = file_name.into();
        if file_name.is_empty() {
            return Err(Error::InvalidInput(format!(
                "empty file name in artifact '{artifact}'"
            )));
        }
        if file_name.contains('{') || file_name.contains('}') || file_name.contains('$') {
            return Err(Error::InvalidInput(format!(
                "file name '{file_name}' contains an uninterpolated placeholder"
            )));
        }
        Ok(Self {
            artifact,
            file_name,
        })
    }
}

/// Bucket and key of an artifact, as deploy-time values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Location {
    pub bucket_name: Value,
    pub object_key: Value,
}

/// Position of the action that writes an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub stage_index: usize,
    pub run_order: u32,
    /// `Stage/Action` label, for error messages.
    pub action: String,
}

impl Producer {
    /// Whether this producer finishes before an action at the given position
    /// starts.
    pub fn runs_before(&self, stage_index: usize, run_order: u32) -> bool {
        self.stage_index < stage_index
            || (self.stage_index == stage_index && self.run_order < run_order)
    }
}

/// Tracks which action produced each artifact of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    producers: BTreeMap<Artifact, Producer>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the single writer of `artifact`.
    pub fn produce(&mut self, artifact: &Artifact, producer: Producer) -> Result<()> {
        if let Some(existing) = self.producers.get(artifact) {
            return Err(Error::Conflict(format!(
                "artifact '{artifact}' is already produced by '{}'",
                existing.action
            )));
        }
        self.producers.insert(artifact.clone(), producer);
        Ok(())
    }

    /// Fail unless some action produces `artifact`.
    pub fn require(&self, artifact: &Artifact) -> Result<&Producer> {
        self.producers.get(artifact).ok_or_else(|| {
            Error::InvalidReference(format!(
                "artifact '{artifact}' is consumed before any stage produces it"
            ))
        })
    }

    /// Fail unless `artifact` is produced before an action at
    /// (`stage_index`, `run_order`) starts.
    pub fn require_before(
        &self,
        artifact: &Artifact,
        stage_index: usize,
        run_order: u32,
    ) -> Result<()> {
        let producer = self.require(artifact)?;
        if producer.runs_before(stage_index, run_order) {
            Ok(())
        } else {
            Err(Error::InvalidReference(format!(
                "artifact '{artifact}' is produced by '{}', which does not run before its consumer",
                producer.action
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifact_name_validation() {
        assert!(Artifact::new("CdkBuildOutput").is_ok());
        assert!(Artifact::new("lambda-build_output").is_ok());
        assert!(Artifact::new("").is_err());
        assert!(Artifact::new("has space").is_err());
        assert!(Artifact::new("x".repeat(101)).is_err());
    }

    #[test]
    fn test_artifact_path_display() {
        let artifact = Artifact::new("CdkBuildOutput").unwrap();
        let path = artifact.at_path("LambdaStackProd.template.json").unwrap();
        assert_eq!(path.to_string(), "CdkBuildOutput::LambdaStackProd.template.json");
    }

    #[test]
    fn test_uninterpolated_file_name_is_rejected() {
        let artifact = Artifact::new("CdkBuildOutput").unwrap();
        assert!(
            artifact
                .at_path("{bilingStack.stackName}.template.json")
                .is_err()
        );
        assert!(artifact.at_path("${stack}.template.json").is_err());
        assert!(artifact.at_path("").is_err());
    }

    #[test]
    fn test_s3_location() {
        let location = Artifact::new("LambdaBuildOutput").unwrap().s3_location();
        assert_eq!(
            location.bucket_name,
            json!({"Fn::GetArtifactAtt": ["LambdaBuildOutput", "BucketName"]})
        );
        assert_eq!(
            location.object_key,
            json!({"Fn::GetArtifactAtt": ["LambdaBuildOutput", "ObjectKey"]})
        );
    }

    fn producer(stage_index: usize, run_order: u32, action: &str) -> Producer {
        Producer {
            stage_index,
            run_order,
            action: action.to_string(),
        }
    }

    #[test]
    fn test_registry_write_once() {
        let artifact = Artifact::new("CdkSourceOutput").unwrap();
        let mut registry = ArtifactRegistry::new();

        assert!(matches!(
            registry.require(&artifact),
            Err(Error::InvalidReference(_))
        ));

        registry
            .produce(&artifact, producer(0, 1, "MySource/Pipeline_Source"))
            .unwrap();
        assert_eq!(
            registry.require(&artifact).unwrap().action,
            "MySource/Pipeline_Source"
        );

        let err = registry
            .produce(&artifact, producer(1, 1, "MyBuild/CDK_Build"))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_require_before_respects_stage_and_run_order() {
        let artifact = Artifact::new("LambdaBuildOutput").unwrap();
        let mut registry = ArtifactRegistry::new();
        registry
            .produce(&artifact, producer(1, 1, "MyBuild/Service_Build"))
            .unwrap();

        assert!(registry.require_before(&artifact, 2, 1).is_ok());
        assert!(registry.require_before(&artifact, 1, 2).is_ok());
        assert!(registry.require_before(&artifact, 1, 1).is_err());
        assert!(registry.require_before(&artifact, 0, 5).is_err());
    }
}
