//! Construct paths and CloudFormation logical ids.
//!
//! Every resource a stack declares is addressed by a path such as
//! `Pipeline/MySource/Pipeline_Source/WebhookResource`. The path is turned
//! into a logical id that stays stable across synthesis runs, so a resource
//! keeps its identity in the deployed stack as long as its path does not
//! change. The tree of paths is owned by the stack being built; there is no
//! process-wide registry.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Segments that are dropped from the human readable part of an id.
const HIDDEN_SEGMENTS: &[&str] = &["Resource", "Default"];

const HASH_LEN: usize = 8;
const MAX_HUMAN_LEN: usize = 255 - HASH_LEN;

/// Compute the logical id for a construct path.
///
/// A single-segment path maps to the sanitised segment itself. Longer paths
/// get the readable segments concatenated plus an 8-character md5 suffix of
/// the full path.
pub fn logical_id(path: &[&str]) -> String {
    let segments: Vec<&str> = path.iter().copied().filter(|s| !s.is_empty()).collect();

    if segments.len() == 1 {
        return sanitize(segments[0]);
    }

    let digest = md5::compute(segments.join("/"));
    let hash = format!("{digest:X}");

    let mut readable: Vec<&str> = Vec::new();
    for segment in &segments {
        if HIDDEN_SEGMENTS.contains(segment) {
            continue;
        }
        if readable.last() == Some(segment) {
            continue;
        }
        readable.push(segment);
    }

    let mut human: String = readable.iter().map(|s| sanitize(s)).collect();
    human.truncate(MAX_HUMAN_LEN);
    format!("{human}{}", &hash[..HASH_LEN])
}

fn sanitize(segment: &str) -> String {
    segment.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// A node registered in the construct tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructNode {
    pub path: String,
    pub logical_id: String,
    /// CloudFormation type, or the section (`Parameter`, `Output`) for
    /// non-resource entries.
    pub kind: String,
}

/// The explicit construct tree of a single stack.
#[derive(Debug, Clone, Default)]
pub struct ConstructTree {
    root: String,
    nodes: BTreeMap<String, ConstructNode>,
}

impl ConstructTree {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            nodes: BTreeMap::new(),
        }
    }

    /// Register a path and return its logical id.
    pub fn register(&mut self, path: &[&str], kind: impl Into<String>) -> Result<String> {
        if path.is_empty() || path.iter().any(|s| s.is_empty() || s.contains('/')) {
            return Err(Error::InvalidInput(format!(
                "invalid construct path: {path:?}"
            )));
        }

        let key = path.join("/");
        if self.nodes.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "construct '{}/{key}' already exists",
                self.root
            )));
        }

        let id = logical_id(path);
        if let Some(existing) = self.nodes.values().find(|n| n.logical_id == id) {
            return Err(Error::Conflict(format!(
                "logical id '{id}' of '{key}' clashes with '{}'",
                existing.path
            )));
        }

        self.nodes.insert(
            key.clone(),
            ConstructNode {
                path: key,
                logical_id: id.clone(),
                kind: kind.into(),
            },
        );
        Ok(id)
    }

    pub fn get(&self, path: &str) -> Option<&ConstructNode> {
        self.nodes.get(path)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ConstructNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nested JSON view of the tree, written next to the template.
    pub fn to_json(&self) -> Value {
        let mut root = TreeJson::default();
        for node in self.nodes.values() {
            let mut cursor = &mut root;
            for segment in node.path.split('/') {
                cursor = cursor.children.entry(segment.to_string()).or_default();
            }
            cursor.node = Some(node);
        }
        json!({ "id": self.root, "children": root.children_json() })
    }
}

#[derive(Default)]
struct TreeJson<'a> {
    node: Option<&'a ConstructNode>,
    children: BTreeMap<String, TreeJson<'a>>,
}

impl TreeJson<'_> {
    fn children_json(&self) -> Map<String, Value> {
        self.children
            .iter()
            .map(|(name, child)| (name.clone(), child.to_json()))
            .collect()
    }

    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if let Some(node) = self.node {
            obj.insert("logicalId".to_string(), json!(node.logical_id));
            obj.insert("kind".to_string(), json!(node.kind));
        }
        if !self.children.is_empty() {
            obj.insert("children".to_string(), Value::Object(self.children_json()));
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_segment_has_no_hash() {
        assert_eq!(logical_id(&["ApiEndpointOutput"]), "ApiEndpointOutput");
        assert_eq!(logical_id(&["Pipeline_Source"]), "PipelineSource");
    }

    #[test]
    fn test_hidden_and_duplicate_segments() {
        let id = logical_id(&["Budget", "Budget"]);
        assert!(id.starts_with("Budget"));
        assert_eq!(id.len(), "Budget".len() + HASH_LEN);

        let id = logical_id(&["Pipeline", "Role", "Resource"]);
        assert!(id.starts_with("PipelineRole"));
        assert_eq!(id.len(), "PipelineRole".len() + HASH_LEN);
    }

    #[test]
    fn test_logical_id_is_deterministic_and_path_sensitive() {
        let a = logical_id(&["Pipeline", "Prod", "Role"]);
        let b = logical_id(&["Pipeline", "Prod", "Role"]);
        let c = logical_id(&["Pipeline", "Beta", "Role"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let hash = &a[a.len() - HASH_LEN..];
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut tree = ConstructTree::new("Stack");
        tree.register(&["Topic"], "AWS::SNS::Topic").unwrap();
        let err = tree.register(&["Topic"], "AWS::SNS::Topic").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_register_rejects_invalid_paths() {
        let mut tree = ConstructTree::new("Stack");
        assert!(tree.register(&[], "x").is_err());
        assert!(tree.register(&["a/b"], "x").is_err());
        assert!(tree.register(&["a", ""], "x").is_err());
    }

    #[test]
    fn test_tree_json_is_nested() {
        let mut tree = ConstructTree::new("Stack");
        let id = tree
            .register(&["Pipeline", "Role"], "AWS::IAM::Role")
            .unwrap();
        tree.register(&["Pipeline", "Resource"], "AWS::CodePipeline::Pipeline")
            .unwrap();

        let json = tree.to_json();
        assert_eq!(json["id"], "Stack");
        let pipeline = &json["children"]["Pipeline"]["children"];
        assert_eq!(pipeline["Role"]["logicalId"], id.as_str());
        assert_eq!(pipeline["Resource"]["kind"], "AWS::CodePipeline::Pipeline");
    }

    #[test]
    fn test_get_registered_node() {
        let mut tree = ConstructTree::new("Stack");
        let id = tree
            .register(&["Pipeline", "Role", "Resource"], "AWS::IAM::Role")
            .unwrap();

        let node = tree.get("Pipeline/Role/Resource").unwrap();
        assert_eq!(node.logical_id, id);
        assert_eq!(node.kind, "AWS::IAM::Role");
        assert!(tree.get("Pipeline/Role").is_none());
    }
}
