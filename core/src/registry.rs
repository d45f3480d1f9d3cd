//! Kind registry: rebuilds polymorphic payloads from the persisted tree.
//!
//! The registry is an explicit value assembled from a list of types. Intents and nodes
//! share one Kind namespace; registering a Kind twice fails at build time.

use crate::document::{FlowDocument, NodeDocument, TaggedDocument};
use crate::error::FlowError;
use crate::flow::{Flow, Node};
use crate::intent::{Intent, Kind, NodeSimple};
use ahash::AHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

type IntentDecoder = fn(Value) -> Result<Box<dyn Intent>, serde_json::Error>;
type NodeDecoder = fn(Value) -> Result<Box<dyn NodeSimple>, serde_json::Error>;

#[derive(Clone, Copy)]
enum Entry {
    Intent(IntentDecoder),
    Node(NodeDecoder),
}

fn decode_intent<T: Intent + DeserializeOwned>(data: Value) -> Result<Box<dyn Intent>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<T>(data)?))
}

fn decode_node<T: NodeSimple + DeserializeOwned>(
    data: Value,
) -> Result<Box<dyn NodeSimple>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<T>(data)?))
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(&'static str, Entry)>,
}

impl RegistryBuilder {
    pub fn intent<T: Intent + Kind + DeserializeOwned>(mut self) -> Self {
        self.entries.push((T::KIND, Entry::Intent(decode_intent::<T>)));
        self
    }

    pub fn node<T: NodeSimple + Kind + DeserializeOwned>(mut self) -> Self {
        self.entries.push((T::KIND, Entry::Node(decode_node::<T>)));
        self
    }

    pub fn build(self) -> Result<Registry, FlowError> {
        let mut entries = AHashMap::with_capacity(self.entries.len());
        for (kind, entry) in self.entries {
            if entries.insert(kind, entry).is_some() {
                return Err(FlowError::DuplicateKind(kind));
            }
        }
        Ok(Registry { entries })
    }
}

pub struct Registry {
    entries: AHashMap<&'static str, Entry>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// All registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.entries.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn is_intent(&self, kind: &str) -> bool {
        matches!(self.entries.get(kind), Some(Entry::Intent(_)))
    }

    pub fn decode_intent(&self, doc: &TaggedDocument) -> Result<Box<dyn Intent>, FlowError> {
        match self.entries.get(doc.kind.as_str()) {
            Some(Entry::Intent(decode)) => Ok(decode(doc.data.clone())?),
            _ => Err(FlowError::UnknownKind(doc.kind.clone())),
        }
    }

    pub fn decode_node(&self, doc: &TaggedDocument) -> Result<Box<dyn NodeSimple>, FlowError> {
        match self.entries.get(doc.kind.as_str()) {
            Some(Entry::Node(decode)) => Ok(decode(doc.data.clone())?),
            _ => Err(FlowError::UnknownKind(doc.kind.clone())),
        }
    }

    pub fn decode_flow(&self, doc: &FlowDocument) -> Result<Flow, FlowError> {
        let intent = self.decode_intent(&doc.intent)?;
        let nodes = doc
            .nodes
            .iter()
            .map(|node| match node {
                NodeDocument::Simple { simple } => Ok(Node::Simple(self.decode_node(simple)?)),
                NodeDocument::SubFlow { flow } => Ok(Node::SubFlow(self.decode_flow(flow)?)),
            })
            .collect::<Result<Vec<_>, FlowError>>()?;
        Ok(Flow { intent, nodes })
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::fixtures::*;
    use crate::flow::outline;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::builder()
            .intent::<IntentRoot>()
            .intent::<IntentChild>()
            .node::<NodeUser>()
            .build()
            .unwrap()
    }

    #[test]
    fn test_document_round_trip_preserves_tree() {
        let tree = nested_tree("u2");
        let doc = tree.to_document().unwrap();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["nodes"][0]["type"], "SIMPLE");
        assert_eq!(json["nodes"][1]["type"], "SUB_FLOW");
        assert_eq!(json["nodes"][1]["flow"]["intent"]["kind"], "IntentChild");

        let decoded = registry().decode_flow(&doc).unwrap();
        assert_eq!(outline(&decoded), outline(&tree));
        assert_eq!(decoded.to_document().unwrap(), doc);
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let err = Registry::builder()
            .intent::<IntentRoot>()
            .node::<NodeUser>()
            .intent::<IntentRoot>()
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateKind("IntentRoot")));
    }

    #[test]
    fn test_unknown_and_misplaced_kind() {
        let registry = registry();
        let unknown = TaggedDocument {
            kind: "IntentMissing".into(),
            data: json!({}),
        };
        assert!(matches!(
            registry.decode_intent(&unknown),
            Err(FlowError::UnknownKind(kind)) if kind == "IntentMissing"
        ));

        let node_as_intent = TaggedDocument {
            kind: "NodeUser".into(),
            data: json!({"user_id": "u1"}),
        };
        assert!(registry.decode_intent(&node_as_intent).is_err());
        assert!(registry.decode_node(&node_as_intent).is_ok());
        assert_eq!(registry.kinds(), vec!["IntentChild", "IntentRoot", "NodeUser"]);
    }
}
