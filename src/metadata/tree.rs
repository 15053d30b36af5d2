/*!
The arena-backed metadata tree and its mutation operations.
*/

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{OaiError, Result};
use crate::metadata::path::FieldPath;

/// Tag of interior nodes in the harvested store schema.
const ELEMENT_TAG: &str = "element";
/// Tag of leaf nodes in the harvested store schema.
const FIELD_TAG: &str = "field";
/// Attribute carrying the semantic name of a node.
const NAME_ATTR: &str = "name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Handle to one node of a [RecordMetadata] tree, as returned by
/// [RecordMetadata::field_nodes]. Handles stay stable across mutation;
/// a removed node's handle simply dereferences to nothing.
pub struct NodeRef(usize);

#[derive(Debug, Clone)]
struct Node {
    name: String,
    /// `Some` for leaf fields, `None` for interior elements.
    value: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
    removed: bool,
}

impl Node {
    fn element(name: String, parent: Option<usize>) -> Self {
        Node {
            name,
            value: None,
            parent,
            children: Vec::new(),
            removed: false,
        }
    }

    fn field(name: String, value: String, parent: usize) -> Self {
        Node {
            name,
            value: Some(value),
            parent: Some(parent),
            children: Vec::new(),
            removed: false,
        }
    }

    fn is_field(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone)]
/// In-memory tree of one record's structured metadata.
///
/// Reads on absent paths yield empty sequences and mutations on absent
/// paths are silent no-ops; only construction can fail.
pub struct RecordMetadata {
    identifier: String,
    datestamp: Option<DateTime<Utc>>,
    origin: Option<String>,
    set_spec: Option<String>,
    store_schema: Option<String>,
    root_tag: String,
    nodes: Vec<Node>,
}

impl RecordMetadata {
    /// Parse a harvested store document from its UTF-8 XML text.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();
        let mut root_tag = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let index = Self::open_node(&mut nodes, &stack, &start, &mut root_tag)?;
                    stack.push(index);
                }
                Ok(Event::Empty(start)) => {
                    Self::open_node(&mut nodes, &stack, &start, &mut root_tag)?;
                }
                Ok(Event::Text(text)) => {
                    let decoded = text
                        .unescape()
                        .map_err(|err| OaiError::MetadataParse(err.to_string()))?;
                    if let Some(&current) = stack.last() {
                        if let Some(value) = nodes[current].value.as_mut() {
                            value.push_str(&decoded);
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(OaiError::MetadataParse(err.to_string())),
            }
        }

        if nodes.is_empty() {
            return Err(OaiError::MetadataParse(
                "document has no root element".to_owned(),
            ));
        }
        Ok(RecordMetadata {
            identifier: String::new(),
            datestamp: None,
            origin: None,
            set_spec: None,
            store_schema: None,
            root_tag: root_tag.unwrap_or_else(|| "metadata".to_owned()),
            nodes,
        })
    }

    fn open_node(
        nodes: &mut Vec<Node>,
        stack: &[usize],
        start: &BytesStart,
        root_tag: &mut Option<String>,
    ) -> Result<usize> {
        let tag = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let name = start
            .try_get_attribute(NAME_ATTR)
            .map_err(|err| OaiError::MetadataParse(err.to_string()))?
            .map(|attr| {
                attr.unescape_value()
                    .map(|value| value.into_owned())
                    .map_err(|err| OaiError::MetadataParse(err.to_string()))
            })
            .transpose()?;

        let index = nodes.len();
        match stack.last() {
            None => {
                if root_tag.is_some() {
                    return Err(OaiError::MetadataParse(
                        "document has more than one root element".to_owned(),
                    ));
                }
                *root_tag = Some(tag.clone());
                nodes.push(Node::element(name.unwrap_or(tag), None));
            }
            Some(&parent) => {
                let name = name.unwrap_or_else(|| tag.clone());
                if tag == FIELD_TAG {
                    nodes.push(Node::field(name, String::new(), parent));
                } else {
                    nodes.push(Node::element(name, Some(parent)));
                }
                nodes[parent].children.push(index);
            }
        }
        Ok(index)
    }

    /// Serialize the tree back to XML text.
    pub fn serialize(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Start(BytesStart::new(self.root_tag.as_str())))
            .map_err(|err| OaiError::MetadataParse(err.to_string()))?;
        for &child in &self.nodes[0].children {
            self.write_node(&mut writer, child)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.root_tag.as_str())))
            .map_err(|err| OaiError::MetadataParse(err.to_string()))?;
        String::from_utf8(writer.into_inner())
            .map_err(|err| OaiError::MetadataParse(err.to_string()))
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, index: usize) -> Result<()> {
        let node = &self.nodes[index];
        if node.removed {
            return Ok(());
        }
        let tag = if node.is_field() {
            FIELD_TAG
        } else {
            ELEMENT_TAG
        };
        let mut start = BytesStart::new(tag);
        start.push_attribute((NAME_ATTR, node.name.as_str()));
        writer
            .write_event(Event::Start(start))
            .map_err(|err| OaiError::MetadataParse(err.to_string()))?;
        if let Some(value) = &node.value {
            writer
                .write_event(Event::Text(BytesText::new(value)))
                .map_err(|err| OaiError::MetadataParse(err.to_string()))?;
        }
        for &child in &node.children {
            self.write_node(writer, child)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(|err| OaiError::MetadataParse(err.to_string()))?;
        Ok(())
    }

    /// Elements matched by the path's segments, in document order.
    fn matching_elements(&self, path: &FieldPath) -> Vec<usize> {
        let mut frontier = vec![0usize];
        for segment in path.segments() {
            let mut next = Vec::new();
            for index in frontier {
                for &child in &self.nodes[index].children {
                    let node = &self.nodes[child];
                    if !node.removed && !node.is_field() && segment.matches(&node.name) {
                        next.push(child);
                    }
                }
            }
            frontier = next;
        }
        frontier
    }

    fn matching_fields(&self, path: &FieldPath) -> Vec<usize> {
        let mut fields = Vec::new();
        for element in self.matching_elements(path) {
            for &child in &self.nodes[element].children {
                let node = &self.nodes[child];
                if !node.removed && node.is_field() && node.name == path.leaf() {
                    fields.push(child);
                }
            }
        }
        fields
    }

    /// Values of the leaf fields addressed by the path, in document order.
    /// Empty when the path does not exist or selects elements (`$`).
    pub fn field_occurrences(&self, path: &FieldPath) -> Vec<String> {
        if path.element_only() {
            return Vec::new();
        }
        self.matching_fields(path)
            .into_iter()
            .filter_map(|index| self.nodes[index].value.clone())
            .collect()
    }

    /// Number of occurrences of the path.
    pub fn field_occurrence_count(&self, path: &FieldPath) -> usize {
        if path.element_only() {
            self.matching_elements(path).len()
        } else {
            self.matching_fields(path).len()
        }
    }

    /// Handles to the nodes addressed by the path: leaf fields normally,
    /// the matched elements themselves for a `$` path.
    pub fn field_nodes(&self, path: &FieldPath) -> Vec<NodeRef> {
        let indexes = if path.element_only() {
            self.matching_elements(path)
        } else {
            self.matching_fields(path)
        };
        indexes.into_iter().map(NodeRef).collect()
    }

    /// The leaf value behind a handle, `None` for elements and removed
    /// nodes.
    pub fn node_value(&self, node: NodeRef) -> Option<&str> {
        let node = self.nodes.get(node.0)?;
        if node.removed {
            return None;
        }
        node.value.as_deref()
    }

    /// Replace the leaf value behind a handle. No-op for elements and
    /// removed nodes.
    pub fn set_node_value(&mut self, node: NodeRef, value: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(node.0) {
            if !node.removed && node.is_field() {
                node.value = Some(value.into());
            }
        }
    }

    /// Detach a node (and its subtree) from the document.
    pub fn remove_node(&mut self, node: NodeRef) {
        let index = node.0;
        if index == 0 || index >= self.nodes.len() || self.nodes[index].removed {
            return;
        }
        if let Some(parent) = self.nodes[index].parent {
            self.nodes[parent].children.retain(|&child| child != index);
        }
        self.nodes[index].removed = true;
    }

    /// Append a new leaf occurrence, creating intermediate elements as
    /// needed. Paths with wildcard segments only append under existing
    /// matches; a wildcard with no match is a silent no-op.
    pub fn add_field_occurrence(&mut self, path: &FieldPath, value: impl Into<String>) {
        use crate::metadata::path::Segment;

        let mut current = 0usize;
        for segment in path.segments() {
            let found = self.nodes[current].children.iter().copied().find(|&child| {
                let node = &self.nodes[child];
                !node.removed && !node.is_field() && segment.matches(&node.name)
            });
            current = match (found, segment) {
                (Some(child), _) => child,
                (None, Segment::Name(name)) => {
                    let index = self.nodes.len();
                    self.nodes.push(Node::element(name.clone(), Some(current)));
                    self.nodes[current].children.push(index);
                    index
                }
                (None, Segment::Any) => return,
            };
        }
        let index = self.nodes.len();
        self.nodes
            .push(Node::field(path.leaf().to_owned(), value.into(), current));
        self.nodes[current].children.push(index);
    }

    /// Delete all leaves (or elements, for a `$` path) matching the path.
    pub fn remove_field_occurrence(&mut self, path: &FieldPath) {
        for node in self.field_nodes(path) {
            self.remove_node(node);
        }
    }

    /// Replace every occurrence of the path in place. Does not create:
    /// absent paths are a silent no-op.
    pub fn replace_field_occurrence(&mut self, path: &FieldPath, value: &str) {
        for node in self.field_nodes(path) {
            self.set_node_value(node, value);
        }
    }

    /// True when the document has no live nodes under the root.
    pub fn is_empty(&self) -> bool {
        self.nodes[0].children.is_empty()
    }

    /// The record identifier, copied from the harvested record.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Set the record identifier.
    pub fn set_identifier(&mut self, identifier: impl Into<String>) {
        self.identifier = identifier.into();
    }

    /// Builder-style identifier injection.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.set_identifier(identifier);
        self
    }

    /// The record datestamp, if set.
    pub fn datestamp(&self) -> Option<DateTime<Utc>> {
        self.datestamp
    }

    /// Set the record datestamp.
    pub fn set_datestamp(&mut self, datestamp: DateTime<Utc>) {
        self.datestamp = Some(datestamp);
    }

    /// The harvested origin URL, if set.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Set the harvested origin URL.
    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = Some(origin.into());
    }

    /// The OAI set this record was harvested from, if set.
    pub fn set_spec(&self) -> Option<&str> {
        self.set_spec.as_deref()
    }

    /// Set the OAI set.
    pub fn set_set_spec(&mut self, set_spec: impl Into<String>) {
        self.set_spec = Some(set_spec.into());
    }

    /// Schema name of the store document, if set.
    pub fn store_schema(&self) -> Option<&str> {
        self.store_schema.as_deref()
    }

    /// Set the store schema name.
    pub fn set_store_schema(&mut self, store_schema: impl Into<String>) {
        self.store_schema = Some(store_schema.into());
    }
}
