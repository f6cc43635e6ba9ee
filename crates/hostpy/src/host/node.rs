//! A general-purpose in-memory host object graph.

use std::{
    any::Any,
    sync::{Arc, Weak},
};

use indexmap::IndexMap;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{HostError, HostObject, PropertyDescriptor, PropertyValue};

type Template = Vec<(PropertyDescriptor, PropertyValue)>;

/// A named, typed node with properties, children and helper templates.
///
/// Nodes are always handled through `Arc`; a node knows its parent weakly and owns its children.
#[derive(Debug)]
pub struct ObjectNode {
    me: Weak<ObjectNode>,
    uuid: String,
    class_name: String,
    /// Helper child type -> properties a freshly created helper starts with.
    helpers: IndexMap<String, Template>,
    state: RwLock<NodeState>,
}

#[derive(Debug)]
struct NodeState {
    name: String,
    properties: IndexMap<String, (PropertyDescriptor, PropertyValue)>,
    attributes: IndexMap<String, PropertyValue>,
    children: Vec<Arc<ObjectNode>>,
    parent: Weak<ObjectNode>,
}

/// Builder for [`ObjectNode`].
#[derive(Debug)]
pub struct ObjectNodeBuilder {
    class_name: String,
    name: String,
    properties: Template,
    helpers: IndexMap<String, Template>,
}

impl ObjectNodeBuilder {
    /// Adds a property with its initial value.
    #[must_use]
    pub fn property(mut self, descriptor: PropertyDescriptor, value: PropertyValue) -> Self {
        self.properties.push((descriptor, value));
        self
    }

    /// Registers a helper child type scripts can create with `create<type_id>()`.
    #[must_use]
    pub fn helper(mut self, type_id: impl Into<String>, template: Template) -> Self {
        self.helpers.insert(type_id.into(), template);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<ObjectNode> {
        ObjectNode::assemble(
            self.class_name,
            self.name,
            self.properties.into_iter().map(|(d, v)| (d.id.clone(), (d, v))).collect(),
            self.helpers,
        )
    }
}

impl ObjectNode {
    pub fn builder(class_name: impl Into<String>, name: impl Into<String>) -> ObjectNodeBuilder {
        ObjectNodeBuilder {
            class_name: class_name.into(),
            name: name.into(),
            properties: Vec::new(),
            helpers: IndexMap::new(),
        }
    }

    /// A node without properties or helpers.
    pub fn new(class_name: impl Into<String>, name: impl Into<String>) -> Arc<Self> {
        Self::builder(class_name, name).build()
    }

    fn assemble(
        class_name: String,
        name: String,
        properties: IndexMap<String, (PropertyDescriptor, PropertyValue)>,
        helpers: IndexMap<String, Template>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            uuid: Uuid::new_v4().to_string(),
            class_name,
            helpers,
            state: RwLock::new(NodeState {
                name,
                properties,
                attributes: IndexMap::new(),
                children: Vec::new(),
                parent: Weak::new(),
            }),
        })
    }

    /// Renames the node.
    pub fn rename(&self, name: impl Into<String>) {
        self.state.write().name = name.into();
    }

    /// Appends `child`, taking it away from its previous parent.
    ///
    /// Fails when `child` is this node itself or one of its ancestors.
    pub fn add_child(&self, child: Arc<Self>) -> Result<(), HostError> {
        let mut ancestor = Some(self.arc()?);
        while let Some(node) = ancestor {
            if Arc::ptr_eq(&node, &child) {
                return Err(HostError::Unsupported(format!(
                    "{} cannot become a child of its own descendant {}",
                    child.object_name(),
                    self.object_name()
                )));
            }
            ancestor = node.state.read().parent.upgrade();
        }
        child.detach();
        child.state.write().parent = self.me.clone();
        self.state.write().children.push(child);
        Ok(())
    }

    /// Removes the first child named `name` and returns it, now parentless.
    pub fn remove_child(&self, name: &str) -> Option<Arc<Self>> {
        let removed = {
            let mut state = self.state.write();
            let index = state.children.iter().position(|c| c.state.read().name == name)?;
            state.children.remove(index)
        };
        removed.state.write().parent = Weak::new();
        Some(removed)
    }

    /// Detaches the node from its parent, if any.
    pub fn detach(&self) {
        let parent = std::mem::take(&mut self.state.write().parent);
        if let Some(parent) = parent.upgrade() {
            parent.state.write().children.retain(|c| c.uuid != self.uuid);
        }
    }

    /// Concrete children.
    #[must_use]
    pub fn child_nodes(&self) -> Vec<Arc<Self>> {
        self.state.read().children.clone()
    }

    fn arc(&self) -> Result<Arc<Self>, HostError> {
        self.me.upgrade().ok_or(HostError::Expired)
    }

    fn deep_clone(&self) -> Arc<Self> {
        let (name, properties, attributes, children) = {
            let state = self.state.read();
            (
                state.name.clone(),
                state.properties.clone(),
                state.attributes.clone(),
                state.children.clone(),
            )
        };
        let copy = Self::assemble(self.class_name.clone(), name, properties, self.helpers.clone());
        copy.state.write().attributes = attributes;
        for child in children {
            let child_copy = child.deep_clone();
            child_copy.state.write().parent = copy.me.clone();
            copy.state.write().children.push(child_copy);
        }
        copy
    }
}

impl HostObject for ObjectNode {
    fn object_name(&self) -> String {
        self.state.read().name.clone()
    }

    fn class_name(&self) -> String {
        self.class_name.clone()
    }

    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    fn parent(&self) -> Option<Arc<dyn HostObject>> {
        let parent = self.state.read().parent.upgrade()?;
        Some(parent)
    }

    fn children(&self) -> Vec<Arc<dyn HostObject>> {
        self.state
            .read()
            .children
            .iter()
            .map(|child| Arc::clone(child) as Arc<dyn HostObject>)
            .collect()
    }

    fn properties(&self) -> Vec<PropertyDescriptor> {
        self.state.read().properties.values().map(|(d, _)| d.clone()).collect()
    }

    fn property(&self, id: &str) -> Option<PropertyValue> {
        self.state.read().properties.get(id).map(|(_, value)| value.clone())
    }

    fn set_property(&self, id: &str, value: PropertyValue) -> Result<(), HostError> {
        let mut state = self.state.write();
        let Some((descriptor, current)) = state.properties.get_mut(id) else {
            return Err(HostError::UnknownProperty {
                class: self.class_name.clone(),
                id: id.to_owned(),
            });
        };
        if !descriptor.kind.accepts(&value) {
            return Err(HostError::TypeMismatch {
                property: descriptor.name.clone(),
                expected: descriptor.kind.type_name(),
                found: value.type_name(),
            });
        }
        *current = value;
        Ok(())
    }

    fn helper_types(&self) -> Vec<String> {
        self.helpers.keys().cloned().collect()
    }

    fn create_child(&self, type_id: &str, name: &str) -> Result<Arc<dyn HostObject>, HostError> {
        let Some(template) = self.helpers.get(type_id) else {
            return Err(HostError::UnsupportedChild {
                class: self.class_name.clone(),
                type_id: type_id.to_owned(),
            });
        };
        let child = Self::assemble(
            type_id.to_owned(),
            name.to_owned(),
            template.iter().map(|(d, v)| (d.id.clone(), (d.clone(), v.clone()))).collect(),
            IndexMap::new(),
        );
        self.add_child(Arc::clone(&child))?;
        Ok(child)
    }

    fn append_child(&self, child: Arc<dyn HostObject>) -> Result<(), HostError> {
        let class = child.class_name();
        let node = child
            .into_any()
            .downcast::<Self>()
            .map_err(|_| HostError::Unsupported(format!("{} cannot adopt a foreign {class}", self.class_name)))?;
        self.add_child(node)
    }

    fn take_child(&self, uuid: &str) -> Result<Option<Arc<dyn HostObject>>, HostError> {
        let removed = {
            let mut state = self.state.write();
            let index = state.children.iter().position(|child| child.uuid == uuid);
            index.map(|index| state.children.remove(index))
        };
        Ok(removed.map(|child| {
            child.state.write().parent = Weak::new();
            child as Arc<dyn HostObject>
        }))
    }

    fn clone_object(&self) -> Result<Arc<dyn HostObject>, HostError> {
        Ok(self.deep_clone())
    }

    fn attribute(&self, name: &str) -> Option<PropertyValue> {
        self.state.read().attributes.get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: PropertyValue) -> Result<(), HostError> {
        self.state.write().attributes.insert(name.to_owned(), value);
        Ok(())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::host::PropertyKind;

    fn project() -> Arc<ObjectNode> {
        ObjectNode::builder("Project", "demo")
            .property(PropertyDescriptor::new("max iter", PropertyKind::Int), PropertyValue::Int(5))
            .helper(
                "Parameter",
                vec![(PropertyDescriptor::new("value", PropertyKind::Double), PropertyValue::Double(0.0))],
            )
            .build()
    }

    #[test]
    fn typed_property_set() {
        let node = project();
        node.set_property("max iter", PropertyValue::Int(9)).unwrap();
        assert_eq!(node.property("max iter"), Some(PropertyValue::Int(9)));

        let err = node.set_property("max iter", PropertyValue::String("x".into())).unwrap_err();
        assert!(matches!(err, HostError::TypeMismatch { expected: "int", .. }));
        assert_eq!(node.property("max iter"), Some(PropertyValue::Int(9)));

        let err = node.set_property("nope", PropertyValue::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "Project has no property with the id: nope");
    }

    #[test]
    fn helpers_create_parented_children() {
        let node = project();
        let child = node.create_child("Parameter", "p1").unwrap();
        assert_eq!(child.class_name(), "Parameter");
        assert_eq!(child.parent().map(|p| p.uuid()), Some(node.uuid()));
        assert_eq!(child.property("value"), Some(PropertyValue::Double(0.0)));
        assert!(node.create_child("Unknown", "x").is_err());
    }

    #[test]
    fn moving_a_child_detaches_it_from_the_old_parent() {
        let first = project();
        let second = project();
        let child = ObjectNode::new("Item", "item");
        first.add_child(Arc::clone(&child)).unwrap();
        second.add_child(Arc::clone(&child)).unwrap();
        assert!(first.children().is_empty());
        assert_eq!(second.children().len(), 1);
        assert!(first.add_child(Arc::clone(&first)).is_err());
    }

    #[test]
    fn ancestors_cannot_become_children() {
        let root = project();
        let middle = ObjectNode::new("Group", "middle");
        let leaf = ObjectNode::new("Item", "leaf");
        root.add_child(Arc::clone(&middle)).unwrap();
        middle.add_child(Arc::clone(&leaf)).unwrap();

        let err = leaf.add_child(Arc::clone(&root)).unwrap_err();
        assert_eq!(err.to_string(), "demo cannot become a child of its own descendant leaf");
        assert!(middle.add_child(Arc::clone(&middle)).is_err());
        assert!(root.parent().is_none());
        assert!(leaf.children().is_empty());

        let err = leaf.append_child(root.clone()).unwrap_err();
        assert!(matches!(err, HostError::Unsupported(_)));
        assert_eq!(root.clone_object().unwrap().children().len(), 1);
    }

    #[test]
    fn clone_is_deep_and_parentless() {
        let node = project();
        node.create_child("Parameter", "p1").unwrap();
        let copy = node.clone_object().unwrap();
        assert_ne!(copy.uuid(), node.uuid());
        assert!(copy.parent().is_none());
        assert_eq!(copy.children().len(), 1);
        assert_ne!(copy.children()[0].uuid(), node.children()[0].uuid());
    }

    #[test]
    fn take_child_by_uuid() {
        let node = project();
        let child = node.create_child("Parameter", "p1").unwrap();
        let taken = node.take_child(&child.uuid()).unwrap().unwrap();
        assert_eq!(taken.uuid(), child.uuid());
        assert!(taken.parent().is_none());
        assert!(node.children().is_empty());
        assert!(node.take_child(&child.uuid()).unwrap().is_none());
    }

    #[test]
    fn removed_children_drop_when_unreferenced() {
        let node = project();
        let weak = {
            let child = node.create_child("Parameter", "gone").unwrap();
            Arc::downgrade(&child)
        };
        assert!(weak.upgrade().is_some());
        drop(node.remove_child("gone"));
        assert!(weak.upgrade().is_none());
    }
}
