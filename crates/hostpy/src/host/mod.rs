//! The host-side object model the script layer talks to.
//!
//! The runtime never reflects over host objects directly. Everything it needs is expressed by the
//! [`HostObject`] capability (properties, children, creation of helper children, cloning), plus two
//! optional application-level capabilities:
//!
//! - [`HostApplication`]: the current project and friends, used to seed the batch and global
//!   contexts.
//! - [`CalculatorFactory`]: the calculators scripts may construct inside task contexts.
//!
//! Host modules can also share plain functions with scripts ([`SharedFunction`]), looked up through
//! the application.
//!
//! [`ObjectNode`] and [`StaticCalculatorCatalog`] are ready-made implementations.

mod catalog;
mod node;

use std::{any::Any, fmt, path::PathBuf, sync::Arc};

use serde_json::Value;

pub use catalog::StaticCalculatorCatalog;
pub use node::{ObjectNode, ObjectNodeBuilder};

// =============================================================================
// Property model
// =============================================================================

/// Type of a host property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    Int,
    Double,
    String,
    /// A reference to another host object, restricted to the listed classes.
    Link { allowed_classes: Vec<String> },
}

impl PropertyKind {
    /// Short type name used in messages and completion tooltips.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Double => "float",
            Self::String => "str",
            Self::Link { .. } => "link",
        }
    }

    /// Whether a value of this shape can be stored in a property of this kind.
    #[must_use]
    pub fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (_, PropertyValue::Empty)
                | (Self::Bool, PropertyValue::Bool(_))
                | (Self::Int, PropertyValue::Int(_))
                | (Self::Double, PropertyValue::Double(_))
                | (Self::String, PropertyValue::String(_))
                | (Self::Link { .. }, PropertyValue::Link(_))
        )
    }
}

/// Static description of one property of a host object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Stable identifier, may contain spaces and punctuation.
    pub id: String,
    /// Display name.
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertyDescriptor {
    pub fn new(id: impl Into<String>, kind: PropertyKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Current value of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Empty,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Uuid of the linked object, or no link.
    Link(Option<String>),
}

impl PropertyValue {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Double(_) => "float",
            Self::String(_) => "str",
            Self::Link(_) => "link",
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failures reported by host objects and host capabilities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("{class} has no property with the id: {id}")]
    UnknownProperty { class: String, id: String },
    #[error("property {property} expects a value of type {expected}, got {found}")]
    TypeMismatch {
        property: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error(
        "ERROR: {class} is not an allowed class type for the property {property}! Allowed class types: {allowed}"
    )]
    DisallowedLink {
        class: String,
        property: String,
        allowed: String,
    },
    #[error("{class} cannot create children of type {type_id}")]
    UnsupportedChild { class: String, type_id: String },
    #[error("host object is no longer alive")]
    Expired,
    #[error("{0}")]
    Unsupported(String),
}

// =============================================================================
// Capabilities
// =============================================================================

/// A live object of the host application's object graph.
///
/// The host owns these objects. The script layer only keeps weak references and re-checks
/// liveness before every use.
pub trait HostObject: Send + Sync + fmt::Debug {
    /// The object's name, unique among its siblings by convention only.
    fn object_name(&self) -> String;

    /// Name of the object's class, used for link validation and helper lookup.
    fn class_name(&self) -> String;

    /// Stable identity.
    fn uuid(&self) -> String;

    fn parent(&self) -> Option<Arc<dyn HostObject>>;

    /// Current children, in order.
    fn children(&self) -> Vec<Arc<dyn HostObject>>;

    fn properties(&self) -> Vec<PropertyDescriptor>;

    /// Value of the property with the exact id `id`.
    fn property(&self, id: &str) -> Option<PropertyValue>;

    fn set_property(&self, id: &str, value: PropertyValue) -> Result<(), HostError>;

    /// Helper child types that scripts can create through `create<Type>()`.
    fn helper_types(&self) -> Vec<String> {
        Vec::new()
    }

    /// Creates a child of helper type `type_id` named `name` and parents it under `self`.
    fn create_child(&self, type_id: &str, name: &str) -> Result<Arc<dyn HostObject>, HostError>;

    /// Adopts an existing parentless object as the last child.
    fn append_child(&self, child: Arc<dyn HostObject>) -> Result<(), HostError> {
        let _ = child;
        Err(HostError::Unsupported(format!("{} does not accept children", self.class_name())))
    }

    /// Detaches the child whose uuid is `uuid` and returns it, now parentless.
    fn take_child(&self, uuid: &str) -> Result<Option<Arc<dyn HostObject>>, HostError> {
        let _ = uuid;
        Err(HostError::Unsupported(format!("{} does not release children", self.class_name())))
    }

    /// Deep copy without a parent.
    fn clone_object(&self) -> Result<Arc<dyn HostObject>, HostError> {
        Err(HostError::Unsupported(format!("{} cannot be cloned", self.class_name())))
    }

    /// First child with the given name.
    fn find_child(&self, name: &str) -> Option<Arc<dyn HostObject>> {
        self.children().into_iter().find(|child| child.object_name() == name)
    }

    /// A native attribute that is neither a child nor a property.
    fn attribute(&self, name: &str) -> Option<PropertyValue> {
        let _ = name;
        None
    }

    /// Sets a native attribute.
    fn set_attribute(&self, name: &str, value: PropertyValue) -> Result<(), HostError> {
        let _ = value;
        Err(HostError::Unsupported(format!(
            "{} has no writable attribute named '{name}'",
            self.class_name()
        )))
    }

    /// Upcast used by implementations that need their concrete type back.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Identifies a function a host module shares with scripts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharedFunctionId {
    pub module_id: String,
    pub function_id: String,
}

impl SharedFunctionId {
    pub fn new(module_id: impl Into<String>, function_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            function_id: function_id.into(),
        }
    }
}

/// A host function scripts reach through `call_shared_function` and `shared_function`.
///
/// Arguments and the result cross as JSON values. An error becomes a `TypeError` in the script.
pub type SharedFunction = Arc<dyn Fn(&[Value]) -> Result<Value, HostError> + Send + Sync>;

/// The host application, as far as scripts are concerned.
pub trait HostApplication: Send + Sync {
    fn current_project(&self) -> Option<Arc<dyn HostObject>>;

    /// Opens (or switches to) the project named `name`.
    fn open_project(&self, name: &str) -> Option<Arc<dyn HostObject>>;

    /// Directory of the current project.
    fn project_path(&self) -> Option<PathBuf>;

    /// Names of the modules (plugins) loaded by the host.
    fn modules(&self) -> Vec<String> {
        Vec::new()
    }

    /// Every function shared by a loaded module.
    fn shared_function_ids(&self) -> Vec<SharedFunctionId> {
        Vec::new()
    }

    /// The function `function_id` shared by module `module_id`.
    fn shared_function(&self, module_id: &str, function_id: &str) -> Option<SharedFunction> {
        let _ = (module_id, function_id);
        None
    }
}

/// A calculator the host can construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculatorInfo {
    pub id: String,
    pub class_name: String,
    /// Unreleased calculators are only visible in developer mode.
    pub released: bool,
}

/// Builds calculators for task contexts.
pub trait CalculatorFactory: Send + Sync {
    fn calculators(&self) -> Vec<CalculatorInfo>;

    /// Creates a parentless calculator of class `class_name` named `name`.
    fn create(&self, class_name: &str, name: &str) -> Result<Arc<dyn HostObject>, HostError>;
}
