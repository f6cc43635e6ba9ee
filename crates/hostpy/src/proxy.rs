//! Script-visible proxies over host objects.
//!
//! A [`HostProxy`] is a thin adapter over the [`HostObject`] capability. It never owns the host
//! object (except for parentless objects a script created itself, such as clones) and re-checks
//! liveness on every access.
//!
//! Attribute reads resolve in this order:
//!
//! 1. the proxy's own methods (`children()`, `property_value()`, ...)
//! 2. host properties under their normalized id, or a bound setter for `set<Id>`
//! 3. the host object's native attributes: children by name, then dynamic attributes
//! 4. `create<Helper>` factories for the helper types the object registers
//! 5. `AttributeError` naming the object and the attribute
//!
//! Writes reject names of existing children, perform a validated set for property names and hand
//! everything else to the host object.

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::{Arc, LazyLock, Weak},
};

use pyo3::{
    exceptions::{PyAttributeError, PyRuntimeError, PyTypeError, PyValueError},
    prelude::*,
    types::{PyDict, PyString, PyTuple},
};
use regex::Regex;

use crate::{
    convert::{property_to_py, py_to_loose_property, py_to_property},
    host::{HostError, HostObject, PropertyDescriptor, PropertyKind, PropertyValue},
};

static NON_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("property id pattern is valid"));

/// Strips everything but ASCII letters and digits, so `"max. iterations"` becomes
/// `"maxiterations"`.
#[must_use]
pub fn normalize_property_id(id: &str) -> String {
    NON_IDENTIFIER.replace_all(id, "").into_owned()
}

impl From<HostError> for PyErr {
    fn from(error: HostError) -> Self {
        let message = error.to_string();
        match error {
            HostError::UnknownProperty { .. } | HostError::DisallowedLink { .. } => PyValueError::new_err(message),
            HostError::TypeMismatch { .. } | HostError::UnsupportedChild { .. } => PyTypeError::new_err(message),
            HostError::Expired | HostError::Unsupported(_) => PyRuntimeError::new_err(message),
        }
    }
}

/// `"<name> (<Class> 0x<addr>)"`, the identity used in error messages.
fn describe(obj: &Arc<dyn HostObject>) -> String {
    format!(
        "{} ({} 0x{:x})",
        obj.object_name(),
        obj.class_name(),
        Arc::as_ptr(obj).cast::<()>().addr()
    )
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The property exposed as attribute `name`.
fn property_for_attribute(obj: &Arc<dyn HostObject>, name: &str) -> Option<PropertyDescriptor> {
    obj.properties()
        .into_iter()
        .find(|descriptor| normalize_property_id(&descriptor.id) == name)
}

/// The property `set<Id>` refers to, matching either the normalized or the raw id.
fn property_for_setter(obj: &Arc<dyn HostObject>, name: &str) -> Option<PropertyDescriptor> {
    let rest = name.strip_prefix("set")?;
    obj.properties().into_iter().find(|descriptor| {
        capitalize(&normalize_property_id(&descriptor.id)) == rest || capitalize(&descriptor.id) == rest
    })
}

/// Looks a property up by its exact id, falling back to the normalized id.
fn property_by_id(obj: &Arc<dyn HostObject>, id: &str) -> PyResult<PropertyDescriptor> {
    let properties = obj.properties();
    let normalized = normalize_property_id(id);
    properties
        .iter()
        .find(|descriptor| descriptor.id == id)
        .or_else(|| properties.iter().find(|d| normalize_property_id(&d.id) == normalized))
        .cloned()
        .ok_or_else(|| {
            HostError::UnknownProperty {
                class: obj.class_name(),
                id: id.to_owned(),
            }
            .into()
        })
}

/// Sets a property after checking the value against the property's kind.
///
/// Link properties only accept proxies whose class is on the allow-list (or `None` to clear the
/// link). A rejected value leaves the stored value untouched.
fn set_validated(obj: &Arc<dyn HostObject>, descriptor: &PropertyDescriptor, value: &Bound<'_, PyAny>) -> PyResult<()> {
    let converted = match &descriptor.kind {
        PropertyKind::Link { allowed_classes } => {
            if value.is_none() {
                PropertyValue::Link(None)
            } else {
                let linked = value
                    .cast::<HostProxy>()
                    .map_err(|_| {
                        PyTypeError::new_err(format!("property {} expects a HostObject", descriptor.name))
                    })?
                    .get()
                    .live()?;
                let class = linked.class_name();
                if !allowed_classes.contains(&class) {
                    return Err(HostError::DisallowedLink {
                        class,
                        property: descriptor.name.clone(),
                        allowed: allowed_classes.join(", "),
                    }
                    .into());
                }
                PropertyValue::Link(Some(linked.uuid()))
            }
        }
        kind => py_to_property(value, kind, &descriptor.name)?,
    };
    obj.set_property(&descriptor.id, converted)?;
    Ok(())
}

// =============================================================================
// HostProxy
// =============================================================================

/// The script-side stand-in for one host object.
#[pyclass(name = "HostObject", module = "hostpy", frozen)]
#[derive(Debug)]
pub struct HostProxy {
    target: Weak<dyn HostObject>,
    /// Identity captured at construction; hashing must not change when the object dies.
    uuid: String,
    /// Keeps script-created objects without a host parent alive.
    owned: Option<Arc<dyn HostObject>>,
}

impl HostProxy {
    /// A proxy that does not keep `obj` alive.
    #[must_use]
    pub fn borrowed(obj: &Arc<dyn HostObject>) -> Self {
        Self {
            target: Arc::downgrade(obj),
            uuid: obj.uuid(),
            owned: None,
        }
    }

    /// A proxy that owns `obj`; used for objects that have no host parent.
    #[must_use]
    pub fn owning(obj: Arc<dyn HostObject>) -> Self {
        Self {
            target: Arc::downgrade(&obj),
            uuid: obj.uuid(),
            owned: Some(obj),
        }
    }

    /// Creates a borrowed proxy as a Python object.
    pub fn wrap<'py>(py: Python<'py>, obj: &Arc<dyn HostObject>) -> PyResult<Bound<'py, Self>> {
        Bound::new(py, Self::borrowed(obj))
    }

    /// The wrapped object, if it is still alive.
    #[must_use]
    pub fn target(&self) -> Option<Arc<dyn HostObject>> {
        self.target.upgrade()
    }

    /// The wrapped object, or a `RuntimeError` if the host has dropped it.
    pub fn live(&self) -> PyResult<Arc<dyn HostObject>> {
        self.target().ok_or_else(|| HostError::Expired.into())
    }

    /// Whether the proxy keeps its object alive.
    #[must_use]
    pub fn is_owning(&self) -> bool {
        self.owned.is_some()
    }
}

#[pymethods]
impl HostProxy {
    fn object_name(&self) -> PyResult<String> {
        Ok(self.live()?.object_name())
    }

    fn class_name(&self) -> PyResult<String> {
        Ok(self.live()?.class_name())
    }

    fn uuid(&self) -> PyResult<String> {
        Ok(self.live()?.uuid())
    }

    fn is_valid(&self) -> bool {
        self.target().is_some()
    }

    fn parent<'py>(&self, py: Python<'py>) -> PyResult<Option<Bound<'py, Self>>> {
        self.live()?.parent().map(|parent| Self::wrap(py, &parent)).transpose()
    }

    fn children<'py>(&self, py: Python<'py>) -> PyResult<Vec<Bound<'py, Self>>> {
        self.live()?.children().iter().map(|child| Self::wrap(py, child)).collect()
    }

    fn find_child<'py>(&self, py: Python<'py>, name: &str) -> PyResult<Option<Bound<'py, Self>>> {
        self.live()?.find_child(name).map(|child| Self::wrap(py, &child)).transpose()
    }

    /// All children named `name`; a trailing `*` matches by prefix.
    fn find_children<'py>(&self, py: Python<'py>, name: &str) -> PyResult<Vec<Bound<'py, Self>>> {
        let matches = |child_name: &str| match name.strip_suffix('*') {
            Some(prefix) => child_name.starts_with(prefix),
            None => child_name == name,
        };
        self.live()?
            .children()
            .iter()
            .filter(|child| matches(&child.object_name()))
            .map(|child| Self::wrap(py, child))
            .collect()
    }

    /// Ids of all properties.
    fn properties(&self) -> PyResult<Vec<String>> {
        Ok(self.live()?.properties().into_iter().map(|d| d.id).collect())
    }

    /// Description and current value of one property, or `None`.
    fn find_property<'py>(&self, py: Python<'py>, id: &str) -> PyResult<Option<Bound<'py, PyDict>>> {
        let obj = self.live()?;
        let Ok(descriptor) = property_by_id(&obj, id) else {
            return Ok(None);
        };
        let info = PyDict::new(py);
        info.set_item("id", &descriptor.id)?;
        info.set_item("name", &descriptor.name)?;
        info.set_item("type", descriptor.kind.type_name())?;
        if let PropertyKind::Link { allowed_classes } = &descriptor.kind {
            info.set_item("allowed_classes", allowed_classes)?;
        }
        let value = obj.property(&descriptor.id).unwrap_or(PropertyValue::Empty);
        info.set_item("value", property_to_py(py, &value)?)?;
        Ok(Some(info))
    }

    fn property_value<'py>(&self, py: Python<'py>, id: &str) -> PyResult<Bound<'py, PyAny>> {
        let obj = self.live()?;
        let descriptor = property_by_id(&obj, id)?;
        property_to_py(py, &obj.property(&descriptor.id).unwrap_or(PropertyValue::Empty))
    }

    fn set_property_value(&self, id: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let obj = self.live()?;
        let descriptor = property_by_id(&obj, id)?;
        set_validated(&obj, &descriptor, value)
    }

    /// Deep copy without a parent; the returned proxy owns the copy.
    #[pyo3(name = "clone")]
    fn clone_object<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, Self>> {
        let copy = self.live()?.clone_object()?;
        Bound::new(py, Self::owning(copy))
    }

    fn __getattr__<'py>(slf: &Bound<'py, Self>, name: &str) -> PyResult<Bound<'py, PyAny>> {
        let py = slf.py();
        let this = slf.get();
        let obj = this.live()?;

        if let Some(descriptor) = property_for_attribute(&obj, name) {
            let value = obj.property(&descriptor.id).unwrap_or(PropertyValue::Empty);
            return property_to_py(py, &value);
        }
        if let Some(descriptor) = property_for_setter(&obj, name) {
            let setter = PropertySetter {
                target: this.target.clone(),
                property: descriptor,
            };
            return Ok(Bound::new(py, setter)?.into_any());
        }

        if let Some(child) = obj.find_child(name) {
            return Ok(Self::wrap(py, &child)?.into_any());
        }
        if let Some(value) = obj.attribute(name) {
            return property_to_py(py, &value);
        }

        if let Some(helper) = name.strip_prefix("create")
            && obj.helper_types().iter().any(|h| h == helper)
        {
            let factory = CreateHelper {
                target: this.target.clone(),
                helper: helper.to_owned(),
            };
            return Ok(Bound::new(py, factory)?.into_any());
        }

        Err(PyAttributeError::new_err(format!(
            "{} has no attribute named '{name}'",
            describe(&obj)
        )))
    }

    fn __setattr__(&self, name: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let obj = self.live()?;
        if let Some(child) = obj.find_child(name) {
            return Err(PyValueError::new_err(format!(
                "It is not allowed to overwrite the child element {}",
                describe(&child)
            )));
        }
        if let Some(descriptor) = property_for_attribute(&obj, name) {
            return set_validated(&obj, &descriptor, value);
        }
        let converted = py_to_loose_property(value)?;
        obj.set_attribute(name, converted)
            .map_err(|err| PyAttributeError::new_err(err.to_string()))
    }

    fn __dir__(slf: &Bound<'_, Self>) -> PyResult<Vec<String>> {
        let mut names: Vec<String> = slf
            .get_type()
            .dir()?
            .iter()
            .filter_map(|name| name.extract::<String>().ok())
            .collect();
        if let Some(obj) = slf.get().target() {
            names.extend(obj.properties().iter().map(|d| normalize_property_id(&d.id)));
            names.extend(obj.children().iter().map(|child| child.object_name()));
            names.extend(obj.helper_types().iter().map(|helper| format!("create{helper}")));
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn __bool__(&self) -> bool {
        self.target().is_some()
    }

    fn __eq__(&self, other: &Bound<'_, PyAny>) -> bool {
        let Ok(other) = other.cast::<Self>() else {
            return false;
        };
        self.uuid == other.get().uuid
    }

    fn __hash__(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.uuid.hash(&mut hasher);
        hasher.finish()
    }

    fn __str__(&self) -> String {
        self.target()
            .map_or_else(|| "<dead HostObject>".to_owned(), |obj| obj.object_name())
    }

    fn __repr__(&self) -> String {
        match self.target() {
            Some(obj) => format!("<HostObject {}>", describe(&obj)),
            None => "<HostObject (dead)>".to_owned(),
        }
    }
}

// =============================================================================
// Bound helper callables
// =============================================================================

/// `obj.set<Id>` bound to one property.
#[pyclass(name = "PropertySetter", module = "hostpy", frozen)]
#[derive(Debug)]
pub struct PropertySetter {
    target: Weak<dyn HostObject>,
    property: PropertyDescriptor,
}

#[pymethods]
impl PropertySetter {
    fn __call__(&self, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let obj = self.target.upgrade().ok_or(HostError::Expired)?;
        set_validated(&obj, &self.property, value)
    }

    fn __repr__(&self) -> String {
        format!("<PropertySetter {}>", self.property.id)
    }
}

/// `obj.create<Helper>` bound to one helper type.
#[pyclass(name = "CreateHelper", module = "hostpy", frozen)]
#[derive(Debug)]
pub struct CreateHelper {
    target: Weak<dyn HostObject>,
    helper: String,
}

#[pymethods]
impl CreateHelper {
    /// Creates the helper child, named after the helper type unless a name is given.
    #[pyo3(signature = (*args))]
    fn __call__<'py>(&self, args: &Bound<'py, PyTuple>) -> PyResult<Bound<'py, HostProxy>> {
        let py = args.py();
        let usage = || {
            PyTypeError::new_err(format!(
                "create{}(objName) accepts only a argument of type string",
                self.helper
            ))
        };
        let name = match args.len() {
            0 => self.helper.clone(),
            1 => args.get_item(0)?.cast::<PyString>().map_err(|_| usage())?.to_str()?.to_owned(),
            _ => return Err(usage()),
        };
        let parent = self.target.upgrade().ok_or(HostError::Expired)?;
        let child = parent.create_child(&self.helper, &name)?;
        HostProxy::wrap(py, &child)
    }

    fn __repr__(&self) -> String {
        format!("<CreateHelper create{}>", self.helper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_ids_lose_special_characters() {
        assert_eq!(normalize_property_id("max. iterations"), "maxiterations");
        assert_eq!(normalize_property_id("x_1"), "x1");
        assert_eq!(normalize_property_id("plain"), "plain");
    }

    #[test]
    fn capitalize_first_letter_only() {
        assert_eq!(capitalize("maxIter"), "MaxIter");
        assert_eq!(capitalize(""), "");
    }
}
