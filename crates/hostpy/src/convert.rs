//! Value conversion between Python objects and host-side values.
//!
//! - `py_to_json` / `json_to_py`: variables exchanged through `add_variable` / `get_variable`
//! - `property_to_py` / `py_to_property`: host property values

use pyo3::{
    IntoPyObjectExt,
    exceptions::{PyTypeError, PyValueError},
    prelude::*,
    types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple},
};
use serde_json::{Map, Number, Value};

use crate::{
    host::{PropertyKind, PropertyValue},
    proxy::HostProxy,
};

/// Converts a Python value to JSON.
///
/// Checks `bool` before `int` since `bool` is a subclass of `int` in Python. Host proxies become
/// their uuid.
pub fn py_to_json(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    if obj.is_none() {
        Ok(Value::Null)
    } else if let Ok(b) = obj.cast::<PyBool>() {
        Ok(Value::Bool(b.is_true()))
    } else if let Ok(int) = obj.cast::<PyInt>() {
        if let Ok(i) = int.extract::<i64>() {
            Ok(Value::from(i))
        } else if let Ok(u) = int.extract::<u64>() {
            Ok(Value::from(u))
        } else {
            Err(PyValueError::new_err("integer does not fit into 64 bits"))
        }
    } else if let Ok(float) = obj.cast::<PyFloat>() {
        Ok(Number::from_f64(float.value()).map_or(Value::Null, Value::Number))
    } else if let Ok(string) = obj.cast::<PyString>() {
        Ok(Value::String(string.to_str()?.to_owned()))
    } else if let Ok(list) = obj.cast::<PyList>() {
        list.iter().map(|item| py_to_json(&item)).collect::<PyResult<Vec<_>>>().map(Value::Array)
    } else if let Ok(tuple) = obj.cast::<PyTuple>() {
        tuple.iter().map(|item| py_to_json(&item)).collect::<PyResult<Vec<_>>>().map(Value::Array)
    } else if let Ok(dict) = obj.cast::<PyDict>() {
        let mut map = Map::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            let key = match key.cast::<PyString>() {
                Ok(s) => s.to_str()?.to_owned(),
                Err(_) => key.str()?.to_str()?.to_owned(),
            };
            map.insert(key, py_to_json(&value)?);
        }
        Ok(Value::Object(map))
    } else if let Ok(proxy) = obj.cast::<HostProxy>() {
        Ok(Value::String(proxy.get().live()?.uuid()))
    } else {
        let name = obj.get_type().name()?;
        Err(PyTypeError::new_err(format!("Cannot convert {name} to a JSON value")))
    }
}

/// Converts JSON to a fresh Python value.
pub fn json_to_py<'py>(py: Python<'py>, value: &Value) -> PyResult<Bound<'py, PyAny>> {
    match value {
        Value::Null => Ok(py.None().into_bound(py)),
        Value::Bool(b) => (*b).into_bound_py_any(py),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into_bound_py_any(py)
            } else if let Some(u) = n.as_u64() {
                u.into_bound_py_any(py)
            } else {
                n.as_f64().unwrap_or(f64::NAN).into_bound_py_any(py)
            }
        }
        Value::String(s) => Ok(PyString::new(py, s).into_any()),
        Value::Array(items) => {
            let items = items.iter().map(|item| json_to_py(py, item)).collect::<PyResult<Vec<_>>>()?;
            Ok(PyList::new(py, items)?.into_any())
        }
        Value::Object(map) => {
            let dict = PyDict::new(py);
            for (key, item) in map {
                dict.set_item(key, json_to_py(py, item)?)?;
            }
            Ok(dict.into_any())
        }
    }
}

/// Converts a property value for the script side. Links are exposed as the linked uuid.
pub fn property_to_py<'py>(py: Python<'py>, value: &PropertyValue) -> PyResult<Bound<'py, PyAny>> {
    match value {
        PropertyValue::Empty | PropertyValue::Link(None) => Ok(py.None().into_bound(py)),
        PropertyValue::Bool(b) => (*b).into_bound_py_any(py),
        PropertyValue::Int(i) => (*i).into_bound_py_any(py),
        PropertyValue::Double(d) => (*d).into_bound_py_any(py),
        PropertyValue::String(s) | PropertyValue::Link(Some(s)) => Ok(PyString::new(py, s).into_any()),
    }
}

/// Converts a script value for a property of `kind`.
///
/// Ints are accepted for float properties. Link properties are not handled here, they need the
/// allow-list check in the proxy layer.
pub fn py_to_property(obj: &Bound<'_, PyAny>, kind: &PropertyKind, property: &str) -> PyResult<PropertyValue> {
    let mismatch = || {
        let found = obj.get_type().name().map(|n| n.to_string()).unwrap_or_default();
        PyTypeError::new_err(format!(
            "property {property} expects a value of type {}, got {found}",
            kind.type_name()
        ))
    };
    match kind {
        PropertyKind::Bool => obj.cast::<PyBool>().map(|b| PropertyValue::Bool(b.is_true())).map_err(|_| mismatch()),
        PropertyKind::Int => {
            if obj.is_instance_of::<PyBool>() {
                return Err(mismatch());
            }
            obj.cast::<PyInt>()
                .map_err(|_| mismatch())?
                .extract::<i64>()
                .map(PropertyValue::Int)
        }
        PropertyKind::Double => {
            if obj.is_instance_of::<PyBool>() {
                return Err(mismatch());
            }
            if obj.is_instance_of::<PyFloat>() || obj.is_instance_of::<PyInt>() {
                obj.extract::<f64>().map(PropertyValue::Double)
            } else {
                Err(mismatch())
            }
        }
        PropertyKind::String => obj
            .cast::<PyString>()
            .map_err(|_| mismatch())
            .and_then(|s| Ok(PropertyValue::String(s.to_str()?.to_owned()))),
        PropertyKind::Link { .. } => Err(PyTypeError::new_err(format!(
            "property {property} is a link and needs a HostObject"
        ))),
    }
}

/// Best-effort conversion of an arbitrary script value, used for native host attributes.
pub fn py_to_loose_property(obj: &Bound<'_, PyAny>) -> PyResult<PropertyValue> {
    if obj.is_none() {
        Ok(PropertyValue::Empty)
    } else if let Ok(b) = obj.cast::<PyBool>() {
        Ok(PropertyValue::Bool(b.is_true()))
    } else if obj.is_instance_of::<PyInt>() {
        obj.extract::<i64>().map(PropertyValue::Int)
    } else if let Ok(float) = obj.cast::<PyFloat>() {
        Ok(PropertyValue::Double(float.value()))
    } else if let Ok(string) = obj.cast::<PyString>() {
        Ok(PropertyValue::String(string.to_str()?.to_owned()))
    } else if let Ok(proxy) = obj.cast::<HostProxy>() {
        Ok(PropertyValue::Link(Some(proxy.get().live()?.uuid())))
    } else {
        let name = obj.get_type().name()?;
        Err(PyTypeError::new_err(format!("Cannot store a {name} on a host object")))
    }
}
