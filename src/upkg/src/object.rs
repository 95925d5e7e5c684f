//! Materialized objects and property values

use std::cell::RefCell;
use std::rc::Rc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Reference to another object, as a package index of the referencing
/// package plus its resolved path (`Package.Outer.Name`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRef {
    pub index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ObjectRef {
    pub fn null() -> Self {
        Self {
            index: 0,
            path: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == 0
    }
}

/// Decoded property value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int8(i8),
    Int16(i16),
    Int(i32),
    Int64(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Name(String),
    Str(String),
    /// Enum member; `value` is its ordinal when the enum is registered.
    Enum { member: String, value: Option<u8> },
    Object(ObjectRef),
    SoftObject(String),
    Struct(StructValue),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::Int8(v) => Some(v as i64),
            Value::Int16(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Int64(v) => Some(v),
            Value::UInt16(v) => Some(v as i64),
            Value::UInt32(v) => Some(v as i64),
            Value::UInt64(v) => i64::try_from(v).ok(),
            Value::Enum { value: Some(v), .. } => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Name(s) | Value::Str(s) | Value::SoftObject(s) => Some(s),
            Value::Enum { member, .. } => Some(member),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Every object reference inside this value, nested ones included.
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a ObjectRef>) {
        match self {
            Value::Object(r) if !r.is_null() => out.push(r),
            Value::Struct(s) => s.fields.collect_refs(out),
            Value::Array(items) => items.iter().for_each(|v| v.collect_refs(out)),
            _ => {}
        }
    }
}

/// Named values in declaration order; names compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    values: Vec<(String, Value)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.values
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Insert or replace.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.get_mut(name) {
            Some(slot) => *slot = value,
            None => self.values.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a ObjectRef>) {
        for (_, v) in &self.values {
            v.collect_refs(out);
        }
    }
}

impl Serialize for PropertyBag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Instance of a struct type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructValue {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(flatten)]
    pub fields: PropertyBag,
}

impl StructValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: PropertyBag::new(),
        }
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.fields.set(name, value);
        self
    }
}

/// Anything that carries named properties.
pub trait HasProperties {
    fn properties(&self) -> &PropertyBag;

    fn property(&self, name: &str) -> Option<&Value> {
        self.properties().get(name)
    }
}

impl HasProperties for StructValue {
    fn properties(&self) -> &PropertyBag {
        &self.fields
    }
}

/// An export brought to life.
#[derive(Debug, Clone, Serialize)]
pub struct Object {
    #[serde(rename = "class")]
    pub type_name: String,
    pub name: String,
    pub package: String,
    pub export_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_index: Option<i32>,
    pub properties: PropertyBag,
    /// Class-specific data following the property list.
    #[serde(skip)]
    pub trailing: Vec<u8>,
    /// Offset of `trailing` in the package.
    #[serde(skip)]
    pub trailing_offset: u64,
    #[serde(skip)]
    pub loaded: bool,
}

impl Object {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>, package: impl Into<String>, export_index: usize) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            package: package.into(),
            export_index,
            net_index: None,
            properties: PropertyBag::new(),
            trailing: Vec::new(),
            trailing_offset: 0,
            loaded: false,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}'{}.{}'", self.type_name, self.package, self.name)
    }
}

impl HasProperties for Object {
    fn properties(&self) -> &PropertyBag {
        &self.properties
    }
}

/// Shared handle; the owning package keeps identity.
pub type ObjectHandle = Rc<RefCell<Object>>;
