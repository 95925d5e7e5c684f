//! Type registry
//!
//! Describes the classes and structs whose tagged properties can be
//! decoded. The registry is built once at start-up (usually from
//! [`TypeRegistry::with_builtins`] plus per-game additions) and then shared
//! read-only by the loader.

use std::collections::HashMap;

use crate::archive::Archive;
use crate::object::{Object, Value};
use crate::property::tag::Linker;
use crate::{Error, Result};

/// Declared type of a property, or of the elements of an array property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Int,
    Bool,
    Float,
    Name,
    Str,
    Object,
    Int8,
    Int16,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    SoftObject,
    Struct(String),
    Enum(String),
    /// Redirect to another property of the same type.
    Alias(String),
}

impl FieldType {
    pub fn name(&self) -> String {
        match self {
            FieldType::Struct(s) => format!("struct {}", s),
            FieldType::Enum(e) => format!("enum {}", e),
            FieldType::Alias(a) => format!("alias of {}", a),
            other => format!("{:?}", other).to_lowercase(),
        }
    }

    /// Zero value for this type.
    pub fn default_value(&self, registry: &TypeRegistry) -> Value {
        match self {
            FieldType::Byte => Value::Byte(0),
            FieldType::Int => Value::Int(0),
            FieldType::Bool => Value::Bool(false),
            FieldType::Float => Value::Float(0.0),
            FieldType::Name => Value::Name("None".into()),
            FieldType::Str => Value::Str(String::new()),
            FieldType::Object => Value::Object(crate::object::ObjectRef::null()),
            FieldType::Int8 => Value::Int8(0),
            FieldType::Int16 => Value::Int16(0),
            FieldType::Int64 => Value::Int64(0),
            FieldType::UInt16 => Value::UInt16(0),
            FieldType::UInt32 => Value::UInt32(0),
            FieldType::UInt64 => Value::UInt64(0),
            FieldType::SoftObject => Value::SoftObject(String::new()),
            FieldType::Struct(s) => Value::Struct(registry.default_struct(s)),
            FieldType::Enum(_) => Value::Enum {
                member: "None".into(),
                value: None,
            },
            FieldType::Alias(_) => Value::Bool(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub field_type: FieldType,
    /// 1 for scalars, N for fixed arrays, -1 for dynamic arrays, 0 for
    /// properties that are known but ignored.
    pub array_count: i32,
}

impl PropertyDescriptor {
    pub fn scalar(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            array_count: 1,
        }
    }

    pub fn fixed(name: &str, field_type: FieldType, count: i32) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            array_count: count,
        }
    }

    pub fn array(name: &str, element: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type: element,
            array_count: -1,
        }
    }

    pub fn dropped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Byte,
            array_count: 0,
        }
    }

    pub fn alias(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Alias(target.to_string()),
            array_count: 1,
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.array_count == 0
    }

    pub fn is_dynamic_array(&self) -> bool {
        self.array_count == -1
    }

    fn default_value(&self, registry: &TypeRegistry) -> Option<Value> {
        match (self.array_count, &self.field_type) {
            (0, _) | (_, FieldType::Alias(_)) => None,
            (-1, _) => Some(Value::Array(Vec::new())),
            (1, t) => Some(t.default_value(registry)),
            (n, t) => Some(Value::Array(vec![t.default_value(registry); n.max(0) as usize])),
        }
    }
}

/// Reader for types with a fixed binary layout (math structs and such).
pub type NativeReader = fn(&mut dyn Archive, &dyn Linker) -> Result<Value>;

/// Runs once per object after every object of the batch is deserialized.
pub type PostLoadHook = fn(&mut Object) -> Result<()>;

#[derive(Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub parent: Option<String>,
    pub properties: Vec<PropertyDescriptor>,
    pub native: Option<NativeReader>,
    pub post_load: Option<PostLoadHook>,
    /// Don't log when objects of this class are loaded.
    pub silent: bool,
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("properties", &self.properties)
            .field("native", &self.native.is_some())
            .field("post_load", &self.post_load.is_some())
            .finish()
    }
}

impl TypeDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            properties: Vec::new(),
            native: None,
            post_load: None,
            silent: false,
        }
    }

    pub fn parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn prop(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn native(mut self, reader: NativeReader) -> Self {
        self.native = Some(reader);
        self
    }

    pub fn post_load(mut self, hook: PostLoadHook) -> Self {
        self.post_load = Some(hook);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    fn own_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
struct Rename {
    class: String,
    old: String,
    new: String,
}

/// Registered enum: member names in ordinal order.
#[derive(Debug, Clone)]
struct EnumInfo {
    members: Vec<String>,
}

/// Case-insensitive match with `*` (any run) and `?` (any one character).
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let t: Vec<char> = text.to_ascii_lowercase().chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDescriptor>,
    suppressed: Vec<String>,
    renames: Vec<Rename>,
    enums: HashMap<String, EnumInfo>,
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a type. A later registration under the same name wins.
    pub fn register(&mut self, descriptor: TypeDescriptor) {
        let key = descriptor.name.to_ascii_lowercase();
        if self.types.insert(key, descriptor).is_some() {
            tracing::debug!("type re-registered, later definition wins");
        }
    }

    pub fn register_all(&mut self, descriptors: impl IntoIterator<Item = TypeDescriptor>) {
        for d in descriptors {
            self.register(d);
        }
    }

    pub fn find(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Whether `name` is `ancestor` or derives from it.
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        let mut current = self.find(name);
        // bounded walk, parent chains can be misconfigured into loops
        for _ in 0..64 {
            let Some(ty) = current else {
                return false;
            };
            if ty.name.eq_ignore_ascii_case(ancestor) {
                return true;
            }
            current = ty.parent.as_deref().and_then(|p| self.find(p));
        }
        false
    }

    /// Post-load hook of `name` or of its nearest ancestor that has one.
    pub fn post_load_hook(&self, name: &str) -> Option<PostLoadHook> {
        let mut current = self.find(name);
        for _ in 0..64 {
            let ty = current?;
            if let Some(hook) = ty.post_load {
                return Some(hook);
            }
            current = ty.parent.as_deref().and_then(|p| self.find(p));
        }
        None
    }

    /// Remove `name`; with `whole_tree` also every type derived from it.
    /// Returns how many types were removed.
    pub fn unregister(&mut self, name: &str, whole_tree: bool) -> usize {
        let doomed: Vec<String> = self
            .types
            .values()
            .filter(|t| t.name.eq_ignore_ascii_case(name) || (whole_tree && self.is_a(&t.name, name)))
            .map(|t| t.name.to_ascii_lowercase())
            .collect();
        for key in &doomed {
            self.types.remove(key);
        }
        doomed.len()
    }

    /// Expect objects of matching classes to be unknown.
    pub fn suppress(&mut self, pattern: &str) {
        self.suppressed.push(pattern.to_string());
    }

    pub fn is_suppressed(&self, class: &str) -> bool {
        self.suppressed.iter().any(|p| wildcard_match(p, class))
    }

    /// Read the serialized property `old` of `class` into `new`.
    pub fn rename(&mut self, class: &str, old: &str, new: &str) {
        self.renames.push(Rename {
            class: class.to_string(),
            old: old.to_string(),
            new: new.to_string(),
        });
    }

    pub fn register_enum(&mut self, name: &str, members: &[&str]) {
        self.enums.insert(
            name.to_ascii_lowercase(),
            EnumInfo {
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
    }

    /// Ordinal of `member` in enum `name`. Accepts `EName::Member`.
    pub fn enum_value(&self, name: &str, member: &str) -> Option<u8> {
        let info = self.enums.get(&name.to_ascii_lowercase())?;
        let member = member.rsplit("::").next().unwrap_or(member);
        info.members
            .iter()
            .position(|m| m.eq_ignore_ascii_case(member))
            .and_then(|i| u8::try_from(i).ok())
    }

    pub fn enum_member(&self, name: &str, value: u8) -> Option<&str> {
        self.enums
            .get(&name.to_ascii_lowercase())?
            .members
            .get(value as usize)
            .map(String::as_str)
    }

    /// Look up property `name` of `type_name`, walking parents.
    ///
    /// The rename table is applied once, then a single alias is followed.
    /// An alias pointing at another alias, or at nothing, is an error.
    pub fn find_property(&self, type_name: &str, name: &str) -> Result<Option<&PropertyDescriptor>> {
        let name = self
            .renames
            .iter()
            .find(|r| r.class.eq_ignore_ascii_case(type_name) && r.old.eq_ignore_ascii_case(name))
            .map(|r| r.new.as_str())
            .unwrap_or(name);

        let mut current = self.find(type_name);
        let mut depth = 0;
        while let Some(ty) = current {
            if let Some(prop) = ty.own_property(name) {
                let FieldType::Alias(target) = &prop.field_type else {
                    return Ok(Some(prop));
                };
                return match ty.own_property(target) {
                    Some(t) if matches!(t.field_type, FieldType::Alias(_)) => Err(Error::unsupported(
                        "property alias",
                        format!("{}::{} -> {} is cyclic", ty.name, name, target),
                    )),
                    Some(t) => Ok(Some(t)),
                    None => Err(Error::unsupported(
                        "property alias",
                        format!("{}::{} -> {} not found", ty.name, name, target),
                    )),
                };
            }
            depth += 1;
            if depth > 64 {
                break;
            }
            current = ty.parent.as_deref().and_then(|p| self.find(p));
        }
        Ok(None)
    }

    /// Every property of `type_name` and its parents, parents first.
    pub fn all_properties(&self, type_name: &str) -> Vec<&PropertyDescriptor> {
        let mut chain = Vec::new();
        let mut current = self.find(type_name);
        while let Some(ty) = current {
            if chain.len() > 64 {
                break;
            }
            chain.push(ty);
            current = ty.parent.as_deref().and_then(|p| self.find(p));
        }
        chain.iter().rev().flat_map(|t| t.properties.iter()).collect()
    }

    /// Default values of every declared property, parents first.
    pub fn defaults(&self, type_name: &str) -> crate::object::PropertyBag {
        let mut bag = crate::object::PropertyBag::new();
        for prop in self.all_properties(type_name) {
            if let Some(value) = prop.default_value(self) {
                bag.set(&prop.name, value);
            }
        }
        bag
    }

    pub fn default_struct(&self, type_name: &str) -> crate::object::StructValue {
        let mut value = crate::object::StructValue::new(type_name);
        // native structs start empty; their reader fills every field
        if self.find(type_name).is_some_and(|t| t.native.is_none()) {
            value.fields = self.defaults(type_name);
        }
        value
    }
}
