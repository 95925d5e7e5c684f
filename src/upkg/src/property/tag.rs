//! Property tags
//!
//! Every tagged property is preceded by a header naming it and giving its
//! wire type and payload size. The header shape depends on the generation:
//!
//! | Generation | Header |
//! |------------|--------|
//! | 1, 2 | name, info byte (type, size code, array flag), struct name, size, array index |
//! | 3 | name, type, size, index, struct name / bool / enum name |
//! | 4 | as 3, plus struct guid, inner types and property guid |
//!
//! ## Info byte
//!
//! - Bits 0-3: wire type code
//! - Bits 4-6: size code (`1, 2, 4, 12, 16` or a following u8, u16, i32)
//! - Bit 7: array flag; holds the value itself for booleans

use crate::archive::{Archive, ArchiveVersion, Guid};
use crate::game::ue4_ver;
use crate::object::ObjectRef;
use crate::{Error, Result};

/// First generation 3 version whose names carry an instance number.
pub const NAME_NUMBER_VERSION: i32 = 343;
/// Generation 3 booleans switch from int32 to a byte here.
const BOOL_AS_BYTE_VERSION: i32 = 673;
/// Generation 3 byte properties name their enum from here on.
const BYTE_ENUM_NAME_VERSION: i32 = 633;

/// Resolves package-relative names and object indices while properties are
/// decoded. Implemented by the package; tests use a name table.
pub trait Linker {
    /// Read a serialized name reference, including any `_N` instance suffix.
    fn read_name(&self, ar: &mut dyn Archive) -> Result<String>;

    /// Turn a package index into a reference.
    fn object_ref(&self, index: i32) -> ObjectRef;
}

/// Whether name references carry an instance number after the index.
pub fn names_have_number(version: &ArchiveVersion) -> bool {
    version.is_ue4() || (version.is_ue3_or_later() && version.file_version >= NAME_NUMBER_VERSION)
}

/// Raw `(index, number)` of a serialized name reference.
pub fn read_name_ref(ar: &mut dyn Archive) -> Result<(i32, i32)> {
    let index = ar.read_index()?;
    let number = if names_have_number(ar.version()) {
        ar.read_i32()?
    } else {
        0
    };
    Ok((index, number))
}

/// `Base` for number 0, `Base_{number - 1}` otherwise.
pub fn display_name(base: &str, number: i32) -> String {
    if number > 0 {
        format!("{}_{}", base, number - 1)
    } else {
        base.to_string()
    }
}

/// Serialized property type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireType {
    Byte,
    Int,
    Bool,
    Float,
    Object,
    Name,
    Delegate,
    Class,
    Array,
    Struct,
    Vector,
    Rotator,
    Str,
    Map,
    FixedArray,
    Interface,
    Text,
    MulticastDelegate,
    WeakObject,
    LazyObject,
    SoftObject,
    UInt64,
    UInt32,
    UInt16,
    Int64,
    Int16,
    Int8,
    Set,
    Enum,
    Unknown(String),
}

impl WireType {
    /// Type code of the info byte used by generations 1 and 2.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => WireType::Byte,
            2 => WireType::Int,
            3 => WireType::Bool,
            4 => WireType::Float,
            5 => WireType::Object,
            6 => WireType::Name,
            7 => WireType::Delegate,
            8 => WireType::Class,
            9 => WireType::Array,
            10 => WireType::Struct,
            11 => WireType::Vector,
            12 => WireType::Rotator,
            13 => WireType::Str,
            14 => WireType::Map,
            15 => WireType::FixedArray,
            _ => return None,
        })
    }

    /// Parse a type name such as `IntProperty`.
    pub fn from_name(name: &str) -> Self {
        let short = name.strip_suffix("Property").unwrap_or(name);
        match short {
            "Byte" => WireType::Byte,
            "Int" => WireType::Int,
            "Bool" => WireType::Bool,
            "Float" => WireType::Float,
            "Object" => WireType::Object,
            "Name" => WireType::Name,
            "Delegate" => WireType::Delegate,
            "Class" => WireType::Class,
            "Array" => WireType::Array,
            "Struct" => WireType::Struct,
            "Vector" => WireType::Vector,
            "Rotator" => WireType::Rotator,
            "Str" => WireType::Str,
            "Map" => WireType::Map,
            "FixedArray" => WireType::FixedArray,
            "Interface" => WireType::Interface,
            "Text" => WireType::Text,
            "MulticastDelegate" => WireType::MulticastDelegate,
            "WeakObject" => WireType::WeakObject,
            "LazyObject" => WireType::LazyObject,
            "SoftObject" | "AssetObject" => WireType::SoftObject,
            "UInt64" => WireType::UInt64,
            "UInt32" => WireType::UInt32,
            "UInt16" => WireType::UInt16,
            "Int64" => WireType::Int64,
            "Int16" => WireType::Int16,
            "Int8" => WireType::Int8,
            "Set" => WireType::Set,
            "Enum" => WireType::Enum,
            _ => WireType::Unknown(name.to_string()),
        }
    }

    pub fn name(&self) -> String {
        match self {
            WireType::Unknown(name) => name.clone(),
            other => format!("{:?}Property", other),
        }
    }
}

/// Decoded property header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyTag {
    pub name: String,
    pub wire_type: WireType,
    /// Payload size following the header.
    pub size: i32,
    pub array_index: i32,
    pub struct_name: Option<String>,
    pub enum_name: Option<String>,
    /// Booleans carry their value in the header.
    pub bool_value: bool,
    pub inner_type: Option<WireType>,
    pub value_type: Option<WireType>,
    pub struct_guid: Option<Guid>,
    pub property_guid: Option<Guid>,
}

impl PropertyTag {
    fn new(name: String, wire_type: WireType) -> Self {
        Self {
            name,
            wire_type,
            size: 0,
            array_index: 0,
            struct_name: None,
            enum_name: None,
            bool_value: false,
            inner_type: None,
            value_type: None,
            struct_guid: None,
            property_guid: None,
        }
    }

    /// Read the next tag. Returns `None` at the `None` terminator.
    pub fn read(ar: &mut dyn Archive, linker: &dyn Linker) -> Result<Option<Self>> {
        let name = linker.read_name(ar)?;
        if name == "None" {
            return Ok(None);
        }
        let version = *ar.version();
        let tag = if version.is_ue4() {
            Self::read_ue4(ar, linker, name)?
        } else if version.is_ue3_or_later() {
            Self::read_ue3(ar, linker, name)?
        } else {
            Self::read_info_byte(ar, linker, name)?
        };
        Ok(Some(tag))
    }

    fn read_info_byte(ar: &mut dyn Archive, linker: &dyn Linker, name: String) -> Result<Self> {
        let pos = ar.tell();
        let info = ar.read_u8()?;
        let code = info & 0x0F;
        let wire_type = WireType::from_code(code)
            .ok_or_else(|| Error::corrupt(pos, format!("property {}: unknown type code {}", name, code)))?;
        let is_array = info & 0x80 != 0;

        let mut tag = Self::new(name, wire_type);
        if tag.wire_type == WireType::Struct {
            tag.struct_name = Some(linker.read_name(ar)?);
        }
        tag.size = match (info >> 4) & 7 {
            0 => 1,
            1 => 2,
            2 => 4,
            3 => 12,
            4 => 16,
            5 => ar.read_u8()? as i32,
            6 => ar.read_u16()? as i32,
            _ => ar.read_i32()?,
        };
        if tag.wire_type == WireType::Bool {
            tag.bool_value = is_array;
        } else if is_array {
            tag.array_index = read_array_index(ar)?;
        }
        Ok(tag)
    }

    fn read_ue3(ar: &mut dyn Archive, linker: &dyn Linker, name: String) -> Result<Self> {
        let pos = ar.tell();
        let type_name = linker.read_name(ar)?;
        let wire_type = WireType::from_name(&type_name);
        if let WireType::Unknown(t) = &wire_type {
            return Err(Error::corrupt(pos, format!("property {}: unknown type {}", name, t)));
        }
        let mut tag = Self::new(name, wire_type);
        tag.size = ar.read_i32()?;
        tag.array_index = ar.read_i32()?;
        let file_version = ar.version().file_version;
        match tag.wire_type {
            WireType::Struct => tag.struct_name = Some(linker.read_name(ar)?),
            WireType::Bool if file_version < BOOL_AS_BYTE_VERSION => tag.bool_value = ar.read_i32()? != 0,
            WireType::Bool => tag.bool_value = ar.read_u8()? != 0,
            WireType::Byte if file_version >= BYTE_ENUM_NAME_VERSION => {
                tag.enum_name = Some(linker.read_name(ar)?)
            }
            _ => {}
        }
        Ok(tag)
    }

    fn read_ue4(ar: &mut dyn Archive, linker: &dyn Linker, name: String) -> Result<Self> {
        let type_name = linker.read_name(ar)?;
        let wire_type = WireType::from_name(&type_name);
        if let WireType::Unknown(t) = &wire_type {
            // payload is still skippable by size
            tracing::warn!("property {}: unknown type {}", name, t);
        }
        let mut tag = Self::new(name, wire_type);
        tag.size = ar.read_i32()?;
        tag.array_index = ar.read_i32()?;
        let file_version = ar.version().file_version;
        match tag.wire_type {
            WireType::Struct => {
                tag.struct_name = Some(linker.read_name(ar)?);
                if file_version >= ue4_ver::STRUCT_GUID_IN_PROPERTY_TAG {
                    tag.struct_guid = Some(ar.read_guid()?);
                }
            }
            WireType::Bool => tag.bool_value = ar.read_u8()? != 0,
            WireType::Byte | WireType::Enum => tag.enum_name = Some(linker.read_name(ar)?),
            WireType::Array if file_version >= ue4_ver::ARRAY_PROPERTY_INNER_TAGS => {
                tag.inner_type = Some(WireType::from_name(&linker.read_name(ar)?));
            }
            WireType::Set if file_version >= ue4_ver::PROPERTY_TAG_SET_MAP_SUPPORT => {
                tag.inner_type = Some(WireType::from_name(&linker.read_name(ar)?));
            }
            WireType::Map if file_version >= ue4_ver::PROPERTY_TAG_SET_MAP_SUPPORT => {
                tag.inner_type = Some(WireType::from_name(&linker.read_name(ar)?));
                tag.value_type = Some(WireType::from_name(&linker.read_name(ar)?));
            }
            _ => {}
        }
        if file_version >= ue4_ver::PROPERTY_GUID_IN_PROPERTY_TAG && ar.read_u8()? != 0 {
            tag.property_guid = Some(ar.read_guid()?);
        }
        Ok(tag)
    }

    /// Struct type carried by the tag, implied for the old vector and
    /// rotator codes.
    pub fn struct_type(&self) -> Option<&str> {
        match self.wire_type {
            WireType::Vector => Some("Vector"),
            WireType::Rotator => Some("Rotator"),
            _ => self.struct_name.as_deref(),
        }
    }
}

/// Variable-length array index: one byte below 128, otherwise two bytes
/// (14 bits) or, with bit 6 set, four bytes (22 bits).
fn read_array_index(ar: &mut dyn Archive) -> Result<i32> {
    let b = ar.read_u8()? as i32;
    if b < 128 {
        return Ok(b);
    }
    let b2 = ar.read_u8()? as i32;
    if b & 0x40 == 0 {
        return Ok(((b << 8) | b2) & 0x3FFF);
    }
    let b3 = ar.read_u8()? as i32;
    let b4 = ar.read_u8()? as i32;
    Ok(((b << 24) | (b2 << 16) | (b3 << 8) | b4) & 0x3F_FFFF)
}
