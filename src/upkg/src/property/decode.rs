//! Tagged property decoding
//!
//! Reads the `tag, payload, tag, payload, ..., None` stream that precedes the
//! class-specific data of every object and of every non-native struct.

use crate::archive::Archive;
use crate::game::{ue4_ver, Engine};
use crate::object::{PropertyBag, Value};
use crate::property::registry::{FieldType, PropertyDescriptor, TypeRegistry};
use crate::property::tag::{Linker, PropertyTag, WireType};
use crate::stats::RunStats;
use crate::{Error, Result, ResultExt};

/// Decodes property streams for one package.
pub struct PropertyDecoder<'a> {
    registry: &'a TypeRegistry,
    linker: &'a dyn Linker,
    stats: Option<&'a RunStats>,
}

impl<'a> PropertyDecoder<'a> {
    pub fn new(registry: &'a TypeRegistry, linker: &'a dyn Linker) -> Self {
        Self {
            registry,
            linker,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: &'a RunStats) -> Self {
        self.stats = Some(stats);
        self
    }

    fn warn(&self) {
        if let Some(stats) = self.stats {
            stats.warning();
        }
    }

    /// Decode tagged properties of `type_name` into `bag` up to the `None`
    /// terminator.
    pub fn read_properties(&self, ar: &mut dyn Archive, type_name: &str, bag: &mut PropertyBag) -> Result<()> {
        loop {
            let tag_pos = ar.tell();
            let Some(tag) = PropertyTag::read(ar, self.linker).with_context(|| format!("property tag at {}", tag_pos))?
            else {
                return Ok(());
            };
            tracing::debug!(
                "{}::{}[{}] {} size={}",
                type_name,
                tag.name,
                tag.array_index,
                tag.wire_type.name(),
                tag.size
            );
            self.read_property(ar, type_name, &tag, bag)
                .with_context(|| format!("{}.{}", type_name, tag.name))?;
        }
    }

    /// Read one struct instance: natively when the type has a fixed
    /// layout, as tagged properties otherwise.
    pub fn read_struct(&self, ar: &mut dyn Archive, type_name: &str) -> Result<Value> {
        let descriptor = self
            .registry
            .find(type_name)
            .ok_or_else(|| Error::NotFound(format!("struct type {}", type_name)))?;
        if let Some(native) = descriptor.native {
            return native(ar, self.linker);
        }
        let mut value = self.registry.default_struct(type_name);
        self.read_properties(ar, &descriptor.name, &mut value.fields)?;
        Ok(Value::Struct(value))
    }

    fn read_property(&self, ar: &mut dyn Archive, type_name: &str, tag: &PropertyTag, bag: &mut PropertyBag) -> Result<()> {
        let start = ar.tell();
        if tag.size < 0 {
            return Err(Error::corrupt(start, format!("negative property size {}", tag.size)));
        }
        let mut stop = start + tag.size as u64;

        let prop = match self.registry.find_property(type_name, &tag.name)? {
            Some(prop) if !prop.is_dropped() => prop,
            found => {
                if found.is_none() {
                    tracing::warn!("{}: unknown {} {}", tag.wire_type.name(), type_name, tag.name);
                    self.warn();
                }
                return self.skip(ar, tag, stop);
            }
        };

        if tag.wire_type == WireType::Array {
            if !(prop.is_dynamic_array() && tag.array_index == 0) {
                tracing::warn!(
                    "{}: {} has count {} and index {}, skipping",
                    type_name,
                    prop.name,
                    prop.array_count,
                    tag.array_index
                );
                self.warn();
                return self.skip(ar, tag, stop);
            }
        } else if tag.array_index < 0 || tag.array_index >= prop.array_count {
            return Err(Error::corrupt(
                start,
                format!("{}[{}]: invalid index {}", prop.name, prop.array_count, tag.array_index),
            ));
        }

        let value = match tag.wire_type {
            WireType::Byte => self.read_byte(ar, tag, prop)?,
            WireType::Int => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::Int))?;
                Value::Int(ar.read_i32()?)
            }
            WireType::Bool => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::Bool))?;
                Value::Bool(tag.bool_value)
            }
            WireType::Float => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::Float))?;
                Value::Float(ar.read_f32()?)
            }
            WireType::Object | WireType::Class | WireType::WeakObject => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::Object))?;
                Value::Object(self.linker.object_ref(ar.read_index()?))
            }
            WireType::Name => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::Name))?;
                Value::Name(self.linker.read_name(ar)?)
            }
            WireType::Str => match prop.field_type {
                // some titles store name fields as strings
                FieldType::Name => Value::Name(ar.read_fstring()?),
                _ => {
                    self.check(tag, prop, matches!(prop.field_type, FieldType::Str))?;
                    Value::Str(ar.read_fstring()?)
                }
            },
            WireType::Int8 => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::Int8))?;
                Value::Int8(ar.read_i8()?)
            }
            WireType::Int16 => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::Int16))?;
                Value::Int16(ar.read_i16()?)
            }
            WireType::Int64 => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::Int64))?;
                Value::Int64(ar.read_i64()?)
            }
            WireType::UInt16 => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::UInt16))?;
                Value::UInt16(ar.read_u16()?)
            }
            WireType::UInt32 => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::UInt32))?;
                Value::UInt32(ar.read_u32()?)
            }
            WireType::UInt64 => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::UInt64))?;
                Value::UInt64(ar.read_u64()?)
            }
            WireType::SoftObject => {
                self.check(tag, prop, matches!(prop.field_type, FieldType::SoftObject))?;
                self.read_soft_object(ar)?
            }
            WireType::Enum => {
                let FieldType::Enum(enum_name) = &prop.field_type else {
                    return Err(self.mismatch(tag, prop));
                };
                let member = self.linker.read_name(ar)?;
                self.enum_value(enum_name, member)
            }
            WireType::Struct | WireType::Vector | WireType::Rotator => {
                let Some(value) = self.read_struct_property(ar, type_name, tag, prop, stop)? else {
                    return Ok(());
                };
                stop = stop.max(ar.tell());
                value
            }
            WireType::Array => {
                let Some(value) = self.read_array(ar, type_name, prop, stop)? else {
                    return Ok(());
                };
                let pos = ar.tell();
                let count = value.as_array().map_or(0, |a| a.len());
                if pos + 1 == stop && count == 1 && matches!(prop.field_type, FieldType::Struct(_)) {
                    ar.seek(stop)?;
                } else if pos > stop {
                    stop = pos;
                }
                value
            }
            _ => {
                return Err(Error::unsupported("property type", tag.wire_type.name()));
            }
        };

        store(bag, prop, tag.array_index as usize, value, self.registry);

        let pos = ar.tell();
        if pos != stop {
            tracing::warn!(
                "{}.{}: property read error: {} unread bytes",
                type_name,
                tag.name,
                stop as i64 - pos as i64
            );
            self.warn();
            ar.seek(stop)?;
        }
        Ok(())
    }

    fn skip(&self, ar: &mut dyn Archive, tag: &PropertyTag, stop: u64) -> Result<()> {
        if tag.wire_type == WireType::Bool && tag.size != 0 {
            // the value lives in the tag; seeking would lose the next one
            tracing::warn!("skipping BoolProperty {} with size {}", tag.name, tag.size);
            self.warn();
            return Ok(());
        }
        ar.seek(stop)
    }

    fn mismatch(&self, tag: &PropertyTag, prop: &PropertyDescriptor) -> Error {
        Error::TypeMismatch {
            property: tag.name.clone(),
            expected: prop.field_type.name(),
            actual: tag.wire_type.name(),
        }
    }

    fn check(&self, tag: &PropertyTag, prop: &PropertyDescriptor, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(self.mismatch(tag, prop))
        }
    }

    fn enum_value(&self, enum_name: &str, member: String) -> Value {
        let value = self.registry.enum_value(enum_name, &member);
        if value.is_none() && member != "None" {
            tracing::warn!("unknown member {} of enum {}", member, enum_name);
            self.warn();
        }
        Value::Enum { member, value }
    }

    fn read_byte(&self, ar: &mut dyn Archive, tag: &PropertyTag, prop: &PropertyDescriptor) -> Result<Value> {
        if tag.size != 1 {
            // enum stored by member name
            let member = self.linker.read_name(ar)?;
            return match &prop.field_type {
                FieldType::Enum(enum_name) => Ok(self.enum_value(enum_name, member)),
                FieldType::Byte => {
                    tracing::debug!("enum property {} = {}", tag.name, member);
                    Ok(Value::Enum { member, value: None })
                }
                _ => Err(self.mismatch(tag, prop)),
            };
        }
        let byte = ar.read_u8()?;
        match &prop.field_type {
            FieldType::Enum(enum_name) => Ok(Value::Enum {
                member: self
                    .registry
                    .enum_member(enum_name, byte)
                    .map(str::to_string)
                    .unwrap_or_else(|| byte.to_string()),
                value: Some(byte),
            }),
            FieldType::Byte => Ok(Value::Byte(byte)),
            _ => Err(self.mismatch(tag, prop)),
        }
    }

    fn read_soft_object(&self, ar: &mut dyn Archive) -> Result<Value> {
        if ar.version().file_version >= ue4_ver::ADDED_SOFT_OBJECT_PATH {
            let asset = self.linker.read_name(ar)?;
            let sub_path = ar.read_fstring()?;
            Ok(Value::SoftObject(if sub_path.is_empty() {
                asset
            } else {
                format!("{}:{}", asset, sub_path)
            }))
        } else {
            Ok(Value::SoftObject(ar.read_fstring()?))
        }
    }

    fn read_struct_property(
        &self,
        ar: &mut dyn Archive,
        type_name: &str,
        tag: &PropertyTag,
        prop: &PropertyDescriptor,
        stop: u64,
    ) -> Result<Option<Value>> {
        let FieldType::Struct(declared) = &prop.field_type else {
            return Err(self.mismatch(tag, prop));
        };
        let wire = tag.struct_type().unwrap_or("None");
        if !wire.eq_ignore_ascii_case(declared) && !wire.eq_ignore_ascii_case("None") {
            tracing::warn!(
                "struct property {}.{} expected type {} but read {}",
                type_name,
                tag.name,
                declared,
                wire
            );
            self.warn();
            ar.seek(stop)?;
            return Ok(None);
        }
        if self.registry.find(declared).is_none() {
            tracing::warn!("unknown structure type {}", declared);
            self.warn();
            ar.seek(stop)?;
            return Ok(None);
        }
        Ok(Some(self.read_struct(ar, declared)?))
    }

    fn read_array_count(&self, ar: &mut dyn Archive) -> Result<usize> {
        let pos = ar.tell();
        let count = if ar.version().engine() >= Engine::UE3 {
            ar.read_i32()?
        } else {
            ar.read_compact_index()?
        };
        let remaining = ar.len().saturating_sub(ar.tell());
        if count < 0 || count as u64 > remaining {
            return Err(Error::corrupt(pos, format!("array count {} with {} bytes left", count, remaining)));
        }
        Ok(count as usize)
    }

    fn read_array(&self, ar: &mut dyn Archive, type_name: &str, prop: &PropertyDescriptor, stop: u64) -> Result<Option<Value>> {
        let count = self.read_array_count(ar)?;
        let version = *ar.version();

        if let FieldType::Struct(element) = &prop.field_type {
            if version.is_ue4() && version.file_version >= ue4_ver::INNER_ARRAY_TAG_INFO {
                // describes the element type only
                PropertyTag::read(ar, self.linker)?;
            }
            if self.registry.find(element).is_none() {
                tracing::warn!(
                    "structure type {} is unknown, skipping array {}::{}",
                    element,
                    type_name,
                    prop.name
                );
                self.warn();
                ar.seek(stop)?;
                return Ok(None);
            }
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                items.push(self.read_struct(ar, element).with_context(|| format!("item {}", i))?);
            }
            return Ok(Some(Value::Array(items)));
        }

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read_element(ar, &prop.field_type)?);
        }
        Ok(Some(Value::Array(items)))
    }

    /// Untagged array element of a simple type.
    fn read_element(&self, ar: &mut dyn Archive, field_type: &FieldType) -> Result<Value> {
        Ok(match field_type {
            FieldType::Byte => Value::Byte(ar.read_u8()?),
            FieldType::Int => Value::Int(ar.read_i32()?),
            FieldType::Bool => Value::Bool(ar.read_u8()? != 0),
            FieldType::Float => Value::Float(ar.read_f32()?),
            FieldType::Name => Value::Name(self.linker.read_name(ar)?),
            FieldType::Str => Value::Str(ar.read_fstring()?),
            FieldType::Object => Value::Object(self.linker.object_ref(ar.read_index()?)),
            FieldType::Int8 => Value::Int8(ar.read_i8()?),
            FieldType::Int16 => Value::Int16(ar.read_i16()?),
            FieldType::Int64 => Value::Int64(ar.read_i64()?),
            FieldType::UInt16 => Value::UInt16(ar.read_u16()?),
            FieldType::UInt32 => Value::UInt32(ar.read_u32()?),
            FieldType::UInt64 => Value::UInt64(ar.read_u64()?),
            FieldType::SoftObject => self.read_soft_object(ar)?,
            FieldType::Enum(enum_name) => {
                if ar.version().is_ue4() {
                    let member = self.linker.read_name(ar)?;
                    self.enum_value(enum_name, member)
                } else {
                    let byte = ar.read_u8()?;
                    Value::Enum {
                        member: self
                            .registry
                            .enum_member(enum_name, byte)
                            .map(str::to_string)
                            .unwrap_or_else(|| byte.to_string()),
                        value: Some(byte),
                    }
                }
            }
            FieldType::Struct(element) => self.read_struct(ar, element)?,
            FieldType::Alias(target) => return Err(Error::unsupported("array element alias", target)),
        })
    }
}

/// Put `value` into its slot: the whole property, or one element of a
/// fixed array.
fn store(bag: &mut PropertyBag, prop: &PropertyDescriptor, index: usize, value: Value, registry: &TypeRegistry) {
    if prop.array_count == 1 || prop.is_dynamic_array() {
        bag.set(&prop.name, value);
        return;
    }
    let count = prop.array_count.max(0) as usize;
    if !matches!(bag.get(&prop.name), Some(Value::Array(items)) if items.len() == count) {
        bag.set(
            &prop.name,
            Value::Array(vec![prop.field_type.default_value(registry); count]),
        );
    }
    if let Some(Value::Array(items)) = bag.get_mut(&prop.name) {
        if let Some(slot) = items.get_mut(index) {
            *slot = value;
        }
    }
}
