//! Built-in types: the root object class and the math structs every
//! generation serializes with a fixed binary layout.

use crate::archive::Archive;
use crate::object::{StructValue, Value};
use crate::property::registry::{TypeDescriptor, TypeRegistry};
use crate::property::tag::Linker;
use crate::Result;

fn floats(ar: &mut dyn Archive, type_name: &str, fields: &[&str]) -> Result<Value> {
    let mut value = StructValue::new(type_name);
    for field in fields {
        value.fields.set(field, Value::Float(ar.read_f32()?));
    }
    Ok(Value::Struct(value))
}

fn read_vector(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    floats(ar, "Vector", &["X", "Y", "Z"])
}

fn read_vector2d(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    floats(ar, "Vector2D", &["X", "Y"])
}

fn read_vector4(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    floats(ar, "Vector4", &["X", "Y", "Z", "W"])
}

fn read_plane(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    floats(ar, "Plane", &["X", "Y", "Z", "W"])
}

fn read_quat(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    floats(ar, "Quat", &["X", "Y", "Z", "W"])
}

fn read_linear_color(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    floats(ar, "LinearColor", &["R", "G", "B", "A"])
}

/// Integer angles before generation 4, floats after.
fn read_rotator(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    if ar.version().is_ue4() {
        return floats(ar, "Rotator", &["Pitch", "Yaw", "Roll"]);
    }
    let mut value = StructValue::new("Rotator");
    for field in ["Pitch", "Yaw", "Roll"] {
        value.fields.set(field, Value::Int(ar.read_i32()?));
    }
    Ok(Value::Struct(value))
}

fn read_color(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    let mut value = StructValue::new("Color");
    for field in ["R", "G", "B", "A"] {
        value.fields.set(field, Value::Byte(ar.read_u8()?));
    }
    Ok(Value::Struct(value))
}

fn read_int_point(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    let x = ar.read_i32()?;
    let y = ar.read_i32()?;
    Ok(Value::Struct(
        StructValue::new("IntPoint").with("X", Value::Int(x)).with("Y", Value::Int(y)),
    ))
}

fn read_guid(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    let mut value = StructValue::new("Guid");
    for field in ["A", "B", "C", "D"] {
        value.fields.set(field, Value::UInt32(ar.read_u32()?));
    }
    Ok(Value::Struct(value))
}

fn read_box(ar: &mut dyn Archive, linker: &dyn Linker) -> Result<Value> {
    let min = read_vector(ar, linker)?;
    let max = read_vector(ar, linker)?;
    let valid = ar.read_u8()? != 0;
    Ok(Value::Struct(
        StructValue::new("Box")
            .with("Min", min)
            .with("Max", max)
            .with("IsValid", Value::Bool(valid)),
    ))
}

/// Radius follows the center from version 61 on.
fn read_sphere(ar: &mut dyn Archive, _: &dyn Linker) -> Result<Value> {
    if ar.version().file_version >= 61 {
        floats(ar, "Sphere", &["X", "Y", "Z", "R"])
    } else {
        floats(ar, "Sphere", &["X", "Y", "Z"])
    }
}

fn read_bounds(ar: &mut dyn Archive, linker: &dyn Linker) -> Result<Value> {
    let origin = read_vector(ar, linker)?;
    let extent = read_vector(ar, linker)?;
    let radius = ar.read_f32()?;
    Ok(Value::Struct(
        StructValue::new("BoxSphereBounds")
            .with("Origin", origin)
            .with("BoxExtent", extent)
            .with("SphereRadius", Value::Float(radius)),
    ))
}

fn read_matrix(ar: &mut dyn Archive, linker: &dyn Linker) -> Result<Value> {
    let mut value = StructValue::new("Matrix");
    for plane in ["XPlane", "YPlane", "ZPlane", "WPlane"] {
        value.fields.set(plane, read_plane(ar, linker)?);
    }
    Ok(Value::Struct(value))
}

/// Root class and native structs.
pub fn builtin_types() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::new("Object"),
        TypeDescriptor::new("Vector").native(read_vector),
        TypeDescriptor::new("Vector2D").native(read_vector2d),
        TypeDescriptor::new("Vector4").native(read_vector4),
        TypeDescriptor::new("Plane").native(read_plane),
        TypeDescriptor::new("Quat").native(read_quat),
        TypeDescriptor::new("Rotator").native(read_rotator),
        TypeDescriptor::new("Color").native(read_color),
        TypeDescriptor::new("LinearColor").native(read_linear_color),
        TypeDescriptor::new("IntPoint").native(read_int_point),
        TypeDescriptor::new("Guid").native(read_guid),
        TypeDescriptor::new("Box").native(read_box),
        TypeDescriptor::new("Sphere").native(read_sphere),
        TypeDescriptor::new("BoxSphereBounds").native(read_bounds),
        TypeDescriptor::new("Matrix").native(read_matrix),
    ]
}

impl TypeRegistry {
    /// Registry holding the root class and the native math structs.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_all(builtin_types());
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveVersion, ArchiveWriter, MemReader};
    use crate::game::Game;
    use crate::property::tests::TestLinker;
    use crate::property::PropertyDecoder;

    fn read(version: ArchiveVersion, bytes: Vec<u8>, type_name: &str) -> (Value, u64) {
        let registry = TypeRegistry::with_builtins();
        let linker = TestLinker::new(&["None"]);
        let mut r = MemReader::with_version(bytes, version);
        let value = PropertyDecoder::new(&registry, &linker)
            .read_struct(&mut r, type_name)
            .unwrap();
        (value, r.tell())
    }

    #[test]
    fn test_rotator_by_generation() {
        let mut w = ArchiveWriter::new();
        w.write_i32(16384).write_i32(0).write_i32(-16384);
        let (value, pos) = read(ArchiveVersion::new(512, 0, Game::UE3), w.into_inner(), "Rotator");
        assert_eq!(pos, 12);
        assert_eq!(value.as_struct().unwrap().fields.get("Pitch"), Some(&Value::Int(16384)));

        let mut w = ArchiveWriter::new();
        w.write_f32(90.0).write_f32(0.0).write_f32(-90.0);
        let (value, _) = read(ArchiveVersion::new(516, 0, Game::ue4(20)), w.into_inner(), "rotator");
        assert_eq!(value.as_struct().unwrap().fields.get("Roll"), Some(&Value::Float(-90.0)));
    }

    #[test]
    fn test_box_and_color() {
        let mut w = ArchiveWriter::new();
        for v in [-1.0f32, -2.0, -3.0, 1.0, 2.0, 3.0] {
            w.write_f32(v);
        }
        w.write_u8(1);
        let (value, pos) = read(ArchiveVersion::new(512, 0, Game::UE3), w.into_inner(), "Box");
        assert_eq!(pos, 25);
        let bx = value.as_struct().unwrap();
        assert_eq!(bx.fields.get("IsValid"), Some(&Value::Bool(true)));
        let max = bx.fields.get("Max").unwrap().as_struct().unwrap();
        assert_eq!(max.fields.get("Y"), Some(&Value::Float(2.0)));

        let (value, _) = read(ArchiveVersion::new(512, 0, Game::UE3), vec![10, 20, 30, 255], "Color");
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "Color");
        assert_eq!(json["A"], 255);
    }

    #[test]
    fn test_sphere_radius_version() {
        let bytes: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0].iter().flat_map(|f| f.to_le_bytes()).collect();
        let (_, pos) = read(ArchiveVersion::new(60, 0, Game::UE1), bytes.clone(), "Sphere");
        assert_eq!(pos, 12);
        let (_, pos) = read(ArchiveVersion::new(61, 0, Game::UE1), bytes, "Sphere");
        assert_eq!(pos, 16);
    }
}
