//! Property deserialization
//!
//! Objects and structs are serialized as a list of tagged properties. The
//! [`TypeRegistry`] says which properties a type declares and with what
//! type; the [`PropertyDecoder`] walks the tag stream, checks each tag
//! against the registry and fills a [`PropertyBag`](crate::object::PropertyBag).
//!
//! Properties the registry doesn't know are skipped by their tagged size, so
//! partial registries still load every object.

pub mod builtin;
pub mod decode;
pub mod registry;
pub mod tag;

pub use decode::PropertyDecoder;
pub use registry::{FieldType, PropertyDescriptor, TypeDescriptor, TypeRegistry};
pub use tag::{Linker, PropertyTag, WireType};

#[cfg(test)]
pub(crate) mod tests {
    use super::tag::{display_name, read_name_ref};
    use super::Linker;
    use crate::archive::Archive;
    use crate::object::ObjectRef;
    use crate::{Error, Result};

    /// Name table without a package behind it.
    pub(crate) struct TestLinker {
        names: Vec<String>,
    }

    impl TestLinker {
        pub(crate) fn new(names: &[&str]) -> Self {
            Self {
                names: names.iter().map(|n| n.to_string()).collect(),
            }
        }
    }

    impl Linker for TestLinker {
        fn read_name(&self, ar: &mut dyn Archive) -> Result<String> {
            let pos = ar.tell();
            let (index, number) = read_name_ref(ar)?;
            let base = usize::try_from(index)
                .ok()
                .and_then(|i| self.names.get(i))
                .ok_or_else(|| Error::corrupt(pos, format!("bad name index {}", index)))?;
            Ok(display_name(base, number))
        }

        fn object_ref(&self, index: i32) -> ObjectRef {
            ObjectRef {
                index,
                path: (index != 0).then(|| format!("Test.Object{}", index)),
            }
        }
    }
}
