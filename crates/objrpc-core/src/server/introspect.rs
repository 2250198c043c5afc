//! Interface descriptors for registered objects.

use super::registry::ObjectRef;
use crate::interface::{is_reserved, InterfaceDescriptor};

/// Describe a registered object. Computed on every call, never cached.
pub fn describe(obj: &ObjectRef) -> InterfaceDescriptor {
    let object = obj.object();
    InterfaceDescriptor {
        name: object.class_name().to_string(),
        hash: obj.id(),
        attrs: object
            .attribute_names()
            .into_iter()
            .filter(|name| !is_reserved(name))
            .collect(),
        funcs: object
            .method_names()
            .into_iter()
            .filter(|name| !is_reserved(name))
            .collect(),
    }
}
