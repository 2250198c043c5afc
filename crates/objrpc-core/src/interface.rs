//! Interface descriptors: the introspection document a proxy is built from.

use crate::protocol::reference_token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Dispatch-internal member names. Never exposed, never listed.
pub const RESERVED_MEMBERS: &[&str] = &[
    "__interface__",
    "__jsoncall__",
    "__jsoncall_one__",
    "__class__",
    "make_result",
    "make_error",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_MEMBERS.contains(&name)
}

/// `{name, hash, attrs, funcs}` as returned by `__interface__`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub hash: u64,
    #[serde(default)]
    pub attrs: BTreeSet<String>,
    #[serde(default)]
    pub funcs: BTreeSet<String>,
}

impl InterfaceDescriptor {
    /// `hash:<id>` of the described object.
    pub fn self_ref(&self) -> String {
        reference_token(self.hash)
    }

    pub fn has_func(&self, name: &str) -> bool {
        self.funcs.contains(name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains(name)
    }

    /// Every callable and readable member, sorted.
    pub fn members(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .funcs
            .iter()
            .chain(self.attrs.iter())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}
