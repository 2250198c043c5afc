//! Capability-described remote objects.
//!
//! A type becomes remotely reachable by implementing [`Exposed`]: it hands out a
//! [`Capabilities`] table, built once, naming its callable methods (with their
//! parameter names) and its readable/writable attributes. Every `Exposed` type
//! is a [`RemoteObject`], the object-safe view the registry and dispatcher use.

use super::registry::{ObjectRef, Registry};
use super::value::Value;
use crate::error::{Fault, RegistryError};
use crate::interface::is_reserved;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Per-call context handed to methods and accessors.
pub struct CallContext<'a> {
    registry: &'a Registry,
}

impl<'a> CallContext<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// Register a new object so it can be returned by reference.
    pub fn register<T: Exposed>(&self, object: Arc<T>) -> Result<ObjectRef, Fault> {
        self.registry.register(object).map_err(Fault::from)
    }

    pub fn lookup(&self, id: u64) -> Result<ObjectRef, RegistryError> {
        self.registry.lookup(id)
    }
}

/// Parameters of a request after reference resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Positional(Vec<Value>),
    Named(BTreeMap<String, Value>),
}

impl Params {
    /// Bind to declared parameter names, producing one slot per name.
    fn bind(self, method: &str, names: &'static [&'static str]) -> Result<Args, Fault> {
        let mut slots: Vec<Option<Value>> = vec![None; names.len()];
        match self {
            Params::Positional(values) => {
                if values.len() > names.len() {
                    return Err(Fault::type_error(format!(
                        "{}() takes {} positional arguments but {} were given",
                        method,
                        names.len(),
                        values.len()
                    )));
                }
                for (slot, value) in slots.iter_mut().zip(values) {
                    *slot = Some(value);
                }
            }
            Params::Named(values) => {
                for (key, value) in values {
                    let index = names.iter().position(|n| *n == key).ok_or_else(|| {
                        Fault::type_error(format!(
                            "{}() got an unexpected keyword argument '{}'",
                            method, key
                        ))
                    })?;
                    slots[index] = Some(value);
                }
            }
        }
        Ok(Args {
            method: method.to_string(),
            names,
            slots,
        })
    }
}

/// Arguments bound to a method's declared parameter names.
#[derive(Debug, Clone)]
pub struct Args {
    method: String,
    names: &'static [&'static str],
    slots: Vec<Option<Value>>,
}

impl Args {
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Required argument; a missing one is a `TypeError`.
    pub fn required(&self, index: usize) -> Result<&Value, Fault> {
        self.get(index).ok_or_else(|| self.missing(index))
    }

    /// Move a required argument out.
    pub fn take(&mut self, index: usize) -> Result<Value, Fault> {
        let missing = self.missing(index);
        self.slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(missing)
    }

    pub fn str(&self, index: usize) -> Result<&str, Fault> {
        self.required(index)?.as_str().ok_or_else(|| {
            Fault::type_error(format!("argument '{}' must be a string", self.name(index)))
        })
    }

    pub fn i64(&self, index: usize) -> Result<i64, Fault> {
        self.required(index)?.as_i64().ok_or_else(|| {
            Fault::type_error(format!("argument '{}' must be an integer", self.name(index)))
        })
    }

    pub fn object(&self, index: usize) -> Result<&ObjectRef, Fault> {
        self.required(index)?.as_object().ok_or_else(|| {
            Fault::attribute(format!(
                "argument '{}' is not an object reference",
                self.name(index)
            ))
        })
    }

    fn name(&self, index: usize) -> &str {
        self.names.get(index).copied().unwrap_or("?")
    }

    fn missing(&self, index: usize) -> Fault {
        Fault::type_error(format!(
            "{}() missing required argument '{}'",
            self.method,
            self.name(index)
        ))
    }
}

type MethodFn<T> = Box<dyn Fn(&T, &CallContext<'_>, Args) -> Result<Value, Fault> + Send + Sync>;
type GetterFn<T> = Box<dyn Fn(&T, &CallContext<'_>) -> Result<Value, Fault> + Send + Sync>;
type SetterFn<T> = Box<dyn Fn(&T, &CallContext<'_>, Value) -> Result<(), Fault> + Send + Sync>;
type FallbackFn<T> =
    Box<dyn Fn(&T, &CallContext<'_>, &str) -> Option<Result<Value, Fault>> + Send + Sync>;

struct MethodEntry<T> {
    params: &'static [&'static str],
    call: MethodFn<T>,
}

struct AttrEntry<T> {
    get: GetterFn<T>,
    set: Option<SetterFn<T>>,
}

/// Method and attribute table of one exposed type.
pub struct Capabilities<T> {
    methods: BTreeMap<&'static str, MethodEntry<T>>,
    attrs: BTreeMap<&'static str, AttrEntry<T>>,
    fallback: Option<FallbackFn<T>>,
}

impl<T> Capabilities<T> {
    pub fn builder() -> CapabilitiesBuilder<T> {
        CapabilitiesBuilder {
            caps: Capabilities {
                methods: BTreeMap::new(),
                attrs: BTreeMap::new(),
                fallback: None,
            },
        }
    }
}

/// Builder for [`Capabilities`].
///
/// Reserved protocol names and names already taken by the other member kind
/// are refused with a warning.
pub struct CapabilitiesBuilder<T> {
    caps: Capabilities<T>,
}

impl<T> CapabilitiesBuilder<T> {
    fn accepts(&self, name: &'static str) -> bool {
        if is_reserved(name) {
            warn!("Refusing to expose reserved member {}", name);
            return false;
        }
        if self.caps.methods.contains_key(name) || self.caps.attrs.contains_key(name) {
            warn!("Member {} is already exposed", name);
            return false;
        }
        true
    }

    /// Expose a method with its parameter names.
    pub fn method<F>(mut self, name: &'static str, params: &'static [&'static str], call: F) -> Self
    where
        F: Fn(&T, &CallContext<'_>, Args) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        if self.accepts(name) {
            self.caps.methods.insert(
                name,
                MethodEntry {
                    params,
                    call: Box::new(call),
                },
            );
        }
        self
    }

    /// Expose a read-only attribute.
    pub fn getter<G>(mut self, name: &'static str, get: G) -> Self
    where
        G: Fn(&T, &CallContext<'_>) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        if self.accepts(name) {
            self.caps.attrs.insert(
                name,
                AttrEntry {
                    get: Box::new(get),
                    set: None,
                },
            );
        }
        self
    }

    /// Expose a writable attribute.
    pub fn attr<G, S>(mut self, name: &'static str, get: G, set: S) -> Self
    where
        G: Fn(&T, &CallContext<'_>) -> Result<Value, Fault> + Send + Sync + 'static,
        S: Fn(&T, &CallContext<'_>, Value) -> Result<(), Fault> + Send + Sync + 'static,
    {
        if self.accepts(name) {
            self.caps.attrs.insert(
                name,
                AttrEntry {
                    get: Box::new(get),
                    set: Some(Box::new(set)),
                },
            );
        }
        self
    }

    /// Resolve attribute names not in the table (e.g. numeric object ids).
    ///
    /// Names resolved here are reachable but not listed in the descriptor.
    pub fn fallback<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&T, &CallContext<'_>, &str) -> Option<Result<Value, Fault>> + Send + Sync + 'static,
    {
        self.caps.fallback = Some(Box::new(resolve));
        self
    }

    pub fn build(self) -> Capabilities<T> {
        self.caps
    }
}

/// A type whose instances can be registered and called remotely.
///
/// ```rust,ignore
/// impl Exposed for Counter {
///     const CLASS: &'static str = "Counter";
///
///     fn capabilities() -> &'static Capabilities<Self> {
///         static CAPS: OnceLock<Capabilities<Counter>> = OnceLock::new();
///         CAPS.get_or_init(|| {
///             Capabilities::<Self>::builder()
///                 .method("increment", &["by"], |c, _, args| c.increment(args.i64(0)?))
///                 .getter("value", |c, _| Ok(c.value().into()))
///                 .build()
///         })
///     }
/// }
/// ```
pub trait Exposed: Send + Sync + Sized + 'static {
    /// Name reported in the interface descriptor.
    const CLASS: &'static str;

    fn capabilities() -> &'static Capabilities<Self>;
}

/// Object-safe view of an exposed object.
pub trait RemoteObject: Send + Sync + 'static {
    fn class_name(&self) -> &str;

    fn method_names(&self) -> Vec<String>;

    fn attribute_names(&self) -> Vec<String>;

    fn has_method(&self, name: &str) -> bool;

    fn call(&self, cx: &CallContext<'_>, method: &str, params: Params) -> Result<Value, Fault>;

    fn get_attr(&self, cx: &CallContext<'_>, name: &str) -> Result<Value, Fault>;

    fn set_attr(&self, cx: &CallContext<'_>, name: &str, value: Value) -> Result<(), Fault>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Exposed> RemoteObject for T {
    fn class_name(&self) -> &str {
        T::CLASS
    }

    fn method_names(&self) -> Vec<String> {
        T::capabilities()
            .methods
            .keys()
            .map(|name| name.to_string())
            .collect()
    }

    fn attribute_names(&self) -> Vec<String> {
        T::capabilities()
            .attrs
            .keys()
            .map(|name| name.to_string())
            .collect()
    }

    fn has_method(&self, name: &str) -> bool {
        T::capabilities().methods.contains_key(name)
    }

    fn call(&self, cx: &CallContext<'_>, method: &str, params: Params) -> Result<Value, Fault> {
        let entry = T::capabilities().methods.get(method).ok_or_else(|| {
            Fault::attribute(format!("'{}' object has no method '{}'", T::CLASS, method))
        })?;
        let args = params.bind(method, entry.params)?;
        (entry.call)(self, cx, args)
    }

    fn get_attr(&self, cx: &CallContext<'_>, name: &str) -> Result<Value, Fault> {
        let caps = T::capabilities();
        if let Some(entry) = caps.attrs.get(name) {
            return (entry.get)(self, cx);
        }
        if let Some(resolved) = caps.fallback.as_ref().and_then(|f| f(self, cx, name)) {
            return resolved;
        }
        Err(Fault::attribute(format!(
            "'{}' object has no attribute '{}'",
            T::CLASS,
            name
        )))
    }

    fn set_attr(&self, cx: &CallContext<'_>, name: &str, value: Value) -> Result<(), Fault> {
        match T::capabilities().attrs.get(name) {
            Some(AttrEntry { set: Some(set), .. }) => set(self, cx, value),
            Some(_) => Err(Fault::attribute(format!(
                "can't set attribute '{}' of '{}' object",
                name,
                T::CLASS
            ))),
            None => Err(Fault::attribute(format!(
                "'{}' object has no attribute '{}'",
                T::CLASS,
                name
            ))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
