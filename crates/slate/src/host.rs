//! Host-object introspection.
//!
//! Templates reach into host data through attribute access (`user.name`),
//! method calls (`user.greet("hi")`) and FOREACH. A host type opts in by
//! implementing [`HostObject`] and describing its accessible surface once in a
//! [`TypeDescriptor`]. Descriptors are memoized process-wide per concrete type,
//! so [`HostObject::descriptor`] runs at most once per type no matter how many
//! renders touch it.

use std::{
    any::{Any, TypeId},
    fmt,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

use ahash::AHashMap;

use crate::value::Value;

/// A value owned by the embedding application.
pub trait HostObject: Any + fmt::Debug + Send + Sync {
    /// Upcast used by descriptor accessors to recover the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Describes the fields, methods and iteration of this type.
    ///
    /// Called once per concrete type; the result is cached.
    fn descriptor(&self) -> TypeDescriptor;

    /// Text used when the object is appended or concatenated.
    fn to_text(&self) -> String {
        format!("{self:?}")
    }
}

type Getter = Box<dyn Fn(&dyn Any) -> Option<Value> + Send + Sync>;
type Method = Box<dyn Fn(&dyn Any, &[Value]) -> Option<Result<Value, String>> + Send + Sync>;
type Iter = Box<dyn Fn(&dyn Any) -> Option<Vec<Value>> + Send + Sync>;

/// Accessible surface of one host type.
///
/// ```ignore
/// TypeDescriptor::new("User")
///     .field("name", |u: &User| Value::from(u.name.as_str()))
///     .method("greet", |u: &User, args: &[Value]| Ok(Value::from(format!("{} {}", args[0], u.name))))
/// ```
pub struct TypeDescriptor {
    name: &'static str,
    fields: AHashMap<String, Getter>,
    methods: AHashMap<String, Method>,
    iter: Option<Iter>,
}

impl TypeDescriptor {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: AHashMap::new(),
            methods: AHashMap::new(),
            iter: None,
        }
    }

    /// Registers a readable field.
    #[must_use]
    pub fn field<T: Any>(mut self, name: &str, get: impl Fn(&T) -> Value + Send + Sync + 'static) -> Self {
        self.fields.insert(
            name.to_owned(),
            Box::new(move |any: &dyn Any| any.downcast_ref::<T>().map(&get)),
        );
        self
    }

    /// Registers a callable method.
    #[must_use]
    pub fn method<T: Any>(
        mut self,
        name: &str,
        call: impl Fn(&T, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(
            name.to_owned(),
            Box::new(move |any: &dyn Any, args: &[Value]| any.downcast_ref::<T>().map(|obj| call(obj, args))),
        );
        self
    }

    /// Makes the type usable as a FOREACH source.
    #[must_use]
    pub fn iterable<T: Any>(mut self, items: impl Fn(&T) -> Vec<Value> + Send + Sync + 'static) -> Self {
        self.iter = Some(Box::new(move |any: &dyn Any| any.downcast_ref::<T>().map(&items)));
        self
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<_> = self.fields.keys().collect();
        fields.sort();
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("fields", &fields)
            .field("methods", &methods)
            .field("iterable", &self.iter.is_some())
            .finish()
    }
}

/// Descriptor cache keyed by concrete host type.
static DESCRIPTORS: LazyLock<RwLock<AHashMap<TypeId, Arc<TypeDescriptor>>>> =
    LazyLock::new(|| RwLock::new(AHashMap::new()));

/// Returns the cached descriptor for `obj`'s concrete type, building it on first use.
///
/// Two threads racing on a cold type may both build a descriptor; the first
/// one stored wins and the other is dropped.
pub fn describe(obj: &dyn HostObject) -> Arc<TypeDescriptor> {
    let type_id = obj.as_any().type_id();
    if let Some(found) = DESCRIPTORS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&type_id)
    {
        return Arc::clone(found);
    }
    let built = Arc::new(obj.descriptor());
    let mut cache = DESCRIPTORS.write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(cache.entry(type_id).or_insert(built))
}

/// Reads field `name` of a host object.
pub(crate) fn get_field(obj: &dyn HostObject, name: &str) -> Result<Value, String> {
    let desc = describe(obj);
    desc.fields
        .get(name)
        .and_then(|get| get(obj.as_any()))
        .ok_or_else(|| format!("{} has no field '{name}'", desc.name))
}

/// Invokes method `name` of a host object.
pub(crate) fn call_method(obj: &dyn HostObject, name: &str, args: &[Value]) -> Result<Value, String> {
    let desc = describe(obj);
    let result = desc
        .methods
        .get(name)
        .and_then(|call| call(obj.as_any(), args))
        .ok_or_else(|| format!("{} has no method '{name}'", desc.name))?;
    result.map_err(|msg| format!("{}.{name}: {msg}", desc.name))
}

/// Collects the items of an iterable host object, or `None` if it is not iterable.
pub(crate) fn iterate(obj: &dyn HostObject) -> Option<Vec<Value>> {
    let desc = describe(obj);
    desc.iter.as_ref().and_then(|items| items(obj.as_any()))
}
