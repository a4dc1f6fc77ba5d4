use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

/// Boxed error returned by fallible providers
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Values are copied into every invocation and may be consumed by more than one provider,
/// so anything injectable needs to be Clone + Send + Sync + 'static
pub trait Injectable: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Injectable for T {}

/// Type erased value stored in a slot of the value arrays
pub type Value = Arc<dyn Any + Send + Sync + 'static>;

/// One positional value array. `None` is the zero value of a slot.
pub(crate) type Slots = Vec<Option<Value>>;

pub(crate) fn erase<T: Injectable>(value: T) -> Value {
    Arc::new(value)
}

pub(crate) fn downcast_value<T: Injectable>(value: &Value) -> T {
    value
        .downcast_ref::<T>()
        .cloned()
        .expect("slot holds a value of the type code it was assigned")
}

const POINTER_PREFIXES: [&str; 3] = ["alloc::sync::Arc<", "alloc::boxed::Box<", "alloc::rc::Rc<"];

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }

    /// Module path the type was declared in
    ///
    /// `my_app::handlers::Greeter` -> `my_app::handlers`, generic arguments are ignored.
    /// Smart pointers and trait objects are looked through: `Arc<dyn my_app::Greeter>` -> `my_app`
    pub fn namespace(&self) -> &'static str {
        let mut name = self.type_name;
        loop {
            let stripped = POINTER_PREFIXES
                .iter()
                .find_map(|prefix| name.strip_prefix(prefix))
                .map(|inner| inner.strip_suffix('>').unwrap_or(inner));
            match stripped {
                Some(inner) => name = inner,
                None => break,
            }
        }
        let name = name.strip_prefix("dyn ").unwrap_or(name);
        let name = match name.find(" + ") {
            Some(bounds) => &name[..bounds],
            None => name,
        };
        let base = match name.find('<') {
            Some(generics) => &name[..generics],
            None => name,
        };
        match base.rfind("::") {
            Some(split) => &base[..split],
            None => "",
        }
    }
}

/// Error shared between every reader of an [Outcome] or a cached result
#[derive(Clone)]
pub struct SharedError(Arc<dyn std::error::Error + Send + Sync>);
impl SharedError {
    pub fn new(error: impl Into<DynError>) -> Self {
        Self(Arc::from(error.into()))
    }

    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }
}
impl From<DynError> for SharedError {
    fn from(error: DynError) -> Self {
        Self(Arc::from(error))
    }
}
impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}
impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}
impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// The upward flowing result of fallible providers.
///
/// A fallible provider that fails stops the rest of its phase; the error travels up the chain
/// as an `Outcome` to the nearest wrapper or endpoint that receives one.
/// The default value is a successful outcome.
#[derive(Clone, Debug, Default)]
pub struct Outcome(Option<SharedError>);
impl Outcome {
    pub fn ok() -> Self {
        Self(None)
    }

    pub fn failed(error: impl Into<DynError>) -> Self {
        Self(Some(SharedError::new(error)))
    }

    pub(crate) fn from_shared(error: SharedError) -> Self {
        Self(Some(error))
    }

    pub fn is_ok(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_failed(&self) -> bool {
        self.0.is_some()
    }

    pub fn error(&self) -> Option<&SharedError> {
        self.0.as_ref()
    }

    pub fn into_result(self) -> Result<(), SharedError> {
        match self.0 {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
impl<E: Into<DynError>> From<Result<(), E>> for Outcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Outcome::ok(),
            Err(error) => Outcome::failed(error),
        }
    }
}
