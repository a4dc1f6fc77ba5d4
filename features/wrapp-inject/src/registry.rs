//! Process wide registry handing out a small integer per distinct Rust type.
//!
//! All dependency bookkeeping keys on [TypeCode]s, so maps stay cheap and type names are only
//! looked up again when something has to be displayed.

use std::{
    any::TypeId,
    fmt,
    sync::LazyLock,
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::TypeInfo;

/// Stable identity of a type for the lifetime of the process
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeCode(u32);

impl TypeCode {
    /// Returns the code of `T`, registering it on first use
    pub fn of<T: 'static + ?Sized>() -> TypeCode {
        REGISTRY.code_of(TypeInfo::of::<T>())
    }

    pub fn info(self) -> TypeInfo {
        REGISTRY.info_of(self)
    }

    pub fn name(self) -> &'static str {
        self.info().type_name
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static REGISTRY: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::default);

#[derive(Default)]
struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    codes: FxHashMap<TypeId, TypeCode>,
    infos: Vec<TypeInfo>,
}

impl TypeRegistry {
    fn code_of(&self, info: TypeInfo) -> TypeCode {
        if let Some(code) = self.inner.read().codes.get(&info.type_id) {
            return *code;
        }

        let mut inner = self.inner.write();
        // Another thread may have registered the type while we waited for the write lock
        if let Some(code) = inner.codes.get(&info.type_id) {
            return *code;
        }

        let code = TypeCode(
            u32::try_from(inner.infos.len()).expect("fewer than u32::MAX distinct injected types"),
        );
        inner.infos.push(info);
        inner.codes.insert(info.type_id, code);
        tracing::trace!("Registered type code {} for {}", code.0, info.type_name);
        code
    }

    fn info_of(&self, code: TypeCode) -> TypeInfo {
        self.inner.read().infos[code.index()]
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    struct Local;

    #[test]
    fn codes_are_stable_and_distinct() {
        let first = TypeCode::of::<Local>();
        assert_eq!(first, TypeCode::of::<Local>());
        assert_ne!(first, TypeCode::of::<Option<Local>>());
        assert_ne!(TypeCode::of::<Vec<u8>>(), TypeCode::of::<Vec<u16>>());
        assert_eq!(first.info(), TypeInfo::of::<Local>());
    }

    #[test]
    fn concurrent_registration_agrees() {
        struct Contended;

        let codes: Vec<TypeCode> = (0..8)
            .map(|_| thread::spawn(TypeCode::of::<Contended>))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert!(codes.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(codes[0].name().ends_with("Contended"));
    }
}
