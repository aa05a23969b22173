use lasso::ThreadedRodeo;
use std::num::NonZeroU32;

/// Interned identifier. Equality of symbols is equality of the underlying
/// UTF bytes; class/method/field names and JNI descriptors are compared this
/// way everywhere past the loader.
pub type Symbol = lasso::Spur;

macro_rules! define_arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub fn new(raw: NonZeroU32) -> Self {
                Self(raw)
            }

            /// Id handed out right after pushing onto an arena: the arena's
            /// new length is the (1-based) id.
            pub fn from_usize(len: usize) -> Self {
                Self(NonZeroU32::new(len as u32).expect("arena id must be nonzero"))
            }

            pub fn from_u32(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            pub fn to_index(self) -> usize {
                self.0.get() as usize - 1
            }

            pub fn as_u32(self) -> u32 {
                self.0.get()
            }

            pub fn into_inner(self) -> NonZeroU32 {
                self.0
            }
        }
    };
}

define_arena_id!(
    /// Index into the class pool.
    ClassId
);
define_arena_id!(
    /// Index into the method arena.
    MethodId
);
define_arena_id!(
    /// Index into the thread table.
    ThreadId
);
define_arena_id!(FieldDescriptorId);
define_arena_id!(MethodDescriptorId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub name: Symbol,
    pub desc: Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: Symbol,
    pub desc: Symbol,
}

/// Key for the native registry. `class` is `None` for the handful of natives
/// dispatched on array receivers, where no instance class exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullyQualifiedMethodKey {
    pub class: Option<Symbol>,
    pub name: Symbol,
    pub desc: Symbol,
}

impl FullyQualifiedMethodKey {
    pub fn new(class: Symbol, name: Symbol, desc: Symbol) -> Self {
        Self {
            class: Some(class),
            name,
            desc,
        }
    }

    pub fn new_with_str(
        class: &str,
        name: &str,
        desc: &str,
        interner: &ThreadedRodeo,
    ) -> Self {
        Self {
            class: Some(interner.get_or_intern(class)),
            name: interner.get_or_intern(name),
            desc: interner.get_or_intern(desc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_ids_are_one_based() {
        let id = ClassId::from_usize(1);
        assert_eq!(id.to_index(), 0);
        assert_eq!(id.as_u32(), 1);
        assert_eq!(ClassId::from_u32(0), None);
    }

    #[test]
    fn method_keys_hash_by_symbol_pair() {
        let interner = ThreadedRodeo::default();
        let a = MethodKey {
            name: interner.get_or_intern("run"),
            desc: interner.get_or_intern("()V"),
        };
        let b = MethodKey {
            name: interner.get_or_intern("run"),
            desc: interner.get_or_intern("()V"),
        };
        assert_eq!(a, b);
    }
}
