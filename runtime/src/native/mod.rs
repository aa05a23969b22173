use crate::error::VmError;
use crate::keys::{FullyQualifiedMethodKey, ThreadId};
use crate::vm::{Value, VirtualMachine};
use lasso::ThreadedRodeo;
use std::collections::HashMap;
use std::sync::Arc;

mod java_io;
mod java_lang;
mod java_lang_ref;

pub type NativeRet = Result<Option<Value>, VmError>;

/// Uniform native calling convention: slot 0 of `args` is `this` for
/// instance methods; a returned value is pushed onto the caller's operand
/// stack by the interpreter. Objects a native creates live on the transient
/// root stack until the invocation returns.
pub type NativeFn = fn(&mut VirtualMachine, ThreadId, &[Value]) -> NativeRet;

pub struct NativeRegistry {
    pub string_interner: Arc<ThreadedRodeo>,
    map: HashMap<FullyQualifiedMethodKey, NativeFn>,
}

impl NativeRegistry {
    pub fn new(string_interner: Arc<ThreadedRodeo>) -> Self {
        Self {
            string_interner,
            map: HashMap::new(),
        }
    }

    pub fn with_defaults(string_interner: Arc<ThreadedRodeo>) -> Self {
        let mut registry = Self::new(string_interner);
        java_lang::register(&mut registry);
        java_io::register(&mut registry);
        java_lang_ref::register(&mut registry);
        registry
    }

    pub fn register(&mut self, key: FullyQualifiedMethodKey, f: NativeFn) {
        self.map.insert(key, f);
    }

    pub fn register_str(&mut self, class: &str, name: &str, desc: &str, f: NativeFn) {
        let key =
            FullyQualifiedMethodKey::new_with_str(class, name, desc, &self.string_interner);
        self.register(key, f);
    }

    pub fn get(&self, key: &FullyQualifiedMethodKey) -> Option<NativeFn> {
        self.map.get(key).copied()
    }
}
