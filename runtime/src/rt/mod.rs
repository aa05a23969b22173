use crate::classfile::ClassFlags;
use crate::error::VmError;
use crate::heap::HeapRef;
use crate::jtype::PrimitiveType;
use crate::keys::{ClassId, FieldKey, MethodId, Symbol, ThreadId};
use crate::rt::array::ArrayClass;
use crate::rt::class::InstanceClass;
use crate::rt::field::StaticField;
use crate::vm::Value;
use once_cell::unsync::OnceCell;
use std::cell::Cell;
use std::collections::HashMap;

pub mod array;
pub mod class;
pub mod constant_pool;
pub mod field;
pub mod method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    /// Shell pushed into the pool, link products not all set yet.
    Loading,
    Loaded,
    /// `<clinit>` frames on some thread's stack.
    Initializing,
    Initialized,
    /// `<clinit>` completed abruptly; any further touch raises
    /// NoClassDefFoundError.
    ErrorInitializing,
}

/// Shared prefix of every class variant.
pub struct BaseClass {
    name: Symbol,
    /// JNI form: `Lpkg/Name;`, `[I`, `I`.
    jni_signature: Symbol,
    flags: ClassFlags,
    super_id: Option<ClassId>,
    state: Cell<ClassState>,
    /// Thread running `<clinit>`, for the reentrant-trigger rule.
    initializing_thread: Cell<Option<ThreadId>>,
    mirror_ref: OnceCell<HeapRef>,
    interfaces: OnceCell<Vec<ClassId>>,
    direct_interfaces: OnceCell<Vec<ClassId>>,
    static_fields: OnceCell<Vec<StaticField>>,
    static_index: OnceCell<HashMap<FieldKey, usize>>,
    clinit: OnceCell<MethodId>,
    source_file: Option<Symbol>,
}

impl BaseClass {
    pub fn new(
        name: Symbol,
        jni_signature: Symbol,
        flags: ClassFlags,
        super_id: Option<ClassId>,
        source_file: Option<Symbol>,
    ) -> Self {
        Self {
            name,
            jni_signature,
            flags,
            super_id,
            state: Cell::new(ClassState::Loading),
            initializing_thread: Cell::new(None),
            mirror_ref: OnceCell::new(),
            interfaces: OnceCell::new(),
            direct_interfaces: OnceCell::new(),
            static_fields: OnceCell::new(),
            static_index: OnceCell::new(),
            clinit: OnceCell::new(),
            source_file,
        }
    }

    /// Base for the synthetic variants (arrays, primitives), which are born
    /// fully initialized and field-free.
    pub fn new_synthetic(name: Symbol, jni_signature: Symbol, super_id: Option<ClassId>) -> Self {
        let base = Self::new(
            name,
            jni_signature,
            ClassFlags::PUBLIC | ClassFlags::FINAL,
            super_id,
            None,
        );
        base.state.set(ClassState::Initialized);
        base.interfaces.set(Vec::new()).unwrap();
        base.direct_interfaces.set(Vec::new()).unwrap();
        base.static_fields.set(Vec::new()).unwrap();
        base.static_index.set(HashMap::new()).unwrap();
        base
    }

    pub(crate) fn set_clinit(&self, method_id: MethodId) -> Result<(), VmError> {
        self.clinit
            .set(method_id)
            .map_err(|_| VmError::Internal("clinit already set".to_string()))
    }

    pub(crate) fn set_interfaces(&self, interfaces: Vec<ClassId>) -> Result<(), VmError> {
        self.interfaces
            .set(interfaces)
            .map_err(|_| VmError::Internal("interfaces already set".to_string()))
    }

    pub(crate) fn set_direct_interfaces(&self, interfaces: Vec<ClassId>) -> Result<(), VmError> {
        self.direct_interfaces
            .set(interfaces)
            .map_err(|_| VmError::Internal("direct interfaces already set".to_string()))
    }

    pub(crate) fn set_static_fields(
        &self,
        fields: Vec<StaticField>,
        index: HashMap<FieldKey, usize>,
    ) -> Result<(), VmError> {
        self.static_fields
            .set(fields)
            .map_err(|_| VmError::Internal("static fields already set".to_string()))?;
        self.static_index
            .set(index)
            .map_err(|_| VmError::Internal("static index already set".to_string()))
    }
}

pub trait ClassLike {
    fn base(&self) -> &BaseClass;

    fn name(&self) -> Symbol {
        self.base().name
    }

    fn jni_signature(&self) -> Symbol {
        self.base().jni_signature
    }

    fn flags(&self) -> ClassFlags {
        self.base().flags
    }

    fn get_super(&self) -> Option<ClassId> {
        self.base().super_id
    }

    fn get_source_file(&self) -> Option<Symbol> {
        self.base().source_file
    }

    fn state(&self) -> ClassState {
        self.base().state.get()
    }

    fn set_state(&self, state: ClassState) {
        self.base().state.set(state);
    }

    fn initializing_thread(&self) -> Option<ThreadId> {
        self.base().initializing_thread.get()
    }

    fn begin_initializing(&self, thread: ThreadId) {
        self.base().state.set(ClassState::Initializing);
        self.base().initializing_thread.set(Some(thread));
    }

    fn finish_initializing(&self, outcome: ClassState) {
        self.base().state.set(outcome);
        self.base().initializing_thread.set(None);
    }

    fn get_clinit_method_id(&self) -> Option<MethodId> {
        self.base().clinit.get().copied()
    }

    fn get_mirror_ref(&self) -> Option<HeapRef> {
        self.base().mirror_ref.get().copied()
    }

    fn set_mirror_ref(&self, mirror: HeapRef) -> Result<(), VmError> {
        self.base()
            .mirror_ref
            .set(mirror)
            .map_err(|_| VmError::Internal("mirror already set".to_string()))
    }

    fn get_interfaces(&self) -> Result<&Vec<ClassId>, VmError> {
        self.base()
            .interfaces
            .get()
            .ok_or_else(|| VmError::Internal("interfaces not linked yet".to_string()))
    }

    fn get_direct_interfaces(&self) -> Result<&Vec<ClassId>, VmError> {
        self.base()
            .direct_interfaces
            .get()
            .ok_or_else(|| VmError::Internal("direct interfaces not linked yet".to_string()))
    }

    fn static_fields(&self) -> &[StaticField] {
        self.base()
            .static_fields
            .get()
            .map_or(&[], |fields| fields.as_slice())
    }

    fn find_static_field(&self, key: &FieldKey) -> Option<&StaticField> {
        let idx = *self.base().static_index.get()?.get(key)?;
        Some(&self.static_fields()[idx])
    }

    fn get_static_field_value(&self, key: &FieldKey) -> Option<Value> {
        self.find_static_field(key).map(|f| f.value.get())
    }

    fn set_static_field_value(&self, key: &FieldKey, value: Value) -> Result<(), VmError> {
        match self.find_static_field(key) {
            Some(field) => {
                field.value.set(value);
                Ok(())
            }
            None => Err(VmError::Internal("no such static field".to_string())),
        }
    }
}

pub struct PrimitiveClass {
    base: BaseClass,
    pub primitive_type: PrimitiveType,
}

impl PrimitiveClass {
    pub fn new(name: Symbol, jni_signature: Symbol, primitive_type: PrimitiveType) -> Self {
        Self {
            base: BaseClass::new_synthetic(name, jni_signature, None),
            primitive_type,
        }
    }
}

impl ClassLike for PrimitiveClass {
    fn base(&self) -> &BaseClass {
        &self.base
    }
}

pub enum JvmClass {
    Instance(Box<InstanceClass>),
    Array(ArrayClass),
    Primitive(PrimitiveClass),
}

impl JvmClass {
    pub fn as_class_like(&self) -> &dyn ClassLike {
        match self {
            JvmClass::Instance(c) => c.as_ref(),
            JvmClass::Array(c) => c,
            JvmClass::Primitive(c) => c,
        }
    }

    pub fn name(&self) -> Symbol {
        self.as_class_like().name()
    }

    pub fn jni_signature(&self) -> Symbol {
        self.as_class_like().jni_signature()
    }

    pub fn get_super_id(&self) -> Option<ClassId> {
        self.as_class_like().get_super()
    }

    pub fn get_mirror_ref(&self) -> Option<HeapRef> {
        self.as_class_like().get_mirror_ref()
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, JvmClass::Primitive(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, JvmClass::Array(_))
    }

    pub fn is_interface(&self) -> bool {
        self.as_class_like().flags().is_interface()
    }

    pub fn get_raw_flags(&self) -> u16 {
        self.as_class_like().flags().get_raw()
    }
}
