use crate::class_loader::ClassProvider;
use crate::error::VmError;
use crate::heap::{Heap, HeapRef};
use crate::jtype::{JavaType, MethodDescriptor, PrimitiveType};
use crate::keys::{
    ClassId, FieldDescriptorId, FieldKey, MethodDescriptorId, MethodId, MethodKey, Symbol,
};
use crate::rt::array::{ArrayClass, ArrayComponent};
use crate::rt::class::InstanceClass;
use crate::rt::field::StaticField;
use crate::rt::method::Method;
use crate::rt::{ClassLike, JvmClass, PrimitiveClass};
use crate::vm::bootstrap_registry::BootstrapRegistry;
use crate::vm::Value;
use crate::{build_exception, debug_log, throw_exception};
use lasso::ThreadedRodeo;
use std::collections::HashMap;
use std::sync::Arc;

/// Signature of class metadata parked after an unload, kept until the
/// debugger has been told (or dropped immediately without a session).
#[derive(Debug, Clone, Copy)]
pub struct UnloadedClass {
    pub signature: Symbol,
}

/// The class pool: every loaded type, the method arena, and the descriptor
/// caches. Sole owner of class metadata; everything else holds `ClassId`s.
pub struct MethodArea {
    providers: Vec<Box<dyn ClassProvider>>,
    class_name_to_index: HashMap<Symbol, ClassId>,
    mirror_to_class_index: HashMap<HeapRef, ClassId>,
    classes: Vec<Option<JvmClass>>,
    methods: Vec<Method>,

    field_descriptors: Vec<JavaType>,
    field_descriptors_index: HashMap<Symbol, FieldDescriptorId>,
    method_descriptors: Vec<MethodDescriptor>,
    method_descriptors_index: HashMap<Symbol, MethodDescriptorId>,

    interner: Arc<ThreadedRodeo>,
    bootstrap_registry: Arc<BootstrapRegistry>,

    /// Classes loaded since the debugger last drained CLASS_PREPARE events.
    pending_prepares: Vec<ClassId>,
    /// Metadata signatures awaiting CLASS_UNLOAD delivery.
    unloaded: Vec<UnloadedClass>,
}

impl MethodArea {
    pub fn init(
        interner: Arc<ThreadedRodeo>,
        providers: Vec<Box<dyn ClassProvider>>,
    ) -> Result<(Self, Arc<BootstrapRegistry>), VmError> {
        debug_log!("Creating class pool...");
        let bootstrap_registry = Arc::new(BootstrapRegistry::new(&interner));
        let mut method_area = Self {
            providers,
            class_name_to_index: HashMap::new(),
            mirror_to_class_index: HashMap::new(),
            classes: Vec::with_capacity(256),
            methods: Vec::with_capacity(2048),
            field_descriptors: Vec::with_capacity(256),
            field_descriptors_index: HashMap::new(),
            method_descriptors: Vec::with_capacity(1024),
            method_descriptors_index: HashMap::new(),
            bootstrap_registry: bootstrap_registry.clone(),
            interner,
            pending_prepares: Vec::new(),
            unloaded: Vec::new(),
        };
        method_area.preload_basic_classes()?;
        Ok((method_area, bootstrap_registry))
    }

    fn preload_basic_classes(&mut self) -> Result<(), VmError> {
        for primitive in PrimitiveType::values() {
            let name = self.interner.get_or_intern(primitive.java_name());
            let signature = self
                .interner
                .get_or_intern(primitive.descriptor_char().to_string());
            let class_id =
                self.push_class(JvmClass::Primitive(PrimitiveClass::new(name, signature, *primitive)));
            self.class_name_to_index.insert(name, class_id);
        }

        let br = self.bootstrap_registry.clone();
        br.set_java_lang_object_id(self.get_class_id_or_load(br.java_lang_object_sym)?)?;
        br.set_java_lang_class_id(self.get_class_id_or_load(br.java_lang_class_sym)?)?;
        br.set_java_lang_string_id(self.get_class_id_or_load(br.java_lang_string_sym)?)?;
        br.set_char_array_class_id(self.get_class_id_or_load(br.char_array_desc)?)?;
        br.set_java_lang_throwable_id(self.get_class_id_or_load(br.java_lang_throwable_sym)?)?;
        br.set_java_lang_thread_id(self.get_class_id_or_load(br.java_lang_thread_sym)?)?;
        br.set_java_lang_system_id(self.get_class_id_or_load(br.java_lang_system_sym)?)?;
        Ok(())
    }

    pub fn interner(&self) -> &ThreadedRodeo {
        &self.interner
    }

    pub fn br(&self) -> &BootstrapRegistry {
        &self.bootstrap_registry
    }

    // -- arenas --------------------------------------------------------------

    pub fn push_class(&mut self, class: JvmClass) -> ClassId {
        self.classes.push(Some(class));
        ClassId::from_usize(self.classes.len())
    }

    pub fn get_class(&self, class_id: &ClassId) -> &JvmClass {
        self.classes[class_id.to_index()]
            .as_ref()
            .expect("touched an unloaded class")
    }

    pub fn get_class_opt(&self, class_id: ClassId) -> Option<&JvmClass> {
        self.classes.get(class_id.to_index())?.as_ref()
    }

    pub fn get_instance_class(&self, class_id: &ClassId) -> Result<&InstanceClass, VmError> {
        match self.get_class(class_id) {
            JvmClass::Instance(class) => Ok(class),
            _ => Err(VmError::UnexpectedType("not an instance class")),
        }
    }

    pub fn get_array_class(&self, class_id: &ClassId) -> Result<&ArrayClass, VmError> {
        match self.get_class(class_id) {
            JvmClass::Array(class) => Ok(class),
            _ => Err(VmError::UnexpectedType("not an array class")),
        }
    }

    pub fn loaded_class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.classes
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|_| ClassId::from_usize(idx + 1)))
    }

    pub fn push_method(&mut self, method: Method) -> MethodId {
        self.methods.push(method);
        MethodId::from_usize(self.methods.len())
    }

    pub fn get_method(&self, method_id: &MethodId) -> &Method {
        &self.methods[method_id.to_index()]
    }

    pub fn get_method_mut(&mut self, method_id: &MethodId) -> &mut Method {
        &mut self.methods[method_id.to_index()]
    }

    // -- descriptor caches ---------------------------------------------------

    pub fn get_or_new_field_descriptor_id(
        &mut self,
        descriptor: Symbol,
    ) -> Result<FieldDescriptorId, VmError> {
        if let Some(id) = self.field_descriptors_index.get(&descriptor) {
            return Ok(*id);
        }
        let parsed = JavaType::parse(self.interner.resolve(&descriptor), &self.interner)?;
        self.field_descriptors.push(parsed);
        let id = FieldDescriptorId::from_usize(self.field_descriptors.len());
        self.field_descriptors_index.insert(descriptor, id);
        Ok(id)
    }

    pub fn get_field_descriptor(&self, id: &FieldDescriptorId) -> &JavaType {
        &self.field_descriptors[id.to_index()]
    }

    pub fn get_or_new_method_descriptor_id(
        &mut self,
        descriptor: Symbol,
    ) -> Result<MethodDescriptorId, VmError> {
        if let Some(id) = self.method_descriptors_index.get(&descriptor) {
            return Ok(*id);
        }
        let parsed = MethodDescriptor::parse(self.interner.resolve(&descriptor), &self.interner)?;
        self.method_descriptors.push(parsed);
        let id = MethodDescriptorId::from_usize(self.method_descriptors.len());
        self.method_descriptors_index.insert(descriptor, id);
        Ok(id)
    }

    pub fn get_method_descriptor(&self, id: &MethodDescriptorId) -> &MethodDescriptor {
        &self.method_descriptors[id.to_index()]
    }

    pub fn get_method_descriptor_by_method_id(&self, method_id: &MethodId) -> &MethodDescriptor {
        self.get_method_descriptor(&self.get_method(method_id).descriptor_id())
    }

    // -- loading -------------------------------------------------------------

    pub fn lookup_class_id(&self, name: Symbol) -> Option<ClassId> {
        self.class_name_to_index.get(&name).copied()
    }

    pub fn get_class_id_or_load(&mut self, name: Symbol) -> Result<ClassId, VmError> {
        if let Some(class_id) = self.class_name_to_index.get(&name) {
            return Ok(*class_id);
        }
        let name_str = self.interner.resolve(&name).to_string();
        if name_str.starts_with('[') {
            return self.load_array_class(name);
        }

        let mut found = None;
        for provider in &self.providers {
            if let Some(cf) = provider.find_class(&name_str)? {
                found = Some(cf);
                break;
            }
        }
        let cf = found.ok_or_else(|| build_exception!(NoClassDefFoundError, "{}", name_str))?;
        if cf.class_name()? != name_str {
            return Err(VmError::ClassFormat(format!(
                "class file for {name_str} names itself {}",
                cf.class_name()?
            )));
        }

        let super_id = match cf.super_class_name()? {
            Some(super_name) => {
                if super_name == name_str {
                    return Err(VmError::ClassFormat(format!(
                        "{name_str} is its own superclass"
                    )));
                }
                let super_sym = self.interner.get_or_intern(super_name);
                Some(self.get_class_id_or_load(super_sym)?)
            }
            None => None,
        };

        let class_id = InstanceClass::load_and_link(cf, self, super_id)?;
        self.class_name_to_index.insert(name, class_id);
        self.pending_prepares.push(class_id);
        debug_log!("Loaded class {}", name_str);
        Ok(class_id)
    }

    fn load_array_class(&mut self, name: Symbol) -> Result<ClassId, VmError> {
        let descriptor = self.interner.resolve(&name).to_string();
        let element = &descriptor[1..];
        let component = if element.starts_with('[') {
            let element_sym = self.interner.get_or_intern(element);
            ArrayComponent::Reference(self.get_class_id_or_load(element_sym)?)
        } else if let Some(class_name) = element
            .strip_prefix('L')
            .and_then(|rest| rest.strip_suffix(';'))
        {
            let element_sym = self.interner.get_or_intern(class_name);
            ArrayComponent::Reference(self.get_class_id_or_load(element_sym)?)
        } else {
            let primitive = PrimitiveType::values()
                .iter()
                .find(|p| p.descriptor_char().to_string() == element)
                .copied()
                .ok_or_else(|| {
                    VmError::ClassFormat(format!("bad array descriptor {descriptor:?}"))
                })?;
            ArrayComponent::Primitive(primitive)
        };

        let object_id = self.br().get_java_lang_object_id()?;
        let class_id = self.push_class(JvmClass::Array(ArrayClass::new(name, object_id, component)));
        self.class_name_to_index.insert(name, class_id);
        Ok(class_id)
    }

    // -- assignability -------------------------------------------------------

    /// Can a value of class `source` be assigned where `target` is expected.
    pub fn is_assignable_from(&self, target: ClassId, source: ClassId) -> bool {
        self.is_subtype_of(source, target)
    }

    fn is_subtype_of(&self, this_class: ClassId, target_class: ClassId) -> bool {
        if this_class == target_class {
            return true;
        }
        let this = self.get_class(&this_class);
        let target = self.get_class(&target_class);

        if let (JvmClass::Array(this_array), JvmClass::Array(target_array)) = (this, target) {
            return match (this_array.component, target_array.component) {
                (ArrayComponent::Primitive(a), ArrayComponent::Primitive(b)) => a == b,
                (ArrayComponent::Reference(a), ArrayComponent::Reference(b)) => {
                    self.is_subtype_of(a, b)
                }
                _ => false,
            };
        }

        if let Some(super_id) = this.get_super_id() {
            if self.is_subtype_of(super_id, target_class) {
                return true;
            }
        }
        if let Ok(interfaces) = this.as_class_like().get_interfaces() {
            for interface_id in interfaces {
                if self.is_subtype_of(*interface_id, target_class) {
                    return true;
                }
            }
        }
        false
    }

    /// instanceof against a class that may not even be loaded; an unloaded
    /// target cannot have instances.
    pub fn instance_of(&self, this_class: ClassId, target_name: Symbol) -> bool {
        match self.class_name_to_index.get(&target_name) {
            Some(target) => self.is_subtype_of(this_class, *target),
            None => false,
        }
    }

    // -- resolution ----------------------------------------------------------

    /// Static field resolution per JVMS 5.4.3.2: class, then superinterfaces,
    /// then superclass chain.
    pub fn resolve_static_field(
        &self,
        class_id: ClassId,
        key: &FieldKey,
    ) -> Result<&StaticField, VmError> {
        let class = self.get_instance_class(&class_id)?;
        if let Some(field) = class.find_static_field(key) {
            return Ok(field);
        }
        for interface_id in class.get_interfaces()? {
            let interface = self.get_instance_class(interface_id)?;
            if let Some(field) = interface.find_static_field(key) {
                return Ok(field);
            }
        }
        let mut cursor = class.get_super();
        while let Some(id) = cursor {
            let sup = self.get_instance_class(&id)?;
            if let Some(field) = sup.find_static_field(key) {
                return Ok(field);
            }
            cursor = sup.get_super();
        }
        throw_exception!(
            NoSuchFieldError,
            "{}",
            self.interner.resolve(&key.name)
        )
    }

    pub fn resolve_virtual_method(
        &self,
        receiver_class: ClassId,
        key: &MethodKey,
    ) -> Result<MethodId, VmError> {
        match self.get_class(&receiver_class) {
            JvmClass::Instance(class) => class.get_vtable_method_id(key),
            JvmClass::Array(_) => {
                // Arrays dispatch through Object's table.
                let object_id = self.br().get_java_lang_object_id()?;
                self.get_instance_class(&object_id)?.get_vtable_method_id(key)
            }
            JvmClass::Primitive(_) => Err(VmError::UnexpectedType("virtual call on primitive")),
        }
    }

    pub fn resolve_interface_method(
        &self,
        receiver_class: ClassId,
        key: &MethodKey,
    ) -> Result<MethodId, VmError> {
        match self.get_class(&receiver_class) {
            JvmClass::Instance(class) => class.get_interface_method_id_opt(key).ok_or_else(|| {
                build_exception!(
                    NoSuchMethodError,
                    "{}",
                    self.interner.resolve(&key.name)
                )
            }),
            _ => self.resolve_virtual_method(receiver_class, key),
        }
    }

    /// invokestatic / invokespecial target: declared methods up the chain.
    pub fn resolve_direct_method(
        &self,
        class_id: ClassId,
        key: &MethodKey,
    ) -> Result<MethodId, VmError> {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            let class = self.get_instance_class(&id)?;
            if let Some(method_id) = class.get_declared_method_id_opt(key) {
                return Ok(method_id);
            }
            cursor = class.get_super();
        }
        // Static interface methods resolve against the named interface only;
        // check interfaces of the starting class as a last resort.
        let class = self.get_instance_class(&class_id)?;
        for interface_id in class.get_interfaces()? {
            let interface = self.get_instance_class(interface_id)?;
            if let Some(method_id) = interface.get_declared_method_id_opt(key) {
                return Ok(method_id);
            }
        }
        throw_exception!(
            NoSuchMethodError,
            "{}.{}{}",
            self.interner.resolve(&self.get_class(&class_id).name()),
            self.interner.resolve(&key.name),
            self.interner.resolve(&key.desc)
        )
    }

    // -- mirrors -------------------------------------------------------------

    pub fn get_class_id_by_mirror(&self, mirror: HeapRef) -> Result<ClassId, VmError> {
        self.mirror_to_class_index
            .get(&mirror)
            .copied()
            .ok_or_else(|| VmError::Internal("no class for mirror".to_string()))
    }

    pub fn get_mirror_ref_or_create(
        &mut self,
        class_id: ClassId,
        heap: &mut Heap,
    ) -> Result<HeapRef, VmError> {
        if let Some(mirror) = self.get_class(&class_id).get_mirror_ref() {
            return Ok(mirror);
        }
        let class_class_id = self.br().get_java_lang_class_id()?;
        let instance_size = self
            .get_instance_class(&class_class_id)?
            .get_instance_size()?;
        let mirror = heap.alloc_instance(class_class_id, instance_size, super::AllocType::Object)?;
        self.mirror_to_class_index.insert(mirror, class_id);
        self.get_class(&class_id).as_class_like().set_mirror_ref(mirror)?;
        Ok(mirror)
    }

    // -- static roots for the collector --------------------------------------

    pub fn static_ref_values(&self, class_id: ClassId) -> Vec<HeapRef> {
        let mut refs = Vec::new();
        if let Some(class) = self.get_class_opt(class_id) {
            for field in class.as_class_like().static_fields() {
                if let Value::Ref(r) = field.value.get() {
                    refs.push(r);
                }
            }
            if let Some(mirror) = class.get_mirror_ref() {
                refs.push(mirror);
            }
        }
        refs
    }

    pub fn constant_pool_strings(&self, class_id: ClassId) -> Vec<HeapRef> {
        match self.get_class_opt(class_id) {
            Some(JvmClass::Instance(class)) => class.cp.materialized_strings().collect(),
            _ => Vec::new(),
        }
    }

    // -- unloading -----------------------------------------------------------

    /// Drops a class from the pool, parking its signature for the debugger.
    /// The caller (the collector) has already proven it unreachable.
    pub fn unload_class(&mut self, class_id: ClassId) {
        let Some(class) = self.classes[class_id.to_index()].take() else {
            return;
        };
        let name = class.name();
        let signature = class.jni_signature();
        self.class_name_to_index.remove(&name);
        if let Some(mirror) = class.get_mirror_ref() {
            self.mirror_to_class_index.remove(&mirror);
        }
        self.unloaded.push(UnloadedClass { signature });
        debug_log!("Unloaded class {}", self.interner.resolve(&name));
    }

    pub fn take_unloaded(&mut self) -> Vec<UnloadedClass> {
        std::mem::take(&mut self.unloaded)
    }

    pub fn take_pending_prepares(&mut self) -> Vec<ClassId> {
        std::mem::take(&mut self.pending_prepares)
    }
}
