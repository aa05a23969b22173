use crate::classfile::{ClassFile, CpEntry, FieldInfo, MethodInfo};
use crate::error::VmError;
use crate::heap::method_area::MethodArea;
use crate::heap::Heap;
use crate::jtype::JavaType;
use crate::keys::{ClassId, FieldKey, MethodId, MethodKey, Symbol};
use crate::rt::constant_pool::RuntimeConstantPool;
use crate::rt::field::{InstanceField, StaticField};
use crate::rt::method::{CodeBody, Method, MethodBody};
use crate::rt::{BaseClass, ClassLike, ClassState, JvmClass};
use crate::vm::Value;
use crate::{build_exception, throw_exception};
use once_cell::unsync::OnceCell;
use std::cell::Cell;
use std::collections::HashMap;

/// Loaded class or interface. Interfaces are the same variant with the
/// INTERFACE access flag; their vtables stay empty and their declared
/// methods live in the declared index.
pub struct InstanceClass {
    base: BaseClass,

    pub cp: RuntimeConstantPool,

    declared_method_index: OnceCell<HashMap<MethodKey, MethodId>>,
    /// Declaration order, for debugger enumeration.
    all_methods: OnceCell<Vec<MethodId>>,
    vtable: OnceCell<Vec<MethodId>>,
    vtable_index: OnceCell<HashMap<MethodKey, u16>>,
    itable: OnceCell<HashMap<MethodKey, MethodId>>,

    instance_fields: OnceCell<Vec<InstanceField>>,
    instance_field_index: OnceCell<HashMap<FieldKey, usize>>,
    /// Field bytes past the object header area.
    instance_size: OnceCell<usize>,
    /// Payload offsets of every reference-typed instance field, supers
    /// included; this is the GC's exact layout map.
    ref_field_offsets: OnceCell<Vec<usize>>,
    /// Offset of `java/lang/ref/Reference.referent` when this class is a
    /// reference kind (inherited by subclasses).
    referent_offset: OnceCell<Option<usize>>,
}

impl InstanceClass {
    fn push_shell(
        cf: &ClassFile,
        cp: RuntimeConstantPool,
        super_id: Option<ClassId>,
        method_area: &mut MethodArea,
    ) -> Result<ClassId, VmError> {
        let interner = method_area.interner();
        let name = interner.get_or_intern(cf.class_name()?);
        let jni_signature = interner.get_or_intern(format!("L{};", cf.class_name()?));
        let source_file = match cf.source_file {
            Some(idx) => Some(interner.get_or_intern(cf.cp.get_utf8(idx)?)),
            None => None,
        };

        let class = JvmClass::Instance(Box::new(Self {
            base: BaseClass::new(name, jni_signature, cf.access_flags, super_id, source_file),
            cp,
            declared_method_index: OnceCell::new(),
            all_methods: OnceCell::new(),
            vtable: OnceCell::new(),
            vtable_index: OnceCell::new(),
            itable: OnceCell::new(),
            instance_fields: OnceCell::new(),
            instance_field_index: OnceCell::new(),
            instance_size: OnceCell::new(),
            ref_field_offsets: OnceCell::new(),
            referent_offset: OnceCell::new(),
        }));
        Ok(method_area.push_class(class))
    }

    fn link_fields(
        fields: Vec<FieldInfo>,
        raw_cp: &crate::classfile::ConstantPool,
        this_id: ClassId,
        super_id: Option<ClassId>,
        method_area: &mut MethodArea,
    ) -> Result<(), VmError> {
        let (mut instance_fields, mut field_index, mut cursor, mut ref_offsets, inherited_referent) =
            match super_id {
                Some(id) => {
                    let sup = method_area.get_instance_class(&id)?;
                    (
                        sup.get_instance_fields()?.clone(),
                        sup.get_instance_field_index()?.clone(),
                        Heap::OBJ_FIELDS_OFFSET + sup.get_instance_size()?,
                        sup.ref_field_offsets()?.to_vec(),
                        sup.referent_offset(),
                    )
                }
                None => (
                    Vec::new(),
                    HashMap::new(),
                    Heap::OBJ_FIELDS_OFFSET,
                    Vec::new(),
                    None,
                ),
            };
        let mut static_fields = Vec::new();
        let mut static_index = HashMap::new();

        for field in fields {
            let (key, descriptor_id) = {
                let interner = method_area.interner();
                let key = FieldKey {
                    name: interner.get_or_intern(raw_cp.get_utf8(field.name_index)?),
                    desc: interner.get_or_intern(raw_cp.get_utf8(field.descriptor_index)?),
                };
                (key, method_area.get_or_new_field_descriptor_id(key.desc)?)
            };
            let descriptor = method_area.get_field_descriptor(&descriptor_id);

            if field.access_flags.is_static() {
                let mut value = Value::default_for(descriptor);
                let mut string_constant = None;
                if let Some(cv_index) = field.constant_value {
                    match raw_cp.get(cv_index)? {
                        CpEntry::Integer(v) => value = Value::Integer(*v),
                        CpEntry::Long(v) => value = Value::Long(*v),
                        CpEntry::Float(v) => value = Value::Float(*v),
                        CpEntry::Double(v) => value = Value::Double(*v),
                        CpEntry::String { string_index } => {
                            string_constant = Some(
                                method_area
                                    .interner()
                                    .get_or_intern(raw_cp.get_utf8(*string_index)?),
                            );
                        }
                        other => {
                            return Err(VmError::ClassFormat(format!(
                                "unusable ConstantValue entry {other:?}"
                            )))
                        }
                    }
                }
                static_index.insert(key, static_fields.len());
                static_fields.push(StaticField {
                    key,
                    flags: field.access_flags,
                    descriptor_id,
                    declaring_class: this_id,
                    value: Cell::new(value),
                    string_constant,
                });
            } else {
                let size = descriptor.as_allocation_type().byte_size();
                cursor = (cursor + size - 1) & !(size - 1);
                if matches!(descriptor, JavaType::Instance(_) | JavaType::Array(_)) {
                    ref_offsets.push(cursor);
                }
                field_index.insert(key, instance_fields.len());
                instance_fields.push(InstanceField {
                    key,
                    flags: field.access_flags,
                    descriptor_id,
                    offset: cursor,
                    declaring_class: this_id,
                });
                cursor += size;
            }
        }

        let referent_offset = if inherited_referent.is_some() {
            inherited_referent
        } else {
            let this_name = method_area.get_instance_class(&this_id)?.name();
            if this_name == method_area.br().java_lang_ref_reference_sym {
                let referent_key = method_area.br().reference_referent_fk;
                field_index
                    .get(&referent_key)
                    .map(|idx| instance_fields[*idx].offset)
            } else {
                None
            }
        };
        // The referent is weak by definition; the collector must not treat it
        // as a strong edge.
        if let Some(offset) = referent_offset {
            ref_offsets.retain(|o| *o != offset);
        }

        let this = method_area.get_instance_class(&this_id)?;
        let instance_size = cursor - Heap::OBJ_FIELDS_OFFSET;
        this.instance_fields
            .set(instance_fields)
            .map_err(|_| VmError::Internal("instance fields already set".to_string()))?;
        this.instance_field_index
            .set(field_index)
            .map_err(|_| VmError::Internal("field index already set".to_string()))?;
        this.instance_size
            .set(instance_size)
            .map_err(|_| VmError::Internal("instance size already set".to_string()))?;
        this.ref_field_offsets
            .set(ref_offsets)
            .map_err(|_| VmError::Internal("ref offsets already set".to_string()))?;
        this.referent_offset
            .set(referent_offset)
            .map_err(|_| VmError::Internal("referent offset already set".to_string()))?;
        this.base.set_static_fields(static_fields, static_index)?;
        Ok(())
    }

    fn prepare_methods(
        methods: Vec<MethodInfo>,
        raw_cp: &crate::classfile::ConstantPool,
        this_id: ClassId,
        super_id: Option<ClassId>,
        method_area: &mut MethodArea,
    ) -> Result<(Vec<MethodId>, HashMap<MethodKey, u16>), VmError> {
        let is_interface = method_area.get_instance_class(&this_id)?.flags().is_interface();
        let (mut vtable, mut vtable_index) = match super_id.filter(|_| !is_interface) {
            Some(id) => {
                let sup = method_area.get_instance_class(&id)?;
                (sup.get_vtable()?.clone(), sup.get_vtable_index()?.clone())
            }
            None => (Vec::new(), HashMap::new()),
        };
        let mut declared_index = HashMap::new();
        let mut all_methods = Vec::with_capacity(methods.len());

        for method in methods {
            let key = {
                let interner = method_area.interner();
                MethodKey {
                    name: interner.get_or_intern(raw_cp.get_utf8(method.name_index)?),
                    desc: interner.get_or_intern(raw_cp.get_utf8(method.descriptor_index)?),
                }
            };
            let descriptor_id = method_area.get_or_new_method_descriptor_id(key.desc)?;

            let body = if method.access_flags.is_abstract() {
                MethodBody::Abstract
            } else if method.access_flags.is_native() {
                MethodBody::Native
            } else {
                let code = method.code.ok_or_else(|| {
                    VmError::ClassFormat("non-abstract method without Code".to_string())
                })?;
                MethodBody::Interpreted(CodeBody {
                    code: code.code.into_boxed_slice(),
                    max_stack: code.max_stack,
                    max_locals: code.max_locals,
                    line_numbers: code.line_numbers,
                    exception_table: code.exception_table,
                })
            };
            let method_id = method_area.push_method(Method::new(
                this_id,
                key.name,
                key.desc,
                descriptor_id,
                method.access_flags,
                body,
            ));
            all_methods.push(method_id);

            let is_clinit = key.name == method_area.br().clinit_sym;
            let is_constructor = key.name == method_area.br().init_sym;
            let virtual_dispatch = !method.access_flags.is_static()
                && !method.access_flags.is_private()
                && !is_constructor
                && !is_clinit
                && !is_interface;

            if is_clinit {
                method_area
                    .get_instance_class(&this_id)?
                    .base
                    .set_clinit(method_id)?;
            } else if virtual_dispatch {
                if let Some(pos) = vtable_index.get(&key) {
                    vtable[*pos as usize] = method_id;
                } else {
                    vtable_index.insert(key, vtable.len() as u16);
                    vtable.push(method_id);
                }
            } else {
                declared_index.insert(key, method_id);
            }
        }

        let this = method_area.get_instance_class(&this_id)?;
        this.declared_method_index
            .set(declared_index)
            .map_err(|_| VmError::Internal("declared methods already set".to_string()))?;
        this.all_methods
            .set(all_methods)
            .map_err(|_| VmError::Internal("method list already set".to_string()))?;
        Ok((vtable, vtable_index))
    }

    fn link_interfaces(
        interfaces: Vec<u16>,
        this_id: ClassId,
        super_id: Option<ClassId>,
        method_area: &mut MethodArea,
    ) -> Result<(), VmError> {
        let mut all = match super_id {
            Some(id) => method_area
                .get_instance_class(&id)?
                .get_interfaces()?
                .clone(),
            None => Vec::new(),
        };
        let mut direct = Vec::new();

        for interface in interfaces {
            let name = method_area
                .get_instance_class(&this_id)?
                .cp
                .get_class_sym(interface)?;
            let interface_id = method_area.get_class_id_or_load(name)?;
            direct.push(interface_id);
            if !all.contains(&interface_id) {
                all.push(interface_id);
            }
            let inherited = method_area
                .get_instance_class(&interface_id)?
                .get_interfaces()?
                .clone();
            for id in inherited {
                if !all.contains(&id) {
                    all.push(id);
                }
            }
        }

        let this = method_area.get_instance_class(&this_id)?;
        this.base.set_interfaces(all)?;
        this.base.set_direct_interfaces(direct)?;
        Ok(())
    }

    fn link_itable(
        this_id: ClassId,
        super_id: Option<ClassId>,
        method_area: &mut MethodArea,
        mut vtable: Vec<MethodId>,
        mut vtable_index: HashMap<MethodKey, u16>,
    ) -> Result<(), VmError> {
        let is_interface = method_area.get_instance_class(&this_id)?.flags().is_interface();
        let mut itable = match super_id.filter(|_| !is_interface) {
            Some(id) => method_area.get_instance_class(&id)?.get_itable()?.clone(),
            None => HashMap::new(),
        };

        if !is_interface {
            let interfaces = method_area
                .get_instance_class(&this_id)?
                .get_interfaces()?
                .clone();
            for interface_id in interfaces {
                let declared: Vec<(MethodKey, MethodId)> = {
                    let interface = method_area.get_instance_class(&interface_id)?;
                    let index = interface.get_declared_methods()?;
                    index.iter().map(|(k, v)| (*k, *v)).collect()
                };
                for (key, interface_method_id) in declared {
                    let method = method_area.get_method(&interface_method_id);
                    if method.is_static() || key.name == method_area.br().init_sym {
                        continue;
                    }
                    let impl_id = match vtable_index.get(&key) {
                        Some(pos) => vtable[*pos as usize],
                        None if !method.is_abstract() => {
                            // Default method inherited as-is.
                            vtable_index.insert(key, vtable.len() as u16);
                            vtable.push(interface_method_id);
                            interface_method_id
                        }
                        None => {
                            let this = method_area.get_instance_class(&this_id)?;
                            if !this.flags().is_abstract() {
                                return Err(build_exception!(
                                    IncompatibleClassChangeError,
                                    "missing implementation of interface method"
                                ));
                            }
                            continue;
                        }
                    };
                    itable.insert(key, impl_id);
                }
            }
        }

        let this = method_area.get_instance_class(&this_id)?;
        this.itable
            .set(itable)
            .map_err(|_| VmError::Internal("itable already set".to_string()))?;
        this.vtable
            .set(vtable)
            .map_err(|_| VmError::Internal("vtable already set".to_string()))?;
        this.vtable_index
            .set(vtable_index)
            .map_err(|_| VmError::Internal("vtable index already set".to_string()))?;
        Ok(())
    }

    pub fn load_and_link(
        cf: ClassFile,
        method_area: &mut MethodArea,
        super_id: Option<ClassId>,
    ) -> Result<ClassId, VmError> {
        let runtime_cp = RuntimeConstantPool::from_classfile(&cf.cp, method_area.interner())?;
        let this_id = Self::push_shell(&cf, runtime_cp, super_id, method_area)?;

        Self::link_fields(cf.fields, &cf.cp, this_id, super_id, method_area)?;
        let (vtable, vtable_index) =
            Self::prepare_methods(cf.methods, &cf.cp, this_id, super_id, method_area)?;
        Self::link_interfaces(cf.interfaces, this_id, super_id, method_area)?;
        Self::link_itable(this_id, super_id, method_area, vtable, vtable_index)?;

        let this = method_area.get_instance_class(&this_id)?;
        this.set_state(ClassState::Loaded);
        Ok(this_id)
    }

    pub fn get_instance_field(&self, key: &FieldKey) -> Result<&InstanceField, VmError> {
        let idx = self
            .get_instance_field_index()?
            .get(key)
            .copied()
            .ok_or_else(|| {
                build_exception!(NoSuchFieldError, "field lookup failed")
            })?;
        Ok(&self.get_instance_fields()?[idx])
    }

    pub fn get_vtable_method_id(&self, key: &MethodKey) -> Result<MethodId, VmError> {
        match self.get_vtable_index()?.get(key) {
            Some(pos) => Ok(self.get_vtable()?[*pos as usize]),
            None => throw_exception!(NoSuchMethodError, "virtual method lookup failed"),
        }
    }

    pub fn get_vtable_method_id_opt(&self, key: &MethodKey) -> Option<MethodId> {
        let pos = *self.get_vtable_index().ok()?.get(key)?;
        Some(self.get_vtable().ok()?[pos as usize])
    }

    /// invokespecial / invokestatic target inside this class only.
    pub fn get_declared_method_id_opt(&self, key: &MethodKey) -> Option<MethodId> {
        if let Some(id) = self.declared_method_index.get()?.get(key) {
            return Some(*id);
        }
        self.get_vtable_method_id_opt(key)
    }

    pub fn get_interface_method_id_opt(&self, key: &MethodKey) -> Option<MethodId> {
        if let Some(id) = self.itable.get()?.get(key) {
            return Some(*id);
        }
        self.get_vtable_method_id_opt(key)
    }

    pub fn is_reference_kind(&self) -> bool {
        self.referent_offset().is_some()
    }

    pub fn referent_offset(&self) -> Option<usize> {
        self.referent_offset.get().copied().flatten()
    }

    pub fn methods_in_order(&self) -> Result<&Vec<MethodId>, VmError> {
        self.all_methods
            .get()
            .ok_or_else(|| VmError::Internal("method list not linked yet".to_string()))
    }

    pub fn get_instance_fields(&self) -> Result<&Vec<InstanceField>, VmError> {
        self.instance_fields
            .get()
            .ok_or_else(|| VmError::Internal("instance fields not linked yet".to_string()))
    }

    fn get_instance_field_index(&self) -> Result<&HashMap<FieldKey, usize>, VmError> {
        self.instance_field_index
            .get()
            .ok_or_else(|| VmError::Internal("field index not linked yet".to_string()))
    }

    pub fn get_instance_size(&self) -> Result<usize, VmError> {
        self.instance_size
            .get()
            .copied()
            .ok_or_else(|| VmError::Internal("instance size not linked yet".to_string()))
    }

    pub fn ref_field_offsets(&self) -> Result<&[usize], VmError> {
        self.ref_field_offsets
            .get()
            .map(|v| v.as_slice())
            .ok_or_else(|| VmError::Internal("ref offsets not linked yet".to_string()))
    }

    pub(crate) fn get_vtable(&self) -> Result<&Vec<MethodId>, VmError> {
        self.vtable
            .get()
            .ok_or_else(|| VmError::Internal("vtable not linked yet".to_string()))
    }

    pub(crate) fn get_vtable_index(&self) -> Result<&HashMap<MethodKey, u16>, VmError> {
        self.vtable_index
            .get()
            .ok_or_else(|| VmError::Internal("vtable index not linked yet".to_string()))
    }

    fn get_itable(&self) -> Result<&HashMap<MethodKey, MethodId>, VmError> {
        self.itable
            .get()
            .ok_or_else(|| VmError::Internal("itable not linked yet".to_string()))
    }

    pub(crate) fn get_declared_methods(&self) -> Result<&HashMap<MethodKey, MethodId>, VmError> {
        self.declared_method_index
            .get()
            .ok_or_else(|| VmError::Internal("declared methods not linked yet".to_string()))
    }
}

impl ClassLike for InstanceClass {
    fn base(&self) -> &BaseClass {
        &self.base
    }
}
