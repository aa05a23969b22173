use crate::classfile::{ConstantPool, CpEntry};
use crate::error::VmError;
use crate::heap::{HeapRef, NULL_REF};
use crate::keys::{ClassId, FieldKey, MethodKey, Symbol};
use lasso::ThreadedRodeo;
use std::cell::Cell;

/// Runtime view of a class file's constant pool: names interned, resolution
/// results cached in place.
#[derive(Debug)]
pub enum RuntimeConstant {
    Utf8(Symbol),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name: Symbol,
        resolved: Cell<Option<ClassId>>,
    },
    StringConst {
        value: Symbol,
        /// Materialized interned String object, `NULL_REF` until first ldc.
        object: Cell<HeapRef>,
    },
    FieldRef {
        class_name: Symbol,
        key: FieldKey,
    },
    MethodRef {
        class_name: Symbol,
        key: MethodKey,
    },
    InterfaceMethodRef {
        class_name: Symbol,
        key: MethodKey,
    },
    NameAndType {
        name: Symbol,
        desc: Symbol,
    },
    Unusable,
}

/// `ldc`-loadable constants.
pub enum Loadable<'a> {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Str {
        value: Symbol,
        object: &'a Cell<HeapRef>,
    },
    ClassRef(Symbol),
}

#[derive(Debug)]
pub struct RuntimeConstantPool {
    entries: Vec<RuntimeConstant>,
}

impl RuntimeConstantPool {
    pub fn from_classfile(cp: &ConstantPool, interner: &ThreadedRodeo) -> Result<Self, VmError> {
        let mut entries = Vec::with_capacity(cp.entries.len());
        for (idx, entry) in cp.entries.iter().enumerate() {
            let converted = match entry {
                CpEntry::Unusable => RuntimeConstant::Unusable,
                CpEntry::Utf8(s) => RuntimeConstant::Utf8(interner.get_or_intern(s)),
                CpEntry::Integer(v) => RuntimeConstant::Integer(*v),
                CpEntry::Float(v) => RuntimeConstant::Float(*v),
                CpEntry::Long(v) => RuntimeConstant::Long(*v),
                CpEntry::Double(v) => RuntimeConstant::Double(*v),
                CpEntry::Class { name_index } => RuntimeConstant::Class {
                    name: interner.get_or_intern(cp.get_utf8(*name_index)?),
                    resolved: Cell::new(None),
                },
                CpEntry::String { string_index } => RuntimeConstant::StringConst {
                    value: interner.get_or_intern(cp.get_utf8(*string_index)?),
                    object: Cell::new(NULL_REF),
                },
                CpEntry::FieldRef {
                    class_index,
                    name_and_type_index,
                } => {
                    let (name, desc) = cp.get_name_and_type(*name_and_type_index)?;
                    RuntimeConstant::FieldRef {
                        class_name: interner.get_or_intern(cp.get_class_name(*class_index)?),
                        key: FieldKey {
                            name: interner.get_or_intern(name),
                            desc: interner.get_or_intern(desc),
                        },
                    }
                }
                CpEntry::MethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    let (name, desc) = cp.get_name_and_type(*name_and_type_index)?;
                    RuntimeConstant::MethodRef {
                        class_name: interner.get_or_intern(cp.get_class_name(*class_index)?),
                        key: MethodKey {
                            name: interner.get_or_intern(name),
                            desc: interner.get_or_intern(desc),
                        },
                    }
                }
                CpEntry::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    let (name, desc) = cp.get_name_and_type(*name_and_type_index)?;
                    RuntimeConstant::InterfaceMethodRef {
                        class_name: interner.get_or_intern(cp.get_class_name(*class_index)?),
                        key: MethodKey {
                            name: interner.get_or_intern(name),
                            desc: interner.get_or_intern(desc),
                        },
                    }
                }
                CpEntry::NameAndType {
                    name_index,
                    descriptor_index,
                } => RuntimeConstant::NameAndType {
                    name: interner.get_or_intern(cp.get_utf8(*name_index)?),
                    desc: interner.get_or_intern(cp.get_utf8(*descriptor_index)?),
                },
            };
            debug_assert_eq!(entries.len(), idx);
            entries.push(converted);
        }
        Ok(Self { entries })
    }

    fn get(&self, idx: u16) -> Result<&RuntimeConstant, VmError> {
        match self.entries.get(idx as usize) {
            None | Some(RuntimeConstant::Unusable) => Err(VmError::ConstantNotResolvable {
                pool_idx: idx,
                expected: "any usable constant",
            }),
            Some(entry) => Ok(entry),
        }
    }

    pub fn get_utf8_sym(&self, idx: u16) -> Result<Symbol, VmError> {
        match self.get(idx)? {
            RuntimeConstant::Utf8(sym) => Ok(*sym),
            _ => Err(VmError::ConstantNotResolvable {
                pool_idx: idx,
                expected: "Utf8",
            }),
        }
    }

    pub fn get_class_sym(&self, idx: u16) -> Result<Symbol, VmError> {
        match self.get(idx)? {
            RuntimeConstant::Class { name, .. } => Ok(*name),
            _ => Err(VmError::ConstantNotResolvable {
                pool_idx: idx,
                expected: "Class",
            }),
        }
    }

    /// Class entry with its resolution cache.
    pub fn class_entry(&self, idx: u16) -> Result<(Symbol, &Cell<Option<ClassId>>), VmError> {
        match self.get(idx)? {
            RuntimeConstant::Class { name, resolved } => Ok((*name, resolved)),
            _ => Err(VmError::ConstantNotResolvable {
                pool_idx: idx,
                expected: "Class",
            }),
        }
    }

    pub fn get_field_ref(&self, idx: u16) -> Result<(Symbol, FieldKey), VmError> {
        match self.get(idx)? {
            RuntimeConstant::FieldRef { class_name, key } => Ok((*class_name, *key)),
            _ => Err(VmError::ConstantNotResolvable {
                pool_idx: idx,
                expected: "Fieldref",
            }),
        }
    }

    /// Method reference; the flag says whether it came in through an
    /// InterfaceMethodref entry.
    pub fn get_method_ref(&self, idx: u16) -> Result<(Symbol, MethodKey, bool), VmError> {
        match self.get(idx)? {
            RuntimeConstant::MethodRef { class_name, key } => Ok((*class_name, *key, false)),
            RuntimeConstant::InterfaceMethodRef { class_name, key } => {
                Ok((*class_name, *key, true))
            }
            _ => Err(VmError::ConstantNotResolvable {
                pool_idx: idx,
                expected: "Methodref",
            }),
        }
    }

    pub fn get_loadable(&self, idx: u16) -> Result<Loadable<'_>, VmError> {
        match self.get(idx)? {
            RuntimeConstant::Integer(v) => Ok(Loadable::Integer(*v)),
            RuntimeConstant::Float(v) => Ok(Loadable::Float(*v)),
            RuntimeConstant::Long(v) => Ok(Loadable::Long(*v)),
            RuntimeConstant::Double(v) => Ok(Loadable::Double(*v)),
            RuntimeConstant::StringConst { value, object } => Ok(Loadable::Str {
                value: *value,
                object,
            }),
            RuntimeConstant::Class { name, .. } => Ok(Loadable::ClassRef(*name)),
            _ => Err(VmError::ConstantNotResolvable {
                pool_idx: idx,
                expected: "loadable constant",
            }),
        }
    }

    /// Drops cached class resolutions that point at unloaded ids; the next
    /// use re-resolves by name (and fails with NoClassDefFoundError if the
    /// class is really gone).
    pub fn invalidate_resolutions(&self, dead: &std::collections::HashSet<ClassId>) {
        for entry in &self.entries {
            if let RuntimeConstant::Class { resolved, .. } = entry {
                if resolved.get().is_some_and(|id| dead.contains(&id)) {
                    resolved.set(None);
                }
            }
        }
    }

    /// String objects materialized from this pool, for the GC root scan.
    pub fn materialized_strings(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            RuntimeConstant::StringConst { object, .. } if object.get() != NULL_REF => {
                Some(object.get())
            }
            _ => None,
        })
    }
}
