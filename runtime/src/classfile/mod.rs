use crate::error::VmError;
use bitflags::bitflags;
use num_enum::TryFromPrimitive;

pub mod builder;
pub mod reader;
pub mod writer;

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;
/// JDK 1.1 through Java 8; later formats carry pool tags this VM does not
/// speak (module, dynamic call sites).
pub const MIN_MAJOR_VERSION: u16 = 45;
pub const MAX_MAJOR_VERSION: u16 = 52;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
    }
}

impl ClassFlags {
    pub fn is_interface(self) -> bool {
        self.contains(ClassFlags::INTERFACE)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(ClassFlags::ABSTRACT)
    }

    pub fn get_raw(self) -> u16 {
        self.bits()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
    }
}

impl FieldFlags {
    pub fn is_static(self) -> bool {
        self.contains(FieldFlags::STATIC)
    }

    pub fn get_raw(self) -> u16 {
        self.bits()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
    }
}

impl MethodFlags {
    pub fn is_static(self) -> bool {
        self.contains(MethodFlags::STATIC)
    }

    pub fn is_native(self) -> bool {
        self.contains(MethodFlags::NATIVE)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(MethodFlags::ABSTRACT)
    }

    pub fn is_synchronized(self) -> bool {
        self.contains(MethodFlags::SYNCHRONIZED)
    }

    pub fn is_private(self) -> bool {
        self.contains(MethodFlags::PRIVATE)
    }

    pub fn get_raw(self) -> u16 {
        self.bits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CpTag {
    Utf8 = 1,
    Integer = 3,
    Float = 4,
    Long = 5,
    Double = 6,
    Class = 7,
    String = 8,
    FieldRef = 9,
    MethodRef = 10,
    InterfaceMethodRef = 11,
    NameAndType = 12,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CpEntry {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    FieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    MethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    /// Slot 0 and the shadow slot after a long/double entry.
    Unusable,
}

/// 1-based pool, exactly as the format indexes it.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    pub entries: Vec<CpEntry>,
}

impl ConstantPool {
    pub fn new(entries: Vec<CpEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, idx: u16) -> Result<&CpEntry, VmError> {
        match self.entries.get(idx as usize) {
            None | Some(CpEntry::Unusable) => Err(VmError::ClassFormat(format!(
                "constant pool index {idx} out of range or unusable"
            ))),
            Some(entry) => Ok(entry),
        }
    }

    pub fn get_utf8(&self, idx: u16) -> Result<&str, VmError> {
        match self.get(idx)? {
            CpEntry::Utf8(s) => Ok(s),
            other => Err(VmError::ClassFormat(format!(
                "constant pool index {idx}: expected Utf8, found {other:?}"
            ))),
        }
    }

    pub fn get_class_name(&self, idx: u16) -> Result<&str, VmError> {
        match self.get(idx)? {
            CpEntry::Class { name_index } => self.get_utf8(*name_index),
            other => Err(VmError::ClassFormat(format!(
                "constant pool index {idx}: expected Class, found {other:?}"
            ))),
        }
    }

    pub fn get_name_and_type(&self, idx: u16) -> Result<(&str, &str), VmError> {
        match self.get(idx)? {
            CpEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.get_utf8(*name_index)?, self.get_utf8(*descriptor_index)?)),
            other => Err(VmError::ClassFormat(format!(
                "constant pool index {idx}: expected NameAndType, found {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: FieldFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    /// ConstantValue attribute target, when present on a static field.
    pub constant_value: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: MethodFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub code: Option<CodeAttribute>,
}

#[derive(Debug, Clone, Default)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub line_numbers: Vec<LineNumberEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Class pool index of the catch type; 0 catches everything.
    pub catch_type: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub cp: ConstantPool,
    pub access_flags: ClassFlags,
    pub this_class: u16,
    /// 0 only for java/lang/Object.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    /// SourceFile attribute (Utf8 index).
    pub source_file: Option<u16>,
}

impl ClassFile {
    pub fn class_name(&self) -> Result<&str, VmError> {
        self.cp.get_class_name(self.this_class)
    }

    pub fn super_class_name(&self) -> Result<Option<&str>, VmError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.cp.get_class_name(self.super_class).map(Some)
    }
}
