use crate::classfile::FieldFlags;
use crate::keys::{ClassId, FieldDescriptorId, FieldKey, Symbol};
use crate::vm::Value;
use std::cell::Cell;

#[derive(Debug, Clone)]
pub struct InstanceField {
    pub key: FieldKey,
    pub flags: FieldFlags,
    pub descriptor_id: FieldDescriptorId,
    /// Payload-relative byte offset inside the object chunk.
    pub offset: usize,
    pub declaring_class: ClassId,
}

#[derive(Debug)]
pub struct StaticField {
    pub key: FieldKey,
    pub flags: FieldFlags,
    pub descriptor_id: FieldDescriptorId,
    pub declaring_class: ClassId,
    pub value: Cell<Value>,
    /// String ConstantValue, interned when the class initializes (string
    /// creation needs the heap, primitive constants do not).
    pub string_constant: Option<Symbol>,
}
