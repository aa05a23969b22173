use crate::classfile::{
    ClassFile, ClassFlags, CodeAttribute, ConstantPool, CpEntry, FieldFlags, FieldInfo,
    LineNumberEntry, MethodFlags, MethodInfo,
};

/// Programmatic class synthesis, used by the boot class images and by tests.
/// Pool helpers return real pool indices so hand-assembled bytecode can embed
/// them; `finish` produces a `ClassFile` indistinguishable from a parsed one.
pub struct ClassBuilder {
    entries: Vec<CpEntry>,
    access_flags: ClassFlags,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    source_file: Option<u16>,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut builder = Self {
            entries: vec![CpEntry::Unusable],
            access_flags: ClassFlags::PUBLIC | ClassFlags::SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        };
        builder.this_class = builder.class(name);
        if let Some(super_name) = super_name {
            builder.super_class = builder.class(super_name);
        }
        builder
    }

    pub fn flags(&mut self, flags: ClassFlags) -> &mut Self {
        self.access_flags = flags;
        self
    }

    pub fn implements(&mut self, name: &str) -> &mut Self {
        let idx = self.class(name);
        self.interfaces.push(idx);
        self
    }

    pub fn source_file(&mut self, name: &str) -> &mut Self {
        // The writer resolves attribute names by value, so they must exist.
        self.utf8("SourceFile");
        let idx = self.utf8(name);
        self.source_file = Some(idx);
        self
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| matches!(e, CpEntry::Utf8(existing) if existing == s))
        {
            return pos as u16;
        }
        self.entries.push(CpEntry::Utf8(s.to_string()));
        (self.entries.len() - 1) as u16
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| matches!(e, CpEntry::Class { name_index: n } if *n == name_index))
        {
            return pos as u16;
        }
        self.entries.push(CpEntry::Class { name_index });
        (self.entries.len() - 1) as u16
    }

    pub fn string(&mut self, s: &str) -> u16 {
        let string_index = self.utf8(s);
        self.entries.push(CpEntry::String { string_index });
        (self.entries.len() - 1) as u16
    }

    pub fn integer(&mut self, v: i32) -> u16 {
        self.entries.push(CpEntry::Integer(v));
        (self.entries.len() - 1) as u16
    }

    pub fn long(&mut self, v: i64) -> u16 {
        self.entries.push(CpEntry::Long(v));
        let idx = (self.entries.len() - 1) as u16;
        self.entries.push(CpEntry::Unusable);
        idx
    }

    pub fn float(&mut self, v: f32) -> u16 {
        self.entries.push(CpEntry::Float(v));
        (self.entries.len() - 1) as u16
    }

    pub fn double(&mut self, v: f64) -> u16 {
        self.entries.push(CpEntry::Double(v));
        let idx = (self.entries.len() - 1) as u16;
        self.entries.push(CpEntry::Unusable);
        idx
    }

    fn name_and_type(&mut self, name: &str, desc: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(desc);
        self.entries.push(CpEntry::NameAndType {
            name_index,
            descriptor_index,
        });
        (self.entries.len() - 1) as u16
    }

    pub fn field_ref(&mut self, class: &str, name: &str, desc: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, desc);
        self.entries.push(CpEntry::FieldRef {
            class_index,
            name_and_type_index,
        });
        (self.entries.len() - 1) as u16
    }

    pub fn method_ref(&mut self, class: &str, name: &str, desc: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, desc);
        self.entries.push(CpEntry::MethodRef {
            class_index,
            name_and_type_index,
        });
        (self.entries.len() - 1) as u16
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, desc: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, desc);
        self.entries.push(CpEntry::InterfaceMethodRef {
            class_index,
            name_and_type_index,
        });
        (self.entries.len() - 1) as u16
    }

    pub fn field(&mut self, name: &str, desc: &str, flags: FieldFlags) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(desc);
        self.fields.push(FieldInfo {
            access_flags: flags,
            name_index,
            descriptor_index,
            constant_value: None,
        });
        self
    }

    pub fn method(
        &mut self,
        name: &str,
        desc: &str,
        flags: MethodFlags,
        code: CodeAttribute,
    ) -> &mut Self {
        self.utf8("Code");
        if !code.line_numbers.is_empty() {
            self.utf8("LineNumberTable");
        }
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(desc);
        self.methods.push(MethodInfo {
            access_flags: flags,
            name_index,
            descriptor_index,
            code: Some(code),
        });
        self
    }

    pub fn native_method(&mut self, name: &str, desc: &str, flags: MethodFlags) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(desc);
        self.methods.push(MethodInfo {
            access_flags: flags | MethodFlags::NATIVE,
            name_index,
            descriptor_index,
            code: None,
        });
        self
    }

    pub fn abstract_method(&mut self, name: &str, desc: &str, flags: MethodFlags) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(desc);
        self.methods.push(MethodInfo {
            access_flags: flags | MethodFlags::ABSTRACT,
            name_index,
            descriptor_index,
            code: None,
        });
        self
    }

    pub fn finish(&mut self) -> ClassFile {
        ClassFile {
            minor_version: 0,
            major_version: 48,
            cp: ConstantPool::new(std::mem::take(&mut self.entries)),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: std::mem::take(&mut self.interfaces),
            fields: std::mem::take(&mut self.fields),
            methods: std::mem::take(&mut self.methods),
            source_file: self.source_file,
        }
    }
}

/// Bytecode assembly buffer for the builder's hand-written method bodies.
#[derive(Default)]
pub struct Assembler {
    bytes: Vec<u8>,
    line_numbers: Vec<LineNumberEntry>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pc(&self) -> u16 {
        self.bytes.len() as u16
    }

    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.bytes.push(opcode);
        self
    }

    pub fn op_u8(&mut self, opcode: u8, operand: u8) -> &mut Self {
        self.bytes.push(opcode);
        self.bytes.push(operand);
        self
    }

    pub fn op_u16(&mut self, opcode: u8, operand: u16) -> &mut Self {
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&operand.to_be_bytes());
        self
    }

    /// Branch with a pc-relative offset computed from the opcode's own pc.
    pub fn op_branch(&mut self, opcode: u8, target: u16) -> &mut Self {
        let offset = target as i32 - self.bytes.len() as i32;
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&(offset as i16).to_be_bytes());
        self
    }

    pub fn raw(&mut self, byte: u8) -> &mut Self {
        self.bytes.push(byte);
        self
    }

    pub fn line(&mut self, line_number: u16) -> &mut Self {
        self.line_numbers.push(LineNumberEntry {
            start_pc: self.pc(),
            line_number,
        });
        self
    }

    pub fn finish(&mut self, max_stack: u16, max_locals: u16) -> CodeAttribute {
        CodeAttribute {
            max_stack,
            max_locals,
            code: std::mem::take(&mut self.bytes),
            exception_table: Vec::new(),
            line_numbers: std::mem::take(&mut self.line_numbers),
        }
    }

    pub fn finish_with_handlers(
        &mut self,
        max_stack: u16,
        max_locals: u16,
        exception_table: Vec<crate::classfile::ExceptionTableEntry>,
    ) -> CodeAttribute {
        CodeAttribute {
            max_stack,
            max_locals,
            code: std::mem::take(&mut self.bytes),
            exception_table,
            line_numbers: std::mem::take(&mut self.line_numbers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_entries_are_deduplicated() {
        let mut b = ClassBuilder::new("A", Some("java/lang/Object"));
        let first = b.class("java/lang/Object");
        let second = b.class("java/lang/Object");
        assert_eq!(first, second);
        assert_eq!(b.utf8("hi"), b.utf8("hi"));
    }

    #[test]
    fn long_entries_occupy_two_slots() {
        let mut b = ClassBuilder::new("A", Some("java/lang/Object"));
        let l = b.long(7);
        let next = b.integer(1);
        assert_eq!(next, l + 2);
    }
}
