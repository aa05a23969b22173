use crate::classfile::{ExceptionTableEntry, LineNumberEntry, MethodFlags};
use crate::error::VmError;
use crate::keys::{ClassId, MethodDescriptorId, Symbol};
use crate::throw_exception;

#[derive(Debug)]
pub struct CodeBody {
    /// Raw verified bytecode. Mutable in the arena because breakpoint
    /// installation substitutes the opcode byte in place.
    pub code: Box<[u8]>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub line_numbers: Vec<LineNumberEntry>,
    pub exception_table: Vec<ExceptionTableEntry>,
}

#[derive(Debug)]
pub enum MethodBody {
    Interpreted(CodeBody),
    Native,
    Abstract,
}

#[derive(Debug)]
pub struct Method {
    class_id: ClassId,
    pub name: Symbol,
    pub desc: Symbol,
    descriptor_id: MethodDescriptorId,
    flags: MethodFlags,
    body: MethodBody,
}

impl Method {
    pub fn new(
        class_id: ClassId,
        name: Symbol,
        desc: Symbol,
        descriptor_id: MethodDescriptorId,
        flags: MethodFlags,
        body: MethodBody,
    ) -> Self {
        Self {
            class_id,
            name,
            desc,
            descriptor_id,
            flags,
            body,
        }
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn descriptor_id(&self) -> MethodDescriptorId {
        self.descriptor_id
    }

    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }

    pub fn is_native(&self) -> bool {
        self.flags.is_native()
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.is_abstract()
    }

    pub fn is_synchronized(&self) -> bool {
        self.flags.is_synchronized()
    }

    pub fn code(&self) -> Result<&[u8], VmError> {
        match &self.body {
            MethodBody::Interpreted(body) => Ok(&body.code),
            _ => throw_exception!(InternalError, "method has no bytecode"),
        }
    }

    /// Used by breakpoint install/remove to substitute the opcode byte.
    pub fn code_mut(&mut self) -> Result<&mut [u8], VmError> {
        match &mut self.body {
            MethodBody::Interpreted(body) => Ok(&mut body.code),
            _ => throw_exception!(InternalError, "method has no bytecode"),
        }
    }

    pub fn frame_attributes(&self) -> Result<(u16, u16), VmError> {
        match &self.body {
            MethodBody::Interpreted(body) => Ok((body.max_stack, body.max_locals)),
            _ => throw_exception!(InternalError, "method has no bytecode"),
        }
    }

    pub fn exception_table(&self) -> &[ExceptionTableEntry] {
        match &self.body {
            MethodBody::Interpreted(body) => &body.exception_table,
            _ => &[],
        }
    }

    pub fn line_table(&self) -> &[LineNumberEntry] {
        match &self.body {
            MethodBody::Interpreted(body) => &body.line_numbers,
            _ => &[],
        }
    }

    /// Source line covering `pc`, when a line table exists.
    pub fn line_for_pc(&self, pc: usize) -> Option<u16> {
        let table = self.line_table();
        if table.is_empty() {
            return None;
        }
        let mut result = None;
        for entry in table {
            if entry.start_pc as usize <= pc {
                result = Some(entry.line_number);
            } else {
                break;
            }
        }
        result.or(Some(table[0].line_number))
    }
}
