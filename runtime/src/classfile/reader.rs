use crate::classfile::{
    ClassFile, ClassFlags, CodeAttribute, ConstantPool, CpEntry, CpTag, ExceptionTableEntry,
    FieldFlags, FieldInfo, LineNumberEntry, MethodFlags, MethodInfo, CLASS_MAGIC,
    MAX_MAJOR_VERSION, MIN_MAJOR_VERSION,
};
use crate::error::VmError;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Structural reader for class files. Checks are structural only (magic,
/// version range, pool tags, attribute lengths); bytecode is taken as
/// verified per the loader contract.
pub fn parse(bytes: &[u8]) -> Result<ClassFile, VmError> {
    let mut r = Cursor::new(bytes);

    let magic = read_u32(&mut r)?;
    if magic != CLASS_MAGIC {
        return Err(VmError::ClassFormat(format!(
            "bad magic 0x{magic:08X}"
        )));
    }
    let minor_version = read_u16(&mut r)?;
    let major_version = read_u16(&mut r)?;
    if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
        return Err(VmError::ClassFormat(format!(
            "unsupported class file version {major_version}.{minor_version}"
        )));
    }

    let cp = read_constant_pool(&mut r)?;
    let access_flags = ClassFlags::from_bits_truncate(read_u16(&mut r)?);
    let this_class = read_u16(&mut r)?;
    let super_class = read_u16(&mut r)?;

    let interface_count = read_u16(&mut r)?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(read_u16(&mut r)?);
    }

    let field_count = read_u16(&mut r)?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(read_field(&mut r, &cp)?);
    }

    let method_count = read_u16(&mut r)?;
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        methods.push(read_method(&mut r, &cp)?);
    }

    let mut source_file = None;
    let attr_count = read_u16(&mut r)?;
    for _ in 0..attr_count {
        let name_index = read_u16(&mut r)?;
        let length = read_u32(&mut r)? as usize;
        if cp.get_utf8(name_index)? == "SourceFile" {
            if length != 2 {
                return Err(VmError::ClassFormat(
                    "SourceFile attribute with bad length".to_string(),
                ));
            }
            source_file = Some(read_u16(&mut r)?);
        } else {
            skip(&mut r, length)?;
        }
    }

    if r.position() as usize != bytes.len() {
        return Err(VmError::ClassFormat("trailing bytes".to_string()));
    }

    let cf = ClassFile {
        minor_version,
        major_version,
        cp,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        source_file,
    };
    // The two indices every later stage relies on.
    cf.class_name()?;
    cf.super_class_name()?;
    Ok(cf)
}

fn read_constant_pool(r: &mut Cursor<&[u8]>) -> Result<ConstantPool, VmError> {
    let count = read_u16(r)?;
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(CpEntry::Unusable);
    let mut idx = 1;
    while idx < count {
        let tag_byte = read_u8(r)?;
        let tag = CpTag::try_from(tag_byte).map_err(|_| {
            VmError::ClassFormat(format!("unknown constant pool tag {tag_byte}"))
        })?;
        let entry = match tag {
            CpTag::Utf8 => {
                let len = read_u16(r)? as usize;
                let mut buf = vec![0u8; len];
                r.read_exact(&mut buf)
                    .map_err(|_| truncated())?;
                // Modified UTF-8 in the wild is almost always plain ASCII for
                // identifiers; anything else must still be valid UTF-8 here.
                let s = String::from_utf8(buf).map_err(|_| {
                    VmError::ClassFormat("malformed Utf8 constant".to_string())
                })?;
                CpEntry::Utf8(s)
            }
            CpTag::Integer => CpEntry::Integer(read_u32(r)? as i32),
            CpTag::Float => CpEntry::Float(f32::from_bits(read_u32(r)?)),
            CpTag::Long => CpEntry::Long(read_u64(r)? as i64),
            CpTag::Double => CpEntry::Double(f64::from_bits(read_u64(r)?)),
            CpTag::Class => CpEntry::Class {
                name_index: read_u16(r)?,
            },
            CpTag::String => CpEntry::String {
                string_index: read_u16(r)?,
            },
            CpTag::FieldRef => CpEntry::FieldRef {
                class_index: read_u16(r)?,
                name_and_type_index: read_u16(r)?,
            },
            CpTag::MethodRef => CpEntry::MethodRef {
                class_index: read_u16(r)?,
                name_and_type_index: read_u16(r)?,
            },
            CpTag::InterfaceMethodRef => CpEntry::InterfaceMethodRef {
                class_index: read_u16(r)?,
                name_and_type_index: read_u16(r)?,
            },
            CpTag::NameAndType => CpEntry::NameAndType {
                name_index: read_u16(r)?,
                descriptor_index: read_u16(r)?,
            },
        };
        let wide = matches!(entry, CpEntry::Long(_) | CpEntry::Double(_));
        entries.push(entry);
        idx += 1;
        if wide {
            entries.push(CpEntry::Unusable);
            idx += 1;
        }
    }
    Ok(ConstantPool::new(entries))
}

fn read_field(r: &mut Cursor<&[u8]>, cp: &ConstantPool) -> Result<FieldInfo, VmError> {
    let access_flags = FieldFlags::from_bits_truncate(read_u16(r)?);
    let name_index = read_u16(r)?;
    let descriptor_index = read_u16(r)?;
    let mut constant_value = None;
    let attr_count = read_u16(r)?;
    for _ in 0..attr_count {
        let attr_name = read_u16(r)?;
        let length = read_u32(r)? as usize;
        if cp.get_utf8(attr_name)? == "ConstantValue" {
            if length != 2 {
                return Err(VmError::ClassFormat(
                    "ConstantValue attribute with bad length".to_string(),
                ));
            }
            constant_value = Some(read_u16(r)?);
        } else {
            skip(r, length)?;
        }
    }
    Ok(FieldInfo {
        access_flags,
        name_index,
        descriptor_index,
        constant_value,
    })
}

fn read_method(r: &mut Cursor<&[u8]>, cp: &ConstantPool) -> Result<MethodInfo, VmError> {
    let access_flags = MethodFlags::from_bits_truncate(read_u16(r)?);
    let name_index = read_u16(r)?;
    let descriptor_index = read_u16(r)?;
    let mut code = None;
    let attr_count = read_u16(r)?;
    for _ in 0..attr_count {
        let attr_name = read_u16(r)?;
        let length = read_u32(r)? as usize;
        if cp.get_utf8(attr_name)? == "Code" {
            let start = r.position() as usize;
            code = Some(read_code(r, cp)?);
            let consumed = r.position() as usize - start;
            if consumed != length {
                return Err(VmError::ClassFormat(
                    "Code attribute length mismatch".to_string(),
                ));
            }
        } else {
            skip(r, length)?;
        }
    }
    Ok(MethodInfo {
        access_flags,
        name_index,
        descriptor_index,
        code,
    })
}

fn read_code(r: &mut Cursor<&[u8]>, cp: &ConstantPool) -> Result<CodeAttribute, VmError> {
    let max_stack = read_u16(r)?;
    let max_locals = read_u16(r)?;
    let code_length = read_u32(r)? as usize;
    let mut code = vec![0u8; code_length];
    r.read_exact(&mut code).map_err(|_| truncated())?;

    let et_length = read_u16(r)?;
    let mut exception_table = Vec::with_capacity(et_length as usize);
    for _ in 0..et_length {
        exception_table.push(ExceptionTableEntry {
            start_pc: read_u16(r)?,
            end_pc: read_u16(r)?,
            handler_pc: read_u16(r)?,
            catch_type: read_u16(r)?,
        });
    }

    let mut line_numbers = Vec::new();
    let attr_count = read_u16(r)?;
    for _ in 0..attr_count {
        let attr_name = read_u16(r)?;
        let length = read_u32(r)? as usize;
        if cp.get_utf8(attr_name)? == "LineNumberTable" {
            let entry_count = read_u16(r)?;
            for _ in 0..entry_count {
                line_numbers.push(LineNumberEntry {
                    start_pc: read_u16(r)?,
                    line_number: read_u16(r)?,
                });
            }
        } else {
            skip(r, length)?;
        }
    }

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        line_numbers,
    })
}

fn truncated() -> VmError {
    VmError::ClassFormat("truncated class file".to_string())
}

fn read_u8(r: &mut Cursor<&[u8]>) -> Result<u8, VmError> {
    r.read_u8().map_err(|_| truncated())
}

fn read_u16(r: &mut Cursor<&[u8]>) -> Result<u16, VmError> {
    r.read_u16::<BigEndian>().map_err(|_| truncated())
}

fn read_u32(r: &mut Cursor<&[u8]>) -> Result<u32, VmError> {
    r.read_u32::<BigEndian>().map_err(|_| truncated())
}

fn read_u64(r: &mut Cursor<&[u8]>) -> Result<u64, VmError> {
    r.read_u64::<BigEndian>().map_err(|_| truncated())
}

fn skip(r: &mut Cursor<&[u8]>, length: usize) -> Result<(), VmError> {
    let pos = r.position() as usize;
    let end = pos + length;
    if end > r.get_ref().len() {
        return Err(truncated());
    }
    r.set_position(end as u64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::builder::ClassBuilder;
    use crate::classfile::writer::encode;

    #[test]
    fn rejects_bad_magic() {
        let err = parse(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, VmError::ClassFormat(_)));
    }

    #[test]
    fn round_trips_a_synthesized_class() {
        let mut b = ClassBuilder::new("demo/Probe", Some("java/lang/Object"));
        b.field("count", "I", FieldFlags::PRIVATE);
        let cf = b.finish();
        let bytes = encode(&cf);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.class_name().unwrap(), "demo/Probe");
        assert_eq!(parsed.super_class_name().unwrap(), Some("java/lang/Object"));
        assert_eq!(parsed.fields.len(), 1);
    }
}
