use crate::classfile::{ClassFile, CodeAttribute, CpEntry, CpTag};
use byteorder::{BigEndian, WriteBytesExt};

/// Encodes a `ClassFile` back into wire form. Used by tests and tooling that
/// want real `.class` bytes for a synthesized class; the utf8 indices for the
/// attribute names must already exist in the pool (the builder guarantees
/// this).
pub fn encode(cf: &ClassFile) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<BigEndian>(super::CLASS_MAGIC).unwrap();
    out.write_u16::<BigEndian>(cf.minor_version).unwrap();
    out.write_u16::<BigEndian>(cf.major_version).unwrap();

    out.write_u16::<BigEndian>(cf.cp.entries.len() as u16)
        .unwrap();
    let mut skip_next = false;
    for (idx, entry) in cf.cp.entries.iter().enumerate() {
        if idx == 0 {
            continue;
        }
        if skip_next {
            skip_next = false;
            continue;
        }
        match entry {
            CpEntry::Utf8(s) => {
                out.push(CpTag::Utf8 as u8);
                out.write_u16::<BigEndian>(s.len() as u16).unwrap();
                out.extend_from_slice(s.as_bytes());
            }
            CpEntry::Integer(v) => {
                out.push(CpTag::Integer as u8);
                out.write_u32::<BigEndian>(*v as u32).unwrap();
            }
            CpEntry::Float(v) => {
                out.push(CpTag::Float as u8);
                out.write_u32::<BigEndian>(v.to_bits()).unwrap();
            }
            CpEntry::Long(v) => {
                out.push(CpTag::Long as u8);
                out.write_u64::<BigEndian>(*v as u64).unwrap();
                skip_next = true;
            }
            CpEntry::Double(v) => {
                out.push(CpTag::Double as u8);
                out.write_u64::<BigEndian>(v.to_bits()).unwrap();
                skip_next = true;
            }
            CpEntry::Class { name_index } => {
                out.push(CpTag::Class as u8);
                out.write_u16::<BigEndian>(*name_index).unwrap();
            }
            CpEntry::String { string_index } => {
                out.push(CpTag::String as u8);
                out.write_u16::<BigEndian>(*string_index).unwrap();
            }
            CpEntry::FieldRef {
                class_index,
                name_and_type_index,
            } => {
                out.push(CpTag::FieldRef as u8);
                out.write_u16::<BigEndian>(*class_index).unwrap();
                out.write_u16::<BigEndian>(*name_and_type_index).unwrap();
            }
            CpEntry::MethodRef {
                class_index,
                name_and_type_index,
            } => {
                out.push(CpTag::MethodRef as u8);
                out.write_u16::<BigEndian>(*class_index).unwrap();
                out.write_u16::<BigEndian>(*name_and_type_index).unwrap();
            }
            CpEntry::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => {
                out.push(CpTag::InterfaceMethodRef as u8);
                out.write_u16::<BigEndian>(*class_index).unwrap();
                out.write_u16::<BigEndian>(*name_and_type_index).unwrap();
            }
            CpEntry::NameAndType {
                name_index,
                descriptor_index,
            } => {
                out.push(CpTag::NameAndType as u8);
                out.write_u16::<BigEndian>(*name_index).unwrap();
                out.write_u16::<BigEndian>(*descriptor_index).unwrap();
            }
            CpEntry::Unusable => unreachable!("unusable slot outside long/double shadow"),
        }
    }

    out.write_u16::<BigEndian>(cf.access_flags.get_raw()).unwrap();
    out.write_u16::<BigEndian>(cf.this_class).unwrap();
    out.write_u16::<BigEndian>(cf.super_class).unwrap();

    out.write_u16::<BigEndian>(cf.interfaces.len() as u16).unwrap();
    for iface in &cf.interfaces {
        out.write_u16::<BigEndian>(*iface).unwrap();
    }

    let utf8_index = |name: &str| -> u16 {
        cf.cp
            .entries
            .iter()
            .position(|e| matches!(e, CpEntry::Utf8(s) if s == name))
            .expect("attribute name missing from pool") as u16
    };

    out.write_u16::<BigEndian>(cf.fields.len() as u16).unwrap();
    for field in &cf.fields {
        out.write_u16::<BigEndian>(field.access_flags.get_raw())
            .unwrap();
        out.write_u16::<BigEndian>(field.name_index).unwrap();
        out.write_u16::<BigEndian>(field.descriptor_index).unwrap();
        match field.constant_value {
            Some(value_index) => {
                out.write_u16::<BigEndian>(1).unwrap();
                out.write_u16::<BigEndian>(utf8_index("ConstantValue")).unwrap();
                out.write_u32::<BigEndian>(2).unwrap();
                out.write_u16::<BigEndian>(value_index).unwrap();
            }
            None => out.write_u16::<BigEndian>(0).unwrap(),
        }
    }

    out.write_u16::<BigEndian>(cf.methods.len() as u16).unwrap();
    for method in &cf.methods {
        out.write_u16::<BigEndian>(method.access_flags.get_raw())
            .unwrap();
        out.write_u16::<BigEndian>(method.name_index).unwrap();
        out.write_u16::<BigEndian>(method.descriptor_index).unwrap();
        match &method.code {
            Some(code) => {
                out.write_u16::<BigEndian>(1).unwrap();
                out.write_u16::<BigEndian>(utf8_index("Code")).unwrap();
                let body = encode_code(code, utf8_index("LineNumberTable"));
                out.write_u32::<BigEndian>(body.len() as u32).unwrap();
                out.extend_from_slice(&body);
            }
            None => out.write_u16::<BigEndian>(0).unwrap(),
        }
    }

    match cf.source_file {
        Some(source_index) => {
            out.write_u16::<BigEndian>(1).unwrap();
            out.write_u16::<BigEndian>(utf8_index("SourceFile")).unwrap();
            out.write_u32::<BigEndian>(2).unwrap();
            out.write_u16::<BigEndian>(source_index).unwrap();
        }
        None => out.write_u16::<BigEndian>(0).unwrap(),
    }

    out
}

fn encode_code(code: &CodeAttribute, line_table_name: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u16::<BigEndian>(code.max_stack).unwrap();
    out.write_u16::<BigEndian>(code.max_locals).unwrap();
    out.write_u32::<BigEndian>(code.code.len() as u32).unwrap();
    out.extend_from_slice(&code.code);
    out.write_u16::<BigEndian>(code.exception_table.len() as u16)
        .unwrap();
    for entry in &code.exception_table {
        out.write_u16::<BigEndian>(entry.start_pc).unwrap();
        out.write_u16::<BigEndian>(entry.end_pc).unwrap();
        out.write_u16::<BigEndian>(entry.handler_pc).unwrap();
        out.write_u16::<BigEndian>(entry.catch_type).unwrap();
    }
    if code.line_numbers.is_empty() {
        out.write_u16::<BigEndian>(0).unwrap();
    } else {
        out.write_u16::<BigEndian>(1).unwrap();
        out.write_u16::<BigEndian>(line_table_name).unwrap();
        out.write_u32::<BigEndian>(2 + code.line_numbers.len() as u32 * 4)
            .unwrap();
        out.write_u16::<BigEndian>(code.line_numbers.len() as u16)
            .unwrap();
        for entry in &code.line_numbers {
            out.write_u16::<BigEndian>(entry.start_pc).unwrap();
            out.write_u16::<BigEndian>(entry.line_number).unwrap();
        }
    }
    out
}
