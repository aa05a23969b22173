use crate::error::TransportError;
use crate::heap::{AllocType, HeapRef};
use crate::jdwp::constants::{class_status, command_set, error, tag};
use crate::jdwp::packet::PacketStream;
use crate::jtype::{JavaType, PrimitiveType};
use crate::keys::{ClassId, ThreadId};
use crate::rt::{ClassLike, ClassState, JvmClass};
use crate::vm::{Value, VirtualMachine};

mod array_reference;
mod class_object_reference;
mod event_request;
mod method;
mod object_reference;
mod reference_type;
mod stack_frame;
mod string_reference;
mod thread_reference;
mod virtual_machine;

pub type CmdResult = Result<(), u16>;

/// Per-commandset fan-out. Anything outside the supported surface answers
/// NOT_IMPLEMENTED in the reply header.
pub fn dispatch(
    vm: &mut VirtualMachine,
    cmd_set: u8,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    match cmd_set {
        command_set::VIRTUAL_MACHINE => virtual_machine::dispatch(vm, cmd, input, out),
        command_set::REFERENCE_TYPE => reference_type::dispatch(vm, cmd, input, out),
        command_set::METHOD => method::dispatch(vm, cmd, input, out),
        command_set::OBJECT_REFERENCE => object_reference::dispatch(vm, cmd, input, out),
        command_set::STRING_REFERENCE => string_reference::dispatch(vm, cmd, input, out),
        command_set::THREAD_REFERENCE => thread_reference::dispatch(vm, cmd, input, out),
        command_set::ARRAY_REFERENCE => array_reference::dispatch(vm, cmd, input, out),
        command_set::EVENT_REQUEST => event_request::dispatch(vm, cmd, input, out),
        command_set::STACK_FRAME => stack_frame::dispatch(vm, cmd, input, out),
        command_set::CLASS_OBJECT_REFERENCE => class_object_reference::dispatch(vm, cmd, input, out),
        _ => Err(error::NOT_IMPLEMENTED),
    }
}

pub(crate) fn bad(_: TransportError) -> u16 {
    error::ILLEGAL_ARGUMENT
}

pub(crate) fn object_from_id(vm: &mut VirtualMachine, id: u32) -> Result<HeapRef, u16> {
    vm.jdwp
        .session_mut()
        .and_then(|s| s.id_map.get(id))
        .ok_or(error::INVALID_OBJECT)
}

pub(crate) fn put_object(vm: &mut VirtualMachine, object: HeapRef) -> u32 {
    match vm.jdwp.session_mut() {
        Some(session) => session.id_map.put(object),
        None => 0,
    }
}

pub(crate) fn class_from_id(vm: &VirtualMachine, raw: u32) -> Result<ClassId, u16> {
    let id = ClassId::from_u32(raw).ok_or(error::INVALID_CLASS)?;
    match vm.method_area.get_class_opt(id) {
        Some(_) => Ok(id),
        None => Err(error::INVALID_CLASS),
    }
}

pub(crate) fn thread_from_object_id(vm: &mut VirtualMachine, id: u32) -> Result<ThreadId, u16> {
    let object = object_from_id(vm, id)?;
    vm.thread_for_obj(object).ok_or(error::INVALID_THREAD)
}

pub fn class_status_of(vm: &VirtualMachine, class: ClassId) -> i32 {
    match vm.method_area.get_class_opt(class) {
        Some(JvmClass::Instance(c)) => match c.state() {
            ClassState::Loading | ClassState::Loaded => {
                class_status::VERIFIED | class_status::PREPARED
            }
            ClassState::Initializing => class_status::VERIFIED | class_status::PREPARED,
            ClassState::Initialized => {
                class_status::VERIFIED | class_status::PREPARED | class_status::INITIALIZED
            }
            ClassState::ErrorInitializing => class_status::ERROR,
        },
        Some(_) => class_status::VERIFIED | class_status::PREPARED | class_status::INITIALIZED,
        None => 0,
    }
}

/// Probes object identity against the well-known classes the way the
/// original maps objects to JDWP tags.
pub fn tag_for_object(vm: &VirtualMachine, object: HeapRef) -> u8 {
    if vm.method_area.get_class_id_by_mirror(object).is_ok() {
        return tag::CLASS_OBJECT;
    }
    let Ok(class_id) = vm.heap.get_class_id(object) else {
        return tag::OBJECT;
    };
    if vm
        .heap
        .alloc_type(object)
        .map(AllocType::is_array_shaped)
        .unwrap_or(false)
    {
        return tag::ARRAY;
    }
    if let Ok(string_id) = vm.br.get_java_lang_string_id() {
        if class_id == string_id {
            return tag::STRING;
        }
    }
    if let Ok(thread_id) = vm.br.get_java_lang_thread_id() {
        if vm.method_area.is_assignable_from(thread_id, class_id) {
            return tag::THREAD;
        }
    }
    tag::OBJECT
}

pub(crate) fn declared_tag(ty: &JavaType) -> u8 {
    match ty {
        JavaType::Primitive(PrimitiveType::Boolean) => tag::BOOLEAN,
        JavaType::Primitive(PrimitiveType::Byte) => tag::BYTE,
        JavaType::Primitive(PrimitiveType::Char) => tag::CHAR,
        JavaType::Primitive(PrimitiveType::Short) => tag::SHORT,
        JavaType::Primitive(PrimitiveType::Int) => tag::INT,
        JavaType::Primitive(PrimitiveType::Long) => tag::LONG,
        JavaType::Primitive(PrimitiveType::Float) => tag::FLOAT,
        JavaType::Primitive(PrimitiveType::Double) => tag::DOUBLE,
        JavaType::Array(_) => tag::ARRAY,
        JavaType::Instance(_) => tag::OBJECT,
    }
}

/// Tagged value: tag byte, then the value bytes. References always carry
/// their precise runtime tag.
pub(crate) fn write_tagged_value(
    vm: &mut VirtualMachine,
    out: &mut PacketStream,
    value: Value,
    declared: Option<&JavaType>,
) {
    match value {
        Value::Ref(object) => {
            out.write_u8(tag_for_object(vm, object));
            let id = put_object(vm, object);
            out.write_u32(id);
        }
        Value::Null => {
            out.write_u8(declared.map(declared_tag).unwrap_or(tag::OBJECT));
            out.write_u32(0);
        }
        Value::Integer(v) => {
            let t = declared.map(declared_tag).unwrap_or(tag::INT);
            out.write_u8(t);
            match t {
                tag::BOOLEAN | tag::BYTE => out.write_u8(v as u8),
                tag::CHAR | tag::SHORT => out.write_u16(v as u16),
                _ => out.write_i32(v),
            }
        }
        Value::Long(v) => {
            out.write_u8(tag::LONG);
            out.write_i64(v);
        }
        Value::Float(v) => {
            out.write_u8(tag::FLOAT);
            out.write_u32(v.to_bits());
        }
        Value::Double(v) => {
            out.write_u8(tag::DOUBLE);
            out.write_u64(v.to_bits());
        }
    }
}

pub(crate) fn read_untagged_value(
    vm: &mut VirtualMachine,
    input: &mut PacketStream,
    ty: &JavaType,
) -> Result<Value, u16> {
    let value = match ty {
        JavaType::Primitive(PrimitiveType::Boolean) | JavaType::Primitive(PrimitiveType::Byte) => {
            Value::Integer(input.read_u8().map_err(bad)? as i8 as i32)
        }
        JavaType::Primitive(PrimitiveType::Char) => {
            Value::Integer(input.read_u16().map_err(bad)? as i32)
        }
        JavaType::Primitive(PrimitiveType::Short) => {
            Value::Integer(input.read_u16().map_err(bad)? as i16 as i32)
        }
        JavaType::Primitive(PrimitiveType::Int) => Value::Integer(input.read_i32().map_err(bad)?),
        JavaType::Primitive(PrimitiveType::Long) => Value::Long(input.read_i64().map_err(bad)?),
        JavaType::Primitive(PrimitiveType::Float) => {
            Value::Float(f32::from_bits(input.read_u32().map_err(bad)?))
        }
        JavaType::Primitive(PrimitiveType::Double) => {
            Value::Double(f64::from_bits(input.read_u64().map_err(bad)?))
        }
        JavaType::Instance(_) | JavaType::Array(_) => {
            let id = input.read_u32().map_err(bad)?;
            if id == 0 {
                Value::Null
            } else {
                Value::Ref(object_from_id(vm, id)?)
            }
        }
    };
    Ok(value)
}

pub(crate) fn read_tagged_value(
    vm: &mut VirtualMachine,
    input: &mut PacketStream,
) -> Result<Value, u16> {
    let t = input.read_u8().map_err(bad)?;
    let value = match t {
        tag::BOOLEAN | tag::BYTE => Value::Integer(input.read_u8().map_err(bad)? as i8 as i32),
        tag::CHAR => Value::Integer(input.read_u16().map_err(bad)? as i32),
        tag::SHORT => Value::Integer(input.read_u16().map_err(bad)? as i16 as i32),
        tag::INT => Value::Integer(input.read_i32().map_err(bad)?),
        tag::LONG => Value::Long(input.read_i64().map_err(bad)?),
        tag::FLOAT => Value::Float(f32::from_bits(input.read_u32().map_err(bad)?)),
        tag::DOUBLE => Value::Double(f64::from_bits(input.read_u64().map_err(bad)?)),
        _ => {
            let id = input.read_u32().map_err(bad)?;
            if id == 0 {
                Value::Null
            } else {
                Value::Ref(object_from_id(vm, id)?)
            }
        }
    };
    Ok(value)
}

// fieldIDs carry the member kind in the high word so Get/SetValues can
// resolve either table without a search.
const FIELD_KIND_INSTANCE: u64 = 1;
const FIELD_KIND_STATIC: u64 = 2;

pub(crate) fn encode_field_id(is_static: bool, index: usize) -> u64 {
    let kind = if is_static {
        FIELD_KIND_STATIC
    } else {
        FIELD_KIND_INSTANCE
    };
    kind << 32 | index as u64
}

pub(crate) fn decode_field_id(raw: u64) -> Result<(bool, usize), u16> {
    let index = (raw & 0xFFFF_FFFF) as usize;
    match raw >> 32 {
        FIELD_KIND_INSTANCE => Ok((false, index)),
        FIELD_KIND_STATIC => Ok((true, index)),
        _ => Err(error::INVALID_FIELDID),
    }
}

pub(crate) fn write_location(
    vm: &VirtualMachine,
    out: &mut PacketStream,
    method: crate::keys::MethodId,
    index: u64,
) {
    let class = vm.method_area.get_method(&method).class_id();
    write_type_tag(out, vm, class);
    out.write_u32(class.as_u32());
    out.write_u64(method.as_u32() as u64);
    out.write_u64(index);
}

pub(crate) fn write_type_tag(out: &mut PacketStream, vm: &VirtualMachine, class: ClassId) {
    use crate::jdwp::constants::type_tag;
    let t = match vm.method_area.get_class_opt(class) {
        Some(JvmClass::Array(_)) => type_tag::ARRAY,
        Some(c) if c.is_interface() => type_tag::INTERFACE,
        _ => type_tag::CLASS,
    };
    out.write_u8(t);
}
