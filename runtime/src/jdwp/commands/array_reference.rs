use crate::jdwp::commands::{
    bad, declared_tag, object_from_id, put_object, read_untagged_value, tag_for_object, CmdResult,
};
use crate::jdwp::constants::{error, tag};
use crate::jdwp::packet::PacketStream;
use crate::jtype::JavaType;
use crate::rt::array::ArrayComponent;
use crate::vm::{Value, VirtualMachine};

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let array = object_from_id(vm, input.read_u32().map_err(bad)?)?;
    if !vm.heap.is_array(array).unwrap_or(false) {
        return Err(error::INVALID_ARRAY);
    }
    match cmd {
        1 => length(vm, array, out),
        2 => get_values(vm, array, input, out),
        3 => set_values(vm, array, input),
        _ => Err(error::NOT_IMPLEMENTED),
    }
}

fn length(vm: &mut VirtualMachine, array: crate::heap::HeapRef, out: &mut PacketStream) -> CmdResult {
    let length = vm.heap.get_array_length(array).map_err(|_| error::INVALID_ARRAY)?;
    out.write_i32(length);
    Ok(())
}

fn component_info(
    vm: &VirtualMachine,
    array: crate::heap::HeapRef,
) -> Result<(u8, ArrayComponent), u16> {
    let class = vm.heap.get_class_id(array).map_err(|_| error::INVALID_ARRAY)?;
    let array_class = vm
        .method_area
        .get_array_class(&class)
        .map_err(|_| error::INVALID_ARRAY)?;
    let component_tag = match array_class.component {
        ArrayComponent::Primitive(p) => declared_tag(&JavaType::Primitive(p)),
        ArrayComponent::Reference(_) => tag::OBJECT,
    };
    Ok((component_tag, array_class.component))
}

fn check_range(
    vm: &VirtualMachine,
    array: crate::heap::HeapRef,
    first: i32,
    count: i32,
) -> Result<(), u16> {
    let length = vm.heap.get_array_length(array).map_err(|_| error::INVALID_ARRAY)?;
    if first < 0 || count < 0 || first.checked_add(count).is_none_or(|end| end > length) {
        return Err(error::INVALID_LENGTH);
    }
    Ok(())
}

/// Array regions: primitive components travel untagged, object components
/// as tagged values.
fn get_values(
    vm: &mut VirtualMachine,
    array: crate::heap::HeapRef,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let first = input.read_i32().map_err(bad)?;
    let count = input.read_i32().map_err(bad)?;
    check_range(vm, array, first, count)?;
    let (component_tag, component) = component_info(vm, array)?;

    out.write_u8(component_tag);
    out.write_u32(count as u32);
    for i in first..first + count {
        let value = vm
            .heap
            .read_array_element(array, i)
            .map_err(|_| error::INTERNAL)?;
        match component {
            ArrayComponent::Primitive(_) => match value {
                Value::Integer(v) => match component_tag {
                    tag::BOOLEAN | tag::BYTE => out.write_u8(v as u8),
                    tag::CHAR | tag::SHORT => out.write_u16(v as u16),
                    _ => out.write_i32(v),
                },
                Value::Long(v) => out.write_i64(v),
                Value::Float(v) => out.write_u32(v.to_bits()),
                Value::Double(v) => out.write_u64(v.to_bits()),
                _ => return Err(error::INTERNAL),
            },
            ArrayComponent::Reference(_) => match value {
                Value::Ref(object) => {
                    out.write_u8(tag_for_object(vm, object));
                    let id = put_object(vm, object);
                    out.write_u32(id);
                }
                _ => {
                    out.write_u8(tag::OBJECT);
                    out.write_u32(0);
                }
            },
        }
    }
    Ok(())
}

fn set_values(
    vm: &mut VirtualMachine,
    array: crate::heap::HeapRef,
    input: &mut PacketStream,
) -> CmdResult {
    let first = input.read_i32().map_err(bad)?;
    let count = input.read_i32().map_err(bad)?;
    check_range(vm, array, first, count)?;
    let (_, component) = component_info(vm, array)?;
    let component_type = match component {
        ArrayComponent::Primitive(p) => JavaType::Primitive(p),
        ArrayComponent::Reference(class) => {
            JavaType::Instance(vm.method_area.get_class(&class).name())
        }
    };
    for i in first..first + count {
        let value = read_untagged_value(vm, input, &component_type)?;
        vm.heap
            .write_array_element(array, i, value)
            .map_err(|_| error::INTERNAL)?;
    }
    Ok(())
}
