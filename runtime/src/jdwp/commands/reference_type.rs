use crate::jdwp::commands::{
    bad, class_from_id, class_status_of, encode_field_id, put_object, write_tagged_value,
    CmdResult,
};
use crate::jdwp::constants::error;
use crate::jdwp::packet::PacketStream;
use crate::rt::{ClassLike, JvmClass};
use crate::vm::VirtualMachine;

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let class = class_from_id(vm, input.read_u32().map_err(bad)?)?;
    match cmd {
        1 => signature(vm, class, out),
        2 => class_loader(out),
        3 => modifiers(vm, class, out),
        4 => fields(vm, class, out),
        5 => methods(vm, class, out),
        6 => get_values(vm, class, input, out),
        7 => source_file(vm, class, out),
        9 => status(vm, class, out),
        10 => interfaces(vm, class, out),
        11 => class_object(vm, class, out),
        _ => Err(error::NOT_IMPLEMENTED),
    }
}

fn signature(
    vm: &mut VirtualMachine,
    class: crate::keys::ClassId,
    out: &mut PacketStream,
) -> CmdResult {
    let signature = vm
        .interner
        .resolve(&vm.method_area.get_class(&class).jni_signature())
        .to_string();
    out.write_string(&signature);
    Ok(())
}

/// Everything loads through the bootstrap loader; the null id names it.
fn class_loader(out: &mut PacketStream) -> CmdResult {
    out.write_u32(0);
    Ok(())
}

fn modifiers(
    vm: &mut VirtualMachine,
    class: crate::keys::ClassId,
    out: &mut PacketStream,
) -> CmdResult {
    out.write_i32(vm.method_area.get_class(&class).get_raw_flags() as i32);
    Ok(())
}

/// Declared fields only, statics included, in declaration order.
fn fields(
    vm: &mut VirtualMachine,
    class: crate::keys::ClassId,
    out: &mut PacketStream,
) -> CmdResult {
    let JvmClass::Instance(instance) = vm.method_area.get_class(&class) else {
        out.write_u32(0);
        return Ok(());
    };
    let count_at = out.bookmark();
    out.write_u32(0);
    let mut count = 0u32;

    let instance_fields = instance.get_instance_fields().map_err(|_| error::INTERNAL)?;
    for (index, field) in instance_fields.iter().enumerate() {
        if field.declaring_class != class {
            continue;
        }
        out.write_u64(encode_field_id(false, index));
        out.write_string(vm.interner.resolve(&field.key.name));
        out.write_string(vm.interner.resolve(&field.key.desc));
        out.write_i32(field.flags.get_raw() as i32);
        count += 1;
    }
    for (index, field) in instance.static_fields().iter().enumerate() {
        out.write_u64(encode_field_id(true, index));
        out.write_string(vm.interner.resolve(&field.key.name));
        out.write_string(vm.interner.resolve(&field.key.desc));
        out.write_i32(field.flags.get_raw() as i32);
        count += 1;
    }
    out.patch_u32(count_at, count);
    Ok(())
}

fn methods(
    vm: &mut VirtualMachine,
    class: crate::keys::ClassId,
    out: &mut PacketStream,
) -> CmdResult {
    let JvmClass::Instance(instance) = vm.method_area.get_class(&class) else {
        out.write_u32(0);
        return Ok(());
    };
    let method_ids = instance.methods_in_order().map_err(|_| error::INTERNAL)?;
    out.write_u32(method_ids.len() as u32);
    for method_id in method_ids {
        let method = vm.method_area.get_method(method_id);
        out.write_u64(method_id.as_u32() as u64);
        out.write_string(vm.interner.resolve(&method.name));
        out.write_string(vm.interner.resolve(&method.desc));
        out.write_i32(method.flags().get_raw() as i32);
    }
    Ok(())
}

fn get_values(
    vm: &mut VirtualMachine,
    class: crate::keys::ClassId,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let count = input.read_u32().map_err(bad)?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = input.read_u64().map_err(bad)?;
        let (is_static, index) = super::decode_field_id(raw)?;
        if !is_static {
            return Err(error::INVALID_FIELDID);
        }
        let (value, descriptor_id) = {
            let instance = vm
                .method_area
                .get_instance_class(&class)
                .map_err(|_| error::INVALID_CLASS)?;
            let field = instance
                .static_fields()
                .get(index)
                .ok_or(error::INVALID_FIELDID)?;
            (field.value.get(), field.descriptor_id)
        };
        values.push((value, descriptor_id));
    }
    out.write_u32(values.len() as u32);
    for (value, descriptor_id) in values {
        let declared = vm.method_area.get_field_descriptor(&descriptor_id).clone();
        write_tagged_value(vm, out, value, Some(&declared));
    }
    Ok(())
}

fn source_file(
    vm: &mut VirtualMachine,
    class: crate::keys::ClassId,
    out: &mut PacketStream,
) -> CmdResult {
    match vm
        .method_area
        .get_class(&class)
        .as_class_like()
        .get_source_file()
    {
        Some(file) => {
            let file = vm.interner.resolve(&file).to_string();
            out.write_string(&file);
            Ok(())
        }
        None => Err(error::ABSENT_INFORMATION),
    }
}

fn status(
    vm: &mut VirtualMachine,
    class: crate::keys::ClassId,
    out: &mut PacketStream,
) -> CmdResult {
    out.write_i32(class_status_of(vm, class));
    Ok(())
}

fn interfaces(
    vm: &mut VirtualMachine,
    class: crate::keys::ClassId,
    out: &mut PacketStream,
) -> CmdResult {
    let direct = vm
        .method_area
        .get_class(&class)
        .as_class_like()
        .get_direct_interfaces()
        .map_err(|_| error::INTERNAL)?
        .clone();
    out.write_u32(direct.len() as u32);
    for interface in direct {
        out.write_u32(interface.as_u32());
    }
    Ok(())
}

fn class_object(
    vm: &mut VirtualMachine,
    class: crate::keys::ClassId,
    out: &mut PacketStream,
) -> CmdResult {
    let mirror = vm.mirror(class).map_err(|_| error::INTERNAL)?;
    let id = put_object(vm, mirror);
    out.write_u32(id);
    Ok(())
}
