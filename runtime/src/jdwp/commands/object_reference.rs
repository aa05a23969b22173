use crate::jdwp::commands::{
    bad, decode_field_id, object_from_id, put_object, read_untagged_value, tag_for_object,
    write_tagged_value, write_type_tag, CmdResult,
};
use crate::jdwp::constants::error;
use crate::jdwp::packet::PacketStream;
use crate::vm::VirtualMachine;

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let object = object_from_id(vm, input.read_u32().map_err(bad)?)?;
    match cmd {
        1 => reference_type(vm, object, out),
        2 => get_values(vm, object, input, out),
        3 => set_values(vm, object, input),
        5 => monitor_info(vm, object, out),
        6 => Err(error::NOT_IMPLEMENTED), // InvokeMethod: no synchronous Java entry from the pump
        7 => disable_collection(vm, object),
        8 => enable_collection(vm, object),
        9 => is_collected(vm, object, out),
        _ => Err(error::NOT_IMPLEMENTED),
    }
}

fn reference_type(
    vm: &mut VirtualMachine,
    object: crate::heap::HeapRef,
    out: &mut PacketStream,
) -> CmdResult {
    let class = vm.heap.get_class_id(object).map_err(|_| error::INVALID_OBJECT)?;
    write_type_tag(out, vm, class);
    out.write_u32(class.as_u32());
    Ok(())
}

fn field_slot(
    vm: &VirtualMachine,
    object: crate::heap::HeapRef,
    raw_id: u64,
) -> Result<(usize, crate::keys::FieldDescriptorId), u16> {
    let (is_static, index) = decode_field_id(raw_id)?;
    if is_static {
        return Err(error::INVALID_FIELDID);
    }
    let class = vm.heap.get_class_id(object).map_err(|_| error::INVALID_OBJECT)?;
    let instance = vm
        .method_area
        .get_instance_class(&class)
        .map_err(|_| error::INVALID_OBJECT)?;
    let fields = instance.get_instance_fields().map_err(|_| error::INTERNAL)?;
    let field = fields.get(index).ok_or(error::INVALID_FIELDID)?;
    Ok((field.offset, field.descriptor_id))
}

fn get_values(
    vm: &mut VirtualMachine,
    object: crate::heap::HeapRef,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let count = input.read_u32().map_err(bad)?;
    let mut slots = Vec::with_capacity(count as usize);
    for _ in 0..count {
        slots.push(field_slot(vm, object, input.read_u64().map_err(bad)?)?);
    }
    out.write_u32(slots.len() as u32);
    for (offset, descriptor_id) in slots {
        let declared = vm.method_area.get_field_descriptor(&descriptor_id).clone();
        let value = vm
            .heap
            .read_field(object, offset, declared.as_allocation_type())
            .map_err(|_| error::INTERNAL)?;
        write_tagged_value(vm, out, value, Some(&declared));
    }
    Ok(())
}

fn set_values(
    vm: &mut VirtualMachine,
    object: crate::heap::HeapRef,
    input: &mut PacketStream,
) -> CmdResult {
    let count = input.read_u32().map_err(bad)?;
    for _ in 0..count {
        let (offset, descriptor_id) = field_slot(vm, object, input.read_u64().map_err(bad)?)?;
        let declared = vm.method_area.get_field_descriptor(&descriptor_id).clone();
        let value = read_untagged_value(vm, input, &declared)?;
        vm.heap
            .write_field(object, offset, value, declared.as_allocation_type())
            .map_err(|_| error::INTERNAL)?;
    }
    Ok(())
}

fn monitor_info(
    vm: &mut VirtualMachine,
    object: crate::heap::HeapRef,
    out: &mut PacketStream,
) -> CmdResult {
    let (owner_obj, entry_count, waiters) = match vm.monitors.get(object) {
        Some(monitor) => (
            monitor.owner.map(|tid| vm.thread(tid).thread_obj),
            monitor.entry_count as i32,
            monitor
                .lock_queue
                .iter()
                .chain(monitor.wait_queue.iter())
                .map(|tid| vm.thread(*tid).thread_obj)
                .collect::<Vec<_>>(),
        ),
        None => (None, 0, Vec::new()),
    };
    let owner_id = owner_obj.map(|o| put_object(vm, o)).unwrap_or(0);
    out.write_u32(owner_id);
    out.write_i32(entry_count);
    out.write_u32(waiters.len() as u32);
    for waiter in waiters {
        let id = put_object(vm, waiter);
        out.write_u32(id);
    }
    Ok(())
}

fn disable_collection(vm: &mut VirtualMachine, object: crate::heap::HeapRef) -> CmdResult {
    if let Some(session) = vm.jdwp.session_mut() {
        session.roots.pin(object);
    }
    Ok(())
}

fn enable_collection(vm: &mut VirtualMachine, object: crate::heap::HeapRef) -> CmdResult {
    if let Some(session) = vm.jdwp.session_mut() {
        session.roots.unpin(object);
    }
    Ok(())
}

fn is_collected(
    vm: &mut VirtualMachine,
    object: crate::heap::HeapRef,
    out: &mut PacketStream,
) -> CmdResult {
    // Probe the chunk header; a freed chunk no longer answers as live.
    out.write_bool(!vm.heap.is_live_object(object));
    Ok(())
}
