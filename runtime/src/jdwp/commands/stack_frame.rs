use crate::jdwp::commands::{
    bad, read_tagged_value, thread_from_object_id, write_tagged_value, CmdResult,
};
use crate::jdwp::constants::{error, tag};
use crate::jdwp::packet::PacketStream;
use crate::jtype::{JavaType, PrimitiveType};
use crate::keys::ThreadId;
use crate::vm::{Value, VirtualMachine};

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let tid = thread_from_object_id(vm, input.read_u32().map_err(bad)?)?;
    if vm.thread(tid).dbg_suspend_count == 0 {
        return Err(error::THREAD_NOT_SUSPENDED);
    }
    let frame_index = frame_index(vm, tid, input.read_u64().map_err(bad)?)?;
    match cmd {
        1 => get_values(vm, tid, frame_index, input, out),
        2 => set_values(vm, tid, frame_index, input),
        3 => this_object(vm, tid, frame_index, out),
        _ => Err(error::NOT_IMPLEMENTED),
    }
}

/// frameIDs are bottom-up indices plus one, handed out by Frames.
fn frame_index(vm: &VirtualMachine, tid: ThreadId, frame_id: u64) -> Result<usize, u16> {
    let index = (frame_id as usize)
        .checked_sub(1)
        .ok_or(error::INVALID_FRAMEID)?;
    if index >= vm.thread(tid).frames.len() {
        return Err(error::INVALID_FRAMEID);
    }
    Ok(index)
}

fn type_for_sigbyte(sigbyte: u8) -> Option<JavaType> {
    match sigbyte {
        tag::BOOLEAN => Some(JavaType::Primitive(PrimitiveType::Boolean)),
        tag::BYTE => Some(JavaType::Primitive(PrimitiveType::Byte)),
        tag::CHAR => Some(JavaType::Primitive(PrimitiveType::Char)),
        tag::SHORT => Some(JavaType::Primitive(PrimitiveType::Short)),
        tag::INT => Some(JavaType::Primitive(PrimitiveType::Int)),
        tag::LONG => Some(JavaType::Primitive(PrimitiveType::Long)),
        tag::FLOAT => Some(JavaType::Primitive(PrimitiveType::Float)),
        tag::DOUBLE => Some(JavaType::Primitive(PrimitiveType::Double)),
        _ => None,
    }
}

fn get_values(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    frame_index: usize,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let count = input.read_u32().map_err(bad)?;
    let mut requests = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let slot = input.read_i32().map_err(bad)?;
        let sigbyte = input.read_u8().map_err(bad)?;
        requests.push((slot, sigbyte));
    }
    out.write_u32(requests.len() as u32);
    for (slot, sigbyte) in requests {
        let value = vm.thread(tid).frames[frame_index]
            .get_local(slot as u16)
            .map_err(|_| error::INVALID_SLOT)?;
        let declared = type_for_sigbyte(sigbyte);
        write_tagged_value(vm, out, value, declared.as_ref());
    }
    Ok(())
}

fn set_values(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    frame_index: usize,
    input: &mut PacketStream,
) -> CmdResult {
    let count = input.read_u32().map_err(bad)?;
    for _ in 0..count {
        let slot = input.read_i32().map_err(bad)?;
        let value = read_tagged_value(vm, input)?;
        vm.thread_mut(tid).frames[frame_index]
            .set_local(slot as u16, value)
            .map_err(|_| error::INVALID_SLOT)?;
    }
    Ok(())
}

fn this_object(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    frame_index: usize,
    out: &mut PacketStream,
) -> CmdResult {
    let method_id = vm.thread(tid).frames[frame_index].method_id;
    let is_static = vm.method_area.get_method(&method_id).is_static();
    let this = if is_static {
        Value::Null
    } else {
        vm.thread(tid).frames[frame_index]
            .get_local(0)
            .unwrap_or(Value::Null)
    };
    write_tagged_value(vm, out, this, None);
    Ok(())
}
