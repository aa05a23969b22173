use crate::jdwp::commands::{bad, class_from_id, CmdResult};
use crate::jdwp::constants::error;
use crate::jdwp::packet::PacketStream;
use crate::keys::MethodId;
use crate::vm::VirtualMachine;

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let class = class_from_id(vm, input.read_u32().map_err(bad)?)?;
    let method_id = MethodId::from_u32(input.read_u64().map_err(bad)? as u32)
        .ok_or(error::INVALID_METHODID)?;
    // The method must belong to the named type.
    if vm.method_area.get_method(&method_id).class_id() != class {
        return Err(error::INVALID_METHODID);
    }
    match cmd {
        1 => line_table(vm, method_id, out),
        2 | 5 => Err(error::ABSENT_INFORMATION),
        3 => bytecodes(vm, method_id, out),
        4 => is_obsolete(out),
        _ => Err(error::NOT_IMPLEMENTED),
    }
}

fn line_table(vm: &mut VirtualMachine, method_id: MethodId, out: &mut PacketStream) -> CmdResult {
    let method = vm.method_area.get_method(&method_id);
    let Ok(code) = method.code() else {
        // Native and abstract methods carry no locations.
        out.write_i64(-1);
        out.write_i64(-1);
        out.write_u32(0);
        return Ok(());
    };
    out.write_i64(0);
    out.write_i64(code.len().saturating_sub(1) as i64);
    let table = method.line_table();
    out.write_u32(table.len() as u32);
    for entry in table {
        out.write_u64(entry.start_pc as u64);
        out.write_i32(entry.line_number as i32);
    }
    Ok(())
}

fn bytecodes(vm: &mut VirtualMachine, method_id: MethodId, out: &mut PacketStream) -> CmdResult {
    let method = vm.method_area.get_method(&method_id);
    let code = method.code().map_err(|_| error::ABSENT_INFORMATION)?;
    out.write_u32(code.len() as u32);
    let code = code.to_vec();
    out.write_bytes(&code);
    Ok(())
}

fn is_obsolete(out: &mut PacketStream) -> CmdResult {
    out.write_bool(false);
    Ok(())
}
