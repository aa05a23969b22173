use crate::jdwp::commands::{bad, object_from_id, CmdResult};
use crate::jdwp::constants::error;
use crate::jdwp::packet::PacketStream;
use crate::vm::VirtualMachine;

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let string = object_from_id(vm, input.read_u32().map_err(bad)?)?;
    match cmd {
        1 => {
            let text = vm
                .heap
                .read_string(string)
                .map_err(|_| error::INVALID_STRING)?;
            out.write_string(&text);
            Ok(())
        }
        _ => Err(error::NOT_IMPLEMENTED),
    }
}
