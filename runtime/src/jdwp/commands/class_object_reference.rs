use crate::jdwp::commands::{bad, object_from_id, write_type_tag, CmdResult};
use crate::jdwp::constants::error;
use crate::jdwp::packet::PacketStream;
use crate::vm::VirtualMachine;

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let mirror = object_from_id(vm, input.read_u32().map_err(bad)?)?;
    match cmd {
        1 => {
            let class = vm
                .method_area
                .get_class_id_by_mirror(mirror)
                .map_err(|_| error::INVALID_OBJECT)?;
            write_type_tag(out, vm, class);
            out.write_u32(class.as_u32());
            Ok(())
        }
        _ => Err(error::NOT_IMPLEMENTED),
    }
}
