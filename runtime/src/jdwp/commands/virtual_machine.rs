use crate::jdwp::commands::{bad, class_status_of, put_object, write_type_tag, CmdResult};
use crate::jdwp::constants::{error, id_sizes};
use crate::jdwp::events;
use crate::jdwp::packet::PacketStream;
use crate::vm::VirtualMachine;

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    match cmd {
        1 => version(vm, out),
        2 => classes_by_signature(vm, input, out),
        3 => all_classes(vm, out),
        4 => all_threads(vm, out),
        6 => dispose(vm),
        7 => id_sizes(out),
        8 => suspend(vm),
        9 => resume(vm),
        10 => exit(vm, input),
        11 => create_string(vm, input, out),
        12 => capabilities(out, 7),
        14 => dispose_objects(vm, input),
        17 => capabilities(out, 32),
        19 => set_default_stratum(input),
        _ => Err(error::NOT_IMPLEMENTED),
    }
}

fn version(vm: &mut VirtualMachine, out: &mut PacketStream) -> CmdResult {
    out.write_string("Embla debug agent (JDWP 1.6)");
    out.write_i32(1);
    out.write_i32(6);
    out.write_string("1.4");
    out.write_string("embla");
    let _ = vm;
    Ok(())
}

fn classes_by_signature(
    vm: &mut VirtualMachine,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let signature = input.read_string().map_err(bad)?;
    let matches: Vec<_> = vm
        .method_area
        .loaded_class_ids()
        .filter(|id| {
            vm.method_area
                .get_class_opt(*id)
                .map(|c| vm.interner.resolve(&c.jni_signature()) == signature)
                .unwrap_or(false)
        })
        .collect();
    out.write_u32(matches.len() as u32);
    for class in matches {
        write_type_tag(out, vm, class);
        out.write_u32(class.as_u32());
        out.write_i32(class_status_of(vm, class));
    }
    Ok(())
}

fn all_classes(vm: &mut VirtualMachine, out: &mut PacketStream) -> CmdResult {
    // Count is back-patched after the walk; the original streams the same
    // way rather than sizing up front.
    let count_at = out.bookmark();
    out.write_u32(0);
    let mut count = 0u32;
    let classes: Vec<_> = vm.method_area.loaded_class_ids().collect();
    for class in classes {
        let Some(class_ref) = vm.method_area.get_class_opt(class) else {
            continue;
        };
        if class_ref.is_primitive() {
            continue;
        }
        let signature = vm.interner.resolve(&class_ref.jni_signature()).to_string();
        write_type_tag(out, vm, class);
        out.write_u32(class.as_u32());
        out.write_string(&signature);
        out.write_i32(class_status_of(vm, class));
        count += 1;
    }
    out.patch_u32(count_at, count);
    Ok(())
}

fn all_threads(vm: &mut VirtualMachine, out: &mut PacketStream) -> CmdResult {
    let count_at = out.bookmark();
    out.write_u32(0);
    let mut count = 0u32;
    let alive: Vec<_> = vm
        .threads
        .iter()
        .filter(|t| t.is_alive() && !t.frames.is_empty())
        .map(|t| t.thread_obj)
        .collect();
    for thread_obj in alive {
        let id = put_object(vm, thread_obj);
        out.write_u32(id);
        count += 1;
    }
    out.patch_u32(count_at, count);
    Ok(())
}

fn dispose(vm: &mut VirtualMachine) -> CmdResult {
    // The reply still has to travel over the wire; the pump closes the
    // session after sending it.
    vm.jdwp.pending_close = true;
    Ok(())
}

fn id_sizes(out: &mut PacketStream) -> CmdResult {
    out.write_i32(id_sizes::FIELD_ID);
    out.write_i32(id_sizes::METHOD_ID);
    out.write_i32(id_sizes::OBJECT_ID);
    out.write_i32(id_sizes::REFERENCE_TYPE_ID);
    out.write_i32(id_sizes::FRAME_ID);
    Ok(())
}

fn suspend(vm: &mut VirtualMachine) -> CmdResult {
    for thread in vm.threads.iter_mut() {
        if thread.is_alive() {
            thread.dbg_suspend();
        }
    }
    Ok(())
}

fn resume(vm: &mut VirtualMachine) -> CmdResult {
    let tids: Vec<_> = vm.threads.iter().map(|t| t.id).collect();
    for tid in &tids {
        vm.thread_mut(*tid).dbg_resume();
    }
    for tid in tids {
        events::replay_parked(vm, tid).map_err(|_| error::INTERNAL)?;
    }
    Ok(())
}

fn exit(vm: &mut VirtualMachine, input: &mut PacketStream) -> CmdResult {
    let code = input.read_i32().map_err(bad)?;
    vm.exit_status = Some(code);
    Ok(())
}

/// Deliberately not pinned: the new string lives only until the next
/// collection unless the debugger roots it with DisableCollection first,
/// mirroring the original's behavior.
fn create_string(
    vm: &mut VirtualMachine,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let text = input.read_string().map_err(bad)?;
    let string = vm.new_string(&text).map_err(|_| error::INTERNAL)?;
    let id = put_object(vm, string);
    out.write_u32(id);
    Ok(())
}

fn capabilities(out: &mut PacketStream, count: usize) -> CmdResult {
    for _ in 0..count {
        out.write_bool(false);
    }
    Ok(())
}

fn dispose_objects(vm: &mut VirtualMachine, input: &mut PacketStream) -> CmdResult {
    let count = input.read_u32().map_err(bad)?;
    for _ in 0..count {
        let id = input.read_u32().map_err(bad)?;
        let _refcount = input.read_i32().map_err(bad)?;
        if let Some(session) = vm.jdwp.session_mut() {
            session.id_map.remove_id(id);
        }
    }
    Ok(())
}

/// Accepted and ignored, as in the original.
fn set_default_stratum(input: &mut PacketStream) -> CmdResult {
    let _stratum = input.read_string().map_err(bad)?;
    Ok(())
}
