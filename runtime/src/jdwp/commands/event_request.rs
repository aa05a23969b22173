use crate::interpreter::opcode::Opcode;
use crate::jdwp::commands::{bad, CmdResult};
use crate::jdwp::constants::{error, event_kind};
use crate::jdwp::events::{read_modifier, BreakpointSite, EventDef, Modifier, StepState};
use crate::jdwp::packet::PacketStream;
use crate::vm::VirtualMachine;

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    match cmd {
        1 => set(vm, input, out),
        2 => clear(vm, input),
        3 => clear_all_breakpoints(vm),
        _ => Err(error::NOT_IMPLEMENTED),
    }
}

const SUPPORTED: &[u8] = &[
    event_kind::SINGLE_STEP,
    event_kind::BREAKPOINT,
    event_kind::EXCEPTION,
    event_kind::THREAD_START,
    event_kind::THREAD_DEATH,
    event_kind::CLASS_PREPARE,
    event_kind::CLASS_UNLOAD,
    event_kind::VM_START,
    event_kind::VM_DEATH,
];

/// Accepted silently: registered but never reported, so debuggers relying on
/// "request succeeded" keep working without the feature.
const ACCEPTED_SILENTLY: &[u8] = &[
    event_kind::FIELD_ACCESS,
    event_kind::FIELD_MODIFICATION,
    event_kind::METHOD_ENTRY,
    event_kind::METHOD_EXIT,
    event_kind::MONITOR_CONTENDED_ENTER,
    event_kind::MONITOR_CONTENDED_ENTERED,
    event_kind::MONITOR_WAIT,
    event_kind::MONITOR_WAITED,
];

fn set(vm: &mut VirtualMachine, input: &mut PacketStream, out: &mut PacketStream) -> CmdResult {
    let kind = input.read_u8().map_err(bad)?;
    let suspend_policy = input.read_u8().map_err(bad)?;
    let modifier_count = input.read_i32().map_err(bad)?;

    if !SUPPORTED.contains(&kind) && !ACCEPTED_SILENTLY.contains(&kind) {
        return Err(error::INVALID_EVENT_TYPE);
    }

    let mut modifiers = Vec::with_capacity(modifier_count.max(0) as usize);
    for _ in 0..modifier_count {
        modifiers.push(read_modifier(vm, input).map_err(bad)?);
    }

    let mut def = EventDef {
        id: 0,
        kind,
        suspend_policy,
        modifiers,
        in_use: true,
        breakpoint: None,
        step: None,
    };

    if kind == event_kind::BREAKPOINT {
        install_breakpoint(vm, &mut def)?;
    }
    if kind == event_kind::SINGLE_STEP {
        arm_step(vm, &mut def)?;
    }

    let id = vm.jdwp.events.add(def);
    out.write_i32(id);
    Ok(())
}

/// Substitutes the opcode at the request's location with the breakpoint
/// opcode, remembering the original in the definition.
fn install_breakpoint(vm: &mut VirtualMachine, def: &mut EventDef) -> Result<(), u16> {
    let location = def.modifiers.iter().find_map(|m| match m {
        Modifier::LocationOnly {
            class,
            method,
            index,
        } => Some((*class, *method, *index as usize)),
        _ => None,
    });
    let Some((class, method, pc)) = location else {
        return Err(error::ILLEGAL_ARGUMENT);
    };

    // Piggyback on an existing site rather than double-patching.
    if let Some(existing) = vm.jdwp.events.breakpoint_at(method, pc) {
        def.breakpoint = existing.breakpoint;
        return Ok(());
    }

    let code = vm
        .method_area
        .get_method_mut(&method)
        .code_mut()
        .map_err(|_| error::INVALID_METHODID)?;
    if pc >= code.len() {
        return Err(error::ILLEGAL_ARGUMENT);
    }
    let saved_opcode = code[pc];
    code[pc] = Opcode::Breakpoint as u8;
    def.breakpoint = Some(BreakpointSite {
        class,
        method,
        pc,
        saved_opcode,
    });
    Ok(())
}

/// Snapshots the target thread's position so the interpreter can judge
/// "stepped" against it.
fn arm_step(vm: &mut VirtualMachine, def: &mut EventDef) -> Result<(), u16> {
    let step = def.modifiers.iter().find_map(|m| match m {
        Modifier::Step {
            thread,
            size,
            depth,
        } => Some((*thread, *size, *depth)),
        _ => None,
    });
    let Some((thread, size, depth)) = step else {
        return Err(error::ILLEGAL_ARGUMENT);
    };
    let frame = vm
        .thread(thread)
        .cur_frame()
        .map_err(|_| error::INVALID_THREAD)?;
    let (origin_method, origin_pc) = (frame.method_id, frame.pc);
    let origin_line = vm
        .method_area
        .get_method(&origin_method)
        .line_for_pc(origin_pc);
    def.step = Some(StepState {
        thread,
        size,
        depth,
        origin_depth: vm.thread(thread).frames.len(),
        origin_method,
        origin_pc,
        origin_line,
    });
    Ok(())
}

fn clear(vm: &mut VirtualMachine, input: &mut PacketStream) -> CmdResult {
    let kind = input.read_u8().map_err(bad)?;
    let request_id = input.read_i32().map_err(bad)?;
    if let Some(def) = vm.jdwp.events.remove(kind, request_id) {
        restore_breakpoint(vm, &def);
    }
    Ok(())
}

fn clear_all_breakpoints(vm: &mut VirtualMachine) -> CmdResult {
    let removed: Vec<EventDef> = {
        let defs = &mut vm.jdwp.events.defs;
        let mut removed = Vec::new();
        let mut index = 0;
        while index < defs.len() {
            if defs[index].kind == event_kind::BREAKPOINT {
                removed.push(defs.remove(index));
            } else {
                index += 1;
            }
        }
        removed
    };
    for def in removed {
        restore_breakpoint(vm, &def);
    }
    Ok(())
}

/// Puts the original opcode back unless another live request still covers
/// the same location.
fn restore_breakpoint(vm: &mut VirtualMachine, def: &EventDef) {
    let Some(site) = def.breakpoint else {
        return;
    };
    if vm.jdwp.events.breakpoint_at(site.method, site.pc).is_some() {
        return;
    }
    if let Ok(code) = vm.method_area.get_method_mut(&site.method).code_mut() {
        if site.pc < code.len() {
            code[site.pc] = site.saved_opcode;
        }
    }
}
