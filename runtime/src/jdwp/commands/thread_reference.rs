use crate::jdwp::commands::{bad, thread_from_object_id, CmdResult};
use crate::jdwp::constants::{error, thread_status};
use crate::jdwp::events;
use crate::jdwp::packet::PacketStream;
use crate::keys::ThreadId;
use crate::thread::ThreadStatus;
use crate::vm::VirtualMachine;

pub(super) fn dispatch(
    vm: &mut VirtualMachine,
    cmd: u8,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    let tid = thread_from_object_id(vm, input.read_u32().map_err(bad)?)?;
    match cmd {
        1 => name(vm, tid, out),
        2 => suspend(vm, tid),
        3 => resume(vm, tid),
        4 => status(vm, tid, out),
        5 => thread_group(out),
        6 => frames(vm, tid, input, out),
        7 => frame_count(vm, tid, out),
        11 => interrupt(vm, tid),
        12 => suspend_count(vm, tid, out),
        _ => Err(error::NOT_IMPLEMENTED),
    }
}

fn name(vm: &mut VirtualMachine, tid: ThreadId, out: &mut PacketStream) -> CmdResult {
    let name = vm.thread(tid).name.clone();
    out.write_string(&name);
    Ok(())
}

fn suspend(vm: &mut VirtualMachine, tid: ThreadId) -> CmdResult {
    vm.thread_mut(tid).dbg_suspend();
    Ok(())
}

fn resume(vm: &mut VirtualMachine, tid: ThreadId) -> CmdResult {
    vm.thread_mut(tid).dbg_resume();
    events::replay_parked(vm, tid).map_err(|_| error::INTERNAL)?;
    Ok(())
}

fn status(vm: &mut VirtualMachine, tid: ThreadId, out: &mut PacketStream) -> CmdResult {
    let thread = vm.thread(tid);
    let thread_state = if !thread.is_alive() {
        thread_status::ZOMBIE
    } else if thread.status.contains(ThreadStatus::WAITING) {
        thread_status::WAIT
    } else if thread.status.contains(ThreadStatus::SLEEPING) {
        thread_status::SLEEPING
    } else if thread.status.contains(ThreadStatus::BLOCKED) {
        thread_status::MONITOR
    } else {
        thread_status::RUNNING
    };
    out.write_i32(thread_state);
    out.write_i32(i32::from(thread.dbg_suspend_count > 0));
    Ok(())
}

/// Thread groups are not modeled; every thread reports the null group.
fn thread_group(out: &mut PacketStream) -> CmdResult {
    out.write_u32(0);
    Ok(())
}

fn frames(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    input: &mut PacketStream,
    out: &mut PacketStream,
) -> CmdResult {
    if vm.thread(tid).dbg_suspend_count == 0 {
        return Err(error::THREAD_NOT_SUSPENDED);
    }
    let start = input.read_i32().map_err(bad)?;
    let length = input.read_i32().map_err(bad)?;

    // Top-first, as the protocol counts frames. frameID is the stable
    // bottom-up index plus one, valid while the thread stays suspended.
    let all: Vec<(u64, crate::keys::MethodId, usize)> = vm
        .thread(tid)
        .frames
        .iter()
        .enumerate()
        .rev()
        .map(|(idx, frame)| ((idx + 1) as u64, frame.method_id, frame.pc))
        .collect();

    let start = start.max(0) as usize;
    if start > all.len() {
        return Err(error::ILLEGAL_ARGUMENT);
    }
    let take = if length < 0 {
        all.len() - start
    } else {
        (length as usize).min(all.len() - start)
    };
    let window = &all[start..start + take];

    out.write_u32(window.len() as u32);
    for (frame_id, method, pc) in window {
        out.write_u64(*frame_id);
        super::write_location(vm, out, *method, *pc as u64);
    }
    Ok(())
}

fn frame_count(vm: &mut VirtualMachine, tid: ThreadId, out: &mut PacketStream) -> CmdResult {
    if vm.thread(tid).dbg_suspend_count == 0 {
        return Err(error::THREAD_NOT_SUSPENDED);
    }
    out.write_i32(vm.thread(tid).frames.len() as i32);
    Ok(())
}

fn interrupt(vm: &mut VirtualMachine, tid: ThreadId) -> CmdResult {
    let status = vm.thread(tid).status;
    if status.contains(ThreadStatus::WAITING) {
        let VirtualMachine {
            monitors, threads, ..
        } = vm;
        monitors.interrupt_waiter(threads, tid);
    } else if status.contains(ThreadStatus::SLEEPING) {
        let thread = vm.thread_mut(tid);
        thread.make_runnable();
        thread.arm_exception(crate::error::JavaExceptionKind::InterruptedException, None);
    } else {
        vm.thread_mut(tid).interrupted = true;
    }
    Ok(())
}

fn suspend_count(vm: &mut VirtualMachine, tid: ThreadId, out: &mut PacketStream) -> CmdResult {
    out.write_i32(vm.thread(tid).dbg_suspend_count as i32);
    Ok(())
}
