use crate::error::VmError;
use crate::heap::HeapRef;
use crate::jdwp::constants::{command_set, event_kind, modifier_kind, step_depth, step_size, suspend_policy, type_tag};
use crate::jdwp::packet::{encode_packet, PacketStream};
use crate::keys::{ClassId, MethodId, Symbol, ThreadId};
use crate::rt::JvmClass;
use crate::vm::VirtualMachine;
use crate::{debug_log, jdwp};

/// One registered event request: kind, policy and its filter chain, plus the
/// per-kind state (saved breakpoint opcode, step origin).
pub struct EventDef {
    pub id: i32,
    pub kind: u8,
    pub suspend_policy: u8,
    pub modifiers: Vec<Modifier>,
    pub in_use: bool,
    pub breakpoint: Option<BreakpointSite>,
    pub step: Option<StepState>,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakpointSite {
    pub class: ClassId,
    pub method: MethodId,
    pub pc: usize,
    pub saved_opcode: u8,
}

#[derive(Debug, Clone)]
pub struct StepState {
    pub thread: ThreadId,
    pub size: i32,
    pub depth: i32,
    pub origin_depth: usize,
    pub origin_method: MethodId,
    pub origin_pc: usize,
    pub origin_line: Option<u16>,
}

#[derive(Debug, Clone)]
pub enum Modifier {
    /// Fires once the countdown hits zero, then retires the whole request.
    Count(i32),
    ThreadOnly(HeapRef),
    ClassOnly(ClassId),
    ClassMatch(String),
    ClassExclude(String),
    LocationOnly {
        class: ClassId,
        method: MethodId,
        index: u64,
    },
    ExceptionOnly {
        class: Option<ClassId>,
        caught: bool,
        uncaught: bool,
    },
    Step {
        thread: ThreadId,
        size: i32,
        depth: i32,
    },
    /// Parsed, accepted, never matched against (field watch, instance
    /// filters and friends are out of scope).
    Unsupported,
}

#[derive(Default)]
pub struct EventRegistry {
    pub defs: Vec<EventDef>,
    next_id: i32,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut def: EventDef) -> i32 {
        self.next_id += 1;
        def.id = self.next_id;
        let id = def.id;
        self.defs.push(def);
        id
    }

    pub fn remove(&mut self, kind: u8, id: i32) -> Option<EventDef> {
        let pos = self
            .defs
            .iter()
            .position(|d| d.kind == kind && d.id == id)?;
        Some(self.defs.remove(pos))
    }

    pub fn clear(&mut self) -> Vec<EventDef> {
        std::mem::take(&mut self.defs)
    }

    pub fn breakpoint_at(&self, method: MethodId, pc: usize) -> Option<&EventDef> {
        self.defs.iter().find(|d| {
            d.in_use
                && d.breakpoint
                    .map(|site| site.method == method && site.pc == pc)
                    .unwrap_or(false)
        })
    }

    pub fn has_step_for(&self, tid: ThreadId) -> bool {
        self.defs.iter().any(|d| {
            d.in_use && d.step.as_ref().map(|s| s.thread == tid).unwrap_or(false)
        })
    }
}

/// An event composed for a thread that was debugger-suspended when it fired;
/// replayed in order when the thread resumes.
pub struct ParkedEvent {
    pub packet: Vec<u8>,
    pub suspend_policy: u8,
    pub thread: ThreadId,
}

/// The raw occurrences the core reports into the engine.
pub enum RawEvent {
    VmStart {
        thread: ThreadId,
    },
    VmDeath,
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    ClassPrepare {
        thread: ThreadId,
        class: ClassId,
    },
    ClassUnload {
        signature: Symbol,
    },
    Breakpoint {
        thread: ThreadId,
        method: MethodId,
        pc: usize,
    },
    SingleStep {
        thread: ThreadId,
        method: MethodId,
        pc: usize,
    },
    Exception {
        thread: ThreadId,
        method: MethodId,
        pc: usize,
        throwable: HeapRef,
        catch: Option<(MethodId, usize)>,
    },
}

impl RawEvent {
    fn kind(&self) -> u8 {
        match self {
            RawEvent::VmStart { .. } => event_kind::VM_START,
            RawEvent::VmDeath => event_kind::VM_DEATH,
            RawEvent::ThreadStart { .. } => event_kind::THREAD_START,
            RawEvent::ThreadDeath { .. } => event_kind::THREAD_DEATH,
            RawEvent::ClassPrepare { .. } => event_kind::CLASS_PREPARE,
            RawEvent::ClassUnload { .. } => event_kind::CLASS_UNLOAD,
            RawEvent::Breakpoint { .. } => event_kind::BREAKPOINT,
            RawEvent::SingleStep { .. } => event_kind::SINGLE_STEP,
            RawEvent::Exception { .. } => event_kind::EXCEPTION,
        }
    }

    fn thread(&self) -> Option<ThreadId> {
        match self {
            RawEvent::VmStart { thread }
            | RawEvent::ThreadStart { thread }
            | RawEvent::ThreadDeath { thread }
            | RawEvent::ClassPrepare { thread, .. }
            | RawEvent::Breakpoint { thread, .. }
            | RawEvent::SingleStep { thread, .. }
            | RawEvent::Exception { thread, .. } => Some(*thread),
            RawEvent::VmDeath | RawEvent::ClassUnload { .. } => None,
        }
    }

    /// Class the event is "about", for the class filters.
    fn class_of(&self, vm: &VirtualMachine) -> Option<ClassId> {
        match self {
            RawEvent::ClassPrepare { class, .. } => Some(*class),
            RawEvent::Breakpoint { method, .. } | RawEvent::SingleStep { method, .. } => {
                Some(vm.method_area.get_method(method).class_id())
            }
            RawEvent::Exception { method, .. } => {
                Some(vm.method_area.get_method(method).class_id())
            }
            _ => None,
        }
    }
}

// -- matching -----------------------------------------------------------------

fn dotted_name(vm: &VirtualMachine, class: ClassId) -> String {
    vm.interner
        .resolve(&vm.method_area.get_class(&class).name())
        .replace('/', ".")
}

/// `*suffix` or `prefix*` only, per the protocol's restricted patterns.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        pattern == name
    }
}

fn modifier_matches(vm: &VirtualMachine, modifier: &Modifier, event: &RawEvent) -> bool {
    match modifier {
        Modifier::Count(_) => true, // applied in its own pass
        Modifier::ThreadOnly(thread_obj) => event
            .thread()
            .map(|tid| vm.thread(tid).thread_obj == *thread_obj)
            .unwrap_or(false),
        Modifier::ClassOnly(filter) => event
            .class_of(vm)
            .map(|class| vm.method_area.is_assignable_from(*filter, class))
            .unwrap_or(false),
        Modifier::ClassMatch(pattern) => event
            .class_of(vm)
            .map(|class| pattern_matches(pattern, &dotted_name(vm, class)))
            .unwrap_or(false),
        Modifier::ClassExclude(pattern) => event
            .class_of(vm)
            .map(|class| !pattern_matches(pattern, &dotted_name(vm, class)))
            .unwrap_or(true),
        Modifier::LocationOnly {
            method, index, ..
        } => match event {
            RawEvent::Breakpoint { method: m, pc, .. }
            | RawEvent::SingleStep { method: m, pc, .. }
            | RawEvent::Exception { method: m, pc, .. } => {
                m == method && *pc as u64 == *index
            }
            _ => false,
        },
        Modifier::ExceptionOnly {
            class,
            caught,
            uncaught,
        } => match event {
            RawEvent::Exception {
                throwable, catch, ..
            } => {
                let caught_here = catch.is_some();
                if caught_here && !caught {
                    return false;
                }
                if !caught_here && !uncaught {
                    return false;
                }
                match class {
                    None => true,
                    Some(filter) => vm
                        .heap
                        .get_class_id(*throwable)
                        .map(|c| vm.method_area.is_assignable_from(*filter, c))
                        .unwrap_or(false),
                }
            }
            _ => false,
        },
        Modifier::Step { thread, size, depth } => match event {
            RawEvent::SingleStep { thread: t, .. } => {
                // The def's own step state drove the trigger; the modifier
                // re-checks the registered triple.
                *t == *thread && *size >= 0 && *depth >= 0
            }
            _ => false,
        },
        Modifier::Unsupported => true,
    }
}

// -- composition --------------------------------------------------------------

fn write_event_payload(
    vm: &mut VirtualMachine,
    out: &mut PacketStream,
    request_id: i32,
    event: &RawEvent,
) -> Result<(), VmError> {
    out.write_u8(event.kind());
    out.write_i32(request_id);

    let thread_id = |vm: &mut VirtualMachine, tid: ThreadId| -> u32 {
        let thread_obj = vm.thread(tid).thread_obj;
        match vm.jdwp.session_mut() {
            Some(session) => session.id_map.put(thread_obj),
            None => 0,
        }
    };

    match event {
        RawEvent::VmStart { thread } | RawEvent::ThreadStart { thread } | RawEvent::ThreadDeath { thread } => {
            let id = thread_id(vm, *thread);
            out.write_u32(id);
        }
        RawEvent::VmDeath => {}
        RawEvent::ClassPrepare { thread, class } => {
            let id = thread_id(vm, *thread);
            out.write_u32(id);
            let class_ref = vm.method_area.get_class(class);
            let tag = match class_ref {
                JvmClass::Array(_) => type_tag::ARRAY,
                c if c.is_interface() => type_tag::INTERFACE,
                _ => type_tag::CLASS,
            };
            out.write_u8(tag);
            out.write_u32(class.as_u32());
            let signature = vm.interner.resolve(&class_ref.jni_signature()).to_string();
            out.write_string(&signature);
            out.write_i32(jdwp::commands::class_status_of(vm, *class));
        }
        RawEvent::ClassUnload { signature } => {
            let signature = vm.interner.resolve(signature).to_string();
            out.write_string(&signature);
        }
        RawEvent::Breakpoint { thread, method, pc }
        | RawEvent::SingleStep { thread, method, pc } => {
            let id = thread_id(vm, *thread);
            out.write_u32(id);
            write_location_owned(vm, out, *method, *pc as u64);
        }
        RawEvent::Exception {
            thread,
            method,
            pc,
            throwable,
            catch,
        } => {
            let id = thread_id(vm, *thread);
            out.write_u32(id);
            write_location_owned(vm, out, *method, *pc as u64);
            let tag = jdwp::commands::tag_for_object(vm, *throwable);
            let object_id = match vm.jdwp.session_mut() {
                Some(session) => session.id_map.put(*throwable),
                None => 0,
            };
            out.write_u8(tag);
            out.write_u32(object_id);
            match catch {
                Some((catch_method, catch_pc)) => {
                    write_location_owned(vm, out, *catch_method, *catch_pc as u64)
                }
                None => {
                    // Null catch location: zeroed tag/class/method/index.
                    out.write_u8(0);
                    out.write_u32(0);
                    out.write_u64(0);
                    out.write_u64(0);
                }
            }
        }
    }
    Ok(())
}

fn write_location_owned(vm: &VirtualMachine, out: &mut PacketStream, method: MethodId, pc: u64) {
    let class_id = vm.method_area.get_method(&method).class_id();
    let tag = match vm.method_area.get_class(&class_id) {
        JvmClass::Array(_) => type_tag::ARRAY,
        class if class.is_interface() => type_tag::INTERFACE,
        _ => type_tag::CLASS,
    };
    out.write_u8(tag);
    out.write_u32(class_id.as_u32());
    out.write_u64(method.as_u32() as u64);
    out.write_u64(pc);
}

// -- emission -----------------------------------------------------------------

/// Runs the def list against one raw event and, on any match, sends (or
/// parks) a composite packet and applies the strongest suspend policy.
pub fn emit(vm: &mut VirtualMachine, event: RawEvent) -> Result<(), VmError> {
    if !vm.jdwp.session_active() {
        return Ok(());
    }

    // Phase 1: filter evaluation against immutable VM state.
    let mut matched: Vec<(usize, i32, u8)> = Vec::new();
    {
        let kind = event.kind();
        for (idx, def) in vm.jdwp.events.defs.iter().enumerate() {
            if !def.in_use || def.kind != kind {
                continue;
            }
            if def.modifiers.iter().all(|m| modifier_matches(vm, m, &event)) {
                matched.push((idx, def.id, def.suspend_policy));
            }
        }
    }

    // Phase 2: countdown filters retire their defs.
    matched.retain(|(idx, _, _)| {
        let def = &mut vm.jdwp.events.defs[*idx];
        let mut fire = true;
        for modifier in def.modifiers.iter_mut() {
            if let Modifier::Count(remaining) = modifier {
                *remaining -= 1;
                if *remaining > 0 {
                    fire = false;
                } else {
                    def.in_use = false;
                }
            }
        }
        fire
    });

    // The automatic lifecycle events exist even with no request registered.
    let implicit = matches!(event, RawEvent::VmStart { .. } | RawEvent::VmDeath);
    if matched.is_empty() && !implicit {
        return Ok(());
    }

    let mut policy = matched.iter().map(|(_, _, p)| *p).max().unwrap_or(0);
    if implicit {
        let start_policy = match &event {
            RawEvent::VmStart { .. } if vm.config.jdwp.as_ref().is_some_and(|j| j.suspend_on_start) => {
                suspend_policy::ALL
            }
            _ => suspend_policy::NONE,
        };
        policy = policy.max(start_policy);
    }

    // Compose one composite packet carrying every matched request.
    let mut data = PacketStream::new();
    data.write_u8(policy);
    let mut count = matched.len() as u32;
    if implicit {
        count += 1;
    }
    data.write_u32(count);
    if implicit {
        write_event_payload(vm, &mut data, 0, &event)?;
    }
    let request_ids: Vec<i32> = matched.iter().map(|(_, id, _)| *id).collect();
    for request_id in request_ids {
        write_event_payload(vm, &mut data, request_id, &event)?;
    }
    let packet = {
        let session = vm.jdwp.session_mut().expect("session checked above");
        let id = session.next_packet_id();
        encode_packet(id, 0, command_set::EVENT, 100, &data)
    };

    // Park instead of sending when the subject thread is already suspended.
    if let Some(tid) = event.thread() {
        if vm.thread(tid).dbg_suspend_count > 0 {
            debug_log!("parking event for suspended thread {:?}", tid);
            vm.thread_mut(tid).parked_events.push_back(ParkedEvent {
                packet,
                suspend_policy: policy,
                thread: tid,
            });
            return Ok(());
        }
    }

    send_or_close(vm, &packet);
    apply_suspend(vm, policy, event.thread());
    Ok(())
}

fn send_or_close(vm: &mut VirtualMachine, packet: &[u8]) {
    let failed = match vm.jdwp.session_mut() {
        Some(session) => session.transport.write_bytes(packet).is_err(),
        None => false,
    };
    if failed {
        jdwp::close_session(vm);
    }
}

pub(crate) fn apply_suspend(vm: &mut VirtualMachine, policy: u8, thread: Option<ThreadId>) {
    match policy {
        suspend_policy::EVENT_THREAD => {
            if let Some(tid) = thread {
                vm.thread_mut(tid).dbg_suspend();
            }
        }
        suspend_policy::ALL => {
            for t in vm.threads.iter_mut() {
                if t.is_alive() {
                    t.dbg_suspend();
                }
            }
        }
        _ => {}
    }
}

/// FIFO replay after a resume; stops early if a replayed event re-suspends
/// the thread.
pub fn replay_parked(vm: &mut VirtualMachine, tid: ThreadId) -> Result<(), VmError> {
    loop {
        if vm.thread(tid).dbg_suspend_count > 0 {
            return Ok(());
        }
        let Some(parked) = vm.thread_mut(tid).parked_events.pop_front() else {
            return Ok(());
        };
        send_or_close(vm, &parked.packet);
        apply_suspend(vm, parked.suspend_policy, Some(parked.thread));
    }
}

// -- reporting entry points ---------------------------------------------------

/// Sent exactly once per session, as the first event the debugger sees.
pub fn report_vm_start(vm: &mut VirtualMachine) -> Result<(), VmError> {
    if !vm.jdwp.session_active() || vm.jdwp.vm_start_sent {
        return Ok(());
    }
    let Some(thread) = vm.current_thread else {
        return Ok(());
    };
    vm.jdwp.vm_start_sent = true;
    emit(vm, RawEvent::VmStart { thread })
}

pub fn report_vm_death(vm: &mut VirtualMachine) -> Result<(), VmError> {
    emit(vm, RawEvent::VmDeath)
}

pub fn report_thread_start(vm: &mut VirtualMachine, tid: ThreadId) -> Result<(), VmError> {
    emit(vm, RawEvent::ThreadStart { thread: tid })
}

pub fn report_thread_death(vm: &mut VirtualMachine, tid: ThreadId) -> Result<(), VmError> {
    emit(vm, RawEvent::ThreadDeath { thread: tid })
}

pub fn report_class_prepares(vm: &mut VirtualMachine) -> Result<(), VmError> {
    let pending = vm.method_area.take_pending_prepares();
    if !vm.jdwp.session_active() {
        return Ok(());
    }
    let Some(thread) = vm.current_thread else {
        return Ok(());
    };
    for class in pending {
        // A class can load and unload between drains.
        if vm.method_area.get_class_opt(class).is_none() {
            continue;
        }
        emit(vm, RawEvent::ClassPrepare { thread, class })?;
    }
    Ok(())
}

pub fn report_class_unloads(vm: &mut VirtualMachine) -> Result<(), VmError> {
    for unloaded in vm.method_area.take_unloaded() {
        emit(
            vm,
            RawEvent::ClassUnload {
                signature: unloaded.signature,
            },
        )?;
    }
    Ok(())
}

pub fn report_exception(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    throwable: HeapRef,
    catch_site: Option<(usize, usize)>,
) -> Result<(), VmError> {
    if !vm.jdwp.session_active() {
        return Ok(());
    }
    let Ok(frame) = vm.thread(tid).cur_frame() else {
        return Ok(());
    };
    let (method, pc) = (frame.method_id, frame.pc);
    let catch = catch_site.map(|(frame_idx, handler_pc)| {
        (vm.thread(tid).frames[frame_idx].method_id, handler_pc)
    });
    emit(
        vm,
        RawEvent::Exception {
            thread: tid,
            method,
            pc,
            throwable,
            catch,
        },
    )
}

// -- breakpoints --------------------------------------------------------------

/// The interpreter found the breakpoint opcode. Returns the saved original
/// opcode to execute now, or None when the event suspended the thread (the
/// original runs on resume via the thread's continuation mark).
pub fn hit_breakpoint(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    method: MethodId,
    pc: usize,
) -> Result<Option<u8>, VmError> {
    let original = vm
        .jdwp
        .events
        .breakpoint_at(method, pc)
        .map(|def| def.breakpoint.unwrap().saved_opcode)
        .ok_or_else(|| VmError::Internal("breakpoint opcode without a site".to_string()))?;

    if vm.thread(tid).bp_cont == Some((method, pc)) {
        vm.thread_mut(tid).bp_cont = None;
        return Ok(Some(original));
    }

    emit(vm, RawEvent::Breakpoint { thread: tid, method, pc })?;

    if vm.thread(tid).is_scheduleable() {
        Ok(Some(original))
    } else {
        vm.thread_mut(tid).bp_cont = Some((method, pc));
        Ok(None)
    }
}

// -- single stepping ----------------------------------------------------------

/// Compares the thread's new position against every armed step request and
/// fires those whose size/depth rules say the step completed.
pub fn check_single_step(vm: &mut VirtualMachine, tid: ThreadId) -> Result<(), VmError> {
    let Ok(frame) = vm.thread(tid).cur_frame() else {
        return Ok(());
    };
    let depth = vm.thread(tid).frames.len();
    let (method, pc) = (frame.method_id, frame.pc);
    let line = vm.method_area.get_method(&method).line_for_pc(pc);

    let mut fired = false;
    for def in vm.jdwp.events.defs.iter_mut() {
        if !def.in_use {
            continue;
        }
        let Some(step) = def.step.as_mut() else {
            continue;
        };
        if step.thread != tid {
            continue;
        }

        let deeper = depth > step.origin_depth;
        let shallower = depth < step.origin_depth;
        let moved = if step.size == step_size::LINE && line.is_some() {
            method != step.origin_method || line != step.origin_line
        } else {
            method != step.origin_method || pc != step.origin_pc
        };

        let hit = match step.depth {
            step_depth::INTO => moved || deeper || shallower,
            step_depth::OVER => shallower || (!deeper && moved),
            step_depth::OUT => shallower,
            _ => false,
        };
        if hit {
            step.origin_depth = depth;
            step.origin_method = method;
            step.origin_pc = pc;
            step.origin_line = line;
            fired = true;
        }
    }

    if fired {
        emit(vm, RawEvent::SingleStep { thread: tid, method, pc })?;
    }
    Ok(())
}

// -- modifier parsing ---------------------------------------------------------

/// Reads one wire modifier. Unknown-but-defined kinds parse into
/// `Unsupported`; malformed data is the caller's ILLEGAL_ARGUMENT.
pub fn read_modifier(
    vm: &mut VirtualMachine,
    input: &mut PacketStream,
) -> Result<Modifier, crate::error::TransportError> {
    use crate::error::TransportError;
    let kind = input.read_u8()?;
    let modifier = match kind {
        modifier_kind::COUNT => Modifier::Count(input.read_i32()?),
        modifier_kind::CONDITIONAL => {
            input.read_i32()?;
            Modifier::Unsupported
        }
        modifier_kind::THREAD_ONLY => {
            let object_id = input.read_u32()?;
            let object = vm
                .jdwp
                .session_mut()
                .and_then(|s| s.id_map.get(object_id))
                .ok_or(TransportError::IllegalArgument)?;
            Modifier::ThreadOnly(object)
        }
        modifier_kind::CLASS_ONLY => {
            let class = ClassId::from_u32(input.read_u32()?)
                .ok_or(TransportError::IllegalArgument)?;
            Modifier::ClassOnly(class)
        }
        modifier_kind::CLASS_MATCH => Modifier::ClassMatch(input.read_string()?),
        modifier_kind::CLASS_EXCLUDE => Modifier::ClassExclude(input.read_string()?),
        modifier_kind::LOCATION_ONLY => {
            let _tag = input.read_u8()?;
            let class = ClassId::from_u32(input.read_u32()?)
                .ok_or(TransportError::IllegalArgument)?;
            let method = MethodId::from_u32(input.read_u64()? as u32)
                .ok_or(TransportError::IllegalArgument)?;
            let index = input.read_u64()?;
            Modifier::LocationOnly {
                class,
                method,
                index,
            }
        }
        modifier_kind::EXCEPTION_ONLY => {
            let class_raw = input.read_u32()?;
            let caught = input.read_bool()?;
            let uncaught = input.read_bool()?;
            Modifier::ExceptionOnly {
                class: ClassId::from_u32(class_raw),
                caught,
                uncaught,
            }
        }
        modifier_kind::STEP => {
            let thread_object = input.read_u32()?;
            let size = input.read_i32()?;
            let depth = input.read_i32()?;
            let object = vm
                .jdwp
                .session_mut()
                .and_then(|s| s.id_map.get(thread_object))
                .ok_or(TransportError::IllegalArgument)?;
            let thread = vm
                .thread_for_obj(object)
                .ok_or(TransportError::IllegalArgument)?;
            Modifier::Step {
                thread,
                size,
                depth,
            }
        }
        modifier_kind::FIELD_ONLY => {
            input.read_u32()?;
            input.read_u64()?;
            Modifier::Unsupported
        }
        modifier_kind::INSTANCE_ONLY => {
            input.read_u32()?;
            Modifier::Unsupported
        }
        modifier_kind::SOURCE_NAME_MATCH => {
            input.read_string()?;
            Modifier::Unsupported
        }
        _ => return Err(TransportError::IllegalArgument),
    };
    Ok(modifier)
}
