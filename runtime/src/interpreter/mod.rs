use crate::error::{exit_code, VmError};
use crate::heap::HeapRef;
use crate::jdwp;
use crate::keys::{ClassId, MethodId, ThreadId};
use crate::rt::{ClassLike, ClassState};
use crate::thread::stack::{throw_if_over_quota, Frame};
use crate::thread::PendingException;
use crate::vm::{Value, VirtualMachine};
use crate::{build_exception, debug_log};
use smallvec::SmallVec;

mod handlers;
pub mod opcode;

use opcode::{instruction_length, Opcode};

/// What one dispatched instruction did to the control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Fell through; pc advances by the instruction's length.
    Normal,
    /// Handler wrote pc (branches, returns-into-caller, natives).
    Branched,
    /// A callee (or `<clinit>`) frame was pushed; the caller pc is untouched
    /// and the callee's `ret_advance` knows how to move it on return.
    FramePushed,
    /// A frame was popped back into a caller.
    FrameCompleted,
    /// The thread left the runnable set (monitor, wait, sleep, suspend).
    Parked,
    /// The thread stays runnable but must give up the quantum (waiting for
    /// another thread's `<clinit>` to finish).
    Yield,
    /// The bottom frame returned.
    ThreadExited,
}

/// Drives one thread for at most `budget` instructions. Fatal host errors
/// propagate; Java throwables are delivered in place.
pub fn run_quantum(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    budget: usize,
) -> Result<(), VmError> {
    for _ in 0..budget {
        if vm.exit_status.is_some() || !vm.thread(tid).is_scheduleable() {
            break;
        }

        // Exceptions armed by natives, interrupts or Thread.stop are thrown
        // at the top of the dispatch step.
        if let Some(pending) = vm.thread_mut(tid).pending_exception.take() {
            let err = match pending {
                PendingException::Kind(kind, message) => {
                    VmError::JavaException(crate::error::JavaExceptionFromVm { kind, message })
                }
                PendingException::Object(r) => VmError::JavaExceptionThrown(r),
            };
            deliver_exception(vm, tid, err)?;
            continue;
        }

        match step(vm, tid) {
            Ok(StepOutcome::ThreadExited) => {
                retire_thread(vm, tid)?;
                break;
            }
            Ok(StepOutcome::Parked) | Ok(StepOutcome::Yield) => break,
            Ok(_) => {}
            Err(err) => {
                deliver_exception(vm, tid, err)?;
            }
        }
    }
    Ok(())
}

fn code_u8(vm: &VirtualMachine, mid: MethodId, at: usize) -> Result<u8, VmError> {
    Ok(vm.method_area.get_method(&mid).code()?[at])
}

fn code_u16(vm: &VirtualMachine, mid: MethodId, at: usize) -> Result<u16, VmError> {
    Ok(opcode::read_u16(vm.method_area.get_method(&mid).code()?, at))
}

fn code_i16(vm: &VirtualMachine, mid: MethodId, at: usize) -> Result<i16, VmError> {
    Ok(opcode::read_i16(vm.method_area.get_method(&mid).code()?, at))
}

/// Fetch, decode, dispatch, retire one instruction of the thread's top frame.
fn step(vm: &mut VirtualMachine, tid: ThreadId) -> Result<StepOutcome, VmError> {
    let (method_id, pc) = {
        let frame = vm.thread(tid).cur_frame()?;
        (frame.method_id, frame.pc)
    };

    let raw = code_u8(vm, method_id, pc)?;
    let mut op = Opcode::try_from(raw)
        .map_err(|_| VmError::Internal(format!("unknown opcode 0x{raw:02x} at pc {pc}")))?;

    if op == Opcode::Breakpoint {
        match jdwp::events::hit_breakpoint(vm, tid, method_id, pc)? {
            Some(original) => {
                op = Opcode::try_from(original).map_err(|_| {
                    VmError::Internal("breakpoint shadowed a bad opcode".to_string())
                })?;
            }
            // Event suspended the thread; the saved opcode runs on resume.
            None => return Ok(StepOutcome::Parked),
        }
    }

    let outcome = dispatch(vm, tid, op, method_id, pc)?;

    if outcome == StepOutcome::Normal {
        let advance = {
            let code = vm.method_area.get_method(&method_id).code()?;
            instruction_length(op, code, pc)
        };
        vm.thread_mut(tid).cur_frame_mut()?.pc += advance;
    }

    // Single-step evaluation sees the new position and depth.
    if vm.jdwp.has_step_request(tid) && !matches!(outcome, StepOutcome::ThreadExited) {
        jdwp::events::check_single_step(vm, tid)?;
    }
    Ok(outcome)
}

fn dispatch(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    op: Opcode,
    mid: MethodId,
    pc: usize,
) -> Result<StepOutcome, VmError> {
    use handlers::*;
    use Opcode::*;

    debug_log!("thread {:?} pc {} op {:?}", tid, pc, op);

    let outcome = match op {
        Nop => StepOutcome::Normal,
        AconstNull => push_value(vm, tid, Value::Null)?,
        IconstM1 => push_value(vm, tid, Value::Integer(-1))?,
        Iconst0 => push_value(vm, tid, Value::Integer(0))?,
        Iconst1 => push_value(vm, tid, Value::Integer(1))?,
        Iconst2 => push_value(vm, tid, Value::Integer(2))?,
        Iconst3 => push_value(vm, tid, Value::Integer(3))?,
        Iconst4 => push_value(vm, tid, Value::Integer(4))?,
        Iconst5 => push_value(vm, tid, Value::Integer(5))?,
        Lconst0 => push_value(vm, tid, Value::Long(0))?,
        Lconst1 => push_value(vm, tid, Value::Long(1))?,
        Fconst0 => push_value(vm, tid, Value::Float(0.0))?,
        Fconst1 => push_value(vm, tid, Value::Float(1.0))?,
        Fconst2 => push_value(vm, tid, Value::Float(2.0))?,
        Dconst0 => push_value(vm, tid, Value::Double(0.0))?,
        Dconst1 => push_value(vm, tid, Value::Double(1.0))?,
        Bipush => {
            let v = code_u8(vm, mid, pc + 1)? as i8;
            push_value(vm, tid, Value::Integer(v as i32))?
        }
        Sipush => {
            let v = code_i16(vm, mid, pc + 1)?;
            push_value(vm, tid, Value::Integer(v as i32))?
        }
        Ldc => {
            let idx = code_u8(vm, mid, pc + 1)? as u16;
            handle_ldc(vm, tid, mid, idx)?
        }
        LdcW | Ldc2W => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_ldc(vm, tid, mid, idx)?
        }
        Iload | Lload | Fload | Dload | Aload => {
            let slot = code_u8(vm, mid, pc + 1)? as u16;
            handle_load(vm, tid, slot)?
        }
        Iload0 | Lload0 | Fload0 | Dload0 | Aload0 => handle_load(vm, tid, 0)?,
        Iload1 | Lload1 | Fload1 | Dload1 | Aload1 => handle_load(vm, tid, 1)?,
        Iload2 | Lload2 | Fload2 | Dload2 | Aload2 => handle_load(vm, tid, 2)?,
        Iload3 | Lload3 | Fload3 | Dload3 | Aload3 => handle_load(vm, tid, 3)?,
        Istore | Lstore | Fstore | Dstore | Astore => {
            let slot = code_u8(vm, mid, pc + 1)? as u16;
            handle_store(vm, tid, slot)?
        }
        Istore0 | Lstore0 | Fstore0 | Dstore0 | Astore0 => handle_store(vm, tid, 0)?,
        Istore1 | Lstore1 | Fstore1 | Dstore1 | Astore1 => handle_store(vm, tid, 1)?,
        Istore2 | Lstore2 | Fstore2 | Dstore2 | Astore2 => handle_store(vm, tid, 2)?,
        Istore3 | Lstore3 | Fstore3 | Dstore3 | Astore3 => handle_store(vm, tid, 3)?,
        Iaload | Laload | Faload | Daload | Aaload | Baload | Caload | Saload => {
            handle_array_load(vm, tid)?
        }
        Iastore | Lastore | Fastore | Dastore | Bastore | Castore | Sastore => {
            handle_array_store(vm, tid)?
        }
        Aastore => handle_aastore(vm, tid)?,
        Pop => handle_pop(vm, tid)?,
        Pop2 => handle_pop2(vm, tid)?,
        Dup => handle_dup(vm, tid)?,
        DupX1 => handle_dup_x1(vm, tid)?,
        DupX2 => handle_dup_x2(vm, tid)?,
        Dup2 => handle_dup2(vm, tid)?,
        Dup2X1 => handle_dup2_x1(vm, tid)?,
        Dup2X2 => handle_dup2_x2(vm, tid)?,
        Swap => handle_swap(vm, tid)?,
        Iadd | Isub | Imul | Idiv | Irem | Ineg | Ishl | Ishr | Iushr | Iand | Ior | Ixor => {
            handle_int_arith(vm, tid, op)?
        }
        Ladd | Lsub | Lmul | Ldiv | Lrem | Lneg | Lshl | Lshr | Lushr | Land | Lor | Lxor => {
            handle_long_arith(vm, tid, op)?
        }
        Fadd | Fsub | Fmul | Fdiv | Frem | Fneg => handle_float_arith(vm, tid, op)?,
        Dadd | Dsub | Dmul | Ddiv | Drem | Dneg => handle_double_arith(vm, tid, op)?,
        Iinc => {
            let slot = code_u8(vm, mid, pc + 1)? as u16;
            let delta = code_u8(vm, mid, pc + 2)? as i8 as i32;
            handle_iinc(vm, tid, slot, delta)?
        }
        I2l | I2f | I2d | L2i | L2f | L2d | F2i | F2l | F2d | D2i | D2l | D2f | I2b | I2c
        | I2s => handle_convert(vm, tid, op)?,
        Lcmp | Fcmpl | Fcmpg | Dcmpl | Dcmpg => handle_compare(vm, tid, op)?,
        Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle => {
            let offset = code_i16(vm, mid, pc + 1)?;
            handle_if_zero(vm, tid, op, pc, offset)?
        }
        IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple => {
            let offset = code_i16(vm, mid, pc + 1)?;
            handle_if_icmp(vm, tid, op, pc, offset)?
        }
        IfAcmpeq | IfAcmpne => {
            let offset = code_i16(vm, mid, pc + 1)?;
            handle_if_acmp(vm, tid, op, pc, offset)?
        }
        Ifnull | Ifnonnull => {
            let offset = code_i16(vm, mid, pc + 1)?;
            handle_if_null(vm, tid, op, pc, offset)?
        }
        Goto => {
            let offset = code_i16(vm, mid, pc + 1)?;
            set_pc(vm, tid, (pc as isize + offset as isize) as usize)?
        }
        GotoW => {
            let offset = {
                let code = vm.method_area.get_method(&mid).code()?;
                opcode::read_i32(code, pc + 1)
            };
            set_pc(vm, tid, (pc as isize + offset as isize) as usize)?
        }
        Jsr => {
            let offset = code_i16(vm, mid, pc + 1)?;
            handle_jsr(vm, tid, pc, offset as i32, 3)?
        }
        JsrW => {
            let offset = {
                let code = vm.method_area.get_method(&mid).code()?;
                opcode::read_i32(code, pc + 1)
            };
            handle_jsr(vm, tid, pc, offset, 5)?
        }
        Ret => {
            let slot = code_u8(vm, mid, pc + 1)? as u16;
            handle_ret(vm, tid, slot)?
        }
        Tableswitch => handle_tableswitch(vm, tid, mid, pc)?,
        Lookupswitch => handle_lookupswitch(vm, tid, mid, pc)?,
        Ireturn | Lreturn | Freturn | Dreturn | Areturn => {
            let value = vm.thread_mut(tid).cur_frame_mut()?.pop()?;
            complete_frame(vm, tid, Some(value))?
        }
        Return => complete_frame(vm, tid, None)?,
        Getstatic => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_getstatic(vm, tid, mid, idx)?
        }
        Putstatic => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_putstatic(vm, tid, mid, idx)?
        }
        Getfield => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_getfield(vm, tid, mid, idx)?
        }
        Putfield => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_putfield(vm, tid, mid, idx)?
        }
        Invokevirtual => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_invokevirtual(vm, tid, mid, idx)?
        }
        Invokespecial => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_invokespecial(vm, tid, mid, idx)?
        }
        Invokestatic => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_invokestatic(vm, tid, mid, idx)?
        }
        Invokeinterface => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_invokeinterface(vm, tid, mid, idx)?
        }
        Invokedynamic => {
            return Err(build_exception!(
                UnsupportedOperationException,
                "invokedynamic is not supported"
            ))
        }
        New => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_new(vm, tid, mid, idx)?
        }
        Newarray => {
            let atype = code_u8(vm, mid, pc + 1)?;
            handle_newarray(vm, tid, atype)?
        }
        Anewarray => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_anewarray(vm, tid, mid, idx)?
        }
        Multianewarray => {
            let idx = code_u16(vm, mid, pc + 1)?;
            let dims = code_u8(vm, mid, pc + 3)?;
            handle_multianewarray(vm, tid, mid, idx, dims)?
        }
        Arraylength => handle_arraylength(vm, tid)?,
        Athrow => handle_athrow(vm, tid)?,
        Checkcast => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_checkcast(vm, tid, mid, idx)?
        }
        Instanceof => {
            let idx = code_u16(vm, mid, pc + 1)?;
            handle_instanceof(vm, tid, mid, idx)?
        }
        Monitorenter => handle_monitorenter(vm, tid)?,
        Monitorexit => handle_monitorexit(vm, tid)?,
        Wide => handle_wide(vm, tid, mid, pc)?,
        Breakpoint => unreachable!("substituted before dispatch"),
    };
    Ok(outcome)
}

// -- invocation ---------------------------------------------------------------

/// Pops `argc` operands off the caller into call order.
pub(crate) fn pop_args(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    argc: usize,
) -> Result<SmallVec<[Value; 8]>, VmError> {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let mut args: SmallVec<[Value; 8]> = SmallVec::with_capacity(argc);
    for _ in 0..argc {
        args.push(frame.pop()?);
    }
    args.reverse();
    Ok(args)
}

pub(crate) fn arg_count(vm: &mut VirtualMachine, key_desc: crate::keys::Symbol, is_static: bool) -> Result<usize, VmError> {
    let id = vm.method_area.get_or_new_method_descriptor_id(key_desc)?;
    let params = vm.method_area.get_method_descriptor(&id).params.len();
    Ok(params + usize::from(!is_static))
}

/// Transfers control into `method_id`. For bytecode methods a frame is
/// pushed (acquiring the monitor for synchronized ones); natives run inline.
/// `ret_advance` is the invoke instruction's length.
pub(crate) fn invoke_method(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    method_id: MethodId,
    args: &[Value],
    ret_advance: usize,
) -> Result<StepOutcome, VmError> {
    let (is_native, is_abstract) = {
        let method = vm.method_area.get_method(&method_id);
        (method.is_native(), method.is_abstract())
    };
    if is_abstract {
        return Err(build_exception!(
            IncompatibleClassChangeError,
            "abstract method invoked"
        ));
    }
    if is_native {
        return invoke_native(vm, tid, method_id, args, ret_advance);
    }

    let (max_stack, max_locals, is_sync, is_static, class_id) = {
        let method = vm.method_area.get_method(&method_id);
        let (max_stack, max_locals) = method.frame_attributes()?;
        (
            max_stack as usize,
            max_locals as usize,
            method.is_synchronized(),
            method.is_static(),
            method.class_id(),
        )
    };
    throw_if_over_quota(vm.thread(tid).frames.len(), vm.config.stack_quota)?;

    let sync_object = if is_sync {
        Some(if is_static {
            // Mirror creation can collect; the popped arguments are not on
            // any frame right now, so root them for the duration.
            let mark = vm.transient_roots.mark();
            for arg in args {
                if let Value::Ref(r) = arg {
                    vm.transient_roots.push(*r)?;
                }
            }
            let mirror = vm.mirror(class_id)?;
            vm.transient_roots.release_to(mark);
            mirror
        } else {
            args[0].as_obj_ref()?
        })
    } else {
        None
    };

    let mut frame = Frame::new(method_id, max_locals.max(args_slot_count(args)), max_stack);
    frame.store_args(args);
    frame.ret_advance = ret_advance;
    frame.sync_object = sync_object;
    vm.thread_mut(tid).frames.push(frame);

    if let Some(object) = sync_object {
        let VirtualMachine {
            monitors, threads, ..
        } = vm;
        if monitors.enter(threads, tid, object)
            == crate::thread::monitor::EnterOutcome::Blocked
        {
            return Ok(StepOutcome::Parked);
        }
    }
    Ok(StepOutcome::FramePushed)
}

fn args_slot_count(args: &[Value]) -> usize {
    args.iter().map(|a| if a.is_wide() { 2 } else { 1 }).sum()
}

fn invoke_native(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    method_id: MethodId,
    args: &[Value],
    ret_advance: usize,
) -> Result<StepOutcome, VmError> {
    let key = {
        let method = vm.method_area.get_method(&method_id);
        let class = vm.method_area.get_class(&method.class_id());
        crate::keys::FullyQualifiedMethodKey::new(class.name(), method.name, method.desc)
    };
    let native = vm
        .native_registry
        .get(&key)
        .ok_or_else(|| build_exception!(UnsatisfiedLinkError, "unbound native method"))?;

    let mark = vm.transient_roots.mark();
    let result = native(vm, tid, args);
    vm.transient_roots.release_to(mark);

    let returned = result?;
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    if let Some(value) = returned {
        frame.push(value);
    }
    frame.pc += ret_advance;

    if vm.thread(tid).is_scheduleable() {
        Ok(StepOutcome::Branched)
    } else {
        Ok(StepOutcome::Parked)
    }
}

/// Pops the finished top frame, releasing its monitor, finishing its
/// `<clinit>` transition and resuming the caller.
pub(crate) fn complete_frame(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    value: Option<Value>,
) -> Result<StepOutcome, VmError> {
    let frame = pop_frame(vm, tid, ClassState::Initialized)?;
    if vm.thread(tid).frames.is_empty() {
        return Ok(StepOutcome::ThreadExited);
    }
    let caller = vm.thread_mut(tid).cur_frame_mut()?;
    if let Some(value) = value {
        caller.push(value);
    }
    caller.pc += frame.ret_advance;
    Ok(StepOutcome::FrameCompleted)
}

fn pop_frame(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    clinit_outcome: ClassState,
) -> Result<Frame, VmError> {
    let frame = vm
        .thread_mut(tid)
        .frames
        .pop()
        .ok_or(VmError::FrameStackIsEmpty)?;
    if let Some(object) = frame.sync_object {
        let VirtualMachine {
            monitors, threads, ..
        } = vm;
        // The frame owned this monitor; a failure here is VM state damage.
        monitors
            .exit(threads, tid, object)
            .map_err(|_| VmError::Internal("synchronized frame lost its monitor".to_string()))?;
    }
    if let Some(class_id) = frame.clinit_of {
        let class = vm.method_area.get_class(&class_id).as_class_like();
        class.finish_initializing(clinit_outcome);
        debug_log!("class init finished: {:?} -> {:?}", class_id, clinit_outcome);
    }
    Ok(frame)
}

// -- class initialization -----------------------------------------------------

pub(crate) enum InitState {
    /// Use the class freely.
    Ready,
    /// `<clinit>` frames were pushed; re-execute the trigger afterwards.
    Pushed,
    /// Another thread is initializing; give up the quantum.
    Busy,
}

/// JVMS 5.5, cooperatively: the triggering instruction does not advance
/// until every `<clinit>` in the chain has run on this thread's stack.
pub(crate) fn ensure_initialized(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    class_id: ClassId,
) -> Result<InitState, VmError> {
    match vm.method_area.get_class(&class_id).as_class_like().state() {
        ClassState::Initialized => return Ok(InitState::Ready),
        ClassState::ErrorInitializing => {
            return Err(build_exception!(
                NoClassDefFoundError,
                "class failed initialization"
            ))
        }
        ClassState::Initializing => {
            let class = vm.method_area.get_class(&class_id).as_class_like();
            return if class.initializing_thread() == Some(tid) {
                Ok(InitState::Ready)
            } else {
                Ok(InitState::Busy)
            };
        }
        ClassState::Loaded | ClassState::Loading => {}
    }

    // Gather self-then-supers needing init; execution order is the reverse.
    let mut chain: Vec<ClassId> = Vec::new();
    let mut cursor = Some(class_id);
    while let Some(id) = cursor {
        let class = vm.method_area.get_class(&id).as_class_like();
        if class.state() != ClassState::Loaded {
            break;
        }
        chain.push(id);
        cursor = class.get_super();
    }

    let mut pushed = false;
    for id in chain.clone() {
        let interfaces = match vm.method_area.get_class_opt(id) {
            Some(crate::rt::JvmClass::Instance(c)) => c.get_direct_interfaces()?.clone(),
            _ => Vec::new(),
        };
        pushed |= begin_init_of(vm, tid, id)?;
        for interface_id in interfaces {
            let interface = vm.method_area.get_class(&interface_id).as_class_like();
            if interface.state() == ClassState::Loaded
                && interface.get_clinit_method_id().is_some()
            {
                pushed |= begin_init_of(vm, tid, interface_id)?;
            }
        }
    }

    Ok(if pushed {
        InitState::Pushed
    } else {
        InitState::Ready
    })
}

/// Marks one class initializing, materializes its string constants, and
/// pushes its `<clinit>` frame if it has one. Returns whether a frame went up.
fn begin_init_of(vm: &mut VirtualMachine, tid: ThreadId, class_id: ClassId) -> Result<bool, VmError> {
    let clinit = {
        let class = vm.method_area.get_class(&class_id).as_class_like();
        if class.state() != ClassState::Loaded {
            return Ok(false);
        }
        class.begin_initializing(tid);
        class.get_clinit_method_id()
    };

    // String ConstantValues intern now that the heap can be touched.
    let string_constants: Vec<(crate::keys::FieldKey, crate::keys::Symbol)> = vm
        .method_area
        .get_class(&class_id)
        .as_class_like()
        .static_fields()
        .iter()
        .filter_map(|f| f.string_constant.map(|sym| (f.key, sym)))
        .collect();
    for (key, sym) in string_constants {
        let interned = vm.intern(sym)?;
        vm.method_area
            .get_class(&class_id)
            .as_class_like()
            .set_static_field_value(&key, Value::Ref(interned))?;
    }

    match clinit {
        Some(method_id) => {
            throw_if_over_quota(vm.thread(tid).frames.len(), vm.config.stack_quota)?;
            let (max_stack, max_locals) = vm
                .method_area
                .get_method(&method_id)
                .frame_attributes()?;
            let mut frame = Frame::new(method_id, max_locals as usize, max_stack as usize);
            frame.clinit_of = Some(class_id);
            vm.thread_mut(tid).frames.push(frame);
            Ok(true)
        }
        None => {
            let class = vm.method_area.get_class(&class_id).as_class_like();
            class.finish_initializing(ClassState::Initialized);
            Ok(false)
        }
    }
}

/// Bottom frame of a fresh thread (`main`, or `Thread.run` for spawned
/// ones); arranges class initialization to run first.
pub fn push_entry_frame(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    method_id: MethodId,
    args: Vec<Value>,
) -> Result<(), VmError> {
    let class_id = vm.method_area.get_method(&method_id).class_id();
    invoke_method(vm, tid, method_id, &args, 0)?;
    match ensure_initialized(vm, tid, class_id)? {
        InitState::Busy => Err(VmError::Internal(
            "entry class is initializing on another thread".to_string(),
        )),
        _ => Ok(()),
    }
}

// -- exception delivery -------------------------------------------------------

/// Where an in-flight throwable will land.
pub(crate) fn find_catch_site(
    vm: &VirtualMachine,
    tid: ThreadId,
    throwable: HeapRef,
) -> Result<Option<(usize, usize)>, VmError> {
    let throwable_class = vm.heap.get_class_id(throwable)?;
    let thread = vm.thread(tid);
    for (idx, frame) in thread.frames.iter().enumerate().rev() {
        let method = vm.method_area.get_method(&frame.method_id);
        let class_id = method.class_id();
        for entry in method.exception_table() {
            let range = (entry.start_pc as usize)..(entry.end_pc as usize);
            if !range.contains(&frame.pc) {
                continue;
            }
            if entry.catch_type == 0 {
                return Ok(Some((idx, entry.handler_pc as usize)));
            }
            let catch_sym = vm
                .method_area
                .get_instance_class(&class_id)?
                .cp
                .get_class_sym(entry.catch_type)?;
            if vm.method_area.instance_of(throwable_class, catch_sym) {
                return Ok(Some((idx, entry.handler_pc as usize)));
            }
        }
    }
    Ok(None)
}

/// Unwinds `err` on the given thread: materialize, report to the debugger,
/// walk handler tables, pop frames (releasing monitors), and either land on
/// a handler or kill the thread.
pub fn deliver_exception(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    err: VmError,
) -> Result<(), VmError> {
    let throwable = match err {
        VmError::JavaExceptionThrown(r) => r,
        VmError::JavaException(e) => {
            match vm.create_throwable(tid, e.kind, e.message.as_deref()) {
                Ok(r) => r,
                // Creation itself ran dry: fall back to the reserve.
                Err(VmError::JavaExceptionThrown(r)) => r,
                Err(VmError::OutOfMemory) => vm.emergency_oom,
                Err(fatal) => return Err(fatal),
            }
        }
        fatal => return Err(fatal),
    };

    let catch_site = find_catch_site(vm, tid, throwable)?;
    jdwp::events::report_exception(vm, tid, throwable, catch_site)?;

    match catch_site {
        Some((frame_idx, handler_pc)) => {
            while vm.thread(tid).frames.len() > frame_idx + 1 {
                pop_frame(vm, tid, ClassState::ErrorInitializing)?;
            }
            let frame = vm.thread_mut(tid).cur_frame_mut()?;
            frame.operand.clear();
            frame.push(Value::Ref(throwable));
            frame.pc = handler_pc;
            Ok(())
        }
        None => {
            while !vm.thread(tid).frames.is_empty() {
                pop_frame(vm, tid, ClassState::ErrorInitializing)?;
            }
            report_uncaught(vm, tid, throwable);
            vm.thread_mut(tid).uncaught = Some(throwable);
            kill_thread(vm, tid)?;
            if vm.config.exit_on_uncaught {
                vm.exit_status = Some(exit_code::UNCAUGHT_EXCEPTION);
            }
            Ok(())
        }
    }
}

fn report_uncaught(vm: &mut VirtualMachine, tid: ThreadId, throwable: HeapRef) {
    let class_name = vm
        .heap
        .get_class_id(throwable)
        .ok()
        .map(|id| {
            vm.interner
                .resolve(&vm.method_area.get_class(&id).name())
                .replace('/', ".")
        })
        .unwrap_or_else(|| "java.lang.Throwable".to_string());
    let mut text = format!(
        "Exception in thread \"{}\" {}",
        vm.thread(tid).name,
        class_name
    );
    if let Some(message) = vm.read_throwable_message(throwable) {
        text.push_str(": ");
        text.push_str(&message);
    }
    text.push('\n');
    if let Some(backtrace) = vm.backtraces.get(&throwable) {
        for entry in backtrace {
            let class = vm.interner.resolve(&entry.class_name).replace('/', ".");
            let method = vm.interner.resolve(&entry.method_name);
            match (entry.file_name, entry.line) {
                (Some(file), Some(line)) => {
                    let file = vm.interner.resolve(&file);
                    text.push_str(&format!("\tat {class}.{method}({file}:{line})\n"));
                }
                _ => text.push_str(&format!("\tat {class}.{method}(Unknown Source)\n")),
            }
        }
    }
    vm.console.write_err(text.as_bytes());
}

/// Normal completion of a thread's bottom frame.
fn retire_thread(vm: &mut VirtualMachine, tid: ThreadId) -> Result<(), VmError> {
    kill_thread(vm, tid)
}

fn kill_thread(vm: &mut VirtualMachine, tid: ThreadId) -> Result<(), VmError> {
    let thread_obj = vm.thread(tid).thread_obj;
    vm.thread_mut(tid).mark_dead();
    {
        let VirtualMachine {
            monitors, threads, ..
        } = vm;
        monitors.purge_thread(threads, tid);
        // Anyone joined on this thread waits on its Thread object.
        monitors.wake_all(threads, thread_obj);
    }
    jdwp::events::report_thread_death(vm, tid)?;
    debug_log!("thread {:?} exited", tid);
    Ok(())
}
