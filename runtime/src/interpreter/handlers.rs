use crate::heap::HeapRef;
use crate::interpreter::opcode::{read_i32, Opcode};
use crate::interpreter::{arg_count, ensure_initialized, invoke_method, pop_args, InitState, StepOutcome};
use crate::jtype::ArrayType;
use crate::keys::{ClassId, MethodId, ThreadId};
use crate::rt::array::ArrayComponent;
use crate::rt::constant_pool::Loadable;
use crate::thread::monitor::EnterOutcome;
use crate::vm::{Value, VirtualMachine};
use crate::{build_exception, throw_exception};

// Every handler leaves the frame in a consistent state and reports how the
// dispatch loop should move pc. Operand-stack shape is trusted to match the
// verified bytecode; mismatches surface as host errors, not Java throwables.

#[inline]
pub(super) fn push_value(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    value: Value,
) -> Result<StepOutcome, crate::error::VmError> {
    vm.thread_mut(tid).cur_frame_mut()?.push(value);
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn set_pc(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    target: usize,
) -> Result<StepOutcome, crate::error::VmError> {
    vm.thread_mut(tid).cur_frame_mut()?.pc = target;
    Ok(StepOutcome::Branched)
}

type R = Result<StepOutcome, crate::error::VmError>;

fn cp_field_ref(
    vm: &VirtualMachine,
    mid: MethodId,
    idx: u16,
) -> Result<(crate::keys::Symbol, crate::keys::FieldKey), crate::error::VmError> {
    let class_id = vm.method_area.get_method(&mid).class_id();
    vm.method_area
        .get_instance_class(&class_id)?
        .cp
        .get_field_ref(idx)
}

fn cp_method_ref(
    vm: &VirtualMachine,
    mid: MethodId,
    idx: u16,
) -> Result<(crate::keys::Symbol, crate::keys::MethodKey), crate::error::VmError> {
    let class_id = vm.method_area.get_method(&mid).class_id();
    let (class_sym, key, _) = vm
        .method_area
        .get_instance_class(&class_id)?
        .cp
        .get_method_ref(idx)?;
    Ok((class_sym, key))
}

/// Class constant resolution through the pool's cache.
pub(super) fn resolve_cp_class(
    vm: &mut VirtualMachine,
    mid: MethodId,
    idx: u16,
) -> Result<ClassId, crate::error::VmError> {
    let (name, cached) = {
        let class_id = vm.method_area.get_method(&mid).class_id();
        let (name, cell) = vm
            .method_area
            .get_instance_class(&class_id)?
            .cp
            .class_entry(idx)?;
        (name, cell.get())
    };
    if let Some(id) = cached {
        return Ok(id);
    }
    let id = vm.method_area.get_class_id_or_load(name)?;
    let class_id = vm.method_area.get_method(&mid).class_id();
    vm.method_area
        .get_instance_class(&class_id)?
        .cp
        .class_entry(idx)?
        .1
        .set(Some(id));
    Ok(id)
}

#[inline]
pub(super) fn handle_ldc(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, idx: u16) -> R {
    enum Out {
        Value(Value),
        InternString(crate::keys::Symbol),
        ClassMirror(crate::keys::Symbol),
    }
    let out = {
        let class_id = vm.method_area.get_method(&mid).class_id();
        let cp = &vm.method_area.get_instance_class(&class_id)?.cp;
        match cp.get_loadable(idx)? {
            Loadable::Integer(v) => Out::Value(Value::Integer(v)),
            Loadable::Float(v) => Out::Value(Value::Float(v)),
            Loadable::Long(v) => Out::Value(Value::Long(v)),
            Loadable::Double(v) => Out::Value(Value::Double(v)),
            Loadable::Str { value, object } => {
                let cached = object.get();
                if cached != crate::heap::NULL_REF {
                    Out::Value(Value::Ref(cached))
                } else {
                    Out::InternString(value)
                }
            }
            Loadable::ClassRef(name) => Out::ClassMirror(name),
        }
    };
    let value = match out {
        Out::Value(v) => v,
        Out::InternString(sym) => {
            let interned = vm.intern(sym)?;
            let class_id = vm.method_area.get_method(&mid).class_id();
            if let Loadable::Str { object, .. } = vm
                .method_area
                .get_instance_class(&class_id)?
                .cp
                .get_loadable(idx)?
            {
                object.set(interned);
            }
            Value::Ref(interned)
        }
        Out::ClassMirror(name) => {
            let class_id = vm.method_area.get_class_id_or_load(name)?;
            Value::Ref(vm.mirror(class_id)?)
        }
    };
    push_value(vm, tid, value)
}

#[inline]
pub(super) fn handle_load(vm: &mut VirtualMachine, tid: ThreadId, slot: u16) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let value = frame.get_local(slot)?;
    frame.push(value);
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_store(vm: &mut VirtualMachine, tid: ThreadId, slot: u16) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let value = frame.pop()?;
    frame.set_local(slot, value)?;
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_array_load(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let (index, array) = {
        let frame = vm.thread_mut(tid).cur_frame_mut()?;
        (frame.pop_int()?, frame.pop_obj()?)
    };
    let value = vm.heap.read_array_element(array, index)?;
    push_value(vm, tid, value)
}

#[inline]
pub(super) fn handle_array_store(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let (value, index, array) = {
        let frame = vm.thread_mut(tid).cur_frame_mut()?;
        (frame.pop()?, frame.pop_int()?, frame.pop_obj()?)
    };
    vm.heap.write_array_element(array, index, value)?;
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_aastore(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let (value, index, array) = {
        let frame = vm.thread_mut(tid).cur_frame_mut()?;
        (frame.pop_nullable()?, frame.pop_int()?, frame.pop_obj()?)
    };
    if let Value::Ref(stored) = value {
        let array_class = vm.heap.get_class_id(array)?;
        let component = match vm.method_area.get_array_class(&array_class)?.component {
            ArrayComponent::Reference(component) => component,
            ArrayComponent::Primitive(_) => {
                return throw_exception!(ArrayStoreException, "primitive array")
            }
        };
        let value_class = vm.heap.get_class_id(stored)?;
        if !vm.method_area.is_assignable_from(component, value_class) {
            return throw_exception!(ArrayStoreException, "incompatible element type");
        }
    }
    vm.heap.write_array_element(array, index, value)?;
    Ok(StepOutcome::Normal)
}

// -- operand-stack shuffles ---------------------------------------------------

#[inline]
pub(super) fn handle_pop(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    vm.thread_mut(tid).cur_frame_mut()?.pop()?;
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_pop2(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let top = frame.pop()?;
    if !top.is_wide() {
        frame.pop()?;
    }
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_dup(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let top = frame.peek()?;
    frame.push(top);
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_dup_x1(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let v1 = frame.pop()?;
    let v2 = frame.pop()?;
    frame.push(v1);
    frame.push(v2);
    frame.push(v1);
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_dup_x2(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let v1 = frame.pop()?;
    let v2 = frame.pop()?;
    if v2.is_wide() {
        frame.push(v1);
        frame.push(v2);
        frame.push(v1);
    } else {
        let v3 = frame.pop()?;
        frame.push(v1);
        frame.push(v3);
        frame.push(v2);
        frame.push(v1);
    }
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_dup2(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let v1 = frame.pop()?;
    if v1.is_wide() {
        frame.push(v1);
        frame.push(v1);
    } else {
        let v2 = frame.pop()?;
        frame.push(v2);
        frame.push(v1);
        frame.push(v2);
        frame.push(v1);
    }
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_dup2_x1(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let v1 = frame.pop()?;
    if v1.is_wide() {
        let v2 = frame.pop()?;
        frame.push(v1);
        frame.push(v2);
        frame.push(v1);
    } else {
        let v2 = frame.pop()?;
        let v3 = frame.pop()?;
        frame.push(v2);
        frame.push(v1);
        frame.push(v3);
        frame.push(v2);
        frame.push(v1);
    }
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_dup2_x2(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let v1 = frame.pop()?;
    if v1.is_wide() {
        let v2 = frame.pop()?;
        if v2.is_wide() {
            frame.push(v1);
            frame.push(v2);
            frame.push(v1);
        } else {
            let v3 = frame.pop()?;
            frame.push(v1);
            frame.push(v3);
            frame.push(v2);
            frame.push(v1);
        }
    } else {
        let v2 = frame.pop()?;
        let v3 = frame.pop()?;
        if v3.is_wide() {
            frame.push(v2);
            frame.push(v1);
            frame.push(v3);
            frame.push(v2);
            frame.push(v1);
        } else {
            let v4 = frame.pop()?;
            frame.push(v2);
            frame.push(v1);
            frame.push(v4);
            frame.push(v3);
            frame.push(v2);
            frame.push(v1);
        }
    }
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_swap(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let v1 = frame.pop()?;
    let v2 = frame.pop()?;
    frame.push(v1);
    frame.push(v2);
    Ok(StepOutcome::Normal)
}

// -- arithmetic ---------------------------------------------------------------

#[inline]
pub(super) fn handle_int_arith(vm: &mut VirtualMachine, tid: ThreadId, op: Opcode) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    if op == Opcode::Ineg {
        let v = frame.pop_int()?;
        frame.push(Value::Integer(v.wrapping_neg()));
        return Ok(StepOutcome::Normal);
    }
    let b = frame.pop_int()?;
    let a = frame.pop_int()?;
    let result = match op {
        Opcode::Iadd => a.wrapping_add(b),
        Opcode::Isub => a.wrapping_sub(b),
        Opcode::Imul => a.wrapping_mul(b),
        Opcode::Idiv => {
            if b == 0 {
                return throw_exception!(ArithmeticException, "/ by zero");
            }
            a.wrapping_div(b)
        }
        Opcode::Irem => {
            if b == 0 {
                return throw_exception!(ArithmeticException, "/ by zero");
            }
            a.wrapping_rem(b)
        }
        Opcode::Ishl => a.wrapping_shl(b as u32 & 0x1f),
        Opcode::Ishr => a.wrapping_shr(b as u32 & 0x1f),
        Opcode::Iushr => ((a as u32) >> (b as u32 & 0x1f)) as i32,
        Opcode::Iand => a & b,
        Opcode::Ior => a | b,
        Opcode::Ixor => a ^ b,
        _ => unreachable!(),
    };
    frame.push(Value::Integer(result));
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_long_arith(vm: &mut VirtualMachine, tid: ThreadId, op: Opcode) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let result = match op {
        Opcode::Lneg => {
            let v = frame.pop_long()?;
            v.wrapping_neg()
        }
        Opcode::Lshl | Opcode::Lshr | Opcode::Lushr => {
            let shift = frame.pop_int()? as u32 & 0x3f;
            let v = frame.pop_long()?;
            match op {
                Opcode::Lshl => v.wrapping_shl(shift),
                Opcode::Lshr => v.wrapping_shr(shift),
                _ => ((v as u64) >> shift) as i64,
            }
        }
        _ => {
            let b = frame.pop_long()?;
            let a = frame.pop_long()?;
            match op {
                Opcode::Ladd => a.wrapping_add(b),
                Opcode::Lsub => a.wrapping_sub(b),
                Opcode::Lmul => a.wrapping_mul(b),
                Opcode::Ldiv => {
                    if b == 0 {
                        return throw_exception!(ArithmeticException, "/ by zero");
                    }
                    a.wrapping_div(b)
                }
                Opcode::Lrem => {
                    if b == 0 {
                        return throw_exception!(ArithmeticException, "/ by zero");
                    }
                    a.wrapping_rem(b)
                }
                Opcode::Land => a & b,
                Opcode::Lor => a | b,
                Opcode::Lxor => a ^ b,
                _ => unreachable!(),
            }
        }
    };
    frame.push(Value::Long(result));
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_float_arith(vm: &mut VirtualMachine, tid: ThreadId, op: Opcode) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let result = if op == Opcode::Fneg {
        -frame.pop_float()?
    } else {
        let b = frame.pop_float()?;
        let a = frame.pop_float()?;
        match op {
            Opcode::Fadd => a + b,
            Opcode::Fsub => a - b,
            Opcode::Fmul => a * b,
            Opcode::Fdiv => a / b,
            Opcode::Frem => a % b,
            _ => unreachable!(),
        }
    };
    frame.push(Value::Float(result));
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_double_arith(vm: &mut VirtualMachine, tid: ThreadId, op: Opcode) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let result = if op == Opcode::Dneg {
        -frame.pop_double()?
    } else {
        let b = frame.pop_double()?;
        let a = frame.pop_double()?;
        match op {
            Opcode::Dadd => a + b,
            Opcode::Dsub => a - b,
            Opcode::Dmul => a * b,
            Opcode::Ddiv => a / b,
            Opcode::Drem => a % b,
            _ => unreachable!(),
        }
    };
    frame.push(Value::Double(result));
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_iinc(vm: &mut VirtualMachine, tid: ThreadId, slot: u16, delta: i32) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let value = frame.get_local(slot)?.as_int()?;
    frame.set_local(slot, Value::Integer(value.wrapping_add(delta)))?;
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_convert(vm: &mut VirtualMachine, tid: ThreadId, op: Opcode) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let result = match op {
        Opcode::I2l => Value::Long(frame.pop_int()? as i64),
        Opcode::I2f => Value::Float(frame.pop_int()? as f32),
        Opcode::I2d => Value::Double(frame.pop_int()? as f64),
        Opcode::L2i => Value::Integer(frame.pop_long()? as i32),
        Opcode::L2f => Value::Float(frame.pop_long()? as f32),
        Opcode::L2d => Value::Double(frame.pop_long()? as f64),
        Opcode::F2i => Value::Integer(frame.pop_float()? as i32),
        Opcode::F2l => Value::Long(frame.pop_float()? as i64),
        Opcode::F2d => Value::Double(frame.pop_float()? as f64),
        Opcode::D2i => Value::Integer(frame.pop_double()? as i32),
        Opcode::D2l => Value::Long(frame.pop_double()? as i64),
        Opcode::D2f => Value::Float(frame.pop_double()? as f32),
        Opcode::I2b => Value::Integer(frame.pop_int()? as i8 as i32),
        Opcode::I2c => Value::Integer(frame.pop_int()? as u16 as i32),
        Opcode::I2s => Value::Integer(frame.pop_int()? as i16 as i32),
        _ => unreachable!(),
    };
    frame.push(result);
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_compare(vm: &mut VirtualMachine, tid: ThreadId, op: Opcode) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let result = match op {
        Opcode::Lcmp => {
            let b = frame.pop_long()?;
            let a = frame.pop_long()?;
            match a.cmp(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }
        }
        Opcode::Fcmpl | Opcode::Fcmpg => {
            let b = frame.pop_float()?;
            let a = frame.pop_float()?;
            match a.partial_cmp(&b) {
                Some(std::cmp::Ordering::Less) => -1,
                Some(std::cmp::Ordering::Equal) => 0,
                Some(std::cmp::Ordering::Greater) => 1,
                None => {
                    if op == Opcode::Fcmpl {
                        -1
                    } else {
                        1
                    }
                }
            }
        }
        Opcode::Dcmpl | Opcode::Dcmpg => {
            let b = frame.pop_double()?;
            let a = frame.pop_double()?;
            match a.partial_cmp(&b) {
                Some(std::cmp::Ordering::Less) => -1,
                Some(std::cmp::Ordering::Equal) => 0,
                Some(std::cmp::Ordering::Greater) => 1,
                None => {
                    if op == Opcode::Dcmpl {
                        -1
                    } else {
                        1
                    }
                }
            }
        }
        _ => unreachable!(),
    };
    frame.push(Value::Integer(result));
    Ok(StepOutcome::Normal)
}

// -- branches -----------------------------------------------------------------

fn branch(vm: &mut VirtualMachine, tid: ThreadId, take: bool, pc: usize, offset: i16) -> R {
    if take {
        set_pc(vm, tid, (pc as isize + offset as isize) as usize)
    } else {
        Ok(StepOutcome::Normal)
    }
}

#[inline]
pub(super) fn handle_if_zero(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    op: Opcode,
    pc: usize,
    offset: i16,
) -> R {
    let v = vm.thread_mut(tid).cur_frame_mut()?.pop_int()?;
    let take = match op {
        Opcode::Ifeq => v == 0,
        Opcode::Ifne => v != 0,
        Opcode::Iflt => v < 0,
        Opcode::Ifge => v >= 0,
        Opcode::Ifgt => v > 0,
        Opcode::Ifle => v <= 0,
        _ => unreachable!(),
    };
    branch(vm, tid, take, pc, offset)
}

#[inline]
pub(super) fn handle_if_icmp(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    op: Opcode,
    pc: usize,
    offset: i16,
) -> R {
    let (b, a) = {
        let frame = vm.thread_mut(tid).cur_frame_mut()?;
        (frame.pop_int()?, frame.pop_int()?)
    };
    let take = match op {
        Opcode::IfIcmpeq => a == b,
        Opcode::IfIcmpne => a != b,
        Opcode::IfIcmplt => a < b,
        Opcode::IfIcmpge => a >= b,
        Opcode::IfIcmpgt => a > b,
        Opcode::IfIcmple => a <= b,
        _ => unreachable!(),
    };
    branch(vm, tid, take, pc, offset)
}

#[inline]
pub(super) fn handle_if_acmp(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    op: Opcode,
    pc: usize,
    offset: i16,
) -> R {
    let (b, a) = {
        let frame = vm.thread_mut(tid).cur_frame_mut()?;
        (frame.pop_nullable()?, frame.pop_nullable()?)
    };
    let same = a == b;
    let take = match op {
        Opcode::IfAcmpeq => same,
        Opcode::IfAcmpne => !same,
        _ => unreachable!(),
    };
    branch(vm, tid, take, pc, offset)
}

#[inline]
pub(super) fn handle_if_null(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    op: Opcode,
    pc: usize,
    offset: i16,
) -> R {
    let v = vm.thread_mut(tid).cur_frame_mut()?.pop_nullable()?;
    let is_null = v == Value::Null;
    let take = match op {
        Opcode::Ifnull => is_null,
        Opcode::Ifnonnull => !is_null,
        _ => unreachable!(),
    };
    branch(vm, tid, take, pc, offset)
}

#[inline]
pub(super) fn handle_jsr(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    pc: usize,
    offset: i32,
    length: usize,
) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    frame.push(Value::Integer((pc + length) as i32));
    frame.pc = (pc as isize + offset as isize) as usize;
    Ok(StepOutcome::Branched)
}

#[inline]
pub(super) fn handle_ret(vm: &mut VirtualMachine, tid: ThreadId, slot: u16) -> R {
    let frame = vm.thread_mut(tid).cur_frame_mut()?;
    let target = frame.get_local(slot)?.as_int()?;
    frame.pc = target as usize;
    Ok(StepOutcome::Branched)
}

#[inline]
pub(super) fn handle_tableswitch(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    mid: MethodId,
    pc: usize,
) -> R {
    let index = vm.thread_mut(tid).cur_frame_mut()?.pop_int()?;
    let target = {
        let code = vm.method_area.get_method(&mid).code()?;
        let base = (pc + 4) & !3;
        let default = read_i32(code, base);
        let low = read_i32(code, base + 4);
        let high = read_i32(code, base + 8);
        let offset = if index < low || index > high {
            default
        } else {
            read_i32(code, base + 12 + ((index - low) as usize) * 4)
        };
        (pc as isize + offset as isize) as usize
    };
    set_pc(vm, tid, target)
}

#[inline]
pub(super) fn handle_lookupswitch(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    mid: MethodId,
    pc: usize,
) -> R {
    let key = vm.thread_mut(tid).cur_frame_mut()?.pop_int()?;
    let target = {
        let code = vm.method_area.get_method(&mid).code()?;
        let base = (pc + 4) & !3;
        let default = read_i32(code, base);
        let npairs = read_i32(code, base + 4);
        let mut offset = default;
        for pair in 0..npairs as usize {
            let match_key = read_i32(code, base + 8 + pair * 8);
            if match_key == key {
                offset = read_i32(code, base + 12 + pair * 8);
                break;
            }
        }
        (pc as isize + offset as isize) as usize
    };
    set_pc(vm, tid, target)
}

// -- field access -------------------------------------------------------------

#[inline]
pub(super) fn handle_getstatic(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, idx: u16) -> R {
    let (class_sym, key) = cp_field_ref(vm, mid, idx)?;
    let class_id = vm.method_area.get_class_id_or_load(class_sym)?;
    match ensure_initialized(vm, tid, class_id)? {
        InitState::Pushed => return Ok(StepOutcome::FramePushed),
        InitState::Busy => return Ok(StepOutcome::Yield),
        InitState::Ready => {}
    }
    let value = vm
        .method_area
        .resolve_static_field(class_id, &key)?
        .value
        .get();
    push_value(vm, tid, value)
}

#[inline]
pub(super) fn handle_putstatic(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, idx: u16) -> R {
    let (class_sym, key) = cp_field_ref(vm, mid, idx)?;
    let class_id = vm.method_area.get_class_id_or_load(class_sym)?;
    match ensure_initialized(vm, tid, class_id)? {
        InitState::Pushed => return Ok(StepOutcome::FramePushed),
        InitState::Busy => return Ok(StepOutcome::Yield),
        InitState::Ready => {}
    }
    let value = vm.thread_mut(tid).cur_frame_mut()?.pop()?;
    vm.method_area
        .resolve_static_field(class_id, &key)?
        .value
        .set(value);
    Ok(StepOutcome::Normal)
}

fn instance_field_slot(
    vm: &VirtualMachine,
    object: HeapRef,
    key: &crate::keys::FieldKey,
) -> Result<(usize, crate::jtype::AllocationType), crate::error::VmError> {
    let class_id = vm.heap.get_class_id(object)?;
    let class = vm.method_area.get_instance_class(&class_id)?;
    let field = class.get_instance_field(key)?;
    let kind = vm
        .method_area
        .get_field_descriptor(&field.descriptor_id)
        .as_allocation_type();
    Ok((field.offset, kind))
}

#[inline]
pub(super) fn handle_getfield(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, idx: u16) -> R {
    let (_, key) = cp_field_ref(vm, mid, idx)?;
    let object = vm.thread_mut(tid).cur_frame_mut()?.pop_obj()?;
    let (offset, kind) = instance_field_slot(vm, object, &key)?;
    let value = vm.heap.read_field(object, offset, kind)?;
    push_value(vm, tid, value)
}

#[inline]
pub(super) fn handle_putfield(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, idx: u16) -> R {
    let (_, key) = cp_field_ref(vm, mid, idx)?;
    let (value, object) = {
        let frame = vm.thread_mut(tid).cur_frame_mut()?;
        (frame.pop()?, frame.pop_obj()?)
    };
    let (offset, kind) = instance_field_slot(vm, object, &key)?;
    vm.heap.write_field(object, offset, value, kind)?;
    Ok(StepOutcome::Normal)
}

// -- invocation ---------------------------------------------------------------

#[inline]
pub(super) fn handle_invokevirtual(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    mid: MethodId,
    idx: u16,
) -> R {
    let (_, key) = cp_method_ref(vm, mid, idx)?;
    let argc = arg_count(vm, key.desc, false)?;
    let args = pop_args(vm, tid, argc)?;
    let receiver = args[0].as_obj_ref()?;
    let receiver_class = vm.heap.get_class_id(receiver)?;
    let method_id = vm.method_area.resolve_virtual_method(receiver_class, &key)?;
    invoke_method(vm, tid, method_id, &args, 3)
}

#[inline]
pub(super) fn handle_invokespecial(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    mid: MethodId,
    idx: u16,
) -> R {
    let (class_sym, key) = cp_method_ref(vm, mid, idx)?;
    let class_id = vm.method_area.get_class_id_or_load(class_sym)?;
    let argc = arg_count(vm, key.desc, false)?;
    let args = pop_args(vm, tid, argc)?;
    args[0].as_obj_ref()?;
    let method_id = vm.method_area.resolve_direct_method(class_id, &key)?;
    invoke_method(vm, tid, method_id, &args, 3)
}

#[inline]
pub(super) fn handle_invokestatic(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    mid: MethodId,
    idx: u16,
) -> R {
    let (class_sym, key) = cp_method_ref(vm, mid, idx)?;
    let class_id = vm.method_area.get_class_id_or_load(class_sym)?;
    match ensure_initialized(vm, tid, class_id)? {
        InitState::Pushed => return Ok(StepOutcome::FramePushed),
        InitState::Busy => return Ok(StepOutcome::Yield),
        InitState::Ready => {}
    }
    let method_id = vm.method_area.resolve_direct_method(class_id, &key)?;
    let argc = arg_count(vm, key.desc, true)?;
    let args = pop_args(vm, tid, argc)?;
    invoke_method(vm, tid, method_id, &args, 3)
}

#[inline]
pub(super) fn handle_invokeinterface(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    mid: MethodId,
    idx: u16,
) -> R {
    let (_, key) = cp_method_ref(vm, mid, idx)?;
    let argc = arg_count(vm, key.desc, false)?;
    let args = pop_args(vm, tid, argc)?;
    let receiver = args[0].as_obj_ref()?;
    let receiver_class = vm.heap.get_class_id(receiver)?;
    let method_id = vm
        .method_area
        .resolve_interface_method(receiver_class, &key)?;
    invoke_method(vm, tid, method_id, &args, 5)
}

// -- allocation ---------------------------------------------------------------

#[inline]
pub(super) fn handle_new(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, idx: u16) -> R {
    let class_id = resolve_cp_class(vm, mid, idx)?;
    {
        let class = vm.method_area.get_class(&class_id);
        if class.is_interface() || class.get_raw_flags() & 0x0400 != 0 {
            return Err(build_exception!(
                IncompatibleClassChangeError,
                "instantiating an abstract type"
            ));
        }
    }
    match ensure_initialized(vm, tid, class_id)? {
        InitState::Pushed => return Ok(StepOutcome::FramePushed),
        InitState::Busy => return Ok(StepOutcome::Yield),
        InitState::Ready => {}
    }
    let object = vm.new_instance(class_id)?;
    push_value(vm, tid, Value::Ref(object))
}

#[inline]
pub(super) fn handle_newarray(vm: &mut VirtualMachine, tid: ThreadId, atype: u8) -> R {
    let length = vm.thread_mut(tid).cur_frame_mut()?.pop_int()?;
    let element = ArrayType::try_from(atype)
        .map_err(|_| crate::error::VmError::ClassFormat(format!("bad newarray type {atype}")))?;
    let array = vm.new_primitive_array(element.as_primitive(), length)?;
    push_value(vm, tid, Value::Ref(array))
}

#[inline]
pub(super) fn handle_anewarray(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, idx: u16) -> R {
    let length = vm.thread_mut(tid).cur_frame_mut()?.pop_int()?;
    let component = resolve_cp_class(vm, mid, idx)?;
    let array_class = vm.array_class_of(component)?;
    let array = vm.new_object_array(array_class, length)?;
    push_value(vm, tid, Value::Ref(array))
}

fn build_multi_array(
    vm: &mut VirtualMachine,
    class_id: ClassId,
    counts: &[i32],
) -> Result<HeapRef, crate::error::VmError> {
    let length = counts[0];
    let component = vm.method_area.get_array_class(&class_id)?.component;
    let array = match component {
        ArrayComponent::Primitive(p) => vm.new_primitive_array(p, length)?,
        ArrayComponent::Reference(_) => vm.new_object_array(class_id, length)?,
    };
    if counts.len() > 1 {
        let mark = vm.transient_roots.mark();
        vm.transient_roots.push(array)?;
        if let ArrayComponent::Reference(sub) = component {
            for i in 0..length {
                let element = build_multi_array(vm, sub, &counts[1..])?;
                vm.heap.write_array_element(array, i, Value::Ref(element))?;
            }
        }
        vm.transient_roots.release_to(mark);
    }
    Ok(array)
}

#[inline]
pub(super) fn handle_multianewarray(
    vm: &mut VirtualMachine,
    tid: ThreadId,
    mid: MethodId,
    idx: u16,
    dims: u8,
) -> R {
    let class_id = resolve_cp_class(vm, mid, idx)?;
    let mut counts = vec![0i32; dims as usize];
    {
        let frame = vm.thread_mut(tid).cur_frame_mut()?;
        for slot in counts.iter_mut().rev() {
            *slot = frame.pop_int()?;
        }
    }
    for count in &counts {
        if *count < 0 {
            return throw_exception!(NegativeArraySizeException, "{}", count);
        }
    }
    let array = build_multi_array(vm, class_id, &counts)?;
    push_value(vm, tid, Value::Ref(array))
}

#[inline]
pub(super) fn handle_arraylength(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let array = vm.thread_mut(tid).cur_frame_mut()?.pop_obj()?;
    let length = vm.heap.get_array_length(array)?;
    push_value(vm, tid, Value::Integer(length))
}

// -- exceptions & type tests --------------------------------------------------

#[inline]
pub(super) fn handle_athrow(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let value = vm.thread_mut(tid).cur_frame_mut()?.pop_nullable()?;
    match value {
        Value::Ref(throwable) => Err(crate::error::VmError::JavaExceptionThrown(throwable)),
        _ => throw_exception!(NullPointerException),
    }
}

#[inline]
pub(super) fn handle_checkcast(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, idx: u16) -> R {
    let value = vm.thread(tid).cur_frame()?.peek()?;
    let target = resolve_cp_class(vm, mid, idx)?;
    if let Value::Ref(object) = value {
        let source = vm.heap.get_class_id(object)?;
        if !vm.method_area.is_assignable_from(target, source) {
            let name = vm
                .interner
                .resolve(&vm.method_area.get_class(&source).name())
                .replace('/', ".");
            return throw_exception!(ClassCastException, "{}", name);
        }
    }
    Ok(StepOutcome::Normal)
}

#[inline]
pub(super) fn handle_instanceof(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, idx: u16) -> R {
    let value = vm.thread_mut(tid).cur_frame_mut()?.pop_nullable()?;
    let target = resolve_cp_class(vm, mid, idx)?;
    let result = match value {
        Value::Ref(object) => {
            let source = vm.heap.get_class_id(object)?;
            i32::from(vm.method_area.is_assignable_from(target, source))
        }
        _ => 0,
    };
    push_value(vm, tid, Value::Integer(result))
}

// -- monitors -----------------------------------------------------------------

#[inline]
pub(super) fn handle_monitorenter(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let object = vm.thread_mut(tid).cur_frame_mut()?.pop_obj()?;
    let VirtualMachine {
        monitors, threads, ..
    } = vm;
    match monitors.enter(threads, tid, object) {
        EnterOutcome::Entered => Ok(StepOutcome::Normal),
        EnterOutcome::Blocked => {
            // Ownership transfers on release; resume after this instruction.
            vm.thread_mut(tid).cur_frame_mut()?.pc += 1;
            Ok(StepOutcome::Parked)
        }
    }
}

#[inline]
pub(super) fn handle_monitorexit(vm: &mut VirtualMachine, tid: ThreadId) -> R {
    let object = vm.thread_mut(tid).cur_frame_mut()?.pop_obj()?;
    let VirtualMachine {
        monitors, threads, ..
    } = vm;
    monitors.exit(threads, tid, object)?;
    Ok(StepOutcome::Normal)
}

// -- wide ---------------------------------------------------------------------

#[inline]
pub(super) fn handle_wide(vm: &mut VirtualMachine, tid: ThreadId, mid: MethodId, pc: usize) -> R {
    let (sub, slot) = {
        let code = vm.method_area.get_method(&mid).code()?;
        (code[pc + 1], crate::interpreter::opcode::read_u16(code, pc + 2))
    };
    let sub_op = Opcode::try_from(sub)
        .map_err(|_| crate::error::VmError::Internal(format!("bad wide target 0x{sub:02x}")))?;
    match sub_op {
        Opcode::Iload | Opcode::Lload | Opcode::Fload | Opcode::Dload | Opcode::Aload => {
            handle_load(vm, tid, slot)?;
        }
        Opcode::Istore | Opcode::Lstore | Opcode::Fstore | Opcode::Dstore | Opcode::Astore => {
            handle_store(vm, tid, slot)?;
        }
        Opcode::Iinc => {
            let delta = {
                let code = vm.method_area.get_method(&mid).code()?;
                crate::interpreter::opcode::read_i16(code, pc + 4) as i32
            };
            handle_iinc(vm, tid, slot, delta)?;
        }
        Opcode::Ret => return handle_ret(vm, tid, slot),
        _ => {
            return Err(crate::error::VmError::Internal(format!(
                "wide does not modify {sub_op:?}"
            )))
        }
    }
    Ok(StepOutcome::Normal)
}
