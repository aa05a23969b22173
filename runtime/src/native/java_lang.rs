use crate::error::JavaExceptionKind;
use crate::heap::gc;
use crate::interpreter;
use crate::keys::ThreadId;
use crate::native::{NativeRegistry, NativeRet};
use crate::thread::{PendingException, ThreadStatus};
use crate::vm::{Value, VirtualMachine};
use crate::throw_exception;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub(super) fn register(registry: &mut NativeRegistry) {
    registry.register_str("java/lang/Object", "getClass", "()Ljava/lang/Class;", object_get_class);
    registry.register_str("java/lang/Object", "hashCode", "()I", object_hash_code);
    registry.register_str("java/lang/Object", "wait", "()V", object_wait);
    registry.register_str("java/lang/Object", "wait", "(J)V", object_wait_timed);
    registry.register_str("java/lang/Object", "notify", "()V", object_notify);
    registry.register_str("java/lang/Object", "notifyAll", "()V", object_notify_all);

    registry.register_str("java/lang/Class", "getName", "()Ljava/lang/String;", class_get_name);

    registry.register_str("java/lang/String", "intern", "()Ljava/lang/String;", string_intern);

    registry.register_str(
        "java/lang/System",
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        system_arraycopy,
    );
    registry.register_str("java/lang/System", "currentTimeMillis", "()J", system_current_time_millis);
    registry.register_str("java/lang/System", "gc", "()V", system_gc);
    registry.register_str("java/lang/System", "exit", "(I)V", system_exit);
    registry.register_str("java/lang/System", "freeMemory", "()J", system_free_memory);
    registry.register_str("java/lang/System", "totalMemory", "()J", system_total_memory);

    registry.register_str("java/lang/Thread", "currentThread", "()Ljava/lang/Thread;", thread_current);
    registry.register_str("java/lang/Thread", "start", "()V", thread_start);
    registry.register_str("java/lang/Thread", "yield", "()V", thread_yield);
    registry.register_str("java/lang/Thread", "sleep", "(J)V", thread_sleep);
    registry.register_str("java/lang/Thread", "interrupt", "()V", thread_interrupt);
    registry.register_str("java/lang/Thread", "interrupted", "()Z", thread_interrupted);
    registry.register_str("java/lang/Thread", "isInterrupted", "()Z", thread_is_interrupted);
    registry.register_str("java/lang/Thread", "isAlive", "()Z", thread_is_alive);
    registry.register_str("java/lang/Thread", "setPriority", "(I)V", thread_set_priority);
    registry.register_str("java/lang/Thread", "stop", "()V", thread_stop);

    registry.register_str(
        "java/lang/Throwable",
        "fillInStackTrace",
        "()Ljava/lang/Throwable;",
        throwable_fill_in_stack_trace,
    );
    registry.register_str("java/lang/Throwable", "printStackTrace", "()V", throwable_print_stack_trace);
    registry.register_str(
        "java/lang/Throwable",
        "getStackTrace",
        "()[Ljava/lang/StackTraceElement;",
        throwable_get_stack_trace,
    );
}

// -- java.lang.Object ---------------------------------------------------------

fn object_get_class(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    let class_id = vm.heap.get_class_id(object)?;
    Ok(Some(Value::Ref(vm.mirror(class_id)?)))
}

fn object_hash_code(_vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    // Identity hash: the heap does not move chunks, so the ref is stable.
    Ok(Some(Value::Integer(args[0].as_obj_ref()? as i32)))
}

fn check_interrupted(vm: &mut VirtualMachine, tid: ThreadId) -> Result<(), crate::error::VmError> {
    let thread = vm.thread_mut(tid);
    if thread.interrupted {
        thread.interrupted = false;
        return throw_exception!(InterruptedException);
    }
    Ok(())
}

fn object_wait(vm: &mut VirtualMachine, tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    check_interrupted(vm, tid)?;
    let VirtualMachine {
        monitors, threads, ..
    } = vm;
    monitors.wait(threads, tid, object, None)?;
    Ok(None)
}

fn object_wait_timed(vm: &mut VirtualMachine, tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    let millis = args[1].as_long()?;
    if millis < 0 {
        return throw_exception!(IllegalArgumentException, "timeout value is negative");
    }
    check_interrupted(vm, tid)?;
    let timeout = (millis > 0).then(|| Duration::from_millis(millis as u64));
    let VirtualMachine {
        monitors, threads, ..
    } = vm;
    monitors.wait(threads, tid, object, timeout)?;
    Ok(None)
}

fn object_notify(vm: &mut VirtualMachine, tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    let VirtualMachine {
        monitors, threads, ..
    } = vm;
    monitors.notify(threads, tid, object)?;
    Ok(None)
}

fn object_notify_all(vm: &mut VirtualMachine, tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    let VirtualMachine {
        monitors, threads, ..
    } = vm;
    monitors.notify_all(threads, tid, object)?;
    Ok(None)
}

// -- java.lang.Class ----------------------------------------------------------

fn class_get_name(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let mirror = args[0].as_obj_ref()?;
    let class_id = vm.method_area.get_class_id_by_mirror(mirror)?;
    let name = vm
        .interner
        .resolve(&vm.method_area.get_class(&class_id).name())
        .replace('/', ".");
    Ok(Some(Value::Ref(vm.new_string(&name)?)))
}

// -- java.lang.String ---------------------------------------------------------

fn string_intern(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let string = args[0].as_obj_ref()?;
    let content = vm.heap.read_string(string)?;
    let sym = vm.interner.get_or_intern(content);
    Ok(Some(Value::Ref(vm.intern(sym)?)))
}

// -- java.lang.System ---------------------------------------------------------

fn system_arraycopy(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let src = args[0].as_obj_ref()?;
    let src_pos = args[1].as_int()?;
    let dest = args[2].as_obj_ref()?;
    let dest_pos = args[3].as_int()?;
    let length = args[4].as_int()?;
    vm.heap.copy_array_region(src, src_pos, dest, dest_pos, length)?;
    Ok(None)
}

fn system_current_time_millis(_vm: &mut VirtualMachine, _tid: ThreadId, _args: &[Value]) -> NativeRet {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(Some(Value::Long(millis)))
}

fn system_gc(vm: &mut VirtualMachine, _tid: ThreadId, _args: &[Value]) -> NativeRet {
    gc::collect(vm);
    Ok(None)
}

fn system_exit(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    vm.exit_status = Some(args[0].as_int()?);
    Ok(None)
}

fn system_free_memory(vm: &mut VirtualMachine, _tid: ThreadId, _args: &[Value]) -> NativeRet {
    Ok(Some(Value::Long(vm.heap.free_bytes() as i64)))
}

fn system_total_memory(vm: &mut VirtualMachine, _tid: ThreadId, _args: &[Value]) -> NativeRet {
    Ok(Some(Value::Long(vm.heap.managed_capacity() as i64)))
}

// -- java.lang.Thread ---------------------------------------------------------

fn thread_current(vm: &mut VirtualMachine, tid: ThreadId, _args: &[Value]) -> NativeRet {
    Ok(Some(Value::Ref(vm.thread(tid).thread_obj)))
}

fn thread_start(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    if vm.thread_for_obj(object).is_some() {
        return throw_exception!(IllegalThreadStateException, "thread already started");
    }

    let name = read_thread_name(vm, object)
        .unwrap_or_else(|| format!("Thread-{}", vm.threads.len()));
    let class_id = vm.heap.get_class_id(object)?;
    let run_mk = vm.br.run_mk;
    let run_method = vm.method_area.resolve_virtual_method(class_id, &run_mk)?;

    let new_tid = vm.register_thread(name, object);
    interpreter::push_entry_frame(vm, new_tid, run_method, vec![Value::Ref(object)])?;
    crate::jdwp::events::report_thread_start(vm, new_tid)?;
    Ok(None)
}

fn read_thread_name(vm: &VirtualMachine, object: crate::heap::HeapRef) -> Option<String> {
    let class_id = vm.heap.get_class_id(object).ok()?;
    let offset = vm
        .method_area
        .get_instance_class(&class_id)
        .ok()?
        .get_instance_field(&vm.br.thread_name_fk)
        .ok()?
        .offset;
    match vm
        .heap
        .read_field(object, offset, crate::jtype::AllocationType::Reference)
    {
        Ok(Value::Ref(s)) => vm.heap.read_string(s).ok(),
        _ => None,
    }
}

fn thread_yield(_vm: &mut VirtualMachine, _tid: ThreadId, _args: &[Value]) -> NativeRet {
    // Advisory; quantum expiry rotates runnable threads regardless.
    Ok(None)
}

fn thread_sleep(vm: &mut VirtualMachine, tid: ThreadId, args: &[Value]) -> NativeRet {
    let millis = args[0].as_long()?;
    if millis < 0 {
        return throw_exception!(IllegalArgumentException, "timeout value is negative");
    }
    check_interrupted(vm, tid)?;
    let thread = vm.thread_mut(tid);
    thread.park(ThreadStatus::SLEEPING);
    thread.sleep_deadline = Some(Instant::now() + Duration::from_millis(millis as u64));
    Ok(None)
}

fn thread_interrupt(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    let Some(target) = vm.thread_for_obj(object) else {
        return Ok(None);
    };
    let status = vm.thread(target).status;
    if status.contains(ThreadStatus::WAITING) {
        let VirtualMachine {
            monitors, threads, ..
        } = vm;
        monitors.interrupt_waiter(threads, target);
    } else if status.contains(ThreadStatus::SLEEPING) {
        let thread = vm.thread_mut(target);
        thread.make_runnable();
        thread.arm_exception(JavaExceptionKind::InterruptedException, None);
    } else {
        vm.thread_mut(target).interrupted = true;
    }
    Ok(None)
}

fn thread_interrupted(vm: &mut VirtualMachine, tid: ThreadId, _args: &[Value]) -> NativeRet {
    let thread = vm.thread_mut(tid);
    let was = thread.interrupted;
    thread.interrupted = false;
    Ok(Some(Value::Integer(i32::from(was))))
}

fn thread_is_interrupted(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    let interrupted = vm
        .thread_for_obj(object)
        .map(|t| vm.thread(t).interrupted)
        .unwrap_or(false);
    Ok(Some(Value::Integer(i32::from(interrupted))))
}

fn thread_is_alive(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    let alive = vm
        .thread_for_obj(object)
        .map(|t| vm.thread(t).is_alive())
        .unwrap_or(false);
    Ok(Some(Value::Integer(i32::from(alive))))
}

fn thread_set_priority(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    let priority = args[1].as_int()?;
    if !(1..=10).contains(&priority) {
        return throw_exception!(IllegalArgumentException, "priority out of range");
    }
    if let Some(target) = vm.thread_for_obj(object) {
        vm.thread_mut(target).priority = priority;
    }
    let class_id = vm.heap.get_class_id(object)?;
    let offset = vm
        .method_area
        .get_instance_class(&class_id)?
        .get_instance_field(&vm.br.thread_priority_fk)?
        .offset;
    vm.heap.write_field(
        object,
        offset,
        Value::Integer(priority),
        crate::jtype::AllocationType::Int,
    )?;
    Ok(None)
}

fn thread_stop(vm: &mut VirtualMachine, tid: ThreadId, args: &[Value]) -> NativeRet {
    let object = args[0].as_obj_ref()?;
    let Some(target) = vm.thread_for_obj(object) else {
        return Ok(None);
    };
    let death = vm.create_throwable(tid, JavaExceptionKind::ThreadDeath, None)?;
    let thread = vm.thread_mut(target);
    thread.pending_exception = Some(PendingException::Object(death));
    if thread
        .status
        .intersects(ThreadStatus::SLEEPING | ThreadStatus::WAITING)
    {
        thread.make_runnable();
    }
    Ok(None)
}

// -- java.lang.Throwable ------------------------------------------------------

fn throwable_fill_in_stack_trace(vm: &mut VirtualMachine, tid: ThreadId, args: &[Value]) -> NativeRet {
    let throwable = args[0].as_obj_ref()?;
    let mut backtrace = vm.capture_backtrace(tid);
    // Drop constructor plumbing frames so the trace starts at the throw site.
    let init_sym = vm.br.init_sym;
    let skippable: Vec<bool> = backtrace
        .iter()
        .map(|entry| {
            entry.method_name == init_sym
                && vm
                    .method_area
                    .lookup_class_id(entry.class_name)
                    .map(|id| {
                        vm.br
                            .get_java_lang_throwable_id()
                            .map(|t| vm.method_area.is_assignable_from(t, id))
                            .unwrap_or(false)
                    })
                    .unwrap_or(false)
        })
        .collect();
    let skip = skippable.iter().take_while(|s| **s).count();
    backtrace.drain(..skip);
    vm.backtraces.insert(throwable, backtrace);
    Ok(Some(Value::Ref(throwable)))
}

fn format_backtrace(vm: &VirtualMachine, throwable: crate::heap::HeapRef) -> String {
    let mut text = String::new();
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
    text
}

fn throwable_print_stack_trace(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let throwable = args[0].as_obj_ref()?;
    let class_id = vm.heap.get_class_id(throwable)?;
    let mut text = vm
        .interner
        .resolve(&vm.method_area.get_class(&class_id).name())
        .replace('/', ".");
    if let Some(message) = vm.read_throwable_message(throwable) {
        text.push_str(": ");
        text.push_str(&message);
    }
    text.push('\n');
    text.push_str(&format_backtrace(vm, throwable));
    vm.console.write_err(text.as_bytes());
    Ok(None)
}

/// Lazy materialization of the captured backtrace into
/// StackTraceElement objects.
fn throwable_get_stack_trace(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let throwable = args[0].as_obj_ref()?;
    let entries = vm.backtraces.get(&throwable).cloned().unwrap_or_default();

    let ste_class = vm
        .method_area
        .get_class_id_or_load(vm.br.java_lang_stack_trace_element_sym)?;
    let array_class = vm.array_class_of(ste_class)?;
    let array = vm.new_object_array(array_class, entries.len() as i32)?;
    vm.transient_roots.push(array)?;

    let (dc_offset, mn_offset, fn_offset, ln_offset) = {
        let class = vm.method_area.get_instance_class(&ste_class)?;
        (
            class.get_instance_field(&vm.br.ste_declaring_class_fk)?.offset,
            class.get_instance_field(&vm.br.ste_method_name_fk)?.offset,
            class.get_instance_field(&vm.br.ste_file_name_fk)?.offset,
            class.get_instance_field(&vm.br.ste_line_number_fk)?.offset,
        )
    };

    for (i, entry) in entries.iter().enumerate() {
        let element = vm.new_instance(ste_class)?;
        vm.heap
            .write_array_element(array, i as i32, Value::Ref(element))?;

        let class_name = vm.interner.resolve(&entry.class_name).replace('/', ".");
        let class_string = vm.new_string(&class_name)?;
        vm.heap.write_field(
            element,
            dc_offset,
            Value::Ref(class_string),
            crate::jtype::AllocationType::Reference,
        )?;

        let method_name = vm.interner.resolve(&entry.method_name).to_string();
        let method_string = vm.new_string(&method_name)?;
        vm.heap.write_field(
            element,
            mn_offset,
            Value::Ref(method_string),
            crate::jtype::AllocationType::Reference,
        )?;

        if let Some(file) = entry.file_name {
            let file_name = vm.interner.resolve(&file).to_string();
            let file_string = vm.new_string(&file_name)?;
            vm.heap.write_field(
                element,
                fn_offset,
                Value::Ref(file_string),
                crate::jtype::AllocationType::Reference,
            )?;
        }
        vm.heap.write_field(
            element,
            ln_offset,
            Value::Integer(entry.line.map(i32::from).unwrap_or(-1)),
            crate::jtype::AllocationType::Int,
        )?;
    }
    Ok(Some(Value::Ref(array)))
}
