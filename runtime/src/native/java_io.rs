use crate::jtype::AllocationType;
use crate::keys::ThreadId;
use crate::native::{NativeRegistry, NativeRet};
use crate::vm::{Value, VirtualMachine};

pub(super) fn register(registry: &mut NativeRegistry) {
    registry.register_str("java/io/PrintStream", "print", "(Ljava/lang/String;)V", print_string);
    registry.register_str("java/io/PrintStream", "println", "()V", println_empty);
    registry.register_str(
        "java/io/PrintStream",
        "println",
        "(Ljava/lang/String;)V",
        println_string,
    );
    registry.register_str("java/io/PrintStream", "print", "(I)V", print_int);
    registry.register_str("java/io/PrintStream", "println", "(I)V", println_int);
    registry.register_str("java/io/PrintStream", "println", "(J)V", println_long);
    registry.register_str("java/io/PrintStream", "println", "(Z)V", println_boolean);
    registry.register_str("java/io/PrintStream", "println", "(C)V", println_char);
}

/// Routes on the stream's fd field: 1 is stdout, anything else stderr.
fn write(vm: &mut VirtualMachine, stream: crate::heap::HeapRef, text: &str) -> NativeRet {
    let class_id = vm.heap.get_class_id(stream)?;
    let fd_offset = vm
        .method_area
        .get_instance_class(&class_id)?
        .get_instance_field(&vm.br.print_stream_fd_fk)?
        .offset;
    let fd = vm
        .heap
        .read_field(stream, fd_offset, AllocationType::Int)?
        .as_int()?;
    if fd == 1 {
        vm.console.write_out(text.as_bytes());
    } else {
        vm.console.write_err(text.as_bytes());
    }
    Ok(None)
}

fn string_arg(vm: &VirtualMachine, value: Value) -> Result<String, crate::error::VmError> {
    match value {
        Value::Ref(s) => vm.heap.read_string(s),
        Value::Null => Ok("null".to_string()),
        _ => Err(crate::error::VmError::UnexpectedType("expected a String")),
    }
}

fn print_string(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let stream = args[0].as_obj_ref()?;
    let text = string_arg(vm, args[1])?;
    write(vm, stream, &text)
}

fn println_string(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let stream = args[0].as_obj_ref()?;
    let text = format!("{}\n", string_arg(vm, args[1])?);
    write(vm, stream, &text)
}

fn println_empty(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let stream = args[0].as_obj_ref()?;
    write(vm, stream, "\n")
}

fn print_int(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let stream = args[0].as_obj_ref()?;
    let text = args[1].as_int()?.to_string();
    write(vm, stream, &text)
}

fn println_int(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let stream = args[0].as_obj_ref()?;
    let text = format!("{}\n", args[1].as_int()?);
    write(vm, stream, &text)
}

fn println_long(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let stream = args[0].as_obj_ref()?;
    let text = format!("{}\n", args[1].as_long()?);
    write(vm, stream, &text)
}

fn println_boolean(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let stream = args[0].as_obj_ref()?;
    let text = format!("{}\n", args[1].as_int()? != 0);
    write(vm, stream, &text)
}

fn println_char(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let stream = args[0].as_obj_ref()?;
    let c = char::from_u32(args[1].as_int()? as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
    let text = format!("{c}\n");
    write(vm, stream, &text)
}
