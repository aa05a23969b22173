use crate::class_loader::ClassProvider;
use crate::classfile::builder::{Assembler, ClassBuilder};
use crate::classfile::{ClassFile, ClassFlags, CodeAttribute, FieldFlags, MethodFlags};
use crate::error::VmError;
use crate::interpreter::opcode::Opcode as Op;

/// The embedded core library, synthesized in memory: enough of java.lang,
/// java.io and java.lang.ref for the runtime to bootstrap, throw, print,
/// thread and weakly reference, with bytecode bodies bridging to natives.
pub struct BootClassProvider;

impl BootClassProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BootClassProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassProvider for BootClassProvider {
    fn find_class(&self, name: &str) -> Result<Option<ClassFile>, VmError> {
        Ok(build_boot_class(name))
    }
}

const PUBLIC: MethodFlags = MethodFlags::PUBLIC;

fn returns_void() -> CodeAttribute {
    let mut a = Assembler::new();
    a.op(Op::Return as u8);
    a.finish(0, 1)
}

/// `<init>` that only chains to the superclass default constructor.
fn chained_ctor(b: &mut ClassBuilder, super_name: &str) -> CodeAttribute {
    let super_init = b.method_ref(super_name, "<init>", "()V");
    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Invokespecial as u8, super_init)
        .op(Op::Return as u8);
    a.finish(1, 1)
}

/// `<init>(String)` that chains to the superclass message constructor.
fn chained_message_ctor(b: &mut ClassBuilder, super_name: &str) -> CodeAttribute {
    let super_init = b.method_ref(super_name, "<init>", "(Ljava/lang/String;)V");
    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Invokespecial as u8, super_init)
        .op(Op::Return as u8);
    a.finish(2, 2)
}

/// Standard throwable subclass: two delegating constructors, nothing else.
fn throwable_subclass(name: &str, super_name: &str) -> ClassFile {
    let mut b = ClassBuilder::new(name, Some(super_name));
    let ctor = chained_ctor(&mut b, super_name);
    b.method("<init>", "()V", PUBLIC, ctor);
    let message_ctor = chained_message_ctor(&mut b, super_name);
    b.method("<init>", "(Ljava/lang/String;)V", PUBLIC, message_ctor);
    b.finish()
}

fn java_lang_object() -> ClassFile {
    let mut b = ClassBuilder::new("java/lang/Object", None);
    b.method("<init>", "()V", PUBLIC, returns_void());

    // equals is identity at the root.
    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op(Op::Aload1 as u8)
        .op_branch(Op::IfAcmpeq as u8, 7)
        .op(Op::Iconst0 as u8)
        .op(Op::Ireturn as u8)
        .op(Op::Iconst1 as u8)
        .op(Op::Ireturn as u8);
    b.method("equals", "(Ljava/lang/Object;)Z", PUBLIC, a.finish(2, 2));

    b.native_method("getClass", "()Ljava/lang/Class;", PUBLIC | MethodFlags::FINAL);
    b.native_method("hashCode", "()I", PUBLIC);
    b.native_method("wait", "()V", PUBLIC | MethodFlags::FINAL);
    b.native_method("wait", "(J)V", PUBLIC | MethodFlags::FINAL);
    b.native_method("notify", "()V", PUBLIC | MethodFlags::FINAL);
    b.native_method("notifyAll", "()V", PUBLIC | MethodFlags::FINAL);
    b.finish()
}

fn java_lang_class() -> ClassFile {
    let mut b = ClassBuilder::new("java/lang/Class", Some("java/lang/Object"));
    b.native_method("getName", "()Ljava/lang/String;", PUBLIC);
    b.finish()
}

fn java_lang_string() -> ClassFile {
    let mut b = ClassBuilder::new("java/lang/String", Some("java/lang/Object"));
    b.field("value", "[C", FieldFlags::PRIVATE | FieldFlags::FINAL);

    let value_ref = b.field_ref("java/lang/String", "value", "[C");
    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Getfield as u8, value_ref)
        .op(Op::Arraylength as u8)
        .op(Op::Ireturn as u8);
    b.method("length", "()I", PUBLIC, a.finish(1, 1));

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Getfield as u8, value_ref)
        .op(Op::Iload1 as u8)
        .op(Op::Caload as u8)
        .op(Op::Ireturn as u8);
    b.method("charAt", "(I)C", PUBLIC, a.finish(2, 2));

    b.native_method("intern", "()Ljava/lang/String;", PUBLIC);
    b.finish()
}

fn java_lang_runnable() -> ClassFile {
    let mut b = ClassBuilder::new("java/lang/Runnable", Some("java/lang/Object"));
    b.flags(ClassFlags::PUBLIC | ClassFlags::INTERFACE | ClassFlags::ABSTRACT);
    b.abstract_method("run", "()V", PUBLIC);
    b.finish()
}

fn java_lang_thread() -> ClassFile {
    let mut b = ClassBuilder::new("java/lang/Thread", Some("java/lang/Object"));
    b.field("target", "Ljava/lang/Runnable;", FieldFlags::PRIVATE);
    b.field("name", "Ljava/lang/String;", FieldFlags::PRIVATE);
    b.field("priority", "I", FieldFlags::PRIVATE);

    let ctor = chained_ctor(&mut b, "java/lang/Object");
    b.method("<init>", "()V", PUBLIC, ctor);

    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    let target_ref = b.field_ref("java/lang/Thread", "target", "Ljava/lang/Runnable;");
    let name_ref = b.field_ref("java/lang/Thread", "name", "Ljava/lang/String;");

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Invokespecial as u8, object_init)
        .op(Op::Aload0 as u8)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Putfield as u8, target_ref)
        .op(Op::Return as u8);
    b.method("<init>", "(Ljava/lang/Runnable;)V", PUBLIC, a.finish(2, 2));

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Invokespecial as u8, object_init)
        .op(Op::Aload0 as u8)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Putfield as u8, target_ref)
        .op(Op::Aload0 as u8)
        .op(Op::Aload2 as u8)
        .op_u16(Op::Putfield as u8, name_ref)
        .op(Op::Return as u8);
    b.method(
        "<init>",
        "(Ljava/lang/Runnable;Ljava/lang/String;)V",
        PUBLIC,
        a.finish(2, 3),
    );

    // run() delegates to the target when one was supplied.
    let runnable_run = b.interface_method_ref("java/lang/Runnable", "run", "()V");
    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8) // 0
        .op_u16(Op::Getfield as u8, target_ref) // 1
        .op(Op::Dup as u8) // 4
        .op_branch(Op::Ifnull as u8, 13) // 5
        .raw(Op::Invokeinterface as u8) // 8
        .raw((runnable_run >> 8) as u8)
        .raw(runnable_run as u8)
        .raw(1)
        .raw(0)
        .op(Op::Return as u8); // 13
    b.method("run", "()V", PUBLIC, a.finish(2, 1));

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Getfield as u8, name_ref)
        .op(Op::Areturn as u8);
    b.method("getName", "()Ljava/lang/String;", PUBLIC, a.finish(1, 1));

    // join(): synchronized wait-until-dead on this thread's monitor.
    let is_alive = b.method_ref("java/lang/Thread", "isAlive", "()Z");
    let wait = b.method_ref("java/lang/Thread", "wait", "()V");
    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8) // 0
        .op_u16(Op::Invokevirtual as u8, is_alive) // 1
        .op_branch(Op::Ifeq as u8, 14) // 4
        .op(Op::Aload0 as u8) // 7
        .op_u16(Op::Invokevirtual as u8, wait) // 8
        .op_branch(Op::Goto as u8, 0) // 11
        .op(Op::Return as u8); // 14
    b.method("join", "()V", PUBLIC | MethodFlags::SYNCHRONIZED, a.finish(1, 1));

    b.native_method("start", "()V", PUBLIC);
    b.native_method("sleep", "(J)V", PUBLIC | MethodFlags::STATIC);
    b.native_method("yield", "()V", PUBLIC | MethodFlags::STATIC);
    b.native_method(
        "currentThread",
        "()Ljava/lang/Thread;",
        PUBLIC | MethodFlags::STATIC,
    );
    b.native_method("interrupt", "()V", PUBLIC);
    b.native_method("interrupted", "()Z", PUBLIC | MethodFlags::STATIC);
    b.native_method("isInterrupted", "()Z", PUBLIC);
    b.native_method("isAlive", "()Z", PUBLIC | MethodFlags::FINAL);
    b.native_method("setPriority", "(I)V", PUBLIC);
    b.native_method("stop", "()V", PUBLIC);
    b.finish()
}

fn java_lang_system() -> ClassFile {
    let mut b = ClassBuilder::new("java/lang/System", Some("java/lang/Object"));
    b.field(
        "out",
        "Ljava/io/PrintStream;",
        FieldFlags::PUBLIC | FieldFlags::STATIC | FieldFlags::FINAL,
    );
    b.field(
        "err",
        "Ljava/io/PrintStream;",
        FieldFlags::PUBLIC | FieldFlags::STATIC | FieldFlags::FINAL,
    );
    b.native_method(
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        PUBLIC | MethodFlags::STATIC,
    );
    b.native_method("currentTimeMillis", "()J", PUBLIC | MethodFlags::STATIC);
    b.native_method("gc", "()V", PUBLIC | MethodFlags::STATIC);
    b.native_method("exit", "(I)V", PUBLIC | MethodFlags::STATIC);
    b.native_method("freeMemory", "()J", PUBLIC | MethodFlags::STATIC);
    b.native_method("totalMemory", "()J", PUBLIC | MethodFlags::STATIC);
    b.finish()
}

fn java_io_print_stream() -> ClassFile {
    let mut b = ClassBuilder::new("java/io/PrintStream", Some("java/lang/Object"));
    b.field("fd", "I", FieldFlags::PRIVATE | FieldFlags::FINAL);
    let ctor = chained_ctor(&mut b, "java/lang/Object");
    b.method("<init>", "()V", PUBLIC, ctor);
    b.native_method("print", "(Ljava/lang/String;)V", PUBLIC);
    b.native_method("print", "(I)V", PUBLIC);
    b.native_method("println", "()V", PUBLIC);
    b.native_method("println", "(Ljava/lang/String;)V", PUBLIC);
    b.native_method("println", "(I)V", PUBLIC);
    b.native_method("println", "(J)V", PUBLIC);
    b.native_method("println", "(Z)V", PUBLIC);
    b.native_method("println", "(C)V", PUBLIC);
    b.finish()
}

fn java_lang_throwable() -> ClassFile {
    let mut b = ClassBuilder::new("java/lang/Throwable", Some("java/lang/Object"));
    b.field("message", "Ljava/lang/String;", FieldFlags::PRIVATE);

    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    let fill_in = b.method_ref(
        "java/lang/Throwable",
        "fillInStackTrace",
        "()Ljava/lang/Throwable;",
    );
    let message_ref = b.field_ref("java/lang/Throwable", "message", "Ljava/lang/String;");

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Invokespecial as u8, object_init)
        .op(Op::Aload0 as u8)
        .op_u16(Op::Invokevirtual as u8, fill_in)
        .op(Op::Pop as u8)
        .op(Op::Return as u8);
    b.method("<init>", "()V", PUBLIC, a.finish(1, 1));

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Invokespecial as u8, object_init)
        .op(Op::Aload0 as u8)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Putfield as u8, message_ref)
        .op(Op::Aload0 as u8)
        .op_u16(Op::Invokevirtual as u8, fill_in)
        .op(Op::Pop as u8)
        .op(Op::Return as u8);
    b.method("<init>", "(Ljava/lang/String;)V", PUBLIC, a.finish(2, 2));

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Getfield as u8, message_ref)
        .op(Op::Areturn as u8);
    b.method("getMessage", "()Ljava/lang/String;", PUBLIC, a.finish(1, 1));

    b.native_method("fillInStackTrace", "()Ljava/lang/Throwable;", PUBLIC);
    b.native_method("printStackTrace", "()V", PUBLIC);
    b.native_method(
        "getStackTrace",
        "()[Ljava/lang/StackTraceElement;",
        PUBLIC,
    );
    b.finish()
}

fn java_lang_ref_reference() -> ClassFile {
    let mut b = ClassBuilder::new("java/lang/ref/Reference", Some("java/lang/Object"));
    b.field("referent", "Ljava/lang/Object;", FieldFlags::PRIVATE);
    b.field(
        "queue",
        "Ljava/lang/ref/ReferenceQueue;",
        FieldFlags::PRIVATE,
    );
    b.field("next", "Ljava/lang/ref/Reference;", FieldFlags::PRIVATE);

    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    let referent_ref = b.field_ref("java/lang/ref/Reference", "referent", "Ljava/lang/Object;");
    let queue_ref = b.field_ref(
        "java/lang/ref/Reference",
        "queue",
        "Ljava/lang/ref/ReferenceQueue;",
    );

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Invokespecial as u8, object_init)
        .op(Op::Aload0 as u8)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Putfield as u8, referent_ref)
        .op(Op::Return as u8);
    b.method("<init>", "(Ljava/lang/Object;)V", PUBLIC, a.finish(2, 2));

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Invokespecial as u8, object_init)
        .op(Op::Aload0 as u8)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Putfield as u8, referent_ref)
        .op(Op::Aload0 as u8)
        .op(Op::Aload2 as u8)
        .op_u16(Op::Putfield as u8, queue_ref)
        .op(Op::Return as u8);
    b.method(
        "<init>",
        "(Ljava/lang/Object;Ljava/lang/ref/ReferenceQueue;)V",
        PUBLIC,
        a.finish(2, 3),
    );

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Getfield as u8, referent_ref)
        .op(Op::Areturn as u8);
    b.method("get", "()Ljava/lang/Object;", PUBLIC, a.finish(1, 1));

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op(Op::AconstNull as u8)
        .op_u16(Op::Putfield as u8, referent_ref)
        .op(Op::Return as u8);
    b.method("clear", "()V", PUBLIC, a.finish(2, 1));

    b.finish()
}

fn java_lang_ref_weak_reference() -> ClassFile {
    let mut b = ClassBuilder::new(
        "java/lang/ref/WeakReference",
        Some("java/lang/ref/Reference"),
    );
    let super_one = b.method_ref("java/lang/ref/Reference", "<init>", "(Ljava/lang/Object;)V");
    let super_two = b.method_ref(
        "java/lang/ref/Reference",
        "<init>",
        "(Ljava/lang/Object;Ljava/lang/ref/ReferenceQueue;)V",
    );

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Invokespecial as u8, super_one)
        .op(Op::Return as u8);
    b.method("<init>", "(Ljava/lang/Object;)V", PUBLIC, a.finish(2, 2));

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op(Op::Aload1 as u8)
        .op(Op::Aload2 as u8)
        .op_u16(Op::Invokespecial as u8, super_two)
        .op(Op::Return as u8);
    b.method(
        "<init>",
        "(Ljava/lang/Object;Ljava/lang/ref/ReferenceQueue;)V",
        PUBLIC,
        a.finish(3, 3),
    );
    b.finish()
}

fn java_lang_ref_reference_queue() -> ClassFile {
    let mut b = ClassBuilder::new(
        "java/lang/ref/ReferenceQueue",
        Some("java/lang/Object"),
    );
    b.field("head", "Ljava/lang/ref/Reference;", FieldFlags::PRIVATE);
    let ctor = chained_ctor(&mut b, "java/lang/Object");
    b.method("<init>", "()V", PUBLIC, ctor);
    b.native_method("poll", "()Ljava/lang/ref/Reference;", PUBLIC);
    b.finish()
}

fn java_lang_stack_trace_element() -> ClassFile {
    let mut b = ClassBuilder::new(
        "java/lang/StackTraceElement",
        Some("java/lang/Object"),
    );
    b.field("declaringClass", "Ljava/lang/String;", FieldFlags::PRIVATE);
    b.field("methodName", "Ljava/lang/String;", FieldFlags::PRIVATE);
    b.field("fileName", "Ljava/lang/String;", FieldFlags::PRIVATE);
    b.field("lineNumber", "I", FieldFlags::PRIVATE);
    let ctor = chained_ctor(&mut b, "java/lang/Object");
    b.method("<init>", "()V", PUBLIC, ctor);
    b.finish()
}

fn build_boot_class(name: &str) -> Option<ClassFile> {
    let cf = match name {
        "java/lang/Object" => java_lang_object(),
        "java/lang/Class" => java_lang_class(),
        "java/lang/String" => java_lang_string(),
        "java/lang/Runnable" => java_lang_runnable(),
        "java/lang/Thread" => java_lang_thread(),
        "java/lang/System" => java_lang_system(),
        "java/io/PrintStream" => java_io_print_stream(),
        "java/lang/Throwable" => java_lang_throwable(),
        "java/lang/ref/Reference" => java_lang_ref_reference(),
        "java/lang/ref/WeakReference" => java_lang_ref_weak_reference(),
        "java/lang/ref/ReferenceQueue" => java_lang_ref_reference_queue(),
        "java/lang/StackTraceElement" => java_lang_stack_trace_element(),

        "java/lang/Error" => throwable_subclass("java/lang/Error", "java/lang/Throwable"),
        "java/lang/Exception" => throwable_subclass("java/lang/Exception", "java/lang/Throwable"),
        "java/lang/RuntimeException" => {
            throwable_subclass("java/lang/RuntimeException", "java/lang/Exception")
        }
        "java/lang/LinkageError" => throwable_subclass("java/lang/LinkageError", "java/lang/Error"),
        "java/lang/VirtualMachineError" => {
            throwable_subclass("java/lang/VirtualMachineError", "java/lang/Error")
        }
        "java/lang/ThreadDeath" => throwable_subclass("java/lang/ThreadDeath", "java/lang/Error"),
        "java/lang/ClassFormatError" => {
            throwable_subclass("java/lang/ClassFormatError", "java/lang/LinkageError")
        }
        "java/lang/NoClassDefFoundError" => {
            throwable_subclass("java/lang/NoClassDefFoundError", "java/lang/LinkageError")
        }
        "java/lang/UnsatisfiedLinkError" => {
            throwable_subclass("java/lang/UnsatisfiedLinkError", "java/lang/LinkageError")
        }
        "java/lang/IncompatibleClassChangeError" => throwable_subclass(
            "java/lang/IncompatibleClassChangeError",
            "java/lang/LinkageError",
        ),
        "java/lang/NoSuchFieldError" => throwable_subclass(
            "java/lang/NoSuchFieldError",
            "java/lang/IncompatibleClassChangeError",
        ),
        "java/lang/NoSuchMethodError" => throwable_subclass(
            "java/lang/NoSuchMethodError",
            "java/lang/IncompatibleClassChangeError",
        ),
        "java/lang/OutOfMemoryError" => throwable_subclass(
            "java/lang/OutOfMemoryError",
            "java/lang/VirtualMachineError",
        ),
        "java/lang/StackOverflowError" => throwable_subclass(
            "java/lang/StackOverflowError",
            "java/lang/VirtualMachineError",
        ),
        "java/lang/InternalError" => throwable_subclass(
            "java/lang/InternalError",
            "java/lang/VirtualMachineError",
        ),
        "java/lang/ClassNotFoundException" => {
            throwable_subclass("java/lang/ClassNotFoundException", "java/lang/Exception")
        }
        "java/lang/InterruptedException" => {
            throwable_subclass("java/lang/InterruptedException", "java/lang/Exception")
        }
        "java/lang/ArithmeticException" => throwable_subclass(
            "java/lang/ArithmeticException",
            "java/lang/RuntimeException",
        ),
        "java/lang/ArrayStoreException" => throwable_subclass(
            "java/lang/ArrayStoreException",
            "java/lang/RuntimeException",
        ),
        "java/lang/ClassCastException" => throwable_subclass(
            "java/lang/ClassCastException",
            "java/lang/RuntimeException",
        ),
        "java/lang/IllegalArgumentException" => throwable_subclass(
            "java/lang/IllegalArgumentException",
            "java/lang/RuntimeException",
        ),
        "java/lang/IllegalMonitorStateException" => throwable_subclass(
            "java/lang/IllegalMonitorStateException",
            "java/lang/RuntimeException",
        ),
        "java/lang/IllegalThreadStateException" => throwable_subclass(
            "java/lang/IllegalThreadStateException",
            "java/lang/IllegalArgumentException",
        ),
        "java/lang/IndexOutOfBoundsException" => throwable_subclass(
            "java/lang/IndexOutOfBoundsException",
            "java/lang/RuntimeException",
        ),
        "java/lang/ArrayIndexOutOfBoundsException" => throwable_subclass(
            "java/lang/ArrayIndexOutOfBoundsException",
            "java/lang/IndexOutOfBoundsException",
        ),
        "java/lang/StringIndexOutOfBoundsException" => throwable_subclass(
            "java/lang/StringIndexOutOfBoundsException",
            "java/lang/IndexOutOfBoundsException",
        ),
        "java/lang/NegativeArraySizeException" => throwable_subclass(
            "java/lang/NegativeArraySizeException",
            "java/lang/RuntimeException",
        ),
        "java/lang/NullPointerException" => throwable_subclass(
            "java/lang/NullPointerException",
            "java/lang/RuntimeException",
        ),
        "java/lang/UnsupportedOperationException" => throwable_subclass(
            "java/lang/UnsupportedOperationException",
            "java/lang/RuntimeException",
        ),
        _ => return None,
    };
    Some(cf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_boot_image_names_itself() {
        for name in [
            "java/lang/Object",
            "java/lang/String",
            "java/lang/Thread",
            "java/lang/Throwable",
            "java/lang/NullPointerException",
            "java/lang/ref/WeakReference",
        ] {
            let cf = build_boot_class(name).unwrap();
            assert_eq!(cf.class_name().unwrap(), name);
        }
        assert!(build_boot_class("java/util/HashMap").is_none());
    }

    #[test]
    fn thread_run_branch_targets_line_up() {
        let cf = build_boot_class("java/lang/Thread").unwrap();
        let run = cf
            .methods
            .iter()
            .find(|m| cf.cp.get_utf8(m.name_index).unwrap() == "run")
            .unwrap();
        let code = &run.code.as_ref().unwrap().code;
        // ifnull at pc 5 must land on the return opcode.
        assert_eq!(code[5], Op::Ifnull as u8);
        let offset = i16::from_be_bytes([code[6], code[7]]) as usize;
        assert_eq!(code[5 + offset], Op::Return as u8);
        assert_eq!(code[8], Op::Invokeinterface as u8);
    }

    #[test]
    fn join_loops_back_to_the_liveness_check() {
        let cf = build_boot_class("java/lang/Thread").unwrap();
        let join = cf
            .methods
            .iter()
            .find(|m| cf.cp.get_utf8(m.name_index).unwrap() == "join")
            .unwrap();
        let code = &join.code.as_ref().unwrap().code;
        assert_eq!(code[11], Op::Goto as u8);
        let offset = i16::from_be_bytes([code[12], code[13]]);
        assert_eq!(11 + offset as isize, 0);
        assert_eq!(code[14], Op::Return as u8);
    }
}
