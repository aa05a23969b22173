use embla_runtime::classfile::builder::{Assembler, ClassBuilder};
use embla_runtime::classfile::{ClassFile, ExceptionTableEntry, FieldFlags, MethodFlags};
use embla_runtime::error::exit_code;
use embla_runtime::interpreter::opcode::Opcode as Op;

mod common;

const MAIN_DESC: &str = "([Ljava/lang/String;)V";

fn static_flags() -> MethodFlags {
    MethodFlags::PUBLIC | MethodFlags::STATIC
}

fn counter_class() -> ClassFile {
    let mut b = ClassBuilder::new("Counter", Some("java/lang/Object"));
    b.field("count", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    let count = b.field_ref("Counter", "count", "I");
    let mut a = Assembler::new();
    a.op_u16(Op::Getstatic as u8, count)
        .op(Op::Iconst1 as u8)
        .op(Op::Iadd as u8)
        .op_u16(Op::Putstatic as u8, count)
        .op(Op::Return as u8);
    b.method(
        "bump",
        "()V",
        static_flags() | MethodFlags::SYNCHRONIZED,
        a.finish(2, 0),
    );
    b.finish()
}

fn worker_class() -> ClassFile {
    let mut b = ClassBuilder::new("Worker", Some("java/lang/Object"));
    b.implements("java/lang/Runnable");
    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    let bump = b.method_ref("Counter", "bump", "()V");

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Invokespecial as u8, object_init)
        .op(Op::Return as u8);
    b.method("<init>", "()V", MethodFlags::PUBLIC, a.finish(1, 1));

    // for (i = 0; i < 1000; i++) Counter.bump();
    // 0 iconst_0, 1 istore_1, 2 iload_1, 3 sipush, 6 if_icmpge 18,
    // 9 invokestatic, 12 iinc, 15 goto 2, 18 return
    let mut a = Assembler::new();
    a.op(Op::Iconst0 as u8)
        .op(Op::Istore1 as u8)
        .op(Op::Iload1 as u8)
        .op_u16(Op::Sipush as u8, 1000)
        .op_branch(Op::IfIcmpge as u8, 18)
        .op_u16(Op::Invokestatic as u8, bump)
        .op_u8(Op::Iinc as u8, 1)
        .raw(1)
        .op_branch(Op::Goto as u8, 2)
        .op(Op::Return as u8);
    b.method("run", "()V", MethodFlags::PUBLIC, a.finish(2, 2));
    b.finish()
}

fn fairness_main_class() -> ClassFile {
    let mut b = ClassBuilder::new("MF", Some("java/lang/Object"));
    let thread_class = b.class("java/lang/Thread");
    let worker_class = b.class("Worker");
    let worker_init = b.method_ref("Worker", "<init>", "()V");
    let thread_init = b.method_ref("java/lang/Thread", "<init>", "(Ljava/lang/Runnable;)V");
    let start = b.method_ref("java/lang/Thread", "start", "()V");
    let join = b.method_ref("java/lang/Thread", "join", "()V");
    let out_ref = b.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
    let count = b.field_ref("Counter", "count", "I");
    let println_int = b.method_ref("java/io/PrintStream", "println", "(I)V");

    let mut a = Assembler::new();
    for slot in 1..=4u8 {
        a.op_u16(Op::New as u8, thread_class)
            .op(Op::Dup as u8)
            .op_u16(Op::New as u8, worker_class)
            .op(Op::Dup as u8)
            .op_u16(Op::Invokespecial as u8, worker_init)
            .op_u16(Op::Invokespecial as u8, thread_init)
            .op_u8(Op::Astore as u8, slot);
    }
    for slot in 1..=4u8 {
        a.op_u8(Op::Aload as u8, slot)
            .op_u16(Op::Invokevirtual as u8, start);
    }
    for slot in 1..=4u8 {
        a.op_u8(Op::Aload as u8, slot)
            .op_u16(Op::Invokevirtual as u8, join);
    }
    a.op_u16(Op::Getstatic as u8, out_ref)
        .op_u16(Op::Getstatic as u8, count)
        .op_u16(Op::Invokevirtual as u8, println_int)
        .op(Op::Return as u8);
    b.method("main", MAIN_DESC, static_flags(), a.finish(4, 5));
    b.finish()
}

#[test]
fn four_contending_threads_count_to_4000() {
    let (mut vm, console) = common::vm_with_classes(
        "MF",
        2 * 1024 * 1024,
        vec![counter_class(), worker_class(), fairness_main_class()],
    );
    let code = vm.run().expect("run");
    assert_eq!(code, exit_code::OK);
    assert_eq!(common::static_int(&vm, "Counter", "count"), 4000);
    assert_eq!(console.stdout(), "4000\n");
    // Nobody left blocked or waiting after the join barrier.
    assert!(vm.threads.iter().all(|t| !t.is_alive()));
}

fn sleeper_class() -> ClassFile {
    let mut b = ClassBuilder::new("Sleeper", Some("java/lang/Object"));
    b.implements("java/lang/Runnable");
    b.field("interrupted", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    let interrupted = b.field_ref("Sleeper", "interrupted", "I");
    let sleep = b.method_ref("java/lang/Thread", "sleep", "(J)V");
    let interrupted_exc = b.class("java/lang/InterruptedException");
    let ten_seconds = b.long(10_000);

    let mut a = Assembler::new();
    a.op(Op::Aload0 as u8)
        .op_u16(Op::Invokespecial as u8, object_init)
        .op(Op::Return as u8);
    b.method("<init>", "()V", MethodFlags::PUBLIC, a.finish(1, 1));

    // try { Thread.sleep(10000) } catch (InterruptedException e) { flag = 1 }
    // 0 ldc2_w, 3 invokestatic, 6 goto 14, 9 pop, 10 iconst_1,
    // 11 putstatic, 14 return
    let mut a = Assembler::new();
    a.op_u16(Op::Ldc2W as u8, ten_seconds)
        .op_u16(Op::Invokestatic as u8, sleep)
        .op_branch(Op::Goto as u8, 14)
        .op(Op::Pop as u8)
        .op(Op::Iconst1 as u8)
        .op_u16(Op::Putstatic as u8, interrupted)
        .op(Op::Return as u8);
    let code = a.finish_with_handlers(
        2,
        1,
        vec![ExceptionTableEntry {
            start_pc: 0,
            end_pc: 9,
            handler_pc: 9,
            catch_type: interrupted_exc,
        }],
    );
    b.method("run", "()V", MethodFlags::PUBLIC, code);
    b.finish()
}

fn interrupt_main_class() -> ClassFile {
    let mut b = ClassBuilder::new("IntMain", Some("java/lang/Object"));
    let thread_class = b.class("java/lang/Thread");
    let sleeper_class = b.class("Sleeper");
    let sleeper_init = b.method_ref("Sleeper", "<init>", "()V");
    let thread_init = b.method_ref("java/lang/Thread", "<init>", "(Ljava/lang/Runnable;)V");
    let start = b.method_ref("java/lang/Thread", "start", "()V");
    let sleep = b.method_ref("java/lang/Thread", "sleep", "(J)V");
    let interrupt = b.method_ref("java/lang/Thread", "interrupt", "()V");
    let join = b.method_ref("java/lang/Thread", "join", "()V");
    let fifty = b.long(50);

    let mut a = Assembler::new();
    a.op_u16(Op::New as u8, thread_class)
        .op(Op::Dup as u8)
        .op_u16(Op::New as u8, sleeper_class)
        .op(Op::Dup as u8)
        .op_u16(Op::Invokespecial as u8, sleeper_init)
        .op_u16(Op::Invokespecial as u8, thread_init)
        .op(Op::Astore1 as u8)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Invokevirtual as u8, start)
        .op_u16(Op::Ldc2W as u8, fifty)
        .op_u16(Op::Invokestatic as u8, sleep)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Invokevirtual as u8, interrupt)
        .op(Op::Aload1 as u8)
        .op_u16(Op::Invokevirtual as u8, join)
        .op(Op::Return as u8);
    b.method("main", MAIN_DESC, static_flags(), a.finish(4, 2));
    b.finish()
}

#[test]
fn interrupt_wakes_a_sleeping_thread_with_interrupted_exception() {
    let (mut vm, _console) = common::vm_with_classes(
        "IntMain",
        1024 * 1024,
        vec![sleeper_class(), interrupt_main_class()],
    );
    let code = vm.run().expect("run");
    assert_eq!(code, exit_code::OK);
    assert_eq!(common::static_int(&vm, "Sleeper", "interrupted"), 1);
    assert!(vm.threads.iter().all(|t| !t.is_alive()));
}
