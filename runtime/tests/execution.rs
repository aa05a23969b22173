use embla_runtime::classfile::builder::{Assembler, ClassBuilder};
use embla_runtime::classfile::{ClassFile, ExceptionTableEntry, FieldFlags, MethodFlags};
use embla_runtime::error::exit_code;
use embla_runtime::interpreter::opcode::Opcode as Op;

mod common;

const MAIN_DESC: &str = "([Ljava/lang/String;)V";

fn static_flags() -> MethodFlags {
    MethodFlags::PUBLIC | MethodFlags::STATIC
}

fn hello_class() -> ClassFile {
    let mut b = ClassBuilder::new("H", Some("java/lang/Object"));
    b.source_file("H.java");
    let out_ref = b.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
    let hi = b.string("hi");
    let println = b.method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V");
    let mut a = Assembler::new();
    a.line(3)
        .op_u16(Op::Getstatic as u8, out_ref)
        .op_u8(Op::Ldc as u8, hi as u8)
        .op_u16(Op::Invokevirtual as u8, println)
        .line(4)
        .op(Op::Return as u8);
    b.method("main", MAIN_DESC, static_flags(), a.finish(2, 1));
    b.finish()
}

#[test]
fn hello_world_prints_and_exits_clean() {
    let (mut vm, console) = common::vm_with_classes("H", 1024 * 1024, vec![hello_class()]);
    let code = vm.run().expect("run");
    assert_eq!(code, exit_code::OK);
    assert_eq!(console.stdout(), "hi\n");
    assert_eq!(console.stderr(), "");
}

fn arithmetic_class() -> ClassFile {
    let mut b = ClassBuilder::new("Arith", Some("java/lang/Object"));
    b.field("intResult", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    b.field("longResult", "J", FieldFlags::PUBLIC | FieldFlags::STATIC);
    b.field("cmpResult", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    let int_result = b.field_ref("Arith", "intResult", "I");
    let long_result = b.field_ref("Arith", "longResult", "J");
    let cmp_result = b.field_ref("Arith", "cmpResult", "I");
    let big = b.long(100_000_000_000);
    let three = b.long(3);
    let three_and_a_half = b.double(3.5);

    let mut a = Assembler::new();
    // (7 * 6 + 8) % 25
    a.op_u8(Op::Bipush as u8, 7)
        .op_u8(Op::Bipush as u8, 6)
        .op(Op::Imul as u8)
        .op_u8(Op::Bipush as u8, 8)
        .op(Op::Iadd as u8)
        .op_u8(Op::Bipush as u8, 25)
        .op(Op::Irem as u8)
        .op_u16(Op::Putstatic as u8, int_result)
        // 100000000000 / 3
        .op_u16(Op::Ldc2W as u8, big)
        .op_u16(Op::Ldc2W as u8, three)
        .op(Op::Ldiv as u8)
        .op_u16(Op::Putstatic as u8, long_result)
        // dcmpg(3.5, 1.0)
        .op_u16(Op::Ldc2W as u8, three_and_a_half)
        .op(Op::Dconst1 as u8)
        .op(Op::Dcmpg as u8)
        .op_u16(Op::Putstatic as u8, cmp_result)
        .op(Op::Return as u8);
    b.method("main", MAIN_DESC, static_flags(), a.finish(4, 1));
    b.finish()
}

#[test]
fn arithmetic_and_wide_values() {
    let (mut vm, _console) =
        common::vm_with_classes("Arith", 1024 * 1024, vec![arithmetic_class()]);
    let code = vm.run().expect("run");
    assert_eq!(code, exit_code::OK);
    assert_eq!(common::static_int(&vm, "Arith", "intResult"), 0);
    assert_eq!(common::static_int(&vm, "Arith", "cmpResult"), 1);

    use embla_runtime::keys::FieldKey;
    use embla_runtime::rt::ClassLike;
    let class_sym = vm.interner.get_or_intern("Arith");
    let class_id = vm.method_area.lookup_class_id(class_sym).unwrap();
    let key = FieldKey {
        name: vm.interner.get_or_intern("longResult"),
        desc: vm.interner.get_or_intern("J"),
    };
    let long_value = vm
        .method_area
        .get_instance_class(&class_id)
        .unwrap()
        .get_static_field_value(&key)
        .unwrap()
        .as_long()
        .unwrap();
    assert_eq!(long_value, 33_333_333_333);
}

fn division_by_zero_class() -> ClassFile {
    let mut b = ClassBuilder::new("DivZero", Some("java/lang/Object"));
    b.field("caught", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    b.field("after", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    let caught = b.field_ref("DivZero", "caught", "I");
    let after = b.field_ref("DivZero", "after", "I");
    let arithmetic = b.class("java/lang/ArithmeticException");

    // try { 1/0 } catch (ArithmeticException e) { caught = 1 }; after = 1
    // 0 iconst_1, 1 iconst_0, 2 idiv, 3 pop, 4 goto 12,
    // 7 pop (handler), 8 iconst_1, 9 putstatic,
    // 12 iconst_1, 13 putstatic, 16 return
    let mut a = Assembler::new();
    a.op(Op::Iconst1 as u8)
        .op(Op::Iconst0 as u8)
        .op(Op::Idiv as u8)
        .op(Op::Pop as u8)
        .op_branch(Op::Goto as u8, 12)
        .op(Op::Pop as u8)
        .op(Op::Iconst1 as u8)
        .op_u16(Op::Putstatic as u8, caught)
        .op(Op::Iconst1 as u8)
        .op_u16(Op::Putstatic as u8, after)
        .op(Op::Return as u8);
    let code = a.finish_with_handlers(
        2,
        1,
        vec![ExceptionTableEntry {
            start_pc: 0,
            end_pc: 4,
            handler_pc: 7,
            catch_type: arithmetic,
        }],
    );
    b.method("main", MAIN_DESC, static_flags(), code);
    b.finish()
}

#[test]
fn arithmetic_exception_is_caught_by_the_handler_table() {
    let (mut vm, console) =
        common::vm_with_classes("DivZero", 1024 * 1024, vec![division_by_zero_class()]);
    let code = vm.run().expect("run");
    assert_eq!(code, exit_code::OK);
    assert_eq!(common::static_int(&vm, "DivZero", "caught"), 1);
    assert_eq!(common::static_int(&vm, "DivZero", "after"), 1);
    assert_eq!(console.stderr(), "");
}

fn uncaught_class() -> ClassFile {
    let mut b = ClassBuilder::new("Boom", Some("java/lang/Object"));
    b.source_file("Boom.java");
    let mut a = Assembler::new();
    a.line(2)
        .op(Op::Iconst1 as u8)
        .op(Op::Iconst0 as u8)
        .op(Op::Idiv as u8)
        .op(Op::Pop as u8)
        .op(Op::Return as u8);
    b.method("main", MAIN_DESC, static_flags(), a.finish(2, 1));
    b.finish()
}

#[test]
fn uncaught_exception_reports_and_exits_nonzero() {
    let (mut vm, console) = common::vm_with_classes("Boom", 1024 * 1024, vec![uncaught_class()]);
    let code = vm.run().expect("run");
    assert_eq!(code, exit_code::UNCAUGHT_EXCEPTION);
    let err = console.stderr();
    assert!(err.contains("Exception in thread \"main\""), "got: {err}");
    assert!(err.contains("java.lang.ArithmeticException"), "got: {err}");
    assert!(err.contains("at Boom.main(Boom.java:2)"), "got: {err}");
}

fn oom_class() -> ClassFile {
    let mut b = ClassBuilder::new("Oom", Some("java/lang/Object"));
    b.field("caught", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    let caught = b.field_ref("Oom", "caught", "I");
    let oom_error = b.class("java/lang/OutOfMemoryError");
    let size = b.integer(200_000);
    let out_ref = b.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
    let ok = b.string("ok");
    let println = b.method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V");

    // byte[200000] held live, a second one must fail, byte[1] then fits.
    // 0 ldc_w, 3 newarray, 5 astore_1, 6 ldc_w, 9 newarray, 11 astore_2,
    // 12 goto 20, 15 pop (handler), 16 iconst_1, 17 putstatic,
    // 20 iconst_1, 21 newarray, 23 astore_3,
    // 24 getstatic, 27 ldc, 29 invokevirtual, 32 return
    let mut a = Assembler::new();
    a.op_u16(Op::LdcW as u8, size)
        .op_u8(Op::Newarray as u8, 8)
        .op(Op::Astore1 as u8)
        .op_u16(Op::LdcW as u8, size)
        .op_u8(Op::Newarray as u8, 8)
        .op(Op::Astore2 as u8)
        .op_branch(Op::Goto as u8, 20)
        .op(Op::Pop as u8)
        .op(Op::Iconst1 as u8)
        .op_u16(Op::Putstatic as u8, caught)
        .op(Op::Iconst1 as u8)
        .op_u8(Op::Newarray as u8, 8)
        .op(Op::Astore3 as u8)
        .op_u16(Op::Getstatic as u8, out_ref)
        .op_u8(Op::Ldc as u8, ok as u8)
        .op_u16(Op::Invokevirtual as u8, println)
        .op(Op::Return as u8);
    let code = a.finish_with_handlers(
        2,
        4,
        vec![ExceptionTableEntry {
            start_pc: 6,
            end_pc: 12,
            handler_pc: 15,
            catch_type: oom_error,
        }],
    );
    b.method("main", MAIN_DESC, static_flags(), code);
    b.finish()
}

#[test]
fn oom_recovers_after_the_failed_allocation() {
    // Minimum-size heap: one 200k array fits, two do not.
    let (mut vm, console) = common::vm_with_classes("Oom", 256 * 1024, vec![oom_class()]);
    let code = vm.run().expect("run");
    assert_eq!(code, exit_code::OK);
    assert_eq!(common::static_int(&vm, "Oom", "caught"), 1);
    assert_eq!(console.stdout(), "ok\n");
}

fn clinit_class() -> ClassFile {
    let mut b = ClassBuilder::new("Init", Some("java/lang/Object"));
    b.field("seed", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    b.field("observed", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    let seed = b.field_ref("Init", "seed", "I");
    let observed = b.field_ref("Init", "observed", "I");

    let mut a = Assembler::new();
    a.op_u8(Op::Bipush as u8, 41)
        .op(Op::Iconst1 as u8)
        .op(Op::Iadd as u8)
        .op_u16(Op::Putstatic as u8, seed)
        .op(Op::Return as u8);
    b.method("<clinit>", "()V", MethodFlags::STATIC, a.finish(2, 0));

    let mut a = Assembler::new();
    a.op_u16(Op::Getstatic as u8, seed)
        .op_u16(Op::Putstatic as u8, observed)
        .op(Op::Return as u8);
    b.method("main", MAIN_DESC, static_flags(), a.finish(1, 1));
    b.finish()
}

#[test]
fn class_initializer_runs_before_main() {
    let (mut vm, _console) = common::vm_with_classes("Init", 1024 * 1024, vec![clinit_class()]);
    let code = vm.run().expect("run");
    assert_eq!(code, exit_code::OK);
    assert_eq!(common::static_int(&vm, "Init", "observed"), 42);
}

fn intern_class() -> ClassFile {
    let mut b = ClassBuilder::new("Pool", Some("java/lang/Object"));
    b.field("same", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
    let same = b.field_ref("Pool", "same", "I");
    let s1 = b.string("pooled");
    let s2 = b.string("pooled");
    let intern = b.method_ref("java/lang/String", "intern", "()Ljava/lang/String;");

    // Two constants of equal text, both interned: identity must hold.
    // 0 ldc, 2 invokevirtual, 5 ldc, 7 invokevirtual, 10 if_acmpeq 18,
    // 13 iconst_0, 14 putstatic, 17 return, 18 iconst_1, 19 putstatic,
    // 22 return
    let mut a = Assembler::new();
    a.op_u8(Op::Ldc as u8, s1 as u8)
        .op_u16(Op::Invokevirtual as u8, intern)
        .op_u8(Op::Ldc as u8, s2 as u8)
        .op_u16(Op::Invokevirtual as u8, intern)
        .op_branch(Op::IfAcmpeq as u8, 18)
        .op(Op::Iconst0 as u8)
        .op_u16(Op::Putstatic as u8, same)
        .op(Op::Return as u8)
        .op(Op::Iconst1 as u8)
        .op_u16(Op::Putstatic as u8, same)
        .op(Op::Return as u8);
    b.method("main", MAIN_DESC, static_flags(), a.finish(2, 1));
    b.finish()
}

#[test]
fn string_interning_gives_identity() {
    let (mut vm, _console) = common::vm_with_classes("Pool", 1024 * 1024, vec![intern_class()]);
    let code = vm.run().expect("run");
    assert_eq!(code, exit_code::OK);
    assert_eq!(common::static_int(&vm, "Pool", "same"), 1);
}

#[test]
fn main_class_must_exist() {
    let (mut vm, _console) = common::vm_with_classes("Nope", 1024 * 1024, vec![]);
    let err = vm.run().unwrap_err();
    assert!(matches!(
        err,
        embla_runtime::error::VmError::MainClassNotFound(_)
    ));
}
