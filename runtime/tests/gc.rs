use embla_runtime::classfile::builder::ClassBuilder;
use embla_runtime::classfile::FieldFlags;
use embla_runtime::heap::gc;
use embla_runtime::heap::GcColor;
use embla_runtime::jtype::AllocationType;
use embla_runtime::vm::Value;

mod common;

fn fresh_vm() -> embla_runtime::VirtualMachine {
    // No main launch; the pools are driven directly.
    common::vm_with_classes("unused", 1024 * 1024, vec![]).0
}

#[test]
fn reachable_objects_survive_black_and_heap_stays_consistent() {
    let mut vm = fresh_vm();
    let object_class = vm.br.get_java_lang_object_id().unwrap();
    let string_class = vm.br.get_java_lang_string_id().unwrap();

    let keeper = vm.new_instance(object_class).unwrap();
    vm.permanent_roots.push(keeper).unwrap();
    let array_class = vm.array_class_of(string_class).unwrap();
    let array = vm.new_object_array(array_class, 3).unwrap();
    vm.permanent_roots.push(array).unwrap();
    let element = vm.new_string("kept alive through the array").unwrap();
    vm.heap
        .write_array_element(array, 1, Value::Ref(element))
        .unwrap();

    // Unreferenced garbage to sweep.
    for _ in 0..16 {
        vm.new_instance(object_class).unwrap();
    }

    let stats = gc::collect(&mut vm);
    assert!(stats.freed_chunks >= 16);
    vm.heap.validate().unwrap();

    assert_eq!(vm.heap.color(keeper), GcColor::Black);
    assert_eq!(vm.heap.color(array), GcColor::Black);
    assert_eq!(vm.heap.color(element), GcColor::Black);
    assert_eq!(
        vm.heap.read_array_element(array, 1).unwrap(),
        Value::Ref(element)
    );
    assert_eq!(vm.heap.get_class_id(element).unwrap(), string_class);
}

#[test]
fn weak_referent_is_cleared_when_only_weakly_reachable() {
    let mut vm = fresh_vm();
    let object_class = vm.br.get_java_lang_object_id().unwrap();
    let weak_sym = vm.interner.get_or_intern("java/lang/ref/WeakReference");
    let weak_class = vm.method_area.get_class_id_or_load(weak_sym).unwrap();
    let referent_offset = vm
        .method_area
        .get_instance_class(&weak_class)
        .unwrap()
        .referent_offset()
        .expect("weak reference kind");

    let doomed = vm.new_instance(object_class).unwrap();
    let kept = vm.new_instance(object_class).unwrap();
    vm.permanent_roots.push(kept).unwrap();

    let weak_to_doomed = vm.new_instance(weak_class).unwrap();
    vm.permanent_roots.push(weak_to_doomed).unwrap();
    vm.heap
        .write_field(
            weak_to_doomed,
            referent_offset,
            Value::Ref(doomed),
            AllocationType::Reference,
        )
        .unwrap();

    let weak_to_kept = vm.new_instance(weak_class).unwrap();
    vm.permanent_roots.push(weak_to_kept).unwrap();
    vm.heap
        .write_field(
            weak_to_kept,
            referent_offset,
            Value::Ref(kept),
            AllocationType::Reference,
        )
        .unwrap();

    gc::collect(&mut vm);

    assert_eq!(
        vm.heap
            .read_field(weak_to_doomed, referent_offset, AllocationType::Reference)
            .unwrap(),
        Value::Null
    );
    assert_eq!(
        vm.heap
            .read_field(weak_to_kept, referent_offset, AllocationType::Reference)
            .unwrap(),
        Value::Ref(kept)
    );
    vm.heap.validate().unwrap();
}

#[test]
fn cleared_weak_reference_is_enqueued_on_its_queue() {
    let mut vm = fresh_vm();
    let object_class = vm.br.get_java_lang_object_id().unwrap();
    let weak_sym = vm.interner.get_or_intern("java/lang/ref/WeakReference");
    let weak_class = vm.method_area.get_class_id_or_load(weak_sym).unwrap();
    let queue_sym = vm.interner.get_or_intern("java/lang/ref/ReferenceQueue");
    let queue_class = vm.method_area.get_class_id_or_load(queue_sym).unwrap();

    let weak_instance_class = vm.method_area.get_instance_class(&weak_class).unwrap();
    let referent_offset = weak_instance_class.referent_offset().unwrap();
    let queue_offset = weak_instance_class
        .get_instance_field(&vm.br.reference_queue_fk)
        .unwrap()
        .offset;
    let head_offset = vm
        .method_area
        .get_instance_class(&queue_class)
        .unwrap()
        .get_instance_field(&vm.br.queue_head_fk)
        .unwrap()
        .offset;

    let doomed = vm.new_instance(object_class).unwrap();
    let queue = vm.new_instance(queue_class).unwrap();
    vm.permanent_roots.push(queue).unwrap();
    let weak = vm.new_instance(weak_class).unwrap();
    vm.permanent_roots.push(weak).unwrap();
    vm.heap
        .write_field(weak, referent_offset, Value::Ref(doomed), AllocationType::Reference)
        .unwrap();
    vm.heap
        .write_field(weak, queue_offset, Value::Ref(queue), AllocationType::Reference)
        .unwrap();

    gc::collect(&mut vm);

    assert_eq!(
        vm.heap
            .read_field(weak, referent_offset, AllocationType::Reference)
            .unwrap(),
        Value::Null
    );
    assert_eq!(
        vm.heap
            .read_field(queue, head_offset, AllocationType::Reference)
            .unwrap(),
        Value::Ref(weak)
    );
    // Enqueueing detaches the reference from its queue.
    assert_eq!(
        vm.heap
            .read_field(weak, queue_offset, AllocationType::Reference)
            .unwrap(),
        Value::Null
    );
}

#[test]
fn unreferenced_class_unloads_and_reference_stays_loadable() {
    let mut vm = {
        let mut b = ClassBuilder::new("Transient", Some("java/lang/Object"));
        b.field("marker", "I", FieldFlags::PUBLIC | FieldFlags::STATIC);
        common::vm_with_classes("unused", 1024 * 1024, vec![b.finish()]).0
    };

    let name = vm.interner.get_or_intern("Transient");
    let class_id = vm.method_area.get_class_id_or_load(name).unwrap();
    assert_eq!(vm.method_area.lookup_class_id(name), Some(class_id));

    // No instances, no frames, not well-known: one collection unloads it.
    gc::collect(&mut vm);
    assert_eq!(vm.method_area.lookup_class_id(name), None);

    // With a live instance the metadata must stay.
    let reloaded = vm.method_area.get_class_id_or_load(name).unwrap();
    let pinned = vm.new_instance(reloaded).unwrap();
    vm.permanent_roots.push(pinned).unwrap();
    gc::collect(&mut vm);
    assert_eq!(vm.method_area.lookup_class_id(name), Some(reloaded));
}

#[test]
fn interned_strings_are_roots_and_idempotent() {
    let mut vm = fresh_vm();
    let sym = vm.interner.get_or_intern("stable");
    let first = vm.intern(sym).unwrap();
    gc::collect(&mut vm);
    let second = vm.intern(sym).unwrap();
    assert_eq!(first, second);
    assert_eq!(vm.heap.read_string(first).unwrap(), "stable");
}

#[test]
fn loading_the_same_class_twice_yields_one_identity() {
    let mut vm = fresh_vm();
    let name = vm.interner.get_or_intern("java/lang/StackTraceElement");
    let first = vm.method_area.get_class_id_or_load(name).unwrap();
    let second = vm.method_area.get_class_id_or_load(name).unwrap();
    assert_eq!(first, second);
}
