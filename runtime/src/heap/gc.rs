use crate::heap::{AllocType, GcColor, Heap, HeapRef, NULL_REF};
use crate::jtype::AllocationType;
use crate::keys::ClassId;
use crate::rt::array::ArrayComponent;
use crate::rt::{ClassLike, ClassState, JvmClass};
use crate::vm::VirtualMachine;
use crate::{debug_error_log, debug_log, jdwp};
use std::collections::HashSet;

#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub freed_chunks: usize,
    pub freed_bytes: usize,
    pub unloaded_classes: usize,
}

/// Precise, non-moving tri-color mark/sweep over the chunk heap, with a
/// class-liveness fixpoint so statics of dead classes do not resurrect
/// objects, weak-reference clearing, and class-unload parking.
///
/// Runs synchronously on the VM thread; callers sit at an allocation or an
/// explicit request, never inside a critical section.
pub fn collect(vm: &mut VirtualMachine) -> GcStats {
    vm.gc_cycles += 1;
    debug_log!("GC cycle {} starting", vm.gc_cycles);

    let mut stats = GcStats::default();
    let mut weak_refs: Vec<(HeapRef, usize)> = Vec::new();
    let mut live_classes: HashSet<ClassId> = HashSet::new();

    {
        let VirtualMachine {
            heap,
            method_area,
            threads,
            monitors,
            transient_roots,
            permanent_roots,
            jdwp,
            br,
            emergency_oom,
            ..
        } = vm;

        // Whiten every managed chunk.
        let chunks: Vec<HeapRef> = heap
            .chunks()
            .filter(|c| c.in_use)
            .map(|c| c.offset)
            .collect();
        for chunk in &chunks {
            if heap
                .alloc_type(*chunk)
                .map(|t| t != AllocType::Static)
                .unwrap_or(false)
            {
                heap.set_color(*chunk, GcColor::White);
            }
        }

        // Object roots.
        let mut work: Vec<HeapRef> = Vec::new();
        let mut push_root = |work: &mut Vec<HeapRef>, r: HeapRef| {
            if r != NULL_REF {
                work.push(r);
            }
        };
        for thread in threads.iter() {
            push_root(&mut work, thread.thread_obj);
            if let Some(uncaught) = thread.uncaught {
                push_root(&mut work, uncaught);
            }
            if let Some(crate::thread::PendingException::Object(r)) = &thread.pending_exception {
                push_root(&mut work, *r);
            }
            for frame in &thread.frames {
                for local in frame.locals.iter().flatten() {
                    if let crate::vm::Value::Ref(r) = local {
                        push_root(&mut work, *r);
                    }
                }
                for operand in &frame.operand {
                    if let crate::vm::Value::Ref(r) = operand {
                        push_root(&mut work, *r);
                    }
                }
            }
        }
        for r in heap.interned_strings().collect::<Vec<_>>() {
            work.push(r);
        }
        for r in transient_roots.iter().chain(permanent_roots.iter()) {
            push_root(&mut work, r);
        }
        for r in jdwp.gc_roots() {
            push_root(&mut work, r);
        }
        for r in monitors.monitored_objects().collect::<Vec<_>>() {
            work.push(r);
        }
        push_root(&mut work, *emergency_oom);

        // Class-liveness seeds: well-known classes, every non-instance class
        // (arrays and primitives are never unloaded), classes executing on
        // some stack, and classes mid-initialization.
        let mut class_work: Vec<ClassId> = Vec::new();
        let mut seed_class = |class_work: &mut Vec<ClassId>, id: ClassId| {
            class_work.push(id);
        };
        for getter in [
            br.get_java_lang_object_id(),
            br.get_java_lang_class_id(),
            br.get_java_lang_string_id(),
            br.get_java_lang_throwable_id(),
            br.get_java_lang_thread_id(),
            br.get_java_lang_system_id(),
            br.get_char_array_class_id(),
        ] {
            if let Ok(id) = getter {
                seed_class(&mut class_work, id);
            }
        }
        for id in method_area.loaded_class_ids().collect::<Vec<_>>() {
            match method_area.get_class_opt(id) {
                Some(JvmClass::Instance(class)) => {
                    if matches!(
                        class.state(),
                        ClassState::Initializing | ClassState::Loading
                    ) {
                        seed_class(&mut class_work, id);
                    }
                }
                Some(_) => seed_class(&mut class_work, id),
                None => {}
            }
        }
        for thread in threads.iter() {
            for frame in &thread.frames {
                seed_class(
                    &mut class_work,
                    method_area.get_method(&frame.method_id).class_id(),
                );
            }
        }

        // Mark to fixpoint over the object and class worklists.
        while !work.is_empty() || !class_work.is_empty() {
            while let Some(class_id) = class_work.pop() {
                if !live_classes.insert(class_id) {
                    continue;
                }
                let Some(class) = method_area.get_class_opt(class_id) else {
                    continue;
                };
                if let Some(super_id) = class.get_super_id() {
                    class_work.push(super_id);
                }
                if let Ok(interfaces) = class.as_class_like().get_interfaces() {
                    class_work.extend(interfaces.iter().copied());
                }
                if let JvmClass::Array(array) = class {
                    if let ArrayComponent::Reference(component) = array.component {
                        class_work.push(component);
                    }
                }
                for r in method_area.static_ref_values(class_id) {
                    work.push(r);
                }
                for r in method_area.constant_pool_strings(class_id) {
                    work.push(r);
                }
            }

            let Some(chunk) = work.pop() else { continue };
            if chunk == NULL_REF || !heap.is_live_object(chunk) {
                continue;
            }
            if heap.color(chunk) != GcColor::White {
                continue;
            }
            let Ok(alloc_type) = heap.alloc_type(chunk) else {
                continue;
            };
            heap.set_color(chunk, GcColor::Grey);

            match alloc_type {
                AllocType::Object | AllocType::WeakRef => {
                    if let Ok(class_id) = heap.get_class_id(chunk) {
                        class_work.push(class_id);
                        if let Ok(class) = method_area.get_instance_class(&class_id) {
                            for offset in class.ref_field_offsets().unwrap_or(&[]) {
                                let child = heap.read_ref_slot(chunk, *offset);
                                if child != NULL_REF {
                                    work.push(child);
                                }
                            }
                            if alloc_type == AllocType::WeakRef {
                                if let Some(referent_offset) = class.referent_offset() {
                                    weak_refs.push((chunk, referent_offset));
                                }
                            }
                        }
                        // A marked mirror pins the class it reflects.
                        if let Ok(reflected) = method_area.get_class_id_by_mirror(chunk) {
                            class_work.push(reflected);
                        }
                    }
                }
                AllocType::ArrayObject => {
                    if let Ok(class_id) = heap.get_class_id(chunk) {
                        class_work.push(class_id);
                    }
                    if let Ok(length) = heap.get_array_length(chunk) {
                        for i in 0..length as usize {
                            let child = heap.read_ref_slot(
                                chunk,
                                Heap::ARRAY_ELEMENTS_OFFSET
                                    + i * AllocationType::Reference.byte_size(),
                            );
                            if child != NULL_REF {
                                work.push(child);
                            }
                        }
                    }
                }
                AllocType::ArrayPrimitive | AllocType::String => {
                    if let Ok(class_id) = heap.get_class_id(chunk) {
                        class_work.push(class_id);
                    }
                }
                AllocType::Data | AllocType::Static => {}
            }
            heap.set_color(chunk, GcColor::Black);
        }

        // Weak references: a white referent is about to die; clear the slot
        // and enqueue the reference if it carries a queue.
        for (weak, referent_offset) in weak_refs {
            let referent = heap.read_ref_slot(weak, referent_offset);
            if referent == NULL_REF || heap.color(referent) != GcColor::White {
                continue;
            }
            heap.write_ref_slot(weak, referent_offset, NULL_REF);
            enqueue_reference(heap, method_area, br, weak);
        }
    }

    // Backtraces die with their throwables.
    {
        let VirtualMachine {
            heap, backtraces, ..
        } = vm;
        backtraces
            .retain(|throwable, _| heap.color(*throwable) == GcColor::Black);
    }

    // Unload instance classes that did not survive the fixpoint.
    let debugger_attached = vm.jdwp.session_active();
    let dead_classes: Vec<ClassId> = vm
        .method_area
        .loaded_class_ids()
        .filter(|id| !live_classes.contains(id))
        .collect();
    for id in &dead_classes {
        vm.method_area.unload_class(*id);
        stats.unloaded_classes += 1;
    }
    if !dead_classes.is_empty() {
        let dead: HashSet<ClassId> = dead_classes.iter().copied().collect();
        for id in vm.method_area.loaded_class_ids().collect::<Vec<_>>() {
            if let Ok(class) = vm.method_area.get_instance_class(&id) {
                class.cp.invalidate_resolutions(&dead);
            }
        }
    }
    if !debugger_attached {
        vm.method_area.take_unloaded();
    }

    // Sweep: any white in-use scannable chunk is garbage.
    let dead_chunks: Vec<(HeapRef, usize)> = vm
        .heap
        .chunks()
        .filter(|c| c.in_use)
        .filter(|c| {
            vm.heap
                .alloc_type(c.offset)
                .map(|t| t != AllocType::Static)
                .unwrap_or(false)
                && vm.heap.color(c.offset) == GcColor::White
        })
        .map(|c| (c.offset, c.size))
        .collect();
    for (chunk, size) in dead_chunks {
        match vm.heap.free(chunk) {
            Ok(()) => {
                stats.freed_chunks += 1;
                stats.freed_bytes += size;
            }
            Err(e) => debug_error_log!("sweep failed to free chunk {chunk}: {e}"),
        }
    }

    debug_log!(
        "GC cycle {} done: freed {} chunks / {} bytes, unloaded {} classes",
        vm.gc_cycles,
        stats.freed_chunks,
        stats.freed_bytes,
        stats.unloaded_classes
    );

    if debugger_attached && stats.unloaded_classes > 0 {
        if let Err(e) = jdwp::events::report_class_unloads(vm) {
            debug_error_log!("failed to deliver class-unload events: {e}");
        }
    }
    stats
}

/// The reference-queue handoff, done directly on chunk payloads:
/// `ref.next = queue.head; queue.head = ref; ref.queue = null`.
fn enqueue_reference(
    heap: &mut Heap,
    method_area: &crate::heap::method_area::MethodArea,
    br: &crate::vm::bootstrap_registry::BootstrapRegistry,
    reference: HeapRef,
) {
    let Ok(ref_class_id) = heap.get_class_id(reference) else {
        return;
    };
    let Ok(ref_class) = method_area.get_instance_class(&ref_class_id) else {
        return;
    };
    let (Ok(queue_field), Ok(next_field)) = (
        ref_class.get_instance_field(&br.reference_queue_fk),
        ref_class.get_instance_field(&br.queue_next_fk),
    ) else {
        return;
    };
    let queue = heap.read_ref_slot(reference, queue_field.offset);
    if queue == NULL_REF {
        return;
    }
    let Ok(queue_class_id) = heap.get_class_id(queue) else {
        return;
    };
    let Ok(queue_class) = method_area.get_instance_class(&queue_class_id) else {
        return;
    };
    let Ok(head_field) = queue_class.get_instance_field(&br.queue_head_fk) else {
        return;
    };
    let old_head = heap.read_ref_slot(queue, head_field.offset);
    heap.write_ref_slot(reference, next_field.offset, old_head);
    heap.write_ref_slot(queue, head_field.offset, reference);
    heap.write_ref_slot(reference, queue_field.offset, NULL_REF);
}
