use crate::heap::NULL_REF;
use crate::keys::ThreadId;
use crate::native::{NativeRegistry, NativeRet};
use crate::vm::{Value, VirtualMachine};

pub(super) fn register(registry: &mut NativeRegistry) {
    registry.register_str(
        "java/lang/ref/ReferenceQueue",
        "poll",
        "()Ljava/lang/ref/Reference;",
        reference_queue_poll,
    );
}

/// Unlinks and returns the queue head. The GC pushed cleared references here
/// during its weak pass.
fn reference_queue_poll(vm: &mut VirtualMachine, _tid: ThreadId, args: &[Value]) -> NativeRet {
    let queue = args[0].as_obj_ref()?;
    let queue_class = vm.heap.get_class_id(queue)?;
    let head_offset = vm
        .method_area
        .get_instance_class(&queue_class)?
        .get_instance_field(&vm.br.queue_head_fk)?
        .offset;

    let head = vm.heap.read_ref_slot(queue, head_offset);
    if head == NULL_REF {
        return Ok(Some(Value::Null));
    }

    let head_class = vm.heap.get_class_id(head)?;
    let next_offset = vm
        .method_area
        .get_instance_class(&head_class)?
        .get_instance_field(&vm.br.queue_next_fk)?
        .offset;
    let next = vm.heap.read_ref_slot(head, next_offset);
    vm.heap.write_ref_slot(queue, head_offset, next);
    vm.heap.write_ref_slot(head, next_offset, NULL_REF);
    Ok(Some(Value::Ref(head)))
}
