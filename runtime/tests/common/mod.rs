use embla_runtime::class_loader::{ClassProvider, MemoryProvider};
use embla_runtime::classfile::ClassFile;
use embla_runtime::config::VmConfig;
use embla_runtime::vm::{Console, VirtualMachine};
use std::sync::{Arc, Mutex};

/// Console sink whose buffers the test can inspect after the VM exits.
#[derive(Clone, Default)]
pub struct CapturedConsole {
    pub out: Arc<Mutex<Vec<u8>>>,
    pub err: Arc<Mutex<Vec<u8>>>,
}

impl CapturedConsole {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.out.lock().unwrap()).to_string()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.err.lock().unwrap()).to_string()
    }
}

impl Console for CapturedConsole {
    fn write_out(&mut self, bytes: &[u8]) {
        self.out.lock().unwrap().extend_from_slice(bytes);
    }

    fn write_err(&mut self, bytes: &[u8]) {
        self.err.lock().unwrap().extend_from_slice(bytes);
    }
}

pub fn vm_with_classes(
    main_class: &str,
    heap_size: usize,
    classes: Vec<ClassFile>,
) -> (VirtualMachine, CapturedConsole) {
    let console = CapturedConsole::default();
    let mut provider = MemoryProvider::new();
    for cf in classes {
        provider.add(cf);
    }
    let mut config = VmConfig::new(main_class);
    config.heap_size = heap_size;
    let vm = VirtualMachine::build(
        config,
        vec![Box::new(provider) as Box<dyn ClassProvider>],
        Box::new(console.clone()),
    )
    .expect("VM bootstrap");
    (vm, console)
}

/// Reads an `I`-typed static after the VM has run.
pub fn static_int(vm: &VirtualMachine, class: &str, field: &str) -> i32 {
    use embla_runtime::keys::FieldKey;
    use embla_runtime::rt::ClassLike;
    let class_sym = vm.interner.get_or_intern(class);
    let class_id = vm
        .method_area
        .lookup_class_id(class_sym)
        .expect("class loaded");
    let key = FieldKey {
        name: vm.interner.get_or_intern(field),
        desc: vm.interner.get_or_intern("I"),
    };
    vm.method_area
        .get_instance_class(&class_id)
        .unwrap()
        .get_static_field_value(&key)
        .expect("static present")
        .as_int()
        .unwrap()
}
