use crate::class_loader::ClassProvider;
use crate::config::VmConfig;
use crate::error::{exit_code, JavaExceptionKind, VmError};
use crate::heap::method_area::MethodArea;
use crate::heap::{gc, AllocType, Heap, HeapRef, StringSupport};
use crate::interpreter;
use crate::jdwp::{self, DebugAgent};
use crate::jtype::{JavaType, PrimitiveType};
use crate::keys::{ClassId, Symbol, ThreadId};
use crate::rt::ClassLike;
use crate::thread::monitor::MonitorPool;
use crate::thread::{scheduler, VmThread, NORM_PRIORITY};
use crate::vm::bootstrap_registry::BootstrapRegistry;
use crate::{debug_log, throw_exception};
use lasso::ThreadedRodeo;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_log::log::warn;

pub mod bootstrap_registry;

/// Instructions per scheduling quantum.
pub const QUANTUM: usize = 1000;

/// One stack operand, local slot, argument or static cell. Wide Java values
/// (long/double) are one `Value`; slot arithmetic in the frame layout
/// accounts for their two-slot footprint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(HeapRef),
    Null,
}

impl Value {
    pub fn as_int(&self) -> Result<i32, VmError> {
        match self {
            Value::Integer(v) => Ok(*v),
            _ => Err(VmError::UnexpectedType("expected int")),
        }
    }

    pub fn as_long(&self) -> Result<i64, VmError> {
        match self {
            Value::Long(v) => Ok(*v),
            _ => Err(VmError::UnexpectedType("expected long")),
        }
    }

    pub fn as_float(&self) -> Result<f32, VmError> {
        match self {
            Value::Float(v) => Ok(*v),
            _ => Err(VmError::UnexpectedType("expected float")),
        }
    }

    pub fn as_double(&self) -> Result<f64, VmError> {
        match self {
            Value::Double(v) => Ok(*v),
            _ => Err(VmError::UnexpectedType("expected double")),
        }
    }

    /// Non-null reference or NullPointerException.
    pub fn as_obj_ref(&self) -> Result<HeapRef, VmError> {
        match self {
            Value::Ref(r) => Ok(*r),
            Value::Null => throw_exception!(NullPointerException),
            _ => Err(VmError::UnexpectedType("expected reference")),
        }
    }

    pub fn as_nullable_obj_ref(&self) -> Result<Option<HeapRef>, VmError> {
        match self {
            Value::Ref(r) => Ok(Some(*r)),
            Value::Null => Ok(None),
            _ => Err(VmError::UnexpectedType("expected reference")),
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    pub fn default_for(ty: &JavaType) -> Value {
        match ty {
            JavaType::Primitive(PrimitiveType::Long) => Value::Long(0),
            JavaType::Primitive(PrimitiveType::Float) => Value::Float(0.0),
            JavaType::Primitive(PrimitiveType::Double) => Value::Double(0.0),
            JavaType::Primitive(_) => Value::Integer(0),
            JavaType::Instance(_) | JavaType::Array(_) => Value::Null,
        }
    }
}

/// Host console sink; swapped for a buffer in tests. `Send` so a whole VM
/// can be handed to a host thread before it starts running.
pub trait Console: Send {
    fn write_out(&mut self, bytes: &[u8]);
    fn write_err(&mut self, bytes: &[u8]);
}

pub struct StdConsole;

impl Console for StdConsole {
    fn write_out(&mut self, bytes: &[u8]) {
        let _ = std::io::stdout().write_all(bytes);
        let _ = std::io::stdout().flush();
    }

    fn write_err(&mut self, bytes: &[u8]) {
        let _ = std::io::stderr().write_all(bytes);
        let _ = std::io::stderr().flush();
    }
}

/// Depth-limited stack of GC roots. The transient stack scopes to one native
/// invocation; the permanent stack pins VM-lifetime objects.
pub struct RootStack {
    slots: Vec<HeapRef>,
    limit: usize,
    label: &'static str,
}

impl RootStack {
    pub fn new(limit: usize, label: &'static str) -> Self {
        Self {
            slots: Vec::new(),
            limit,
            label,
        }
    }

    pub fn push(&mut self, value: HeapRef) -> Result<(), VmError> {
        if self.slots.len() >= self.limit {
            return Err(VmError::RootStackExhausted(self.label));
        }
        self.slots.push(value);
        Ok(())
    }

    pub fn mark(&self) -> usize {
        self.slots.len()
    }

    pub fn release_to(&mut self, mark: usize) {
        self.slots.truncate(mark);
    }

    pub fn iter(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.slots.iter().copied()
    }
}

/// One captured backtrace element, symbolized lazily into
/// java/lang/StackTraceElement objects on request.
#[derive(Debug, Clone, Copy)]
pub struct BacktraceEntry {
    pub class_name: Symbol,
    pub method_name: Symbol,
    pub file_name: Option<Symbol>,
    pub line: Option<u16>,
}

/// The whole VM: every pool and table, owned in one place and passed
/// explicitly. A short-lived current-thread id is the only scheduler state.
pub struct VirtualMachine {
    pub config: VmConfig,
    pub interner: Arc<ThreadedRodeo>,
    pub heap: Heap,
    pub method_area: MethodArea,
    pub threads: Vec<VmThread>,
    pub current_thread: Option<ThreadId>,
    pub monitors: MonitorPool,
    pub native_registry: crate::native::NativeRegistry,
    pub br: Arc<BootstrapRegistry>,
    pub transient_roots: RootStack,
    pub permanent_roots: RootStack,
    /// Backtraces captured at throwable creation, keyed by the (non-moving)
    /// throwable ref; swept alongside the throwable.
    pub backtraces: HashMap<HeapRef, Vec<BacktraceEntry>>,
    pub jdwp: DebugAgent,
    pub console: Box<dyn Console>,
    /// Pre-reserved OutOfMemoryError thrown when a GC retry was not enough.
    pub emergency_oom: HeapRef,
    pub exit_status: Option<i32>,
    pub gc_cycles: u64,
}

impl VirtualMachine {
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        let providers: Vec<Box<dyn ClassProvider>> = config
            .class_path
            .iter()
            .map(|root| {
                Box::new(crate::class_loader::DirectoryProvider::new(root.as_str()))
                    as Box<dyn ClassProvider>
            })
            .collect();
        Self::build(config, providers, Box::new(StdConsole))
    }

    /// Embedding/test entry: extra providers are searched after the boot
    /// images, before the classpath directories.
    pub fn build(
        config: VmConfig,
        extra_providers: Vec<Box<dyn ClassProvider>>,
        console: Box<dyn Console>,
    ) -> Result<Self, VmError> {
        let interner = Arc::new(ThreadedRodeo::default());
        let mut providers: Vec<Box<dyn ClassProvider>> =
            vec![Box::new(crate::class_loader::boot::BootClassProvider::new())];
        providers.extend(extra_providers);

        let (method_area, br) = MethodArea::init(interner.clone(), providers)?;
        let heap = Heap::new(config.clamped_heap_size(), interner.clone())?;

        // Wire the string facts the heap needs before the first allocation.
        let string_class_id = br.get_java_lang_string_id()?;
        let string_class = method_area.get_instance_class(&string_class_id)?;
        heap.set_string_support(StringSupport {
            string_class_id,
            char_array_class_id: br.get_char_array_class_id()?,
            instance_size: string_class.get_instance_size()?,
            value_offset: string_class
                .get_instance_field(&br.string_value_fk)?
                .offset,
        });

        let native_registry = crate::native::NativeRegistry::with_defaults(interner.clone());
        let transient_roots = RootStack::new(config.transient_roots_depth, "transient");
        let permanent_roots = RootStack::new(config.permanent_roots_depth, "permanent");

        let mut vm = Self {
            interner,
            heap,
            method_area,
            threads: Vec::new(),
            current_thread: None,
            monitors: MonitorPool::new(),
            native_registry,
            br,
            transient_roots,
            permanent_roots,
            backtraces: HashMap::new(),
            jdwp: DebugAgent::new(),
            console,
            emergency_oom: 0,
            exit_status: None,
            gc_cycles: 0,
            config,
        };
        vm.finish_bootstrap()?;
        Ok(vm)
    }

    fn finish_bootstrap(&mut self) -> Result<(), VmError> {
        debug_log!("Bootstrapping runtime objects...");

        // The emergency throwable must exist before anything can run dry.
        let oom_sym = self
            .interner
            .get_or_intern(JavaExceptionKind::OutOfMemoryError.class_name());
        let oom_class = self.method_area.get_class_id_or_load(oom_sym)?;
        let oom = self.new_instance(oom_class)?;
        self.permanent_roots.push(oom)?;
        self.emergency_oom = oom;

        // System.out / System.err print streams.
        let ps_class = self
            .method_area
            .get_class_id_or_load(self.br.java_io_print_stream_sym)?;
        let fd_offset = {
            let class = self.method_area.get_instance_class(&ps_class)?;
            class.get_instance_field(&self.br.print_stream_fd_fk)?.offset
        };
        let out = self.new_instance(ps_class)?;
        self.permanent_roots.push(out)?;
        let err = self.new_instance(ps_class)?;
        self.permanent_roots.push(err)?;
        self.heap
            .write_field(out, fd_offset, Value::Integer(1), crate::jtype::AllocationType::Int)?;
        self.heap
            .write_field(err, fd_offset, Value::Integer(2), crate::jtype::AllocationType::Int)?;
        let system_id = self.br.get_java_lang_system_id()?;
        let system = self.method_area.get_instance_class(&system_id)?;
        system.set_static_field_value(&self.br.system_out_fk, Value::Ref(out))?;
        system.set_static_field_value(&self.br.system_err_fk, Value::Ref(err))?;

        // The primordial thread.
        let main_obj = self.new_thread_object("main")?;
        self.permanent_roots.push(main_obj)?;
        let main_tid = self.register_thread("main".to_string(), main_obj);
        self.current_thread = Some(main_tid);
        Ok(())
    }

    /// Allocates and fills a java/lang/Thread instance.
    pub fn new_thread_object(&mut self, name: &str) -> Result<HeapRef, VmError> {
        let thread_class = self.br.get_java_lang_thread_id()?;
        let obj = self.new_instance(thread_class)?;
        let mark = self.transient_roots.mark();
        self.transient_roots.push(obj)?;
        let name_ref = self.new_string(name)?;
        let (name_offset, priority_offset) = {
            let class = self.method_area.get_instance_class(&thread_class)?;
            (
                class.get_instance_field(&self.br.thread_name_fk)?.offset,
                class.get_instance_field(&self.br.thread_priority_fk)?.offset,
            )
        };
        self.heap.write_field(
            obj,
            name_offset,
            Value::Ref(name_ref),
            crate::jtype::AllocationType::Reference,
        )?;
        self.heap.write_field(
            obj,
            priority_offset,
            Value::Integer(NORM_PRIORITY),
            crate::jtype::AllocationType::Int,
        )?;
        self.transient_roots.release_to(mark);
        Ok(obj)
    }

    pub fn register_thread(&mut self, name: String, thread_obj: HeapRef) -> ThreadId {
        let tid = ThreadId::from_usize(self.threads.len() + 1);
        self.threads.push(VmThread::new(tid, name, thread_obj));
        tid
    }

    pub fn thread(&self, tid: ThreadId) -> &VmThread {
        &self.threads[tid.to_index()]
    }

    pub fn thread_mut(&mut self, tid: ThreadId) -> &mut VmThread {
        &mut self.threads[tid.to_index()]
    }

    pub fn thread_for_obj(&self, thread_obj: HeapRef) -> Option<ThreadId> {
        self.threads
            .iter()
            .find(|t| t.thread_obj == thread_obj)
            .map(|t| t.id)
    }

    // -- allocation with collection retry ------------------------------------

    fn retry_alloc<F>(&mut self, op: F) -> Result<HeapRef, VmError>
    where
        F: Fn(&mut Self) -> Result<HeapRef, VmError>,
    {
        if self.config.gc_on_every_alloc {
            gc::collect(self);
        }
        match op(self) {
            Err(VmError::OutOfMemory) => {
                debug_log!("Allocation failed, collecting...");
                gc::collect(self);
                match op(self) {
                    Err(VmError::OutOfMemory) => {
                        Err(VmError::JavaExceptionThrown(self.emergency_oom))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    pub fn new_instance(&mut self, class_id: ClassId) -> Result<HeapRef, VmError> {
        let (size, alloc_type) = {
            let class = self.method_area.get_instance_class(&class_id)?;
            let alloc_type = if class.is_reference_kind() {
                AllocType::WeakRef
            } else {
                AllocType::Object
            };
            (class.get_instance_size()?, alloc_type)
        };
        self.retry_alloc(|vm| vm.heap.alloc_instance(class_id, size, alloc_type))
    }

    pub fn new_primitive_array(
        &mut self,
        element: PrimitiveType,
        length: i32,
    ) -> Result<HeapRef, VmError> {
        if length < 0 {
            return throw_exception!(NegativeArraySizeException, "{}", length);
        }
        let descriptor = format!("[{}", element.descriptor_char());
        let name = self.interner.get_or_intern(descriptor);
        let class_id = self.method_area.get_class_id_or_load(name)?;
        self.retry_alloc(|vm| {
            vm.heap
                .alloc_primitive_array(class_id, element.as_allocation_type(), length)
        })
    }

    pub fn new_object_array(
        &mut self,
        array_class_id: ClassId,
        length: i32,
    ) -> Result<HeapRef, VmError> {
        if length < 0 {
            return throw_exception!(NegativeArraySizeException, "{}", length);
        }
        self.retry_alloc(|vm| vm.heap.alloc_object_array(array_class_id, length))
    }

    /// Array class whose component is the given class (`X` -> `[LX;`,
    /// `[X` -> `[[X`).
    pub fn array_class_of(&mut self, component: ClassId) -> Result<ClassId, VmError> {
        let component_name = self.interner.resolve(&self.method_area.get_class(&component).name());
        let descriptor = if component_name.starts_with('[') {
            format!("[{component_name}")
        } else {
            format!("[L{component_name};")
        };
        let name = self.interner.get_or_intern(descriptor);
        self.method_area.get_class_id_or_load(name)
    }

    pub fn new_string(&mut self, s: &str) -> Result<HeapRef, VmError> {
        let owned = s.to_string();
        self.retry_alloc(move |vm| vm.heap.alloc_string(&owned, false))
    }

    pub fn intern(&mut self, sym: Symbol) -> Result<HeapRef, VmError> {
        self.retry_alloc(move |vm| vm.heap.intern_string(sym))
    }

    pub fn mirror(&mut self, class_id: ClassId) -> Result<HeapRef, VmError> {
        match self
            .method_area
            .get_mirror_ref_or_create(class_id, &mut self.heap)
        {
            Err(VmError::OutOfMemory) => {
                gc::collect(self);
                match self
                    .method_area
                    .get_mirror_ref_or_create(class_id, &mut self.heap)
                {
                    Err(VmError::OutOfMemory) => {
                        Err(VmError::JavaExceptionThrown(self.emergency_oom))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    // -- throwables ----------------------------------------------------------

    /// Materializes a VM-decided exception as a heap throwable with a
    /// captured backtrace. Does not run `<init>`; the message field is set
    /// directly, the way the original fills internal throwables.
    pub fn create_throwable(
        &mut self,
        tid: ThreadId,
        kind: JavaExceptionKind,
        message: Option<&str>,
    ) -> Result<HeapRef, VmError> {
        let class_sym = self.interner.get_or_intern(kind.class_name());
        let class_id = self.method_area.get_class_id_or_load(class_sym)?;
        let obj = self.new_instance(class_id)?;
        let mark = self.transient_roots.mark();
        self.transient_roots.push(obj)?;

        if let Some(message) = message {
            let message_ref = self.new_string(message)?;
            let offset = self
                .method_area
                .get_instance_class(&class_id)?
                .get_instance_field(&self.br.throwable_message_fk)?
                .offset;
            self.heap.write_field(
                obj,
                offset,
                Value::Ref(message_ref),
                crate::jtype::AllocationType::Reference,
            )?;
        }

        let backtrace = self.capture_backtrace(tid);
        self.backtraces.insert(obj, backtrace);
        self.transient_roots.release_to(mark);
        Ok(obj)
    }

    /// Records `(class, method, file?, line?)` from the current frame to the
    /// bottom of the thread's stack.
    pub fn capture_backtrace(&self, tid: ThreadId) -> Vec<BacktraceEntry> {
        let thread = self.thread(tid);
        thread
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let method = self.method_area.get_method(&frame.method_id);
                let class = self.method_area.get_class(&method.class_id());
                BacktraceEntry {
                    class_name: class.name(),
                    method_name: method.name,
                    file_name: class.as_class_like().get_source_file(),
                    line: method.line_for_pc(frame.pc),
                }
            })
            .collect()
    }

    pub fn read_throwable_message(&self, throwable: HeapRef) -> Option<String> {
        let class_id = self.heap.get_class_id(throwable).ok()?;
        let offset = self
            .method_area
            .get_instance_class(&class_id)
            .ok()?
            .get_instance_field(&self.br.throwable_message_fk)
            .ok()?
            .offset;
        match self
            .heap
            .read_field(throwable, offset, crate::jtype::AllocationType::Reference)
        {
            Ok(Value::Ref(s)) => self.heap.read_string(s).ok(),
            _ => None,
        }
    }

    // -- main loop -----------------------------------------------------------

    fn launch_main(&mut self) -> Result<(), VmError> {
        let main_class = self.config.main_class.replace('.', "/");
        let main_sym = self.interner.get_or_intern(&main_class);
        let class_id = self
            .method_area
            .get_class_id_or_load(main_sym)
            .map_err(|_| VmError::MainClassNotFound(main_class.clone()))?;
        let method_id = self
            .method_area
            .resolve_direct_method(class_id, &self.br.main_mk)
            .map_err(|_| VmError::MainClassNotFound(format!("{main_class}.main")))?;

        let string_array_sym = self.br.string_array_desc;
        let args_class = self.method_area.get_class_id_or_load(string_array_sym)?;
        let args = self.new_object_array(args_class, 0)?;
        self.permanent_roots.push(args)?;

        let main_tid = self.current_thread.expect("bootstrap created main");
        interpreter::push_entry_frame(self, main_tid, method_id, vec![Value::Ref(args)])?;
        Ok(())
    }

    pub fn run(&mut self) -> Result<i32, VmError> {
        self.launch_main()?;
        if self.config.jdwp.is_some() {
            jdwp::open_session(self)?;
            jdwp::events::report_vm_start(self)?;
        }

        loop {
            if self.exit_status.is_some() {
                break;
            }
            jdwp::pump(self)?;
            scheduler::wake_sleepers(&mut self.threads, &mut self.monitors, Instant::now());

            match scheduler::pick_next(&self.threads, self.current_thread) {
                Some(tid) => {
                    self.current_thread = Some(tid);
                    interpreter::run_quantum(self, tid, QUANTUM)?;
                }
                None => {
                    if !self.threads.iter().any(|t| t.is_alive()) {
                        break;
                    }
                    let deadline = scheduler::nearest_deadline(&self.threads);
                    let timeout = deadline
                        .map(|d| d.saturating_duration_since(Instant::now()))
                        .unwrap_or(Duration::from_millis(50));
                    if self.jdwp.session_active() {
                        jdwp::pump_with_timeout(self, timeout.max(Duration::from_millis(1)))?;
                    } else if deadline.is_some() {
                        std::thread::sleep(timeout);
                    } else {
                        warn!("all live threads are parked with nothing to wake them; exiting");
                        break;
                    }
                }
            }
        }

        jdwp::events::report_vm_death(self)?;
        jdwp::close_session(self);
        Ok(self.exit_status.unwrap_or(exit_code::OK))
    }
}

/// Library entry point: build a VM from the configuration and run it to
/// completion, returning the process exit code.
pub fn start(config: VmConfig) -> Result<i32, VmError> {
    let mut vm = VirtualMachine::new(config)?;
    vm.run()
}
