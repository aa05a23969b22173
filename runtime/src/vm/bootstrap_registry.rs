use crate::error::VmError;
use crate::keys::{ClassId, FieldKey, MethodKey, Symbol};
use lasso::ThreadedRodeo;
use once_cell::sync::OnceCell;

/// Pre-interned names, keys and well-known class ids the runtime touches on
/// hot paths or during bootstrap.
pub struct BootstrapRegistry {
    // Method keys
    pub main_mk: MethodKey,
    pub run_mk: MethodKey,
    pub to_string_mk: MethodKey,

    // Field keys
    pub string_value_fk: FieldKey,
    pub throwable_message_fk: FieldKey,
    pub thread_target_fk: FieldKey,
    pub thread_name_fk: FieldKey,
    pub thread_priority_fk: FieldKey,
    pub reference_referent_fk: FieldKey,
    pub reference_queue_fk: FieldKey,
    pub queue_head_fk: FieldKey,
    pub queue_next_fk: FieldKey,
    pub system_out_fk: FieldKey,
    pub system_err_fk: FieldKey,
    pub print_stream_fd_fk: FieldKey,
    pub ste_declaring_class_fk: FieldKey,
    pub ste_method_name_fk: FieldKey,
    pub ste_file_name_fk: FieldKey,
    pub ste_line_number_fk: FieldKey,

    // Class names
    pub java_lang_object_sym: Symbol,
    pub java_lang_class_sym: Symbol,
    pub java_lang_string_sym: Symbol,
    pub java_lang_throwable_sym: Symbol,
    pub java_lang_thread_sym: Symbol,
    pub java_lang_runnable_sym: Symbol,
    pub java_lang_system_sym: Symbol,
    pub java_lang_ref_reference_sym: Symbol,
    pub java_lang_ref_weak_reference_sym: Symbol,
    pub java_lang_stack_trace_element_sym: Symbol,
    pub java_io_print_stream_sym: Symbol,

    // Member names
    pub init_sym: Symbol,
    pub clinit_sym: Symbol,
    pub main_sym: Symbol,
    pub run_sym: Symbol,

    // Descriptors
    pub void_desc: Symbol,
    pub string_desc: Symbol,
    pub char_array_desc: Symbol,
    pub string_array_desc: Symbol,
    pub main_desc: Symbol,

    // Core class ids, set during bootstrap
    java_lang_object_id: OnceCell<ClassId>,
    java_lang_class_id: OnceCell<ClassId>,
    java_lang_string_id: OnceCell<ClassId>,
    java_lang_throwable_id: OnceCell<ClassId>,
    java_lang_thread_id: OnceCell<ClassId>,
    java_lang_system_id: OnceCell<ClassId>,
    char_array_class_id: OnceCell<ClassId>,
}

macro_rules! id_accessors {
    ($($field:ident => ($get:ident, $set:ident)),* $(,)?) => {
        $(
            pub fn $get(&self) -> Result<ClassId, VmError> {
                self.$field
                    .get()
                    .copied()
                    .ok_or_else(|| VmError::Internal(concat!(stringify!($field), " not bootstrapped").to_string()))
            }

            pub fn $set(&self, id: ClassId) -> Result<(), VmError> {
                self.$field
                    .set(id)
                    .map_err(|_| VmError::Internal(concat!(stringify!($field), " already set").to_string()))
            }
        )*
    };
}

impl BootstrapRegistry {
    pub fn new(interner: &ThreadedRodeo) -> Self {
        let init_sym = interner.get_or_intern("<init>");
        let clinit_sym = interner.get_or_intern("<clinit>");
        let main_sym = interner.get_or_intern("main");
        let run_sym = interner.get_or_intern("run");

        let void_desc = interner.get_or_intern("()V");
        let string_desc = interner.get_or_intern("Ljava/lang/String;");
        let char_array_desc = interner.get_or_intern("[C");
        let string_array_desc = interner.get_or_intern("[Ljava/lang/String;");
        let main_desc = interner.get_or_intern("([Ljava/lang/String;)V");
        let int_desc = interner.get_or_intern("I");
        let object_desc = interner.get_or_intern("Ljava/lang/Object;");
        let print_stream_desc = interner.get_or_intern("Ljava/io/PrintStream;");
        let runnable_desc = interner.get_or_intern("Ljava/lang/Runnable;");
        let queue_desc = interner.get_or_intern("Ljava/lang/ref/ReferenceQueue;");
        let reference_desc = interner.get_or_intern("Ljava/lang/ref/Reference;");

        Self {
            main_mk: MethodKey {
                name: main_sym,
                desc: main_desc,
            },
            run_mk: MethodKey {
                name: run_sym,
                desc: void_desc,
            },
            to_string_mk: MethodKey {
                name: interner.get_or_intern("toString"),
                desc: interner.get_or_intern("()Ljava/lang/String;"),
            },

            string_value_fk: FieldKey {
                name: interner.get_or_intern("value"),
                desc: char_array_desc,
            },
            throwable_message_fk: FieldKey {
                name: interner.get_or_intern("message"),
                desc: string_desc,
            },
            thread_target_fk: FieldKey {
                name: interner.get_or_intern("target"),
                desc: runnable_desc,
            },
            thread_name_fk: FieldKey {
                name: interner.get_or_intern("name"),
                desc: string_desc,
            },
            thread_priority_fk: FieldKey {
                name: interner.get_or_intern("priority"),
                desc: int_desc,
            },
            reference_referent_fk: FieldKey {
                name: interner.get_or_intern("referent"),
                desc: object_desc,
            },
            reference_queue_fk: FieldKey {
                name: interner.get_or_intern("queue"),
                desc: queue_desc,
            },
            queue_head_fk: FieldKey {
                name: interner.get_or_intern("head"),
                desc: reference_desc,
            },
            queue_next_fk: FieldKey {
                name: interner.get_or_intern("next"),
                desc: reference_desc,
            },
            system_out_fk: FieldKey {
                name: interner.get_or_intern("out"),
                desc: print_stream_desc,
            },
            system_err_fk: FieldKey {
                name: interner.get_or_intern("err"),
                desc: print_stream_desc,
            },
            print_stream_fd_fk: FieldKey {
                name: interner.get_or_intern("fd"),
                desc: int_desc,
            },
            ste_declaring_class_fk: FieldKey {
                name: interner.get_or_intern("declaringClass"),
                desc: string_desc,
            },
            ste_method_name_fk: FieldKey {
                name: interner.get_or_intern("methodName"),
                desc: string_desc,
            },
            ste_file_name_fk: FieldKey {
                name: interner.get_or_intern("fileName"),
                desc: string_desc,
            },
            ste_line_number_fk: FieldKey {
                name: interner.get_or_intern("lineNumber"),
                desc: int_desc,
            },

            java_lang_object_sym: interner.get_or_intern("java/lang/Object"),
            java_lang_class_sym: interner.get_or_intern("java/lang/Class"),
            java_lang_string_sym: interner.get_or_intern("java/lang/String"),
            java_lang_throwable_sym: interner.get_or_intern("java/lang/Throwable"),
            java_lang_thread_sym: interner.get_or_intern("java/lang/Thread"),
            java_lang_runnable_sym: interner.get_or_intern("java/lang/Runnable"),
            java_lang_system_sym: interner.get_or_intern("java/lang/System"),
            java_lang_ref_reference_sym: interner.get_or_intern("java/lang/ref/Reference"),
            java_lang_ref_weak_reference_sym: interner.get_or_intern("java/lang/ref/WeakReference"),
            java_lang_stack_trace_element_sym: interner
                .get_or_intern("java/lang/StackTraceElement"),
            java_io_print_stream_sym: interner.get_or_intern("java/io/PrintStream"),

            init_sym,
            clinit_sym,
            main_sym,
            run_sym,

            void_desc,
            string_desc,
            char_array_desc,
            string_array_desc,
            main_desc,

            java_lang_object_id: OnceCell::new(),
            java_lang_class_id: OnceCell::new(),
            java_lang_string_id: OnceCell::new(),
            java_lang_throwable_id: OnceCell::new(),
            java_lang_thread_id: OnceCell::new(),
            java_lang_system_id: OnceCell::new(),
            char_array_class_id: OnceCell::new(),
        }
    }

    id_accessors! {
        java_lang_object_id => (get_java_lang_object_id, set_java_lang_object_id),
        java_lang_class_id => (get_java_lang_class_id, set_java_lang_class_id),
        java_lang_string_id => (get_java_lang_string_id, set_java_lang_string_id),
        java_lang_throwable_id => (get_java_lang_throwable_id, set_java_lang_throwable_id),
        java_lang_thread_id => (get_java_lang_thread_id, set_java_lang_thread_id),
        java_lang_system_id => (get_java_lang_system_id, set_java_lang_system_id),
        char_array_class_id => (get_char_array_class_id, set_char_array_class_id),
    }
}
