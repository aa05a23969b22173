/// Heap bounds. The upper bound is what the 24-bit chunk size field can
/// address; the lower bound keeps the boot classes loadable.
pub const MIN_HEAP_SIZE: usize = 256 * 1024;
pub const MAX_HEAP_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub main_class: String,
    pub class_path: Vec<String>,
    /// Requested heap size in bytes; clamped to `[MIN_HEAP_SIZE, MAX_HEAP_SIZE]`.
    pub heap_size: usize,
    /// Maximum call-stack depth (frames) per thread.
    pub stack_quota: usize,
    pub transient_roots_depth: usize,
    pub permanent_roots_depth: usize,
    /// Force a full collection before every allocation. Debug builds only in
    /// spirit, but always honored.
    pub gc_on_every_alloc: bool,
    /// Exit the process when the last non-daemon thread dies of an uncaught
    /// throwable.
    pub exit_on_uncaught: bool,
    pub jdwp: Option<JdwpConfig>,
}

#[derive(Debug, Clone)]
pub struct JdwpConfig {
    /// Transport adapter name; `dt_socket` is the only built-in.
    pub transport: String,
    /// `host:port` when attaching, `port` when listening.
    pub address: String,
    /// Listen for a debugger instead of attaching to one.
    pub server: bool,
    /// Hold every thread suspended until the debugger resumes them.
    pub suspend_on_start: bool,
}

impl VmConfig {
    pub fn new(main_class: impl Into<String>) -> Self {
        Self {
            main_class: main_class.into(),
            class_path: Vec::new(),
            heap_size: MIN_HEAP_SIZE,
            stack_quota: 512,
            transient_roots_depth: 64,
            permanent_roots_depth: 128,
            gc_on_every_alloc: false,
            exit_on_uncaught: true,
            jdwp: None,
        }
    }

    pub fn clamped_heap_size(&self) -> usize {
        self.heap_size.clamp(MIN_HEAP_SIZE, MAX_HEAP_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_size_is_clamped_to_the_addressable_range() {
        let mut config = VmConfig::new("Main");
        config.heap_size = 1;
        assert_eq!(config.clamped_heap_size(), MIN_HEAP_SIZE);
        config.heap_size = usize::MAX;
        assert_eq!(config.clamped_heap_size(), MAX_HEAP_SIZE);
    }
}
