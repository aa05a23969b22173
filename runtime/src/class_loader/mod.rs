use crate::classfile::{reader, ClassFile};
use crate::error::VmError;
use crate::debug_log;
use std::collections::HashMap;
use std::path::PathBuf;

pub mod boot;

/// The byte-source collaborator: yields verified class structures by
/// internal-form name. The core never touches the filesystem itself.
pub trait ClassProvider: Send {
    fn find_class(&self, name: &str) -> Result<Option<ClassFile>, VmError>;
}

/// Classpath directory provider. The tree is indexed once at startup; a
/// lookup is a map probe plus a read and parse.
pub struct DirectoryProvider {
    index: HashMap<String, PathBuf>,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let mut index = HashMap::new();
        for entry in walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "class") {
                if let Ok(relative) = path.strip_prefix(&root) {
                    let name = relative
                        .with_extension("")
                        .to_string_lossy()
                        .replace(std::path::MAIN_SEPARATOR, "/");
                    index.insert(name, path.to_path_buf());
                }
            }
        }
        debug_log!("Indexed {} classes under {:?}", index.len(), root);
        Self { index }
    }
}

impl ClassProvider for DirectoryProvider {
    fn find_class(&self, name: &str) -> Result<Option<ClassFile>, VmError> {
        let Some(path) = self.index.get(name) else {
            return Ok(None);
        };
        let bytes = std::fs::read(path)
            .map_err(|e| VmError::ClassFormat(format!("cannot read {path:?}: {e}")))?;
        reader::parse(&bytes).map(Some)
    }
}

/// In-memory provider for embedding and tests: hand it synthesized
/// `ClassFile`s keyed by internal-form name.
#[derive(Default)]
pub struct MemoryProvider {
    classes: HashMap<String, ClassFile>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cf: ClassFile) -> &mut Self {
        let name = cf
            .class_name()
            .expect("synthesized class must name itself")
            .to_string();
        self.classes.insert(name, cf);
        self
    }
}

impl ClassProvider for MemoryProvider {
    fn find_class(&self, name: &str) -> Result<Option<ClassFile>, VmError> {
        Ok(self.classes.get(name).cloned())
    }
}
