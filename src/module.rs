//! Module loader.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::ordered_map::OrderedMap;
use crate::value::function::FunctionValue;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Loading,
    Loaded,
}

/// A loaded (or loading) module: name, path, exports, own namespace, load
/// state.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub path: PathBuf,
    pub exports: OrderedMap<Value>,
    pub namespace: OrderedMap<Value>,
    pub state: ModuleState,
}

impl Module {
    fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
            exports: OrderedMap::new(),
            namespace: OrderedMap::new(),
            state: ModuleState::Unloaded,
        }
    }
}

/// Compiles Slate source into a top-level callable. The lexer/parser/code
/// generator are external collaborators; this trait is the seam the
/// loader calls through, so that the resolution/caching/namespace-isolation
/// logic below is independently testable with a stand-in compiler.
pub trait ModuleCompiler {
    fn compile(&self, source: &str, path: &Path) -> Result<Rc<FunctionValue>, RuntimeError>;
}

/// A function that, given a freshly-created `Module`'s namespace, runs the
/// module's compiled top-level function with that namespace active and
/// returns `Ok(())` on success. This is supplied by the VM (see
/// `vm::Vm::load_module`), which is the only place both the frame/operand
/// stacks and the module-context stack exist together: the loader shares
/// the outer VM's stacks for this.
pub trait ModuleExecutor {
    fn execute(
        &mut self,
        top_level: Rc<FunctionValue>,
        module: &Rc<RefCell<Module>>,
    ) -> Result<(), RuntimeError>;
}

/// Resolution order: (1) relative to a caller-supplied current directory,
/// (2) as a working-directory-relative path, (3) under an `examples/`
/// prefix, (4) each VM search-path entry in order. The first regular file
/// found wins.
pub fn resolve_module_path(
    dotted: &str,
    current_dir: Option<&Path>,
    search_path: &[PathBuf],
) -> Option<PathBuf> {
    let relative = dotted.replace('.', std::path::MAIN_SEPARATOR_STR);
    let file_name = format!("{relative}.slate");

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = current_dir {
        candidates.push(dir.join(&file_name));
    }
    candidates.push(PathBuf::from(&file_name));
    candidates.push(Path::new("examples").join(&file_name));
    for root in search_path {
        candidates.push(root.join(&file_name));
    }

    candidates.into_iter().find(|p| p.is_file())
}

/// The module cache plus reentrancy tracking.
#[derive(Default)]
pub struct ModuleLoader {
    cache: HashMap<String, Rc<RefCell<Module>>>,
    pub search_path: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            search_path: env_search_path(),
        }
    }

    pub fn get_cached(&self, dotted: &str) -> Option<Rc<RefCell<Module>>> {
        self.cache.get(dotted).cloned()
    }

    /// Load (or fetch from cache) the module named `dotted`. `current_dir`
    /// is the directory relative to which a bare import is first tried.
    pub fn load(
        &mut self,
        dotted: &str,
        current_dir: Option<&Path>,
        compiler: &dyn ModuleCompiler,
        executor: &mut dyn ModuleExecutor,
    ) -> Result<Rc<RefCell<Module>>, RuntimeError> {
        if let Some(hit) = self.cache.get(dotted) {
            if hit.borrow().state == ModuleState::Loaded {
                return Ok(hit.clone());
            }
            if hit.borrow().state == ModuleState::Loading {
                return Err(RuntimeError::import_error(format!(
                    "circular import of module `{dotted}`"
                )));
            }
        }

        let path = resolve_module_path(dotted, current_dir, &self.search_path).ok_or_else(|| {
            RuntimeError::import_error(format!("module `{dotted}` not found on SLATE_PATH"))
        })?;

        let module = Rc::new(RefCell::new(Module::new(dotted, path.clone())));
        module.borrow_mut().state = ModuleState::Loading;
        self.cache.insert(dotted.to_string(), module.clone());

        let result = (|| -> Result<(), RuntimeError> {
            let source = std::fs::read_to_string(&path).map_err(|e| {
                RuntimeError::import_error(format!("reading `{}`: {e}", path.display()))
            })?;
            let top_level = compiler.compile(&source, &path)?;
            executor.execute(top_level, &module)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                {
                    let mut m = module.borrow_mut();
                    let exported: Vec<(String, Value)> = m
                        .namespace
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.clone()))
                        .collect();
                    for (k, v) in exported {
                        m.exports.insert(k, v);
                    }
                    m.state = ModuleState::Loaded;
                }
                Ok(module)
            }
            Err(e) => {
                self.cache.remove(dotted);
                Err(e)
            }
        }
    }
}

fn env_search_path() -> Vec<PathBuf> {
    let separator = if cfg!(windows) { ';' } else { ':' };
    std::env::var("SLATE_PATH")
        .ok()
        .map(|raw| {
            raw.split(separator)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Which `IMPORT_MODULE` form is being applied.
pub enum ImportForm<'a> {
    Wildcard,
    Namespace { local_name: &'a str },
    Specific { specifiers: &'a [(String, String)] },
}

/// Apply an import form by mutating the active namespace in place. Caller
/// resolves `ImportForm::Namespace`'s "retry as parent+final-segment" and
/// "module load failed" fallbacks (those need another `load` call, which
/// only the VM can drive with its executor/compiler in hand).
pub fn apply_import(
    form: ImportForm<'_>,
    module: &Module,
    active_namespace: &mut OrderedMap<Value>,
) -> Result<(), RuntimeError> {
    match form {
        ImportForm::Wildcard => {
            for (k, v) in module.exports.iter() {
                active_namespace.insert(k.to_string(), v.clone());
            }
            Ok(())
        }
        ImportForm::Namespace { local_name } => {
            let mut obj = crate::value::container::ObjectValue::new();
            for (k, v) in module.exports.iter() {
                obj.entries.insert(k.to_string(), v.clone());
            }
            active_namespace.insert(local_name.to_string(), Value::new_object(obj));
            Ok(())
        }
        ImportForm::Specific { specifiers } => {
            for (export_name, local_name) in specifiers {
                let value = module.exports.get(export_name).cloned().ok_or_else(|| {
                    RuntimeError::import_error(format!(
                        "module `{}` has no export `{export_name}`",
                        module.name
                    ))
                })?;
                active_namespace.insert(local_name.clone(), value);
            }
            Ok(())
        }
    }
}
