//! Resolution of INCLUDE and WRAPPER targets.
//!
//! The VM asks a [`Loader`] for a compiled [`Program`] by name. Loaders cache
//! what they compile; the caches are shared between concurrent renders and
//! tolerate concurrent populate (two threads may compile the same template,
//! the last insert wins).

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
    time::SystemTime,
};

use ahash::AHashMap;

use crate::{
    bytecode::{Program, compile},
    error::LoadError,
    node::Node,
    source::Source,
};

/// Resolves template names to compiled programs.
pub trait Loader: fmt::Debug + Send + Sync {
    fn load(&self, name: &str) -> Result<Arc<Program>, LoadError>;
}

/// Turns template text into a syntax tree.
///
/// The markup grammar lives outside this crate; hosts plug their parser in here.
pub trait TemplateParser: fmt::Debug + Send + Sync {
    /// # Errors
    /// Returns a human-readable message when `text` is not a valid template.
    fn parse(&self, text: &str, source: &Source) -> Result<Node, String>;
}

/// Reads templates stored as JSON-serialized syntax trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTreeParser;

impl TemplateParser for JsonTreeParser {
    fn parse(&self, text: &str, _source: &Source) -> Result<Node, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

/// Loader for hosts without sub-templates: every load fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLoader;

impl Loader for NullLoader {
    fn load(&self, name: &str) -> Result<Arc<Program>, LoadError> {
        Err(LoadError::NotFound {
            name: name.to_owned(),
            searched: Vec::new(),
        })
    }
}

/// Templates registered as syntax trees, compiled on first use.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    trees: RwLock<AHashMap<String, (Node, Source)>>,
    compiled: RwLock<AHashMap<String, Arc<Program>>>,
}

impl MemoryLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tree` under `name`, replacing any earlier template and its
    /// compiled program.
    pub fn insert(&self, name: impl Into<String>, tree: Node, source: Source) {
        let name = name.into();
        // lock order is trees, then compiled, in both insert and load
        let mut trees = self.trees.write().unwrap_or_else(PoisonError::into_inner);
        self.compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name);
        trees.insert(name, (tree, source));
    }

    /// Builder form of [`insert`](Self::insert) with an anonymous source.
    #[must_use]
    pub fn with(self, name: impl Into<String>, tree: Node) -> Self {
        self.insert(name, tree, Source::Anonymous);
        self
    }

    /// Number of templates compiled so far.
    #[must_use]
    pub fn compiled_count(&self) -> usize {
        self.compiled.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Loader for MemoryLoader {
    fn load(&self, name: &str) -> Result<Arc<Program>, LoadError> {
        if let Some(program) = self.compiled.read().unwrap_or_else(PoisonError::into_inner).get(name) {
            return Ok(Arc::clone(program));
        }
        // stays read-locked until the program is cached; insert evicts under the write lock
        let trees = self.trees.read().unwrap_or_else(PoisonError::into_inner);
        let Some((tree, source)) = trees.get(name) else {
            return Err(LoadError::NotFound {
                name: name.to_owned(),
                searched: Vec::new(),
            });
        };
        let program = compile(tree, source.clone()).map_err(|error| LoadError::Compile {
            name: name.to_owned(),
            error,
        })?;
        let program = Arc::new(program);
        self.compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), Arc::clone(&program));
        Ok(program)
    }
}

/// How [`FileLoader`] reuses compiled templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CacheMode {
    /// Every load reads and compiles the file again.
    NoCache,
    /// Cached programs are recompiled when the file's mtime changes.
    #[default]
    CheckUpdates,
    /// Cached programs are used until the loader is dropped.
    NoUpdateCheck,
}

#[derive(Debug)]
struct CacheEntry {
    program: Arc<Program>,
    mtime: Option<SystemTime>,
}

/// Loads template files from a list of include paths, searched in order.
#[derive(Debug)]
pub struct FileLoader {
    include_paths: Vec<PathBuf>,
    parser: Arc<dyn TemplateParser>,
    mode: CacheMode,
    /// Keyed by resolved file path.
    cache: RwLock<AHashMap<PathBuf, CacheEntry>>,
}

impl FileLoader {
    #[must_use]
    pub fn new(include_paths: Vec<PathBuf>, parser: Arc<dyn TemplateParser>) -> Self {
        Self {
            include_paths,
            parser,
            mode: CacheMode::default(),
            cache: RwLock::new(AHashMap::new()),
        }
    }

    #[must_use]
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    /// Number of cached programs.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops every cached program.
    pub fn clear_cache(&self) {
        self.cache.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn cached(&self, path: &Path) -> Option<Arc<Program>> {
        if self.mode == CacheMode::NoCache {
            return None;
        }
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.get(path)?;
        if self.mode == CacheMode::CheckUpdates && modified(path) != entry.mtime {
            return None;
        }
        Some(Arc::clone(&entry.program))
    }

    fn compile_file(&self, name: &str, path: &Path) -> Result<Arc<Program>, LoadError> {
        // mtime first, so a write racing with the read forces a reload next time
        let mtime = modified(path);
        let text = fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_owned(),
            message: e.to_string(),
        })?;
        let source = Source::from_file(path);
        let tree = self.parser.parse(&text, &source).map_err(|message| LoadError::Parse {
            name: name.to_owned(),
            message,
        })?;
        let program = compile(&tree, source).map_err(|error| LoadError::Compile {
            name: name.to_owned(),
            error,
        })?;
        let program = Arc::new(program);
        if self.mode != CacheMode::NoCache {
            self.cache.write().unwrap_or_else(PoisonError::into_inner).insert(
                path.to_owned(),
                CacheEntry {
                    program: Arc::clone(&program),
                    mtime,
                },
            );
        }
        Ok(program)
    }
}

impl Loader for FileLoader {
    fn load(&self, name: &str) -> Result<Arc<Program>, LoadError> {
        for dir in &self.include_paths {
            let path = dir.join(name);
            if let Some(program) = self.cached(&path) {
                return Ok(program);
            }
            if path.is_file() {
                return self.compile_file(name, &path);
            }
        }
        Err(LoadError::NotFound {
            name: name.to_owned(),
            searched: self.include_paths.clone(),
        })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_compiles_once() {
        let loader = MemoryLoader::new().with("a", Node::template(vec![Node::raw_text("x")]));
        let first = loader.load("a").unwrap();
        let second = loader.load("a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.compiled_count(), 1);
    }

    #[test]
    fn memory_loader_insert_replaces_compiled() {
        let loader = MemoryLoader::new().with("a", Node::template(vec![Node::raw_text("x")]));
        let first = loader.load("a").unwrap();
        loader.insert("a", Node::template(vec![Node::raw_text("y")]), Source::Anonymous);
        let second = loader.load("a").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_templates_report_not_found() {
        let err = MemoryLoader::new().load("nope").unwrap_err();
        assert!(matches!(err, LoadError::NotFound { ref name, .. } if name == "nope"));
        assert!(matches!(NullLoader.load("x"), Err(LoadError::NotFound { .. })));
    }

    #[test]
    fn compile_errors_name_the_template() {
        let loader = MemoryLoader::new().with("bad", Node::template(vec![Node::int(1)]));
        let err = loader.load("bad").unwrap_err();
        assert!(err.to_string().starts_with("cannot compile 'bad': "), "{err}");
    }

    #[test]
    fn json_tree_parser_reads_nodes() {
        let text = r#"{"tag": "template", "children": [{"tag": "raw_string", "text": "hi", "line": 1}]}"#;
        let tree = JsonTreeParser.parse(text, &Source::Anonymous).unwrap();
        assert_eq!(tree, Node::template(vec![Node::raw_text("hi")]).at(0));
        assert!(JsonTreeParser.parse("{", &Source::Anonymous).is_err());
    }
}
