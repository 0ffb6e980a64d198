//! Deferred import machinery
//!
//! Lets a host application collect import requests while "deferring", then
//! execute them all at once later. Between the request and [`Deferrer::apply`]
//! the requested name is bound to a [`Placeholder`]; using a placeholder
//! reports a clear error naming the deferred import instead of failing
//! somewhere deep in the host.
//!
//! The deferrer is a state machine: inactive, then active while a defer scope
//! is open, then inactive again, and finally applied. Requests are structured
//! values ([`ImportRequest`]) carrying their call site for diagnostics, and
//! execution goes through an injectable [`SymbolLoader`] so the machinery can
//! be driven without touching a live interpreter.

use std::{fmt, path::PathBuf};

use thiserror::Error;

use crate::types::FxIndexMap;

/// Modules the interpreter itself imports during resolution; deferring these
/// would break the host, so they resolve eagerly
const PASSTHROUGH_MODULES: &[&str] = &["os", "sys", "tokenize"];

/// Where a deferred import was requested, for error reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub file: PathBuf,
    pub line: u32,
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// A single deferred import: `import module [as alias]` or
/// `from module import member [as alias]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub module: String,
    pub member: Option<String>,
    pub alias: Option<String>,
    /// Failure binds the name as absent instead of raising
    pub optional: bool,
    pub call_site: Option<CallSite>,
}

impl ImportRequest {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            member: None,
            alias: None,
            optional: false,
            call_site: None,
        }
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn at(mut self, call_site: CallSite) -> Self {
        self.call_site = Some(call_site);
        self
    }

    /// The name this import binds: the alias, else the member, else the root
    /// segment of the module path
    pub fn bound_name(&self) -> &str {
        if let Some(alias) = &self.alias {
            return alias;
        }
        if let Some(member) = &self.member {
            return member;
        }
        self.module.split('.').next().unwrap_or(&self.module)
    }

    /// The equivalent import statement
    pub fn statement(&self) -> String {
        let mut out = match &self.member {
            Some(member) => format!("from {} import {member}", self.module),
            None => format!("import {}", self.module),
        };
        if let Some(alias) = &self.alias {
            out.push_str(" as ");
            out.push_str(alias);
        }
        out
    }
}

impl fmt::Display for ImportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statement())?;
        if let Some(call_site) = &self.call_site {
            write!(f, " at {call_site}")?;
        }
        Ok(())
    }
}

/// Stand-in value bound for a deferred name until `apply` runs. Attribute
/// access chains into new placeholders; any real use reports an error naming
/// the deferred import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    name: String,
}

impl Placeholder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute access on a placeholder yields another placeholder with the
    /// dotted path
    pub fn attr(&self, attr_name: &str) -> Self {
        Self {
            name: format!("{}.{attr_name}", self.name),
        }
    }

    fn used_before_apply(&self) -> DeferError {
        DeferError::UsedBeforeApply {
            name: self.name.clone(),
        }
    }

    pub fn call(&self) -> Result<(), DeferError> {
        Err(self.used_before_apply())
    }

    pub fn text(&self) -> Result<String, DeferError> {
        Err(self.used_before_apply())
    }

    pub fn truthy(&self) -> Result<bool, DeferError> {
        Err(self.used_before_apply())
    }
}

/// The state of one name in the target namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding<V> {
    /// Deferred and not yet applied
    Pending(Placeholder),
    /// Loaded successfully
    Resolved(V),
    /// An optional import that failed to load
    Missing,
}

impl<V> Binding<V> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn resolved(&self) -> Option<&V> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }
}

/// The namespace deferred imports bind into
#[derive(Debug, Clone, Default)]
pub struct Namespace<V> {
    bindings: FxIndexMap<String, Binding<V>>,
}

impl<V> Namespace<V> {
    pub fn get(&self, name: &str) -> Option<&Binding<V>> {
        self.bindings.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, binding: Binding<V>) {
        self.bindings.insert(name.into(), binding);
    }

    /// The value bound to `name`, if it has been resolved
    pub fn resolved(&self, name: &str) -> Option<&V> {
        self.get(name).and_then(Binding::resolved)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding<V>)> {
        self.bindings
            .iter()
            .map(|(name, binding)| (name.as_str(), binding))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Why a loader could not produce a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    ModuleNotFound,
    MemberNotFound,
    Other(String),
}

/// Executes import requests; injected into the [`Deferrer`] so resolution
/// strategies can vary (and tests can run without any real modules)
pub trait SymbolLoader {
    type Value;

    fn load_module(&self, module: &str) -> Result<Self::Value, LoadFailure>;
    fn load_member(&self, module: &str, member: &str) -> Result<Self::Value, LoadFailure>;

    /// Whether a package can be resolved at all
    fn is_installed(&self, package: &str) -> bool;
}

#[derive(Debug, Error)]
pub enum DeferError {
    #[error("cannot use deferred import '{name}' until apply() is called")]
    UsedBeforeApply { name: String },

    #[error("deferred imports are not being collected - open a defer scope first")]
    NotActive,

    #[error("cannot apply imports while still deferring - close the defer scope first")]
    ApplyWhileActive,

    #[error("no module named '{name}' ({0})", name = .0.module)]
    ModuleNotFound(ImportRequest),

    #[error("module '{module}' has no member '{member}' ({0})",
        module = .0.module,
        member = .0.member.as_deref().unwrap_or("?"))]
    MemberNotFound(ImportRequest),

    #[error("deferred import failed: {reason} ({request})")]
    ImportFailed {
        request: ImportRequest,
        reason: String,
    },
}

/// Collects deferred imports and applies them on demand
#[derive(Debug)]
pub struct Deferrer<L: SymbolLoader> {
    loader: L,
    /// Open defer scopes; the deferrer is active while this is non-zero
    depth: usize,
    optional_mode: bool,
    queue: Vec<ImportRequest>,
    pub namespace: Namespace<L::Value>,
}

impl<L: SymbolLoader> Deferrer<L>
where
    L::Value: Clone,
{
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            depth: 0,
            optional_mode: false,
            queue: Vec::new(),
            namespace: Namespace {
                bindings: FxIndexMap::default(),
            },
        }
    }

    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// Start deferring imports; nested scopes are allowed
    pub fn enter(&mut self) {
        self.depth += 1;
    }

    /// Stop deferring imports without executing them
    pub fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Run a scope in which import failures bind the name as absent instead
    /// of raising. Opens a defer scope of its own if none is active.
    pub fn optional<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_active = self.is_active();
        if !was_active {
            self.enter();
        }
        let old_optional_mode = self.optional_mode;
        self.optional_mode = true;

        let result = f(self);

        self.optional_mode = old_optional_mode;
        if !was_active {
            self.exit();
        }
        result
    }

    /// Queue an import request, binding its name to a placeholder until
    /// `apply` runs. Interpreter-internal modules resolve eagerly.
    pub fn defer(&mut self, mut request: ImportRequest) -> Result<Binding<L::Value>, DeferError> {
        if !self.is_active() {
            return Err(DeferError::NotActive);
        }
        if self.optional_mode {
            request.optional = true;
        }

        if request.member.is_none() && PASSTHROUGH_MODULES.contains(&request.module.as_str()) {
            let binding = match self.loader.load_module(&request.module) {
                Ok(value) => Binding::Resolved(value),
                Err(failure) => return Err(load_error(request, failure)),
            };
            self.namespace
                .insert(request.bound_name().to_string(), binding.clone());
            return Ok(binding);
        }

        let placeholder = Placeholder::new(request.bound_name());
        self.namespace.insert(
            request.bound_name().to_string(),
            Binding::Pending(placeholder.clone()),
        );
        self.queue.push(request);
        Ok(Binding::Pending(placeholder))
    }

    /// Execute all queued imports, replacing placeholders with resolved
    /// values. The queue is consumed whether or not every import succeeds.
    pub fn apply(&mut self) -> Result<(), DeferError> {
        if self.is_active() {
            return Err(DeferError::ApplyWhileActive);
        }

        let queue = std::mem::take(&mut self.queue);
        for request in queue {
            let loaded = match &request.member {
                Some(member) => self.loader.load_member(&request.module, member),
                None => self.loader.load_module(&request.module),
            };
            let name = request.bound_name().to_string();
            match loaded {
                Ok(value) => self.namespace.insert(name, Binding::Resolved(value)),
                Err(failure) => {
                    if request.optional {
                        self.namespace.insert(name, Binding::Missing);
                    } else {
                        return Err(load_error(request, failure));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Check whether a package is available without importing it
    pub fn is_installed(&self, package: &str) -> bool {
        self.loader.is_installed(package)
    }
}

fn load_error(request: ImportRequest, failure: LoadFailure) -> DeferError {
    match failure {
        LoadFailure::ModuleNotFound => DeferError::ModuleNotFound(request),
        LoadFailure::MemberNotFound => DeferError::MemberNotFound(request),
        LoadFailure::Other(reason) => DeferError::ImportFailed { request, reason },
    }
}

/// A module resolved by [`PathLoader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHandle {
    pub module: String,
    /// Location on disk; `None` for standard library modules
    pub path: Option<PathBuf>,
}

/// Resolves modules against a set of search directories and the standard
/// library table. Member lookups resolve to the owning module: whether the
/// member exists cannot be determined without executing the module.
#[derive(Debug)]
pub struct PathLoader {
    search_paths: Vec<PathBuf>,
}

impl PathLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    fn find_module(&self, module: &str) -> Option<PathBuf> {
        let relative: PathBuf = module.split('.').collect();
        for search_path in &self.search_paths {
            let package = search_path.join(&relative).join("__init__.py");
            if package.is_file() {
                return Some(package);
            }
            let file = search_path.join(&relative).with_extension("py");
            if file.is_file() {
                return Some(file);
            }
        }
        None
    }
}

impl SymbolLoader for PathLoader {
    type Value = ModuleHandle;

    fn load_module(&self, module: &str) -> Result<Self::Value, LoadFailure> {
        if crate::emit::is_stdlib_module(module) {
            return Ok(ModuleHandle {
                module: module.to_string(),
                path: None,
            });
        }
        match self.find_module(module) {
            Some(path) => Ok(ModuleHandle {
                module: module.to_string(),
                path: Some(path),
            }),
            None => Err(LoadFailure::ModuleNotFound),
        }
    }

    fn load_member(&self, module: &str, _member: &str) -> Result<Self::Value, LoadFailure> {
        self.load_module(module)
    }

    fn is_installed(&self, package: &str) -> bool {
        crate::emit::is_stdlib_module(package) || self.find_module(package).is_some()
    }
}
