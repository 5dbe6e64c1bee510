//! Import redirection.
//!
//! The bundler asks us about every import request. Requests for packages
//! with generated mocks are redirected to the generated module; a
//! `:real` suffix bypasses the redirect and resolves the original
//! module, which is how generated modules reach the implementation they
//! wrap without resolving back to themselves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::codegen::{self, MOCK_DIR_NAME, REAL_SUFFIX};

/// Directories tried when resolving a relative "package" name against
/// the project, mirroring where app sources usually live.
const COMMON_SOURCE_DIRS: [&str; 2] = ["src", ""];

const SOURCE_EXTENSIONS: [&str; 5] = [".ts", ".tsx", ".js", ".jsx", ""];

/// How long a loaded registry is trusted before re-reading it; mocks may
/// be regenerated while the bundler runs.
const REGISTRY_TTL: Duration = Duration::from_secs(2);

/// What the bundler tells us about the import being resolved.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// Absolute path of the module the import appears in.
    pub origin_module_path: Option<PathBuf>,
}

/// Resolves a relative module name against the project's common source
/// roots, trying the usual extensions.
pub fn resolve_real_module_path(module_name: &str, project_root: &Path) -> Option<PathBuf> {
    if !module_name.starts_with('.') && !module_name.starts_with('/') {
        return None;
    }

    for source_dir in COMMON_SOURCE_DIRS {
        let base = if source_dir.is_empty() {
            project_root.to_path_buf()
        } else {
            project_root.join(source_dir)
        };
        let resolved = base.join(module_name);
        for extension in SOURCE_EXTENSIONS {
            let candidate = if extension.is_empty() {
                resolved.clone()
            } else {
                PathBuf::from(format!("{}{extension}", resolved.display()))
            };
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Redirects imports of mocked packages to their generated modules.
pub struct MockResolver {
    project_root: PathBuf,
    registry_cache: Mutex<Option<(Instant, BTreeMap<String, PathBuf>)>>,
}

impl MockResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            registry_cache: Mutex::new(None),
        }
    }

    fn registry(&self) -> BTreeMap<String, PathBuf> {
        let mut cache = self.registry_cache.lock();
        if let Some((loaded_at, registry)) = cache.as_ref()
            && loaded_at.elapsed() < REGISTRY_TTL
        {
            return registry.clone();
        }
        let registry = codegen::read_registry(&self.project_root);
        *cache = Some((Instant::now(), registry.clone()));
        registry
    }

    /// Resolution hook. Returns the redirect target, or `None` to let
    /// the bundler's own resolver proceed unchanged. `base_resolve` is
    /// the bundler's resolver, consulted both for `:real` bypasses and to
    /// map aliased names onto registry entries.
    pub fn resolve(
        &self,
        context: &ResolutionContext,
        module_name: &str,
        base_resolve: &dyn Fn(&str) -> Option<PathBuf>,
    ) -> Option<PathBuf> {
        // `<name>:real` escapes redirection entirely.
        if let Some(real_name) = module_name.strip_suffix(REAL_SUFFIX) {
            if let Some(path) = resolve_real_module_path(real_name, &self.project_root) {
                debug!(module = real_name, path = %path.display(), "resolved :real import");
                return Some(path);
            }
            return base_resolve(real_name);
        }

        // Imports from inside generated modules must never be redirected
        // back into the mock directory.
        if context
            .origin_module_path
            .as_ref()
            .is_some_and(|origin| origin.to_string_lossy().contains(MOCK_DIR_NAME))
        {
            return None;
        }

        let registry = self.registry();

        if let Some(target) = registry.get(module_name)
            && target.is_file()
        {
            debug!(module = module_name, "redirecting to mock module");
            return Some(target.clone());
        }

        // Aliases and differently spelled relative paths: resolve first,
        // then look the resolved file up in the registry.
        if let Some(resolved) = base_resolve(module_name) {
            let resolved_key = resolved.display().to_string();
            if let Some(target) = registry.get(&resolved_key)
                && target.is_file()
            {
                return Some(target.clone());
            }
            let without_extension = SOURCE_EXTENSIONS
                .iter()
                .find_map(|ext| (!ext.is_empty()).then(|| resolved_key.strip_suffix(ext)).flatten());
            if let Some(stripped) = without_extension
                && let Some(target) = registry.get(stripped)
                && target.is_file()
            {
                return Some(target.clone());
            }
            // The base resolver had an answer and no mock shadows it.
            return None;
        }

        // Name-convention fallback for registries that are mid-rewrite.
        let conventional = codegen::mock_dir(&self.project_root)
            .join(format!("{}.js", codegen::safe_file_name(module_name)));
        if conventional.is_file() {
            debug!(module = module_name, "redirecting via name convention");
            return Some(conventional);
        }

        None
    }
}
