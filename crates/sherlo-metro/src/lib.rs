//! Bundler integration.
//!
//! Wraps a bundler configuration with sherlo's mock machinery: story
//! files are discovered from the storybook config, their `mocks` objects
//! are extracted statically, one runtime-switchable module is generated
//! per mocked package, and a resolver hook redirects imports of those
//! packages to the generated modules (with a `:real` suffix as the
//! escape hatch back to the real module).
//!
//! Generation runs once up front (the modules must exist before the
//! bundler's first resolution pass) and again, debounced and
//! hash-guarded, whenever a story file changes in watch mode.

pub mod codegen;
pub mod discovery;
pub mod extract;
pub mod mock_value;
pub mod resolver;
pub mod watch;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub use codegen::{CURRENT_STORY_GLOBAL, GeneratedMock, REAL_SUFFIX};
pub use extract::{camel_to_kebab, component_id_from_path, extract_mocks_from_source};
pub use mock_value::{MockValue, StoryMockMap};
pub use resolver::{MockResolver, ResolutionContext};
pub use watch::MockWatcher;

#[derive(Debug, Clone, Default)]
pub struct WithSherloOptions {
    /// Keep watching story files and regenerate on change.
    pub watch: bool,
}

/// The augmented bundler configuration: what was discovered and
/// generated, plus the resolver hook to install.
pub struct SherloMetro {
    pub project_root: PathBuf,
    pub story_files: Vec<PathBuf>,
    /// Package name → generated mock module.
    pub mock_registry: BTreeMap<String, PathBuf>,
    pub resolver: MockResolver,
    watcher: Option<MockWatcher>,
}

impl SherloMetro {
    /// Resolution hook for the bundler; see [`MockResolver::resolve`].
    pub fn resolve_request(
        &self,
        context: &ResolutionContext,
        module_name: &str,
        base_resolve: &dyn Fn(&str) -> Option<PathBuf>,
    ) -> Option<PathBuf> {
        self.resolver.resolve(context, module_name, base_resolve)
    }

    /// Folders the bundler should additionally watch: the generated mock
    /// directory, so touched modules trigger reloads.
    pub fn watch_folders(&self) -> Vec<PathBuf> {
        vec![codegen::mock_dir(&self.project_root)]
    }

    pub fn stop(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
    }
}

/// Builds the sherlo-augmented bundler configuration.
///
/// Discovery and the first generation pass happen here, synchronously,
/// before the bundler initializes: the generated files must already be
/// on disk when the first import of a mocked package resolves. The story
/// list is persisted to the worker-handoff manifest since bundler
/// workers run in separate processes.
pub fn with_sherlo(project_root: impl Into<PathBuf>, options: WithSherloOptions) -> SherloMetro {
    let project_root = project_root.into();

    let story_files = discovery::discover_story_files(&project_root);
    info!(count = story_files.len(), "discovered story files");

    if let Err(error) = discovery::write_story_manifest(&project_root, &story_files) {
        warn!(%error, "failed to write story manifest");
    }

    let mocks = extract_all(&story_files, &project_root);
    let mock_registry = if mocks.is_empty() {
        BTreeMap::new()
    } else {
        codegen::generate_all_mock_files(&mocks, &project_root)
    };
    info!(packages = mock_registry.len(), "pre-generated mock modules");

    let watcher = if options.watch && !story_files.is_empty() {
        match watch::watch_story_files(&project_root, &story_files) {
            Ok(watcher) => Some(watcher),
            Err(error) => {
                warn!(%error, "failed to start story-file watcher");
                None
            }
        }
    } else {
        None
    };

    SherloMetro {
        resolver: MockResolver::new(project_root.clone()),
        project_root,
        story_files,
        mock_registry,
        watcher,
    }
}

/// Extracts and merges the mock maps of every story file. Per-file
/// failures contribute empty maps; one broken story never fails the
/// build.
pub fn extract_all(story_files: &[PathBuf], project_root: &Path) -> StoryMockMap {
    let mut all = StoryMockMap::new();
    for story_file in story_files {
        for (story_id, packages) in extract::extract_mocks_from_file(story_file, project_root) {
            all.insert(story_id, packages);
        }
    }
    all
}
