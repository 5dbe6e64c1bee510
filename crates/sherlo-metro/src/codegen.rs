//! Mock-module code generation.
//!
//! For every mocked package one JavaScript module is synthesized whose
//! exports cover the union of the real module's statically discoverable
//! exports and everything any story mocks. Each export consults the
//! process-wide current-story slot at access time and serves either the
//! story's mock or the real implementation reached through the `:real`
//! import suffix.
//!
//! Mock data is embedded as JSON marker strings and rehydrated into live
//! functions/classes only on first access for a story, never at module
//! load, which would re-expose the values to dead-code elimination.
//!
//! Writes are content-hash guarded: regeneration only touches files
//! whose generated text actually changed, so the bundler's watcher never
//! sees spurious updates.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::mock_value::{MockValue, StoryMockMap};

/// Directory for generated mock modules, under `node_modules` so the
/// bundler resolves them like any other dependency.
pub const MOCK_DIR_NAME: &str = ".sherlo-mocks";

/// Registry file mapping package names to their generated modules.
pub const MOCK_REGISTRY_FILE: &str = "mock-registry.json";

/// Import suffix that bypasses mock redirection and reaches the real
/// module. Generated files use it themselves, which also breaks the
/// resolution cycle mock → real → mock.
pub const REAL_SUFFIX: &str = ":real";

/// Process-wide slot the app writes the active story id into. The
/// generated modules read it on every access, so switching stories
/// switches mocks without reloading anything.
pub const CURRENT_STORY_GLOBAL: &str = "__SHERLO_CURRENT_STORY_ID__";

#[derive(Debug)]
pub enum CodegenError {
    NoMocksForPackage(String),
    Io {
        context: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMocksForPackage(package) => {
                write!(f, "no mocks found for package {package}")
            }
            Self::Io { context, path, source } => {
                write!(f, "codegen io failed while {context} {}: {source}", path.display())
            }
        }
    }
}

impl Error for CodegenError {}

pub fn mock_dir(project_root: &Path) -> PathBuf {
    project_root.join("node_modules").join(MOCK_DIR_NAME)
}

/// Filesystem-safe name for a package: slashes become `__`, source
/// extensions are dropped for relative-path "packages".
pub fn safe_file_name(package_name: &str) -> String {
    let mut normalized = package_name.replace('\\', "/");
    if normalized.starts_with('.') || normalized.starts_with('/') {
        for extension in [".ts", ".tsx", ".js", ".jsx"] {
            if let Some(stripped) = normalized.strip_suffix(extension) {
                normalized = stripped.to_string();
                break;
            }
        }
    }
    normalized.replace('/', "__")
}

/// Everything generated for one package.
#[derive(Debug)]
pub struct GeneratedMock {
    pub package_name: String,
    pub file_path: PathBuf,
    /// False when the on-disk content already matched; the bundler sees
    /// no change.
    pub changed: bool,
}

/// Generates (or refreshes) the mock module for one package.
pub fn generate_mock_file(
    package_name: &str,
    story_mocks: &StoryMockMap,
    project_root: &Path,
) -> Result<GeneratedMock, CodegenError> {
    let dir = mock_dir(project_root);
    std::fs::create_dir_all(&dir).map_err(|source| CodegenError::Io {
        context: "creating mock directory",
        path: dir.clone(),
        source,
    })?;

    let safe_name = safe_file_name(package_name);
    let cache_path = dir.join(format!("{safe_name}.json"));

    // Cross-worker merge: other bundler workers may already have written
    // mocks for stories this worker never saw.
    let mut package_mocks_by_story: BTreeMap<String, BTreeMap<String, MockValue>> =
        read_cache(&cache_path);

    for (story_id, packages) in story_mocks {
        if let Some(mock) = packages.get(package_name) {
            let exports = match mock {
                MockValue::Object(entries) => entries.clone(),
                // A whole-module mock that is not an object becomes the
                // default export.
                other => [("default".to_string(), other.clone())].into_iter().collect(),
            };
            package_mocks_by_story.insert(story_id.clone(), exports);
        }
    }

    if package_mocks_by_story.is_empty() {
        return Err(CodegenError::NoMocksForPackage(package_name.to_string()));
    }

    let export_names = collect_export_names(&package_mocks_by_story, package_name, project_root);
    let code = render_module(package_name, &package_mocks_by_story, &export_names);

    let file_path = dir.join(format!("{safe_name}.js"));
    let changed = write_if_changed(&file_path, &code)?;
    write_if_changed(&cache_path, &render_cache(&package_mocks_by_story))?;

    if changed {
        info!(package = package_name, file = %file_path.display(), "generated mock module");
    } else {
        debug!(package = package_name, "mock module unchanged");
    }

    Ok(GeneratedMock {
        package_name: package_name.to_string(),
        file_path,
        changed,
    })
}

/// Generates mock modules for every package any story mocks, then
/// rewrites the registry the resolver reads. Returns package → file.
pub fn generate_all_mock_files(
    story_mocks: &StoryMockMap,
    project_root: &Path,
) -> BTreeMap<String, PathBuf> {
    let mut packages: BTreeSet<String> = BTreeSet::new();
    for package_mocks in story_mocks.values() {
        packages.extend(package_mocks.keys().cloned());
    }

    let mut registry: BTreeMap<String, PathBuf> = BTreeMap::new();
    for package_name in packages {
        match generate_mock_file(&package_name, story_mocks, project_root) {
            Ok(generated) => {
                registry.insert(package_name, generated.file_path);
            }
            Err(error) => {
                warn!(package = %package_name, %error, "failed to generate mock module");
            }
        }
    }

    if let Err(error) = write_registry(&registry, project_root) {
        warn!(%error, "failed to write mock registry");
    }
    registry
}

/// Registry as read by the resolver: package name → generated file.
pub fn read_registry(project_root: &Path) -> BTreeMap<String, PathBuf> {
    let path = mock_dir(project_root).join(MOCK_REGISTRY_FILE);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str::<BTreeMap<String, String>>(&content) {
        Ok(map) => map
            .into_iter()
            .map(|(package, file)| (package, PathBuf::from(file)))
            .collect(),
        Err(error) => {
            warn!(%error, "mock registry did not parse");
            BTreeMap::new()
        }
    }
}

fn write_registry(
    registry: &BTreeMap<String, PathBuf>,
    project_root: &Path,
) -> Result<(), CodegenError> {
    let as_strings: BTreeMap<&str, String> = registry
        .iter()
        .map(|(package, path)| (package.as_str(), path.display().to_string()))
        .collect();
    let json = serde_json::to_string_pretty(&as_strings).unwrap_or_else(|_| "{}".to_string());
    let path = mock_dir(project_root).join(MOCK_REGISTRY_FILE);
    write_if_changed(&path, &json)?;
    Ok(())
}

fn read_cache(cache_path: &Path) -> BTreeMap<String, BTreeMap<String, MockValue>> {
    let Ok(content) = std::fs::read_to_string(cache_path) else {
        return BTreeMap::new();
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&content) else {
        warn!(path = %cache_path.display(), "mock cache did not parse, ignoring");
        return BTreeMap::new();
    };
    let Some(stories) = parsed.as_object() else {
        return BTreeMap::new();
    };

    stories
        .iter()
        .filter_map(|(story_id, exports)| {
            exports.as_object().map(|exports| {
                (
                    story_id.clone(),
                    exports
                        .iter()
                        .map(|(name, value)| (name.clone(), MockValue::from_json(value)))
                        .collect(),
                )
            })
        })
        .collect()
}

fn render_cache(mocks_by_story: &BTreeMap<String, BTreeMap<String, MockValue>>) -> String {
    let value: serde_json::Value = serde_json::Value::Object(
        mocks_by_story
            .iter()
            .map(|(story_id, exports)| {
                (
                    story_id.clone(),
                    serde_json::Value::Object(
                        exports
                            .iter()
                            .map(|(name, value)| (name.clone(), value.to_json()))
                            .collect(),
                    ),
                )
            })
            .collect(),
    );
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

/// Union of everything any story mocks and, for relative-path modules we
/// can locate on disk, the real module's statically discoverable exports
/// (those keep their API surface even while a partial mock is active).
fn collect_export_names(
    mocks_by_story: &BTreeMap<String, BTreeMap<String, MockValue>>,
    package_name: &str,
    project_root: &Path,
) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    for exports in mocks_by_story.values() {
        names.extend(exports.keys().cloned());
    }
    if let Some(real_path) = crate::resolver::resolve_real_module_path(package_name, project_root) {
        names.extend(discover_module_exports(&real_path));
    }
    names
}

/// Named exports of a module, recovered from its source without
/// executing it.
fn discover_module_exports(path: &Path) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let Ok(source) = std::fs::read_to_string(path) else {
        return names;
    };
    let mut parser = tree_sitter::Parser::new();
    if parser
        .set_language(&tree_sitter_javascript::LANGUAGE.into())
        .is_err()
    {
        return names;
    }
    let Some(tree) = parser.parse(&source, None) else {
        return names;
    };
    let root = tree.root_node();

    let mut cursor = root.walk();
    for statement in root.named_children(&mut cursor) {
        if statement.kind() != "export_statement" {
            continue;
        }
        if let Some(declaration) = statement.child_by_field_name("declaration") {
            match declaration.kind() {
                "lexical_declaration" | "variable_declaration" => {
                    let mut declarator_cursor = declaration.walk();
                    for declarator in declaration.named_children(&mut declarator_cursor) {
                        if declarator.kind() == "variable_declarator"
                            && let Some(name) = declarator.child_by_field_name("name")
                            && let Ok(name) = name.utf8_text(source.as_bytes())
                        {
                            names.insert(name.to_string());
                        }
                    }
                }
                "function_declaration" | "class_declaration" | "generator_function_declaration" => {
                    if let Some(name) = declaration.child_by_field_name("name")
                        && let Ok(name) = name.utf8_text(source.as_bytes())
                    {
                        names.insert(name.to_string());
                    }
                }
                _ => {}
            }
        }

        // `export { a, b as c }`
        let mut clause_cursor = statement.walk();
        for child in statement.named_children(&mut clause_cursor) {
            if child.kind() != "export_clause" {
                continue;
            }
            let mut specifier_cursor = child.walk();
            for specifier in child.named_children(&mut specifier_cursor) {
                if specifier.kind() != "export_specifier" {
                    continue;
                }
                let exported = specifier
                    .child_by_field_name("alias")
                    .or_else(|| specifier.child_by_field_name("name"));
                if let Some(exported) = exported
                    && let Ok(name) = exported.utf8_text(source.as_bytes())
                {
                    names.insert(name.to_string());
                }
            }
        }
    }
    names
}

/// Writes `content` only when it differs from what is on disk. The
/// comparison is by digest so regeneration storms cannot trigger
/// bundler-reload storms.
fn write_if_changed(path: &Path, content: &str) -> Result<bool, CodegenError> {
    if let Ok(existing) = std::fs::read_to_string(path)
        && digest(&existing) == digest(content)
    {
        return Ok(false);
    }
    std::fs::write(path, content).map_err(|source| CodegenError::Io {
        context: "writing generated file",
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

fn digest(content: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn render_module(
    package_name: &str,
    mocks_by_story: &BTreeMap<String, BTreeMap<String, MockValue>>,
    export_names: &BTreeSet<String>,
) -> String {
    let real_request = js_string(&format!("{package_name}{REAL_SUFFIX}"));
    let fallback_request = js_string(package_name);

    // Every mock value rides as a JSON string and is rehydrated on first
    // access for a story, never at module load.
    let mut data_entries = String::new();
    for (story_id, exports) in mocks_by_story {
        let mut export_entries = String::new();
        for (export_name, value) in exports {
            let marker_json =
                serde_json::to_string(&value.to_json()).unwrap_or_else(|_| "null".to_string());
            export_entries.push_str(&format!(
                "    {}: {},\n",
                js_string(export_name),
                js_string(&marker_json)
            ));
        }
        data_entries.push_str(&format!(
            "  {}: {{\n{export_entries}  }},\n",
            js_string(story_id)
        ));
    }

    let has_default = export_names.contains("default");
    let named_exports: Vec<&str> = export_names
        .iter()
        .filter(|name| name.as_str() != "default")
        .map(String::as_str)
        .collect();

    let exports_section = if named_exports.is_empty() && has_default {
        render_default_only_exports()
    } else {
        render_named_exports(&named_exports, has_default, mocks_by_story)
    };

    format!(
        r#"/**
 * Auto-generated mock module for {package_name}.
 * Reads global.{CURRENT_STORY_GLOBAL} at access time and serves either
 * the active story's mock or the real implementation.
 */

let realModule = null;
let realModuleLoadAttempted = false;
const loadRealModule = () => {{
  if (realModuleLoadAttempted) {{
    return realModule;
  }}
  realModuleLoadAttempted = true;
  try {{
    realModule = require({real_request});
  }} catch (e) {{
    try {{
      realModule = require({fallback_request});
    }} catch (e2) {{
      realModule = null;
    }}
  }}
  return realModule;
}};
loadRealModule();

// storyId -> exportName -> JSON marker string.
const storyMockData = {{
{data_entries}}};

// Returns null when no story is active, so production code paths always
// reach the real module.
const getCurrentStory = () => {{
  return (typeof global !== 'undefined' && global.{CURRENT_STORY_GLOBAL}) || null;
}};

{rehydrate}
const rehydratedCache = {{}};

// Wrapper shape distinguishes "mocked with undefined" from "not mocked".
const mockFor = (exportName) => {{
  const storyId = getCurrentStory();
  if (!storyId) {{
    return null;
  }}
  const storyData = storyMockData[storyId];
  if (!storyData || !(exportName in storyData)) {{
    return null;
  }}
  const cacheKey = storyId + ':' + exportName;
  if (!(cacheKey in rehydratedCache)) {{
    let parsed;
    try {{
      parsed = JSON.parse(storyData[exportName]);
    }} catch (e) {{
      parsed = null;
    }}
    rehydratedCache[cacheKey] = reconstructSpecialValues(deserializeFunctions(parsed));
  }}
  return {{ value: rehydratedCache[cacheKey] }};
}};

{exports_section}
"#,
        rehydrate = render_rehydration_helpers(),
    )
}

/// Runtime helpers embedded in every generated module: marker-object →
/// live value conversion. Function and class markers are evaluated here,
/// at access time, the only place in the system where source text
/// becomes code.
fn render_rehydration_helpers() -> String {
    r#"const deserializeFunctions = (value) => {
  if (value === null || value === undefined) {
    return value;
  }
  if (Array.isArray(value)) {
    return value.map(deserializeFunctions);
  }
  if (typeof value === 'object') {
    if ((value.__isFunction || value.__isClass) && value.__code) {
      try {
        // eslint-disable-next-line no-eval
        return eval('(' + value.__code + ')');
      } catch (e) {
        return undefined;
      }
    }
    const out = {};
    for (const key in value) {
      if (Object.prototype.hasOwnProperty.call(value, key)) {
        out[key] = deserializeFunctions(value[key]);
      }
    }
    return out;
  }
  return value;
};

const reconstructSpecialValues = (value) => {
  if (value === null || value === undefined) {
    return value;
  }
  if (Array.isArray(value)) {
    return value.map(reconstructSpecialValues);
  }
  if (typeof value !== 'object') {
    return value;
  }
  if (value.__isNaN) {
    return NaN;
  }
  if (value.__isInfinity) {
    return Infinity;
  }
  if (value.__isNegativeInfinity) {
    return -Infinity;
  }
  if (value.__isDate && value.__code) {
    try {
      // eslint-disable-next-line no-eval
      return eval(value.__code);
    } catch (e) {
      return new Date();
    }
  }
  if (value.__isRegExp && value.__code) {
    try {
      // eslint-disable-next-line no-eval
      return eval(value.__code);
    } catch (e) {
      return /.*/;
    }
  }
  if (value.__isGetter && value.__code) {
    // A standalone getter marker resolves to the value the getter
    // computes.
    try {
      // eslint-disable-next-line no-eval
      const holder = eval('({ ' + value.__code + ' })');
      const keys = Object.getOwnPropertyNames(holder);
      return keys.length > 0 ? holder[keys[0]] : undefined;
    } catch (e) {
      return undefined;
    }
  }
  const getterKeys = [];
  for (const key in value) {
    if (
      Object.prototype.hasOwnProperty.call(value, key) &&
      value[key] &&
      typeof value[key] === 'object' &&
      value[key].__isGetter
    ) {
      getterKeys.push(key);
    }
  }
  const out = {};
  for (const key in value) {
    if (!Object.prototype.hasOwnProperty.call(value, key)) {
      continue;
    }
    if (getterKeys.indexOf(key) !== -1) {
      continue;
    }
    out[key] = reconstructSpecialValues(value[key]);
  }
  for (const key of getterKeys) {
    try {
      const getterObject = eval('({ ' + value[key].__code + ' })');
      Object.defineProperty(out, key, {
        get: Object.getOwnPropertyDescriptor(getterObject, key).get.bind(out),
        enumerable: true,
        configurable: true,
      });
    } catch (e) {
      // Getter could not be reconstructed; the property is dropped.
    }
  }
  return out;
};
"#
    .to_string()
}

fn render_named_exports(
    named_exports: &[&str],
    has_default: bool,
    mocks_by_story: &BTreeMap<String, BTreeMap<String, MockValue>>,
) -> String {
    let mut properties = String::new();
    for export_name in named_exports {
        properties.push_str(&render_export_property(export_name, mocks_by_story));
    }

    let default_section = if has_default {
        r#"
Object.defineProperty(mock, 'default', {
  get: function () {
    const mocked = mockFor('default');
    if (mocked) {
      return mocked.value;
    }
    const real = loadRealModule();
    if (real) {
      return real.default !== undefined ? real.default : real;
    }
    return undefined;
  },
  set: function (value) {
    Object.defineProperty(mock, 'default', {
      value: value,
      writable: true,
      enumerable: true,
      configurable: true,
    });
  },
  enumerable: true,
  configurable: true,
});
"#
    } else {
        ""
    };

    format!("const mock = {{\n{properties}}};\n{default_section}\nmodule.exports = mock;\n")
}

/// One named-export property. Exports that are ever mocked as functions
/// or classes become call-through wrappers; everything else is a getter,
/// re-resolved on each access because the active story can change
/// between accesses.
fn render_export_property(
    export_name: &str,
    mocks_by_story: &BTreeMap<String, BTreeMap<String, MockValue>>,
) -> String {
    let name_js = js_string(export_name);
    let ever_function = mocks_by_story.values().any(|exports| {
        matches!(exports.get(export_name), Some(MockValue::Function { .. }))
    });
    let ever_class = mocks_by_story
        .values()
        .any(|exports| matches!(exports.get(export_name), Some(MockValue::Class { .. })));

    if ever_function && !ever_class {
        return format!(
            r#"  {name_js}: function () {{
    const mocked = mockFor({name_js});
    if (mocked) {{
      const value = mocked.value;
      return typeof value === 'function' ? value.apply(this, arguments) : value;
    }}
    const real = loadRealModule();
    if (real && typeof real[{name_js}] === 'function') {{
      return real[{name_js}].apply(this, arguments);
    }}
    return real ? real[{name_js}] : undefined;
  }},
"#
        );
    }

    // Classes and plain values resolve through a getter so `new pkg.Cls()`
    // and property reads both see the current story's mock.
    format!(
        r#"  get {name_js}() {{
    const mocked = mockFor({name_js});
    if (mocked) {{
      return mocked.value;
    }}
    const real = loadRealModule();
    return real ? real[{name_js}] : undefined;
  }},
"#
    )
}

/// Modules with only a default export must behave as the default value
/// itself; a property-trapping facade keeps that true even though the
/// underlying value changes with the active story.
fn render_default_only_exports() -> String {
    r#"const getDefaultExport = function () {
  const mocked = mockFor('default');
  if (mocked) {
    return mocked.value;
  }
  const real = loadRealModule();
  if (real) {
    return real.default !== undefined ? real.default : real;
  }
  return undefined;
};

const defaultExportProxy = new Proxy({}, {
  get: function (target, prop) {
    const current = getDefaultExport();
    if (current && (typeof current === 'object' || typeof current === 'function')) {
      return current[prop];
    }
    return undefined;
  },
  ownKeys: function (target) {
    const current = getDefaultExport();
    if (current && typeof current === 'object') {
      return Object.keys(current);
    }
    return [];
  },
  getOwnPropertyDescriptor: function (target, prop) {
    const current = getDefaultExport();
    if (current && typeof current === 'object') {
      return Object.getOwnPropertyDescriptor(current, prop);
    }
    return undefined;
  },
  has: function (target, prop) {
    const current = getDefaultExport();
    if (current && typeof current === 'object') {
      return prop in current;
    }
    return false;
  },
});

module.exports = defaultExportProxy;
"#
    .to_string()
}
