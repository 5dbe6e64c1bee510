//! Static mock extraction from story files.
//!
//! Story files are parsed, never executed: they import platform APIs
//! that do not exist at bundle time. The extractor finds every named
//! export whose initializer (directly, or through a same-file factory
//! call) is an object carrying a `mocks` property, and classifies each
//! mocked value into a [`MockValue`]. Functions, classes, and getters
//! are carried as regenerated source text so they survive bundler
//! optimization; the bundler's `_asyncToGenerator` lowering is rewritten
//! back into an async arrow so the original semantics reach the
//! generated module.
//!
//! A file that fails to parse contributes an empty map; one broken
//! story must not take the whole build down.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::Path;

use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use crate::mock_value::{MockValue, StoryMockMap};

#[derive(Debug)]
pub enum ExtractError {
    ParserInit(String),
    Parse { file: String },
    Read { file: String, source: std::io::Error },
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParserInit(detail) => write!(f, "failed to initialize parser: {detail}"),
            Self::Parse { file } => write!(f, "failed to parse story file {file}"),
            Self::Read { file, source } => write!(f, "failed to read story file {file}: {source}"),
        }
    }
}

impl Error for ExtractError {}

/// Derives the story-id prefix from a story file's location, matching
/// the story framework's own scheme: directory path relative to the
/// project root, `src/` prefix dropped, separators turned into dashes,
/// lowercased.
pub fn component_id_from_path(file_path: &Path, project_root: &Path) -> String {
    let relative = file_path.strip_prefix(project_root).unwrap_or(file_path);
    let dir = relative.parent().unwrap_or_else(|| Path::new(""));

    let mut joined = dir
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("-");
    if let Some(stripped) = joined.strip_prefix("src-") {
        joined = stripped.to_string();
    }
    joined.to_lowercase()
}

/// `MockedDefault` → `mocked-default`. Only a lowercase-letter →
/// uppercase-letter boundary introduces a hyphen; digits never do.
pub fn camel_to_kebab(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev_lower = false;
    for c in value.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_ascii_lowercase();
            out.push(c);
        }
    }
    out
}

/// Extracts the story mock map from one file on disk. Failures are
/// logged and yield an empty map.
pub fn extract_mocks_from_file(file_path: &Path, project_root: &Path) -> StoryMockMap {
    let source = match std::fs::read_to_string(file_path) {
        Ok(source) => source,
        Err(error) => {
            warn!(file = %file_path.display(), %error, "could not read story file");
            return StoryMockMap::new();
        }
    };
    match extract_mocks_from_source(&source, file_path, project_root) {
        Ok(mocks) => mocks,
        Err(error) => {
            warn!(file = %file_path.display(), %error, "mock extraction failed");
            StoryMockMap::new()
        }
    }
}

/// Extracts the story mock map from story-file source text.
///
/// Deterministic: the same source always yields the same map, which is
/// what makes regeneration idempotent.
pub fn extract_mocks_from_source(
    source: &str,
    file_path: &Path,
    project_root: &Path,
) -> Result<StoryMockMap, ExtractError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_javascript::LANGUAGE.into())
        .map_err(|error| ExtractError::ParserInit(error.to_string()))?;

    let tree = parser.parse(source, None).ok_or_else(|| ExtractError::Parse {
        file: file_path.display().to_string(),
    })?;
    let root = tree.root_node();

    let component_id = component_id_from_path(file_path, project_root);
    let mut mocks = StoryMockMap::new();

    let mut cursor = root.walk();
    for statement in root.named_children(&mut cursor) {
        if statement.kind() != "export_statement" {
            continue;
        }
        let Some(declaration) = statement.child_by_field_name("declaration") else {
            continue;
        };
        if declaration.kind() != "lexical_declaration" && declaration.kind() != "variable_declaration"
        {
            continue;
        }

        let mut declarator_cursor = declaration.walk();
        for declarator in declaration.named_children(&mut declarator_cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let (Some(name), Some(value)) = (
                declarator.child_by_field_name("name"),
                declarator.child_by_field_name("value"),
            ) else {
                continue;
            };
            let export_name = text(name, source);

            let Some(story_object) = resolve_story_object(value, root, source) else {
                continue;
            };
            let Some(mocks_object) = find_property(story_object, "mocks", source) else {
                continue;
            };
            if mocks_object.kind() != "object" {
                continue;
            }

            let mut package_mocks: BTreeMap<String, MockValue> = BTreeMap::new();
            let mut pair_cursor = mocks_object.walk();
            for member in mocks_object.named_children(&mut pair_cursor) {
                if member.kind() != "pair" {
                    continue;
                }
                let (Some(key), Some(value)) = (
                    member.child_by_field_name("key"),
                    member.child_by_field_name("value"),
                ) else {
                    continue;
                };
                let Some(package_name) = property_key(key, source) else {
                    continue;
                };
                package_mocks.insert(package_name, extract_mock_value(value, source));
            }

            if package_mocks.is_empty() {
                continue;
            }

            debug!(
                export = %export_name,
                packages = package_mocks.len(),
                "extracted story mocks"
            );

            // Stored under the normalized id (the framework's scheme) and
            // the original casing, for registries predating normalization.
            let normalized = format!("{component_id}--{}", camel_to_kebab(&export_name));
            let original = format!("{component_id}--{export_name}");
            if normalized != original {
                mocks.insert(original, package_mocks.clone());
            }
            mocks.insert(normalized, package_mocks);
        }
    }

    Ok(mocks)
}

fn text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or_default()
}

fn property_key(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "property_identifier" | "identifier" => Some(text(node, source).to_string()),
        "string" => Some(string_value(node, source)),
        _ => None,
    }
}

fn string_value(node: Node<'_>, source: &str) -> String {
    let raw = text(node, source);
    if raw.starts_with('"')
        && let Ok(parsed) = serde_json::from_str::<String>(raw)
    {
        return parsed;
    }
    // Single-quoted or template-ish: strip the quotes and undo the
    // common escapes by hand.
    let inner = raw
        .strip_prefix(['\'', '"', '`'])
        .and_then(|rest| rest.strip_suffix(['\'', '"', '`']))
        .unwrap_or(raw);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Finds the object expression a story export boils down to: either the
/// initializer itself, or, for factory-style stories, the return
/// expression of a function defined in the same file.
fn resolve_story_object<'t>(value: Node<'t>, root: Node<'t>, source: &str) -> Option<Node<'t>> {
    match value.kind() {
        "object" => Some(value),
        "call_expression" => {
            let callee = value.child_by_field_name("function")?;
            if callee.kind() != "identifier" {
                return None;
            }
            let callee_name = text(callee, source);
            let definition = find_function_definition(root, callee_name, source)?;
            function_return_object(definition)
        }
        _ => None,
    }
}

fn find_function_definition<'t>(root: Node<'t>, name: &str, source: &str) -> Option<Node<'t>> {
    let mut cursor = root.walk();
    for statement in root.named_children(&mut cursor) {
        // Both `function makeStory() {}` and `const makeStory = () => ...`,
        // exported or not.
        let candidates = if statement.kind() == "export_statement" {
            statement.child_by_field_name("declaration")
        } else {
            Some(statement)
        };
        let Some(candidate) = candidates else {
            continue;
        };

        match candidate.kind() {
            "function_declaration" => {
                if candidate
                    .child_by_field_name("name")
                    .is_some_and(|n| text(n, source) == name)
                {
                    return Some(candidate);
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                let mut declarator_cursor = candidate.walk();
                for declarator in candidate.named_children(&mut declarator_cursor) {
                    if declarator.kind() != "variable_declarator" {
                        continue;
                    }
                    let matches_name = declarator
                        .child_by_field_name("name")
                        .is_some_and(|n| text(n, source) == name);
                    if !matches_name {
                        continue;
                    }
                    if let Some(value) = declarator.child_by_field_name("value")
                        && matches!(value.kind(), "arrow_function" | "function_expression")
                    {
                        return Some(value);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// The object expression a function definition returns, if its body is
/// simple enough to resolve statically.
fn function_return_object(function: Node<'_>) -> Option<Node<'_>> {
    let body = function.child_by_field_name("body")?;
    match body.kind() {
        // Arrow with expression body: `() => ({ ... })`
        "parenthesized_expression" => {
            let inner = body.named_child(0)?;
            (inner.kind() == "object").then_some(inner)
        }
        "object" => Some(body),
        "statement_block" => {
            let mut cursor = body.walk();
            for statement in body.named_children(&mut cursor) {
                if statement.kind() == "return_statement" {
                    let mut returned = statement.named_child(0)?;
                    if returned.kind() == "parenthesized_expression" {
                        returned = returned.named_child(0)?;
                    }
                    return (returned.kind() == "object").then_some(returned);
                }
            }
            None
        }
        _ => None,
    }
}

fn find_property<'t>(object: Node<'t>, name: &str, source: &str) -> Option<Node<'t>> {
    let mut cursor = object.walk();
    for member in object.named_children(&mut cursor) {
        if member.kind() != "pair" {
            continue;
        }
        let key = member.child_by_field_name("key")?;
        if property_key(key, source).as_deref() == Some(name) {
            return member.child_by_field_name("value");
        }
    }
    None
}

/// Classifies one mock value node. Unsupported shapes decay to `Null`
/// rather than failing the file.
fn extract_mock_value(node: Node<'_>, source: &str) -> MockValue {
    match node.kind() {
        "number" => MockValue::Number(parse_number(text(node, source))),
        "string" | "template_string" => MockValue::String(string_value(node, source)),
        "true" => MockValue::Bool(true),
        "false" => MockValue::Bool(false),
        "null" | "undefined" => MockValue::Null,
        "identifier" => match text(node, source) {
            "NaN" => MockValue::NaN,
            "Infinity" => MockValue::Infinity,
            _ => MockValue::Null,
        },
        "unary_expression" => extract_unary(node, source),
        "arrow_function" | "function_expression" | "function" | "generator_function" => {
            MockValue::Function {
                code: text(node, source).to_string(),
            }
        }
        "class" => MockValue::Class {
            code: text(node, source).to_string(),
        },
        "regex" => MockValue::RegExp {
            code: text(node, source).to_string(),
        },
        "new_expression" => extract_new_expression(node, source),
        "call_expression" => extract_call_expression(node, source),
        "array" => {
            let mut cursor = node.walk();
            MockValue::Array(
                node.named_children(&mut cursor)
                    .map(|item| extract_mock_value(item, source))
                    .collect(),
            )
        }
        "object" => extract_object(node, source),
        "parenthesized_expression" => node
            .named_child(0)
            .map(|inner| extract_mock_value(inner, source))
            .unwrap_or(MockValue::Null),
        other => {
            debug!(kind = other, "unsupported mock value node");
            MockValue::Null
        }
    }
}

fn parse_number(raw: &str) -> f64 {
    let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
    if let Some(hex) = cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map(|v| v as f64).unwrap_or(0.0);
    }
    cleaned.parse().unwrap_or(0.0)
}

fn extract_unary(node: Node<'_>, source: &str) -> MockValue {
    let operator = node
        .child_by_field_name("operator")
        .map(|op| text(op, source))
        .unwrap_or_default();
    let Some(argument) = node.child_by_field_name("argument") else {
        return MockValue::Null;
    };
    if operator != "-" {
        return MockValue::Null;
    }
    match argument.kind() {
        "identifier" if text(argument, source) == "Infinity" => MockValue::NegativeInfinity,
        "number" => MockValue::Number(-parse_number(text(argument, source))),
        _ => MockValue::Null,
    }
}

fn extract_new_expression(node: Node<'_>, source: &str) -> MockValue {
    let constructor = node
        .child_by_field_name("constructor")
        .map(|c| text(c, source))
        .unwrap_or_default();
    let code = text(node, source).to_string();
    match constructor {
        "Date" => MockValue::Date { code },
        "RegExp" => MockValue::RegExp { code },
        _ => MockValue::Null,
    }
}

fn extract_call_expression(node: Node<'_>, source: &str) -> MockValue {
    if let Some(rewritten) = extract_lowered_async(node, source) {
        return rewritten;
    }

    let code = text(node, source);
    if let Some(rewritten) = extract_lowered_async_from_iife(code) {
        return rewritten;
    }

    // A call we cannot see through but that reads like a function value:
    // keep the source so the generated module can still evaluate it.
    if code.contains("async") || code.contains("=>") {
        return MockValue::Function {
            code: code.to_string(),
        };
    }

    MockValue::Null
}

/// Undoes the bundler's async lowering: `_asyncToGenerator(function* (p)
/// { ... })` becomes `async (p) => { ... }` with `yield` turned back into
/// `await`, so the original async semantics survive into generated code.
fn extract_lowered_async(node: Node<'_>, source: &str) -> Option<MockValue> {
    let callee = node.child_by_field_name("function")?;
    let callee_name = match callee.kind() {
        "identifier" => text(callee, source),
        "member_expression" => callee
            .child_by_field_name("property")
            .map(|p| text(p, source))
            .unwrap_or_default(),
        _ => return None,
    };
    if callee_name != "_asyncToGenerator" {
        return None;
    }

    let arguments = node.child_by_field_name("arguments")?;
    let generator = arguments.named_child(0)?;
    if !matches!(
        generator.kind(),
        "generator_function" | "function_expression" | "arrow_function" | "function_declaration"
    ) {
        return None;
    }

    let params = generator
        .child_by_field_name("parameters")
        .map(|p| text(p, source))
        .unwrap_or("()");
    let body = generator.child_by_field_name("body")?;
    let body_code = replace_word(text(body, source), "yield", "await");

    Some(MockValue::Function {
        code: format!("async {params} => {body_code}"),
    })
}

/// The same lowering sometimes arrives wrapped in an IIFE; the generator
/// is then recovered from the source text by brace matching.
fn extract_lowered_async_from_iife(code: &str) -> Option<MockValue> {
    if !code.contains("_asyncToGenerator") || !code.contains("function*") {
        return None;
    }

    let star = code.find("function*")?;
    let after = &code[star..];
    let params_open = after.find('(')?;
    let params_close = after[params_open..].find(')')? + params_open;
    let params = after[params_open + 1..params_close].trim();

    let body_open = after[params_close..].find('{')? + params_close;
    let mut depth = 0usize;
    let mut body_end = None;
    for (offset, c) in after[body_open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    body_end = Some(body_open + offset);
                    break;
                }
            }
            _ => {}
        }
    }
    let body_end = body_end?;
    let body = replace_word(&after[body_open + 1..body_end], "yield", "await");

    Some(MockValue::Function {
        code: format!("async ({params}) => {{{body}}}"),
    })
}

/// Whole-word replacement; identifier characters on either side block a
/// match, so `yielded` never becomes `awaited`.
fn replace_word(haystack: &str, from: &str, to: &str) -> String {
    let bytes = haystack.as_bytes();
    let mut out = String::with_capacity(haystack.len());
    let mut index = 0;
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'$';

    while index < haystack.len() {
        if let Some(found) = haystack[index..].find(from) {
            let start = index + found;
            let end = start + from.len();
            let boundary_before = start == 0 || !is_ident(bytes[start - 1]);
            let boundary_after = end >= bytes.len() || !is_ident(bytes[end]);
            out.push_str(&haystack[index..start]);
            if boundary_before && boundary_after {
                out.push_str(to);
            } else {
                out.push_str(from);
            }
            index = end;
        } else {
            out.push_str(&haystack[index..]);
            break;
        }
    }
    out
}

fn extract_object(node: Node<'_>, source: &str) -> MockValue {
    let mut entries = BTreeMap::new();
    let mut cursor = node.walk();
    for member in node.named_children(&mut cursor) {
        match member.kind() {
            "pair" => {
                let (Some(key), Some(value)) = (
                    member.child_by_field_name("key"),
                    member.child_by_field_name("value"),
                ) else {
                    continue;
                };
                let Some(key) = property_key(key, source) else {
                    continue;
                };
                entries.insert(key, extract_mock_value(value, source));
            }
            "method_definition" => {
                let Some(key) = member
                    .child_by_field_name("name")
                    .and_then(|name| property_key(name, source))
                else {
                    continue;
                };
                let is_getter = member.child(0).is_some_and(|c| c.kind() == "get");
                let code = text(member, source).to_string();
                if is_getter {
                    entries.insert(key, MockValue::Getter { code });
                } else {
                    // A plain method reads as a function value whose code
                    // is the method itself rewritten as a function.
                    entries.insert(
                        key,
                        MockValue::Function {
                            code: format!("function {code}"),
                        },
                    );
                }
            }
            _ => {}
        }
    }
    MockValue::Object(entries)
}
