//! Prompt templates and rendering
//!
//! Templates use `{name}` placeholders. Built-in templates cover the schema
//! check, extraction and smart-merge calls; any of them can be replaced by a
//! file of the same name in a template directory.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// File name of the schema-check template override
pub const SCHEMA_CHECK_FILE: &str = "schema_check.txt";
/// File name of the extraction template override
pub const EXTRACTION_FILE: &str = "extraction.txt";
/// File name of the smart-merge template override
pub const SMART_MERGE_FILE: &str = "smart_merge.txt";

const DEFAULT_SCHEMA_CHECK: &str = r#"# Task: check whether the schema can describe the text

## Current classes (JSON)

{classes}

## Input text

{text}

## Instructions

Decide whether the classes above can express every concept, entity type and
property mentioned in the input text.

If they can, answer with the single word:
SUFFICIENT

Otherwise answer with a JSON object listing only new classes, or only the new
properties of existing classes:
{"classes": [{"name": "ClassName", "description": "what it is", "properties": [{"name": "property", "description": "what it holds", "required": false, "value_required": false}]}]}

Rules:
1. Never repeat an existing class unless you add properties to it.
2. Never remove a property or relax required / value_required.
3. Every class and property needs a description.
4. Answer SUFFICIENT or the JSON object, nothing else.
"#;

const DEFAULT_EXTRACTION: &str = r#"# Task: extract a knowledge graph from the text

## Classes

{classes}

## Known entities

{predefined_entities}

## Input text

{text}

## Output format

Write one record per line, separate records with "{record_delimiter}" and
fields with "{tuple_delimiter}". Use these record kinds only:

entity{tuple_delimiter}<name>{tuple_delimiter}<description>{tuple_delimiter}<class1,class2>
property{tuple_delimiter}<entity name>{tuple_delimiter}<class>{tuple_delimiter}<property>{tuple_delimiter}<value>
relationship{tuple_delimiter}<source entity>{tuple_delimiter}<target entity>{tuple_delimiter}<description>{tuple_delimiter}<count>{tuple_delimiter}<refer entities, comma separated, or NONE>

Rules:
1. Classes must come from the class list above.
2. Properties must be defined on the class they are attached to.
3. Reuse the known entity names when the text refers to them.
4. Write descriptions in {language}.
5. Finish with "{completion_delimiter}".
"#;

const DEFAULT_SMART_MERGE: &str = r#"# Task: merge newly extracted knowledge into an existing graph

## Existing graph summary (JSON)

{existing}

## New knowledge to merge (JSON)

{delta}

## Instructions

1. Find entities in the new knowledge that duplicate existing entities under a
   different surface name and merge them ("operation": "merge" with
   "merge_target" set to the existing name).
2. Align names to the canonical existing spelling.
3. Resolve contradictory property values, preferring the most specific and most
   recent value.
4. Remove duplicated sentences from descriptions.

Answer with a single JSON object and nothing else:
{"optimized_classes": [{"name": "", "description": "", "properties": [{"name": "", "description": "", "required": false, "value_required": false}], "operation": "add"}],
 "optimized_entities": [{"name": "", "description": "", "classes": [""], "properties": {"Class": {"property": "value"}}, "operation": "add", "merge_target": null}],
 "optimized_relationships": [{"source": "", "target": "", "description": "", "count": 1, "refer": [], "operation": "add"}],
 "merge_summary": {"duplicates_found": 0, "conflicts_resolved": 0, "names_aligned": 0, "descriptions_optimized": 0, "notes": ""}}
"#;

/// Substitute `{name}` placeholders in a single pass
///
/// Unknown placeholders and bare braces are left untouched, and substituted
/// values are never re-scanned.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let lookup: HashMap<&str, &str> = vars.iter().copied().collect();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let placeholder = after
            .find('}')
            .map(|close| &after[..close])
            .filter(|name| is_placeholder_name(name))
            .and_then(|name| lookup.get(name).map(|value| (name.len(), *value)));

        match placeholder {
            Some((len, value)) => {
                out.push_str(value);
                rest = &after[len + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The three templates the pipeline renders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub schema_check: String,
    pub extraction: String,
    pub smart_merge: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptSet {
    /// Built-in templates
    pub fn builtin() -> Self {
        Self {
            schema_check: DEFAULT_SCHEMA_CHECK.to_string(),
            extraction: DEFAULT_EXTRACTION.to_string(),
            smart_merge: DEFAULT_SMART_MERGE.to_string(),
        }
    }

    /// Built-in templates overridden by any files present in `dir`
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut prompts = Self::builtin();
        let Some(dir) = dir else {
            return Ok(prompts);
        };

        if !dir.is_dir() {
            return Err(Error::ConfigError(format!(
                "Template directory does not exist: {}",
                dir.display()
            )));
        }

        for (file, slot) in [
            (SCHEMA_CHECK_FILE, &mut prompts.schema_check),
            (EXTRACTION_FILE, &mut prompts.extraction),
            (SMART_MERGE_FILE, &mut prompts.smart_merge),
        ] {
            let path = dir.join(file);
            if path.is_file() {
                *slot = std::fs::read_to_string(&path)?;
                debug!(template = %path.display(), "Loaded prompt template override");
            }
        }

        Ok(prompts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let out = render("Hello {name}, you have {count} tasks", &[("name", "Ana"), ("count", "2")]);
        assert_eq!(out, "Hello Ana, you have 2 tasks");
    }

    #[test]
    fn test_render_leaves_json_braces_alone() {
        let out = render(r#"{"classes": []} -> {text}"#, &[("text", "hi")]);
        assert_eq!(out, r#"{"classes": []} -> hi"#);
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let out = render("{a}", &[("a", "{b}"), ("b", "oops")]);
        assert_eq!(out, "{b}");
    }

    #[test]
    fn test_render_unknown_placeholder_kept() {
        assert_eq!(render("{missing} end", &[]), "{missing} end");
        assert_eq!(render("dangling {", &[]), "dangling {");
    }

    #[test]
    fn test_builtin_templates_mention_their_placeholders() {
        let prompts = PromptSet::builtin();
        assert!(prompts.schema_check.contains("{classes}"));
        assert!(prompts.schema_check.contains("{text}"));
        assert!(prompts.extraction.contains("{tuple_delimiter}"));
        assert!(prompts.extraction.contains("{predefined_entities}"));
        assert!(prompts.smart_merge.contains("{delta}"));
    }

    #[test]
    fn test_load_overrides_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(EXTRACTION_FILE), "custom {text}").unwrap();

        let prompts = PromptSet::load(Some(dir.path())).unwrap();
        assert_eq!(prompts.extraction, "custom {text}");
        assert_eq!(prompts.schema_check, PromptSet::builtin().schema_check);
    }

    #[test]
    fn test_load_missing_directory_fails() {
        let result = PromptSet::load(Some(Path::new("/definitely/not/here")));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
