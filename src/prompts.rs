//! Prompt composition for each generation stage.
//!
//! Pure functions of (stage, project state, new input) - no side effects, no
//! network access. Every stage whose reply is parsed as JSON repeats the
//! "respond with JSON only" instruction: the extractor is deliberately
//! liberal, and the redundancy is what keeps it fed with parseable output.

use crate::manifest::{FileManifest, FileManifestEntry, NONE_OBJECT};
use crate::store::FileRef;

/// Separator between context sections, as the chart stage sends them.
const SECTION_SEP: &str = "\n\n\n";

const CHART_SUFFIX: &str = r#"
Based on the content above, split the required work into feature areas and
produce a function-call chart: each feature area lists its functions, and every
function spells out its parameters with names and types.

Respond with JSON only. The reply is parsed mechanically, so do not wrap it in
any other text.
Example:
{
    "1": {
        "title": "User authentication and membership",
        "functions": [
            {
                "name": "auth_controller.register",
                "description": "Handle sign-up",
                "parameters": [
                    {"name": "username", "type": "string"},
                    {"name": "email", "type": "string"},
                    {"name": "password", "type": "string"}
                ]
            },
            {
                "name": "auth_controller.login",
                "description": "Handle login",
                "parameters": [
                    {"name": "email", "type": "string"},
                    {"name": "password", "type": "string"}
                ]
            }
        ]
    },
    "2": {
        "title": "Product management",
        "functions": [
            {
                "name": "product_controller.create_product",
                "description": "Create a new product",
                "parameters": [
                    {"name": "name", "type": "string"},
                    {"name": "price", "type": "number"}
                ]
            }
        ]
    }
}"#;

const MANIFEST_SUFFIX: &str = r#"
Using the description, flow chart and function-call chart above, design a
project that can run immediately as Python Flask with HTML, and produce its
code file list. Flask always needs app.py and requirements.txt.
Every code file entry must include its path, and resource files must be listed
too. Include a short plan summary in the JSON.
Do not implement any code - only the design file list.
Code files must carry a functionList; resource files may omit it.
Object files must carry an objectName; use NoneObject for anything that is not
an object.

Respond with JSON only. The reply is parsed mechanically, so do not wrap it in
any other text.
{
    "plan": "...",
    "Files": [
        {"path": "", "fname": "app.py", "objectName": "NoneObject", "functionList": ["functionName(args)"]},
        {"path": "static", "fname": "style.css"}
    ]
}"#;

/// Chart generation. The description is resent only when the model has not
/// seen it: a new project, a first request, or a changed description.
/// Otherwise the flowchart alone rides on the prior turn kept by the store.
pub fn chart_generation(description: &str, flowchart: &str, resend_description: bool) -> String {
    let context = if resend_description {
        format!("{description}{SECTION_SEP}{flowchart}")
    } else {
        flowchart.to_string()
    };
    format!("{context}{SECTION_SEP}{CHART_SUFFIX}")
}

/// Chart modification: existing chart text plus the requested change.
pub fn chart_modification(existing_chart: &str, instruction: &str) -> String {
    format!(
        "{existing_chart}\n\n{instruction}\n\n\
         Apply the requested change to the function-call chart above and return \
         the complete updated chart. Respond with JSON only, in the same schema \
         as the existing chart - the reply is parsed mechanically."
    )
}

/// File-manifest generation from the full accumulated context.
pub fn file_manifest(description: &str, flowchart: &str, chart_text: &str) -> String {
    format!("{description}\n\n{flowchart}\n\n{chart_text}\n\n{MANIFEST_SUFFIX}")
}

/// Per-file implementation: the whole manifest as shared context, then the
/// target file and its required signatures.
pub fn file_implementation(manifest: &FileManifest, entry: &FileManifestEntry) -> String {
    let manifest_json =
        serde_json::to_string_pretty(manifest).unwrap_or_else(|_| "{}".to_string());

    let mut prompt = format!(
        "Based on the following code structure, implement the functions for the \
         file {}:\n\n{}\n\n",
        entry.fname, manifest_json
    );

    if entry.object_name != NONE_OBJECT {
        prompt.push_str(&format!(
            "Implement the following functions for {}:\n",
            entry.object_name
        ));
    } else {
        prompt.push_str("Implement the following functions:\n");
    }

    let functions = entry.functions();
    if functions.is_empty() {
        prompt.push_str("No specific functions provided.\n");
    } else {
        for func in functions {
            prompt.push_str(&format!("- {}\n", func.signature()));
        }
    }

    prompt.push_str(
        "\nImplement exactly these functions, consistent with the rest of the \
         manifest. Reply with the complete file content in a single fenced code \
         block and nothing else.",
    );
    prompt
}

/// Incremental modification: full context plus the current content of every
/// file selected for editing.
pub fn feature_change(
    description: &str,
    flowchart: &str,
    chart_text: &str,
    instruction: &str,
    files: &[(FileRef, String)],
) -> String {
    let mut prompt = format!(
        "{description}\n\n{flowchart}\n\n{chart_text}\n\nRequested change:\n{instruction}\n\n\
         Current files:\n"
    );

    for (file, content) in files {
        prompt.push_str(&format!("### {}\n```\n{content}\n```\n\n", file.file_id()));
    }

    prompt.push_str(
        "Apply the requested change and return every file that needs to be \
         updated. Respond with JSON only - the reply is parsed mechanically: an \
         object keyed by file name, where each value is either the new file \
         content as a string or an object with a \"content\" field.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FunctionSpec;

    fn entry(fname: &str, object_name: &str, functions: Option<Vec<FunctionSpec>>) -> FileManifestEntry {
        FileManifestEntry {
            path: String::new(),
            fname: fname.into(),
            object_name: object_name.into(),
            function_list: functions,
        }
    }

    #[test]
    fn chart_prompt_resends_description_for_new_projects() {
        let with = chart_generation("a game", "1. pick; 2. show", true);
        let without = chart_generation("a game", "1. pick; 2. show", false);

        assert!(with.contains("a game"));
        assert!(!without.contains("a game"));
        assert!(with.len() > without.len());
        for p in [&with, &without] {
            assert!(p.contains("1. pick; 2. show"));
            assert!(p.contains("JSON only"));
        }
    }

    #[test]
    fn chart_prompt_is_deterministic() {
        let a = chart_generation("d", "f", true);
        let b = chart_generation("d", "f", true);
        assert_eq!(a, b);
    }

    #[test]
    fn modification_prompt_carries_chart_and_reminder() {
        let p = chart_modification("1. Old chart", "rename section one");
        assert!(p.starts_with("1. Old chart"));
        assert!(p.contains("rename section one"));
        assert!(p.contains("JSON only"));
    }

    #[test]
    fn manifest_prompt_fixes_the_schema() {
        let p = file_manifest("desc", "flow", "chart");
        for needle in ["desc", "flow", "chart", "plan", "Files", "objectName", "functionList", "NoneObject", "JSON only"] {
            assert!(p.contains(needle), "missing {needle}");
        }
        assert!(p.contains("Do not implement any code"));
    }

    #[test]
    fn implementation_prompt_enumerates_signatures() {
        let manifest = FileManifest {
            plan: "p".into(),
            files: vec![entry(
                "auth.py",
                "AuthController",
                Some(vec![FunctionSpec::BareName("login(email, password)".into())]),
            )],
        };
        let p = file_implementation(&manifest, &manifest.files[0]);
        assert!(p.contains("auth.py"));
        assert!(p.contains("for AuthController"));
        assert!(p.contains("- login(email, password)"));
        assert!(p.contains("fenced code block"));
    }

    #[test]
    fn implementation_prompt_handles_resource_entries() {
        let manifest = FileManifest {
            plan: String::new(),
            files: vec![entry("style.css", NONE_OBJECT, None)],
        };
        let p = file_implementation(&manifest, &manifest.files[0]);
        assert!(p.contains("No specific functions provided."));
        assert!(!p.contains("for NoneObject"));
    }

    #[test]
    fn feature_prompt_includes_selected_file_contents() {
        let files = vec![(
            FileRef {
                path: "controllers".into(),
                fname: "auth.py".into(),
            },
            "def login(): pass".into(),
        )];
        let p = feature_change("d", "f", "c", "add logout", &files);
        assert!(p.contains("### controllers/auth.py"));
        assert!(p.contains("def login(): pass"));
        assert!(p.contains("add logout"));
        assert!(p.contains("JSON only"));
        assert!(p.contains("\"content\""));
    }
}
