//! Function-call chart and file manifest data model.
//!
//! Model output is duck-typed: a function list item may be a bare string, a
//! name-only object, or a name with parameters, and a parameter may be a bare
//! string or a `{name, type}` pair. Each shape is resolved once here, at parse
//! time, so prompt composition and the pipeline never re-inspect raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Sentinel object name for manifest entries that are not a class/module
/// object.
pub const NONE_OBJECT: &str = "NoneObject";

// =============================================================================
// Function-call chart
// =============================================================================

/// A function parameter: either a bare name (the simpler chart variant) or a
/// named, typed pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ParamSpec {
    Typed {
        name: String,
        #[serde(rename = "type")]
        ty: String,
    },
    Bare(String),
}

impl ParamSpec {
    pub fn name(&self) -> &str {
        match self {
            ParamSpec::Typed { name, .. } => name,
            ParamSpec::Bare(name) => name,
        }
    }

    /// `name: type` when a type is known, else the bare name.
    pub fn render(&self) -> String {
        match self {
            ParamSpec::Typed { name, ty } => format!("{name}: {ty}"),
            ParamSpec::Bare(name) => name.clone(),
        }
    }
}

/// One function in the chart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

/// One feature area of the chart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChartSection {
    pub title: String,
    #[serde(default)]
    pub functions: Vec<FunctionDescriptor>,
}

/// The function-call chart: feature-area sections keyed by ordinal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FunctionCallChart {
    pub sections: BTreeMap<String, ChartSection>,
}

impl FunctionCallChart {
    /// Parse an extracted JSON object into a chart. `None` when any section
    /// fails to match the schema - a half-parsed chart is never returned.
    pub fn from_object(obj: Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(obj)).ok()
    }

    /// Sections ordered by their ordinal key ("2" before "10").
    pub fn sections_in_order(&self) -> Vec<(&str, &ChartSection)> {
        let mut sections: Vec<(&str, &ChartSection)> = self
            .sections
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        sections.sort_by_key(|(k, _)| (k.parse::<u64>().unwrap_or(u64::MAX), k.to_string()));
        sections
    }

    /// Human-readable rendering, stored under the reserved chart key.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (ordinal, section) in self.sections_in_order() {
            out.push_str(&format!("{}. {}\n", ordinal, section.title));
            for func in &section.functions {
                let params: Vec<String> = func.parameters.iter().map(|p| p.render()).collect();
                out.push_str(&format!(
                    "    - {}({}): {}\n",
                    func.name,
                    params.join(", "),
                    func.description
                ));
            }
        }
        out
    }
}

// =============================================================================
// File manifest
// =============================================================================

/// A required function on a manifest entry. Shapes are resolved once at parse
/// time; downstream code only calls [`FunctionSpec::signature`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FunctionSpec {
    /// `{"name": "play", "parameters": [...]}`
    Named {
        name: String,
        parameters: Vec<ParamSpec>,
    },
    /// `{"name": "play"}`
    NamedNoParams { name: String },
    /// `"play(userChoice)"`
    BareName(String),
}

impl FunctionSpec {
    /// Signature line for the per-file implementation prompt.
    pub fn signature(&self) -> String {
        match self {
            FunctionSpec::Named { name, parameters } => {
                let params: Vec<String> = parameters.iter().map(|p| p.render()).collect();
                format!("{}({})", name, params.join(", "))
            }
            FunctionSpec::NamedNoParams { name } => format!("{name}()"),
            FunctionSpec::BareName(sig) => sig.clone(),
        }
    }
}

/// One file of the target project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileManifestEntry {
    /// Relative directory, never containing the file name. Empty for the
    /// project root.
    #[serde(default)]
    pub path: String,
    /// File name.
    pub fname: String,
    /// Owning object name, or [`NONE_OBJECT`].
    #[serde(rename = "objectName", default = "default_object_name")]
    pub object_name: String,
    /// Required functions. Absent and empty are both "nothing to implement";
    /// resource entries omit the field entirely.
    #[serde(
        rename = "functionList",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub function_list: Option<Vec<FunctionSpec>>,
}

fn default_object_name() -> String {
    NONE_OBJECT.to_string()
}

impl FileManifestEntry {
    pub fn is_object(&self) -> bool {
        self.object_name != NONE_OBJECT
    }

    /// Functions to implement; empty for resource entries.
    pub fn functions(&self) -> &[FunctionSpec] {
        self.function_list.as_deref().unwrap_or(&[])
    }

    /// Stable identity within one project: `path/fname`, or just `fname` at
    /// the project root.
    pub fn file_id(&self) -> String {
        let path = self.path.trim_matches('/');
        if path.is_empty() {
            self.fname.clone()
        } else {
            format!("{}/{}", path, self.fname)
        }
    }
}

/// The file/module manifest describing the target project's structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileManifest {
    /// Plan summary the manifest prompt requires alongside the file list.
    #[serde(default)]
    pub plan: String,
    #[serde(rename = "Files", default)]
    pub files: Vec<FileManifestEntry>,
}

impl FileManifest {
    /// Parse an extracted JSON object into a manifest.
    pub fn from_object(obj: Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(obj)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chart_value() -> Value {
        json!({
            "1": {
                "title": "Game flow",
                "functions": [
                    {
                        "name": "game.play",
                        "description": "play one round",
                        "parameters": [{"name": "userChoice", "type": "string"}]
                    }
                ]
            }
        })
    }

    #[test]
    fn chart_parses_typed_parameters() {
        let Value::Object(obj) = chart_value() else {
            unreachable!()
        };
        let chart = FunctionCallChart::from_object(obj).unwrap();
        let section = &chart.sections["1"];
        assert_eq!(section.title, "Game flow");
        let func = &section.functions[0];
        assert_eq!(func.name, "game.play");
        assert_eq!(func.parameters[0].render(), "userChoice: string");
    }

    #[test]
    fn chart_parses_bare_parameters() {
        let value = json!({
            "1": {
                "title": "Auth",
                "functions": [
                    {"name": "auth.login", "description": "log in",
                     "parameters": ["email", "password"]}
                ]
            }
        });
        let Value::Object(obj) = value else {
            unreachable!()
        };
        let chart = FunctionCallChart::from_object(obj).unwrap();
        let func = &chart.sections["1"].functions[0];
        assert_eq!(func.parameters[0], ParamSpec::Bare("email".into()));
        assert_eq!(func.parameters[1].render(), "password");
    }

    #[test]
    fn chart_sections_order_numerically() {
        let value = json!({
            "10": {"title": "Ten", "functions": []},
            "2": {"title": "Two", "functions": []}
        });
        let Value::Object(obj) = value else {
            unreachable!()
        };
        let chart = FunctionCallChart::from_object(obj).unwrap();
        let order: Vec<&str> = chart.sections_in_order().iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec!["2", "10"]);
    }

    #[test]
    fn chart_render_shape() {
        let Value::Object(obj) = chart_value() else {
            unreachable!()
        };
        let chart = FunctionCallChart::from_object(obj).unwrap();
        let rendered = chart.render();
        assert_eq!(
            rendered,
            "1. Game flow\n    - game.play(userChoice: string): play one round\n"
        );
    }

    #[test]
    fn malformed_chart_is_none() {
        let value = json!({"1": {"functions": "not a list"}});
        let Value::Object(obj) = value else {
            unreachable!()
        };
        assert!(FunctionCallChart::from_object(obj).is_none());
    }

    #[test]
    fn manifest_parses_all_function_shapes() {
        let value = json!({
            "plan": "a small game",
            "Files": [
                {"path": "", "fname": "game.py", "objectName": "NoneObject",
                 "functionList": ["play(userChoice)"]},
                {"path": "controllers", "fname": "auth.py", "objectName": "AuthController",
                 "functionList": [
                     {"name": "login", "parameters": [{"name": "email", "type": "string"}]},
                     {"name": "logout"}
                 ]},
                {"path": "static", "fname": "style.css"}
            ]
        });
        let Value::Object(obj) = value else {
            unreachable!()
        };
        let manifest = FileManifest::from_object(obj).unwrap();
        assert_eq!(manifest.plan, "a small game");
        assert_eq!(manifest.files.len(), 3);

        let game = &manifest.files[0];
        assert!(!game.is_object());
        assert_eq!(game.functions()[0].signature(), "play(userChoice)");
        assert_eq!(game.file_id(), "game.py");

        let auth = &manifest.files[1];
        assert!(auth.is_object());
        assert_eq!(auth.functions()[0].signature(), "login(email: string)");
        assert_eq!(auth.functions()[1].signature(), "logout()");
        assert_eq!(auth.file_id(), "controllers/auth.py");

        let css = &manifest.files[2];
        assert_eq!(css.object_name, NONE_OBJECT);
        assert!(css.function_list.is_none());
        assert!(css.functions().is_empty());
    }

    #[test]
    fn absent_and_empty_function_lists_both_mean_nothing_to_implement() {
        let absent = FileManifestEntry {
            path: String::new(),
            fname: "logo.png".into(),
            object_name: NONE_OBJECT.into(),
            function_list: None,
        };
        let empty = FileManifestEntry {
            function_list: Some(Vec::new()),
            ..absent.clone()
        };
        assert!(absent.functions().is_empty());
        assert!(empty.functions().is_empty());
    }

    #[test]
    fn duplicate_names_across_files_are_legal() {
        let value = json!({
            "plan": "p",
            "Files": [
                {"path": "", "fname": "a.py", "functionList": ["run()"]},
                {"path": "", "fname": "b.py", "functionList": ["run()"]}
            ]
        });
        let Value::Object(obj) = value else {
            unreachable!()
        };
        let manifest = FileManifest::from_object(obj).unwrap();
        assert_eq!(manifest.files[0].functions()[0].signature(), "run()");
        assert_eq!(manifest.files[1].functions()[0].signature(), "run()");
    }
}
