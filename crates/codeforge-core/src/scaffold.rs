// Scaffold provider
//
// Deterministic starter-file generation: the same inputs always yield the
// same bytes. The workflow scaffold derives wrangler.jsonc and README.md
// entirely from the workflow metadata; the app scaffold is a minimal
// Vite-style project around a main entry.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::state::{FileRecord, ResourceKind, WorkflowMetadata, WORKFLOW_ENTRY_PATH};

/// Fallback class name when the code declares no workflow entrypoint
pub const DEFAULT_WORKFLOW_CLASS: &str = "MyWorkflow";

/// Pinned so regenerated scaffolds stay byte-identical
const COMPATIBILITY_DATE: &str = "2025-03-01";

/// Inputs to the workflow scaffold
#[derive(Debug, Clone, Default)]
pub struct ScaffoldRequest {
    pub workflow_name: String,
    /// Current workflow code; used to derive the class name
    pub workflow_code: Option<String>,
    pub metadata: Option<WorkflowMetadata>,
}

/// A generated scaffold
#[derive(Debug, Clone)]
pub struct Scaffold {
    pub all_files: Vec<FileRecord>,
    pub file_tree: Vec<String>,
    pub deps: BTreeMap<String, String>,
    /// Files the generator should read before editing
    pub important_files: Vec<String>,
    /// Derived files the generator must not edit by hand
    pub dont_touch_files: Vec<String>,
}

/// Extract the workflow class name from
/// `export class <Name> extends WorkflowEntrypoint`.
pub fn derive_workflow_class_name(code: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"export\s+class\s+(\w+)\s+extends\s+WorkflowEntrypoint").expect("static pattern")
    });
    re.captures(code)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_WORKFLOW_CLASS.to_string())
}

/// Build the workflow scaffold
pub fn workflow_scaffold(request: &ScaffoldRequest) -> Scaffold {
    let metadata = request.metadata.clone().unwrap_or_default();
    let class_name = request
        .workflow_code
        .as_deref()
        .map(derive_workflow_class_name)
        .unwrap_or_else(|| DEFAULT_WORKFLOW_CLASS.to_string());

    let name = if metadata.name.is_empty() {
        request.workflow_name.clone()
    } else {
        metadata.name.clone()
    };

    let index_ts = request.workflow_code.clone().unwrap_or_else(|| {
        format!(
            "import {{ WorkflowEntrypoint, WorkflowStep, WorkflowEvent }} from \"cloudflare:workers\";\n\n\
             export class {class_name} extends WorkflowEntrypoint<Env, Params> {{\n\
             \tasync run(event: WorkflowEvent<Params>, step: WorkflowStep) {{\n\
             \t\tawait step.do(\"start\", async () => {{\n\
             \t\t\treturn {{ started: true }};\n\
             \t\t}});\n\
             \t}}\n\
             }}\n\n\
             type Params = Record<string, unknown>;\n"
        )
    });

    let wrangler = render_wrangler(&name, &class_name, &metadata);
    let readme = render_readme(&name, &class_name, &metadata);

    let mut deps = BTreeMap::new();
    deps.insert("wrangler".to_string(), "^3.100.0".to_string());
    deps.insert("typescript".to_string(), "^5.6.0".to_string());

    let package_json = serde_json::to_string_pretty(&json!({
        "name": name,
        "private": true,
        "scripts": {
            "dev": "wrangler dev",
            "deploy": "wrangler deploy"
        },
        "devDependencies": deps,
    }))
    .expect("static package.json shape");

    let all_files = vec![
        FileRecord::new(WORKFLOW_ENTRY_PATH, index_ts, "workflow entrypoint"),
        FileRecord::new("wrangler.jsonc", wrangler, "wrangler configuration (derived)"),
        FileRecord::new("README.md", readme, "project readme (derived)"),
        FileRecord::new("package.json", package_json, "project manifest"),
    ];
    let file_tree = all_files.iter().map(|f| f.file_path.clone()).collect();

    Scaffold {
        all_files,
        file_tree,
        deps,
        important_files: vec![WORKFLOW_ENTRY_PATH.to_string()],
        dont_touch_files: vec!["wrangler.jsonc".to_string(), "README.md".to_string()],
    }
}

fn render_wrangler(name: &str, class_name: &str, metadata: &WorkflowMetadata) -> String {
    let mut root = Map::new();
    root.insert("name".to_string(), json!(name));
    root.insert("main".to_string(), json!(WORKFLOW_ENTRY_PATH));
    root.insert("compatibility_date".to_string(), json!(COMPATIBILITY_DATE));
    root.insert(
        "workflows".to_string(),
        json!([{
            "name": name,
            "binding": "WORKFLOW",
            "class_name": class_name,
        }]),
    );

    if !metadata.env_vars.is_empty() {
        root.insert("vars".to_string(), json!(metadata.env_vars));
    }

    // Resource kinds map onto dedicated wrangler sections
    let mut kv = Vec::new();
    let mut r2 = Vec::new();
    let mut d1 = Vec::new();
    let mut queues = Vec::new();
    let mut ai: Option<Value> = None;
    for (binding, resource) in &metadata.resources {
        match resource.kind {
            ResourceKind::Kv => kv.push(json!({
                "binding": binding,
                "id": resource.resource_name.clone().unwrap_or_default(),
            })),
            ResourceKind::R2 => r2.push(json!({
                "binding": binding,
                "bucket_name": resource.resource_name.clone().unwrap_or_default(),
            })),
            ResourceKind::D1 => d1.push(json!({
                "binding": binding,
                "database_name": resource.resource_name.clone().unwrap_or_default(),
            })),
            ResourceKind::Queue => queues.push(json!({
                "binding": binding,
                "queue": resource.resource_name.clone().unwrap_or_default(),
            })),
            ResourceKind::Ai => ai = Some(json!({"binding": binding})),
        }
    }
    if !kv.is_empty() {
        root.insert("kv_namespaces".to_string(), Value::Array(kv));
    }
    if !r2.is_empty() {
        root.insert("r2_buckets".to_string(), Value::Array(r2));
    }
    if !d1.is_empty() {
        root.insert("d1_databases".to_string(), Value::Array(d1));
    }
    if !queues.is_empty() {
        root.insert("queues".to_string(), json!({"producers": queues}));
    }
    if let Some(ai) = ai {
        root.insert("ai".to_string(), ai);
    }

    let body = serde_json::to_string_pretty(&Value::Object(root)).expect("wrangler shape");
    format!("// Generated from workflow metadata; do not edit by hand.\n{body}\n")
}

fn render_readme(name: &str, class_name: &str, metadata: &WorkflowMetadata) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {name}\n\n"));
    if !metadata.description.is_empty() {
        out.push_str(&format!("{}\n\n", metadata.description));
    }
    out.push_str(&format!(
        "Workflow entrypoint: `{class_name}` in `{WORKFLOW_ENTRY_PATH}`.\n\n"
    ));

    if let Some(properties) = metadata
        .params_schema
        .as_ref()
        .and_then(|s| s.get("properties"))
        .and_then(|p| p.as_object())
    {
        out.push_str("## Parameters\n\n| Name | Type | Description |\n|---|---|---|\n");
        for (param, schema) in properties {
            let kind = schema.get("type").and_then(|t| t.as_str()).unwrap_or("any");
            let description = schema
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("");
            out.push_str(&format!("| `{param}` | {kind} | {description} |\n"));
        }
        out.push('\n');
    }

    if !metadata.resources.is_empty() || !metadata.env_vars.is_empty() {
        out.push_str("## Bindings\n\n| Binding | Kind | Resource |\n|---|---|---|\n");
        for (binding, resource) in &metadata.resources {
            let kind = match resource.kind {
                ResourceKind::Kv => "kv",
                ResourceKind::R2 => "r2",
                ResourceKind::D1 => "d1",
                ResourceKind::Queue => "queue",
                ResourceKind::Ai => "ai",
            };
            out.push_str(&format!(
                "| `{binding}` | {kind} | {} |\n",
                resource.resource_name.as_deref().unwrap_or("-")
            ));
        }
        for var_name in metadata.env_vars.keys() {
            out.push_str(&format!("| `{var_name}` | var | - |\n"));
        }
        out.push('\n');
    }

    if !metadata.secrets.is_empty() {
        out.push_str("## Secrets\n\n");
        for (secret, description) in &metadata.secrets {
            out.push_str(&format!("- `{secret}`: {description}\n"));
        }
        out.push('\n');
    }

    out.push_str(
        "## Run locally\n\n```sh\nnpm install\nnpx wrangler dev\n```\n\n\
         ## Deploy\n\n```sh\nnpx wrangler deploy\n```\n",
    );
    out
}

/// Build the minimal app scaffold around a Vite entry
pub fn app_scaffold(project_name: &str) -> Scaffold {
    let mut deps = BTreeMap::new();
    deps.insert("react".to_string(), "^18.3.0".to_string());
    deps.insert("react-dom".to_string(), "^18.3.0".to_string());
    deps.insert("vite".to_string(), "^6.0.0".to_string());

    let package_json = serde_json::to_string_pretty(&json!({
        "name": project_name,
        "private": true,
        "type": "module",
        "scripts": {
            "dev": "vite",
            "build": "vite build"
        },
        "dependencies": {
            "react": deps["react"],
            "react-dom": deps["react-dom"],
        },
        "devDependencies": {
            "vite": deps["vite"],
        },
    }))
    .expect("static package.json shape");

    let index_html = format!(
        "<!doctype html>\n<html lang=\"en\">\n  <head>\n    <meta charset=\"UTF-8\" />\n    \
         <title>{project_name}</title>\n  </head>\n  <body>\n    <div id=\"root\"></div>\n    \
         <script type=\"module\" src=\"/src/main.tsx\"></script>\n  </body>\n</html>\n"
    );

    let main_tsx = "import React from \"react\";\nimport { createRoot } from \"react-dom/client\";\n\
                    import App from \"./App\";\n\n\
                    createRoot(document.getElementById(\"root\")!).render(<App />);\n";

    let app_tsx = "export default function App() {\n  return <main>Hello.</main>;\n}\n";

    let all_files = vec![
        FileRecord::new("index.html", index_html, "html shell"),
        FileRecord::new("src/main.tsx", main_tsx, "app entry"),
        FileRecord::new("src/App.tsx", app_tsx, "root component"),
        FileRecord::new("package.json", package_json, "project manifest"),
    ];
    let file_tree = all_files.iter().map(|f| f.file_path.clone()).collect();

    Scaffold {
        all_files,
        file_tree,
        deps,
        important_files: vec!["src/App.tsx".to_string(), "src/main.tsx".to_string()],
        dont_touch_files: vec!["index.html".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceBinding;

    fn metadata_with_bindings() -> WorkflowMetadata {
        let mut metadata = WorkflowMetadata {
            name: "slack-scheduler".to_string(),
            description: "Send a Slack message on a schedule".to_string(),
            params_schema: Some(json!({
                "type": "object",
                "properties": {
                    "channel": {"type": "string", "description": "Slack channel"}
                }
            })),
            ..Default::default()
        };
        metadata.resources.insert(
            "STATE".to_string(),
            ResourceBinding {
                kind: ResourceKind::Kv,
                resource_name: Some("scheduler-state".to_string()),
            },
        );
        metadata.resources.insert(
            "JOBS".to_string(),
            ResourceBinding {
                kind: ResourceKind::Queue,
                resource_name: Some("job-queue".to_string()),
            },
        );
        metadata
    }

    #[test]
    fn test_scaffold_is_deterministic() {
        let request = ScaffoldRequest {
            workflow_name: "slack-scheduler".to_string(),
            workflow_code: Some(
                "export class SlackScheduler extends WorkflowEntrypoint {}".to_string(),
            ),
            metadata: Some(metadata_with_bindings()),
        };
        let a = workflow_scaffold(&request);
        let b = workflow_scaffold(&request);
        for (fa, fb) in a.all_files.iter().zip(b.all_files.iter()) {
            assert_eq!(fa.file_contents, fb.file_contents);
        }
    }

    #[test]
    fn test_class_name_extraction() {
        assert_eq!(
            derive_workflow_class_name(
                "export class SlackScheduler extends WorkflowEntrypoint<Env, P> {}"
            ),
            "SlackScheduler"
        );
        assert_eq!(derive_workflow_class_name("const x = 1;"), DEFAULT_WORKFLOW_CLASS);
    }

    #[test]
    fn test_wrangler_binding_sections() {
        let request = ScaffoldRequest {
            workflow_name: "slack-scheduler".to_string(),
            workflow_code: None,
            metadata: Some(metadata_with_bindings()),
        };
        let scaffold = workflow_scaffold(&request);
        let wrangler = scaffold
            .all_files
            .iter()
            .find(|f| f.file_path == "wrangler.jsonc")
            .unwrap();

        assert!(wrangler.file_contents.contains("kv_namespaces"));
        assert!(wrangler.file_contents.contains("scheduler-state"));
        assert!(wrangler.file_contents.contains("producers"));
        assert!(wrangler.file_contents.contains("job-queue"));
        assert!(!wrangler.file_contents.contains("r2_buckets"));
    }

    #[test]
    fn test_readme_is_derived_from_metadata() {
        let request = ScaffoldRequest {
            workflow_name: "slack-scheduler".to_string(),
            workflow_code: None,
            metadata: Some(metadata_with_bindings()),
        };
        let scaffold = workflow_scaffold(&request);
        let readme = scaffold
            .all_files
            .iter()
            .find(|f| f.file_path == "README.md")
            .unwrap();

        assert!(readme.file_contents.contains("# slack-scheduler"));
        assert!(readme.file_contents.contains("| `channel` | string |"));
        assert!(readme.file_contents.contains("| `STATE` | kv |"));
        assert!(readme.file_contents.contains("wrangler deploy"));
    }

    #[test]
    fn test_app_scaffold_has_main_entry() {
        let scaffold = app_scaffold("counter-app");
        assert!(scaffold
            .all_files
            .iter()
            .any(|f| f.file_path == "src/main.tsx"));
        assert!(scaffold.important_files.contains(&"src/App.tsx".to_string()));
    }
}
