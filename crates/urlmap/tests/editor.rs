#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Mutex;

use gatehouse_core::Topology;
use gatehouse_exec::fake::ScriptedExecutor;
use gatehouse_exec::{CommandExecutor, CommandOutput, ExecError, Gcloud, Invocation};
use gatehouse_urlmap::{matcher_rule_paths, UrlMapEditor, UrlMapError, OUTPUT_ONLY_FIELDS};
use serde_json::{json, Value as Json};

const ACME_BACKEND: &str = "https://www.googleapis.com/compute/v1/projects/acme-prod/global/backendServices/acme-backend";

fn topology() -> Topology {
    Topology {
        url_map: "shared-lb".into(),
        path_matcher: "path-matcher-1".into(),
        domain: "apps.example.com".into(),
        oauth_brand: "projects/42/brands/42".into(),
        iap_domain: "example.com".into(),
    }
}

fn scratch(name: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("gatehouse-urlmap-{}-{}.json", name, nanos))
}

fn live_doc() -> Json {
    json!({
        "kind": "compute#urlMap",
        "id": "8812093470012",
        "name": "shared-lb",
        "selfLink": "https://www.googleapis.com/compute/v1/projects/acme-prod/global/urlMaps/shared-lb",
        "creationTimestamp": "2024-03-01T10:00:00.000-08:00",
        "fingerprint": "fp-0",
        "defaultService": "https://www.googleapis.com/compute/v1/projects/acme-prod/global/backendServices/default",
        "pathMatchers": [{
            "name": "path-matcher-1",
            "kind": "compute#pathMatcher",
            "defaultService": "https://www.googleapis.com/compute/v1/projects/acme-prod/global/backendServices/default",
            "pathRules": [
                { "paths": ["/billing", "/billing/", "/billing/*"], "service": "billing-backend" }
            ]
        }]
    })
}

/// Holds one URL map; `describe` serves it, `import` reads the scratch file back in
/// and assigns fresh server fields the way the API would.
struct FakeUrlMap {
    doc: Mutex<Json>,
    imports: Mutex<Vec<Json>>,
}

impl FakeUrlMap {
    fn new(doc: Json) -> Self { Self { doc: Mutex::new(doc), imports: Mutex::new(Vec::new()) } }
}

impl CommandExecutor for FakeUrlMap {
    fn run(&self, inv: &Invocation) -> Result<CommandOutput, ExecError> {
        let verb = inv.args.get(2).map(String::as_str);
        match verb {
            Some("describe") => Ok(CommandOutput::ok(self.doc.lock().unwrap().to_string())),
            Some("import") => {
                let src = inv.args.iter().find_map(|a| a.strip_prefix("--source=")).unwrap();
                let body: Json = serde_json::from_str(&std::fs::read_to_string(src).unwrap()).unwrap();
                self.imports.lock().unwrap().push(body.clone());
                let mut stored = body;
                let n = self.imports.lock().unwrap().len();
                stored["fingerprint"] = json!(format!("fp-{}", n));
                stored["kind"] = json!("compute#urlMap");
                stored["id"] = json!("8812093470012");
                *self.doc.lock().unwrap() = stored;
                Ok(CommandOutput::ok(""))
            }
            _ => Ok(CommandOutput::failed(2, "unexpected command")),
        }
    }
}

fn active_paths(doc: &Json) -> BTreeSet<Vec<String>> {
    matcher_rule_paths(doc, "path-matcher-1").into_iter().collect()
}

#[test]
fn add_then_remove_restores_active_matcher_rules() {
    let fake = FakeUrlMap::new(live_doc());
    let g = Gcloud::with_program("gcloud", "acme-prod");
    let topo = topology();
    let editor = UrlMapEditor::new(&fake, &g, &topo).with_scratch_path(scratch("roundtrip")).with_preflight(true);

    let before = active_paths(&editor.fetch().unwrap());
    editor.add_rule("/acme", ACME_BACKEND, Some("acme-abc123-ez.a.run.app")).unwrap();

    let mid = editor.fetch().unwrap();
    let rules = mid["pathMatchers"][0]["pathRules"].as_array().unwrap();
    assert_eq!(rules.len(), 2);
    let added = &rules[1];
    assert_eq!(added["paths"], json!(["/acme", "/acme/", "/acme/*"]));
    assert_eq!(added["routeAction"]["urlRewrite"]["pathPrefixRewrite"], "/");
    assert_eq!(added["routeAction"]["urlRewrite"]["hostRewrite"], "acme-abc123-ez.a.run.app");
    assert_eq!(added["service"], ACME_BACKEND);

    assert_eq!(editor.remove_rule("/acme").unwrap(), 1);
    let after = active_paths(&editor.fetch().unwrap());
    assert_eq!(before, after);
}

#[test]
fn imported_documents_carry_no_output_only_fields() {
    let fake = FakeUrlMap::new(live_doc());
    let g = Gcloud::with_program("gcloud", "acme-prod");
    let topo = topology();
    let path = scratch("strip");
    let editor = UrlMapEditor::new(&fake, &g, &topo).with_scratch_path(&path);
    editor.add_rule("/acme", ACME_BACKEND, None).unwrap();

    let imported = fake.imports.lock().unwrap()[0].clone();
    for f in OUTPUT_ONLY_FIELDS {
        assert!(imported.get(*f).is_none(), "top-level {} imported", f);
        for m in imported["pathMatchers"].as_array().unwrap() {
            assert!(m.get(*f).is_none(), "matcher {} imported", f);
        }
    }
    assert_eq!(imported["id"], json!(8812093470012u64));
    // The scratch file is left behind with the same body.
    let on_disk: Json = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk, imported);
}

#[test]
fn changed_fingerprint_blocks_import() {
    let fake = ScriptedExecutor::new();
    let mut moved = live_doc();
    moved["fingerprint"] = json!("fp-someone-else");
    fake.on(&["compute", "url-maps", "describe"], CommandOutput::ok(live_doc().to_string()));
    fake.on(&["compute", "url-maps", "describe"], CommandOutput::ok(moved.to_string()));
    fake.on(&["compute", "url-maps", "import"], CommandOutput::ok(""));
    let g = Gcloud::with_program("gcloud", "acme-prod");
    let topo = topology();
    let editor = UrlMapEditor::new(&fake, &g, &topo).with_scratch_path(scratch("stale")).with_preflight(true);

    let err = editor.add_rule("/acme", ACME_BACKEND, None).unwrap_err();
    assert!(matches!(err, UrlMapError::Stale { ref before, ref after } if before == "fp-0" && after == "fp-someone-else"));
    assert!(fake.calls_matching(&["compute", "url-maps", "import"]).is_empty());
}

#[test]
fn malformed_json_and_missing_matcher_fail_without_import() {
    let fake = ScriptedExecutor::new();
    fake.on(&["compute", "url-maps", "describe"], CommandOutput::ok("{ not json"));
    let g = Gcloud::with_program("gcloud", "acme-prod");
    let topo = topology();
    let editor = UrlMapEditor::new(&fake, &g, &topo).with_scratch_path(scratch("bad"));
    assert!(matches!(editor.add_rule("/acme", ACME_BACKEND, None), Err(UrlMapError::Json(_))));
    assert!(matches!(editor.remove_rule("/acme"), Err(UrlMapError::Json(_))));

    let fake = ScriptedExecutor::new();
    fake.on(&["compute", "url-maps", "describe"], CommandOutput::ok(json!({ "name": "shared-lb", "pathMatchers": [] }).to_string()));
    let editor = UrlMapEditor::new(&fake, &g, &topo).with_scratch_path(scratch("nomatcher"));
    assert!(matches!(editor.add_rule("/acme", ACME_BACKEND, None), Err(UrlMapError::MatcherNotFound(_))));
    assert!(fake.calls_matching(&["compute", "url-maps", "import"]).is_empty());
}

#[test]
fn import_failure_is_reported() {
    let fake = ScriptedExecutor::new();
    fake.on(&["compute", "url-maps", "describe"], CommandOutput::ok(live_doc().to_string()));
    fake.on(&["compute", "url-maps", "import"], CommandOutput::failed(1, "ERROR: invalid pathRules"));
    let g = Gcloud::with_program("gcloud", "acme-prod");
    let topo = topology();
    let editor = UrlMapEditor::new(&fake, &g, &topo).with_scratch_path(scratch("importfail")).with_preflight(false);
    let err = editor.add_rule("/acme", ACME_BACKEND, None).unwrap_err();
    assert!(matches!(err, UrlMapError::Command(_)));
    assert!(err.to_string().contains("invalid pathRules"), "err={}", err);
}

#[test]
fn removing_an_absent_prefix_skips_import() {
    let fake = ScriptedExecutor::new();
    fake.on(&["compute", "url-maps", "describe"], CommandOutput::ok(live_doc().to_string()));
    let g = Gcloud::with_program("gcloud", "acme-prod");
    let topo = topology();
    let editor = UrlMapEditor::new(&fake, &g, &topo).with_scratch_path(scratch("absent"));
    assert_eq!(editor.remove_rule("/acme").unwrap(), 0);
    assert!(fake.mutating_calls().is_empty());
}

#[test]
fn adding_the_same_rule_twice_imports_once() {
    let fake = FakeUrlMap::new(live_doc());
    let g = Gcloud::with_program("gcloud", "acme-prod");
    let topo = topology();
    let editor = UrlMapEditor::new(&fake, &g, &topo).with_scratch_path(scratch("twice"));

    editor.add_rule("/acme", ACME_BACKEND, None).unwrap();
    editor.add_rule("/acme", ACME_BACKEND, None).unwrap();
    assert_eq!(fake.imports.lock().unwrap().len(), 1);
    let acme: Vec<_> = active_paths(&editor.fetch().unwrap()).into_iter().filter(|p| p[0] == "/acme").collect();
    assert_eq!(acme.len(), 1);

    // A changed host rewrite replaces the rule rather than adding a second one.
    editor.add_rule("/acme", ACME_BACKEND, Some("acme-abc123-ez.a.run.app")).unwrap();
    assert_eq!(fake.imports.lock().unwrap().len(), 2);
    let doc = editor.fetch().unwrap();
    let rules = doc["pathMatchers"][0]["pathRules"].as_array().unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[1]["routeAction"]["urlRewrite"]["hostRewrite"], "acme-abc123-ez.a.run.app");
}
