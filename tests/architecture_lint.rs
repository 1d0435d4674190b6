//! Architecture enforcement lint - keeps hardware writes and client fan-out behind the hub.
//!
//! The hub control task is the single writer to the MIDI output and the note
//! table. If an HTTP handler or a background task talked to the output
//! directly, note-offs could race note-ons and dedup would stop working.
//!
//! - `.note_on(` / `.note_off(` only in `hub/` and `adapters/`
//! - the API layer reaches shared state only through `state.hub`
//! - no unbounded tokio channels anywhere; every queue has a capacity

use std::fs;
use std::path::Path;
use walkdir::WalkDir;

struct Rule {
    pattern: &'static str,
    /// Path fragments where the pattern is permitted
    allowed_in: &'static [&'static str],
    /// Only files under this fragment are checked; empty means all of src/
    scope: &'static str,
    fix: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        pattern: ".note_on(",
        allowed_in: &["/hub/", "/adapters/"],
        scope: "",
        fix: "Submit a HubEvent::Note through the dispatcher instead",
    },
    Rule {
        pattern: ".note_off(",
        allowed_in: &["/hub/", "/adapters/"],
        scope: "",
        fix: "Note-offs are scheduled by the hub after the hold time",
    },
    Rule {
        pattern: "crate::adapters",
        allowed_in: &[],
        scope: "/api/",
        fix: "Handlers use HubHandle; hardware is owned by the coordinator",
    },
    Rule {
        pattern: ".registry()",
        allowed_in: &[],
        scope: "/api/",
        fix: "Use state.hub.connect() / client_count() instead of the raw registry",
    },
    Rule {
        pattern: "unbounded_channel",
        allowed_in: &[],
        scope: "",
        fix: "Use mpsc::channel(capacity) so slow consumers are visible",
    },
];

/// Everything after `#[cfg(test)]` is test scaffolding and may break the rules
fn production_part(content: &str) -> &str {
    content
        .find("#[cfg(test)]")
        .map_or(content, |pos| &content[..pos])
}

fn analyze_file(path: &Path) -> Vec<String> {
    let path_str = path.display().to_string().replace('\\', "/");
    let Ok(content) = fs::read_to_string(path) else {
        return vec![];
    };
    let code = production_part(&content);

    let mut violations = Vec::new();
    for rule in RULES {
        if !rule.scope.is_empty() && !path_str.contains(rule.scope) {
            continue;
        }
        if rule.allowed_in.iter().any(|allowed| path_str.contains(allowed)) {
            continue;
        }
        for (idx, line) in code.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                continue;
            }
            if line.contains(rule.pattern) {
                violations.push(format!(
                    "{}:{}\n    Found: {}\n    Fix: {}",
                    path_str,
                    idx + 1,
                    rule.pattern,
                    rule.fix
                ));
            }
        }
    }
    violations
}

#[test]
fn hub_owns_hardware_and_fan_out() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");

    let mut all_violations = Vec::new();
    for entry in WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
    {
        all_violations.extend(analyze_file(entry.path()));
    }

    if !all_violations.is_empty() {
        panic!(
            "\n\nARCHITECTURE VIOLATION: hardware and clients are owned by the hub\n\n  {}\n",
            all_violations.join("\n\n  ")
        );
    }
}

#[test]
fn production_part_stops_at_test_module() {
    let source = "fn real() {}\n#[cfg(test)]\nmod tests { fn f() { out.note_on(1, 2); } }";
    assert!(!production_part(source).contains("note_on"));
    assert_eq!(production_part("fn only() {}"), "fn only() {}");
}

#[test]
fn app_state_exposes_hub_handle() {
    let api_mod = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("src")
        .join("api")
        .join("mod.rs");

    let content = fs::read_to_string(&api_mod).expect("Failed to read api/mod.rs");

    assert!(
        content.contains("pub hub: HubHandle"),
        "AppState must have a `pub hub: HubHandle` field"
    );
}
