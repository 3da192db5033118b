//! Template grammar vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use tmplguard_core::grammar::{ast, parse, ParseLimits};

mod vector_loader;
use vector_loader::TestVector;

fn load(name: &str) -> TestVector {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}

#[test]
fn grammar_vectors() {
    let files = [
        "report_full.json",
        "nested_loops.json",
        "unclosed_section.json",
        "call_expression.json",
        "too_deep.json",
        "comments_only.json",
    ];

    let limits = ParseLimits {
        max_expression_length: 64,
        max_nesting: 3,
    };

    for f in files {
        let v = load(f);
        let src = v.template.decode();
        let res = parse(&src, &limits);

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.code().as_str(), err.code, "vector={}", v.description);
            assert_eq!(e.reason(), err.reason, "vector={}", v.description);
            continue;
        }

        let program = res.expect("expected program");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(program.len() as u64, ex["top_level"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(ast::node_count(&program) as u64, ex["nodes"].as_u64().unwrap(), "vector={}", v.description);

        let includes: Vec<String> = ex
            .get("includes")
            .and_then(|i| i.as_array())
            .map(|a| a.iter().map(|s| s.as_str().unwrap().to_string()).collect())
            .unwrap_or_default();
        assert_eq!(ast::include_paths(&program), includes, "vector={}", v.description);
    }
}
