use super::expand::expand_value;
use super::Spec;
use crate::SpecError;
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Parse a spec document and expand build args.
///
/// Values in `build_args` override the defaults declared under `args:`.
/// Build args that the spec does not declare are ignored.
pub fn load_spec(data: &[u8], build_args: &BTreeMap<String, String>) -> Result<Spec, SpecError> {
    let mut doc: Value = serde_yaml::from_slice(trim(data))?;
    if doc.is_null() {
        return Err(SpecError::Invalid("spec document is empty".to_string()));
    }
    if !doc.is_mapping() {
        return Err(SpecError::Invalid(
            "spec document must be a mapping".to_string(),
        ));
    }

    let declared: BTreeMap<String, Value> = match doc.get("args") {
        Some(Value::Null) | None => BTreeMap::new(),
        Some(args) => serde_yaml::from_value(args.clone())?,
    };

    let mut resolved = BTreeMap::new();
    for (name, default) in &declared {
        let value = build_args
            .get(name)
            .cloned()
            .or_else(|| scalar_to_string(default))
            .unwrap_or_default();
        resolved.insert(name.clone(), value);
    }
    for name in build_args.keys().filter(|k| !declared.contains_key(*k)) {
        debug!("Ignoring build arg {} not declared by the spec", name);
    }

    expand_value(&mut doc, &resolved)?;

    let spec: Spec = serde_yaml::from_value(doc)?;
    spec.validate()?;

    debug!(
        "Loaded spec {} with {} sources and {} build args",
        spec,
        spec.sources.len(),
        resolved.len()
    );
    Ok(spec)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn trim(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &data[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    const SPEC: &str = r#"
name: hello
description: A friendly greeter
license: MIT
version: ${VERSION}
revision: ${REVISION}
args:
  VERSION: 1.0.0
  REVISION: "1"
  COMMIT:
sources:
  src:
    git:
      url: https://github.com/example/hello.git
      commit: ${COMMIT}
build:
  steps:
    - command: make VERSION=${VERSION}
"#;

    fn build_args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_apply() {
        let spec = load_spec(SPEC.as_bytes(), &BTreeMap::new()).unwrap();
        assert_eq!(spec.version, "1.0.0");
        assert_eq!(spec.revision, "1");
        assert_eq!(spec.sources["src"].git.as_ref().unwrap().commit, "");
    }

    #[test]
    fn test_build_args_override_defaults() {
        let spec = load_spec(
            SPEC.as_bytes(),
            &build_args(&[("VERSION", "1.2.3"), ("REVISION", "4"), ("COMMIT", "abc")]),
        )
        .unwrap();
        assert_eq!(spec.version, "1.2.3");
        assert_eq!(spec.revision, "4");
        assert_eq!(spec.sources["src"].git.as_ref().unwrap().commit, "abc");
        // declared args keep their declared defaults in the model
        assert_eq!(spec.args["VERSION"].as_deref(), Some("1.0.0"));
        // shell steps are not expanded
        assert_eq!(spec.build.steps[0].command, "make VERSION=${VERSION}");
    }

    #[test]
    fn test_undeclared_build_arg_ignored() {
        let spec = load_spec(SPEC.as_bytes(), &build_args(&[("OTHER", "x")])).unwrap();
        assert_eq!(spec.name, "hello");
    }

    #[test]
    fn test_reference_to_undeclared_arg_fails() {
        let doc = "name: a\nversion: ${NOPE}\nrevision: '1'\n";
        let err = load_spec(doc.as_bytes(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SpecError::UndefinedArg(ref n) if n == "NOPE"));
        assert!(err.to_string().contains("NOPE"));
    }

    #[parameterized(
        empty = { "" },
        whitespace = { "   \n\t" },
        scalar = { "just a string" },
        list = { "- a\n- b" },
    )]
    fn test_invalid_documents(doc: &str) {
        assert!(matches!(
            load_spec(doc.as_bytes(), &BTreeMap::new()),
            Err(SpecError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = load_spec(b"name: [unclosed", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SpecError::Parse(_)));
        assert!(err.to_string().starts_with("error loading spec"));
    }

    #[parameterized(
        name = { "version: '1'\nrevision: '1'\n", "name" },
        version = { "name: a\nrevision: '1'\n", "version" },
        revision = { "name: a\nversion: '1'\n", "revision" },
    )]
    fn test_missing_required_fields(doc: &str, field: &str) {
        match load_spec(doc.as_bytes(), &BTreeMap::new()) {
            Err(SpecError::MissingField(f)) => assert_eq!(f, field),
            other => panic!("expected missing field, got {:?}", other),
        }
    }
}
