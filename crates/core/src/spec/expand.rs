use crate::SpecError;
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn arg_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex")
    })
}

/// Replace `${NAME}` references in `input` with values from `args`.
///
/// `$$` yields a literal `$`; a bare `$NAME` is left alone so shell
/// variables survive. Unknown names are an error.
pub fn expand_args(input: &str, args: &BTreeMap<String, String>) -> Result<String, SpecError> {
    let mut undefined = None;
    let out = arg_pattern().replace_all(input, |caps: &Captures| match caps.get(1) {
        None => "$".to_string(),
        Some(name) => match args.get(name.as_str()) {
            Some(value) => value.clone(),
            None => {
                undefined.get_or_insert_with(|| name.as_str().to_string());
                String::new()
            }
        },
    });

    match undefined {
        Some(name) => Err(SpecError::UndefinedArg(name)),
        None => Ok(out.into_owned()),
    }
}

/// Keys whose string values are handed to a shell or written verbatim and
/// are never expanded.
const VERBATIM_KEYS: &[&str] = &["steps", "contents", "args"];

pub(crate) fn expand_value(value: &mut Value, args: &BTreeMap<String, String>) -> Result<(), SpecError> {
    match value {
        Value::String(s) => {
            *s = expand_args(s, args)?;
        }
        Value::Sequence(items) => {
            for item in items {
                expand_value(item, args)?;
            }
        }
        Value::Mapping(map) => {
            for (key, item) in map.iter_mut() {
                if key.as_str().is_some_and(|k| VERBATIM_KEYS.contains(&k)) {
                    continue;
                }
                expand_value(item, args)?;
            }
        }
        Value::Tagged(tagged) => expand_value(&mut tagged.value, args)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_expand_braced() {
        let a = args(&[("VERSION", "1.2.3")]);
        assert_eq!(expand_args("v${VERSION}", &a).unwrap(), "v1.2.3");
    }

    #[test]
    fn test_bare_dollar_untouched() {
        let a = args(&[("HOME", "/nope")]);
        assert_eq!(expand_args("$HOME/bin", &a).unwrap(), "$HOME/bin");
    }

    #[test]
    fn test_escape() {
        assert_eq!(expand_args("cost: $$5", &args(&[])).unwrap(), "cost: $5");
        assert_eq!(expand_args("$${X}", &args(&[])).unwrap(), "${X}");
    }

    #[test]
    fn test_undefined_arg() {
        let err = expand_args("${MISSING}", &args(&[])).unwrap_err();
        assert!(matches!(err, SpecError::UndefinedArg(ref n) if n == "MISSING"));
    }

    #[test]
    fn test_verbatim_keys_skipped() {
        let mut value: Value = serde_yaml::from_str(
            r#"
version: ${V}
build:
  env:
    GOFLAGS: -ldflags=-X=main.version=${V}
  steps:
    - command: echo ${SHELL_ONLY}
"#,
        )
        .unwrap();
        expand_value(&mut value, &args(&[("V", "2.0")])).unwrap();
        assert_eq!(value["version"].as_str(), Some("2.0"));
        assert_eq!(
            value["build"]["env"]["GOFLAGS"].as_str(),
            Some("-ldflags=-X=main.version=2.0")
        );
        assert_eq!(
            value["build"]["steps"][0]["command"].as_str(),
            Some("echo ${SHELL_ONLY}")
        );
    }
}
