//! `${VAR}` / `${VAR:-fallback}` expansion applied to raw config text.

use {once_cell::sync::Lazy, regex::Regex};

#[allow(clippy::expect_used)]
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("hardcoded regex")
});

/// Expand placeholders from the process environment.
///
/// Unset variables without a fallback are left as-is so the parser or the
/// validator can point at them.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match (lookup(name), caps.get(2)) {
                (Some(value), _) => value,
                (None, Some(fallback)) => fallback.as_str().to_string(),
                (None, None) => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "PARLEY_QUEUE" => Some("collect".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_set_variable() {
        assert_eq!(
            substitute_env_with("mode = \"${PARLEY_QUEUE}\"", lookup),
            "mode = \"collect\""
        );
    }

    #[test]
    fn unset_variable_uses_fallback_or_stays() {
        assert_eq!(substitute_env_with("${PARLEY_CAP:-20}", lookup), "20");
        assert_eq!(substitute_env_with("${PARLEY_CAP}", lookup), "${PARLEY_CAP}");
        assert_eq!(substitute_env_with("${PARLEY_QUEUE:-followup}", lookup), "collect");
    }

    #[test]
    fn malformed_placeholders_are_literal() {
        assert_eq!(substitute_env_with("${} and ${1X} and ${OPEN", lookup), "${} and ${1X} and ${OPEN");
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
