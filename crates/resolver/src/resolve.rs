use crate::error::{ResolveError, Result};
use crate::settings::ScopedSettings;
use once_cell::sync::Lazy;
use regex::Regex;
use relay_protocol::{LaunchTemplate, ResolvedLaunchSpec};
use std::collections::BTreeMap;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_-]+):([A-Za-z0-9_.-]+)\}\}").expect("valid regex"));

/// Expand a launch template against the settings store.
///
/// Substitution is a single pass: inserted values are never re-scanned for
/// placeholders, so a settings value containing `{{x:y}}` stays literal
/// instead of triggering further expansion. Empty-value filtering runs
/// strictly after substitution: an arg or env entry is dropped only if its
/// *final* value is empty.
///
/// Resolution is pure: the same (template, settings) pair always yields the
/// same spec.
pub fn resolve(template: &LaunchTemplate, settings: &ScopedSettings) -> Result<ResolvedLaunchSpec> {
    let command = substitute(&template.command, settings, &template.defaults)?;
    if command.trim().is_empty() {
        return Err(ResolveError::InvalidTemplate(
            "command resolved to an empty string".to_string(),
        ));
    }

    let mut args = Vec::with_capacity(template.args.len());
    for arg in &template.args {
        let resolved = substitute(arg, settings, &template.defaults)?;
        if !resolved.trim().is_empty() {
            args.push(resolved);
        }
    }

    let mut env = BTreeMap::new();
    for (key, value) in &template.env {
        let resolved = substitute(value, settings, &template.defaults)?;
        if !resolved.trim().is_empty() {
            env.insert(key.clone(), resolved);
        }
    }

    Ok(ResolvedLaunchSpec { command, args, env })
}

fn substitute(
    input: &str,
    settings: &ScopedSettings,
    defaults: &BTreeMap<String, String>,
) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for caps in PLACEHOLDER_RE.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let scope = &caps[1];
        let name = &caps[2];
        let key = format!("{scope}.{name}");

        let value = match settings.get(&key) {
            Some(value) => value,
            None => defaults.get(&key).map(String::as_str).ok_or_else(|| {
                ResolveError::UnresolvedPlaceholder {
                    placeholder: format!("{scope}:{name}"),
                    key: key.clone(),
                }
            })?,
        };

        output.push_str(&input[last..whole.start()]);
        output.push_str(value);
        last = whole.end();
    }

    output.push_str(&input[last..]);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings(pairs: &[(&str, &str)]) -> ScopedSettings {
        ScopedSettings::from_map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn template(command: &str, args: &[&str], env: &[(&str, &str)]) -> LaunchTemplate {
        LaunchTemplate {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            defaults: BTreeMap::new(),
        }
    }

    #[test]
    fn substitutes_placeholders_verbatim() {
        let spec = resolve(
            &template("uvx", &["--region", "{{aws:region}}"], &[]),
            &settings(&[("aws.region", "ap-southeast-1")]),
        )
        .unwrap();
        assert_eq!(spec.args, vec!["--region", "ap-southeast-1"]);
    }

    #[test]
    fn placeholder_resolving_non_empty_survives_filtering() {
        // The field is nothing but a placeholder; it must be kept because
        // its post-substitution value is non-empty.
        let spec = resolve(
            &template("uvx", &["{{aws:region}}"], &[]),
            &settings(&[("aws.region", "ap-southeast-1")]),
        )
        .unwrap();
        assert_eq!(spec.args, vec!["ap-southeast-1"]);
    }

    #[test]
    fn empty_resolved_fields_are_dropped() {
        let spec = resolve(
            &template(
                "uvx",
                &["server", "{{aws:profile}}"],
                &[("AWS_PROFILE", "{{aws:profile}}"), ("AWS_REGION", "{{aws:region}}")],
            ),
            &settings(&[("aws.profile", ""), ("aws.region", "eu-west-1")]),
        )
        .unwrap();
        assert_eq!(spec.args, vec!["server"]);
        assert_eq!(spec.env.get("AWS_PROFILE"), None);
        assert_eq!(spec.env.get("AWS_REGION").map(String::as_str), Some("eu-west-1"));
    }

    #[test]
    fn unresolved_placeholder_is_an_error() {
        let err = resolve(&template("uvx", &["{{x:y}}"], &[]), &settings(&[])).unwrap_err();
        match err {
            ResolveError::UnresolvedPlaceholder { placeholder, key } => {
                assert_eq!(placeholder, "x:y");
                assert_eq!(key, "x.y");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn declared_default_fills_missing_setting() {
        let mut template = template("uvx", &["--region", "{{aws:region}}"], &[]);
        template
            .defaults
            .insert("aws.region".to_string(), "us-east-1".to_string());

        let spec = resolve(&template, &settings(&[])).unwrap();
        assert_eq!(spec.args, vec!["--region", "us-east-1"]);

        // A settings key still wins over the default.
        let spec = resolve(&template, &settings(&[("aws.region", "eu-central-1")])).unwrap();
        assert_eq!(spec.args, vec!["--region", "eu-central-1"]);
    }

    #[test]
    fn inserted_values_are_not_rescanned() {
        let spec = resolve(
            &template("uvx", &["{{evil:value}}"], &[]),
            &settings(&[("evil.value", "{{aws:region}}")]),
        )
        .unwrap();
        // The substituted text contains what looks like a placeholder; it
        // must stay literal.
        assert_eq!(spec.args, vec!["{{aws:region}}"]);
    }

    #[test]
    fn multiple_placeholders_in_one_field() {
        let spec = resolve(
            &template("uvx", &["{{aws:profile}}@{{aws:region}}"], &[]),
            &settings(&[("aws.profile", "dev"), ("aws.region", "ap-southeast-1")]),
        )
        .unwrap();
        assert_eq!(spec.args, vec!["dev@ap-southeast-1"]);
    }

    #[test]
    fn empty_command_is_invalid() {
        let err = resolve(
            &template("{{tool:bin}}", &[], &[]),
            &settings(&[("tool.bin", "")]),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidTemplate(_)));
    }

    #[test]
    fn resolution_is_idempotent() {
        let template = template(
            "npx",
            &["-y", "@modelcontextprotocol/server-aws", "{{aws:region}}"],
            &[("AWS_PROFILE", "{{aws:profile}}")],
        );
        let settings = settings(&[("aws.region", "ap-southeast-1"), ("aws.profile", "dev")]);

        let first = resolve(&template, &settings).unwrap();
        let second = resolve(&template, &settings).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn text_without_placeholders_passes_through() {
        let spec = resolve(
            &template("docker", &["run", "--rm", "mcp/aws"], &[("MODE", "strict")]),
            &settings(&[]),
        )
        .unwrap();
        assert_eq!(spec.command, "docker");
        assert_eq!(spec.args, vec!["run", "--rm", "mcp/aws"]);
        assert_eq!(spec.env.get("MODE").map(String::as_str), Some("strict"));
    }
}
