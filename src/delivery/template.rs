//! Template placeholder extraction, validation, and rendering (spec
//! §4.8 enqueue: "resolve template... extract `{{var}}` names; reject
//! if variables missing").

use serde_json::Value;

/// Extract every `{{dotted.path}}` placeholder in `text`, in order of
/// first appearance, without duplicates.
pub fn extract_placeholders(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        let name = after[..end].trim().to_string();
        if !name.is_empty() && !seen.contains(&name) {
            seen.push(name);
        }
        rest = &after[end + 2..];
    }
    seen
}

fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}

/// Names (dotted paths) present in `required` but absent from `variables`.
pub fn missing_variables(required: &[String], variables: &Value) -> Vec<String> {
    required.iter().filter(|name| resolve_path(variables, name).is_none()).cloned().collect()
}

/// Substitute every `{{dotted.path}}` occurrence with its resolved
/// value (stringified), or drop it to an empty string if unresolved -
/// validation already rejected truly-missing variables at enqueue time.
pub fn render(text: &str, variables: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str("{{");
            rest = after;
            continue;
        };
        let name = after[..end].trim();
        let replacement = resolve_path(variables, name)
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        out.push_str(&replacement);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_dotted_placeholders() {
        let names = extract_placeholders("hi {{user.name}}, code {{otp}}");
        assert_eq!(names, vec!["user.name".to_string(), "otp".to_string()]);
    }

    #[test]
    fn missing_variables_reports_unresolved_paths() {
        let missing = missing_variables(&["user.name".to_string()], &json!({"user": {}}));
        assert_eq!(missing, vec!["user.name".to_string()]);
    }

    #[test]
    fn render_substitutes_resolved_values() {
        let rendered = render("hi {{user.name}}", &json!({"user": {"name": "Ada"}}));
        assert_eq!(rendered, "hi Ada");
    }
}
