//! Script and file templating.
//!
//! Templates use Jinja syntax rendered by `minijinja`: `{{ }}` expressions,
//! `{% %}` statements, `{# #}` comments and `-` whitespace control. Besides
//! the builtins, templates get the `prepend`, `preserve`, `base64` and
//! `indent` filters and the `setting`, `parse_url`, `bool` and `hash`
//! globals. Names resolve against the sources of a [`FunctionContext`] with
//! `deployment`, `resource`, `component`, `clients` and `patterns` always
//! defined.

use crate::core::functions::{is_truthy, patterns, FunctionContext};
use crate::core::inputs::Input;
use crate::core::keys::hash_sha512;
use crate::utils::error::{ChessboardError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use minijinja::value::{Kwargs, Value as TemplateValue};
use minijinja::{Environment, Error as TemplateError, ErrorKind, UndefinedBehavior};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// Renders a value the way a template prints it.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Prepends `prefix` when `value` is not empty.
pub fn do_prepend(value: &Value, prefix: &str) -> String {
    if is_truthy(value) {
        format!("{}{}", prefix, render_value(value))
    } else {
        String::new()
    }
}

/// Escapes linefeeds so the output works inside both YAML and JSON strings.
pub fn preserve_linefeeds(value: &str) -> String {
    value.replace('\n', "\\n").replace('\r', "")
}

/// Parses a URL (or URL mapping) into its attributes. Always returns a URL
/// mapping, with empty certificate entries when none were supplied.
pub fn parse_url(value: &Value) -> Value {
    let source = if value.is_null() {
        Value::String(String::new())
    } else {
        value.clone()
    };
    let mut input = Input::new(&source);
    input.parse_url();
    let mut parsed = input.to_value();
    if let Value::Object(attributes) = &mut parsed {
        for key in ["certificate", "private_key", "intermediate_key"] {
            let entry = attributes.entry(key).or_insert(Value::Null);
            if entry.is_null() {
                *entry = Value::String(String::new());
            }
        }
    }
    parsed
}

/// MIME base64: lines of 76 characters, each ending in a newline.
fn encode_base64(value: &str) -> String {
    let encoded = STANDARD.encode(value.as_bytes());
    let mut output = String::with_capacity(encoded.len() + encoded.len() / 76 + 1);
    for chunk in encoded.as_bytes().chunks(76) {
        output.push_str(&String::from_utf8_lossy(chunk));
        output.push('\n');
    }
    output
}

fn indent(value: &str, width: usize) -> String {
    let padding = " ".repeat(width);
    value
        .split('\n')
        .enumerate()
        .map(|(index, line)| {
            if index == 0 || line.is_empty() {
                line.to_string()
            } else {
                format!("{}{}", padding, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_json(value: &TemplateValue) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn to_template(value: &Value) -> TemplateValue {
    TemplateValue::from_serialize(value)
}

fn invalid(detail: impl Into<String>) -> TemplateError {
    TemplateError::new(ErrorKind::InvalidOperation, detail.into())
}

/// Settings resolved so far and the names the last render asked for but
/// did not find.
#[derive(Default)]
struct SettingCache {
    resolved: HashMap<String, Value>,
    missing: Vec<String>,
}

fn environment<'source>(cache: Arc<Mutex<SettingCache>>) -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env.set_keep_trailing_newline(true);
    env.set_formatter(|out, _state, value| {
        write!(out, "{}", render_value(&to_json(value)))
            .map_err(|_| TemplateError::new(ErrorKind::WriteFailure, "could not write output"))
    });

    env.add_filter("preserve", |value: TemplateValue| {
        preserve_linefeeds(&render_value(&to_json(&value)))
    });
    env.add_filter("prepend", |value: TemplateValue, prefix: Option<TemplateValue>| {
        let prefix = prefix
            .map(|prefix| render_value(&to_json(&prefix)))
            .unwrap_or_else(|| "/".to_string());
        do_prepend(&to_json(&value), &prefix)
    });
    env.add_filter("base64", |value: TemplateValue| {
        encode_base64(&render_value(&to_json(&value)))
    });
    env.add_filter("indent", |value: TemplateValue, width: Option<TemplateValue>| {
        let width = width
            .map(|width| match to_json(&width) {
                Value::Number(number) => number.as_u64(),
                other => render_value(&other).parse().ok(),
            })
            .unwrap_or(Some(4))
            .unwrap_or(4);
        indent(&render_value(&to_json(&value)), width as usize)
    });

    env.add_function(
        "setting",
        move |name: TemplateValue| -> std::result::Result<TemplateValue, TemplateError> {
            let name = render_value(&to_json(&name));
            let mut cache = cache
                .lock()
                .map_err(|_| invalid("setting cache is unavailable"))?;
            if let Some(value) = cache.resolved.get(&name) {
                return Ok(to_template(value));
            }
            cache.missing.push(name);
            Ok(TemplateValue::UNDEFINED)
        },
    );
    env.add_function("parse_url", |value: Option<TemplateValue>| {
        to_template(&parse_url(&value.map(|v| to_json(&v)).unwrap_or(Value::Null)))
    });
    env.add_function("bool", |value: Option<TemplateValue>| {
        is_truthy(&value.map(|v| to_json(&v)).unwrap_or(Value::Null))
    });
    env.add_function(
        "hash",
        |value: TemplateValue,
         salt: Option<TemplateValue>,
         kwargs: Kwargs|
         -> std::result::Result<String, TemplateError> {
            let salt = match salt {
                Some(salt) => Some(salt),
                None => kwargs.get::<Option<TemplateValue>>("salt")?,
            };
            kwargs.assert_all_used()?;
            let salt = salt.map(|salt| render_value(&to_json(&salt)));
            Ok(hash_sha512(
                &render_value(&to_json(&value)),
                salt.as_deref(),
            ))
        },
    );
    env
}

/// Renders `template` against `context`.
pub fn parse(template: &str, context: &FunctionContext<'_>) -> Result<String> {
    parse_with_globals(template, context, &Map::new())
}

/// Renders `template` with `extra_globals` taking precedence over context
/// lookups.
///
/// Settings are looked up through the context between renders: a render
/// that asks for settings not resolved yet is repeated once they are.
pub fn parse_with_globals(
    template: &str,
    context: &FunctionContext<'_>,
    extra_globals: &Map<String, Value>,
) -> Result<String> {
    let mut variables = json!({
        "deployment": {"id": ""},
        "resource": {},
        "component": {},
        "clients": [],
    });
    if let Value::Object(variables) = &mut variables {
        for (name, source) in context.sources() {
            variables.insert(name.to_string(), source.clone());
        }
        variables.insert("patterns".into(), patterns()["patterns"].clone());
        for (name, value) in extra_globals {
            variables.insert(name.clone(), value.clone());
        }
    }

    let cache = Arc::new(Mutex::new(SettingCache::default()));
    let env = environment(Arc::clone(&cache));
    let failed = |detail: String| {
        error!("Template rendering failed: {}", detail);
        ChessboardError::template(detail)
    };
    let compiled = env
        .template_from_str(template)
        .map_err(|err| failed(err.to_string()))?;

    loop {
        let rendered = compiled.render(&variables);
        let mut missing = {
            let mut cache = cache
                .lock()
                .map_err(|_| failed("setting cache is unavailable".into()))?;
            std::mem::take(&mut cache.missing)
        };
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            let mut output = rendered.map_err(|err| failed(err.to_string()))?;
            if output.ends_with('\n') {
                output.pop();
            }
            return Ok(output);
        }

        debug!("Resolving template settings: {:?}", missing);
        for name in missing {
            let value = context
                .setting(&name)
                .map_err(|err| failed(err.to_string()))?;
            let mut cache = cache
                .lock()
                .map_err(|_| failed("setting cache is unavailable".into()))?;
            cache.resolved.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CERT: &str = "-----BEGIN CERTIFICATE-----
MIICkjCCAfsCAgXeMA0GCSqGSIb3DQEBBQUAMIG2MQswCQYDVQQGEwJVUzEOMAwG
A1UECBMFVGV4YXMxFDASBgNVBAcTC1NhbiBBbnRvbmlvMRIwEAYDVQQKEwlSYWNr
c3BhY2UxHjAcBgNVBAsTFVN5c3RlbSBBZG1pbmlzdHJhdGlvbjEjMCEGA1UEAxMa
-----END CERTIFICATE-----";

    fn render(template: &str) -> String {
        parse(template, &FunctionContext::new()).unwrap()
    }

    fn with_url_setting() -> FunctionContext<'static> {
        FunctionContext::new().with_settings(Box::new(|name| {
            Ok(if name == "url" {
                json!({"url": "http://github.com", "certificate": TEST_CERT})
            } else {
                json!("")
            })
        }))
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(render("no blocks here"), "no blocks here");
        assert_eq!(render("trailing newline\n"), "trailing newline");
    }

    #[test]
    fn test_hash() {
        assert_eq!(
            render("value: {{ hash('password', salt='ahem1234') }}"),
            "value: $6$rounds=100000$ahem1234$WDinkd.aajNmGHPGJpdEnQwhipq3nDNSejs15KMCu/fYJ.0b.9ZC9oLicedLAU.rlBlNJcwGe/rOzh5.SrJSv1"
        );
    }

    #[test]
    fn test_parse_url() {
        let parsed = render(
            "scheme: {{ parse_url('http://github.com').scheme }}\nnetloc: {{ parse_url('http://github.com').netloc }}\npath: {{ parse_url('http://github.com/checkmate').path }}\nfragment: {{ parse_url('http://github.com/#master').fragment }}\n",
        );
        let result: Value = serde_yaml::from_str(&parsed).unwrap();
        assert_eq!(
            result,
            json!({"scheme": "http", "netloc": "github.com", "path": "/checkmate", "fragment": "master"})
        );
    }

    #[test]
    fn test_parse_url_mapping() {
        let parsed = render(
            "cert: {{ parse_url({'url': 'http://github.com', 'certificate': 'SOME_CERT'}).certificate }}\nscheme: {{ parse_url({'url': 'http://github.com', 'certificate': 'SOME_CERT'}).protocol }}",
        );
        let result: Value = serde_yaml::from_str(&parsed).unwrap();
        assert_eq!(result, json!({"scheme": "http", "cert": "SOME_CERT"}));
    }

    #[test]
    fn test_parse_url_blank() {
        assert_eq!(render("[{{ parse_url(None).certificate }}]"), "[]");
    }

    #[test]
    fn test_certificate_indent() {
        let template = "value: |\n    {{ parse_url(setting('url')).certificate  | indent(4)}}";
        let result = parse(template, &with_url_setting()).unwrap();
        let data: Value = serde_yaml::from_str(&result).unwrap();
        assert_eq!(data["value"], json!(TEST_CERT));
    }

    #[test]
    fn test_certificate_preserved_for_json_and_yaml() {
        let context = with_url_setting();
        let yaml = parse(
            "value: \"{{ parse_url(setting(\"url\")).certificate | preserve }}\" ",
            &context,
        )
        .unwrap();
        let data: Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(data["value"], json!(TEST_CERT));

        let text = parse(
            "{\"value\": \"{{ parse_url(setting(\"url\")).certificate | preserve }}\"}",
            &context,
        )
        .unwrap();
        let data: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(data["value"], json!(TEST_CERT));
    }

    #[test]
    fn test_bool() {
        assert_eq!(render("value: {{ bool('foo') }}"), "value: True");
        assert_eq!(render("value: {{ bool('') }}"), "value: False");
        assert_eq!(render("value: {{ bool(None) }}"), "value: False");
        assert_eq!(render("value: {{ bool(1) }}"), "value: True");
    }

    #[test]
    fn test_filters() {
        assert_eq!(render("{{ \"A\nB\" | preserve }}"), "A\\nB");
        assert_eq!(render("{{ 'root' | prepend('/') }}/path"), "/root/path");
        assert_eq!(render("{{ missing | prepend('/') }}/path"), "/path");
        assert_eq!(render("{{ missing | prepend }}"), "");
        assert_eq!(render("{{ 'abc' | base64 }}"), "YWJj");
        assert_eq!(render("{{ missing | default('x') }}"), "x");
        assert_eq!(render("{{ 'a\nb' | indent(2) }}"), "a\n  b");
    }

    #[test]
    fn test_minimum_context() {
        assert_eq!(render("[{{ deployment.id }}]"), "[]");
        assert_eq!(render("{{ clients }}"), "[]");
    }

    #[test]
    fn test_context_lookups() {
        let resource = json!({"instance": {"ip": "10.1.1.1"}, "hosts": ["0", "1"]});
        let context = FunctionContext::new().with("resource", &resource);
        assert_eq!(
            parse("{{ resource.instance.ip }} {{ resource['hosts'][1] }}", &context).unwrap(),
            "10.1.1.1 1"
        );
    }

    #[test]
    fn test_yaml_escaped_setting() {
        let inputs = json!({"password": "@W#$%$^D%F^UGY"});
        let context = FunctionContext::new().with("defaults", &inputs);
        let result = parse("id: {{ setting('password') }}", &context).unwrap();
        assert_eq!(result, "id: '@W#$%$^D%F^UGY'");
        let data: Value = serde_yaml::from_str(&result).unwrap();
        assert_eq!(data["id"], json!("@W#$%$^D%F^UGY"));
    }

    #[test]
    fn test_patterns_global() {
        let expected = patterns()["patterns"]["regex"]["linux_user"]["optional"]["value"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(
            render("value: {{ patterns.regex.linux_user.optional.value }}"),
            format!("value: {}", expected)
        );
    }

    #[test]
    fn test_extra_globals() {
        let mut globals = Map::new();
        globals.insert("name".into(), json!("override"));
        let result = parse_with_globals("{{ name }}", &FunctionContext::new(), &globals).unwrap();
        assert_eq!(result, "override");
    }

    #[test]
    fn test_statements() {
        let resource = json!({"hosts": ["0", "1"]});
        let context = FunctionContext::new().with("resource", &resource);
        assert_eq!(parse("{% if true %}yes{% endif %}", &context).unwrap(), "yes");
        assert_eq!(
            parse(
                "{% if resource.hosts %}hosted{% else %}standalone{% endif %}",
                &context
            )
            .unwrap(),
            "hosted"
        );
        assert_eq!(
            parse("{% for host in resource.hosts %}{{ host }};{% endfor %}", &context).unwrap(),
            "0;1;"
        );
        assert_eq!(
            parse("{% if component.name %}named{% else %}anonymous{% endif %}", &context).unwrap(),
            "anonymous"
        );
    }

    #[test]
    fn test_comments_and_whitespace_control() {
        assert_eq!(render("a{# a note #}b"), "ab");
        assert_eq!(render("a   {{- 'b' -}}   c"), "abc");
        assert_eq!(render("{%- for i in [1, 2] -%}\n{{ i }}\n{%- endfor %}"), "12");
    }

    #[test]
    fn test_settings_are_resolved_once() {
        let calls = std::cell::Cell::new(0);
        let context = FunctionContext::new().with_settings(Box::new(|name| {
            calls.set(calls.get() + 1);
            Ok(match name {
                "enabled" => json!(true),
                "port" => json!(8080),
                _ => json!(""),
            })
        }));
        let template =
            "{% if setting('enabled') %}listen {{ setting('port') }}{% endif %} {{ setting('enabled') }}";
        assert_eq!(parse(template, &context).unwrap(), "listen 8080 True");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_setting_errors_are_template_errors() {
        let context = FunctionContext::new().with_settings(Box::new(|name| {
            Err(ChessboardError::Validation(format!("no setting {}", name)))
        }));
        let err = parse("{{ setting('region') }}", &context).unwrap_err();
        assert!(matches!(err, ChessboardError::Template(_)));
        assert!(err.to_string().contains("no setting region"));
    }

    #[test]
    fn test_errors() {
        for template in ["{{ nope( }}", "{{ missing | shout }}", "{{ undefined_fn() }}", "{{ 'open"] {
            let err = parse(template, &FunctionContext::new()).unwrap_err();
            assert!(matches!(err, ChessboardError::Template(_)), "{}", template);
            assert!(err.to_string().starts_with("Template rendering failed: "));
            assert_eq!(err.http_status(), 406);
        }
    }
}
