//! # Módulo de Assertions - Validação de Respostas
//!
//! Recebe um bloco de assertions e o registro de resposta de um step;
//! devolve a lista ordenada de outcomes. O avaliador **nunca lança**
//! por check reprovado; reprovação vira `passed = false`. Erros
//! estruturais (ex: resposta indisponível) viram um único outcome
//! sintético.
//!
//! ## Bandas avaliadas, nesta ordem:
//!
//! 1. `status_code`
//! 2. `headers.<nome>` (match case-insensitive)
//! 3. `body.<caminho>` (chaves pontuadas explodidas em mapas aninhados)
//! 4. `response_time_ms` (latência medida)
//! 5. `schema` (JSON Schema sobre o body inteiro)
//! 6. `custom` (condições na sublinguagem de expressões)
//!
//! ## Folhas
//!
//! Uma folha é um literal (igualdade implícita) ou um mapa de
//! operadores:
//!
//! ```yaml
//! body:
//!   total: { greater_than: 10 }
//!   user.name: { regex: "^[A-Z]" }
//!   items: { length: { equals: 3 } }
//! ```

use crate::expression::{self, EvalScope};
use crate::protocol::{AssertionBlock, AssertionOutcome};
use crate::query;
use jsonschema::JSONSchema;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

// ============================================================================
// VISÃO DA RESPOSTA
// ============================================================================

/// Visão da resposta usada pela avaliação.
pub struct ResponseView<'a> {
    pub status_code: u16,
    pub headers: &'a BTreeMap<String, String>,
    pub body: &'a Value,
    pub duration_ms: u64,
}

// ============================================================================
// OPERADORES
// ============================================================================

/// Operadores reconhecidos em folhas de assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Regex,
    Exists,
    Type,
    Length,
}

impl Operator {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "greater_than" => Operator::GreaterThan,
            "less_than" => Operator::LessThan,
            "greater_than_or_equal" => Operator::GreaterThanOrEqual,
            "less_than_or_equal" => Operator::LessThanOrEqual,
            "regex" => Operator::Regex,
            "exists" => Operator::Exists,
            "type" => Operator::Type,
            "length" => Operator::Length,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::GreaterThanOrEqual => "greater_than_or_equal",
            Operator::LessThanOrEqual => "less_than_or_equal",
            Operator::Regex => "regex",
            Operator::Exists => "exists",
            Operator::Type => "type",
            Operator::Length => "length",
        }
    }
}

/// True quando o valor é um mapa cujas chaves são todas operadores;
/// a forma "mapa de operadores" de uma folha.
fn is_operator_map(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty() && map.keys().all(|k| Operator::parse(k).is_some())
        }
        _ => false,
    }
}

// ============================================================================
// AVALIAÇÃO
// ============================================================================

/// Avalia um bloco contra a resposta.
///
/// `view = None` significa resposta indisponível: todo o bloco vira um
/// único outcome sintético reprovado.
pub fn evaluate(
    block: &AssertionBlock,
    view: Option<&ResponseView>,
    custom_scope: &EvalScope,
) -> Vec<AssertionOutcome> {
    let Some(view) = view else {
        if block.is_empty() {
            return Vec::new();
        }
        return vec![AssertionOutcome {
            field: "_response".to_string(),
            expected: Value::String("resposta disponível".to_string()),
            actual: Value::Null,
            passed: false,
            message: Some("resposta indisponível para avaliação".to_string()),
        }];
    };

    let mut outcomes = Vec::new();

    // Banda 1: status_code
    if let Some(check) = &block.status_code {
        let actual = Value::from(view.status_code);
        evaluate_leaf("status_code", check, Some(actual), &mut outcomes);
    }

    // Banda 2: headers (nome case-insensitive)
    for (name, check) in &block.headers {
        let actual = view
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| Value::String(v.clone()));
        evaluate_leaf(&format!("headers.{}", name), check, actual, &mut outcomes);
    }

    // Banda 3: body; chaves pontuadas explodidas antes da avaliação,
    // para que sintaxe plana e aninhada produzam a mesma árvore.
    let exploded = explode_dotted_keys(&block.body);
    walk_body_checks("", &exploded, view.body, &mut outcomes);

    // Banda 4: latência
    if let Some(check) = &block.response_time_ms {
        let actual = Value::from(view.duration_ms);
        evaluate_leaf("response_time_ms", check, Some(actual), &mut outcomes);
    }

    // Banda 5: JSON Schema sobre o body
    if let Some(schema) = &block.schema {
        outcomes.push(evaluate_schema(schema, view.body));
    }

    // Banda 6: custom (sublinguagem de expressões)
    for custom in &block.custom {
        let outcome = match expression::evaluate_bool(&custom.condition, custom_scope) {
            Ok(passed) => AssertionOutcome {
                field: format!("custom.{}", custom.name),
                expected: Value::Bool(true),
                actual: Value::Bool(passed),
                passed,
                message: if passed {
                    None
                } else {
                    Some(
                        custom
                            .message
                            .clone()
                            .unwrap_or_else(|| format!("condição falhou: {}", custom.condition)),
                    )
                },
            },
            Err(reason) => AssertionOutcome {
                field: format!("custom.{}", custom.name),
                expected: Value::Bool(true),
                actual: Value::Null,
                passed: false,
                message: Some(reason),
            },
        };
        outcomes.push(outcome);
    }

    outcomes
}

// ============================================================================
// EXPLOSÃO DE CHAVES PONTUADAS
// ============================================================================

/// Explode `{"user.id": X}` em `{"user": {"id": X}}`, fundindo com
/// entradas já aninhadas.
fn explode_dotted_keys(band: &BTreeMap<String, Value>) -> Map<String, Value> {
    let mut root = Map::new();
    for (key, value) in band {
        insert_path(&mut root, key, value.clone());
    }
    root
}

fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    // Chaves JSONPath ("$....") carregam pontos próprios; ficam intactas.
    if path.starts_with('$') {
        target.insert(path.to_string(), value);
        return;
    }
    match path.split_once('.') {
        Some((head, rest)) if !rest.is_empty() => {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(nested) = entry {
                insert_path(nested, rest, value);
            } else {
                // Conflito escalar vs caminho: o caminho vence.
                let mut nested = Map::new();
                insert_path(&mut nested, rest, value);
                *entry = Value::Object(nested);
            }
        }
        _ => {
            target.insert(path.to_string(), value);
        }
    }
}

/// Percorre a árvore explodida emitindo um check por folha.
///
/// `path` é o caminho relativo dentro do body; o campo do outcome
/// ganha o prefixo "body.".
fn walk_body_checks(
    path: &str,
    tree: &Map<String, Value>,
    body: &Value,
    outcomes: &mut Vec<AssertionOutcome>,
) {
    for (key, node) in tree {
        let child_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        match node {
            Value::Object(children) if !is_operator_map(node) => {
                walk_body_checks(&child_path, children, body, outcomes);
            }
            check => {
                let actual = resolve_body_path(body, &child_path);
                evaluate_leaf(&format!("body.{}", child_path), check, actual, outcomes);
            }
        }
    }
}

/// Resolve um caminho do body: JSONPath quando começa com `$`,
/// caminho pontuado caso contrário.
fn resolve_body_path(body: &Value, path: &str) -> Option<Value> {
    match query::evaluate(body, path) {
        Ok(v) => v,
        Err(reason) => {
            warn!(path, %reason, "Caminho de assertion inválido");
            None
        }
    }
}

// ============================================================================
// FOLHAS
// ============================================================================

/// Avalia uma folha: literal (igualdade implícita) ou mapa de operadores.
fn evaluate_leaf(
    field: &str,
    check: &Value,
    actual: Option<Value>,
    outcomes: &mut Vec<AssertionOutcome>,
) {
    if let Value::Object(ops) = check {
        if is_operator_map(check) {
            for (name, expected) in ops {
                let op = Operator::parse(name).expect("is_operator_map garante");
                outcomes.push(apply_operator(field, op, expected, actual.as_ref()));
            }
            return;
        }
    }
    outcomes.push(apply_operator(field, Operator::Equals, check, actual.as_ref()));
}

/// Aplica um operador e constrói o outcome.
fn apply_operator(
    field: &str,
    op: Operator,
    expected: &Value,
    actual: Option<&Value>,
) -> AssertionOutcome {
    let actual_value = actual.cloned().unwrap_or(Value::Null);
    let exists = actual.map(|v| !v.is_null()).unwrap_or(false);

    let (passed, message): (bool, Option<String>) = match op {
        Operator::Equals => (values_equal(&actual_value, expected), None),
        Operator::NotEquals => (!values_equal(&actual_value, expected), None),

        Operator::Contains => (contains(&actual_value, expected), None),
        Operator::NotContains => (!contains(&actual_value, expected), None),

        Operator::GreaterThan
        | Operator::LessThan
        | Operator::GreaterThanOrEqual
        | Operator::LessThanOrEqual => match (as_number(&actual_value), as_number(expected)) {
            (Some(a), Some(e)) => {
                let ok = match op {
                    Operator::GreaterThan => a > e,
                    Operator::LessThan => a < e,
                    Operator::GreaterThanOrEqual => a >= e,
                    Operator::LessThanOrEqual => a <= e,
                    _ => unreachable!(),
                };
                (ok, None)
            }
            _ => (
                false,
                Some(format!(
                    "TypeMismatch: {} exige operandos numéricos",
                    op.name()
                )),
            ),
        },

        Operator::Regex => {
            let pattern = expected.as_str().unwrap_or_default();
            match Regex::new(pattern) {
                Ok(re) => match actual_value.as_str() {
                    Some(s) => (re.is_match(s), None),
                    None => (
                        false,
                        Some("TypeMismatch: regex exige valor string".to_string()),
                    ),
                },
                Err(e) => (false, Some(format!("InvalidRegex: {}", e))),
            }
        }

        Operator::Exists => {
            let expected_exists = expected.as_bool().unwrap_or(true);
            (exists == expected_exists, None)
        }

        Operator::Type => {
            let expected_type = expected.as_str().unwrap_or_default();
            (type_name(&actual_value) == expected_type, None)
        }

        Operator::Length => return evaluate_length(field, expected, &actual_value),
    };

    AssertionOutcome {
        field: format!("{} ({})", field, op.name()),
        expected: expected.clone(),
        actual: actual_value,
        passed,
        message,
    }
}

/// Sub-checks de `length`: número simples (igualdade) ou mapa com
/// `equals` / `greater_than` / `less_than`.
fn evaluate_length(field: &str, expected: &Value, actual: &Value) -> AssertionOutcome {
    let length: i64 = match actual {
        Value::String(s) => s.chars().count() as i64,
        Value::Array(items) => items.len() as i64,
        // Inaplicável: comprimento -1 e o check reprova com TypeMismatch.
        _ => -1,
    };

    let field = format!("{} (length)", field);
    if length < 0 {
        return AssertionOutcome {
            field,
            expected: expected.clone(),
            actual: Value::from(length),
            passed: false,
            message: Some("TypeMismatch: length aplica-se a strings e sequências".to_string()),
        };
    }

    let passed = match expected {
        Value::Number(n) => n.as_i64() == Some(length),
        Value::Object(ops) => ops.iter().all(|(name, v)| {
            let bound = v.as_i64().unwrap_or(i64::MIN);
            match name.as_str() {
                "equals" => length == bound,
                "greater_than" => length > bound,
                "less_than" => length < bound,
                _ => false,
            }
        }),
        _ => false,
    };

    AssertionOutcome {
        field,
        expected: expected.clone(),
        actual: Value::from(length),
        passed,
        message: None,
    }
}

/// Valida o body contra um JSON Schema.
fn evaluate_schema(schema: &Value, body: &Value) -> AssertionOutcome {
    let compiled = match JSONSchema::compile(schema) {
        Ok(s) => s,
        Err(e) => {
            return AssertionOutcome {
                field: "schema".to_string(),
                expected: schema.clone(),
                actual: Value::Null,
                passed: false,
                message: Some(format!("JSON Schema inválido: {}", e)),
            };
        }
    };

    let errors: Vec<String> = match compiled.validate(body) {
        Ok(()) => Vec::new(),
        Err(iter) => iter
            .map(|e| format!("{} em {}", e, e.instance_path))
            .take(3)
            .collect(),
    };

    AssertionOutcome {
        field: "schema".to_string(),
        expected: schema.clone(),
        actual: body.clone(),
        passed: errors.is_empty(),
        message: if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        },
    }
}

// ============================================================================
// SEMÂNTICA DE VALORES
// ============================================================================

/// Igualdade estrutural profunda com tolerância numérica (1 == 1.0).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// `contains`: substring para strings, pertinência para sequências,
/// presença de chave para mapas.
fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => expected.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        Value::Object(map) => expected
            .as_str()
            .map(|key| map.contains_key(key))
            .unwrap_or(false),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::Null => "null",
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view<'a>(
        status: u16,
        headers: &'a BTreeMap<String, String>,
        body: &'a Value,
        duration: u64,
    ) -> ResponseView<'a> {
        ResponseView {
            status_code: status,
            headers,
            body,
            duration_ms: duration,
        }
    }

    fn block(yaml: &str) -> AssertionBlock {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn run(b: &AssertionBlock, v: &ResponseView) -> Vec<AssertionOutcome> {
        evaluate(b, Some(v), &EvalScope::new())
    }

    #[test]
    fn implicit_equals_on_status() {
        let headers = BTreeMap::new();
        let body = json!({});
        let v = view(200, &headers, &body, 10);

        let ok = run(&block("status_code: 200"), &v);
        assert!(ok[0].passed);

        let bad = run(&block("status_code: 201"), &v);
        assert!(!bad[0].passed);
    }

    #[test]
    fn numeric_tolerance_one_equals_one_point_zero() {
        let headers = BTreeMap::new();
        let body = json!({"count": 1});
        let v = view(200, &headers, &body, 10);

        let b = block("body: {count: {equals: 1.0}}");
        let outcomes = run(&b, &v);
        assert!(outcomes[0].passed, "{:?}", outcomes[0]);
    }

    #[test]
    fn dotted_and_nested_syntaxes_agree() {
        let headers = BTreeMap::new();
        let body = json!({"user": {"id": 7}});
        let v = view(200, &headers, &body, 10);

        let flat = run(&block("body: {user.id: 7}"), &v);
        let nested = run(&block("body: {user: {id: {equals: 7}}}"), &v);
        assert!(flat[0].passed);
        assert!(nested[0].passed);
        assert_eq!(flat.len(), nested.len());
    }

    #[test]
    fn header_match_is_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let body = json!({});
        let v = view(200, &headers, &body, 10);

        let b = block(r#"headers: {Content-Type: {contains: "json"}}"#);
        assert!(run(&b, &v)[0].passed);
    }

    #[test]
    fn ordering_on_non_numeric_is_type_mismatch_not_panic() {
        let headers = BTreeMap::new();
        let body = json!({"name": "ana"});
        let v = view(200, &headers, &body, 10);

        let b = block("body: {name: {greater_than: 5}}");
        let outcomes = run(&b, &v);
        assert!(!outcomes[0].passed);
        assert!(outcomes[0]
            .message
            .as_deref()
            .unwrap()
            .contains("TypeMismatch"));
    }

    #[test]
    fn invalid_regex_fails_but_others_still_evaluate() {
        let headers = BTreeMap::new();
        let body = json!({"code": "AB12"});
        let v = view(200, &headers, &body, 10);

        let b = block(
            r#"
status_code: 200
body:
  code: { regex: "([bad" }
"#,
        );
        let outcomes = run(&b, &v);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].passed, "status ainda avalia");
        let regex_outcome = &outcomes[1];
        assert!(!regex_outcome.passed);
        assert!(regex_outcome
            .message
            .as_deref()
            .unwrap()
            .contains("InvalidRegex"));
    }

    #[test]
    fn exists_semantics_on_null_and_empty_string() {
        let headers = BTreeMap::new();
        let body = json!({"a": null, "b": ""});
        let v = view(200, &headers, &body, 10);

        // null não existe
        assert!(!run(&block("body: {a: {exists: true}}"), &v)[0].passed);
        // ausente não existe
        assert!(!run(&block("body: {missing: {exists: true}}"), &v)[0].passed);
        // string vazia existe
        assert!(run(&block("body: {b: {exists: true}}"), &v)[0].passed);
        // negação
        assert!(run(&block("body: {missing: {exists: false}}"), &v)[0].passed);
    }

    #[test]
    fn type_operator() {
        let headers = BTreeMap::new();
        let body = json!({"n": 3, "s": "x", "arr": [1], "obj": {}, "b": true});
        let v = view(200, &headers, &body, 10);

        for (path, t) in [
            ("n", "number"),
            ("s", "string"),
            ("arr", "array"),
            ("obj", "object"),
            ("b", "boolean"),
        ] {
            let b = block(&format!("body: {{{}: {{type: {}}}}}", path, t));
            assert!(run(&b, &v)[0].passed, "{} deveria ser {}", path, t);
        }
    }

    #[test]
    fn length_on_scalar_is_type_mismatch() {
        let headers = BTreeMap::new();
        let body = json!({"n": 42});
        let v = view(200, &headers, &body, 10);

        let b = block("body: {n: {length: {equals: 2}}}");
        let outcomes = run(&b, &v);
        assert!(!outcomes[0].passed);
        assert_eq!(outcomes[0].actual, json!(-1));
        assert!(outcomes[0]
            .message
            .as_deref()
            .unwrap()
            .contains("TypeMismatch"));
    }

    #[test]
    fn length_suboperators() {
        let headers = BTreeMap::new();
        let body = json!({"items": [1, 2, 3], "name": "ana"});
        let v = view(200, &headers, &body, 10);

        assert!(run(&block("body: {items: {length: {equals: 3}}}"), &v)[0].passed);
        assert!(run(&block("body: {items: {length: {greater_than: 2}}}"), &v)[0].passed);
        assert!(run(&block("body: {name: {length: {less_than: 5}}}"), &v)[0].passed);
        assert!(run(&block("body: {name: {length: 3}}"), &v)[0].passed);
    }

    #[test]
    fn contains_for_string_array_and_map() {
        let headers = BTreeMap::new();
        let body = json!({"text": "hello world", "tags": ["a", "b"], "obj": {"k": 1}});
        let v = view(200, &headers, &body, 10);

        assert!(run(&block(r#"body: {text: {contains: "world"}}"#), &v)[0].passed);
        assert!(run(&block(r#"body: {tags: {contains: "b"}}"#), &v)[0].passed);
        assert!(run(&block(r#"body: {obj: {contains: "k"}}"#), &v)[0].passed);
        assert!(run(&block(r#"body: {text: {not_contains: "xyz"}}"#), &v)[0].passed);
    }

    #[test]
    fn response_time_band() {
        let headers = BTreeMap::new();
        let body = json!({});
        let v = view(200, &headers, &body, 150);

        assert!(run(&block("response_time_ms: {less_than: 500}"), &v)[0].passed);
        assert!(!run(&block("response_time_ms: {less_than: 100}"), &v)[0].passed);
        assert!(run(&block("response_time_ms: {greater_than: 100}"), &v)[0].passed);
    }

    #[test]
    fn custom_band_uses_expression_language() {
        let headers = BTreeMap::new();
        let body = json!({"plan": "pro"});
        let v = view(200, &headers, &body, 10);
        let scope = EvalScope::new().with_response(200, &json!({}), &body, 10, 0);

        let b = block(
            r#"
custom:
  - name: plan is pro
    condition: 'body.plan == "pro"'
  - name: impossible
    condition: 'status_code == 500'
    message: "esperava erro do servidor"
"#,
        );
        let outcomes = evaluate(&b, Some(&v), &scope);
        assert!(outcomes[0].passed);
        assert!(!outcomes[1].passed);
        assert_eq!(
            outcomes[1].message.as_deref(),
            Some("esperava erro do servidor")
        );
    }

    #[test]
    fn schema_band() {
        let headers = BTreeMap::new();
        let body = json!({"id": 1, "name": "x"});
        let v = view(200, &headers, &body, 10);

        let b = block(
            r#"
schema:
  type: object
  required: [id, name]
  properties:
    id: { type: integer }
    name: { type: string }
"#,
        );
        assert!(run(&b, &v)[0].passed);

        let bad = block(
            r#"
schema:
  type: object
  required: [missing_field]
"#,
        );
        assert!(!run(&bad, &v)[0].passed);
    }

    #[test]
    fn missing_response_yields_single_synthetic_outcome() {
        let b = block("status_code: 200\nbody: {a: 1}");
        let outcomes = evaluate(&b, None, &EvalScope::new());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].field, "_response");
        assert!(!outcomes[0].passed);
    }

    #[test]
    fn jsonpath_key_in_body_band() {
        let headers = BTreeMap::new();
        let body = json!({"users": [{"id": 1}, {"id": 2}]});
        let v = view(200, &headers, &body, 10);

        let b = block("body: {\"$.users[0].id\": 1}");
        assert!(run(&b, &v)[0].passed);
    }
}
