//! # Módulo de Expressões - Sublinguagem Sandboxed
//!
//! Um único avaliador serve três consumidores:
//! - condições de cenário (`body.plan == "pro"`)
//! - assertions custom (`condition` + `message`)
//! - interpolação `{{$js:<expressão>}}`
//!
//! O avaliador é CEL (Common Expression Language): determinístico,
//! sem efeitos colaterais e sem qualquer acesso a I/O do host. O
//! ambiente exposto é fixo e somente-leitura:
//!
//! | Identificador  | Conteúdo                                           |
//! |----------------|----------------------------------------------------|
//! | `response`     | `{status_code, headers, body, duration_ms, size_bytes}` |
//! | `body`         | atalho para `response.body`                        |
//! | `status_code`  | atalho para `response.status_code`                 |
//! | `headers`      | atalho para `response.headers`                     |
//! | `duration_ms`  | atalho para a latência medida                      |
//! | `variables`    | visão mesclada do contexto de variáveis            |
//! | `captured`     | capturas do step corrente                          |
//! | `request`      | requisição resolvida                               |

use cel_interpreter::objects::Key;
use cel_interpreter::{Context, Program, Value as CelValue};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// ESCOPO DE AVALIAÇÃO
// ============================================================================

/// Conjunto de bindings visíveis para uma expressão.
///
/// Construído pelos chamadores com o que estiver disponível no momento
/// (cenários têm resposta; interpolação pura pode não ter).
#[derive(Debug, Default, Clone)]
pub struct EvalScope {
    bindings: HashMap<String, Value>,
}

impl EvalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adiciona um binding de topo.
    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    /// Instala a resposta e seus atalhos (`body`, `status_code`, ...).
    pub fn with_response(
        self,
        status_code: u16,
        headers: &Value,
        body: &Value,
        duration_ms: u64,
        size_bytes: u64,
    ) -> Self {
        // Números entram com sinal: comparações contra literais inteiros
        // da expressão ficam no mesmo tipo.
        let response = serde_json::json!({
            "status_code": status_code as i64,
            "headers": headers,
            "body": body,
            "duration_ms": duration_ms as i64,
            "size_bytes": size_bytes as i64,
        });
        self.bind("response", response)
            .bind("body", body.clone())
            .bind("status_code", Value::from(status_code as i64))
            .bind("headers", headers.clone())
            .bind("duration_ms", Value::from(duration_ms as i64))
            .bind("size_bytes", Value::from(size_bytes as i64))
    }

    /// Instala a visão mesclada de variáveis.
    pub fn with_variables(self, variables: Value) -> Self {
        self.bind("variables", variables)
    }

    /// Instala as capturas do step corrente.
    pub fn with_captured(self, captured: Value) -> Self {
        self.bind("captured", captured)
    }

    /// Instala a requisição resolvida.
    pub fn with_request(self, request: Value) -> Self {
        self.bind("request", request)
    }
}

// ============================================================================
// AVALIAÇÃO
// ============================================================================

/// Avalia uma expressão no escopo dado.
///
/// Erro de compilação ou de execução vira `Err(String)`; o chamador
/// decide se isso é `TemplateError`, falha de assertion, etc.
pub fn evaluate(expr: &str, scope: &EvalScope) -> Result<Value, String> {
    let program =
        Program::compile(expr).map_err(|e| format!("expressão inválida '{}': {}", expr, e))?;

    let mut context = Context::default();
    for (name, value) in &scope.bindings {
        // Valores JSON entram via serde; o interpretador converte.
        context
            .add_variable(name.clone(), value)
            .map_err(|e| format!("binding '{}' não serializável: {:?}", name, e))?;
    }

    let result = program
        .execute(&context)
        .map_err(|e| format!("falha ao avaliar '{}': {:?}", expr, e))?;
    Ok(cel_to_json(&result))
}

/// Avalia uma expressão esperando resultado booleano.
///
/// Resultados não-booleanos seguem truthiness de JSON: null/false/0/""
/// são falsos, o resto é verdadeiro.
pub fn evaluate_bool(expr: &str, scope: &EvalScope) -> Result<bool, String> {
    let value = evaluate(expr, scope)?;
    Ok(truthy(&value))
}

/// Truthiness de um valor JSON, no espírito da sublinguagem.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// CONVERSÃO CEL -> JSON
// ============================================================================

fn cel_to_json(value: &CelValue) -> Value {
    match value {
        CelValue::Null => Value::Null,
        CelValue::Bool(b) => Value::Bool(*b),
        CelValue::Int(i) => Value::from(*i),
        CelValue::UInt(u) => Value::from(*u),
        CelValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CelValue::String(s) => Value::String(s.as_ref().clone()),
        CelValue::Bytes(b) => Value::String(String::from_utf8_lossy(b.as_slice()).into_owned()),
        CelValue::List(items) => Value::Array(items.iter().map(cel_to_json).collect()),
        CelValue::Map(m) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in m.map.iter() {
                let key = match k {
                    Key::String(s) => s.as_ref().clone(),
                    Key::Int(i) => i.to_string(),
                    Key::Uint(u) => u.to_string(),
                    Key::Bool(b) => b.to_string(),
                };
                obj.insert(key, cel_to_json(v));
            }
            Value::Object(obj)
        }
        // Timestamps/durations não têm representação nativa em JSON;
        // o texto é suficiente para assertions e capturas.
        other => Value::String(format!("{:?}", other)),
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluates_body_comparison() {
        let scope = EvalScope::new().with_response(
            200,
            &json!({}),
            &json!({"plan": "pro"}),
            42,
            128,
        );
        assert!(evaluate_bool(r#"body.plan == "pro""#, &scope).unwrap());
        assert!(!evaluate_bool(r#"body.plan == "free""#, &scope).unwrap());
    }

    #[test]
    fn evaluates_numeric_comparison() {
        let scope = EvalScope::new().with_response(201, &json!({}), &json!({"total": 7}), 10, 0);
        assert!(evaluate_bool("status_code >= 200 && status_code < 300", &scope).unwrap());
        assert!(evaluate_bool("body.total > 5", &scope).unwrap());
    }

    #[test]
    fn evaluates_against_variables() {
        let scope = EvalScope::new().with_variables(json!({"env": "staging", "retries": 3}));
        assert!(evaluate_bool(r#"variables.env == "staging""#, &scope).unwrap());
        let v = evaluate("variables.retries + 1", &scope).unwrap();
        assert_eq!(v, json!(4));
    }

    #[test]
    fn invalid_expression_is_err() {
        let scope = EvalScope::new();
        assert!(evaluate("body.plan ==", &scope).is_err());
    }

    #[test]
    fn string_concatenation_result() {
        let scope = EvalScope::new().with_variables(json!({"name": "ana"}));
        let v = evaluate(r#""user-" + variables.name"#, &scope).unwrap();
        assert_eq!(v, json!("user-ana"));
    }

    #[test]
    fn truthiness_rules() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!(1.5)));
    }
}
