//! # Módulo de Captura - Extração de Valores da Resposta
//!
//! Dado o mapa `variável → expressão` de um step, produz o mapa de
//! valores capturados. Cada expressão é resolvida nesta ordem:
//!
//! 1. **Query-path** sobre o contexto construído
//!    `{status_code, headers, body, duration_ms, size_bytes}`;
//!    caminho pontuado (`body.user.id`) ou JSONPath (`$.body.items[*].id`)
//! 2. **Expressão sandbox** quando começa com `$js:`
//! 3. **Literal** caso contrário
//!
//! Os valores capturados vão para o escopo Runtime do contexto de
//! variáveis. Valores longos são truncados no log, nunca no armazenamento.

use crate::context::VariableContext;
use crate::errors::CaptureError;
use crate::expression::{self, EvalScope};
use crate::query;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Raízes do contexto de captura.
const CAPTURE_ROOTS: [&str; 5] = [
    "status_code",
    "headers",
    "body",
    "duration_ms",
    "size_bytes",
];

// ============================================================================
// ENTRADA
// ============================================================================

/// Visão da resposta disponível para captura.
pub struct CaptureInput<'a> {
    pub status_code: u16,
    pub headers: &'a BTreeMap<String, String>,
    pub body: &'a Value,
    pub duration_ms: u64,
    pub size_bytes: u64,
}

impl CaptureInput<'_> {
    /// Contexto raiz sobre o qual as query-paths navegam.
    fn as_root(&self) -> Value {
        serde_json::json!({
            "status_code": self.status_code as i64,
            "headers": self.headers,
            "body": self.body,
            "duration_ms": self.duration_ms as i64,
            "size_bytes": self.size_bytes as i64,
        })
    }
}

// ============================================================================
// AVALIAÇÃO
// ============================================================================

/// Processa todas as capturas de um step.
///
/// Escreve cada valor no escopo Runtime e devolve o mapa completo.
/// Expressão sintaticamente inválida falha o step com `CaptureError`.
pub fn evaluate_captures(
    captures: &BTreeMap<String, String>,
    input: &CaptureInput,
    ctx: &mut VariableContext,
) -> Result<BTreeMap<String, Value>, CaptureError> {
    if captures.is_empty() {
        return Ok(BTreeMap::new());
    }

    let root = input.as_root();
    let mut captured = BTreeMap::new();

    for (target, expr) in captures {
        let value = evaluate_one(target, expr, &root, ctx)?;
        debug!(
            target = %target,
            value = %preview(&value),
            "Captura aplicada"
        );
        ctx.set_runtime(target.clone(), value.clone());
        captured.insert(target.clone(), value);
    }

    Ok(captured)
}

fn evaluate_one(
    target: &str,
    expr: &str,
    root: &Value,
    ctx: &mut VariableContext,
) -> Result<Value, CaptureError> {
    // O prefixo $js: não é JSONPath válido; testado antes de tudo.
    if let Some(js) = expr.strip_prefix("$js:") {
        let scope = EvalScope::new()
            .with_variables(ctx.merged_view())
            .bind("response", root.clone())
            .bind("body", root.get("body").cloned().unwrap_or(Value::Null))
            .bind(
                "status_code",
                root.get("status_code").cloned().unwrap_or(Value::Null),
            );
        return expression::evaluate(js.trim(), &scope).map_err(|reason| {
            CaptureError::InvalidExpression {
                target: target.to_string(),
                expr: expr.to_string(),
                reason,
            }
        });
    }

    if is_query_path(expr) {
        let value = query::evaluate(root, expr).map_err(|reason| {
            CaptureError::InvalidExpression {
                target: target.to_string(),
                expr: expr.to_string(),
                reason,
            }
        })?;
        return Ok(match value {
            Some(v) => v,
            None => {
                warn!(target, expr, "Query de captura sem resultado; capturando null");
                Value::Null
            }
        });
    }

    // Literal.
    Ok(Value::String(expr.to_string()))
}

/// Detecta o padrão de query-path: JSONPath explícito ou caminho
/// pontuado cuja raiz é um dos campos do contexto de captura.
fn is_query_path(expr: &str) -> bool {
    if expr.starts_with('$') {
        return true;
    }
    let root = expr
        .split(|c| c == '.' || c == '[')
        .next()
        .unwrap_or_default();
    CAPTURE_ROOTS.contains(&root)
}

/// Forma curta de um valor para logging. O valor armazenado nunca
/// é truncado.
fn preview(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > 120 {
        let cut: String = text.chars().take(117).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input<'a>(body: &'a Value, headers: &'a BTreeMap<String, String>) -> CaptureInput<'a> {
        CaptureInput {
            status_code: 200,
            headers,
            body,
            duration_ms: 42,
            size_bytes: 256,
        }
    }

    fn captures(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn captures_body_path_into_runtime() {
        let body = json!({"access_token": "tk-9"});
        let headers = BTreeMap::new();
        let mut ctx = VariableContext::new();

        let out = evaluate_captures(
            &captures(&[("token", "body.access_token")]),
            &input(&body, &headers),
            &mut ctx,
        )
        .unwrap();

        assert_eq!(out.get("token"), Some(&json!("tk-9")));
        assert_eq!(ctx.get("token"), Some(&json!("tk-9")));
    }

    #[test]
    fn captures_status_and_metrics() {
        let body = json!({});
        let headers = BTreeMap::new();
        let mut ctx = VariableContext::new();

        let out = evaluate_captures(
            &captures(&[
                ("code", "status_code"),
                ("elapsed", "duration_ms"),
                ("size", "size_bytes"),
            ]),
            &input(&body, &headers),
            &mut ctx,
        )
        .unwrap();

        assert_eq!(out.get("code"), Some(&json!(200)));
        assert_eq!(out.get("elapsed"), Some(&json!(42)));
        assert_eq!(out.get("size"), Some(&json!(256)));
    }

    #[test]
    fn captures_header_value() {
        let body = json!({});
        let mut headers = BTreeMap::new();
        headers.insert("x-request-id".to_string(), "req-1".to_string());
        let mut ctx = VariableContext::new();

        let out = evaluate_captures(
            &captures(&[("rid", "headers.x-request-id")]),
            &input(&body, &headers),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(out.get("rid"), Some(&json!("req-1")));
    }

    #[test]
    fn jsonpath_projection_capture() {
        let body = json!({"users": [{"email": "a@x"}, {"email": "b@x"}]});
        let headers = BTreeMap::new();
        let mut ctx = VariableContext::new();

        let out = evaluate_captures(
            &captures(&[("emails", "$.body.users[*].email")]),
            &input(&body, &headers),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(out.get("emails"), Some(&json!(["a@x", "b@x"])));
    }

    #[test]
    fn js_expression_capture() {
        let body = json!({"total": 7});
        let headers = BTreeMap::new();
        let mut ctx = VariableContext::new();
        ctx.set_runtime("bonus", json!(3));

        let out = evaluate_captures(
            &captures(&[("sum", "$js: body.total + variables.bonus")]),
            &input(&body, &headers),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(out.get("sum"), Some(&json!(10)));
    }

    #[test]
    fn literal_fallback() {
        let body = json!({});
        let headers = BTreeMap::new();
        let mut ctx = VariableContext::new();

        let out = evaluate_captures(
            &captures(&[("env", "staging")]),
            &input(&body, &headers),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(out.get("env"), Some(&json!("staging")));
    }

    #[test]
    fn missing_path_captures_null() {
        let body = json!({});
        let headers = BTreeMap::new();
        let mut ctx = VariableContext::new();

        let out = evaluate_captures(
            &captures(&[("v", "body.nope.deep")]),
            &input(&body, &headers),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(out.get("v"), Some(&Value::Null));
    }

    #[test]
    fn invalid_expression_is_capture_error() {
        let body = json!({});
        let headers = BTreeMap::new();
        let mut ctx = VariableContext::new();

        let err = evaluate_captures(
            &captures(&[("v", "$js: ]][[")]),
            &input(&body, &headers),
            &mut ctx,
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::InvalidExpression { .. }));
    }

    #[test]
    fn preview_truncates_only_logging_form() {
        let long = "x".repeat(500);
        let value = json!(long.clone());
        assert!(preview(&value).len() < 130);
        assert_eq!(value.as_str().unwrap().len(), 500);
    }
}
