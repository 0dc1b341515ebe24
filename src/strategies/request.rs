//! Estratégia de requisição simples: o caminho quente de todo step.
//!
//! Fluxo: interpolar a requisição → executar HTTP → registrar resposta →
//! avaliar assertions → rodar capturas → montar o resultado.

use super::{ExecutionEnv, StepStrategy};
use crate::assertions::{self, ResponseView};
use crate::capture::{self, CaptureInput};
use crate::errors::StepError;
use crate::expression::EvalScope;
use crate::http::{HttpExchange, PreparedRequest};
use crate::protocol::{
    AssertionBlock, AuthSpec, RequestSpec, Step, StepOutcome, StepStatus,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub struct RequestStrategy;

#[async_trait]
impl StepStrategy for RequestStrategy {
    /// Fallback universal: aceita qualquer step (registrada por último).
    fn handles(&self, _step: &Step) -> bool {
        true
    }

    async fn execute(
        &self,
        step: &Step,
        env: &mut ExecutionEnv<'_>,
    ) -> Result<StepOutcome, StepError> {
        let exchange = match run_request_phase(step, env).await? {
            Ok(exchange) => exchange,
            Err(outcome) => return Ok(*outcome),
        };

        let assert_block = step.assert.clone().unwrap_or_default();
        Ok(finish_step(&step.name, &assert_block, &step.capture, exchange, env, None))
    }
}

// ============================================================================
// FASES COMPARTILHADAS (usadas também por Scenario e Input)
// ============================================================================

/// Interpola e executa a requisição do step.
///
/// `Err(StepError)` apenas para cancelamento; falha de template ou
/// transporte vira `StepOutcome` pronto (caixa interna).
pub(crate) async fn run_request_phase(
    step: &Step,
    env: &mut ExecutionEnv<'_>,
) -> Result<Result<HttpExchange, Box<StepOutcome>>, StepError> {
    let Some(request) = &step.request else {
        return Ok(Err(Box::new(StepOutcome::failure(
            &step.name,
            0,
            "step sem request e sem input: nada a executar",
        ))));
    };

    let prepared = match prepare_request(request, env) {
        Ok(p) => p,
        Err(e) => {
            return Ok(Err(Box::new(StepOutcome::failure(
                &step.name,
                0,
                e.to_string(),
            ))));
        }
    };

    match env.http.execute(&step.name, &prepared, &env.cancel).await {
        Ok(exchange) => {
            // Resposta vira visível para {{$js:...}} dos steps seguintes.
            env.ctx.set_last_response(serde_json::json!({
                "status_code": exchange.response.status_code as i64,
                "headers": exchange.response.headers,
                "body": exchange.response.body,
                "duration_ms": exchange.duration_ms as i64,
                "size_bytes": exchange.response.size_bytes as i64,
            }));
            Ok(Ok(exchange))
        }
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => Ok(Err(Box::new(StepOutcome::failure(
            &step.name,
            0,
            e.to_string(),
        )))),
    }
}

/// Interpola todos os campos da requisição e resolve a autenticação.
fn prepare_request(
    request: &RequestSpec,
    env: &mut ExecutionEnv<'_>,
) -> Result<PreparedRequest, StepError> {
    let url = env.ctx.interpolate_str(&request.url)?;

    let mut headers = BTreeMap::new();
    for (name, value) in &request.headers {
        headers.insert(name.clone(), env.ctx.interpolate_str(value)?);
    }

    if let Some(auth) = &request.auth {
        let header_value = match auth {
            AuthSpec::Basic { username, password } => {
                let user = env.ctx.interpolate_str(username)?;
                let pass = env.ctx.interpolate_str(password)?;
                format!("Basic {}", BASE64.encode(format!("{}:{}", user, pass)))
            }
            AuthSpec::Bearer { token } => {
                format!("Bearer {}", env.ctx.interpolate_str(token)?)
            }
        };
        headers.insert("Authorization".to_string(), header_value);
    }

    let mut params = BTreeMap::new();
    for (name, value) in &request.params {
        params.insert(name.clone(), env.ctx.interpolate_value(value)?);
    }

    let body = match &request.body {
        Some(b) => Some(env.ctx.interpolate_value(b)?),
        None => None,
    };

    let base_url = match &env.base_url {
        Some(b) => Some(env.ctx.interpolate_str(b)?),
        None => None,
    };

    Ok(PreparedRequest {
        method: request.method,
        url,
        base_url,
        headers,
        params,
        body,
        timeout_ms: request.timeout_ms.unwrap_or(env.default_timeout_ms),
    })
}

/// Avalia assertions, roda capturas e fecha o resultado do step.
///
/// Capturas só rodam quando as assertions passaram; capturas de um
/// step reprovado não podem vazar para os seguintes.
pub(crate) fn finish_step(
    display_name: &str,
    assert_block: &AssertionBlock,
    captures: &BTreeMap<String, String>,
    exchange: HttpExchange,
    env: &mut ExecutionEnv<'_>,
    scenarios_meta: Option<Vec<crate::protocol::ScenarioTraceEntry>>,
) -> StepOutcome {
    let headers_json = serde_json::to_value(&exchange.response.headers)
        .unwrap_or(Value::Null);
    let request_json = serde_json::json!({
        "method": exchange.request.method,
        "url": exchange.request.url,
        "headers": exchange.request.headers,
        "body": exchange.request.body,
    });

    let scope = EvalScope::new()
        .with_response(
            exchange.response.status_code,
            &headers_json,
            &exchange.response.body,
            exchange.duration_ms,
            exchange.response.size_bytes,
        )
        .with_variables(env.ctx.merged_view())
        .with_request(request_json);

    let view = ResponseView {
        status_code: exchange.response.status_code,
        headers: &exchange.response.headers,
        body: &exchange.response.body,
        duration_ms: exchange.duration_ms,
    };
    let outcomes = assertions::evaluate(assert_block, Some(&view), &scope);
    let all_passed = outcomes.iter().all(|o| o.passed);

    let mut captured = BTreeMap::new();
    let mut error = None;

    if all_passed {
        let input = CaptureInput {
            status_code: exchange.response.status_code,
            headers: &exchange.response.headers,
            body: &exchange.response.body,
            duration_ms: exchange.duration_ms,
            size_bytes: exchange.response.size_bytes,
        };
        match capture::evaluate_captures(captures, &input, env.ctx) {
            Ok(values) => captured = values,
            Err(e) => error = Some(e.to_string()),
        }
    } else {
        let failed = outcomes.iter().filter(|o| !o.passed).count();
        debug!(step = %display_name, failed, "Assertions reprovadas; capturas puladas");
        error = Some(format!("{} assertion(s) reprovada(s)", failed));
    }

    let status = if error.is_none() && all_passed {
        StepStatus::Success
    } else {
        StepStatus::Failure
    };

    StepOutcome {
        step_name: display_name.to_string(),
        status,
        duration_ms: exchange.duration_ms,
        request: Some(exchange.request),
        response: Some(exchange.response),
        assertions: outcomes,
        captured,
        iteration_results: None,
        scenarios_meta,
        error,
    }
}
