//! Estratégia de input: binding de variável via colaborador externo.
//!
//! O engine não sabe perguntar nada a ninguém; ele conhece apenas o
//! trait `InputProvider`. O provedor padrão devolve o `default` do
//! descritor, o que mantém execuções não-interativas (CI) determinísticas.
//!
//! Quando o step também traz `request`, a requisição roda depois do
//! binding, pelo fluxo normal de requisição.

use super::request::{finish_step, run_request_phase};
use super::{ExecutionEnv, StepStrategy};
use crate::errors::StepError;
use crate::protocol::{InputSpec, Step, StepOutcome, StepStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

// ============================================================================
// PROVEDOR (COLABORADOR EXTERNO)
// ============================================================================

/// Colaborador que resolve um input em valor.
#[async_trait]
pub trait InputProvider: Send + Sync {
    /// Devolve o valor para o input, ou `None` quando não há resposta.
    async fn provide(&self, input: &InputSpec) -> Option<Value>;
}

/// Provedor não-interativo: sempre responde com o `default` declarado.
pub struct DefaultInputProvider;

#[async_trait]
impl InputProvider for DefaultInputProvider {
    async fn provide(&self, input: &InputSpec) -> Option<Value> {
        input.default.clone()
    }
}

// ============================================================================
// ESTRATÉGIA
// ============================================================================

pub struct InputStrategy {
    provider: std::sync::Arc<dyn InputProvider>,
}

impl InputStrategy {
    pub fn new(provider: std::sync::Arc<dyn InputProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StepStrategy for InputStrategy {
    fn handles(&self, step: &Step) -> bool {
        step.input.is_some()
    }

    async fn execute(
        &self,
        step: &Step,
        env: &mut ExecutionEnv<'_>,
    ) -> Result<StepOutcome, StepError> {
        let input = step.input.as_ref().expect("handles garante input");

        let value = match self.provider.provide(input).await {
            Some(v) => v,
            None => {
                return Ok(StepOutcome::failure(
                    &step.name,
                    0,
                    format!(
                        "input '{}' sem resposta do provedor e sem default",
                        input.variable
                    ),
                ));
            }
        };

        if input.masked {
            info!(variable = %input.variable, "Input resolvido (mascarado)");
        } else {
            debug!(variable = %input.variable, value = %value, "Input resolvido");
        }
        env.ctx.set_runtime(input.variable.clone(), value.clone());

        // Sem requisição, o step é só o binding.
        if step.request.is_none() {
            let mut captured = BTreeMap::new();
            captured.insert(input.variable.clone(), value);
            return Ok(StepOutcome {
                step_name: step.name.clone(),
                status: StepStatus::Success,
                duration_ms: 0,
                request: None,
                response: None,
                assertions: Vec::new(),
                captured,
                iteration_results: None,
                scenarios_meta: None,
                error: None,
            });
        }

        let exchange = match run_request_phase(step, env).await? {
            Ok(exchange) => exchange,
            Err(outcome) => return Ok(*outcome),
        };
        let assert_block = step.assert.clone().unwrap_or_default();
        Ok(finish_step(
            &step.name,
            &assert_block,
            &step.capture,
            exchange,
            env,
            None,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_provider_returns_declared_default() {
        let input = InputSpec {
            prompt: "Token?".into(),
            variable: "token".into(),
            default: Some(Value::String("fallback".into())),
            masked: false,
        };
        let provided = DefaultInputProvider.provide(&input).await;
        assert_eq!(provided, Some(Value::String("fallback".into())));
    }

    #[tokio::test]
    async fn default_provider_without_default_is_none() {
        let input = InputSpec {
            prompt: "Token?".into(),
            variable: "token".into(),
            default: None,
            masked: true,
        };
        assert_eq!(DefaultInputProvider.provide(&input).await, None);
    }
}
