//! Estratégia de cenários: requisição seguida de ramos condicionais.
//!
//! Semântica de matching: **todos os cenários são avaliados**, em
//! ordem. Condição verdadeira executa o ramo `then`; falsa executa o
//! ramo `else` quando houver. O trace pode portanto registrar vários
//! `executed = true`. (First-match-wins tornaria qualquer `else`
//! posterior inalcançável quando um cenário anterior casasse.)

use super::request::{finish_step, run_request_phase};
use super::{ExecutionEnv, StepStrategy};
use crate::errors::StepError;
use crate::expression::{self, EvalScope};
use crate::protocol::{
    AssertionBlock, ScenarioBranch, ScenarioBranchKind, ScenarioTraceEntry, Step, StepOutcome,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub struct ScenarioStrategy;

#[async_trait]
impl StepStrategy for ScenarioStrategy {
    fn handles(&self, step: &Step) -> bool {
        !step.scenarios.is_empty()
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

        let headers_json =
            serde_json::to_value(&exchange.response.headers).unwrap_or(Value::Null);

        // Bloco e capturas efetivos: começam com os do step e crescem
        // com o que os ramos executados acrescentarem.
        let mut effective_assert = step.assert.clone().unwrap_or_default();
        let mut effective_captures: BTreeMap<String, String> = step.capture.clone();
        let mut trace: Vec<ScenarioTraceEntry> = Vec::with_capacity(step.scenarios.len());

        for (index, scenario) in step.scenarios.iter().enumerate() {
            let scope = EvalScope::new()
                .with_response(
                    exchange.response.status_code,
                    &headers_json,
                    &exchange.response.body,
                    exchange.duration_ms,
                    exchange.response.size_bytes,
                )
                .with_variables(env.ctx.merged_view());

            // Erro de avaliação (chave ausente, sintaxe) conta como
            // não-casado: o run não quebra por um ramo que não se
            // aplica a esta resposta.
            let matched = match expression::evaluate_bool(&scenario.condition, &scope) {
                Ok(m) => m,
                Err(reason) => {
                    warn!(
                        index,
                        condition = %scenario.condition,
                        %reason,
                        "Condição de cenário não avaliou; tratando como não-casada"
                    );
                    false
                }
            };

            let branch = if matched {
                scenario.then.as_ref().map(|b| (ScenarioBranchKind::Then, b))
            } else {
                scenario
                    .otherwise
                    .as_ref()
                    .map(|b| (ScenarioBranchKind::Else, b))
            };

            let entry = match branch {
                Some((kind, branch)) => {
                    let (assertions_added, captures_added) =
                        apply_branch(branch, &mut effective_assert, &mut effective_captures, env);
                    debug!(
                        index,
                        condition = %scenario.condition,
                        branch = ?kind,
                        "Cenário executou ramo"
                    );
                    ScenarioTraceEntry {
                        index,
                        condition: scenario.condition.clone(),
                        matched,
                        executed: true,
                        branch: kind,
                        assertions_added,
                        captures_added,
                    }
                }
                None => ScenarioTraceEntry {
                    index,
                    condition: scenario.condition.clone(),
                    matched,
                    executed: false,
                    branch: ScenarioBranchKind::None,
                    assertions_added: 0,
                    captures_added: 0,
                },
            };
            trace.push(entry);
        }

        Ok(finish_step(
            &step.name,
            &effective_assert,
            &effective_captures,
            exchange,
            env,
            Some(trace),
        ))
    }
}

/// Aplica um ramo: variáveis no Runtime, assertions e capturas nos
/// conjuntos efetivos. Devolve quantos checks e capturas entraram.
fn apply_branch(
    branch: &ScenarioBranch,
    effective_assert: &mut AssertionBlock,
    effective_captures: &mut BTreeMap<String, String>,
    env: &mut ExecutionEnv<'_>,
) -> (usize, usize) {
    for (name, value) in &branch.variables {
        env.ctx.set_runtime(name.clone(), value.clone());
    }

    let assertions_added = branch
        .assert
        .as_ref()
        .map(|b| {
            let count = usize::from(b.status_code.is_some())
                + b.headers.len()
                + b.body.len()
                + usize::from(b.response_time_ms.is_some())
                + usize::from(b.schema.is_some())
                + b.custom.len();
            effective_assert.merge(b);
            count
        })
        .unwrap_or(0);

    let captures_added = branch.capture.len();
    for (target, expr) in &branch.capture {
        effective_captures.insert(target.clone(), expr.clone());
    }

    (assertions_added, captures_added)
}
