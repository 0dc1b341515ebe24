//! Estratégia de iteração: expande o step em uma execução por binding.
//!
//! Duas formas de descritor:
//! - lista: `{over: "{{users}}", as: u}`: o template resolve para
//!   uma sequência
//! - intervalo: `{range: "1..5", as: i}`: inteiros, inclusivo nas
//!   duas pontas (start > end produz zero iterações e sucesso)
//!
//! Para cada binding, em ordem:
//! 1. snapshot do contexto
//! 2. escreve `as → valor` e a sentinela `_iteration` no Runtime
//! 3. deriva um step idêntico **sem** `iterate` e com nome
//!    `"<nome> [i/N]"`
//! 4. re-despacha o derivado pela fábrica (a recursão termina porque
//!    `iterate` sumiu)
//! 5. restaura o snapshot; capturas sobrevivem namespaceadas
//!    `<nome>_iteration_<i>` no agregado
//!
//! Fail-fast: sem `continue_on_failure`, a primeira falha encerra a
//! expansão.

use super::{ExecutionEnv, StepStrategy, StrategyFactory};
use crate::errors::StepError;
use crate::protocol::{Step, StepOutcome, StepStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Weak;
use tracing::{debug, info};

pub struct IterationStrategy {
    /// Referência fraca à fábrica, para despachar o step derivado.
    factory: Weak<StrategyFactory>,
}

impl IterationStrategy {
    pub fn new(factory: Weak<StrategyFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl StepStrategy for IterationStrategy {
    fn handles(&self, step: &Step) -> bool {
        step.iterate.is_some()
    }

    async fn execute(
        &self,
        step: &Step,
        env: &mut ExecutionEnv<'_>,
    ) -> Result<StepOutcome, StepError> {
        let iterate = step.iterate.as_ref().expect("handles garante iterate");

        let bindings = match expand_bindings(step, env) {
            Ok(b) => b,
            Err(outcome) => return Ok(*outcome),
        };
        let total = bindings.len();
        info!(step = %step.name, total, "Iteração expandida");

        let factory = self
            .factory
            .upgrade()
            .expect("fábrica vive mais que qualquer despacho");

        let mut results: Vec<StepOutcome> = Vec::with_capacity(total);
        let mut aggregate_captured: BTreeMap<String, Value> = BTreeMap::new();
        let mut total_duration = 0u64;

        for (i, value) in bindings.into_iter().enumerate() {
            let snapshot = env.ctx.snapshot();

            env.ctx.set_runtime(iterate.bind.clone(), value.clone());
            env.ctx.set_runtime(
                "_iteration",
                serde_json::json!({
                    "index": i,
                    "total": total,
                    "is_first": i == 0,
                    "is_last": i + 1 == total,
                    "value": value,
                }),
            );

            // Step derivado: idêntico, sem o marcador de iteração.
            let mut derived = step.clone();
            derived.iterate = None;
            derived.name = format!("{} [{}/{}]", step.name, i + 1, total);

            let result = match factory.dispatch(&derived, env).await {
                Ok(r) => r,
                Err(e) => {
                    env.ctx.restore(snapshot);
                    return Err(e);
                }
            };

            // Bindings locais somem; capturas sobrevivem namespaceadas.
            env.ctx.restore(snapshot);
            for (name, captured_value) in &result.captured {
                let namespaced = format!("{}_iteration_{}", name, i);
                env.ctx.set_runtime(namespaced.clone(), captured_value.clone());
                aggregate_captured.insert(namespaced, captured_value.clone());
            }

            total_duration += result.duration_ms;
            let failed = result.status == StepStatus::Failure;
            results.push(result);

            if failed && !step.continue_on_failure {
                debug!(step = %step.name, iteration = i, "Fail-fast: iteração interrompida");
                break;
            }
        }

        let all_ok = results.iter().all(|r| r.status == StepStatus::Success);
        let attempted = results.len();

        Ok(StepOutcome {
            step_name: step.name.clone(),
            status: if all_ok {
                StepStatus::Success
            } else {
                StepStatus::Failure
            },
            duration_ms: total_duration,
            request: None,
            response: None,
            assertions: Vec::new(),
            captured: aggregate_captured,
            iteration_results: Some(results),
            scenarios_meta: None,
            error: if all_ok {
                None
            } else {
                Some(format!(
                    "iteração falhou ({} de {} tentadas)",
                    attempted, total
                ))
            },
        })
    }
}

// ============================================================================
// EXPANSÃO
// ============================================================================

/// Resolve o descritor em uma lista ordenada de valores de binding.
fn expand_bindings(
    step: &Step,
    env: &mut ExecutionEnv<'_>,
) -> Result<Vec<Value>, Box<StepOutcome>> {
    let iterate = step.iterate.as_ref().expect("chamado só com iterate");

    if let Some(over) = &iterate.over {
        let resolved = env
            .ctx
            .interpolate_value(&Value::String(over.clone()))
            .map_err(|e| Box::new(StepOutcome::failure(&step.name, 0, e.to_string())))?;
        return match resolved {
            Value::Array(items) => Ok(items),
            other => Err(Box::new(StepOutcome::failure(
                &step.name,
                0,
                format!(
                    "iterate.over não resolveu para sequência (obteve {})",
                    type_label(&other)
                ),
            ))),
        };
    }

    if let Some(range) = &iterate.range {
        let resolved = env
            .ctx
            .interpolate_str(range)
            .map_err(|e| Box::new(StepOutcome::failure(&step.name, 0, e.to_string())))?;
        return parse_range(&resolved)
            .map(|values| values.into_iter().map(Value::from).collect())
            .map_err(|reason| Box::new(StepOutcome::failure(&step.name, 0, reason)));
    }

    Err(Box::new(StepOutcome::failure(
        &step.name,
        0,
        "iterate sem 'over' nem 'range'",
    )))
}

/// Intervalo `"start..end"`, inteiro e inclusivo nas duas pontas.
/// start > end é vazio (zero iterações), não erro.
fn parse_range(text: &str) -> Result<Vec<i64>, String> {
    let (start, end) = text
        .split_once("..")
        .ok_or_else(|| format!("intervalo inválido '{}': esperava \"start..end\"", text))?;
    let start: i64 = start
        .trim()
        .parse()
        .map_err(|_| format!("início de intervalo inválido '{}'", start))?;
    let end: i64 = end
        .trim()
        .parse()
        .map_err(|_| format!("fim de intervalo inválido '{}'", end))?;
    if start > end {
        return Ok(Vec::new());
    }
    Ok((start..=end).collect())
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_inclusive_both_ends() {
        assert_eq!(parse_range("1..3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_range("5..5").unwrap(), vec![5]);
    }

    #[test]
    fn inverted_range_is_empty_not_error() {
        assert_eq!(parse_range("7..3").unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn malformed_range_is_error() {
        assert!(parse_range("abc").is_err());
        assert!(parse_range("1..x").is_err());
    }
}
