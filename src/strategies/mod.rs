//! # Módulo de Estratégias - Despacho de Steps
//!
//! Cada step é tratado por exatamente uma estratégia, escolhida por
//! inspeção do descritor, nesta ordem de decisão:
//!
//! 1. `iterate` presente → **Iteration** (expande e re-despacha)
//! 2. `scenarios` presente → **Scenario** (requisição + ramos condicionais)
//! 3. `input` presente → **Input** (binding via colaborador externo)
//! 4. caso contrário → **Request** (requisição simples)
//!
//! As estratégias formam um registro por predicado de seleção: a
//! fábrica varre a lista e usa a primeira que aceitar o step. A
//! estratégia de iteração guarda uma referência fraca à própria
//! fábrica para despachar o step derivado (sem `iterate`, a recursão
//! termina).

pub mod input;
pub mod iteration;
pub mod request;
pub mod scenario;

use crate::context::VariableContext;
use crate::errors::StepError;
use crate::http::HttpClient;
use crate::protocol::{Step, StepOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use input::{DefaultInputProvider, InputProvider};

// ============================================================================
// AMBIENTE DE EXECUÇÃO
// ============================================================================

/// Tudo que uma estratégia precisa para executar um step.
///
/// O contexto de variáveis pertence ao runner da suíte (escritor
/// único); as estratégias o recebem emprestado por step.
pub struct ExecutionEnv<'a> {
    pub ctx: &'a mut VariableContext,
    pub http: &'a HttpClient,
    pub base_url: Option<String>,
    pub default_timeout_ms: u64,
    pub cancel: CancellationToken,
}

// ============================================================================
// TRAIT E FÁBRICA
// ============================================================================

/// Contrato de uma estratégia de step.
///
/// `Err` é reservado para cancelamento; qualquer outra falha vira
/// `StepOutcome` com `status = failure`.
#[async_trait]
pub trait StepStrategy: Send + Sync {
    /// Predicado de seleção: aceita este step?
    fn handles(&self, step: &Step) -> bool;

    /// Executa o step no ambiente dado.
    async fn execute(
        &self,
        step: &Step,
        env: &mut ExecutionEnv<'_>,
    ) -> Result<StepOutcome, StepError>;
}

/// Fábrica/registro de estratégias.
pub struct StrategyFactory {
    strategies: Vec<Arc<dyn StepStrategy>>,
}

impl StrategyFactory {
    /// Monta o conjunto padrão. `Arc::new_cyclic` permite que a
    /// estratégia de iteração guarde a referência fraca à fábrica
    /// sem criar ciclo forte.
    pub fn standard(input_provider: Arc<dyn InputProvider>) -> Arc<Self> {
        Arc::new_cyclic(|factory| Self {
            strategies: vec![
                Arc::new(iteration::IterationStrategy::new(factory.clone())),
                Arc::new(scenario::ScenarioStrategy),
                Arc::new(input::InputStrategy::new(input_provider)),
                Arc::new(request::RequestStrategy),
            ],
        })
    }

    /// Despacha o step para a primeira estratégia que o aceitar.
    pub async fn dispatch(
        &self,
        step: &Step,
        env: &mut ExecutionEnv<'_>,
    ) -> Result<StepOutcome, StepError> {
        let strategy = self
            .strategies
            .iter()
            .find(|s| s.handles(step))
            .expect("RequestStrategy aceita qualquer step");
        strategy.execute(step, env).await
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HttpMethod, InputSpec, IterationSpec, RequestSpec, Scenario};

    fn base_step(name: &str) -> Step {
        Step {
            name: name.to_string(),
            request: Some(RequestSpec {
                method: HttpMethod::Get,
                url: "https://svc/x".into(),
                headers: Default::default(),
                params: Default::default(),
                body: None,
                timeout_ms: None,
                auth: None,
            }),
            assert: None,
            capture: Default::default(),
            scenarios: vec![],
            iterate: None,
            input: None,
            continue_on_failure: false,
        }
    }

    #[test]
    fn decision_order_iterate_wins() {
        let factory = StrategyFactory::standard(Arc::new(DefaultInputProvider));
        let mut step = base_step("s");
        step.iterate = Some(IterationSpec {
            over: Some("{{xs}}".into()),
            range: None,
            bind: "x".into(),
        });
        step.scenarios = vec![Scenario {
            name: None,
            condition: "true".into(),
            then: None,
            otherwise: None,
        }];
        step.input = Some(InputSpec {
            prompt: "p".into(),
            variable: "v".into(),
            default: None,
            masked: false,
        });

        let selected = factory.strategies.iter().position(|s| s.handles(&step));
        assert_eq!(selected, Some(0), "iterate tem precedência máxima");
    }

    #[test]
    fn decision_order_scenarios_before_input() {
        let factory = StrategyFactory::standard(Arc::new(DefaultInputProvider));
        let mut step = base_step("s");
        step.scenarios = vec![Scenario {
            name: None,
            condition: "true".into(),
            then: None,
            otherwise: None,
        }];
        step.input = Some(InputSpec {
            prompt: "p".into(),
            variable: "v".into(),
            default: None,
            masked: false,
        });

        let selected = factory.strategies.iter().position(|s| s.handles(&step));
        assert_eq!(selected, Some(1));
    }

    #[test]
    fn plain_step_falls_through_to_request() {
        let factory = StrategyFactory::standard(Arc::new(DefaultInputProvider));
        let step = base_step("s");
        let selected = factory.strategies.iter().position(|s| s.handles(&step));
        assert_eq!(selected, Some(3));
    }
}
