//! # Módulo de Hooks - Callbacks de Ciclo de Vida
//!
//! Callbacks opcionais do embedder, todos best-effort: erro de hook é
//! logado e a execução continua. Nenhum hook consegue quebrar um run.

use crate::protocol::{AggregatedResult, Specification, StepOutcome, SuiteResult};
use async_trait::async_trait;
use tracing::warn;

/// Conjunto de callbacks de ciclo de vida.
///
/// Implementações padrão vazias: o embedder sobrescreve o que quiser.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_test_discovered(&self, _spec: &Specification) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_execution_start(&self, _project_name: &str, _total: usize) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_suite_start(&self, _spec: &Specification) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_suite_end(&self, _result: &SuiteResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_step_start(&self, _node_id: &str, _step_name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_step_end(&self, _node_id: &str, _outcome: &StepOutcome) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_execution_end(&self, _result: &AggregatedResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_error(&self, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Implementação nula, usada quando o embedder não passa hooks.
pub struct NoopHooks;

#[async_trait]
impl LifecycleHooks for NoopHooks {}

/// Blindagem de despacho: loga a falha do hook e segue em frente.
pub async fn fire<F>(hook_name: &str, invocation: F)
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    if let Err(e) = invocation.await {
        warn!(hook = hook_name, error = %e, "Hook falhou; execução continua");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    #[async_trait]
    impl LifecycleHooks for Failing {
        async fn on_error(&self, _message: &str) -> anyhow::Result<()> {
            anyhow::bail!("hook quebrado")
        }
    }

    #[tokio::test]
    async fn failing_hook_does_not_propagate() {
        let hooks = Failing;
        // Sem panic, sem Err escapando.
        fire("on_error", hooks.on_error("boom")).await;
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl LifecycleHooks for Counting {
        async fn on_step_start(&self, _n: &str, _s: &str) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn hooks_are_invoked() {
        let hooks = Counting(AtomicUsize::new(0));
        fire("on_step_start", hooks.on_step_start("n", "s")).await;
        assert_eq!(hooks.0.load(Ordering::SeqCst), 1);
    }
}
