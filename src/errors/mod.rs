//! # Módulo de Erros
//!
//! Define os tipos de erro do orquestrador, organizados por fase:
//!
//! | Tipo             | Fase                | Efeito                          |
//! |------------------|---------------------|---------------------------------|
//! | `ConfigError`    | antes da descoberta | aborta a execução               |
//! | `DependencyError`| resolução do grafo  | aborta antes de qualquer step   |
//! | `TemplateError`  | interpolação        | falha o step                    |
//! | `HttpError`      | transporte          | falha o step                    |
//! | `CaptureError`   | extração            | falha o step                    |
//! | `ExportError`    | publicação          | warning (fatal em modo estrito) |
//! | `Cancelled`      | cancelamento        | falha a unidade em andamento    |
//!
//! Falha de assertion NÃO é erro: vira um outcome com `passed = false`
//! e o step decide seu status a partir da lista de outcomes.

use thiserror::Error;

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

/// Erro de configuração. Sempre fatal, sempre antes da descoberta.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Arquivo de configuração '{path}' não pôde ser lido: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Configuração inválida: {reason}")]
    Parse { reason: String },

    #[error("Chave '{key}' com valor inválido: {reason}")]
    InvalidValue { key: String, reason: String },
}

// ============================================================================
// GRAFO DE DEPENDÊNCIAS
// ============================================================================

/// Erro na resolução do grafo de dependências.
///
/// Qualquer variante aborta a execução com zero steps executados.
#[derive(Debug, Error)]
pub enum DependencyError {
    /// Ciclo no grafo. Carrega os node_ids envolvidos.
    #[error("Ciclo de dependências detectado: {}", nodes.join(" -> "))]
    Cycle { nodes: Vec<String> },

    /// Dependência required aponta para node_id não descoberto.
    #[error("Suíte '{wanted_by}' depende de '{node_id}', que não foi descoberta")]
    Missing { node_id: String, wanted_by: String },

    /// Dois arquivos declararam o mesmo node_id.
    #[error("node_id '{node_id}' duplicado entre suítes descobertas")]
    DuplicateNodeId { node_id: String },
}

// ============================================================================
// INTERPOLAÇÃO
// ============================================================================

/// Erro de interpolação de template. Falha o step que o encontrou.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Sintaxe inválida dentro de `{{...}}` (inclui expressões `$js:`).
    #[error("Expressão de template inválida '{expr}': {reason}")]
    Syntax { expr: String, reason: String },

    /// `{{nodeId.name}}` referindo namespace conhecido sem o export.
    #[error("Export '{name}' não existe no namespace '{namespace}'")]
    UnknownExport { namespace: String, name: String },
}

// ============================================================================
// TRANSPORTE HTTP
// ============================================================================

/// Erro de transporte, normalizado com prefixo estável na mensagem.
///
/// O prefixo permite que assertions e relatórios classifiquem a falha
/// sem inspecionar a causa original.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("timeout: requisicao excedeu {timeout_ms}ms ({url})")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("connect: conexao recusada ou inalcancavel ({url}): {reason}")]
    Connect { url: String, reason: String },

    #[error("tls: falha de handshake TLS ({url}): {reason}")]
    Tls { url: String, reason: String },

    #[error("URL inválida '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Header '{name}' com valor inválido (caractere de controle)")]
    InvalidHeader { name: String },

    #[error("Certificado de cliente para '{host}' não pôde ser carregado: {reason}")]
    Certificate { host: String, reason: String },

    #[error("transport: {reason} ({url})")]
    Transport { url: String, reason: String },
}

impl HttpError {
    /// Normaliza um erro do reqwest para a variante tipada.
    pub fn from_reqwest(url: &str, timeout_ms: u64, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return HttpError::Timeout {
                url: url.to_string(),
                timeout_ms,
            };
        }
        if err.is_connect() {
            // reqwest não distingue TLS de recusa de conexão na superfície
            // pública; o texto da causa é o que resta.
            let reason = err.to_string();
            let chain = format!("{:?}", err);
            if chain.contains("tls") || chain.contains("certificate") || chain.contains("Ssl") {
                return HttpError::Tls {
                    url: url.to_string(),
                    reason,
                };
            }
            return HttpError::Connect {
                url: url.to_string(),
                reason,
            };
        }
        HttpError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

// ============================================================================
// CAPTURA E EXPORT
// ============================================================================

/// Erro de captura. Falha o step.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Captura '{target}': expressão '{expr}' inválida: {reason}")]
    InvalidExpression {
        target: String,
        expr: String,
        reason: String,
    },
}

/// Problema na publicação de exports.
///
/// Warning por padrão; fatal quando a configuração pede modo estrito.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Suíte '{node_id}' declarou export '{name}' mas nunca o preencheu")]
    NeverBound { node_id: String, name: String },
}

// ============================================================================
// ERRO DE EXECUÇÃO (agregador)
// ============================================================================

/// Erro que um step pode produzir durante a execução.
///
/// O runner converte qualquer variante em `StepOutcome` com
/// `status = failure`; apenas `Cancelled` também propaga para a suíte.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("{0}")]
    Other(String),
}

impl StepError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled { .. })
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_nodes() {
        let err = DependencyError::Cycle {
            nodes: vec!["a".into(), "b".into(), "c".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("a -> b -> c"));
    }

    #[test]
    fn http_error_prefixes_are_stable() {
        let t = HttpError::Timeout {
            url: "http://x".into(),
            timeout_ms: 100,
        };
        assert!(t.to_string().starts_with("timeout:"));

        let c = HttpError::Connect {
            url: "http://x".into(),
            reason: "refused".into(),
        };
        assert!(c.to_string().starts_with("connect:"));

        let s = HttpError::Tls {
            url: "http://x".into(),
            reason: "bad cert".into(),
        };
        assert!(s.to_string().starts_with("tls:"));
    }

    #[test]
    fn step_error_wraps_template() {
        let e: StepError = TemplateError::Syntax {
            expr: "{{bad".into(),
            reason: "unterminated".into(),
        }
        .into();
        assert!(!e.is_cancelled());
        assert!(e.to_string().contains("{{bad"));
    }
}
