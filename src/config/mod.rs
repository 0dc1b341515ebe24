//! # Módulo de Configuração
//!
//! Registro de configuração consumido pelo engine, carregado de YAML
//! com overrides da CLI. Todos os campos têm defaults seguros; a
//! validação roda antes da descoberta e qualquer problema é fatal
//! (`ConfigError`).
//!
//! ## Exemplo de arquivo:
//!
//! ```yaml
//! project_name: "payments-api"
//! test_directory: "./tests"
//! globals:
//!   base_url: "https://staging.example.com"
//!   variables: { env: staging }
//!   timeouts: { default: 30000, slow_tests: 120000 }
//! execution:
//!   mode: parallel
//!   max_parallel: 4
//! priorities:
//!   levels: [critical, high, medium, low]
//!   required: [critical]
//!   fail_fast_on_required: true
//! reporting:
//!   formats: [console, json]
//!   output_dir: "./reports"
//! ```

use crate::errors::ConfigError;
use crate::http::certs::{CertificateCredential, CertificateRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================================================
// DEFAULTS
// ============================================================================

/// Timeout default de requisição (ms).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Timeout por suíte para testes lentos (ms).
pub const DEFAULT_SUITE_TIMEOUT_MS: u64 = 120_000;

/// Paralelismo default dentro de uma camada.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Prefixo default das variáveis de ambiente carregadas no escopo
/// Environment (sufixo em minúsculas).
pub const DEFAULT_ENV_PREFIX: &str = "FLOW_TEST_";

fn default_project_name() -> String {
    "flow-test".to_string()
}
fn default_test_directory() -> String {
    "./tests".to_string()
}
fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
fn default_suite_timeout() -> u64 {
    DEFAULT_SUITE_TIMEOUT_MS
}
fn default_patterns() -> Vec<String> {
    vec!["**/*.yaml".to_string(), "**/*.yml".to_string()]
}
fn default_recursive() -> bool {
    true
}
fn default_levels() -> Vec<String> {
    vec![
        "critical".to_string(),
        "high".to_string(),
        "medium".to_string(),
        "low".to_string(),
    ]
}
fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}
fn default_continue_on_failure() -> bool {
    true
}
fn default_retry_attempts() -> u32 {
    1
}
fn default_formats() -> Vec<String> {
    vec!["console".to_string()]
}
fn default_output_dir() -> String {
    "./reports".to_string()
}
fn default_true() -> bool {
    true
}
fn default_env_prefix() -> String {
    DEFAULT_ENV_PREFIX.to_string()
}

// ============================================================================
// ESTRUTURA
// ============================================================================

/// Registro de configuração completo.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Identifica o run nos resultados.
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Diretório raiz da descoberta de suítes.
    #[serde(default = "default_test_directory")]
    pub test_directory: String,

    #[serde(default)]
    pub globals: GlobalsConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub priorities: PrioritiesConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub reporting: ReportingConfig,

    /// Filtros de runtime (AND-compostos com os da CLI).
    #[serde(default)]
    pub filters: FiltersConfig,

    /// Certificados de cliente por padrão de domínio.
    #[serde(default)]
    pub certificates: Vec<CertificateConfig>,

    /// Prefixo das variáveis de ambiente do escopo Environment.
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,

    /// Export declarado sem valor vira falha de suíte.
    #[serde(default)]
    pub strict_exports: bool,

    /// Cache consultivo de interpolação.
    #[serde(default = "default_true")]
    pub interpolation_cache: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults válidos")
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GlobalsConfig {
    /// Variáveis que semeiam o escopo Global.
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// base_url default quando a suíte não declara a sua.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    /// Timeout de requisição quando o step não declara o seu (ms).
    #[serde(default = "default_request_timeout")]
    pub default: u64,

    /// Timeout por suíte (ms).
    #[serde(default = "default_suite_timeout")]
    pub slow_tests: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            default: DEFAULT_REQUEST_TIMEOUT_MS,
            slow_tests: DEFAULT_SUITE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Globs de inclusão, relativos a test_directory.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,

    /// Globs de exclusão.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            exclude: Vec::new(),
            recursive: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrioritiesConfig {
    /// Tags em ordem decrescente de peso.
    #[serde(default = "default_levels")]
    pub levels: Vec<String>,

    /// Tags cuja falha dispara fail-fast do run.
    #[serde(default)]
    pub required: Vec<String>,

    #[serde(default)]
    pub fail_fast_on_required: bool,
}

impl Default for PrioritiesConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            required: Vec::new(),
            fail_fast_on_required: false,
        }
    }
}

/// Modo de execução entre suítes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Suítes simultâneas dentro de uma camada topológica.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Orçamento global do run (ms). Ausente = sem limite.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// false: a primeira suíte que falha marca as restantes como skipped.
    #[serde(default = "default_continue_on_failure")]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub retry_failed: RetryConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            max_parallel: DEFAULT_MAX_PARALLEL,
            timeout: None,
            continue_on_failure: true,
            retry_failed: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Total de tentativas, contando a primeira.
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportingConfig {
    /// Formatos: "console", "json".
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_true")]
    pub aggregate: bool,

    #[serde(default = "default_true")]
    pub include_performance_metrics: bool,

    #[serde(default = "default_true")]
    pub include_variables_state: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            output_dir: default_output_dir(),
            aggregate: true,
            include_performance_metrics: true,
            include_variables_state: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FiltersConfig {
    #[serde(default)]
    pub priorities: Vec<String>,
    #[serde(default)]
    pub node_ids: Vec<String>,
    #[serde(default)]
    pub suite_names: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
}

impl FiltersConfig {
    pub fn is_empty(&self) -> bool {
        self.priorities.is_empty()
            && self.node_ids.is_empty()
            && self.suite_names.is_empty()
            && self.tags.is_empty()
            && self.file_patterns.is_empty()
            && self.exclude_patterns.is_empty()
            && self.max_duration_ms.is_none()
    }
}

/// Certificado de cliente no arquivo de configuração.
///
/// PEM usa `cert_file` + `key_file` (+ `ca_file` opcional); PKCS#12
/// usa só `pfx_file` + `passphrase`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificateConfig {
    pub domain: String,
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub pfx_file: Option<PathBuf>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

// ============================================================================
// CARGA E VALIDAÇÃO
// ============================================================================

impl EngineConfig {
    /// Carrega de um arquivo YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Valida invariantes que o serde não expressa.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.mode == ExecutionMode::Parallel && self.execution.max_parallel == 0 {
            return Err(ConfigError::InvalidValue {
                key: "execution.max_parallel".to_string(),
                reason: "modo parallel exige max_parallel >= 1".to_string(),
            });
        }
        if self.globals.timeouts.default == 0 {
            return Err(ConfigError::InvalidValue {
                key: "globals.timeouts.default".to_string(),
                reason: "timeout de requisição deve ser positivo".to_string(),
            });
        }
        if self.priorities.levels.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "priorities.levels".to_string(),
                reason: "lista de níveis não pode ser vazia".to_string(),
            });
        }
        for format in &self.reporting.formats {
            if format != "console" && format != "json" {
                return Err(ConfigError::InvalidValue {
                    key: "reporting.formats".to_string(),
                    reason: format!("formato desconhecido '{}'", format),
                });
            }
        }
        for cert in &self.certificates {
            cert.credential()?;
        }
        Ok(())
    }

    /// Constrói o registro de certificados na ordem declarada.
    pub fn certificate_registry(&self) -> Result<CertificateRegistry, ConfigError> {
        let mut registry = CertificateRegistry::new();
        for cert in &self.certificates {
            registry.register(cert.domain.clone(), cert.credential()?);
        }
        Ok(registry)
    }
}

impl CertificateConfig {
    /// Converte para a credencial tipada, validando a combinação de campos.
    pub fn credential(&self) -> Result<CertificateCredential, ConfigError> {
        match (&self.pfx_file, &self.cert_file, &self.key_file) {
            (Some(bundle), None, None) => Ok(CertificateCredential::Pkcs12 {
                bundle_path: bundle.clone(),
                passphrase: self.passphrase.clone().ok_or_else(|| {
                    ConfigError::InvalidValue {
                        key: format!("certificates[{}]", self.domain),
                        reason: "pfx_file exige passphrase".to_string(),
                    }
                })?,
            }),
            (None, Some(cert), Some(key)) => Ok(CertificateCredential::Pem {
                cert_path: cert.clone(),
                key_path: key.clone(),
                ca_path: self.ca_file.clone(),
                passphrase: self.passphrase.clone(),
            }),
            _ => Err(ConfigError::InvalidValue {
                key: format!("certificates[{}]", self.domain),
                reason: "use pfx_file OU cert_file+key_file".to_string(),
            }),
        }
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.project_name, "flow-test");
        assert_eq!(config.globals.timeouts.default, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(config.execution.mode, ExecutionMode::Sequential);
        assert!(config.execution.continue_on_failure);
        assert_eq!(config.env_prefix, "FLOW_TEST_");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_full_config() {
        let yaml = r#"
project_name: payments
test_directory: ./suites
globals:
  base_url: "https://staging"
  variables: { env: staging }
  timeouts: { default: 5000, slow_tests: 60000 }
execution:
  mode: parallel
  max_parallel: 8
  retry_failed: { enabled: true, max_attempts: 3, delay_ms: 250 }
priorities:
  levels: [p0, p1, p2]
  required: [p0]
  fail_fast_on_required: true
filters:
  tags: [smoke]
reporting:
  formats: [console, json]
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.execution.max_parallel, 8);
        assert!(config.execution.retry_failed.enabled);
        assert_eq!(config.priorities.levels, vec!["p0", "p1", "p2"]);
        assert_eq!(config.filters.tags, vec!["smoke"]);
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let yaml = "globals: { timeouts: { default: 0 } }";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn unknown_report_format_is_invalid() {
        let yaml = "reporting: { formats: [xml] }";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn pfx_without_passphrase_is_invalid() {
        let yaml = r#"
certificates:
  - domain: "*.secure.test"
    pfx_file: ./client.p12
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn pem_credential_combination() {
        let cert = CertificateConfig {
            domain: "api.test".into(),
            cert_file: Some("c.pem".into()),
            key_file: Some("k.pem".into()),
            ca_file: None,
            pfx_file: None,
            passphrase: None,
        };
        assert!(matches!(
            cert.credential().unwrap(),
            CertificateCredential::Pem { .. }
        ));
    }
}
