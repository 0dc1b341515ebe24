//! # Módulo de Protocolo - Estruturas de Dados das Suítes
//!
//! Este módulo define todas as **estruturas de dados** que representam
//! uma suíte de testes declarativa e os resultados de sua execução.
//!
//! ## O que é uma suíte?
//!
//! Uma suíte é um arquivo YAML que descreve:
//! - **O quê** testar (requisições HTTP, endpoints, payloads)
//! - **Como** validar (assertions sobre status, headers e body)
//! - **O que** capturar (valores da resposta viram variáveis)
//! - **O que** publicar (exports para outras suítes)
//!
//! ## Estrutura de uma suíte:
//!
//! ```yaml
//! node_id: auth
//! suite_name: "Authentication Flow"
//! base_url: "https://api.example.com"
//! exports: [token]
//! depends:
//!   - node_id: setup
//!     required: true
//! steps:
//!   - name: "Login"
//!     request:
//!       method: POST
//!       url: "/login"
//!       body: { user: "admin" }
//!     assert:
//!       status_code: 200
//!     capture:
//!       token: "body.access_token"
//! ```
//!
//! ## Hierarquia de Tipos:
//!
//! ```text
//! Specification
//! ├── SuiteMetadata (prioridade, tags, duração estimada)
//! ├── Dependency[] (predecessores declarados)
//! └── Step[] (lista de passos)
//!     ├── RequestSpec (método, URL, headers, body)
//!     ├── AssertionBlock (validações)
//!     ├── capture (expressões de captura)
//!     ├── Scenario[] (ramos condicionais)
//!     └── IterationSpec (repetição sobre lista/intervalo)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

// ============================================================================
// ESTRUTURA PRINCIPAL: SPECIFICATION
// ============================================================================

/// Representa uma suíte de testes completa.
///
/// Esta é a estrutura raiz produzida pela descoberta. É imutável durante
/// a execução: o runner lê, nunca escreve.
///
/// ## Campos:
/// - `node_id`: identificador estável, único dentro de uma execução
/// - `suite_name`: nome legível para logs e relatórios
/// - `base_url`: URL base opcional (paths relativos são concatenados a ela)
/// - `steps`: lista ordenada de passos
/// - `exports`: nomes de variáveis publicadas para suítes dependentes
/// - `depends`: dependências declaradas (outras suítes, por node_id)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Specification {
    /// Identificador único da suíte dentro de uma execução.
    ///
    /// Usado em `depends` e como namespace dos exports
    /// (ex: `{{auth.token}}` lê o export `token` do nó `auth`).
    pub node_id: String,

    /// Nome legível da suíte.
    pub suite_name: String,

    /// URL base para requisições com path relativo.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Variáveis literais do escopo da suíte.
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Nomes de variáveis que esta suíte publica para dependentes.
    ///
    /// Cada nome deve ser capturado (ou definido) durante a execução;
    /// nomes nunca preenchidos geram warning (ou erro em modo estrito).
    #[serde(default)]
    pub exports: Vec<String>,

    /// Dependências declaradas sobre outras suítes.
    #[serde(default)]
    pub depends: Vec<Dependency>,

    /// Metadados de agendamento (prioridade, tags, duração estimada).
    #[serde(default)]
    pub metadata: SuiteMetadata,

    /// Lista ordenada de passos a executar.
    pub steps: Vec<Step>,

    /// Caminho do arquivo de origem (preenchido pela descoberta).
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

// ============================================================================
// METADADOS E DEPENDÊNCIAS
// ============================================================================

/// Metadados de agendamento de uma suíte.
///
/// Não afetam a semântica dos passos, apenas a ordem de execução
/// e os filtros de runtime.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SuiteMetadata {
    /// Tag de prioridade (ex: "critical", "high", "medium", "low").
    ///
    /// Suítes sem tag são tratadas como "medium".
    #[serde(default)]
    pub priority: Option<String>,

    /// Tags livres para filtragem.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Duração estimada em milissegundos.
    ///
    /// Usada como critério secundário de ordenação (rápidas primeiro).
    #[serde(default)]
    pub estimated_duration_ms: Option<u64>,
}

/// Dependência declarada sobre outra suíte.
///
/// A aresta significa: a suíte referida deve completar com sucesso
/// antes desta executar.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Dependency {
    /// node_id da suíte predecessora.
    pub node_id: String,

    /// Se true (padrão), falha da dependência marca esta suíte como skipped.
    /// Se false e a dependência não existir, a aresta é descartada com warning.
    #[serde(default = "default_true")]
    pub required: bool,

    /// Política de cache para reentradas da dependência.
    ///
    /// - `true`: reusa o resultado anterior incondicionalmente (padrão)
    /// - `false`: re-executa a dependência
    /// - inteiro N: reusa se o resultado tiver menos de N segundos
    #[serde(default)]
    pub cache: CachePolicy,

    /// Expressão de ativação opcional. Quando avalia para false,
    /// a dependência é ignorada nesta execução.
    #[serde(default)]
    pub condition: Option<String>,

    /// Overrides de variáveis aplicados ao escopo da dependência
    /// quando ela é re-executada por causa desta suíte.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

fn default_true() -> bool {
    true
}

/// Política de cache de uma dependência.
///
/// No YAML o campo aceita bool ou inteiro:
/// `cache: true`, `cache: false` ou `cache: 30`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CachePolicy {
    /// `true` reusa sempre; `false` re-executa sempre.
    Reuse(bool),
    /// Reusa se o resultado tiver menos de N segundos.
    MaxAgeSeconds(u64),
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Reuse(true)
    }
}

// ============================================================================
// PASSO DE EXECUÇÃO: STEP
// ============================================================================

/// Representa um passo de execução dentro de uma suíte.
///
/// O despacho de estratégia inspeciona os campos presentes, nesta ordem:
/// 1. `iterate` presente → estratégia de iteração
/// 2. `scenarios` presente → estratégia de cenários
/// 3. `input` presente → estratégia de input (colaborador externo)
/// 4. caso contrário → requisição simples
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Step {
    /// Nome legível do passo. Aparece em logs e resultados.
    pub name: String,

    /// Descritor da requisição HTTP.
    ///
    /// Opcional apenas para passos de `input` puro; todos os demais
    /// precisam de uma requisição.
    #[serde(default)]
    pub request: Option<RequestSpec>,

    /// Bloco de assertions sobre a resposta.
    #[serde(default)]
    pub assert: Option<AssertionBlock>,

    /// Mapa de captura: variável de destino → expressão de extração.
    #[serde(default)]
    pub capture: BTreeMap<String, String>,

    /// Cenários condicionais avaliados após a requisição.
    #[serde(default)]
    pub scenarios: Vec<Scenario>,

    /// Descritor de iteração (lista ou intervalo).
    #[serde(default)]
    pub iterate: Option<IterationSpec>,

    /// Descritor de input interativo (resolvido por colaborador externo).
    #[serde(default)]
    pub input: Option<InputSpec>,

    /// Se true, a falha deste passo não interrompe a suíte.
    #[serde(default)]
    pub continue_on_failure: bool,
}

// ============================================================================
// DESCRITOR DE REQUISIÇÃO
// ============================================================================

/// Métodos HTTP suportados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    /// Nome canônico do método (maiúsculas), como vai no fio.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

/// Descritor de uma requisição HTTP.
///
/// Todos os campos string passam por interpolação de template
/// antes do envio (`{{var}}`, `{{node.export}}`, etc.).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestSpec {
    /// Método HTTP.
    pub method: HttpMethod,

    /// URL absoluta, ou path relativo à base_url da suíte.
    pub url: String,

    /// Headers da requisição.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Query params. Valores não-string são serializados.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// Body: string crua ou valor estruturado (serializado como JSON).
    #[serde(default)]
    pub body: Option<Value>,

    /// Timeout desta requisição em milissegundos.
    /// Quando ausente, vale o default da configuração.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Autenticação declarativa (vira header Authorization).
    #[serde(default)]
    pub auth: Option<AuthSpec>,
}

/// Autenticação declarativa de uma requisição.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthSpec {
    /// HTTP Basic: `Authorization: Basic base64(user:pass)`.
    Basic { username: String, password: String },
    /// Bearer token: `Authorization: Bearer <token>`.
    Bearer { token: String },
}

// ============================================================================
// ASSERTIONS
// ============================================================================

/// Bloco de assertions de um passo.
///
/// Três bandas principais (status, headers, body) mais a banda custom,
/// avaliada na sublinguagem de expressões.
///
/// As folhas das bandas aceitam duas formas:
/// - valor literal → igualdade implícita (`status_code: 200`)
/// - mapa de operadores (`body: {total: {greater_than: 10}}`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssertionBlock {
    /// Validação do status HTTP.
    #[serde(default)]
    pub status_code: Option<Value>,

    /// Validações de headers: nome (case-insensitive) → check.
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,

    /// Validações do body. Chaves com notação pontuada
    /// (`user.id`) são explodidas em mapas aninhados.
    #[serde(default)]
    pub body: BTreeMap<String, Value>,

    /// Validação da latência medida, em milissegundos.
    #[serde(default)]
    pub response_time_ms: Option<Value>,

    /// JSON Schema aplicado ao body inteiro.
    #[serde(default)]
    pub schema: Option<Value>,

    /// Assertions custom: condição na sublinguagem de expressões.
    #[serde(default)]
    pub custom: Vec<CustomAssertion>,
}

impl AssertionBlock {
    /// True quando nenhuma banda tem conteúdo.
    pub fn is_empty(&self) -> bool {
        self.status_code.is_none()
            && self.headers.is_empty()
            && self.body.is_empty()
            && self.response_time_ms.is_none()
            && self.schema.is_none()
            && self.custom.is_empty()
    }

    /// Funde outro bloco neste (usado pelos ramos de cenário).
    pub fn merge(&mut self, other: &AssertionBlock) {
        if other.status_code.is_some() {
            self.status_code = other.status_code.clone();
        }
        for (k, v) in &other.headers {
            self.headers.insert(k.clone(), v.clone());
        }
        for (k, v) in &other.body {
            self.body.insert(k.clone(), v.clone());
        }
        if other.response_time_ms.is_some() {
            self.response_time_ms = other.response_time_ms.clone();
        }
        if other.schema.is_some() {
            self.schema = other.schema.clone();
        }
        self.custom.extend(other.custom.iter().cloned());
    }
}

/// Assertion custom: `(name, condition, message)`.
///
/// A condição é avaliada na mesma sublinguagem dos cenários;
/// quando falsa, a assertion falha com a mensagem fornecida.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomAssertion {
    pub name: String,
    pub condition: String,
    #[serde(default)]
    pub message: Option<String>,
}

// ============================================================================
// CENÁRIOS CONDICIONAIS
// ============================================================================

/// Cenário condicional avaliado após a requisição do passo.
///
/// Todos os cenários da lista são avaliados, em ordem. Condição
/// verdadeira executa o ramo `then`; falsa executa `else` (se houver).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scenario {
    /// Nome opcional, para o trace.
    #[serde(default)]
    pub name: Option<String>,

    /// Condição na sublinguagem de expressões
    /// (ex: `body.plan == "pro"`).
    pub condition: String,

    /// Ramo executado quando a condição é verdadeira.
    #[serde(default)]
    pub then: Option<ScenarioBranch>,

    /// Ramo executado quando a condição é falsa.
    #[serde(default, rename = "else")]
    pub otherwise: Option<ScenarioBranch>,
}

/// Ramo de um cenário: assertions extras, capturas extras,
/// variáveis escritas no escopo Runtime.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScenarioBranch {
    #[serde(default)]
    pub assert: Option<AssertionBlock>,

    #[serde(default)]
    pub capture: BTreeMap<String, String>,

    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

// ============================================================================
// ITERAÇÃO E INPUT
// ============================================================================

/// Descritor de iteração de um passo.
///
/// Duas formas, mutuamente exclusivas:
/// - lista: `iterate: {over: "{{users}}", as: u}`
/// - intervalo: `iterate: {range: "1..5", as: i}` (inclusivo nas duas pontas)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IterationSpec {
    /// Template que resolve para uma sequência.
    #[serde(default)]
    pub over: Option<String>,

    /// Intervalo inteiro `"start..end"`, inclusivo nas duas pontas.
    #[serde(default)]
    pub range: Option<String>,

    /// Nome da variável de binding em cada iteração.
    #[serde(rename = "as")]
    pub bind: String,
}

/// Descritor de input interativo.
///
/// A resolução é feita por um colaborador externo (ver estratégia de
/// input); o engine só conhece esta interface.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputSpec {
    /// Texto mostrado a quem fornece o valor.
    pub prompt: String,

    /// Variável de destino no escopo Runtime.
    pub variable: String,

    /// Valor usado quando o provedor não responde.
    #[serde(default)]
    pub default: Option<Value>,

    /// Se true, o valor não aparece em logs.
    #[serde(default)]
    pub masked: bool,
}

// ============================================================================
// RESULTADOS: STEP
// ============================================================================

/// Status de um passo após execução.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Requisição ok e todas as assertions passaram.
    Success,
    /// Erro de execução ou assertion falhou.
    Failure,
    /// Passo não executado (ex: dependência falhou).
    Skipped,
}

/// Resultado de uma assertion individual.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssertionOutcome {
    /// Campo validado (ex: "status_code", "body.user.id").
    pub field: String,

    /// Valor esperado.
    pub expected: Value,

    /// Valor observado.
    pub actual: Value,

    /// Se a verificação passou.
    pub passed: bool,

    /// Mensagem adicional (TypeMismatch, InvalidRegex, custom...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Registro da requisição efetivamente enviada (pós-interpolação).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Registro da resposta recebida.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseRecord {
    /// Código de status HTTP (0 quando não houve resposta).
    pub status_code: u16,

    /// Headers da resposta.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Body decodificado: JSON quando o content-type indica,
    /// string caso contrário.
    pub body: Value,

    /// Tamanho do body em bytes.
    pub size_bytes: u64,

    /// Linha cURL equivalente à requisição, para reprodução manual.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curl_command: Option<String>,

    /// Texto cru da resposta, para debug.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<String>,
}

/// Entrada do trace de avaliação de cenários.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioTraceEntry {
    /// Posição do cenário na lista do passo.
    pub index: usize,

    /// Condição avaliada.
    pub condition: String,

    /// Se a condição avaliou para verdadeiro.
    pub matched: bool,

    /// Se algum ramo foi executado.
    pub executed: bool,

    /// Qual ramo executou.
    pub branch: ScenarioBranchKind,

    /// Quantas assertions o ramo acrescentou.
    pub assertions_added: usize,

    /// Quantas capturas o ramo acrescentou.
    pub captures_added: usize,
}

/// Ramo executado por um cenário.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioBranchKind {
    Then,
    Else,
    None,
}

/// Resultado da execução de um passo.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepOutcome {
    /// Nome do passo (iterações recebem sufixo "[i/N]").
    pub step_name: String,

    /// Status final.
    pub status: StepStatus,

    /// Duração em milissegundos.
    pub duration_ms: u64,

    /// Requisição resolvida, quando houve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestRecord>,

    /// Resposta recebida, quando houve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,

    /// Resultados das assertions, na ordem de avaliação.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionOutcome>,

    /// Variáveis capturadas por este passo.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub captured: BTreeMap<String, Value>,

    /// Sub-resultados de iteração, quando o passo iterou.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_results: Option<Vec<StepOutcome>>,

    /// Trace de avaliação dos cenários, quando o passo os tinha.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenarios_meta: Option<Vec<ScenarioTraceEntry>>,

    /// Mensagem de erro, quando status = failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    /// Esqueleto de resultado falho, sem requisição registrada.
    pub fn failure(
        step_name: impl Into<String>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            status: StepStatus::Failure,
            duration_ms,
            request: None,
            response: None,
            assertions: Vec::new(),
            captured: BTreeMap::new(),
            iteration_results: None,
            scenarios_meta: None,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// RESULTADOS: SUÍTE E AGREGADO
// ============================================================================

/// Status de uma suíte após execução.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteStatus {
    Success,
    Failure,
    Skipped,
}

/// Resultado da execução de uma suíte.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuiteResult {
    /// node_id da suíte.
    pub node_id: String,

    /// Nome legível.
    pub suite_name: String,

    /// Status final.
    pub status: SuiteStatus,

    /// Início em RFC3339.
    pub start_time: String,

    /// Fim em RFC3339.
    pub end_time: String,

    /// Duração total em milissegundos.
    pub duration_ms: u64,

    /// Quantos passos executaram.
    pub steps_executed: usize,

    /// Quantos passaram.
    pub steps_successful: usize,

    /// Quantos falharam.
    pub steps_failed: usize,

    /// Resultados por passo, na ordem declarada.
    pub steps: Vec<StepOutcome>,

    /// Exports efetivamente publicados ao final.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exported: BTreeMap<String, Value>,

    /// Mensagem de erro, quando status = failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SuiteResult {
    /// Resultado sintético de suíte pulada (dependência falhou, fail-fast...).
    pub fn skipped(spec: &Specification, reason: impl Into<String>, now: String) -> Self {
        Self {
            node_id: spec.node_id.clone(),
            suite_name: spec.suite_name.clone(),
            status: SuiteStatus::Skipped,
            start_time: now.clone(),
            end_time: now,
            duration_ms: 0,
            steps_executed: 0,
            steps_successful: 0,
            steps_failed: 0,
            steps: Vec::new(),
            exported: BTreeMap::new(),
            error: Some(reason.into()),
        }
    }
}

/// Totais de uma execução.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunTotals {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Timing de um endpoint, para o ranking de lentidão.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointTiming {
    pub url: String,
    pub duration_ms: u64,
}

/// Resumo de performance da execução.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerformanceSummary {
    /// Total de requisições HTTP disparadas.
    pub request_count: usize,

    /// Menor latência observada (ms).
    pub min_response_time_ms: u64,

    /// Latência média (ms).
    pub avg_response_time_ms: f64,

    /// Maior latência observada (ms).
    pub max_response_time_ms: u64,

    /// Requisições por segundo ao longo da execução.
    pub requests_per_second: f64,

    /// Endpoints mais lentos, do pior para o melhor.
    pub slowest_endpoints: Vec<EndpointTiming>,
}

/// Resultado agregado de uma execução completa.
///
/// É a interface com o colaborador de relatórios: serializar e
/// desserializar este valor é identidade (a menos de igualdade
/// estrutural de JSON).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatedResult {
    /// Nome do projeto (da configuração).
    pub project_name: String,

    /// UUID desta execução.
    pub run_id: String,

    /// Início em RFC3339.
    pub start_time: String,

    /// Fim em RFC3339.
    pub end_time: String,

    /// Duração total em milissegundos.
    pub duration_ms: u64,

    /// Resultados por suíte, na ordem de execução.
    pub suites: Vec<SuiteResult>,

    /// Totais.
    pub totals: RunTotals,

    /// Taxa de sucesso (0.0 a 1.0).
    pub success_rate: f64,

    /// Resumo de performance (quando habilitado na configuração).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceSummary>,

    /// Snapshot final do escopo Global (quando habilitado).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_variables: Option<BTreeMap<String, Value>>,
}

impl AggregatedResult {
    /// True quando nenhuma suíte falhou.
    pub fn all_passed(&self) -> bool {
        self.totals.failed == 0
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
    fn parses_minimal_suite_yaml() {
        let yaml = r#"
node_id: smoke
suite_name: "Smoke"
steps:
  - name: "Ping"
    request:
      method: GET
      url: "https://svc/ping"
"#;
        let spec: Specification = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.node_id, "smoke");
        assert_eq!(spec.steps.len(), 1);
        assert!(spec.depends.is_empty());
        assert!(spec.steps[0].capture.is_empty());
        assert!(!spec.steps[0].continue_on_failure);
    }

    #[test]
    fn parses_dependency_cache_policies() {
        let yaml = r#"
node_id: users
suite_name: "Users"
depends:
  - node_id: auth
  - node_id: seed
    cache: false
  - node_id: fixtures
    required: false
    cache: 30
steps:
  - name: "List"
    request: { method: GET, url: "/users" }
"#;
        let spec: Specification = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.depends.len(), 3);
        assert!(spec.depends[0].required);
        assert_eq!(spec.depends[0].cache, CachePolicy::Reuse(true));
        assert_eq!(spec.depends[1].cache, CachePolicy::Reuse(false));
        assert!(!spec.depends[2].required);
        assert_eq!(spec.depends[2].cache, CachePolicy::MaxAgeSeconds(30));
    }

    #[test]
    fn parses_scenarios_and_iteration() {
        let yaml = r#"
node_id: billing
suite_name: "Billing"
steps:
  - name: "Plan check"
    request: { method: GET, url: "/plan" }
    scenarios:
      - condition: 'body.plan == "pro"'
        then:
          assert: { status_code: 200 }
      - condition: 'body.plan == "free"'
        then:
          assert: { status_code: 402 }
  - name: "Per user"
    request: { method: POST, url: "/u/{{u.id}}" }
    iterate: { over: "{{users}}", as: u }
"#;
        let spec: Specification = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.steps[0].scenarios.len(), 2);
        let it = spec.steps[1].iterate.as_ref().unwrap();
        assert_eq!(it.bind, "u");
        assert_eq!(it.over.as_deref(), Some("{{users}}"));
        assert!(it.range.is_none());
    }

    #[test]
    fn assertion_block_merge_appends_custom() {
        let mut a = AssertionBlock {
            status_code: Some(json!(200)),
            ..Default::default()
        };
        let b = AssertionBlock {
            custom: vec![CustomAssertion {
                name: "has id".into(),
                condition: "body.id > 0".into(),
                message: None,
            }],
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.status_code, Some(json!(200)));
        assert_eq!(a.custom.len(), 1);
    }

    #[test]
    fn aggregated_result_roundtrip() {
        let result = AggregatedResult {
            project_name: "demo".into(),
            run_id: "00000000-0000-0000-0000-000000000000".into(),
            start_time: "2025-01-01T00:00:00Z".into(),
            end_time: "2025-01-01T00:00:05Z".into(),
            duration_ms: 5000,
            suites: vec![],
            totals: RunTotals {
                total: 0,
                successful: 0,
                failed: 0,
                skipped: 0,
            },
            success_rate: 1.0,
            performance: None,
            global_variables: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: AggregatedResult = serde_json::from_str(&json).unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::to_value(&back).unwrap()
        );
    }

    #[test]
    fn step_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&SuiteStatus::Skipped).unwrap(),
            "\"skipped\""
        );
    }
}
