//! Cenários ponta a ponta do engine contra um servidor mock local.

use flowrunner::config::{EngineConfig, ExecutionMode};
use flowrunner::engine::FlowEngine;
use flowrunner::protocol::{
    AssertionBlock, Dependency, HttpMethod, IterationSpec, RequestSpec, Scenario, ScenarioBranch,
    Specification, Step, StepStatus, SuiteMetadata, SuiteStatus,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// HELPERS
// ============================================================================

fn suite(node_id: &str, base_url: &str, steps: Vec<Step>) -> Specification {
    Specification {
        node_id: node_id.to_string(),
        suite_name: node_id.to_string(),
        base_url: Some(base_url.to_string()),
        variables: HashMap::new(),
        exports: vec![],
        depends: vec![],
        metadata: SuiteMetadata::default(),
        steps,
        file_path: None,
    }
}

fn get_step(name: &str, url: &str) -> Step {
    Step {
        name: name.to_string(),
        request: Some(RequestSpec {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            timeout_ms: None,
            auth: None,
        }),
        assert: None,
        capture: BTreeMap::new(),
        scenarios: vec![],
        iterate: None,
        input: None,
        continue_on_failure: false,
    }
}

fn assert_block(yaml: &str) -> AssertionBlock {
    serde_yaml::from_str(yaml).unwrap()
}

fn captures(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn engine() -> FlowEngine {
    FlowEngine::new(EngineConfig::default()).unwrap()
}

// ============================================================================
// CENÁRIO 1: HAPPY PATH DE UM STEP
// ============================================================================

#[tokio::test]
async fn happy_single_step() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/echo"))
        .and(query_param("x", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"x": "1"})))
        .mount(&server)
        .await;

    let mut step = get_step("Echo", "/echo");
    step.request.as_mut().unwrap().params = [("x".to_string(), json!(1))].into_iter().collect();
    step.assert = Some(assert_block(
        r#"
status_code: 200
body:
  x: "1"
"#,
    ));

    let result = engine()
        .run_specs(vec![suite("echo", &server.uri(), vec![step])])
        .await
        .unwrap();

    assert_eq!(result.totals.total, 1);
    assert_eq!(result.suites[0].status, SuiteStatus::Success);
    assert_eq!(result.suites[0].steps_executed, 1);
    assert_eq!(result.suites[0].steps_successful, 1);

    let outcomes = &result.suites[0].steps[0].assertions;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.passed));
}

// ============================================================================
// CENÁRIO 2: DEPENDÊNCIA E EXPORT
// ============================================================================

#[tokio::test]
async fn dependency_and_export_propagation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tk-123"})))
        .mount(&server)
        .await;
    // Só responde 200 quando o header chega com o valor capturado em A.
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(header("Authorization", "Bearer tk-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .mount(&server)
        .await;

    let mut login = get_step("Login", "/login");
    login.request.as_mut().unwrap().method = HttpMethod::Post;
    login.assert = Some(assert_block("status_code: 200"));
    login.capture = captures(&[("token", "body.access_token")]);

    let mut auth = suite("auth", &server.uri(), vec![login]);
    auth.exports = vec!["token".to_string()];

    let mut list_users = get_step("List users", "/users");
    list_users.request.as_mut().unwrap().headers.insert(
        "Authorization".to_string(),
        "Bearer {{auth.token}}".to_string(),
    );
    list_users.assert = Some(assert_block("status_code: 200"));

    let mut users = suite("users", &server.uri(), vec![list_users]);
    users.depends = vec![Dependency {
        node_id: "auth".to_string(),
        required: true,
        cache: Default::default(),
        condition: None,
        variables: HashMap::new(),
    }];

    // Ordem de entrada invertida de propósito: o resolvedor reordena.
    let result = engine().run_specs(vec![users, auth]).await.unwrap();

    let order: Vec<&str> = result.suites.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(order, vec!["auth", "users"]);
    assert!(result.suites.iter().all(|s| s.status == SuiteStatus::Success));
    assert_eq!(
        result.suites[0].exported.get("token"),
        Some(&json!("tk-123"))
    );

    // O header efetivamente enviado carrega o valor capturado em A.
    let sent = &result.suites[1].steps[0].request.as_ref().unwrap().headers;
    assert_eq!(sent.get("Authorization"), Some(&"Bearer tk-123".to_string()));
}

// ============================================================================
// CENÁRIO 3: CICLO ABORTA
// ============================================================================

#[tokio::test]
async fn cycle_aborts_with_zero_executions() {
    let a = {
        let mut s = suite("a", "http://unused", vec![get_step("s", "/x")]);
        s.depends = vec![dep("b")];
        s
    };
    let b = {
        let mut s = suite("b", "http://unused", vec![get_step("s", "/x")]);
        s.depends = vec![dep("c")];
        s
    };
    let c = {
        let mut s = suite("c", "http://unused", vec![get_step("s", "/x")]);
        s.depends = vec![dep("a")];
        s
    };

    let err = engine().run_specs(vec![a, b, c]).await.unwrap_err();
    let message = err.to_string();
    for node in ["a", "b", "c"] {
        assert!(message.contains(node), "ciclo deveria citar '{}'", node);
    }
}

fn dep(node_id: &str) -> Dependency {
    Dependency {
        node_id: node_id.to_string(),
        required: true,
        cache: Default::default(),
        condition: None,
        variables: HashMap::new(),
    }
}

// ============================================================================
// CENÁRIO 4: ITERAÇÃO SOBRE LISTA COM FAIL-FAST
// ============================================================================

#[tokio::test]
async fn iteration_stops_at_failing_element() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/u/2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let mut step = get_step("Create per user", "/u/{{u.id}}");
    step.request.as_mut().unwrap().method = HttpMethod::Post;
    step.assert = Some(assert_block("status_code: 200"));
    step.iterate = Some(IterationSpec {
        over: Some("{{users}}".to_string()),
        range: None,
        bind: "u".to_string(),
    });

    let mut spec = suite("iterate", &server.uri(), vec![step]);
    spec.variables.insert(
        "users".to_string(),
        json!([{"id": 1}, {"id": 2}, {"id": 3}]),
    );

    let result = engine().run_specs(vec![spec]).await.unwrap();
    let suite_result = &result.suites[0];
    assert_eq!(suite_result.status, SuiteStatus::Failure);

    let outcome = &suite_result.steps[0];
    assert_eq!(outcome.status, StepStatus::Failure);
    let iterations = outcome.iteration_results.as_ref().unwrap();
    assert_eq!(iterations.len(), 2, "fail-fast corta na segunda iteração");
    assert_eq!(iterations[0].status, StepStatus::Success);
    assert_eq!(iterations[1].status, StepStatus::Failure);
}

// ============================================================================
// CENÁRIO 5: RAMIFICAÇÃO POR CENÁRIOS
// ============================================================================

#[tokio::test]
async fn scenario_branching_trace() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"plan": "pro"})))
        .mount(&server)
        .await;

    let mut step = get_step("Plan check", "/plan");
    step.scenarios = vec![
        Scenario {
            name: None,
            condition: r#"body.plan == "pro""#.to_string(),
            then: Some(ScenarioBranch {
                assert: Some(assert_block("status_code: 200")),
                capture: BTreeMap::new(),
                variables: HashMap::new(),
            }),
            otherwise: None,
        },
        Scenario {
            name: None,
            condition: r#"body.plan == "free""#.to_string(),
            then: Some(ScenarioBranch {
                assert: Some(assert_block("status_code: 402")),
                capture: BTreeMap::new(),
                variables: HashMap::new(),
            }),
            otherwise: None,
        },
    ];

    let result = engine()
        .run_specs(vec![suite("billing", &server.uri(), vec![step])])
        .await
        .unwrap();

    let outcome = &result.suites[0].steps[0];
    assert_eq!(outcome.status, StepStatus::Success);

    let trace = outcome.scenarios_meta.as_ref().unwrap();
    assert_eq!(trace.len(), 2);
    assert!(trace[0].matched && trace[0].executed);
    assert!(!trace[1].matched && !trace[1].executed);
    assert!(outcome.assertions.iter().all(|o| o.passed));
}

// ============================================================================
// CENÁRIO 6: PRIORIDADE DENTRO DA CAMADA
// ============================================================================

#[tokio::test]
async fn priority_orders_within_topological_layer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let make = |id: &str, priority: &str| {
        let mut s = suite(id, &server.uri(), vec![get_step("ping", "/ping")]);
        s.metadata.priority = Some(priority.to_string());
        s
    };

    let result = engine()
        .run_specs(vec![
            make("x", "medium"),
            make("y", "critical"),
            make("z", "low"),
        ])
        .await
        .unwrap();

    let order: Vec<&str> = result.suites.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(order, vec!["y", "x", "z"]);
}

// ============================================================================
// EXTRAS: MODO PARALELO E SKIPPED POR DEPENDÊNCIA
// ============================================================================

#[tokio::test]
async fn failed_required_dependency_skips_dependents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/boom"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let mut failing_step = get_step("boom", "/boom");
    failing_step.assert = Some(assert_block("status_code: 200"));
    let base = suite("base", &server.uri(), vec![failing_step]);

    let mut dependent = suite("dependent", &server.uri(), vec![get_step("ok", "/ok")]);
    dependent.depends = vec![dep("base")];

    let result = engine().run_specs(vec![base, dependent]).await.unwrap();
    assert_eq!(result.suites[0].status, SuiteStatus::Failure);
    assert_eq!(result.suites[1].status, SuiteStatus::Skipped);
    assert_eq!(result.totals.failed, 1);
    assert_eq!(result.totals.skipped, 1);
    assert!(!result.all_passed());
}

#[tokio::test]
async fn parallel_mode_respects_layers_and_exports() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tk-9"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer tk-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let mut login = get_step("Login", "/login");
    login.request.as_mut().unwrap().method = HttpMethod::Post;
    login.capture = captures(&[("token", "body.access_token")]);
    let mut auth = suite("auth", &server.uri(), vec![login]);
    auth.exports = vec!["token".to_string()];

    let make_dependent = |id: &str| {
        let mut step = get_step("call", "/data");
        step.request.as_mut().unwrap().headers.insert(
            "Authorization".to_string(),
            "Bearer {{auth.token}}".to_string(),
        );
        step.assert = Some(assert_block("status_code: 200"));
        let mut s = suite(id, &server.uri(), vec![step]);
        s.depends = vec![dep("auth")];
        s
    };

    let mut config = EngineConfig::default();
    config.execution.mode = ExecutionMode::Parallel;
    config.execution.max_parallel = 2;

    let result = FlowEngine::new(config)
        .unwrap()
        .run_specs(vec![make_dependent("d1"), auth, make_dependent("d2")])
        .await
        .unwrap();

    assert_eq!(result.totals.total, 3);
    assert_eq!(result.totals.failed, 0, "{:?}", result.suites);
    assert_eq!(result.suites[0].node_id, "auth");
}
