//! # Módulo de Relatório
//!
//! Consome o resultado agregado; e nada além dele; para renderizar
//! os artefatos configurados: resumo no console e/ou JSON em
//! `reporting.output_dir`.

use crate::config::ReportingConfig;
use crate::protocol::{AggregatedResult, SuiteStatus};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

/// Renderiza o resultado em todos os formatos configurados.
///
/// Devolve os caminhos dos artefatos escritos em disco.
pub fn render(result: &AggregatedResult, config: &ReportingConfig) -> Result<Vec<PathBuf>> {
    let mut artifacts = Vec::new();
    for format in &config.formats {
        match format.as_str() {
            "console" => print_console(result),
            "json" => artifacts.push(write_json(result, config)?),
            other => info!(format = other, "Formato de relatório desconhecido; ignorando"),
        }
    }
    Ok(artifacts)
}

// ============================================================================
// CONSOLE
// ============================================================================

fn print_console(result: &AggregatedResult) {
    println!();
    println!("=== {} · run {} ===", result.project_name, result.run_id);
    println!(
        "{} suítes | {} ok | {} falhas | {} puladas | {:.1}% de sucesso | {}ms",
        result.totals.total,
        result.totals.successful,
        result.totals.failed,
        result.totals.skipped,
        result.success_rate * 100.0,
        result.duration_ms,
    );

    for suite in &result.suites {
        let marker = match suite.status {
            SuiteStatus::Success => "PASS",
            SuiteStatus::Failure => "FAIL",
            SuiteStatus::Skipped => "SKIP",
        };
        println!(
            "  [{}] {} ({}) - {}/{} steps, {}ms",
            marker,
            suite.suite_name,
            suite.node_id,
            suite.steps_successful,
            suite.steps_executed,
            suite.duration_ms,
        );
        if let Some(error) = &suite.error {
            println!("         {}", error);
        }
    }

    if let Some(perf) = &result.performance {
        println!(
            "  perf: {} reqs | min {}ms / avg {:.0}ms / max {}ms | {:.1} req/s",
            perf.request_count,
            perf.min_response_time_ms,
            perf.avg_response_time_ms,
            perf.max_response_time_ms,
            perf.requests_per_second,
        );
        for endpoint in perf.slowest_endpoints.iter().take(3) {
            println!("        lento: {} ({}ms)", endpoint.url, endpoint.duration_ms);
        }
    }
    println!();
}

// ============================================================================
// JSON
// ============================================================================

fn write_json(result: &AggregatedResult, config: &ReportingConfig) -> Result<PathBuf> {
    let dir = PathBuf::from(&config.output_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create report dir {}", dir.display()))?;

    let path = dir.join(format!("{}.json", result.run_id));
    let json = serde_json::to_string_pretty(result).context("Failed to serialize report")?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write report {}", path.display()))?;

    info!(path = %path.display(), "Relatório JSON escrito");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunTotals;

    fn sample() -> AggregatedResult {
        AggregatedResult {
            project_name: "demo".into(),
            run_id: "run-1".into(),
            start_time: "2025-01-01T00:00:00Z".into(),
            end_time: "2025-01-01T00:00:01Z".into(),
            duration_ms: 1000,
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
        }
    }

    #[test]
    fn json_report_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReportingConfig {
            formats: vec!["json".to_string()],
            output_dir: dir.path().display().to_string(),
            aggregate: true,
            include_performance_metrics: true,
            include_variables_state: true,
        };

        let artifacts = render(&sample(), &config).unwrap();
        assert_eq!(artifacts.len(), 1);

        let content = std::fs::read_to_string(&artifacts[0]).unwrap();
        let back: AggregatedResult = serde_json::from_str(&content).unwrap();
        assert_eq!(back.run_id, "run-1");
    }

    #[test]
    fn unknown_format_is_ignored() {
        let config = ReportingConfig {
            formats: vec!["html".to_string()],
            output_dir: "/tmp/none".to_string(),
            aggregate: true,
            include_performance_metrics: true,
            include_variables_state: true,
        };
        let artifacts = render(&sample(), &config).unwrap();
        assert!(artifacts.is_empty());
    }
}
