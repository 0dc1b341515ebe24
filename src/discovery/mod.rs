// Module: Discovery
// Walks the test directory, matches suite files against the configured
// glob patterns and parses them into Specifications.

use crate::config::DiscoveryConfig;
use crate::protocol::Specification;
use anyhow::{Context, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Discovers and parses every suite file under `root`.
///
/// Results are sorted by file path so discovery order is stable across
/// platforms and runs.
pub fn discover(root: &Path, config: &DiscoveryConfig) -> Result<Vec<Specification>> {
    let include: Vec<Pattern> = compile_patterns(&config.patterns)?;
    let exclude: Vec<Pattern> = compile_patterns(&config.exclude)?;

    let mut files: Vec<PathBuf> = Vec::new();
    let walker = if config.recursive {
        WalkDir::new(root)
    } else {
        WalkDir::new(root).max_depth(1)
    };

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let included = include.iter().any(|p| p.matches(&relative));
        let excluded = exclude.iter().any(|p| p.matches(&relative));
        if included && !excluded {
            files.push(entry.path().to_path_buf());
        } else {
            debug!(file = %relative, included, excluded, "Arquivo fora da descoberta");
        }
    }
    files.sort();

    let mut specs = Vec::with_capacity(files.len());
    for file in files {
        specs.push(load_suite_file(&file)?);
    }

    info!(suites = specs.len(), directory = %root.display(), "Descoberta concluída");
    Ok(specs)
}

/// Lê e parseia um arquivo de suíte.
pub fn load_suite_file(path: &Path) -> Result<Specification> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read suite file {}", path.display()))?;
    let mut spec: Specification = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse suite file {}", path.display()))?;
    spec.file_path = Some(path.to_path_buf());
    Ok(spec)
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid glob pattern '{}'", p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_suite(dir: &Path, name: &str, node_id: &str) {
        let yaml = format!(
            r#"
node_id: {node_id}
suite_name: "{node_id}"
steps:
  - name: "Ping"
    request: {{ method: GET, url: "https://svc/ping" }}
"#
        );
        fs::write(dir.join(name), yaml).unwrap();
    }

    #[test]
    fn discovers_yaml_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_suite(dir.path(), "b.yaml", "b");
        write_suite(dir.path(), "a.yaml", "a");
        fs::write(dir.path().join("notes.txt"), "nada").unwrap();

        let specs = discover(dir.path(), &DiscoveryConfig::default()).unwrap();
        let ids: Vec<&str> = specs.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(specs[0].file_path.is_some());
    }

    #[test]
    fn exclude_patterns_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        write_suite(dir.path(), "keep.yaml", "keep");
        write_suite(dir.path(), "skip.draft.yaml", "skip");

        let config = DiscoveryConfig {
            patterns: vec!["**/*.yaml".to_string()],
            exclude: vec!["**/*.draft.yaml".to_string()],
            recursive: true,
        };
        let specs = discover(dir.path(), &config).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].node_id, "keep");
    }

    #[test]
    fn non_recursive_skips_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        write_suite(dir.path(), "top.yaml", "top");
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        write_suite(&nested, "deep.yaml", "deep");

        let config = DiscoveryConfig {
            patterns: vec!["**/*.yaml".to_string()],
            exclude: vec![],
            recursive: false,
        };
        let specs = discover(dir.path(), &config).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].node_id, "top");
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.yaml"), ": not yaml : [").unwrap();
        assert!(discover(dir.path(), &DiscoveryConfig::default()).is_err());
    }
}
