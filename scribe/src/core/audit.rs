//! Parsing and severity gating of dependency-audit output.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered vulnerability severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[serde(alias = "medium")]
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "moderate" | "medium" => Some(Severity::Moderate),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// One vulnerability reported by the auditor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fix_versions: Vec<String>,
}

impl AuditFinding {
    pub fn severity_level(&self) -> Option<Severity> {
        self.severity.as_deref().and_then(Severity::parse)
    }

    fn from_flat(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            package: text(obj.get("package").or_else(|| obj.get("name")))
                .unwrap_or_else(|| "unknown".to_string()),
            version: text(obj.get("version")),
            id: text(obj.get("id")).unwrap_or_else(|| "unknown".to_string()),
            severity: text(obj.get("severity")),
            description: text(obj.get("description")),
            fix_versions: strings(obj.get("fix_versions")),
        })
    }

    fn from_nested(package: &str, version: Option<String>, vuln: &Value) -> Option<Self> {
        let obj = vuln.as_object()?;
        Some(Self {
            package: package.to_string(),
            version,
            id: text(obj.get("id")).unwrap_or_else(|| "unknown".to_string()),
            severity: text(obj.get("severity")),
            description: text(obj.get("description")),
            fix_versions: strings(obj.get("fix_versions")),
        })
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse audit JSON in either the flat `vulnerabilities` layout or pip-audit's
/// `dependencies[].vulns[]` layout.
pub fn parse_audit_report(raw: &str) -> Result<Vec<AuditFinding>, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(trimmed)?;
    let mut findings = Vec::new();

    if let Some(flat) = value.get("vulnerabilities").and_then(Value::as_array) {
        findings.extend(flat.iter().filter_map(AuditFinding::from_flat));
    }

    let deps = value
        .get("dependencies")
        .and_then(Value::as_array)
        .or_else(|| value.as_array());
    for dep in deps.into_iter().flatten() {
        let Some(name) = dep.get("name").and_then(Value::as_str) else {
            continue;
        };
        let version = text(dep.get("version"));
        let vulns = dep.get("vulns").and_then(Value::as_array);
        for vuln in vulns.into_iter().flatten() {
            if let Some(finding) = AuditFinding::from_nested(name, version.clone(), vuln) {
                findings.push(finding);
            }
        }
    }

    Ok(findings)
}

/// True if any finding meets or exceeds `threshold`.
pub fn exceeds_threshold(findings: &[AuditFinding], threshold: Severity) -> bool {
    findings
        .iter()
        .filter_map(AuditFinding::severity_level)
        .any(|level| level >= threshold)
}
