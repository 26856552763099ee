//! Lead import from JSON or JSON lines

use std::fs;
use std::path::Path;

use eyre::{Context, Result, eyre};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{Lead, RawAttributes};
use crate::state::{LeadStorage, StateError};

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    /// Ids of newly created leads, in file order
    pub imported: Vec<String>,
    /// Ids already present in the store
    pub duplicates: Vec<String>,
}

/// Parse attribute objects from either a JSON array or one object per line
pub fn parse_records(content: &str) -> Result<Vec<RawAttributes>> {
    debug!(len = content.len(), "parse_records: called");
    let trimmed = content.trim_start();
    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("Failed to parse JSON array of leads")?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).with_context(|| format!("Failed to parse line {}", n + 1))
            })
            .collect::<Result<_>>()?
    };

    values
        .into_iter()
        .enumerate()
        .map(|(n, value)| match value {
            Value::Object(map) => Ok(RawAttributes::from(map)),
            other => Err(eyre!("Record {} is not an object: {}", n + 1, other)),
        })
        .collect()
}

/// Build a NEW lead, using an explicit `id` attribute when present
pub fn lead_from_attributes(attributes: RawAttributes) -> Lead {
    match attributes.get_str("id").map(str::to_string) {
        Some(id) => Lead::new(id, attributes),
        None => Lead::from_attributes(attributes),
    }
}

/// Create leads in storage; duplicates are reported and skipped
pub async fn import_leads(storage: &dyn LeadStorage, records: Vec<RawAttributes>) -> Result<ImportReport> {
    debug!(count = records.len(), "import_leads: called");
    let mut report = ImportReport::default();
    for attributes in records {
        let lead = lead_from_attributes(attributes);
        let id = lead.id().to_string();
        match storage.import(lead).await {
            Ok(id) => report.imported.push(id),
            Err(StateError::AlreadyExists(_)) => {
                warn!(%id, "Lead already exists, skipping");
                report.duplicates.push(id);
            }
            Err(e) => return Err(e).context(format!("Failed to import lead {}", id)),
        }
    }
    info!(
        imported = report.imported.len(),
        duplicates = report.duplicates.len(),
        "Import complete"
    );
    Ok(report)
}

/// Read a file and import its leads
pub async fn import_file(storage: &dyn LeadStorage, path: &Path) -> Result<ImportReport> {
    debug!(path = %path.display(), "import_file: called");
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let records = parse_records(&content)?;
    import_leads(storage, records).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LeadStatus;
    use crate::state::StateManager;

    #[test]
    fn test_parse_array_and_lines() {
        let array = r#"[{"company": "Acme"}, {"company": "Globex"}]"#;
        assert_eq!(parse_records(array).unwrap().len(), 2);

        let lines = "{\"company\": \"Acme\"}\n\n{\"company\": \"Globex\"}\n";
        let records = parse_records(lines).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get_str("company"), Some("Globex"));
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse_records("[1, 2]").is_err());
        assert!(parse_records("{\"a\": 1}\nnot json").is_err());
    }

    #[test]
    fn test_explicit_id_is_kept() {
        let records = parse_records(r#"[{"id": "lead-7", "company": "Acme"}]"#).unwrap();
        let lead = lead_from_attributes(records.into_iter().next().unwrap());
        assert_eq!(lead.id(), "lead-7");
        assert_eq!(lead.status(), LeadStatus::New);
    }

    #[test]
    fn test_generated_id_uses_company_slug() {
        let records = parse_records(r#"[{"company": "Acme Corp"}]"#).unwrap();
        let lead = lead_from_attributes(records.into_iter().next().unwrap());
        assert!(lead.id().contains("-lead-acme"), "id: {}", lead.id());
    }

    #[tokio::test]
    async fn test_duplicates_are_skipped() {
        let storage = StateManager::spawn_in_memory().unwrap();
        let records = parse_records(
            r#"[{"id": "a", "email": "a@example.test"}, {"id": "b"}, {"id": "a", "email": "other@example.test"}]"#,
        )
        .unwrap();

        let report = import_leads(&storage, records).await.unwrap();
        assert_eq!(report.imported, vec!["a", "b"]);
        assert_eq!(report.duplicates, vec!["a"]);

        let stored = storage.get_lead_required("a").await.unwrap();
        assert_eq!(stored.email(), Some("a@example.test"));
    }
}
