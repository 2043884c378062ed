//! ID resolver module
//!
//! Resolves run ID prefixes to full UUIDs by listing the runs of an
//! environment. Run IDs are only unique within the environment that owns them.

use anyhow::{Context, Result, anyhow};
use cutover_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a run ID or prefix within one environment
///
/// If the input is already a full UUID, returns it immediately.
///
/// # Errors
/// Returns an error if:
/// - No run of the environment matches the prefix
/// - Multiple runs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_run_id(
    client: &OrchestratorClient,
    stage: &str,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    // If it's already a full UUID, return it
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let runs = client
        .list_runs(stage)
        .await
        .context("Failed to fetch runs for ID resolution")?;

    select_unique(id_or_prefix, stage, runs.iter().map(|r| r.id))
}

/// Picks the single ID named by `id_or_prefix`
fn select_unique(
    id_or_prefix: &IdOrPrefix,
    stage: &str,
    ids: impl Iterator<Item = Uuid>,
) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids.filter(|id| id_or_prefix.matches(id)).collect();

    match matches.as_slice() {
        [] => Err(anyhow!(
            "No run found in {} with ID starting with '{}'",
            stage,
            id_or_prefix
        )),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs in {}: {}",
                id_or_prefix,
                stage,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<Uuid> {
        [
            "aa11aa11-0000-4000-8000-000000000000",
            "aa22aa22-0000-4000-8000-000000000000",
            "bb33bb33-0000-4000-8000-000000000000",
        ]
        .iter()
        .map(|s| Uuid::parse_str(s).unwrap())
        .collect()
    }

    #[test]
    fn test_unique_prefix_resolves() {
        let id = select_unique(&IdOrPrefix::parse("bb"), "dev", ids().into_iter()).unwrap();
        assert_eq!(id, ids()[2]);
    }

    #[test]
    fn test_ambiguous_prefix_is_rejected() {
        let err = select_unique(&IdOrPrefix::parse("aa"), "dev", ids().into_iter()).unwrap_err();
        assert!(err.to_string().contains("Ambiguous prefix 'aa'"));
    }

    #[test]
    fn test_unknown_prefix_is_rejected() {
        let err = select_unique(&IdOrPrefix::parse("cc"), "dev", ids().into_iter()).unwrap_err();
        assert!(err.to_string().starts_with("No run found in dev"));
    }
}
