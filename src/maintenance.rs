// Reconcile stored ratings against the scanned item set.
//
// Rating rows whose files disappeared are only deleted after an explicit
// confirmation from the operator.

use std::collections::HashSet;
use std::io::{BufRead, Write};

use thiserror::Error;

use crate::db::{Reconciliation, RatingStore, StoreError};

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to read confirmation: {0}")]
    Io(#[from] std::io::Error),
}

/// Register every scanned item and report orphaned rating rows.
pub async fn reconcile<S: RatingStore>(
    store: &S,
    items: &[String],
) -> Result<Reconciliation, StoreError> {
    let keys: HashSet<String> = items.iter().cloned().collect();
    let rec = store.ensure_defaults(&keys).await?;
    if rec.inserted > 0 {
        tracing::info!("Registered {} new items at the default rating", rec.inserted);
    }
    if !rec.orphans.is_empty() {
        tracing::warn!(
            "{} rated items no longer exist on disk (run with --prune to remove them)",
            rec.orphans.len()
        );
    }
    Ok(rec)
}

/// Print the orphans and ask the operator to type `yes`.
pub fn confirm_prune<R: BufRead, W: Write>(
    orphans: &[String],
    input: &mut R,
    output: &mut W,
) -> std::io::Result<bool> {
    writeln!(output, "The following {} rating rows have no file:", orphans.len())?;
    for key in orphans {
        writeln!(output, "  {key}")?;
    }
    write!(output, "Delete them? Type 'yes' to confirm: ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

/// Delete orphaned rows once confirmed. Returns the number removed.
pub async fn prune_orphans<S, R, W>(
    store: &S,
    orphans: &[String],
    assume_yes: bool,
    input: &mut R,
    output: &mut W,
) -> Result<usize, MaintenanceError>
where
    S: RatingStore,
    R: BufRead,
    W: Write,
{
    if orphans.is_empty() {
        return Ok(0);
    }
    if !assume_yes && !confirm_prune(orphans, input, output)? {
        tracing::info!("Prune cancelled; {} orphaned rows kept", orphans.len());
        return Ok(0);
    }
    let removed = store.remove(orphans).await?;
    tracing::info!("Pruned {removed} orphaned rating rows");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRatingStore;
    use std::io::Cursor;

    fn items(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reconcile_reports_orphans_without_deleting() {
        let store = MemoryRatingStore::with_ratings([("gone.jpg", 1300.0), ("kept.jpg", 1100.0)]);
        let rec = reconcile(&store, &items(&["kept.jpg", "fresh.jpg"]))
            .await
            .unwrap();
        assert_eq!(rec.inserted, 1);
        assert_eq!(rec.orphans, items(&["gone.jpg"]));
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_prune_requires_confirmation() {
        let store = MemoryRatingStore::with_ratings([("gone.jpg", 1300.0), ("kept.jpg", 1100.0)]);
        let orphans = items(&["gone.jpg"]);

        let mut out: Vec<u8> = Vec::new();
        let removed = prune_orphans(&store, &orphans, false, &mut Cursor::new("no\n"), &mut out)
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.count().await.unwrap(), 2);
        let prompt = String::from_utf8(out).unwrap();
        assert!(prompt.contains("gone.jpg"));

        let removed = prune_orphans(
            &store,
            &orphans,
            false,
            &mut Cursor::new("YES\n"),
            &mut Vec::<u8>::new(),
        )
        .await
        .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_assume_yes_skips_prompt() {
        let store = MemoryRatingStore::with_ratings([("gone.jpg", 1300.0)]);
        let mut out: Vec<u8> = Vec::new();
        let removed = prune_orphans(
            &store,
            &items(&["gone.jpg"]),
            true,
            &mut Cursor::new(""),
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(removed, 1);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_prune_nothing_to_do() {
        let store = MemoryRatingStore::new();
        let removed = prune_orphans(&store, &[], false, &mut Cursor::new(""), &mut Vec::<u8>::new())
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
