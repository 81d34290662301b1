use crate::model::TransferId;

/// What to do about a name collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Upload under a disambiguated name (`report.pdf` → `report (1).pdf`).
    Rename,
    /// Remove the existing file and take its name.
    Replace,
    /// Abandon this upload; reported as a cancellation, not an error.
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictDecision {
    pub choice: ConflictChoice,
    /// Extends this choice to every further conflict in the current upload
    /// batch, so only one prompt surfaces for a batch of colliding names.
    pub apply_to_all: bool,
}

/// What the resolver is shown when an upload hits a name collision.
#[derive(Debug, Clone)]
pub struct ConflictPrompt {
    pub transfer_id: TransferId,
    pub name: String,
}

/// Supplies conflict decisions. The queue guarantees at most one prompt is
/// outstanding at a time across all pending conflicts; an `apply_to_all`
/// decision then answers the rest of the batch without further prompts.
#[async_trait::async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, prompt: ConflictPrompt) -> ConflictDecision;
}

/// `report.pdf` → `report (1).pdf`, `report (2).pdf`, …
/// Extensionless names get the suffix at the end.
pub fn disambiguated_name(base: &str, attempt: u32) -> String {
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({attempt}).{ext}"),
        _ => format!("{base} ({attempt})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disambiguated_name() {
        assert_eq!(disambiguated_name("report.pdf", 1), "report (1).pdf");
        assert_eq!(disambiguated_name("report.pdf", 2), "report (2).pdf");
        assert_eq!(disambiguated_name("archive.tar.gz", 1), "archive.tar (1).gz");
        assert_eq!(disambiguated_name("README", 3), "README (3)");
        assert_eq!(disambiguated_name(".gitignore", 1), ".gitignore (1)");
    }
}
