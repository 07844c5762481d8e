//! Well-formedness check and best-effort repair for symbolic atoms.
//!
//! An atom is a parenthesized, whitespace-separated token sequence such as
//! `(treats neem malaria)`. It is well-formed when its trimmed text is wrapped
//! in `(` `)` and splits into at least two tokens.

use tracing::debug;

use afriverse_shared::{AfriverseError, Result};

const OPEN: char = '(';
const CLOSE: char = ')';

/// Predicates dropped when extracting key terms for a knowledge query.
const COMMON_PREDICATES: &[&str] = &["is_a", "has", "treats", "found_in", "used_for"];

/// True iff the trimmed atom is delimited and has at least two tokens.
pub fn is_well_formed(atom: &str) -> bool {
    let trimmed = atom.trim();
    trimmed.starts_with(OPEN) && trimmed.ends_with(CLOSE) && trimmed.split_whitespace().count() >= 2
}

/// Add whichever delimiters are missing and re-check.
///
/// A well-formed atom is returned unchanged. An atom that is still not
/// well-formed after adding delimiters (e.g. `(x)`) is a [`AfriverseError::Syntax`].
pub fn repair(atom: &str) -> Result<String> {
    if is_well_formed(atom) {
        return Ok(atom.to_string());
    }

    let trimmed = atom.trim();
    let mut repaired = String::with_capacity(trimmed.len() + 2);
    if !trimmed.starts_with(OPEN) {
        repaired.push(OPEN);
    }
    repaired.push_str(trimmed);
    if !trimmed.ends_with(CLOSE) {
        repaired.push(CLOSE);
    }

    if is_well_formed(&repaired) {
        Ok(repaired)
    } else {
        Err(AfriverseError::Syntax {
            atom: atom.to_string(),
        })
    }
}

/// Keep well-formed atoms, repair what can be repaired, drop the rest.
pub fn validate_batch<S: AsRef<str>>(atoms: &[S]) -> Vec<String> {
    let mut kept = Vec::with_capacity(atoms.len());
    for atom in atoms {
        match repair(atom.as_ref()) {
            Ok(atom) => kept.push(atom),
            Err(e) => debug!(error = %e, "dropping atom"),
        }
    }
    kept
}

/// Terms of an atom worth querying the knowledge base about.
///
/// Strips the delimiters, drops common predicates, and unquotes the rest.
pub fn key_terms(atom: &str) -> Vec<String> {
    let inner = atom
        .trim()
        .trim_start_matches(OPEN)
        .trim_end_matches(CLOSE);

    inner
        .split_whitespace()
        .filter(|term| !COMMON_PREDICATES.contains(term))
        .map(|term| term.trim_matches('"').to_string())
        .filter(|term| !term.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formedness() {
        assert!(is_well_formed("(plant leaf)"));
        assert!(is_well_formed("  (treats neem malaria)  "));
        assert!(!is_well_formed("treats plant burn"));
        assert!(!is_well_formed("(x)"));
        assert!(!is_well_formed("(open only"));
        assert!(!is_well_formed(""));
    }

    #[test]
    fn repair_adds_missing_delimiters() {
        assert_eq!(repair("treats plant burn").unwrap(), "(treats plant burn)");
        assert_eq!(repair("(treats plant burn").unwrap(), "(treats plant burn)");
        assert_eq!(repair("treats plant burn)").unwrap(), "(treats plant burn)");
        assert!(is_well_formed(&repair("treats plant burn").unwrap()));
    }

    #[test]
    fn repair_is_idempotent_on_well_formed_atoms() {
        for atom in ["(plant leaf)", " (is_a baobab tree) ", "(has \"moringa\" iron)"] {
            assert_eq!(repair(atom).unwrap(), atom);
            let once = repair(atom).unwrap();
            assert_eq!(repair(&once).unwrap(), once);
        }
    }

    #[test]
    fn single_token_atoms_are_unrepairable() {
        assert!(matches!(repair("(x)"), Err(AfriverseError::Syntax { .. })));
        assert!(repair("x").is_err());
        assert!(repair("   ").is_err());
    }

    #[test]
    fn batch_keeps_repairs_and_drops_silently() {
        let batch = validate_batch(&["(plant leaf)", "treats plant burn", "(x)", "lonely"]);
        assert_eq!(batch, vec!["(plant leaf)", "(treats plant burn)"]);
        assert!(validate_batch::<&str>(&[]).is_empty());
    }

    #[test]
    fn key_terms_skip_predicates_and_quotes() {
        assert_eq!(
            key_terms("(treats \"neem\" malaria)"),
            vec!["neem".to_string(), "malaria".to_string()]
        );
        assert_eq!(key_terms("(is_a baobab tree)"), vec!["baobab", "tree"]);
    }
}
