//! Default file-name canonicalization

use super::traits::Canonicalizer;
use crate::types::ItemId;
use std::path::Path;

/// Canonicalizer that turns a file name into a safe identifier
///
/// The extension is dropped, every character outside `[A-Za-z0-9]` becomes `_`,
/// runs of `_` collapse to one and leading or trailing `_` are trimmed. Names
/// that differ only in punctuation or extension therefore share an id.
///
/// # Examples
///
/// ```
/// use recon_batch::collaborators::{Canonicalizer, DefaultCanonicalizer};
///
/// let c = DefaultCanonicalizer;
/// assert_eq!(
///     c.canonicalize("Bacteroides thetaiotaomicron VPI-5482.mat").as_str(),
///     "Bacteroides_thetaiotaomicron_VPI_5482"
/// );
/// assert_eq!(c.canonicalize("E.coli (K-12).sbml").as_str(), "E_coli_K_12");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCanonicalizer;

impl Canonicalizer for DefaultCanonicalizer {
    fn canonicalize(&self, file_name: &str) -> ItemId {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);

        let mut id = String::with_capacity(stem.len());
        for c in stem.chars() {
            if c.is_ascii_alphanumeric() {
                id.push(c);
            } else if !id.ends_with('_') {
                id.push('_');
            }
        }

        ItemId::new(id.trim_matches('_'))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn canon(name: &str) -> String {
        DefaultCanonicalizer.canonicalize(name).0
    }

    #[test]
    fn strips_extension_and_punctuation() {
        assert_eq!(canon("Escherichia coli str. K-12.mat"), "Escherichia_coli_str_K_12");
        assert_eq!(canon("Lactobacillus_reuteri.xml"), "Lactobacillus_reuteri");
    }

    #[test]
    fn names_differing_only_in_naming_collide() {
        assert_eq!(canon("Alistipes putredinis.mat"), canon("Alistipes_putredinis.sbml"));
        assert_eq!(canon("Alistipes--putredinis.mat"), canon("Alistipes putredinis.mat"));
    }

    #[test]
    fn numeric_names_stay_numeric() {
        assert_eq!(canon("10235.mat"), "10235");
        assert!(DefaultCanonicalizer.canonicalize("10235.mat").is_numeric());
    }

    #[test]
    fn only_last_extension_is_dropped() {
        assert_eq!(canon("model.v2.sbml"), "model_v2");
    }
}
