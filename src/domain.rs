use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;

use crate::error::PdbFetchError;
use crate::matching::MatchTable;

/// A 4-character alphanumeric PDB entry id, kept verbatim as typed. The
/// archive accepts either case and the input casing is preserved in output
/// file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PdbId(String);

impl PdbId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PdbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PdbId {
    type Err = PdbFetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid =
            trimmed.chars().count() == 4 && trimmed.chars().all(|ch| ch.is_alphanumeric());
        if !is_valid {
            return Err(PdbFetchError::InvalidPdbId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A UniProt accession or entry name: 5-14 characters, alphanumeric plus
/// `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniprotId(String);

impl UniprotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniprotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UniprotId {
    type Err = PdbFetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let len = trimmed.chars().count();
        let is_valid = (5..15).contains(&len)
            && trimmed
                .chars()
                .all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '-');
        if !is_valid {
            return Err(PdbFetchError::InvalidUniprotId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A user-supplied grouping name taken from a `label:` line prefix. Becomes
/// a path segment, so characters the filesystem reserves are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(String);

const RESERVED_LABEL_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

impl Label {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Label {
    type Err = PdbFetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| !ch.is_control() && !RESERVED_LABEL_CHARS.contains(&ch));
        if !is_valid {
            return Err(PdbFetchError::InvalidLabel(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// What a job produces. Two configs are equal iff all three fields match;
/// equality and the canonical paths derived from a config drive job
/// deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub pdb: PdbId,
    pub uniprot: Option<UniprotId>,
    pub label: Option<Label>,
}

impl JobConfig {
    pub fn new(pdb: PdbId, uniprot: Option<UniprotId>, label: Option<Label>) -> Self {
        Self {
            pdb,
            uniprot,
            label,
        }
    }
}

/// Placement policy for the un-split source file when splitting is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OriginalPlacement {
    /// Keep the original beside its fragments.
    #[default]
    Inplace,
    /// Keep the original under `original/` with full label/uniprot nesting.
    Separate,
    /// Like `separate`, but without the label segment.
    Nolabel,
    /// Never persist the original to the output root.
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AminoAcid {
    Arginine,
    Lysine,
    AsparticAcid,
    GlutamicAcid,
    Glutamine,
    Asparagine,
    Histidine,
    Serine,
    Threonine,
    Tyrosine,
    Cysteine,
    Tryptophan,
    Alanine,
    Isoleucine,
    Leucine,
    Methionine,
    Phenylalanine,
    Valine,
    Proline,
    Glycine,
}

static AMINO_ACIDS: LazyLock<MatchTable<AminoAcid>> = LazyLock::new(|| {
    MatchTable::new()
        .literals(&["Arg", "ARG", "R"], AminoAcid::Arginine)
        .literals(&["Lys", "LYS", "K"], AminoAcid::Lysine)
        .literals(&["Asp", "ASP", "D"], AminoAcid::AsparticAcid)
        .literals(&["Glu", "GLU", "E"], AminoAcid::GlutamicAcid)
        .literals(&["Gln", "GLN", "Q"], AminoAcid::Glutamine)
        .literals(&["Asn", "ASN", "N"], AminoAcid::Asparagine)
        .literals(&["His", "HIS", "H"], AminoAcid::Histidine)
        .literals(&["Ser", "SER", "S"], AminoAcid::Serine)
        .literals(&["Thr", "THR", "T"], AminoAcid::Threonine)
        .literals(&["Tyr", "TYR", "Y"], AminoAcid::Tyrosine)
        .literals(&["Cys", "CYS", "C"], AminoAcid::Cysteine)
        .literals(&["Trp", "TRP", "W"], AminoAcid::Tryptophan)
        .literals(&["Ala", "ALA", "A"], AminoAcid::Alanine)
        .literals(&["Ile", "ILE", "I"], AminoAcid::Isoleucine)
        .literals(&["Leu", "LEU", "L"], AminoAcid::Leucine)
        .literals(&["Met", "MET", "M"], AminoAcid::Methionine)
        .literals(&["Phe", "PHE", "F"], AminoAcid::Phenylalanine)
        .literals(&["Val", "VAL", "V"], AminoAcid::Valine)
        .literals(&["Pro", "PRO", "P"], AminoAcid::Proline)
        .literals(&["Gly", "GLY", "G"], AminoAcid::Glycine)
});

impl AminoAcid {
    /// Resolves a residue code in three-letter (`Arg`/`ARG`) or one-letter
    /// (`R`) form. Matching is case-sensitive.
    pub fn resolve(token: &str) -> Option<Self> {
        AMINO_ACIDS.resolve(token)
    }

    pub fn is_standard_residue(token: &str) -> bool {
        Self::resolve(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_pdb_id_valid() {
        let id: PdbId = " 4xt1 ".parse().unwrap();
        assert_eq!(id.as_str(), "4xt1");
    }

    #[test]
    fn parse_pdb_id_invalid() {
        assert_matches!("XYZ".parse::<PdbId>(), Err(PdbFetchError::InvalidPdbId(_)));
        assert_matches!(
            "4XT!".parse::<PdbId>(),
            Err(PdbFetchError::InvalidPdbId(_))
        );
    }

    #[test]
    fn parse_uniprot_id_valid() {
        let id: UniprotId = "Q9Y5Y4".parse().unwrap();
        assert_eq!(id.as_str(), "Q9Y5Y4");
        assert!("OPSD_HUMAN".parse::<UniprotId>().is_ok());
    }

    #[test]
    fn parse_uniprot_id_invalid() {
        assert_matches!(
            "Q9Y5".parse::<UniprotId>(),
            Err(PdbFetchError::InvalidUniprotId(_))
        );
        assert_matches!(
            "A".repeat(15).parse::<UniprotId>(),
            Err(PdbFetchError::InvalidUniprotId(_))
        );
    }

    #[test]
    fn parse_label() {
        let label: Label = " 3CL pro ".parse().unwrap();
        assert_eq!(label.as_str(), "3CL pro");
        assert_matches!("".parse::<Label>(), Err(PdbFetchError::InvalidLabel(_)));
        assert_matches!(
            "a/b".parse::<Label>(),
            Err(PdbFetchError::InvalidLabel(_))
        );
    }

    #[test]
    fn job_config_equality() {
        let a = JobConfig::new("4XT1".parse().unwrap(), None, None);
        let b = JobConfig::new("4XT1".parse().unwrap(), None, None);
        let c = JobConfig::new(
            "4XT1".parse().unwrap(),
            None,
            Some("X".parse().unwrap()),
        );
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn amino_acid_codes() {
        assert_eq!(AminoAcid::resolve("ALA"), Some(AminoAcid::Alanine));
        assert_eq!(AminoAcid::resolve("Gly"), Some(AminoAcid::Glycine));
        assert_eq!(AminoAcid::resolve("W"), Some(AminoAcid::Tryptophan));
        assert_eq!(AminoAcid::resolve("HOH"), None);
        assert_eq!(AminoAcid::resolve("ala"), None);
    }
}
