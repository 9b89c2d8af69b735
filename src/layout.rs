use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{JobConfig, OriginalPlacement};

/// Directory segment holding un-split source files in `separate`/`nolabel`
/// placement.
pub const ORIGINAL_SEGMENT: &str = "original";

/// The global output flags a run resolves paths under. `resolve` is a pure
/// function of this value and a [`JobConfig`]; the strings it produces are
/// the deduplication keys for the scheduler.
#[derive(Debug, Clone)]
pub struct Layout {
    pub out_root: Utf8PathBuf,
    pub split: bool,
    pub flatten: bool,
    pub original: OriginalPlacement,
    /// Private scratch directory receiving originals under `delete`
    /// placement; removed at end of run.
    pub scratch_dir: Utf8PathBuf,
}

impl Layout {
    /// Maps a config to its canonical output path.
    ///
    /// Full pattern: `{out}/original/{label}/{uniprot}/{pdb}/{pdb}.pdb`,
    /// with each segment present or absent per the placement rules. With
    /// `for_original` the path locates the un-split source file, otherwise
    /// the fragment directory.
    pub fn resolve(
        &self,
        config: &JobConfig,
        for_original: bool,
        include_root: bool,
        include_file_name: bool,
    ) -> Utf8PathBuf {
        let file_name = format!("{}.pdb", config.pdb);

        // Delete placement short-circuits originals into the scratch dir.
        if for_original && self.split && self.original == OriginalPlacement::Delete {
            return if include_file_name {
                self.scratch_dir.join(file_name)
            } else {
                self.scratch_dir.clone()
            };
        }

        let mut path = Utf8PathBuf::new();
        if include_root {
            path.push(&self.out_root);
        }
        if for_original && self.split && self.original != OriginalPlacement::Inplace {
            path.push(ORIGINAL_SEGMENT);
        }
        if let Some(label) = &config.label {
            if !for_original || self.original != OriginalPlacement::Nolabel {
                path.push(label.as_str());
            }
        }
        if let Some(uniprot) = &config.uniprot {
            if !self.flatten {
                path.push(uniprot.as_str());
            }
        }
        if !for_original || (self.split && self.original == OriginalPlacement::Inplace) {
            path.push(config.pdb.as_str());
        }
        if include_file_name {
            path.push(file_name);
        }
        path
    }

    pub fn out_root(&self) -> &Utf8Path {
        &self.out_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(split: bool, flatten: bool, original: OriginalPlacement) -> Layout {
        Layout {
            out_root: Utf8PathBuf::from("/out"),
            split,
            flatten,
            original,
            scratch_dir: Utf8PathBuf::from("/tmp/scratch"),
        }
    }

    fn config(pdb: &str, uniprot: Option<&str>, label: Option<&str>) -> JobConfig {
        JobConfig::new(
            pdb.parse().unwrap(),
            uniprot.map(|u| u.parse().unwrap()),
            label.map(|l| l.parse().unwrap()),
        )
    }

    #[test]
    fn plain_download_paths() {
        let layout = layout(false, false, OriginalPlacement::Inplace);

        let plain = config("5R7Y", None, None);
        assert_eq!(layout.resolve(&plain, true, true, true), "/out/5R7Y.pdb");

        let via_uniprot = config("6D26", Some("Q9Y5Y4"), None);
        assert_eq!(
            layout.resolve(&via_uniprot, true, true, true),
            "/out/Q9Y5Y4/6D26.pdb"
        );

        let labeled = config("5R80", Some("Q9Y5Y4"), Some("GPCR"));
        assert_eq!(
            layout.resolve(&labeled, true, true, true),
            "/out/GPCR/Q9Y5Y4/5R80.pdb"
        );
    }

    #[test]
    fn flatten_drops_uniprot_segment() {
        let layout = layout(false, true, OriginalPlacement::Inplace);
        let via_uniprot = config("6D26", Some("Q9Y5Y4"), Some("GPCR"));
        assert_eq!(
            layout.resolve(&via_uniprot, true, true, true),
            "/out/GPCR/6D26.pdb"
        );
    }

    #[test]
    fn split_inplace_keeps_original_beside_fragments() {
        let layout = layout(true, false, OriginalPlacement::Inplace);
        let cfg = config("6D26", Some("Q9Y5Y4"), None);
        assert_eq!(
            layout.resolve(&cfg, false, true, false),
            "/out/Q9Y5Y4/6D26"
        );
        assert_eq!(
            layout.resolve(&cfg, true, true, true),
            "/out/Q9Y5Y4/6D26/6D26.pdb"
        );
    }

    #[test]
    fn split_separate_nests_original_fully() {
        let layout = layout(true, false, OriginalPlacement::Separate);
        let cfg = config("6D26", Some("Q9Y5Y4"), Some("GPCR"));
        assert_eq!(
            layout.resolve(&cfg, true, true, true),
            "/out/original/GPCR/Q9Y5Y4/6D26.pdb"
        );
        assert_eq!(
            layout.resolve(&cfg, false, true, false),
            "/out/GPCR/Q9Y5Y4/6D26"
        );
    }

    #[test]
    fn split_nolabel_drops_label_for_original_only() {
        let layout = layout(true, false, OriginalPlacement::Nolabel);
        let cfg = config("5R7Y", None, Some("3CL pro"));
        assert_eq!(
            layout.resolve(&cfg, true, true, true),
            "/out/original/5R7Y.pdb"
        );
        assert_eq!(
            layout.resolve(&cfg, false, true, false),
            "/out/3CL pro/5R7Y"
        );
    }

    #[test]
    fn split_delete_diverts_original_to_scratch() {
        let layout = layout(true, false, OriginalPlacement::Delete);
        let cfg = config("5R7Y", None, Some("X"));
        assert_eq!(
            layout.resolve(&cfg, true, true, true),
            "/tmp/scratch/5R7Y.pdb"
        );
        assert_eq!(layout.resolve(&cfg, true, true, false), "/tmp/scratch");
        // Fragments still land under the output root.
        assert_eq!(layout.resolve(&cfg, false, true, false), "/out/X/5R7Y");
    }

    #[test]
    fn resolve_is_deterministic() {
        let layout = layout(true, false, OriginalPlacement::Separate);
        let cfg = config("4XT1", Some("Q9Y5Y4"), Some("X"));
        let first = layout.resolve(&cfg, true, false, true);
        let second = layout.resolve(&cfg, true, false, true);
        assert_eq!(first, second);
    }

    #[test]
    fn dedup_keys_without_root() {
        let layout = layout(false, false, OriginalPlacement::Inplace);
        let a = config("6D26", Some("Q9Y5Y4"), None);
        let b = config("6D26", None, None);
        assert_eq!(layout.resolve(&a, true, false, true), "Q9Y5Y4/6D26.pdb");
        assert_eq!(layout.resolve(&b, true, false, true), "6D26.pdb");
    }
}
