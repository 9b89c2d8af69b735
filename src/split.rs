use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::BufWriter;

use camino::Utf8Path;

use crate::domain::AminoAcid;
use crate::error::PdbFetchError;
use crate::pdbfile::{PdbReader, PdbWriter, Record, lines_equivalent};
use crate::sink::LogSink;

/// Residue codes dropped from every fragment file. They still flow to the
/// backup mirror so the round-trip self-check covers them.
const SOLVENT_BLOCKLIST: &[&str] = &["HOH", "H2O", "WATER"];

/// Merged group name for the standard amino-acid backbone of a chain.
const AMINO_ACIDS_GROUP: &str = "AminoAcids";

#[derive(Debug, Clone, Default)]
pub struct SplitOptions {
    /// Prefix every fragment file name with the entry id.
    pub entry_prefix: bool,
    pub overwrite: bool,
    /// Mirror non-chain records (header, remarks, ...) into every fragment.
    pub copy_common_records: bool,
}

type GroupKey = (String, String, i32);

/// Decomposes one structure file into per-chain/per-residue fragment files
/// under `out_dir`, then validates itself by comparing a full backup mirror
/// of the stream against the source. The caller creates `out_dir`.
pub fn split_chains(
    entry: &str,
    source: &Utf8Path,
    out_dir: &Utf8Path,
    options: &SplitOptions,
    sink: &dyn LogSink,
) -> Result<(), PdbFetchError> {
    let backup_path = out_dir.join(format!("{entry}_backup.pdb"));

    let mut reader = PdbReader::open(source)?;
    let mut backup = PdbWriter::create(&backup_path)?;
    let mut writers: HashMap<GroupKey, Option<PdbWriter<BufWriter<File>>>> = HashMap::new();
    let mut common: Vec<Record> = Vec::new();

    loop {
        let record = match reader.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(err) => {
                sink.warn(&format!("Skipped unreadable record in '{source}': {err}"));
                continue;
            }
        };

        if record.is_coordinate_data() {
            // is_coordinate_data implies chain fields are present.
            if let Some(chain) = record.chain_fields() {
                let residue_name = chain.residue_name.clone();
                if !SOLVENT_BLOCKLIST.contains(&residue_name.as_str()) {
                    let key = group_key(chain.chain_id, &residue_name, chain.residue_seq);

                    if !writers.contains_key(&key) {
                        let writer =
                            open_group_writer(entry, out_dir, &key, options, &common, sink)?;
                        writers.insert(key.clone(), writer);
                    }
                    if let Some(Some(writer)) = writers.get_mut(&key) {
                        writer.write_record(&record)?;
                    }
                }
            }
        } else if options.copy_common_records {
            for writer in writers.values_mut().flatten() {
                writer.write_record(&record)?;
            }
            common.push(record.clone());
        }

        backup.write_record(&record)?;
    }

    backup.finish()?;
    for (_, writer) in writers {
        if let Some(writer) = writer {
            writer.finish()?;
        }
    }

    // Self-check, not a correctness gate: on mismatch the backup is kept
    // for inspection and the split still counts as successful.
    if files_match(&backup_path, source)? {
        fs::remove_file(backup_path.as_std_path())
            .map_err(|err| PdbFetchError::Filesystem(format!("remove {backup_path}: {err}")))?;
    } else {
        sink.warn(&format!("Signature not matched in '{backup_path}'"));
    }

    Ok(())
}

/// Grouping policy: lowercase chain ids get an `@` prefix (case-insensitive
/// filesystems), a blank chain id becomes `Global`, standard amino acids
/// merge into one `AminoAcids` group per chain, and every other residue
/// instance keeps its own `(name, seq)` group.
fn group_key(chain_id: char, residue_name: &str, residue_seq: i32) -> GroupKey {
    let chain = if chain_id.is_lowercase() {
        format!("@{chain_id}")
    } else if chain_id.is_whitespace() {
        "Global".to_string()
    } else {
        chain_id.to_string()
    };

    if AminoAcid::is_standard_residue(residue_name) {
        (chain, AMINO_ACIDS_GROUP.to_string(), 0)
    } else {
        (chain, residue_name.to_string(), residue_seq)
    }
}

fn fragment_file_name(entry: &str, key: &GroupKey, entry_prefix: bool) -> String {
    let (chain, group, seq) = key;
    let prefix = if entry_prefix {
        format!("{entry}_")
    } else {
        String::new()
    };
    let suffix = if *seq == 0 {
        String::new()
    } else {
        format!("_{seq}")
    };
    format!("{prefix}{chain}_{group}{suffix}.pdb")
}

fn open_group_writer(
    entry: &str,
    out_dir: &Utf8Path,
    key: &GroupKey,
    options: &SplitOptions,
    common: &[Record],
    sink: &dyn LogSink,
) -> Result<Option<PdbWriter<BufWriter<File>>>, PdbFetchError> {
    let file_name = fragment_file_name(entry, key, options.entry_prefix);
    let path = out_dir.join(&file_name);
    let exists = path.as_std_path().exists();

    if !options.overwrite && exists {
        sink.warn(&format!(
            "Skipped existing fragment '{file_name}' for '{entry}'"
        ));
        return Ok(None);
    }

    let mut writer = PdbWriter::create(&path)?;
    for record in common {
        writer.write_record(record)?;
    }

    if exists {
        sink.warn(&format!("Overwrote fragment '{file_name}' for '{entry}'"));
    } else {
        sink.info(&format!("Writing fragment '{file_name}' for '{entry}'"));
    }
    Ok(Some(writer))
}

fn files_match(backup: &Utf8Path, source: &Utf8Path) -> Result<bool, PdbFetchError> {
    let backup_text = read_lines(backup)?;
    let source_text = read_lines(source)?;
    if backup_text.len() != source_text.len() {
        return Ok(false);
    }
    Ok(backup_text
        .iter()
        .zip(source_text.iter())
        .all(|(mirrored, original)| lines_equivalent(mirrored, original)))
}

fn read_lines(path: &Utf8Path) -> Result<Vec<String>, PdbFetchError> {
    let text = fs::read_to_string(path.as_std_path())
        .map_err(|err| PdbFetchError::Filesystem(format!("read {path}: {err}")))?;
    Ok(text.lines().map(str::to_string).collect())
}
