use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::sync::LazyLock;

use camino::Utf8Path;

use crate::error::PdbFetchError;
use crate::matching::MatchTable;

/// Record tags of the PDB 3.3 fixed-column format. See
/// https://www.wwpdb.org/documentation/file-format-content/format33/v3.3.html
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    // Title section
    Header,
    Obsolete,
    Title,
    Split,
    Caveat,
    Compound,
    Source,
    Keywords,
    ExperimentData,
    NumModels,
    ModelType,
    Author,
    RevisionData,
    Supersedes,
    Journal,
    Remark,
    // Primary structure section
    DbRef,
    DbRef1,
    DbRef2,
    SeqAdv,
    SeqRes,
    ModRes,
    // Heterogen section
    Het,
    Formula,
    HetName,
    HetSynonym,
    // Secondary structure section
    Helix,
    Sheet,
    // Connectivity annotation section
    SsBond,
    Link,
    CisPep,
    // Miscellaneous features section
    Site,
    // Crystallographic and coordinate transformation section
    Cryst1,
    Matrix,
    OrigX,
    Scale,
    // Coordinate section
    Model,
    Atom,
    Anisou,
    Ter,
    HetAtm,
    EndModel,
    // Connectivity section
    Connect,
    // Bookkeeping section
    Master,
    End,
    // Legacy tags kept for passthrough
    SigAtm,
    SigUij,
    HydBond,
    Footnote,
    SaltBridge,
    Turn,
}

static RECORD_TAGS: LazyLock<MatchTable<RecordType>> = LazyLock::new(|| {
    MatchTable::new()
        .literals(&["HEADER"], RecordType::Header)
        .literals(&["OBSLTE"], RecordType::Obsolete)
        .literals(&["TITLE"], RecordType::Title)
        .literals(&["SPLIT"], RecordType::Split)
        .literals(&["CAVEAT"], RecordType::Caveat)
        .literals(&["COMPND"], RecordType::Compound)
        .literals(&["SOURCE"], RecordType::Source)
        .literals(&["KEYWDS"], RecordType::Keywords)
        .literals(&["EXPDTA"], RecordType::ExperimentData)
        .literals(&["NUMMDL"], RecordType::NumModels)
        .literals(&["MDLTYP"], RecordType::ModelType)
        .literals(&["AUTHOR"], RecordType::Author)
        .literals(&["REVDAT"], RecordType::RevisionData)
        .literals(&["SPRSDE"], RecordType::Supersedes)
        .literals(&["JRNL"], RecordType::Journal)
        .literals(&["REMARK"], RecordType::Remark)
        .literals(&["DBREF"], RecordType::DbRef)
        .literals(&["DBREF1"], RecordType::DbRef1)
        .literals(&["DBREF2"], RecordType::DbRef2)
        .literals(&["SEQADV"], RecordType::SeqAdv)
        .literals(&["SEQRES"], RecordType::SeqRes)
        .literals(&["MODRES"], RecordType::ModRes)
        .literals(&["HET"], RecordType::Het)
        .literals(&["FORMUL"], RecordType::Formula)
        .literals(&["HETNAM"], RecordType::HetName)
        .literals(&["HETSYN"], RecordType::HetSynonym)
        .literals(&["HELIX"], RecordType::Helix)
        .literals(&["SHEET"], RecordType::Sheet)
        .literals(&["SSBOND"], RecordType::SsBond)
        .literals(&["LINK"], RecordType::Link)
        .literals(&["CISPEP"], RecordType::CisPep)
        .literals(&["SITE"], RecordType::Site)
        .literals(&["CRYST1"], RecordType::Cryst1)
        .pattern("MTRIX[123]", RecordType::Matrix)
        .pattern("ORIGX[123]", RecordType::OrigX)
        .pattern("SCALE[123]", RecordType::Scale)
        .literals(&["MODEL"], RecordType::Model)
        .literals(&["ATOM"], RecordType::Atom)
        .literals(&["ANISOU"], RecordType::Anisou)
        .literals(&["TER"], RecordType::Ter)
        .literals(&["HETATM"], RecordType::HetAtm)
        .literals(&["ENDMDL"], RecordType::EndModel)
        .literals(&["CONECT"], RecordType::Connect)
        .literals(&["MASTER"], RecordType::Master)
        .literals(&["END"], RecordType::End)
        .literals(&["SIGATM"], RecordType::SigAtm)
        .literals(&["SIGUIJ"], RecordType::SigUij)
        .literals(&["HYDBND"], RecordType::HydBond)
        .literals(&["FTNOTE"], RecordType::Footnote)
        .literals(&["SLTBRG"], RecordType::SaltBridge)
        .literals(&["TURN"], RecordType::Turn)
});

impl RecordType {
    pub fn resolve(tag: &str) -> Option<Self> {
        RECORD_TAGS.resolve(tag)
    }
}

/// Fields every chain-scoped record carries.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainFields {
    pub serial: i32,
    pub chain_id: char,
    pub residue_name: String,
    pub residue_seq: i32,
    pub insertion_code: char,
}

/// ATOM/HETATM coordinate fields. Columns per
/// https://www.wwpdb.org/documentation/file-format-content/format33/sect9.html#ATOM
#[derive(Debug, Clone, PartialEq)]
pub struct AtomFields {
    pub chain: ChainFields,
    pub name: String,
    pub alt_loc: char,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub occupancy: f32,
    pub temp_factor: f32,
    pub element: String,
    pub charge: String,
}

/// ANISOU anisotropic temperature factor fields.
#[derive(Debug, Clone, PartialEq)]
pub struct AnisouFields {
    pub chain: ChainFields,
    pub name: String,
    pub alt_loc: char,
    pub u11: i32,
    pub u22: i32,
    pub u33: i32,
    pub u12: i32,
    pub u13: i32,
    pub u23: i32,
    pub element: String,
    pub charge: String,
}

/// One decoded line of a PDB file. Chain-scoped variants carry
/// [`ChainFields`]; record types without structured field definitions pass
/// through verbatim as `Other` so re-encoding preserves them byte for byte.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Atom(AtomFields),
    HeteroAtom(AtomFields),
    Anisou(AnisouFields),
    Ter(ChainFields),
    Model { serial: i32 },
    EndModel,
    End,
    Other { kind: RecordType, raw: String },
}

impl Record {
    /// Decodes one input line. An unknown tag, an over-long line or a field
    /// that fails to parse is an error for this line only; the caller skips
    /// it and keeps reading.
    pub fn decode(line: &str) -> Result<Self, PdbFetchError> {
        if line == "END" {
            return Ok(Record::End);
        }
        if line.chars().count() > 80 {
            return Err(PdbFetchError::Record(format!(
                "line exceeds 80 columns: {line:.20}..."
            )));
        }

        let tag: String = line.chars().take(6).collect();
        let kind = RecordType::resolve(&tag)
            .ok_or_else(|| PdbFetchError::Record(format!("unknown record tag '{tag}'")))?;

        match kind {
            RecordType::Atom => Ok(Record::Atom(decode_atom(line)?)),
            RecordType::HetAtm => Ok(Record::HeteroAtom(decode_atom(line)?)),
            RecordType::Anisou => Ok(Record::Anisou(decode_anisou(line)?)),
            RecordType::Ter => Ok(Record::Ter(decode_ter(line)?)),
            RecordType::Model => Ok(Record::Model {
                serial: parse_int(line, 10, 4)?,
            }),
            RecordType::EndModel => Ok(Record::EndModel),
            _ => Ok(Record::Other {
                kind,
                raw: line.to_string(),
            }),
        }
    }

    /// Re-renders the record with the original column widths and alignment.
    /// Decode then encode reproduces the source line up to trailing
    /// whitespace and the space-for-dash tolerance of [`lines_equivalent`].
    pub fn encode(&self) -> String {
        match self {
            Record::Atom(fields) => encode_atom("ATOM", fields),
            Record::HeteroAtom(fields) => encode_atom("HETATM", fields),
            Record::Anisou(f) => {
                format!(
                    "{:<6}{:>5} {:<4}{}{:>3} {}{:>4}{} {:>7}{:>7}{:>7}{:>7}{:>7}{:>7}      {:>2}{:<2}",
                    "ANISOU",
                    f.chain.serial,
                    shifted_name(&f.name, &f.element),
                    f.alt_loc,
                    f.chain.residue_name,
                    f.chain.chain_id,
                    f.chain.residue_seq,
                    f.chain.insertion_code,
                    f.u11,
                    f.u22,
                    f.u33,
                    f.u12,
                    f.u13,
                    f.u23,
                    f.element,
                    f.charge,
                )
            }
            Record::Ter(chain) => format!(
                "{:<6}{:>5}      {:>3} {}{:>4}{}{:>53}",
                "TER",
                chain.serial,
                chain.residue_name,
                chain.chain_id,
                chain.residue_seq,
                chain.insertion_code,
                "",
            ),
            Record::Model { serial } => format!("{:<6}    {serial:>4}{:>66}", "MODEL", ""),
            Record::EndModel => format!("{:<80}", "ENDMDL"),
            Record::End => "END".to_string(),
            Record::Other { raw, .. } => raw.clone(),
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Atom(_) => RecordType::Atom,
            Record::HeteroAtom(_) => RecordType::HetAtm,
            Record::Anisou(_) => RecordType::Anisou,
            Record::Ter(_) => RecordType::Ter,
            Record::Model { .. } => RecordType::Model,
            Record::EndModel => RecordType::EndModel,
            Record::End => RecordType::End,
            Record::Other { kind, .. } => *kind,
        }
    }

    /// Chain-scoped records (ATOM, HETATM, ANISOU, TER) expose their shared
    /// chain/residue fields.
    pub fn chain_fields(&self) -> Option<&ChainFields> {
        match self {
            Record::Atom(fields) | Record::HeteroAtom(fields) => Some(&fields.chain),
            Record::Anisou(fields) => Some(&fields.chain),
            Record::Ter(chain) => Some(chain),
            _ => None,
        }
    }

    /// ATOM, HETATM and ANISOU carry atomic coordinates or factors and are
    /// the records the split engine routes into fragment files.
    pub fn is_coordinate_data(&self) -> bool {
        matches!(
            self,
            Record::Atom(_) | Record::HeteroAtom(_) | Record::Anisou(_)
        )
    }
}

fn field(row: &str, start: usize, len: usize) -> Result<&str, PdbFetchError> {
    row.get(start..start + len).ok_or_else(|| {
        PdbFetchError::Record(format!(
            "line too short for columns {}-{}: {row}",
            start + 1,
            start + len
        ))
    })
}

fn char_at(row: &str, index: usize) -> Result<char, PdbFetchError> {
    Ok(field(row, index, 1)?.chars().next().unwrap_or(' '))
}

fn parse_int(row: &str, start: usize, len: usize) -> Result<i32, PdbFetchError> {
    let text = field(row, start, len)?;
    text.trim().parse().map_err(|_| {
        PdbFetchError::Record(format!("invalid integer '{text}' in line: {row}"))
    })
}

fn parse_float(row: &str, start: usize, len: usize) -> Result<f32, PdbFetchError> {
    let text = field(row, start, len)?;
    text.trim().parse().map_err(|_| {
        PdbFetchError::Record(format!("invalid number '{text}' in line: {row}"))
    })
}

fn decode_chain_prefix(row: &str) -> Result<(ChainFields, String, char), PdbFetchError> {
    let chain = ChainFields {
        serial: parse_int(row, 6, 5)?,
        residue_name: field(row, 17, 3)?.trim().to_string(),
        chain_id: char_at(row, 21)?,
        residue_seq: parse_int(row, 22, 4)?,
        insertion_code: char_at(row, 26)?,
    };
    let name = field(row, 12, 4)?.trim().to_string();
    let alt_loc = char_at(row, 16)?;
    Ok((chain, name, alt_loc))
}

fn decode_atom(row: &str) -> Result<AtomFields, PdbFetchError> {
    let (chain, name, alt_loc) = decode_chain_prefix(row)?;
    let element = field(row, 76, 2)?.trim().to_string();
    if element.is_empty() {
        return Err(PdbFetchError::Record(format!(
            "coordinate line has no element defined: {row}"
        )));
    }
    Ok(AtomFields {
        chain,
        name,
        alt_loc,
        x: parse_float(row, 30, 8)?,
        y: parse_float(row, 38, 8)?,
        z: parse_float(row, 46, 8)?,
        occupancy: parse_float(row, 54, 6)?,
        temp_factor: parse_float(row, 60, 6)?,
        element,
        charge: field(row, 78, 2)?.trim().to_string(),
    })
}

fn decode_anisou(row: &str) -> Result<AnisouFields, PdbFetchError> {
    let (chain, name, alt_loc) = decode_chain_prefix(row)?;
    Ok(AnisouFields {
        chain,
        name,
        alt_loc,
        u11: parse_int(row, 28, 7)?,
        u22: parse_int(row, 35, 7)?,
        u33: parse_int(row, 42, 7)?,
        u12: parse_int(row, 49, 7)?,
        u13: parse_int(row, 56, 7)?,
        u23: parse_int(row, 63, 7)?,
        element: field(row, 76, 2)?.trim().to_string(),
        charge: field(row, 78, 2)?.trim().to_string(),
    })
}

fn decode_ter(row: &str) -> Result<ChainFields, PdbFetchError> {
    Ok(ChainFields {
        serial: parse_int(row, 6, 5)?,
        residue_name: field(row, 17, 3)?.trim().to_string(),
        chain_id: char_at(row, 21)?,
        residue_seq: parse_int(row, 22, 4)?,
        insertion_code: char_at(row, 26)?,
    })
}

// A short atom name starting with its one-letter element symbol sits one
// column right of the name field start (columns 13-16 vs 14-16).
fn shifted_name(name: &str, element: &str) -> String {
    if name.len() < 4 && element.len() == 1 && name.starts_with(element) {
        format!(" {name}")
    } else {
        name.to_string()
    }
}

fn encode_atom(tag: &str, f: &AtomFields) -> String {
    format!(
        "{:<6}{:>5} {:<4}{}{:>3} {}{:>4}{}   {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}{:<2}",
        tag,
        f.chain.serial,
        shifted_name(&f.name, &f.element),
        f.alt_loc,
        f.chain.residue_name,
        f.chain.chain_id,
        f.chain.residue_seq,
        f.chain.insertion_code,
        f.x,
        f.y,
        f.z,
        f.occupancy,
        f.temp_factor,
        f.element,
        f.charge,
    )
}

/// Compares two lines ignoring trailing whitespace, treating a blank column
/// in the re-encoded line as equivalent to a dash in the original (an
/// archive quirk in charge columns).
pub fn lines_equivalent(encoded: &str, original: &str) -> bool {
    let encoded = encoded.trim_end();
    let original = original.trim_end();
    if encoded.chars().count() != original.chars().count() {
        return false;
    }
    encoded
        .chars()
        .zip(original.chars())
        .all(|(new, old)| new == old || (new == ' ' && old == '-'))
}

/// Streams records from a PDB file line by line.
pub struct PdbReader<R> {
    reader: R,
}

impl PdbReader<BufReader<File>> {
    pub fn open(path: &Utf8Path) -> Result<Self, PdbFetchError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| PdbFetchError::Filesystem(format!("open {path}: {err}")))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> PdbReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next line and decodes it. `Ok(None)` is end of stream; an
    /// `Err` covers that line only and the reader stays usable.
    pub fn read_record(&mut self) -> Result<Option<Record>, PdbFetchError> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|err| PdbFetchError::Filesystem(err.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Record::decode(&line).map(Some)
    }
}

/// Writes records back out, one 80-column line each.
pub struct PdbWriter<W: Write> {
    writer: W,
}

impl PdbWriter<BufWriter<File>> {
    pub fn create(path: &Utf8Path) -> Result<Self, PdbFetchError> {
        let file = File::create(path.as_std_path())
            .map_err(|err| PdbFetchError::Filesystem(format!("create {path}: {err}")))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> PdbWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record(&mut self, record: &Record) -> Result<(), PdbFetchError> {
        self.writer
            .write_all(record.encode().as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|err| PdbFetchError::Filesystem(err.to_string()))
    }

    pub fn finish(mut self) -> Result<(), PdbFetchError> {
        self.writer
            .flush()
            .map_err(|err| PdbFetchError::Filesystem(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn atom_line() -> String {
        [
            "ATOM  ", "    1", " ", " N  ", " ", "MET", " ", "A", "   1", " ", "   ",
            "  38.470", "  27.700", "  40.320", "  1.00", " 55.18", "          ", " N", "  ",
        ]
        .concat()
    }

    fn hetatm_line() -> String {
        [
            "HETATM", " 2039", " ", " O  ", " ", "HOH", " ", "A", " 301", " ", "   ",
            "  12.000", "  -5.250", "   7.125", "  1.00", " 30.00", "          ", " O", "  ",
        ]
        .concat()
    }

    fn ter_line() -> String {
        [
            "TER   ", "  606", "      ", "LEU", " ", "A", "  75", " ", &" ".repeat(53),
        ]
        .concat()
    }

    fn anisou_line() -> String {
        [
            "ANISOU", "    1", " ", " N  ", " ", "MET", " ", "A", "   1", " ", " ",
            "   2406", "   1892", "   1614", "    198", "   -255", "   -365", "      ", " N", "  ",
        ]
        .concat()
    }

    #[test]
    fn decode_atom_fields() {
        let record = Record::decode(&atom_line()).unwrap();
        let Record::Atom(fields) = &record else {
            panic!("expected ATOM, got {record:?}");
        };
        assert_eq!(fields.chain.serial, 1);
        assert_eq!(fields.name, "N");
        assert_eq!(fields.chain.residue_name, "MET");
        assert_eq!(fields.chain.chain_id, 'A');
        assert_eq!(fields.chain.residue_seq, 1);
        assert_eq!(fields.x, 38.470);
        assert_eq!(fields.occupancy, 1.00);
        assert_eq!(fields.temp_factor, 55.18);
        assert_eq!(fields.element, "N");
        assert_eq!(fields.charge, "");
    }

    #[test]
    fn atom_round_trip() {
        for line in [atom_line(), hetatm_line(), ter_line(), anisou_line()] {
            let record = Record::decode(&line).unwrap();
            let encoded = record.encode();
            assert!(
                lines_equivalent(&encoded, &line),
                "round trip mismatch:\n  in:  {line:?}\n  out: {encoded:?}"
            );
        }
    }

    #[test]
    fn unknown_passthrough_round_trip() {
        let line = format!("{:<80}", "HEADER    VIRAL PROTEIN");
        let record = Record::decode(&line).unwrap();
        assert_eq!(record.record_type(), RecordType::Header);
        assert_eq!(record.encode(), line);
        assert!(record.chain_fields().is_none());
    }

    #[test]
    fn end_marker_is_exact() {
        assert_matches!(Record::decode("END"), Ok(Record::End));
        // A padded END line is passthrough, not the end marker.
        let padded = format!("{:<80}", "END");
        assert_matches!(
            Record::decode(&padded),
            Ok(Record::Other {
                kind: RecordType::End,
                ..
            })
        );
    }

    #[test]
    fn model_markers_round_trip() {
        let model = format!("{:<80}", "MODEL        1");
        let record = Record::decode(&model).unwrap();
        assert_matches!(record, Record::Model { serial: 1 });
        assert!(lines_equivalent(&record.encode(), &model));

        let endmdl = format!("{:<80}", "ENDMDL");
        let record = Record::decode(&endmdl).unwrap();
        assert_matches!(record, Record::EndModel);
        assert_eq!(record.encode(), endmdl);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert_matches!(Record::decode("FOOBAR junk"), Err(PdbFetchError::Record(_)));
    }

    #[test]
    fn malformed_numeric_field_is_an_error() {
        let mut line = atom_line();
        line.replace_range(6..11, "  x 1");
        assert_matches!(Record::decode(&line), Err(PdbFetchError::Record(_)));
    }

    #[test]
    fn missing_element_is_an_error() {
        let mut line = atom_line();
        line.replace_range(76..78, "  ");
        assert_matches!(Record::decode(&line), Err(PdbFetchError::Record(_)));
    }

    #[test]
    fn over_long_line_is_an_error() {
        let line = " ".repeat(81);
        assert_matches!(Record::decode(&line), Err(PdbFetchError::Record(_)));
    }

    #[test]
    fn regex_tags_resolve() {
        assert_eq!(RecordType::resolve("MTRIX1"), Some(RecordType::Matrix));
        assert_eq!(RecordType::resolve("SCALE3"), Some(RecordType::Scale));
        assert_eq!(RecordType::resolve("ORIGX2"), Some(RecordType::OrigX));
        assert_eq!(RecordType::resolve("MTRIX4"), None);
    }

    #[test]
    fn space_dash_tolerance() {
        assert!(lines_equivalent("O 1", "O-1"));
        // One-directional: a dash in the re-encoded line never matches.
        assert!(!lines_equivalent("O-1", "O 1"));
        assert!(lines_equivalent("ABC   ", "ABC"));
        assert!(!lines_equivalent("ABCD", "ABC"));
        // A line-final dash survives the original's trim while the blank
        // does not, so the lengths diverge and the lines differ.
        assert!(!lines_equivalent("O1  ", "O1- "));
    }

    #[test]
    fn reader_skips_bad_lines_and_continues() {
        let input = format!("{}\nNOPE!!\n{}\nEND\n", atom_line(), ter_line());
        let mut reader = PdbReader::new(input.as_bytes());

        assert_matches!(reader.read_record(), Ok(Some(Record::Atom(_))));
        assert_matches!(reader.read_record(), Err(PdbFetchError::Record(_)));
        assert_matches!(reader.read_record(), Ok(Some(Record::Ter(_))));
        assert_matches!(reader.read_record(), Ok(Some(Record::End)));
        assert_matches!(reader.read_record(), Ok(None));
    }
}
