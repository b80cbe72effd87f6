//! FASTA reading and writing for reference protein extracts.
use crate::error::{PipelineError, Result};
use bio::io::fasta;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Sequences keyed by the first whitespace-delimited token of the header.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FastaIndex {
    records: BTreeMap<String, String>,
}

impl FastaIndex {
    pub fn read<R: Read>(reader: R) -> std::result::Result<Self, String> {
        let mut records = BTreeMap::new();
        for (idx, record) in fasta::Reader::new(reader).records().enumerate() {
            let record = record.map_err(|err| format!("record {}: {err}", idx + 1))?;
            record
                .check()
                .map_err(|detail| format!("record {}: {detail}", idx + 1))?;
            let sequence = String::from_utf8_lossy(record.seq()).into_owned();
            records.insert(record.id().to_string(), sequence);
        }
        Ok(Self { records })
    }

    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        Self::read(text.as_bytes())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|err| PipelineError::io(format!("read {}", path.display()), err))?;
        Self::read(file).map_err(|detail| {
            PipelineError::Precondition(format!("malformed FASTA {}: {detail}", path.display()))
        })
    }

    /// Look up a gene id exactly, then by the accession after a `DB:` prefix.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.records
            .get(id)
            .or_else(|| {
                id.split_once(':')
                    .and_then(|(_, accession)| self.records.get(accession))
            })
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert(&mut self, id: impl Into<String>, sequence: impl Into<String>) {
        self.records.insert(id.into(), sequence.into());
    }

    /// Records in id order, one sequence line each.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut writer = fasta::Writer::new(&mut out);
            for (id, sequence) in &self.records {
                writer.write(id, None, sequence.as_bytes())?;
            }
            writer.flush()?;
        }
        Ok(out)
    }
}

/// Write a single-record FASTA file.
pub fn write_record(path: &Path, id: &str, sequence: &str) -> Result<()> {
    let file = File::create(path)
        .map_err(|err| PipelineError::io(format!("create {}", path.display()), err))?;
    let mut writer = fasta::Writer::new(file);
    writer
        .write(id, None, sequence.as_bytes())
        .and_then(|()| writer.flush())
        .map_err(|err| PipelineError::io(format!("write {}", path.display()), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiline_records() {
        let index = FastaIndex::parse(">P1 kinase\nMKT\nAAV\n\n>P2\nMS\n").expect("parse");
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("P1"), Some("MKTAAV"));
        assert_eq!(index.get("P2"), Some("MS"));
    }

    #[test]
    fn prefixed_ids_fall_back_to_accession() {
        let index = FastaIndex::parse(">Q9XYZ1\nMKV\n").expect("parse");
        assert_eq!(index.get("UNIPROT:Q9XYZ1"), Some("MKV"));
        assert_eq!(index.get("UNIPROT:MISSING"), None);
    }

    #[test]
    fn rejects_sequence_without_header() {
        let err = FastaIndex::parse("MKV\n>P1\nMK\n").expect_err("orphan sequence");
        assert!(err.starts_with("record 1"), "{err}");
    }

    #[test]
    fn bytes_are_sorted_and_reparse() {
        let mut index = FastaIndex::default();
        index.insert("b", "M".repeat(61));
        index.insert("a", "MK");
        let bytes = index.to_bytes().expect("render");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.starts_with(">a\nMK\n>b\n"), "{text}");
        assert_eq!(FastaIndex::parse(&text).expect("reparse"), index);
    }

    #[test]
    fn single_record_file_round_trips_through_reader() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("q0.fasta");
        write_record(&path, "q0", "MKTAYIAK").expect("write");
        let index = FastaIndex::load(&path).expect("load");
        assert_eq!(index.get("q0"), Some("MKTAYIAK"));
    }
}
