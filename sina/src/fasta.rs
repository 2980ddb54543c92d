//! Minimal FASTA reader/writer. File-format I/O is explicitly a collaborator
//! of the alignment core, not part of it, so this stays small and direct.

use std::io::{BufRead, Write};

pub struct FastaRecord {
    pub name: String,
    pub sequence: Vec<u8>,
}

pub fn read_fasta(reader: impl BufRead) -> std::io::Result<Vec<FastaRecord>> {
    let mut records = Vec::new();
    let mut current_name: Option<String> = None;
    let mut current_seq = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if let Some(rest) = line.strip_prefix('>') {
            if let Some(name) = current_name.take() {
                records.push(FastaRecord {
                    name,
                    sequence: std::mem::take(&mut current_seq),
                });
            }
            current_name = Some(rest.split_whitespace().next().unwrap_or("").to_string());
        } else {
            current_seq.extend(line.trim_end().bytes());
        }
    }
    if let Some(name) = current_name {
        records.push(FastaRecord {
            name,
            sequence: current_seq,
        });
    }
    Ok(records)
}

pub fn write_fasta_record(mut writer: impl Write, name: &str, sequence: &[u8]) -> std::io::Result<()> {
    writeln!(writer, ">{name}")?;
    for chunk in sequence.chunks(80) {
        writer.write_all(chunk)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}
