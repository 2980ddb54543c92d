use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use log::{debug, info};

use lib_sina::config::SearchConfig;
use lib_sina::cseq::CSeq;
use lib_sina::kmer::index::KmerIndex;
use lib_sina::search::search;
use lib_sina::store::ReferenceStore;

use crate::fasta::read_fasta;

#[derive(Args)]
pub struct Cli {
    /// Query sequences to classify against the reference database.
    #[clap(long, short = 'q')]
    query: PathBuf,

    /// Directory holding the binary reference store and k-mer index built
    /// by the `align` subcommand.
    #[clap(long, short = 'd')]
    database: PathBuf,

    /// Where to write the tab-separated search report.
    #[clap(long, short = 'o')]
    output: Option<PathBuf>,

    /// Optional TOML configuration overriding the search defaults.
    #[clap(long, short = 'c')]
    config: Option<PathBuf>,

    #[clap(long, default_value = "info")]
    log_level: log::LevelFilter,
}

pub fn cli(cli: Cli) -> Result<()> {
    simplelog::TermLogger::init(
        cli.log_level,
        Default::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .ok();

    let search_cfg = match &cli.config {
        Some(path) => lib_sina::config::io::ConfigFile::load(path)
            .with_context(|| format!("loading configuration from {path:?}"))?
            .search,
        None => SearchConfig::default(),
    };

    let store_path = cli.database.join("references.bin");
    let store = ReferenceStore::open(store_path)
        .with_context(|| format!("opening reference store under {:?}", cli.database))?;
    if store.is_empty() {
        anyhow::bail!(
            "reference store under {:?} is empty; run `align` against it first",
            cli.database
        );
    }

    let index_path = cli.database.join("references.sidx");
    let index = match File::open(&index_path) {
        Ok(file) => Some(KmerIndex::read(BufReader::new(file)).with_context(|| format!("reading {index_path:?}"))?),
        Err(_) => {
            debug!("no k-mer index found under {:?}, scanning the store exhaustively", cli.database);
            None
        }
    };

    let query_file = File::open(&cli.query).with_context(|| format!("opening {:?}", cli.query))?;
    let records = read_fasta(BufReader::new(query_file))?;

    let mut writer: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stdout()),
    };
    writeln!(writer, "query\taccession\tscore\tnearest_relatives\tclassification")?;

    for record in &records {
        let mut cseq = CSeq::new(record.name.clone());
        if let Err(err) = cseq.append_str(&record.sequence) {
            log::warn!("{}: {err}", record.name);
            continue;
        }
        let result = search(&cseq, &store, index.as_ref(), &search_cfg);
        let best = result
            .hits
            .first()
            .map(|hit| format!("{}.{}", hit.accession, hit.version))
            .unwrap_or_else(|| "-".to_string());
        let best_score = result.hits.first().map(|hit| hit.score).unwrap_or(0.0);
        let classification = result
            .classification
            .iter()
            .map(|(field, value)| format!("{field}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(
            writer,
            "{}\t{best}\t{best_score:.4}\t{}\t{classification}",
            record.name, result.nearest_relatives
        )?;
    }
    info!("searched {} queries", records.len());

    Ok(())
}
