use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use log::{debug, info, warn};

use lib_sina::backtrack::backtrack;
use lib_sina::base::{Base, IupacRule};
use lib_sina::config::{AlignmentConfig, FamilySelectorConfig};
use lib_sina::cseq::CSeq;
use lib_sina::family::select_family;
use lib_sina::graph::ReferenceGraph;
use lib_sina::kmer::index::KmerIndex;
use lib_sina::mesh::Mesh;
use lib_sina::pipeline::{drain, feed, run_stage, Sequencer};
use lib_sina::scoring::SimpleScheme;
use lib_sina::store::ReferenceStore;
use lib_sina::tray::{Rejection, Tray};

use crate::fasta::{read_fasta, write_fasta_record};

const MIN_QUERY_LENGTH: usize = 20;

#[derive(Args)]
pub struct Cli {
    /// FASTA file of pre-aligned reference sequences.
    #[clap(long, short = 'r')]
    reference: PathBuf,

    /// FASTA file of query sequences to align.
    #[clap(long, short = 'q')]
    query: PathBuf,

    /// Where to write the aligned queries, in FASTA form.
    #[clap(long, short = 'o')]
    output: PathBuf,

    /// Directory holding (or to hold) the binary reference store and k-mer index.
    #[clap(long, short = 'd')]
    database: PathBuf,

    /// Optional TOML configuration overriding the alignment/family defaults.
    #[clap(long, short = 'c')]
    config: Option<PathBuf>,

    /// Number of alignment worker threads.
    #[clap(long, default_value_t = 4)]
    workers: usize,

    /// Preserve input order in the output, at the cost of buffering
    /// out-of-order completions.
    #[clap(long)]
    ordered: bool,

    #[clap(long, default_value = "info")]
    log_level: log::LevelFilter,
}

/// Shared, read-only context every alignment worker needs.
struct AlignContext {
    store: ReferenceStore,
    index: KmerIndex,
    scheme: SimpleScheme,
    alignment: AlignmentConfig,
    family: FamilySelectorConfig,
}

pub fn cli(cli: Cli) -> Result<()> {
    simplelog::TermLogger::init(
        cli.log_level,
        Default::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .ok();

    let config_file = match &cli.config {
        Some(path) => lib_sina::config::io::ConfigFile::load(path)
            .with_context(|| format!("loading configuration from {path:?}"))?,
        None => lib_sina::config::io::ConfigFile::default(),
    };
    let alignment_cfg = config_file.alignment;
    let family_cfg = config_file.family_selector;

    std::fs::create_dir_all(&cli.database)?;
    let store_path = cli.database.join("references.bin");
    let store = ReferenceStore::open(store_path)?;

    if store.is_empty() {
        info!("Loading reference file {:?}", cli.reference);
        let file = File::open(&cli.reference).with_context(|| format!("opening {:?}", cli.reference))?;
        let records = read_fasta(BufReader::new(file))?;
        for record in &records {
            let mut cseq = CSeq::new(record.name.clone());
            cseq.append_str(&record.sequence)?;
            store.put(cseq);
        }
        store.save()?;
    }

    let index_path = cli.database.join("references.sidx");
    let reference_mtime = std::fs::metadata(&cli.reference)?.modified()?;
    let names = store.names();
    let entries: Vec<(String, Vec<Base>)> = names
        .iter()
        .filter_map(|name| {
            let cseq = store.get(name)?;
            Some((name.clone(), cseq.entries().iter().map(|e| e.base).collect()))
        })
        .collect();

    let index = match KmerIndex::load_if_fresh(&index_path, family_cfg.k, reference_mtime) {
        Ok(Some(index)) => index,
        _ => {
            debug!("building k-mer index ({} references)", entries.len());
            let index = KmerIndex::build(&entries, family_cfg.k, None);
            index.save_to_file(&index_path)?;
            index
        }
    };

    let scheme = SimpleScheme {
        match_score: alignment_cfg.match_score,
        mismatch_score: -alignment_cfg.mismatch_score,
        gap_open: alignment_cfg.gap_open,
        gap_extend: alignment_cfg.gap_extend,
        rule: IupacRule::Optimistic,
    };
    let context = Arc::new(AlignContext {
        store,
        index,
        scheme,
        alignment: alignment_cfg,
        family: family_cfg,
    });

    let query_file = File::open(&cli.query).with_context(|| format!("opening {:?}", cli.query))?;
    let query_records = read_fasta(BufReader::new(query_file))?;

    let trays: Vec<Tray> = query_records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let mut cseq = CSeq::new(record.name.clone());
            if let Err(err) = cseq.append_str(&record.sequence) {
                warn!("{}: {err}", record.name);
            }
            Tray::new(index as u64 + 1, cseq)
        })
        .collect();
    let total = trays.len();

    let input = feed(trays, 2 * cli.workers.max(1));
    let worker_context = context.clone();
    let output = run_stage(
        move |tray: Tray| align_one(tray, &worker_context),
        input,
        cli.workers,
    );

    let output_file = File::create(&cli.output)?;
    let mut writer = BufWriter::new(output_file);

    let aligned_trays: Vec<Tray> = if cli.ordered {
        Sequencer::new(output, 1).collect()
    } else {
        drain(output)
    };

    let mut written = 0usize;
    for tray in aligned_trays {
        if let Some(aligned) = &tray.aligned {
            write_fasta_record(&mut writer, aligned.name(), &render_gapped(aligned))?;
            written += 1;
        }
        for line in tray.log() {
            debug!("{}: {line}", tray.input.name());
        }
    }
    info!("{written}/{total} queries aligned");

    Ok(())
}

fn align_one(mut tray: Tray, context: &AlignContext) -> Tray {
    if tray.is_rejected() {
        return tray;
    }

    let query_bases: Vec<Base> = tray.input.entries().iter().map(|e| e.base).collect();
    if query_bases.len() < MIN_QUERY_LENGTH {
        tray.reject(Rejection::TooShort {
            length: query_bases.len(),
            minimum: MIN_QUERY_LENGTH,
        });
        return tray;
    }

    let family = select_family(
        tray.input.name(),
        &query_bases,
        &context.index,
        &context.store,
        &context.family,
    );
    for line in &family.log {
        tray.push_log(line.clone());
    }
    if family.members.len() < context.family.min {
        tray.reject(Rejection::FamilyTooSmall {
            found: family.members.len(),
            required: context.family.min,
        });
        return tray;
    }

    let width = context.store.width();
    let references: Vec<CSeq> = family.members.iter().map(|m| m.cseq.clone()).collect();
    let graph = ReferenceGraph::build(&references, width, context.alignment.family_weight);

    let mesh = Mesh::align(
        &graph,
        query_bases,
        &context.scheme,
        context.alignment.insertion_policy,
        width.max(1),
    );
    let (aligned, stats) = backtrack(
        &mesh,
        &graph,
        tray.input.name(),
        context.alignment.overhang,
        context.alignment.lowercase,
        context.alignment.insertion_policy,
    );
    tray.push_log(format!("quality={:.4}", stats.quality));
    tray.alignment_stats = Some(stats);
    tray.aligned = Some(aligned);
    tray.family = Some(family);
    tray
}

fn render_gapped(cseq: &CSeq) -> Vec<u8> {
    let mut out = vec![b'-'; cseq.width() as usize];
    for entry in cseq.entries() {
        out[entry.column as usize] = entry.base.to_byte();
    }
    out
}
