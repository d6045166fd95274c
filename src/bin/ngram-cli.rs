//! ngram-cli: inspect, back up and compact an n-gram index directory

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ngramdb::index::{KeyParts, NGramKey, SegmentReader, SYMBOLS_FILE};
use ngramdb::storage::{BFile, IndexQuery, IndexStore};
use ngramdb::types::NameType;
use ngramdb::{IndexSettings, NGramIndex, SymbolTable};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ngram-cli")]
#[command(about = "Maintenance utility for n-gram index files")]
#[command(version)]
struct Cli {
    /// Index settings (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every key with its per-document segments
    Inspect {
        /// Increase verbosity (-v prints the node runs of each segment)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Print store statistics as JSON only
        #[arg(long)]
        stats: bool,

        /// Index directory
        dir: PathBuf,
    },

    /// Copy the raw index file into an archive
    Backup {
        /// Index directory
        dir: PathBuf,

        /// Output file
        output: PathBuf,
    },

    /// Rewrite the index log with one record per live key
    Compact {
        /// Index directory
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => IndexSettings::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => IndexSettings::default(),
    };

    match cli.command {
        Commands::Inspect { verbose, stats, dir } => inspect(&settings, &dir, verbose, stats),
        Commands::Backup { dir, output } => backup(settings, &dir, &output),
        Commands::Compact { dir } => compact(settings, &dir),
    }
}

fn open_file(settings: &IndexSettings, dir: &Path) -> Result<BFile> {
    let path = dir.join(&settings.file_name);
    if !path.exists() {
        anyhow::bail!("no index file at {}", path.display());
    }
    BFile::open(&path, settings.durability, settings.checksum).with_context(|| format!("opening {}", path.display()))
}

fn inspect(settings: &IndexSettings, dir: &Path, verbose: u8, stats_only: bool) -> Result<()> {
    let file = open_file(settings, dir)?;
    let symbols_path = dir.join(SYMBOLS_FILE);
    let symbols =
        SymbolTable::open(&symbols_path).with_context(|| format!("loading {}", symbols_path.display()))?;
    if stats_only {
        println!("{}", serde_json::to_string_pretty(&file.stats())?);
        return Ok(());
    }

    file.query(&IndexQuery::TruncRight(Vec::new()), &mut |key: &[u8], record: &[u8]| {
        match NGramKey::decode(key) {
            Ok(parts) => println!("{}  {}", parts, qname_label(&symbols, &parts)),
            Err(e) => {
                println!("{:02x?} (undecodable: {})", key, e);
                return Ok(true);
            }
        }
        let mut reader = SegmentReader::new(record);
        loop {
            match reader.next_segment() {
                Ok(Some(segment)) => {
                    let h = segment.header;
                    println!(
                        "    doc {:>6}  {:?}  nodes {:>4}  bytes {:>6}",
                        h.doc_id, h.name_type, h.occurrence_count, h.length
                    );
                    if verbose > 0 {
                        match segment.decode() {
                            Ok(entries) => {
                                for entry in entries {
                                    println!("        {} {:?}", entry.node_id, entry.offsets);
                                }
                            }
                            Err(e) => println!("        ❌ {}", e),
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    println!("    ❌ {}", e);
                    break;
                }
            }
        }
        Ok(true)
    })?;

    let stats = file.stats();
    println!(
        "\n{} keys, {} value bytes, {} log records ({} bytes)",
        stats.keys, stats.value_bytes, stats.log_records, stats.log_bytes
    );
    Ok(())
}

/// Symbol names of a key; unknown ids print as `#id`.
fn qname_label(symbols: &SymbolTable, parts: &KeyParts<'_>) -> String {
    let local = symbols
        .name(parts.local_symbol)
        .unwrap_or_else(|| format!("#{}", parts.local_symbol));
    let marker = if parts.name_type == NameType::Attribute { "@" } else { "" };
    match symbols.namespace(parts.ns_symbol) {
        Some(ns) if ns.is_empty() => format!("{}{}", marker, local),
        Some(ns) => format!("{}{{{}}}{}", marker, ns, local),
        None => format!("{}{{#{}}}{}", marker, parts.ns_symbol, local),
    }
}

fn open_index(settings: IndexSettings, dir: &Path) -> Result<NGramIndex> {
    open_file(&settings, dir)?;
    Ok(NGramIndex::open_standalone(dir, settings)?)
}

fn backup(settings: IndexSettings, dir: &Path, output: &Path) -> Result<()> {
    let index = open_index(settings, dir)?;
    let mut sink = BufWriter::new(File::create(output).with_context(|| format!("creating {}", output.display()))?);
    let written = index.backup(&mut sink)?;
    std::io::Write::flush(&mut sink)?;
    println!("✅ {} bytes written to {}", written, output.display());
    Ok(())
}

fn compact(settings: IndexSettings, dir: &Path) -> Result<()> {
    let index = open_index(settings, dir)?;
    let before = index.stats()?;
    index.compact()?;
    let after = index.stats()?;
    println!(
        "✅ compacted: {} -> {} bytes ({} -> {} records, {} keys)",
        before.log_bytes, after.log_bytes, before.log_records, after.log_records, after.keys
    );
    index.close()?;
    Ok(())
}
