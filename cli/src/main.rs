//! bloombits CLI — inspect defaults and run the indexer and matcher end to end.
//!
//! Usage:
//! ```bash
//! bloombits info
//! bloombits demo --blocks 4096 --config bloombits.json --json-logs
//! bloombits demo --db ./bloombits.db        # with --features sqlite
//! ```

mod logging;

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::info;

use bloombits_core::bloom::keccak256;
use bloombits_core::store::KeyValueStore;
use bloombits_core::{Bloom, IndexerConfig, IndexerState, MemoryChain};
use bloombits_indexer::IndexerBuilder;
use bloombits_matcher::{Direction, FilterQuery, FilterService, LocalBackend, SchedulerConfig, ServiceConfig};
use bloombits_storage::MemoryStore;

use logging::{init_tracing, LogConfig};

/// Number of synthetic contracts emitting logs in the demo chain.
const DEMO_CONTRACTS: u64 = 16;
const TRANSFER_SIGNATURE: &[u8] = b"Transfer(address,address,uint256)";

/// Top-level configuration file (JSON). Every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CliConfig {
    #[serde(default = "demo_indexer")]
    indexer: IndexerConfig,
    #[serde(default)]
    scheduler: SchedulerConfig,
    #[serde(default)]
    log: LogConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            indexer: demo_indexer(),
            scheduler: SchedulerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Small sections and no throttling so the demo finishes quickly.
fn demo_indexer() -> IndexerConfig {
    IndexerConfig {
        section_size: 256,
        confirmation_depth: 16,
        throttling_ms: 0,
        ..IndexerConfig::default()
    }
}

struct DemoArgs {
    blocks: u64,
    config: Option<PathBuf>,
    json_logs: bool,
    db: Option<String>,
}

fn parse_demo_args(args: &[String]) -> anyhow::Result<DemoArgs> {
    let mut out = DemoArgs {
        blocks: 4096,
        config: None,
        json_logs: false,
        db: None,
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--blocks" => {
                let value = iter.next().context("--blocks needs a value")?;
                out.blocks = value.parse().with_context(|| format!("invalid block count {value:?}"))?;
            }
            "--config" => out.config = Some(iter.next().context("--config needs a path")?.into()),
            "--db" => out.db = Some(iter.next().context("--db needs a path")?.clone()),
            "--json-logs" => out.json_logs = true,
            other => bail!("unknown flag {other}"),
        }
    }
    Ok(out)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => cmd_info(),
        "demo" => cmd_demo(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("bloombits {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("bloombits {}", env!("CARGO_PKG_VERSION"));
    println!("Sectioned bloom-bit index with a batched log filter matcher\n");
    println!("USAGE:");
    println!("    bloombits <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info     Print the default configuration as JSON");
    println!("    demo     Index a synthetic chain and run filter queries against it");
    println!("             [--blocks N] [--config FILE] [--json-logs] [--db PATH]");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() -> anyhow::Result<()> {
    #[derive(Serialize)]
    struct Info {
        version: &'static str,
        indexer: IndexerConfig,
        service: ServiceConfig,
        log: LogConfig,
        storage: Vec<&'static str>,
    }
    let mut storage = vec!["memory"];
    if cfg!(feature = "sqlite") {
        storage.push("sqlite");
    }
    let info = Info {
        version: env!("CARGO_PKG_VERSION"),
        indexer: IndexerConfig::default(),
        service: ServiceConfig::default(),
        log: LogConfig::default(),
        storage,
    };
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn open_store(db: Option<&str>) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    match db {
        None => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        Some(path) => Ok(Arc::new(bloombits_storage::SqliteStore::open(path).await?)),
        #[cfg(not(feature = "sqlite"))]
        Some(_) => bail!("--db requires the `sqlite` feature"),
    }
}

fn contract_address(index: u64) -> [u8; 20] {
    let hash = keccak256(&index.to_be_bytes());
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Every block carries logs from one contract; every fifth block also a Transfer.
fn demo_bloom(number: u64, transfer: &[u8; 32]) -> Bloom {
    let mut bloom = Bloom::default();
    bloom.accrue(&contract_address(number % DEMO_CONTRACTS));
    if number % 5 == 0 {
        bloom.accrue(transfer);
    }
    bloom
}

async fn cmd_demo(args: &[String]) -> anyhow::Result<()> {
    let args = parse_demo_args(args)?;
    let mut config = load_config(args.config.as_ref())?;
    config.log.json |= args.json_logs;
    init_tracing(&config.log)?;

    let transfer = keccak256(TRANSFER_SIGNATURE);
    let chain = Arc::new(MemoryChain::from_blooms(
        (0..args.blocks).map(|n| demo_bloom(n, &transfer)),
    ));
    let store = open_store(args.db.as_deref()).await?;
    let section_size = config.indexer.section_size;
    let namespace = config.indexer.namespace.clone();

    let started = Instant::now();
    let indexer = IndexerBuilder::new()
        .config(config.indexer.clone())
        .build_bloom(store.clone(), chain.clone())?
        .start();
    let status = tokio::time::timeout(
        Duration::from_secs(300),
        indexer.wait_for(|s| s.state == IndexerState::Synced),
    )
    .await
    .context("indexer did not sync in time")?;
    info!(
        sections = status.stored_sections,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "indexing complete"
    );

    let Some(last_block) = status.last_indexed_block(section_size) else {
        indexer.close().await;
        bail!("no section is confirmed yet; use more than {section_size} blocks");
    };

    let backend = LocalBackend::new(store, namespace.into_bytes(), section_size).with_chain(chain.clone());
    let service = FilterService::new(
        Arc::new(backend),
        ServiceConfig {
            section_size,
            scheduler: config.scheduler.clone(),
        },
    )?;

    let target = contract_address(3);
    let query = FilterQuery::from_values([vec![target.to_vec()], vec![transfer.to_vec()]]);
    let started = Instant::now();
    let mut session = service.new_session(&query, 0, last_block, Direction::Ascending)?;
    let mut matches = Vec::new();
    while let Some(block) = session.next().await? {
        matches.push(block);
    }
    drop(session);
    let query_ms = started.elapsed().as_millis() as u64;

    let mut expected = Vec::new();
    for number in 0..=last_block {
        let header = chain.header(number).context("indexed block missing from chain")?;
        if query.matches_bloom(&header.bloom) {
            expected.push(number);
        }
    }
    if matches != expected {
        service.close().await;
        indexer.close().await;
        bail!(
            "index disagrees with block blooms: {} matches, {} expected",
            matches.len(),
            expected.len()
        );
    }
    // Matches the bloom admits although the block never logged both values.
    let false_positives = matches
        .iter()
        .filter(|&&block| !(block % DEMO_CONTRACTS == 3 && block % 5 == 0))
        .count();

    #[derive(Serialize)]
    struct Summary {
        blocks: u64,
        stored_sections: u64,
        last_indexed_block: u64,
        matches: usize,
        bloom_false_positives: usize,
        first_matches: Vec<u64>,
        query_ms: u64,
        scheduler: bloombits_matcher::SchedulerMetrics,
    }
    let summary = Summary {
        blocks: args.blocks,
        stored_sections: status.stored_sections,
        last_indexed_block: last_block,
        matches: matches.len(),
        bloom_false_positives: false_positives,
        first_matches: matches.iter().copied().take(10).collect(),
        query_ms,
        scheduler: service.metrics(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    service.close().await;
    indexer.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_demo_flags() {
        let args = parse_demo_args(&strings(&["--blocks", "512", "--json-logs", "--config", "c.json"])).unwrap();
        assert_eq!(args.blocks, 512);
        assert!(args.json_logs);
        assert_eq!(args.config, Some(PathBuf::from("c.json")));
        assert!(args.db.is_none());
    }

    #[test]
    fn rejects_bad_flags() {
        assert!(parse_demo_args(&strings(&["--blocks", "many"])).is_err());
        assert!(parse_demo_args(&strings(&["--blocks"])).is_err());
        assert!(parse_demo_args(&strings(&["--verbose"])).is_err());
    }

    #[test]
    fn partial_config_keeps_demo_defaults() {
        let config: CliConfig = serde_json::from_str(r#"{"log": {"level": "debug"}}"#).unwrap();
        assert_eq!(config.indexer.section_size, 256);
        assert_eq!(config.indexer.throttling_ms, 0);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.scheduler.workers, SchedulerConfig::default().workers);
    }

    #[test]
    fn demo_blooms_carry_their_contract() {
        let transfer = keccak256(TRANSFER_SIGNATURE);
        let bloom = demo_bloom(35, &transfer);
        assert!(bloom.contains(&contract_address(3)));
        assert!(bloom.contains(&transfer));
        assert!(demo_bloom(36, &transfer).contains(&contract_address(4)));
    }
}
