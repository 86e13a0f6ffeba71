use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nfl_core::{
    BatchOp, Conn, Family, MemoryKernel, RulesetDocument, RulesetStatus, Table, Transport,
};
use nfl_nft::{NftCli, diff_document};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nflctl")]
#[command(version, about = "Typed nftables rule management", long_about = None)]
struct Cli {
    /// Path to the nft binary
    #[arg(long, global = true, default_value = "nft")]
    nft: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the kernel expressions each rule compiles to
    Compile {
        #[arg(short, long, default_value = "ruleset.yaml")]
        file: PathBuf,
    },
    /// Print the nft JSON batch for a ruleset
    Render {
        #[arg(short, long, default_value = "ruleset.yaml")]
        file: PathBuf,
    },
    /// Apply a ruleset as one transaction
    Apply {
        #[arg(short, long, default_value = "ruleset.yaml")]
        file: PathBuf,
        #[arg(long)]
        commit: bool,
        /// Validate against an in-memory kernel and print the batch
        #[arg(long, conflicts_with = "commit")]
        dry_run: bool,
    },
    /// List the rules of a chain
    List {
        #[arg(long, default_value = "inet")]
        family: Family,
        #[arg(long)]
        table: String,
        #[arg(long)]
        chain: String,
    },
    /// Show differences between a ruleset and the kernel
    Diff {
        #[arg(short, long, default_value = "ruleset.yaml")]
        file: PathBuf,
    },
    /// Show tables, chains and rule counts
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let nft = NftCli::with_binary(&cli.nft);

    match cli.command {
        Commands::Compile { file } => compile(&file)?,
        Commands::Render { file } => render(&file, &nft)?,
        Commands::Apply {
            file,
            commit,
            dry_run,
        } => {
            tokio::runtime::Runtime::new()?
                .block_on(async { apply(&file, nft, commit, dry_run).await })?;
        }
        Commands::List {
            family,
            table,
            chain,
        } => {
            tokio::runtime::Runtime::new()?
                .block_on(async { list(nft, family, &table, &chain).await })?;
        }
        Commands::Diff { file } => {
            tokio::runtime::Runtime::new()?.block_on(async { diff(&file, nft).await })?;
        }
        Commands::Status => {
            tokio::runtime::Runtime::new()?.block_on(async { status(nft).await })?;
        }
    }

    Ok(())
}

/// Load a document and queue it on a fresh connection
fn stage<T: Transport>(file: &Path, transport: T) -> Result<Conn<T>> {
    let doc = RulesetDocument::from_file(file)?;
    let mut conn = Conn::new(transport);
    let staged = doc
        .stage(&mut conn)
        .with_context(|| format!("Failed to stage ruleset from {:?}", file))?;
    info!(chains = staged.chains.len(), rules = staged.rules, "staged ruleset");
    Ok(conn)
}

fn compile(file: &Path) -> Result<()> {
    let conn = stage(file, MemoryKernel::new())?;

    for op in conn.queued() {
        println!("{}", op);
        if let BatchOp::AddRule(rule) = op {
            for expr in &rule.exprs {
                println!("  {}", expr);
            }
        }
    }

    Ok(())
}

fn render(file: &Path, nft: &NftCli) -> Result<()> {
    let conn = stage(file, MemoryKernel::new())?;
    println!("{}", nft.render(conn.queued())?);
    Ok(())
}

async fn apply(file: &Path, nft: NftCli, commit: bool, dry_run: bool) -> Result<()> {
    println!("🚀 Loading ruleset from {:?}", file);

    if !commit {
        let mut conn = stage(file, MemoryKernel::new())?;
        let ops = conn.queued().len();
        if dry_run {
            println!("{}", nft.render(conn.queued())?);
        }
        conn.commit()
            .await
            .context("Ruleset was rejected by the in-memory kernel")?;
        println!("✅ {} operations validated", ops);
        println!("\n⚠️  Dry run mode. Use --commit to apply changes.");
        return Ok(());
    }

    let mut conn = stage(file, nft)?;
    let ops = conn.queued().len();
    println!("⚡ Applying {} operations...", ops);
    if let Err(e) = conn.commit().await {
        warn!(error = %e, "nft rejected the batch");
        return Err(e).context("Failed to apply ruleset");
    }
    println!("✅ Ruleset applied successfully!");
    Ok(())
}

async fn list(nft: NftCli, family: Family, table: &str, chain: &str) -> Result<()> {
    let mut conn = Conn::new(nft);
    let table_id = conn.use_table(Table::new(family, table));
    let chains = conn
        .list_chains(table_id)
        .await
        .with_context(|| format!("Failed to list table {} {}", family, table))?;

    let chain_id = chains
        .into_iter()
        .find(|id| conn.registry().chain(*id).is_some_and(|c| c.name == chain))
        .with_context(|| format!("Chain {} not found in {} {}", chain, family, table))?;

    let rules = conn.list_rule(chain_id).await?;
    println!("📜 {} {} {} ({} rules)", family, table, chain, rules.len());
    for rule in &rules {
        println!("  {}", rule);
    }
    Ok(())
}

async fn diff(file: &Path, nft: NftCli) -> Result<()> {
    let doc = RulesetDocument::from_file(file)?;
    let mut conn = Conn::new(nft);
    let diffs = diff_document(&mut conn, &doc).await?;

    for d in &diffs {
        if d.matches {
            println!("✅ {} {} {}: up to date", d.family, d.table, d.chain);
            continue;
        }
        if d.current_exists {
            println!("✏️  {} {} {}: differs", d.family, d.table, d.chain);
        } else {
            println!("➕ {} {} {}: missing", d.family, d.table, d.chain);
        }
        if let Some(text) = &d.diff {
            print!("{}", text);
        }
    }

    Ok(())
}

async fn status(nft: NftCli) -> Result<()> {
    let mut conn = Conn::new(nft);
    let status = RulesetStatus::collect(&mut conn)
        .await
        .context("Failed to collect nftables status")?;
    status.display();
    Ok(())
}
