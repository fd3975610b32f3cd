//! Quire command-line driver.
//!
//! Runs the block store, outline and zoom machinery against a markdown file
//! with in-memory surfaces. Nothing is written back to disk.
//!
//! Usage:
//!   quire outline paper.md
//!   quire zoom paper.md Background --shallow
//!   quire map paper.md --line 3 --col 7
//!   RUST_LOG=quire_sync=debug quire demo paper.md

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use quire_blocks::{BlockStore, Section, ZoomMode, build_outline, extract};
use quire_sync::{
    DocumentSession, LineCol, MemoryRepository, MemorySurface, PositionMap, SessionEvent,
    SurfaceKind, SyncConfig,
};
use quire_types::DocumentId;

#[derive(Parser, Debug)]
#[command(name = "quire")]
#[command(about = "Block store, outline and zoom tools for markdown documents")]
struct Args {
    /// TOML file with session tunables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the section tree
    Outline {
        file: PathBuf,
        /// Emit sections as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the zoom buffer for a section
    Zoom {
        file: PathBuf,
        /// Section title
        title: String,
        /// Which section with this title (1-based)
        #[arg(long, default_value_t = 1)]
        occurrence: usize,
        /// Stop at the first subsection
        #[arg(long)]
        shallow: bool,
    },
    /// Map a flat line/column (1-based) to a tree position and back
    Map {
        file: PathBuf,
        #[arg(long)]
        line: usize,
        #[arg(long)]
        col: usize,
    },
    /// Zoom into each top-level section, switch surfaces and zoom back out
    Demo { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    config.validate()?;

    match args.command {
        Command::Outline { file, json } => outline(&file, &config, json),
        Command::Zoom {
            file,
            title,
            occurrence,
            shallow,
        } => {
            let mode = if shallow { ZoomMode::Shallow } else { ZoomMode::Full };
            zoom(&file, &config, &title, occurrence, mode)
        }
        Command::Map { file, line, col } => map(&file, line, col),
        Command::Demo { file } => demo(&file, config).await,
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_store(path: &Path, config: &SyncConfig) -> Result<BlockStore> {
    let markdown = read(path)?;
    let doc = DocumentId::from_name(&path.display().to_string());
    Ok(BlockStore::from_markdown(doc, &markdown, &config.parse_options()))
}

fn outline(path: &Path, config: &SyncConfig, json: bool) -> Result<()> {
    let store = load_store(path, config)?;
    let sections = build_outline(&store.blocks_ordered(), &config.pseudo_matcher()?);
    if json {
        println!("{}", serde_json::to_string_pretty(&sections)?);
        return Ok(());
    }
    for section in &sections {
        println!("{}", outline_line(section));
    }
    Ok(())
}

fn outline_line(section: &Section) -> String {
    let indent = "  ".repeat(usize::from(section.level.saturating_sub(1)));
    let mut flags = String::new();
    if section.is_pseudo() {
        flags.push_str(" [continued]");
    }
    if let Some(region) = section.managed {
        flags.push_str(&format!(" [{}]", region.as_str()));
    }
    format!("{indent}{} ({} words){flags}", section.title, section.word_count)
}

fn zoom(path: &Path, config: &SyncConfig, title: &str, occurrence: usize, mode: ZoomMode) -> Result<()> {
    let store = load_store(path, config)?;
    let matcher = config.pseudo_matcher()?;
    let sections = build_outline(&store.blocks_ordered(), &matcher);
    let Some(section) = sections
        .iter()
        .filter(|s| s.title == title)
        .nth(occurrence.saturating_sub(1))
    else {
        bail!("no section titled {title:?} (occurrence {occurrence})");
    };
    let Some(extraction) = extract(&store, section.id, mode, &matcher) else {
        bail!("section {title:?} cannot be zoomed");
    };
    tracing::info!(
        section = %section.id,
        %mode,
        blocks = extraction.scope.captured.len(),
        "extracted"
    );
    print!("{}", extraction.buffer);
    Ok(())
}

fn map(path: &Path, line: usize, col: usize) -> Result<()> {
    if line == 0 || col == 0 {
        bail!("line and column are 1-based");
    }
    let markdown = read(path)?;
    let map = PositionMap::new(&markdown);
    let pos = LineCol::new(line - 1, col - 1);
    let tree = map.line_col_to_tree(pos);
    let snapped = map.snap_line_col(pos);
    println!("flat {pos} -> tree {tree} -> flat {snapped}");
    println!("tree positions: {}", map.tree_len());
    Ok(())
}

async fn demo(path: &Path, config: SyncConfig) -> Result<()> {
    let markdown = read(path)?;
    let doc = DocumentId::from_name(&path.display().to_string());
    let repo = Arc::new(MemoryRepository::with_markdown(doc, &markdown, &config.parse_options()));
    let tree = Arc::new(MemorySurface::new(SurfaceKind::Tree));
    let flat = Arc::new(MemorySurface::new(SurfaceKind::Flat));

    let session = DocumentSession::open(doc, repo, tree.clone(), flat.clone(), config).await?;
    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::SectionsUpdated { sections, version } => {
                    eprintln!("event: outline v{version}, {} sections", sections.len());
                }
                other => eprintln!("event: {other:?}"),
            }
        }
    });

    let top: Vec<Section> = session
        .sections()
        .into_iter()
        .filter(|s| s.parent.is_none() && s.managed.is_none())
        .collect();
    for section in &top {
        let outcome = session.zoom_in(section.id, ZoomMode::Full).await?;
        println!("── zoom {:?}: {outcome:?}", section.title);
        print!("{}", tree.content());

        session.request_mode_toggle().await?;
        println!("── flat view shows {} bytes", flat.content().len());
        session.request_mode_toggle().await?;

        session.zoom_out().await?;
    }

    let unchanged = session.markdown() == markdown;
    println!("── round trip {}", if unchanged { "unchanged" } else { "normalised" });
    printer.abort();
    Ok(())
}
