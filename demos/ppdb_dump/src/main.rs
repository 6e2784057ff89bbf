use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ppdb_reader::{MethodInfo, PortablePdbFile, SequencePoint};

/// Dumps the document index of a Portable PDB file.
#[derive(Debug, Parser)]
#[command(name = "ppdb-dump")]
struct Cli {
    /// Path to the Portable PDB file.
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Print the document index as JSON.
    #[arg(long)]
    json: bool,

    /// Also print sequence points and scopes of every method.
    #[arg(short, long)]
    verbose: bool,

    /// Resolve an IL offset within a method, given as `TOKEN:OFFSET`, e.g. `0x06000001:0x10`.
    #[arg(long, value_name = "TOKEN:OFFSET")]
    lookup: Option<String>,
}

fn parse_number(s: &str) -> Result<u32> {
    Ok(match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => s.parse()?,
    })
}

/// Finds the last sequence point at or before `il_offset`.
fn find_sequence_point(method: &MethodInfo, il_offset: u32) -> Option<&SequencePoint> {
    let idx = method
        .sequence_points
        .partition_point(|sp| sp.il_offset <= il_offset);
    method.sequence_points.get(idx.checked_sub(1)?)
}

fn lookup(pdb: &PortablePdbFile, query: &str) -> Result<()> {
    let (token, il_offset) = query
        .split_once(':')
        .ok_or_else(|| anyhow!("expected TOKEN:OFFSET, got {query}"))?;
    let token = parse_number(token)?;
    let il_offset = parse_number(il_offset)?;

    let (document, method) = pdb
        .find_method_by_token(token)
        .ok_or_else(|| anyhow!("no debug information for method {token:#010x}"))?;

    match find_sequence_point(method, il_offset) {
        Some(sp) if !sp.is_hidden => println!(
            "{}:{}:{} ({})",
            document.file_path, sp.start_line, sp.start_column, document.language
        ),
        Some(_) => println!("{} (hidden)", document.file_path),
        None => println!("No match :("),
    }

    for scope in method.local_scopes.iter().filter(|s| s.contains(il_offset)) {
        for var in scope.local_variables.iter().filter(|v| !v.debugger_hidden) {
            println!("  local {} (slot {})", var.name, var.slot);
        }
        for constant in &scope.local_constants {
            println!("  const {}", constant.name);
        }
    }

    Ok(())
}

fn print_method(method: &MethodInfo, verbose: bool) {
    match (method.first_line, method.last_line) {
        (Some(first), Some(last)) => {
            println!("  {:#010x} lines {first}-{last}", method.token())
        }
        _ => println!("  {:#010x} (no source)", method.token()),
    }

    if !verbose {
        return;
    }
    for sp in &method.sequence_points {
        if sp.is_hidden {
            println!("    IL_{:04x} hidden", sp.il_offset);
        } else {
            println!(
                "    IL_{:04x} ({}, {}) - ({}, {})",
                sp.il_offset, sp.start_line, sp.start_column, sp.end_line, sp.end_column
            );
        }
    }
    for scope in &method.local_scopes {
        println!(
            "    scope IL_{:04x}..IL_{:04x}",
            scope.start_offset,
            scope.end_offset()
        );
        for var in &scope.local_variables {
            let hidden = if var.debugger_hidden { " [hidden]" } else { "" };
            println!("      local {} (slot {}){hidden}", var.name, var.slot);
        }
        for constant in &scope.local_constants {
            println!("      const {}", constant.name);
        }
    }
}

fn execute(cli: &Cli) -> Result<()> {
    tracing::debug!(path = %cli.path.display(), "opening portable pdb");
    let pdb = PortablePdbFile::open(&cli.path)?;
    tracing::debug!(documents = pdb.document_indices().len(), "parsed portable pdb");

    if let Some(query) = &cli.lookup {
        return lookup(&pdb, query);
    }

    if cli.json {
        let stdout = std::io::stdout();
        serde_json::to_writer_pretty(stdout.lock(), pdb.document_indices())?;
        println!();
        return Ok(());
    }

    println!("PDB id: {}", pdb.pdb_id());
    if let Some(entry_point) = pdb.entry_point() {
        println!("Entry point: {entry_point:#010x}");
    }

    for document in pdb.document_indices() {
        println!(
            "{} [{}] ({} methods)",
            document.file_path,
            document.language,
            document.methods.len()
        );
        for method in &document.methods {
            print_method(method, cli.verbose);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    execute(&cli)
}
