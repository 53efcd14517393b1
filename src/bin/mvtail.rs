//! CLI entry point: parse arguments, configure logging, drive the
//! load → change → apply → trim → write pipeline, and report a summary.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use mvtail::commit::CommitOptions;
use mvtail::driver::{self, RunOptions};
use mvtail::elf::view::ElfView;
use mvtail::error::MvError;
use mvtail::graph;

/// Statically commit multiverse configuration variables into a compiled
/// ELF binary and trim the now-dead variant metadata.
#[derive(Parser, Debug)]
#[command(name = "mvtail", version, about)]
struct Cli {
    /// Add a change `name=value` (repeatable).
    #[arg(short = 's', value_name = "name=value")]
    set: Vec<String>,

    /// Add an apply target `name` (repeatable).
    #[arg(short = 'a', value_name = "name")]
    apply: Vec<String>,

    /// Apply (freeze) every variable.
    #[arg(short = 'A')]
    apply_all: bool,

    /// Guard: poison unselected variant bodies with 0xCC.
    #[arg(short = 'g')]
    guard: bool,

    /// Dump the multiverse graph.
    #[arg(short = 'd')]
    dump_graph: bool,

    /// Dump the symbol table.
    #[arg(short = 'y')]
    dump_symbols: bool,

    /// Dump the .dynamic table.
    #[arg(short = 'l')]
    dump_dynamic: bool,

    /// Dump mv-section relocations.
    #[arg(short = 'r')]
    dump_relocations: bool,

    /// Raise log verbosity by one level per occurrence.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Input ELF image.
    infile: PathBuf,

    /// Output ELF image; omit for a read-only / dry run.
    outfile: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            let code = err
                .chain()
                .find_map(|c| c.downcast_ref::<MvError>())
                .map(|e| e.exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn init_logging(verbose: u8) {
    let base = EnvFilter::try_from_env("MVTAIL_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // `-v` only ever raises the floor: once the user asks for more detail
    // than the environment specifies, a lower-verbosity env setting is
    // replaced outright rather than merged directive-by-directive.
    let filter = match verbose {
        0 => base,
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let changes = cli
        .set
        .iter()
        .map(|s| parse_change(s))
        .collect::<Result<Vec<_>>>()?;

    let commit_opts = if changes.is_empty() && cli.apply.is_empty() && !cli.apply_all && !cli.guard {
        None
    } else {
        Some(CommitOptions {
            changes,
            applies: cli.apply.clone(),
            apply_all: cli.apply_all,
            guard: cli.guard,
        })
    };

    if cli.dump_graph || cli.dump_symbols || cli.dump_dynamic || cli.dump_relocations {
        dump(cli).with_context(|| format!("dumping `{}`", cli.infile.display()))?;
    }

    if cli.outfile.is_none() && commit_opts.is_none() {
        return Ok(ExitCode::SUCCESS);
    }

    let opts = RunOptions {
        commit: commit_opts,
        trim: cli.outfile.is_some(),
    };

    let (bytes, summary) = driver::run(&cli.infile, &opts)
        .with_context(|| format!("processing `{}`", cli.infile.display()))?;

    if let Some(outfile) = &cli.outfile {
        std::fs::write(outfile, &bytes)
            .map_err(|e| MvError::io(outfile.clone(), e))
            .with_context(|| format!("writing `{}`", outfile.display()))?;
    }

    print!("{summary}");
    Ok(ExitCode::SUCCESS)
}

fn parse_change(s: &str) -> Result<(String, i64)> {
    let (name, value) = s
        .split_once('=')
        .with_context(|| format!("`-s {s}` is not of the form name=value"))?;
    let value: i64 = value
        .parse()
        .with_context(|| format!("`-s {s}`: `{value}` is not an integer"))?;
    Ok((name.to_string(), value))
}

fn dump(cli: &Cli) -> Result<()> {
    let raw = std::fs::read(&cli.infile).map_err(|e| MvError::io(cli.infile.clone(), e))?;
    let view = ElfView::parse(raw)?;

    if cli.dump_graph {
        let graph = graph::build_graph(&view)?;
        println!("== graph ==");
        for v in &graph.vars {
            println!(
                "var {} addr=0x{:x} width={} tracked={} signed={} bound={} value={} frozen={}",
                v.name, v.address, v.width, v.tracked, v.signed, v.bound, v.value, v.frozen
            );
        }
        for f in &graph.fns {
            println!(
                "fn {} body=0x{:x} variants={} patchpoints={} frozen={}",
                f.name,
                f.body,
                f.variants.len(),
                f.patchpoints.len(),
                f.frozen
            );
        }
        for (i, pp) in graph.patchpoints.iter().enumerate() {
            println!("patchpoint[{i}] addr=0x{:x} kind={:?} func={}", pp.addr, pp.kind, pp.func.0);
        }
    }

    if cli.dump_symbols {
        println!("== symbols ==");
        for (name, sym) in view.symbols() {
            println!("{name} value=0x{:x} size={} shndx={}", sym.st_value, sym.st_size, sym.st_shndx);
        }
    }

    if cli.dump_dynamic {
        println!("== dynamic ==");
        for d in view.dynamic_entries() {
            println!("tag={} val=0x{:x}", d.d_tag, d.d_val);
        }
    }

    if cli.dump_relocations {
        println!("== relocations ==");
        for r in view.rela_dyn()? {
            println!(
                "offset=0x{:x} type={} sym={} addend=0x{:x}",
                r.r_offset, r.r_type, r.r_sym, r.r_addend
            );
        }
    }

    Ok(())
}
