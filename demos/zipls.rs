use std::io::{self, Write};

use anyhow::*;
use camino::Utf8PathBuf;
use log::*;
use structopt::*;

use ziptab::host::Constraint;
use ziptab::vtab::Column;
use ziptab::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "zipls", about = "Lists (or prints) the entries of a .zip file")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Only entries whose path starts with this
    #[structopt(short, long)]
    prefix: Option<String>,

    /// Only the entry with exactly this path
    #[structopt(short = "e", long, conflicts_with = "prefix")]
    exact: Option<String>,

    /// Writes the matching entries' contents to stdout instead of listing them.
    #[structopt(short, long)]
    cat: bool,

    #[structopt(name("ZIP file"))]
    zip_path: Utf8PathBuf,
}

const LISTED: [Column; 6] = [
    Column::Path,
    Column::Comp,
    Column::Length,
    Column::CompressedLength,
    Column::Mtime,
    Column::Crc32,
];

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let mut registry = Registry::new();
    register(&mut registry)?;
    let table = registry
        .create_table(ZipModule::NAME, "main", "zip", &[args.zip_path.as_str()])
        .with_context(|| format!("Couldn't open {}", args.zip_path))?;
    info!("{} has {} entries", args.zip_path, table.archive().entries().len());

    let pattern;
    let mut constraints = Vec::new();
    if let Some(prefix) = &args.prefix {
        pattern = format!("{}*", prefix);
        constraints.push(Constraint::matches(Column::Path, pattern.as_str()));
    } else if let Some(exact) = &args.exact {
        constraints.push(Constraint::eq(Column::Path, exact.as_str()));
    }

    if args.cat {
        cat(&table, &constraints)
    } else {
        list(&table, &constraints)
    }
}

fn list(table: &ZipTable, constraints: &[Constraint<'_>]) -> Result<()> {
    let rows = ScanHost.select(table, &LISTED, constraints, true)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for row in &rows {
        let v = &row.values;
        writeln!(
            out,
            "{:>10} {:>10} {:>2} {} {:08x}  {}",
            v[2],
            v[3],
            v[1],
            v[4],
            v[5].as_integer().unwrap_or_default(),
            v[0]
        )?;
    }
    Ok(())
}

fn cat(table: &ZipTable, constraints: &[Constraint<'_>]) -> Result<()> {
    let rows = ScanHost.select(table, &[Column::Path, Column::Data], constraints, true)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for row in &rows {
        match row.values[1].as_bytes() {
            Some(data) => out.write_all(data)?,
            None => warn!("Couldn't decode {}", row.values[0]),
        }
    }
    Ok(())
}
