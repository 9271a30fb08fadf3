use std::fs;

use anyhow::Context;
use camino::Utf8Path;
use miette::{NamedSource, Report};
use switchboard_emulator::assemble;
use tracing::{debug, info};

mod assemble;
mod dump;
mod run;

#[derive(clap::Subcommand, Debug)]
pub enum Subcommand {
    /// Assemble a program into a binary image
    Assemble(self::assemble::AssembleOpt),

    /// Run programs on machines linked by a switch
    Run(self::run::RunOpt),

    /// Print the disassembly of a program
    Dump(self::dump::DumpOpt),
}

impl Subcommand {
    /// Run a subcommand
    pub fn exec(self) -> anyhow::Result<()> {
        match self {
            Self::Assemble(opt) => opt.exec(),
            Self::Run(opt) => opt.exec(),
            Self::Dump(opt) => opt.exec(),
        }
    }
}

/// Assemble a source file, reporting errors against the source
fn assemble_file(path: &Utf8Path) -> anyhow::Result<Vec<u8>> {
    info!(%path, "Reading program");
    let source = fs::read_to_string(path).with_context(|| format!("could not read {path}"))?;

    assemble(&source).map_err(|e| {
        let line = e.line;
        let report = Report::new(e).with_source_code(NamedSource::new(path, source));
        eprintln!("{report:?}");
        anyhow::anyhow!("could not assemble {path} (line {line})")
    })
}

/// Load a program image: `.asm` files get assembled, anything else is taken
/// as a binary image
fn load_program(path: &Utf8Path) -> anyhow::Result<Vec<u8>> {
    if path.extension() == Some("asm") {
        assemble_file(path)
    } else {
        debug!(%path, "Reading image");
        fs::read(path).with_context(|| format!("could not read {path}"))
    }
}
