use camino::Utf8PathBuf;
use clap::{Parser, ValueHint};
use switchboard_emulator::constants::PROGRAM_START;
use switchboard_emulator::disassemble;

#[derive(Parser, Debug)]
pub struct DumpOpt {
    /// Input file, either assembly source (`.asm`) or a binary image
    #[clap(value_parser, value_hint = ValueHint::FilePath)]
    input: Utf8PathBuf,
}

impl DumpOpt {
    pub fn exec(self) -> anyhow::Result<()> {
        let image = super::load_program(&self.input)?;
        for row in disassemble(&image, PROGRAM_START) {
            println!("{row}");
        }

        Ok(())
    }
}
