use camino::Utf8PathBuf;
use clap::{Parser, ValueHint};
use tracing::info;

#[derive(Parser, Debug)]
pub struct AssembleOpt {
    /// Input file
    #[clap(value_parser, value_hint = ValueHint::FilePath)]
    input: Utf8PathBuf,

    /// Output file. Defaults to the input file with a `.bin` extension
    #[clap(short, long, value_parser, value_hint = ValueHint::FilePath)]
    output: Option<Utf8PathBuf>,
}

impl AssembleOpt {
    pub fn exec(self) -> anyhow::Result<()> {
        let image = super::assemble_file(&self.input)?;
        let output = self
            .output
            .unwrap_or_else(|| self.input.with_extension("bin"));

        std::fs::write(&output, &image)?;
        info!(path = %output, len = image.len(), "Image written");
        Ok(())
    }
}
