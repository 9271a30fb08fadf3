use std::io::IsTerminal;
use std::process::exit;

use clap::{ArgAction, ArgGroup, Parser};
use tracing::error;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;

use crate::commands::Subcommand;

/// Environment variable overriding the log directives
const LOG_ENV: &str = "SWITCHBOARD_LOG";

#[derive(Parser, Debug)]
#[clap(version, about, group = ArgGroup::new("format"))]
struct Opt {
    /// Increase the level of verbosity. Can be used multiple times.
    #[clap(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Force colored output. Default is to check if the output is a tty
    #[clap(short = 'c', long, global = true, group = "format")]
    color: bool,

    /// Force non-colored output. Default is to check if the output is a tty
    #[clap(short = 'C', long, global = true, group = "format")]
    no_color: bool,

    /// Use JSON output for log messages
    #[clap(short, long, global = true, group = "format")]
    json: bool,

    #[clap(subcommand)]
    command: Subcommand,
}

impl Opt {
    /// Default directives when `SWITCHBOARD_LOG` is unset.
    ///
    /// Machine lifecycle events (spawned, stopped, faulted) are logged at
    /// `info`, so they show without any flag while other crates stay at `warn`.
    const fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "switchboard_emulator=info,switchboard=info,warn",
            1 => "switchboard_emulator=debug,switchboard=debug,info",
            2 => "switchboard_emulator=trace,switchboard=trace,info",
            3 => "switchboard_emulator=trace,switchboard=trace,debug",
            4..=u8::MAX => "trace",
        }
    }

    fn should_use_colors(&self) -> bool {
        if self.color {
            true
        } else if self.no_color {
            false
        } else {
            std::io::stderr().is_terminal()
        }
    }

    fn filter_layer(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(self.log_filter()))
    }

    fn init_logging(&self) {
        let registry = tracing_subscriber::registry().with(self.filter_layer());

        // Every machine runs on a thread named `machine-<id>`
        if self.json {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_thread_names(true)
                .with_writer(std::io::stderr);
            registry.with(json_layer).init();
        } else {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .without_time()
                .with_ansi(self.should_use_colors())
                .with_target(false)
                .with_thread_names(true)
                .with_writer(std::io::stderr);
            registry.with(fmt_layer).init();
        }
    }
}

fn main() {
    let opt = Opt::parse();
    opt.init_logging();

    let res = opt.command.exec();
    if let Err(e) = res {
        error!("{:#}", e);
        exit(1);
    }
}
