use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, ValueHint};
use switchboard_emulator::devices::{Attachment, DeviceError, Switch, Terminal};
use switchboard_emulator::system::Machine;
use switchboard_emulator::{Processor, RunState, System};
use tracing::{debug, info, warn};

/// How often the machines get checked on
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
pub struct RunOpt {
    /// Programs to run, one machine each. `.asm` files are assembled first.
    ///
    /// Every machine gets a switch port in device slot 0 and a terminal in
    /// slot 1. Port ids follow the order of the programs.
    #[clap(required = true, value_parser, value_hint = ValueHint::FilePath)]
    programs: Vec<Utf8PathBuf>,

    /// Log every executed instruction
    #[clap(short, long, action = ArgAction::SetTrue)]
    trace: bool,

    /// Stop the machines once they all waited that long for an interrupt,
    /// in milliseconds
    #[clap(long, default_value_t = 100)]
    idle_ms: u64,
}

impl RunOpt {
    fn attachments(&self, switch: &std::sync::Arc<Switch>) -> Vec<Attachment> {
        let mut attachments = vec![switch.attachment(0), Terminal::stdout().attachment(1)];
        if self.trace {
            attachments.push(Box::new(
                |processor: &mut Processor| -> Result<(), DeviceError> {
                    processor.set_trace(true);
                    Ok(())
                },
            ));
        }
        attachments
    }

    /// Wait until every machine is done, stopping them all if they keep
    /// waiting for interrupts nobody sends
    fn supervise(&self, system: &System) {
        let idle = Duration::from_millis(self.idle_ms);
        let mut idle_since: Option<Instant> = None;

        loop {
            let states: Vec<RunState> = system.machines().map(Machine::state).collect();
            if states.iter().all(|state| state.is_final()) {
                return;
            }

            if states
                .iter()
                .all(|&state| state.is_final() || state == RunState::Waiting)
            {
                let since = *idle_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= idle {
                    info!("Every machine is waiting, stopping them");
                    for machine in system.machines() {
                        machine.stop();
                    }
                    return;
                }
            } else {
                idle_since = None;
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn exec(self) -> anyhow::Result<()> {
        let images = self
            .programs
            .iter()
            .map(|path| super::load_program(path))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let switch = Switch::new();
        let mut system = System::new();
        for (path, image) in self.programs.iter().zip(&images) {
            let id = system
                .spawn(image, self.attachments(&switch))
                .with_context(|| format!("could not start {path}"))?;
            debug!(id, %path, len = image.len(), "Program loaded");
        }

        self.supervise(&system);

        let ids: Vec<u8> = system.ids().collect();
        let mut faulted = 0;
        for id in ids {
            let processor = system.join(id)?;
            let state = processor.state();
            info!(
                id,
                %state,
                pc = %format!("{:#06x}", processor.pc()),
                cycles = processor.cycles(),
                status = ?processor.status(),
                "Machine finished"
            );

            if state == RunState::Faulted {
                warn!(id, "Machine faulted");
                faulted += 1;
            }
        }

        if faulted > 0 {
            anyhow::bail!("{faulted} machine(s) faulted");
        }

        Ok(())
    }
}
