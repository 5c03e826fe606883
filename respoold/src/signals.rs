//!
//! Signals are caught on a dedicated blocking thread and translated into
//! a `CancellationToken` the async side awaits on for graceful shutdown.
//!
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::{backend::Handle, Signals};
use std::error::Error;
use tokio_util::sync::CancellationToken;

pub(crate) fn handle_signals(token: CancellationToken) -> Result<Handle, Box<dyn Error>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();

    std::thread::spawn(move || {
        log::debug!("installing signal handler");
        for signal in signals.forever() {
            match signal {
                SIGINT => {
                    log::info!("interrupted");
                    break;
                }
                SIGTERM => {
                    log::info!("terminated");
                    break;
                }
                _ => {}
            }
        }
        log::trace!("releasing signal handler");
        token.cancel();
    });
    Ok(handle)
}
