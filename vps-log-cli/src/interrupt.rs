//! Interrupt handling
//!
//! SIGINT/SIGTERM raise a shared flag that the pass polls between units, so
//! open split files are still flushed and closed. A second SIGINT while the
//! flag is already raised terminates immediately.

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Exit status used when a second interrupt forces termination
const FORCED_EXIT_CODE: i32 = 130;

/// Install the handlers and return the flag they raise
pub fn install() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));

    // Registered first so it sees the flag as set by an earlier signal
    flag::register_conditional_shutdown(SIGINT, FORCED_EXIT_CODE, Arc::clone(&interrupted))
        .context("Failed to register SIGINT shutdown handler")?;

    for signal in [SIGINT, SIGTERM] {
        flag::register(signal, Arc::clone(&interrupted))
            .with_context(|| format!("Failed to register handler for signal {}", signal))?;
    }

    log::debug!("Interrupt handlers installed");
    Ok(interrupted)
}
