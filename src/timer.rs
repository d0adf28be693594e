// src/timer.rs

//! Status sync timer
//!
//! A background thread that, every `timer.interval_secs`, polls the job
//! service for building entities, fills the image queue and runs a build
//! pass that never republishes repositories. Fatal errors end the thread
//! and are returned from its handle; anything else is logged and retried
//! on the next tick.

use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::images;
use crate::jobs;
use crate::scheduler::PassOptions;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Granularity of the stop flag check while sleeping
const STOP_POLL: Duration = Duration::from_millis(200);

/// One timer tick
pub fn tick(farm: &BuildFarm) -> Result<()> {
    jobs::reconcile(farm)?;
    {
        let conn = farm.open_db()?;
        images::fill_queue(farm, &conn)?;
    }
    farm.build_with(&PassOptions::no_repo_update())?;
    Ok(())
}

/// Sleep for `duration`, returning early when `stop` is set
fn sleep(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(STOP_POLL.min(deadline - now));
    }
}

fn run(farm: &BuildFarm, stop: &AtomicBool) -> Result<()> {
    let interval = farm.config().timer_interval();
    info!("Status sync timer started (every {}s)", interval.as_secs());

    while !stop.load(Ordering::SeqCst) {
        debug!("Status sync tick");
        match tick(farm) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                error!("Status sync timer stopped: {}", e);
                return Err(e);
            }
            Err(e) => warn!("Status sync failed: {}", e),
        }
        sleep(interval, stop);
    }

    info!("Status sync timer stopped");
    Ok(())
}

/// Start the timer thread
pub fn spawn(farm: Arc<BuildFarm>, stop: Arc<AtomicBool>) -> Result<JoinHandle<Result<()>>> {
    thread::Builder::new()
        .name("status-sync".to_string())
        .spawn(move || run(&farm, &stop))
        .map_err(|e| Error::IoError(format!("Failed to start the status sync timer: {e}")))
}
