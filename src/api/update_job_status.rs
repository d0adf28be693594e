// src/api/update_job_status.rs

//! A job service reports that some job changed state
//!
//! The request carries no trusted state; every building entity is polled
//! again and a pass runs afterwards.

use super::CallbackRequest;
use crate::error::Result;
use crate::farm::BuildFarm;
use crate::jobs;
use tracing::debug;

pub fn handle(farm: &BuildFarm, request: &CallbackRequest) -> Result<String> {
    if let Some(job_id) = request.header_opt("Job-Id") {
        debug!("Job status update triggered by job {}", job_id);
    }

    let changed = jobs::reconcile(farm)?;
    farm.build()?;
    Ok(format!("{changed} status change(s)"))
}
