use a3c_core::persistence::{create_checkpoint_dir, latest_checkpoint, remove_old_checkpoints};
use anyhow::Result;
use log::info;
use std::path::{Path, PathBuf};

/// File name prefix of the checkpoints written into a checkpoint directory.
pub const PARAMETERS_PREFIX: &str = "network_parameters";

/// Makes `dir` ready for a fresh run: creates it and removes checkpoints of earlier runs.
/// Returns the path prefix checkpoints should be written to.
pub fn prepare_checkpoint_dir(dir: &Path) -> Result<PathBuf> {
    create_checkpoint_dir(dir)?;
    let removed = remove_old_checkpoints(dir)?;
    if removed > 0 {
        info!(removed = removed; "cleared old checkpoints from {}", dir.display());
    }
    Ok(dir.join(PARAMETERS_PREFIX))
}

/// Like [`prepare_checkpoint_dir`] but keeps earlier checkpoints, returning the newest one to
/// resume from.
pub fn resume_checkpoint_dir(dir: &Path) -> Result<(PathBuf, Option<PathBuf>)> {
    create_checkpoint_dir(dir)?;
    let latest = latest_checkpoint(dir)?;
    Ok((dir.join(PARAMETERS_PREFIX), latest))
}
