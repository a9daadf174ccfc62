use crate::parameters::{ParameterSchema, ParameterVector};
use anyhow::{Context, Result, bail};
use candle_core::{Device, Tensor, safetensors::BufferedSafetensors};
use log::info;
use safetensors::{SafeTensors, serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

const GLOBAL_STEP_KEY: &str = "global_step";
const EXTENSION: &str = "safetensors";

/// Writes a parameter vector somewhere, tagged with the global step it was taken at.
pub trait ParameterSaver: Send + Sync {
    /// Returns the location the parameters ended up at.
    fn save(&self, params: &ParameterVector, path: &Path, global_step: u64) -> Result<PathBuf>;
}

/// Checkpoints in the safetensors format. Tensors are named after the parameter schema and the
/// global step is kept in the file metadata.
#[derive(Debug, Clone)]
pub struct SafetensorsCheckpoint {
    schema: ParameterSchema,
}

impl SafetensorsCheckpoint {
    pub fn new(schema: ParameterSchema) -> Self {
        Self { schema }
    }

    /// `<path>-<global_step>.safetensors`
    pub fn file_name(path: &Path, global_step: u64) -> PathBuf {
        let mut file_name = path.as_os_str().to_owned();
        file_name.push(format!("-{global_step}.{EXTENSION}"));
        PathBuf::from(file_name)
    }

    /// Reads a checkpoint back, checking it against `schema`.
    pub fn load(
        schema: &ParameterSchema,
        file: &Path,
        device: &Device,
    ) -> Result<(ParameterVector, u64)> {
        let bytes =
            fs::read(file).with_context(|| format!("reading checkpoint {}", file.display()))?;
        let (_, metadata) = SafeTensors::read_metadata(&bytes)
            .with_context(|| format!("{} is not a safetensors file", file.display()))?;
        let global_step = metadata
            .metadata()
            .as_ref()
            .and_then(|metadata| metadata.get(GLOBAL_STEP_KEY))
            .context("checkpoint has no global step")?
            .parse::<u64>()
            .context("checkpoint global step is not a number")?;
        let buffered = BufferedSafetensors::new(bytes)?;
        let tensors = schema
            .names()
            .map(|name| {
                buffered
                    .load(name, device)
                    .with_context(|| format!("checkpoint is missing parameter `{name}`"))
            })
            .collect::<Result<Vec<Tensor>>>()?;
        schema
            .validate(&tensors)
            .context("checkpoint does not match the model")?;
        Ok((ParameterVector::new(tensors), global_step))
    }
}

impl ParameterSaver for SafetensorsCheckpoint {
    fn save(&self, params: &ParameterVector, path: &Path, global_step: u64) -> Result<PathBuf> {
        self.schema
            .validate(params)
            .context("saving parameters that do not match the model")?;
        let data: Vec<(&str, &Tensor)> = self.schema.names().zip(params.iter()).collect();
        let metadata = HashMap::from([(GLOBAL_STEP_KEY.to_owned(), global_step.to_string())]);
        let encoded = serialize(data, Some(metadata))?;
        let file = Self::file_name(path, global_step);
        fs::write(&file, encoded)
            .with_context(|| format!("writing checkpoint {}", file.display()))?;
        info!(global_step = global_step; "saved parameters to {}", file.display());
        Ok(file)
    }
}

/// Creates the checkpoint directory if it does not exist yet.
pub fn create_checkpoint_dir(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        bail!("checkpoint path {} is not a directory", dir.display());
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("creating checkpoint directory {}", dir.display()))
}

/// Removes the checkpoint files of a previous run from `dir`. Other files are left alone.
pub fn remove_old_checkpoints(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION) {
            fs::remove_file(&path)
                .with_context(|| format!("removing old checkpoint {}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// The checkpoint with the largest global step in `dir`, if any.
pub fn latest_checkpoint(dir: &Path) -> Result<Option<PathBuf>> {
    let mut latest: Option<(u64, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_none_or(|ext| ext != EXTENSION) {
            continue;
        }
        let step = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.rsplit_once('-'))
            .and_then(|(_, step)| step.parse::<u64>().ok());
        if let Some(step) = step
            && latest.as_ref().is_none_or(|(best, _)| step > *best)
        {
            latest = Some((step, path));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterSpec;
    use candle_core::DType;

    fn schema() -> ParameterSchema {
        ParameterSchema::new(vec![
            ParameterSpec::new("layer_weight", (2, 3), DType::F32),
            ParameterSpec::new("layer_bias", 2, DType::F32),
        ])
    }

    fn scratch_dir(name: &str) -> Result<PathBuf> {
        let dir = std::env::temp_dir().join(format!("a3c-{name}-{}", std::process::id()));
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        create_checkpoint_dir(&dir)?;
        Ok(dir)
    }

    #[test]
    fn saved_checkpoint_loads_back() -> Result<()> {
        let device = Device::Cpu;
        let dir = scratch_dir("persistence-load")?;
        let params = ParameterVector::new(vec![
            Tensor::arange(0f32, 6., &device)?.reshape((2, 3))?,
            Tensor::new(&[-1f32, 1.], &device)?,
        ]);
        let saver = SafetensorsCheckpoint::new(schema());
        let file = saver.save(&params, &dir.join("model"), 42)?;
        assert_eq!(file, dir.join("model-42.safetensors"));

        let (loaded, step) = SafetensorsCheckpoint::load(&schema(), &file, &device)?;
        assert_eq!(step, 42);
        assert_eq!(loaded.max_abs_diff(&params)?, 0.);
        assert_eq!(latest_checkpoint(&dir)?, Some(file));
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn loading_into_another_schema_fails() -> Result<()> {
        let device = Device::Cpu;
        let dir = scratch_dir("persistence-mismatch")?;
        let params = ParameterVector::new(schema().zeros(&device)?);
        let file = SafetensorsCheckpoint::new(schema()).save(&params, &dir.join("model"), 1)?;
        let other = ParameterSchema::new(vec![ParameterSpec::new(
            "layer_weight",
            (3, 2),
            DType::F32,
        )]);
        assert!(SafetensorsCheckpoint::load(&other, &file, &device).is_err());
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn old_checkpoints_are_removed_and_latest_is_found() -> Result<()> {
        let dir = scratch_dir("persistence-clean")?;
        let params = ParameterVector::new(schema().zeros(&Device::Cpu)?);
        let saver = SafetensorsCheckpoint::new(schema());
        for step in [5, 120, 17] {
            saver.save(&params, &dir.join("model"), step)?;
        }
        fs::write(dir.join("notes.txt"), "keep me")?;
        assert_eq!(
            latest_checkpoint(&dir)?,
            Some(dir.join("model-120.safetensors"))
        );
        assert_eq!(remove_old_checkpoints(&dir)?, 3);
        assert_eq!(latest_checkpoint(&dir)?, None);
        assert!(dir.join("notes.txt").exists());
        fs::remove_dir_all(dir)?;
        Ok(())
    }
}
