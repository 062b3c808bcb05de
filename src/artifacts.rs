//! Generated speech artifacts on disk.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Output sample rate of every synthesized artifact.
pub const SAMPLE_RATE: u32 = 24_000;

const PREFIX: &str = "omnilocal_response";

/// Directory of WAV artifacts.
///
/// Names carry a UTC second-resolution timestamp plus a random suffix so two
/// requests finishing in the same second never overwrite each other.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn allocate_name(&self) -> String {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}.wav", PREFIX, timestamp, &suffix[..8])
    }

    /// Write mono samples in [-1, 1] as 16-bit PCM at [`SAMPLE_RATE`].
    pub fn write_wav(&self, samples: &[f32]) -> Result<PathBuf> {
        let path = self.dir.join(self.allocate_name());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec)?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;

        debug!("Wrote {} samples to {}", samples.len(), path.display());
        Ok(path)
    }

    /// Read and delete an artifact. At most one caller ever gets the bytes;
    /// every later call fails with `NotFound`.
    pub async fn take(&self, filename: &str) -> Result<Vec<u8>> {
        validate_filename(filename)?;

        let path = self.dir.join(filename);
        let claimed = self
            .dir
            .join(format!(".{}.{}", filename, uuid::Uuid::new_v4().simple()));

        // rename is atomic within a directory, so only one claimant succeeds
        match tokio::fs::rename(&path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Audio file not found: {}", filename)));
            }
            Err(e) => return Err(e.into()),
        }

        let bytes = tokio::fs::read(&claimed).await;
        tokio::fs::remove_file(&claimed).await?;
        Ok(bytes?)
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    let is_plain = !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains(['/', '\\'])
        && !filename.contains("..");
    if is_plain {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid audio file name: {}", filename)))
    }
}
