use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use grvqa::model::SampleFailure;
use serde::Serialize;
use tracing::info;

use crate::util::{now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct InputFile {
    pub path: String,
    pub sha256: String,
}

/// Provenance record written next to every command's output.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest<C, N> {
    pub manifest_version: u32,
    pub run_id: String,
    pub command: String,
    pub started_at: String,
    pub completed_at: String,
    pub inputs: Vec<InputFile>,
    pub config: C,
    pub counts: N,
    pub failed_samples: Vec<SampleFailure>,
}

/// Collects run metadata from the start of a command until its manifest is written.
pub struct RunRecorder {
    command: &'static str,
    started_ts: DateTime<Utc>,
    started_at: String,
    inputs: Vec<InputFile>,
}

impl RunRecorder {
    pub fn start(command: &'static str) -> Self {
        let started_ts = Utc::now();
        let recorder = Self {
            command,
            started_ts,
            started_at: now_utc_string(),
            inputs: Vec::new(),
        };
        info!(command, run_id = %recorder.run_id(), "starting run");
        recorder
    }

    pub fn run_id(&self) -> String {
        format!("{}-{}", self.command, utc_compact_string(self.started_ts))
    }

    pub fn record_input(&mut self, path: &Path) -> Result<()> {
        let sha256 = sha256_file(path)?;
        self.inputs.push(InputFile {
            path: path.display().to_string(),
            sha256,
        });
        Ok(())
    }

    /// `explicit`, or `manifests/<command>_run_<timestamp>.json` beside `anchor`.
    pub fn manifest_path(&self, explicit: Option<PathBuf>, anchor: &Path) -> PathBuf {
        explicit.unwrap_or_else(|| {
            anchor
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("manifests")
                .join(format!(
                    "{}_run_{}.json",
                    self.command.replace('-', "_"),
                    utc_compact_string(self.started_ts)
                ))
        })
    }

    /// Writes the manifest, then fails the run if any sample was dropped.
    pub fn finish<C: Serialize, N: Serialize>(
        self,
        manifest_path: &Path,
        config: C,
        counts: N,
        failed_samples: Vec<SampleFailure>,
    ) -> Result<()> {
        let manifest = RunManifest {
            manifest_version: MANIFEST_VERSION,
            run_id: self.run_id(),
            command: self.command.to_string(),
            started_at: self.started_at,
            completed_at: now_utc_string(),
            inputs: self.inputs,
            config,
            counts,
            failed_samples,
        };

        write_json_pretty(manifest_path, &manifest)?;
        info!(path = %manifest_path.display(), "wrote run manifest");

        if !manifest.failed_samples.is_empty() {
            bail!(
                "{} sample(s) failed during {}; see {}",
                manifest.failed_samples.len(),
                manifest.command,
                manifest_path.display()
            );
        }

        Ok(())
    }
}
