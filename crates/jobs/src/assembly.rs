//! Assembly collaborator boundary.
//!
//! Assembly is a blocking operation from this core's perspective; the
//! orchestrator runs it on the blocking pool and treats it as atomic.
//! The default implementation only materializes the resolved parameters,
//! standing in for a real renderer.

use std::path::PathBuf;

use serde_json::Value;

use clipforge_core::media;
use clipforge_core::types::JobId;

/// Errors from the assembly step.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("Assembly I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Assembly serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Assembly rejected params: {0}")]
    InvalidParams(String),
}

/// Blocking assembly collaborator.
///
/// Implementations run via `spawn_blocking`; they must not assume an
/// async context. Params arrive with remote references already rewritten
/// to local paths; any reference left unresolved must be rejected.
pub trait AssemblyService: Send + Sync {
    fn run(&self, job_id: JobId, params: &Value) -> Result<PathBuf, AssemblyError>;
}

// ---------------------------------------------------------------------------
// ParamsDumpAssembly
// ---------------------------------------------------------------------------

/// Default assembler: validates the params and writes them to a result
/// file named after the job.
pub struct ParamsDumpAssembly {
    output_dir: PathBuf,
}

impl ParamsDumpAssembly {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

impl AssemblyService for ParamsDumpAssembly {
    fn run(&self, job_id: JobId, params: &Value) -> Result<PathBuf, AssemblyError> {
        let unresolved = media::extract_remote_refs(params);
        if !unresolved.is_empty() {
            return Err(AssemblyError::InvalidParams(format!(
                "unresolved remote references: {}",
                unresolved.join(", ")
            )));
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{job_id}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(params)?)?;
        tracing::debug!(job_id = %job_id, result = %path.display(), "Assembly output written");
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
