//! Background generation and validation orchestration.
//!
//! The coordinator drives the two asynchronous lifecycle phases without
//! blocking the caller. Each request reserves the atom inline (so the caller
//! sees `Conflict`/`NotFound` immediately and observers see the `Busy`
//! transition instantly), then resolves in a spawned task whose handle the
//! caller may await or drop.
//!
//! ## Failure semantics
//!
//! A generator or validator failure, crash included, is absorbed and
//! converted into a defined transition: generation reverts to `Hollow`,
//! validation returns to `Claimed`. The underlying error is logged; a
//! completed task never leaves its atom in `Busy`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;

use crate::atoms::{AtomStore, AtomStoreError};
use crate::store::RecordStore;
use crate::types::{AtomRecord, AtomStatus, Portal};

/// Error from an external collaborator (generator, validator, materializer).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator ran and reported failure.
    #[error("Collaborator failed: {0}")]
    Failed(String),
    /// The collaborator could not be executed.
    #[error("Collaborator I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum WitnessError {
    /// Reservation or state-machine error, surfaced directly to the caller.
    #[error(transparent)]
    Atom(#[from] AtomStoreError),
    /// Collaborator failure. Absorbed by the background task, never surfaced
    /// as a fatal error.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    /// Backing store failure.
    #[error("Store error: {0}")]
    Store(String),
}

/// Everything the generation collaborator gets to see.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Atom being generated.
    pub atom_id: String,
    /// The atom's current content, used as the generation intent.
    pub intent: String,
    /// The atom's domain tag.
    pub domain: String,
    /// Read-only external references attached to the atom.
    pub portals: Vec<Portal>,
    /// Atom ids connected by a thread in either direction.
    pub neighbors: Vec<String>,
}

impl GenerationRequest {
    /// Render the portal/neighbor/intent context as prompt text.
    pub fn render_context(&self) -> String {
        let mut out = format!("=== GENERATION CONTEXT for {} ===\n", self.atom_id);

        if !self.portals.is_empty() {
            out.push_str("\n--- PORTALS ---\n");
            for portal in &self.portals {
                let description = portal.description.as_deref().unwrap_or("no description");
                out.push_str(&format!("- Path: {} ({})\n", portal.path, description));
            }
        }

        if !self.neighbors.is_empty() {
            out.push_str("\n--- THREAD NEIGHBORS ---\n");
            for neighbor in &self.neighbors {
                out.push_str(&format!("- Neighbor: {neighbor}\n"));
            }
        }

        out.push_str(&format!("\n--- INTENT ---\n{}\n", self.intent));
        out
    }
}

/// Collaborator producing replacement content for a `Hollow` atom.
///
/// Internals are opaque to the kernel; typically a text-generation call.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce replacement content for the request, or fail.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CollaboratorError>;
}

/// Validation result reported by a domain witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Validation passed.
    Pass,
    /// Validation failed, with diagnostic text.
    Fail(String),
}

impl Verdict {
    /// Whether this verdict endorses the atom.
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Collaborator applying a domain-specific pass/fail check to an atom.
#[async_trait]
pub trait DomainWitness: Send + Sync {
    /// Examine the atom and return a verdict.
    async fn examine(&self, atom: &AtomRecord) -> Result<Verdict, CollaboratorError>;
}

/// Configuration for the process-spawning witness.
///
/// All settings can be configured via environment variables:
/// - `WITNESS_BIN_DIR`: directory holding `witness-{domain}` executables
///   (default: `.sentinel/bin`)
/// - `SENTINEL_DB`: passed through to spawned witnesses when set
#[derive(Debug, Clone)]
pub struct WitnessConfig {
    /// Directory holding one `witness-{domain}` executable per domain.
    pub bin_dir: PathBuf,
    /// Extra environment passed to every spawned witness.
    pub env: Vec<(String, String)>,
}

impl WitnessConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let bin_dir = std::env::var("WITNESS_BIN_DIR")
            .unwrap_or_else(|_| ".sentinel/bin".to_string())
            .into();
        let mut env = Vec::new();
        if let Ok(db) = std::env::var("SENTINEL_DB") {
            env.push(("SENTINEL_DB".to_string(), db));
        }
        Self { bin_dir, env }
    }
}

impl Default for WitnessConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Witness that spawns a black-box executable per domain.
///
/// Runs `{bin_dir}/witness-{domain}` with the atom id as its argument.
/// Exit code 0 is a pass, anything else fails with the captured stderr.
/// An unrecognized domain falls back to `witness-generic`, and with no
/// generic witness installed either, to a no-op pass.
#[derive(Debug, Clone)]
pub struct ProcessWitness {
    config: WitnessConfig,
}

impl ProcessWitness {
    /// Create a witness with the given configuration.
    pub fn new(config: WitnessConfig) -> Self {
        Self { config }
    }

    fn script_path(&self, domain: &str) -> PathBuf {
        self.config
            .bin_dir
            .join(format!("witness-{}", domain.to_lowercase()))
    }

    fn resolve_script(&self, domain: &str) -> Option<PathBuf> {
        let script = self.script_path(domain);
        if script.exists() {
            return Some(script);
        }
        let generic = self.script_path(crate::GENERIC_DOMAIN);
        generic.exists().then_some(generic)
    }
}

#[async_trait]
impl DomainWitness for ProcessWitness {
    async fn examine(&self, atom: &AtomRecord) -> Result<Verdict, CollaboratorError> {
        let script = match self.resolve_script(&atom.domain) {
            Some(script) => script,
            None => {
                tracing::debug!(atom_id = %atom.id, domain = %atom.domain, "No witness for domain, passing");
                return Ok(Verdict::Pass);
            }
        };

        let output = tokio::process::Command::new(&script)
            .arg(&atom.id)
            .envs(self.config.env.iter().cloned())
            .output()
            .await?;

        if output.status.success() {
            Ok(Verdict::Pass)
        } else {
            Ok(Verdict::Fail(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ))
        }
    }
}

/// Resolution of a background generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// New content was written; the atom is `Claimed`.
    Generated,
    /// The collaborator failed; the atom is back in `Hollow`.
    Reverted,
}

/// Resolution of a background validation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The witness passed; the atom is `Endorsed`.
    Endorsed,
    /// The witness failed or crashed; the atom is back in `Claimed`.
    Rejected,
}

/// Orchestrates background generation and validation runs.
pub struct WitnessCoordinator<S> {
    atoms: Arc<AtomStore<S>>,
    store: Arc<S>,
    generator: Arc<dyn Generator>,
    witness: Arc<dyn DomainWitness>,
}

impl<S: RecordStore + 'static> WitnessCoordinator<S> {
    /// Create a coordinator over the given store and collaborators.
    pub fn new(
        atoms: Arc<AtomStore<S>>,
        store: Arc<S>,
        generator: Arc<dyn Generator>,
        witness: Arc<dyn DomainWitness>,
    ) -> Self {
        Self {
            atoms,
            store,
            generator,
            witness,
        }
    }

    /// Reserve a `Hollow` atom and generate its content in the background.
    ///
    /// Returns once the reservation is held; the returned handle resolves
    /// when the background phase has released the atom.
    pub async fn request_generation(
        &self,
        id: &str,
    ) -> Result<JoinHandle<GenerationOutcome>, WitnessError> {
        self.atoms.reserve(id, AtomStatus::Hollow).await?;

        let atoms = Arc::clone(&self.atoms);
        let store = Arc::clone(&self.store);
        let generator = Arc::clone(&self.generator);
        let id = id.to_string();
        Ok(tokio::spawn(async move {
            run_generation(atoms, store, generator, id).await
        }))
    }

    /// Reserve a `Claimed` atom and validate it in the background.
    ///
    /// Returns once the reservation is held; the returned handle resolves
    /// when the background phase has released the atom.
    pub async fn request_validation(
        &self,
        id: &str,
    ) -> Result<JoinHandle<ValidationOutcome>, WitnessError> {
        self.atoms.reserve(id, AtomStatus::Claimed).await?;

        let atoms = Arc::clone(&self.atoms);
        let store = Arc::clone(&self.store);
        let witness = Arc::clone(&self.witness);
        let id = id.to_string();
        Ok(tokio::spawn(async move {
            run_validation(atoms, store, witness, id).await
        }))
    }
}

async fn run_generation<S: RecordStore>(
    atoms: Arc<AtomStore<S>>,
    store: Arc<S>,
    generator: Arc<dyn Generator>,
    id: String,
) -> GenerationOutcome {
    match try_generate(&atoms, &store, &*generator, &id).await {
        Ok(()) => {
            tracing::info!(atom_id = %id, "Generation completed");
            GenerationOutcome::Generated
        }
        Err(e) => {
            tracing::warn!(atom_id = %id, error = %e, "Generation failed, reverting to hollow");
            if let Err(release_err) = atoms.release(&id, AtomStatus::Hollow).await {
                tracing::error!(atom_id = %id, error = %release_err, "Failed to revert reservation");
            }
            GenerationOutcome::Reverted
        }
    }
}

async fn try_generate<S: RecordStore>(
    atoms: &AtomStore<S>,
    store: &S,
    generator: &dyn Generator,
    id: &str,
) -> Result<(), WitnessError> {
    let atom = atoms.get(id).await?;
    let portals = store
        .list_portals(id)
        .await
        .map_err(|e| WitnessError::Store(e.to_string()))?;
    let neighbors = store
        .neighbors(id)
        .await
        .map_err(|e| WitnessError::Store(e.to_string()))?;

    let request = GenerationRequest {
        atom_id: id.to_string(),
        intent: atom.content,
        domain: atom.domain.clone(),
        portals,
        neighbors,
    };

    let content = generator.generate(&request).await?;
    atoms.create(id, Some(&content), &atom.domain).await?;
    atoms.release(id, AtomStatus::Claimed).await?;
    Ok(())
}

async fn run_validation<S: RecordStore>(
    atoms: Arc<AtomStore<S>>,
    store: Arc<S>,
    witness: Arc<dyn DomainWitness>,
    id: String,
) -> ValidationOutcome {
    let verdict = match atoms.get(&id).await {
        Ok(atom) => witness.examine(&atom).await,
        Err(e) => Err(CollaboratorError::Failed(e.to_string())),
    };

    // Every attempt counts, pass or fail.
    if let Err(e) = store.set_last_validated(&id, Utc::now()).await {
        tracing::warn!(atom_id = %id, error = %e, "Failed to record validation timestamp");
    }

    let next = match &verdict {
        Ok(Verdict::Pass) => AtomStatus::Endorsed,
        Ok(Verdict::Fail(reason)) => {
            tracing::info!(atom_id = %id, reason = %reason, "Witness rejected atom");
            AtomStatus::Claimed
        }
        Err(e) => {
            tracing::warn!(atom_id = %id, error = %e, "Witness failed to execute");
            AtomStatus::Claimed
        }
    };

    if let Err(e) = atoms.release(&id, next).await {
        tracing::error!(atom_id = %id, error = %e, "Failed to release validation reservation");
    }

    if next == AtomStatus::Endorsed {
        tracing::info!(atom_id = %id, "Atom endorsed");
        ValidationOutcome::Endorsed
    } else {
        ValidationOutcome::Rejected
    }
}
