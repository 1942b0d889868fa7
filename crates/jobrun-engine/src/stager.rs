//! Input validation and staging.
//!
//! Submitted files are classified into roles by filename prefix, checked
//! against the domain's role rules, and copied into the staging directory
//! under collision-free sanitized names. The caller's originals are never
//! moved or modified.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use jobrun_core::input::{base_name, sanitize_with_fresh_stem};
use jobrun_core::{
    sanitize_file_name, ClassifiedInputs, InputDescriptor, ProcessedInput, RoleRule, TaskId,
    ValidationError, UNKNOWN_ROLE,
};
use tracing::{debug, warn};

use crate::config::DomainConfig;
use crate::error::StartError;

/// Where the bytes of a submitted file come from.
#[derive(Debug, Clone)]
pub enum InputSource {
    /// A file on disk, e.g. a spooled upload.
    Path(PathBuf),
    /// An in-memory upload body.
    Bytes(Vec<u8>),
}

/// A file submitted to a start request.
#[derive(Debug, Clone)]
pub struct RawInput {
    /// Filename as supplied by the client.
    pub name: String,
    pub source: InputSource,
}

impl RawInput {
    /// Submit a file on disk under its own filename.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            source: InputSource::Path(path),
        }
    }

    /// Submit a file on disk under a client-supplied filename.
    pub fn named_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: InputSource::Path(path.into()),
        }
    }

    /// Submit an in-memory upload.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            source: InputSource::Bytes(bytes.into()),
        }
    }
}

/// Role assignment of each submitted input, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    entries: Vec<(String, Option<String>)>,
}

impl Classification {
    /// Role of the input at `index`, `None` if it matched no role.
    pub fn role_of(&self, index: usize) -> Option<&str> {
        self.entries.get(index).and_then(|(_, role)| role.as_deref())
    }

    /// Number of inputs classified as `role`.
    pub fn count(&self, role: &str) -> usize {
        self.entries
            .iter()
            .filter(|(_, r)| r.as_deref() == Some(role))
            .count()
    }

    /// Names of inputs that matched no role.
    pub fn unknown(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, role)| role.is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Audit trail entries for every submitted input.
    pub fn processed_inputs(&self) -> Vec<ProcessedInput> {
        self.entries
            .iter()
            .map(|(name, role)| ProcessedInput::new(name, role.as_deref().unwrap_or(UNKNOWN_ROLE)))
            .collect()
    }
}

/// Validates and stages the inputs of one domain.
#[derive(Debug, Clone)]
pub struct Stager {
    staging_dir: PathBuf,
    rules: Vec<RoleRule>,
    min_inputs: usize,
}

impl Stager {
    /// Create a stager from a domain's role rules and staging directory.
    pub fn for_domain(domain: &DomainConfig) -> Self {
        Self {
            staging_dir: domain.staging_dir(),
            rules: domain.roles.clone(),
            min_inputs: domain.min_inputs,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Classify `inputs` and check them against the role rules.
    ///
    /// Checks run in order: input count, role multiplicity, required roles.
    /// Inputs matching no role are kept as unknown and never rejected.
    pub fn validate(&self, inputs: &[RawInput]) -> Result<Classification, ValidationError> {
        if inputs.is_empty() {
            return Err(ValidationError::NoInputs);
        }
        if inputs.len() < self.min_inputs {
            return Err(ValidationError::TooFewInputs {
                min: self.min_inputs,
                got: inputs.len(),
            });
        }

        let classification = Classification {
            entries: inputs
                .iter()
                .map(|input| (input.name.clone(), self.best_role(&input.name)))
                .collect(),
        };

        for rule in self.rules.iter().filter(|r| !r.multiple) {
            let count = classification.count(&rule.role);
            if count > 1 {
                return Err(ValidationError::DuplicateRole {
                    role: rule.role.clone(),
                    count,
                });
            }
        }

        for rule in self.rules.iter().filter(|r| r.required) {
            if classification.count(&rule.role) == 0 {
                return Err(ValidationError::MissingRole {
                    role: rule.role.clone(),
                    prefixes: rule.prefixes.clone(),
                });
            }
        }

        Ok(classification)
    }

    /// Longest-prefix role for `name`; ties go to the rule declared first.
    fn best_role(&self, name: &str) -> Option<String> {
        let mut best: Option<(&RoleRule, usize)> = None;
        for rule in &self.rules {
            if let Some(len) = rule.match_len(name) {
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((rule, len));
                }
            }
        }
        best.map(|(rule, _)| rule.role.clone())
    }

    /// Copy every classified input into the staging directory.
    ///
    /// Staged names are `<short task id>_<sanitized name>`. If a copy fails,
    /// the files already staged for this run are removed again.
    pub async fn stage(
        &self,
        task_id: &TaskId,
        inputs: &[RawInput],
        classification: &Classification,
    ) -> Result<ClassifiedInputs, StartError> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|source| StartError::Staging {
                name: self.staging_dir.display().to_string(),
                source,
            })?;

        let mut used = HashSet::new();
        let mut staged: Vec<InputDescriptor> = Vec::with_capacity(inputs.len());

        for (index, input) in inputs.iter().enumerate() {
            let Some(role) = classification.role_of(index) else {
                warn!(name = %input.name, "Input matches no role, not staging it");
                continue;
            };

            let mut sanitized = sanitize_file_name(&input.name);
            while !used.insert(sanitized.to_lowercase()) {
                sanitized = sanitize_with_fresh_stem(&input.name);
            }
            let staged_path = self
                .staging_dir
                .join(format!("{}_{}", task_id.short(), sanitized));

            if let Err(source) = copy_input(&input.source, &staged_path).await {
                let staged_paths: Vec<&Path> = staged.iter().map(|d| d.staged_path.as_path()).collect();
                release(staged_paths).await;
                return Err(StartError::Staging {
                    name: base_name(&input.name).to_string(),
                    source,
                });
            }

            debug!(
                task_id = %task_id,
                name = %input.name,
                role = %role,
                staged = %staged_path.display(),
                "Staged input"
            );

            staged.push(InputDescriptor {
                original_name: input.name.clone(),
                role: role.to_string(),
                sanitized_name: sanitized,
                staged_path,
            });
        }

        Ok(ClassifiedInputs::new(staged, classification.unknown()))
    }
}

async fn copy_input(source: &InputSource, dest: &Path) -> io::Result<()> {
    match source {
        InputSource::Path(path) => tokio::fs::copy(path, dest).await.map(|_| ()),
        InputSource::Bytes(bytes) => tokio::fs::write(dest, bytes).await,
    }
}

/// Delete staged files, ignoring ones that are already gone.
///
/// Failures are logged and never returned.
pub async fn release<'a>(paths: impl IntoIterator<Item = &'a Path>) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed staged input"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove staged input");
            }
        }
    }
}
