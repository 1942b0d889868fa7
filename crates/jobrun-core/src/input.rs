//! Input roles, staged input descriptors, and filename sanitization.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::short_id;

/// Role recorded for inputs that match no configured role.
pub const UNKNOWN_ROLE: &str = "unknown";

/// Characters removed from filenames before staging.
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// How a domain recognizes one kind of input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    /// Role name handed to the provider (e.g. "deals").
    pub role: String,

    /// Filename prefixes identifying this role, matched case-insensitively.
    pub prefixes: Vec<String>,

    /// Whether a start is rejected when no input has this role.
    #[serde(default = "default_required")]
    pub required: bool,

    /// Whether more than one input may have this role.
    #[serde(default)]
    pub multiple: bool,
}

fn default_required() -> bool {
    true
}

impl RoleRule {
    /// Create a required, single-valued role matched by one prefix.
    pub fn new(role: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            prefixes: vec![prefix.into()],
            required: true,
            multiple: false,
        }
    }

    /// Builder method to accept an additional prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Builder method to make the role optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Builder method to allow several inputs for the role.
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Length of the longest prefix matching `file_name`, if any.
    ///
    /// An empty prefix matches every file with length 0, so any named prefix
    /// of another role takes precedence.
    pub fn match_len(&self, file_name: &str) -> Option<usize> {
        let name = base_name(file_name).to_lowercase();
        self.prefixes
            .iter()
            .map(|p| p.to_lowercase())
            .filter(|p| name.starts_with(p.as_str()))
            .map(|p| p.chars().count())
            .max()
    }
}

/// An input file staged for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Filename as submitted by the caller.
    pub original_name: String,

    /// Role the input was classified into.
    pub role: String,

    /// Filesystem-safe name derived from the original.
    pub sanitized_name: String,

    /// Location of the staged copy, owned by the run.
    pub staged_path: PathBuf,
}

/// The staged inputs of one run, grouped by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedInputs {
    inputs: Vec<InputDescriptor>,
    unknown: Vec<String>,
}

impl ClassifiedInputs {
    /// Create from staged descriptors and the names of unmatched inputs.
    pub fn new(inputs: Vec<InputDescriptor>, unknown: Vec<String>) -> Self {
        Self { inputs, unknown }
    }

    /// The first input of `role`.
    pub fn first(&self, role: &str) -> Option<&InputDescriptor> {
        self.inputs.iter().find(|i| i.role == role)
    }

    /// All inputs of `role`, in submission order.
    pub fn by_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a InputDescriptor> + 'a {
        self.inputs.iter().filter(move |i| i.role == role)
    }

    /// All staged inputs, in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &InputDescriptor> {
        self.inputs.iter()
    }

    /// Original names of inputs that matched no role.
    pub fn unknown(&self) -> &[String] {
        &self.unknown
    }

    /// Staged file locations owned by the run.
    pub fn staged_paths(&self) -> impl Iterator<Item = &Path> {
        self.inputs.iter().map(|i| i.staged_path.as_path())
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Audit record of one submitted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedInput {
    /// Filename as submitted.
    pub name: String,

    /// Assigned role, or [`UNKNOWN_ROLE`].
    pub role: String,

    /// When the input was accepted.
    pub timestamp: DateTime<Utc>,
}

impl ProcessedInput {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Strip any client-supplied directory part from an uploaded filename.
pub fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
}

/// Make an uploaded filename safe to use on disk.
///
/// Removes `<>:"/\|?*` and control characters, collapses whitespace runs to
/// `_`, and keeps the extension. An empty stem is replaced by a random short
/// id.
pub fn sanitize_file_name(file_name: &str) -> String {
    sanitize_with_stem(file_name, None)
}

/// Sanitize `file_name`, replacing its stem with a fresh short id.
///
/// Used when two inputs of one run sanitize to the same name.
pub fn sanitize_with_fresh_stem(file_name: &str) -> String {
    sanitize_with_stem(file_name, Some(short_id()))
}

fn sanitize_with_stem(file_name: &str, stem_override: Option<String>) -> String {
    let (stem, ext) = split_extension(base_name(file_name));
    let stem = match stem_override {
        Some(stem) => stem,
        None => clean(stem),
    };
    let stem = if stem.is_empty() { short_id() } else { stem };
    let ext = clean(ext);
    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    }
}

fn clean(part: &str) -> String {
    let kept: String = part
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c) && !c.is_control())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("_")
}
