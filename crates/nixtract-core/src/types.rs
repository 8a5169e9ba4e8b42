//! Record model for the flake dependency graph (Section 3).
//!
//! These types describe one derivation and its immediate build-input
//! edges. The wire form is camelCase JSONL; the in-memory form is
//! snake_case. Optional fields that are absent are omitted on the
//! wire, never serialized as `null`.

use serde::{Deserialize, Serialize};

/// An ordered sequence of attribute names from the package-set root.
///
/// Serialized on the wire as a dot-joined string (`"python3Packages.versioneer"`).
/// An empty path denotes the root of the evaluated package set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AttributePath(pub Vec<String>);

impl AttributePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn as_dotted(&self) -> String {
        self.0.join(".")
    }

    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            Self::root()
        } else {
            Self(dotted.split('.').map(str::to_string).collect())
        }
    }
}

impl std::fmt::Display for AttributePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_dotted())
    }
}

impl Serialize for AttributePath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_dotted())
    }
}

impl<'de> Deserialize<'de> for AttributePath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let dotted = String::deserialize(deserializer)?;
        Ok(Self::parse(&dotted))
    }
}

/// The kind of dependency edge a build input represents.
///
/// The three subtypes distinguish usage semantics; they do not affect
/// traversal behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildInputType {
    BuildInput,
    PropagatedBuildInput,
    NativeBuildInput,
}

impl BuildInputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildInput => "build_input",
            Self::PropagatedBuildInput => "propagated_build_input",
            Self::NativeBuildInput => "native_build_input",
        }
    }
}

/// One output of a multi-output derivation (`out`, `doc`, `dev`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub name: String,
    pub output_path: String,
}

/// A dependency edge from a derivation to one of its build inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInputEdge {
    pub attribute_path: AttributePath,
    pub build_input_type: BuildInputType,
    /// Absent when the input cannot be built on the target platform.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_path: Option<String>,
}

/// The parsed output of `builtins.parseDrvName`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedName {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
}

/// One license entry, e.g. an SPDX identifier plus a readable name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub spdx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub full_name: Option<String>,
}

/// Metadata specific to derivations sourced from nixpkgs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NixpkgsMetadata {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub broken: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub licenses: Option<Vec<License>>,
}

/// The `src` attribute of a derivation, when it points at a git checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub git_repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rev: Option<String>,
}

/// A Nix derivation: an evaluated (not realized) build recipe.
///
/// `output_path` and the optional metadata blocks are omitted on the
/// wire when absent rather than serialized as `null` (Section 9,
/// "Record optionality").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub attribute_path: AttributePath,
    pub derivation_path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_path: Option<String>,
    pub outputs: Vec<Output>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parsed_name: Option<ParsedName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nixpkgs_metadata: Option<NixpkgsMetadata>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub src: Option<Source>,
    pub build_inputs: Vec<BuildInputEdge>,
}

/// Errors raised while parsing a wire-form record.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed record JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a single JSONL record from its wire bytes.
pub fn parse(bytes: &[u8]) -> Result<Record, ParseError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Serialize a record to its wire form (no trailing newline).
pub fn serialize(record: &Record) -> Result<Vec<u8>, ParseError> {
    Ok(serde_json::to_vec(record)?)
}
