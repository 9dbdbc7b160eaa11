//! Version detection and input normalization.
//!
//! UPF v2 files open with `<UPF version="2.0.1">`. Files written before the
//! version attribute existed start directly with `<PP_INFO>` or `<PP_HEADER>`;
//! those are classified as legacy 1.0.0 and flagged with a warning.

use crate::error::{FormatError, Result, UpfWarning};
use encoding_rs::WINDOWS_1252;
use log::{debug, trace};
use regex::Regex;
use semver::Version;
use std::borrow::Cow;
use std::sync::LazyLock;

pub const LEGACY_VERSION: Version = Version::new(1, 0, 0);

/// Version written when a legacy document is re-emitted in XML markup.
pub const MODERN_VERSION: Version = Version::new(2, 0, 1);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<\s*UPF\s+version\s*=\s*["']([^"']*)["']"#).unwrap());

static ROOT_END_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<\s*/\s*UPF\s*>").unwrap());

static PP_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\s*PP_[A-Za-z0-9_]").unwrap());

/// The two markup families. Picked once, at detection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// Line-oriented blocks of UPF 1.x, no attributes.
    Legacy,
    /// XML-like blocks of UPF 2.x with attributes and numbered children.
    Xml,
}

impl Markup {
    pub fn for_version(version: &Version) -> Markup {
        if version.major >= 2 {
            Markup::Xml
        } else {
            Markup::Legacy
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detected {
    pub version: Version,
    pub markup: Markup,
    /// True when no version attribute was found.
    pub inferred: bool,
    pub warnings: Vec<UpfWarning>,
}

/// Parse a version attribute, padding `2.0` to `2.0.0`.
pub fn parse_version(raw: &str) -> Result<Version> {
    let invalid = || FormatError::InvalidVersion(raw.to_string());

    let fields: Vec<&str> = raw.trim().split('.').collect();
    if fields.len() > 3 {
        return Err(invalid().into());
    }

    let mut parts = [0u64; 3];
    for (part, field) in parts.iter_mut().zip(fields.iter()) {
        *part = field.trim().parse().map_err(|_| invalid())?;
    }

    Ok(Version::new(parts[0], parts[1], parts[2]))
}

/// Classify the schema version of a UPF text.
pub fn detect(text: &str) -> Result<Detected> {
    if let Some(caps) = VERSION_RE.captures(text) {
        let version = parse_version(&caps[1])?;

        if !ROOT_END_RE.is_match(text) {
            return Err(FormatError::UnterminatedRoot.into());
        }

        let markup = Markup::for_version(&version);
        debug!("detected UPF version {} ({:?} markup)", version, markup);

        return Ok(Detected {
            version,
            markup,
            inferred: false,
            warnings: Vec::new(),
        });
    }

    if PP_MARKER_RE.is_match(text) {
        debug!("no version attribute, assuming UPF v{}", LEGACY_VERSION);

        return Ok(Detected {
            version: LEGACY_VERSION,
            markup: Markup::Legacy,
            inferred: true,
            warnings: vec![UpfWarning::VersionInferred {
                assumed: LEGACY_VERSION,
            }],
        });
    }

    Err(FormatError::NoRootBlock.into())
}

/// Turn raw file bytes into text. Old generators sometimes left Latin-1
/// bytes in PP_INFO; those files are decoded as Windows-1252.
pub fn decode_input(bytes: &[u8]) -> (String, Vec<UpfWarning>) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(text) => (normalize_newlines(text).into_owned(), Vec::new()),
        Err(err) => {
            trace!("input is not UTF-8 ({}), falling back to Latin-1", err);
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            (
                normalize_newlines(&text).into_owned(),
                vec![UpfWarning::Latin1Decoded],
            )
        }
    }
}

pub fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}
