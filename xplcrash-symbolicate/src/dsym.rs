//! Locating and opening debug-symbol archives.
//!
//! A build's symbols live in an `.xcarchive` (possibly still zipped)
//! somewhere under the directories the embedding application configures.
//! This module renders the expected archive file name from a pattern,
//! searches the roots for it, extracts it when only the zip exists, drills
//! down to the DWARF binary inside the dSYM bundle, and reads the
//! architectures that binary contains.

use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::tools::{run_tool, ToolConfig};

/// Default placeholder token substituted with the build identifier when
/// rendering archive patterns.
pub const BUILD_PLACEHOLDER: &str = "$BUILD";

/// Number of slices a dSYM is expected to carry: one for the device and
/// one for the simulator. Any other count means the archive was produced
/// by a different packaging pipeline and picking a slice would be a guess.
const EXPECTED_SLICE_COUNT: usize = 2;

/// Mapping from image UUID to the architecture name of that slice.
pub type ArchitectureMap = HashMap<Uuid, String>;

/// The error type for locating and reading a debug-symbol archive.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DsymError {
    kind: DsymErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

/// Error kind for [`DsymError`].
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DsymErrorKind {
    /// A configured search root does not exist or is not a directory.
    RootDirectoryInvalid(PathBuf),
    /// No file with the expected archive name exists under any root.
    ArchiveNotFound(String),
    /// The extraction tool failed or exited with an unexpected status.
    ArchiveNotExtractable,
    /// The archive lacks the expected dSYM directory structure.
    ArchiveMissingSymbols,
    /// The architecture dump could not be obtained or decoded.
    CouldNotReadArchitectures,
    /// The architecture dump did not contain exactly the expected number
    /// of slices.
    UnexpectedArchitectureCount(usize),
}

impl fmt::Display for DsymErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootDirectoryInvalid(path) => {
                write!(f, "symbol search root is not a directory: {}", path.display())
            }
            Self::ArchiveNotFound(name) => {
                write!(f, "debug-symbol archive not found: {name}")
            }
            Self::ArchiveNotExtractable => {
                write!(f, "debug-symbol archive could not be extracted")
            }
            Self::ArchiveMissingSymbols => {
                write!(f, "archive does not contain a dSYM bundle")
            }
            Self::CouldNotReadArchitectures => {
                write!(f, "could not read architectures from dSYM")
            }
            Self::UnexpectedArchitectureCount(count) => {
                write!(
                    f,
                    "expected {EXPECTED_SLICE_COUNT} architectures in dSYM, found {count}"
                )
            }
        }
    }
}

impl From<DsymErrorKind> for DsymError {
    fn from(kind: DsymErrorKind) -> Self {
        DsymError { kind, source: None }
    }
}

impl DsymError {
    fn new<E>(kind: DsymErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        DsymError {
            kind,
            source: Some(source.into()),
        }
    }

    /// Returns the corresponding [`DsymErrorKind`] for this error.
    pub fn kind(&self) -> &DsymErrorKind {
        &self.kind
    }
}

/// Where a build's debug-symbol archive is searched for.
#[derive(Clone, Debug)]
pub struct SearchConfig {
    /// Root directories to search, in order.
    pub roots: Vec<PathBuf>,
    /// Expected archive file name with the build identifier replaced by
    /// the placeholder, such as `MyApp-$BUILD.xcarchive.zip`.
    pub archive_pattern: String,
    /// Placeholder token inside `archive_pattern`.
    pub placeholder: String,
}

/// The source a resolver's debug-symbol archive comes from.
#[derive(Clone, Debug)]
pub enum ArchiveSource {
    /// Search the configured roots for the expected archive file name,
    /// extracting it when only a `.zip` is found.
    Search(SearchConfig),
    /// Substitute the build identifier into a path pattern and use the
    /// result directly as the DWARF binary or dSYM bundle path.
    Direct {
        /// Path pattern containing the placeholder token.
        path_pattern: String,
        /// Placeholder token inside `path_pattern`.
        placeholder: String,
    },
}

/// A resolved debug-symbol archive: the DWARF binary inside a dSYM bundle
/// plus the architectures it contains.
#[derive(Clone, Debug)]
pub struct DebugArchive {
    dwarf_path: PathBuf,
    file_name: String,
    architectures: ArchitectureMap,
}

impl DebugArchive {
    /// Opens the DWARF binary at `dwarf_path`.
    ///
    /// Runs the configured architecture-dump tool over the path and parses
    /// its output into the archive's [`ArchitectureMap`].
    pub fn open(dwarf_path: PathBuf, tools: &ToolConfig) -> Result<Self, DsymError> {
        let output = run_tool(
            &tools.dwarfdump,
            [OsStr::new("-u"), dwarf_path.as_os_str()],
            tools.timeout,
        )
        .map_err(|err| DsymError::new(DsymErrorKind::CouldNotReadArchitectures, err))?;

        if !output.status.success() {
            return Err(DsymErrorKind::CouldNotReadArchitectures.into());
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|err| DsymError::new(DsymErrorKind::CouldNotReadArchitectures, err))?;

        let architectures = parse_architectures(&text);
        if architectures.len() != EXPECTED_SLICE_COUNT {
            return Err(DsymErrorKind::UnexpectedArchitectureCount(architectures.len()).into());
        }

        let file_name = dwarf_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!(path = %dwarf_path.display(), "opened debug-symbol archive");
        Ok(DebugArchive {
            dwarf_path,
            file_name,
            architectures,
        })
    }

    /// Path of the DWARF binary.
    pub fn dwarf_path(&self) -> &Path {
        &self.dwarf_path
    }

    /// File name of the DWARF binary, as the resolver tool echoes it.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Architecture of the slice with the given image UUID.
    pub fn architecture(&self, image_uuid: Uuid) -> Option<&str> {
        self.architectures.get(&image_uuid).map(String::as_str)
    }

    /// All slices of this archive.
    pub fn architectures(&self) -> &ArchitectureMap {
        &self.architectures
    }
}

/// Locates and opens the debug-symbol archive for a build.
///
/// For a [`Search`](ArchiveSource::Search) source this validates the roots,
/// runs the ranked search, extracts a zipped archive if no expanded one is
/// present, and drills into the dSYM bundle. The caller (normally the
/// registry) is responsible for running this at most once per build.
pub fn locate(
    build: &str,
    source: &ArchiveSource,
    tools: &ToolConfig,
) -> Result<DebugArchive, DsymError> {
    match source {
        ArchiveSource::Direct {
            path_pattern,
            placeholder,
        } => {
            let path = PathBuf::from(render_pattern(path_pattern, placeholder, build));
            DebugArchive::open(path, tools)
        }
        ArchiveSource::Search(config) => {
            let archive_root = search_archive(build, config, tools)?;
            let dwarf_path = drill_into_dsym(&archive_root)?;
            DebugArchive::open(dwarf_path, tools)
        }
    }
}

fn search_archive(
    build: &str,
    config: &SearchConfig,
    tools: &ToolConfig,
) -> Result<PathBuf, DsymError> {
    for root in &config.roots {
        if !root.is_dir() {
            return Err(DsymErrorKind::RootDirectoryInvalid(root.clone()).into());
        }
    }

    let expected = render_pattern(&config.archive_pattern, &config.placeholder, build);
    debug!(archive = %expected, "searching for debug-symbol archive");

    if let Some(expanded) = expected.strip_suffix(".zip") {
        // An already expanded archive saves the extraction round trip.
        if let Some(found) = find_file(&config.roots, expanded, build) {
            return Ok(found);
        }
        let zip = find_file(&config.roots, &expected, build)
            .ok_or(DsymErrorKind::ArchiveNotFound(expected.clone()))?;
        return extract_archive(&zip, tools);
    }

    let found =
        find_file(&config.roots, &expected, build).ok_or(DsymErrorKind::ArchiveNotFound(expected))?;
    Ok(found)
}

/// Substitutes the build identifier for the placeholder token.
fn render_pattern(pattern: &str, placeholder: &str, build: &str) -> String {
    pattern.replace(placeholder, build)
}

/// Ranked depth-first search for a file with the expected name.
///
/// The work list starts with the roots in configuration order. At every
/// directory, children whose names contain the build identifier are
/// visited before the rest, with ties keeping listing order. The first
/// child matching the expected name wins. `.app` and `.framework` bundles
/// are opaque: they are never descended into, so embedded debug info
/// cannot shadow the archive proper.
fn find_file(roots: &[PathBuf], expected: &str, build: &str) -> Option<PathBuf> {
    const OPAQUE_EXTENSIONS: &[&str] = &["app", "framework"];

    let mut work: Vec<PathBuf> = roots.iter().rev().cloned().collect();
    while let Some(dir) = work.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            trace!(dir = %dir.display(), "skipping unreadable directory");
            continue;
        };

        let mut children: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        // Stable sort, so ties keep listing order.
        children.sort_by_key(|path| !name_contains(path, build));

        let mut subdirectories = Vec::new();
        for child in children {
            if child.file_name() == Some(OsStr::new(expected)) {
                return Some(child);
            }
            if child.is_dir() && !has_extension_in(&child, OPAQUE_EXTENSIONS) {
                subdirectories.push(child);
            }
        }

        // The work list pops from the end; push in reverse so the highest
        // ranked child is expanded first.
        work.extend(subdirectories.into_iter().rev());
    }

    None
}

fn name_contains(path: &Path, needle: &str) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.contains(needle))
}

fn has_extension_in(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|extension| extensions.contains(&extension))
}

/// Fixed destination all zipped archives are extracted into.
fn extraction_dir() -> PathBuf {
    env::temp_dir().join("xplcrash")
}

fn extract_archive(zip: &Path, tools: &ToolConfig) -> Result<PathBuf, DsymError> {
    let destination = extraction_dir();
    debug!(zip = %zip.display(), destination = %destination.display(), "extracting archive");

    let output = run_tool(
        &tools.unzip,
        [
            OsStr::new("-o"),
            zip.as_os_str(),
            OsStr::new("-d"),
            destination.as_os_str(),
        ],
        tools.timeout,
    )
    .map_err(|err| DsymError::new(DsymErrorKind::ArchiveNotExtractable, err))?;

    // Exit code 1 covers warnings such as entries that already existed
    // from a previous extraction.
    if !matches!(output.status.code(), Some(0) | Some(1)) {
        return Err(DsymErrorKind::ArchiveNotExtractable.into());
    }

    let base = zip.file_stem().ok_or(DsymErrorKind::ArchiveNotExtractable)?;
    Ok(destination.join(base))
}

/// Descends `dSYMs/<first>/Contents/Resources/DWARF/<first>` inside an
/// expanded archive. Each level normally holds exactly one entry.
fn drill_into_dsym(archive_root: &Path) -> Result<PathBuf, DsymError> {
    let bundle =
        first_entry(&archive_root.join("dSYMs")).ok_or(DsymErrorKind::ArchiveMissingSymbols)?;
    let dwarf_dir = bundle.join("Contents").join("Resources").join("DWARF");
    let dwarf = first_entry(&dwarf_dir).ok_or(DsymErrorKind::ArchiveMissingSymbols)?;
    Ok(dwarf)
}

fn first_entry(dir: &Path) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .next()
}

/// Parses architecture-dump output into an [`ArchitectureMap`].
///
/// Expected shape per entry: `UUID: <hyphenated-hex-uuid> (<arch>) <path>`.
/// Lines that do not match are skipped.
fn parse_architectures(output: &str) -> ArchitectureMap {
    let mut architectures = ArchitectureMap::new();
    for line in output.lines() {
        let Some(rest) = line.trim_start().strip_prefix("UUID:") else {
            continue;
        };
        let mut tokens = rest.split_whitespace();
        let Some(uuid) = tokens.next().and_then(|token| Uuid::parse_str(token).ok()) else {
            continue;
        };
        let Some(architecture) = tokens
            .next()
            .and_then(|token| token.strip_prefix('('))
            .and_then(|token| token.strip_suffix(')'))
        else {
            continue;
        };
        architectures.insert(uuid, architecture.to_owned());
    }
    architectures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_architectures() {
        let output = "\
UUID: C8374B6D-6E96-34D8-AE38-EFAA5FEC424F (arm64) /archives/MyApp.dSYM/Contents/Resources/DWARF/MyApp
UUID: 1B4E42E1-6A21-3F9C-8E01-0A9E62D47C11 (x86_64) /archives/MyApp.dSYM/Contents/Resources/DWARF/MyApp
";
        let architectures = parse_architectures(output);
        assert_eq!(architectures.len(), 2);

        let uuid = Uuid::parse_str("C8374B6D-6E96-34D8-AE38-EFAA5FEC424F").unwrap();
        assert_eq!(architectures.get(&uuid).map(String::as_str), Some("arm64"));
    }

    #[test]
    fn test_parse_architectures_skips_noise() {
        let output = "\
----------------------------------------
File: /archives/MyApp (arm64)
UUID: C8374B6D-6E96-34D8-AE38-EFAA5FEC424F (arm64) /archives/MyApp
UUID: not-a-uuid (arm64) /archives/MyApp
UUID: 1B4E42E1-6A21-3F9C-8E01-0A9E62D47C11 broken-line
";
        let architectures = parse_architectures(output);
        assert_eq!(architectures.len(), 1);
    }

    #[test]
    fn test_render_pattern() {
        assert_eq!(
            render_pattern("MyApp-$BUILD.xcarchive.zip", BUILD_PLACEHOLDER, "5437"),
            "MyApp-5437.xcarchive.zip"
        );
    }

    #[test]
    fn test_find_file_ranks_build_matches_first() {
        let root = tempfile::tempdir().unwrap();
        // Both subdirectories contain a file with the expected name; the
        // one mentioning the build must be expanded first.
        for dir in ["unrelated", "builds-42"] {
            fs::create_dir(root.path().join(dir)).unwrap();
            fs::write(root.path().join(dir).join("MyApp-42.xcarchive"), b"").unwrap();
        }

        let found = find_file(&[root.path().to_path_buf()], "MyApp-42.xcarchive", "42").unwrap();
        assert_eq!(found, root.path().join("builds-42").join("MyApp-42.xcarchive"));
    }

    #[test]
    fn test_find_file_does_not_descend_into_bundles() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("Sample.app")).unwrap();
        fs::write(root.path().join("Sample.app").join("DeepFile-42.zip"), b"").unwrap();
        fs::create_dir(root.path().join("other")).unwrap();
        fs::write(root.path().join("other").join("DeepFile-42.zip"), b"").unwrap();

        let found = find_file(&[root.path().to_path_buf()], "DeepFile-42.zip", "42").unwrap();
        assert_eq!(found, root.path().join("other").join("DeepFile-42.zip"));
    }

    #[test]
    fn test_find_file_exact_name_beats_other_builds() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("foo-99.zip"), b"").unwrap();
        fs::write(root.path().join("foo-42.zip"), b"").unwrap();

        let found = find_file(&[root.path().to_path_buf()], "foo-42.zip", "42").unwrap();
        assert_eq!(found, root.path().join("foo-42.zip"));
    }

    #[test]
    fn test_find_file_misses() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("MyApp-99.xcarchive.zip"), b"").unwrap();

        assert!(find_file(&[root.path().to_path_buf()], "MyApp-42.xcarchive.zip", "42").is_none());
    }
}
