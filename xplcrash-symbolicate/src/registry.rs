//! Sharing symbolizers across crash reports of the same build.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use xplcrash_report::CrashReport;

use crate::dsym::{self, ArchiveSource, DsymError};
use crate::symbolize::{CachingSymbolizer, DsymSymbolizer};
use crate::tools::ToolConfig;

/// The error type for obtaining a report's symbolizer.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The crash report does not carry an application build number, so the
    /// matching archive cannot even be looked for.
    #[error("crash report does not contain a build number")]
    BuildNumberMissing,

    /// Locating or opening the debug-symbol archive failed.
    #[error(transparent)]
    Dsym(#[from] DsymError),
}

/// A caching symbolizer bound to one build of the application.
pub type SharedSymbolizer = Arc<CachingSymbolizer<DsymSymbolizer>>;

/// Hands out one caching symbolizer per build identifier.
///
/// The expensive locate-and-open pipeline runs at most once per build;
/// every crash report of the same build shares the resulting symbolizer
/// and its cache. Entries persist until the registry is dropped, normally
/// at process exit. Failed resolutions are not recorded, so a later
/// request for the same build attempts resolution again.
pub struct SymbolizerRegistry {
    source: ArchiveSource,
    tools: ToolConfig,
    instances: Mutex<HashMap<String, SharedSymbolizer>>,
}

impl SymbolizerRegistry {
    /// Creates a registry that resolves archives from `source`.
    pub fn new(source: ArchiveSource, tools: ToolConfig) -> Self {
        SymbolizerRegistry {
            source,
            tools,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shared symbolizer for the build that produced `report`.
    ///
    /// The instance table's lock is held across archive resolution, so
    /// concurrent requests for the same build cannot race into resolving
    /// the archive twice.
    pub fn symbolizer_for(&self, report: &CrashReport) -> Result<SharedSymbolizer, RegistryError> {
        let build = report
            .build_identifier()
            .ok_or(RegistryError::BuildNumberMissing)?;

        let mut instances = self.instances.lock();
        if let Some(instance) = instances.get(build) {
            return Ok(Arc::clone(instance));
        }

        debug!(build, "resolving debug-symbol archive");
        let archive = dsym::locate(build, &self.source, &self.tools)?;
        let symbolizer = Arc::new(CachingSymbolizer::new(DsymSymbolizer::new(
            archive,
            self.tools.clone(),
        )));
        instances.insert(build.to_owned(), Arc::clone(&symbolizer));
        Ok(symbolizer)
    }
}
