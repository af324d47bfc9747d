//! Symbolication for PLCrash-style crash reports.
//!
//! Turning the raw instruction pointers of a parsed crash report back into
//! function names takes four steps, each owned by one module here:
//!
//! 1. [`dsym`] locates the debug-symbol archive matching the report's
//!    build (searching the configured roots, extracting a zipped archive
//!    when necessary) and reads the architectures it contains.
//! 2. [`symbolize`] resolves batches of addresses against that archive by
//!    invoking the system resolver tool, and caches every answer so a
//!    `(image, address)` pair is resolved at most once.
//! 3. [`registry`] shares one caching resolver per build identifier, so
//!    the locate step also runs at most once per build.
//! 4. [`annotate`] drives the above over every stack frame of a report.
//!
//! All work is synchronous and blocking; external tools are configured
//! through [`tools::ToolConfig`] and invoked with captured output and a
//! bounded timeout.
//!
//! ```no_run
//! use xplcrash_report::CrashReport;
//! use xplcrash_symbolicate::{
//!     annotate_report, AnnotateOptions, ArchiveSource, SearchConfig, SymbolizerRegistry,
//!     ToolConfig, BUILD_PLACEHOLDER,
//! };
//!
//! # fn run(report: &mut CrashReport) -> Result<(), Box<dyn std::error::Error>> {
//! let tools = ToolConfig::default();
//! tools.verify()?;
//!
//! let registry = SymbolizerRegistry::new(
//!     ArchiveSource::Search(SearchConfig {
//!         roots: vec!["/Volumes/Archives".into()],
//!         archive_pattern: format!("MyApp-{BUILD_PLACEHOLDER}.xcarchive.zip"),
//!         placeholder: BUILD_PLACEHOLDER.to_owned(),
//!     }),
//!     tools,
//! );
//!
//! let symbolizer = registry.symbolizer_for(report)?;
//! annotate_report(report, symbolizer.as_ref(), AnnotateOptions::default())?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod annotate;
pub mod dsym;
pub mod registry;
pub mod symbolize;
pub mod tools;

pub use crate::annotate::{annotate_report, AnnotateOptions, UNRESOLVED_SYMBOL};
pub use crate::dsym::{
    ArchitectureMap, ArchiveSource, DebugArchive, DsymError, DsymErrorKind, SearchConfig,
    BUILD_PLACEHOLDER,
};
pub use crate::registry::{RegistryError, SharedSymbolizer, SymbolizerRegistry};
pub use crate::symbolize::{CachingSymbolizer, DsymSymbolizer, Symbolize, SymbolizeError};
pub use crate::tools::{ToolConfig, ToolConfigError};
