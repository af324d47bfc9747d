//! Address resolution through debug symbols.
//!
//! [`Symbolize`] is the capability of turning stack addresses inside one
//! binary image into symbol names. [`DsymSymbolizer`] implements it by
//! shelling out to the system resolver tool against an opened
//! [`DebugArchive`]; [`CachingSymbolizer`] wraps any implementation and
//! memoizes results so repeated lookups never spawn the tool twice.

use std::collections::HashMap;
use std::error::Error;
use std::ffi::OsString;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::dsym::DebugArchive;
use crate::tools::{run_tool, ToolConfig};

/// The error type for address resolution.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SymbolizeError {
    /// The requested image UUID has no slice in the debug-symbol archive.
    #[error("image {0} not found in debug-symbol archive")]
    ImageArchitectureUnknown(Uuid),

    /// The resolver tool failed or produced output that could not be
    /// decoded.
    #[error("symbolication tool output not readable")]
    ResolverOutputUnreadable(#[source] Option<Box<dyn Error + Send + Sync + 'static>>),
}

/// Resolves stack addresses inside one binary image to symbol names.
///
/// The returned list corresponds positionally to the requested addresses;
/// implementations must preserve both length and order.
pub trait Symbolize {
    /// Resolves `stack_addresses` within the image identified by
    /// `image_uuid`, loaded at `image_load_address`.
    fn symbolize(
        &self,
        image_uuid: Uuid,
        image_load_address: u64,
        stack_addresses: &[u64],
    ) -> Result<Vec<String>, SymbolizeError>;
}

/// A [`Symbolize`] implementation backed by a [`DebugArchive`].
///
/// Every call spawns the resolver tool exactly once, batching all
/// requested addresses into a single invocation.
#[derive(Debug)]
pub struct DsymSymbolizer {
    archive: DebugArchive,
    tools: ToolConfig,
}

impl DsymSymbolizer {
    /// Creates a symbolizer over an opened archive.
    pub fn new(archive: DebugArchive, tools: ToolConfig) -> Self {
        DsymSymbolizer { archive, tools }
    }

    /// The archive this symbolizer resolves against.
    pub fn archive(&self) -> &DebugArchive {
        &self.archive
    }
}

impl Symbolize for DsymSymbolizer {
    fn symbolize(
        &self,
        image_uuid: Uuid,
        image_load_address: u64,
        stack_addresses: &[u64],
    ) -> Result<Vec<String>, SymbolizeError> {
        let architecture = self
            .archive
            .architecture(image_uuid)
            .ok_or(SymbolizeError::ImageArchitectureUnknown(image_uuid))?;

        // The resolver tool drops into interactive mode when invoked
        // without addresses.
        if stack_addresses.is_empty() {
            return Ok(Vec::new());
        }

        let mut args: Vec<OsString> = vec![
            OsString::from("-o"),
            self.archive.dwarf_path().as_os_str().to_owned(),
            OsString::from("-arch"),
            OsString::from(architecture),
            OsString::from("-l"),
            OsString::from(format!("{image_load_address:#x}")),
        ];
        args.extend(
            stack_addresses
                .iter()
                .map(|address| OsString::from(format!("{address:#x}"))),
        );

        debug!(image = %image_uuid, count = stack_addresses.len(), "resolving addresses");
        let output = run_tool(&self.tools.atos, &args, self.tools.timeout)
            .map_err(|err| SymbolizeError::ResolverOutputUnreadable(Some(Box::new(err))))?;
        let text = String::from_utf8(output.stdout)
            .map_err(|err| SymbolizeError::ResolverOutputUnreadable(Some(Box::new(err))))?;

        // One output line per requested address, with the tool's trailing
        // "(in <file>)" annotation removed.
        let noise = format!(" (in {})", self.archive.file_name());
        let symbols: Vec<String> = text.lines().map(|line| line.replace(&noise, "")).collect();
        if symbols.len() != stack_addresses.len() {
            return Err(SymbolizeError::ResolverOutputUnreadable(None));
        }

        Ok(symbols)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    image_uuid: Uuid,
    image_load_address: u64,
    stack_address: u64,
}

/// A caching decorator over any [`Symbolize`] implementation.
///
/// Results are memoized by `(image UUID, load address, stack address)`. A
/// batch request delegates at most one call to the wrapped symbolizer,
/// containing only the addresses missing from the cache, and splices the
/// answers back into request order. Entries are never evicted: a
/// symbolizer is scoped to a single build, so entries cannot go stale.
#[derive(Debug)]
pub struct CachingSymbolizer<S> {
    inner: S,
    cache: Mutex<HashMap<CacheKey, String>>,
}

impl<S: Symbolize> CachingSymbolizer<S> {
    /// Wraps a symbolizer.
    pub fn new(inner: S) -> Self {
        CachingSymbolizer {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped symbolizer.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Symbolize> Symbolize for CachingSymbolizer<S> {
    fn symbolize(
        &self,
        image_uuid: Uuid,
        image_load_address: u64,
        stack_addresses: &[u64],
    ) -> Result<Vec<String>, SymbolizeError> {
        let mut symbols = Vec::with_capacity(stack_addresses.len());
        let mut missing = Vec::new();

        {
            let cache = self.cache.lock();
            for (index, &stack_address) in stack_addresses.iter().enumerate() {
                let key = CacheKey {
                    image_uuid,
                    image_load_address,
                    stack_address,
                };
                match cache.get(&key) {
                    Some(symbol) => symbols.push(symbol.clone()),
                    None => {
                        missing.push((index, stack_address));
                        symbols.push(String::new());
                    }
                }
            }
        }

        if missing.is_empty() {
            return Ok(symbols);
        }

        // The lock is not held across the delegated call; resolving can
        // spawn an external process.
        let addresses: Vec<u64> = missing.iter().map(|&(_, address)| address).collect();
        let resolved = self
            .inner
            .symbolize(image_uuid, image_load_address, &addresses)?;

        let mut cache = self.cache.lock();
        for (&(index, stack_address), symbol) in missing.iter().zip(resolved) {
            let key = CacheKey {
                image_uuid,
                image_load_address,
                stack_address,
            };
            cache.insert(key, symbol.clone());
            symbols[index] = symbol;
        }

        Ok(symbols)
    }
}
