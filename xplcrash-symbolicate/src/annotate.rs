//! Symbolizing every stack frame of a crash report.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use xplcrash_report::{BinaryImage, CrashReport, StackFrame};

use crate::symbolize::{Symbolize, SymbolizeError};

/// Placeholder name for frames no symbol could be resolved for.
pub const UNRESOLVED_SYMBOL: &str = "???";

/// Options for [`annotate_report`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AnnotateOptions {
    /// Subtracted from every non-zero instruction pointer before lookup.
    ///
    /// Frames above the crashed one record return addresses, which point
    /// one instruction past the call site.
    pub ip_decrement: u64,
}

/// Fills [`symbolized_name`] for every frame of `report`.
///
/// Frame addresses are grouped by owning image and resolved with one
/// batched call per image. Frames whose address falls outside every image,
/// and frames in images the archive has no slice for, keep the
/// decoder-recorded symbol name or fall back to [`UNRESOLVED_SYMBOL`]; a
/// frame that cannot be resolved never fails the report.
///
/// [`symbolized_name`]: xplcrash_report::StackFrame::symbolized_name
pub fn annotate_report<S: Symbolize>(
    report: &mut CrashReport,
    symbolizer: &S,
    options: AnnotateOptions,
) -> Result<(), SymbolizeError> {
    let images = report.images.clone();

    // First pass: the distinct addresses of each image, in encounter
    // order.
    let mut batches: Vec<(Uuid, u64, Vec<u64>)> = Vec::new();
    let mut batch_index: HashMap<Uuid, usize> = HashMap::new();
    for stack in report.call_stacks() {
        for frame in stack.frames() {
            let address = adjusted(frame.instruction_pointer, options);
            let Some((uuid, base_address)) = owning_image(&images, address) else {
                continue;
            };
            let index = *batch_index.entry(uuid).or_insert_with(|| {
                batches.push((uuid, base_address, Vec::new()));
                batches.len() - 1
            });
            let addresses = &mut batches[index].2;
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
    }

    // One resolver batch per image. Images without a slice in the archive
    // (system libraries and the like) are skipped, not errors.
    let mut resolved: HashMap<(Uuid, u64), String> = HashMap::new();
    for (uuid, base_address, addresses) in batches {
        match symbolizer.symbolize(uuid, base_address, &addresses) {
            Ok(symbols) => {
                for (address, symbol) in addresses.into_iter().zip(symbols) {
                    resolved.insert((uuid, address), symbol);
                }
            }
            Err(SymbolizeError::ImageArchitectureUnknown(_)) => {
                debug!(image = %uuid, "image not present in debug-symbol archive");
            }
            Err(err) => return Err(err),
        }
    }

    // Second pass: write the names back.
    for frame in report.frames_mut() {
        let address = adjusted(frame.instruction_pointer, options);
        let symbol = owning_image(&images, address)
            .and_then(|(uuid, _)| resolved.get(&(uuid, address)))
            .filter(|symbol| !symbol.is_empty())
            .cloned();
        frame.symbolized_name = Some(symbol.unwrap_or_else(|| fallback_name(frame)));
    }

    Ok(())
}

fn adjusted(instruction_pointer: u64, options: AnnotateOptions) -> u64 {
    if instruction_pointer > 0 {
        instruction_pointer.saturating_sub(options.ip_decrement)
    } else {
        instruction_pointer
    }
}

/// The first image in report order whose range contains `address`.
fn owning_image(images: &[BinaryImage], address: u64) -> Option<(Uuid, u64)> {
    let image = images.iter().find(|image| image.contains(address))?;
    Some((image.uuid?, image.base_address))
}

fn fallback_name(frame: &StackFrame) -> String {
    frame
        .symbol
        .as_ref()
        .and_then(|symbol| symbol.name.clone())
        .unwrap_or_else(|| UNRESOLVED_SYMBOL.to_owned())
}
