//! The crash-report object graph.
//!
//! These types mirror what the external binary report decoder produces:
//! process and system metadata, the list of loaded binary images, and one
//! call stack per thread plus an optional one attached to the exception
//! record. The symbolication subsystem only ever reads this graph; the
//! single field it fills in is [`StackFrame::symbolized_name`].

use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A parsed crash report.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct CrashReport {
    /// Identifier of this report, assigned by the reporter at crash time.
    pub uuid: Option<String>,
    /// Operating system the process crashed on.
    pub system_info: Option<SystemInfo>,
    /// Hardware the process crashed on.
    pub machine_info: Option<MachineInfo>,
    /// The crashed application, including its build number.
    pub application_info: Option<ApplicationInfo>,
    /// The crashed process.
    pub process_info: Option<ProcessInfo>,
    /// The POSIX signal that terminated the process.
    pub signal_info: Option<SignalInfo>,
    /// The Mach exception that terminated the process, if any.
    pub mach_exception_info: Option<MachExceptionInfo>,
    /// The uncaught language exception, if the crash was one.
    pub exception_info: Option<ExceptionInfo>,
    /// All threads of the crashed process, with their call stacks.
    pub threads: Vec<ThreadInfo>,
    /// All binary images loaded into the crashed process.
    pub images: Vec<BinaryImage>,
}

impl CrashReport {
    /// The build identifier of the crashed application.
    ///
    /// This is the key under which the matching debug-symbol archive is
    /// located and under which symbolizers are shared.
    pub fn build_identifier(&self) -> Option<&str> {
        self.application_info.as_ref()?.version.as_deref()
    }

    /// Returns the image whose address range contains `address`.
    ///
    /// Images define half-open `[base, base + size)` ranges. When ranges
    /// overlap, the first matching image in report order wins; the decoder
    /// gives no stronger ordering contract.
    pub fn image_for_address(&self, address: u64) -> Option<&BinaryImage> {
        self.images.iter().find(|image| image.contains(address))
    }

    /// Iterates over every call stack recorded in this report: one per
    /// thread, followed by the exception stack if present.
    pub fn call_stacks(&self) -> impl Iterator<Item = StackSource<'_>> {
        self.threads
            .iter()
            .map(StackSource::Thread)
            .chain(self.exception_info.iter().map(StackSource::Exception))
    }

    /// Iterates mutably over every stack frame, in [`call_stacks`] order.
    ///
    /// [`call_stacks`]: Self::call_stacks
    pub fn frames_mut(&mut self) -> impl Iterator<Item = &mut StackFrame> {
        self.threads
            .iter_mut()
            .flat_map(|thread| thread.frames.iter_mut())
            .chain(
                self.exception_info
                    .iter_mut()
                    .flat_map(|exception| exception.frames.iter_mut()),
            )
    }
}

/// One call stack of a crash report.
///
/// The decoder attaches stacks to threads and, for uncaught exceptions, to
/// the exception record itself. This is the closed set of stack owners;
/// consumers match on the variant rather than probing node types.
#[derive(Clone, Copy, Debug)]
pub enum StackSource<'a> {
    /// The stack belongs to a thread.
    Thread(&'a ThreadInfo),
    /// The stack belongs to the uncaught exception record.
    Exception(&'a ExceptionInfo),
}

impl<'a> StackSource<'a> {
    /// The frames of this stack, innermost first.
    pub fn frames(&self) -> &'a [StackFrame] {
        match *self {
            StackSource::Thread(thread) => &thread.frames,
            StackSource::Exception(exception) => &exception.frames,
        }
    }
}

/// Operating system information.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct SystemInfo {
    /// Version of the operating system.
    pub os_version: Option<String>,
    /// Build number of the operating system.
    pub os_build: Option<String>,
    /// Architecture the report was generated on.
    pub architecture: Option<String>,
    /// Time of the crash.
    pub timestamp: Option<String>,
}

/// Hardware information.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct MachineInfo {
    /// Hardware model name, such as `MacBookPro18,3`.
    pub model_name: Option<String>,
    /// The processor of the machine.
    pub processor: Option<ProcessorInfo>,
    /// Number of physical processor cores.
    pub processor_count: Option<u32>,
    /// Number of logical processor cores.
    pub logical_processor_count: Option<u32>,
}

/// Processor information.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ProcessorInfo {
    /// Raw CPU type as recorded by the reporter.
    pub cpu_type: Option<u64>,
    /// Raw CPU subtype as recorded by the reporter.
    pub cpu_subtype: Option<u64>,
    /// Architecture name derived from the CPU type, such as `arm64`.
    pub architecture: Option<String>,
}

/// Application metadata.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ApplicationInfo {
    /// Bundle identifier of the application.
    pub identifier: Option<String>,
    /// Build number of the application, such as `5437`.
    pub version: Option<String>,
    /// User-facing version of the application, such as `2.1`.
    pub marketing_version: Option<String>,
}

/// Process metadata.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ProcessInfo {
    /// Name of the crashed process.
    pub process_name: Option<String>,
    /// Process identifier.
    pub process_id: Option<u64>,
    /// Start time of the process.
    pub process_start_time: Option<String>,
    /// Whether the process ran natively on the host architecture.
    pub native: Option<bool>,
}

/// The POSIX signal that terminated the process.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct SignalInfo {
    /// Signal name, such as `SIGSEGV`.
    pub name: Option<String>,
    /// Signal code, such as `SEGV_MAPERR`.
    pub code: Option<String>,
    /// Faulting address.
    pub address: Option<u64>,
}

/// The Mach exception that terminated the process.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct MachExceptionInfo {
    /// Mach exception type.
    pub exception_type: Option<u64>,
    /// Mach exception codes.
    pub codes: Vec<i64>,
}

/// An uncaught language exception and its call stack.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ExceptionInfo {
    /// Name of the exception, such as `NSRangeException`.
    pub name: Option<String>,
    /// Human-readable reason for the exception.
    pub reason: Option<String>,
    /// Call stack captured when the exception was raised, innermost first.
    pub frames: Vec<StackFrame>,
}

/// One thread of the crashed process.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ThreadInfo {
    /// Thread number assigned by the reporter.
    pub number: u64,
    /// Whether this thread caused the crash.
    pub crashed: bool,
    /// Call stack of this thread, innermost first.
    pub frames: Vec<StackFrame>,
    /// Register state at crash time. Only recorded for the crashed thread.
    pub registers: Vec<RegisterInfo>,
}

/// A single CPU register and its value.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct RegisterInfo {
    /// Register name, such as `x0` or `pc`.
    pub name: String,
    /// Register value.
    pub value: u64,
}

/// One frame of a call stack.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct StackFrame {
    /// Instruction pointer of this frame.
    pub instruction_pointer: u64,
    /// Symbol information recorded by the reporter at crash time, if any.
    pub symbol: Option<SymbolInfo>,
    /// Symbol name resolved from debug symbols after the fact.
    ///
    /// Filled in by the symbolication pass; absent on freshly decoded
    /// reports.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub symbolized_name: Option<String>,
}

/// Symbol information recorded in the report itself.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct SymbolInfo {
    /// Name of the symbol.
    pub name: Option<String>,
    /// Start address of the symbol.
    pub start_address: u64,
    /// End address of the symbol, if known.
    pub end_address: Option<u64>,
}

/// One binary image loaded into the crashed process.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct BinaryImage {
    /// File name or path of the image.
    pub name: Option<String>,
    /// UUID of the image, matching a slice of the debug-symbol archive.
    ///
    /// Decoders emit this either hyphenated or as bare 32-digit hex; both
    /// forms parse into the same [`Uuid`].
    pub uuid: Option<Uuid>,
    /// Address the image was loaded at.
    pub base_address: u64,
    /// Size of the image in bytes.
    pub size: u64,
}

impl BinaryImage {
    /// Whether `address` falls into this image's half-open address range.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base_address && address - self.base_address < self.size
    }
}
