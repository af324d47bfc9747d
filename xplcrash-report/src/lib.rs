//! Data model and envelope handling for PLCrash-style crash reports.
//!
//! Crash reports arrive either as raw bytes understood by the external
//! binary report decoder, or wrapped in a compressed *envelope*: a 7-byte
//! ASCII magic prefix followed by a raw deflate stream (optionally preceded
//! by a textual header for diagnostic logs). The [`envelope`] module strips
//! and decompresses that wrapping.
//!
//! The [`report`] module contains the object graph the decoder produces:
//! threads, stack frames, binary images and process metadata. This crate
//! never constructs reports from raw bytes itself; decoding is the
//! collaborating decoder's job, and the model doubles as its boundary
//! (with the optional `serde` feature, the graph round-trips through the
//! decoder's JSON form).

#![warn(missing_docs)]

pub mod envelope;
pub mod report;

pub use crate::envelope::{compress, decompress, EnvelopeError};
pub use crate::report::{
    ApplicationInfo, BinaryImage, CrashReport, ExceptionInfo, MachExceptionInfo, MachineInfo,
    ProcessInfo, ProcessorInfo, RegisterInfo, SignalInfo, StackFrame, StackSource, SymbolInfo,
    SystemInfo, ThreadInfo,
};
