//! Keystroke injection through the HID keyboard function
//!
//! Payload documents are parsed into tokens when loaded, compiled into
//! press/release events, and played as 8-byte boot keyboard reports.

pub mod executor;
pub mod keymap;
pub mod library;
pub mod parser;
pub mod report;
pub mod types;

pub use executor::{HidgSink, KeystrokeService, ReportSink};
pub use library::{LoadedPayload, PayloadLibrary};
pub use parser::parse_script;
pub use report::{compile, compile_text, KeyboardReport};
pub use types::{
    ExecutionState, HidError, KeyEvent, PayloadDocument, PayloadExecution, PayloadSummary,
    PayloadToken,
};
