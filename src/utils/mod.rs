//! Utility modules supporting search and download operations.
//!
//! - [`HttpClient`]: HTTP client with configured timeouts and user agent
//! - [`normalize_doi`]: Validate and clean a DOI
//! - [`pdf_file_name`]: Deterministic file name for an identifier
//! - [`load_identifiers`]: Read identifiers from arguments and a list file
//! - [`split_command_line`]: Quote-aware command line splitting
//!
//! # File Naming
//!
//! ```rust
//! use papergrab::utils::pdf_file_name;
//!
//! assert_eq!(pdf_file_name("10.1016/j.ssci.2023.106"), "10.1016_j.ssci.2023.106.pdf");
//! ```

mod http;
mod validate;

pub use http::HttpClient;
pub use validate::{
    clean_identifier, file_stem_for, load_identifiers, normalize_doi, pdf_file_name,
    split_command_line, ValidationError,
};
