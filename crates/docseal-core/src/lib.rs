//! Core library for `DocSeal`.
//!
//! Contains the placeholder grammar, template scanner, field schema,
//! rich-text converter, document generator, PDF export, signer
//! credentials, signing state machine, audit system, and the template and
//! document services. This crate depends on `docseal-storage` for the
//! storage backend trait and knows nothing about HTTP.

pub mod audit;
pub mod audit_file;
pub mod blob;
pub mod catalog;
pub mod clock;
pub mod credentials;
pub mod documents;
pub mod docx;
pub mod error;
pub mod generator;
pub mod pdf;
pub mod placeholder;
pub mod richtext;
pub mod scanner;
pub mod schema;
pub mod signature_group;
pub mod signing;
pub mod templates;
