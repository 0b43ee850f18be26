//! Typed payload structs for multi-field message bodies.
//!
//! The frame header identifies the payload layout, so bodies carry no type
//! tag of their own. Single trailing-string bodies are packed inline at
//! call sites with [`crate::FrameBuilder`]; everything with more than one
//! field gets a struct here with `to_frame`/`from_frame`.

pub mod chub;
pub mod ice;
pub mod plink;
