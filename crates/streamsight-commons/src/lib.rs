//! # streamsight-commons
//!
//! Shared types and utilities for StreamSight.
//!
//! This crate provides the foundational pieces used across all StreamSight
//! crates (streamsight-query, streamsight-source, streamsight-live,
//! streamsight-api):
//! - Type-safe identifier wrappers: [`DatabaseName`], [`CollectionName`],
//!   [`CollectionKey`], [`DocId`]
//! - Dot-path document utilities: [`paths::get_path`], [`paths::set_path`],
//!   [`paths::delete_path`], [`paths::project_document`]
//! - Extended-JSON wire conversion for non-JSON-native scalars:
//!   [`ejson::to_wire`], [`ejson::from_wire`]

pub mod ejson;
pub mod models;
pub mod paths;

pub use ejson::WireError;
pub use models::{CollectionKey, CollectionName, DatabaseName, DocId};
