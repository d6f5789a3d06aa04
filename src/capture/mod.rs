//! Landmark input and feature extraction
//!
//! Landmark detection itself happens outside the crate; this module defines
//! the frame record, where frames come from, and how they become features.

pub mod features;
pub mod landmarks;
pub mod source;

pub use features::{FeatureExtractor, FeatureVector, FEATURE_SCHEMA_VERSION};
pub use landmarks::{FaceLandmarks, Landmark, LandmarkFrame, LandmarkLayout};
pub use source::{JsonLinesSource, LandmarkSource, ScriptedSource};
