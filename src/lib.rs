//! Real-time voice support calls for the GeoNet network simulator.
//!
//! A [`controller::CallController`] owns one call at a time: it captures the
//! microphone, streams PCM to a live voice session, and plays the agent's
//! replies back gaplessly on an output clock.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod net_link;
pub mod profile;
pub mod protocol;
