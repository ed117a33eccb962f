//! Integration test crate for motrack.
//!
//! This crate exists solely to hold cross-module scenarios: footage tracked
//! by background jobs feeding plane tracks, the solver and stabilization,
//! and documents surviving persistence in between.

#[cfg(test)]
mod scene;

#[cfg(test)]
mod tracking;

#[cfg(test)]
mod solving;

#[cfg(test)]
mod stabilization;

#[cfg(test)]
mod document;
