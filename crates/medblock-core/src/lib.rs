//! Core types and trait definitions for the MedBlock patient records store.
//!
//! This crate is deliberately free of database and transport dependencies.
//! Storage backends implement [`engine::Engine`] and the session built on top
//! of it implements [`store::PatientStore`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod engine;
pub mod error;
pub mod patient;
pub mod store;
pub mod validate;

pub use error::{Error, InitError, InitStage, Result};
pub use validate::ValidationError;
