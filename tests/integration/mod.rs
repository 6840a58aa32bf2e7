//! Integration Tests Module
//!
//! End-to-end runs of the reading workflow against scripted model providers
//! and a deterministic local embedder. No network access is needed.

// Shared providers, documents, and app-state builders
mod support;

// Full run from raw text to written report and artifacts
mod end_to_end_test;

// Vector store persistence across reopen
mod vector_store_test;

// Failure, resume, and fresh-run behavior of the checkpointed driver
mod resume_test;

// Provider reachability checks run before a command starts
mod health_check_test;
