//! Unit tests for tunnel configuration.
//!
//! This module contains tests organised into:
//! - [`helpers`] - Shared fixtures and helper functions
//! - [`types_tests`] - Defaults, accessors and target kind selection
//! - [`validation`] - `TunnelConfig::validate` tests
//! - [`layer_precedence_tests`] - `MergeComposer` layer precedence tests
//! - [`loader_tests`] - `load_config` with a mocked environment

mod helpers;
