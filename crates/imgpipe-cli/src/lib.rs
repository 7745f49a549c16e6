// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Shared library surface for the image pipeline CLI binary.

pub mod commands;
pub mod config;
pub mod format;
