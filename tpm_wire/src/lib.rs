// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TPM 2.0 wire model for the proxy: envelope headers, explicit marshalling
//! plans, and the rough command/response parser.
//!
//! The parser decomposes a captured command/response pair into header, handle
//! area, authorization area, and parameter area, and records the byte offset
//! at which each frame's parameter area begins. A caller that mutates only
//! parameter fields can rebuild a valid frame by concatenating the recorded
//! prefix with a fresh marshal of the mutated fields; the prefix is always a
//! verbatim copy of the captured bytes.

pub mod commands;
pub mod marshal;
pub mod parse;
pub mod structures;
pub mod types;
