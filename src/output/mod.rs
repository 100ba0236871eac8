// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod json;
mod yaml;

pub use json::JsonFormatter;
pub use yaml::YamlFormatter;

use anyhow::Result;
use serde::Serialize;

use crate::cli::OutputFormat;

/// Render any operation result in the requested format
pub fn render<T: Serialize>(value: &T, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => JsonFormatter::format(value),
        OutputFormat::Yaml => YamlFormatter::format(value),
    }
}
