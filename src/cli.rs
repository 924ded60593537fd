//! Command-line arguments.

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about = "Caching front for the public holiday API")]
pub struct Args {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = TracingFormat::default())]
    pub tracing: TracingFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable, for local development.
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

impl Default for TracingFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            TracingFormat::Pretty
        } else {
            TracingFormat::Json
        }
    }
}
