//! Outer surfaces: bulk import/export formats for the CLI.

pub mod csv;
