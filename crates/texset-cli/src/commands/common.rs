//! Shared CLI helpers used across multiple commands.

use std::path::Path;

use texset_core::{CompilerArgs, PackingError, validate_definition};

use crate::definition::LoadedDefinition;

/// Load a definition and turn it into compiler arguments.
pub fn load_args(path: &Path) -> anyhow::Result<(LoadedDefinition, CompilerArgs)> {
    let loaded = LoadedDefinition::load(path)?;
    let args = loaded.compiler_args()?;
    Ok((loaded, args))
}

/// Every problem with the definition behind `args`.
pub fn definition_errors(args: &CompilerArgs) -> Vec<PackingError> {
    validate_definition(&args.module_info, &args.packing_info)
}

/// Print problems to stderr, one per line.
pub fn print_errors(errors: &[PackingError]) {
    for error in errors {
        eprintln!("  error: {error}");
    }
}

/// Format a vec4 for display.
pub fn format_vec4(v: [f32; 4]) -> String {
    format!("({:.4}, {:.4}, {:.4}, {:.4})", v[0], v[1], v[2], v[3])
}
