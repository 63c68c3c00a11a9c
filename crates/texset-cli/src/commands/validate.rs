//! Definition validation command.

use std::path::PathBuf;

use clap::Args;

use super::common::{definition_errors, load_args, print_errors};

#[derive(Args)]
pub struct ValidateArgs {
    /// Definition file (TOML)
    #[arg(value_name = "DEFINITION")]
    definition: PathBuf,
}

pub fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let (loaded, compiler_args) = load_args(&args.definition)?;
    let errors = definition_errors(&compiler_args);

    if errors.is_empty() {
        println!(
            "{}: ok ({} modules, {} packed textures)",
            loaded.definition.name,
            loaded.definition.modules.len(),
            compiler_args.packing_info.num_textures()
        );
        return Ok(());
    }

    eprintln!("{}:", loaded.definition.name);
    print_errors(&errors);
    anyhow::bail!("{} problem(s) found", errors.len())
}
