//! Definition inspection command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use texset_core::{Compiler, TextureSetModule};

use super::common::{definition_errors, load_args, print_errors};

#[derive(Args)]
pub struct InfoArgs {
    /// Definition file (TOML)
    #[arg(value_name = "DEFINITION")]
    definition: PathBuf,
}

pub fn run(args: InfoArgs) -> anyhow::Result<()> {
    let (loaded, compiler_args) = load_args(&args.definition)?;
    let def = &loaded.definition;

    println!("Texture set: {}", def.name);
    if !def.user_key.is_empty() {
        println!("  user key: {}", def.user_key);
    }
    if def.default_texture_set {
        println!("  default texture set");
    }

    println!("\nModules:");
    for module in &def.modules {
        println!("  {}", module.name());
    }

    println!("\nProcessed textures:");
    for (name, texture) in compiler_args.module_info.processed_textures() {
        println!(
            "  {:<20} {} ch  {:?}  {:?}",
            name, texture.channel_count, texture.encoding, texture.flags
        );
    }

    let parameters = compiler_args.module_info.parameter_names();
    if !parameters.is_empty() {
        println!("\nParameters:");
        for name in &parameters {
            println!("  {name}");
        }
    }

    let errors = definition_errors(&compiler_args);
    if !errors.is_empty() {
        println!("\nPacking is invalid:");
        print_errors(&errors);
        return Ok(());
    }

    let compiler = Compiler::new(Arc::new(compiler_args));
    let packing = &compiler.args().packing_info;
    println!("\nPacked textures:");
    for i in 0..packing.num_textures() {
        let packed = packing.texture_def(i);
        let info = packing.texture_info(i);
        let sources: Vec<&str> = packed
            .sources
            .iter()
            .map(|s| s.as_deref().unwrap_or("-"))
            .collect();
        println!("  {}", compiler.args().texture_name(i));
        println!("    channels:    [{}]", sources.join(", "));
        println!("    compression: {:?}", packed.compression);
        println!("    flags:       {:?}", info.flags);
        println!("    srgb:        {}", info.hardware_srgb);
        println!("    data id:     {}", compiler.texture_data_id(i));
    }

    let ids: Vec<_> = compiler
        .parameter_names()
        .filter_map(|name| compiler.parameter_data_id(name).map(|id| (name, id)))
        .collect();
    if !ids.is_empty() {
        println!("\nParameter ids:");
        for (name, id) in ids {
            println!("  {name:<24} {id}");
        }
    }

    Ok(())
}
