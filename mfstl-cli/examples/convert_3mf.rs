/// Example: convert a 3MF file with the library API and report what came out
///
/// Usage: cargo run --example convert_3mf -- path/to/model.3mf [out.stl]

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use mfstl_core::{parse_binary_stl, Converter};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("Usage: {} <3mf-file> [stl-file]", args[0]);
    }

    let input = PathBuf::from(&args[1]);
    let output = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| input.with_extension("stl"));

    let converter = Converter::default();
    let Some(stl) = converter.convert_path(&input)? else {
        bail!("{} contains no mesh data", input.display());
    };

    let decoded = parse_binary_stl(&stl)?;
    println!(
        "{} triangles ({} with zero normals), {} bytes",
        decoded.triangle_count(),
        decoded.degenerate_count(),
        stl.len()
    );

    std::fs::write(&output, &stl)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {}", output.display());
    Ok(())
}
