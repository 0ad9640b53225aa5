//! Command-line front end for the mfstl converter.
//!
//! Usage:
//!   mfstl convert model.3mf [more.3mf ...] [-o out.stl]
//!   mfstl inspect model.3mf
//!   mfstl inspect part.stl

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use mfstl_core::{Converter, ConverterConfig};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod inspect;

pub use config::load_config;

#[derive(Debug, Parser)]
#[command(name = "mfstl", version, about = "Convert 3MF packages to binary STL")]
pub struct Cli {
    /// TOML file with converter settings
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Apply build-item and component transforms to vertex positions
    #[arg(long, global = true)]
    pub apply_transforms: bool,

    /// Maximum number of converted files kept in memory (0 disables caching)
    #[arg(long, global = true, value_name = "N")]
    pub cache_capacity: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert one or more 3MF files to binary STL
    Convert {
        #[arg(required = true, value_name = "INPUT")]
        inputs: Vec<PathBuf>,

        /// Output path (single input only); defaults to INPUT with a .stl extension
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },
    /// Summarize a 3MF package or binary STL file
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

impl Cli {
    /// Settings from `--config`, with command-line flags layered on top.
    pub fn converter_config(&self) -> Result<ConverterConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ConverterConfig::default(),
        };
        if self.apply_transforms {
            config.apply_transforms = true;
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache_capacity = capacity;
        }
        Ok(config)
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `-v`.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let config = cli.converter_config()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Convert { inputs, output } => {
            let converter = Converter::new(config);
            convert_all(&converter, &inputs, output.as_deref(), &mut out)
        }
        Command::Inspect { file } => inspect::inspect(&file, &config, &mut out),
    }
}

/// Convert every input, reporting each failure and continuing with the rest.
///
/// # Errors
///
/// Fails if `output` is given with several inputs, or after the loop if any
/// input could not be converted.
pub fn convert_all<W: Write>(
    converter: &Converter,
    inputs: &[PathBuf],
    output: Option<&Path>,
    out: &mut W,
) -> Result<()> {
    if output.is_some() && inputs.len() > 1 {
        bail!("--output can only be used with a single input");
    }

    let mut failed = 0usize;
    for input in inputs {
        let target = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| input.with_extension("stl"));
        match convert_one(converter, input, &target) {
            Ok(triangles) => writeln!(
                out,
                "{} -> {} ({triangles} triangles)",
                input.display(),
                target.display()
            )?,
            Err(e) => {
                tracing::error!(input = %input.display(), "{e:#}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} conversions failed", inputs.len());
    }
    Ok(())
}

fn convert_one(converter: &Converter, input: &Path, target: &Path) -> Result<usize> {
    let Some(stl) = converter
        .convert_path(input)
        .with_context(|| format!("Failed to convert {}", input.display()))?
    else {
        bail!("{}: no mesh data found", input.display());
    };

    std::fs::write(target, &stl)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok((stl.len() - mfstl_core::stl::PREAMBLE_SIZE) / mfstl_core::stl::FACET_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Cursor;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const SQUARE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<model xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02">
  <metadata name="Title">Square</metadata>
  <resources>
    <object id="1" type="model"><mesh>
      <vertices>
        <vertex x="0" y="0" z="0"/><vertex x="1" y="0" z="0"/>
        <vertex x="1" y="1" z="0"/><vertex x="0" y="1" z="0"/>
      </vertices>
      <triangles>
        <triangle v1="0" v2="1" v3="2"/><triangle v1="0" v2="2" v3="3"/>
      </triangles>
    </mesh></object>
  </resources>
  <build><item objectid="1"/></build>
</model>"#;

    fn write_3mf(path: &Path, model: &str) {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("3D/3dmodel.model", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(model.as_bytes()).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mfstl.toml");
        std::fs::write(&config_path, "cache_capacity = 8").unwrap();

        let cli = Cli::try_parse_from([
            "mfstl",
            "--config",
            config_path.to_str().unwrap(),
            "convert",
            "a.3mf",
            "--cache-capacity",
            "0",
            "--apply-transforms",
        ])
        .unwrap();
        let config = cli.converter_config().unwrap();
        assert_eq!(config.cache_capacity, 0);
        assert!(config.apply_transforms);
    }

    #[test]
    fn test_convert_requires_input() {
        assert!(Cli::try_parse_from(["mfstl", "convert"]).is_err());
    }

    #[test]
    fn test_convert_writes_stl_next_to_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("square.3mf");
        write_3mf(&input, SQUARE);

        let mut out = Vec::new();
        convert_all(&Converter::default(), &[input.clone()], None, &mut out).unwrap();

        let stl = std::fs::read(dir.path().join("square.stl")).unwrap();
        assert_eq!(stl.len(), 184);
        assert!(String::from_utf8(out).unwrap().contains("(2 triangles)"));
    }

    #[test]
    fn test_output_with_many_inputs_is_rejected() {
        let inputs = [PathBuf::from("a.3mf"), PathBuf::from("b.3mf")];
        let mut out = Vec::new();
        let err = convert_all(
            &Converter::default(),
            &inputs,
            Some(Path::new("out.stl")),
            &mut out,
        )
        .unwrap_err();
        assert!(err.to_string().contains("single input"));
    }

    #[test]
    fn test_failures_are_counted_and_others_still_convert() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.3mf");
        write_3mf(&good, SQUARE);
        let empty = dir.path().join("empty.3mf");
        write_3mf(
            &empty,
            r#"<model xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02"><resources/><build/></model>"#,
        );
        let missing = dir.path().join("missing.3mf");

        let mut out = Vec::new();
        let err = convert_all(
            &Converter::default(),
            &[good, empty, missing],
            None,
            &mut out,
        )
        .unwrap_err();

        assert!(err.to_string().contains("2 of 3"));
        assert!(dir.path().join("good.stl").exists());
        assert!(!dir.path().join("empty.stl").exists());
    }

    #[test]
    fn test_inspect_reports_package_contents() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("square.3mf");
        write_3mf(&input, SQUARE);

        let mut out = Vec::new();
        inspect::inspect(&input, &ConverterConfig::default(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("title: Square"));
        assert!(text.contains("thumbnail: none"));
        assert!(text.contains("/3D/3dmodel.model: 1 meshes, 0 assemblies, 1 build items"));
        assert!(text.contains("flattened: 4 vertices, 2 triangles"));
    }
}
