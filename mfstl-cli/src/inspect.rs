//! `mfstl inspect`: human-readable summaries of 3MF packages and STL files.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use mfstl_core::{flatten, parse_binary_stl, ConverterConfig, PackageReader};

/// Kind of file `inspect` knows how to summarize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    ThreeMf,
    Stl,
}

impl FileKind {
    /// Guess from the extension; anything that is not `.stl` is treated as 3MF.
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("stl") => Self::Stl,
            _ => Self::ThreeMf,
        }
    }
}

pub fn inspect<W: Write>(path: &Path, config: &ConverterConfig, out: &mut W) -> Result<()> {
    match FileKind::of(path) {
        FileKind::Stl => inspect_stl(path, out),
        FileKind::ThreeMf => inspect_3mf(path, config, out),
    }
}

fn inspect_stl<W: Write>(path: &Path, out: &mut W) -> Result<()> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let stl = parse_binary_stl(&data)
        .with_context(|| format!("Failed to decode {} as binary STL", path.display()))?;

    writeln!(out, "{}: binary STL, {} bytes", path.display(), data.len())?;
    writeln!(out, "  triangles: {}", stl.triangle_count())?;
    writeln!(out, "  zero normals: {}", stl.degenerate_count())?;
    Ok(())
}

fn inspect_3mf<W: Write>(path: &Path, config: &ConverterConfig, out: &mut W) -> Result<()> {
    let mut reader = PackageReader::open(path)?;
    let package = reader
        .read_package()
        .with_context(|| format!("Failed to read 3MF package {}", path.display()))?;
    let thumbnail = reader.thumbnail();

    writeln!(out, "{}: 3MF package", path.display())?;

    let root_document = mfstl_core::package::normalize_path(&config.root_document);
    if let Some(root) = package.document(&root_document) {
        if let Some(title) = root.title() {
            writeln!(out, "  title: {title}")?;
        }
        if let Some(designer) = root.designer() {
            writeln!(out, "  designer: {designer}")?;
        }
    }
    match &thumbnail {
        Some(thumbnail) => writeln!(
            out,
            "  thumbnail: {} ({} bytes)",
            thumbnail.path,
            thumbnail.data.len()
        )?,
        None => writeln!(out, "  thumbnail: none")?,
    }

    writeln!(out, "  documents: {}", package.len())?;
    for document in package.documents() {
        writeln!(
            out,
            "    {}: {} meshes, {} assemblies, {} build items",
            document.path(),
            document.mesh_count(),
            document.assembly_count(),
            document.build_items().len()
        )?;
    }

    let mesh = flatten(&package, &root_document, config.apply_transforms)?;
    writeln!(
        out,
        "  flattened: {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count()
    )?;
    if mesh.dropped_triangles() > 0 {
        writeln!(
            out,
            "  dropped: {} triangles with out-of-range indices",
            mesh.dropped_triangles()
        )?;
    }
    Ok(())
}
