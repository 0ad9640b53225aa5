//! Binary STL encoding and decoding
//!
//! Layout (little-endian): an 80-byte header, a `u32` triangle count, then
//! one 50-byte record per triangle holding the normal, the three vertices
//! (each 3 x `f32`) and a `u16` attribute field.
use std::io::Write;

use nalgebra::{Point3, Vector3};
use nom::{
    bytes::complete::take,
    multi::count,
    number::complete::{le_f32, le_u16, le_u32},
    sequence::tuple,
    IResult,
};

use crate::error::{CodecError, CodecResult};
use crate::geometry::{triangle_normal, FlatMesh};

pub const HEADER_SIZE: usize = 80;
pub const FACET_SIZE: usize = 50;

/// Header plus triangle count.
pub const PREAMBLE_SIZE: usize = HEADER_SIZE + 4;

/// Size in bytes of a binary STL holding `triangles` facets.
pub fn encoded_len(triangles: usize) -> usize {
    PREAMBLE_SIZE + FACET_SIZE * triangles
}

/// Encode a flattened mesh as binary STL.
///
/// # Errors
///
/// Returns `CodecError::MeshTooLarge` if the triangle count exceeds `u32`.
pub fn encode_binary(mesh: &FlatMesh) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_len(mesh.triangle_count()));
    write_binary(mesh, &mut out)?;
    Ok(out)
}

/// Stream a flattened mesh as binary STL.
///
/// The header is zero-filled and every attribute field is `0`.
///
/// # Errors
///
/// Returns `CodecError::MeshTooLarge` if the triangle count exceeds `u32`,
/// or `CodecError::Io` if the writer fails.
pub fn write_binary<W: Write>(mesh: &FlatMesh, writer: &mut W) -> CodecResult<()> {
    let triangle_count =
        u32::try_from(mesh.triangle_count()).map_err(|_| CodecError::MeshTooLarge {
            what: "triangles",
            count: mesh.triangle_count(),
        })?;

    writer.write_all(&[0u8; HEADER_SIZE])?;
    writer.write_all(&triangle_count.to_le_bytes())?;

    let mut record = [0u8; FACET_SIZE];
    for [a, b, c] in mesh.triangle_positions() {
        let normal = triangle_normal(a, b, c);
        let values = [
            normal.x, normal.y, normal.z, //
            a.x, a.y, a.z, //
            b.x, b.y, b.z, //
            c.x, c.y, c.z,
        ];
        for (chunk, value) in record.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        record[48..].copy_from_slice(&0u16.to_le_bytes());
        writer.write_all(&record)?;
    }

    Ok(())
}

/// One decoded STL facet.
#[derive(Debug, Clone, PartialEq)]
pub struct StlFacet {
    pub normal: Vector3<f32>,
    pub vertices: [Point3<f32>; 3],
    pub attribute: u16,
}

/// A decoded binary STL file.
#[derive(Debug, Clone)]
pub struct StlFile {
    pub header: [u8; HEADER_SIZE],
    pub facets: Vec<StlFacet>,
}

impl StlFile {
    pub fn triangle_count(&self) -> usize {
        self.facets.len()
    }

    /// Facets stored with a zero normal.
    pub fn degenerate_count(&self) -> usize {
        self.facets
            .iter()
            .filter(|facet| facet.normal == Vector3::zeros())
            .count()
    }
}

/// Parse a binary STL file
///
/// Bytes after the last declared facet are ignored.
///
/// # Errors
///
/// Returns `CodecError::InvalidStl` if the data is shorter than the header
/// or than the facet count it declares.
pub fn parse_binary_stl(data: &[u8]) -> CodecResult<StlFile> {
    let (body, (header, declared)) = preamble(data).map_err(|_| {
        CodecError::invalid_stl(format!(
            "file too small to be a valid STL ({} bytes)",
            data.len()
        ))
    })?;

    let declared = declared as usize;
    let needed = declared.saturating_mul(FACET_SIZE);
    if body.len() < needed {
        return Err(CodecError::invalid_stl(format!(
            "unexpected end of file: {declared} facets need {needed} bytes, found {}",
            body.len()
        )));
    }

    let (_, facets) = count(parse_facet, declared)(body)
        .map_err(|e| CodecError::invalid_stl(format!("{e:?}")))?;

    let mut fixed = [0u8; HEADER_SIZE];
    fixed.copy_from_slice(header);
    Ok(StlFile {
        header: fixed,
        facets,
    })
}

fn preamble(input: &[u8]) -> IResult<&[u8], (&[u8], u32)> {
    tuple((take(HEADER_SIZE), le_u32))(input)
}

fn parse_facet(input: &[u8]) -> IResult<&[u8], StlFacet> {
    let (input, normal) = parse_vector3(input)?;
    let (input, a) = parse_vector3(input)?;
    let (input, b) = parse_vector3(input)?;
    let (input, c) = parse_vector3(input)?;
    let (input, attribute) = le_u16(input)?;

    Ok((
        input,
        StlFacet {
            normal,
            vertices: [a.into(), b.into(), c.into()],
            attribute,
        },
    ))
}

fn parse_vector3(input: &[u8]) -> IResult<&[u8], Vector3<f32>> {
    let (input, (x, y, z)) = tuple((le_f32, le_f32, le_f32))(input)?;
    Ok((input, Vector3::new(x, y, z)))
}
