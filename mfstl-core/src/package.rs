//! 3MF package reader.
//!
//! A 3MF package is a zip archive holding one or more XML model documents
//! (`*.model`). The main document lives at `3D/3dmodel.model`; production
//! files (Bambu Studio, PrusaSlicer) keep their meshes in sibling documents
//! under `3D/Objects/` and reference them from the main document through
//! `p:path` component attributes.
//!
//! Parsing is permissive: objects without usable geometry are skipped and
//! references are not checked here. Only malformed XML or unreadable
//! numbers fail a document.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::str::FromStr;

use nalgebra::Matrix4;
use roxmltree::Node;
use zip::result::{ZipError, ZipResult};
use zip::ZipArchive;

use crate::error::{CodecError, CodecResult};
use crate::geometry::Mesh;
use crate::transform::Transform;

/// 3MF core namespace URI.
pub const CORE_NAMESPACE: &str = "http://schemas.microsoft.com/3dmanufacturing/core/2015/02";

/// 3MF production extension namespace URI (`p:path`).
pub const PRODUCTION_NAMESPACE: &str =
    "http://schemas.microsoft.com/3dmanufacturing/production/2015/06";

/// Normalized key of the main model document.
pub const ROOT_DOCUMENT: &str = "/3D/3dmodel.model";

const MODEL_SUFFIX: &str = ".model";

/// Thumbnail members, most preferred first.
const THUMBNAIL_CANDIDATES: [&str; 4] = [
    "Auxiliaries/.thumbnails/thumbnail_3mf.png",
    "Auxiliaries/.thumbnails/thumbnail_middle.png",
    "Metadata/plate_1.png",
    "Metadata/top_1.png",
];

/// Reference from an object to another object, possibly in another document.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRef {
    pub object_id: String,
    /// Archive path of the target document; `None` means the referencing document.
    pub path: Option<String>,
    pub transform: Option<Matrix4<f32>>,
}

impl ComponentRef {
    /// Normalized key of the document this component points into.
    pub fn target_document(&self, current: &str) -> String {
        match &self.path {
            Some(path) => normalize_path(path),
            None => current.to_string(),
        }
    }
}

/// Entry of a document's `<build>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildItem {
    /// `None` when the item carries no `objectid`; such an item resolves to nothing.
    pub object_id: Option<String>,
    pub transform: Option<Matrix4<f32>>,
}

/// One parsed model document.
#[derive(Debug, Clone, Default)]
pub struct ModelDocument {
    path: String,
    meshes: Vec<(String, Mesh)>,
    mesh_index: HashMap<String, usize>,
    components: HashMap<String, Vec<ComponentRef>>,
    build_items: Vec<BuildItem>,
    metadata: Vec<(String, String)>,
}

impl ModelDocument {
    pub fn new(path: &str) -> Self {
        Self {
            path: normalize_path(path),
            ..Self::default()
        }
    }

    /// Parse a model document's XML.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Xml` for malformed XML and
    /// `CodecError::InvalidAttribute` for an unparsable vertex coordinate or
    /// triangle index.
    pub fn parse(path: &str, xml: &str) -> CodecResult<Self> {
        let mut document = Self::new(path);
        let xml = xml.strip_prefix('\u{feff}').unwrap_or(xml);
        let tree = roxmltree::Document::parse(xml).map_err(|source| CodecError::Xml {
            document: document.path.clone(),
            source,
        })?;
        let root = tree.root_element();

        for object in root
            .descendants()
            .filter(|n| n.has_tag_name((CORE_NAMESPACE, "object")))
        {
            let id = object.attribute("id").unwrap_or_default();

            if let Some(mesh_node) = core_child(object, "mesh") {
                if let Some(mesh) = document.read_mesh(mesh_node)? {
                    document.insert_mesh(id, mesh);
                }
            }

            if let Some(components) = core_child(object, "components") {
                let refs = document.read_components(components);
                if !refs.is_empty() {
                    document.components.insert(id.to_string(), refs);
                }
            }
        }

        for build in root
            .descendants()
            .filter(|n| n.has_tag_name((CORE_NAMESPACE, "build")))
        {
            for item in core_children(build, "item") {
                document.build_items.push(BuildItem {
                    object_id: item.attribute("objectid").map(str::to_string),
                    transform: document.read_transform(item, "item"),
                });
            }
        }

        for entry in core_children(root, "metadata") {
            let name = entry.attribute("name").unwrap_or_default();
            let value = entry.text().map(str::trim).unwrap_or_default();
            if value.is_empty() || value == "None" {
                continue;
            }
            document.metadata.push((name.to_string(), value.to_string()));
        }

        Ok(document)
    }

    /// Normalized archive path, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mesh(&self, object_id: &str) -> Option<&Mesh> {
        self.mesh_index
            .get(object_id)
            .map(|&index| &self.meshes[index].1)
    }

    /// Every mesh object in document order.
    pub fn meshes(&self) -> impl Iterator<Item = (&str, &Mesh)> {
        self.meshes.iter().map(|(id, mesh)| (id.as_str(), mesh))
    }

    pub fn components(&self, object_id: &str) -> Option<&[ComponentRef]> {
        self.components.get(object_id).map(Vec::as_slice)
    }

    pub fn build_items(&self) -> &[BuildItem] {
        &self.build_items
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Number of objects assembled from components.
    pub fn assembly_count(&self) -> usize {
        self.components.len()
    }

    /// Value of a `<metadata name="...">` entry on the model element.
    ///
    /// A repeated name resolves to its last entry.
    pub fn metadata(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .rfind(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata("Title")
    }

    pub fn designer(&self) -> Option<&str> {
        self.metadata("Designer")
    }

    /// Register a mesh; a repeated id replaces the earlier mesh in place.
    pub fn insert_mesh(&mut self, object_id: &str, mesh: Mesh) {
        match self.mesh_index.get(object_id) {
            Some(&index) => self.meshes[index].1 = mesh,
            None => {
                self.mesh_index
                    .insert(object_id.to_string(), self.meshes.len());
                self.meshes.push((object_id.to_string(), mesh));
            }
        }
    }

    pub fn insert_components(&mut self, object_id: &str, refs: Vec<ComponentRef>) {
        self.components.insert(object_id.to_string(), refs);
    }

    pub fn push_build_item(&mut self, item: BuildItem) {
        self.build_items.push(item);
    }

    fn read_mesh(&self, mesh_node: Node<'_, '_>) -> CodecResult<Option<Mesh>> {
        let (Some(vertices), Some(triangles)) = (
            core_child(mesh_node, "vertices"),
            core_child(mesh_node, "triangles"),
        ) else {
            return Ok(None);
        };

        let mut mesh = Mesh::new();
        for vertex in core_children(vertices, "vertex") {
            mesh.add_vertex(
                self.number(vertex, "vertex", "x", 0.0)?,
                self.number(vertex, "vertex", "y", 0.0)?,
                self.number(vertex, "vertex", "z", 0.0)?,
            );
        }
        for triangle in core_children(triangles, "triangle") {
            mesh.add_triangle(
                self.number(triangle, "triangle", "v1", 0)?,
                self.number(triangle, "triangle", "v2", 0)?,
                self.number(triangle, "triangle", "v3", 0)?,
            );
        }

        if mesh.vertices.is_empty() || mesh.triangles.is_empty() {
            return Ok(None);
        }
        Ok(Some(mesh))
    }

    fn read_components(&self, components: Node<'_, '_>) -> Vec<ComponentRef> {
        core_children(components, "component")
            .filter_map(|component| {
                let object_id = component.attribute("objectid")?;
                let path = component
                    .attribute((PRODUCTION_NAMESPACE, "path"))
                    .or_else(|| component.attribute("path"))
                    .filter(|p| !p.is_empty())
                    .map(str::to_string);
                Some(ComponentRef {
                    object_id: object_id.to_string(),
                    path,
                    transform: self.read_transform(component, "component"),
                })
            })
            .collect()
    }

    /// Placement transforms are advisory, so a malformed one is logged and ignored.
    fn read_transform(&self, node: Node<'_, '_>, element: &str) -> Option<Matrix4<f32>> {
        let raw = node.attribute("transform")?;
        let parsed = Transform::parse_3mf(raw);
        if parsed.is_none() {
            tracing::warn!(
                document = %self.path,
                element,
                value = raw,
                "ignoring malformed transform"
            );
        }
        parsed
    }

    fn number<T: FromStr>(
        &self,
        node: Node<'_, '_>,
        element: &'static str,
        attribute: &'static str,
        default: T,
    ) -> CodecResult<T> {
        match node.attribute(attribute) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| CodecError::InvalidAttribute {
                    document: self.path.clone(),
                    element,
                    attribute,
                    value: raw.to_string(),
                }),
        }
    }
}

/// Every model document of a package, in archive order.
#[derive(Debug, Clone, Default)]
pub struct Package {
    documents: Vec<ModelDocument>,
    index: HashMap<String, usize>,
}

impl Package {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every model document from archive bytes.
    ///
    /// # Errors
    ///
    /// See [`PackageReader::read_package`].
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        PackageReader::new(std::io::Cursor::new(bytes))?.read_package()
    }

    /// Add a document; a document with the same key replaces the old one.
    pub fn insert(&mut self, document: ModelDocument) {
        match self.index.get(document.path()) {
            Some(&index) => self.documents[index] = document,
            None => {
                self.index
                    .insert(document.path().to_string(), self.documents.len());
                self.documents.push(document);
            }
        }
    }

    pub fn document(&self, key: &str) -> Option<&ModelDocument> {
        self.index.get(key).map(|&index| &self.documents[index])
    }

    pub fn documents(&self) -> &[ModelDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Embedded preview image.
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    /// Archive member the image was read from.
    pub path: String,
    pub data: Vec<u8>,
}

/// Zip-level access to a 3MF package.
pub struct PackageReader<R> {
    archive: ZipArchive<R>,
}

impl PackageReader<BufReader<File>> {
    /// Open a package on disk.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Source` if the file cannot be opened and
    /// `CodecError::Archive` if it is not a zip archive.
    pub fn open(path: &Path) -> CodecResult<Self> {
        let file = File::open(path).map_err(|source| CodecError::Source {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> PackageReader<R> {
    /// # Errors
    ///
    /// Returns `CodecError::Archive` if `reader` is not a zip archive.
    pub fn new(reader: R) -> CodecResult<Self> {
        Ok(Self {
            archive: ZipArchive::new(reader)?,
        })
    }

    /// Names of the archive members holding model documents, in archive order.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Archive` if an entry cannot be read.
    pub fn model_members(&mut self) -> CodecResult<Vec<String>> {
        let mut names = Vec::new();
        for i in 0..self.archive.len() {
            let file = self.archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            if file.name().ends_with(MODEL_SUFFIX) {
                names.push(file.name().to_string());
            }
        }
        Ok(names)
    }

    /// Parse every model document in the archive.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::NoModelDocument` if the archive has no model
    /// document, or the first document error encountered.
    pub fn read_package(&mut self) -> CodecResult<Package> {
        let members = self.model_members()?;
        if members.is_empty() {
            return Err(CodecError::NoModelDocument);
        }

        let mut package = Package::new();
        for name in members {
            let key = normalize_path(&name);
            let bytes = self.read_member(&name)?;
            let xml = String::from_utf8(bytes).map_err(|source| CodecError::Encoding {
                document: key.clone(),
                source,
            })?;

            let document = ModelDocument::parse(&key, &xml)?;
            tracing::debug!(
                document = %key,
                meshes = document.mesh_count(),
                assemblies = document.assembly_count(),
                build_items = document.build_items().len(),
                "parsed model document"
            );
            package.insert(document);
        }
        Ok(package)
    }

    /// First readable preview image, if the package carries one.
    ///
    /// Candidates that are missing or cannot be read are skipped.
    pub fn thumbnail(&mut self) -> Option<Thumbnail> {
        THUMBNAIL_CANDIDATES.into_iter().find_map(|candidate| {
            match self.read_member(candidate) {
                Ok(data) => Some(Thumbnail {
                    path: candidate.to_string(),
                    data,
                }),
                Err(ZipError::FileNotFound) => None,
                Err(e) => {
                    tracing::debug!(member = candidate, error = %e, "unreadable thumbnail");
                    None
                }
            }
        })
    }

    fn read_member(&mut self, name: &str) -> ZipResult<Vec<u8>> {
        let mut data = Vec::new();
        self.archive.by_name(name)?.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// Normalize an archive path to the leading-`/` form used as document key.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn core_child<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> Option<Node<'a, 'input>> {
    core_children(node, name).next()
}

fn core_children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.has_tag_name((CORE_NAMESPACE, name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const SQUARE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<model unit="millimeter" xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02">
  <metadata name="Title">Unit square</metadata>
  <metadata name="Designer">None</metadata>
  <resources>
    <object id="1" type="model">
      <mesh>
        <vertices>
          <vertex x="0" y="0" z="0"/>
          <vertex x="1" y="0" z="0"/>
          <vertex x="1" y="1" z="0"/>
          <vertex x="0" y="1"/>
        </vertices>
        <triangles>
          <triangle v1="0" v2="1" v3="2"/>
          <triangle v1="0" v2="2" v3="3"/>
        </triangles>
      </mesh>
    </object>
  </resources>
  <build>
    <item objectid="1"/>
  </build>
</model>"#;

    fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_parse_mesh_with_defaults() {
        let doc = ModelDocument::parse("3D/3dmodel.model", SQUARE).unwrap();
        assert_eq!(doc.path(), ROOT_DOCUMENT);

        let mesh = doc.mesh("1").unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        // Missing z defaults to zero.
        assert_eq!(mesh.vertices[3].z, 0.0);
        assert_eq!(doc.build_items().len(), 1);
        assert_eq!(doc.build_items()[0].object_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_metadata_skips_placeholder_values() {
        let doc = ModelDocument::parse("/3D/3dmodel.model", SQUARE).unwrap();
        assert_eq!(doc.title(), Some("Unit square"));
        assert_eq!(doc.designer(), None);
    }

    #[test]
    fn test_repeated_metadata_keeps_last_value() {
        let xml = SQUARE.replace(
            r#"<metadata name="Designer">None</metadata>"#,
            r#"<metadata name="Designer">Ada</metadata><metadata name="Title">Renamed</metadata>"#,
        );
        let doc = ModelDocument::parse("/3D/3dmodel.model", &xml).unwrap();
        assert_eq!(doc.title(), Some("Renamed"));
        assert_eq!(doc.designer(), Some("Ada"));
    }

    #[test]
    fn test_build_item_without_objectid_is_kept() {
        let xml = SQUARE.replace(r#"<item objectid="1"/>"#, "<item/>");
        let doc = ModelDocument::parse("/3D/3dmodel.model", &xml).unwrap();
        assert_eq!(doc.build_items().len(), 1);
        assert_eq!(doc.build_items()[0].object_id, None);
    }

    #[test]
    fn test_mesh_without_triangles_is_skipped() {
        let xml = r#"<model xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02">
  <resources>
    <object id="7"><mesh><vertices><vertex x="1" y="2" z="3"/></vertices></mesh></object>
    <object id="8"><mesh><vertices/><triangles/></mesh></object>
  </resources>
</model>"#;
        let doc = ModelDocument::parse("/3D/3dmodel.model", xml).unwrap();
        assert_eq!(doc.mesh_count(), 0);
    }

    #[test]
    fn test_components_with_production_path() {
        let xml = r#"<model xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02"
       xmlns:p="http://schemas.microsoft.com/3dmanufacturing/production/2015/06">
  <resources>
    <object id="2">
      <components>
        <component p:path="/3D/Objects/part.model" objectid="5" transform="1 0 0 0 1 0 0 0 1 4 0 0"/>
        <component objectid="3"/>
        <component p:path=""/>
      </components>
    </object>
    <object id="9"><components/></object>
  </resources>
</model>"#;
        let doc = ModelDocument::parse("/3D/3dmodel.model", xml).unwrap();
        let refs = doc.components("2").unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].object_id, "5");
        assert_eq!(refs[0].target_document(doc.path()), "/3D/Objects/part.model");
        assert!(refs[0].transform.is_some());
        assert_eq!(refs[1].target_document(doc.path()), ROOT_DOCUMENT);
        assert!(doc.components("9").is_none());
    }

    #[test]
    fn test_foreign_namespace_is_ignored() {
        let xml = r#"<model xmlns="urn:example:other">
  <resources><object id="1"><mesh><vertices><vertex x="0"/></vertices>
  <triangles><triangle v1="0" v2="0" v3="0"/></triangles></mesh></object></resources>
</model>"#;
        let doc = ModelDocument::parse("/3D/3dmodel.model", xml).unwrap();
        assert_eq!(doc.mesh_count(), 0);
    }

    #[test]
    fn test_malformed_xml_is_error() {
        let err = ModelDocument::parse("/3D/3dmodel.model", "<model><object>").unwrap_err();
        assert!(matches!(err, CodecError::Xml { .. }));
    }

    #[test]
    fn test_unparsable_coordinate_is_error() {
        let xml = SQUARE.replace(r#"x="1" y="1""#, r#"x="one" y="1""#);
        let err = ModelDocument::parse("/3D/3dmodel.model", &xml).unwrap_err();
        match err {
            CodecError::InvalidAttribute {
                attribute, value, ..
            } => {
                assert_eq!(attribute, "x");
                assert_eq!(value, "one");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_object_id_keeps_last_definition() {
        let mut doc = ModelDocument::new("/a.model");
        let mut first = Mesh::new();
        first.add_vertex(0.0, 0.0, 0.0);
        let mut second = Mesh::new();
        second.add_vertex(1.0, 1.0, 1.0);
        second.add_vertex(2.0, 2.0, 2.0);

        doc.insert_mesh("1", first);
        doc.insert_mesh("1", second);
        assert_eq!(doc.mesh_count(), 1);
        assert_eq!(doc.mesh("1").unwrap().vertex_count(), 2);
    }

    #[test]
    fn test_read_package_selects_model_members() {
        let bytes = zip_bytes(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("3D/3dmodel.model", SQUARE.as_bytes()),
            ("3D/Objects/extra.model", SQUARE.as_bytes()),
            ("3D/.model", SQUARE.as_bytes()),
            ("notes.MODEL", b"\xff not xml"),
            ("Metadata/plate_1.png", b"\x89PNG"),
        ]);
        let mut reader = PackageReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(
            reader.model_members().unwrap(),
            vec!["3D/3dmodel.model", "3D/Objects/extra.model", "3D/.model"]
        );

        let package = reader.read_package().unwrap();
        assert_eq!(package.len(), 3);
        assert!(package.document(ROOT_DOCUMENT).is_some());
        assert!(package.document("/3D/Objects/extra.model").is_some());
        assert!(package.document("/3D/.model").is_some());

        let thumbnail = reader.thumbnail().unwrap();
        assert_eq!(thumbnail.path, "Metadata/plate_1.png");
        assert_eq!(thumbnail.data, b"\x89PNG");
    }

    #[test]
    fn test_unreadable_thumbnail_falls_through() {
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("Auxiliaries/.thumbnails/thumbnail_3mf.png", stored)
            .unwrap();
        writer.write_all(b"preview-original").unwrap();
        writer.start_file("Metadata/top_1.png", stored).unwrap();
        writer.write_all(b"\x89PNG").unwrap();
        let mut bytes = writer.finish().unwrap().into_inner();

        // Corrupt the stored payload so its CRC check fails on read.
        let start = bytes
            .windows(16)
            .position(|w| w == b"preview-original")
            .unwrap();
        bytes[start..start + 16].copy_from_slice(b"preview-tampered");

        let mut reader = PackageReader::new(Cursor::new(bytes)).unwrap();
        let thumbnail = reader.thumbnail().unwrap();
        assert_eq!(thumbnail.path, "Metadata/top_1.png");
    }

    #[test]
    fn test_package_without_model_is_error() {
        let bytes = zip_bytes(&[("readme.txt", b"hello")]);
        let err = Package::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::NoModelDocument));
    }

    #[test]
    fn test_not_a_zip_is_error() {
        let err = Package::from_bytes(b"solid cube\nendsolid cube\n").unwrap_err();
        assert!(matches!(err, CodecError::Archive(_)));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("3D/3dmodel.model"), "/3D/3dmodel.model");
        assert_eq!(normalize_path("/3D/3dmodel.model"), "/3D/3dmodel.model");
    }
}
