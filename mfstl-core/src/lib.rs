//! mfstl core library: 3MF package reading, mesh flattening and binary STL encoding.
//!
//! ```no_run
//! use mfstl_core::{Converter, ConverterConfig};
//!
//! let converter = Converter::new(ConverterConfig::default());
//! match converter.convert_path("model.3mf".as_ref()) {
//!     Ok(Some(stl)) => println!("{} bytes of STL", stl.len()),
//!     Ok(None) => println!("package holds no mesh"),
//!     Err(e) => eprintln!("conversion failed: {e}"),
//! }
//! ```

pub mod cache;
pub mod convert;
pub mod error;
pub mod flatten;
pub mod geometry;
pub mod package;
pub mod stl;
pub mod transform;

// Re-export commonly used types
pub use cache::{CacheKey, StlCache};
pub use convert::{convert_3mf, Converter, ConverterConfig};
pub use error::{CodecError, CodecResult};
pub use flatten::flatten;
pub use geometry::{triangle_normal, FlatMesh, Mesh};
pub use package::{ModelDocument, Package, PackageReader, ROOT_DOCUMENT};
pub use stl::{encode_binary, parse_binary_stl, StlFile};
pub use transform::Transform;
