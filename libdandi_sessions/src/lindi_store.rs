// A LINDI file is a JSON reference index over an HDF5 file, laid out like a Zarr store:
//
// refs
// |---- .zgroup, .zattrs                      (root group)
// |---- acquisition/.zgroup
// |---- acquisition/TwoPhotonSeries_000/data/.zarray, .zattrs
// |---- acquisition/TwoPhotonSeries_000/data/0.0.0 -> ["{{u}}", offset, size]
// templates
// |---- u -> https://.../download/
//
// Chunks either live inline in the index or are byte ranges of the original remote file,
// which we fetch with HTTP Range requests. HDF5 deflate chunks show up as zlib (or gzip)
// codecs and are inflated after the fetch.
use base64::Engine;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::{GzDecoder, ZlibDecoder};
use fxhash::FxHashMap;
use ndarray::{Array2, ArrayD, Axis, Dimension, Ix2, IxDyn, ShapeBuilder, Slice};
use reqwest::blocking::Client;
use reqwest::header::RANGE;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::Read;
use std::ops::Range;

use super::error::StoreError;
use super::store::{check_frame_request, join_path, NwbStore};

const ZGROUP: &str = ".zgroup";
const ZARRAY: &str = ".zarray";
const ZATTRS: &str = ".zattrs";
const SCALAR_ATTR: &str = "_SCALAR";
const INLINE_BASE64_PREFIX: &str = "base64:";

#[derive(Debug, Deserialize)]
struct LindiIndex {
    refs: Map<String, Value>,
    #[serde(default)]
    templates: FxHashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ArrayMeta {
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: String,
    #[serde(default)]
    compressor: Option<Value>,
    #[serde(default)]
    filters: Option<Vec<Value>>,
    #[serde(default)]
    fill_value: Value,
    #[serde(default = "default_order")]
    order: String,
    #[serde(default)]
    dimension_separator: Option<String>,
    /// Filters then compressor, in encoding order
    #[serde(skip)]
    codecs: Vec<Codec>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Codec {
    Zlib,
    Gzip,
}

impl Codec {
    fn from_config(path: &str, config: &Value) -> Result<Self, StoreError> {
        match config.get("id").and_then(Value::as_str) {
            Some("zlib") => Ok(Self::Zlib),
            Some("gzip") => Ok(Self::Gzip),
            id => Err(StoreError::UnsupportedCodec {
                path: path.to_string(),
                codec: id.unwrap_or("unknown").to_string(),
            }),
        }
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        let result = match self {
            Self::Zlib => ZlibDecoder::new(bytes).read_to_end(&mut out),
            Self::Gzip => GzDecoder::new(bytes).read_to_end(&mut out),
        };
        match result {
            Ok(_) => Ok(out),
            Err(e) => Err(StoreError::Decompress {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

fn default_order() -> String {
    String::from("C")
}

/// Element type of a Zarr dtype string such as `<f4` or `|u1`
#[derive(Debug, Clone, Copy, PartialEq)]
enum ElementKind {
    Float,
    Int,
    UInt,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ElementType {
    kind: ElementKind,
    size: usize,
    big_endian: bool,
}

impl ElementType {
    fn parse(path: &str, dtype: &str) -> Result<Self, StoreError> {
        let unsupported = || StoreError::UnsupportedDtype {
            path: path.to_string(),
            dtype: dtype.to_string(),
        };
        let mut chars = dtype.chars();
        let big_endian = match chars.next() {
            Some('<') | Some('|') => false,
            Some('>') => true,
            _ => return Err(unsupported()),
        };
        let kind = match chars.next() {
            Some('f') => ElementKind::Float,
            Some('i') => ElementKind::Int,
            Some('u') => ElementKind::UInt,
            Some('b') => ElementKind::Bool,
            _ => return Err(unsupported()),
        };
        let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;
        let valid = match kind {
            ElementKind::Float => matches!(size, 4 | 8),
            ElementKind::Int | ElementKind::UInt => matches!(size, 1 | 2 | 4 | 8),
            ElementKind::Bool => size == 1,
        };
        if !valid {
            return Err(unsupported());
        }
        Ok(Self {
            kind,
            size,
            big_endian,
        })
    }

    fn decode(&self, bytes: &[u8]) -> f64 {
        if self.big_endian {
            self.decode_with::<BigEndian>(bytes)
        } else {
            self.decode_with::<LittleEndian>(bytes)
        }
    }

    fn decode_with<B: ByteOrder>(&self, bytes: &[u8]) -> f64 {
        match (self.kind, self.size) {
            (ElementKind::Float, 4) => B::read_f32(bytes) as f64,
            (ElementKind::Float, _) => B::read_f64(bytes),
            (ElementKind::Int, 1) => bytes[0] as i8 as f64,
            (ElementKind::Int, 2) => B::read_i16(bytes) as f64,
            (ElementKind::Int, 4) => B::read_i32(bytes) as f64,
            (ElementKind::Int, _) => B::read_i64(bytes) as f64,
            (ElementKind::UInt, 1) | (ElementKind::Bool, _) => bytes[0] as f64,
            (ElementKind::UInt, 2) => B::read_u16(bytes) as f64,
            (ElementKind::UInt, 4) => B::read_u32(bytes) as f64,
            (ElementKind::UInt, _) => B::read_u64(bytes) as f64,
        }
    }
}

/// Replace `{{name}}` placeholders using the index template table
fn expand_template(url: &str, templates: &FxHashMap<String, String>) -> String {
    let mut expanded = url.to_string();
    for (name, value) in templates.iter() {
        expanded = expanded.replace(&format!("{{{{{name}}}}}"), value);
    }
    expanded
}

fn fill_value_of(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => *b as u8 as f64,
        Value::String(s) => match s.as_str() {
            "NaN" => f64::NAN,
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            _ => 0.0,
        },
        _ => 0.0,
    }
}

/// Store backed by a LINDI JSON reference index
#[derive(Debug)]
pub struct LindiStore {
    source: String,
    refs: Map<String, Value>,
    templates: FxHashMap<String, String>,
    client: Client,
}

impl LindiStore {
    /// Download and parse the index at url
    pub fn from_url(client: Client, url: &str) -> Result<Self, StoreError> {
        if url.ends_with(".lindi.tar") {
            return Err(StoreError::UnsupportedFormat(url.to_string()));
        }
        let text = client.get(url).send()?.error_for_status()?.text()?;
        Self::from_json_str(client, url, &text)
    }

    pub fn from_json_str(client: Client, source: &str, json: &str) -> Result<Self, StoreError> {
        let index: LindiIndex = serde_json::from_str(json)?;
        Ok(Self {
            source: source.to_string(),
            refs: index.refs,
            templates: index.templates,
            client,
        })
    }

    fn is_group(&self, path: &str) -> bool {
        self.refs.contains_key(&join_path(path, ZGROUP))
    }

    fn is_array(&self, path: &str) -> bool {
        self.refs.contains_key(&join_path(path, ZARRAY))
    }

    /// Metadata entries are JSON objects in LINDI and JSON-encoded strings in kerchunk
    fn json_entry(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.refs.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(serde_json::from_str(s)?)),
            Some(v) => Ok(Some(v.clone())),
        }
    }

    fn attributes(&self, path: &str) -> Result<Map<String, Value>, StoreError> {
        match self.json_entry(&join_path(path, ZATTRS))? {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(StoreError::BadMetadata {
                path: path.to_string(),
                reason: String::from(".zattrs is not an object"),
            }),
            None => Ok(Map::new()),
        }
    }

    fn array_meta(&self, path: &str) -> Result<ArrayMeta, StoreError> {
        let entry = match self.json_entry(&join_path(path, ZARRAY))? {
            Some(entry) => entry,
            None if self.is_group(path) => return Err(StoreError::NotADataset(path.to_string())),
            None => return Err(StoreError::NotFound(path.to_string())),
        };
        let mut meta: ArrayMeta = serde_json::from_value(entry)?;
        meta.codecs = meta
            .filters
            .iter()
            .flatten()
            .chain(meta.compressor.iter().filter(|c| !c.is_null()))
            .map(|config| Codec::from_config(path, config))
            .collect::<Result<Vec<Codec>, StoreError>>()?;
        if meta.chunks.len() != meta.shape.len() || meta.chunks.iter().any(|c| *c == 0) {
            return Err(StoreError::BadMetadata {
                path: path.to_string(),
                reason: format!("chunks {:?} do not fit shape {:?}", meta.chunks, meta.shape),
            });
        }
        // HDF5 scalars are stored as one element arrays
        let is_scalar = self
            .attributes(path)?
            .get(SCALAR_ATTR)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_scalar {
            meta.shape.clear();
            meta.chunks.clear();
        }
        Ok(meta)
    }

    /// Fetch the raw bytes of a chunk. None means the chunk was never written.
    fn chunk_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.refs.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => match s.strip_prefix(INLINE_BASE64_PREFIX) {
                Some(encoded) => Ok(Some(
                    base64::engine::general_purpose::STANDARD.decode(encoded)?,
                )),
                None => Ok(Some(s.as_bytes().to_vec())),
            },
            Some(Value::Array(parts)) => {
                let url = match parts.first().and_then(Value::as_str) {
                    Some(url) => expand_template(url, &self.templates),
                    None => {
                        return Err(StoreError::BadMetadata {
                            path: key.to_string(),
                            reason: String::from("chunk reference has no url"),
                        })
                    }
                };
                let mut request = self.client.get(&url);
                if let (Some(offset), Some(size)) = (
                    parts.get(1).and_then(Value::as_u64),
                    parts.get(2).and_then(Value::as_u64),
                ) {
                    if size == 0 {
                        return Ok(Some(Vec::new()));
                    }
                    request = request.header(RANGE, format!("bytes={}-{}", offset, offset + size - 1));
                }
                let bytes = request.send()?.error_for_status()?.bytes()?;
                Ok(Some(bytes.to_vec()))
            }
            Some(_) => Err(StoreError::BadMetadata {
                path: key.to_string(),
                reason: String::from("unrecognized chunk reference"),
            }),
        }
    }

    /// Raw chunk bytes with the codec chain of the array undone
    fn read_chunk(&self, key: &str, meta: &ArrayMeta) -> Result<Option<Vec<u8>>, StoreError> {
        let mut bytes = match self.chunk_bytes(key)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        for codec in meta.codecs.iter().rev() {
            bytes = codec.decode(key, &bytes)?;
        }
        Ok(Some(bytes))
    }

    fn decode_chunk(
        &self,
        key: &str,
        meta: &ArrayMeta,
        element: &ElementType,
        bytes: &[u8],
    ) -> Result<ArrayD<f64>, StoreError> {
        let n_elements: usize = meta.chunks.iter().product();
        let expected = n_elements * element.size;
        if bytes.len() != expected {
            return Err(StoreError::BadChunkSize {
                key: key.to_string(),
                found: bytes.len(),
                expected,
            });
        }
        let values: Vec<f64> = bytes
            .chunks_exact(element.size)
            .map(|b| element.decode(b))
            .collect();
        let shape = IxDyn(&meta.chunks);
        let chunk = if meta.order == "F" {
            ArrayD::from_shape_vec(shape.f(), values)
        } else {
            ArrayD::from_shape_vec(shape, values)
        };
        chunk.map_err(|e| StoreError::BadMetadata {
            path: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Read the hyper-rectangle given by region (one range per axis)
    fn read_region(
        &self,
        path: &str,
        meta: &ArrayMeta,
        region: &[Range<usize>],
    ) -> Result<ArrayD<f64>, StoreError> {
        let element = ElementType::parse(path, &meta.dtype)?;
        let fill = fill_value_of(&meta.fill_value);

        if meta.shape.is_empty() {
            let key = join_path(path, "0");
            let value = match self.read_chunk(&key, meta)? {
                Some(bytes) if bytes.len() < element.size => {
                    return Err(StoreError::BadChunkSize {
                        key,
                        found: bytes.len(),
                        expected: element.size,
                    });
                }
                Some(bytes) => element.decode(&bytes[..element.size]),
                None => fill,
            };
            return Ok(ArrayD::from_elem(IxDyn(&[]), value));
        }

        let out_shape: Vec<usize> = region.iter().map(|r| r.end - r.start).collect();
        let mut out = ArrayD::from_elem(IxDyn(&out_shape), fill);
        if out_shape.iter().any(|n| *n == 0) {
            return Ok(out);
        }

        let first_chunk: Vec<usize> = region
            .iter()
            .zip(meta.chunks.iter())
            .map(|(r, c)| r.start / c)
            .collect();
        let chunk_counts: Vec<usize> = region
            .iter()
            .zip(meta.chunks.iter())
            .zip(first_chunk.iter())
            .map(|((r, c), first)| (r.end - 1) / c + 1 - first)
            .collect();
        let separator = meta.dimension_separator.as_deref().unwrap_or(".");

        for offset in ndarray::indices(IxDyn(&chunk_counts)) {
            let coords: Vec<usize> = offset
                .slice()
                .iter()
                .zip(first_chunk.iter())
                .map(|(o, f)| o + f)
                .collect();
            let key = join_path(
                path,
                &coords
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<String>>()
                    .join(separator),
            );
            let bytes = match self.read_chunk(&key, meta)? {
                Some(bytes) => bytes,
                None => continue,
            };
            let chunk = self.decode_chunk(&key, meta, &element, &bytes)?;

            let mut dest = Vec::with_capacity(coords.len());
            let mut src = Vec::with_capacity(coords.len());
            for (axis, coord) in coords.iter().enumerate() {
                let origin = coord * meta.chunks[axis];
                let lo = region[axis].start.max(origin);
                let hi = region[axis]
                    .end
                    .min(origin + meta.chunks[axis])
                    .min(meta.shape[axis]);
                dest.push(lo - region[axis].start..hi - region[axis].start);
                src.push(lo - origin..hi - origin);
            }
            out.slice_each_axis_mut(|ad| Slice::from(dest[ad.axis.index()].clone()))
                .assign(&chunk.slice_each_axis(|ad| Slice::from(src[ad.axis.index()].clone())));
        }
        Ok(out)
    }
}

impl NwbStore for LindiStore {
    fn source(&self) -> &str {
        &self.source
    }

    /// Members come back in sorted key order (the refs table is not order preserving), which is
    /// also how h5py lists the members of an HDF5 group.
    fn member_names(&self, group: &str) -> Result<Vec<String>, StoreError> {
        if !self.is_group(group) {
            if self.is_array(group) {
                return Err(StoreError::NotAGroup(group.to_string()));
            }
            return Err(StoreError::NotFound(group.to_string()));
        }
        let prefix = if group.is_empty() {
            String::new()
        } else {
            format!("{group}/")
        };
        let mut members: Vec<String> = Vec::new();
        for key in self.refs.keys() {
            if let Some((child, tail)) = key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.split_once('/'))
            {
                if (tail == ZGROUP || tail == ZARRAY) && !members.iter().any(|m| m == child) {
                    members.push(child.to_string());
                }
            }
        }
        Ok(members)
    }

    fn exists(&self, path: &str) -> bool {
        self.is_group(path) || self.is_array(path)
    }

    fn read_scalar(&self, path: &str) -> Result<f64, StoreError> {
        let meta = self.array_meta(path)?;
        let region: Vec<Range<usize>> = meta.shape.iter().map(|n| 0..*n).collect();
        let data = self.read_region(path, &meta, &region)?;
        match (data.len(), data.iter().next()) {
            (1, Some(value)) => Ok(*value),
            _ => Err(StoreError::BadMetadata {
                path: path.to_string(),
                reason: format!("expected a scalar, found shape {:?}", meta.shape),
            }),
        }
    }

    fn read_attr(&self, path: &str, attr: &str) -> Result<f64, StoreError> {
        if !self.exists(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let missing = || StoreError::MissingAttribute {
            path: path.to_string(),
            attr: attr.to_string(),
        };
        match self.attributes(path)?.get(attr) {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(missing),
            Some(Value::Array(values)) if values.len() == 1 => {
                values[0].as_f64().ok_or_else(missing)
            }
            _ => Err(missing()),
        }
    }

    fn shape(&self, path: &str) -> Result<Vec<usize>, StoreError> {
        Ok(self.array_meta(path)?.shape)
    }

    fn read_array(&self, path: &str) -> Result<ArrayD<f64>, StoreError> {
        let meta = self.array_meta(path)?;
        let region: Vec<Range<usize>> = meta.shape.iter().map(|n| 0..*n).collect();
        self.read_region(path, &meta, &region)
    }

    fn read_frame(&self, path: &str, index: usize) -> Result<Array2<f64>, StoreError> {
        let meta = self.array_meta(path)?;
        check_frame_request(path, &meta.shape, index)?;
        let region = vec![index..index + 1, 0..meta.shape[1], 0..meta.shape[2]];
        self.read_region(path, &meta, &region)?
            .index_axis_move(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|e| StoreError::BadMetadata {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}
