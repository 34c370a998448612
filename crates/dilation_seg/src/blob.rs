//! Binary blob files for feature dumps.
//!
//! Layout, all little-endian:
//!
//! ```text
//! i32 type tag      5 = f32, 6 = f64 (OpenCV depth codes)
//! i32 rank
//! i32 × rank        shape
//! elements          row-major, no padding
//! ```

use std::fs;
use std::path::Path;

use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};

use crate::error::{Error, Result};

pub const TAG_F32: i32 = 5;
pub const TAG_F64: i32 = 6;

/// Element types that can appear in a blob array. Only types with a
/// [`BlobElement::TYPE_TAG`] can be written or read.
pub trait BlobElement: Copy + 'static {
    const NAME: &'static str;
    const TYPE_TAG: Option<i32>;
    const SIZE: usize;

    fn put_le(self, out: &mut Vec<u8>);
    fn get_le(bytes: &[u8]) -> Self;
}

macro_rules! blob_element {
    ($ty:ty, $tag:expr) => {
        impl BlobElement for $ty {
            const NAME: &'static str = stringify!($ty);
            const TYPE_TAG: Option<i32> = $tag;
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn put_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn get_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

blob_element!(f32, Some(TAG_F32));
blob_element!(f64, Some(TAG_F64));
blob_element!(u8, None);
blob_element!(u16, None);
blob_element!(i16, None);
blob_element!(i32, None);

fn type_tag<T: BlobElement>() -> Result<i32> {
    T::TYPE_TAG.ok_or(Error::UnsupportedElement(T::NAME))
}

/// Serialize an array into blob bytes.
pub fn encode_blob<T, S, D>(array: &ArrayBase<S, D>) -> Result<Vec<u8>>
where
    T: BlobElement,
    S: Data<Elem = T>,
    D: Dimension,
{
    let tag = type_tag::<T>()?;
    let rank = i32::try_from(array.ndim())
        .map_err(|_| Error::Format(format!("rank {} does not fit in i32", array.ndim())))?;

    let mut out = Vec::with_capacity(4 * (2 + array.ndim()) + array.len() * T::SIZE);
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&rank.to_le_bytes());
    for &dim in array.shape() {
        let dim = i32::try_from(dim)
            .map_err(|_| Error::Format(format!("dimension {dim} does not fit in i32")))?;
        out.extend_from_slice(&dim.to_le_bytes());
    }
    // `iter` walks logical row-major order whatever the memory layout.
    for &value in array.iter() {
        value.put_le(&mut out);
    }
    Ok(out)
}

/// Write `array` to `path`. Unsupported element types fail before the file
/// is created.
pub fn write_blob<T, S, D>(path: &Path, array: &ArrayBase<S, D>) -> Result<()>
where
    T: BlobElement,
    S: Data<Elem = T>,
    D: Dimension,
{
    let bytes = encode_blob(array)?;
    fs::write(path, bytes).map_err(|e| Error::io(path, e))
}

/// Blob contents with the element type chosen by the file's tag.
#[derive(Debug, Clone, PartialEq)]
pub enum BlobArray {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl BlobArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            BlobArray::F32(a) => a.shape(),
            BlobArray::F64(a) => a.shape(),
        }
    }
}

struct Header {
    tag: i32,
    shape: Vec<usize>,
    data_offset: usize,
}

fn read_i32(bytes: &[u8], offset: usize) -> Result<i32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::Format(format!("truncated header at byte {offset}")))
}

fn parse_header(bytes: &[u8]) -> Result<Header> {
    let tag = read_i32(bytes, 0)?;
    let rank = read_i32(bytes, 4)?;
    if rank < 0 {
        return Err(Error::Format(format!("negative rank {rank}")));
    }
    let rank = rank as usize;
    let data_offset = rank
        .checked_mul(4)
        .and_then(|dims| dims.checked_add(8))
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            Error::Format(format!(
                "rank {rank} needs more header bytes than the {} available",
                bytes.len()
            ))
        })?;
    let mut shape = Vec::with_capacity(rank);
    for axis in 0..rank {
        let dim = read_i32(bytes, 8 + 4 * axis)?;
        if dim < 0 {
            return Err(Error::Format(format!("negative dimension {dim} on axis {axis}")));
        }
        shape.push(dim as usize);
    }
    Ok(Header {
        tag,
        shape,
        data_offset,
    })
}

fn decode_payload<T: BlobElement>(bytes: &[u8], header: &Header) -> Result<ArrayD<T>> {
    let needed = header
        .shape
        .iter()
        .try_fold(T::SIZE, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| {
            Error::Format(format!("shape {:?} overflows the payload size", header.shape))
        })?;
    let payload = &bytes[header.data_offset..];
    if payload.len() != needed {
        return Err(Error::Format(format!(
            "shape {:?} needs {needed} payload bytes, found {}",
            header.shape,
            payload.len()
        )));
    }
    let values: Vec<T> = payload.chunks_exact(T::SIZE).map(T::get_le).collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&header.shape), values)?)
}

/// Decode blob bytes whose tag must match `T`.
pub fn decode_blob<T: BlobElement>(bytes: &[u8]) -> Result<ArrayD<T>> {
    let expected = type_tag::<T>()?;
    let header = parse_header(bytes)?;
    if header.tag != expected {
        return Err(Error::Format(format!(
            "type tag {} does not match {} (tag {expected})",
            header.tag,
            T::NAME
        )));
    }
    decode_payload(bytes, &header)
}

pub fn decode_blob_any(bytes: &[u8]) -> Result<BlobArray> {
    let header = parse_header(bytes)?;
    match header.tag {
        TAG_F32 => Ok(BlobArray::F32(decode_payload(bytes, &header)?)),
        TAG_F64 => Ok(BlobArray::F64(decode_payload(bytes, &header)?)),
        other => Err(Error::Format(format!("unknown type tag {other}"))),
    }
}

pub fn read_blob<T: BlobElement>(path: &Path) -> Result<ArrayD<T>> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    decode_blob(&bytes)
}

pub fn read_blob_any(path: &Path) -> Result<BlobArray> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    decode_blob_any(&bytes)
}
