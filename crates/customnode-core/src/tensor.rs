use std::ffi::CStr;
use std::fmt;

use bytes::Bytes;
use smallvec::SmallVec;

use crate::alloc::HostAlloc;
use crate::NodeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    Unspecified,
    F32,
    F16,
    U8,
    I8,
    I16,
    U16,
    I32,
    F64,
    I64,
}

impl DType {
    pub fn byte_size(self) -> usize {
        match self {
            DType::Unspecified => 0,
            DType::U8 | DType::I8 => 1,
            DType::F16 | DType::I16 | DType::U16 => 2,
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Unspecified => "UNSPECIFIED",
            DType::F32 => "FP32",
            DType::F16 => "FP16",
            DType::U8 => "U8",
            DType::I8 => "I8",
            DType::I16 => "I16",
            DType::U16 => "U16",
            DType::I32 => "I32",
            DType::F64 => "FP64",
            DType::I64 => "I64",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Element count. A zero dimension yields zero; `None` on overflow.
    pub fn numel(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d))
    }

    /// Byte length of a dense row-major buffer of `dtype` with this shape.
    pub fn byte_len(&self, dtype: DType) -> Option<usize> {
        self.numel()?.checked_mul(dtype.byte_size())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

/// Tensor name with static storage, so it can be handed to the host as a
/// C string without an allocation the host would have to release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IOName(pub &'static CStr);

impl IOName {
    pub const fn new(name: &'static CStr) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0.to_str().unwrap_or_default()
    }

    pub fn as_c_str(&self) -> &'static CStr {
        self.0
    }
}

impl fmt::Display for IOName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string_lossy())
    }
}

impl PartialEq<str> for IOName {
    fn eq(&self, other: &str) -> bool {
        self.0.to_bytes() == other.as_bytes()
    }
}

/// Borrowed view of a host-owned input tensor. Nothing here is copied or
/// freed by the node.
#[derive(Clone, Debug)]
pub struct TensorRef<'a> {
    pub name: &'a str,
    pub dtype: DType,
    pub shape: Shape,
    pub data: &'a [u8],
}

impl<'a> TensorRef<'a> {
    pub fn new(name: &'a str, dtype: DType, shape: Shape, data: &'a [u8]) -> Self {
        Self {
            name,
            dtype,
            shape,
            data,
        }
    }

    /// Interprets the payload as FP32, checking precision and byte length
    /// against the declared shape first.
    pub fn as_f32(&self) -> Result<F32Slice<'a>, NodeError> {
        if self.dtype != DType::F32 {
            return Err(NodeError::PrecisionMismatch {
                name: self.name.to_string(),
                expected: DType::F32,
                found: self.dtype,
            });
        }
        let expected = self
            .shape
            .byte_len(DType::F32)
            .ok_or_else(|| NodeError::ShapeMismatch {
                name: self.name.to_string(),
                dims: self.shape.clone(),
            })?;
        if self.data.len() != expected {
            return Err(NodeError::DataLengthMismatch {
                name: self.name.to_string(),
                expected,
                found: self.data.len(),
            });
        }
        Ok(F32Slice::new(self.data))
    }
}

/// FP32 values read in place from a byte buffer of unknown alignment.
#[derive(Clone, Copy, Debug)]
pub struct F32Slice<'a> {
    bytes: &'a [u8],
}

impl<'a> F32Slice<'a> {
    /// Trailing bytes that do not form a whole value are ignored.
    pub fn new(bytes: &'a [u8]) -> Self {
        let whole = bytes.len() - bytes.len() % 4;
        Self {
            bytes: &bytes[..whole],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<f32> {
        let start = idx.checked_mul(4)?;
        let b = self.bytes.get(start..start.checked_add(4)?)?;
        Some(f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = f32> + 'a {
        self.bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[derive(Clone, Debug)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
}

/// Where an output tensor's bytes live.
#[derive(Debug)]
pub enum TensorStorage {
    CpuBytes(Bytes),
    /// Already in host-releasable memory; exported without a copy.
    Host(HostAlloc<u8>),
}

impl TensorStorage {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TensorStorage::CpuBytes(b) => b,
            TensorStorage::Host(h) => h.as_slice(),
        }
    }
}

/// An output tensor owned by the node until it is exported to the host.
#[derive(Debug)]
pub struct Tensor {
    pub name: IOName,
    pub desc: TensorDesc,
    pub storage: TensorStorage,
}

impl Tensor {
    pub fn from_cpu_bytes(name: IOName, dtype: DType, shape: Shape, bytes: Bytes) -> Self {
        Self {
            name,
            desc: TensorDesc { dtype, shape },
            storage: TensorStorage::CpuBytes(bytes),
        }
    }

    pub fn from_host(name: IOName, dtype: DType, shape: Shape, data: HostAlloc<u8>) -> Self {
        Self {
            name,
            desc: TensorDesc { dtype, shape },
            storage: TensorStorage::Host(data),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.storage.as_bytes()
    }

    pub fn byte_len(&self) -> usize {
        self.bytes().len()
    }

    pub fn view(&self) -> TensorRef<'_> {
        TensorRef::new(
            self.name.as_str(),
            self.desc.dtype,
            self.desc.shape.clone(),
            self.bytes(),
        )
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        F32Slice::new(self.bytes()).iter().collect()
    }
}

/// FP32 output buffer allocated up front in host-releasable memory, so
/// running out of memory surfaces as an error instead of an abort and the
/// finished buffer can be handed to the host as is.
#[derive(Debug)]
pub struct F32Builder {
    buf: HostAlloc<u8>,
    filled: usize,
}

impl F32Builder {
    pub fn with_capacity(values: usize) -> Result<Self, NodeError> {
        let bytes = values
            .checked_mul(DType::F32.byte_size())
            .ok_or(NodeError::AllocationFailure { bytes: usize::MAX })?;
        Ok(Self {
            buf: HostAlloc::zeroed_bytes(bytes)?,
            filled: 0,
        })
    }

    /// Panics when pushing past the reserved capacity.
    pub fn push(&mut self, value: f32) {
        let end = self.filled + 4;
        self.buf.as_mut_slice()[self.filled..end].copy_from_slice(&value.to_ne_bytes());
        self.filled = end;
    }

    pub fn len(&self) -> usize {
        self.filled / 4
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// The pushed values; unused capacity is cut off.
    pub fn finish(mut self) -> HostAlloc<u8> {
        self.buf.truncate(self.filled);
        self.buf
    }
}

pub fn f32_bytes(values: impl ExactSizeIterator<Item = f32>) -> Result<Bytes, NodeError> {
    let bytes = values
        .len()
        .checked_mul(DType::F32.byte_size())
        .ok_or(NodeError::AllocationFailure { bytes: usize::MAX })?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|_| NodeError::AllocationFailure { bytes })?;
    for v in values {
        buf.extend_from_slice(&v.to_ne_bytes());
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numel_handles_zero_and_overflow() {
        assert_eq!(Shape::from_slice(&[1, 4, 10]).numel(), Some(40));
        assert_eq!(Shape::from_slice(&[1, 0]).numel(), Some(0));
        assert_eq!(Shape::from_slice(&[]).numel(), Some(1));
        assert_eq!(Shape::from_slice(&[usize::MAX, 2]).numel(), None);
    }

    #[test]
    fn f32_slice_reads_unaligned_bytes() {
        let mut raw = vec![0u8];
        raw.extend_from_slice(&1.5f32.to_ne_bytes());
        raw.extend_from_slice(&(-2.0f32).to_ne_bytes());
        let view = F32Slice::new(&raw[1..]);
        assert_eq!(view.len(), 2);
        assert_eq!(view.get(1), Some(-2.0));
        assert_eq!(view.get(2), None);
        assert_eq!(view.iter().collect::<Vec<_>>(), vec![1.5, -2.0]);
    }

    #[test]
    fn as_f32_rejects_wrong_precision_and_length() {
        let data = f32_bytes([1.0f32, 2.0].into_iter()).unwrap();
        let short = TensorRef::new("x", DType::F32, Shape::from_slice(&[1, 3]), &data);
        assert!(matches!(
            short.as_f32(),
            Err(NodeError::DataLengthMismatch {
                expected: 12,
                found: 8,
                ..
            })
        ));

        let wrong = TensorRef::new("x", DType::I32, Shape::from_slice(&[1, 2]), &data);
        assert!(matches!(
            wrong.as_f32(),
            Err(NodeError::PrecisionMismatch { .. })
        ));
    }

    #[test]
    fn builder_reports_oversized_requests() {
        assert!(matches!(
            F32Builder::with_capacity(usize::MAX),
            Err(NodeError::AllocationFailure { .. })
        ));
        let mut b = F32Builder::with_capacity(3).unwrap();
        b.push(1.0);
        b.push(f32::INFINITY);
        assert_eq!(b.len(), 2);
        let out = b.finish();
        assert_eq!(out.len(), 8);
        assert_eq!(F32Slice::new(out.as_slice()).get(1), Some(f32::INFINITY));
    }

    #[test]
    fn shape_display_lists_dims() {
        assert_eq!(Shape::from_slice(&[1, 4, 4]).to_string(), "[1, 4, 4]");
    }
}
