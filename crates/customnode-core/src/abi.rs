//! C ABI shared by every custom node library.
//!
//! A node crate exports four unmangled symbols (`execute`, `getInputsInfo`,
//! `getOutputsInfo`, `release`) whose bodies forward to the generic functions
//! here. Status is `0` on success and `1` on failure; on failure the output
//! pointers are null and there is nothing to release.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use tracing::{error, trace};

use crate::alloc::{self, HostAlloc};
use crate::{
    CustomNode, DType, NodeError, NodeParams, Shape, Tensor, TensorRef, TensorSpec, TensorStorage,
};

pub const STATUS_OK: c_int = 0;
pub const STATUS_FAILED: c_int = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CustomNodeTensor {
    pub name: *const c_char,
    pub data: *mut u8,
    pub data_length: u64,
    pub dims: *mut u64,
    pub dims_length: u64,
    pub precision: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CustomNodeTensorInfo {
    pub name: *const c_char,
    pub dims_length: u64,
    pub dims: *mut u64,
    pub precision: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CustomNodeParam {
    pub key: *const c_char,
    pub value: *const c_char,
}

impl DType {
    pub fn from_abi(code: c_int) -> Option<Self> {
        Some(match code {
            0 => DType::Unspecified,
            1 => DType::F32,
            2 => DType::F16,
            3 => DType::U8,
            4 => DType::I8,
            5 => DType::I16,
            6 => DType::U16,
            7 => DType::I32,
            8 => DType::F64,
            9 => DType::I64,
            _ => return None,
        })
    }

    pub fn to_abi(self) -> c_int {
        match self {
            DType::Unspecified => 0,
            DType::F32 => 1,
            DType::F16 => 2,
            DType::U8 => 3,
            DType::I8 => 4,
            DType::I16 => 5,
            DType::U16 => 6,
            DType::I32 => 7,
            DType::F64 => 8,
            DType::I64 => 9,
        }
    }
}

fn array_len(len: c_int, what: &str) -> Result<usize, NodeError> {
    usize::try_from(len)
        .map_err(|_| NodeError::InvalidArgument(format!("negative {what} length {len}")))
}

/// # Safety
///
/// A non-null `ptr` must be valid for `len` reads of `T` for `'a`.
unsafe fn raw_slice<'a, T>(ptr: *const T, len: u64, what: &str) -> Result<&'a [T], NodeError> {
    let len = usize::try_from(len)
        .map_err(|_| NodeError::InvalidArgument(format!("{what} length {len} out of range")))?;
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(NodeError::InvalidArgument(format!(
            "{what} is null but length is {len}"
        )));
    }
    // SAFETY: non-null and, per the caller contract, valid for `len` reads.
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

/// # Safety
///
/// A non-null `ptr` must point to a nul-terminated string living for `'a`.
unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, NodeError> {
    if ptr.is_null() {
        return Err(NodeError::InvalidArgument(format!("{what} is null")));
    }
    // SAFETY: non-null and nul-terminated per the caller contract.
    let raw = unsafe { CStr::from_ptr(ptr) };
    raw.to_str().map_err(|_| {
        NodeError::InvalidArgument(format!("{what} {:?} is not UTF-8", raw.to_string_lossy()))
    })
}

/// Borrows host input tensors without copying them.
///
/// # Safety
///
/// `inputs` must be null or point to `length` initialized entries whose
/// names, dims and data stay valid and unmodified for `'a`.
pub unsafe fn import_tensors<'a>(
    inputs: *const CustomNodeTensor,
    length: c_int,
) -> Result<Vec<TensorRef<'a>>, NodeError> {
    let length = array_len(length, "inputs")?;
    // SAFETY: forwarded caller contract.
    let raw = unsafe { raw_slice(inputs, length as u64, "inputs")? };

    raw.iter()
        .map(|t| -> Result<TensorRef<'a>, NodeError> {
            // SAFETY: forwarded caller contract for each entry.
            let name = unsafe { c_str(t.name, "input name")? };
            let dtype = DType::from_abi(t.precision).ok_or_else(|| {
                NodeError::InvalidArgument(format!(
                    "input {name} has unknown precision code {}",
                    t.precision
                ))
            })?;
            // SAFETY: as above.
            let dims = unsafe { raw_slice(t.dims, t.dims_length, "input dims")? };
            let data = unsafe { raw_slice(t.data.cast_const(), t.data_length, "input data")? };
            let shape = dims
                .iter()
                .map(|d| usize::try_from(*d))
                .collect::<Result<_, _>>()
                .map(Shape)
                .map_err(|_| NodeError::InvalidArgument(format!("input {name} dims overflow")))?;
            Ok(TensorRef::new(name, dtype, shape, data))
        })
        .collect()
}

/// # Safety
///
/// `params` must be null or point to `length` entries of valid C strings.
pub unsafe fn import_params(
    params: *const CustomNodeParam,
    length: c_int,
) -> Result<NodeParams, NodeError> {
    let length = array_len(length, "params")?;
    // SAFETY: forwarded caller contract.
    let raw = unsafe { raw_slice(params, length as u64, "params")? };
    raw.iter()
        .map(|p| -> Result<(String, String), NodeError> {
            // SAFETY: forwarded caller contract for each entry.
            let key = unsafe { c_str(p.key, "param key")? };
            let value = unsafe { c_str(p.value, "param value")? };
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn abi_dims(shape: &Shape) -> Vec<u64> {
    shape.dims().iter().map(|d| *d as u64).collect()
}

fn abi_length(len: usize) -> Result<c_int, NodeError> {
    c_int::try_from(len)
        .map_err(|_| NodeError::InvalidArgument(format!("{len} entries overflow c_int")))
}

/// Moves tensors into host-releasable memory and hands ownership over.
/// [`TensorStorage::Host`] buffers are handed over as they are; only
/// [`TensorStorage::CpuBytes`] payloads are copied.
///
/// Nothing is handed over unless every allocation succeeds.
pub fn export_tensors(tensors: Vec<Tensor>) -> Result<(*mut CustomNodeTensor, c_int), NodeError> {
    let count = abi_length(tensors.len())?;
    let mut staged = Vec::with_capacity(tensors.len());
    for tensor in tensors {
        let expected = tensor
            .desc
            .shape
            .byte_len(tensor.desc.dtype)
            .ok_or_else(|| NodeError::ShapeMismatch {
                name: tensor.name.to_string(),
                dims: tensor.desc.shape.clone(),
            })?;
        if expected != tensor.byte_len() {
            return Err(NodeError::DataLengthMismatch {
                name: tensor.name.to_string(),
                expected,
                found: tensor.byte_len(),
            });
        }
        let dims = HostAlloc::from_slice(abi_dims(&tensor.desc.shape).as_slice())?;
        let data = match tensor.storage {
            TensorStorage::Host(data) => data,
            TensorStorage::CpuBytes(bytes) => HostAlloc::from_slice(&bytes[..])?,
        };
        staged.push((tensor.name, tensor.desc.dtype, data, dims));
    }

    // SAFETY: null pointers and zero integers are a valid CustomNodeTensor.
    let mut array = unsafe { HostAlloc::<CustomNodeTensor>::zeroed(staged.len())? };
    for (slot, (name, dtype, data, dims)) in array.as_mut_slice().iter_mut().zip(staged) {
        *slot = CustomNodeTensor {
            name: name.as_c_str().as_ptr(),
            data_length: data.len() as u64,
            data: data.into_raw(),
            dims_length: dims.len() as u64,
            dims: dims.into_raw(),
            precision: dtype.to_abi(),
        };
    }
    Ok((array.into_raw(), count))
}

pub fn export_infos(specs: &[TensorSpec]) -> Result<(*mut CustomNodeTensorInfo, c_int), NodeError> {
    let count = abi_length(specs.len())?;
    let mut staged = Vec::with_capacity(specs.len());
    for spec in specs {
        staged.push((spec, HostAlloc::from_slice(abi_dims(&spec.shape).as_slice())?));
    }

    // SAFETY: null pointers and zero integers are a valid CustomNodeTensorInfo.
    let mut array = unsafe { HostAlloc::<CustomNodeTensorInfo>::zeroed(staged.len())? };
    for (slot, (spec, dims)) in array.as_mut_slice().iter_mut().zip(staged) {
        *slot = CustomNodeTensorInfo {
            name: spec.name.as_c_str().as_ptr(),
            dims_length: dims.len() as u64,
            dims: dims.into_raw(),
            precision: spec.dtype.to_abi(),
        };
    }
    Ok((array.into_raw(), count))
}

/// Frees an exported tensor array the way a host does: each buffer, each
/// dims array, then the array itself.
///
/// # Safety
///
/// `tensors`/`length` must come from one successful [`export_tensors`] call
/// and must not have been released.
pub unsafe fn release_tensors(tensors: *mut CustomNodeTensor, length: c_int) {
    if tensors.is_null() {
        return;
    }
    let length = usize::try_from(length).unwrap_or(0);
    // SAFETY: caller contract.
    unsafe {
        for t in std::slice::from_raw_parts(tensors, length) {
            alloc::release(t.data);
            alloc::release(t.dims.cast());
        }
        alloc::release(tensors.cast());
    }
}

/// # Safety
///
/// `infos`/`length` must come from one successful [`export_infos`] call and
/// must not have been released.
pub unsafe fn release_infos(infos: *mut CustomNodeTensorInfo, length: c_int) {
    if infos.is_null() {
        return;
    }
    let length = usize::try_from(length).unwrap_or(0);
    // SAFETY: caller contract.
    unsafe {
        for info in std::slice::from_raw_parts(infos, length) {
            alloc::release(info.dims.cast());
        }
        alloc::release(infos.cast());
    }
}

fn guarded<T>(node: &str, call: &str, f: impl FnOnce() -> Result<T, NodeError>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            error!(node, call, error = %err, "custom node call failed");
            None
        }
        Err(_) => {
            error!(node, call, "custom node call panicked");
            None
        }
    }
}

/// Body of the exported `execute` symbol.
///
/// # Safety
///
/// All pointers must satisfy the contracts of [`import_tensors`] and
/// [`import_params`]; `outputs` and `outputs_length` must be null or
/// writable.
pub unsafe fn execute<N: CustomNode>(
    node: &N,
    inputs: *const CustomNodeTensor,
    inputs_length: c_int,
    outputs: *mut *mut CustomNodeTensor,
    outputs_length: *mut c_int,
    params: *const CustomNodeParam,
    params_length: c_int,
) -> c_int {
    if outputs.is_null() || outputs_length.is_null() {
        error!(node = node.name(), "execute called with null output pointers");
        return STATUS_FAILED;
    }
    // SAFETY: both checked non-null and writable per the caller contract.
    unsafe {
        *outputs = ptr::null_mut();
        *outputs_length = 0;
    }

    let exported = guarded(node.name(), "execute", || {
        // SAFETY: forwarded caller contract.
        let inputs = unsafe { import_tensors(inputs, inputs_length)? };
        let params = unsafe { import_params(params, params_length)? };
        let produced = node.execute(&inputs, &params)?;
        export_tensors(produced)
    });

    match exported {
        Some((array, count)) => {
            // SAFETY: as above.
            unsafe {
                *outputs = array;
                *outputs_length = count;
            }
            STATUS_OK
        }
        None => STATUS_FAILED,
    }
}

/// # Safety
///
/// Same contract as [`execute`] for `info`, `info_length` and the params.
unsafe fn describe<N: CustomNode>(
    node: &N,
    call: &str,
    query: fn(&N, &NodeParams) -> Result<Vec<TensorSpec>, NodeError>,
    info: *mut *mut CustomNodeTensorInfo,
    info_length: *mut c_int,
    params: *const CustomNodeParam,
    params_length: c_int,
) -> c_int {
    if info.is_null() || info_length.is_null() {
        error!(node = node.name(), call, "called with null output pointers");
        return STATUS_FAILED;
    }
    // SAFETY: checked non-null and writable per the caller contract.
    unsafe {
        *info = ptr::null_mut();
        *info_length = 0;
    }

    let exported = guarded(node.name(), call, || {
        // SAFETY: forwarded caller contract.
        let params = unsafe { import_params(params, params_length)? };
        export_infos(&query(node, &params)?)
    });

    match exported {
        Some((array, count)) => {
            // SAFETY: as above.
            unsafe {
                *info = array;
                *info_length = count;
            }
            STATUS_OK
        }
        None => STATUS_FAILED,
    }
}

/// Body of the exported `getInputsInfo` symbol.
///
/// # Safety
///
/// See [`execute`].
pub unsafe fn inputs_info<N: CustomNode>(
    node: &N,
    info: *mut *mut CustomNodeTensorInfo,
    info_length: *mut c_int,
    params: *const CustomNodeParam,
    params_length: c_int,
) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe {
        describe(
            node,
            "getInputsInfo",
            N::inputs_info,
            info,
            info_length,
            params,
            params_length,
        )
    }
}

/// Body of the exported `getOutputsInfo` symbol.
///
/// # Safety
///
/// See [`execute`].
pub unsafe fn outputs_info<N: CustomNode>(
    node: &N,
    info: *mut *mut CustomNodeTensorInfo,
    info_length: *mut c_int,
    params: *const CustomNodeParam,
    params_length: c_int,
) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe {
        describe(
            node,
            "getOutputsInfo",
            N::outputs_info,
            info,
            info_length,
            params,
            params_length,
        )
    }
}

/// Body of the exported `release` symbol.
///
/// # Safety
///
/// `ptr` must be null or a single allocation previously returned by this
/// library through one of the calls above, not yet released.
pub unsafe fn release(node: &str, ptr: *mut c_void) -> c_int {
    trace!(node, ?ptr, "release");
    // SAFETY: forwarded caller contract.
    unsafe { alloc::release(ptr.cast()) };
    STATUS_OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{f32_bytes, F32Builder, IOName};

    const OUT: IOName = IOName::new(c"out");

    #[test]
    fn import_rejects_malformed_arrays() {
        assert!(matches!(
            unsafe { import_tensors(ptr::null(), -1) },
            Err(NodeError::InvalidArgument(_))
        ));
        assert!(matches!(
            unsafe { import_tensors(ptr::null(), 2) },
            Err(NodeError::InvalidArgument(_))
        ));
        assert!(unsafe { import_tensors(ptr::null(), 0) }.unwrap().is_empty());
    }

    #[test]
    fn import_borrows_host_tensor() {
        let mut dims = [1u64, 2];
        let mut data = f32_bytes([3.0f32, 4.0].into_iter()).unwrap().to_vec();
        let raw = [CustomNodeTensor {
            name: c"x".as_ptr(),
            data: data.as_mut_ptr(),
            data_length: data.len() as u64,
            dims: dims.as_mut_ptr(),
            dims_length: 2,
            precision: DType::F32.to_abi(),
        }];
        let tensors = unsafe { import_tensors(raw.as_ptr(), 1) }.unwrap();
        assert_eq!(tensors[0].name, "x");
        assert_eq!(tensors[0].shape, Shape::from_slice(&[1, 2]));
        assert_eq!(tensors[0].data.as_ptr(), data.as_ptr());
        assert_eq!(tensors[0].as_f32().unwrap().get(1), Some(4.0));
    }

    #[test]
    fn import_rejects_null_name_and_unknown_precision() {
        let mut entry = CustomNodeTensor {
            name: ptr::null(),
            data: ptr::null_mut(),
            data_length: 0,
            dims: ptr::null_mut(),
            dims_length: 0,
            precision: 1,
        };
        assert!(unsafe { import_tensors(&entry, 1) }.is_err());
        entry.name = c"x".as_ptr();
        entry.precision = 42;
        assert!(unsafe { import_tensors(&entry, 1) }.is_err());
    }

    #[test]
    fn import_params_reads_pairs() {
        let raw = [CustomNodeParam {
            key: c"k".as_ptr(),
            value: c"v".as_ptr(),
        }];
        let params = unsafe { import_params(raw.as_ptr(), 1) }.unwrap();
        assert_eq!(params.get("k"), Some("v"));
    }

    #[test]
    fn export_tensors_balances_allocations() {
        let before = alloc::outstanding();
        let tensor = Tensor::from_cpu_bytes(
            OUT,
            DType::F32,
            Shape::from_slice(&[1, 2]),
            f32_bytes([1.0f32, 2.0].into_iter()).unwrap(),
        );
        let (array, count) = export_tensors(vec![tensor]).unwrap();
        assert_eq!(count, 1);
        assert_eq!(alloc::outstanding(), before + 3);

        let exported = unsafe { &*array };
        assert_eq!(exported.data_length, 8);
        assert_eq!(unsafe { CStr::from_ptr(exported.name) }, c"out");
        assert_eq!(
            unsafe { std::slice::from_raw_parts(exported.dims, 2) },
            &[1, 2]
        );

        unsafe { release_tensors(array, count) };
        assert_eq!(alloc::outstanding(), before);
    }

    #[test]
    fn export_rejects_inconsistent_tensor_without_leaking() {
        let before = alloc::outstanding();
        let good = Tensor::from_cpu_bytes(
            OUT,
            DType::F32,
            Shape::from_slice(&[1]),
            f32_bytes([1.0f32].into_iter()).unwrap(),
        );
        let bad = Tensor::from_cpu_bytes(
            OUT,
            DType::F32,
            Shape::from_slice(&[1, 3]),
            f32_bytes([1.0f32].into_iter()).unwrap(),
        );
        assert!(matches!(
            export_tensors(vec![good, bad]),
            Err(NodeError::DataLengthMismatch {
                expected: 12,
                found: 4,
                ..
            })
        ));
        assert_eq!(alloc::outstanding(), before);
    }

    #[test]
    fn export_hands_over_host_storage_without_copying() {
        let before = alloc::outstanding();
        let mut builder = F32Builder::with_capacity(3).unwrap();
        for v in [1.0f32, 2.0, 3.0] {
            builder.push(v);
        }
        let data = builder.finish();
        let staged = data.as_slice().as_ptr();
        let tensor = Tensor::from_host(OUT, DType::F32, Shape::from_slice(&[1, 3]), data);
        assert_eq!(alloc::outstanding(), before + 1);

        let (array, count) = export_tensors(vec![tensor]).unwrap();
        assert_eq!(alloc::outstanding(), before + 3);
        let exported = unsafe { &*array };
        assert_eq!(exported.data.cast_const(), staged);
        assert_eq!(exported.data_length, 12);

        unsafe { release_tensors(array, count) };
        assert_eq!(alloc::outstanding(), before);
    }

    #[test]
    fn export_infos_balances_allocations() {
        let before = alloc::outstanding();
        let specs = [TensorSpec::new(OUT, DType::F32, &[1, 4, 4])];
        let (array, count) = export_infos(&specs).unwrap();
        assert_eq!(alloc::outstanding(), before + 2);
        let info = unsafe { &*array };
        assert_eq!(info.dims_length, 3);
        assert_eq!(info.precision, 1);
        unsafe { release_infos(array, count) };
        assert_eq!(alloc::outstanding(), before);
    }

    #[test]
    fn precision_codes_round_trip() {
        for code in 0..10 {
            assert_eq!(DType::from_abi(code).map(DType::to_abi), Some(code));
        }
        assert_eq!(DType::from_abi(10), None);
    }
}
