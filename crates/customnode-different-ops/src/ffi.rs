//! Unmangled entry points loaded by the host.

use std::ffi::{c_int, c_void};

use customnode_core::abi::{self, CustomNodeParam, CustomNodeTensor, CustomNodeTensorInfo};
use customnode_core::CustomNode;

use crate::DifferentOps;

static NODE: DifferentOps = DifferentOps;

/// # Safety
///
/// `inputs` must point to `inputs_length` valid tensors and `params` to
/// `params_length` valid key/value pairs, both borrowed for the call.
/// `outputs` and `outputs_length` must be writable. On status 0 every
/// returned data buffer, dims array and the array itself must later be
/// passed to [`release`] exactly once.
#[no_mangle]
pub unsafe extern "C" fn execute(
    inputs: *const CustomNodeTensor,
    inputs_length: c_int,
    outputs: *mut *mut CustomNodeTensor,
    outputs_length: *mut c_int,
    params: *const CustomNodeParam,
    params_length: c_int,
) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe {
        abi::execute(
            &NODE,
            inputs,
            inputs_length,
            outputs,
            outputs_length,
            params,
            params_length,
        )
    }
}

/// # Safety
///
/// `info` and `info_length` must be writable; `params` as for [`execute`].
/// On status 0 each dims array and the array itself go back through
/// [`release`].
#[export_name = "getInputsInfo"]
pub unsafe extern "C" fn get_inputs_info(
    info: *mut *mut CustomNodeTensorInfo,
    info_length: *mut c_int,
    params: *const CustomNodeParam,
    params_length: c_int,
) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { abi::inputs_info(&NODE, info, info_length, params, params_length) }
}

/// # Safety
///
/// See [`get_inputs_info`].
#[export_name = "getOutputsInfo"]
pub unsafe extern "C" fn get_outputs_info(
    info: *mut *mut CustomNodeTensorInfo,
    info_length: *mut c_int,
    params: *const CustomNodeParam,
    params_length: c_int,
) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { abi::outputs_info(&NODE, info, info_length, params, params_length) }
}

/// # Safety
///
/// `ptr` must be null or one allocation returned by this library and not
/// released before.
#[no_mangle]
pub unsafe extern "C" fn release(ptr: *mut c_void) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { abi::release(NODE.name(), ptr) }
}
