//! Per-invocation operator context supplied by the dispatch engine.

use std::sync::Arc;

use crate::device::{DevicePtr, DeviceStream};

/// Device-resident tensor as seen by a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTensor {
    pub ptr: DevicePtr,
    pub shape: Vec<usize>,
    pub elem_size: usize,
}

impl DeviceTensor {
    pub fn new(ptr: DevicePtr, shape: Vec<usize>, elem_size: usize) -> Self {
        Self {
            ptr,
            shape,
            elem_size,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.elem_size
    }

    /// Byte size, or `None` if the shape overflows.
    pub fn byte_size(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(self.elem_size, |acc, &dim| acc.checked_mul(dim))
    }
}

/// Stream and tensors for one kernel invocation. Borrowed by the kernel for
/// the duration of the call only.
pub struct OpContext {
    stream: Arc<dyn DeviceStream>,
    inputs: Vec<DeviceTensor>,
    outputs: Vec<DeviceTensor>,
}

impl OpContext {
    pub fn new(stream: Arc<dyn DeviceStream>) -> Self {
        Self {
            stream,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_input(mut self, tensor: DeviceTensor) -> Self {
        self.inputs.push(tensor);
        self
    }

    pub fn with_output(mut self, tensor: DeviceTensor) -> Self {
        self.outputs.push(tensor);
        self
    }

    pub fn compute_stream(&self) -> &Arc<dyn DeviceStream> {
        &self.stream
    }

    pub fn input(&self, index: usize) -> Option<&DeviceTensor> {
        self.inputs.get(index)
    }

    pub fn output(&self, index: usize) -> Option<&DeviceTensor> {
        self.outputs.get(index)
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDevice;

    #[test]
    fn tensor_sizes() {
        let t = DeviceTensor::new(DevicePtr(0x100), vec![2, 3], 4);
        assert_eq!(t.len(), 6);
        assert_eq!(t.size_in_bytes(), 24);
        assert!(DeviceTensor::new(DevicePtr::NULL, vec![0, 5], 4).is_empty());
        assert_eq!(t.byte_size(), Some(24));
        assert_eq!(DeviceTensor::new(DevicePtr(0x100), vec![usize::MAX, 2], 4).byte_size(), None);
    }

    #[test]
    fn context_exposes_stream_and_tensors() {
        let device = MockDevice::new(1024, 0);
        let stream = device.create_stream().unwrap();
        let handle = stream.handle();
        let ctx = OpContext::new(stream)
            .with_input(DeviceTensor::new(DevicePtr(0x10), vec![4], 4))
            .with_output(DeviceTensor::new(DevicePtr(0x20), vec![4], 4));

        assert_eq!(ctx.compute_stream().handle(), handle);
        assert_eq!(ctx.input_count(), 1);
        assert_eq!(ctx.output(0).unwrap().ptr, DevicePtr(0x20));
        assert!(ctx.input(1).is_none());
    }
}
