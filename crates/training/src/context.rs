//! Execution context: the backend device, resolved once at startup.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

/// Device handle passed to every tensor-producing call.
///
/// Training uses the `Autodiff` context from [`ExecutionContext::autodiff`]; evaluation uses the
/// plain backend context, where dropout is the identity.
#[derive(Debug, Clone)]
pub struct ExecutionContext<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ExecutionContext<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Pick the backend's default device.
    pub fn resolve() -> Self {
        Self::new(B::Device::default())
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Same device, wrapped for gradient tracking.
    pub fn autodiff(&self) -> ExecutionContext<Autodiff<B>> {
        ExecutionContext::new(self.device.clone())
    }

    pub fn describe(&self) -> String {
        format!("{:?}", self.device)
    }
}
