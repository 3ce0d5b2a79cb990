//! Platform, device and buffer handles.
//!
//! A [`Platform`] wraps one backend client, constructed explicitly at
//! startup and passed down; there is no global registry. The bridge exposes
//! exactly one device per platform.

use std::sync::Arc;

use crate::backend::{PluginBuffer, PluginClient};
use crate::error::{Error, Result};
use crate::tensor::{HostBuffer, Shape};
use crate::{trace, warning};

struct PlatformInner {
    client: Arc<dyn PluginClient>,
}

/// One backend client. Cheap to clone; clones refer to the same client.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

impl Platform {
    pub fn new(client: Arc<dyn PluginClient>) -> Self {
        Self {
            inner: Arc::new(PlatformInner { client }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.client.name()
    }

    pub(crate) fn client(&self) -> &Arc<dyn PluginClient> {
        &self.inner.client
    }

    /// The platform's device. There is exactly one, at ordinal 0.
    pub fn device(&self, ordinal: usize) -> Result<Device> {
        if ordinal != 0 {
            return Err(Error::InvalidArgument(format!(
                "platform {} has a single device, ordinal {ordinal} does not exist",
                self.name()
            )));
        }
        Ok(Device {
            platform: self.clone(),
            ordinal,
        })
    }
}

// Two platforms are the same platform iff they share the client instance.
impl PartialEq for Platform {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Platform {}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Platform({})", self.name())
    }
}

/// One execution target on a platform.
#[derive(Clone, Debug)]
pub struct Device {
    platform: Platform,
    ordinal: usize,
}

impl Device {
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Synchronously transfer host data to this device.
    pub fn send(&self, data: &HostBuffer) -> Result<Handle> {
        let shape = data.shape();
        let dtype = shape.dtype;
        if !self.platform.client().supports_dtype(dtype) {
            return Err(Error::UnsupportedDType {
                dtype,
                backend: self.platform.name().to_string(),
            });
        }
        trace!("sending {} to {}:{}", shape, self.platform.name(), self.ordinal);
        let buffer = self.platform.client().buffer_from_host(data.bytes(), shape)?;
        Ok(Handle {
            device: self.clone(),
            buffer,
            shape: shape.clone(),
        })
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.platform == other.platform && self.ordinal == other.ordinal
    }
}

impl Eq for Device {}

/// Reference to a buffer resident on one device.
///
/// Clones share the underlying buffer; dropping the last reference releases
/// it. The shape is the one declared when the handle was created.
#[derive(Clone)]
pub struct Handle {
    device: Device,
    buffer: PluginBuffer,
    shape: Shape,
}

impl Handle {
    pub(crate) fn new(device: Device, buffer: PluginBuffer, shape: Shape) -> Self {
        Self {
            device,
            buffer,
            shape,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn buffer(&self) -> &PluginBuffer {
        &self.buffer
    }

    /// Synchronously transfer the buffer back to the host.
    pub fn to_host(&self) -> Result<HostBuffer> {
        let bytes = self.device.platform.client().buffer_to_host(&self.buffer)?;
        HostBuffer::from_bytes(self.shape.clone(), bytes)
    }

    /// Transfer to another device. The same device yields a cheap clone;
    /// otherwise the data bounces through the host. The original handle
    /// stays valid either way.
    pub fn to_device(&self, device: &Device) -> Result<Handle> {
        if *device == self.device {
            return Ok(self.clone());
        }
        warning!(
            "transferring {} between devices through the host",
            self.shape
        );
        let host = self.to_host()?;
        device.send(&host)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Handle({} on {}:{})",
            self.shape,
            self.device.platform.name(),
            self.device.ordinal
        )
    }
}
