use std::sync::Arc;

use crate::models::device::Device;
use crate::models::error::CaptureError;
use crate::models::format::WaveFormat;

/// Callback invoked with each captured buffer of interleaved bytes in the
/// provider's [`WaveFormat`].
pub type CaptureCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// One capture stream bound to a single endpoint.
///
/// Implemented by:
/// - `WasapiCapture` (Windows; loopback plus a silent render stream for outputs)
/// - `MockCapture` (tests and hosts without a capture backend)
pub trait CaptureProvider: Send {
    /// Endpoint this stream records.
    fn device(&self) -> &Device;

    /// Layout of the bytes handed to the callback.
    fn format(&self) -> WaveFormat;

    /// Start capturing, delivering buffers via `callback`.
    ///
    /// The callback fires on a dedicated audio thread. Keep processing minimal.
    fn start(&mut self, callback: CaptureCallback) -> Result<(), CaptureError>;

    /// Stop capturing and block until the capture thread has acknowledged.
    ///
    /// No callback may run after this returns.
    fn stop(&mut self) -> Result<(), CaptureError>;
}
