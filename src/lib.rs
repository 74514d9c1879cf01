//! Strata - band-partitioned dispatch across heterogeneous compute devices
//!
//! Strata renders a per-pixel kernel over a 2D image by splitting the image
//! into horizontal bands, one per compute device, submitting every band to
//! its own device queue without blocking, and collecting the bands into one
//! host buffer.
//!
//! # Quick Start
//!
//! ```no_run
//! use strata::prelude::*;
//!
//! let backend = HostBackend::builder()
//!     .gpus(2)
//!     .kernel("render", |item, out| {
//!         let idx = item.pixel_index(3);
//!         out[idx] = ((item.x() + item.y()) % 256) as u8;
//!     })
//!     .build();
//!
//! let config = Config::builder()
//!     .dimensions(640, 480)
//!     .kernel_path("kernels/gradient.cl")
//!     .build()
//!     .unwrap();
//!
//! let image = Engine::new(backend, config).unwrap().render().unwrap();
//! assert_eq!(image.as_bytes().len(), 640 * 480 * 3);
//! ```
//!
//! # Pipeline
//!
//! - **Device discovery**: preferred class first, fallback class if empty
//! - **Context**: one context over every selected device
//! - **Program**: kernel source built for every device, build log on failure
//! - **Queues**: one in-order queue per device
//! - **Partition**: contiguous row bands with a configurable remainder policy
//! - **Dispatch**: non-blocking launch and read-back per band, then a join
//!
//! # Platforms
//!
//! - [`backend::HostBackend`]: in-process software platform, always available
//! - `backend::OpenClBackend`: real devices via `opencl3` (feature `opencl`)

#![warn(missing_docs, missing_debug_implementations)]

pub mod backend;
pub mod config;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod partition;
pub mod prelude;
pub mod program;
pub mod queue;
pub mod status;
pub mod telemetry;

// Re-export key types at crate root
pub use backend::{BuildFailure, ComputeBackend, HostBackend};
pub use config::{Config, ConfigBuilder};
pub use device::{DeviceClass, DeviceInfo};
pub use engine::{Engine, HostImage, ImageEncoder, Render};
pub use error::{Error, Result};
pub use partition::{Band, RemainderPolicy};
pub use status::{Status, StatusCategory};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GRADIENT: &str = "__kernel void render(__global uchar *out) {\n  /* (x + y) % 256 */\n}\n";

    #[test]
    fn test_render_end_to_end() {
        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(GRADIENT.as_bytes()).unwrap();

        let backend = HostBackend::builder()
            .gpus(2)
            .kernel("render", |item, out| {
                let idx = item.pixel_index(3);
                out[idx] = ((item.x() + item.y()) % 256) as u8;
            })
            .build();
        let config = Config::builder()
            .dimensions(8, 6)
            .kernel_path(source.path())
            .build()
            .unwrap();

        let engine = Engine::new(backend.clone(), config).unwrap();
        let image = engine.render().unwrap();

        assert_eq!(image.pixel(3, 4), Some(&[7, 0, 0][..]));
        assert!(backend.resources().all_released());
    }
}
