//! Render `kernels/mandelbrot.cl` across every available device and write
//! `output.bmp`.
//!
//! ```text
//! cargo run --example mandelbrot                    # host platform, 2 simulated GPUs
//! cargo run --example mandelbrot --features opencl  # real OpenCL devices
//! RUST_LOG=strata=debug cargo run --example mandelbrot
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use strata::prelude::*;
use tracing_subscriber::EnvFilter;

const MAX_ITERATIONS: u32 = 255;

// Same math as the OpenCL kernel, linked into the host platform.
fn mandelbrot(item: &WorkItem, out: &mut [u8]) {
    let width = item.global_size[0] as f32;
    let height = width;
    let cx = (item.x() as f32 / width) * 3.0 - 2.0;
    let cy = (item.y() as f32 / height) * 3.0 - 1.5;

    let (mut zx, mut zy) = (0.0f32, 0.0f32);
    let mut iteration = 0;
    while zx * zx + zy * zy < 4.0 && iteration < MAX_ITERATIONS {
        let t = zx * zx - zy * zy + cx;
        zy = 2.0 * zx * zy + cy;
        zx = t;
        iteration += 1;
    }

    let idx = item.pixel_index(3);
    let shade = (MAX_ITERATIONS - iteration) as u8;
    out[idx] = shade;
    out[idx + 1] = shade / 2;
    out[idx + 2] = if iteration == MAX_ITERATIONS { 0 } else { 255 - shade };
}

/// 24-bit uncompressed BMP, bottom-up rows, BGR channel order.
struct BmpEncoder {
    path: PathBuf,
}

impl ImageEncoder for BmpEncoder {
    fn encode(&mut self, image: &HostImage) -> strata::Result<()> {
        let (width, height) = (image.width(), image.height());
        let row_len = width * 3;
        let padded = (row_len + 3) & !3;
        let pixel_bytes = padded * height;
        let file_size = 54 + pixel_bytes;

        let mut out = BufWriter::new(File::create(&self.path)?);
        out.write_all(b"BM")?;
        out.write_all(&(file_size as u32).to_le_bytes())?;
        out.write_all(&[0; 4])?;
        out.write_all(&54u32.to_le_bytes())?;
        out.write_all(&40u32.to_le_bytes())?;
        out.write_all(&(width as i32).to_le_bytes())?;
        out.write_all(&(height as i32).to_le_bytes())?;
        out.write_all(&1u16.to_le_bytes())?;
        out.write_all(&24u16.to_le_bytes())?;
        out.write_all(&[0; 4])?;
        out.write_all(&(pixel_bytes as u32).to_le_bytes())?;
        out.write_all(&[0; 16])?;

        let mut row = vec![0u8; padded];
        for y in (0..height).rev() {
            let src = image
                .row(y)
                .ok_or_else(|| Error::config(format!("image has no row {}", y)))?;
            for (dst, rgb) in row.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
                dst.copy_from_slice(&[rgb[2], rgb[1], rgb[0]]);
            }
            out.write_all(&row)?;
        }
        out.flush()?;
        Ok(())
    }
}

fn config() -> Result<Config> {
    let kernel_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("kernels/mandelbrot.cl");
    Config::builder()
        .dimensions(1024, 1024)
        .kernel_path(kernel_path)
        .build()
}

fn run<B: ComputeBackend>(backend: B) -> Result<()> {
    let engine = Engine::new(backend, config()?)?;
    let mut encoder = BmpEncoder {
        path: PathBuf::from("output.bmp"),
    };
    let image = engine.render_to(&mut encoder)?;
    println!(
        "Wrote {}x{} image to {}",
        image.width(),
        image.height(),
        encoder.path.display()
    );

    #[cfg(feature = "telemetry")]
    ConsoleExporter::new(true).export(&engine.metrics_snapshot())?;

    Ok(())
}

#[cfg(feature = "opencl")]
fn main_with_backend() -> Result<()> {
    match OpenClBackend::new() {
        Ok(backend) => run(backend),
        Err(status) => {
            eprintln!("No OpenCL platform ({}), using the host platform", status);
            run(host_backend())
        }
    }
}

#[cfg(not(feature = "opencl"))]
fn main_with_backend() -> Result<()> {
    run(host_backend())
}

fn host_backend() -> HostBackend {
    HostBackend::builder()
        .gpus(2)
        .kernel("render", mandelbrot)
        .build()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = main_with_backend() {
        eprintln!("{}", err.diagnostic());
        std::process::exit(1);
    }
}
