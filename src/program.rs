//! Kernel source loading, compilation and entry-point resolution.

use crate::backend::ComputeBackend;
use crate::context::ComputeContext;
use crate::error::{Error, Operation, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Kernel source text and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    origin: Option<PathBuf>,
    text: String,
}

impl KernelSource {
    /// Read the whole file as text. A file that exists but is not UTF-8 is
    /// reported as [`Error::SourceNotFound`] with an `InvalidData` source.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::SourceNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = text.len(), "kernel source read");
        Ok(Self {
            origin: Some(path.to_path_buf()),
            text,
        })
    }

    /// Source held in memory, with no file behind it.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            origin: None,
            text: text.into(),
        }
    }

    /// The file the source was read from, if any.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// The kernel text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A built program and the one kernel resolved from it.
pub struct CompiledKernel<'c, B: ComputeBackend> {
    // the kernel must be released before the program it came from
    kernel: B::Kernel,
    _program: B::Program,
    name: String,
    _context: &'c ComputeContext<'c, B>,
}

impl<B: ComputeBackend> CompiledKernel<'_, B> {
    /// Entry point name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn raw(&self) -> &B::Kernel {
        &self.kernel
    }
}

impl<B: ComputeBackend> fmt::Debug for CompiledKernel<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledKernel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Build `source` for every device in `context` and resolve `entry_point`.
///
/// A failed build logs the complete build log before returning
/// [`Error::BuildFailed`], which carries the same text. A build status
/// outside the known table becomes [`Error::UnknownStatus`], which has no
/// room for the log; in that case the log reaches the caller only through
/// the `error!` event.
pub fn compile<'c, B: ComputeBackend>(
    context: &'c ComputeContext<'c, B>,
    source: &KernelSource,
    entry_point: &str,
    options: &str,
) -> Result<CompiledKernel<'c, B>> {
    let backend = context.backend();

    let program = match backend.build_program(context.raw(), source.text(), options) {
        Ok(program) => program,
        Err(failure) => {
            let log = if failure.log.trim().is_empty() {
                format!("{} (the platform returned no build log)", failure.status)
            } else {
                failure.log
            };
            error!(status = %failure.status, "program build failed\n{}", log);
            if !failure.status.is_mapped() {
                return Err(Error::UnknownStatus {
                    operation: Operation::BuildProgram,
                    code: failure.status.code(),
                });
            }
            return Err(Error::BuildFailed {
                status: failure.status,
                log,
            });
        }
    };

    let kernel = backend.create_kernel(&program, entry_point).map_err(|status| {
        Error::from_status(Operation::CreateKernel, status, |status| Error::KernelNotFound {
            name: entry_point.to_string(),
            status,
        })
    })?;

    debug!(entry_point, "kernel resolved");
    Ok(CompiledKernel {
        kernel,
        _program: program,
        name: entry_point.to_string(),
        _context: context,
    })
}

/// Read, build and resolve in one step, with no extra build flags.
pub fn load_kernel<'c, B: ComputeBackend>(
    context: &'c ComputeContext<'c, B>,
    path: impl AsRef<Path>,
    entry_point: &str,
) -> Result<CompiledKernel<'c, B>> {
    let source = KernelSource::read(path)?;
    compile(context, &source, entry_point, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::device::DeviceClass;
    use crate::status::Status;
    use std::io::Write;

    const SRC: &str = "__kernel void render(__global uchar *out) {\n  out[0] = 0;\n}\n";

    fn backend() -> HostBackend {
        HostBackend::builder()
            .kernel("render", |item, out| out[item.pixel_index(3)] = 1)
            .build()
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SRC.as_bytes()).unwrap();

        let backend = backend();
        let devices = backend.device_ids(DeviceClass::Cpu, None).unwrap();
        let context = ComputeContext::create(&backend, &devices).unwrap();
        let kernel = load_kernel(&context, file.path(), "render").unwrap();
        assert_eq!(kernel.name(), "render");
        assert_eq!(backend.resources().live_kernels, 1);
    }

    #[test]
    fn test_missing_file() {
        let err = KernelSource::read("/definitely/not/here.cl").unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
        assert_eq!(err.operation(), Operation::ReadSource);
        assert!(err.to_string().contains("was not found"));
    }

    #[test]
    fn test_source_that_is_not_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x5f, 0xff, 0xfe, 0x00]).unwrap();

        let err = KernelSource::read(file.path()).unwrap_err();
        match &err {
            Error::SourceNotFound { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::InvalidData);
            }
            other => panic!("expected SourceNotFound, got {}", other),
        }
        let message = err.to_string();
        assert!(message.contains("is not valid UTF-8 text"));
        assert!(!message.contains("not found"));
    }

    #[test]
    fn test_syntax_error_has_log() {
        let backend = backend();
        let devices = backend.device_ids(DeviceClass::Cpu, None).unwrap();
        let context = ComputeContext::create(&backend, &devices).unwrap();
        let broken = KernelSource::from_text("__kernel void render(__global uchar *out) {\n");

        match compile(&context, &broken, "render", "") {
            Err(Error::BuildFailed { status, log }) => {
                assert_eq!(status, Status::BUILD_PROGRAM_FAILURE);
                assert!(!log.is_empty());
                assert!(log.contains(":1: error"));
            }
            other => panic!("expected BuildFailed, got {:?}", other.map(|k| k.name().to_string())),
        }
        assert_eq!(backend.resources().live_programs, 0);
    }

    #[test]
    fn test_build_status_mapping() {
        let backend = HostBackend::builder()
            .fail_build(Status::from_code(-3))
            .build();
        let devices = backend.device_ids(DeviceClass::Cpu, None).unwrap();
        let context = ComputeContext::create(&backend, &devices).unwrap();
        let err = compile(&context, &KernelSource::from_text(SRC), "render", "").unwrap_err();
        assert!(matches!(err, Error::BuildFailed { ref log, .. } if log.contains("compiler fault")));

        let backend = HostBackend::builder()
            .fail_build(Status::from_code(-9001))
            .build();
        let devices = backend.device_ids(DeviceClass::Cpu, None).unwrap();
        let context = ComputeContext::create(&backend, &devices).unwrap();
        let err = compile(&context, &KernelSource::from_text(SRC), "render", "").unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownStatus {
                operation: Operation::BuildProgram,
                code: -9001
            }
        ));
    }

    #[test]
    fn test_missing_entry_point() {
        let backend = backend();
        let devices = backend.device_ids(DeviceClass::Cpu, None).unwrap();
        let context = ComputeContext::create(&backend, &devices).unwrap();
        let source = KernelSource::from_text(SRC);

        let err = compile(&context, &source, "shade", "").unwrap_err();
        assert!(matches!(err, Error::KernelNotFound { ref name, .. } if name == "shade"));
        // the program built for the lookup is released with the error
        assert_eq!(backend.resources().live_programs, 0);
    }
}
