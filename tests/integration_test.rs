use std::io::Write;
use std::path::Path;
use strata::backend::HostBackendBuilder;
use strata::prelude::*;
use tempfile::NamedTempFile;

const GRADIENT_SRC: &str = r#"
// every channel of every pixel gets (x + y) mod 256
__kernel void render(__global uchar *out) {
    int x = get_global_id(0);
    int y = get_global_id(1);
    int idx = (y * get_global_size(0) + x) * 3;
    uchar v = (uchar)((x + y) % 256);
    out[idx] = v;
    out[idx + 1] = v;
    out[idx + 2] = v;
}
"#;

fn gradient(item: &WorkItem, out: &mut [u8]) {
    let idx = item.pixel_index(3);
    let v = ((item.x() + item.y()) % 256) as u8;
    out[idx..idx + 3].copy_from_slice(&[v, v, v]);
}

fn source_file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

fn backend(gpus: usize) -> HostBackendBuilder {
    HostBackend::builder().gpus(gpus).kernel("render", gradient)
}

fn config(path: &Path, width: usize, height: usize) -> Config {
    Config::builder()
        .dimensions(width, height)
        .kernel_path(path)
        .build()
        .unwrap()
}

fn expected_band(width: usize, rows: std::ops::Range<usize>) -> Vec<u8> {
    let mut out = Vec::new();
    for y in rows {
        for x in 0..width {
            let v = ((x + y) % 256) as u8;
            out.extend_from_slice(&[v, v, v]);
        }
    }
    out
}

#[test]
fn test_two_devices_match_single_device_reference() {
    let source = source_file(GRADIENT_SRC);
    let backend = backend(2).build();
    let engine = Engine::new(backend.clone(), config(source.path(), 64, 64)).unwrap();

    let render = engine.render_with_report().unwrap();
    let reference = engine.render_single().unwrap();

    let band = 32 * 64 * 3;
    let bytes = render.image.as_bytes();
    assert_eq!(&bytes[..band], &expected_band(64, 0..32)[..]);
    assert_eq!(&bytes[band..], &expected_band(64, 32..64)[..]);
    assert_eq!(bytes, reference.as_bytes());

    assert_eq!(render.report.devices_used(), 2);
    assert_eq!(render.report.bands[1].byte_range, band..2 * band);
    assert_eq!(render.device_names, vec!["Strata Host GPU 0", "Strata Host GPU 1"]);
    assert!(!render.fell_back);
    assert!(backend.resources().all_released());
}

#[test]
fn test_single_device_partition_is_transparent() {
    let source = source_file(GRADIENT_SRC);
    let engine = Engine::new(backend(1).build(), config(source.path(), 37, 23)).unwrap();

    let partitioned = engine.render().unwrap();
    let single = engine.render_single().unwrap();
    assert_eq!(partitioned, single);
}

#[test]
fn test_many_devices_with_remainder() {
    let source = source_file(GRADIENT_SRC);
    let width = 20;
    let height = 23;

    for policy in [RemainderPolicy::LastBand, RemainderPolicy::Spread] {
        let config = Config::builder()
            .dimensions(width, height)
            .kernel_path(source.path())
            .remainder_policy(policy)
            .build()
            .unwrap();
        let engine = Engine::new(backend(5).build(), config).unwrap();
        let render = engine.render_with_report().unwrap();

        assert_eq!(render.image.as_bytes(), &expected_band(width, 0..height)[..]);
        let rows: usize = render.report.bands.iter().map(|b| b.rows).sum();
        assert_eq!(rows, height);
    }
}

#[test]
fn test_reject_policy_fails_before_dispatch() {
    let source = source_file(GRADIENT_SRC);
    let backend = backend(3).build();
    let config = Config::builder()
        .dimensions(8, 10)
        .kernel_path(source.path())
        .remainder_policy(RemainderPolicy::Reject)
        .build()
        .unwrap();

    let err = Engine::new(backend.clone(), config).unwrap().render().unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(backend.resources().kernel_dispatches, 0);
    assert!(backend.resources().all_released());
}

#[test]
fn test_devices_render_concurrently() {
    use std::time::{Duration, Instant};

    let source = source_file(GRADIENT_SRC);
    let slow = |item: &WorkItem, out: &mut [u8]| {
        std::thread::sleep(Duration::from_millis(2));
        gradient(item, out);
    };
    let timed = |gpus: usize| {
        let backend = HostBackend::builder().gpus(gpus).kernel("render", slow).build();
        let engine = Engine::new(backend, config(source.path(), 4, 16)).unwrap();
        let start = Instant::now();
        let image = engine.render().unwrap();
        assert_eq!(image.as_bytes(), &expected_band(4, 0..16)[..]);
        start.elapsed()
    };

    let one = timed(1);
    let four = timed(4);
    assert!(four < one / 2, "1 device: {:?}, 4 devices: {:?}", one, four);
}

#[test]
fn test_bands_follow_context_device_list() {
    let source = source_file(GRADIENT_SRC);

    let reduced = backend(3).context_keeps(2).build();
    let render = Engine::new(reduced, config(source.path(), 8, 9))
        .unwrap()
        .render_with_report()
        .unwrap();
    assert_eq!(render.report.bands.len(), 2);
    assert_eq!(render.device_names, vec!["Strata Host GPU 0", "Strata Host GPU 1"]);
    assert_eq!(render.image.as_bytes(), &expected_band(8, 0..9)[..]);

    let reordered = backend(3).reverse_context_devices().build();
    let render = Engine::new(reordered, config(source.path(), 8, 9))
        .unwrap()
        .render_with_report()
        .unwrap();
    assert_eq!(render.report.bands.len(), 3);
    assert_eq!(
        render.device_names,
        vec!["Strata Host GPU 2", "Strata Host GPU 1", "Strata Host GPU 0"]
    );
    assert_eq!(render.image.as_bytes(), &expected_band(8, 0..9)[..]);
}

#[test]
fn test_falls_back_to_cpu_devices() {
    let source = source_file(GRADIENT_SRC);
    let backend = HostBackend::builder()
        .gpus(0)
        .cpus(2)
        .kernel("render", gradient)
        .build();
    let engine = Engine::new(backend, config(source.path(), 16, 16)).unwrap();

    let render = engine.render_with_report().unwrap();
    assert!(render.fell_back);
    assert_eq!(render.report.devices_used(), 2);
    assert_eq!(render.image.as_bytes(), &expected_band(16, 0..16)[..]);
}

#[test]
fn test_preferred_and_fallback_never_merged() {
    let source = source_file(GRADIENT_SRC);
    let backend = backend(1).cpus(3).build();
    let engine = Engine::new(backend, config(source.path(), 8, 8)).unwrap();

    let render = engine.render_with_report().unwrap();
    assert_eq!(render.report.bands.len(), 1);
    assert_eq!(render.device_names, vec!["Strata Host GPU 0"]);
}

#[test]
fn test_no_device_found_makes_no_further_calls() {
    let source = source_file(GRADIENT_SRC);
    let backend = HostBackend::builder()
        .gpus(0)
        .cpus(0)
        .kernel("render", gradient)
        .build();
    let engine = Engine::new(backend.clone(), config(source.path(), 8, 8)).unwrap();

    let err = engine.render().unwrap_err();
    assert!(matches!(err, Error::NoDeviceFound { .. }));

    let resources = backend.resources();
    assert_eq!(resources.device_queries, 2);
    assert_eq!(resources.contexts_created, 0);
    assert_eq!(resources.programs_built, 0);
    assert_eq!(resources.queues_created, 0);
    assert_eq!(resources.buffers_created, 0);
}

#[test]
fn test_missing_source_creates_no_resources() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(2).build();
    let engine = Engine::new(backend.clone(), config(&dir.path().join("nope.cl"), 8, 8)).unwrap();

    let err = engine.render().unwrap_err();
    assert!(matches!(err, Error::SourceNotFound { .. }));

    let resources = backend.resources();
    assert_eq!(resources.contexts_created, 0);
    assert_eq!(resources.queues_created, 0);
    assert_eq!(resources.buffers_created, 0);
}

#[test]
fn test_syntax_error_reports_build_log() {
    let source = source_file("__kernel void render(__global uchar *out) {\n    out[0] = (1;\n}\n");
    let backend = backend(2).build();
    let engine = Engine::new(backend.clone(), config(source.path(), 8, 8)).unwrap();

    match engine.render().unwrap_err() {
        Error::BuildFailed { status, log } => {
            assert_eq!(status.category(), StatusCategory::Program);
            assert!(!log.trim().is_empty());
            assert!(log.contains("Host GPU 0"));
            assert!(log.contains("Host GPU 1"));
        }
        other => panic!("expected BuildFailed, got {}", other),
    }
    assert!(backend.resources().all_released());
}

#[test]
fn test_missing_entry_point() {
    let source = source_file(GRADIENT_SRC);
    let config = Config::builder()
        .dimensions(8, 8)
        .kernel_path(source.path())
        .entry_point("shade")
        .build()
        .unwrap();
    let err = Engine::new(backend(1).build(), config).unwrap().render().unwrap_err();
    assert!(matches!(err, Error::KernelNotFound { ref name, .. } if name == "shade"));
    assert_eq!(err.category(), Some(StatusCategory::Kernel));
}

#[test]
fn test_queue_failure_releases_everything() {
    let source = source_file(GRADIENT_SRC);
    let backend = backend(3)
        .fail_queue(DeviceClass::Gpu, 2, Status::OUT_OF_RESOURCES)
        .build();
    let engine = Engine::new(backend.clone(), config(source.path(), 8, 9)).unwrap();

    let err = engine.render().unwrap_err();
    assert!(matches!(err, Error::QueueCreationFailed { device: 2, .. }));

    let resources = backend.resources();
    assert_eq!(resources.queues_created, 2);
    assert_eq!(resources.kernel_dispatches, 0);
    assert!(resources.all_released());
}

#[test]
fn test_context_rejection() {
    let source = source_file(GRADIENT_SRC);
    let backend = backend(2).reject_context(Status::INVALID_DEVICE).build();
    let err = Engine::new(backend, config(source.path(), 8, 8))
        .unwrap()
        .render()
        .unwrap_err();
    assert!(matches!(err, Error::ContextCreationFailed { .. }));
    assert!(err.diagnostic().starts_with("context creation failed (device fault)"));
}

#[test]
fn test_unknown_status_is_fatal() {
    let source = source_file(GRADIENT_SRC);
    let backend = backend(2)
        .fail_dispatch(DeviceClass::Gpu, 0, Status::from_code(-9000))
        .build();
    let engine = Engine::new(backend.clone(), config(source.path(), 8, 8)).unwrap();

    let err = engine.render().unwrap_err();
    assert!(matches!(err, Error::UnknownStatus { code: -9000, .. }));
    assert_eq!(err.category(), Some(StatusCategory::Unknown));
    assert!(backend.resources().all_released());
}

#[test]
fn test_lost_device_fails_whole_run() {
    let source = source_file(GRADIENT_SRC);
    let backend = backend(2)
        .lose_device(DeviceClass::Gpu, 0, Status::DEVICE_NOT_AVAILABLE)
        .build();
    let engine = Engine::new(backend.clone(), config(source.path(), 8, 8)).unwrap();

    let err = engine.render().unwrap_err();
    assert!(matches!(err, Error::SyncFailed { device: 0, .. }));
    assert!(backend.resources().all_released());

    #[cfg(feature = "telemetry")]
    {
        let snapshot = engine.metrics_snapshot();
        assert_eq!(snapshot.runs, 1);
        assert_eq!(snapshot.failed_runs, 1);
    }
}

#[test]
fn test_encoder_only_sees_complete_images() {
    let source = source_file(GRADIENT_SRC);
    let mut encoded = Vec::new();
    let mut encoder = |image: &HostImage| -> strata::Result<()> {
        encoded.push(image.as_bytes().len());
        Ok(())
    };

    let ok = Engine::new(backend(2).build(), config(source.path(), 4, 4)).unwrap();
    ok.render_to(&mut encoder).unwrap();

    let failing = Engine::new(
        backend(2)
            .fail_read(DeviceClass::Gpu, 1, Status::INVALID_MEM_OBJECT)
            .build(),
        config(source.path(), 4, 4),
    )
    .unwrap();
    let err = failing.render_to(&mut encoder).unwrap_err();
    assert!(matches!(err, Error::ReadbackFailed { device: 1, .. }));

    assert_eq!(encoded, vec![4 * 4 * 3]);
}

#[test]
fn test_max_devices_caps_bands() {
    let source = source_file(GRADIENT_SRC);
    let config = Config::builder()
        .dimensions(8, 8)
        .kernel_path(source.path())
        .max_devices(2)
        .build()
        .unwrap();
    let render = Engine::new(backend(6).build(), config)
        .unwrap()
        .render_with_report()
        .unwrap();
    assert_eq!(render.report.bands.len(), 2);
}

#[cfg(feature = "telemetry")]
#[test]
fn test_metrics_export_after_runs() {
    let source = source_file(GRADIENT_SRC);
    let engine = Engine::new(backend(2).build(), config(source.path(), 16, 16)).unwrap();
    engine.render().unwrap();
    engine.render().unwrap();

    let snapshot = engine.metrics_snapshot();
    assert_eq!(snapshot.runs, 2);
    assert_eq!(snapshot.bands_dispatched, 4);
    assert_eq!(snapshot.bytes_read_back, 2 * 16 * 16 * 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    JsonExporter::new(&path).export(&snapshot).unwrap();
    assert!(std::fs::read_to_string(&path).unwrap().contains("\"runs\": 2"));
}

#[cfg(feature = "opencl")]
#[test]
fn test_opencl_gradient_if_available() {
    let Ok(backend) = OpenClBackend::new() else {
        return;
    };
    let source = source_file(GRADIENT_SRC);
    let config = Config::builder()
        .dimensions(64, 64)
        .kernel_path(source.path())
        .preferred_class(DeviceClass::Gpu)
        .fallback_class(DeviceClass::All)
        .build()
        .unwrap();
    let engine = Engine::new(backend, config).unwrap();
    let Ok(image) = engine.render() else {
        return;
    };
    assert_eq!(image.as_bytes(), &expected_band(64, 0..64)[..]);
}
