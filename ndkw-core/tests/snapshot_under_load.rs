use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ndkw_core::codec;
use ndkw_core::mock::MockDirectory;
use ndkw_core::{
    CacheBackingKind, CaptureOrchestrator, Device, DeviceKind, RecorderConfiguration, WaveFormat,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WORDS_PER_DEVICE: u32 = 20_000;

/// 1 kHz stereo 16-bit: 4000 bytes per second, one u32 counter per frame.
fn format() -> WaveFormat {
    WaveFormat::pcm16(1000, 2)
}

fn setup(backing: CacheBackingKind) -> (Arc<MockDirectory>, CaptureOrchestrator, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let directory = Arc::new(MockDirectory::with_devices([
        (Device::new("a", "Device A", DeviceKind::Input), format()),
        (Device::new("b", "Device B", DeviceKind::Output), format()),
    ]));
    let config = RecorderConfiguration {
        queue_directory: dir.path().to_path_buf(),
        cache_backing: backing,
        write_behind_capacity: 256,
        ..Default::default()
    };
    let orchestrator = CaptureOrchestrator::new(directory.clone(), config).unwrap();
    (directory, orchestrator, dir)
}

fn spawn_injector(directory: &MockDirectory, id: &str, seed: u64, injected: Arc<AtomicU64>) -> thread::JoinHandle<()> {
    let handle = directory.handle(id).unwrap();
    thread::spawn(move || {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut next = 0u32;
        while next < WORDS_PER_DEVICE {
            let words = rng.gen_range(1..64).min(WORDS_PER_DEVICE - next);
            let chunk: Vec<u8> = (next..next + words).flat_map(u32::to_le_bytes).collect();
            assert!(handle.inject(&chunk));
            next += words;
            injected.fetch_add(chunk.len() as u64, Ordering::SeqCst);
            if rng.gen_bool(0.05) {
                thread::sleep(Duration::from_micros(rng.gen_range(0..200)));
            }
        }
    })
}

fn counters(wave: &[u8]) -> Vec<u32> {
    wave[44..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

#[test]
fn snapshots_never_drop_or_reorder() {
    for (seed, backing) in [(1, CacheBackingKind::Memory), (2, CacheBackingKind::TempFile)] {
        let (directory, orchestrator, _dir) = setup(backing);
        orchestrator
            .start_recording(&["a".to_string(), "b".to_string()], Duration::from_secs(30))
            .unwrap();

        let injected_a = Arc::new(AtomicU64::new(0));
        let injected_b = Arc::new(AtomicU64::new(0));
        let writers = [
            spawn_injector(&directory, "a", seed * 10, Arc::clone(&injected_a)),
            spawn_injector(&directory, "b", seed * 10 + 1, Arc::clone(&injected_b)),
        ];

        let mut rng = StdRng::seed_from_u64(seed);
        let mut rounds = 0;
        while rounds < 40 {
            let before = [injected_a.load(Ordering::SeqCst), injected_b.load(Ordering::SeqCst)];
            let session = orchestrator.snapshot().unwrap().into_record_session().unwrap();

            for (device_session, floor) in session.device_sessions.iter().zip(before) {
                let values = counters(&device_session.wave_data);
                assert!(values.len() as u64 * 4 >= floor, "snapshot lost bytes present at pause");
                for (i, value) in values.iter().enumerate() {
                    assert_eq!(*value, i as u32, "device {}", device_session.device.id);
                }
            }

            rounds += 1;
            thread::sleep(Duration::from_micros(rng.gen_range(0..500)));
        }

        for writer in writers {
            writer.join().unwrap();
        }

        let session = orchestrator.snapshot().unwrap().into_record_session().unwrap();
        for device_session in &session.device_sessions {
            assert_eq!(counters(&device_session.wave_data).len() as u32, WORDS_PER_DEVICE);
        }
        orchestrator.stop_recording().unwrap();
    }
}

#[test]
fn wrapped_cache_holds_latest_contiguous_run() {
    let (directory, orchestrator, _dir) = setup(CacheBackingKind::TempFile);
    // 1 second = 1000 counters retained.
    orchestrator
        .start_recording(&["a".to_string()], Duration::from_secs(1))
        .unwrap();

    let injected = Arc::new(AtomicU64::new(0));
    let writer = spawn_injector(&directory, "a", 99, Arc::clone(&injected));

    for _ in 0..20 {
        let session = orchestrator.snapshot().unwrap().into_record_session().unwrap();
        let values = counters(&session.device_sessions[0].wave_data);
        assert!(values.len() <= 1000);
        for pair in values.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }
    writer.join().unwrap();

    let session = orchestrator.snapshot().unwrap().into_record_session().unwrap();
    let values = counters(&session.device_sessions[0].wave_data);
    assert_eq!(values.len(), 1000);
    assert_eq!(values[0], WORDS_PER_DEVICE - 1000);
    assert_eq!(*values.last().unwrap(), WORDS_PER_DEVICE - 1);
}

#[test]
fn queued_snapshot_decodes_to_same_session() {
    let (directory, orchestrator, _dir) = setup(CacheBackingKind::Memory);
    orchestrator
        .start_recording(&["a".to_string(), "b".to_string()], Duration::from_secs(2))
        .unwrap();
    directory.handle("a").unwrap().inject(&[1, 2, 3, 4]);
    directory.handle("b").unwrap().inject(&[5, 6, 7, 8, 9, 10, 11, 12]);

    let queued = orchestrator.add_to_queue().unwrap();
    let file = std::fs::File::open(&queued.file_path).unwrap();
    let decoded = codec::read_session(&mut std::io::BufReader::new(file)).unwrap();

    assert_eq!(decoded.metadata, queued.metadata);
    assert_eq!(&decoded.device_sessions[0].wave_data[44..], &[1, 2, 3, 4]);
    assert_eq!(&decoded.device_sessions[1].wave_data[44..], &[5, 6, 7, 8, 9, 10, 11, 12]);
    assert_eq!(
        ndkw_core::storage::queue::sha256_file(&queued.file_path).unwrap(),
        queued.checksum
    );
}
