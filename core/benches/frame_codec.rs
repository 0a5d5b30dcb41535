/// Frame codec and response packaging benchmarks using Criterion
///
/// Run with: cargo bench --bench frame_codec
///
/// Benchmarks cover:
/// - Request frame encode/decode
/// - Response frames carrying audio of increasing length
/// - WAV + base64 packaging of raw samples
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use narrator_core::audio::{encode_base64, encode_wav, resample_linear};
use narrator_core::protocol::{encode_frame, FrameReader, Request, Response, SynthesisResponse};

fn tone(seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32) as usize;
    (0..len)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / sample_rate as f32).sin() * 0.3)
        .collect()
}

fn bench_request_roundtrip(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let request = Request::new("The quick brown fox jumps over the lazy dog.")
        .with_voice("af_bella")
        .with_speed(1.25);

    c.bench_function("request_encode_decode", |b| {
        b.iter(|| {
            let frame = encode_frame(black_box(&request)).unwrap();
            rt.block_on(async {
                let mut reader = FrameReader::new(frame.as_slice());
                black_box(reader.read_message::<Request>().await.unwrap())
            })
        })
    });
}

fn bench_response_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_frame");

    for seconds in [1u32, 10, 60].iter() {
        let wav = encode_wav(&tone(*seconds as f32, 24_000), 24_000).unwrap();
        let response = Response::Success(SynthesisResponse {
            audio_base64: encode_base64(&wav),
            duration: *seconds as f64,
            sample_rate: 24_000,
            format: "wav".into(),
        });
        group.throughput(Throughput::Bytes(wav.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(seconds), &response, |b, r| {
            b.iter(|| black_box(encode_frame(r).unwrap()))
        });
    }

    group.finish();
}

fn bench_packaging(c: &mut Criterion) {
    let mut group = c.benchmark_group("package_audio");
    let samples = tone(5.0, 22_050);

    group.bench_function("resample_22050_to_24000", |b| {
        b.iter(|| black_box(resample_linear(&samples, 22_050, 24_000)))
    });
    group.bench_function("wav_base64", |b| {
        b.iter(|| {
            let wav = encode_wav(black_box(&samples), 24_000).unwrap();
            black_box(encode_base64(&wav))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_request_roundtrip,
    bench_response_frames,
    bench_packaging
);
criterion_main!(benches);
