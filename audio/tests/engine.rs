//! Integration tests for the command-line engines
//!
//! Each test installs a fake engine script that records its arguments and
//! stdin, copies a fixture WAV to the requested output path, and prints some
//! chatter on stdout.

#![cfg(unix)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use narrator_audio::{CommandEngineLoader, EngineConfig, EnginePreference};
use narrator_core::audio::{decode_base64, decode_wav};
use narrator_core::{
    DispatchConfig, Dispatcher, ModelCache, ModelLoader, Request, Response, SpeechModel,
};

/// Scripts are written then executed; serializing avoids ETXTBSY when another
/// test forks while a script is still open for writing.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Sandbox {
    dir: PathBuf,
}

impl Sandbox {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "narrator-audio-{}-{}",
            std::process::id(),
            name
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("tmp")).unwrap();
        write_fixture(&dir.join("fixture.wav"), 22_050, 11_025);
        Self { dir }
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Fake engine: output path follows `-w` (espeak) or `-f` (piper).
    fn fake_engine(&self, name: &str) -> PathBuf {
        let dir = self.dir.display();
        self.script(
            name,
            &format!(
                r#"out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-w" ] || [ "$prev" = "-f" ]; then out="$arg"; fi
  prev="$arg"
done
echo "$@" > "{dir}/args.txt"
cat > "{dir}/stdin.txt"
echo "engine chatter on stdout"
cp "{dir}/fixture.wav" "$out""#
            ),
        )
    }

    fn failing_engine(&self, name: &str) -> PathBuf {
        self.script(name, "echo 'voice data corrupt' >&2\nexit 2")
    }

    fn args(&self) -> String {
        fs::read_to_string(self.dir.join("args.txt")).unwrap()
    }

    fn stdin(&self) -> String {
        fs::read_to_string(self.dir.join("stdin.txt")).unwrap()
    }

    fn leftover_wavs(&self) -> usize {
        fs::read_dir(self.dir.join("tmp")).unwrap().count()
    }

    fn config(&self) -> EngineConfig {
        let mut voices = HashMap::new();
        voices.insert("af_bella".to_string(), String::new());
        EngineConfig {
            preference: EnginePreference::Auto,
            piper_bin: None,
            piper_voice: None,
            piper_voice_dir: None,
            espeak_bin: None,
            temp_dir: self.dir.join("tmp"),
            warmup_text: String::new(),
            voices,
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn write_fixture(path: &Path, sample_rate: u32, len: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..len {
        let v = ((i as f32 / 20.0).sin() * 8_000.0) as i16;
        writer.write_sample(v).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_espeak_invocation_and_output() {
    let _serial = serial();
    let sandbox = Sandbox::new("espeak");
    let mut cfg = sandbox.config();
    cfg.espeak_bin = Some(sandbox.fake_engine("espeak-ng"));

    let loader = CommandEngineLoader::new(cfg);
    loader.probe().unwrap();
    let model = loader.load().unwrap();
    assert_eq!(model.name(), "espeak-ng");

    let synthesis = model.generate("Hello world", "af_bella", 1.0).unwrap();
    assert_eq!(synthesis.sample_rate, 22_050);
    assert_eq!(synthesis.samples.len(), 11_025);

    let args = sandbox.args();
    assert!(args.contains("-s 175"));
    assert!(!args.contains("-v"), "alias should fall back to the default voice: {args}");
    assert!(args.ends_with("-- Hello world\n"));
    assert_eq!(sandbox.leftover_wavs(), 0);

    model.generate("Hi", "en-gb", 2.0).unwrap();
    let args = sandbox.args();
    assert!(args.contains("-v en-gb"));
    assert!(args.contains("-s 350"));
}

#[test]
fn test_piper_reads_text_from_stdin() {
    let _serial = serial();
    let sandbox = Sandbox::new("piper");
    let voice = sandbox.dir.join("en_US-amy.onnx");
    fs::write(&voice, b"model").unwrap();

    let mut cfg = sandbox.config();
    cfg.piper_bin = Some(sandbox.fake_engine("piper"));
    cfg.piper_voice = Some(voice.clone());
    cfg.espeak_bin = Some(sandbox.failing_engine("espeak-ng"));

    let model = CommandEngineLoader::new(cfg).load().unwrap();
    assert_eq!(model.name(), "piper");

    model.generate("Read me aloud", "af_bella", 2.0).unwrap();
    assert_eq!(sandbox.stdin(), "Read me aloud");
    let args = sandbox.args();
    assert!(args.contains(&format!("-m {}", voice.display())));
    assert!(args.contains("--length_scale 0.50"));
    assert_eq!(sandbox.leftover_wavs(), 0);
}

#[test]
fn test_piper_voice_dir_lookup() {
    let _serial = serial();
    let sandbox = Sandbox::new("piper-dir");
    let voices = sandbox.dir.join("voices");
    fs::create_dir_all(&voices).unwrap();
    fs::write(voices.join("en_GB-alan.onnx"), b"model").unwrap();

    let mut cfg = sandbox.config();
    cfg.preference = EnginePreference::Piper;
    cfg.piper_bin = Some(sandbox.fake_engine("piper"));
    cfg.piper_voice_dir = Some(voices.clone());

    let model = CommandEngineLoader::new(cfg).load().unwrap();
    model.generate("Hi", "en_GB-alan", 1.0).unwrap();
    assert!(sandbox.args().contains("en_GB-alan.onnx"));

    let err = model.generate("Hi", "missing", 1.0).unwrap_err();
    assert!(err.to_string().contains("missing"));
}

#[test]
fn test_engine_failure_carries_stderr() {
    let _serial = serial();
    let sandbox = Sandbox::new("failing");
    let mut cfg = sandbox.config();
    cfg.espeak_bin = Some(sandbox.failing_engine("espeak-ng"));

    let model = CommandEngineLoader::new(cfg).load().unwrap();
    let err = model.generate("Hello", "af_bella", 1.0).unwrap_err();
    assert!(err.to_string().contains("voice data corrupt"));
    assert_eq!(sandbox.leftover_wavs(), 0);
}

#[test]
fn test_warmup_failure_fails_load() {
    let _serial = serial();
    let sandbox = Sandbox::new("warmup");
    let mut cfg = sandbox.config();
    cfg.espeak_bin = Some(sandbox.failing_engine("espeak-ng"));
    cfg.warmup_text = "Warm up.".into();

    let loader = CommandEngineLoader::new(cfg);
    loader.probe().unwrap();
    let err = loader.load().err().unwrap();
    assert!(err.to_string().contains("warm-up failed"));
}

#[tokio::test]
async fn test_dispatcher_normalizes_engine_rate() {
    let _serial = serial();
    let sandbox = Sandbox::new("dispatch");
    let mut cfg = sandbox.config();
    cfg.espeak_bin = Some(sandbox.fake_engine("espeak-ng"));

    let cache = ModelCache::new(Arc::new(CommandEngineLoader::new(cfg)));
    let dispatcher = Dispatcher::new(cache, DispatchConfig::default());

    let Response::Success(ok) = dispatcher.handle(Request::new("Hello")).await else {
        panic!("expected success");
    };
    assert_eq!(ok.sample_rate, 24_000);
    assert!((ok.duration - 0.5).abs() < 1e-3);

    let (samples, rate) = decode_wav(&decode_base64(&ok.audio_base64).unwrap()).unwrap();
    assert_eq!(rate, 24_000);
    assert_eq!(samples.len(), 12_000);
}
