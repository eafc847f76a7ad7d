// Integration tests for audio file input
//
// These tests write small WAV files with hound, then read them back through
// `AudioFile` and stream them through `FileMicrophone`.

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use voice_session::audio::{
    AudioBackendConfig, AudioBackendFactory, AudioFile, AudioSource, CapturePipeline,
    FileMicrophone, MicrophoneBackend,
};

fn write_wav(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    samples: &[i16],
) -> Result<PathBuf> {
    let path = dir.join(name);
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(&path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(path)
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let samples: Vec<i16> = (0..16000).map(|i| (i % 100) as i16).collect();
    let path = write_wav(dir.path(), "tone.wav", 16000, 1, &samples)?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples, samples);
    assert!((audio.duration_seconds - 1.0).abs() < 1e-6);
    assert!(audio.path.contains("tone.wav"));

    Ok(())
}

#[test]
fn test_stereo_duration_counts_frames() -> Result<()> {
    let dir = TempDir::new()?;
    // 0.5s of interleaved stereo at 48kHz
    let path = write_wav(dir.path(), "stereo.wav", 48000, 2, &vec![0; 48000])?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.channels, 2);
    assert_eq!(audio.samples.len(), 48000);
    assert!((audio.duration_seconds - 0.5).abs() < 1e-6);

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    assert!(AudioFile::open(&path).is_err());
}

#[test]
fn test_file_source_from_config_value() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "input.wav", 16000, 1, &[0; 160])?;
    let value = path.to_string_lossy().to_string();

    assert_eq!(AudioSource::parse(&value), AudioSource::File(value.clone()));
    let backend = AudioBackendFactory::microphone(AudioSource::parse(&value))?;
    assert_eq!(backend.name(), "file");

    Ok(())
}

#[tokio::test]
async fn test_file_microphone_streams_frames() -> Result<()> {
    let dir = TempDir::new()?;
    // 0.3s at 16kHz: two full frames
    let samples: Vec<i16> = (0..4800).map(|i| ((i % 64) * 100) as i16).collect();
    let path = write_wav(dir.path(), "speech.wav", 16000, 1, &samples)?;

    let capture = CapturePipeline::new(
        Box::new(FileMicrophone::new(path.to_string_lossy())),
        AudioBackendConfig::default(),
    );
    let mut streams = capture.start().await?;

    let first = streams.chunks.recv().await.expect("first frame");
    let second = streams.chunks.recv().await.expect("second frame");

    let expected: Vec<u8> = samples[..2048]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    assert_eq!(first.decode()?, expected);
    assert_eq!(second.decode()?.len(), 4096);
    assert!(*streams.volume.borrow() > 0.0);

    capture.stop().await?;
    assert!(!capture.is_capturing());

    Ok(())
}

#[tokio::test]
async fn test_file_microphone_missing_file_is_device_unavailable() {
    let capture = CapturePipeline::new(
        Box::new(FileMicrophone::new("/nonexistent/input.wav")),
        AudioBackendConfig::default(),
    );

    let err = capture.start().await.err().expect("start should fail");
    assert!(matches!(err, voice_session::VoiceError::DeviceUnavailable(_)));
}
