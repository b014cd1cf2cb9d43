//! Simulated capture example.
//!
//! Feeds three seconds of synthetic video and audio through a recorder that
//! keeps a two-second window, then saves it and inspects the container.
//!
//! Run with: cargo run --example simulated_capture

use std::time::Duration;

use av_ring_recorder::source::MockCapture;
use av_ring_recorder::{
    read_container, BufferConfig, ChannelSink, Recorder, RecorderEvent, SaveOutcome,
    SessionConfig, TrackKind, VideoFormat,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::temp_dir().join("simulated_capture.avrb");
    let (tx, mut rx) = mpsc::channel(1);

    let recorder = Recorder::builder()
        .output_path(&path)
        .add_sink(ChannelSink::with_name("demo", tx))
        .on_event(|event| match event {
            RecorderEvent::BufferOverflow { .. } => {}
            other => println!("  event: {other:?}"),
        })
        .build()?;

    // 2 s at 15 fps and 20 ms audio chunks
    let config = SessionConfig {
        video: VideoFormat {
            width: 160,
            height: 120,
            frame_rate: 15,
            ..Default::default()
        },
        video_buffer: BufferConfig {
            capacity: 30,
            retention: Some(Duration::from_secs(2)),
        },
        audio_buffer: BufferConfig {
            capacity: 100,
            retention: Some(Duration::from_secs(2)),
        },
        ..Default::default()
    };

    recorder.start(config.clone()).await?;

    let mut mock = MockCapture::new(config.video, config.audio).starting_at(12_000, 0);
    let (frames, chunks) = mock.feed(&recorder, 3_000_000);
    let (video_buffered, audio_buffered) = recorder.buffered();
    println!("Fed {frames} frames and {chunks} audio chunks");
    println!("Buffered {video_buffered} frames and {audio_buffered} chunks");

    match recorder.stop().await? {
        SaveOutcome::Saved(recording) => {
            println!(
                "Saved {} video / {} audio samples to {} (offset {} us)",
                recording.video_samples,
                recording.audio_samples,
                recording.path.display(),
                recording.delta_us
            );
        }
        SaveOutcome::Skipped(reason) => {
            println!("Nothing saved: {reason}");
            return Ok(());
        }
    }

    if let Some(delivered) = rx.recv().await {
        println!("Sink notified about {}", delivered.path.display());
    }

    let file = read_container(&path)?;
    for kind in TrackKind::ALL {
        if let Some(track) = file.track(kind) {
            let records = file.records_for(track.index).count();
            println!("  {kind} track {}: {records} records", track.index);
        }
    }
    println!("Stats: {:?}", recorder.stats());

    recorder.close();
    Ok(())
}
