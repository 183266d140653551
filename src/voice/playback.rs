//! Audio fragment playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use url::Url;

use crate::{Error, Result};

/// Plays one resolved audio fragment at a time
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Load the fragment at `url` and play it to completion
    async fn play(&self, url: &Url) -> Result<()>;

    /// Stop and unload whatever is currently playing
    fn stop(&self);
}

/// Fetches MP3 fragments over HTTP and plays them on the default output device
pub struct SpeakerSink {
    client: reqwest::Client,
    stop: Arc<AtomicBool>,
}

/// Bound on downloading one fragment when no client is supplied
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

impl Default for SpeakerSink {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::new(client)
    }
}

impl SpeakerSink {
    /// Create a speaker sink using `client` for fragment downloads
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl AudioSink for SpeakerSink {
    async fn play(&self, url: &Url) -> Result<()> {
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(Error::Playback(format!(
                "fragment fetch returned {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);

        tokio::task::spawn_blocking(move || {
            let (samples, sample_rate) = decode_mp3(&bytes)?;
            let playback = AudioPlayback::new(sample_rate)?;
            playback.play_blocking(samples, &stop)
        })
        .await
        .map_err(|e| Error::Playback(format!("playback task failed: {e}")))?
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Plays decoded samples on the default output device
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
    sample_rate: u32,
}

impl AudioPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports the rate
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(sample_rate);
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
                })
            })
            .ok_or_else(|| Error::Audio(format!("no output config supports {sample_rate} Hz")))?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device,
            config,
            sample_rate,
        })
    }

    /// Play mono samples, returning when they finish or `stop` is raised
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be built or started
    pub fn play_blocking(&self, samples: Vec<f32>, stop: &AtomicBool) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let cb_samples = Arc::clone(&samples);
        let cb_position = Arc::clone(&position);
        let cb_finished = Arc::clone(&finished);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = cb_position.load(Ordering::Relaxed);
                        let sample = if let Some(s) = cb_samples.get(pos) {
                            cb_position.store(pos + 1, Ordering::Relaxed);
                            *s
                        } else {
                            cb_finished.store(true, Ordering::Release);
                            0.0
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(self.sample_rate.max(1));
        let timeout = Duration::from_millis(duration_ms + 500);
        let start = Instant::now();

        while !finished.load(Ordering::Acquire) {
            if stop.load(Ordering::SeqCst) {
                tracing::debug!("playback stopped");
                break;
            }
            if start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the data is not decodable MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }

                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Playback("fragment contained no audio frames".to_string()));
    }

    Ok((samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts connections and never writes a byte back
    async fn silent_server() -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn stalled_fragment_fetch_fails_instead_of_hanging() {
        let url = silent_server().await.join("audio/1.mp3").unwrap();
        let sink = SpeakerSink::new(crate::config::http_client(Duration::from_millis(100)).unwrap());

        let result = tokio::time::timeout(Duration::from_secs(2), sink.play(&url))
            .await
            .expect("fragment fetch hung on a stalled server");
        assert!(matches!(result, Err(Error::Http(_))));
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert!(matches!(decode_mp3(&[]), Err(Error::Playback(_))));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_mp3(b"definitely not an mp3 file").is_err());
    }

    #[test]
    fn stop_flag_is_sticky_until_next_play() {
        let sink = SpeakerSink::default();
        sink.stop();
        assert!(sink.stop.load(Ordering::SeqCst));
    }
}
