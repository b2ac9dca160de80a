//! Stage 1: decode the source video into an ordered, bounded sequence of
//! timestamped stills sized for the vision model.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use futures::StreamExt;
use image::imageops::FilterType;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExtractionSettings;
use crate::error::PipelineError;
use crate::pipeline::progress::StageProgress;
use crate::pipeline::types::{Frame, ImageEncoding};

const STAGE: &str = "frame_extraction";
const PROGRESS_EVERY: usize = 20;
/// Unreadable frames tolerated in a row before the decode is abandoned.
const MAX_CONSECUTIVE_BAD: u32 = 3;

pub struct FrameExtractor {
    fps: u32,
    max_dimension: u32,
    jpeg_quality: u8,
    max_frames: Option<usize>,
}

impl FrameExtractor {
    pub fn new(settings: &ExtractionSettings) -> Self {
        Self {
            fps: settings.fps,
            max_dimension: settings.max_dimension,
            jpeg_quality: settings.jpeg_quality,
            max_frames: settings.max_frames,
        }
    }

    /// Decode `source` (a local path or an http(s) URL) and return the
    /// sampled frames in order. The sequence is finite and consumed by
    /// move; it is not restartable.
    pub async fn extract(
        &self,
        source: &str,
        source_id: &str,
        cancel: &CancellationToken,
        progress: &StageProgress,
    ) -> Result<Vec<Frame>, PipelineError> {
        let local = resolve_source(source, source_id).await?;

        let path = local.path().to_path_buf();
        let source_id = source_id.to_string();
        let fps = self.fps;
        let max_dimension = self.max_dimension;
        let jpeg_quality = self.jpeg_quality;
        let max_frames = self.max_frames;
        let cancel = cancel.clone();
        let progress = progress.clone();

        let frames = tokio::task::spawn_blocking(move || {
            decode(
                &path,
                &source_id,
                fps,
                max_dimension,
                jpeg_quality,
                max_frames,
                &cancel,
                &progress,
            )
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("extraction task failed: {e}")))??;

        Ok(frames)
    }
}

/// A usable local file: either the path that was handed in, or a download
/// held in a temp file that cleans itself up on drop.
enum LocalSource {
    Path(PathBuf),
    Downloaded(NamedTempFile),
}

impl LocalSource {
    fn path(&self) -> &Path {
        match self {
            LocalSource::Path(p) => p,
            LocalSource::Downloaded(temp) => temp.path(),
        }
    }
}

async fn resolve_source(source: &str, source_id: &str) -> Result<LocalSource, PipelineError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return download(source, source_id).await;
    }

    let path = PathBuf::from(source);
    if !path.exists() {
        return Err(PipelineError::SourceUnavailable {
            stage: STAGE,
            source_id: source_id.to_string(),
            cause: format!("no such file: {}", path.display()),
        });
    }
    Ok(LocalSource::Path(path))
}

/// Stream a remote video to a temp file so ffmpeg can seek it.
async fn download(url: &str, source_id: &str) -> Result<LocalSource, PipelineError> {
    let unavailable = |cause: String| PipelineError::SourceUnavailable {
        stage: STAGE,
        source_id: source_id.to_string(),
        cause: PipelineError::truncate_cause(cause),
    };

    info!("fetching {url}");
    let response = reqwest::get(url)
        .await
        .map_err(|e| unavailable(e.to_string()))?
        .error_for_status()
        .map_err(|e| unavailable(e.to_string()))?;

    // The temp file cleans itself up when the LocalSource is dropped.
    let temp_file = tempfile::Builder::new()
        .prefix("cycletrace-")
        .suffix(".video")
        .tempfile()
        .map_err(|e| unavailable(format!("temp file: {e}")))?;
    debug!("writing download to {}", temp_file.path().display());

    let mut file = tokio::fs::File::create(temp_file.path())
        .await
        .map_err(|e| unavailable(format!("temp file: {e}")))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| unavailable(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| unavailable(format!("temp file: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| unavailable(format!("temp file: {e}")))?;

    Ok(LocalSource::Downloaded(temp_file))
}

/// Native frames skipped between samples.
fn stride_for(native_fps: f64, requested_fps: u32) -> u64 {
    if native_fps <= 0.0 {
        return 1;
    }
    ((native_fps / f64::from(requested_fps)).round() as u64).max(1)
}

/// Fit `(width, height)` within `bound` on the longest side, preserving
/// aspect ratio. Dimensions already inside the bound are untouched.
fn fit_within(width: u32, height: u32, bound: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= bound {
        return (width, height);
    }
    let scale = f64::from(bound) / f64::from(longest);
    let fitted = |dim: u32| ((f64::from(dim) * scale).round() as u32).max(1);
    (fitted(width), fitted(height))
}

#[allow(clippy::too_many_arguments)]
fn decode(
    path: &Path,
    source_id: &str,
    fps: u32,
    max_dimension: u32,
    jpeg_quality: u8,
    max_frames: Option<usize>,
    cancel: &CancellationToken,
    progress: &StageProgress,
) -> Result<Vec<Frame>, PipelineError> {
    let source_err = |cause: String| PipelineError::SourceUnavailable {
        stage: STAGE,
        source_id: source_id.to_string(),
        cause: PipelineError::truncate_cause(cause),
    };
    let decode_err = |cause: String| PipelineError::DecodeFailed {
        stage: STAGE,
        source_id: source_id.to_string(),
        cause: PipelineError::truncate_cause(cause),
    };

    ffmpeg::init().map_err(|e| source_err(format!("ffmpeg init: {e}")))?;

    let mut ictx = ffmpeg::format::input(&path).map_err(|e| source_err(e.to_string()))?;

    let video_stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| source_err("no video stream".into()))?;
    let stream_index = video_stream.index();

    let rate = video_stream.avg_frame_rate();
    let native_fps = if rate.denominator() > 0 {
        f64::from(rate.numerator()) / f64::from(rate.denominator())
    } else {
        0.0
    };
    if native_fps <= 0.0 {
        return Err(decode_err("container reports no frame rate".into()));
    }

    let total_frames = video_stream.frames().max(0);
    let stride = stride_for(native_fps, fps);
    info!(
        "video: {:.2} fps native, {} frames reported, stride {}",
        native_fps, total_frames, stride
    );

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
        .map_err(|e| decode_err(format!("codec context: {e}")))?
        .decoder()
        .video()
        .map_err(|e| decode_err(format!("video decoder: {e}")))?;

    let mut scaler = ffmpeg::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| decode_err(format!("scaler: {e}")))?;

    let mut frames: Vec<Frame> = Vec::new();
    let mut native_index: u64 = 0;
    let mut consecutive_bad: u32 = 0;
    let mut decoded = ffmpeg::util::frame::video::Video::empty();
    let mut rgb = ffmpeg::util::frame::video::Video::empty();
    let estimated = if total_frames > 0 {
        (total_frames as u64 / stride).max(1) as usize
    } else {
        0
    };

    let emit = |frames: &Vec<Frame>| {
        let fraction = if estimated > 0 {
            frames.len() as f64 / estimated as f64
        } else {
            0.0
        };
        progress.emit(
            fraction,
            format!("extracted {} frames", frames.len()),
        );
    };

    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if let Some(cap) = max_frames {
            if frames.len() >= cap {
                info!("reached max_frames cap ({cap}), stopping extraction");
                break;
            }
        }

        if let Err(e) = decoder.send_packet(&packet) {
            consecutive_bad += 1;
            warn!("unreadable packet at native frame {native_index}: {e}");
            if consecutive_bad > MAX_CONSECUTIVE_BAD {
                return Err(decode_err(format!(
                    "{consecutive_bad} consecutive unreadable frames: {e}"
                )));
            }
            continue;
        }

        while decoder.receive_frame(&mut decoded).is_ok() {
            consecutive_bad = 0;

            if native_index % stride == 0 {
                if let Some(cap) = max_frames {
                    if frames.len() >= cap {
                        native_index += 1;
                        continue;
                    }
                }
                scaler
                    .run(&decoded, &mut rgb)
                    .map_err(|e| decode_err(format!("pixel conversion: {e}")))?;

                let timestamp = native_index as f64 / native_fps;
                let image = encode_jpeg(&rgb, max_dimension, jpeg_quality).map_err(decode_err)?;
                frames.push(Frame::new(frames.len(), timestamp, image, ImageEncoding::Jpeg));

                if frames.len() % PROGRESS_EVERY == 0 {
                    emit(&frames);
                }
            }
            native_index += 1;
        }
    }

    // Drain the decoder.
    if decoder.send_eof().is_ok() {
        while decoder.receive_frame(&mut decoded).is_ok() {
            if max_frames.is_some_and(|cap| frames.len() >= cap) {
                break;
            }
            if native_index % stride == 0 {
                scaler
                    .run(&decoded, &mut rgb)
                    .map_err(|e| decode_err(format!("pixel conversion: {e}")))?;
                let timestamp = native_index as f64 / native_fps;
                let image = encode_jpeg(&rgb, max_dimension, jpeg_quality).map_err(decode_err)?;
                frames.push(Frame::new(frames.len(), timestamp, image, ImageEncoding::Jpeg));
            }
            native_index += 1;
        }
    }

    if frames.is_empty() {
        return Err(PipelineError::NoFramesExtracted {
            stage: STAGE,
            source_id: source_id.to_string(),
        });
    }

    progress.emit(1.0, format!("extracted {} frames", frames.len()));
    info!("extracted {} frames from {}", frames.len(), path.display());
    Ok(frames)
}

/// Copy the RGB24 plane (respecting its stride), resize to the model-side
/// bound and re-encode as JPEG.
fn encode_jpeg(
    frame: &ffmpeg::util::frame::video::Video,
    max_dimension: u32,
    quality: u8,
) -> Result<Bytes, String> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let plane = frame.data(0);

    let mut data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row = y * stride;
        data.extend_from_slice(&plane[row..row + width * 3]);
    }

    let rgb = image::RgbImage::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| "frame buffer size mismatch".to_string())?;
    let mut img = image::DynamicImage::ImageRgb8(rgb);

    let (fit_w, fit_h) = fit_within(img.width(), img.height(), max_dimension);
    if (fit_w, fit_h) != (img.width(), img.height()) {
        img = img.resize_exact(fit_w, fit_h, FilterType::Lanczos3);
    }

    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| format!("jpeg encode: {e}"))?;
    Ok(Bytes::from(buf))
}
