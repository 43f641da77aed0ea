//! Video Processing Module
//!
//! Handles the decoding of video files into RGB frames using the
//! ffmpeg-next crate. The rest of the pipeline only sees the `FrameSource`
//! trait, so decoders can be swapped out.

use ffmpeg_next as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{Context as ScalingContext, flag::Flags};
use ffmpeg::util::frame::video::Video;
use image::{ImageBuffer, Rgb, RgbImage};
use anyhow::{anyhow, Context, Result};
use std::ops::ControlFlow;
use std::path::Path;
use log::debug;

/// A source of decoded frames. Each call reopens the video, so a stream can
/// be restarted by calling again.
pub trait FrameSource: Sync {
    /// Nominal frame rate of the video, in frames per second.
    fn frame_rate(&self, path: &Path) -> Result<f64>;

    /// Decodes frames in order and hands each to `on_frame` until the stream
    /// ends or the callback breaks. Returns the number of frames delivered.
    fn for_each_frame(
        &self,
        path: &Path,
        on_frame: &mut dyn FnMut(RgbImage) -> Result<ControlFlow<()>>,
    ) -> Result<u64>;
}

/// Decodes with FFmpeg and converts every frame to RGB24.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegSource;

impl FrameSource for FfmpegSource {
    fn frame_rate(&self, path: &Path) -> Result<f64> {
        ffmpeg::init().context("Failed to initialize FFmpeg")?;
        let ictx = input(path).context("Failed to open input file for frame rate")?;
        let stream = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| anyhow!("Could not find video stream in file"))?;

        // Prefer the container's average rate, then the stream's base rate.
        for rate in [stream.avg_frame_rate(), stream.rate()] {
            if rate.0 > 0 && rate.1 > 0 {
                return Ok(rate.0 as f64 / rate.1 as f64);
            }
        }
        Err(anyhow!("Could not determine frame rate from video metadata"))
    }

    fn for_each_frame(
        &self,
        path: &Path,
        on_frame: &mut dyn FnMut(RgbImage) -> Result<ControlFlow<()>>,
    ) -> Result<u64> {
        ffmpeg::init().context("Failed to initialize FFmpeg")?;

        // The input context owns the file handle and is closed when it goes
        // out of scope, whichever way this function returns.
        let mut ictx = input(path).context("Failed to open input file")?;
        let input = ictx
            .streams()
            .best(Type::Video)
            .context("Could not find video stream")?;
        let video_stream_index = input.index();

        let context_decoder = ffmpeg::codec::context::Context::from_parameters(input.parameters())
            .context("Failed to create decoder context")?;
        let mut decoder = context_decoder.decoder().video()
            .context("Failed to create video decoder")?;

        let mut scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        ).context("Failed to create scaler")?;

        let mut frame_count = 0u64;
        let mut receive_and_process_decoded_frames =
            |decoder: &mut ffmpeg::decoder::Video| -> Result<ControlFlow<()>> {
                let mut decoded = Video::empty();
                while decoder.receive_frame(&mut decoded).is_ok() {
                    let mut rgb_frame = Video::empty();
                    scaler.run(&decoded, &mut rgb_frame).context("Scaler failed")?;
                    let img = rgb_frame_to_image(&rgb_frame)?;

                    frame_count += 1;
                    if on_frame(img)?.is_break() {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                Ok(ControlFlow::Continue(()))
            };

        for (stream, packet) in ictx.packets() {
            if stream.index() == video_stream_index {
                decoder.send_packet(&packet).context("Failed to send packet to decoder")?;
                if receive_and_process_decoded_frames(&mut decoder)?.is_break() {
                    debug!("Stopped decoding {:?} early", path);
                    return Ok(frame_count);
                }
            }
        }
        decoder.send_eof()?;
        receive_and_process_decoded_frames(&mut decoder)?;

        debug!("Decoded {} frames from {:?}", frame_count, path);
        Ok(frame_count)
    }
}

/// Copies a packed RGB24 frame into an image buffer, dropping row padding.
fn rgb_frame_to_image(rgb_frame: &Video) -> Result<RgbImage> {
    let frame_data = rgb_frame.data(0);
    let width = rgb_frame.width() as usize;
    let height = rgb_frame.height() as usize;
    let stride = rgb_frame.stride(0);

    if stride == 0 {
        return Err(anyhow!("Invalid frame stride"));
    }

    let mut new_vec = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let start_index = y * stride;
        let end_index = start_index + (width * 3);
        if end_index > frame_data.len() {
            return Err(anyhow!("Frame data is smaller than expected"));
        }
        new_vec.extend_from_slice(&frame_data[start_index..end_index]);
    }

    ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(width as u32, height as u32, new_vec)
        .context("Failed to create image buffer from frame data")
}
