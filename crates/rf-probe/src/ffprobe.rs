//! FFprobe-based media probing.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use rf_core::{Error, Result};

use crate::types::*;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[allow(dead_code)]
    index: u32,
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    bit_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    forced: u8,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
}

/// Probe a media file with the given ffprobe binary.
pub async fn probe(ffprobe: &Path, path: &Path) -> Result<MediaInfo> {
    let output = tokio::process::Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(|e| Error::Probe(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Probe(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_json(path, &json_str)
}

/// Parse raw ffprobe JSON into a [`MediaInfo`] snapshot.
pub fn parse_ffprobe_json(path: &Path, json_str: &str) -> Result<MediaInfo> {
    let ff_output: FfprobeOutput = serde_json::from_str(json_str)
        .map_err(|e| Error::Probe(format!("invalid ffprobe output: {e}")))?;

    let duration = ff_output
        .format
        .duration
        .and_then(|s| s.parse::<f64>().ok())
        .map(Duration::from_secs_f64);

    let mut info = MediaInfo {
        file_path: path.to_path_buf(),
        file_size: ff_output
            .format
            .size
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        container: ff_output.format.format_name,
        duration,
        bit_rate: ff_output.format.bit_rate.and_then(|s| s.parse().ok()),
        video_tracks: Vec::new(),
        audio_tracks: Vec::new(),
        subtitle_tracks: Vec::new(),
    };

    let mut video_index = 0u32;
    let mut audio_index = 0u32;
    let mut subtitle_index = 0u32;

    for stream in ff_output.streams {
        match stream.codec_type.as_str() {
            "video" => {
                let frame_rate = stream.r_frame_rate.and_then(|s| parse_frame_rate(&s));
                // Prefer the container's exact count; elementary streams
                // usually lack one, so fall back to duration x rate.
                let frame_count = stream
                    .nb_frames
                    .and_then(|s| s.parse::<u64>().ok())
                    .or_else(|| {
                        match (info.duration, frame_rate) {
                            (Some(d), Some(fr)) if fr > 0.0 => {
                                Some((d.as_secs_f64() * fr).round() as u64)
                            }
                            _ => None,
                        }
                    });

                info.video_tracks.push(VideoTrackInfo {
                    index: video_index,
                    codec: stream.codec_name.unwrap_or_default(),
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                    frame_rate,
                    frame_count,
                    bit_rate: stream.bit_rate.and_then(|s| s.parse().ok()),
                });
                video_index += 1;
            }
            "audio" => {
                info.audio_tracks.push(AudioTrackInfo {
                    index: audio_index,
                    codec: stream.codec_name.unwrap_or_default(),
                    channels: stream.channels.unwrap_or(2),
                    sample_rate: stream.sample_rate.and_then(|s| s.parse().ok()),
                    language: stream.tags.language,
                    bit_rate: stream.bit_rate.and_then(|s| s.parse().ok()),
                });
                audio_index += 1;
            }
            "subtitle" => {
                info.subtitle_tracks.push(SubtitleTrackInfo {
                    index: subtitle_index,
                    codec: stream.codec_name.unwrap_or_default(),
                    language: stream.tags.language,
                    forced: stream.disposition.forced == 1,
                });
                subtitle_index += 1;
            }
            _ => {}
        }
    }

    Ok(info)
}

/// Parse an ffprobe rational frame rate like "24000/1001".
fn parse_frame_rate(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0 && num > 0.0).then(|| num / den)
        }
        None => s.parse().ok().filter(|&v: &f64| v > 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"{
        "format": {
            "format_name": "matroska,webm",
            "duration": "7200.500",
            "size": "15000000000",
            "bit_rate": "16000000"
        },
        "streams": [
            {
                "index": 0,
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "24000/1001",
                "nb_frames": "172643"
            },
            {
                "index": 1,
                "codec_type": "audio",
                "codec_name": "dts",
                "channels": 6,
                "sample_rate": "48000",
                "tags": {"language": "eng"}
            },
            {
                "index": 2,
                "codec_type": "subtitle",
                "codec_name": "hdmv_pgs_subtitle",
                "disposition": {"forced": 1},
                "tags": {"language": "fra"}
            }
        ]
    }"#;

    #[test]
    fn parse_full_sample() {
        let info = parse_ffprobe_json(&PathBuf::from("/tmp/movie.mkv"), SAMPLE).unwrap();
        assert_eq!(info.container, "matroska,webm");
        assert_eq!(info.file_size, 15_000_000_000);
        assert_eq!(info.bit_rate, Some(16_000_000));
        assert_eq!(info.duration.unwrap().as_secs(), 7200);

        assert_eq!(info.video_tracks.len(), 1);
        let v = &info.video_tracks[0];
        assert_eq!(v.codec, "h264");
        assert_eq!(v.frame_count, Some(172_643));
        assert!((v.frame_rate.unwrap() - 23.976).abs() < 0.001);

        assert_eq!(info.audio_tracks.len(), 1);
        assert_eq!(info.audio_tracks[0].channels, 6);
        assert_eq!(info.audio_tracks[0].language.as_deref(), Some("eng"));

        assert_eq!(info.subtitle_tracks.len(), 1);
        assert!(info.subtitle_tracks[0].forced);
    }

    #[test]
    fn frame_count_derived_from_duration() {
        let json = r#"{
            "format": {"format_name": "h264", "duration": "10.0"},
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264",
                 "r_frame_rate": "25/1"}
            ]
        }"#;
        let info = parse_ffprobe_json(&PathBuf::from("/tmp/x.h264"), json).unwrap();
        assert_eq!(info.video_tracks[0].frame_count, Some(250));
    }

    #[test]
    fn invalid_json_is_probe_error() {
        let result = parse_ffprobe_json(&PathBuf::from("/tmp/x"), "not json");
        assert!(matches!(result, Err(Error::Probe(_))));
    }

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("30"), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("junk"), None);
    }
}
