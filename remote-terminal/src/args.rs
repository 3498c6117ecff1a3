use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use log::LevelFilter;
use pilot::{LinkConfig, StreamConfig};
use protocol::DeviceProfile;

pub const USAGE: &str = "Usage: remote-terminal [--drone ADDR] [--rtsp URL] [--webcam N] \
    [--profile standard|advanced] [--size WxH] [--ffmpeg PATH] [--verbose]";

#[derive(Debug, Clone)]
pub struct Args {
    pub link: LinkConfig,
    pub stream: StreamConfig,
    pub profile: DeviceProfile,
    pub width: usize,
    pub height: usize,
    pub ffmpeg: PathBuf,
    pub log_level: LevelFilter,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            stream: StreamConfig::default(),
            profile: DeviceProfile::default(),
            width: 640,
            height: 480,
            ffmpeg: PathBuf::from("ffmpeg"),
            log_level: LevelFilter::Info,
        }
    }
}

impl Args {
    pub fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Self::default();

        while let Some(flag) = args.next() {
            if flag == "--verbose" {
                parsed.log_level = LevelFilter::Debug;
                continue;
            }
            let Some(value) = args.next() else {
                bail!("Expected a value after {flag}\n{USAGE}");
            };
            match flag.as_str() {
                "--drone" => {
                    parsed.link.drone = value
                        .parse()
                        .with_context(|| format!("Invalid drone address {value}"))?;
                }
                "--rtsp" => parsed.stream.rtsp_url = value,
                "--webcam" => {
                    parsed.stream.webcam_index = value
                        .parse()
                        .with_context(|| format!("Invalid webcam index {value}"))?;
                }
                "--profile" => {
                    parsed.profile = match value.to_ascii_lowercase().as_str() {
                        "standard" => DeviceProfile::Standard,
                        "advanced" => DeviceProfile::Advanced,
                        _ => bail!("Unknown profile {value}, expected standard or advanced"),
                    };
                }
                "--size" => (parsed.width, parsed.height) = parse_size(&value)?,
                "--ffmpeg" => parsed.ffmpeg = PathBuf::from(value),
                _ => bail!("Unknown argument {flag}\n{USAGE}"),
            }
        }

        Ok(parsed)
    }
}

fn parse_size(text: &str) -> Result<(usize, usize)> {
    let (width, height) = text
        .split_once('x')
        .ok_or_else(|| anyhow!("Expected WxH, got {text}"))?;
    let width: usize = width.parse().with_context(|| format!("Invalid width in {text}"))?;
    let height: usize = height.parse().with_context(|| format!("Invalid height in {text}"))?;
    if width == 0 || height == 0 {
        bail!("Frame size must not be empty, got {text}");
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        Args::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn defaults_point_at_the_drone() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.link.drone, "192.168.1.1:7099".parse().unwrap());
        assert_eq!(args.stream.rtsp_url, "rtsp://192.168.1.1:7070/webcam");
        assert_eq!(args.profile, DeviceProfile::Advanced);
        assert_eq!((args.width, args.height), (640, 480));
    }

    #[test]
    fn overrides() {
        let args = parse(&[
            "--drone",
            "127.0.0.1:9000",
            "--profile",
            "Standard",
            "--size",
            "320x240",
            "--webcam",
            "2",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(args.link.drone, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(args.profile, DeviceProfile::Standard);
        assert_eq!((args.width, args.height), (320, 240));
        assert_eq!(args.stream.webcam_index, 2);
        assert_eq!(args.log_level, LevelFilter::Debug);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--drone", "nowhere"]).is_err());
        assert!(parse(&["--profile", "racing"]).is_err());
        assert!(parse(&["--size", "640"]).is_err());
        assert!(parse(&["--size", "0x480"]).is_err());
        assert!(parse(&["--rtsp"]).is_err());
        assert!(parse(&["--fast"]).is_err());
    }
}
