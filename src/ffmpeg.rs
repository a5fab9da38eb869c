use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::{Child, Command};

use crate::{config::TranscodeProfile, output::OutputDir};

/// Locate the transcoder binary: the configured path, or `ffmpeg` on PATH.
pub fn resolve_program(configured: Option<&Path>) -> std::io::Result<PathBuf> {
    match configured {
        Some(path) => Ok(path.to_path_buf()),
        None => which::which("ffmpeg")
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e)),
    }
}

/// One fully built ffmpeg invocation. Restarts reuse the same value so every
/// respawn runs with identical arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscodeCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl TranscodeCommand {
    pub fn new(
        program: PathBuf,
        profile: &TranscodeProfile,
        input_url: &str,
        output: &OutputDir,
    ) -> Self {
        let segment_pattern = output.segment_pattern().to_string_lossy().into_owned();
        let playlist = output.playlist().to_string_lossy().into_owned();

        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning"]
            .into_iter()
            .map(String::from)
            .collect();
        // read the live input at its native rate
        args.extend(["-re".into(), "-i".into(), input_url.to_string()]);
        args.extend([
            "-c:v".into(),
            profile.video_codec.clone(),
            "-preset".into(),
            profile.preset.clone(),
            "-tune".into(),
            profile.tune.clone(),
            "-crf".into(),
            profile.crf.to_string(),
            "-g".into(),
            profile.keyframe_interval.to_string(),
        ]);
        args.extend([
            "-c:a".into(),
            profile.audio_codec.clone(),
            "-b:a".into(),
            profile.audio_bitrate.clone(),
            "-ac".into(),
            profile.audio_channels.to_string(),
        ]);
        args.extend([
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            profile.segment_seconds.to_string(),
            "-hls_list_size".into(),
            profile.list_size.to_string(),
            "-hls_flags".into(),
            "delete_segments+append_list+program_date_time".into(),
            "-hls_segment_filename".into(),
            segment_pattern,
        ]);
        // playlist path must stay last
        args.push(playlist);

        Self { program, args }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub(crate) fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;

    fn command() -> (TranscodeCommand, OutputDir) {
        let output = OutputDir::new(
            Path::new("/srv/streams"),
            &Fingerprint::new("D1", "C1"),
            "stream.m3u8",
        );
        let command = TranscodeCommand::new(
            PathBuf::from("/usr/bin/ffmpeg"),
            &TranscodeProfile::default(),
            "http://10.0.0.5:8887/stream/pl.m3u8?id=1",
            &output,
        );
        (command, output)
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_input_is_paced() {
        let (command, _) = command();
        let args = command.args();
        let re = args.iter().position(|a| a == "-re").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(re < input);
        assert_eq!(
            value_after(args, "-i"),
            Some("http://10.0.0.5:8887/stream/pl.m3u8?id=1")
        );
    }

    #[test]
    fn test_encoder_settings() {
        let (command, _) = command();
        let args = command.args();
        assert_eq!(value_after(args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(args, "-preset"), Some("veryfast"));
        assert_eq!(value_after(args, "-tune"), Some("zerolatency"));
        assert_eq!(value_after(args, "-crf"), Some("23"));
        assert_eq!(value_after(args, "-g"), Some("60"));
        assert_eq!(value_after(args, "-c:a"), Some("aac"));
        assert_eq!(value_after(args, "-b:a"), Some("128k"));
        assert_eq!(value_after(args, "-ac"), Some("2"));
    }

    #[test]
    fn test_hls_output() {
        let (command, output) = command();
        let args = command.args();
        assert_eq!(value_after(args, "-f"), Some("hls"));
        assert_eq!(value_after(args, "-hls_time"), Some("4"));
        assert_eq!(value_after(args, "-hls_list_size"), Some("10"));
        let flags = value_after(args, "-hls_flags").unwrap();
        for flag in ["delete_segments", "append_list", "program_date_time"] {
            assert!(flags.contains(flag), "missing {}", flag);
        }
        let pattern = output.segment_pattern().to_string_lossy().into_owned();
        let playlist = output.playlist().to_string_lossy().into_owned();
        assert_eq!(
            value_after(args, "-hls_segment_filename"),
            Some(pattern.as_str())
        );
        assert_eq!(args.last(), Some(&playlist));
    }

    #[test]
    fn test_resolve_configured_program() -> anyhow::Result<()> {
        let path = resolve_program(Some(Path::new("/opt/ffmpeg/bin/ffmpeg")))?;
        assert_eq!(path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        Ok(())
    }
}
