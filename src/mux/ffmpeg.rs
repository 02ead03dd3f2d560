//! FFmpeg muxer process wrapper
//!
//! Spawns an ffmpeg instance that reads one raw f32 stream per sensor from
//! named pipes and muxes them into a matroska file. Each stream is declared
//! as an audio input at the session's nominal rate, so the container
//! carries exact fixed-rate timing for every channel.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;

use chrono::{DateTime, Utc};
use nix::sys::stat::Mode;
use tempfile::TempDir;

use crate::error::RecorderError;
use crate::mux::{MuxerFactory, MuxerProcess, StreamSink, StreamSpec};
use crate::recorder::state::format_session_timestamp;

/// Raw sample format tag matching the machine's float byte order
fn sample_format() -> &'static str {
    if cfg!(target_endian = "little") {
        "f32le"
    } else {
        "f32be"
    }
}

/// Default container file name: `<ISO-8601 start time>_<device id>.mkv`
pub fn default_file_name(device_id: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}.mkv", format_session_timestamp(at), device_id)
}

/// Spawns ffmpeg muxer processes for recording sessions
pub struct FfmpegMuxerFactory {
    ffmpeg: PathBuf,
    output: PathBuf,
}

impl FfmpegMuxerFactory {
    /// Mux into `output` using the `ffmpeg` binary on PATH.
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: PathBuf::from("ffmpeg"), output: output.into() }
    }

    /// Use a specific ffmpeg binary.
    pub fn with_ffmpeg(mut self, ffmpeg: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self
    }

    fn build_args(
        &self,
        pipes: &[PathBuf],
        streams: &[StreamSpec],
        tags: &[(String, String)],
    ) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-nostdin".to_string()];

        for (pipe, spec) in pipes.iter().zip(streams) {
            args.extend([
                "-f".to_string(),
                sample_format().to_string(),
                "-ar".to_string(),
                format!("{}", spec.rate_hz),
                "-ac".to_string(),
                spec.channels.to_string(),
                "-i".to_string(),
                pipe.to_string_lossy().into_owned(),
            ]);
        }

        // every input is its own output stream, in input order
        for index in 0..streams.len() {
            args.extend(["-map".to_string(), format!("{}:a", index)]);
        }

        args.extend(["-c:a".to_string(), "wavpack".to_string()]);

        for (key, value) in tags {
            args.extend(["-metadata".to_string(), format!("{}={}", key, value)]);
        }
        for (index, spec) in streams.iter().enumerate() {
            args.extend([
                format!("-metadata:s:a:{}", index),
                format!("name={}", spec.name),
            ]);
        }

        // end the container when the first input ends so one closed stream
        // cannot pad the file forever
        args.extend(["-shortest".to_string(), "-f".to_string(), "matroska".to_string()]);
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

impl MuxerFactory for FfmpegMuxerFactory {
    fn spawn(
        &self,
        streams: &[StreamSpec],
        tags: &[(String, String)],
    ) -> Result<Box<dyn MuxerProcess>, RecorderError> {
        let dir = TempDir::new()?;
        let mut pipes = Vec::with_capacity(streams.len());
        for index in 0..streams.len() {
            let path = dir.path().join(format!("stream{}.raw", index));
            nix::unistd::mkfifo(&path, Mode::S_IRWXU).map_err(|err| {
                RecorderError::Muxer(format!("mkfifo {}: {}", path.display(), err))
            })?;
            pipes.push(path);
        }

        let args = self.build_args(&pipes, streams, tags);
        tracing::info!(
            "starting ffmpeg muxer: {} streams -> {}",
            streams.len(),
            self.output.display()
        );
        tracing::debug!("ffmpeg args: {:?}", args);

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| RecorderError::Muxer(format!("failed to start ffmpeg: {}", err)))?;

        // drain ffmpeg's chatter so the pipe can never fill up and stall it
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines() {
                    match line {
                        Ok(line) => tracing::debug!(target: "ffmpeg", "{}", line),
                        Err(_) => break,
                    }
                }
            });
        }

        Ok(Box::new(FfmpegMuxer {
            child,
            pipes: pipes.into_iter().map(Some).collect(),
            _dir: dir,
        }))
    }
}

/// Handle to a running ffmpeg muxer
pub struct FfmpegMuxer {
    child: Child,
    pipes: Vec<Option<PathBuf>>,
    /// Keeps the fifo directory alive for the lifetime of the process
    _dir: TempDir,
}

impl MuxerProcess for FfmpegMuxer {
    fn take_sink(&mut self, index: usize) -> Result<Box<dyn StreamSink>, RecorderError> {
        let slot = self
            .pipes
            .get_mut(index)
            .ok_or_else(|| RecorderError::Muxer(format!("no stream {}", index)))?;
        let path = slot
            .take()
            .ok_or_else(|| RecorderError::Muxer(format!("stream {} sink already taken", index)))?;
        Ok(Box::new(PipeSink { path, writer: None }))
    }

    fn wait(&mut self) -> io::Result<()> {
        let status = self.child.wait()?;
        if !status.success() {
            tracing::warn!("ffmpeg exited with {}", status);
        }
        Ok(())
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        // harmless when the process already exited after wait()
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Write end of one stream's named pipe
///
/// The pipe is opened on first write, not at session start: opening a fifo
/// for writing blocks until ffmpeg has the read end open, and ffmpeg opens
/// its inputs one by one.
struct PipeSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl PipeSink {
    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        if self.writer.is_none() {
            let file = File::options().write(true).open(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("pipe writer missing"))
    }
}

impl StreamSink for PipeSink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.writer()?.write_all(frame)
    }

    fn close(&mut self) -> io::Result<()> {
        use std::os::unix::fs::OpenOptionsExt;

        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => {
                // Never wrote a sample. Give ffmpeg an immediately-closed
                // write end so it sees EOF instead of waiting for a writer
                // that will never come.
                match File::options()
                    .write(true)
                    .custom_flags(nix::libc::O_NONBLOCK)
                    .open(&self.path)
                {
                    Ok(file) => {
                        drop(file);
                        Ok(())
                    }
                    // ENXIO: no reader on the pipe; nothing to signal
                    Err(err) if err.raw_os_error() == Some(nix::libc::ENXIO) => Ok(()),
                    Err(err) => Err(err),
                }
            }
        }
    }
}
