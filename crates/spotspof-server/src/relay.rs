//! Stream Relay: turn a finished temp file or a live process pipe into a
//! chunked body for incremental HTTP transfer.
//!
//! Both relays are lazy and single-use. Bytes are forwarded in production
//! order with at most one chunk buffered. Dropping a relay stream (client
//! abort) drops the resource it owns: the [`TempArtifact`] is released and
//! the [`StreamSession`] process is killed.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use spotspof_core::{Error, Result};
use spotspof_extract::{SessionExit, StreamSession, TempArtifact};
use tokio_util::io::ReaderStream;

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// An opened temp file ready to be streamed.
pub struct FileRelay {
    /// File size at open time, for `Content-Length`.
    pub len: u64,
    pub body: ByteStream,
}

impl std::fmt::Debug for FileRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRelay").field("len", &self.len).finish()
    }
}

/// Open `artifact` and relay it in `chunk_size` chunks.
///
/// The artifact moves into the stream and is released right after the last
/// chunk, or when the stream is dropped early. If opening fails the artifact
/// is released before the error is returned.
pub async fn relay_file(artifact: TempArtifact, chunk_size: usize) -> Result<FileRelay> {
    let file = tokio::fs::File::open(artifact.path()).await?;
    let len = file.metadata().await?.len();

    let body = async_stream::stream! {
        let artifact = artifact;
        let mut chunks = ReaderStream::with_capacity(file, chunk_size.max(1));
        let mut sent: u64 = 0;

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    sent += bytes.len() as u64;
                    yield Ok(bytes);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %artifact.path().display(),
                        sent,
                        "Temp file read failed mid-relay: {e}"
                    );
                    yield Err(e);
                    break;
                }
            }
        }

        tracing::debug!(path = %artifact.path().display(), sent, "File relay finished");
        artifact.release();
    };

    Ok(FileRelay {
        len,
        body: body.boxed(),
    })
}

/// Outcome of waiting for a live process's first bytes.
pub enum PipeStart {
    /// Output arrived; the stream replays it and relays the rest.
    Streaming(ByteStream),
    /// Stdout closed before a single byte was produced.
    Empty { tool: String, exit: SessionExit },
}

/// Wait for the first chunk of `session` before anything is committed to
/// the client, so a tool that fails up front can still be reported as an
/// error response.
///
/// # Errors
///
/// `ExtractionReason::Timeout` if no output arrives within `idle_timeout`,
/// `ExtractionReason::ToolFailure` if the pipe cannot be read. The session
/// is dropped (process group killed) in both cases.
pub async fn start_pipe(
    mut session: StreamSession,
    chunk_size: usize,
    idle_timeout: Duration,
) -> Result<PipeStart> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let n = match tokio::time::timeout(idle_timeout, session.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            return Err(Error::tool_failure(
                session.tool(),
                format!("failed to read output: {e}"),
            ))
        }
        Err(_) => {
            return Err(Error::timeout(format!(
                "{} produced no output for {idle_timeout:?}",
                session.tool()
            )))
        }
    };

    if n == 0 {
        let tool = session.tool().to_string();
        let exit = session.finish_with_stderr().await?;
        return Ok(PipeStart::Empty { tool, exit });
    }

    buf.truncate(n);
    Ok(PipeStart::Streaming(pipe_stream(
        session,
        Some(Bytes::from(buf)),
        chunk_size,
        idle_timeout,
    )))
}

/// Relay a live process's stdout in chunks of at most `chunk_size` bytes.
///
/// After stdout closes the process is reaped; a non-zero exit is logged as a
/// warning since the bytes are already on the wire. A read that stalls
/// longer than `idle_timeout` ends the stream with an error, truncating the
/// response.
pub fn relay_pipe(session: StreamSession, chunk_size: usize, idle_timeout: Duration) -> ByteStream {
    pipe_stream(session, None, chunk_size, idle_timeout)
}

fn pipe_stream(
    mut session: StreamSession,
    first: Option<Bytes>,
    chunk_size: usize,
    idle_timeout: Duration,
) -> ByteStream {
    async_stream::stream! {
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut sent: u64 = 0;

        if let Some(first) = first {
            sent += first.len() as u64;
            yield Ok(first);
        }

        loop {
            match tokio::time::timeout(idle_timeout, session.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    sent += n as u64;
                    yield Ok(Bytes::copy_from_slice(&buf[..n]));
                }
                Ok(Err(e)) => {
                    tracing::warn!(tool = %session.tool(), sent, "Pipe read failed: {e}");
                    yield Err(e);
                    return;
                }
                Err(_) => {
                    tracing::warn!(
                        tool = %session.tool(),
                        sent,
                        "No output for {idle_timeout:?}; abandoning pipe"
                    );
                    yield Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{} produced no output for {idle_timeout:?}", session.tool()),
                    ));
                    return;
                }
            }
        }

        let tool = session.tool().to_string();
        match session.finish().await {
            Ok(status) if status.success() => {
                tracing::debug!(tool = %tool, sent, "Pipe relay finished");
            }
            Ok(status) => {
                tracing::warn!(tool = %tool, sent, "Pipe process exited with {status}");
            }
            Err(e) => {
                tracing::warn!(tool = %tool, sent, "Pipe process did not exit cleanly: {e}");
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotspof_extract::ArtifactManager;

    const FILE_CHUNK_SIZE: usize = 8 * 1024;
    const PIPE_CHUNK_SIZE: usize = 4 * 1024;

    async fn collect(mut stream: ByteStream) -> (Vec<Bytes>, Option<io::Error>) {
        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(bytes) => chunks.push(bytes),
                Err(e) => return (chunks, Some(e)),
            }
        }
        (chunks, None)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn relay_file_emits_whole_file_then_releases() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path(), "mp3").unwrap();
        let artifact = manager.allocate("song", "req").unwrap();
        let path = artifact.path().to_path_buf();
        let data = sample(50_000);
        std::fs::write(&path, &data).unwrap();

        let relay = relay_file(artifact, FILE_CHUNK_SIZE).await.unwrap();
        assert_eq!(relay.len, 50_000);

        let (chunks, err) = collect(relay.body).await;
        assert!(err.is_none());
        assert!(chunks.iter().all(|c| c.len() <= FILE_CHUNK_SIZE));
        assert_eq!(chunks.concat(), data);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn relay_file_releases_when_dropped_mid_stream() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path(), "mp3").unwrap();
        let artifact = manager.allocate("song", "req").unwrap();
        let path = artifact.path().to_path_buf();
        std::fs::write(&path, sample(100_000)).unwrap();

        let mut relay = relay_file(artifact, FILE_CHUNK_SIZE).await.unwrap();
        let first = relay.body.next().await.unwrap().unwrap();
        assert_eq!(first.len(), FILE_CHUNK_SIZE);
        assert!(path.exists());

        drop(relay);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn relay_file_missing_file_releases_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path(), "mp3").unwrap();
        let artifact = manager.allocate("never-written", "req").unwrap();

        let err = relay_file(artifact, FILE_CHUNK_SIZE).await.unwrap_err();
        assert_eq!(err.http_status(), 500);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn relay_file_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path(), "mp3").unwrap();
        let artifact = manager.allocate("empty", "req").unwrap();
        let path = artifact.path().to_path_buf();
        std::fs::write(&path, b"").unwrap();

        let relay = relay_file(artifact, FILE_CHUNK_SIZE).await.unwrap();
        let (chunks, err) = collect(relay.body).await;
        assert!(chunks.is_empty() && err.is_none());
        assert!(!path.exists());
    }

    #[cfg(unix)]
    mod pipe {
        use super::*;
        use spotspof_extract::ToolCommand;
        use std::path::PathBuf;

        fn sh(script: &str) -> StreamSession {
            ToolCommand::new(PathBuf::from("sh"))
                .args(["-c", script])
                .spawn_stream()
                .unwrap()
        }

        #[tokio::test]
        async fn relay_pipe_forwards_stdout_in_order() {
            let session = sh(
                "i=0; while [ $i -lt 3000 ]; do printf '%05d\\n' $i; i=$((i+1)); done",
            );
            let expected: String = (0..3000).map(|i| format!("{i:05}\n")).collect();

            let (chunks, err) = collect(relay_pipe(
                session,
                PIPE_CHUNK_SIZE,
                Duration::from_secs(10),
            ))
            .await;
            assert!(err.is_none());
            assert!(chunks.iter().all(|c| c.len() <= PIPE_CHUNK_SIZE));
            assert_eq!(chunks.concat(), expected.as_bytes());
        }

        #[tokio::test]
        async fn relay_pipe_non_zero_exit_keeps_sent_bytes() {
            let session = sh("printf 'partial'; exit 3");
            let (chunks, err) = collect(relay_pipe(
                session,
                PIPE_CHUNK_SIZE,
                Duration::from_secs(10),
            ))
            .await;
            assert!(err.is_none());
            assert_eq!(chunks.concat(), b"partial");
        }

        #[tokio::test]
        async fn relay_pipe_idle_timeout_truncates() {
            let session = sh("printf 'head'; sleep 5");
            let (chunks, err) = collect(relay_pipe(
                session,
                PIPE_CHUNK_SIZE,
                Duration::from_millis(200),
            ))
            .await;
            assert_eq!(chunks.concat(), b"head");
            assert_eq!(err.unwrap().kind(), io::ErrorKind::TimedOut);
        }

        #[tokio::test]
        async fn start_pipe_replays_first_chunk() {
            let session = sh("printf 'first'; sleep 0.2; printf 'second'");
            let start = start_pipe(session, PIPE_CHUNK_SIZE, Duration::from_secs(10))
                .await
                .unwrap();
            let PipeStart::Streaming(body) = start else {
                panic!("expected output");
            };
            let (chunks, err) = collect(body).await;
            assert!(err.is_none());
            assert_eq!(chunks.concat(), b"firstsecond");
        }

        #[tokio::test]
        async fn start_pipe_reports_silent_failure() {
            let session = sh("echo 'ERROR: Video unavailable' >&2; exit 1");
            let start = start_pipe(session, PIPE_CHUNK_SIZE, Duration::from_secs(10))
                .await
                .unwrap();
            let PipeStart::Empty { tool, exit } = start else {
                panic!("expected no output");
            };
            assert_eq!(tool, "sh");
            assert!(!exit.status.success());
            assert_eq!(exit.message(), "ERROR: Video unavailable");
        }

        #[tokio::test]
        async fn start_pipe_times_out_without_output() {
            let session = sh("sleep 5");
            let err = start_pipe(session, PIPE_CHUNK_SIZE, Duration::from_millis(200))
                .await
                .err()
                .unwrap();
            assert_eq!(err.http_status(), 504);
        }
    }
}
