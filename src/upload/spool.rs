use std::io::{self, SeekFrom};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::{
    fs::File,
    io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt},
};

use crate::error::ShareError;

#[derive(Debug, thiserror::Error)]
pub enum SpoolError {
    /// The client side of the body failed, e.g. a dropped connection.
    #[error("failed to read upload: {0}")]
    Body(Box<dyn std::error::Error + Send + Sync>),

    /// The temporary file could not be created or written.
    #[error("failed to spool upload: {0}")]
    Filesystem(#[from] io::Error),
}

impl From<SpoolError> for ShareError {
    fn from(error: SpoolError) -> Self {
        match error {
            SpoolError::Body(_) => ShareError::InvalidRequest(error.to_string()),
            SpoolError::Filesystem(_) => ShareError::Unexpected(error.to_string()),
        }
    }
}

/// Copies `body` into an anonymous temporary file so a batch does not keep
/// every body in memory while earlier files are still uploading.
///
/// At most `limit` bytes are written; the remainder is read and discarded so
/// the next multipart part can be reached. Callers pass one byte more than
/// they accept, which keeps oversized bodies detectable downstream. The
/// returned file is positioned at its start.
pub async fn spool_to_tempfile<S, E>(body: S, limit: u64) -> Result<File, SpoolError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let std_file = tokio::task::spawn_blocking(tempfile::tempfile)
        .await
        .map_err(io::Error::other)??;
    let mut file = File::from_std(std_file);
    write_capped(body, limit, &mut file).await?;
    Ok(file)
}

async fn write_capped<S, E, W>(body: S, limit: u64, writer: &mut W) -> Result<(), SpoolError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
    W: AsyncWrite + AsyncSeek + Unpin,
{
    tokio::pin!(body);
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| SpoolError::Body(e.into()))?;
        let remaining = limit.saturating_sub(written);
        if remaining == 0 {
            continue;
        }
        let take = remaining.min(chunk.len() as u64) as usize;
        writer.write_all(&chunk[..take]).await?;
        written += take as u64;
    }

    writer.flush().await?;
    writer.seek(SeekFrom::Start(0)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    use futures::stream;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(part.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn contents(mut file: File) -> Vec<u8> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        buf
    }

    /// Rejects every write as if the disk were full.
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other("no space left on device")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncSeek for FullDisk {
        fn start_seek(self: Pin<&mut Self>, _position: SeekFrom) -> io::Result<()> {
            Ok(())
        }

        fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
            Poll::Ready(Ok(0))
        }
    }

    #[tokio::test]
    async fn test_spools_whole_body_under_limit() {
        let file = spool_to_tempfile(chunks(&["hello ", "world"]), 64)
            .await
            .unwrap();
        assert_eq!(contents(file).await, b"hello world");
    }

    #[tokio::test]
    async fn test_truncates_at_limit_and_drains() {
        let body = chunks(&["0123", "4567", "89"]);
        let file = spool_to_tempfile(body, 6).await.unwrap();
        assert_eq!(contents(file).await, b"012345");
    }

    #[tokio::test]
    async fn test_stream_error_is_a_client_fault() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);
        let err = spool_to_tempfile(body, 64).await.unwrap_err();
        assert!(matches!(err, SpoolError::Body(_)), "{err:?}");
        assert!(matches!(ShareError::from(err), ShareError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_write_error_is_a_server_fault() {
        let err = write_capped(chunks(&["hello"]), 64, &mut FullDisk)
            .await
            .unwrap_err();
        assert!(matches!(err, SpoolError::Filesystem(_)), "{err:?}");
        let err = ShareError::from(err);
        assert_eq!(err.kind(), "unexpected");
        assert!(err.to_string().contains("no space left on device"));
    }
}
