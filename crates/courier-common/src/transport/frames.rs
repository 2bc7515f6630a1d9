use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{CourierError, Result};

/// Maximum size of one logical message (all frames together).
///
/// Prevents allocation of excessively large buffers when a peer sends a
/// corrupt or hostile length prefix.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum number of frames in one logical message.
pub const MAX_FRAMES: u32 = 64;

/// Writes one multipart message.
///
/// Wire format: `[4-byte frame count]` then, per frame,
/// `[4-byte length] [frame bytes]`. All integers are big-endian u32.
pub async fn write_multipart<W>(writer: &mut W, frames: &[Vec<u8>]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if frames.len() as u32 > MAX_FRAMES {
        return Err(CourierError::Transport(format!(
            "too many frames: {} (max {})",
            frames.len(),
            MAX_FRAMES
        )));
    }

    let total: usize = frames.iter().map(Vec::len).sum();
    if total > MAX_MESSAGE_SIZE {
        return Err(CourierError::Transport(format!(
            "message too large: {} bytes (max {} bytes)",
            total, MAX_MESSAGE_SIZE
        )));
    }

    writer.write_all(&(frames.len() as u32).to_be_bytes()).await?;
    for frame in frames {
        writer.write_all(&(frame.len() as u32).to_be_bytes()).await?;
        writer.write_all(frame).await?;
    }
    writer.flush().await?;

    Ok(())
}

/// Reads one complete multipart message.
///
/// Returns an error on EOF, short reads, or length prefixes exceeding the
/// size limits.
pub async fn read_multipart<R>(reader: &mut R) -> Result<Vec<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut count_buf = [0u8; 4];
    reader.read_exact(&mut count_buf).await?;
    let count = u32::from_be_bytes(count_buf);

    if count > MAX_FRAMES {
        return Err(CourierError::Transport(format!(
            "too many frames: {count} (max {MAX_FRAMES})"
        )));
    }

    let mut frames = Vec::with_capacity(count as usize);
    let mut total = 0usize;

    for _ in 0..count {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;

        total = total.saturating_add(len);
        if total > MAX_MESSAGE_SIZE {
            return Err(CourierError::Transport(format!(
                "message too large: {total} bytes (max {MAX_MESSAGE_SIZE} bytes)"
            )));
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;
        frames.push(frame);
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multipart_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let frames = vec![b"route".to_vec(), Vec::new(), b"payload".to_vec()];
        write_multipart(&mut client, &frames).await.unwrap();

        let read = read_multipart(&mut server).await.unwrap();
        assert_eq!(read, frames);
    }

    #[tokio::test]
    async fn test_empty_message() {
        let (mut client, mut server) = tokio::io::duplex(64);

        write_multipart(&mut client, &[]).await.unwrap();
        let read = read_multipart(&mut server).await.unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_messages() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        write_multipart(&mut client, &[b"first".to_vec()]).await.unwrap();
        write_multipart(&mut client, &[b"second".to_vec(), b"x".to_vec()])
            .await
            .unwrap();

        assert_eq!(read_multipart(&mut server).await.unwrap(), vec![b"first".to_vec()]);
        assert_eq!(
            read_multipart(&mut server).await.unwrap(),
            vec![b"second".to_vec(), b"x".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame_count() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client
            .write_all(&(MAX_FRAMES + 1).to_be_bytes())
            .await
            .unwrap();

        assert!(read_multipart(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_oversized_length_prefix() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_all(&1u32.to_be_bytes()).await.unwrap();
        client
            .write_all(&(MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes())
            .await
            .unwrap();

        assert!(read_multipart(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_eof_mid_message_is_error() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_all(&2u32.to_be_bytes()).await.unwrap();
        client.write_all(&4u32.to_be_bytes()).await.unwrap();
        client.write_all(b"ab").await.unwrap();
        drop(client);

        assert!(read_multipart(&mut server).await.is_err());
    }
}
