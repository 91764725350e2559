use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ProtocolError;

/// Most versions a client may offer.
pub const MAX_CLIENT_VERSIONS: i32 = 64;

/// Reply sent when client and server share no version.
pub const NO_COMPATIBLE_VERSION: u16 = 0;

/// Highest version present in both lists.
pub fn negotiate(client: &[u16], server: &[u16]) -> Option<u16> {
    client
        .iter()
        .copied()
        .filter(|v| *v != NO_COMPATIBLE_VERSION && server.contains(v))
        .max()
}

/// Server side: read the client's offer and answer with the chosen version.
///
/// On failure the reserved version `0` is still written so the client can
/// tell a refusal from a dropped connection.
pub async fn accept<R, W>(reader: &mut R, writer: &mut W, server_versions: &[u16]) -> Result<u16, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let count = reader.read_i32_le().await?;
    if !(0..=MAX_CLIENT_VERSIONS).contains(&count) {
        refuse(writer).await?;
        return Err(ProtocolError::InvalidFrameLength(count));
    }

    let mut offered = Vec::with_capacity(count as usize);
    for _ in 0..count {
        offered.push(reader.read_u16_le().await?);
    }

    match negotiate(&offered, server_versions) {
        Some(version) => {
            writer.write_u16_le(version).await?;
            writer.flush().await?;
            Ok(version)
        }
        None => {
            refuse(writer).await?;
            Err(ProtocolError::NoCompatibleVersion)
        }
    }
}

/// Client side: offer `versions` and return the one the server picked.
pub async fn connect<R, W>(reader: &mut R, writer: &mut W, versions: &[u16]) -> Result<u16, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let count = i32::try_from(versions.len())
        .ok()
        .filter(|c| *c <= MAX_CLIENT_VERSIONS)
        .ok_or(ProtocolError::InvalidFrameLength(i32::MAX))?;

    let mut offer = Vec::with_capacity(4 + versions.len() * 2);
    offer.extend_from_slice(&count.to_le_bytes());
    for version in versions {
        offer.extend_from_slice(&version.to_le_bytes());
    }
    writer.write_all(&offer).await?;
    writer.flush().await?;

    match reader.read_u16_le().await? {
        NO_COMPATIBLE_VERSION => Err(ProtocolError::NoCompatibleVersion),
        version => Ok(version),
    }
}

async fn refuse<W>(writer: &mut W) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_u16_le(NO_COMPATIBLE_VERSION).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_common_version() {
        assert_eq!(negotiate(&[1, 2], &[2, 3]), Some(2));
        assert_eq!(negotiate(&[3, 1, 2], &[1, 2, 3]), Some(3));
        assert_eq!(negotiate(&[1], &[2, 3]), None);
        assert_eq!(negotiate(&[], &[1]), None);
        assert_eq!(negotiate(&[0], &[0, 1]), None);
    }

    #[tokio::test]
    async fn handshake_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        let server_task =
            tokio::spawn(async move { accept(&mut server_read, &mut server_write, &[2, 3]).await });
        let chosen = connect(&mut client_read, &mut client_write, &[1, 2]).await.unwrap();

        assert_eq!(chosen, 2);
        assert_eq!(server_task.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn no_overlap_is_refused_on_both_sides() {
        let (client, server) = tokio::io::duplex(64);
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        let server_task = tokio::spawn(async move { accept(&mut server_read, &mut server_write, &[3]).await });
        let result = connect(&mut client_read, &mut client_write, &[1, 2]).await;

        assert!(matches!(result, Err(ProtocolError::NoCompatibleVersion)));
        assert!(matches!(server_task.await.unwrap(), Err(ProtocolError::NoCompatibleVersion)));
    }

    #[tokio::test]
    async fn absurd_version_count_is_refused() {
        let mut input = &(1000i32.to_le_bytes())[..];
        let mut output = Vec::new();
        let result = accept(&mut input, &mut output, &[1]).await;

        assert!(matches!(result, Err(ProtocolError::InvalidFrameLength(1000))));
        assert_eq!(output, vec![0, 0]);
    }
}
