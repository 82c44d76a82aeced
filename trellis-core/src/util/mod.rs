use std::path::Path;

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::AnyResult;

// Max config/asset file size read through file_read: 16 MB
const MAX_FILE_SIZE: usize = 16 * 1024 * 1024;
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Hex-encoded sha-256 digest, used for ETag values and CSRF token hashing.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Read a whole file through the runtime's positional-read interface.
pub async fn file_read(path: impl AsRef<Path>) -> AnyResult<Bytes> {
    let file = monoio::fs::File::open(path).await?;
    let mut data = BytesMut::new();
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut offset: u64 = 0;

    loop {
        let (res, buf) = file.read_at(buffer, offset).await;
        let n = res?;
        buffer = buf;

        if data.len() + n > MAX_FILE_SIZE {
            bail_into!("file larger than {} bytes", MAX_FILE_SIZE);
        }
        data.extend_from_slice(&buffer[..n]);
        if n == 0 || n < READ_BUFFER_SIZE {
            break;
        }
        offset += n as u64;
        buffer.clear();
    }

    Ok(data.freeze())
}

#[cfg(test)]
mod tests {
    use super::sha256_hex;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
            sha256_hex(b"hello world")
        );
        assert_eq!(
            "8a5edab282632443219e051e4ade2d1d5bbc671c781051bf1437897cbdfea0f1",
            sha256_hex(b"/")
        );
    }
}
