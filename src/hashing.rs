//! Single-pass multi-digest hashing.

use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use sha3::Sha3_512;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;
use crate::models::HashInfo;

const CHUNK_SIZE: usize = 8192;

/// Compute all five digests of a reader in a single buffered pass.
///
/// Fails only on an I/O error from the underlying reader.
pub async fn hash_reader<R: AsyncRead + Unpin>(mut reader: R) -> Result<HashInfo> {
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut sha512 = Sha512::new();
    let mut sha3_512 = Sha3_512::new();

    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        md5.update(chunk);
        sha1.update(chunk);
        sha256.update(chunk);
        sha512.update(chunk);
        sha3_512.update(chunk);
    }

    Ok(HashInfo {
        md5: format!("{:x}", md5.finalize()),
        sha1: format!("{:x}", sha1.finalize()),
        sha256: format!("{:x}", sha256.finalize()),
        sha512: format!("{:x}", sha512.finalize()),
        sha3_512: format!("{:x}", sha3_512.finalize()),
    })
}
