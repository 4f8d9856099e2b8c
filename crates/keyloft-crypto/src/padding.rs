//! Fixed-block padding to conceal payload sizes.
//!
//! Format: `[payload][zero padding][2-byte big-endian padding length]`.
//! The trailer counts every padding byte, itself included. Output length is
//! always a whole number of 4096-byte blocks, and input already on a block
//! boundary still grows by one full block so the padded length never equals
//! the payload length.

/// Padding block size in bytes.
pub const PADDING_BLOCK_SIZE: usize = 4096;

const TRAILER_SIZE: usize = 2;

/// Pad a payload to a whole number of blocks.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let mut target = (data.len() / PADDING_BLOCK_SIZE + 1) * PADDING_BLOCK_SIZE;
    if target - data.len() < TRAILER_SIZE {
        target += PADDING_BLOCK_SIZE;
    }
    let pad_total = target - data.len();

    let mut padded = vec![0u8; target];
    padded[..data.len()].copy_from_slice(data);
    padded[target - TRAILER_SIZE..].copy_from_slice(&(pad_total as u16).to_be_bytes());
    padded
}

/// Remove padding applied by [`pad`].
///
/// Runs on plaintext that already passed AEAD authentication, so it never
/// fails: if the trailer is out of range or any padding byte is non-zero,
/// the input is returned unchanged.
pub fn unpad(padded: &[u8]) -> Vec<u8> {
    if padded.len() < TRAILER_SIZE {
        return padded.to_vec();
    }
    let trailer =
        u16::from_be_bytes([padded[padded.len() - 2], padded[padded.len() - 1]]) as usize;
    if trailer < TRAILER_SIZE || trailer > padded.len() {
        return padded.to_vec();
    }
    let data_len = padded.len() - trailer;
    if padded[data_len..padded.len() - TRAILER_SIZE]
        .iter()
        .any(|&b| b != 0)
    {
        return padded.to_vec();
    }
    padded[..data_len].to_vec()
}
