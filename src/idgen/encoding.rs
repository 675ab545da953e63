//! Text renderings of identifiers.
//!
//! Both alphabets avoid visually ambiguous characters. Digits are emitted
//! most significant first; zero renders as the first alphabet character.

const BASE32_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";
const BASE58_ALPHABET: &[u8; 58] = b"123456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

/// Render `v` in base 32.
pub fn base32(v: u64) -> String {
    encode(v, BASE32_ALPHABET)
}

/// Render `v` in base 58.
pub fn base58(v: u64) -> String {
    encode(v, BASE58_ALPHABET)
}

fn encode(mut v: u64, alphabet: &[u8]) -> String {
    let radix = alphabet.len() as u64;
    // 64 bits need at most 13 base-32 digits
    let mut digits = Vec::with_capacity(13);
    loop {
        digits.push(alphabet[(v % radix) as usize]);
        v /= radix;
        if v == 0 {
            break;
        }
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}
