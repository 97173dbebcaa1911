//! Ticket identifiers: `<PREFIX>-<random>`, plus the human-typed device user code.
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::error;

use crate::error::TicketError;
use crate::tickets::TicketKind;

const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";

fn random_bytes<const N: usize>() -> Result<[u8; N], TicketError> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|e| {
        error!(error = %e, "failed to read system randomness");
        TicketError::IdGeneration
    })?;
    Ok(bytes)
}

pub fn new_ticket_id(kind: TicketKind) -> Result<String, TicketError> {
    // 32 bytes of entropy -> URL-safe base64 without padding.
    let bytes = random_bytes::<32>()?;
    Ok(format!("{}-{}", kind.prefix(), URL_SAFE_NO_PAD.encode(bytes)))
}

/// Upper-case consonants grouped by four, e.g. `BDFG-HJKL`.
pub fn new_user_code(length: usize) -> Result<String, TicketError> {
    let length = length.max(4);
    let mut chars = Vec::with_capacity(length);
    while chars.len() < length {
        for b in random_bytes::<32>()? {
            // 240 is the largest multiple of the alphabet size below 256.
            if b < 240 && chars.len() < length {
                chars.push(USER_CODE_ALPHABET[(b as usize) % USER_CODE_ALPHABET.len()] as char);
            }
        }
    }
    let groups: Vec<String> = chars.chunks(4).map(|c| c.iter().collect()).collect();
    Ok(groups.join("-"))
}

/// Canonical form of a user-typed code: upper case, separators normalised.
pub fn normalize_user_code(input: &str) -> String {
    let chars: Vec<char> = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let groups: Vec<String> = chars.chunks(4).map(|c| c.iter().collect()).collect();
    groups.join("-")
}
