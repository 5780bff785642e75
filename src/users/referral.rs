use rand::RngCore;

pub const REFERRAL_CODE_LEN: usize = 6;

/// Random 6-character upper-case hex code. Uniqueness is the store's job.
pub fn generate_referral_code() -> String {
    let mut bytes = [0u8; REFERRAL_CODE_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

/// Cheap shape check used before hitting the store with an untrusted code.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == REFERRAL_CODE_LEN && code.bytes().all(|b| b.is_ascii_hexdigit())
}
