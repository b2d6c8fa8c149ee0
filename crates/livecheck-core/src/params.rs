//! Session entry parameters, taken from a URL-style query string.

use crate::artifact::SessionSeed;

/// Parameters a session is opened with.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub subject_id: String,
    pub seed: SessionSeed,
    pub locale: Option<String>,
}

impl SessionParams {
    /// Parse `id=..&seed=..&lang=..` (a leading `?` is ignored).
    ///
    /// Returns `None` when the subject id or the seed is missing or empty;
    /// the caller shows a blank session instead of starting one.
    pub fn from_query(query: &str) -> Option<Self> {
        let mut subject_id = None;
        let mut seed = None;
        let mut locale = None;

        for pair in query.trim_start_matches('?').split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = percent_decode(value);
            if value.is_empty() {
                continue;
            }
            match key {
                "id" | "faceID" => subject_id = Some(value),
                "seed" | "token" => seed = Some(value),
                "lang" | "locale" => locale = Some(value),
                _ => {}
            }
        }

        Some(Self {
            subject_id: subject_id?,
            seed: SessionSeed::from_param(&seed?),
            locale,
        })
    }
}

/// Decode `%XX` escapes and `+` as space. Malformed escapes pass through.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                // from_str_radix accepts a sign, so check the digits first
                let (hi, lo) = (bytes[i + 1], bytes[i + 2]);
                if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() {
                    out.push(hex_value(hi) << 4 | hex_value(lo));
                    i += 2;
                } else {
                    out.push(b'%');
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}
