//! Human-facing identifiers: booking, ticket, refund and voucher codes.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

const UPPER_ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn upper_alnum(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| UPPER_ALNUM[rng.gen_range(0..UPPER_ALNUM.len())] as char)
        .collect()
}

fn upper_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let nibble: u32 = rng.gen_range(0..16);
            char::from_digit(nibble, 16).unwrap_or('0').to_ascii_uppercase()
        })
        .collect()
}

pub(crate) fn local_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

/// `BOOK` + unix millis + 8 uppercase hex chars.
pub fn booking_code(now: DateTime<Utc>) -> String {
    format!("BOOK{}{}", now.timestamp_millis(), upper_hex(8))
}

/// 8 chars from `A-Z0-9`.
pub fn ticket_code() -> String {
    upper_alnum(8)
}

/// `REFUND_` + 26 uppercase alphanumerics.
pub fn refund_code() -> String {
    let tail: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(26)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("REFUND_{}", tail)
}

/// `LOYAL<pct>_<YYYYMMDDHHmmssSSS>_<1000-9999>`, timestamp in local time.
pub fn loyalty_voucher_code(percentage: i32, now: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let local = now.with_timezone(&local_offset(utc_offset_hours));
    let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
    format!(
        "LOYAL{}_{}_{}",
        percentage,
        local.format("%Y%m%d%H%M%S%3f"),
        suffix
    )
}

/// `<DDMMYYYY>_<NAME>_<6 hex>` where NAME is the full name upper-cased with
/// accents and whitespace removed.
pub fn signup_voucher_code(full_name: &str, now: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let local = now.with_timezone(&local_offset(utc_offset_hours));
    format!(
        "{}_{}_{}",
        local.format("%d%m%Y"),
        plain_upper(full_name),
        upper_hex(6)
    )
}

fn plain_upper(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .map(strip_accent)
        .collect::<String>()
        .to_uppercase()
}

/// Folds Vietnamese diacritics onto the base Latin letter.
fn strip_accent(c: char) -> char {
    const FOLDS: &[(&str, char)] = &[
        ("àáạảãâầấậẩẫăằắặẳẵ", 'a'),
        ("ÀÁẠẢÃÂẦẤẬẨẪĂẰẮẶẲẴ", 'A'),
        ("èéẹẻẽêềếệểễ", 'e'),
        ("ÈÉẸẺẼÊỀẾỆỂỄ", 'E'),
        ("ìíịỉĩ", 'i'),
        ("ÌÍỊỈĨ", 'I'),
        ("òóọỏõôồốộổỗơờớợởỡ", 'o'),
        ("ÒÓỌỎÕÔỒỐỘỔỖƠỜỚỢỞỠ", 'O'),
        ("ùúụủũưừứựửữ", 'u'),
        ("ÙÚỤỦŨƯỪỨỰỬỮ", 'U'),
        ("ỳýỵỷỹ", 'y'),
        ("ỲÝỴỶỸ", 'Y'),
        ("đ", 'd'),
        ("Đ", 'D'),
    ];
    FOLDS
        .iter()
        .find(|(accented, _)| accented.contains(c))
        .map(|(_, base)| *base)
        .unwrap_or(c)
}
