//! 混淆载荷解码（字符码序列 / base64）
//!
//! 解码失败不会中断行扫描：对外只返回 `Option<String>`，内部错误仅用于调试日志。
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use regex::Regex;
use tracing::trace;

use crate::error::DecodeError;

/// base64 连续片段的最小长度
pub const BASE64_MIN_RUN: usize = 40;
/// 可打印性检查只看解码结果的前 N 个字节
pub const PRINTABLE_PREFIX: usize = 50;
/// 展示用解码内容的最大字符数（超出截断并追加省略号）
pub const DISPLAY_MAX_CHARS: usize = 100;

/// 标准字母表，解码时填充可有可无（候选正则允许省略 `=`）
const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// base64 候选片段的正则
pub(crate) fn base64_run_regex() -> Regex {
    // 模式为常量，编译不会失败
    Regex::new(&format!(r"[A-Za-z0-9+/]{{{BASE64_MIN_RUN},}}={{0,2}}")).expect("static base64 pattern")
}

/// 依次取 `pattern` 在行内的每个匹配作为字符码：
/// - 匹配中带 `\x` / `0x` 前缀时，其后的每段十六进制数字各为一个字符码
/// - 否则取第一段十进制数字
/// - 0..=255 追加对应字符
/// - 超出范围跳过
/// - 匹配中没有数字或数字溢出 → 整体无解码内容
pub fn decode_char_codes(line: &str, pattern: &Regex) -> Option<String> {
    match try_decode_char_codes(line, pattern) {
        Ok(s) => Some(s),
        Err(e) => {
            trace!(error = %e, "char-code decode yielded nothing");
            None
        }
    }
}

fn try_decode_char_codes(line: &str, pattern: &Regex) -> Result<String, DecodeError> {
    let mut out = String::new();
    for m in pattern.find_iter(line) {
        let token = m.as_str();
        let hex = hex_digit_runs(token);
        if !hex.is_empty() {
            for digits in hex {
                let code = u32::from_str_radix(digits, 16).map_err(|_| DecodeError::Overflow(digits.to_string()))?;
                push_code(&mut out, code);
            }
            continue;
        }
        let digits = first_digit_run(token).ok_or_else(|| DecodeError::NoDigits(token.to_string()))?;
        let code: u32 = digits.parse().map_err(|_| DecodeError::Overflow(digits.to_string()))?;
        push_code(&mut out, code);
    }
    if out.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(out)
}

fn push_code(out: &mut String, code: u32) {
    if let Ok(byte) = u8::try_from(code) {
        out.push(char::from(byte));
    }
}

/// `\x48\x49` → ["48", "49"]；`0x48` → ["48"]；前缀后没有十六进制数字的不计
fn hex_digit_runs(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut runs = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if matches!((bytes[i], bytes[i + 1]), (b'\\', b'x') | (b'0', b'x' | b'X')) {
            let start = i + 2;
            let len = bytes[start..].iter().take_while(|b| b.is_ascii_hexdigit()).count();
            if len > 0 {
                runs.push(&s[start..start + len]);
                i = start + len;
                continue;
            }
        }
        i += 1;
    }
    runs
}

fn first_digit_run(s: &str) -> Option<&str> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let rest = &s[start..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// 在行内查找较长的 base64 片段并解码；仅当结果像文本时返回（已截断用于展示）
pub fn decode_base64_payload(line: &str, run: &Regex) -> Option<String> {
    let m = run.find(line)?;
    match try_decode_base64(m.as_str()) {
        Ok(text) => Some(truncate_for_display(&text)),
        Err(e) => {
            trace!(error = %e, "base64 payload suppressed");
            None
        }
    }
}

fn try_decode_base64(blob: &str) -> Result<String, DecodeError> {
    let bytes = BASE64_LENIENT.decode(blob)?;
    if !looks_like_text(&bytes) {
        return Err(DecodeError::NotText);
    }
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.chars().count() <= 5 {
        return Err(DecodeError::NotText);
    }
    Ok(text)
}

/// 前 50 字节（不足则全部）均为可打印 ASCII 或 \t \n \r
fn looks_like_text(bytes: &[u8]) -> bool {
    let n = bytes.len().min(PRINTABLE_PREFIX);
    bytes[..n]
        .iter()
        .all(|&b| matches!(b, b'\t' | b'\n' | b'\r') || (0x20..=0x7E).contains(&b))
}

fn truncate_for_display(text: &str) -> String {
    if text.chars().count() <= DISPLAY_MAX_CHARS {
        return text.to_string();
    }
    let mut s: String = text.chars().take(DISPLAY_MAX_CHARS).collect();
    s.push_str("...");
    s
}

/// 折叠连续空白为单个空格并去掉首尾空白，不改动标点
pub fn normalize_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

    fn rx(p: &str) -> Regex {
        Regex::new(p).unwrap()
    }

    #[test]
    fn char_codes_decode_hello() {
        let got = decode_char_codes("local s = {72,69,76,76,79,}", &rx("[0-9]{2,3},"));
        assert_eq!(got.as_deref(), Some("HELLO"));
    }

    #[test]
    fn out_of_range_code_is_skipped() {
        let got = decode_char_codes("72,300,73,", &rx("[0-9]{2,3},"));
        assert_eq!(got.as_deref(), Some("HI"));
    }

    #[test]
    fn backslash_escapes_decode() {
        let got = decode_char_codes(r"RunString('\72\105\33')", &rx(r"\\[0-9]+"));
        assert_eq!(got.as_deref(), Some("Hi!"));
    }

    #[test]
    fn hex_escapes_decode_as_base16() {
        let got = decode_char_codes(r#"RunString("\x48\x49")"#, &rx(r"\\x[0-9a-fA-F]{2}"));
        assert_eq!(got.as_deref(), Some("HI"));
        // 一个匹配覆盖整串转义
        let got = decode_char_codes(r#"s = "\x52\x75\x6e\x53""#, &rx(r"(\\x[0-9a-fA-F]{2})+"));
        assert_eq!(got.as_deref(), Some("RunS"));
    }

    #[test]
    fn hex_literals_decode_as_base16() {
        let got = decode_char_codes("t = {0x48, 0X49, 0x21}", &rx("0[xX][0-9a-fA-F]+"));
        assert_eq!(got.as_deref(), Some("HI!"));
        // 超出 0..=255 的跳过
        let got = decode_char_codes("0xFFFF 0x41", &rx("0[xX][0-9a-fA-F]+"));
        assert_eq!(got.as_deref(), Some("A"));
    }

    #[test]
    fn overlong_hex_literal_degrades_to_none() {
        assert_eq!(decode_char_codes("0x123456789abcdef01", &rx("0[xX][0-9a-fA-F]+")), None);
    }

    #[test]
    fn token_without_digits_degrades_to_none() {
        assert_eq!(decode_char_codes("abc", &rx("[a-z]+")), None);
    }

    #[test]
    fn overflowing_token_degrades_to_none() {
        assert_eq!(decode_char_codes("99999999999999999999,", &rx("[0-9]+,")), None);
    }

    #[test]
    fn all_codes_out_of_range_is_none() {
        assert_eq!(decode_char_codes("300,400,", &rx("[0-9]{3},")), None);
    }

    #[test]
    fn base64_plain_text_is_surfaced() {
        let blob = STANDARD.encode("hello world this is plain text");
        assert!(blob.len() >= BASE64_MIN_RUN);
        let line = format!("RunString(util.Base64Decode(\"{blob}\"))");
        let got = decode_base64_payload(&line, &base64_run_regex());
        assert_eq!(got.as_deref(), Some("hello world this is plain text"));
    }

    #[test]
    fn unpadded_base64_is_surfaced() {
        let blob = STANDARD_NO_PAD.encode("hello world this is plain text!!");
        assert!(!blob.ends_with('=') && blob.len() % 4 != 0);
        let line = format!("local p = \"{blob}\"");
        let got = decode_base64_payload(&line, &base64_run_regex());
        assert_eq!(got.as_deref(), Some("hello world this is plain text!!"));
    }

    #[test]
    fn base64_binary_is_suppressed() {
        let noise: Vec<u8> = (0u8..60).map(|i| i.wrapping_mul(37).wrapping_add(128)).collect();
        let blob = STANDARD.encode(&noise);
        let line = format!("x = \"{blob}\"");
        assert_eq!(decode_base64_payload(&line, &base64_run_regex()), None);
    }

    #[test]
    fn short_base64_run_is_ignored() {
        let blob = STANDARD.encode("short");
        assert_eq!(decode_base64_payload(&blob, &base64_run_regex()), None);
    }

    #[test]
    fn long_payload_is_truncated_for_display() {
        let text = "A".repeat(150);
        let line = STANDARD.encode(&text);
        let got = decode_base64_payload(&line, &base64_run_regex()).unwrap();
        assert_eq!(got.chars().count(), DISPLAY_MAX_CHARS + 3);
        assert!(got.ends_with("..."));
    }

    #[test]
    fn whitespace_is_collapsed_punctuation_kept() {
        assert_eq!(normalize_whitespace("  RunString( a ,\t\tb )  ;"), "RunString( a , b ) ;");
        assert_eq!(normalize_whitespace(""), "");
    }
}
