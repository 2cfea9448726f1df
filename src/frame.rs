// SPDX-License-Identifier: MIT
//
// The 496-byte tagged variant record carried in every block's payload, and
// the multi-block split for messages longer than one `Message` frame can
// hold. All integers are little-endian; all text fields are fixed-width
// UTF-16 code-unit arrays, zero-terminated only when the logical text is
// shorter than the field.

/// Total size of one frame — matches the ring's `payload_size` exactly, so a
/// frame fills a block's payload with no spare bytes.
pub const FRAME_SIZE: usize = 496;

const HEADER_SIZE: usize = 8; // 4-byte tag + 4 reserved bytes
const VARIANT_SIZE: usize = FRAME_SIZE - HEADER_SIZE;

const TEXT_UNITS_APP_NAME: usize = 244;
const TEXT_UNITS_SOURCE_OR_LEVEL_NAME: usize = 242;
const TEXT_UNITS_MESSAGE: usize = 224;
const TEXT_UNITS_EXTENSION: usize = 244;
const EXTENSION_UNITS_PER_BLOCK: usize = TEXT_UNITS_EXTENSION;

const TAG_START_MARKER: u32 = 1;
const TAG_SET_APPLICATION_NAME: u32 = 2;
const TAG_ADD_SOURCE_NAME: u32 = 3;
const TAG_ADD_LOG_LEVEL_NAME: u32 = 4;
const TAG_CLEAR_LOG_VIEWER: u32 = 5;
const TAG_SAVE_SNAPSHOT: u32 = 6;
const TAG_MESSAGE: u32 = 7;
const TAG_MESSAGE_EXTENSION: u32 = 8;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    StartMarker { max_log_level_count: i32 },
    SetApplicationName { name: String },
    AddSourceName { id: i32, name: String },
    AddLogLevelName { id: i32, name: String },
    ClearLogViewer { ft_timestamp: i64, pid: i32, hp_timestamp_us: i64 },
    SaveSnapshot { ft_timestamp: i64, pid: i32, hp_timestamp_us: i64 },
    Message {
        ft_timestamp: i64,
        hp_timestamp_us: i64,
        source_id: i32,
        level_id: i32,
        pid: i32,
        extension_count: i32,
        text: String,
    },
    MessageExtension { text: String },
}

/// Writes `text` into a `field_units`-wide UTF-16 field starting at `buf[..]`.
/// `buf` must be `field_units * 2` bytes and pre-zeroed. Truncates silently
/// if `text` does not fit; the zero already present in a pre-zeroed buffer
/// serves as the terminator when `text` is shorter than the field.
fn write_utf16_field(buf: &mut [u8], field_units: usize, text: &[u16]) {
    debug_assert_eq!(buf.len(), field_units * 2);
    let n = text.len().min(field_units);
    for (i, unit) in text[..n].iter().enumerate() {
        buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
}

/// Reads a UTF-16 field back into a `String`, stopping at the first zero
/// code unit (or at the field width if none is present).
fn read_utf16_field(buf: &[u8], field_units: usize) -> String {
    debug_assert_eq!(buf.len(), field_units * 2);
    let mut units = Vec::with_capacity(field_units);
    for i in 0..field_units {
        let unit = u16::from_le_bytes([buf[i * 2], buf[i * 2 + 1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    String::from_utf16_lossy(&units)
}

impl Frame {
    /// Encode into a fixed 496-byte block payload image.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut out = [0u8; FRAME_SIZE];
        let (tag, variant) = out.split_at_mut(HEADER_SIZE);
        debug_assert_eq!(variant.len(), VARIANT_SIZE);

        macro_rules! set_tag {
            ($t:expr) => {
                tag[0..4].copy_from_slice(&$t.to_le_bytes());
            };
        }

        match self {
            Frame::StartMarker { max_log_level_count } => {
                set_tag!(TAG_START_MARKER);
                variant[0..4].copy_from_slice(&max_log_level_count.to_le_bytes());
            }
            Frame::SetApplicationName { name } => {
                set_tag!(TAG_SET_APPLICATION_NAME);
                let units: Vec<u16> = name.encode_utf16().collect();
                write_utf16_field(&mut variant[0..TEXT_UNITS_APP_NAME * 2], TEXT_UNITS_APP_NAME, &units);
            }
            Frame::AddSourceName { id, name } => {
                set_tag!(TAG_ADD_SOURCE_NAME);
                variant[0..4].copy_from_slice(&id.to_le_bytes());
                let units: Vec<u16> = name.encode_utf16().collect();
                write_utf16_field(
                    &mut variant[4..4 + TEXT_UNITS_SOURCE_OR_LEVEL_NAME * 2],
                    TEXT_UNITS_SOURCE_OR_LEVEL_NAME,
                    &units,
                );
            }
            Frame::AddLogLevelName { id, name } => {
                set_tag!(TAG_ADD_LOG_LEVEL_NAME);
                variant[0..4].copy_from_slice(&id.to_le_bytes());
                let units: Vec<u16> = name.encode_utf16().collect();
                write_utf16_field(
                    &mut variant[4..4 + TEXT_UNITS_SOURCE_OR_LEVEL_NAME * 2],
                    TEXT_UNITS_SOURCE_OR_LEVEL_NAME,
                    &units,
                );
            }
            Frame::ClearLogViewer { ft_timestamp, pid, hp_timestamp_us } => {
                set_tag!(TAG_CLEAR_LOG_VIEWER);
                variant[0..8].copy_from_slice(&ft_timestamp.to_le_bytes());
                variant[8..12].copy_from_slice(&pid.to_le_bytes());
                variant[12..20].copy_from_slice(&hp_timestamp_us.to_le_bytes());
            }
            Frame::SaveSnapshot { ft_timestamp, pid, hp_timestamp_us } => {
                set_tag!(TAG_SAVE_SNAPSHOT);
                variant[0..8].copy_from_slice(&ft_timestamp.to_le_bytes());
                variant[8..12].copy_from_slice(&pid.to_le_bytes());
                variant[12..20].copy_from_slice(&hp_timestamp_us.to_le_bytes());
            }
            Frame::Message {
                ft_timestamp,
                hp_timestamp_us,
                source_id,
                level_id,
                pid,
                extension_count,
                text,
            } => {
                set_tag!(TAG_MESSAGE);
                variant[0..8].copy_from_slice(&ft_timestamp.to_le_bytes());
                variant[8..16].copy_from_slice(&hp_timestamp_us.to_le_bytes());
                variant[16..20].copy_from_slice(&source_id.to_le_bytes());
                variant[20..24].copy_from_slice(&level_id.to_le_bytes());
                variant[24..28].copy_from_slice(&pid.to_le_bytes());
                variant[28..32].copy_from_slice(&extension_count.to_le_bytes());
                let units: Vec<u16> = text.encode_utf16().collect();
                write_utf16_field(&mut variant[32..32 + TEXT_UNITS_MESSAGE * 2], TEXT_UNITS_MESSAGE, &units);
            }
            Frame::MessageExtension { text } => {
                set_tag!(TAG_MESSAGE_EXTENSION);
                let units: Vec<u16> = text.encode_utf16().collect();
                write_utf16_field(&mut variant[0..TEXT_UNITS_EXTENSION * 2], TEXT_UNITS_EXTENSION, &units);
            }
        }
        out
    }

    /// Decode a 496-byte block payload image.
    pub fn decode(bytes: &[u8; FRAME_SIZE]) -> Result<Frame, &'static str> {
        let tag = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let variant = &bytes[HEADER_SIZE..];

        let frame = match tag {
            TAG_START_MARKER => Frame::StartMarker {
                max_log_level_count: i32::from_le_bytes(variant[0..4].try_into().unwrap()),
            },
            TAG_SET_APPLICATION_NAME => Frame::SetApplicationName {
                name: read_utf16_field(&variant[0..TEXT_UNITS_APP_NAME * 2], TEXT_UNITS_APP_NAME),
            },
            TAG_ADD_SOURCE_NAME => Frame::AddSourceName {
                id: i32::from_le_bytes(variant[0..4].try_into().unwrap()),
                name: read_utf16_field(
                    &variant[4..4 + TEXT_UNITS_SOURCE_OR_LEVEL_NAME * 2],
                    TEXT_UNITS_SOURCE_OR_LEVEL_NAME,
                ),
            },
            TAG_ADD_LOG_LEVEL_NAME => Frame::AddLogLevelName {
                id: i32::from_le_bytes(variant[0..4].try_into().unwrap()),
                name: read_utf16_field(
                    &variant[4..4 + TEXT_UNITS_SOURCE_OR_LEVEL_NAME * 2],
                    TEXT_UNITS_SOURCE_OR_LEVEL_NAME,
                ),
            },
            TAG_CLEAR_LOG_VIEWER => Frame::ClearLogViewer {
                ft_timestamp: i64::from_le_bytes(variant[0..8].try_into().unwrap()),
                pid: i32::from_le_bytes(variant[8..12].try_into().unwrap()),
                hp_timestamp_us: i64::from_le_bytes(variant[12..20].try_into().unwrap()),
            },
            TAG_SAVE_SNAPSHOT => Frame::SaveSnapshot {
                ft_timestamp: i64::from_le_bytes(variant[0..8].try_into().unwrap()),
                pid: i32::from_le_bytes(variant[8..12].try_into().unwrap()),
                hp_timestamp_us: i64::from_le_bytes(variant[12..20].try_into().unwrap()),
            },
            TAG_MESSAGE => Frame::Message {
                ft_timestamp: i64::from_le_bytes(variant[0..8].try_into().unwrap()),
                hp_timestamp_us: i64::from_le_bytes(variant[8..16].try_into().unwrap()),
                source_id: i32::from_le_bytes(variant[16..20].try_into().unwrap()),
                level_id: i32::from_le_bytes(variant[20..24].try_into().unwrap()),
                pid: i32::from_le_bytes(variant[24..28].try_into().unwrap()),
                extension_count: i32::from_le_bytes(variant[28..32].try_into().unwrap()),
                text: read_utf16_field(&variant[32..32 + TEXT_UNITS_MESSAGE * 2], TEXT_UNITS_MESSAGE),
            },
            TAG_MESSAGE_EXTENSION => Frame::MessageExtension {
                text: read_utf16_field(&variant[0..TEXT_UNITS_EXTENSION * 2], TEXT_UNITS_EXTENSION),
            },
            _ => return Err("unknown frame tag"),
        };
        Ok(frame)
    }
}

/// Number of `MessageExtension` blocks needed for a message of `total` UTF-16
/// code units.
pub fn extension_count_for(total: usize) -> usize {
    if total <= TEXT_UNITS_MESSAGE {
        0
    } else {
        let overflow = total - TEXT_UNITS_MESSAGE;
        (overflow + EXTENSION_UNITS_PER_BLOCK - 1) / EXTENSION_UNITS_PER_BLOCK
    }
}

/// Splits `text` into a `Message` frame plus however many `MessageExtension`
/// frames are needed, in submission order (first block is `Message`).
pub fn split_message(
    ft_timestamp: i64,
    hp_timestamp_us: i64,
    source_id: i32,
    level_id: i32,
    pid: i32,
    text: &str,
) -> Vec<Frame> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let total = units.len();
    let first_len = total.min(TEXT_UNITS_MESSAGE);
    let ext_count = extension_count_for(total);

    let mut frames = Vec::with_capacity(1 + ext_count);
    frames.push(Frame::Message {
        ft_timestamp,
        hp_timestamp_us,
        source_id,
        level_id,
        pid,
        extension_count: ext_count as i32,
        text: String::from_utf16_lossy(&units[..first_len]),
    });

    let mut offset = first_len;
    for _ in 0..ext_count {
        let end = (offset + EXTENSION_UNITS_PER_BLOCK).min(total);
        frames.push(Frame::MessageExtension {
            text: String::from_utf16_lossy(&units[offset..end]),
        });
        offset = end;
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn start_marker_roundtrip() {
        roundtrip(Frame::StartMarker { max_log_level_count: -1 });
    }

    #[test]
    fn application_name_roundtrip() {
        roundtrip(Frame::SetApplicationName { name: "demo-app".to_string() });
    }

    #[test]
    fn source_and_level_name_roundtrip() {
        roundtrip(Frame::AddSourceName { id: 3, name: "core".to_string() });
        roundtrip(Frame::AddLogLevelName { id: 4, name: "Warning".to_string() });
    }

    #[test]
    fn message_roundtrip() {
        roundtrip(Frame::Message {
            ft_timestamp: 1,
            hp_timestamp_us: 2,
            source_id: 3,
            level_id: 4,
            pid: 5,
            extension_count: 0,
            text: "hello".to_string(),
        });
    }

    #[test]
    fn message_of_224_fits_single_block() {
        let text: String = std::iter::repeat('a').take(224).collect();
        let frames = split_message(0, 0, 0, 0, 0, &text);
        assert_eq!(frames.len(), 1);
        assert_eq!(extension_count_for(224), 0);
    }

    #[test]
    fn message_of_225_produces_one_extension() {
        let text: String = std::iter::repeat('a').take(225).collect();
        let frames = split_message(0, 0, 0, 0, 0, &text);
        assert_eq!(frames.len(), 2);
        assert_eq!(extension_count_for(225), 1);
        match &frames[1] {
            Frame::MessageExtension { text } => assert_eq!(text.len(), 1),
            _ => panic!("expected extension"),
        }
    }

    #[test]
    fn long_message_splits_by_244_after_first_224() {
        let total = 224 + 244 * 3 + 10;
        let text: String = std::iter::repeat('x').take(total).collect();
        let frames = split_message(0, 0, 0, 0, 0, &text);
        assert_eq!(extension_count_for(total), 4);
        assert_eq!(frames.len(), 5);
        if let Frame::Message { extension_count, .. } = &frames[0] {
            assert_eq!(*extension_count, 4);
        } else {
            panic!("expected Message first");
        }
    }

    #[test]
    fn short_text_field_is_zero_terminated() {
        let frame = Frame::SetApplicationName { name: "x".to_string() };
        let encoded = frame.encode();
        // first code unit is 'x', second is the terminator
        let variant = &encoded[HEADER_SIZE..];
        assert_eq!(u16::from_le_bytes([variant[0], variant[1]]), 'x' as u16);
        assert_eq!(u16::from_le_bytes([variant[2], variant[3]]), 0);
    }
}
