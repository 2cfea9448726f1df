// SPDX-License-Identifier: MIT
//
// Shared-memory and control-channel naming. The region and channel names are
// built by the host-provided `kernel_object_prefix`; this module only
// handles the POSIX-specific encoding (leading slash, length truncation)
// and the FNV-1a hash shared by both platforms' fallback naming.

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn to_hex(val: u64) -> [u8; 16] {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut buf = [0u8; 16];
    let mut v = val;
    for i in (0..16).rev() {
        buf[i] = DIGITS[(v & 0xf) as usize];
        v >>= 4;
    }
    buf
}

/// Maximum length for POSIX shm names. Set to 0 to disable truncation.
/// On macOS `PSHMNAMLEN` is 31; elsewhere the limit is generous enough that
/// truncation is not needed.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// Produce a POSIX shm-safe name (with leading `/`) from a logical region
/// name. Names that would exceed [`SHM_NAME_MAX`] are shortened to
/// `/<prefix>_<16-hex-FNV-1a-hash>` so the mapping stays stable and
/// collision-resistant while remaining debuggable from the retained prefix.
pub fn make_shm_name(name: &str) -> String {
    let result = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };

    if SHM_NAME_MAX == 0 || result.len() <= SHM_NAME_MAX {
        return result;
    }

    const HASH_SUFFIX_LEN: usize = 1 + 16;
    let prefix_len = if SHM_NAME_MAX > HASH_SUFFIX_LEN + 1 {
        SHM_NAME_MAX - HASH_SUFFIX_LEN - 1
    } else {
        0
    };

    let hash = fnv1a_64(result.as_bytes());
    let hex = to_hex(hash);
    let hex_str = std::str::from_utf8(&hex).unwrap();

    let mut shortened = String::with_capacity(SHM_NAME_MAX);
    shortened.push('/');
    if prefix_len > 0 {
        let original_body = &result[1..];
        let take = prefix_len.min(original_body.len());
        shortened.push_str(&original_body[..take]);
    }
    shortened.push('_');
    shortened.push_str(hex_str);
    shortened
}

/// Region name under the global kernel-object namespace, tried first.
pub fn global_region_name(prefix: &str, pid: u32) -> String {
    format!(r"Global\{prefix} Log Message Queue - Source Process Id: {pid} - Shared Memory")
}

/// Region name under the local namespace, tried if the global name fails.
pub fn local_region_name(prefix: &str, pid: u32) -> String {
    format!("{prefix} Log Message Queue - Source Process Id: {pid} - Shared Memory")
}

/// Control channel name.
pub fn control_channel_name(prefix: &str) -> String {
    format!("{prefix} Log Sink Server")
}
