//! The byte-address lock region. These four values are a wire contract: any
//! process sharing a database file with this implementation must agree on
//! them exactly, so they must never be derived or tuned per build.

/// Width of the pool that SHARED locks are placed in.
pub const SHARED_SIZE: u32 = 10238;

/// First byte offset of the SHARED pool, at the top of the 32-bit offset
/// space so it never collides with real file data.
pub const SHARED_FIRST: u32 = 0xFFFF_FFFF - SHARED_SIZE + 1;

/// Single byte signaling "a writer intends to promote". Coexists with SHARED.
pub const RESERVED_BYTE: u32 = SHARED_FIRST - 1;

/// Single byte gating new reader entry during writer promotion.
pub const PENDING_BYTE: u32 = RESERVED_BYTE - 1;

/// Number of retries for the PENDING pre-lock before giving up with `BUSY`.
pub const PENDING_RETRIES: u32 = 4;

/// Sleep between PENDING pre-lock retries.
pub const PENDING_RETRY_DELAY_MS: u32 = 1;

/// Maximum length (including NUL) of a path this VFS will hand back.
pub const MAX_PATH_LENGTH: usize = 512;

/// Prefix used for generated temporary file names.
pub const TEMP_FILE_PREFIX: &str = "etilqs_";

/// Number of random characters appended to `TEMP_FILE_PREFIX`.
pub const TEMP_NAME_RANDOM_CHARS: usize = 15;

/// Upper bound on a full temp path: host temp dir + separator + prefix +
/// random suffix + NUL. Callers sizing their own buffers should use this.
pub const TEMP_NAME_MAX: usize = MAX_PATH_LENGTH;

pub(crate) const TEMP_NAME_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
