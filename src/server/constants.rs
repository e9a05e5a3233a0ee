pub const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;
pub const MAX_FILE_PASSWORD_LENGTH: usize = 256;
