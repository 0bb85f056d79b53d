//! Pipe-name generation (§6): a platform-specific opaque path derived from a
//! random 21-byte identifier, used when a named pipe or Unix-domain socket
//! transport needs to agree on an address out of band.

/// Generate a fresh pipe/socket path: `\\.\pipe\vscode-jsonrpc-<hex>-sock` on
/// Windows, `<tmp>/vscode-<hex>.sock` elsewhere.
pub fn generate_pipe_name() -> String {
    let mut bytes = [0u8; 21];
    let first = uuid::Uuid::new_v4().into_bytes();
    let second = uuid::Uuid::new_v4().into_bytes();
    bytes[..16].copy_from_slice(&first);
    bytes[16..].copy_from_slice(&second[..5]);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

    if cfg!(windows) {
        format!(r"\\.\pipe\vscode-jsonrpc-{hex}-sock")
    } else {
        let tmp = std::env::temp_dir();
        tmp.join(format!("vscode-{hex}.sock"))
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_names() {
        let a = generate_pipe_name();
        let b = generate_pipe_name();
        assert_ne!(a, b);
    }

    #[test]
    fn encodes_21_bytes_as_42_hex_chars() {
        let name = generate_pipe_name();
        let hex_run: String = name.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        assert!(hex_run.len() >= 42);
    }
}
