use std::fmt;

/// Where a server for one backend identity listens.
///
/// Every backend identity maps to exactly one address, so all clients of the
/// same model find the same server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Derive the address for a backend identity such as a checkpoint path.
    ///
    /// Non-alphanumeric characters are replaced with `_`.
    pub fn for_backend(identity: &str) -> Self {
        let name = sanitize(identity);
        #[cfg(unix)]
        {
            let path = std::env::temp_dir().join(format!("{name}.sock"));
            Self(path.to_string_lossy().into_owned())
        }
        #[cfg(windows)]
        {
            Self(format!(r"\\.\pipe\{name}"))
        }
    }

    /// Use a socket path or pipe name verbatim.
    pub fn from_raw(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sanitize(identity: &str) -> String {
    identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("OliBomby/Mapperatorinator-v30"), "OliBomby_Mapperatorinator_v30");
        assert_eq!(sanitize(r"C:\models\my model.ckpt"), "C__models_my_model_ckpt");
    }

    #[test]
    fn test_same_identity_same_address() {
        assert_eq!(Address::for_backend("a/b c"), Address::for_backend("a/b c"));
        assert_ne!(Address::for_backend("model-a"), Address::for_backend("model-b"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_address_is_socket_file() {
        let address = Address::for_backend("ckpt/v1");
        assert!(address.as_str().ends_with("ckpt_v1.sock"));
    }

    #[cfg(windows)]
    #[test]
    fn test_windows_address_is_pipe() {
        assert_eq!(Address::for_backend("ckpt/v1").as_str(), r"\\.\pipe\ckpt_v1");
    }
}
