use std::path::PathBuf;

/// Options shared by every action, resolved once at startup.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub secret_file: PathBuf,
    pub debug: bool,
    pub cors_origins: Vec<String>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(secret_file: PathBuf) -> Self {
        Self {
            secret_file,
            debug: false,
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new(PathBuf::from("/etc/garageminder/jwt_secret.key"));
        assert_eq!(
            args.secret_file,
            PathBuf::from("/etc/garageminder/jwt_secret.key")
        );
        assert!(!args.debug);
        assert!(args.cors_origins.is_empty());
    }
}
