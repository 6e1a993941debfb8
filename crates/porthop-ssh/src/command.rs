//! Construction of the nested reverse-forward command
//!
//! The forward command runs on the endpoint hop and dials back to the
//! source hop, asking it to bind `source_port` and relay inbound
//! connections to `endpoint_port` on the endpoint. Credentials flow into
//! that command line, so it is built as an argument vector and quoted by
//! one small, well-tested function rather than interpolated into a string.

use porthop_core::{AuthMethod, TunnelConfig};

/// Build the argument vector for the nested reverse-forward invocation.
///
/// Password credentials are supplied through `sshpass`; key credentials
/// reference a key file that must be readable on the endpoint host.
pub fn reverse_forward_argv(config: &TunnelConfig) -> Vec<String> {
    let mut argv: Vec<String> = Vec::new();

    if let AuthMethod::Password { password } = &config.source.auth {
        argv.extend(["sshpass".to_string(), "-p".to_string(), password.clone()]);
    }

    argv.push("ssh".to_string());
    argv.push("-N".to_string());
    argv.extend(["-o".to_string(), "StrictHostKeyChecking=no".to_string()]);
    argv.extend(["-o".to_string(), "ExitOnForwardFailure=yes".to_string()]);
    argv.extend(["-o".to_string(), "ServerAliveInterval=15".to_string()]);

    if let AuthMethod::Key { path, .. } = &config.source.auth {
        argv.extend(["-i".to_string(), path.display().to_string()]);
    }

    argv.extend(["-p".to_string(), config.source.port.to_string()]);
    argv.extend([
        "-R".to_string(),
        format!(
            "{}:127.0.0.1:{}",
            config.source_port, config.endpoint_port
        ),
    ]);
    argv.push(format!("{}@{}", config.source.username, config.source.host));

    argv
}

/// Quote one argument for a POSIX shell.
///
/// Wraps in single quotes, with embedded single quotes spelled `'\''`.
/// Plain identifier-like strings pass through unquoted.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@' | '=' | ','));
    if safe {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Join an argument vector into a single shell-safe command line
pub fn join_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use porthop_core::{HostConfig, TunnelName};
    use std::path::PathBuf;

    fn config(auth: AuthMethod) -> TunnelConfig {
        TunnelConfig {
            name: TunnelName::new("db-tunnel"),
            source: HostConfig {
                host: "bastion.example".to_string(),
                port: 2222,
                username: "relay".to_string(),
                auth,
                fingerprint: None,
            },
            endpoint: HostConfig {
                host: "db.example".to_string(),
                port: 22,
                username: "deploy".to_string(),
                auth: AuthMethod::Password {
                    password: "unused-here".to_string(),
                },
                fingerprint: None,
            },
            source_port: 15432,
            endpoint_port: 5432,
            max_retries: 2,
            retry_interval_ms: 1000,
            auto_start: false,
            pinned: false,
        }
    }

    #[test]
    fn test_password_argv_uses_sshpass() {
        let cfg = config(AuthMethod::Password {
            password: "s3cret".to_string(),
        });
        let argv = reverse_forward_argv(&cfg);
        assert_eq!(argv[0], "sshpass");
        assert_eq!(argv[1], "-p");
        assert_eq!(argv[2], "s3cret");
        assert_eq!(argv[3], "ssh");
        assert!(argv.contains(&"-N".to_string()));
        assert!(argv.contains(&"15432:127.0.0.1:5432".to_string()));
        assert_eq!(argv.last().unwrap(), "relay@bastion.example");
    }

    #[test]
    fn test_key_argv_uses_identity_file() {
        let cfg = config(AuthMethod::Key {
            path: PathBuf::from("/home/relay/.ssh/id_ed25519"),
            passphrase: None,
        });
        let argv = reverse_forward_argv(&cfg);
        assert_eq!(argv[0], "ssh");
        let i = argv.iter().position(|a| a == "-i").unwrap();
        assert_eq!(argv[i + 1], "/home/relay/.ssh/id_ed25519");
        assert!(!argv.contains(&"sshpass".to_string()));
    }

    #[test]
    fn test_argv_pins_source_port_flag() {
        let cfg = config(AuthMethod::Key {
            path: PathBuf::from("/home/relay/.ssh/id_ed25519"),
            passphrase: None,
        });
        let argv = reverse_forward_argv(&cfg);
        let p = argv.iter().position(|a| a == "-p").unwrap();
        assert_eq!(argv[p + 1], "2222");
    }

    #[test]
    fn test_quote_passthrough_for_safe_strings() {
        assert_eq!(shell_quote("abc-123"), "abc-123");
        assert_eq!(shell_quote("relay@bastion.example"), "relay@bastion.example");
        assert_eq!(shell_quote("StrictHostKeyChecking=no"), "StrictHostKeyChecking=no");
    }

    #[test]
    fn test_quote_wraps_spaces_and_specials() {
        assert_eq!(shell_quote("p4ss word"), "'p4ss word'");
        assert_eq!(shell_quote("a;rm -rf /"), "'a;rm -rf /'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("'"), "''\\'''");
    }

    #[test]
    fn test_join_argv_quotes_password() {
        let cfg = config(AuthMethod::Password {
            password: "has space'and quote".to_string(),
        });
        let line = join_argv(&reverse_forward_argv(&cfg));
        assert!(line.starts_with("sshpass -p 'has space'\\''and quote' ssh -N"));
        // No raw unquoted password fragment survives
        assert!(!line.contains(" has space"));
    }
}
