//! Configuration records for containers and the server.
//!
//! The file format is one `key = value` pair per line; string values may be
//! double-quoted; unknown keys and lines without `=` are ignored.

use std::io;
use std::path::Path;
use std::str::FromStr;
use std::{fmt, fs};

/// A parsed configuration record.
#[derive(Clone, Debug)]
pub struct Config {
    /// Total size of the container file in bytes.
    pub total_size: u64,
    /// Size of the header region in bytes.
    pub header_size: u64,
    /// Size of one block in bytes.
    pub block_size: u64,
    /// Number of slots in the metadata table.
    pub max_files: u32,
    /// Number of slots in the user table.
    pub max_users: u32,
    /// Login name of the administrator created at format time.
    pub admin_username: String,
    /// Password of the administrator created at format time.
    pub admin_password: String,
    /// When set, format initializes a random content-encoding permutation
    /// instead of the identity map.
    pub encode_content: bool,
    /// TCP port the server listens on.
    pub port: u16,
    /// Maximum number of simultaneous client connections.
    pub max_connections: u32,
    /// Seconds a client waits for its queued operation before giving up.
    pub queue_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            total_size: 104_857_600,
            header_size: 512,
            block_size: 4096,
            max_files: 1000,
            max_users: 50,
            admin_username: "admin".to_owned(),
            admin_password: "admin123".to_owned(),
            encode_content: false,
            port: 8080,
            max_connections: 20,
            queue_timeout: 30,
        }
    }
}

impl Config {
    /// Loads the configuration file at `path` on top of the defaults.
    pub fn load(path: &Path) -> io::Result<Self> {
        let buf = fs::read_to_string(path)?;
        let mut cfg = Self::default();
        for line in buf.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let val = unquote(val.trim());
            match key {
                "total_size" => cfg.total_size = parse(key, val)?,
                "header_size" => cfg.header_size = parse(key, val)?,
                "block_size" => cfg.block_size = parse(key, val)?,
                "max_files" => cfg.max_files = parse(key, val)?,
                "max_users" => cfg.max_users = parse(key, val)?,
                "admin_username" => cfg.admin_username = val.to_owned(),
                "admin_password" => cfg.admin_password = val.to_owned(),
                "encode_content" => cfg.encode_content = matches!(val, "1" | "true" | "yes"),
                "port" => cfg.port = parse(key, val)?,
                "max_connections" => cfg.max_connections = parse(key, val)?,
                "queue_timeout" => cfg.queue_timeout = parse(key, val)?,
                _ => {}
            }
        }
        Ok(cfg)
    }

    /// Canonical rendering of the geometry, fingerprinted into the header at
    /// format time.
    pub fn canonical(&self) -> String {
        format!(
            "total_size={};header_size={};block_size={};max_files={};max_users={}",
            self.total_size, self.header_size, self.block_size, self.max_files, self.max_users
        )
    }
}

fn parse<T: FromStr>(key: &str, val: &str) -> io::Result<T> {
    val.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid value `{val}` for `{key}`"),
        )
    })
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}; admin `{}`; port {}",
            self.canonical(),
            self.admin_username,
            self.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.total_size, 104_857_600);
        assert_eq!(cfg.block_size, 4096);
        assert_eq!(cfg.max_files, 1000);
        assert_eq!(cfg.admin_username, "admin");
    }

    #[test]
    fn load_overrides_defaults() {
        let path = env::temp_dir().join("ofs-config-test.uconf");
        fs::write(
            &path,
            "# comment\n\
             total_size = 1048576\n\
             block_size=512\n\
             admin_username = \"root\"\n\
             bogus_key = 17\n\
             not a pair\n\
             port = 9000\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(cfg.total_size, 1_048_576);
        assert_eq!(cfg.block_size, 512);
        assert_eq!(cfg.admin_username, "root");
        assert_eq!(cfg.admin_password, "admin123");
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn load_rejects_bad_numbers() {
        let path = env::temp_dir().join("ofs-config-bad.uconf");
        fs::write(&path, "total_size = huge\n").unwrap();
        let res = Config::load(&path);
        fs::remove_file(&path).unwrap();
        assert!(res.is_err());
    }
}
