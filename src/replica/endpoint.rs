use std::collections::HashSet;
use std::path::Path;
use std::{fmt, fs, io};

/// ReplicaEndpoint describes where one storage replica lives. `location` is opaque to the engine
/// and only interpreted by a `ReplicaConnector`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ReplicaEndpoint {
    pub id: String,
    pub location: String,
}

impl ReplicaEndpoint {
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        ReplicaEndpoint {
            id: id.into(),
            location: location.into(),
        }
    }

    /// Load a replica list file. See `parse_list()` for the format.
    pub fn load_list<P: AsRef<Path>>(path: P) -> Result<Vec<ReplicaEndpoint>, EndpointListError> {
        let contents = fs::read_to_string(path).map_err(EndpointListError::Io)?;
        Self::parse_list(&contents)
    }

    /// One endpoint per line. Blank lines and lines starting with `#` are skipped. A line is either
    /// `location` or `id=location`; unnamed endpoints are called `replica-<n>` where `n` is the
    /// 1-based position of the endpoint in the list.
    pub fn parse_list(contents: &str) -> Result<Vec<ReplicaEndpoint>, EndpointListError> {
        let mut endpoints = Vec::new();
        let mut seen_ids = HashSet::new();

        for (line_idx, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let endpoint = match line.split_once('=') {
                Some((id, location)) => {
                    let (id, location) = (id.trim(), location.trim());
                    if id.is_empty() || location.is_empty() {
                        return Err(EndpointListError::Malformed {
                            line: line_idx + 1,
                            reason: "expected `id=location`",
                        });
                    }
                    ReplicaEndpoint::new(id, location)
                }
                None => ReplicaEndpoint::new(format!("replica-{}", endpoints.len() + 1), line),
            };

            if !seen_ids.insert(endpoint.id.clone()) {
                return Err(EndpointListError::DuplicateId(endpoint.id));
            }
            endpoints.push(endpoint);
        }

        Ok(endpoints)
    }
}

impl fmt::Display for ReplicaEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.id, self.location)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointListError {
    #[error("Failed to read replica list: {0}")]
    Io(io::Error),
    #[error("Malformed replica list at line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
    #[error("Replica id '{0}' appears more than once")]
    DuplicateId(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_mixed_list() {
        let contents = "\
# five node cluster
/var/db/a.sqlite

east = /var/db/b.sqlite
  /var/db/c.sqlite
";
        let endpoints = ReplicaEndpoint::parse_list(contents).unwrap();
        assert_eq!(
            endpoints,
            vec![
                ReplicaEndpoint::new("replica-1", "/var/db/a.sqlite"),
                ReplicaEndpoint::new("east", "/var/db/b.sqlite"),
                ReplicaEndpoint::new("replica-3", "/var/db/c.sqlite"),
            ]
        );
    }

    #[test]
    fn parse_rejects_bad_lines() {
        match ReplicaEndpoint::parse_list("a\n=/nowhere\n") {
            Err(EndpointListError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("Unexpected result: {:?}", other),
        }

        match ReplicaEndpoint::parse_list("x=/a\nx=/b\n") {
            Err(EndpointListError::DuplicateId(id)) => assert_eq!(id, "x"),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "/tmp/one.sqlite").unwrap();
        writeln!(file, "/tmp/two.sqlite").unwrap();

        let endpoints = ReplicaEndpoint::load_list(file.path()).unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[1].id, "replica-2");

        let missing = ReplicaEndpoint::load_list("/definitely/not/a/real/path");
        assert!(matches!(missing, Err(EndpointListError::Io(_))));
    }
}
