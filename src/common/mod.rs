//! Common utilities shared by the runner, the proxy and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ErrorKind, ErrorRecord, Result};

/// Split a pipe-delimited scenario list, dropping empty items
///
/// `"v5.3.2| v5.4|"` becomes `["v5.3.2", "v5.4"]`.
pub fn split_pipe_list(value: &str) -> Vec<String> {
    value
        .split('|')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pipe_list() {
        assert_eq!(split_pipe_list("v5.3.2|v5.4"), vec!["v5.3.2", "v5.4"]);
        assert_eq!(split_pipe_list(" esp32 | esp32c6 |"), vec!["esp32", "esp32c6"]);
        assert!(split_pipe_list("").is_empty());
    }
}
