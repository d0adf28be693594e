// src/commands/callback.rs
//! Deliver job results from the command line

use super::open_farm;
use anyhow::{Context, Result, bail};
use buildfarm::api::{self, CallbackRequest, Endpoint, UploadedFile};
use std::path::{Path, PathBuf};

/// Split a `Key=Value` (or `Key: Value`) header argument
fn parse_header(arg: &str) -> Result<(&str, &str)> {
    let split = arg.split_once('=').or_else(|| arg.split_once(':'));
    match split {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => bail!("invalid header {:?}, expected KEY=VALUE", arg),
    }
}

pub fn cmd_callback(
    config_path: Option<&Path>,
    endpoint: &str,
    headers: &[String],
    files: &[PathBuf],
) -> Result<()> {
    let endpoint: Endpoint = endpoint.parse()?;

    let mut request = CallbackRequest::new();
    for header in headers {
        let (key, value) = parse_header(header)?;
        request.add_header(key, value);
    }
    for path in files {
        let file = UploadedFile::read(path)
            .with_context(|| format!("Failed to read upload {}", path.display()))?;
        request.add_file(file);
    }

    let farm = open_farm(config_path)?;
    let message = api::dispatch(&farm, endpoint, &request)?;
    println!("{}", message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header("Arch=x86_64").unwrap(), ("Arch", "x86_64"));
        assert_eq!(parse_header("Version: 1-r4").unwrap(), ("Version", "1-r4"));
        assert_eq!(parse_header("Splitrepo=").unwrap(), ("Splitrepo", ""));
        assert!(parse_header("=x").is_err());
        assert!(parse_header("nothing").is_err());
    }
}
